//! Lexer for Ny source
//!
//! Hand-written scanner. Comments start with `#` or `//` and run to end of
//! line. String literals support the usual escapes; `f"…{expr}…"` literals
//! are split into parts here and the parser lowers each embedded expression
//! source on its own.

use std::sync::Arc;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw f-string parts: literal text and embedded expression source.
    FString(Vec<FsPart>),
    /// Operators and punctuation, by lexeme.
    Op(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FsPart {
    Lit(String),
    Expr(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
    file: Arc<str>,
}

/// Multi-character operators, longest first so `<<` wins over `<`.
const OPERATORS: &[&str] = &[
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "!", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ";", ":", ".", "?", "@",
];

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: &str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file: Arc::from(file),
        }
    }

    fn span(&self) -> Span {
        Span::new(self.file.clone(), self.line, self.col)
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.pos).unwrap_or(&0)
    }

    fn peek2(&self) -> u8 {
        *self.src.get(self.pos + 1).unwrap_or(&0)
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'#' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                }
                b'/' if self.peek2() == b'/' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let span = self.span();
            let c = self.peek();
            if c == 0 {
                out.push(Token {
                    kind: TokenKind::Eof,
                    span,
                });
                return Ok(out);
            }
            if c == b'f' && self.peek2() == b'"' {
                self.bump();
                let parts = self.scan_fstring(&span)?;
                out.push(Token {
                    kind: TokenKind::FString(parts),
                    span,
                });
                continue;
            }
            if c.is_ascii_alphabetic() || c == b'_' {
                let mut name = String::new();
                while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                    name.push(self.bump() as char);
                }
                out.push(Token {
                    kind: TokenKind::Ident(name),
                    span,
                });
                continue;
            }
            if c.is_ascii_digit() {
                out.push(Token {
                    kind: self.scan_number(&span)?,
                    span,
                });
                continue;
            }
            if c == b'"' {
                let text = self.scan_string(&span)?;
                out.push(Token {
                    kind: TokenKind::Str(text),
                    span,
                });
                continue;
            }
            if let Some(op) = self.scan_operator() {
                out.push(Token {
                    kind: TokenKind::Op(op),
                    span,
                });
                continue;
            }
            return Err(format!(
                "{}:{}:{}: unexpected character '{}'",
                span.file, span.line, span.col, c as char
            ));
        }
    }

    fn scan_operator(&mut self) -> Option<String> {
        for op in OPERATORS {
            let bytes = op.as_bytes();
            if self.src[self.pos..].starts_with(bytes) {
                for _ in 0..bytes.len() {
                    self.bump();
                }
                return Some((*op).to_string());
            }
        }
        None
    }

    fn scan_number(&mut self, span: &Span) -> Result<TokenKind, String> {
        let start = self.pos;
        if self.peek() == b'0' && (self.peek2() == b'x' || self.peek2() == b'X') {
            self.bump();
            self.bump();
            let hex_start = self.pos;
            while self.peek().is_ascii_hexdigit() || self.peek() == b'_' {
                self.bump();
            }
            let text: String = std::str::from_utf8(&self.src[hex_start..self.pos])
                .unwrap_or("")
                .replace('_', "");
            return u64::from_str_radix(&text, 16)
                .map(|v| TokenKind::Int(v as i64))
                .map_err(|_| {
                    format!(
                        "{}:{}:{}: invalid hex literal",
                        span.file, span.line, span.col
                    )
                });
        }
        while self.peek().is_ascii_digit() || self.peek() == b'_' {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == b'.' && self.peek2().is_ascii_digit() {
            is_float = true;
            self.bump();
            while self.peek().is_ascii_digit() || self.peek() == b'_' {
                self.bump();
            }
        }
        if matches!(self.peek(), b'e' | b'E')
            && (self.peek2().is_ascii_digit() || matches!(self.peek2(), b'+' | b'-'))
        {
            is_float = true;
            self.bump();
            if matches!(self.peek(), b'+' | b'-') {
                self.bump();
            }
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        let text: String = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or("")
            .replace('_', "");
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| format!("{}:{}:{}: invalid float literal", span.file, span.line, span.col))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| format!("{}:{}:{}: invalid int literal", span.file, span.line, span.col))
        }
    }

    fn scan_escape(&mut self) -> char {
        match self.bump() {
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'0' => '\0',
            b'\\' => '\\',
            b'"' => '"',
            b'{' => '{',
            b'}' => '}',
            b'e' => '\x1b',
            other => other as char,
        }
    }

    fn scan_string(&mut self, span: &Span) -> Result<String, String> {
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                0 => {
                    return Err(format!(
                        "{}:{}:{}: unterminated string literal",
                        span.file, span.line, span.col
                    ));
                }
                b'"' => return Ok(text),
                b'\\' => text.push(self.scan_escape()),
                c => text.push(c as char),
            }
        }
    }

    fn scan_fstring(&mut self, span: &Span) -> Result<Vec<FsPart>, String> {
        self.bump(); // opening quote
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            match self.bump() {
                0 => {
                    return Err(format!(
                        "{}:{}:{}: unterminated f-string",
                        span.file, span.line, span.col
                    ));
                }
                b'"' => {
                    if !lit.is_empty() {
                        parts.push(FsPart::Lit(lit));
                    }
                    return Ok(parts);
                }
                b'\\' => lit.push(self.scan_escape()),
                b'{' => {
                    if !lit.is_empty() {
                        parts.push(FsPart::Lit(std::mem::take(&mut lit)));
                    }
                    let mut depth = 1usize;
                    let mut src = String::new();
                    loop {
                        match self.bump() {
                            0 => {
                                return Err(format!(
                                    "{}:{}:{}: unterminated f-string expression",
                                    span.file, span.line, span.col
                                ));
                            }
                            b'{' => {
                                depth += 1;
                                src.push('{');
                            }
                            b'}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                src.push('}');
                            }
                            c => src.push(c as char),
                        }
                    }
                    parts.push(FsPart::Expr(src));
                }
                c => lit.push(c as char),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "<test>")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn scans_idents_and_ints() {
        let toks = lex("let x = 42");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("let".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Op("=".into()),
                TokenKind::Int(42),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_hex_and_floats() {
        assert_eq!(lex("0xff")[0], TokenKind::Int(255));
        assert_eq!(lex("1_000")[0], TokenKind::Int(1000));
        assert_eq!(lex("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(lex("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn multi_char_operators_win() {
        assert_eq!(
            lex("a << b <= c")
                .iter()
                .filter(|t| matches!(t, TokenKind::Op(_)))
                .count(),
            2
        );
        assert_eq!(lex("a != b")[1], TokenKind::Op("!=".into()));
        assert_eq!(lex("x && y")[1], TokenKind::Op("&&".into()));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(lex(r#""a\nb""#)[0], TokenKind::Str("a\nb".into()));
        assert_eq!(lex(r#""q\"q""#)[0], TokenKind::Str("q\"q".into()));
    }

    #[test]
    fn comments_are_trivia() {
        let toks = lex("1 # comment\n2 // also\n3");
        assert_eq!(
            toks,
            vec![
                TokenKind::Int(1),
                TokenKind::Int(2),
                TokenKind::Int(3),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn fstring_splits_parts() {
        let toks = lex(r#"f"a{x + 1}b""#);
        match &toks[0] {
            TokenKind::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], FsPart::Lit("a".into()));
                assert_eq!(parts[1], FsPart::Expr("x + 1".into()));
                assert_eq!(parts[2], FsPart::Lit("b".into()));
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn line_and_column_tracking() {
        let toks = Lexer::new("a\n  b", "<test>").tokenize().unwrap();
        assert_eq!(toks[0].span.line, 1);
        assert_eq!(toks[1].span.line, 2);
        assert_eq!(toks[1].span.col, 3);
    }
}
