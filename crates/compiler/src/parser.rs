//! Recursive-descent parser for Ny
//!
//! Produces the `ast` module's owned tree. Expression parsing is a
//! conventional precedence ladder (ternary at the top, unary and postfix at
//! the bottom); statements are keyword-dispatched. Dotted names fold into a
//! single qualified identifier unless the final segment is being called,
//! which becomes a method call so module-alias dispatch can see the target.

use std::sync::Arc;

use crate::ast::*;
use crate::lexer::{FsPart, Lexer, Token, TokenKind};

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    file: Arc<str>,
}

type PResult<T> = Result<T, String>;

impl Parser {
    pub fn new(source: &str, file: &str) -> PResult<Self> {
        let toks = Lexer::new(source, file).tokenize()?;
        Ok(Parser {
            toks,
            pos: 0,
            file: Arc::from(file),
        })
    }

    fn peek(&self) -> &TokenKind {
        &self.toks[self.pos.min(self.toks.len() - 1)].kind
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.toks[self.pos.min(self.toks.len() - 1)].span.clone()
    }

    fn bump(&mut self) -> TokenKind {
        let t = self.toks[self.pos.min(self.toks.len() - 1)].kind.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: &str) -> String {
        let s = self.span();
        format!("{}:{}:{}: {}", s.file, s.line, s.col, msg)
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.err(&format!("expected '{op}'")))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.bump() {
            TokenKind::Ident(n) => Ok(n),
            _ => Err(self.err("expected identifier")),
        }
    }

    // -----------------------------------------------------------------------
    // Program / statements
    // -----------------------------------------------------------------------

    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !matches!(self.peek(), TokenKind::Eof) {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    fn parse_block(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.expect_op("{")?;
        let mut body = Vec::new();
        while !self.is_op("}") {
            if matches!(self.peek(), TokenKind::Eof) {
                return Err(self.err("unterminated block"));
            }
            body.push(self.parse_stmt()?);
        }
        self.expect_op("}")?;
        Ok(Stmt {
            kind: StmtKind::Block(body),
            span,
        })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let span = self.span();
        // Attributes apply to the following fn declaration.
        if self.is_op("@") {
            return self.parse_attributed_fn();
        }
        if let TokenKind::Ident(kw) = self.peek().clone() {
            match kw.as_str() {
                "fn" if matches!(self.peek_at(1), TokenKind::Ident(_)) => {
                    return self.parse_fn_decl(false, None);
                }
                "let" => return self.parse_let(),
                "return" => {
                    self.bump();
                    let value = if self.is_op(";") || self.is_op("}") {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.eat_op(";");
                    return Ok(Stmt {
                        kind: StmtKind::Return(value),
                        span,
                    });
                }
                "if" => return self.parse_if(),
                "while" => {
                    self.bump();
                    let test = self.parse_expr()?;
                    let body = Box::new(self.parse_block()?);
                    return Ok(Stmt {
                        kind: StmtKind::While { test, body },
                        span,
                    });
                }
                "for" => {
                    self.bump();
                    let var = self.expect_ident()?;
                    if !self.eat_kw("in") {
                        return Err(self.err("expected 'in' in for loop"));
                    }
                    let iterable = self.parse_expr()?;
                    let body = Box::new(self.parse_block()?);
                    return Ok(Stmt {
                        kind: StmtKind::For {
                            var,
                            iterable,
                            body,
                        },
                        span,
                    });
                }
                "try" => {
                    self.bump();
                    let body = Box::new(self.parse_block()?);
                    if !self.eat_kw("catch") {
                        return Err(self.err("expected 'catch' after try block"));
                    }
                    let err = if matches!(self.peek(), TokenKind::Ident(_)) && !self.is_op("{") {
                        Some(self.expect_ident()?)
                    } else {
                        None
                    };
                    let handler = Box::new(self.parse_block()?);
                    return Ok(Stmt {
                        kind: StmtKind::Try { body, err, handler },
                        span,
                    });
                }
                "defer" => {
                    self.bump();
                    let body = Box::new(self.parse_block()?);
                    return Ok(Stmt {
                        kind: StmtKind::Defer(body),
                        span,
                    });
                }
                "break" => {
                    self.bump();
                    self.eat_op(";");
                    return Ok(Stmt {
                        kind: StmtKind::Break,
                        span,
                    });
                }
                "continue" => {
                    self.bump();
                    self.eat_op(";");
                    return Ok(Stmt {
                        kind: StmtKind::Continue,
                        span,
                    });
                }
                "match" => {
                    let node = self.parse_match()?;
                    return Ok(Stmt {
                        kind: StmtKind::Match(node),
                        span,
                    });
                }
                "module" => {
                    self.bump();
                    let name = self.parse_dotted_name()?;
                    self.expect_op("{")?;
                    let mut body = Vec::new();
                    let mut export_all = false;
                    while !self.is_op("}") {
                        if matches!(self.peek(), TokenKind::Eof) {
                            return Err(self.err("unterminated module body"));
                        }
                        if self.is_kw("export") && matches!(self.peek_at(1), TokenKind::Op(o) if o == "*")
                        {
                            self.bump();
                            self.bump();
                            self.eat_op(";");
                            export_all = true;
                            continue;
                        }
                        body.push(self.parse_stmt()?);
                    }
                    self.expect_op("}")?;
                    return Ok(Stmt {
                        kind: StmtKind::Module {
                            name,
                            body,
                            export_all,
                        },
                        span,
                    });
                }
                "export" => {
                    self.bump();
                    let mut names = vec![self.expect_ident()?];
                    while self.eat_op(",") {
                        names.push(self.expect_ident()?);
                    }
                    self.eat_op(";");
                    return Ok(Stmt {
                        kind: StmtKind::Export(names),
                        span,
                    });
                }
                "use" => return self.parse_use(),
                "layout" => return self.parse_layout(),
                _ => {}
            }
        }

        // Assignment: `name (, name)* = expr (, expr)*`
        if matches!(self.peek(), TokenKind::Ident(_)) {
            let mut look = 1;
            let mut names = 1;
            loop {
                match (self.peek_at(look), self.peek_at(look + 1)) {
                    (TokenKind::Op(c), TokenKind::Ident(_)) if c == "," => {
                        look += 2;
                        names += 1;
                    }
                    _ => break,
                }
            }
            if matches!(self.peek_at(look), TokenKind::Op(o) if o == "=") {
                let mut targets = Vec::with_capacity(names);
                for i in 0..names {
                    targets.push(self.expect_ident()?);
                    if i + 1 < names {
                        self.expect_op(",")?;
                    }
                }
                self.expect_op("=")?;
                let mut exprs = vec![self.parse_expr()?];
                while self.eat_op(",") {
                    exprs.push(self.parse_expr()?);
                }
                self.eat_op(";");
                let is_destructure = targets.len() > 1 && exprs.len() == 1;
                return Ok(Stmt {
                    kind: StmtKind::Var {
                        names: targets,
                        exprs,
                        is_decl: false,
                        is_mut: true,
                        is_destructure,
                    },
                    span,
                });
            }
        }

        let expr = self.parse_expr()?;
        self.eat_op(";");
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            span,
        })
    }

    fn parse_attributed_fn(&mut self) -> PResult<Stmt> {
        let mut declared_pure = false;
        let mut declared_effects: Option<u32> = None;
        while self.eat_op("@") {
            let name = self.expect_ident()?;
            match name.as_str() {
                "pure" => declared_pure = true,
                "effects" => {
                    self.expect_op("(")?;
                    let mut mask = 0u32;
                    if !self.is_op(")") {
                        loop {
                            let tok = self.expect_ident()?;
                            mask |= match tok.as_str() {
                                "io" => FX_IO,
                                "alloc" => FX_ALLOC,
                                "ffi" => FX_FFI,
                                "thread" => FX_THREAD,
                                _ => return Err(self.err("unknown effect name")),
                            };
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                    }
                    self.expect_op(")")?;
                    declared_effects = Some(mask);
                }
                _ => return Err(self.err("unknown attribute")),
            }
        }
        if !self.is_kw("fn") {
            return Err(self.err("attributes must precede a fn declaration"));
        }
        self.parse_fn_decl(declared_pure, declared_effects)
    }

    fn parse_fn_decl(&mut self, declared_pure: bool, declared_effects: Option<u32>) -> PResult<Stmt> {
        let span = self.span();
        self.bump(); // fn
        let name = self.expect_ident()?;
        let (params, is_variadic) = self.parse_params()?;
        let return_type = if self.eat_op("->") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let body = Box::new(self.parse_block()?);
        Ok(Stmt {
            kind: StmtKind::Func(FuncDecl {
                name,
                params,
                body,
                is_variadic,
                return_type,
                declared_pure,
                declared_effects,
            }),
            span,
        })
    }

    fn parse_params(&mut self) -> PResult<(Vec<Param>, bool)> {
        self.expect_op("(")?;
        let mut params = Vec::new();
        let mut is_variadic = false;
        while !self.is_op(")") {
            if self.eat_op("*") {
                is_variadic = true;
            }
            let name = self.expect_ident()?;
            let type_name = if self.eat_op(":") {
                Some(self.expect_ident()?)
            } else {
                None
            };
            let default = if self.eat_op("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name,
                type_name,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((params, is_variadic))
    }

    fn parse_let(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.bump(); // let
        let is_mut = self.eat_kw("mut");
        let mut names = vec![self.expect_ident()?];
        while self.eat_op(",") {
            names.push(self.expect_ident()?);
        }
        self.expect_op("=")?;
        let mut exprs = vec![self.parse_expr()?];
        while self.eat_op(",") {
            exprs.push(self.parse_expr()?);
        }
        self.eat_op(";");
        let is_destructure = names.len() > 1 && exprs.len() == 1;
        Ok(Stmt {
            kind: StmtKind::Var {
                names,
                exprs,
                is_decl: true,
                is_mut,
                is_destructure,
            },
            span,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.bump(); // if / elif
        let test = self.parse_expr()?;
        let conseq = Box::new(self.parse_block()?);
        let alt = if self.is_kw("elif") {
            Some(Box::new(self.parse_if()?))
        } else if self.eat_kw("else") {
            Some(Box::new(self.parse_block()?))
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::If { test, conseq, alt },
            span,
        })
    }

    fn parse_match(&mut self) -> PResult<MatchNode> {
        self.bump(); // match
        let test = Box::new(self.parse_expr()?);
        self.expect_op("{")?;
        let mut arms = Vec::new();
        let mut default = None;
        while !self.is_op("}") {
            if matches!(self.peek(), TokenKind::Eof) {
                return Err(self.err("unterminated match"));
            }
            let is_wild = matches!(self.peek(), TokenKind::Ident(n) if n == "_");
            let mut patterns = vec![self.parse_expr()?];
            while self.eat_op(",") {
                patterns.push(self.parse_expr()?);
            }
            let body = self.parse_block()?;
            if is_wild && patterns.len() == 1 {
                default = Some(Box::new(body));
            } else {
                arms.push(MatchArm { patterns, body });
            }
        }
        self.expect_op("}")?;
        Ok(MatchNode {
            test,
            arms,
            default,
        })
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_ident()?;
        while self.is_op(".") && matches!(self.peek_at(1), TokenKind::Ident(_)) {
            self.bump();
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_use(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.bump(); // use
        let mut module = self.expect_ident()?;
        let mut import_all = false;
        while self.is_op(".") {
            self.bump();
            if self.eat_op("*") {
                import_all = true;
                break;
            }
            module.push('.');
            module.push_str(&self.expect_ident()?);
        }
        let alias = if self.eat_kw("as") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let mut imports = Vec::new();
        if self.eat_op("(") {
            while !self.is_op(")") {
                let name = self.expect_ident()?;
                let alias = if self.eat_kw("as") {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                imports.push(UseItem { name, alias });
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        self.eat_op(";");
        Ok(Stmt {
            kind: StmtKind::Use {
                module,
                alias,
                import_all,
                imports,
            },
            span,
        })
    }

    fn parse_layout(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.bump(); // layout
        let name = self.expect_ident()?;
        self.expect_op("{")?;
        let mut fields = Vec::new();
        while !self.is_op("}") {
            let fname = self.expect_ident()?;
            self.expect_op(":")?;
            let width = match self.bump() {
                TokenKind::Int(w) if matches!(w, 1 | 2 | 4 | 8) => w as u32,
                _ => return Err(self.err("layout field width must be 1, 2, 4, or 8")),
            };
            fields.push(LayoutField { name: fname, width });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Stmt {
            kind: StmtKind::Layout { name, fields },
            span,
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let span = self.span();
        let cond = self.parse_logical_or()?;
        if self.eat_op("?") {
            let then_val = self.parse_expr()?;
            self.expect_op(":")?;
            let else_val = self.parse_expr()?;
            return Ok(Expr {
                kind: ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_val: Box::new(then_val),
                    else_val: Box::new(else_val),
                },
                span,
            });
        }
        Ok(cond)
    }

    fn binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> PResult<Expr>,
        logical: bool,
    ) -> PResult<Expr> {
        let span = self.span();
        let mut left = next(self)?;
        loop {
            let matched = ops.iter().find(|op| {
                if **op == "in" {
                    self.is_kw("in")
                } else {
                    self.is_op(op)
                }
            });
            let Some(op) = matched else {
                return Ok(left);
            };
            let op = (*op).to_string();
            self.bump();
            let right = next(self)?;
            left = Expr {
                kind: if logical {
                    ExprKind::Logical {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                } else {
                    ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                },
                span: span.clone(),
            };
        }
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        self.binary_level(&["||"], Self::parse_logical_and, true)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        self.binary_level(&["&&"], Self::parse_bitor, true)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        self.binary_level(&["|"], Self::parse_bitxor, false)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        self.binary_level(&["^"], Self::parse_bitand, false)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        self.binary_level(&["&"], Self::parse_equality, false)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.binary_level(&["==", "!="], Self::parse_comparison, false)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        self.binary_level(&["<=", ">=", "<", ">", "in"], Self::parse_shift, false)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        self.binary_level(&["<<", ">>"], Self::parse_additive, false)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.binary_level(&["+", "-"], Self::parse_multiplicative, false)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(&["*", "/", "%"], Self::parse_unary, false)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let span = self.span();
        for op in ["!", "-", "~"] {
            if self.is_op(op) {
                self.bump();
                let right = self.parse_unary()?;
                return Ok(Expr {
                    kind: ExprKind::Unary {
                        op: op.to_string(),
                        right: Box::new(right),
                    },
                    span,
                });
            }
        }
        self.parse_postfix()
    }

    fn parse_call_args(&mut self) -> PResult<Vec<CallArg>> {
        self.expect_op("(")?;
        let mut args = Vec::new();
        while !self.is_op(")") {
            // Keyword argument: `name: expr`
            let name = if matches!(self.peek(), TokenKind::Ident(_))
                && matches!(self.peek_at(1), TokenKind::Op(o) if o == ":")
            {
                let n = self.expect_ident()?;
                self.bump(); // :
                Some(n)
            } else {
                None
            };
            let value = self.parse_expr()?;
            args.push(CallArg { name, value });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            if self.is_op("(") {
                let args = self.parse_call_args()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                };
                continue;
            }
            if self.is_op(".") && matches!(self.peek_at(1), TokenKind::Ident(_)) {
                self.bump();
                let name = self.expect_ident()?;
                if self.is_op("(") {
                    let args = self.parse_call_args()?;
                    expr = Expr {
                        kind: ExprKind::MethodCall {
                            target: Box::new(expr),
                            name,
                            args,
                        },
                        span,
                    };
                } else if let ExprKind::Ident(base) = &expr.kind {
                    // Fold `a.b` into the qualified name `a.b`.
                    expr = Expr {
                        kind: ExprKind::Ident(format!("{base}.{name}")),
                        span,
                    };
                } else {
                    // Dynamic member read on a computed value: `get(t, "name")`.
                    expr = Expr {
                        kind: ExprKind::MethodCall {
                            target: Box::new(expr),
                            name: "get".to_string(),
                            args: vec![CallArg {
                                name: None,
                                value: Expr {
                                    kind: ExprKind::Str(name),
                                    span: span.clone(),
                                },
                            }],
                        },
                        span,
                    };
                }
                continue;
            }
            if self.is_op("[") {
                self.bump();
                let mut start = None;
                let mut stop = None;
                let mut step = None;
                let mut is_slice = false;
                if !self.is_op(":") && !self.is_op("]") {
                    start = Some(Box::new(self.parse_expr()?));
                }
                if self.eat_op(":") {
                    is_slice = true;
                    if !self.is_op(":") && !self.is_op("]") {
                        stop = Some(Box::new(self.parse_expr()?));
                    }
                    if self.eat_op(":") && !self.is_op("]") {
                        step = Some(Box::new(self.parse_expr()?));
                    }
                }
                self.expect_op("]")?;
                if start.is_none() && !is_slice {
                    return Err(self.err("empty index expression"));
                }
                expr = Expr {
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        start,
                        stop,
                        step,
                        is_slice,
                    },
                    span,
                };
                continue;
            }
            return Ok(expr);
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Int(v) => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Int(v),
                    span,
                })
            }
            TokenKind::Float(v) => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Float(v),
                    span,
                })
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Str(s),
                    span,
                })
            }
            TokenKind::FString(parts) => {
                self.bump();
                let mut out = Vec::new();
                for part in parts {
                    match part {
                        FsPart::Lit(s) => out.push(FStringPart::Lit(s)),
                        FsPart::Expr(src) => {
                            let mut sub = Parser::new(&src, &self.file)?;
                            out.push(FStringPart::Expr(sub.parse_expr()?));
                        }
                    }
                }
                Ok(Expr {
                    kind: ExprKind::FString(out),
                    span,
                })
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.bump();
                    Ok(Expr {
                        kind: ExprKind::Bool(name == "true"),
                        span,
                    })
                }
                "none" => {
                    self.bump();
                    Ok(Expr {
                        kind: ExprKind::Ident("none".to_string()),
                        span,
                    })
                }
                "fn" => {
                    self.bump();
                    let (params, is_variadic) = self.parse_params()?;
                    let body = Box::new(self.parse_block()?);
                    Ok(Expr {
                        kind: ExprKind::Lambda {
                            params,
                            body,
                            is_variadic,
                            is_fn: true,
                        },
                        span,
                    })
                }
                "comptime" => {
                    self.bump();
                    let body = Box::new(self.parse_block()?);
                    Ok(Expr {
                        kind: ExprKind::Comptime(body),
                        span,
                    })
                }
                "asm" => {
                    self.bump();
                    self.expect_op("(")?;
                    let code = match self.bump() {
                        TokenKind::Str(s) => s,
                        _ => return Err(self.err("asm expects a code string")),
                    };
                    self.expect_op(",")?;
                    let constraints = match self.bump() {
                        TokenKind::Str(s) => s,
                        _ => return Err(self.err("asm expects a constraint string")),
                    };
                    let mut args = Vec::new();
                    while self.eat_op(",") {
                        args.push(self.parse_expr()?);
                    }
                    self.expect_op(")")?;
                    Ok(Expr {
                        kind: ExprKind::Asm {
                            code,
                            constraints,
                            args,
                        },
                        span,
                    })
                }
                "match" => {
                    let node = self.parse_match()?;
                    Ok(Expr {
                        kind: ExprKind::Match(node),
                        span,
                    })
                }
                _ => {
                    self.bump();
                    Ok(Expr {
                        kind: ExprKind::Ident(name),
                        span,
                    })
                }
            },
            TokenKind::Op(op) => match op.as_str() {
                "(" => {
                    self.bump();
                    // Tuple or parenthesized expression.
                    let first = self.parse_expr()?;
                    if self.eat_op(",") {
                        let mut items = vec![first];
                        while !self.is_op(")") {
                            items.push(self.parse_expr()?);
                            if !self.eat_op(",") {
                                break;
                            }
                        }
                        self.expect_op(")")?;
                        return Ok(Expr {
                            kind: ExprKind::Tuple(items),
                            span,
                        });
                    }
                    self.expect_op(")")?;
                    Ok(first)
                }
                "[" => {
                    self.bump();
                    let mut items = Vec::new();
                    while !self.is_op("]") {
                        items.push(self.parse_expr()?);
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    self.expect_op("]")?;
                    Ok(Expr {
                        kind: ExprKind::List(items),
                        span,
                    })
                }
                "{" => {
                    self.bump();
                    let mut pairs = Vec::new();
                    while !self.is_op("}") {
                        let key = self.parse_expr()?;
                        self.expect_op(":")?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        if !self.eat_op(",") {
                            break;
                        }
                    }
                    self.expect_op("}")?;
                    Ok(Expr {
                        kind: ExprKind::Dict(pairs),
                        span,
                    })
                }
                _ => Err(self.err(&format!("unexpected token '{op}'"))),
            },
            TokenKind::Eof => Err(self.err("unexpected end of input")),
        }
    }
}

/// Convenience entry: lex and parse a whole source buffer.
pub fn parse_source(source: &str, file: &str) -> Result<Program, String> {
    Parser::new(source, file)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_source(src, "<test>").unwrap()
    }

    #[test]
    fn parses_fn_with_return() {
        let p = parse("fn main() { return 1 + 2 }");
        assert_eq!(p.body.len(), 1);
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!("expected fn");
        };
        assert_eq!(f.name, "main");
        assert!(f.params.is_empty());
    }

    #[test]
    fn parses_let_and_list_literal() {
        let p = parse("fn main() { let xs = [10, 20, 30]; return xs[1] }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        assert!(matches!(
            &body[0].kind,
            StmtKind::Var { names, is_decl: true, .. } if names == &["xs".to_string()]
        ));
    }

    #[test]
    fn parses_lambda_expression() {
        let p = parse("fn main() { let f = fn(x) { return x * x }; return f(7) }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Var { exprs, .. } = &body[0].kind else {
            panic!()
        };
        assert!(matches!(
            exprs[0].kind,
            ExprKind::Lambda { is_fn: true, .. }
        ));
    }

    #[test]
    fn folds_dotted_names_and_method_calls() {
        let p = parse("fn main() { let g = std.core.add; return M.dup(21) }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Var { exprs, .. } = &body[0].kind else {
            panic!()
        };
        assert!(matches!(&exprs[0].kind, ExprKind::Ident(n) if n == "std.core.add"));
        let StmtKind::Return(Some(r)) = &body[1].kind else {
            panic!()
        };
        assert!(matches!(&r.kind, ExprKind::MethodCall { name, .. } if name == "dup"));
    }

    #[test]
    fn parses_try_catch() {
        let p = parse("fn main() { try { return 1 } catch e { return 42 } }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        assert!(matches!(
            &body[0].kind,
            StmtKind::Try { err: Some(e), .. } if e == "e"
        ));
    }

    #[test]
    fn parses_slices_and_indexing() {
        let p = parse("fn f(xs) { let a = xs[1]; let b = xs[1:2]; let c = xs[::2]; return a }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let get_index = |i: usize| -> &ExprKind {
            let StmtKind::Var { exprs, .. } = &body[i].kind else {
                panic!()
            };
            &exprs[0].kind
        };
        assert!(matches!(get_index(0), ExprKind::Index { is_slice: false, .. }));
        assert!(matches!(
            get_index(1),
            ExprKind::Index {
                is_slice: true,
                stop: Some(_),
                ..
            }
        ));
        assert!(matches!(
            get_index(2),
            ExprKind::Index {
                is_slice: true,
                step: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn parses_match_with_wildcard() {
        let p = parse("fn f(x) { match x { 1, 2 { return 10 } _ { return 0 } } }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Match(m) = &body[0].kind else {
            panic!()
        };
        assert_eq!(m.arms.len(), 1);
        assert_eq!(m.arms[0].patterns.len(), 2);
        assert!(m.default.is_some());
    }

    #[test]
    fn parses_module_use_export() {
        let p = parse(
            "module M { fn dup(x) { return x * 2 } export dup }\nuse M;\nfn main() { return M.dup(21) }",
        );
        assert!(matches!(&p.body[0].kind, StmtKind::Module { name, .. } if name == "M"));
        assert!(matches!(&p.body[1].kind, StmtKind::Use { module, .. } if module == "M"));
    }

    #[test]
    fn parses_use_forms() {
        let p = parse("use std.io;\nuse std.core.*;\nuse M as N;\nuse K (a, b as c);");
        assert!(matches!(
            &p.body[0].kind,
            StmtKind::Use { module, import_all: false, .. } if module == "std.io"
        ));
        assert!(matches!(
            &p.body[1].kind,
            StmtKind::Use { module, import_all: true, .. } if module == "std.core"
        ));
        assert!(matches!(
            &p.body[2].kind,
            StmtKind::Use { alias: Some(a), .. } if a == "N"
        ));
        let StmtKind::Use { imports, .. } = &p.body[3].kind else {
            panic!()
        };
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[1].alias.as_deref(), Some("c"));
    }

    #[test]
    fn parses_layout() {
        let p = parse("layout Header { size: 8, flags: 4, kind: 1 }");
        let StmtKind::Layout { fields, .. } = &p.body[0].kind else {
            panic!()
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].width, 4);
    }

    #[test]
    fn parses_attributes() {
        let p = parse("@pure\nfn id(x) { return x }\n@effects(io, alloc)\nfn log(x) { return x }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        assert!(f.declared_pure);
        let StmtKind::Func(g) = &p.body[1].kind else {
            panic!()
        };
        assert_eq!(g.declared_effects, Some(FX_IO | FX_ALLOC));
    }

    #[test]
    fn parses_ternary_and_logical() {
        let p = parse("fn f(a, b) { return a && b ? 1 : 2 }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Return(Some(e)) = &body[0].kind else {
            panic!()
        };
        assert!(matches!(&e.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn precedence_mul_over_add() {
        let p = parse("fn f() { return 1 + 2 * 3 }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Return(Some(e)) = &body[0].kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &e.kind else {
            panic!()
        };
        assert_eq!(op, "+");
        assert!(matches!(&right.kind, ExprKind::Binary { op, .. } if op == "*"));
    }

    #[test]
    fn parses_fstring_expression() {
        let p = parse(r#"fn f(x) { return f"v={x + 1}!" }"#);
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        let StmtKind::Return(Some(e)) = &body[0].kind else {
            panic!()
        };
        let ExprKind::FString(parts) = &e.kind else {
            panic!()
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn parses_defer_and_loops() {
        let p = parse("fn f() { defer { cleanup() } while true { break } for x in xs { continue } }");
        let StmtKind::Func(f) = &p.body[0].kind else {
            panic!()
        };
        let StmtKind::Block(body) = &f.body.kind else {
            panic!()
        };
        assert!(matches!(&body[0].kind, StmtKind::Defer(_)));
        assert!(matches!(&body[1].kind, StmtKind::While { .. }));
        assert!(matches!(&body[2].kind, StmtKind::For { var, .. } if var == "x"));
    }
}
