//! Diagnostics
//!
//! All compiler output flows through a deduplicating sink owned by the
//! compilation (not global state), keyed on `(level, file, line, col,
//! rendered text)` so a reused call site never floods the user. Secondary
//! messages (hints, fixes, notes) are budgeted per primary message, with
//! the budget widening at higher verbosity.

use std::collections::HashSet;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

#[derive(Debug)]
pub struct Diagnostics {
    seen: HashSet<String>,
    pub verbosity: u8,
    /// Arity mismatches (and friends) become hard errors.
    pub strict: bool,
    /// Suppress terminal output entirely (library/test use).
    pub quiet: bool,
    pub had_error: bool,
    error_count: usize,
    warning_count: usize,
    last_primary_emitted: bool,
    hint_count: u32,
    fix_count: u32,
    note_count: u32,
    /// Captured output for tests and structured consumers.
    pub rendered: Vec<String>,
}

impl Diagnostics {
    pub fn new(verbosity: u8, strict: bool) -> Self {
        Diagnostics {
            seen: HashSet::new(),
            verbosity,
            strict,
            quiet: false,
            had_error: false,
            error_count: 0,
            warning_count: 0,
            last_primary_emitted: false,
            hint_count: 0,
            fix_count: 0,
            note_count: 0,
            rendered: Vec::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    fn mark_seen(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }

    /// Pre-check used by callers that build expensive messages: has this
    /// `(kind, location, name)` already been reported?
    pub fn should_emit(&mut self, kind: &str, span: &Span, name: &str) -> bool {
        self.mark_seen(format!(
            "{kind}|{}|{}|{}|{name}",
            span.file, span.line, span.col
        ))
    }

    fn emit_primary(&mut self, level: Level, span: &Span, text: &str) {
        let label = match level {
            Level::Error => "error",
            Level::Warning => "warning",
        };
        let key = format!("line|{label}|{}|{}|{}|{text}", span.file, span.line, span.col);
        if !self.mark_seen(key) {
            self.last_primary_emitted = false;
            return;
        }
        let color = match level {
            Level::Error => "\x1b[31m",
            Level::Warning => "\x1b[33m",
        };
        let line = format!(
            "{}:{}:{}: {color}{label}:\x1b[0m {text}",
            span.file, span.line, span.col
        );
        if !self.quiet {
            eprintln!("{line}");
        }
        self.rendered.push(line);
        match level {
            Level::Error => {
                self.had_error = true;
                self.error_count += 1;
            }
            Level::Warning => self.warning_count += 1,
        }
        self.last_primary_emitted = true;
        self.hint_count = 0;
        self.fix_count = 0;
        self.note_count = 0;
    }

    pub fn error(&mut self, span: &Span, text: impl AsRef<str>) {
        self.emit_primary(Level::Error, span, text.as_ref());
    }

    pub fn warning(&mut self, span: &Span, text: impl AsRef<str>) {
        self.emit_primary(Level::Warning, span, text.as_ref());
    }

    /// Budget for a secondary message kind: nothing without a fresh primary,
    /// `v0` messages at default verbosity, `v1` at `-v`, unlimited at `-vv`.
    fn within_budget(&self, count: u32, v0: u32, v1: u32) -> bool {
        if !self.last_primary_emitted {
            return false;
        }
        if self.verbosity >= 2 {
            return true;
        }
        let cap = if self.verbosity >= 1 { v1 } else { v0 };
        count < cap
    }

    fn emit_secondary(&mut self, kind: &str, color: &str, text: &str) -> bool {
        let key = format!("{kind}|{text}");
        if !self.mark_seen(key) {
            return false;
        }
        let line = format!("  {color}{kind}:\x1b[0m {text}");
        if !self.quiet {
            eprintln!("{line}");
        }
        self.rendered.push(line);
        true
    }

    pub fn hint(&mut self, text: impl AsRef<str>) {
        if !self.within_budget(self.hint_count, 1, 2) {
            return;
        }
        if self.emit_secondary("hint", "\x1b[33m", text.as_ref()) {
            self.hint_count += 1;
        }
    }

    pub fn fix(&mut self, text: impl AsRef<str>) {
        if !self.within_budget(self.fix_count, 0, 1) {
            return;
        }
        if self.emit_secondary("fix", "\x1b[32m", text.as_ref()) {
            self.fix_count += 1;
        }
    }

    pub fn note(&mut self, span: &Span, text: impl AsRef<str>) {
        if !self.within_budget(self.note_count, 1, 2) {
            return;
        }
        let text = text.as_ref();
        let key = format!("note|{}|{}|{}|{text}", span.file, span.line, span.col);
        if !self.mark_seen(key) {
            return;
        }
        let line = format!(
            "{}:{}:{}: \x1b[36mnote:\x1b[0m {text}",
            span.file, span.line, span.col
        );
        if !self.quiet {
            eprintln!("{line}");
        }
        self.rendered.push(line);
        self.note_count += 1;
    }
}

/// Strict mode applies to user code only; stdlib call sites stay warnings.
pub fn strict_error_enabled(diags: &Diagnostics, span: &Span) -> bool {
    diags.strict && !span.is_stdlib()
}

const SUGGEST_MAX_LEN: usize = 30;
const SUGGEST_MAX_DIST: usize = 3;

/// Bounded Levenshtein distance over the unqualified tails of candidate
/// names; returns the closest candidate within distance 3.
pub fn closest_symbol<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<&str> = None;
    let mut best_dist = SUGGEST_MAX_DIST + 1;
    for cand in candidates {
        let base = cand.rsplit('.').next().unwrap_or(cand);
        if name.len().abs_diff(base.len()) > 3 {
            continue;
        }
        let dist = levenshtein_bounded(name, base);
        if dist < best_dist {
            best_dist = dist;
            best = Some(cand);
        }
    }
    best
}

fn levenshtein_bounded(a: &str, b: &str) -> usize {
    let a: Vec<u8> = a.bytes().take(SUGGEST_MAX_LEN).collect();
    let b: Vec<u8> = b.bytes().take(SUGGEST_MAX_LEN).collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn span(line: u32) -> Span {
        Span::new(Arc::from("t.ny"), line, 1)
    }

    fn quiet(verbosity: u8) -> Diagnostics {
        let mut d = Diagnostics::new(verbosity, false);
        d.quiet = true;
        d
    }

    #[test]
    fn duplicate_primaries_are_dropped() {
        let mut d = quiet(0);
        d.error(&span(1), "undefined symbol 'foo'");
        d.error(&span(1), "undefined symbol 'foo'");
        d.error(&span(2), "undefined symbol 'foo'");
        assert_eq!(d.error_count(), 2);
        assert!(d.had_error);
    }

    #[test]
    fn hints_are_budgeted_by_verbosity() {
        let mut d = quiet(0);
        d.error(&span(1), "bad call");
        d.hint("hint one");
        d.hint("hint two");
        // Default verbosity allows a single hint per primary.
        assert_eq!(d.rendered.iter().filter(|l| l.contains("hint:")).count(), 1);

        let mut d = quiet(2);
        d.error(&span(1), "bad call");
        d.hint("hint one");
        d.hint("hint two");
        assert_eq!(d.rendered.iter().filter(|l| l.contains("hint:")).count(), 2);
    }

    #[test]
    fn secondary_requires_fresh_primary() {
        let mut d = quiet(0);
        d.hint("floating hint");
        assert!(d.rendered.is_empty());
        d.error(&span(1), "e");
        d.error(&span(1), "e"); // deduped: resets last_primary_emitted
        d.hint("after dup");
        assert!(!d.rendered.iter().any(|l| l.contains("after dup")));
    }

    #[test]
    fn fixes_need_verbose_mode() {
        let mut d = quiet(0);
        d.error(&span(1), "e");
        d.fix("do the thing");
        assert!(!d.rendered.iter().any(|l| l.contains("fix:")));
        let mut d = quiet(1);
        d.error(&span(1), "e");
        d.fix("do the thing");
        assert!(d.rendered.iter().any(|l| l.contains("fix:")));
    }

    #[test]
    fn suggests_closest_symbol() {
        let names = ["std.core.append", "list_len", "dict_set"];
        let got = closest_symbol("apend", names.iter().copied());
        assert_eq!(got, Some("std.core.append"));
        let got = closest_symbol("zzzzzz", names.iter().copied());
        assert_eq!(got, None);
    }

    #[test]
    fn suggestion_matches_on_unqualified_tail() {
        let names = ["std.collections.dict.dict_get"];
        assert_eq!(
            closest_symbol("dict_got", names.iter().copied()),
            Some("std.collections.dict.dict_get")
        );
    }

    #[test]
    fn strict_mode_skips_stdlib_spans() {
        let d = Diagnostics::new(0, true);
        let user = span(1);
        let stdlib = Span::new(Arc::from("<stdlib>"), 1, 1);
        assert!(strict_error_enabled(&d, &user));
        assert!(!strict_error_enabled(&d, &stdlib));
    }
}
