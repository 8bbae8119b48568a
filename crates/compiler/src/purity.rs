//! Purity, effects, and escape inference
//!
//! A whole-module fixed point over the user functions collected by the
//! code generator. For each function it computes, pass by pass until an
//! iteration changes nothing (capped at 64 iterations as a safety net):
//!
//! - **is_pure** — the body performs only pure expressions and every call
//!   target is itself pure; builtins are classified against a fixed list.
//! - **effects** ⊆ {IO, ALLOC, FFI, THREAD} — union of callee effects plus
//!   effects intrinsic to expression kinds (collection literals and
//!   lambdas allocate, inline asm is FFI).
//! - **is_memo_safe** — strictly stronger than pure: additionally rejects
//!   try, asm, comptime, and lambda expressions.
//! - **escape summary** — whether arguments escape or are mutated and
//!   whether the return value may alias a parameter.
//!
//! Recursion is detected separately by Tarjan's SCC algorithm over the
//! direct-call graph; call edges ignore names shadowed by locals, tracked
//! through a Bloom-filter-backed name set.
//!
//! Declared `@pure` / `@effects(…)` contracts are verified against the
//! inferred masks, and the environment-gated policies reject functions
//! that violate them. Both are hard errors.

use std::collections::HashMap;

use crate::ast::{
    Expr, ExprKind, FStringPart, FX_ALL, FX_ALLOC, FX_FFI, FX_IO, FX_THREAD, Stmt, StmtKind,
};
use crate::codegen::{CodeGen, FuncFacts};

const MAX_ITERS: usize = 64;

/// Builtins whose results depend only on their operands.
const PURE_BUILTINS: &[&str] = &[
    "__add", "__sub", "__mul", "__div", "__mod", "__and", "__or", "__xor", "__shl", "__shr",
    "__not", "__eq", "__lt", "__le", "__gt", "__ge", "__is_int", "__is_ptr", "__is_str",
    "__is_flt", "__tag", "__untag", "__jmpbuf_size", "__flt_unbox_val", "__flt_from_int",
    "__flt_to_int", "__flt_trunc", "__flt_lt", "__flt_gt", "__flt_le", "__flt_ge", "__flt_eq",
];

fn builtin_effects(name: &str) -> u32 {
    match name {
        "__malloc" | "__free" | "__realloc" | "__result_ok" | "__result_err" | "__str_concat"
        | "__to_str" | "__kwarg" | "__flt_box_val" | "__flt_add" | "__flt_sub" | "__flt_mul"
        | "__flt_div" => FX_ALLOC,
        "__syscall" | "__sys_read_off" | "__sys_write_off" | "__execve" | "__recv" | "__errno"
        | "__panic" | "__trace_loc" | "__trace_func" | "__trace_dump" | "__set_panic_env"
        | "__clear_panic_env" | "__get_panic_val" | "__push_defer" | "__pop_run_defer"
        | "__argc" | "__argv" | "__envp" | "__envc" | "__set_args" | "__runtime_cleanup"
        | "argc" | "argv" => FX_IO,
        "__dlopen" | "__dlsym" | "__dlclose" | "__dlerror" | "__tag_native" => FX_FFI,
        "__thread_spawn" | "__thread_join" | "__mutex_new" | "__mutex_lock64"
        | "__mutex_unlock64" | "__mutex_free" => FX_THREAD,
        name if name.starts_with("__call") => FX_ALL,
        _ => 0,
    }
}

fn is_std_qname(name: &str) -> bool {
    name.starts_with("std.") || name.starts_with("lib.")
}

/// A Bloom-filter-backed set of locally-declared names: membership tests
/// consult the filter first and fall back to the exact list only on a
/// possible hit.
#[derive(Default, Clone)]
struct ShadowSet {
    names: Vec<String>,
    bloom: [u64; 4],
}

impl ShadowSet {
    fn hash(name: &str) -> u64 {
        // FNV-1a
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in name.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }

    fn add(&mut self, name: &str) {
        let h = Self::hash(name);
        self.bloom[(h & 3) as usize] |= 1u64 << ((h >> 2) & 63);
        self.bloom[((h >> 8) & 3) as usize] |= 1u64 << ((h >> 10) & 63);
        self.names.push(name.to_string());
    }

    fn contains(&self, name: &str) -> bool {
        let h = Self::hash(name);
        if self.bloom[(h & 3) as usize] & (1u64 << ((h >> 2) & 63)) == 0 {
            return false;
        }
        if self.bloom[((h >> 8) & 3) as usize] & (1u64 << ((h >> 10) & 63)) == 0 {
            return false;
        }
        self.names.iter().any(|n| n == name)
    }
}

/// How a direct callee classifies from inside a function body.
enum Callee {
    Decl(usize),
    /// `(is_pure, effects)` for a runtime builtin.
    Builtin(bool, u32),
    Unknown,
    Shadowed,
}

/// `(is_pure, effects, args_escape)` assumed for a callee.
fn callee_facts(cg: &CodeGen, facts: &[FuncFacts], callee: &Callee) -> (bool, u32, bool) {
    match callee {
        Callee::Decl(idx) => {
            if cg.decls[*idx].is_stdlib {
                (false, FX_ALL, true)
            } else {
                let f = &facts[*idx];
                (f.is_pure, f.effects, f.args_escape)
            }
        }
        Callee::Builtin(pure, fx) => (*pure, *fx, false),
        Callee::Shadowed | Callee::Unknown => (false, FX_ALL, true),
    }
}

struct Analyzer<'a, 'p> {
    cg: &'a CodeGen<'p>,
    /// qname → decl index, pre-indexed for edge resolution.
    by_name: HashMap<String, usize>,
}

impl<'a, 'p> Analyzer<'a, 'p> {
    fn resolve_callee(&self, module: Option<&str>, name: &str, shadows: &ShadowSet) -> Callee {
        if shadows.contains(name) {
            return Callee::Shadowed;
        }
        if let Some(module) = module {
            if let Some(&idx) = self.by_name.get(&format!("{module}.{name}")) {
                return Callee::Decl(idx);
            }
        }
        if let Some(&idx) = self.by_name.get(name) {
            return Callee::Decl(idx);
        }
        if name.starts_with("__") || name == "argc" || name == "argv" {
            return Callee::Builtin(PURE_BUILTINS.contains(&name), builtin_effects(name));
        }
        // Fall back through the resolver chain for imported names.
        if let Some(sig_idx) = self.cg.lookup_fun(name) {
            if let Some(decl) = self.cg.fun_sigs[sig_idx].decl {
                return Callee::Decl(decl);
            }
        }
        Callee::Unknown
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

fn expr_effects(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    e: &Expr,
    shadows: &mut ShadowSet,
) -> u32 {
    match &e.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Ident(_) => 0,
        ExprKind::Unary { right, .. } => expr_effects(a, facts, module, right, shadows),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_effects(a, facts, module, left, shadows)
                | expr_effects(a, facts, module, right, shadows)
        }
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            expr_effects(a, facts, module, cond, shadows)
                | expr_effects(a, facts, module, then_val, shadows)
                | expr_effects(a, facts, module, else_val, shadows)
        }
        ExprKind::Call { callee, args } => {
            let mut mask = 0;
            for arg in args {
                mask |= expr_effects(a, facts, module, &arg.value, shadows);
            }
            match &callee.kind {
                ExprKind::Ident(name) => {
                    let callee = a.resolve_callee(module, name, shadows);
                    let (_, fx, _) = callee_facts(a.cg, facts, &callee);
                    mask | fx
                }
                _ => mask | FX_ALL,
            }
        }
        ExprKind::MethodCall { target, args, .. } => {
            let mut mask = expr_effects(a, facts, module, target, shadows) | FX_ALL;
            for arg in args {
                mask |= expr_effects(a, facts, module, &arg.value, shadows);
            }
            mask
        }
        ExprKind::Index {
            target,
            start,
            stop,
            step,
            ..
        } => {
            // Lowers through stdlib `get`/`slice`.
            let mut mask = expr_effects(a, facts, module, target, shadows) | FX_ALL;
            for part in [start, stop, step].into_iter().flatten() {
                mask |= expr_effects(a, facts, module, part, shadows);
            }
            mask
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            let mut mask = FX_ALLOC;
            for item in items {
                mask |= expr_effects(a, facts, module, item, shadows);
            }
            mask
        }
        ExprKind::Dict(pairs) => {
            let mut mask = FX_ALLOC;
            for (k, v) in pairs {
                mask |= expr_effects(a, facts, module, k, shadows);
                mask |= expr_effects(a, facts, module, v, shadows);
            }
            mask
        }
        ExprKind::FString(parts) => {
            let mut mask = FX_ALLOC;
            for p in parts {
                if let FStringPart::Expr(inner) = p {
                    mask |= expr_effects(a, facts, module, inner, shadows);
                }
            }
            mask
        }
        ExprKind::Lambda { .. } => FX_ALLOC,
        ExprKind::Asm { .. } => FX_FFI,
        ExprKind::Comptime(_) => 0,
        ExprKind::Match(node) => {
            let mut mask = expr_effects(a, facts, module, &node.test, shadows);
            for arm in &node.arms {
                for pat in &arm.patterns {
                    mask |= expr_effects(a, facts, module, pat, shadows);
                }
                mask |= stmt_effects(a, facts, module, &arm.body, shadows);
            }
            if let Some(d) = &node.default {
                mask |= stmt_effects(a, facts, module, d, shadows);
            }
            mask
        }
    }
}

fn stmt_effects(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    s: &Stmt,
    shadows: &mut ShadowSet,
) -> u32 {
    match &s.kind {
        StmtKind::Block(body) => body
            .iter()
            .map(|c| stmt_effects(a, facts, module, c, shadows))
            .fold(0, |acc, m| acc | m),
        StmtKind::Var { names, exprs, .. } => {
            let mut mask = 0;
            for e in exprs {
                mask |= expr_effects(a, facts, module, e, shadows);
            }
            for n in names {
                shadows.add(n);
            }
            mask
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => expr_effects(a, facts, module, e, shadows),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => 0,
        StmtKind::If { test, conseq, alt } => {
            let mut mask = expr_effects(a, facts, module, test, shadows)
                | stmt_effects(a, facts, module, conseq, shadows);
            if let Some(alt) = alt {
                mask |= stmt_effects(a, facts, module, alt, shadows);
            }
            mask
        }
        StmtKind::While { test, body } => {
            expr_effects(a, facts, module, test, shadows)
                | stmt_effects(a, facts, module, body, shadows)
        }
        StmtKind::For {
            var,
            iterable,
            body,
        } => {
            let mask = expr_effects(a, facts, module, iterable, shadows) | FX_ALL;
            shadows.add(var);
            mask | stmt_effects(a, facts, module, body, shadows)
        }
        StmtKind::Try { body, err, handler } => {
            if let Some(err) = err {
                shadows.add(err);
            }
            FX_IO
                | stmt_effects(a, facts, module, body, shadows)
                | stmt_effects(a, facts, module, handler, shadows)
        }
        StmtKind::Defer(body) => FX_IO | stmt_effects(a, facts, module, body, shadows),
        StmtKind::Match(node) => {
            let mut mask = expr_effects(a, facts, module, &node.test, shadows);
            for arm in &node.arms {
                for pat in &arm.patterns {
                    mask |= expr_effects(a, facts, module, pat, shadows);
                }
                mask |= stmt_effects(a, facts, module, &arm.body, shadows);
            }
            if let Some(d) = &node.default {
                mask |= stmt_effects(a, facts, module, d, shadows);
            }
            mask
        }
        StmtKind::Func(_)
        | StmtKind::Module { .. }
        | StmtKind::Use { .. }
        | StmtKind::Export(_)
        | StmtKind::Layout { .. } => 0,
    }
}

// ---------------------------------------------------------------------------
// Purity / memo safety
// ---------------------------------------------------------------------------

/// Memo safety layers extra rejections (try/asm/comptime/lambda) on top of
/// the purity walk; `strict` selects that mode.
fn expr_is_pure(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    e: &Expr,
    locals: &mut ShadowSet,
    strict: bool,
) -> bool {
    match &e.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Ident(_) => true,
        ExprKind::Unary { right, .. } => expr_is_pure(a, facts, module, right, locals, strict),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_is_pure(a, facts, module, left, locals, strict)
                && expr_is_pure(a, facts, module, right, locals, strict)
        }
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            expr_is_pure(a, facts, module, cond, locals, strict)
                && expr_is_pure(a, facts, module, then_val, locals, strict)
                && expr_is_pure(a, facts, module, else_val, locals, strict)
        }
        ExprKind::Call { callee, args } => {
            if !args
                .iter()
                .all(|arg| expr_is_pure(a, facts, module, &arg.value, locals, strict))
            {
                return false;
            }
            match &callee.kind {
                ExprKind::Ident(name) => {
                    let callee = a.resolve_callee(module, name, locals);
                    callee_facts(a.cg, facts, &callee).0
                }
                _ => false,
            }
        }
        ExprKind::MethodCall { .. } | ExprKind::Index { .. } => false,
        ExprKind::List(_) | ExprKind::Tuple(_) | ExprKind::Dict(_) | ExprKind::FString(_) => false,
        ExprKind::Lambda { .. } => false,
        ExprKind::Asm { .. } => false,
        ExprKind::Comptime(_) => !strict,
        ExprKind::Match(node) => {
            if !expr_is_pure(a, facts, module, &node.test, locals, strict) {
                return false;
            }
            for arm in &node.arms {
                if !arm
                    .patterns
                    .iter()
                    .all(|p| expr_is_pure(a, facts, module, p, locals, strict))
                {
                    return false;
                }
                if !stmt_is_pure(a, facts, module, &arm.body, locals, strict) {
                    return false;
                }
            }
            node.default
                .as_ref()
                .is_none_or(|d| stmt_is_pure(a, facts, module, d, locals, strict))
        }
    }
}

fn stmt_is_pure(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    s: &Stmt,
    locals: &mut ShadowSet,
    strict: bool,
) -> bool {
    match &s.kind {
        StmtKind::Block(body) => body
            .iter()
            .all(|c| stmt_is_pure(a, facts, module, c, locals, strict)),
        StmtKind::Var {
            names,
            exprs,
            is_decl,
            ..
        } => {
            if !exprs
                .iter()
                .all(|e| expr_is_pure(a, facts, module, e, locals, strict))
            {
                return false;
            }
            if *is_decl {
                for n in names {
                    locals.add(n);
                }
                true
            } else {
                // Assignment: pure only when every target is a known local.
                names.iter().all(|n| locals.contains(n))
            }
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => {
            expr_is_pure(a, facts, module, e, locals, strict)
        }
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => true,
        StmtKind::If { test, conseq, alt } => {
            expr_is_pure(a, facts, module, test, locals, strict)
                && stmt_is_pure(a, facts, module, conseq, locals, strict)
                && alt
                    .as_ref()
                    .is_none_or(|alt| stmt_is_pure(a, facts, module, alt, locals, strict))
        }
        StmtKind::While { test, body } => {
            expr_is_pure(a, facts, module, test, locals, strict)
                && stmt_is_pure(a, facts, module, body, locals, strict)
        }
        StmtKind::For { .. } => false, // iterates through stdlib get/list_len
        StmtKind::Try { body, err, handler } => {
            if strict {
                return false;
            }
            if let Some(err) = err {
                locals.add(err);
            }
            stmt_is_pure(a, facts, module, body, locals, strict)
                && stmt_is_pure(a, facts, module, handler, locals, strict)
        }
        StmtKind::Defer(_) => false,
        StmtKind::Match(node) => {
            let fake = Expr {
                kind: ExprKind::Match(node.clone()),
                span: s.span.clone(),
            };
            expr_is_pure(a, facts, module, &fake, locals, strict)
        }
        StmtKind::Func(_) => false,
        StmtKind::Module { .. }
        | StmtKind::Use { .. }
        | StmtKind::Export(_)
        | StmtKind::Layout { .. } => true,
    }
}

// ---------------------------------------------------------------------------
// Escape analysis
// ---------------------------------------------------------------------------

fn expr_refs_any(e: &Expr, params: &[String], shadowed: &ShadowSet) -> bool {
    match &e.kind {
        ExprKind::Ident(name) => !shadowed.contains(name) && params.iter().any(|p| p == name),
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_) => false,
        ExprKind::Unary { right, .. } => expr_refs_any(right, params, shadowed),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_refs_any(left, params, shadowed) || expr_refs_any(right, params, shadowed)
        }
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            expr_refs_any(cond, params, shadowed)
                || expr_refs_any(then_val, params, shadowed)
                || expr_refs_any(else_val, params, shadowed)
        }
        ExprKind::Call { callee, args } => {
            expr_refs_any(callee, params, shadowed)
                || args
                    .iter()
                    .any(|a| expr_refs_any(&a.value, params, shadowed))
        }
        ExprKind::MethodCall { target, args, .. } => {
            expr_refs_any(target, params, shadowed)
                || args
                    .iter()
                    .any(|a| expr_refs_any(&a.value, params, shadowed))
        }
        ExprKind::Index {
            target,
            start,
            stop,
            step,
            ..
        } => {
            expr_refs_any(target, params, shadowed)
                || [start, stop, step]
                    .into_iter()
                    .flatten()
                    .any(|p| expr_refs_any(p, params, shadowed))
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            items.iter().any(|i| expr_refs_any(i, params, shadowed))
        }
        ExprKind::Dict(pairs) => pairs
            .iter()
            .any(|(k, v)| expr_refs_any(k, params, shadowed) || expr_refs_any(v, params, shadowed)),
        ExprKind::FString(parts) => parts.iter().any(|p| match p {
            FStringPart::Expr(e) => expr_refs_any(e, params, shadowed),
            FStringPart::Lit(_) => false,
        }),
        ExprKind::Lambda { .. } => true, // captures everything visible
        ExprKind::Asm { args, .. } => args.iter().any(|a| expr_refs_any(a, params, shadowed)),
        ExprKind::Comptime(_) => false,
        ExprKind::Match(node) => {
            expr_refs_any(&node.test, params, shadowed)
                || node.arms.iter().any(|arm| {
                    arm.patterns
                        .iter()
                        .any(|p| expr_refs_any(p, params, shadowed))
                        || stmt_refs_any(&arm.body, params, shadowed)
                })
                || node
                    .default
                    .as_ref()
                    .is_some_and(|d| stmt_refs_any(d, params, shadowed))
        }
    }
}

fn stmt_refs_any(s: &Stmt, params: &[String], shadowed: &ShadowSet) -> bool {
    match &s.kind {
        StmtKind::Block(body) => body.iter().any(|c| stmt_refs_any(c, params, shadowed)),
        StmtKind::Var { exprs, .. } => exprs.iter().any(|e| expr_refs_any(e, params, shadowed)),
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => expr_refs_any(e, params, shadowed),
        StmtKind::If { test, conseq, alt } => {
            expr_refs_any(test, params, shadowed)
                || stmt_refs_any(conseq, params, shadowed)
                || alt
                    .as_ref()
                    .is_some_and(|a| stmt_refs_any(a, params, shadowed))
        }
        StmtKind::While { test, body } => {
            expr_refs_any(test, params, shadowed) || stmt_refs_any(body, params, shadowed)
        }
        StmtKind::For { iterable, body, .. } => {
            expr_refs_any(iterable, params, shadowed) || stmt_refs_any(body, params, shadowed)
        }
        StmtKind::Try { body, handler, .. } => {
            stmt_refs_any(body, params, shadowed) || stmt_refs_any(handler, params, shadowed)
        }
        StmtKind::Defer(body) => stmt_refs_any(body, params, shadowed),
        StmtKind::Match(node) => {
            expr_refs_any(&node.test, params, shadowed)
                || node
                    .arms
                    .iter()
                    .any(|arm| stmt_refs_any(&arm.body, params, shadowed))
                || node
                    .default
                    .as_ref()
                    .is_some_and(|d| stmt_refs_any(d, params, shadowed))
        }
        _ => false,
    }
}

struct EscapeOut<'x> {
    params: &'x [String],
    args_escape: bool,
    args_mutated: bool,
    returns_alias: bool,
}

fn collect_escape_stmt(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    s: &Stmt,
    shadowed: &mut ShadowSet,
    out: &mut EscapeOut,
) {
    match &s.kind {
        StmtKind::Block(body) => {
            for c in body {
                collect_escape_stmt(a, facts, module, c, shadowed, out);
            }
        }
        StmtKind::Var {
            names,
            exprs,
            is_decl,
            ..
        } => {
            for e in exprs {
                collect_escape_expr(a, facts, module, e, shadowed, out);
            }
            if *is_decl {
                for n in names {
                    shadowed.add(n);
                }
            } else {
                for n in names {
                    if out.params.iter().any(|p| p == n) && !shadowed.contains(n) {
                        out.args_mutated = true;
                    }
                    if !shadowed.contains(n) && !out.params.iter().any(|p| p == n) {
                        // Store to a non-local target: RHS values flow out.
                        for e in exprs {
                            if expr_refs_any(e, out.params, shadowed) {
                                out.args_escape = true;
                            }
                        }
                    }
                }
            }
        }
        StmtKind::Expr(e) => collect_escape_expr(a, facts, module, e, shadowed, out),
        StmtKind::Return(Some(e)) => {
            if expr_refs_any(e, out.params, shadowed) {
                out.returns_alias = true;
            }
            collect_escape_expr(a, facts, module, e, shadowed, out);
        }
        StmtKind::If { test, conseq, alt } => {
            collect_escape_expr(a, facts, module, test, shadowed, out);
            collect_escape_stmt(a, facts, module, conseq, shadowed, out);
            if let Some(alt) = alt {
                collect_escape_stmt(a, facts, module, alt, shadowed, out);
            }
        }
        StmtKind::While { test, body } => {
            collect_escape_expr(a, facts, module, test, shadowed, out);
            collect_escape_stmt(a, facts, module, body, shadowed, out);
        }
        StmtKind::For {
            var,
            iterable,
            body,
        } => {
            collect_escape_expr(a, facts, module, iterable, shadowed, out);
            shadowed.add(var);
            collect_escape_stmt(a, facts, module, body, shadowed, out);
        }
        StmtKind::Try { body, err, handler } => {
            collect_escape_stmt(a, facts, module, body, shadowed, out);
            if let Some(err) = err {
                shadowed.add(err);
            }
            collect_escape_stmt(a, facts, module, handler, shadowed, out);
        }
        StmtKind::Defer(body) => {
            // Deferred bodies are captured by closure; what they touch escapes.
            if stmt_refs_any(body, out.params, shadowed) {
                out.args_escape = true;
            }
            collect_escape_stmt(a, facts, module, body, shadowed, out);
        }
        StmtKind::Match(node) => {
            collect_escape_expr(a, facts, module, &node.test, shadowed, out);
            for arm in &node.arms {
                collect_escape_stmt(a, facts, module, &arm.body, shadowed, out);
            }
            if let Some(d) = &node.default {
                collect_escape_stmt(a, facts, module, d, shadowed, out);
            }
        }
        _ => {}
    }
}

fn collect_escape_expr(
    a: &Analyzer,
    facts: &[FuncFacts],
    module: Option<&str>,
    e: &Expr,
    shadowed: &mut ShadowSet,
    out: &mut EscapeOut,
) {
    match &e.kind {
        ExprKind::Call { callee, args } => {
            let callee_escapes = match &callee.kind {
                ExprKind::Ident(name) => {
                    let c = a.resolve_callee(module, name, shadowed);
                    callee_facts(a.cg, facts, &c).2
                }
                _ => true,
            };
            for arg in args {
                if callee_escapes && expr_refs_any(&arg.value, out.params, shadowed) {
                    out.args_escape = true;
                }
                collect_escape_expr(a, facts, module, &arg.value, shadowed, out);
            }
        }
        ExprKind::MethodCall { target, args, .. } => {
            if expr_refs_any(target, out.params, shadowed) {
                out.args_escape = true;
            }
            for arg in args {
                if expr_refs_any(&arg.value, out.params, shadowed) {
                    out.args_escape = true;
                }
                collect_escape_expr(a, facts, module, &arg.value, shadowed, out);
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            for item in items {
                if expr_refs_any(item, out.params, shadowed) {
                    out.args_escape = true;
                }
                collect_escape_expr(a, facts, module, item, shadowed, out);
            }
        }
        ExprKind::Dict(pairs) => {
            for (k, v) in pairs {
                if expr_refs_any(k, out.params, shadowed) || expr_refs_any(v, out.params, shadowed)
                {
                    out.args_escape = true;
                }
                collect_escape_expr(a, facts, module, k, shadowed, out);
                collect_escape_expr(a, facts, module, v, shadowed, out);
            }
        }
        ExprKind::Lambda { .. } => {
            // Captures copy every visible binding, parameters included.
            out.args_escape = true;
        }
        ExprKind::Unary { right, .. } => {
            collect_escape_expr(a, facts, module, right, shadowed, out)
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            collect_escape_expr(a, facts, module, left, shadowed, out);
            collect_escape_expr(a, facts, module, right, shadowed, out);
        }
        ExprKind::Ternary {
            cond,
            then_val,
            else_val,
        } => {
            collect_escape_expr(a, facts, module, cond, shadowed, out);
            collect_escape_expr(a, facts, module, then_val, shadowed, out);
            collect_escape_expr(a, facts, module, else_val, shadowed, out);
        }
        ExprKind::Index {
            target,
            start,
            stop,
            step,
            ..
        } => {
            collect_escape_expr(a, facts, module, target, shadowed, out);
            for part in [start, stop, step].into_iter().flatten() {
                collect_escape_expr(a, facts, module, part, shadowed, out);
            }
        }
        ExprKind::FString(parts) => {
            for p in parts {
                if let FStringPart::Expr(inner) = p {
                    collect_escape_expr(a, facts, module, inner, shadowed, out);
                }
            }
        }
        ExprKind::Match(node) => {
            collect_escape_expr(a, facts, module, &node.test, shadowed, out);
            for arm in &node.arms {
                collect_escape_stmt(a, facts, module, &arm.body, shadowed, out);
            }
            if let Some(d) = &node.default {
                collect_escape_stmt(a, facts, module, d, shadowed, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Recursion (Tarjan SCC over the direct-call graph)
// ---------------------------------------------------------------------------

fn collect_call_edges(
    a: &Analyzer,
    module: Option<&str>,
    s: &Stmt,
    shadows: &mut ShadowSet,
    edges: &mut Vec<usize>,
) {
    fn on_expr(
        a: &Analyzer,
        module: Option<&str>,
        e: &Expr,
        shadows: &mut ShadowSet,
        edges: &mut Vec<usize>,
    ) {
        match &e.kind {
            ExprKind::Call { callee, args } => {
                if let ExprKind::Ident(name) = &callee.kind {
                    if let Callee::Decl(idx) = a.resolve_callee(module, name, shadows) {
                        edges.push(idx);
                    }
                } else {
                    on_expr(a, module, callee, shadows, edges);
                }
                for arg in args {
                    on_expr(a, module, &arg.value, shadows, edges);
                }
            }
            ExprKind::MethodCall { target, args, name } => {
                // A method call may resolve to `module.name`.
                if let ExprKind::Ident(target_name) = &target.kind {
                    let mut module_name = target_name.clone();
                    for (alias, m) in &a.cg.aliases {
                        if alias == target_name {
                            module_name = m.clone();
                            break;
                        }
                    }
                    if let Some(&idx) = a.by_name.get(&format!("{module_name}.{name}")) {
                        edges.push(idx);
                    }
                } else {
                    on_expr(a, module, target, shadows, edges);
                }
                for arg in args {
                    on_expr(a, module, &arg.value, shadows, edges);
                }
            }
            ExprKind::Unary { right, .. } => on_expr(a, module, right, shadows, edges),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                on_expr(a, module, left, shadows, edges);
                on_expr(a, module, right, shadows, edges);
            }
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => {
                on_expr(a, module, cond, shadows, edges);
                on_expr(a, module, then_val, shadows, edges);
                on_expr(a, module, else_val, shadows, edges);
            }
            ExprKind::Index {
                target,
                start,
                stop,
                step,
                ..
            } => {
                on_expr(a, module, target, shadows, edges);
                for part in [start, stop, step].into_iter().flatten() {
                    on_expr(a, module, part, shadows, edges);
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    on_expr(a, module, item, shadows, edges);
                }
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    on_expr(a, module, k, shadows, edges);
                    on_expr(a, module, v, shadows, edges);
                }
            }
            ExprKind::FString(parts) => {
                for p in parts {
                    if let FStringPart::Expr(inner) = p {
                        on_expr(a, module, inner, shadows, edges);
                    }
                }
            }
            ExprKind::Lambda { body, .. } => {
                collect_call_edges(a, module, body, shadows, edges);
            }
            ExprKind::Match(node) => {
                on_expr(a, module, &node.test, shadows, edges);
                for arm in &node.arms {
                    collect_call_edges(a, module, &arm.body, shadows, edges);
                }
                if let Some(d) = &node.default {
                    collect_call_edges(a, module, d, shadows, edges);
                }
            }
            _ => {}
        }
    }

    match &s.kind {
        StmtKind::Block(body) => {
            for c in body {
                collect_call_edges(a, module, c, shadows, edges);
            }
        }
        StmtKind::Var { names, exprs, .. } => {
            for e in exprs {
                on_expr(a, module, e, shadows, edges);
            }
            for n in names {
                shadows.add(n);
            }
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => on_expr(a, module, e, shadows, edges),
        StmtKind::If { test, conseq, alt } => {
            on_expr(a, module, test, shadows, edges);
            collect_call_edges(a, module, conseq, shadows, edges);
            if let Some(alt) = alt {
                collect_call_edges(a, module, alt, shadows, edges);
            }
        }
        StmtKind::While { test, body } => {
            on_expr(a, module, test, shadows, edges);
            collect_call_edges(a, module, body, shadows, edges);
        }
        StmtKind::For {
            var,
            iterable,
            body,
        } => {
            on_expr(a, module, iterable, shadows, edges);
            shadows.add(var);
            collect_call_edges(a, module, body, shadows, edges);
        }
        StmtKind::Try { body, err, handler } => {
            collect_call_edges(a, module, body, shadows, edges);
            if let Some(err) = err {
                shadows.add(err);
            }
            collect_call_edges(a, module, handler, shadows, edges);
        }
        StmtKind::Defer(body) => collect_call_edges(a, module, body, shadows, edges),
        StmtKind::Match(node) => {
            on_expr(a, module, &node.test, shadows, edges);
            for arm in &node.arms {
                collect_call_edges(a, module, &arm.body, shadows, edges);
            }
            if let Some(d) = &node.default {
                collect_call_edges(a, module, d, shadows, edges);
            }
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn tarjan_visit(
    v: usize,
    edges: &[Vec<usize>],
    index: &mut [usize],
    lowlink: &mut [usize],
    on_stack: &mut [bool],
    stack: &mut Vec<usize>,
    counter: &mut usize,
    facts: &mut [FuncFacts],
) {
    index[v] = *counter;
    lowlink[v] = *counter;
    *counter += 1;
    stack.push(v);
    on_stack[v] = true;
    for &w in &edges[v] {
        if index[w] == usize::MAX {
            tarjan_visit(w, edges, index, lowlink, on_stack, stack, counter, facts);
            lowlink[v] = lowlink[v].min(lowlink[w]);
        } else if on_stack[w] {
            lowlink[v] = lowlink[v].min(index[w]);
        }
    }
    if lowlink[v] == index[v] {
        let mut scc = Vec::new();
        loop {
            let w = stack.pop().expect("tarjan stack underflow");
            on_stack[w] = false;
            scc.push(w);
            if w == v {
                break;
            }
        }
        // Non-trivial SCCs and self-loops mark recursion.
        if scc.len() > 1 || edges[v].contains(&v) {
            for w in scc {
                facts[w].is_recursive = true;
            }
        }
    }
}

fn mark_recursive(edges: &[Vec<usize>], facts: &mut [FuncFacts]) {
    let n = edges.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut counter = 0usize;
    for v in 0..n {
        if index[v] == usize::MAX {
            tarjan_visit(
                v,
                edges,
                &mut index,
                &mut lowlink,
                &mut on_stack,
                &mut stack,
                &mut counter,
                facts,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

enum Pass {
    Pure,
    Effects,
    MemoSafe,
    Escape,
}

pub(crate) fn run(cg: &mut CodeGen) {
    let n = cg.decls.len();
    let mut facts: Vec<FuncFacts> = (0..n)
        .map(|i| {
            if cg.decls[i].is_stdlib {
                FuncFacts::pessimistic()
            } else {
                FuncFacts::optimistic()
            }
        })
        .collect();

    let by_name: HashMap<String, usize> =
        (0..n).map(|i| (cg.decls[i].qname.clone(), i)).collect();

    {
        let analyzer = Analyzer {
            cg: &*cg,
            by_name,
        };

        // Recursion detection first; it doesn't participate in the fixed point.
        let mut edges: Vec<Vec<usize>> = Vec::with_capacity(n);
        for i in 0..n {
            let mut local_edges = Vec::new();
            let mut shadows = ShadowSet::default();
            // Parameters shadow same-named functions for edge purposes.
            for p in &cg.decls[i].decl.params {
                shadows.add(&p.name);
            }
            collect_call_edges(
                &analyzer,
                cg.decls[i].module.as_deref(),
                &cg.decls[i].decl.body,
                &mut shadows,
                &mut local_edges,
            );
            local_edges.sort_unstable();
            local_edges.dedup();
            edges.push(local_edges);
        }
        mark_recursive(&edges, &mut facts);

        for pass in [Pass::Pure, Pass::Effects, Pass::MemoSafe, Pass::Escape] {
            for _ in 0..MAX_ITERS {
                let mut changed = false;
                for i in 0..n {
                    if cg.decls[i].is_stdlib {
                        continue;
                    }
                    let module = cg.decls[i].module.as_deref();
                    let body = &cg.decls[i].decl.body;
                    let params: Vec<String> = cg.decls[i]
                        .decl
                        .params
                        .iter()
                        .map(|p| p.name.clone())
                        .collect();
                    match pass {
                        Pass::Pure => {
                            let mut locals = ShadowSet::default();
                            for p in &params {
                                locals.add(p);
                            }
                            let pure =
                                stmt_is_pure(&analyzer, &facts, module, body, &mut locals, false);
                            if facts[i].is_pure != pure {
                                facts[i].is_pure = pure;
                                changed = true;
                            }
                        }
                        Pass::Effects => {
                            let mut shadows = ShadowSet::default();
                            for p in &params {
                                shadows.add(p);
                            }
                            let fx = stmt_effects(&analyzer, &facts, module, body, &mut shadows);
                            if facts[i].effects != fx || !facts[i].effects_known {
                                facts[i].effects = fx;
                                facts[i].effects_known = true;
                                changed = true;
                            }
                        }
                        Pass::MemoSafe => {
                            let mut locals = ShadowSet::default();
                            for p in &params {
                                locals.add(p);
                            }
                            let safe =
                                stmt_is_pure(&analyzer, &facts, module, body, &mut locals, true);
                            if facts[i].is_memo_safe != safe {
                                facts[i].is_memo_safe = safe;
                                changed = true;
                            }
                        }
                        Pass::Escape => {
                            let mut shadowed = ShadowSet::default();
                            let mut out = EscapeOut {
                                params: &params,
                                args_escape: false,
                                args_mutated: false,
                                returns_alias: false,
                            };
                            collect_escape_stmt(
                                &analyzer, &facts, module, body, &mut shadowed, &mut out,
                            );
                            let mut local_changed = facts[i].args_escape != out.args_escape
                                || facts[i].args_mutated != out.args_mutated
                                || facts[i].returns_alias != out.returns_alias;
                            facts[i].args_escape = out.args_escape;
                            facts[i].args_mutated = out.args_mutated;
                            facts[i].returns_alias = out.returns_alias;
                            if !facts[i].escape_known {
                                facts[i].escape_known = true;
                                local_changed = true;
                            }
                            changed |= local_changed;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
        }
    }

    report(cg, &facts);
    cg.facts = facts;
}

fn effect_mask_names(mask: u32) -> String {
    if mask == 0 {
        return "none".to_string();
    }
    let mut parts = Vec::new();
    if mask & FX_IO != 0 {
        parts.push("io");
    }
    if mask & FX_ALLOC != 0 {
        parts.push("alloc");
    }
    if mask & FX_FFI != 0 {
        parts.push("ffi");
    }
    if mask & FX_THREAD != 0 {
        parts.push("thread");
    }
    parts.join("|")
}

/// Contract checks, policy checks, and the optional stderr summaries.
fn report(cg: &mut CodeGen, facts: &[FuncFacts]) {
    let n = facts.len();
    let include_std = cg.config.policy_include_std;
    for i in 0..n {
        let qname = cg.decls[i].qname.clone();
        let span = cg.decls[i].span.clone();
        let is_std = is_std_qname(&qname) || cg.decls[i].is_stdlib;
        let f = facts[i].clone();

        // Declared contracts are verified even for stdlib code.
        let declared_pure = cg.decls[i].decl.declared_pure;
        let declared_effects = cg.decls[i].decl.declared_effects;
        if declared_pure && !f.is_pure {
            cg.diags.error(
                &span,
                format!(
                    "effect contract violation in '{qname}': declared @pure but inferred effects are {}",
                    effect_mask_names(f.effects)
                ),
            );
        }
        if let Some(declared) = declared_effects {
            let extra = f.effects & !declared;
            if extra != 0 {
                cg.diags.error(
                    &span,
                    format!(
                        "effect contract violation in '{qname}': inferred {} exceeds declared {}",
                        effect_mask_names(f.effects),
                        effect_mask_names(declared)
                    ),
                );
            }
        }

        if is_std && !include_std {
            continue;
        }
        let forbidden = f.effects & cg.config.effect_forbid;
        if forbidden != 0 {
            cg.diags.error(
                &span,
                format!(
                    "function '{qname}' has forbidden effect(s): {}",
                    effect_mask_names(forbidden)
                ),
            );
        }
        if cg.config.effect_require_pure && !f.is_pure {
            cg.diags.error(
                &span,
                format!(
                    "function '{qname}' is not pure (effects: {})",
                    effect_mask_names(f.effects)
                ),
            );
        }
        if cg.config.effect_require_known && !f.effects_known {
            cg.diags
                .error(&span, format!("function '{qname}' has unknown effects"));
        }
        if cg.config.alias_require_known && !f.escape_known {
            cg.diags
                .error(&span, format!("function '{qname}' has unknown aliasing"));
        }
        if cg.config.alias_require_no_escape && (f.args_escape || f.returns_alias) {
            cg.diags.error(
                &span,
                format!(
                    "function '{qname}' lets arguments escape{}",
                    if f.returns_alias {
                        " (return value aliases a parameter)"
                    } else {
                        ""
                    }
                ),
            );
        }
    }

    if cg.config.purity_diag {
        let pure = facts.iter().filter(|f| f.is_pure).count();
        let recursive = facts.iter().filter(|f| f.is_recursive).count();
        eprintln!("[purity] {pure}/{n} pure, {recursive} recursive");
    }
    if cg.config.effect_diag {
        for (i, f) in facts.iter().enumerate() {
            eprintln!(
                "[effects] {} -> {}",
                cg.decls[i].qname,
                effect_mask_names(f.effects)
            );
        }
    }
    if cg.config.alias_diag {
        for (i, f) in facts.iter().enumerate() {
            eprintln!(
                "[alias] {} escape={} mutated={} returns_alias={}",
                cg.decls[i].qname, f.args_escape, f.args_mutated, f.returns_alias
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FX_ALLOC, FX_IO};
    use crate::codegen::CodeGen;
    use crate::config::CompilerConfig;
    use crate::parser::parse_source;

    fn analyze_with(src: &str, tweak: impl FnOnce(&mut CompilerConfig)) -> (Vec<String>, Vec<FuncFacts>, bool) {
        let prog = parse_source(src, "<test>").unwrap();
        let mut config = CompilerConfig::default();
        tweak(&mut config);
        let mut cg = CodeGen::new(&prog, config);
        cg.diags.quiet = true;
        cg.prepare_tables();
        run(&mut cg);
        let names = cg.decls.iter().map(|d| d.qname.clone()).collect();
        let had_error = cg.diags.had_error;
        (names, cg.facts.clone(), had_error)
    }

    fn analyze(src: &str) -> (Vec<String>, Vec<FuncFacts>) {
        let (names, facts, _) = analyze_with(src, |_| {});
        (names, facts)
    }

    fn fact<'a>(names: &[String], facts: &'a [FuncFacts], name: &str) -> &'a FuncFacts {
        let idx = names.iter().position(|n| n == name).unwrap();
        &facts[idx]
    }

    #[test]
    fn arithmetic_function_is_pure() {
        let (names, facts) = analyze("fn f(x) { return x + 1 }");
        let f = fact(&names, &facts, "f");
        assert!(f.is_pure);
        assert_eq!(f.effects, 0);
        assert!(f.is_memo_safe);
        assert!(!f.is_recursive);
    }

    #[test]
    fn list_literal_allocates() {
        let (names, facts) = analyze("fn f() { let xs = [1, 2]; return 0 }");
        let f = fact(&names, &facts, "f");
        assert!(!f.is_pure);
        assert!(f.effects & FX_ALLOC != 0);
    }

    #[test]
    fn io_builtin_propagates_through_callers() {
        let (names, facts) = analyze(
            "fn low(x) { return __sys_write_off(1, x, 1, 0) }\nfn high(x) { return low(x) }",
        );
        assert!(fact(&names, &facts, "low").effects & FX_IO != 0);
        assert!(fact(&names, &facts, "high").effects & FX_IO != 0);
        assert!(!fact(&names, &facts, "high").is_pure);
    }

    #[test]
    fn direct_recursion_is_marked() {
        let (names, facts) = analyze("fn f(x) { return f(x) }");
        assert!(fact(&names, &facts, "f").is_recursive);
    }

    #[test]
    fn mutual_recursion_is_marked() {
        let (names, facts) = analyze(
            "fn ping(x) { return pong(x) }\nfn pong(x) { return ping(x) }\nfn solo(x) { return x }",
        );
        assert!(fact(&names, &facts, "ping").is_recursive);
        assert!(fact(&names, &facts, "pong").is_recursive);
        assert!(!fact(&names, &facts, "solo").is_recursive);
    }

    #[test]
    fn shadowed_name_breaks_the_call_edge() {
        let (names, facts) = analyze("fn f(x) { let f = x; return __call1(f, 1) }");
        assert!(!fact(&names, &facts, "f").is_recursive);
    }

    #[test]
    fn try_is_pure_but_not_memo_safe() {
        let (names, facts) = analyze("fn f(x) { try { return x } catch e { return 0 } }");
        let f = fact(&names, &facts, "f");
        assert!(f.is_pure);
        assert!(!f.is_memo_safe);
    }

    #[test]
    fn lambda_rejects_memo_and_marks_escape() {
        let (names, facts) =
            analyze("fn f(x) { let g = fn(y) { return y }; return __call1(g, x) }");
        let f = fact(&names, &facts, "f");
        assert!(!f.is_memo_safe);
        assert!(f.args_escape);
    }

    #[test]
    fn returns_alias_detection() {
        let (names, facts) = analyze("fn id(x) { return x }\nfn fresh(x) { return 1 }");
        assert!(fact(&names, &facts, "id").returns_alias);
        assert!(!fact(&names, &facts, "fresh").returns_alias);
    }

    #[test]
    fn mutation_detection() {
        let (names, facts) =
            analyze("fn f(x) { x = 1; return x }\nfn g(x) { let y = x; return y }");
        assert!(fact(&names, &facts, "f").args_mutated);
        assert!(!fact(&names, &facts, "g").args_mutated);
    }

    #[test]
    fn global_assignment_is_impure() {
        let (names, facts) = analyze("let g = 0\nfn f(x) { g = x; return 0 }");
        assert!(!fact(&names, &facts, "f").is_pure);
        assert!(fact(&names, &facts, "f").args_escape);
    }

    #[test]
    fn pure_contract_violation_is_an_error() {
        let (_, _, had_error) = analyze_with(
            "@pure\nfn bad(x) { return __sys_write_off(1, x, 1, 0) }",
            |_| {},
        );
        assert!(had_error);
    }

    #[test]
    fn effects_contract_allows_declared_mask() {
        let (_, _, had_error) = analyze_with(
            "@effects(io)\nfn logger(x) { return __sys_write_off(1, x, 1, 0) }",
            |_| {},
        );
        assert!(!had_error);
    }

    #[test]
    fn forbid_policy_rejects_io() {
        let (_, _, had_error) = analyze_with(
            "fn writer(x) { return __sys_write_off(1, x, 1, 0) }",
            |c| c.effect_forbid = FX_IO,
        );
        assert!(had_error);
    }

    #[test]
    fn require_pure_policy() {
        let (_, _, had_error) = analyze_with(
            "fn allocs() { let xs = [1]; return 0 }",
            |c| c.effect_require_pure = true,
        );
        assert!(had_error);
        let (_, _, clean) = analyze_with("fn ok(x) { return x + 1 }", |c| {
            c.effect_require_pure = true;
        });
        assert!(!clean);
    }

    #[test]
    fn no_escape_policy_flags_aliasing_return() {
        let (_, _, had_error) = analyze_with("fn id(x) { return x }", |c| {
            c.alias_require_no_escape = true;
        });
        assert!(had_error);
    }

    #[test]
    fn bloom_shadow_set() {
        let mut s = ShadowSet::default();
        assert!(!s.contains("x"));
        s.add("x");
        assert!(s.contains("x"));
        assert!(!s.contains("y"));
    }
}
