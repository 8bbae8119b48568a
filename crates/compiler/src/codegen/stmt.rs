//! Statement lowering
//!
//! Control flow lowers to plain conditional branches with merge blocks;
//! dead code after a terminator is suppressed by the emission layer. The
//! scope stack tracks bindings, the per-scope count of runtime defers, and
//! the nearest loop's break/continue targets. `try`/`catch` anchors a
//! panic frame around a `setjmp`ed buffer (see the runtime's panic
//! channel).

use crate::ast::{MatchNode, Span, Stmt, StmtKind};

use super::state::{Binding, CodeGen, IrValue, Scope};

impl<'p> CodeGen<'p> {
    // -----------------------------------------------------------------------
    // Scope helpers
    // -----------------------------------------------------------------------

    pub(super) fn push_scope(&mut self, inherit_loop_targets: bool) {
        let (break_label, continue_label) = if inherit_loop_targets {
            let parent = self.scopes.last();
            (
                parent.and_then(|s| s.break_label.clone()),
                parent.and_then(|s| s.continue_label.clone()),
            )
        } else {
            (None, None)
        };
        self.scopes.push(Scope {
            vars: Vec::new(),
            defers: 0,
            break_label,
            continue_label,
        });
    }

    pub(super) fn pop_scope(&mut self) {
        let scope = self.scopes.pop().expect("scope underflow");
        for b in &scope.vars {
            if !b.is_used && !b.name.starts_with('_') {
                self.diags
                    .warning(&b.span, format!("unused variable '{}'", b.name));
            }
        }
    }

    pub(super) fn bind(&mut self, name: &str, slot: String, is_mut: bool, used: bool, span: &Span) {
        let scope = self.scopes.last_mut().expect("bind without scope");
        scope.vars.push(Binding {
            name: name.to_string(),
            slot,
            is_mut,
            is_used: used,
            span: span.clone(),
        });
    }

    /// Scope lookup, innermost first; marks the binding used.
    pub(super) fn find_binding(&mut self, name: &str) -> Option<String> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(b) = scope.vars.iter_mut().rev().find(|b| b.name == name) {
                b.is_used = true;
                return Some(b.slot.clone());
            }
        }
        None
    }

    fn has_binding_anywhere(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|s| s.vars.iter().any(|b| b.name == name))
    }

    /// Pop-and-run every runtime defer registered between scope depths
    /// `from` down to `to` (inclusive).
    pub(super) fn emit_defers(&mut self, from: usize, to: usize) {
        let mut pops = 0usize;
        for d in (to..=from).rev() {
            if let Some(scope) = self.scopes.get(d) {
                pops += scope.defers;
            }
        }
        for _ in 0..pops {
            self.call_void("__pop_run_defer", &[]);
        }
    }

    fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Record the source location in the runtime trace ring.
    fn emit_trace_loc(&mut self, span: &Span) {
        let rt = self.const_string_ptr(span.file.as_bytes());
        let file = self.tmp();
        self.emit(format!("{file} = load i64, ptr {rt}"));
        let line = IrValue::Const(((span.line as u64) << 1 | 1) as i64);
        let col = IrValue::Const(((span.col as u64) << 1 | 1) as i64);
        self.call("__trace_loc", &[IrValue::Reg(file), line, col]);
    }

    /// Record the currently-executing function name at entry.
    pub(super) fn emit_trace_func(&mut self, name: &str) {
        let rt = self.const_string_ptr(name.as_bytes());
        let reg = self.tmp();
        self.emit(format!("{reg} = load i64, ptr {rt}"));
        self.call("__trace_func", &[IrValue::Reg(reg)]);
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    pub(super) fn gen_stmt(&mut self, s: &Stmt, is_tail: bool) {
        if self.block_terminated() {
            return;
        }
        if self.config.emit_traces && s.span.line > 0 && !s.span.is_stdlib() {
            self.emit_trace_loc(&s.span);
        }
        match &s.kind {
            StmtKind::Var {
                names,
                exprs,
                is_decl,
                is_mut,
                is_destructure,
            } => self.gen_var(s, names, exprs, *is_decl, *is_mut, *is_destructure),
            StmtKind::Expr(e) => {
                let v = self.gen_expr(e);
                if is_tail {
                    if let Some(slot) = self.result_slot.clone() {
                        self.emit(format!("store i64 {}, ptr {slot}", v.op()));
                    } else {
                        self.emit_defers(self.depth(), self.func_root);
                        self.emit_term(format!("ret i64 {}", v.op()));
                    }
                }
            }
            StmtKind::If { test, conseq, alt } => {
                let c = self.gen_expr(test);
                let cond = self.to_bool(&c);
                let then_bb = self.new_label("it");
                let next_bb = self.new_label("in");
                let else_bb = alt.as_ref().map(|_| self.new_label("ie"));
                let false_target = else_bb.clone().unwrap_or_else(|| next_bb.clone());
                self.emit_term(format!(
                    "br i1 {cond}, label %{then_bb}, label %{false_target}"
                ));
                self.start_block(then_bb);
                self.gen_stmt(conseq, is_tail);
                self.emit_term(format!("br label %{next_bb}"));
                if let (Some(else_bb), Some(alt)) = (else_bb, alt) {
                    self.start_block(else_bb);
                    self.gen_stmt(alt, is_tail);
                    self.emit_term(format!("br label %{next_bb}"));
                }
                self.start_block(next_bb);
            }
            StmtKind::While { test, body } => {
                let cond_bb = self.new_label("wc");
                let body_bb = self.new_label("wb");
                let end_bb = self.new_label("we");
                self.emit_term(format!("br label %{cond_bb}"));
                self.start_block(cond_bb.clone());
                let t = self.gen_expr(test);
                let cond = self.to_bool(&t);
                self.emit_term(format!("br i1 {cond}, label %{body_bb}, label %{end_bb}"));
                self.start_block(body_bb);
                self.push_scope(false);
                let idx = self.scopes.len() - 1;
                self.scopes[idx].break_label = Some(end_bb.clone());
                self.scopes[idx].continue_label = Some(cond_bb.clone());
                self.gen_stmt(body, false);
                if !self.block_terminated() {
                    self.emit_defers(self.depth(), self.depth());
                    self.emit_term(format!("br label %{cond_bb}"));
                }
                self.pop_scope();
                self.start_block(end_bb);
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => self.gen_for(s, var, iterable, body),
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.gen_expr(e),
                    None => IrValue::Const(1),
                };
                self.emit_defers(self.depth(), self.func_root);
                self.emit_term(format!("ret i64 {}", v.op()));
            }
            StmtKind::Block(body) => {
                self.push_scope(true);
                let last = body.len().saturating_sub(1);
                for (i, child) in body.iter().enumerate() {
                    self.gen_stmt(child, is_tail && i == last);
                }
                if !self.block_terminated() {
                    self.emit_defers(self.depth(), self.depth());
                }
                self.pop_scope();
            }
            StmtKind::Try { body, err, handler } => self.gen_try(body, err.as_deref(), handler, is_tail),
            StmtKind::Match(node) => self.gen_match_stmt(node, is_tail),
            StmtKind::Defer(body) => {
                let cls = self.gen_lambda(&[], body, false, false, "__defer");
                let raw = self.tmp();
                self.emit(format!("{raw} = inttoptr i64 {} to ptr", cls.op()));
                let code = self.tmp();
                self.emit(format!("{code} = load i64, ptr {raw}"));
                let env_addr = self.tmp();
                self.emit(format!(
                    "{env_addr} = getelementptr i64, ptr {raw}, i64 1"
                ));
                let env = self.tmp();
                self.emit(format!("{env} = load i64, ptr {env_addr}"));
                self.call_void("__push_defer", &[IrValue::Reg(code), IrValue::Reg(env)]);
                self.scopes.last_mut().expect("defer outside scope").defers += 1;
            }
            StmtKind::Break | StmtKind::Continue => {
                let want_break = matches!(s.kind, StmtKind::Break);
                let mut target = None;
                let mut pops = 0usize;
                for scope in self.scopes.iter().rev() {
                    pops += scope.defers;
                    let label = if want_break {
                        &scope.break_label
                    } else {
                        &scope.continue_label
                    };
                    if let Some(label) = label {
                        target = Some(label.clone());
                        break;
                    }
                }
                match target {
                    Some(label) => {
                        for _ in 0..pops {
                            self.call_void("__pop_run_defer", &[]);
                        }
                        self.emit_term(format!("br label %{label}"));
                    }
                    None => {
                        let what = if want_break { "break" } else { "continue" };
                        self.diags
                            .error(&s.span, format!("'{what}' outside of a loop"));
                    }
                }
            }
            StmtKind::Func(decl) => {
                // Nested named function: register and emit on first sight
                // (top-level and module functions were emitted up front).
                if self.lookup_fun(&decl.name).is_none() {
                    self.add_nested_fn_sig(decl);
                }
                let link = decl.name.clone();
                self.gen_func_by_link(&link, decl, None);
            }
            StmtKind::Module { name, body, .. } => {
                let prev = self.current_module.replace(name.clone());
                for child in body {
                    if !matches!(child.kind, StmtKind::Func(_)) {
                        self.gen_stmt(child, is_tail);
                    }
                }
                self.current_module = prev;
            }
            StmtKind::Layout { .. } => {
                // Offset accessors are emitted in a pre-pass.
            }
            StmtKind::Use { .. } | StmtKind::Export(_) => {}
        }
    }

    fn gen_var(
        &mut self,
        s: &Stmt,
        names: &[String],
        exprs: &[crate::ast::Expr],
        is_decl: bool,
        is_mut: bool,
        is_destructure: bool,
    ) {
        let parallel = names.len() == exprs.len() && !is_destructure;
        let first_val = if !parallel && !exprs.is_empty() {
            Some(self.gen_expr(&exprs[0]))
        } else {
            None
        };
        let get_link = if is_destructure {
            let Some(idx) = self
                .lookup_fun("get")
                .or_else(|| self.lookup_fun("std.core.get"))
            else {
                self.diags
                    .error(&s.span, "destructuring requires the 'get' function");
                return;
            };
            Some(self.fun_sigs[idx].link_name.clone())
        } else {
            None
        };

        for (i, name) in names.iter().enumerate() {
            let slot = if self.depth() == 0 {
                // Top-level: bindings are module globals.
                match self.lookup_global(name) {
                    Some(idx) => format!("@{}", self.globals[idx].link_name),
                    None => {
                        let qname = match self.current_module.as_deref() {
                            Some(m) => format!("{m}.{name}"),
                            None => name.clone(),
                        };
                        self.global_defs
                            .push_str(&format!("@{qname} = global i64 0\n"));
                        self.globals.push(super::state::GlobalVar {
                            name: qname.clone(),
                            link_name: qname.clone(),
                            is_mut,
                        });
                        format!("@{qname}")
                    }
                }
            } else if is_decl {
                if self.has_binding_anywhere(name) {
                    self.diags
                        .warning(&s.span, format!("'{name}' shadows an existing binding"));
                }
                let slot = self.emit_alloca();
                self.bind(name, slot.clone(), is_mut, false, &s.span);
                slot
            } else {
                match self.find_binding(name) {
                    Some(slot) => slot,
                    None => match self.lookup_global(name) {
                        Some(idx) => format!("@{}", self.globals[idx].link_name),
                        None => {
                            let slot = self.emit_alloca();
                            self.bind(name, slot.clone(), is_mut, false, &s.span);
                            slot
                        }
                    },
                }
            };

            let value = if parallel {
                self.gen_expr(&exprs[i])
            } else if let Some(link) = &get_link {
                let link = link.clone();
                let first = first_val.clone().expect("destructure needs a source");
                let idx_val = IrValue::Const(((i as u64) << 1 | 1) as i64);
                self.call(&link, &[first, idx_val])
            } else {
                first_val.clone().unwrap_or(IrValue::Const(0))
            };
            self.emit(format!("store i64 {}, ptr {slot}", value.op()));
        }
    }

    fn gen_for(&mut self, s: &Stmt, var: &str, iterable: &crate::ast::Expr, body: &Stmt) {
        let (len_link, get_link) = {
            let len_sig = self.lookup_fun("list_len");
            let get_sig = self.lookup_fun("get");
            match (len_sig, get_sig) {
                (Some(l), Some(g)) => (
                    self.fun_sigs[l].link_name.clone(),
                    self.fun_sigs[g].link_name.clone(),
                ),
                _ => {
                    self.diags
                        .error(&s.span, "for loops require 'list_len'/'get'");
                    return;
                }
            }
        };
        let iter_val = self.gen_expr(iterable);
        let idx_slot = self.emit_alloca();
        self.emit(format!("store i64 1, ptr {idx_slot}")); // tagged 0
        let cond_bb = self.new_label("fc");
        let body_bb = self.new_label("fb");
        let end_bb = self.new_label("fe");
        self.emit_term(format!("br label %{cond_bb}"));
        self.start_block(cond_bb.clone());
        let i_val = self.tmp();
        self.emit(format!("{i_val} = load i64, ptr {idx_slot}"));
        let n_val = self.call(&len_link, &[iter_val.clone()]);
        // Both sides are tagged ints; signed compare preserves ordering.
        let cmp = self.tmp();
        self.emit(format!("{cmp} = icmp slt i64 {i_val}, {}", n_val.op()));
        self.emit_term(format!("br i1 {cmp}, label %{body_bb}, label %{end_bb}"));
        self.start_block(body_bb);
        let item = self.call(&get_link, &[iter_val, IrValue::Reg(i_val.clone())]);
        let var_slot = self.emit_alloca();
        self.emit(format!("store i64 {}, ptr {var_slot}", item.op()));
        let next = self.tmp();
        self.emit(format!("{next} = add i64 {i_val}, 2"));
        self.emit(format!("store i64 {next}, ptr {idx_slot}"));
        self.push_scope(false);
        let idx = self.scopes.len() - 1;
        self.scopes[idx].break_label = Some(end_bb.clone());
        self.scopes[idx].continue_label = Some(cond_bb.clone());
        self.bind(var, var_slot, false, true, &s.span);
        self.gen_stmt(body, false);
        if !self.block_terminated() {
            self.emit_defers(self.depth(), self.depth());
            self.emit_term(format!("br label %{cond_bb}"));
        }
        self.pop_scope();
        self.start_block(end_bb);
    }

    fn gen_try(&mut self, body: &Stmt, err: Option<&str>, handler: &Stmt, is_tail: bool) {
        let size = self.call("__jmpbuf_size", &[]);
        let jmpbuf = self.tmp();
        self.emit(format!("{jmpbuf} = alloca i8, i64 {}, align 16", size.op()));
        let as_int = self.tmp();
        self.emit(format!("{as_int} = ptrtoint ptr {jmpbuf} to i64"));
        self.call("__set_panic_env", &[IrValue::Reg(as_int)]);
        let sj = self.tmp();
        self.emit(format!("{sj} = call i32 @_setjmp(ptr {jmpbuf})"));
        let ok = self.tmp();
        self.emit(format!("{ok} = icmp eq i32 {sj}, 0"));
        let try_bb = self.new_label("try_body");
        let catch_bb = self.new_label("catch_body");
        let end_bb = self.new_label("try_end");
        self.emit_term(format!("br i1 {ok}, label %{try_bb}, label %{catch_bb}"));

        self.start_block(try_bb);
        self.gen_stmt(body, is_tail);
        self.call("__clear_panic_env", &[]);
        self.emit_term(format!("br label %{end_bb}"));

        self.start_block(catch_bb);
        self.call("__clear_panic_env", &[]);
        let err_val = self.call("__get_panic_val", &[]);
        if let Some(err_name) = err {
            self.push_scope(true);
            let slot = self.emit_alloca();
            self.emit(format!("store i64 {}, ptr {slot}", err_val.op()));
            let span = Span::default();
            self.bind(err_name, slot, false, true, &span);
            self.gen_stmt(handler, is_tail);
            self.pop_scope();
        } else {
            self.gen_stmt(handler, is_tail);
        }
        self.emit_term(format!("br label %{end_bb}"));
        self.start_block(end_bb);
    }

    pub(super) fn gen_match_stmt(&mut self, node: &MatchNode, is_tail: bool) {
        let test_val = self.gen_expr(&node.test);
        let end_bb = self.new_label("match_end");
        for arm in &node.arms {
            let arm_bb = self.new_label("match_arm");
            let next_bb = self.new_label("match_next");
            let mut cond: Option<String> = None;
            let mut wildcard = false;
            for pat in &arm.patterns {
                if matches!(&pat.kind, crate::ast::ExprKind::Ident(n) if n == "_") {
                    wildcard = true;
                    break;
                }
                let pv = self.gen_expr(pat);
                let eq = self.gen_binary(&pat.span, "==", test_val.clone(), pv);
                let bit = self.to_bool(&eq);
                cond = Some(match cond {
                    Some(prev) => {
                        let merged = self.tmp();
                        self.emit(format!("{merged} = or i1 {prev}, {bit}"));
                        merged
                    }
                    None => bit,
                });
            }
            let cond = if wildcard {
                "true".to_string()
            } else {
                cond.unwrap_or_else(|| "false".to_string())
            };
            self.emit_term(format!("br i1 {cond}, label %{arm_bb}, label %{next_bb}"));
            self.start_block(arm_bb);
            self.gen_stmt(&arm.body, is_tail);
            self.emit_term(format!("br label %{end_bb}"));
            self.start_block(next_bb);
        }
        if let Some(default) = &node.default {
            self.gen_stmt(default, is_tail);
        }
        self.emit_term(format!("br label %{end_bb}"));
        self.start_block(end_bb);
    }
}
