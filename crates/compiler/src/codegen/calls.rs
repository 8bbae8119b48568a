//! Call lowering
//!
//! Statically-resolvable calls go straight to the signature's symbol; every
//! other call site becomes `__callN(fn, a1, …, aN)` and the runtime
//! dispatcher sorts out closures, native pointers, and plain function
//! pointers.
//!
//! Method calls `t.m(args)` resolve in order: module-alias target →
//! collection prefixes (`dict_m`, `list_m`, …) → bare `m` → dynamic
//! property lookup through `get`.

use crate::ast::{CallArg, Expr, ExprKind, Span};
use crate::diag::{closest_symbol, strict_error_enabled};

use super::runtime::MAX_CALL_ARITY;
use super::state::{CodeGen, IrValue, METHOD_PREFIXES};
use super::symbols::known_symbol_names;

/// What a call site resolved to.
struct Resolved {
    sig: Option<usize>,
    /// Callee operand for indirect calls (loaded binding / computed value).
    indirect: Option<IrValue>,
    /// Method-call target already consumed by qualified resolution.
    skip_target: bool,
}

impl<'p> CodeGen<'p> {
    pub(super) fn gen_call_expr(&mut self, e: &Expr) -> IrValue {
        match &e.kind {
            ExprKind::Call { callee, args } => {
                if let ExprKind::Ident(name) = &callee.kind {
                    if name == "extern_all" || name == "__extern_all" {
                        if self.handle_extern_all(e, args) {
                            return IrValue::Const(0);
                        }
                    }
                }
                let resolved = self.resolve_plain_call(callee, args);
                self.emit_call(e, None, args, resolved)
            }
            ExprKind::MethodCall { target, name, args } => {
                if name == "extern_all" && self.handle_extern_all(e, args) {
                    return IrValue::Const(0);
                }
                match self.resolve_method_call(e, target, name, args) {
                    Some(resolved) => self.emit_call(e, Some(target), args, resolved),
                    None => IrValue::Const(0),
                }
            }
            _ => unreachable!("gen_call_expr on non-call"),
        }
    }

    /// `extern_all(["sym", ["sym2", 3], …])` registers foreign signatures.
    fn handle_extern_all(&mut self, e: &Expr, args: &[CallArg]) -> bool {
        if args.len() != 1 {
            return false;
        }
        let ExprKind::List(items) = &args[0].value.kind else {
            return false;
        };
        for item in items {
            let (name, arity) = match &item.kind {
                ExprKind::Str(s) => (Some(s.as_str()), 0usize),
                ExprKind::List(pair) | ExprKind::Tuple(pair) if pair.len() == 2 => {
                    match (&pair[0].kind, &pair[1].kind) {
                        (ExprKind::Str(s), ExprKind::Int(a)) if *a >= 0 => {
                            (Some(s.as_str()), *a as usize)
                        }
                        _ => (None, 0),
                    }
                }
                _ => (None, 0),
            };
            let Some(name) = name else {
                self.diags.error(
                    &e.span,
                    "extern_all expects a list of names or [name, arity] pairs",
                );
                return true;
            };
            self.add_extern_sig(name, arity);
        }
        true
    }

    fn has_binding(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|s| s.vars.iter().any(|b| b.name == name))
    }

    fn resolve_method_call(
        &mut self,
        e: &Expr,
        target: &Expr,
        name: &str,
        args: &[CallArg],
    ) -> Option<Resolved> {
        // Priority 1: target is a module (or module alias).
        if let ExprKind::Ident(target_name) = &target.kind {
            let mut module_name = target_name.clone();
            let mut is_alias = false;
            for (alias, module) in &self.aliases {
                if alias == target_name {
                    module_name = module.clone();
                    is_alias = true;
                    break;
                }
            }
            if is_alias
                || (self.lookup_fun(target_name).is_none() && !self.has_binding(target_name))
            {
                let dotted = format!("{module_name}.{name}");
                if let Some(idx) = self.lookup_fun(&dotted) {
                    return Some(Resolved {
                        sig: Some(idx),
                        indirect: None,
                        skip_target: true,
                    });
                }
                if is_alias {
                    self.diags
                        .error(&e.span, format!("function {module_name}.{name} not found"));
                    if self.diags.verbosity >= 1 {
                        self.diags
                            .hint(format!("alias '{target_name}' resolves to module '{module_name}'"));
                    }
                    self.diags
                        .hint(format!("make sure '{name}' is exported from '{module_name}'"));
                    return None;
                }
            }
        }
        // Priority 2: collection prefixes.
        for prefix in METHOD_PREFIXES {
            if let Some(idx) = self.lookup_fun(&format!("{prefix}{name}")) {
                return Some(Resolved {
                    sig: Some(idx),
                    indirect: None,
                    skip_target: false,
                });
            }
        }
        // Priority 3: the bare name.
        if let Some(idx) = self.lookup_fun(name) {
            return Some(Resolved {
                sig: Some(idx),
                indirect: None,
                skip_target: false,
            });
        }
        // Fallback: dynamic property lookup, `t.m(args)` → `get(t, "m")(t?…)`.
        let getter = self
            .lookup_fun("get")
            .or_else(|| self.lookup_fun("std.core.get"))
            .or_else(|| self.lookup_fun("std.core.reflect.get"))
            .or_else(|| self.lookup_fun("dict_get"));
        if let Some(getter) = getter {
            if name != "get" {
                let link = self.fun_sigs[getter].link_name.clone();
                let target_val = self.gen_expr(target);
                let rt = self.const_string_ptr(name.as_bytes());
                let name_reg = self.tmp();
                self.emit(format!("{name_reg} = load i64, ptr {rt}"));
                let callee = self.call(&link, &[target_val, IrValue::Reg(name_reg)]);
                return Some(Resolved {
                    sig: None,
                    indirect: Some(callee),
                    skip_target: false,
                });
            }
        }
        let shown = match &target.kind {
            ExprKind::Ident(t) => format!("{t}.{name}"),
            _ => name.to_string(),
        };
        self.diags
            .error(&e.span, format!("undefined symbol '{shown}'"));
        let suggestion = closest_symbol(name, known_symbol_names(self)).map(str::to_string);
        if let Some(best) = suggestion {
            self.diags.hint(format!("did you mean '{best}'?"));
        }
        None
    }

    fn resolve_plain_call(&mut self, callee: &Expr, args: &[CallArg]) -> Resolved {
        if let ExprKind::Ident(name) = &callee.kind {
            // A shadowing local or global wins: indirect call through the
            // loaded value, no overload resolution.
            if let Some(slot) = self.find_binding(name) {
                let reg = self.tmp();
                self.emit(format!("{reg} = load i64, ptr {slot}"));
                return Resolved {
                    sig: None,
                    indirect: Some(IrValue::Reg(reg)),
                    skip_target: false,
                };
            }
            if let Some(idx) = self.lookup_global(name) {
                let link = self.globals[idx].link_name.clone();
                let reg = self.tmp();
                self.emit(format!("{reg} = load i64, ptr @{link}"));
                return Resolved {
                    sig: None,
                    indirect: Some(IrValue::Reg(reg)),
                    skip_target: false,
                };
            }
            if let Some(idx) = self
                .resolve_overload(name, args.len())
                .or_else(|| self.lookup_use_module_fun(name, args.len()))
            {
                return Resolved {
                    sig: Some(idx),
                    indirect: None,
                    skip_target: false,
                };
            }
        }
        let value = self.gen_expr(callee);
        Resolved {
            sig: None,
            indirect: Some(value),
            skip_target: false,
        }
    }

    /// Arity diagnostics for resolved signatures; returns false when the
    /// call must be suppressed (strict error / variadic shortfall).
    fn check_call_arity(
        &mut self,
        span: &Span,
        sig_idx: usize,
        call_argc: usize,
        member_with_target: bool,
    ) -> bool {
        let (sig_name, sig_arity, is_variadic) = {
            let s = &self.fun_sigs[sig_idx];
            (s.name.clone(), s.arity, s.is_variadic)
        };
        if !is_variadic && call_argc != sig_arity {
            let strict = strict_error_enabled(&self.diags, span);
            let is_stdlib = span.is_stdlib();
            let mut emit = if is_stdlib && !strict {
                let mut zeroed = span.clone();
                zeroed.line = 0;
                zeroed.col = 0;
                self.diags
                    .should_emit("arity_mismatch_std", &zeroed, &sig_name)
            } else {
                self.diags.should_emit("arity_mismatch", span, &sig_name)
            };
            if is_stdlib && !strict && self.diags.verbosity < 2 {
                emit = false;
            }
            if emit {
                let msg = format!("arity mismatch for '{sig_name}'");
                if strict {
                    self.diags.error(span, msg);
                } else {
                    self.diags.warning(span, msg);
                }
                self.diags
                    .hint(format!("expected {sig_arity} arguments, got {call_argc}"));
                if member_with_target {
                    self.diags
                        .hint("member calls pass the target object as the first argument");
                }
                if strict {
                    self.diags.hint(
                        "strict diagnostics are enabled; unset NYTRIX_STRICT_DIAGNOSTICS to downgrade to warning",
                    );
                }
                self.diags
                    .fix(format!("call '{sig_name}' with {sig_arity} argument(s)"));
            }
            return !strict;
        }
        if is_variadic && call_argc + 1 < sig_arity {
            self.diags.error(
                span,
                format!("not enough arguments for variadic '{sig_name}'"),
            );
            self.diags.hint(format!(
                "expected at least {} arguments, got {call_argc}",
                sig_arity - 1
            ));
            return false;
        }
        true
    }

    /// Literal arguments are checked against declared parameter type names.
    fn check_literal_types(&mut self, span: &Span, sig_idx: usize, args: &[CallArg], offset: usize) {
        let Some(decl_idx) = self.fun_sigs[sig_idx].decl else {
            return;
        };
        let params: Vec<(String, Option<String>)> = self.decls[decl_idx]
            .decl
            .params
            .iter()
            .map(|p| (p.name.clone(), p.type_name.clone()))
            .collect();
        for (i, arg) in args.iter().enumerate() {
            let Some((pname, Some(ty))) = params.get(i + offset).cloned() else {
                continue;
            };
            let lit = match &arg.value.kind {
                ExprKind::Int(_) => Some("int"),
                ExprKind::Float(_) => Some("float"),
                ExprKind::Bool(_) => Some("bool"),
                ExprKind::Str(_) => Some("str"),
                _ => None,
            };
            let Some(lit) = lit else { continue };
            let matches = match ty.as_str() {
                "int" | "i64" => lit == "int",
                "float" | "f64" => lit == "float" || lit == "int",
                "bool" => lit == "bool",
                "str" | "string" => lit == "str",
                "any" | "ptr" | "fn" | "list" | "dict" => true,
                _ => {
                    if self.diags.should_emit("unknown_type", span, &ty) {
                        self.diags
                            .warning(span, format!("unknown type name '{ty}' on parameter '{pname}'"));
                    }
                    continue;
                }
            };
            if !matches {
                self.diags.error(
                    span,
                    format!("type mismatch: parameter '{pname}' expects {ty}, got {lit} literal"),
                );
            }
        }
    }

    fn emit_call(
        &mut self,
        e: &Expr,
        method_target: Option<&Expr>,
        args: &[CallArg],
        resolved: Resolved,
    ) -> IrValue {
        let span = &e.span;
        let Resolved {
            sig,
            indirect,
            skip_target,
        } = resolved;

        // Indirect path: dispatch through __callN.
        if sig.is_none() {
            let Some(callee) = indirect else {
                return IrValue::Const(0);
            };
            let extra_target = method_target.is_some() as usize;
            let n = args.len() + extra_target;
            if n > MAX_CALL_ARITY {
                self.diags.error(
                    span,
                    format!("undefined runtime call helper '__call{n}'"),
                );
                self.diags.hint(format!(
                    "runtime supports function calls up to {MAX_CALL_ARITY} arguments"
                ));
                return IrValue::Const(0);
            }
            let mut call_args = Vec::with_capacity(n + 1);
            call_args.push(callee);
            if let Some(target) = method_target {
                call_args.push(self.gen_expr(target));
            }
            for a in args {
                call_args.push(self.gen_expr(&a.value));
            }
            return self.call(&format!("__call{n}"), &call_args);
        }

        let sig_idx = sig.expect("checked above");
        let target_arg = method_target.filter(|_| !skip_target);
        let call_argc = args.len() + target_arg.is_some() as usize;
        if !self.check_call_arity(span, sig_idx, call_argc, target_arg.is_some()) {
            return IrValue::Const(0);
        }
        self.check_literal_types(span, sig_idx, args, target_arg.is_some() as usize);

        let (link, sig_arity, is_variadic) = {
            let s = &self.fun_sigs[sig_idx];
            (s.link_name.clone(), s.arity, s.is_variadic)
        };
        let mut lowered: Vec<IrValue> = Vec::with_capacity(sig_arity);
        if let Some(target) = target_arg {
            lowered.push(self.gen_expr(target));
        }
        let mut user_idx = 0usize;
        while lowered.len() < sig_arity {
            let slot = lowered.len();
            if is_variadic && slot == sig_arity - 1 {
                lowered.push(self.package_variadic(span, &args[user_idx.min(args.len())..]));
                user_idx = args.len();
                break;
            }
            if user_idx < args.len() {
                let v = self.gen_expr(&args[user_idx].value);
                lowered.push(v);
                user_idx += 1;
            } else {
                // Under-application pads with the none word.
                lowered.push(IrValue::Const(0));
            }
        }
        // Surplus arguments (already warned about) are evaluated for their
        // effects but not passed; the declared type governs the call.
        while user_idx < args.len() {
            self.gen_expr(&args[user_idx].value);
            user_idx += 1;
        }
        self.call(&link, &lowered)
    }

    /// Package trailing arguments of a variadic call into a list; keyword
    /// arguments are wrapped through `__kwarg` first.
    fn package_variadic(&mut self, span: &Span, rest: &[CallArg]) -> IrValue {
        let list_sig = self
            .lookup_fun("list")
            .or_else(|| self.lookup_fun("std.core.list"));
        let append_sig = self
            .lookup_fun("append")
            .or_else(|| self.lookup_fun("std.core.append"));
        let (Some(list_idx), Some(append_idx)) = (list_sig, append_sig) else {
            self.diags
                .error(span, "variadic arguments require list/append helpers");
            self.diags
                .hint("missing std.core imports for 'list'/'append'");
            return IrValue::Const(0);
        };
        let list_link = self.fun_sigs[list_idx].link_name.clone();
        let append_link = self.fun_sigs[append_idx].link_name.clone();
        let len = IrValue::Const(((rest.len() as u64) << 1 | 1) as i64);
        let mut acc = self.call(&list_link, &[len]);
        for arg in rest {
            let mut v = self.gen_expr(&arg.value);
            if let Some(key) = &arg.name {
                let Some(kw_idx) = self.lookup_fun("__kwarg") else {
                    self.diags.error(span, "keyword args require '__kwarg'");
                    return IrValue::Const(0);
                };
                let kw_link = self.fun_sigs[kw_idx].link_name.clone();
                let rt = self.const_string_ptr(key.as_bytes());
                let name_reg = self.tmp();
                self.emit(format!("{name_reg} = load i64, ptr {rt}"));
                v = self.call(&kw_link, &[IrValue::Reg(name_reg), v]);
            }
            acc = self.call(&append_link, &[acc, v]);
        }
        acc
    }
}
