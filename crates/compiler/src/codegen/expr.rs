//! Expression lowering
//!
//! Every expression lowers to a single tagged i64 operand. Lowering after a
//! terminator (dead code behind `return`/`break`) is suppressed at the
//! emission layer, so cases here don't need to re-check.

use crate::ast::{Expr, ExprKind, FStringPart};
use crate::diag::closest_symbol;

use super::state::{CodeGen, IrValue};
use super::symbols::known_symbol_names;

impl<'p> CodeGen<'p> {
    pub(super) fn gen_expr(&mut self, e: &Expr) -> IrValue {
        // Dead code behind a terminator is suppressed, but lowering after
        // an error continues so further diagnostics can surface.
        if self.block_terminated() {
            return IrValue::Const(0);
        }
        match &e.kind {
            ExprKind::Int(v) => IrValue::Const(((*v as u64) << 1 | 1) as i64),
            ExprKind::Bool(b) => IrValue::Const(if *b { 2 } else { 4 }),
            ExprKind::Float(f) => {
                let bits = f.to_bits() as i64;
                self.call("__flt_box_val", &[IrValue::Const(bits)])
            }
            ExprKind::Str(s) => {
                let rt = self.const_string_ptr(s.as_bytes());
                let reg = self.tmp();
                self.emit(format!("{reg} = load i64, ptr {rt}"));
                IrValue::Reg(reg)
            }
            ExprKind::Ident(name) => self.gen_ident(e, name),
            ExprKind::Unary { op, right } => {
                let r = self.gen_expr(right);
                match op.as_str() {
                    "!" => {
                        let cond = self.to_bool(&r);
                        let reg = self.tmp();
                        self.emit(format!("{reg} = select i1 {cond}, i64 4, i64 2"));
                        IrValue::Reg(reg)
                    }
                    "-" => self.gen_binary(&e.span, "-", IrValue::Const(1), r),
                    "~" => self.call("__not", &[r]),
                    other => {
                        self.diags
                            .error(&e.span, format!("unsupported unary operator '{other}'"));
                        IrValue::Const(0)
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.gen_expr(left);
                let r = self.gen_expr(right);
                self.gen_binary(&e.span, op, l, r)
            }
            ExprKind::Logical { op, left, right } => self.gen_logical(op, left, right),
            ExprKind::Ternary {
                cond,
                then_val,
                else_val,
            } => self.gen_ternary(cond, then_val, else_val),
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => self.gen_call_expr(e),
            ExprKind::Index {
                target,
                start,
                stop,
                step,
                is_slice,
            } => self.gen_index(e, target, start, stop, step, *is_slice),
            ExprKind::List(items) | ExprKind::Tuple(items) => self.gen_list(e, items),
            ExprKind::Dict(pairs) => self.gen_dict(e, pairs),
            ExprKind::FString(parts) => self.gen_fstring(e, parts),
            ExprKind::Lambda {
                params,
                body,
                is_variadic,
                is_fn,
            } => self.gen_lambda(params, body, *is_variadic, *is_fn, "__lambda"),
            ExprKind::Asm {
                code,
                constraints,
                args,
            } => self.gen_asm(code, constraints, args),
            ExprKind::Comptime(body) => self.eval_comptime(body, &e.span),
            ExprKind::Match(node) => {
                // Lower through the statement machinery with a result slot.
                let slot = self.emit_alloca();
                self.emit(format!("store i64 1, ptr {slot}"));
                let saved = self.result_slot.replace(slot.clone());
                self.gen_match_stmt(node, true);
                self.result_slot = saved;
                let reg = self.tmp();
                self.emit(format!("{reg} = load i64, ptr {slot}"));
                IrValue::Reg(reg)
            }
        }
    }

    fn gen_ident(&mut self, e: &Expr, name: &str) -> IrValue {
        if name == "none" {
            return IrValue::Const(0);
        }
        if let Some(slot) = self.find_binding(name) {
            let reg = self.tmp();
            self.emit(format!("{reg} = load i64, ptr {slot}"));
            return IrValue::Reg(reg);
        }
        if let Some(idx) = self.lookup_global(name) {
            let link = self.globals[idx].link_name.clone();
            let reg = self.tmp();
            self.emit(format!("{reg} = load i64, ptr @{link}"));
            return IrValue::Reg(reg);
        }
        if let Some(idx) = self.lookup_fun(name) {
            let sig = &self.fun_sigs[idx];
            let link = sig.link_name.clone();
            let is_user_fn = sig.decl.is_some();
            let raw = self.tmp();
            self.emit(format!("{raw} = ptrtoint ptr @{link} to i64"));
            if is_user_fn {
                let tagged = self.tmp();
                self.emit(format!("{tagged} = or i64 {raw}, 2"));
                return IrValue::Reg(tagged);
            }
            return IrValue::Reg(raw);
        }
        self.diags
            .error(&e.span, format!("undefined symbol '{name}'"));
        let suggestion =
            closest_symbol(name, known_symbol_names(self)).map(str::to_string);
        if let Some(best) = suggestion {
            self.diags.hint(format!("did you mean '{best}'?"));
        }
        IrValue::Const(0)
    }

    fn gen_logical(&mut self, op: &str, left: &Expr, right: &Expr) -> IrValue {
        let is_and = op == "&&";
        let l = self.gen_expr(left);
        let cond = self.to_bool(&l);
        let entry = self.cur_label();
        let rhs_bb = self.new_label("lrhs");
        let end_bb = self.new_label("lend");
        if is_and {
            self.emit_term(format!("br i1 {cond}, label %{rhs_bb}, label %{end_bb}"));
        } else {
            self.emit_term(format!("br i1 {cond}, label %{end_bb}, label %{rhs_bb}"));
        }
        self.start_block(rhs_bb);
        let rv = self.gen_expr(right);
        let rhs_end = self.cur_label();
        self.emit_term(format!("br label %{end_bb}"));
        self.start_block(end_bb);
        let short_circuit = if is_and { 4 } else { 2 };
        let phi = self.tmp();
        self.emit(format!(
            "{phi} = phi i64 [ {short_circuit}, %{entry} ], [ {}, %{rhs_end} ]",
            rv.op()
        ));
        IrValue::Reg(phi)
    }

    fn gen_ternary(&mut self, cond: &Expr, then_val: &Expr, else_val: &Expr) -> IrValue {
        let c = self.gen_expr(cond);
        let cond_bit = self.to_bool(&c);
        let true_bb = self.new_label("tern_true");
        let false_bb = self.new_label("tern_false");
        let end_bb = self.new_label("tern_end");
        self.emit_term(format!(
            "br i1 {cond_bit}, label %{true_bb}, label %{false_bb}"
        ));
        self.start_block(true_bb);
        let tv = self.gen_expr(then_val);
        let true_end = self.cur_label();
        self.emit_term(format!("br label %{end_bb}"));
        self.start_block(false_bb);
        let fv = self.gen_expr(else_val);
        let false_end = self.cur_label();
        self.emit_term(format!("br label %{end_bb}"));
        self.start_block(end_bb);
        let phi = self.tmp();
        self.emit(format!(
            "{phi} = phi i64 [ {}, %{true_end} ], [ {}, %{false_end} ]",
            tv.op(),
            fv.op()
        ));
        IrValue::Reg(phi)
    }

    #[allow(clippy::too_many_arguments)]
    fn gen_index(
        &mut self,
        e: &Expr,
        target: &Expr,
        start: &Option<Box<Expr>>,
        stop: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        is_slice: bool,
    ) -> IrValue {
        if is_slice || start.is_none() {
            let Some(idx) = self.lookup_fun("slice") else {
                self.diags.error(&e.span, "slice requires 'slice'");
                return IrValue::Const(0);
            };
            let link = self.fun_sigs[idx].link_name.clone();
            let t = self.gen_expr(target);
            let start_v = match start {
                Some(s) => self.gen_expr(s),
                None => IrValue::Const(1), // tagged 0
            };
            let stop_v = match stop {
                Some(s) => self.gen_expr(s),
                // Tagged "effectively infinite" upper bound.
                None => IrValue::Const(((0x3fff_ffffu64) << 1 | 1) as i64),
            };
            let step_v = match step {
                Some(s) => self.gen_expr(s),
                None => IrValue::Const(3), // tagged 1
            };
            return self.call(&link, &[t, start_v, stop_v, step_v]);
        }
        let sig = self
            .lookup_fun("get")
            .or_else(|| self.lookup_fun("std.core.get"));
        let Some(idx) = sig else {
            self.diags.error(&e.span, "index requires 'get'");
            return IrValue::Const(0);
        };
        let link = self.fun_sigs[idx].link_name.clone();
        let t = self.gen_expr(target);
        let i = self.gen_expr(start.as_ref().expect("checked above"));
        self.call(&link, &[t, i])
    }

    fn gen_list(&mut self, e: &Expr, items: &[Expr]) -> IrValue {
        let list_sig = self
            .lookup_fun("list")
            .or_else(|| self.lookup_fun("std.core.list"));
        let append_sig = self
            .lookup_fun("append")
            .or_else(|| self.lookup_fun("std.core.append"));
        let (Some(list_idx), Some(append_idx)) = (list_sig, append_sig) else {
            self.diags.error(
                &e.span,
                "list literals require 'list'/'append' (missing std.core?)",
            );
            return IrValue::Const(0);
        };
        let list_link = self.fun_sigs[list_idx].link_name.clone();
        let append_link = self.fun_sigs[append_idx].link_name.clone();
        let len = IrValue::Const(((items.len() as u64) << 1 | 1) as i64);
        let mut acc = self.call(&list_link, &[len]);
        for item in items {
            let v = self.gen_expr(item);
            acc = self.call(&append_link, &[acc, v]);
        }
        acc
    }

    fn gen_dict(&mut self, e: &Expr, pairs: &[(Expr, Expr)]) -> IrValue {
        let dict_sig = self
            .lookup_fun("dict")
            .or_else(|| self.lookup_fun("std.collections.dict.dict"));
        let set_sig = self
            .lookup_fun("dict_set")
            .or_else(|| self.lookup_fun("std.collections.dict.dict_set"));
        let (Some(dict_idx), Some(set_idx)) = (dict_sig, set_sig) else {
            self.diags.error(
                &e.span,
                "dict literals require 'dict'/'dict_set' (missing std.core?)",
            );
            return IrValue::Const(0);
        };
        let dict_link = self.fun_sigs[dict_idx].link_name.clone();
        let set_link = self.fun_sigs[set_idx].link_name.clone();
        let len = IrValue::Const(((pairs.len() as u64) << 1 | 1) as i64);
        let d = self.call(&dict_link, &[len]);
        for (k, v) in pairs {
            let kv = self.gen_expr(k);
            let vv = self.gen_expr(v);
            self.call(&set_link, &[d.clone(), kv, vv]);
        }
        d
    }

    fn gen_fstring(&mut self, _e: &Expr, parts: &[FStringPart]) -> IrValue {
        let empty = self.const_string_ptr(b"");
        let reg = self.tmp();
        self.emit(format!("{reg} = load i64, ptr {empty}"));
        let mut acc = IrValue::Reg(reg);
        for part in parts {
            let piece = match part {
                FStringPart::Lit(s) => {
                    let rt = self.const_string_ptr(s.as_bytes());
                    let r = self.tmp();
                    self.emit(format!("{r} = load i64, ptr {rt}"));
                    IrValue::Reg(r)
                }
                FStringPart::Expr(e) => {
                    let v = self.gen_expr(e);
                    self.call("__to_str", &[v])
                }
            };
            acc = self.call("__str_concat", &[acc, piece]);
        }
        acc
    }

    fn gen_asm(&mut self, code: &str, constraints: &str, args: &[Expr]) -> IrValue {
        let values: Vec<IrValue> = args.iter().map(|a| self.gen_expr(a)).collect();
        let rendered: Vec<String> = values.iter().map(|v| format!("i64 {}", v.op())).collect();
        let reg = self.tmp();
        self.emit(format!(
            "{reg} = call i64 asm sideeffect \"{}\", \"{}\"({})",
            escape_ir_string(code),
            escape_ir_string(constraints),
            rendered.join(", ")
        ));
        IrValue::Reg(reg)
    }
}

/// Escape a string for use inside an IR quoted literal.
fn escape_ir_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_string_escaping() {
        assert_eq!(escape_ir_string("mov $0, $1"), "mov $0, $1");
        assert_eq!(escape_ir_string("a\"b"), "a\\22b");
        assert_eq!(escape_ir_string("a\nb"), "a\\0Ab");
    }
}
