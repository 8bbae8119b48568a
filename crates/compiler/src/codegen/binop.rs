//! Binary operators
//!
//! Three layers, tried in order:
//!
//! 1. **Emission-time folding** when both operands are tagged-int
//!    constants, honoring wrap-around and sidestepping the
//!    `INT64_MIN / -1` trap.
//! 2. **Inline fast path** (config-gated): a guard on
//!    `is_tagged_int(l) && is_tagged_int(r)` branching to raw integer
//!    instructions, with the runtime helper as the slow path and a phi in
//!    the merge block. Overflowing `+ - *` use the checked intrinsics and
//!    fall back to the helper; `/ %` select a safe divisor instead of
//!    faulting; shifts verify the range `[0, 64)`.
//! 3. **Helper selection**: inside stdlib modules the direct `__op`
//!    helpers are preferred (config default); elsewhere the generic
//!    stdlib-visible name is tried and only stdlib-owned generics are
//!    accepted before falling back to the primitive.

use crate::ast::Span;

use super::state::{CodeGen, IrValue};

struct OpNames {
    generic: &'static str,
    builtin: &'static str,
}

fn op_names(op: &str) -> Option<OpNames> {
    let (generic, builtin) = match op {
        "+" => ("add", "__add"),
        "-" => ("sub", "__sub"),
        "*" => ("mul", "__mul"),
        "/" => ("div", "__div"),
        "%" => ("mod", "__mod"),
        "|" => ("bor", "__or"),
        "&" => ("band", "__and"),
        "^" => ("bxor", "__xor"),
        "<" => ("lt", "__lt"),
        "<=" => ("le", "__le"),
        ">" => ("gt", "__gt"),
        ">=" => ("ge", "__ge"),
        "<<" => ("bshl", "__shl"),
        ">>" => ("bshr", "__shr"),
        _ => return None,
    };
    Some(OpNames { generic, builtin })
}

fn const_tagged(v: i64) -> IrValue {
    IrValue::Const(((v as u64) << 1 | 1) as i64)
}

fn const_bool(v: bool) -> IrValue {
    IrValue::Const(if v { 2 } else { 4 })
}

impl<'p> CodeGen<'p> {
    /// True inside stdlib/lib modules when the builtin-ops preference is on
    /// (the reflect shims themselves must keep generic dispatch).
    fn prefer_builtin_ops(&self) -> bool {
        let Some(module) = self.current_module.as_deref() else {
            return false;
        };
        if !(module.starts_with("std.") || module.starts_with("lib.")) {
            return false;
        }
        if module.starts_with("std.core.reflect") {
            return false;
        }
        self.config.std_builtin_ops
    }

    pub(super) fn gen_binary(&mut self, span: &Span, op: &str, l: IrValue, r: IrValue) -> IrValue {
        let names = op_names(op);

        // Layer 1: constant folding on two tagged-int literals.
        if let (Some(li), Some(ri)) = (l.tagged_int(), r.tagged_int()) {
            if let Some(folded) = fold_const(op, li, ri) {
                return folded;
            }
        }

        if op == "==" {
            let sig = if self.prefer_builtin_ops() {
                self.lookup_fun("__eq")
            } else {
                self.lookup_fun("std.core.reflect.eq")
                    .or_else(|| self.lookup_fun("eq"))
                    .or_else(|| self.lookup_fun("__eq"))
            };
            let Some(sig) = sig else {
                self.diags.error(span, "'==' requires 'eq' (or __eq)");
                return IrValue::Const(0);
            };
            let link = self.fun_sigs[sig].link_name.clone();
            if let Some(fast) = self.try_fast_binary("__eq", &l, &r, &link) {
                return fast;
            }
            return self.call(&link, &[l, r]);
        }

        if op == "!=" {
            let eq = self.gen_binary(span, "==", l, r);
            if let IrValue::Const(c) = eq {
                return IrValue::Const(6 - c);
            }
            let reg = self.tmp();
            self.emit(format!("{reg} = sub i64 6, {}", eq.op()));
            return IrValue::Reg(reg);
        }

        if op == "in" {
            let Some(sig) = self.lookup_fun("contains") else {
                self.diags.error(span, "'in' requires 'contains'");
                return IrValue::Const(0);
            };
            let link = self.fun_sigs[sig].link_name.clone();
            return self.call(&link, &[r, l]);
        }

        let Some(names) = names else {
            self.diags
                .error(span, format!("undefined operator '{op}'"));
            return IrValue::Const(0);
        };

        // Layer 3a: generic dispatch outside stdlib modules. Only generics
        // the stdlib itself defines are eligible; a same-named user
        // function does not intercept operators.
        if !self.prefer_builtin_ops() {
            let generic = self
                .lookup_fun(&format!("std.core.reflect.{}", names.generic))
                .or_else(|| self.lookup_fun(names.generic));
            if let Some(idx) = generic {
                let sig = &self.fun_sigs[idx];
                if sig.name != names.builtin {
                    let stdlib_owned = match sig.decl {
                        Some(d) => self.decls[d].is_stdlib,
                        None => sig.is_extern,
                    };
                    if stdlib_owned {
                        let link = sig.link_name.clone();
                        if let Some(fast) = self.try_fast_binary(names.builtin, &l, &r, &link) {
                            return fast;
                        }
                        return self.call(&link, &[l, r]);
                    }
                }
            }
        }

        // Layer 3b: the primitive itself.
        let Some(idx) = self.lookup_fun(names.builtin) else {
            self.diags
                .error(span, format!("builtin {} missing", names.builtin));
            return IrValue::Const(0);
        };
        let link = self.fun_sigs[idx].link_name.clone();
        if let Some(fast) = self.try_fast_binary(names.builtin, &l, &r, &link) {
            return fast;
        }
        self.call(&link, &[l, r])
    }

    /// Layer 2: the guarded inline fast path. Returns `None` when disabled
    /// or unsupported for this operator, in which case the caller emits the
    /// plain helper call.
    fn try_fast_binary(
        &mut self,
        builtin: &str,
        l: &IrValue,
        r: &IrValue,
        fallback: &str,
    ) -> Option<IrValue> {
        if !self.config.fast_int_binops {
            return None;
        }
        const SUPPORTED: &[&str] = &[
            "__add", "__sub", "__mul", "__div", "__mod", "__eq", "__lt", "__le", "__gt", "__ge",
            "__and", "__or", "__xor", "__shl", "__shr",
        ];
        if !SUPPORTED.contains(&builtin) {
            return None;
        }

        let fast_bb = self.new_label("bin.int.fast");
        let slow_bb = self.new_label("bin.runtime.slow");
        let merge_bb = self.new_label("bin.merge");

        let l_bit = self.tmp();
        self.emit(format!("{l_bit} = and i64 {}, 1", l.op()));
        let l_is = self.tmp();
        self.emit(format!("{l_is} = icmp eq i64 {l_bit}, 1"));
        let r_bit = self.tmp();
        self.emit(format!("{r_bit} = and i64 {}, 1", r.op()));
        let r_is = self.tmp();
        self.emit(format!("{r_is} = icmp eq i64 {r_bit}, 1"));
        let both = self.tmp();
        self.emit(format!("{both} = and i1 {l_is}, {r_is}"));
        self.emit_term(format!("br i1 {both}, label %{fast_bb}, label %{slow_bb}"));

        self.start_block(fast_bb);
        let same = l == r;
        let (fast_value, fast_done) = if same && matches!(builtin, "__sub" | "__xor") {
            // Algebraic identities on a repeated operand.
            (const_tagged(0), self.cur_label())
        } else if same && matches!(builtin, "__and" | "__or") {
            (l.clone(), self.cur_label())
        } else if same && matches!(builtin, "__eq" | "__le" | "__ge") {
            (const_bool(true), self.cur_label())
        } else if same && matches!(builtin, "__lt" | "__gt") {
            (const_bool(false), self.cur_label())
        } else {
            let li = self.untag_int_reg(l);
            let ri = self.untag_int_reg(r);
            match builtin {
                "__add" | "__sub" | "__mul" => {
                    let intrinsic = match builtin {
                        "__add" => "llvm.sadd.with.overflow.i64",
                        "__sub" => "llvm.ssub.with.overflow.i64",
                        _ => "llvm.smul.with.overflow.i64",
                    };
                    let packed = self.tmp();
                    self.emit(format!(
                        "{packed} = call {{ i64, i1 }} @{intrinsic}(i64 {li}, i64 {ri})"
                    ));
                    let raw = self.tmp();
                    self.emit(format!("{raw} = extractvalue {{ i64, i1 }} {packed}, 0"));
                    let overflow = self.tmp();
                    self.emit(format!(
                        "{overflow} = extractvalue {{ i64, i1 }} {packed}, 1"
                    ));
                    let ok_bb = self.new_label("bin.int.fast.ok");
                    self.emit_term(format!(
                        "br i1 {overflow}, label %{slow_bb}, label %{ok_bb}"
                    ));
                    self.start_block(ok_bb);
                    let tagged = self.tag_int_reg(&raw);
                    (tagged, self.cur_label())
                }
                "__div" | "__mod" => {
                    let is_zero = self.tmp();
                    self.emit(format!("{is_zero} = icmp eq i64 {ri}, 0"));
                    let safe = self.tmp();
                    self.emit(format!("{safe} = select i1 {is_zero}, i64 1, i64 {ri}"));
                    let raw = self.tmp();
                    let insn = if builtin == "__div" { "udiv" } else { "urem" };
                    self.emit(format!("{raw} = {insn} i64 {li}, {safe}"));
                    let tagged = self.tag_int_reg(&raw);
                    let zero_res = if builtin == "__div" { 0 } else { 1 };
                    let res = self.tmp();
                    self.emit(format!(
                        "{res} = select i1 {is_zero}, i64 {zero_res}, i64 {}",
                        tagged.op()
                    ));
                    (IrValue::Reg(res), self.cur_label())
                }
                "__and" | "__or" | "__xor" => {
                    let insn = match builtin {
                        "__and" => "and",
                        "__or" => "or",
                        _ => "xor",
                    };
                    let raw = self.tmp();
                    self.emit(format!("{raw} = {insn} i64 {li}, {ri}"));
                    let tagged = self.tag_int_reg(&raw);
                    (tagged, self.cur_label())
                }
                "__shl" | "__shr" => {
                    let nonneg = self.tmp();
                    self.emit(format!("{nonneg} = icmp sge i64 {ri}, 0"));
                    let below = self.tmp();
                    self.emit(format!("{below} = icmp slt i64 {ri}, 64"));
                    let in_range = self.tmp();
                    self.emit(format!("{in_range} = and i1 {nonneg}, {below}"));
                    let shift_bb = self.new_label("bin.int.fast.shift");
                    self.emit_term(format!(
                        "br i1 {in_range}, label %{shift_bb}, label %{slow_bb}"
                    ));
                    self.start_block(shift_bb);
                    let insn = if builtin == "__shl" { "shl" } else { "lshr" };
                    let raw = self.tmp();
                    self.emit(format!("{raw} = {insn} i64 {li}, {ri}"));
                    let tagged = self.tag_int_reg(&raw);
                    (tagged, self.cur_label())
                }
                _ => {
                    let pred = match builtin {
                        "__lt" => "slt",
                        "__le" => "sle",
                        "__gt" => "sgt",
                        "__ge" => "sge",
                        _ => "eq",
                    };
                    let cmp = self.tmp();
                    self.emit(format!("{cmp} = icmp {pred} i64 {li}, {ri}"));
                    let tagged = self.tag_bool(&cmp);
                    (tagged, self.cur_label())
                }
            }
        };
        self.emit_term(format!("br label %{merge_bb}"));

        self.start_block(slow_bb.clone());
        let slow_value = self.call(fallback, &[l.clone(), r.clone()]);
        let slow_done = self.cur_label();
        self.emit_term(format!("br label %{merge_bb}"));

        self.start_block(merge_bb);
        let phi = self.tmp();
        self.emit(format!(
            "{phi} = phi i64 [ {}, %{fast_done} ], [ {}, %{slow_done} ]",
            fast_value.op(),
            slow_value.op()
        ));
        Some(IrValue::Reg(phi))
    }
}

/// Fold two tagged-int literals at emission time. `None` means "emit the
/// runtime form" (the `INT64_MIN / -1` trap, out-of-range shifts).
fn fold_const(op: &str, li: i64, ri: i64) -> Option<IrValue> {
    Some(match op {
        "+" => const_tagged(li.wrapping_add(ri)),
        "-" => const_tagged(li.wrapping_sub(ri)),
        "*" => const_tagged(li.wrapping_mul(ri)),
        "/" => {
            if ri == 0 {
                return Some(IrValue::Const(0));
            }
            if li == i64::MIN && ri == -1 {
                return None;
            }
            const_tagged(li / ri)
        }
        "%" => {
            if ri == 0 {
                return Some(IrValue::Const(1));
            }
            if ri == 1 || ri == -1 {
                return Some(const_tagged(0));
            }
            const_tagged(li % ri)
        }
        "&" => const_tagged(li & ri),
        "|" => const_tagged(li | ri),
        "^" => const_tagged(li ^ ri),
        "<" => const_bool(li < ri),
        "<=" => const_bool(li <= ri),
        ">" => const_bool(li > ri),
        ">=" => const_bool(li >= ri),
        "==" => const_bool(li == ri),
        "!=" => const_bool(li != ri),
        "<<" if (0..64).contains(&ri) => const_tagged(((li as u64) << ri) as i64),
        ">>" if (0..64).contains(&ri) => const_tagged(((li as u64) >> ri) as i64),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(v: i64) -> i64 {
        ((v as u64) << 1 | 1) as i64
    }

    #[test]
    fn folds_arithmetic() {
        assert_eq!(fold_const("+", 1, 2), Some(IrValue::Const(tagged(3))));
        assert_eq!(fold_const("*", 6, 7), Some(IrValue::Const(tagged(42))));
        assert_eq!(fold_const("-", 5, 9), Some(IrValue::Const(tagged(-4))));
    }

    #[test]
    fn folds_divide_by_zero_to_neutral_words() {
        assert_eq!(fold_const("/", 9, 0), Some(IrValue::Const(0)));
        assert_eq!(fold_const("%", 9, 0), Some(IrValue::Const(1)));
    }

    #[test]
    fn sidesteps_the_min_div_trap() {
        assert_eq!(fold_const("/", i64::MIN, -1), None);
        assert_eq!(fold_const("%", i64::MIN, -1), Some(IrValue::Const(tagged(0))));
    }

    #[test]
    fn folds_comparisons_to_bool_words() {
        assert_eq!(fold_const("<", 1, 2), Some(IrValue::Const(2)));
        assert_eq!(fold_const(">", 1, 2), Some(IrValue::Const(4)));
        assert_eq!(fold_const("==", 3, 3), Some(IrValue::Const(2)));
    }

    #[test]
    fn shifts_fold_only_in_range() {
        assert_eq!(fold_const("<<", 1, 4), Some(IrValue::Const(tagged(16))));
        assert_eq!(fold_const("<<", 1, 64), None);
        assert_eq!(fold_const(">>", 16, -1), None);
    }

    #[test]
    fn wrapping_semantics() {
        assert_eq!(
            fold_const("+", i64::MAX, 1),
            Some(IrValue::Const(tagged(i64::MIN)))
        );
    }
}
