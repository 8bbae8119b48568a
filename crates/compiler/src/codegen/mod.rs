//! LLVM IR code generation
//!
//! Lowers a parsed Ny program to LLVM IR text (`.ll`). Every Ny value is a
//! bare tagged `i64` (see `ny-core`), so every emitted function has type
//! `i64 (i64, …)` and calls into the runtime ABI declared by `runtime.rs`.
//!
//! # Structure
//!
//! - `state.rs`: the per-compilation `CodeGen` context (symbol tables,
//!   emission buffers, scope stack) and the `IrValue` operand type
//! - `runtime.rs`: data-driven table of runtime declarations + the
//!   comptime deny list
//! - `symbols.rs`: signature/global tables, the resolver-strategy chain,
//!   overload scoring, use/export processing
//! - `globals.rs`: string interning (payload array + runtime indirection)
//! - `expr.rs`: expression lowering
//! - `binop.rs`: binary operators — constant folding, the guarded
//!   tagged-integer fast path, helper-vs-generic selection
//! - `calls.rs`: call resolution, variadic packaging, `__callN` fallback
//! - `stmt.rs`: statement lowering, scopes, defers, try/catch
//! - `func.rs`: function and closure emission
//! - `program.rs`: whole-module assembly — `__script_top`, the C `main`
//!   wrapper, verification
//! - `comptime.rs`: isolated compile-and-run of `comptime` blocks

mod binop;
mod calls;
mod comptime;
mod expr;
mod func;
mod globals;
mod program;
mod runtime;
mod state;
mod stmt;
mod symbols;

pub use runtime::{RUNTIME_DECLS, RuntimeDecl};
pub use state::CodeGen;

// Internal surface for the effect analysis in `crate::purity`.
pub(crate) use state::FuncFacts;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::parser::parse_source;

    fn lower(src: &str) -> String {
        lower_with(src, CompilerConfig::default())
    }

    fn lower_with(src: &str, config: CompilerConfig) -> String {
        let prog = parse_source(src, "<test>").unwrap();
        let mut cg = CodeGen::new(&prog, config);
        cg.diags.quiet = true;
        cg.emit_program().unwrap()
    }

    #[test]
    fn lowers_int_return() {
        let ir = lower("fn main() { return 1 + 2 }");
        // Both literals fold before emission: tagged 3 is the word 7.
        assert!(ir.contains("define i64 @ny.main()"));
        assert!(ir.contains("ret i64 7"));
        assert!(ir.contains("define i32 @main("));
        assert!(ir.contains("call i64 @__script_top()"));
        assert!(ir.contains("call i64 @__runtime_cleanup()"));
    }

    #[test]
    fn declares_runtime_symbols() {
        let ir = lower("fn main() { return 0 }");
        assert!(ir.contains("declare i64 @__add(i64, i64)"));
        assert!(ir.contains("declare i64 @__call15(i64"));
        assert!(ir.contains("declare void @__push_defer(i64, i64)"));
        assert!(ir.contains("declare i32 @_setjmp(ptr) returns_twice"));
    }

    #[test]
    fn string_literal_is_interned_with_header() {
        let ir = lower(r#"fn main() { let s = "hi"; return 0 }"#);
        assert!(ir.contains("@.str.0 = private unnamed_addr constant"));
        assert!(ir.contains("align 64"));
        assert!(ir.contains("@.str.rt.0 = internal global i64 ptrtoint"));
        // The init block routes the address through an opaque identity asm.
        assert!(ir.contains("call ptr asm \"\", \"=r,0\"(ptr @.str.0)"));
    }

    #[test]
    fn duplicate_strings_share_one_intern() {
        let ir = lower(r#"fn main() { let a = "x"; let b = "x"; return 0 }"#);
        assert!(ir.contains("@.str.0"));
        assert!(!ir.contains("@.str.1 ="));
    }

    #[test]
    fn unary_minus_lowers_through_sub() {
        let ir = lower("fn f(x) { return -x } fn main() { return f(3) }");
        assert!(ir.contains("call i64 @__sub(i64 1, i64"));
    }

    #[test]
    fn undefined_symbol_is_reported() {
        let prog = parse_source("fn main() { return missing_fn(1) }", "<test>").unwrap();
        let mut cg = CodeGen::new(&prog, CompilerConfig::default());
        cg.diags.quiet = true;
        let res = cg.emit_program();
        assert!(res.is_err());
        assert!(cg.diags.had_error);
    }

    #[test]
    fn fast_path_is_gated_by_config() {
        let src = "fn f(a, b) { return a + b } fn main() { return f(1, 2) }";
        let plain = lower(src);
        assert!(!plain.contains("bin.int.fast"));
        let mut config = CompilerConfig::default();
        config.fast_int_binops = true;
        let fast = lower_with(src, config);
        assert!(fast.contains("bin.int.fast"));
        assert!(fast.contains("llvm.sadd.with.overflow.i64"));
        assert!(fast.contains("bin.merge"));
    }

    #[test]
    fn lambda_with_captures_builds_closure() {
        let ir = lower(
            "fn main() { let n = 3; let f = fn(x) { return x + n }; return f(1) }",
        );
        assert!(ir.contains("define i64 @__lambda_0(i64"));
        // Closure object carries tag 105 in its header slot.
        assert!(ir.contains("store i64 105"));
        assert!(ir.contains("call i64 @__malloc(i64 33)"));
    }

    #[test]
    fn defer_registers_on_runtime_stack() {
        let ir = lower("fn main() { defer { __free(0) } return 0 }");
        assert!(ir.contains("call void @__push_defer"));
        assert!(ir.contains("call void @__pop_run_defer"));
    }

    #[test]
    fn try_catch_uses_setjmp() {
        let ir = lower("fn main() { try { return 1 } catch e { return 42 } }");
        assert!(ir.contains("call i64 @__jmpbuf_size()"));
        assert!(ir.contains("call i32 @_setjmp(ptr"));
        assert!(ir.contains("call i64 @__set_panic_env(i64"));
        assert!(ir.contains("call i64 @__get_panic_val()"));
        assert!(ir.contains("call i64 @__clear_panic_env()"));
    }

    #[test]
    fn module_functions_get_qualified_names() {
        let ir = lower(
            "module M { fn dup(x) { return x * 2 } export dup }\nuse M;\nfn main() { return M.dup(21) }",
        );
        assert!(ir.contains("define i64 @M.dup(i64"));
        assert!(ir.contains("call i64 @M.dup(i64 43)"));
    }

    #[test]
    fn layout_emits_offset_functions() {
        let ir = lower("layout H { size: 8, kind: 4 }\nfn main() { return H.kind(0) }");
        assert!(ir.contains("define i64 @H.size(i64"));
        assert!(ir.contains("define i64 @H.kind(i64"));
        // kind sits after the 8-byte size field.
        assert!(ir.contains("add i64 %p0, 8"));
    }

    #[test]
    fn match_lowers_to_chained_arms() {
        let ir = lower("fn f(x) { match x { 1 { return 10 } _ { return 0 } } } fn main() { return f(1) }");
        assert!(ir.contains("match_arm"));
        assert!(ir.contains("match_next"));
        assert!(ir.contains("match_end"));
    }

    #[test]
    fn short_circuit_uses_phi() {
        let ir = lower("fn f(a, b) { return a && b } fn main() { return f(2, 2) }");
        assert!(ir.contains("phi i64"));
        assert!(ir.contains("lrhs"));
    }

    #[test]
    fn indirect_call_through_local_uses_call_dispatch() {
        let ir = lower("fn f(x) { return x } fn main() { let g = f; return g(41) }");
        assert!(ir.contains("call i64 @__call1(i64"));
        // Taking `f` as a value tags the pointer with bit pattern 2.
        assert!(ir.contains("ptrtoint ptr @f to i64"));
    }

    #[test]
    fn trace_emission_is_config_gated() {
        let src = "fn main() { return 1 }";
        let plain = lower(src);
        assert!(!plain.contains("call i64 @__trace_loc"));
        let mut config = CompilerConfig::default();
        config.emit_traces = true;
        let traced = lower_with(src, config);
        assert!(traced.contains("call i64 @__trace_func"));
        assert!(traced.contains("call i64 @__trace_loc"));
    }

    #[test]
    fn script_top_initializes_before_body() {
        let ir = lower(r#"let greeting = "hello"
fn main() { return 0 }"#);
        assert!(ir.contains("define i64 @__script_top()"));
        let init_pos = ir.find("init:").unwrap();
        let body_pos = ir.find("body:").unwrap();
        assert!(init_pos < body_pos);
        assert!(ir.contains("@greeting = global i64 0"));
    }
}
