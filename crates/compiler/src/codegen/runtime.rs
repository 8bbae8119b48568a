//! Runtime function declarations
//!
//! Every symbol generated code may call, in one data-driven table. All of
//! them take and return tagged `i64` except the two defer entry points,
//! which return nothing. `__call0..__call15` are generated in a loop
//! because their arities follow a pattern.

/// One runtime declaration: symbol name, argument count, and whether the
/// declaration is legal inside a `comptime` context.
pub struct RuntimeDecl {
    pub name: &'static str,
    pub arity: usize,
    pub ret_void: bool,
    pub comptime_ok: bool,
}

const fn decl(name: &'static str, arity: usize) -> RuntimeDecl {
    RuntimeDecl {
        name,
        arity,
        ret_void: false,
        comptime_ok: true,
    }
}

/// Non-deterministic or system-interacting builtins are denied at comptime
/// by simply not being declared in that context.
const fn decl_rt(name: &'static str, arity: usize) -> RuntimeDecl {
    RuntimeDecl {
        name,
        arity,
        ret_void: false,
        comptime_ok: false,
    }
}

const fn decl_void(name: &'static str, arity: usize) -> RuntimeDecl {
    RuntimeDecl {
        name,
        arity,
        ret_void: true,
        comptime_ok: true,
    }
}

pub static RUNTIME_DECLS: &[RuntimeDecl] = &[
    // Memory
    decl("__malloc", 1),
    decl("__free", 1),
    decl("__realloc", 2),
    decl("__memcpy", 3),
    decl("__memset", 3),
    decl("__memcmp", 3),
    decl("__load8_idx", 2),
    decl("__load16_idx", 2),
    decl("__load32_idx", 2),
    decl("__load64_idx", 2),
    decl("__store8_idx", 3),
    decl("__store16_idx", 3),
    decl("__store32_idx", 3),
    decl("__store64_idx", 3),
    // Arithmetic / comparison / bitwise
    decl("__add", 2),
    decl("__sub", 2),
    decl("__mul", 2),
    decl("__div", 2),
    decl("__mod", 2),
    decl("__and", 2),
    decl("__or", 2),
    decl("__xor", 2),
    decl("__shl", 2),
    decl("__shr", 2),
    decl("__not", 1),
    decl("__eq", 2),
    decl("__lt", 2),
    decl("__le", 2),
    decl("__gt", 2),
    decl("__ge", 2),
    // Strings
    decl("__str_concat", 2),
    decl("__to_str", 1),
    // Tags / predicates / results
    decl("__tag", 1),
    decl("__untag", 1),
    decl("__is_int", 1),
    decl("__is_ptr", 1),
    decl("__is_str", 1),
    decl("__is_flt", 1),
    decl("__result_ok", 1),
    decl("__result_err", 1),
    decl("__is_ok", 1),
    decl("__is_err", 1),
    decl("__unwrap", 1),
    decl("__kwarg", 2),
    // Floats
    decl("__flt_box_val", 1),
    decl("__flt_unbox_val", 1),
    decl("__flt_from_int", 1),
    decl("__flt_to_int", 1),
    decl("__flt_trunc", 1),
    decl("__flt_add", 2),
    decl("__flt_sub", 2),
    decl("__flt_mul", 2),
    decl("__flt_div", 2),
    decl("__flt_lt", 2),
    decl("__flt_gt", 2),
    decl("__flt_le", 2),
    decl("__flt_ge", 2),
    decl("__flt_eq", 2),
    // Control
    decl("__panic", 1),
    decl_void("__push_defer", 2),
    decl_void("__pop_run_defer", 0),
    decl("__set_panic_env", 1),
    decl("__clear_panic_env", 0),
    decl("__get_panic_val", 0),
    decl("__jmpbuf_size", 0),
    // Trace
    decl("__trace_loc", 3),
    decl("__trace_func", 1),
    decl("__trace_dump", 1),
    // OS / FFI (denied at comptime)
    decl_rt("__syscall", 7),
    decl_rt("__sys_read_off", 4),
    decl_rt("__sys_write_off", 4),
    decl_rt("__execve", 3),
    decl_rt("__recv", 4),
    decl_rt("__errno", 0),
    decl_rt("__dlopen", 2),
    decl_rt("__dlsym", 2),
    decl_rt("__dlclose", 1),
    decl_rt("__dlerror", 0),
    decl_rt("__tag_native", 1),
    // Threads (denied at comptime)
    decl_rt("__thread_spawn", 2),
    decl_rt("__thread_join", 1),
    decl_rt("__mutex_new", 0),
    decl_rt("__mutex_lock64", 1),
    decl_rt("__mutex_unlock64", 1),
    decl_rt("__mutex_free", 1),
    // Args / globals (denied at comptime)
    decl_rt("__globals", 0),
    decl_rt("__set_globals", 1),
    decl_rt("__set_args", 3),
    decl_rt("__argc", 0),
    decl_rt("__argv", 1),
    decl_rt("__envp", 0),
    decl_rt("__envc", 0),
    decl_rt("__rand64", 0),
    decl_rt("__srand", 1),
    decl_rt("__runtime_cleanup", 0),
];

/// Highest `__callN` arity the runtime provides.
pub const MAX_CALL_ARITY: usize = 15;

/// Render every `declare` line for a module, including the `__callN`
/// family, the overflow intrinsics the fast path uses, and `_setjmp`.
pub fn emit_runtime_decls(out: &mut String, comptime: bool) {
    out.push_str("; Runtime declarations\n");
    for d in RUNTIME_DECLS {
        if comptime && !d.comptime_ok {
            continue;
        }
        let args = vec!["i64"; d.arity].join(", ");
        let ret = if d.ret_void { "void" } else { "i64" };
        out.push_str(&format!("declare {ret} @{}({args})\n", d.name));
    }
    for n in 0..=MAX_CALL_ARITY {
        let args = vec!["i64"; n + 1].join(", ");
        out.push_str(&format!("declare i64 @__call{n}({args})\n"));
    }
    out.push_str("declare { i64, i1 } @llvm.sadd.with.overflow.i64(i64, i64)\n");
    out.push_str("declare { i64, i1 } @llvm.ssub.with.overflow.i64(i64, i64)\n");
    out.push_str("declare { i64, i1 } @llvm.smul.with.overflow.i64(i64, i64)\n");
    out.push_str("declare i32 @_setjmp(ptr) returns_twice\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_abi_surface() {
        let names: Vec<&str> = RUNTIME_DECLS.iter().map(|d| d.name).collect();
        for required in [
            "__malloc",
            "__free",
            "__add",
            "__eq",
            "__str_concat",
            "__panic",
            "__push_defer",
            "__set_panic_env",
            "__dlopen",
            "__thread_spawn",
            "__trace_loc",
            "__kwarg",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }

    #[test]
    fn comptime_denies_nondeterministic_builtins() {
        let mut full = String::new();
        emit_runtime_decls(&mut full, false);
        let mut ct = String::new();
        emit_runtime_decls(&mut ct, true);
        for denied in ["__syscall", "__dlopen", "__thread_spawn", "__rand64", "__argv"] {
            assert!(full.contains(denied));
            assert!(!ct.contains(denied), "{denied} must be absent at comptime");
        }
        // Pure builtins stay available.
        assert!(ct.contains("@__add"));
        assert!(ct.contains("@__malloc"));
    }

    #[test]
    fn call_family_is_complete() {
        let mut out = String::new();
        emit_runtime_decls(&mut out, false);
        assert!(out.contains("@__call0(i64)"));
        assert!(out.contains("@__call15(i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64)"));
    }
}
