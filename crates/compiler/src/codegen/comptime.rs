//! Comptime evaluation
//!
//! A `comptime { body }` block is lowered in a fresh, isolated codegen
//! context that registers only comptime-legal builtins (no argv/env, no
//! syscalls, no dlopen, no threads, no rng — those resolve to
//! undefined-symbol diagnostics). The resulting module is compiled with
//! clang into a temporary shared object, loaded, invoked, and unloaded;
//! only the returned tagged integer flows back into the enclosing
//! compilation as a constant.

use std::ffi::CString;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::{Program, Span, Stmt};

use super::state::{CodeGen, IrValue, Scope};

static COMPTIME_SEQ: AtomicU64 = AtomicU64::new(0);

impl<'p> CodeGen<'p> {
    pub(super) fn eval_comptime(&mut self, body: &Stmt, span: &Span) -> IrValue {
        let empty = Program::default();
        let mut sub = CodeGen::new_comptime(&empty, self.config.clone());
        sub.diags.quiet = self.diags.quiet;
        sub.register_builtins();

        sub.begin_function("define i64 @ny_comptime()".to_string(), "entry");
        sub.scopes = vec![Scope::default(), Scope::default()];
        sub.func_root = 1;
        sub.gen_stmt(body, true);
        if !sub.block_terminated() {
            sub.emit_term("ret i64 1");
        }
        sub.end_function();

        if sub.diags.had_error || !sub.verify_errors.is_empty() {
            self.diags
                .error(span, "comptime block failed to compile");
            self.diags
                .hint("non-deterministic builtins (argv, syscalls, dlopen, threads, rng) are not available at comptime");
            return IrValue::Const(0);
        }
        let ir = sub.assemble();

        match run_comptime_object(&ir) {
            Ok(word) if word & 1 == 1 => IrValue::Const(word),
            Ok(_) => {
                self.diags
                    .error(span, "comptime must return a tagged integer");
                IrValue::Const(0)
            }
            Err(err) => {
                self.diags
                    .error(span, format!("comptime evaluation failed: {err}"));
                IrValue::Const(0)
            }
        }
    }
}

/// Compile the comptime module to a shared object, `dlopen` it, call
/// `ny_comptime`, and tear everything down again.
fn run_comptime_object(ir: &str) -> Result<i64, String> {
    let seq = COMPTIME_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("nytrix-ct-{}-{seq}", std::process::id()));
    std::fs::create_dir_all(&dir).map_err(|e| format!("temp dir: {e}"))?;
    let result = run_in_dir(&dir, ir);
    let _ = std::fs::remove_dir_all(&dir);
    result
}

fn run_in_dir(dir: &PathBuf, ir: &str) -> Result<i64, String> {
    let ll_path = dir.join("ct.ll");
    let so_path = dir.join("ct.so");
    let rt_path = dir.join("libny_runtime.a");
    std::fs::write(&ll_path, ir).map_err(|e| format!("write IR: {e}"))?;
    {
        let mut f = std::fs::File::create(&rt_path).map_err(|e| format!("runtime lib: {e}"))?;
        f.write_all(crate::runtime_archive())
            .map_err(|e| format!("runtime lib: {e}"))?;
    }

    let output = Command::new("clang")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-O0")
        .arg(&ll_path)
        .arg(&rt_path)
        .arg("-lpthread")
        .arg("-ldl")
        .arg("-lm")
        .arg("-o")
        .arg(&so_path)
        .output()
        .map_err(|e| format!("failed to run clang: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "clang failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let c_path = CString::new(so_path.to_string_lossy().into_owned())
        .map_err(|_| "bad object path".to_string())?;
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
    if handle.is_null() {
        return Err("dlopen of comptime object failed".to_string());
    }
    let sym_name = CString::new("ny_comptime").expect("static name");
    let sym = unsafe { libc::dlsym(handle, sym_name.as_ptr()) };
    if sym.is_null() {
        unsafe { libc::dlclose(handle) };
        return Err("ny_comptime symbol missing from comptime object".to_string());
    }
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(sym) };
    let value = f();
    unsafe { libc::dlclose(handle) };
    Ok(value)
}
