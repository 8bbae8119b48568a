//! Whole-module emission
//!
//! The pass order mirrors the data flow: use-directives → signatures →
//! exports → item imports → effect analysis → layouts → functions →
//! `__script_top` → the C `main` wrapper → assembly + verification.
//!
//! `__script_top` has two blocks: an init block that fills every interned
//! string's runtime indirection global (routed through an opaque inline-asm
//! identity so LLVM cannot constant-fold the store away) and a body block
//! lowering all non-function top-level statements.

use crate::ast::StmtKind;

use super::runtime::emit_runtime_decls;
use super::state::{CodeGen, IrValue, Scope};

impl<'p> CodeGen<'p> {
    /// Lower the whole program to LLVM IR text.
    ///
    /// Errors accumulate in the diagnostic sink; lowering continues so the
    /// stream stays useful, and only the final verify step is fatal.
    pub fn emit_program(&mut self) -> Result<String, String> {
        self.prepare_tables();
        if !self.comptime {
            crate::purity::run(self);
            tracing::debug!(
                functions = self.facts.len(),
                pure = self.facts.iter().filter(|f| f.is_pure).count(),
                recursive = self.facts.iter().filter(|f| f.is_recursive).count(),
                "effect analysis complete"
            );
        }

        self.emit_layout_functions();

        // User functions, each under its module's name context.
        for i in 0..self.decls.len() {
            let link = self.decls[i].link_name.clone();
            let module = self.decls[i].module.clone();
            let decl = self.decls[i].decl;
            self.current_module = module;
            self.scopes = vec![Scope::default()];
            self.func_root = 0;
            self.gen_func_by_link(&link, decl, None);
        }
        self.current_module = None;

        self.emit_script_top();
        if !self.comptime {
            self.emit_main_wrapper();
        }

        if self.diags.had_error {
            return Err(format!(
                "aborting due to {} previous error(s)",
                self.diags.error_count()
            ));
        }
        let text = self.assemble();
        if !self.verify_errors.is_empty() {
            return Err(format!(
                "IR verification failed:\n  {}",
                self.verify_errors.join("\n  ")
            ));
        }
        Ok(text)
    }

    /// Run every collection pass without lowering; used by the effect
    /// analysis tests and by `emit_program` itself.
    pub fn prepare_tables(&mut self) {
        self.register_builtins();
        self.collect_use_directives();
        self.collect_sigs();
        self.process_exports();
        self.process_use_imports();
    }

    fn emit_script_top(&mut self) {
        self.begin_function("define i64 @__script_top()".to_string(), "init");
        self.start_block("body".to_string());
        self.scopes = vec![Scope::default()];
        self.func_root = 0;

        let prog = self.prog;
        for s in &prog.body {
            if !matches!(s.kind, StmtKind::Func(_)) {
                self.gen_stmt(s, false);
            }
        }
        if !self.block_terminated() {
            self.emit_term("ret i64 1");
        }

        // Back-fill the init block now that every string is known.
        self.select_block("init");
        self.emit_intern_init();
        self.emit_term("br label %body");
        self.end_function();
    }

    /// The C entry point: set up the args table, run `__script_top`, call
    /// the user's `main` when one exists, and turn the (tagged) result into
    /// the process exit code.
    fn emit_main_wrapper(&mut self) {
        let user_main = self
            .fun_sigs
            .iter()
            .find(|s| s.name == "main" && s.decl.is_some())
            .map(|s| (s.link_name.clone(), s.arity));

        self.begin_function(
            "define i32 @main(i32 %argc, ptr %argv, ptr %envp)".to_string(),
            "entry",
        );
        let argc64 = self.tmp();
        self.emit(format!("{argc64} = sext i32 %argc to i64"));
        let argv_int = self.tmp();
        self.emit(format!("{argv_int} = ptrtoint ptr %argv to i64"));
        let envp_int = self.tmp();
        self.emit(format!("{envp_int} = ptrtoint ptr %envp to i64"));
        self.call(
            "__set_args",
            &[
                IrValue::Reg(argc64),
                IrValue::Reg(argv_int),
                IrValue::Reg(envp_int),
            ],
        );
        let script_result = self.call("__script_top", &[]);
        let result = match user_main {
            Some((link, arity)) => {
                let zeros = vec![IrValue::Const(0); arity];
                self.call(&link, &zeros)
            }
            None => script_result,
        };
        self.call("__runtime_cleanup", &[]);
        let bit = self.tmp();
        self.emit(format!("{bit} = and i64 {}, 1", result.op()));
        let is_tagged = self.tmp();
        self.emit(format!("{is_tagged} = icmp eq i64 {bit}, 1"));
        let untagged = self.tmp();
        self.emit(format!("{untagged} = ashr i64 {}, 1", result.op()));
        let selected = self.tmp();
        self.emit(format!(
            "{selected} = select i1 {is_tagged}, i64 {untagged}, i64 {}",
            result.op()
        ));
        let code = self.tmp();
        self.emit(format!("{code} = trunc i64 {selected} to i32"));
        self.emit_term(format!("ret i32 {code}"));
        self.end_function();
    }

    /// Switch emission to an existing block by label.
    pub(super) fn select_block(&mut self, label: &str) {
        let f = self.funcs.last_mut().expect("select_block outside function");
        let idx = f
            .blocks
            .iter()
            .position(|b| b.label == label)
            .expect("unknown block label");
        f.cur = idx;
    }

    pub(super) fn assemble(&mut self) -> String {
        let mut out = String::new();
        out.push_str("; ModuleID = 'nytrix'\n");
        out.push_str(&format!("target triple = \"{}\"\n\n", target_triple()));
        emit_runtime_decls(&mut out, self.comptime);
        if !self.str_globals.is_empty() {
            out.push_str(&self.str_globals);
            out.push('\n');
        }
        if !self.global_defs.is_empty() {
            out.push_str(&self.global_defs);
            out.push('\n');
        }
        out.push_str(&self.finished);
        out
    }
}

/// The triple for the host this compiler was built on; generated objects
/// link against the embedded runtime archive, which shares the build.
pub(super) fn target_triple() -> &'static str {
    if cfg!(all(target_arch = "x86_64", target_os = "linux")) {
        "x86_64-unknown-linux-gnu"
    } else if cfg!(all(target_arch = "aarch64", target_os = "linux")) {
        "aarch64-unknown-linux-gnu"
    } else if cfg!(all(target_arch = "x86_64", target_os = "macos")) {
        "x86_64-apple-darwin"
    } else if cfg!(all(target_arch = "aarch64", target_os = "macos")) {
        "arm64-apple-darwin"
    } else {
        "x86_64-unknown-linux-gnu"
    }
}
