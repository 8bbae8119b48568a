//! Function and closure emission
//!
//! Every Ny function lowers to `define i64 @name(i64 %p0, …)`. Closures get
//! an extra leading environment parameter: at entry the captured values are
//! unpacked from the environment array into fresh local slots bound under
//! their captured names, so the body lowers exactly like a plain function.

use crate::ast::{FuncDecl, Param, Span, Stmt};

use super::state::{CodeGen, FunSig, IrValue};

impl<'p> CodeGen<'p> {
    /// Emit a function body under `link_name`. `captures` carries the
    /// ordered capture names for closure bodies.
    pub(super) fn gen_func_by_link(
        &mut self,
        link_name: &str,
        decl: &FuncDecl,
        captures: Option<&[String]>,
    ) {
        self.gen_function_body(
            link_name,
            &decl.params,
            &decl.body,
            captures,
        );
    }

    pub(super) fn gen_function_body(
        &mut self,
        link_name: &str,
        params: &[Param],
        body: &Stmt,
        captures: Option<&[String]>,
    ) {
        if !self.emitted_fns.insert(link_name.to_string()) {
            return;
        }
        let has_env = captures.is_some();
        let mut args: Vec<String> = Vec::new();
        if has_env {
            args.push("i64 %env".to_string());
        }
        for i in 0..params.len() {
            args.push(format!("i64 %p{i}"));
        }
        let header = format!("define i64 @{link_name}({})", args.join(", "));
        self.begin_function(header, "entry");

        self.push_scope(false);
        let saved_root = self.func_root;
        self.func_root = self.scopes.len() - 1;
        let saved_result = self.result_slot.take();

        if let Some(capture_names) = captures {
            let env_ptr = self.tmp();
            self.emit(format!("{env_ptr} = inttoptr i64 %env to ptr"));
            for (i, name) in capture_names.iter().enumerate() {
                let src = self.tmp();
                self.emit(format!("{src} = getelementptr i64, ptr {env_ptr}, i64 {i}"));
                let val = self.tmp();
                self.emit(format!("{val} = load i64, ptr {src}"));
                let slot = self.emit_alloca();
                self.emit(format!("store i64 {val}, ptr {slot}"));
                let span = Span::default();
                self.bind(name, slot, true, true, &span);
            }
        }
        for (i, p) in params.iter().enumerate() {
            let slot = self.emit_alloca();
            self.emit(format!("store i64 %p{i}, ptr {slot}"));
            let span = Span::default();
            self.bind(&p.name, slot, true, true, &span);
        }
        if self.config.emit_traces {
            self.emit_trace_func(link_name);
        }

        self.gen_stmt(body, true);
        if !self.block_terminated() {
            self.emit_term("ret i64 1");
        }

        self.result_slot = saved_result;
        self.func_root = saved_root;
        self.pop_scope();
        self.end_function();
    }

    /// Register a function first seen during lowering (nested `fn`).
    pub(super) fn add_nested_fn_sig(&mut self, decl: &FuncDecl) {
        self.fun_sigs.push(FunSig {
            name: decl.name.clone(),
            link_name: decl.name.clone(),
            arity: decl.params.len(),
            is_variadic: decl.is_variadic,
            is_extern: false,
            decl: None,
        });
    }

    /// Lower a lambda / fn-expression.
    ///
    /// Captures every binding currently visible in non-root scopes, emits
    /// the body as a fresh function whose first parameter is the
    /// environment pointer, then builds the environment array and the
    /// 16-byte tag-105 closure object at the use site. A capture-free
    /// plain `fn` stays a bare tagged code pointer.
    pub(super) fn gen_lambda(
        &mut self,
        params: &[Param],
        body: &Stmt,
        _is_variadic: bool,
        is_fn: bool,
        hint: &str,
    ) -> IrValue {
        // All visible bindings (the global root at index 0 holds none).
        let captures: Vec<(String, String)> = self
            .scopes
            .iter()
            .skip(1)
            .flat_map(|s| s.vars.iter().map(|b| (b.name.clone(), b.slot.clone())))
            .collect();
        let capture_names: Vec<String> = captures.iter().map(|(n, _)| n.clone()).collect();

        let name = format!("{hint}_{}", self.lambda_count);
        self.lambda_count += 1;

        // A capture-free plain `fn` is just a function: no environment
        // parameter, callable directly through the masked-pointer lane.
        let bare = captures.is_empty() && is_fn;

        // Emit the body function in its own buffer; the scope wall is the
        // fresh function root pushed inside.
        self.gen_function_body(
            &name,
            params,
            body,
            if bare { None } else { Some(&capture_names) },
        );

        let raw = self.tmp();
        self.emit(format!("{raw} = ptrtoint ptr @{name} to i64"));
        let tagged = self.tmp();
        self.emit(format!("{tagged} = or i64 {raw}, 2"));

        if bare {
            return IrValue::Reg(tagged);
        }

        // Environment block: one slot per captured binding.
        let env_size = IrValue::Const((((captures.len() * 8) as u64) << 1 | 1) as i64);
        let env = self.call("__malloc", &[env_size]);
        let env_ptr = self.tmp();
        self.emit(format!("{env_ptr} = inttoptr i64 {} to ptr", env.op()));
        for (i, (_, slot)) in captures.iter().enumerate() {
            let val = self.tmp();
            self.emit(format!("{val} = load i64, ptr {slot}"));
            let dst = self.tmp();
            self.emit(format!("{dst} = getelementptr i64, ptr {env_ptr}, i64 {i}"));
            self.emit(format!("store i64 {val}, ptr {dst}"));
        }

        // Closure object: [code, env] under tag 105.
        let cls = self.call("__malloc", &[IrValue::Const((16u64 << 1 | 1) as i64)]);
        let cls_ptr = self.tmp();
        self.emit(format!("{cls_ptr} = inttoptr i64 {} to ptr", cls.op()));
        let tag_addr = self.tmp();
        self.emit(format!(
            "{tag_addr} = getelementptr i8, ptr {cls_ptr}, i64 -8"
        ));
        self.emit(format!("store i64 105, ptr {tag_addr}"));
        self.emit(format!("store i64 {tagged}, ptr {cls_ptr}"));
        let env_slot = self.tmp();
        self.emit(format!("{env_slot} = getelementptr i64, ptr {cls_ptr}, i64 1"));
        self.emit(format!("store i64 {}, ptr {env_slot}", env.op()));
        cls
    }

    /// Emit the nullary-offset accessors for every `layout` declaration:
    /// `L.field(obj) = obj + offset`, offsets being the running sum of the
    /// field widths.
    pub(super) fn emit_layout_functions(&mut self) {
        fn walk(out: &mut Vec<(String, u64)>, stmts: &[Stmt]) {
            for s in stmts {
                match &s.kind {
                    crate::ast::StmtKind::Layout { name, fields } => {
                        let mut offset = 0u64;
                        for f in fields {
                            out.push((format!("{name}.{}", f.name), offset));
                            offset += f.width as u64;
                        }
                    }
                    crate::ast::StmtKind::Module { body, .. } => walk(out, body),
                    _ => {}
                }
            }
        }
        let mut accessors = Vec::new();
        walk(&mut accessors, &self.prog.body);
        for (name, offset) in accessors {
            if !self.emitted_fns.insert(name.clone()) {
                continue;
            }
            self.begin_function(format!("define i64 @{name}(i64 %p0)"), "entry");
            // A scope is unnecessary; the body is a single add.
            let reg = self.tmp();
            self.emit(format!("{reg} = add i64 %p0, {offset}"));
            self.emit_term(format!("ret i64 {reg}"));
            self.end_function();
        }
    }
}
