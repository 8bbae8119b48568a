//! CodeGen state and core types
//!
//! The `CodeGen` struct owns every table for one compilation: symbol
//! tables, import state, the string-intern list, the scope stack, and the
//! emission buffers. Nothing here is global, so concurrent compilations
//! are independent by construction.

use std::collections::HashSet;

use crate::ast::{FuncDecl, Program, Span};
use crate::config::CompilerConfig;
use crate::diag::Diagnostics;

/// Unqualified-name fallback prefixes, searched in order (§ resolver chain).
pub(super) const FALLBACK_PREFIXES: &[&str] = &[
    "std.core",
    "std.io",
    "std.collections",
    "std.strings.str",
    "std.math",
    "std.os",
];

/// Global-variable fallback prefixes.
pub(super) const GLOBAL_FALLBACK_PREFIXES: &[&str] =
    &["std.core", "std.io", "std.os", "std.core.test"];

/// Method-call name prefixes tried before the bare method name.
pub(super) const METHOD_PREFIXES: &[&str] = &[
    "dict_", "list_", "str_", "set_", "bytes_", "queue_", "heap_", "bigint_",
];

/// An operand: either a known constant word or an SSA register.
///
/// Carrying constants symbolically is what makes emission-time folding and
/// the algebraic identities in `binop` possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IrValue {
    Const(i64),
    Reg(String),
}

impl IrValue {
    pub fn op(&self) -> String {
        match self {
            IrValue::Const(c) => c.to_string(),
            IrValue::Reg(r) => r.clone(),
        }
    }

    /// The raw integer when this is a tagged-int constant.
    pub fn tagged_int(&self) -> Option<i64> {
        match self {
            IrValue::Const(c) if c & 1 == 1 => Some(c >> 1),
            _ => None,
        }
    }
}

pub(super) struct Block {
    pub label: String,
    pub text: String,
    pub terminated: bool,
}

pub(super) struct FunctionBuf {
    pub header: String,
    /// Hoisted `alloca`s, rendered at the top of the first block.
    pub allocas: String,
    pub blocks: Vec<Block>,
    pub cur: usize,
    pub tmp: usize,
}

#[derive(Debug, Clone)]
pub(super) struct Binding {
    pub name: String,
    /// `%reg` of the stack slot (locals) or `@name` (globals).
    pub slot: String,
    #[allow(dead_code)] // recorded per declaration; enforcement is a lint concern
    pub is_mut: bool,
    pub is_used: bool,
    pub span: Span,
}

#[derive(Default)]
pub(super) struct Scope {
    pub vars: Vec<Binding>,
    /// Runtime defers registered in this scope, popped on exit.
    pub defers: usize,
    pub break_label: Option<String>,
    pub continue_label: Option<String>,
}

/// A function signature visible to resolution.
#[derive(Debug, Clone)]
pub(crate) struct FunSig {
    pub name: String,
    pub link_name: String,
    pub arity: usize,
    pub is_variadic: bool,
    pub is_extern: bool,
    /// Index into `CodeGen::decls` for user functions.
    pub decl: Option<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalVar {
    pub name: String,
    pub link_name: String,
    #[allow(dead_code)] // recorded per declaration; enforcement is a lint concern
    pub is_mut: bool,
}

/// A user function declaration, flattened out of its module.
pub(crate) struct DeclInfo<'p> {
    pub qname: String,
    pub link_name: String,
    pub module: Option<String>,
    pub decl: &'p FuncDecl,
    pub span: Span,
    pub is_stdlib: bool,
}

/// Facts the purity/effects/escape analysis computes per declaration.
#[derive(Debug, Clone)]
pub(crate) struct FuncFacts {
    pub is_pure: bool,
    pub effects: u32,
    pub effects_known: bool,
    pub is_memo_safe: bool,
    pub args_escape: bool,
    pub args_mutated: bool,
    pub returns_alias: bool,
    pub escape_known: bool,
    pub is_recursive: bool,
}

impl FuncFacts {
    /// Optimistic starting point for the fixed point.
    pub fn optimistic() -> Self {
        FuncFacts {
            is_pure: true,
            effects: 0,
            effects_known: true,
            is_memo_safe: true,
            args_escape: false,
            args_mutated: false,
            returns_alias: false,
            escape_known: true,
            is_recursive: false,
        }
    }

    /// What unknown or stdlib functions are assumed to do.
    pub fn pessimistic() -> Self {
        FuncFacts {
            is_pure: false,
            effects: crate::ast::FX_ALL,
            effects_known: false,
            is_memo_safe: false,
            args_escape: true,
            args_mutated: true,
            returns_alias: true,
            escape_known: false,
            is_recursive: false,
        }
    }
}

pub(super) struct Intern {
    pub bytes: Vec<u8>,
    pub array_name: String,
    pub rt_name: String,
    pub total_len: usize,
}

pub struct CodeGen<'p> {
    pub(crate) prog: &'p Program,
    pub(crate) config: CompilerConfig,
    pub diags: Diagnostics,

    // Symbol tables (per compilation; see module doc).
    pub(crate) decls: Vec<DeclInfo<'p>>,
    pub(crate) fun_sigs: Vec<FunSig>,
    pub(crate) globals: Vec<GlobalVar>,
    pub(crate) facts: Vec<FuncFacts>,
    /// `use M [as A]` aliases: alias → module name.
    pub(crate) aliases: Vec<(String, String)>,
    /// Item imports: short name → fully qualified target.
    pub(crate) import_aliases: Vec<(String, String)>,
    /// `use M.*` modules, eligible for unqualified fallback.
    pub(crate) use_modules: Vec<String>,
    pub(crate) current_module: Option<String>,
    pub(crate) comptime: bool,

    // Emission state.
    pub(super) funcs: Vec<FunctionBuf>,
    pub(super) finished: String,
    pub(super) str_globals: String,
    pub(super) global_defs: String,
    pub(super) interns: Vec<Intern>,
    pub(super) emitted_fns: HashSet<String>,
    pub(super) lambda_count: usize,
    pub(super) block_count: usize,
    pub(super) verify_errors: Vec<String>,

    // Lowering state.
    pub(super) scopes: Vec<Scope>,
    pub(super) func_root: usize,
    /// Match-expression result slot, when lowering a match in value position.
    pub(super) result_slot: Option<String>,
}

impl<'p> CodeGen<'p> {
    pub fn new(prog: &'p Program, config: CompilerConfig) -> Self {
        let diags = Diagnostics::new(config.verbosity, config.strict_diagnostics);
        CodeGen {
            prog,
            config,
            diags,
            decls: Vec::new(),
            fun_sigs: Vec::new(),
            globals: Vec::new(),
            facts: Vec::new(),
            aliases: Vec::new(),
            import_aliases: Vec::new(),
            use_modules: Vec::new(),
            current_module: None,
            comptime: false,
            funcs: Vec::new(),
            finished: String::new(),
            str_globals: String::new(),
            global_defs: String::new(),
            interns: Vec::new(),
            emitted_fns: HashSet::new(),
            lambda_count: 0,
            block_count: 0,
            verify_errors: Vec::new(),
            scopes: Vec::new(),
            func_root: 0,
            result_slot: None,
        }
    }

    pub(super) fn new_comptime(prog: &'p Program, config: CompilerConfig) -> Self {
        let mut cg = Self::new(prog, config);
        cg.comptime = true;
        cg
    }

    // -----------------------------------------------------------------------
    // Emission primitives
    // -----------------------------------------------------------------------

    fn cur_fn(&mut self) -> &mut FunctionBuf {
        self.funcs.last_mut().expect("emission outside a function")
    }

    pub(super) fn tmp(&mut self) -> String {
        let f = self.cur_fn();
        f.tmp += 1;
        format!("%t{}", f.tmp)
    }

    pub(super) fn new_label(&mut self, hint: &str) -> String {
        self.block_count += 1;
        format!("{hint}{}", self.block_count)
    }

    pub(super) fn begin_function(&mut self, header: String, entry_label: &str) {
        self.funcs.push(FunctionBuf {
            header,
            allocas: String::new(),
            blocks: vec![Block {
                label: entry_label.to_string(),
                text: String::new(),
                terminated: false,
            }],
            cur: 0,
            tmp: 0,
        });
    }

    /// Start (and switch to) a fresh block with the given label.
    pub(super) fn start_block(&mut self, label: String) {
        let f = self.cur_fn();
        f.blocks.push(Block {
            label,
            text: String::new(),
            terminated: false,
        });
        f.cur = f.blocks.len() - 1;
    }

    pub(super) fn cur_label(&mut self) -> String {
        let f = self.cur_fn();
        f.blocks[f.cur].label.clone()
    }

    pub(super) fn block_terminated(&mut self) -> bool {
        let f = self.cur_fn();
        f.blocks[f.cur].terminated
    }

    /// Append an instruction to the current block. Instructions after a
    /// terminator are dead code and silently dropped.
    pub(super) fn emit(&mut self, line: impl AsRef<str>) {
        let f = self.cur_fn();
        let b = &mut f.blocks[f.cur];
        if b.terminated {
            return;
        }
        b.text.push_str("  ");
        b.text.push_str(line.as_ref());
        b.text.push('\n');
    }

    pub(super) fn emit_term(&mut self, line: impl AsRef<str>) {
        let f = self.cur_fn();
        let b = &mut f.blocks[f.cur];
        if b.terminated {
            return;
        }
        b.text.push_str("  ");
        b.text.push_str(line.as_ref());
        b.text.push('\n');
        b.terminated = true;
    }

    /// Hoist an i64 stack slot into the function's entry block.
    pub(super) fn emit_alloca(&mut self) -> String {
        let f = self.cur_fn();
        f.tmp += 1;
        let reg = format!("%t{}", f.tmp);
        f.allocas.push_str(&format!("  {reg} = alloca i64, align 8\n"));
        reg
    }

    /// Finish the current function and append its text to the module.
    pub(super) fn end_function(&mut self) {
        let f = self.funcs.pop().expect("end_function without begin");
        let mut text = String::new();
        text.push_str(&f.header);
        text.push_str(" {\n");
        for (i, b) in f.blocks.iter().enumerate() {
            text.push_str(&b.label);
            text.push_str(":\n");
            if i == 0 {
                text.push_str(&f.allocas);
            }
            text.push_str(&b.text);
            if !b.terminated {
                self.verify_errors.push(format!(
                    "block '{}' in '{}' lacks a terminator",
                    b.label, f.header
                ));
            }
        }
        text.push_str("}\n\n");
        self.finished.push_str(&text);
    }

    /// Emit `call i64 @name(args…)` and return the result register.
    pub(super) fn call(&mut self, name: &str, args: &[IrValue]) -> IrValue {
        let reg = self.tmp();
        let rendered: Vec<String> = args.iter().map(|a| format!("i64 {}", a.op())).collect();
        self.emit(format!("{reg} = call i64 @{name}({})", rendered.join(", ")));
        IrValue::Reg(reg)
    }

    pub(super) fn call_void(&mut self, name: &str, args: &[IrValue]) {
        let rendered: Vec<String> = args.iter().map(|a| format!("i64 {}", a.op())).collect();
        self.emit(format!("call void @{name}({})", rendered.join(", ")));
    }

    /// Lower a word to its truthiness: false for 0 (none), 4 (false) and 1
    /// (tagged zero); true otherwise. Returns an i1 register.
    pub(super) fn to_bool(&mut self, v: &IrValue) -> String {
        if let IrValue::Const(c) = v {
            let truthy = !matches!(c, 0 | 1 | 4);
            let reg = self.tmp();
            self.emit(format!(
                "{reg} = icmp ne i64 0, {}",
                if truthy { 1 } else { 0 }
            ));
            return reg;
        }
        let op = v.op();
        let is_none = self.tmp();
        self.emit(format!("{is_none} = icmp eq i64 {op}, 0"));
        let is_false = self.tmp();
        self.emit(format!("{is_false} = icmp eq i64 {op}, 4"));
        let is_zero = self.tmp();
        self.emit(format!("{is_zero} = icmp eq i64 {op}, 1"));
        let a = self.tmp();
        self.emit(format!("{a} = or i1 {is_none}, {is_false}"));
        let b = self.tmp();
        self.emit(format!("{b} = or i1 {a}, {is_zero}"));
        let res = self.tmp();
        self.emit(format!("{res} = xor i1 {b}, true"));
        res
    }

    /// Materialize an i1 as the boolean words 2 / 4.
    pub(super) fn tag_bool(&mut self, cond: &str) -> IrValue {
        let reg = self.tmp();
        self.emit(format!("{reg} = select i1 {cond}, i64 2, i64 4"));
        IrValue::Reg(reg)
    }

    /// Tag a raw integer register: `(raw << 1) | 1`.
    pub(super) fn tag_int_reg(&mut self, raw: &str) -> IrValue {
        let a = self.tmp();
        self.emit(format!("{a} = shl i64 {raw}, 1"));
        let b = self.tmp();
        self.emit(format!("{b} = or i64 {a}, 1"));
        IrValue::Reg(b)
    }

    /// Untag a value known to be a tagged int: arithmetic shift right.
    pub(super) fn untag_int_reg(&mut self, v: &IrValue) -> String {
        let reg = self.tmp();
        self.emit(format!("{reg} = ashr i64 {}, 1", v.op()));
        reg
    }
}
