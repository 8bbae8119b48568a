//! Abstract syntax tree for Ny programs
//!
//! The parser produces owned enums; spans carry enough position data for
//! the deduplicating diagnostic sink. Stdlib-originated nodes are marked by
//! their span's `<stdlib>` filename, which the resolver and the diagnostic
//! budgets both key on.

use std::sync::Arc;

/// Source position attached to every statement and expression.
#[derive(Debug, Clone)]
pub struct Span {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            file: Arc::from("<input>"),
            line: 0,
            col: 0,
        }
    }
}

impl Span {
    pub fn new(file: Arc<str>, line: u32, col: u32) -> Self {
        Span { file, line, col }
    }

    /// True for nodes that came from the embedded stdlib bundle.
    pub fn is_stdlib(&self) -> bool {
        &*self.file == "<stdlib>"
    }
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct CallArg {
    /// `Some` for keyword arguments (`f(x, key: v)`).
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Optional type-name constraint checked against literal arguments.
    pub type_name: Option<String>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub patterns: Vec<Expr>,
    pub body: Stmt,
}

#[derive(Debug, Clone)]
pub struct MatchNode {
    pub test: Box<Expr>,
    pub arms: Vec<MatchArm>,
    pub default: Option<Box<Stmt>>,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ident(String),
    Unary {
        op: String,
        right: Box<Expr>,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_val: Box<Expr>,
        else_val: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
    },
    MethodCall {
        target: Box<Expr>,
        name: String,
        args: Vec<CallArg>,
    },
    Index {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        is_slice: bool,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Lambda {
        params: Vec<Param>,
        body: Box<Stmt>,
        is_variadic: bool,
        /// `fn(x){..}` expressions with zero captures stay plain tagged
        /// function pointers; `|x| ..` lambdas always build a closure.
        is_fn: bool,
    },
    FString(Vec<FStringPart>),
    Asm {
        code: String,
        constraints: String,
        args: Vec<Expr>,
    },
    Comptime(Box<Stmt>),
    Match(MatchNode),
}

#[derive(Debug, Clone)]
pub struct LayoutField {
    pub name: String,
    pub width: u32,
}

#[derive(Debug, Clone)]
pub struct UseItem {
    pub name: String,
    pub alias: Option<String>,
}

/// Inferred or declared effect bits. See `analysis::purity`.
pub const FX_IO: u32 = 1;
pub const FX_ALLOC: u32 = 2;
pub const FX_FFI: u32 = 4;
pub const FX_THREAD: u32 = 8;
pub const FX_ALL: u32 = FX_IO | FX_ALLOC | FX_FFI | FX_THREAD;

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Box<Stmt>,
    pub is_variadic: bool,
    pub return_type: Option<String>,
    /// `@pure` annotation: declares an empty effect mask.
    pub declared_pure: bool,
    /// `@effects(io, alloc, …)` annotation, when present.
    pub declared_effects: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    Use {
        module: String,
        alias: Option<String>,
        import_all: bool,
        imports: Vec<UseItem>,
    },
    Var {
        names: Vec<String>,
        exprs: Vec<Expr>,
        is_decl: bool,
        is_mut: bool,
        is_destructure: bool,
    },
    Expr(Expr),
    If {
        test: Expr,
        conseq: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Try {
        body: Box<Stmt>,
        err: Option<String>,
        handler: Box<Stmt>,
    },
    Func(FuncDecl),
    Return(Option<Expr>),
    Defer(Box<Stmt>),
    Break,
    Continue,
    Layout {
        name: String,
        fields: Vec<LayoutField>,
    },
    Match(MatchNode),
    Module {
        name: String,
        body: Vec<Stmt>,
        export_all: bool,
    },
    Export(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}
