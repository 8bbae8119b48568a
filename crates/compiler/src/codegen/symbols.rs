//! Symbol tables and name resolution
//!
//! Resolution for an unqualified name walks a prioritized list of
//! strategies until one produces a signature:
//!
//! 1. current module (`M.N`)
//! 2. import alias expansion (`use M (a)` → `M.a`)
//! 3. built-in stdlib fallback prefixes
//! 4. alias-prefix expansion for dotted names (`A.f` with `use M as A`)
//! 5. exact table scan (last registration wins)
//! 6. unqualified-suffix scan gated on the `use`-module list
//!
//! Overload scoring: exact-arity non-variadic 100, under-application 80,
//! variadic with enough fixed arguments 60 + fixed arity. Ties keep the
//! first candidate encountered.

use crate::ast::{Stmt, StmtKind};

use super::runtime::{MAX_CALL_ARITY, RUNTIME_DECLS};
use super::state::{CodeGen, DeclInfo, FALLBACK_PREFIXES, FunSig, GLOBAL_FALLBACK_PREFIXES, GlobalVar};

/// Ordered resolver strategies; see module doc.
#[derive(Clone, Copy, Debug)]
enum Strategy {
    CurrentModule,
    ImportAlias,
    FallbackPrefixes,
    AliasPrefix,
    Exact,
    UseModuleSuffix,
}

const RESOLUTION_ORDER: &[Strategy] = &[
    Strategy::CurrentModule,
    Strategy::ImportAlias,
    Strategy::FallbackPrefixes,
    Strategy::AliasPrefix,
    Strategy::Exact,
    Strategy::UseModuleSuffix,
];

impl<'p> CodeGen<'p> {
    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub(super) fn register_builtins(&mut self) {
        for d in RUNTIME_DECLS {
            if self.comptime && !d.comptime_ok {
                continue;
            }
            self.fun_sigs.push(FunSig {
                name: d.name.to_string(),
                link_name: d.name.to_string(),
                arity: d.arity,
                is_variadic: false,
                is_extern: true,
                decl: None,
            });
            // Common aliases for the argument accessors.
            if d.name == "__argc" || d.name == "__argv" {
                self.fun_sigs.push(FunSig {
                    name: d.name.trim_start_matches('_').to_string(),
                    link_name: d.name.to_string(),
                    arity: d.arity,
                    is_variadic: false,
                    is_extern: true,
                    decl: None,
                });
            }
        }
        for n in 0..=MAX_CALL_ARITY {
            self.fun_sigs.push(FunSig {
                name: format!("__call{n}"),
                link_name: format!("__call{n}"),
                arity: n + 1,
                is_variadic: false,
                is_extern: true,
                decl: None,
            });
        }
    }

    /// Register an extern signature declared via `extern_all`.
    pub(super) fn add_extern_sig(&mut self, name: &str, arity: usize) {
        if name.is_empty() || self.fun_sigs.iter().any(|s| s.name == name) {
            return;
        }
        self.fun_sigs.push(FunSig {
            name: name.to_string(),
            link_name: name.to_string(),
            arity,
            is_variadic: false,
            is_extern: true,
            decl: None,
        });
    }

    /// First pass: record every function signature, module-level global,
    /// and layout accessor, qualified by the enclosing module name.
    pub(super) fn collect_sigs(&mut self) {
        fn walk<'p>(cg: &mut CodeGen<'p>, stmts: &'p [Stmt], module: Option<&str>) {
            for s in stmts {
                match &s.kind {
                    StmtKind::Func(decl) => {
                        let qname = match module {
                            Some(m) => format!("{m}.{}", decl.name),
                            None => decl.name.clone(),
                        };
                        // The C entry point is synthesized; the user's
                        // `main` links under a reserved name. Overloads of
                        // one name link under numbered suffixes.
                        let mut link_name = if qname == "main" {
                            "ny.main".to_string()
                        } else {
                            qname.clone()
                        };
                        let overload_count =
                            cg.decls.iter().filter(|d| d.qname == qname).count();
                        if overload_count > 0 {
                            link_name = format!("{link_name}.{overload_count}");
                        }
                        // Same name at a different arity is an overload;
                        // the same arity twice is a redefinition.
                        if self_has_decl(cg, &qname, decl.params.len()) {
                            cg.diags
                                .error(&s.span, format!("redefinition of '{qname}'"));
                        }
                        cg.decls.push(DeclInfo {
                            qname: qname.clone(),
                            link_name: link_name.clone(),
                            module: module.map(str::to_string),
                            decl,
                            span: s.span.clone(),
                            is_stdlib: s.span.is_stdlib(),
                        });
                        cg.fun_sigs.push(FunSig {
                            name: qname,
                            link_name,
                            arity: decl.params.len(),
                            is_variadic: decl.is_variadic,
                            is_extern: false,
                            decl: Some(cg.decls.len() - 1),
                        });
                    }
                    StmtKind::Var { names, .. } => {
                        for n in names {
                            let qname = match module {
                                Some(m) => format!("{m}.{n}"),
                                None => n.clone(),
                            };
                            if cg.globals.iter().any(|g| g.name == qname) {
                                continue;
                            }
                            cg.global_defs
                                .push_str(&format!("@{qname} = global i64 0\n"));
                            cg.globals.push(GlobalVar {
                                name: qname.clone(),
                                link_name: qname,
                                is_mut: true,
                            });
                        }
                    }
                    StmtKind::Layout { name, fields } => {
                        for f in fields {
                            cg.fun_sigs.push(FunSig {
                                name: format!("{name}.{}", f.name),
                                link_name: format!("{name}.{}", f.name),
                                arity: 1,
                                is_variadic: false,
                                is_extern: false,
                                decl: None,
                            });
                        }
                    }
                    StmtKind::Module { name, body, .. } => {
                        walk(cg, body, Some(name.as_str()));
                    }
                    _ => {}
                }
            }
        }
        fn self_has_decl(cg: &CodeGen, qname: &str, arity: usize) -> bool {
            cg.decls
                .iter()
                .any(|d| d.qname == qname && d.decl.params.len() == arity)
        }
        let prog = self.prog;
        walk(self, &prog.body, None);
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    fn find_exact(&self, name: &str) -> Option<usize> {
        // Last registration wins (exports append aliased copies).
        self.fun_sigs.iter().rposition(|s| s.name == name)
    }

    fn try_strategy(&self, strategy: Strategy, name: &str) -> Option<usize> {
        let qualified = name.contains('.');
        match strategy {
            Strategy::CurrentModule => {
                if qualified {
                    return None;
                }
                let module = self.current_module.as_deref()?;
                self.find_exact(&format!("{module}.{name}"))
            }
            Strategy::ImportAlias => {
                if qualified {
                    return None;
                }
                let target = self
                    .import_aliases
                    .iter()
                    .find(|(alias, _)| alias == name)
                    .map(|(_, t)| t.clone())?;
                self.lookup_fun(&target)
            }
            Strategy::FallbackPrefixes => {
                if qualified {
                    return None;
                }
                for prefix in FALLBACK_PREFIXES {
                    if self.current_module.as_deref() == Some(*prefix) {
                        continue;
                    }
                    if let Some(idx) = self.find_exact(&format!("{prefix}.{name}")) {
                        return Some(idx);
                    }
                }
                None
            }
            Strategy::AliasPrefix => {
                let dot = name.find('.')?;
                let (head, tail) = (&name[..dot], &name[dot..]);
                for (alias, module) in &self.aliases {
                    if alias != head {
                        continue;
                    }
                    // An alias resolving to itself would recurse forever.
                    if module == head {
                        continue;
                    }
                    return self.lookup_fun(&format!("{module}{tail}"));
                }
                None
            }
            Strategy::Exact => self.find_exact(name),
            Strategy::UseModuleSuffix => {
                if qualified {
                    return None;
                }
                self.fun_sigs.iter().rposition(|s| {
                    let Some(dot) = s.name.rfind('.') else {
                        return false;
                    };
                    &s.name[dot + 1..] == name
                        && self.use_modules.iter().any(|m| m == &s.name[..dot])
                })
            }
        }
    }

    /// Full strategy-chain lookup. Returns an index into `fun_sigs`.
    pub(crate) fn lookup_fun(&self, name: &str) -> Option<usize> {
        RESOLUTION_ORDER
            .iter()
            .find_map(|s| self.try_strategy(*s, name))
    }

    /// Score overload candidates for a call site with `argc` arguments.
    pub(crate) fn resolve_overload(&self, name: &str, argc: usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut best_score = -1i32;
        for (i, sig) in self.fun_sigs.iter().enumerate() {
            if sig.name != name {
                continue;
            }
            let score = if !sig.is_variadic {
                if sig.arity == argc {
                    100
                } else if argc < sig.arity {
                    80
                } else {
                    -1
                }
            } else {
                let fixed = sig.arity.saturating_sub(1);
                if argc >= fixed { 60 + fixed as i32 } else { -1 }
            };
            if score > best_score {
                best_score = score;
                best = Some(i);
            }
        }
        if best.is_none() && !name.contains('.') {
            for prefix in ["std.core", "std.io", "std.collections"] {
                if let Some(found) = self.resolve_overload(&format!("{prefix}.{name}"), argc) {
                    return Some(found);
                }
            }
        }
        best
    }

    /// Last-resort lookup through `use M.*` modules.
    pub(crate) fn lookup_use_module_fun(&self, name: &str, argc: usize) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.use_modules
            .iter()
            .find_map(|m| self.resolve_overload(&format!("{m}.{name}"), argc))
    }

    pub(crate) fn lookup_global(&self, name: &str) -> Option<usize> {
        let find = |n: &str| self.globals.iter().rposition(|g| g.name == n);
        if !name.contains('.') {
            if let Some(module) = self.current_module.as_deref() {
                if let Some(idx) = find(&format!("{module}.{name}")) {
                    return Some(idx);
                }
            }
            if let Some(target) = self
                .import_aliases
                .iter()
                .find(|(alias, _)| alias == name)
                .map(|(_, t)| t.clone())
            {
                return self.lookup_global(&target);
            }
            for prefix in GLOBAL_FALLBACK_PREFIXES {
                if self.current_module.as_deref() == Some(*prefix) {
                    continue;
                }
                if let Some(idx) = find(&format!("{prefix}.{name}")) {
                    return Some(idx);
                }
            }
        }
        if let Some(idx) = find(name) {
            return Some(idx);
        }
        if !name.contains('.') {
            return self.globals.iter().rposition(|g| {
                let Some(dot) = g.name.rfind('.') else {
                    return false;
                };
                &g.name[dot + 1..] == name
                    && self.use_modules.iter().any(|m| m == &g.name[..dot])
            });
        }
        None
    }

    // -----------------------------------------------------------------------
    // Use / export processing
    // -----------------------------------------------------------------------

    fn add_import_alias(&mut self, alias: &str, full: &str) {
        if alias.is_empty() || full.is_empty() {
            return;
        }
        if self.import_aliases.iter().any(|(a, _)| a == alias) {
            return;
        }
        self.import_aliases
            .push((alias.to_string(), full.to_string()));
    }

    fn add_import_alias_from_full(&mut self, full: &str) {
        let alias = full.rsplit('.').next().unwrap_or(full).to_string();
        self.add_import_alias(&alias, full);
    }

    /// `use M;` and `use M as A;` record module aliases for qualified
    /// lookup; `use M.*` records a use-module for unqualified fallback.
    pub(super) fn collect_use_directives(&mut self) {
        fn walk(cg: &mut CodeGen, stmts: &[Stmt]) {
            for s in stmts {
                match &s.kind {
                    StmtKind::Use {
                        module,
                        alias,
                        import_all,
                        imports,
                    } => {
                        let module = normalize_module_name(module);
                        if *import_all {
                            if !cg.use_modules.iter().any(|m| m == &module) {
                                cg.use_modules.push(module.clone());
                            }
                        } else if imports.is_empty() {
                            let alias = alias
                                .clone()
                                .unwrap_or_else(|| {
                                    module.rsplit('.').next().unwrap_or(&module).to_string()
                                });
                            cg.aliases.push((alias, module.clone()));
                        }
                    }
                    StmtKind::Module { body, .. } => walk(cg, body),
                    _ => {}
                }
            }
        }
        let prog = self.prog;
        walk(self, &prog.body);
    }

    /// `use M (a, b as c)` and `use M.*` item imports, resolved against the
    /// collected signatures.
    pub(super) fn process_use_imports(&mut self) {
        fn walk(cg: &mut CodeGen, stmts: &[Stmt]) {
            for s in stmts {
                match &s.kind {
                    StmtKind::Use {
                        module,
                        import_all,
                        imports,
                        ..
                    } => {
                        let module = normalize_module_name(module);
                        if !imports.is_empty() {
                            for item in imports {
                                let full = format!("{module}.{}", item.name);
                                let alias = item.alias.as_deref().unwrap_or(&item.name);
                                cg.add_import_alias(alias, &full);
                            }
                        } else if *import_all {
                            let exported = cg.module_export_names(&module);
                            if exported.is_empty() {
                                cg.add_imports_from_prefix(&module);
                            } else {
                                for full in exported {
                                    cg.add_import_alias_from_full(&full);
                                }
                            }
                        }
                    }
                    StmtKind::Module { body, .. } => walk(cg, body),
                    _ => {}
                }
            }
        }
        let prog = self.prog;
        walk(self, &prog.body);
    }

    /// Names a module exposes: its `export` list when present (plus all
    /// definitions when it declares `export *`), else all definitions.
    fn module_export_names(&self, module: &str) -> Vec<String> {
        fn find_module<'a>(stmts: &'a [Stmt], name: &str) -> Option<(&'a [Stmt], bool)> {
            for s in stmts {
                if let StmtKind::Module {
                    name: n,
                    body,
                    export_all,
                } = &s.kind
                {
                    if n == name {
                        return Some((body, *export_all));
                    }
                    if let Some(found) = find_module(body, name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        let Some((body, export_all)) = find_module(&self.prog.body, module) else {
            return Vec::new();
        };
        let mut names = Vec::new();
        let has_export_list = body
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Export(_)));
        if has_export_list {
            for s in body {
                if let StmtKind::Export(list) = &s.kind {
                    for n in list {
                        if n.contains('.') {
                            names.push(n.clone());
                        } else {
                            names.push(format!("{module}.{n}"));
                        }
                    }
                }
            }
        }
        if !has_export_list || export_all {
            for s in body {
                match &s.kind {
                    StmtKind::Func(f) => names.push(format!("{module}.{}", f.name)),
                    StmtKind::Var { names: vars, .. } => {
                        for v in vars {
                            names.push(format!("{module}.{v}"));
                        }
                    }
                    _ => {}
                }
            }
        }
        names
    }

    fn add_imports_from_prefix(&mut self, module: &str) {
        let mut found: Vec<String> = Vec::new();
        for sig in &self.fun_sigs {
            if sig.name.starts_with(module)
                && sig.name.as_bytes().get(module.len()) == Some(&b'.')
            {
                found.push(sig.name.clone());
            }
        }
        for g in &self.globals {
            if g.name.starts_with(module) && g.name.as_bytes().get(module.len()) == Some(&b'.') {
                found.push(g.name.clone());
            }
        }
        for full in found {
            self.add_import_alias_from_full(&full);
        }
    }

    /// `export name` inside `module M` appends an aliased copy of `M.name`
    /// so external consumers can resolve the qualified form even when the
    /// definition was registered under another spelling.
    pub(super) fn process_exports(&mut self) {
        fn walk(cg: &mut CodeGen, stmts: &[Stmt]) {
            for s in stmts {
                if let StmtKind::Module { name, body, .. } = &s.kind {
                    let module = name.clone();
                    for child in body {
                        match &child.kind {
                            StmtKind::Export(names) => {
                                for target in names.clone() {
                                    cg.export_aliased_symbol(&module, &target);
                                }
                            }
                            StmtKind::Module { .. } => walk(cg, std::slice::from_ref(child)),
                            _ => {}
                        }
                    }
                }
            }
        }
        let prog = self.prog;
        walk(self, &prog.body);
    }

    fn export_aliased_symbol(&mut self, module: &str, target: &str) {
        let qualified = format!("{module}.{target}");
        let found = self
            .find_exact(&qualified)
            .or_else(|| self.lookup_fun(target));
        if let Some(idx) = found {
            let mut copy = self.fun_sigs[idx].clone();
            copy.name = qualified;
            self.fun_sigs.push(copy);
            return;
        }
        let found_global = self
            .globals
            .iter()
            .rposition(|g| g.name == qualified)
            .or_else(|| self.lookup_global(target));
        if let Some(idx) = found_global {
            let mut copy = self.globals[idx].clone();
            copy.name = qualified;
            self.globals.push(copy);
        }
    }
}

/// Path-style module names (`lib/vec.ny`) normalize to their stem.
pub(super) fn normalize_module_name(raw: &str) -> String {
    if let Some(last) = raw.rsplit('/').next() {
        if last != raw {
            return last.strip_suffix(".ny").unwrap_or(last).to_string();
        }
    }
    raw.to_string()
}

/// All known symbol names, for did-you-mean suggestions.
pub(crate) fn known_symbol_names<'a>(cg: &'a CodeGen) -> impl Iterator<Item = &'a str> {
    cg.fun_sigs
        .iter()
        .map(|s| s.name.as_str())
        .chain(cg.globals.iter().map(|g| g.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Program;
    use crate::config::CompilerConfig;
    use crate::parser::parse_source;

    fn setup(src: &str) -> (Program, ()) {
        (parse_source(src, "<test>").unwrap(), ())
    }

    fn build<'a>(prog: &'a Program) -> CodeGen<'a> {
        let mut cg = CodeGen::new(prog, CompilerConfig::default());
        cg.diags.quiet = true;
        cg.register_builtins();
        cg.collect_use_directives();
        cg.collect_sigs();
        cg.process_exports();
        cg.process_use_imports();
        cg
    }

    #[test]
    fn exact_arity_match_wins() {
        let (prog, _) = setup("fn f(a) { return a }\nfn f(a, b) { return a }");
        let cg = build(&prog);
        let idx = cg.resolve_overload("f", 2).unwrap();
        assert_eq!(cg.fun_sigs[idx].arity, 2);
        let idx = cg.resolve_overload("f", 1).unwrap();
        assert_eq!(cg.fun_sigs[idx].arity, 1);
    }

    #[test]
    fn under_application_scores_below_exact() {
        let (prog, _) = setup("fn g(a, b, c) { return a }");
        let cg = build(&prog);
        // 1 arg against arity 3: still resolves (score 80).
        assert!(cg.resolve_overload("g", 1).is_some());
        // Over-application of a non-variadic does not.
        assert!(cg.resolve_overload("g", 4).is_none());
    }

    #[test]
    fn variadic_scores_60_plus_fixed() {
        let (prog, _) = setup("fn v(a, *rest) { return a }\nfn v(a, b) { return a }");
        let cg = build(&prog);
        // Exact non-variadic beats the variadic for two args.
        let idx = cg.resolve_overload("v", 2).unwrap();
        assert!(!cg.fun_sigs[idx].is_variadic);
        // Five args only fit the variadic.
        let idx = cg.resolve_overload("v", 5).unwrap();
        assert!(cg.fun_sigs[idx].is_variadic);
    }

    #[test]
    fn local_module_function_shadows_stdlib_prefix() {
        let (prog, _) = setup(
            "module std.core { fn add(a, b) { return a } }\nmodule M { fn add(a, b) { return b } }",
        );
        let mut cg = build(&prog);
        cg.current_module = Some("M".to_string());
        let idx = cg.lookup_fun("add").unwrap();
        assert_eq!(cg.fun_sigs[idx].name, "M.add");
        cg.current_module = None;
        let idx = cg.lookup_fun("add").unwrap();
        assert_eq!(cg.fun_sigs[idx].name, "std.core.add");
    }

    #[test]
    fn alias_prefix_expands() {
        let (prog, _) = setup("module M { fn dup(x) { return x } }\nuse M as Lib;");
        let cg = build(&prog);
        let idx = cg.lookup_fun("Lib.dup").unwrap();
        assert_eq!(cg.fun_sigs[idx].name, "M.dup");
    }

    #[test]
    fn use_module_suffix_scan() {
        let (prog, _) = setup("module util { fn helper(x) { return x } }\nuse util.*;");
        let cg = build(&prog);
        let idx = cg.lookup_fun("helper").unwrap();
        assert_eq!(cg.fun_sigs[idx].name, "util.helper");
    }

    #[test]
    fn item_imports_create_aliases() {
        let (prog, _) = setup("module M { fn f(x) { return x } }\nuse M (f as g);");
        let cg = build(&prog);
        let idx = cg.lookup_fun("g").unwrap();
        assert_eq!(cg.fun_sigs[idx].name, "M.f");
    }

    #[test]
    fn exports_append_aliased_copies() {
        let (prog, _) = setup("module M { fn dup(x) { return x } export dup }");
        let cg = build(&prog);
        assert!(cg.find_exact("M.dup").is_some());
    }

    #[test]
    fn builtins_and_call_family_registered() {
        let (prog, _) = setup("fn main() { return 0 }");
        let cg = build(&prog);
        assert!(cg.lookup_fun("__add").is_some());
        assert!(cg.lookup_fun("__call7").is_some());
        assert_eq!(cg.fun_sigs[cg.lookup_fun("__call7").unwrap()].arity, 8);
        // The argc/argv aliases.
        assert!(cg.lookup_fun("argc").is_some());
    }

    #[test]
    fn user_main_links_under_reserved_name() {
        let (prog, _) = setup("fn main() { return 0 }");
        let cg = build(&prog);
        let idx = cg.lookup_fun("main").unwrap();
        assert_eq!(cg.fun_sigs[idx].link_name, "ny.main");
    }

    #[test]
    fn normalize_path_modules() {
        assert_eq!(normalize_module_name("lib/vec.ny"), "vec");
        assert_eq!(normalize_module_name("std.core"), "std.core");
    }
}
