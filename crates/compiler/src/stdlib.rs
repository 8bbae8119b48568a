//! Embedded stdlib bundle
//!
//! The stdlib ships inside the compiler binary as Ny source and is parsed
//! with the `<stdlib>` filename so diagnostics, strict mode, and the
//! helper-selection policy can tell library frames from user frames.

use crate::config::StdMode;

pub const STDLIB_FILENAME: &str = "<stdlib>";

const MODULES: &[(&str, &str)] = &[
    ("std.core", include_str!("../std/core.ny")),
    ("std.io", include_str!("../std/io.ny")),
    ("std.math", include_str!("../std/math.ny")),
];

/// Modules included in `--std prelude`.
const PRELUDE: &[&str] = &["std.core"];

/// Assemble the textual bundle for a mode. `Use` names match either the
/// full module path or its last component (`use:io` pulls `std.io`).
pub fn bundle(mode: &StdMode) -> String {
    let selected: Vec<&str> = match mode {
        StdMode::None => Vec::new(),
        StdMode::Prelude => MODULES
            .iter()
            .filter(|(name, _)| PRELUDE.contains(name))
            .map(|(_, src)| *src)
            .collect(),
        StdMode::Lazy | StdMode::Full => MODULES.iter().map(|(_, src)| *src).collect(),
        StdMode::Use(names) => MODULES
            .iter()
            .filter(|(name, _)| {
                names.iter().any(|want| {
                    want == name || Some(want.as_str()) == name.rsplit('.').next()
                })
            })
            .map(|(_, src)| *src)
            .collect(),
    };
    selected.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    #[test]
    fn full_bundle_parses() {
        let src = bundle(&StdMode::Full);
        let prog = parse_source(&src, STDLIB_FILENAME).expect("stdlib must parse");
        assert!(prog.body.len() >= 3);
    }

    #[test]
    fn prelude_is_core_only() {
        let src = bundle(&StdMode::Prelude);
        assert!(src.contains("module std.core"));
        assert!(!src.contains("module std.io"));
    }

    #[test]
    fn use_mode_selects_by_tail() {
        let src = bundle(&StdMode::Use(vec!["io".into()]));
        assert!(src.contains("module std.io"));
        assert!(!src.contains("module std.core"));
    }

    #[test]
    fn none_is_empty() {
        assert!(bundle(&StdMode::None).is_empty());
    }
}
