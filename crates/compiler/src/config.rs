//! Compiler configuration
//!
//! Three layers, later wins: built-in defaults, an optional `nytrix.toml`
//! next to the source, and `NYTRIX_*` environment variables. The env layer
//! exists because generated-code policy (fast paths, effect policies) is
//! usually toggled per-invocation rather than per-project.

use std::path::Path;

use serde::Deserialize;

use crate::ast::{FX_ALL, FX_ALLOC, FX_FFI, FX_IO, FX_THREAD};

/// Which parts of the embedded stdlib bundle are prepended to the program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdMode {
    None,
    Prelude,
    /// Load the whole bundle but let resolution pull modules on demand;
    /// behaviorally identical to `Full` here since the bundle is embedded.
    Lazy,
    #[default]
    Full,
    Use(Vec<String>),
}

impl StdMode {
    pub fn parse(text: &str) -> Result<StdMode, String> {
        match text {
            "none" => Ok(StdMode::None),
            "prelude" => Ok(StdMode::Prelude),
            "lazy" => Ok(StdMode::Lazy),
            "full" => Ok(StdMode::Full),
            other => {
                if let Some(rest) = other.strip_prefix("use:") {
                    Ok(StdMode::Use(
                        rest.split(',').map(|s| s.trim().to_string()).collect(),
                    ))
                } else {
                    Err(format!("unknown --std mode '{other}'"))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub opt_level: u8,
    /// Custom LLVM pass pipeline forwarded to clang.
    pub passes: Option<String>,
    pub verbosity: u8,
    pub std_mode: StdMode,
    /// Arity mismatches become errors instead of warnings.
    pub strict_diagnostics: bool,
    /// Emit the guarded inline fast path for tagged-integer binops.
    pub fast_int_binops: bool,
    /// Inside stdlib modules, prefer direct `__op` helpers over generic
    /// dispatch. Defaults on; `NYTRIX_STD_BUILTIN_OPS=0` disables.
    pub std_builtin_ops: bool,
    /// Emit `__trace_loc`/`__trace_func` calls so uncaught panics can dump
    /// the source trace ring.
    pub emit_traces: bool,
    pub keep_ir: bool,

    // Effect/alias policies (see crate::purity).
    pub effect_forbid: u32,
    pub effect_require_pure: bool,
    pub effect_require_known: bool,
    pub alias_require_known: bool,
    pub alias_require_no_escape: bool,
    pub policy_include_std: bool,
    pub purity_diag: bool,
    pub effect_diag: bool,
    pub alias_diag: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            opt_level: 0,
            passes: None,
            verbosity: 0,
            std_mode: StdMode::default(),
            strict_diagnostics: false,
            fast_int_binops: false,
            std_builtin_ops: true,
            emit_traces: false,
            keep_ir: false,
            effect_forbid: 0,
            effect_require_pure: false,
            effect_require_known: false,
            alias_require_known: false,
            alias_require_no_escape: false,
            policy_include_std: false,
            purity_diag: false,
            effect_diag: false,
            alias_diag: false,
        }
    }
}

/// On-disk project config (`nytrix.toml`).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    build: FileBuild,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBuild {
    #[serde(rename = "opt-level")]
    opt_level: Option<u8>,
    passes: Option<String>,
    std: Option<String>,
    #[serde(rename = "strict-diagnostics")]
    strict_diagnostics: Option<bool>,
    #[serde(rename = "fast-int-binops")]
    fast_int_binops: Option<bool>,
    #[serde(rename = "std-builtin-ops")]
    std_builtin_ops: Option<bool>,
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty() && v != "0")
}

fn env_set(name: &str) -> bool {
    std::env::var(name).is_ok()
}

/// Parse `NYTRIX_EFFECT_FORBID`: a comma list of `io|alloc|ffi|thread|all`.
/// Unknown tokens are reported through the returned error string.
pub fn parse_effect_forbid(raw: &str) -> Result<u32, String> {
    let mut mask = 0u32;
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        mask |= match token {
            "io" => FX_IO,
            "alloc" => FX_ALLOC,
            "ffi" => FX_FFI,
            "thread" => FX_THREAD,
            "all" => FX_ALL,
            other => {
                return Err(format!(
                    "unknown effect token '{other}' in NYTRIX_EFFECT_FORBID (expected io|alloc|ffi|thread|all)"
                ));
            }
        };
    }
    Ok(mask)
}

impl CompilerConfig {
    /// Defaults ← `nytrix.toml` (if `source_dir` holds one) ← environment.
    pub fn load(source_dir: Option<&Path>) -> Result<Self, String> {
        let mut cfg = CompilerConfig::default();
        if let Some(dir) = source_dir {
            let path = dir.join("nytrix.toml");
            if path.exists() {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                let file: FileConfig = toml::from_str(&text)
                    .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
                cfg.apply_file(file)?;
            }
        }
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), String> {
        let b = file.build;
        if let Some(level) = b.opt_level {
            self.opt_level = level.min(3);
        }
        if let Some(p) = b.passes {
            self.passes = Some(p);
        }
        if let Some(s) = b.std {
            self.std_mode = StdMode::parse(&s)?;
        }
        if let Some(v) = b.strict_diagnostics {
            self.strict_diagnostics = v;
        }
        if let Some(v) = b.fast_int_binops {
            self.fast_int_binops = v;
        }
        if let Some(v) = b.std_builtin_ops {
            self.std_builtin_ops = v;
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), String> {
        if env_set("NYTRIX_FAST_INT_BINOPS") {
            self.fast_int_binops = env_truthy("NYTRIX_FAST_INT_BINOPS");
        }
        if env_set("NYTRIX_STD_BUILTIN_OPS") {
            self.std_builtin_ops = env_truthy("NYTRIX_STD_BUILTIN_OPS");
        }
        if env_truthy("NYTRIX_STRICT_DIAGNOSTICS") {
            self.strict_diagnostics = true;
        }
        if let Ok(raw) = std::env::var("NYTRIX_EFFECT_FORBID") {
            self.effect_forbid = parse_effect_forbid(&raw)?;
        }
        self.effect_require_pure |= env_truthy("NYTRIX_EFFECT_REQUIRE_PURE");
        self.effect_require_known |= env_truthy("NYTRIX_EFFECT_REQUIRE_KNOWN");
        self.alias_require_known |= env_truthy("NYTRIX_ALIAS_REQUIRE_KNOWN");
        self.alias_require_no_escape |= env_truthy("NYTRIX_ALIAS_REQUIRE_NO_ESCAPE");
        self.policy_include_std |= env_truthy("NYTRIX_EFFECT_POLICY_INCLUDE_STD");
        self.purity_diag |= env_truthy("NYTRIX_PURITY_DIAG");
        self.effect_diag |= env_truthy("NYTRIX_EFFECT_DIAG");
        self.alias_diag |= env_truthy("NYTRIX_ALIAS_DIAG");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_mode_parsing() {
        assert_eq!(StdMode::parse("none").unwrap(), StdMode::None);
        assert_eq!(StdMode::parse("prelude").unwrap(), StdMode::Prelude);
        assert_eq!(StdMode::parse("full").unwrap(), StdMode::Full);
        assert_eq!(
            StdMode::parse("use:core,io").unwrap(),
            StdMode::Use(vec!["core".into(), "io".into()])
        );
        assert!(StdMode::parse("bogus").is_err());
    }

    #[test]
    fn effect_forbid_parsing() {
        assert_eq!(parse_effect_forbid("io").unwrap(), FX_IO);
        assert_eq!(
            parse_effect_forbid("io, thread").unwrap(),
            FX_IO | FX_THREAD
        );
        assert_eq!(parse_effect_forbid("all").unwrap(), FX_ALL);
        assert!(parse_effect_forbid("network").is_err());
    }

    #[test]
    fn file_config_overrides_defaults() {
        let mut cfg = CompilerConfig::default();
        let file: FileConfig = toml::from_str(
            "[build]\nopt-level = 2\nstrict-diagnostics = true\nstd = \"prelude\"\n",
        )
        .unwrap();
        cfg.apply_file(file).unwrap();
        assert_eq!(cfg.opt_level, 2);
        assert!(cfg.strict_diagnostics);
        assert_eq!(cfg.std_mode, StdMode::Prelude);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let parsed: Result<FileConfig, _> = toml::from_str("[build]\nwat = 1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn loads_project_file_from_source_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nytrix.toml"),
            "[build]\nopt-level = 3\nfast-int-binops = true\n",
        )
        .unwrap();
        let cfg = CompilerConfig::load(Some(dir.path())).unwrap();
        assert_eq!(cfg.opt_level, 3);
        assert!(cfg.fast_int_binops);
        // A directory without a config file yields the defaults.
        let other = tempfile::tempdir().unwrap();
        let cfg = CompilerConfig::load(Some(other.path())).unwrap();
        assert_eq!(cfg.opt_level, 0);
    }
}
