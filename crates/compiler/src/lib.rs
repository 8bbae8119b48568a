//! Nytrix compiler library
//!
//! Compilation from `.ny` source to LLVM IR text and executables. The
//! runtime static library is embedded at build time and extracted next to
//! the IR when linking, so a single `nyc` binary carries everything.
//!
//! Pipeline: stdlib bundle + user source → parse → collection passes →
//! effect analysis → lowering → structural verify → clang link.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod lexer;
pub mod parser;
pub(crate) mod purity;
pub mod stdlib;

pub use codegen::CodeGen;
pub use config::{CompilerConfig, StdMode};
pub use parser::{Parser, parse_source};

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use tracing::{debug, info};

/// Embedded runtime library (located by build.rs).
static RUNTIME_LIB: &[u8] = include_bytes!(env!("NY_RUNTIME_LIB_PATH"));

pub(crate) fn runtime_archive() -> &'static [u8] {
    RUNTIME_LIB
}

/// Minimum clang/LLVM version required: the generated IR uses opaque
/// pointers (`ptr`), which landed in LLVM 15.
const MIN_CLANG_VERSION: u32 = 15;

static CLANG_VERSION_CHECKED: OnceLock<Result<u32, String>> = OnceLock::new();

/// Check that clang is available and recent enough. Cached per process.
fn check_clang_version() -> Result<u32, String> {
    CLANG_VERSION_CHECKED
        .get_or_init(|| {
            let output = Command::new("clang").arg("--version").output().map_err(|e| {
                format!(
                    "Failed to run clang: {e}. Please install clang {MIN_CLANG_VERSION} or later."
                )
            })?;
            if !output.status.success() {
                return Err(format!(
                    "clang --version failed with exit code {:?}",
                    output.status.code()
                ));
            }
            let version_str = String::from_utf8_lossy(&output.stdout);
            let version = parse_clang_version(&version_str).ok_or_else(|| {
                format!(
                    "Could not parse clang version from: {}",
                    version_str.lines().next().unwrap_or(&version_str)
                )
            })?;
            // Apple clang numbers differently; Apple clang 14 is LLVM 15.
            let is_apple = version_str.contains("Apple clang");
            let effective_min = if is_apple { 14 } else { MIN_CLANG_VERSION };
            if version < effective_min {
                return Err(format!(
                    "clang version {version} detected, but nyc requires {effective_min} or later \
                     (the generated IR uses opaque pointers)."
                ));
            }
            Ok(version)
        })
        .clone()
}

/// Parse the major version from `clang --version` output.
fn parse_clang_version(output: &str) -> Option<u32> {
    for line in output.lines() {
        if line.contains("clang version") {
            if let Some(idx) = line.find("version ") {
                let major: String = line[idx + 8..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if !major.is_empty() {
                    return major.parse().ok();
                }
            }
        }
    }
    None
}

/// Parse the stdlib bundle plus the user source into one program.
fn parse_with_stdlib(
    source: &str,
    file: &str,
    config: &CompilerConfig,
) -> Result<ast::Program, String> {
    let bundle = stdlib::bundle(&config.std_mode);
    let mut program = if bundle.is_empty() {
        ast::Program::default()
    } else {
        parse_source(&bundle, stdlib::STDLIB_FILENAME)?
    };
    let user = parse_source(source, file)?;
    program.body.extend(user.body);
    Ok(program)
}

/// Compile a source string to LLVM IR text.
pub fn compile_to_ir(source: &str, file: &str, config: &CompilerConfig) -> Result<String, String> {
    debug!(file, "parsing");
    let program = parse_with_stdlib(source, file, config)?;
    debug!(functions = program.body.len(), "lowering");
    let mut cg = CodeGen::new(&program, config.clone());
    cg.emit_program()
}

/// Compile a source string and link an executable at `output_path`.
pub fn compile_source(
    source: &str,
    file: &str,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let ir = compile_to_ir(source, file, config)?;
    let ir_path = output_path.with_extension("ll");
    std::fs::write(&ir_path, &ir).map_err(|e| format!("Failed to write IR file: {e}"))?;
    info!(ir = %ir_path.display(), "IR written");

    check_clang_version()?;
    let ir_path = run_custom_passes(&ir_path, config)?;

    // Extract the embedded runtime archive next to the IR.
    let runtime_path = ir_path.with_file_name("libny_runtime.a");
    std::fs::write(&runtime_path, RUNTIME_LIB)
        .map_err(|e| format!("Failed to write runtime lib: {e}"))?;

    let opt_flag = format!("-O{}", config.opt_level.min(3));
    let mut clang = Command::new("clang");
    clang
        .arg(&opt_flag)
        .arg(&ir_path)
        .arg(&runtime_path)
        .arg("-lpthread")
        .arg("-ldl")
        .arg("-lm")
        .arg("-o")
        .arg(output_path);
    debug!(?clang, "linking");
    let output = clang
        .output()
        .map_err(|e| format!("Failed to run clang: {e}"))?;
    let _ = std::fs::remove_file(&runtime_path);
    if !output.status.success() {
        return Err(format!(
            "Clang compilation failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    if !config.keep_ir {
        let _ = std::fs::remove_file(&ir_path);
    }
    Ok(())
}

/// Apply a custom `-passes=<spec>` pipeline via `opt` when requested.
fn run_custom_passes(ir_path: &Path, config: &CompilerConfig) -> Result<PathBuf, String> {
    let Some(passes) = &config.passes else {
        return Ok(ir_path.to_path_buf());
    };
    let out_path = ir_path.with_extension("opt.ll");
    let output = Command::new("opt")
        .arg("-S")
        .arg(format!("-passes={passes}"))
        .arg(ir_path)
        .arg("-o")
        .arg(&out_path)
        .output()
        .map_err(|e| format!("Failed to run opt for custom passes: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "opt -passes={passes} failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(out_path)
}

/// Compile a `.ny` file to an executable.
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = std::fs::read_to_string(source_path)
        .map_err(|e| format!("Failed to read source file: {e}"))?;
    let file = source_path.to_string_lossy();
    compile_source(&source, &file, output_path, config)
}

/// Build into a temporary directory, execute, and return the exit code.
///
/// This replaces the in-process JIT: observable behavior (exit status,
/// stdio) matches running the compiled program directly.
pub fn run_source(
    source: &str,
    file: &str,
    args: &[String],
    config: &CompilerConfig,
) -> Result<i32, String> {
    let dir = std::env::temp_dir().join(format!("nytrix-run-{}", std::process::id()));
    std::fs::create_dir_all(&dir).map_err(|e| format!("temp dir: {e}"))?;
    let exe = dir.join("program");
    let result = compile_source(source, file, &exe, config).and_then(|()| {
        let status = Command::new(&exe)
            .args(args)
            .status()
            .map_err(|e| format!("Failed to execute program: {e}"))?;
        Ok(status.code().unwrap_or(1))
    });
    let _ = std::fs::remove_dir_all(&dir);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_ir(source: &str) -> Result<String, String> {
        let config = CompilerConfig::default();
        let program = parse_with_stdlib(source, "<test>", &config)?;
        let mut cg = CodeGen::new(&program, config);
        cg.diags.quiet = true;
        cg.emit_program()
    }

    #[test]
    fn test_parse_clang_version_standard() {
        let output = "clang version 15.0.0 (https://github.com/llvm/llvm-project)\nTarget: x86_64";
        assert_eq!(parse_clang_version(output), Some(15));
    }

    #[test]
    fn test_parse_clang_version_apple() {
        let output =
            "Apple clang version 14.0.3 (clang-1403.0.22.14.1)\nTarget: arm64-apple-darwin";
        assert_eq!(parse_clang_version(output), Some(14));
    }

    #[test]
    fn test_parse_clang_version_ubuntu() {
        let output = "Ubuntu clang version 15.0.7\nTarget: x86_64-pc-linux-gnu";
        assert_eq!(parse_clang_version(output), Some(15));
    }

    #[test]
    fn test_parse_clang_version_invalid() {
        assert_eq!(parse_clang_version("no version here"), None);
        assert_eq!(parse_clang_version("version "), None);
    }

    #[test]
    fn scenario_add_literals() {
        let ir = quiet_ir("fn main() { return 1 + 2 }").unwrap();
        assert!(ir.contains("define i64 @ny.main()"));
        assert!(ir.contains("ret i64 7")); // tagged 3
    }

    #[test]
    fn scenario_list_index() {
        let ir = quiet_ir("fn main() { let xs = [10, 20, 30]; return xs[1] }").unwrap();
        assert!(ir.contains("call i64 @std.core.list(i64 7)"));
        assert!(ir.contains("call i64 @std.core.append"));
        assert!(ir.contains("call i64 @std.core.get"));
    }

    #[test]
    fn scenario_lambda_square() {
        let ir = quiet_ir("fn main() { let f = fn(x) { return x * x }; return f(7) }").unwrap();
        assert!(ir.contains("define i64 @__lambda_0"));
        // The call goes through the runtime dispatcher.
        assert!(ir.contains("call i64 @__call1"));
    }

    #[test]
    fn scenario_try_catch() {
        let ir = quiet_ir(
            "fn main() { let a = 10; let b = 0; try { return a / b } catch e { return 42 } }",
        )
        .unwrap();
        assert!(ir.contains("_setjmp"));
        assert!(ir.contains("__get_panic_val"));
    }

    #[test]
    fn scenario_function_as_value() {
        let ir =
            quiet_ir("fn f(x) { return x + 1 } fn main() { let g = f; return g(41) }").unwrap();
        assert!(ir.contains("ptrtoint ptr @f to i64"));
        assert!(ir.contains("call i64 @__call1"));
    }

    #[test]
    fn scenario_module_export() {
        let ir = quiet_ir(
            "module M { fn dup(x) { return x * 2 } export dup }\nuse M;\nfn main() { return M.dup(21) }",
        )
        .unwrap();
        assert!(ir.contains("define i64 @M.dup"));
        assert!(ir.contains("call i64 @M.dup(i64 43)"));
    }

    #[test]
    fn stdlib_none_drops_collections() {
        let mut config = CompilerConfig::default();
        config.std_mode = StdMode::None;
        let program = parse_with_stdlib("fn main() { let xs = [1]; return 0 }", "<test>", &config)
            .unwrap();
        let mut cg = CodeGen::new(&program, config);
        cg.diags.quiet = true;
        // Without std.core there is no `list`, so lowering must fail.
        assert!(cg.emit_program().is_err());
    }

    #[test]
    fn stdlib_bundle_compiles_cleanly() {
        let ir = quiet_ir("fn main() { return 0 }").unwrap();
        assert!(ir.contains("define i64 @std.core.list"));
        assert!(ir.contains("define i64 @std.io.write"));
        assert!(ir.contains("define i64 @std.math.abs"));
    }

    #[test]
    fn fstring_concatenates() {
        let ir = quiet_ir(r#"fn main() { let s = f"v={1 + 1}"; return 0 }"#).unwrap();
        assert!(ir.contains("call i64 @__str_concat"));
        assert!(ir.contains("call i64 @__to_str"));
    }

    #[test]
    fn for_loop_desugars_to_len_get() {
        let ir = quiet_ir("fn main() { for x in [1, 2] { let y = x } return 0 }").unwrap();
        assert!(ir.contains("call i64 @std.core.list_len"));
        assert!(ir.contains("icmp slt i64"));
    }

    #[test]
    fn undefined_symbol_fails_compilation() {
        assert!(quiet_ir("fn main() { return nope(1) }").is_err());
    }
}
