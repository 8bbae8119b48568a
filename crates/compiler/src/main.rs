//! Nytrix compiler CLI
//!
//! `nyc build` links an executable, `nyc run` builds into a temporary
//! directory and executes, `nyc emit-ir` stops at the `.ll`. Verbosity
//! flags feed both the tracing filter and the diagnostic budgets.

use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use nyc::config::{CompilerConfig, StdMode};

#[derive(ClapParser)]
#[command(name = "nyc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Nytrix compiler - compile .ny programs to executables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct BuildFlags {
    /// Input .ny source file (omit when using --code)
    input: Option<PathBuf>,

    /// Compile an inline source string instead of a file
    #[arg(short = 'c', long = "code", value_name = "CODE")]
    code: Option<String>,

    /// Optimization level (0-3)
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u8,

    /// Custom LLVM pass pipeline (runs through `opt -passes=...`)
    #[arg(long = "passes", value_name = "SPEC")]
    passes: Option<String>,

    /// stdlib inclusion: none, prelude, lazy, full, use:mod1,mod2
    #[arg(long = "std", value_name = "MODE")]
    std_mode: Option<String>,

    /// Keep the intermediate LLVM IR file (.ll)
    #[arg(long)]
    keep_ir: bool,

    /// Treat arity mismatches as errors
    #[arg(long)]
    strict: bool,

    /// Record source locations in the runtime trace ring (dumped on
    /// uncaught panic)
    #[arg(long)]
    trace: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .ny file to an executable
    Build {
        #[command(flatten)]
        flags: BuildFlags,

        /// Output executable path (defaults to the input stem)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile and immediately execute, propagating the exit code
    Run {
        #[command(flatten)]
        flags: BuildFlags,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Compile to LLVM IR only
    EmitIr {
        #[command(flatten)]
        flags: BuildFlags,

        /// Output .ll path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Load config layers and fold the command-line flags on top.
fn build_config(flags: &BuildFlags) -> CompilerConfig {
    let source_dir = flags
        .input
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty());
    let mut config = match CompilerConfig::load(source_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    config.opt_level = flags.opt_level.min(3);
    config.verbosity = flags.verbose;
    config.keep_ir = flags.keep_ir;
    if flags.strict {
        config.strict_diagnostics = true;
    }
    if flags.trace {
        config.emit_traces = true;
    }
    if let Some(p) = &flags.passes {
        config.passes = Some(p.clone());
    }
    if let Some(mode) = &flags.std_mode {
        match StdMode::parse(mode) {
            Ok(m) => config.std_mode = m,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
    }
    config
}

fn load_source(flags: &BuildFlags) -> (String, String) {
    if let Some(code) = &flags.code {
        return (code.clone(), "<inline>".to_string());
    }
    let Some(input) = &flags.input else {
        eprintln!("error: provide an input file or -c CODE");
        process::exit(1);
    };
    match std::fs::read_to_string(input) {
        Ok(source) => (source, input.to_string_lossy().into_owned()),
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", input.display());
            process::exit(1);
        }
    }
}

fn default_output(flags: &BuildFlags) -> PathBuf {
    flags
        .input
        .as_deref()
        .and_then(Path::file_stem)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("a.out"))
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build { flags, output } => {
            init_tracing(flags.verbose);
            let config = build_config(&flags);
            let (source, file) = load_source(&flags);
            let output = output.unwrap_or_else(|| default_output(&flags));
            if let Err(e) = nyc::compile_source(&source, &file, &output, &config) {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
        Commands::Run { flags, args } => {
            init_tracing(flags.verbose);
            let config = build_config(&flags);
            let (source, file) = load_source(&flags);
            match nyc::run_source(&source, &file, &args, &config) {
                Ok(code) => process::exit(code),
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(1);
                }
            }
        }
        Commands::EmitIr { flags, output } => {
            init_tracing(flags.verbose);
            let config = build_config(&flags);
            let (source, file) = load_source(&flags);
            match nyc::compile_to_ir(&source, &file, &config) {
                Ok(ir) => match output {
                    Some(path) => {
                        if let Err(e) = std::fs::write(&path, ir) {
                            eprintln!("error: failed to write {}: {e}", path.display());
                            process::exit(1);
                        }
                    }
                    None => print!("{ir}"),
                },
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(1);
                }
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "nyc", &mut io::stdout());
        }
    }
}
