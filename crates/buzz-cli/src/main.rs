//! Buzz command-line runner
//!
//! `buzz <script>` runs a compiled script; `buzz test <dir>` discovers
//! scripts in a directory and runs their `test` entry points.
//!
//! Exit codes: 0 success, 64 compile error, 65 uncaught runtime error,
//! 70 internal error.

mod imports;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::EnvFilter;

use buzz_vm_bytecode::{Chunk, FunctionKind, FunctionProto, BYTECODE_MAGIC};
use buzz_vm_core::{Value, Vm, VmError};

const EXIT_COMPILE: u8 = 64;
const EXIT_RUNTIME: u8 = 65;
const EXIT_INTERNAL: u8 = 70;

#[derive(Parser)]
#[command(name = "buzz", version, about = "Buzz language runtime")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Script to run
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    Run {
        /// Script to run
        script: PathBuf,
    },
    /// Discover scripts in a directory and run their test functions
    Test {
        /// Directory to scan
        dir: PathBuf,
    },
    /// Show where an import would resolve from a given file
    Resolve {
        /// Import name
        name: String,
        /// File the import appears in
        #[arg(long, default_value = "main.buzz")]
        from: PathBuf,
    },
}

fn main() -> ExitCode {
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
    {
        eprintln!("could not install tracing subscriber: {err}");
    }

    let cli = Cli::parse();
    let outcome = match (cli.script, cli.command) {
        (Some(script), _) | (None, Some(Commands::Run { script })) => run_script(&script),
        (None, Some(Commands::Test { dir })) => run_tests(&dir),
        (None, Some(Commands::Resolve { name, from })) => resolve(&name, &from),
        (None, None) => {
            eprintln!("usage: buzz <script> | buzz test <dir>");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("buzz: {err}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

fn resolve(name: &str, from: &Path) -> Result<ExitCode> {
    let search_paths = imports::search_paths_from_env();
    match imports::resolve_import(from, name, &search_paths) {
        Some(imports::ImportResolution::Script(path)) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(imports::ImportResolution::Builtin(builtin)) => {
            println!("builtin:{builtin}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("cannot resolve import '{name}'");
            Ok(ExitCode::from(EXIT_COMPILE))
        }
    }
}

fn run_script(path: &Path) -> Result<ExitCode> {
    let mut vm = Vm::new();
    match load_and_run(&mut vm, path) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => Ok(report_vm_error(err)),
    }
}

fn run_tests(dir: &Path) -> Result<ExitCode> {
    let mut scripts: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("buzz") | Some("bzc")
            )
        })
        .collect();
    scripts.sort();

    let mut failures = 0usize;
    for script in &scripts {
        tracing::info!(script = %script.display(), "running tests");
        let mut vm = Vm::new();
        let result = load_and_run(&mut vm, script).and_then(|_| call_test_function(&mut vm));
        match result {
            Ok(_) => println!("ok   {}", script.display()),
            Err(err) => {
                println!("FAIL {} ({err})", script.display());
                failures += 1;
            }
        }
    }

    println!("{} script(s), {} failure(s)", scripts.len(), failures);
    if failures > 0 {
        Ok(ExitCode::from(EXIT_RUNTIME))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Load a compiled script image and run its top-level function.
///
/// The parser front-end is an external collaborator: the runner consumes
/// bytecode images (magic-tagged cache files). A file without the magic is
/// reported as a compile diagnostic.
fn load_and_run(vm: &mut Vm, path: &Path) -> Result<Value, VmError> {
    let bytes = std::fs::read(path)
        .map_err(|err| VmError::internal(format!("cannot read {}: {err}", path.display())))?;

    if bytes.len() < 4 || bytes[..4] != BYTECODE_MAGIC {
        return Err(VmError::compile(
            "not a compiled script (the compiler front-end produces .bzc images)",
            buzz_vm_core::SourceLocation::new(path.display().to_string(), 0, 0),
        ));
    }

    let chunk = Chunk::read_cache(bytes.as_slice())?;
    let proto = FunctionProto {
        name: String::new(),
        arity: 0,
        kind: FunctionKind::Script,
        yields: false,
        captures: Vec::new(),
        chunk,
    };
    let result = vm.interpret(proto)?;
    vm.finish_compilation()?;
    Ok(result)
}

/// After the script body ran, call its `test` global if one was defined.
fn call_test_function(vm: &mut Vm) -> Result<Value, VmError> {
    let test = vm
        .heap()
        .global_slot("test")
        .and_then(|slot| vm.heap().get_global(slot));
    match test {
        Some(value @ Value::Obj(_)) => vm.call(value, Vec::new()),
        _ => Ok(Value::Null),
    }
}

fn report_vm_error(err: VmError) -> ExitCode {
    match &err {
        VmError::Runtime(runtime) => {
            eprintln!("{runtime}");
            for frame in &runtime.stack {
                eprintln!("    {frame}");
            }
            ExitCode::from(EXIT_RUNTIME)
        }
        VmError::Compile { .. } => {
            eprintln!("{err}");
            ExitCode::from(EXIT_COMPILE)
        }
        VmError::Bytecode(_) | VmError::Internal(_) => {
            eprintln!("{err}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}
