use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cinder::bytecode::disasm::{opcode_counts, print_executable};
use cinder::frontend::lexer::Lexer;
use cinder::frontend::source::SCRIPT_EXTENSION;
use cinder::frontend::token_dumper::TokenDumper;
use cinder::{
    CompileOptions, FileSourceProvider, InterpreterConfig, ScriptError, ScriptManager,
    SourceProvider,
};

#[derive(Parser, Debug)]
#[command(name = "cinder")]
#[command(about = "Run a Cinder script")]
struct Args {
    /// Script to run (`.cinder`)
    script: PathBuf,

    /// Print the token stream and stop
    #[arg(long)]
    tokens: bool,

    /// Disable ANSI colors in the token dump
    #[arg(long = "no-color")]
    no_color: bool,

    /// Token dump with lexemes instead of debug forms
    #[arg(long)]
    pretty: bool,

    /// Print the disassembled bytecode and stop
    #[arg(long)]
    bc: bool,

    /// Skip the optimizer
    #[arg(long = "no-opt")]
    no_opt: bool,

    /// Write a compiled image to this file and stop
    #[arg(long)]
    image: Option<PathBuf>,

    /// Abort after this many executed instructions
    #[arg(long = "max-steps")]
    max_steps: Option<usize>,

    /// Function to run
    #[arg(long, default_value = "main")]
    function: String,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cinder=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() {
    init_logging();
    let args = Args::parse();

    ensure_extension(&args.script);
    let root = args
        .script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = args
        .script
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let sources = FileSourceProvider::new(root);

    if args.tokens {
        if let Err(e) = dump_tokens(&sources, &name, &args) {
            error!("{}", e);
            process::exit(1);
        }
        return;
    }

    let config = InterpreterConfig {
        max_steps: args.max_steps,
        ..InterpreterConfig::default()
    };
    let mut manager = ScriptManager::new(sources)
        .with_options(CompileOptions { optimize: !args.no_opt })
        .with_config(config);

    if let Err(e) = run(&mut manager, &name, &args) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn ensure_extension(path: &Path) {
    if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
        eprintln!("Error: expected a .{} file, got {}", SCRIPT_EXTENSION, path.display());
        process::exit(1);
    }
}

fn dump_tokens(sources: &FileSourceProvider, name: &str, args: &Args) -> Result<(), ScriptError> {
    let lines = sources.load(name)?;
    let tokens = Lexer::new(&lines).tokenize()?;

    let mut dumper = TokenDumper::new();
    if args.no_color {
        dumper = dumper.no_color();
    }
    if args.pretty {
        dumper = dumper.pretty();
    }

    let mut out = std::io::stdout().lock();
    if let Err(e) = dumper.dump(&tokens, &mut out) {
        error!("cannot write tokens: {}", e);
    }
    Ok(())
}

fn run(manager: &mut ScriptManager, name: &str, args: &Args) -> Result<(), ScriptError> {
    let executable = manager.compile(name)?;

    if args.bc {
        print_executable(&executable);
        println!();
        for (opcode, count) in opcode_counts(&executable) {
            println!("{:<5} {}", opcode.mnemonic(), count);
        }
        return Ok(());
    }

    if let Some(out) = &args.image {
        let bytes = executable.to_image()?;
        if let Err(e) = fs::write(out, &bytes) {
            error!("cannot write {}: {}", out.display(), e);
            process::exit(1);
        }
        info!(path = %out.display(), bytes = bytes.len(), "image written");
        return Ok(());
    }

    let mut interpreter = manager.spawn(name, &args.function, Vec::new())?;
    let result = interpreter
        .run_to_completion()
        .map_err(|e| ScriptError::in_script(name, e))?;
    if !result.is_null() {
        println!("{}", result);
    }
    Ok(())
}
