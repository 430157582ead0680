//! Command-line driver for the nanocc compiler.
//!
//! The driver owns file I/O and argument handling; the compilation pipeline
//! itself lives in the library and never touches the filesystem.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use nanocc::Options;
use nanocc::compiler::{self, ir, lexer, mir, parser, resolve};

/// A tiny educational C compiler targeting x86-64.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Stop after lexical analysis and print the token sequence
    #[arg(long)]
    lex: bool,

    /// Stop after parsing and print the AST
    #[arg(long)]
    parse: bool,

    /// Stop after semantic resolution and print the resolved AST
    #[arg(long)]
    validate: bool,

    /// Stop after lowering and print the three-address code
    #[arg(long)]
    tacky: bool,

    /// Stop after assembly generation and print the assembly IR
    #[arg(long)]
    codegen: bool,

    /// The C source file to compile
    input: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("nanocc: error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the compilation pipeline, stopping after the stage the driver
/// flags request. Debug dumps go to standard output; all diagnostics are
/// surfaced through the returned error.
fn run(args: &Args) -> Result<(), String> {
    let source = fs::read_to_string(&args.input)
        .map_err(|err| format!("failed to read '{}': {err}", args.input.display()))?;

    let tokens = lexer::Lexer::new(&source)
        .tokenize()
        .map_err(|diag| diag.to_string())?;

    if args.lex {
        for token in &tokens {
            println!("{token}");
        }
        return Ok(());
    }

    let mut ast = parser::parse_program(tokens).map_err(|diag| diag.to_string())?;

    if args.parse {
        print!("{ast}");
        return Ok(());
    }

    let mut ctx = compiler::Context::new();

    resolve::resolve_program(&mut ast, &mut ctx).map_err(|diag| diag.to_string())?;

    if args.validate {
        print!("{ast}");
        return Ok(());
    }

    let ir = ir::generate_ir(ast, &mut ctx).map_err(|diag| diag.to_string())?;

    if args.tacky {
        print!("{ir}");
        return Ok(());
    }

    let mir = mir::generate_mir(ir);

    if args.codegen {
        print!("{mir}");
        return Ok(());
    }

    let asm = compiler::emit::emit_x86_64(&mir, &Options::default())
        .map_err(|diag| diag.to_string())?;

    let out_path = args.input.with_extension("s");
    fs::write(&out_path, asm)
        .map_err(|err| format!("failed to write '{}': {err}", out_path.display()))?;

    Ok(())
}
