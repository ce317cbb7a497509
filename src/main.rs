use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use raf::compiler::compile_program;
use raf::engine::{AstEngine, Engine, EngineOptions, VmEngine};
use raf::runtime::frames::DEFAULT_MAX_CALL_DEPTH;
use raf::source::{Source, SourceRef};
use raf::{bytecode, parser, repl};

fn main() -> ExitCode {
    match dispatch() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let command = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("Usage: raf <run|dis|repl> [--vm] [FILE]"))?;

    match command.as_str() {
        "run" => {
            let mut use_vm = false;
            let mut file = None;
            for arg in args {
                match arg.as_str() {
                    "--vm" => use_vm = true,
                    _ if file.is_none() => file = Some(arg),
                    _ => bail!("Only one input file is supported"),
                }
            }
            let file = file.ok_or_else(|| anyhow::anyhow!("Usage: raf run [--vm] FILE"))?;
            run_file(&file, use_vm)
        }
        "dis" => {
            let file = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("Usage: raf dis FILE"))?;
            disassemble_file(&file)
        }
        "repl" => {
            repl::run().context("REPL I/O failed")?;
            Ok(ExitCode::SUCCESS)
        }
        other => bail!("Unknown command '{other}'"),
    }
}

fn read_source(path: &str) -> Result<SourceRef> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;
    Ok(Source::new(path, text))
}

fn options_for() -> EngineOptions {
    // The top-level file's imports resolve against the working directory;
    // modules then resolve against their own file's directory.
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let max_call_depth = std::env::var("RAF_MAX_CALL_DEPTH")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_MAX_CALL_DEPTH);
    EngineOptions {
        base_dir,
        max_call_depth,
    }
}

fn run_file(path: &str, use_vm: bool) -> Result<ExitCode> {
    let source = read_source(path)?;
    let options = options_for();
    let engine: Box<dyn Engine> = if use_vm {
        Box::new(VmEngine)
    } else {
        Box::new(AstEngine)
    };

    let outcome = engine.run(&source, &options);
    for line in &outcome.lines {
        println!("{line}");
    }
    match outcome.error {
        Some(error) => {
            eprintln!("{}", error.render());
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn disassemble_file(path: &str) -> Result<ExitCode> {
    let source = read_source(path)?;
    match parser::parse_source(&source) {
        Ok(program) => {
            let chunk = compile_program(&program, "<script>", &source);
            println!("{}", bytecode::disassemble(&chunk));
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            eprintln!("{}", error.render());
            Ok(ExitCode::FAILURE)
        }
    }
}
