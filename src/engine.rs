//! Common interface over the two execution engines.
//!
//! Keeping a uniform `Engine` trait lets the end-to-end harness and the
//! benches run every program through both backends and compare observable
//! behavior: printed lines, plus the error (if any).

use std::path::PathBuf;
use std::rc::Rc;

use crate::compiler::compile_program;
use crate::errors::RafError;
use crate::interpreter::Interpreter;
use crate::parser;
use crate::runtime::frames::DEFAULT_MAX_CALL_DEPTH;
use crate::source::SourceRef;
use crate::vm::Vm;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory import paths resolve against for the top-level file.
    pub base_dir: PathBuf,
    /// Call-depth limit; exceeding it is a StackOverflow.
    pub max_call_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Everything a run makes observable: the lines `print` produced (also on
/// partial failure) and how the run ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub lines: Vec<String>,
    pub error: Option<RafError>,
}

impl RunOutcome {
    fn failed(error: RafError) -> Self {
        Self {
            lines: Vec::new(),
            error: Some(error),
        }
    }
}

pub trait Engine {
    fn name(&self) -> &'static str;
    fn run(&self, source: &SourceRef, options: &EngineOptions) -> RunOutcome;
}

/// Tree-walking evaluator backend.
pub struct AstEngine;

impl Engine for AstEngine {
    fn name(&self) -> &'static str {
        "ast"
    }

    fn run(&self, source: &SourceRef, options: &EngineOptions) -> RunOutcome {
        let program = match parser::parse_source(source) {
            Ok(program) => program,
            Err(error) => return RunOutcome::failed(error),
        };
        let mut interpreter = Interpreter::new(
            Rc::clone(source),
            options.base_dir.clone(),
            options.max_call_depth,
        );
        let error = interpreter.run(&program).err();
        RunOutcome {
            lines: interpreter.take_output(),
            error,
        }
    }
}

/// Compile-then-execute backend.
pub struct VmEngine;

impl Engine for VmEngine {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn run(&self, source: &SourceRef, options: &EngineOptions) -> RunOutcome {
        let program = match parser::parse_source(source) {
            Ok(program) => program,
            Err(error) => return RunOutcome::failed(error),
        };
        let chunk = compile_program(&program, "<script>", source);
        let mut vm = Vm::new(options.base_dir.clone(), options.max_call_depth);
        let error = vm.run(Rc::new(chunk)).err();
        RunOutcome {
            lines: vm.take_output(),
            error,
        }
    }
}

pub fn engines() -> Vec<Box<dyn Engine>> {
    vec![Box::new(AstEngine), Box::new(VmEngine)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[test]
    fn both_engines_agree_on_success_output() {
        let source = Source::new(
            "test.raf",
            "i = 0; while (i < 3) { print(i * 2); i = i + 1; }",
        );
        let options = EngineOptions::default();
        let outcomes = engines()
            .iter()
            .map(|engine| engine.run(&source, &options))
            .collect::<Vec<_>>();
        for outcome in &outcomes {
            assert!(outcome.error.is_none());
            assert_eq!(outcome.lines, vec!["0", "2", "4"]);
        }
    }

    #[test]
    fn both_engines_agree_on_error_kind_and_partial_output() {
        let source = Source::new("test.raf", "print(\"before\"); print(1 + nil);");
        let options = EngineOptions::default();
        for engine in engines() {
            let outcome = engine.run(&source, &options);
            assert_eq!(outcome.lines, vec!["before"], "engine {}", engine.name());
            let error = outcome.error.expect("expected a type error");
            assert_eq!(error.kind_name(), "TypeError", "engine {}", engine.name());
        }
    }

    #[test]
    fn frontend_errors_short_circuit_both_engines() {
        let source = Source::new("test.raf", "x = ;");
        let options = EngineOptions::default();
        for engine in engines() {
            let outcome = engine.run(&source, &options);
            assert!(outcome.lines.is_empty());
            let error = outcome.error.expect("expected a parse error");
            assert_eq!(error.kind_name(), "ParseError");
        }
    }
}
