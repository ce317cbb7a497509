//! End-to-end fixture harness.
//!
//! Every program under `tests/programs/` runs through BOTH engines. Success
//! cases must print identical lines; error cases must fail with the same
//! error kind and the same partial output, so the two backends cannot drift
//! apart semantically.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use raf::engine::{Engine, EngineOptions, RunOutcome, engines};
use raf::fixtures::{self, Case, CaseClass};
use raf::source::Source;

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

fn run_case(engine: &dyn Engine, case: &Case) -> Result<RunOutcome> {
    let text = fs::read_to_string(&case.program_path)
        .with_context(|| format!("Reading {}", case.name))?;
    let source = Source::new("program.raf", text);
    let options = EngineOptions {
        base_dir: case.dir.clone(),
        ..EngineOptions::default()
    };
    Ok(engine.run(&source, &options))
}

fn check_case(engine: &dyn Engine, case: &Case, outcome: &RunOutcome) -> Result<()> {
    match case.spec.class {
        CaseClass::RuntimeSuccess => {
            if let Some(error) = &outcome.error {
                anyhow::bail!(
                    "Engine {} failed for {}:\n{}",
                    engine.name(),
                    case.name,
                    error.render()
                );
            }
            let stdout_file = case
                .spec
                .expected
                .stdout_file
                .as_deref()
                .with_context(|| format!("Missing stdout_file in {}", case.name))?;
            let expected = normalize_output(&case.read_text(stdout_file)?);
            let actual = normalize_output(&outcome.lines.join("\n"));
            ensure!(
                actual == expected,
                "Engine {} mismatch for {}:\nexpected:\n{expected}\nactual:\n{actual}",
                engine.name(),
                case.name
            );
        }
        CaseClass::FrontendError | CaseClass::RuntimeError => {
            let pattern = case
                .spec
                .expected
                .stderr_contains
                .as_deref()
                .with_context(|| format!("Missing stderr_contains in {}", case.name))?;
            let error = outcome.error.as_ref().with_context(|| {
                format!(
                    "Expected engine {} to fail for {}",
                    engine.name(),
                    case.name
                )
            })?;
            if case.spec.class == CaseClass::FrontendError {
                ensure!(
                    matches!(error.kind_name(), "LexError" | "ParseError"),
                    "Expected a frontend error for {} on engine {}, got {}",
                    case.name,
                    engine.name(),
                    error.kind_name()
                );
            }
            let rendered = error.render();
            ensure!(
                rendered.contains(pattern),
                "Expected error containing '{pattern}' for {} on engine {}, got:\n{rendered}",
                case.name,
                engine.name()
            );
        }
    }
    Ok(())
}

#[test]
fn programs_behave_identically_on_both_engines() -> Result<()> {
    let cases = fixtures::load_cases(Path::new("tests/programs"))?;
    let engines = engines();

    for case in &cases {
        let mut outcomes = Vec::new();
        for engine in &engines {
            let outcome = run_case(engine.as_ref(), case)?;
            check_case(engine.as_ref(), case, &outcome)?;
            outcomes.push((engine.name(), outcome));
        }

        // Cross-engine equivalence: same lines, same error kind.
        let (first_name, first) = &outcomes[0];
        for (name, outcome) in &outcomes[1..] {
            ensure!(
                outcome.lines == first.lines,
                "Output diverged for {} between {first_name} and {name}",
                case.name
            );
            let first_kind = first.error.as_ref().map(|error| error.kind_name());
            let kind = outcome.error.as_ref().map(|error| error.kind_name());
            ensure!(
                kind == first_kind,
                "Error kind diverged for {} between {first_name} ({first_kind:?}) and {name} ({kind:?})",
                case.name
            );
        }
    }
    Ok(())
}
