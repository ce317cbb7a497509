//! Loader for the end-to-end program fixtures under `tests/programs/`.
//!
//! Each case directory holds a `program.raf`, a `case.yaml` describing the
//! expected outcome, optional `.raf` modules the program imports, and an
//! expected-stdout file for successful runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Runs to completion; stdout must match under both engines.
    RuntimeSuccess,
    /// Rejected by the lexer or parser before execution.
    FrontendError,
    /// Accepted by the front end; both engines must fail the same way.
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub exit_code: i32,
    pub stdout_file: Option<String>,
    pub stderr_contains: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let program_path = path.join("program.raf");
        ensure!(
            program_path.exists(),
            "Missing program.raf for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        validate(&case_name, &spec)?;
        cases.push(Case {
            name: case_name,
            dir: path,
            program_path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

fn validate(name: &str, spec: &CaseSpec) -> Result<()> {
    match spec.class {
        CaseClass::RuntimeSuccess => {
            ensure!(
                spec.expected.exit_code == 0,
                "Case {name} expected exit code must be 0 for runtime_success"
            );
            ensure!(
                spec.expected.stdout_file.is_some(),
                "Case {name} must name a stdout_file"
            );
        }
        CaseClass::FrontendError | CaseClass::RuntimeError => {
            ensure!(
                spec.expected.exit_code == 1,
                "Case {name} expected exit code must be 1 for error cases"
            );
            ensure!(
                spec.expected.stderr_contains.is_some(),
                "Case {name} must state a stderr_contains pattern"
            );
        }
    }
    Ok(())
}
