use thiserror::Error;

use crate::runtime::frames::TraceEntry;
use crate::source::SourceRef;
use crate::token::Span;

/// Typed runtime errors raised by both execution engines. Variants group
/// into the language's reported error kinds via [`RuntimeError::kind_name`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Unsupported operand types for '{op}': {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("Unsupported operand type for unary '{op}': {operand}")]
    InvalidUnaryOperand {
        op: &'static str,
        operand: &'static str,
    },
    #[error("Object of type {type_name} is not callable")]
    NotCallable { type_name: &'static str },
    #[error("Object of type {type_name} is not indexable")]
    NotIndexable { type_name: &'static str },
    #[error("{function}() expected {expected}, got a {got}")]
    InvalidArgument {
        function: &'static str,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{name}() expected {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("List index must be a non-negative integer, got {got}")]
    NonIntegerIndex { got: String },
    #[error("List index out of bounds: index {index}, len {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("Division by zero")]
    DivideByZero,
    #[error("Could not convert '{text}' to a number")]
    InvalidNumber { text: String },
    #[error("Import not found: {path}")]
    ImportNotFound { path: String },
    #[error("Cyclic import: {path}")]
    ImportCycle { path: String },
    #[error("Import of '{path}' failed:\n{message}")]
    ImportFailed { path: String, message: String },
    #[error("Maximum call depth of {limit} exceeded")]
    StackOverflow { limit: usize },
}

impl RuntimeError {
    /// The error-kind label shown in rendered diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RuntimeError::UndefinedVariable { .. } => "NameError",
            RuntimeError::InvalidOperands { .. }
            | RuntimeError::InvalidUnaryOperand { .. }
            | RuntimeError::NotCallable { .. }
            | RuntimeError::NotIndexable { .. }
            | RuntimeError::InvalidArgument { .. } => "TypeError",
            RuntimeError::ArityMismatch { .. } => "ArityError",
            RuntimeError::NonIntegerIndex { .. } | RuntimeError::IndexOutOfBounds { .. } => {
                "IndexError"
            }
            RuntimeError::DivideByZero => "DivideByZero",
            RuntimeError::InvalidNumber { .. } => "ValueError",
            RuntimeError::ImportNotFound { .. }
            | RuntimeError::ImportCycle { .. }
            | RuntimeError::ImportFailed { .. } => "ImportError",
            RuntimeError::StackOverflow { .. } => "StackOverflow",
        }
    }

    /// Attaches the raise site, producing the in-flight form both engines
    /// thread through `?`.
    pub fn at(self, span: Span, source: &SourceRef) -> Raise {
        Raise {
            error: self,
            span,
            source: source.clone(),
            trace: None,
        }
    }
}

/// A runtime error in flight: the raise site plus, once the innermost call
/// boundary has seen it, the captured stack trace.
#[derive(Debug, Clone)]
pub struct Raise {
    pub error: RuntimeError,
    pub span: Span,
    pub source: SourceRef,
    pub trace: Option<Vec<TraceEntry>>,
}

pub type RunResult<T> = Result<T, Raise>;
