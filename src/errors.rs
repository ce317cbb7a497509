use std::fmt;

use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::runtime::error::{Raise, RuntimeError};
use crate::runtime::frames::TraceEntry;
use crate::source::SourceRef;
use crate::token::Span;

/// Any failure the pipeline can surface to the host, with enough context to
/// render the offending line and, for runtime errors, the call stack.
#[derive(Debug, Clone)]
pub enum RafError {
    Lex {
        error: LexError,
        source: SourceRef,
    },
    Parse {
        error: ParseError,
        source: SourceRef,
    },
    Runtime {
        error: RuntimeError,
        span: Span,
        source: SourceRef,
        trace: Vec<TraceEntry>,
    },
}

impl RafError {
    pub fn from_raise(raise: Raise, fallback_trace: Vec<TraceEntry>) -> Self {
        RafError::Runtime {
            error: raise.error,
            span: raise.span,
            source: raise.source,
            trace: raise.trace.unwrap_or(fallback_trace),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RafError::Lex { .. } => "LexError",
            RafError::Parse { .. } => "ParseError",
            RafError::Runtime { error, .. } => error.kind_name(),
        }
    }

    fn span(&self) -> Span {
        match self {
            RafError::Lex { error, .. } => error.span(),
            RafError::Parse { error, .. } => error.span,
            RafError::Runtime { span, .. } => *span,
        }
    }

    fn source(&self) -> &SourceRef {
        match self {
            RafError::Lex { source, .. }
            | RafError::Parse { source, .. }
            | RafError::Runtime { source, .. } => source,
        }
    }

    fn message(&self) -> String {
        match self {
            RafError::Lex { error, .. } => error.to_string(),
            RafError::Parse { error, .. } => error.to_string(),
            RafError::Runtime { error, .. } => error.to_string(),
        }
    }

    /// Full diagnostic: kind, message, the offending source line with a caret
    /// under the column, and (for runtime errors) the stack trace with the
    /// innermost frame first.
    pub fn render(&self) -> String {
        let span = self.span();
        let mut out = format!(
            "{}: [line {}, col {}] {}",
            self.kind_name(),
            span.line,
            span.col,
            self.message()
        );
        if let Some(line) = self.source().line(span.line) {
            out.push('\n');
            out.push_str(line);
            out.push('\n');
            out.push_str(&" ".repeat(span.col.saturating_sub(1)));
            out.push('^');
        }
        if let RafError::Runtime { trace, .. } = self {
            if !trace.is_empty() {
                out.push_str("\nStack trace (most recent call last):");
                for entry in trace {
                    out.push_str(&format!(
                        "\n  at {} ({}:{}:{})",
                        entry.function, entry.file, entry.span.line, entry.span.col
                    ));
                }
            }
        }
        out
    }
}

impl fmt::Display for RafError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for RafError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[test]
    fn renders_caret_under_the_offending_column() {
        let source = Source::new("main.raf", "x = 1 @ 2;\n");
        let error = RafError::Lex {
            error: LexError::UnexpectedCharacter {
                character: '@',
                span: Span::new(1, 7),
            },
            source,
        };
        let rendered = error.render();
        assert_eq!(
            rendered,
            "LexError: [line 1, col 7] Unexpected character '@'\nx = 1 @ 2;\n      ^"
        );
    }

    #[test]
    fn renders_stack_trace_innermost_first() {
        let source = Source::new("main.raf", "def g(){ return 1/0; }\nf();\n");
        let error = RafError::Runtime {
            error: RuntimeError::DivideByZero,
            span: Span::new(1, 18),
            source,
            trace: vec![
                TraceEntry {
                    function: "g".to_string(),
                    file: "main.raf".to_string(),
                    span: Span::new(1, 18),
                },
                TraceEntry {
                    function: "<script>".to_string(),
                    file: "main.raf".to_string(),
                    span: Span::new(2, 2),
                },
            ],
        };
        let rendered = error.render();
        assert!(rendered.starts_with("DivideByZero: [line 1, col 18] Division by zero"));
        let g_pos = rendered.find("at g (main.raf:1:18)").expect("g frame");
        let script_pos = rendered
            .find("at <script> (main.raf:2:2)")
            .expect("script frame");
        assert!(g_pos < script_pos);
    }
}
