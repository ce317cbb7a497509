//! Line-buffered REPL over the tree-walking evaluator.
//!
//! Input accumulates until the trimmed buffer ends in `;` or `}`, then the
//! whole buffer is lexed, parsed, and executed against a persistent global
//! environment. Diagnostics print without ending the session.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::interpreter::Interpreter;
use crate::parser;
use crate::runtime::frames::DEFAULT_MAX_CALL_DEPTH;
use crate::source::Source;

pub fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    run_session(&mut stdin.lock(), &mut stdout)
}

fn run_session<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "raf repl. End statements with ';'. Use {{ }} for blocks. Type 'quit' to exit."
    )?;

    let mut interpreter = Interpreter::new(
        Source::new("<repl>", ""),
        PathBuf::from("."),
        DEFAULT_MAX_CALL_DEPTH,
    );
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        write!(out, "{prompt}")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }

        if buffer.is_empty() && matches!(line.trim(), "quit" | "exit") {
            return Ok(());
        }

        buffer.push_str(&line);
        let trimmed = buffer.trim();
        if trimmed.is_empty() {
            buffer.clear();
            continue;
        }
        if !(trimmed.ends_with(';') || trimmed.ends_with('}')) {
            continue;
        }

        submit(&mut interpreter, &buffer, out)?;
        buffer.clear();
    }
}

fn submit<W: Write>(interpreter: &mut Interpreter, buffer: &str, out: &mut W) -> io::Result<()> {
    let source = Source::new("<repl>", buffer);
    interpreter.set_source(source.clone());

    match parser::parse_source(&source) {
        Ok(program) => {
            let result = interpreter.run(&program);
            for line in interpreter.take_output() {
                writeln!(out, "{line}")?;
            }
            if let Err(error) = result {
                writeln!(out, "{}", error.render())?;
            }
        }
        Err(error) => writeln!(out, "{}", error.render())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(input: &str) -> String {
        let mut reader = io::Cursor::new(input.to_string());
        let mut out = Vec::new();
        run_session(&mut reader, &mut out).expect("session should not fail");
        String::from_utf8(out).expect("utf8 output")
    }

    #[test]
    fn evaluates_complete_statements() {
        let output = session("print(1 + 2);\nquit\n");
        assert!(output.contains("3\n"));
    }

    #[test]
    fn bindings_persist_across_submissions() {
        let output = session("x = 21;\nprint(x + x);\nquit\n");
        assert!(output.contains("42\n"));
    }

    #[test]
    fn buffers_until_a_statement_terminator() {
        let output = session("def twice(n) {\nreturn n + n;\n}\nprint(twice(4));\nquit\n");
        assert!(output.contains("8\n"));
        // The continuation prompt appeared while the def was open.
        assert!(output.contains("... "));
    }

    #[test]
    fn errors_do_not_end_the_session() {
        let output = session("missing;\nprint(\"still here\");\nquit\n");
        assert!(output.contains("NameError"));
        assert!(output.contains("still here\n"));
    }

    #[test]
    fn eof_ends_the_session() {
        let output = session("print(5);\n");
        assert!(output.contains("5\n"));
    }
}
