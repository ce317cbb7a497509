use crate::runtime::env::{Env, EnvRef};
use crate::runtime::error::RuntimeError;
use crate::runtime::value::Value;

/// The fixed set of global built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Str,
    Num,
}

pub const ALL: [Builtin; 4] = [Builtin::Print, Builtin::Len, Builtin::Str, Builtin::Num];

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Num => "num",
        }
    }

    /// Required argument count; `None` means variadic.
    pub fn arity(self) -> Option<usize> {
        match self {
            Builtin::Print => None,
            Builtin::Len | Builtin::Str | Builtin::Num => Some(1),
        }
    }
}

/// Seeds every builtin into `env`. Each module's global environment gets a
/// dedicated builtins parent, so exports never include these and a module
/// shadowing one cannot affect other modules.
pub fn install(env: &EnvRef) {
    for builtin in ALL {
        Env::define(env, builtin.name(), Value::Builtin(builtin));
    }
}

/// Runs a builtin, validating arity first. `print` appends one line to the
/// shared output sink.
pub fn call(builtin: Builtin, args: &[Value], output: &mut Vec<String>) -> Result<Value, RuntimeError> {
    if let Some(expected) = builtin.arity() {
        if args.len() != expected {
            return Err(RuntimeError::ArityMismatch {
                name: builtin.name().to_string(),
                expected,
                found: args.len(),
            });
        }
    }
    match builtin {
        Builtin::Print => {
            let rendered = args.iter().map(Value::to_output).collect::<Vec<_>>();
            output.push(rendered.join(" "));
            Ok(Value::Nil)
        }
        Builtin::Len => match &args[0] {
            Value::Str(text) => Ok(Value::Number(text.chars().count() as f64)),
            Value::List(values) => Ok(Value::Number(values.borrow().len() as f64)),
            other => Err(RuntimeError::InvalidArgument {
                function: "len",
                expected: "a string or list",
                got: other.type_name(),
            }),
        },
        Builtin::Str => Ok(Value::string(args[0].to_output())),
        Builtin::Num => match &args[0] {
            Value::Str(text) => text
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| RuntimeError::InvalidNumber {
                    text: text.to_string(),
                }),
            other => Err(RuntimeError::InvalidArgument {
                function: "num",
                expected: "a string",
                got: other.type_name(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_one(builtin: Builtin, arg: Value) -> Result<Value, RuntimeError> {
        let mut output = Vec::new();
        call(builtin, &[arg], &mut output)
    }

    #[test]
    fn print_joins_arguments_with_spaces() {
        let mut output = Vec::new();
        let result = call(
            Builtin::Print,
            &[Value::Number(1.0), Value::string("two"), Value::Nil],
            &mut output,
        )
        .expect("print");
        assert!(matches!(result, Value::Nil));
        assert_eq!(output, vec!["1 two nil".to_string()]);
    }

    #[test]
    fn len_counts_characters_and_elements() {
        let length = call_one(Builtin::Len, Value::string("héllo")).expect("len");
        assert_eq!(length.to_output(), "5");

        let length = call_one(
            Builtin::Len,
            Value::list(vec![Value::Nil, Value::Nil]),
        )
        .expect("len");
        assert_eq!(length.to_output(), "2");

        let err = call_one(Builtin::Len, Value::Number(3.0)).expect_err("len of number");
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn str_uses_print_formatting() {
        let text = call_one(Builtin::Str, Value::Number(3.0)).expect("str");
        assert_eq!(text.to_output(), "3");
        let text = call_one(Builtin::Str, Value::Bool(false)).expect("str");
        assert_eq!(text.to_output(), "false");
    }

    #[test]
    fn num_parses_strings_and_rejects_garbage() {
        let value = call_one(Builtin::Num, Value::string(" 2.5 ")).expect("num");
        assert_eq!(value.to_output(), "2.5");

        let err = call_one(Builtin::Num, Value::string("abc")).expect_err("bad number");
        assert_eq!(
            err,
            RuntimeError::InvalidNumber {
                text: "abc".to_string(),
            }
        );

        let err = call_one(Builtin::Num, Value::Nil).expect_err("non-string");
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn install_defines_every_builtin() {
        let env = Env::root();
        install(&env);
        for builtin in ALL {
            assert!(Env::get(&env, builtin.name()).is_some());
        }
    }
}
