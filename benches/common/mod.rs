#![allow(dead_code)]

use raf::ast::Program;
use raf::{lexer, parser};

pub const FIB: &str = "\
def fib(n) {
    if (n < 2) { return n; }
    return fib(n - 1) + fib(n - 2);
}
print(fib(15));
";

pub const LOOP_SUM: &str = "\
total = 0;
i = 0;
while (i < 2000) {
    total = total + i % 7;
    i = i + 1;
}
print(total);
";

pub fn workloads() -> Vec<(&'static str, &'static str)> {
    vec![("fib", FIB), ("loop_sum", LOOP_SUM)]
}

pub fn parse(source: &str) -> Program {
    let tokens = lexer::tokenize(source).unwrap_or_else(|err| panic!("tokenize: {err}"));
    parser::parse_tokens(tokens).unwrap_or_else(|err| panic!("parse: {err}"))
}
