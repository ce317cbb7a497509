//! Bytecode execution engine.
//!
//! A stack machine over [`Chunk`]s: one operand stack shared by all frames,
//! plus an explicit frame stack holding each call's chunk, instruction
//! pointer, and environment. Operator semantics come from `runtime::ops`,
//! the same helpers the tree-walking engine uses; errors map the live frame
//! stack through each chunk's span table into the same stack-trace shape.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::bytecode::{Chunk, Const, Op};
use crate::compiler::compile_program;
use crate::errors::RafError;
use crate::parser;
use crate::runtime::builtins::{self, Builtin};
use crate::runtime::env::{Env, EnvRef};
use crate::runtime::error::RuntimeError;
use crate::runtime::frames::TraceEntry;
use crate::runtime::modules::{self, ModuleCache, ModuleCacheRef, ModuleState};
use crate::runtime::ops;
use crate::runtime::value::{FuncBody, FuncObject, Value};
use crate::runtime::{OutputSink, new_output_sink};
use crate::source::Source;
use crate::token::Span;

struct Frame {
    func_name: String,
    chunk: Rc<Chunk>,
    ip: usize,
    env: EnvRef,
}

pub struct Vm {
    base_dir: PathBuf,
    globals: EnvRef,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    cache: ModuleCacheRef,
    output: OutputSink,
    max_depth: usize,
}

impl Vm {
    pub fn new(base_dir: PathBuf, max_depth: usize) -> Self {
        Self::with_shared(base_dir, max_depth, ModuleCache::shared(), new_output_sink())
    }

    fn with_shared(
        base_dir: PathBuf,
        max_depth: usize,
        cache: ModuleCacheRef,
        output: OutputSink,
    ) -> Self {
        let builtins_env = Env::root();
        builtins::install(&builtins_env);
        let globals = Env::child(&builtins_env);
        Self {
            base_dir,
            globals,
            stack: Vec::new(),
            frames: Vec::new(),
            cache,
            output,
            max_depth,
        }
    }

    pub fn output(&self) -> OutputSink {
        Rc::clone(&self.output)
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.output.borrow_mut().drain(..).collect()
    }

    /// Executes a script chunk to completion. The module's top-level code
    /// runs directly in the global environment so definitions are visible to
    /// importers.
    pub fn run(&mut self, chunk: Rc<Chunk>) -> Result<(), RafError> {
        self.stack.clear();
        self.frames = vec![Frame {
            func_name: chunk.name.clone(),
            chunk,
            ip: 0,
            env: Rc::clone(&self.globals),
        }];

        while let Some(frame) = self.frames.last_mut() {
            if frame.ip >= frame.chunk.code.len() {
                // Chunks end in RETURN; running off the end behaves the same.
                self.frames.pop();
                if self.frames.is_empty() {
                    break;
                }
                self.stack.push(Value::Nil);
                continue;
            }

            let op = frame.chunk.code[frame.ip];
            let span = frame.chunk.spans[frame.ip];
            frame.ip += 1;

            if let Err(error) = self.step(op) {
                return Err(self.fail(error, span));
            }
        }
        Ok(())
    }

    fn step(&mut self, op: Op) -> Result<(), RuntimeError> {
        match op {
            Op::Const(k) => {
                let value = self.const_value(k);
                self.stack.push(value);
            }
            Op::Load(k) => {
                let (loaded, name) = {
                    let frame = self.frame();
                    let name = frame.chunk.names[k].clone();
                    (Env::get(&frame.env, &name), name)
                };
                match loaded {
                    Some(value) => self.stack.push(value),
                    None => return Err(RuntimeError::UndefinedVariable { name }),
                }
            }
            Op::Store(k) => {
                let value = self.pop();
                let frame = self.frame();
                let name = frame.chunk.names[k].clone();
                Env::assign(&frame.env, &name, value);
            }
            Op::Pop => {
                self.pop();
            }
            Op::Neg => {
                let operand = self.pop();
                self.stack.push(ops::unary(UnaryOp::Neg, &operand)?);
            }
            Op::Not => {
                let operand = self.pop();
                self.stack.push(ops::unary(UnaryOp::Not, &operand)?);
            }
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Eq
            | Op::NotEq
            | Op::Less
            | Op::LessEq
            | Op::Greater
            | Op::GreaterEq => {
                let right = self.pop();
                let left = self.pop();
                let result = ops::binary(binary_op(op), &left, &right)?;
                self.stack.push(result);
            }
            Op::Jump(offset) => self.jump(offset),
            Op::JumpIfFalse(offset) => {
                let cond = self.pop();
                if !cond.is_truthy() {
                    self.jump(offset);
                }
            }
            Op::JumpIfFalseKeep(offset) => {
                if !self.peek().is_truthy() {
                    self.jump(offset);
                }
            }
            Op::JumpIfTrueKeep(offset) => {
                if self.peek().is_truthy() {
                    self.jump(offset);
                }
            }
            Op::BuildList(count) => {
                let elems = self.stack.split_off(self.stack.len() - count);
                self.stack.push(Value::list(elems));
            }
            Op::Index => {
                let index = self.pop();
                let target = self.pop();
                self.stack.push(ops::index(&target, &index)?);
            }
            Op::MakeFunc(k) => {
                debug_assert!(matches!(self.frame().chunk.consts[k], Const::Func(_)));
                let value = self.const_value(k);
                self.stack.push(value);
            }
            Op::Call(argc) => self.call(argc)?,
            Op::Return => {
                let value = self.pop();
                self.frames.pop();
                if !self.frames.is_empty() {
                    self.stack.push(value);
                }
            }
            Op::Import(k) => {
                let Const::Str(path) = self.frame().chunk.consts[k].clone() else {
                    unreachable!("IMPORT operand must be a string constant");
                };
                self.exec_import(&path)?;
            }
        }
        Ok(())
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let args = self.stack.split_off(self.stack.len() - argc);
        let callee = self.pop();
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, &args),
            Value::Function(func) => self.call_function(&func, args),
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
            }),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<(), RuntimeError> {
        let result = builtins::call(builtin, args, &mut self.output.borrow_mut())?;
        self.stack.push(result);
        Ok(())
    }

    fn call_function(&mut self, func: &Rc<FuncObject>, args: Vec<Value>) -> Result<(), RuntimeError> {
        if args.len() != func.params.len() {
            return Err(RuntimeError::ArityMismatch {
                name: func.name.clone(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        if self.frames.len() >= self.max_depth {
            return Err(RuntimeError::StackOverflow {
                limit: self.max_depth,
            });
        }
        let FuncBody::Chunk(chunk) = &func.body else {
            // The VM only ever closes over compiled chunks.
            unreachable!("AST-bodied function reached the bytecode engine");
        };

        let env = Env::child(&func.closure);
        for (param, value) in func.params.iter().zip(args) {
            Env::define(&env, param, value);
        }
        self.frames.push(Frame {
            func_name: func.name.clone(),
            chunk: Rc::clone(chunk),
            ip: 0,
            env,
        });
        Ok(())
    }

    fn exec_import(&mut self, path: &str) -> Result<(), RuntimeError> {
        let full = modules::resolve(&self.base_dir, path)?;

        let state = self.cache.borrow().state(&full);
        match state {
            Some(ModuleState::Loaded(module_env)) => {
                modules::splice(&module_env, &self.globals);
                Ok(())
            }
            Some(ModuleState::InProgress) => Err(RuntimeError::ImportCycle {
                path: path.to_string(),
            }),
            None => self.load_module(path, &full),
        }
    }

    fn load_module(&mut self, path: &str, full: &Path) -> Result<(), RuntimeError> {
        let text = modules::read(full, path)?;
        self.cache.borrow_mut().begin(full.to_path_buf());

        let module_source = Source::new(full.to_string_lossy(), text);
        let program = match parser::parse_source(&module_source) {
            Ok(program) => program,
            Err(error) => return Err(self.fail_module(path, full, &error)),
        };
        let chunk = compile_program(&program, "<module>", &module_source);

        let base_dir = full.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut module = Vm::with_shared(
            base_dir,
            self.max_depth,
            Rc::clone(&self.cache),
            Rc::clone(&self.output),
        );
        if let Err(error) = module.run(Rc::new(chunk)) {
            return Err(self.fail_module(path, full, &error));
        }

        let module_env = Rc::clone(&module.globals);
        self.cache
            .borrow_mut()
            .finish(full.to_path_buf(), Rc::clone(&module_env));
        modules::splice(&module_env, &self.globals);
        Ok(())
    }

    fn fail_module(&mut self, path: &str, full: &Path, error: &RafError) -> RuntimeError {
        self.cache.borrow_mut().abandon(full);
        RuntimeError::ImportFailed {
            path: path.to_string(),
            message: error.render(),
        }
    }

    // -------------------------
    // Frame and stack plumbing
    // -------------------------

    fn frame(&self) -> &Frame {
        self.frames.last().expect("an active frame")
    }

    fn jump(&mut self, offset: isize) {
        let frame = self.frames.last_mut().expect("an active frame");
        let target = frame.ip as isize + offset;
        debug_assert!(target >= 0 && target as usize <= frame.chunk.code.len());
        frame.ip = target as usize;
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand on the stack")
    }

    fn peek(&self) -> &Value {
        self.stack.last().expect("operand on the stack")
    }

    fn const_value(&self, k: usize) -> Value {
        let frame = self.frame();
        match &frame.chunk.consts[k] {
            Const::Number(value) => Value::Number(*value),
            Const::Str(value) => Value::string(value.clone()),
            Const::Bool(value) => Value::Bool(*value),
            Const::Nil => Value::Nil,
            Const::Func(proto) => Value::Function(Rc::new(FuncObject {
                name: proto.name.clone(),
                params: proto.params.clone(),
                body: FuncBody::Chunk(Rc::clone(&proto.chunk)),
                closure: Rc::clone(&frame.env),
                source: proto.chunk.source.clone(),
            })),
        }
    }

    /// Maps the live frame stack through each chunk's span table: every frame
    /// shows the instruction it is currently executing, which for callers is
    /// the CALL site and for the innermost frame the error site.
    fn capture_trace(&self) -> Vec<TraceEntry> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let at = frame.ip.saturating_sub(1).min(frame.chunk.spans.len() - 1);
                TraceEntry {
                    function: frame.func_name.clone(),
                    file: frame.chunk.source.name.clone(),
                    span: frame.chunk.spans[at],
                }
            })
            .collect()
    }

    fn fail(&self, error: RuntimeError, span: Span) -> RafError {
        RafError::Runtime {
            error,
            span,
            source: self.frame().chunk.source.clone(),
            trace: self.capture_trace(),
        }
    }
}

fn binary_op(op: Op) -> BinaryOp {
    match op {
        Op::Add => BinaryOp::Add,
        Op::Sub => BinaryOp::Sub,
        Op::Mul => BinaryOp::Mul,
        Op::Div => BinaryOp::Div,
        Op::Mod => BinaryOp::Mod,
        Op::Eq => BinaryOp::Eq,
        Op::NotEq => BinaryOp::NotEq,
        Op::Less => BinaryOp::Less,
        Op::LessEq => BinaryOp::LessEq,
        Op::Greater => BinaryOp::Greater,
        Op::GreaterEq => BinaryOp::GreaterEq,
        other => unreachable!("not a binary opcode: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frames::DEFAULT_MAX_CALL_DEPTH;
    use indoc::indoc;
    use std::fs;

    fn vm_for(input: &str, base_dir: PathBuf, max_depth: usize) -> (Vm, Rc<Chunk>) {
        let source = Source::new("test.raf", input);
        let program = parser::parse_source(&source).expect("frontend should succeed");
        let chunk = compile_program(&program, "<script>", &source);
        (Vm::new(base_dir, max_depth), Rc::new(chunk))
    }

    fn run_in(base_dir: PathBuf, input: &str) -> Result<Vec<String>, RafError> {
        let (mut vm, chunk) = vm_for(input, base_dir, DEFAULT_MAX_CALL_DEPTH);
        vm.run(chunk)?;
        assert!(vm.stack.is_empty(), "operand stack should drain");
        Ok(vm.take_output())
    }

    fn run(input: &str) -> Result<Vec<String>, RafError> {
        run_in(PathBuf::from("."), input)
    }

    fn run_ok(input: &str) -> Vec<String> {
        run(input).expect("program should succeed")
    }

    #[test]
    fn executes_arithmetic_and_branches() {
        let output = run_ok(indoc! {r#"
            x = 3;
            y = 4;
            if (x + y == 7) { print("ok"); } else { print("no"); }
        "#});
        assert_eq!(output, vec!["ok"]);
    }

    #[test]
    fn while_loop_counts_up() {
        let output = run_ok("i = 0; while (i < 3) { print(i); i = i + 1; }");
        assert_eq!(output, vec!["0", "1", "2"]);
    }

    #[test]
    fn closures_capture_the_defining_frame_environment() {
        let output = run_ok(indoc! {"
            def mk(x) {
                def add(y) { return x + y; }
                return add;
            }
            a = mk(5);
            print(a(3));
            print(a(10));
        "});
        assert_eq!(output, vec!["8", "15"]);
    }

    #[test]
    fn keep_jumps_leave_the_deciding_operand() {
        let output = run_ok(indoc! {r#"
            print(0 or "x");
            print(1 and "y");
            print(false or nil);
        "#});
        assert_eq!(output, vec!["x", "y", "nil"]);
    }

    #[test]
    fn builds_and_indexes_lists() {
        let output = run_ok(indoc! {"
            L = [10, 20, 30];
            print(L[0] + L[2]);
            print(len(L));
        "});
        assert_eq!(output, vec!["40", "3"]);
    }

    #[test]
    fn function_calls_push_and_pop_frames() {
        let output = run_ok(indoc! {"
            def fib(n) {
                if (n < 2) { return n; }
                return fib(n - 1) + fib(n - 2);
            }
            print(fib(12));
        "});
        assert_eq!(output, vec!["144"]);
    }

    #[test]
    fn operand_stack_is_empty_after_each_statement() {
        let input = "x = 1; x + 2; if (x) { x; } [x, 2]; def f() { } f();";
        let source = Source::new("test.raf", input);
        let program = parser::parse_source(&source).expect("frontend should succeed");

        // Run statement by statement; the stack must drain at every boundary.
        for end in 1..=program.stmts.len() {
            let prefix = crate::ast::Program {
                stmts: program.stmts[..end].to_vec(),
            };
            let chunk = compile_program(&prefix, "<script>", &source);
            let mut vm = Vm::new(PathBuf::from("."), DEFAULT_MAX_CALL_DEPTH);
            vm.run(Rc::new(chunk)).expect("prefix should run");
            assert!(vm.stack.is_empty(), "stack not empty after {end} stmts");
        }
    }

    #[test]
    fn top_level_return_halts_the_script() {
        let output = run_ok("print(1); return; print(2);");
        assert_eq!(output, vec!["1"]);
    }

    #[test]
    fn executes_anonymous_function_descriptors() {
        use crate::ast::{Block, Expr, Program, Stmt};

        // Built by hand: the surface grammar has no anonymous form.
        let span = Span::default();
        let body = Rc::new(Block {
            stmts: vec![Stmt::Return {
                value: Some(Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(Expr::Ident {
                        name: "x".to_string(),
                        span,
                    }),
                    right: Box::new(Expr::Ident {
                        name: "x".to_string(),
                        span,
                    }),
                    span,
                }),
                span,
            }],
            span,
        });
        let program = Program {
            stmts: vec![Stmt::ExprStmt {
                expr: Expr::Call {
                    callee: Box::new(Expr::Ident {
                        name: "print".to_string(),
                        span,
                    }),
                    args: vec![Expr::Call {
                        callee: Box::new(Expr::FuncExpr {
                            params: vec!["x".to_string()],
                            body,
                            span,
                        }),
                        args: vec![Expr::NumberLit { value: 21.0, span }],
                        span,
                    }],
                    span,
                },
            }],
        };

        let source = Source::new("test.raf", "");
        let chunk = compile_program(&program, "<script>", &source);
        let mut vm = Vm::new(PathBuf::from("."), DEFAULT_MAX_CALL_DEPTH);
        vm.run(Rc::new(chunk)).expect("program should succeed");
        assert!(vm.stack.is_empty());
        assert_eq!(vm.take_output(), vec!["42"]);
    }

    #[test]
    fn divide_by_zero_reports_the_frame_stack() {
        let err = run(indoc! {"
            def f() { return g(); }
            def g() { return 1 / 0; }
            f();
        "})
        .expect_err("expected divide by zero");
        assert_eq!(err.kind_name(), "DivideByZero");
        let rendered = err.render();
        let g_pos = rendered.find("at g (").expect("g frame");
        let f_pos = rendered.find("at f (").expect("f frame");
        let script_pos = rendered.find("at <script> (").expect("script frame");
        assert!(g_pos < f_pos && f_pos < script_pos);
    }

    #[test]
    fn deep_recursion_overflows_the_frame_stack() {
        let (mut vm, chunk) = vm_for(
            "def loop() { return loop(); } loop();",
            PathBuf::from("."),
            64,
        );
        let err = vm.run(chunk).expect_err("expected stack overflow");
        assert_eq!(err.kind_name(), "StackOverflow");
    }

    #[test]
    fn name_errors_surface_with_spans() {
        let err = run("x = missing;").expect_err("expected name error");
        assert_eq!(err.kind_name(), "NameError");
        assert!(err.render().contains("Undefined variable 'missing'"));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let err = run("x = 1; x();").expect_err("expected type error");
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn imports_execute_once_and_splice_bindings() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("m.raf"),
            "print(\"loaded\");\ndef sq(x) { return x * x; }\n",
        )
        .expect("write module");

        let output = run_in(
            dir.path().to_path_buf(),
            indoc! {r#"
                import "m.raf";
                import "m.raf";
                print(sq(4));
            "#},
        )
        .expect("program should succeed");
        assert_eq!(output, vec!["loaded", "16"]);
    }

    #[test]
    fn cyclic_imports_fail_with_import_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.raf"), "import \"b.raf\";\n").expect("write a");
        fs::write(dir.path().join("b.raf"), "import \"a.raf\";\n").expect("write b");

        let err = run_in(dir.path().to_path_buf(), "import \"a.raf\";")
            .expect_err("expected cyclic import error");
        assert_eq!(err.kind_name(), "ImportError");
        assert!(err.render().contains("Cyclic import"));
    }
}
