//! Tree-walking execution engine.
//!
//! Walks the AST directly against an environment chain. Statement execution
//! threads an explicit [`ExecResult`] instead of unwinding, so `return`
//! propagates to the nearest call boundary without exceptions. Imports reuse
//! the whole front end recursively through the shared module cache.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{BinaryOp, Block, Expr, Program, Stmt};
use crate::errors::RafError;
use crate::parser;
use crate::runtime::builtins::{self, Builtin};
use crate::runtime::env::{Env, EnvRef};
use crate::runtime::error::{Raise, RunResult, RuntimeError};
use crate::runtime::frames::CallStack;
use crate::runtime::modules::{self, ModuleCache, ModuleCacheRef, ModuleState};
use crate::runtime::ops;
use crate::runtime::value::{FuncBody, FuncObject, Value};
use crate::runtime::{OutputSink, new_output_sink};
use crate::source::{Source, SourceRef};
use crate::token::Span;

/// Control-flow marker for statement execution.
enum ExecResult {
    Continue,
    Return(Value),
}

pub struct Interpreter {
    source: SourceRef,
    base_dir: PathBuf,
    globals: EnvRef,
    frames: CallStack,
    cache: ModuleCacheRef,
    output: OutputSink,
    max_depth: usize,
}

impl Interpreter {
    pub fn new(source: SourceRef, base_dir: PathBuf, max_depth: usize) -> Self {
        Self::with_shared(
            source,
            base_dir,
            max_depth,
            ModuleCache::shared(),
            new_output_sink(),
            "<script>",
        )
    }

    /// Used for imported modules: shares the importing engine's cache and
    /// output sink so module prints interleave and re-imports hit the cache.
    fn with_shared(
        source: SourceRef,
        base_dir: PathBuf,
        max_depth: usize,
        cache: ModuleCacheRef,
        output: OutputSink,
        script_name: &str,
    ) -> Self {
        let builtins_env = Env::root();
        builtins::install(&builtins_env);
        let globals = Env::child(&builtins_env);
        let frames = CallStack::new(max_depth, script_name, &source.name);
        Self {
            source,
            base_dir,
            globals,
            frames,
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

    /// Swaps the source shown in diagnostics; the REPL re-points this at each
    /// submitted buffer.
    pub fn set_source(&mut self, source: SourceRef) {
        self.source = source;
    }

    /// Executes a program against this interpreter's persistent globals. A
    /// top-level `return` terminates the module early.
    pub fn run(&mut self, program: &Program) -> Result<(), RafError> {
        let globals = Rc::clone(&self.globals);
        for stmt in &program.stmts {
            match self.exec_stmt(stmt, &globals) {
                Ok(ExecResult::Continue) => {}
                Ok(ExecResult::Return(_)) => break,
                Err(raise) => return Err(self.into_error(raise)),
            }
        }
        Ok(())
    }

    fn into_error(&self, raise: Raise) -> RafError {
        let fallback = self.frames.capture(&raise.source.name, raise.span);
        RafError::from_raise(raise, fallback)
    }

    fn raise(&self, error: RuntimeError, span: Span) -> Raise {
        error.at(span, &self.source)
    }

    // -------------------------
    // Statements
    // -------------------------

    fn exec_block(&mut self, block: &Block, env: &EnvRef) -> RunResult<ExecResult> {
        for stmt in &block.stmts {
            match self.exec_stmt(stmt, env)? {
                ExecResult::Continue => {}
                ExecResult::Return(value) => return Ok(ExecResult::Return(value)),
            }
        }
        Ok(ExecResult::Continue)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &EnvRef) -> RunResult<ExecResult> {
        match stmt {
            Stmt::ExprStmt { expr } => {
                self.eval_expr(expr, env)?;
                Ok(ExecResult::Continue)
            }
            Stmt::Assign { name, value, .. } => {
                let value = self.eval_expr(value, env)?;
                Env::assign(env, name, value);
                Ok(ExecResult::Continue)
            }
            Stmt::Block(block) => self.exec_block(block, env),
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                if self.eval_expr(cond, env)?.is_truthy() {
                    self.exec_block(then_block, env)
                } else if let Some(else_block) = else_block {
                    self.exec_block(else_block, env)
                } else {
                    Ok(ExecResult::Continue)
                }
            }
            Stmt::While { cond, body, .. } => {
                while self.eval_expr(cond, env)?.is_truthy() {
                    if let ExecResult::Return(value) = self.exec_block(body, env)? {
                        return Ok(ExecResult::Return(value));
                    }
                }
                Ok(ExecResult::Continue)
            }
            Stmt::FuncDecl {
                name, params, body, ..
            } => {
                let func = self.make_function(name, params, body, env);
                // `def` binds like assignment; the compiler lowers it to the
                // same STORE the VM executes.
                Env::assign(env, name, func);
                Ok(ExecResult::Continue)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Nil,
                };
                Ok(ExecResult::Return(value))
            }
            Stmt::Import { path, span } => {
                self.exec_import(path, *span)?;
                Ok(ExecResult::Continue)
            }
        }
    }

    // -------------------------
    // Expressions
    // -------------------------

    fn eval_expr(&mut self, expr: &Expr, env: &EnvRef) -> RunResult<Value> {
        match expr {
            Expr::NumberLit { value, .. } => Ok(Value::Number(*value)),
            Expr::StringLit { value, .. } => Ok(Value::string(value.clone())),
            Expr::BoolLit { value, .. } => Ok(Value::Bool(*value)),
            Expr::NilLit { .. } => Ok(Value::Nil),
            Expr::Ident { name, span } => Env::get(env, name).ok_or_else(|| {
                self.raise(
                    RuntimeError::UndefinedVariable { name: name.clone() },
                    *span,
                )
            }),
            Expr::ListLit { elems, .. } => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval_expr(elem, env)?);
                }
                Ok(Value::list(values))
            }
            Expr::Index {
                target,
                index,
                span,
            } => {
                let target = self.eval_expr(target, env)?;
                let index = self.eval_expr(index, env)?;
                ops::index(&target, &index).map_err(|error| self.raise(error, *span))
            }
            Expr::Unary { op, operand, span } => {
                let operand = self.eval_expr(operand, env)?;
                ops::unary(*op, &operand).map_err(|error| self.raise(error, *span))
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => match op {
                // Short-circuit forms yield the deciding operand unchanged.
                BinaryOp::And => {
                    let left = self.eval_expr(left, env)?;
                    if !left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval_expr(right, env)
                }
                BinaryOp::Or => {
                    let left = self.eval_expr(left, env)?;
                    if left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval_expr(right, env)
                }
                _ => {
                    let left = self.eval_expr(left, env)?;
                    let right = self.eval_expr(right, env)?;
                    ops::binary(*op, &left, &right).map_err(|error| self.raise(error, *span))
                }
            },
            Expr::Call { callee, args, span } => {
                let callee = self.eval_expr(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.call_value(&callee, values, *span)
            }
            Expr::FuncExpr { params, body, .. } => {
                Ok(self.make_function("<anonymous>", params, body, env))
            }
        }
    }

    /// Named `def` and anonymous function expressions build the same
    /// function object; only the recorded name differs.
    fn make_function(
        &self,
        name: &str,
        params: &[String],
        body: &Rc<Block>,
        env: &EnvRef,
    ) -> Value {
        Value::Function(Rc::new(FuncObject {
            name: name.to_string(),
            params: params.to_vec(),
            body: FuncBody::Ast(Rc::clone(body)),
            closure: Rc::clone(env),
            source: Rc::clone(&self.source),
        }))
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>, span: Span) -> RunResult<Value> {
        match callee {
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, span),
            Value::Function(func) => self.call_function(func, args, span),
            other => Err(self.raise(
                RuntimeError::NotCallable {
                    type_name: other.type_name(),
                },
                span,
            )),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, span: Span) -> RunResult<Value> {
        builtins::call(builtin, &args, &mut self.output.borrow_mut())
            .map_err(|error| self.raise(error, span))
    }

    fn call_function(
        &mut self,
        func: &Rc<FuncObject>,
        args: Vec<Value>,
        span: Span,
    ) -> RunResult<Value> {
        if args.len() != func.params.len() {
            return Err(self.raise(
                RuntimeError::ArityMismatch {
                    name: func.name.clone(),
                    expected: func.params.len(),
                    found: args.len(),
                },
                span,
            ));
        }
        let FuncBody::Ast(body) = &func.body else {
            // The evaluator only ever constructs AST-bodied functions.
            unreachable!("compiled function reached the tree-walking engine");
        };

        self.frames
            .push(&func.name, &self.source.name, span)
            .map_err(|error| self.raise(error, span))?;

        let local = Env::child(&func.closure);
        for (param, value) in func.params.iter().zip(args) {
            Env::define(&local, param, value);
        }

        // Body spans refer to the function's defining source.
        let caller_source = Rc::clone(&self.source);
        self.source = Rc::clone(&func.source);
        let result = self.exec_block(body, &local);
        self.source = caller_source;

        let result = result.map_err(|mut raise| {
            // First call boundary the error crosses captures the trace,
            // while every frame is still on the stack.
            if raise.trace.is_none() {
                raise.trace = Some(self.frames.capture(&raise.source.name, raise.span));
            }
            raise
        });
        self.frames.pop();

        match result? {
            ExecResult::Continue => Ok(Value::Nil),
            ExecResult::Return(value) => Ok(value),
        }
    }

    // -------------------------
    // Imports
    // -------------------------

    fn exec_import(&mut self, path: &str, span: Span) -> RunResult<()> {
        let full = modules::resolve(&self.base_dir, path)
            .map_err(|error| self.raise(error, span))?;

        let state = self.cache.borrow().state(&full);
        match state {
            Some(ModuleState::Loaded(module_env)) => {
                modules::splice(&module_env, &self.globals);
                Ok(())
            }
            Some(ModuleState::InProgress) => Err(self.raise(
                RuntimeError::ImportCycle {
                    path: path.to_string(),
                },
                span,
            )),
            None => self.load_module(path, &full, span),
        }
    }

    fn load_module(&mut self, path: &str, full: &Path, span: Span) -> RunResult<()> {
        let text = modules::read(full, path).map_err(|error| self.raise(error, span))?;
        self.cache.borrow_mut().begin(full.to_path_buf());

        let module_source = Source::new(full.to_string_lossy(), text);
        let program = match parser::parse_source(&module_source) {
            Ok(program) => program,
            Err(error) => return Err(self.fail_module(path, full, span, &error)),
        };

        let base_dir = full.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut module = Interpreter::with_shared(
            module_source,
            base_dir,
            self.max_depth,
            Rc::clone(&self.cache),
            Rc::clone(&self.output),
            "<module>",
        );
        if let Err(error) = module.run(&program) {
            return Err(self.fail_module(path, full, span, &error));
        }

        let module_env = Rc::clone(&module.globals);
        self.cache
            .borrow_mut()
            .finish(full.to_path_buf(), Rc::clone(&module_env));
        modules::splice(&module_env, &self.globals);
        Ok(())
    }

    fn fail_module(&mut self, path: &str, full: &Path, span: Span, error: &RafError) -> Raise {
        self.cache.borrow_mut().abandon(full);
        self.raise(
            RuntimeError::ImportFailed {
                path: path.to_string(),
                message: error.render(),
            },
            span,
        )
    }
}
