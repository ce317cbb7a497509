//! AST → bytecode lowering.
//!
//! Each function body compiles into its own [`Chunk`]; the enclosing chunk
//! references it through a function-descriptor constant and `MakeFunc`.
//! Every chunk ends with an implicit `CONST nil; RETURN` so falling off the
//! end of a body and an explicit `return` unwind the same way.

use std::rc::Rc;

use crate::ast::{BinaryOp, Block, Expr, Program, Stmt, UnaryOp};
use crate::bytecode::{Chunk, Const, FuncProto, Op};
use crate::source::SourceRef;
use crate::token::Span;

pub struct Compiler {
    chunk: Chunk,
}

/// Compiles a whole program into the script chunk.
pub fn compile_program(program: &Program, name: &str, source: &SourceRef) -> Chunk {
    let mut compiler = Compiler::new(name, source);
    for stmt in &program.stmts {
        compiler.stmt(stmt);
    }
    compiler.finish()
}

impl Compiler {
    fn new(name: &str, source: &SourceRef) -> Self {
        Self {
            chunk: Chunk::new(name, source.clone()),
        }
    }

    fn finish(mut self) -> Chunk {
        let end = Span::default();
        let nil = self.chunk.add_const(Const::Nil);
        self.chunk.emit(Op::Const(nil), end);
        self.chunk.emit(Op::Return, end);
        self.chunk
    }

    // -------------------------
    // Statements
    // -------------------------

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::ExprStmt { expr } => {
                self.expr(expr);
                self.chunk.emit(Op::Pop, expr.span());
            }
            Stmt::Assign { name, value, span } => {
                self.expr(value);
                let name = self.chunk.add_name(name);
                self.chunk.emit(Op::Store(name), *span);
            }
            Stmt::Block(block) => self.block(block),
            Stmt::If {
                cond,
                then_block,
                else_block,
                span,
            } => {
                self.expr(cond);
                let to_else = self.chunk.emit(Op::JumpIfFalse(0), *span);
                self.block(then_block);
                match else_block {
                    Some(else_block) => {
                        let to_end = self.chunk.emit(Op::Jump(0), *span);
                        self.chunk.patch_jump_to_here(to_else);
                        self.block(else_block);
                        self.chunk.patch_jump_to_here(to_end);
                    }
                    None => self.chunk.patch_jump_to_here(to_else),
                }
            }
            Stmt::While { cond, body, span } => {
                let loop_start = self.chunk.code.len();
                self.expr(cond);
                let to_end = self.chunk.emit(Op::JumpIfFalse(0), *span);
                self.block(body);
                let back = self.chunk.loop_offset(loop_start);
                self.chunk.emit(Op::Jump(back), *span);
                self.chunk.patch_jump_to_here(to_end);
            }
            Stmt::FuncDecl {
                name,
                params,
                body,
                span,
            } => {
                let proto = self.function_proto(name, params, body);
                let k = self.chunk.add_const(Const::Func(Rc::new(proto)));
                self.chunk.emit(Op::MakeFunc(k), *span);
                let name = self.chunk.add_name(name);
                self.chunk.emit(Op::Store(name), *span);
            }
            Stmt::Return { value, span } => {
                match value {
                    Some(value) => self.expr(value),
                    None => {
                        let nil = self.chunk.add_const(Const::Nil);
                        self.chunk.emit(Op::Const(nil), *span);
                    }
                }
                self.chunk.emit(Op::Return, *span);
            }
            Stmt::Import { path, span } => {
                let k = self.chunk.add_const(Const::Str(path.clone()));
                self.chunk.emit(Op::Import(k), *span);
            }
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
    }

    fn function_proto(&self, name: &str, params: &[String], body: &Block) -> FuncProto {
        let mut inner = Compiler::new(&format!("<fn {name}>"), &self.chunk.source);
        inner.block(body);
        FuncProto {
            name: name.to_string(),
            params: params.to_vec(),
            chunk: Rc::new(inner.finish()),
        }
    }

    // -------------------------
    // Expressions
    // -------------------------

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::NumberLit { value, span } => {
                let k = self.chunk.add_const(Const::Number(*value));
                self.chunk.emit(Op::Const(k), *span);
            }
            Expr::StringLit { value, span } => {
                let k = self.chunk.add_const(Const::Str(value.clone()));
                self.chunk.emit(Op::Const(k), *span);
            }
            Expr::BoolLit { value, span } => {
                let k = self.chunk.add_const(Const::Bool(*value));
                self.chunk.emit(Op::Const(k), *span);
            }
            Expr::NilLit { span } => {
                let k = self.chunk.add_const(Const::Nil);
                self.chunk.emit(Op::Const(k), *span);
            }
            Expr::Ident { name, span } => {
                let name = self.chunk.add_name(name);
                self.chunk.emit(Op::Load(name), *span);
            }
            Expr::ListLit { elems, span } => {
                for elem in elems {
                    self.expr(elem);
                }
                self.chunk.emit(Op::BuildList(elems.len()), *span);
            }
            Expr::Index {
                target,
                index,
                span,
            } => {
                self.expr(target);
                self.expr(index);
                self.chunk.emit(Op::Index, *span);
            }
            Expr::Unary { op, operand, span } => {
                self.expr(operand);
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.chunk.emit(op, *span);
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => match op {
                BinaryOp::And => {
                    self.expr(left);
                    let skip = self.chunk.emit(Op::JumpIfFalseKeep(0), *span);
                    self.chunk.emit(Op::Pop, *span);
                    self.expr(right);
                    self.chunk.patch_jump_to_here(skip);
                }
                BinaryOp::Or => {
                    self.expr(left);
                    let skip = self.chunk.emit(Op::JumpIfTrueKeep(0), *span);
                    self.chunk.emit(Op::Pop, *span);
                    self.expr(right);
                    self.chunk.patch_jump_to_here(skip);
                }
                _ => {
                    self.expr(left);
                    self.expr(right);
                    let op = match op {
                        BinaryOp::Add => Op::Add,
                        BinaryOp::Sub => Op::Sub,
                        BinaryOp::Mul => Op::Mul,
                        BinaryOp::Div => Op::Div,
                        BinaryOp::Mod => Op::Mod,
                        BinaryOp::Eq => Op::Eq,
                        BinaryOp::NotEq => Op::NotEq,
                        BinaryOp::Less => Op::Less,
                        BinaryOp::LessEq => Op::LessEq,
                        BinaryOp::Greater => Op::Greater,
                        BinaryOp::GreaterEq => Op::GreaterEq,
                        BinaryOp::And | BinaryOp::Or => unreachable!("lowered above"),
                    };
                    self.chunk.emit(op, *span);
                }
            },
            Expr::Call { callee, args, span } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
                self.chunk.emit(Op::Call(args.len()), *span);
            }
            Expr::FuncExpr { params, body, span } => {
                let proto = self.function_proto("<anonymous>", params, body);
                let k = self.chunk.add_const(Const::Func(Rc::new(proto)));
                self.chunk.emit(Op::MakeFunc(k), *span);
            }
        }
    }
}
