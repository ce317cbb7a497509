use std::rc::Rc;

use thiserror::Error;

use crate::ast::{BinaryOp, Block, Expr, Program, Stmt, UnaryOp};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Binding powers for the Pratt expression grammar. Infix operators share a
/// table; call and index are the highest-power left denotations.
const BP_OR: u8 = 10;
const BP_AND: u8 = 20;
const BP_NOT: u8 = 30;
const BP_EQUALITY: u8 = 40;
const BP_COMPARISON: u8 = 50;
const BP_TERM: u8 = 60;
const BP_FACTOR: u8 = 70;
const BP_UNARY: u8 = 80;
const BP_POSTFIX: u8 = 90;

fn infix_rule(kind: TokenKind) -> Option<(u8, BinaryOp)> {
    let rule = match kind {
        TokenKind::Or => (BP_OR, BinaryOp::Or),
        TokenKind::And => (BP_AND, BinaryOp::And),
        TokenKind::EqEq => (BP_EQUALITY, BinaryOp::Eq),
        TokenKind::NotEq => (BP_EQUALITY, BinaryOp::NotEq),
        TokenKind::Less => (BP_COMPARISON, BinaryOp::Less),
        TokenKind::LessEq => (BP_COMPARISON, BinaryOp::LessEq),
        TokenKind::Greater => (BP_COMPARISON, BinaryOp::Greater),
        TokenKind::GreaterEq => (BP_COMPARISON, BinaryOp::GreaterEq),
        TokenKind::Plus => (BP_TERM, BinaryOp::Add),
        TokenKind::Minus => (BP_TERM, BinaryOp::Sub),
        TokenKind::Star => (BP_FACTOR, BinaryOp::Mul),
        TokenKind::Slash => (BP_FACTOR, BinaryOp::Div),
        TokenKind::Percent => (BP_FACTOR, BinaryOp::Mod),
        _ => return None,
    };
    Some(rule)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::eof(Span::default()));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            stmts.push(self.statement()?);
        }
        Ok(Program { stmts })
    }

    // -------------------------
    // Statements
    // -------------------------

    fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            TokenKind::If => self.if_stmt(),
            TokenKind::While => self.while_stmt(),
            TokenKind::Def => self.def_stmt(),
            TokenKind::Return => self.return_stmt(),
            TokenKind::Import => self.import_stmt(),
            TokenKind::Ident if self.peek_second_kind() == TokenKind::Eq => self.assign_stmt(),
            _ => {
                let expr = self.expression()?;
                self.expect(TokenKind::Semi, "Expected ';' after expression")?;
                Ok(Stmt::ExprStmt { expr })
            }
        }
    }

    fn block(&mut self) -> ParseResult<Block> {
        let lbrace = self.expect(TokenKind::LBrace, "Expected '{' to start block")?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.at_end() {
                return Err(self.error("Unterminated block (missing '}')"));
            }
            stmts.push(self.statement()?);
        }
        self.expect(TokenKind::RBrace, "Expected '}' after block")?;
        Ok(Block {
            stmts,
            span: lbrace.span,
        })
    }

    fn if_stmt(&mut self) -> ParseResult<Stmt> {
        let if_tok = self.advance();
        self.expect(TokenKind::LParen, "Expected '(' after if")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen, "Expected ')' after if condition")?;
        let then_block = self.block()?;
        let else_block = if self.matches(TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span: if_tok.span,
        })
    }

    fn while_stmt(&mut self) -> ParseResult<Stmt> {
        let while_tok = self.advance();
        self.expect(TokenKind::LParen, "Expected '(' after while")?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen, "Expected ')' after while condition")?;
        let body = self.block()?;
        Ok(Stmt::While {
            cond,
            body,
            span: while_tok.span,
        })
    }

    fn def_stmt(&mut self) -> ParseResult<Stmt> {
        let def_tok = self.advance();
        let name = self
            .expect(TokenKind::Ident, "Expected function name after def")?
            .lexeme;
        self.expect(TokenKind::LParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.expect(TokenKind::Ident, "Expected parameter name")?;
                params.push(param.lexeme);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after parameters")?;
        let body = self.block()?;
        Ok(Stmt::FuncDecl {
            name,
            params,
            body: Rc::new(body),
            span: def_tok.span,
        })
    }

    fn return_stmt(&mut self) -> ParseResult<Stmt> {
        let return_tok = self.advance();
        if self.matches(TokenKind::Semi) {
            return Ok(Stmt::Return {
                value: None,
                span: return_tok.span,
            });
        }
        let value = self.expression()?;
        self.expect(TokenKind::Semi, "Expected ';' after return value")?;
        Ok(Stmt::Return {
            value: Some(value),
            span: return_tok.span,
        })
    }

    fn import_stmt(&mut self) -> ParseResult<Stmt> {
        let import_tok = self.advance();
        let path = self
            .expect(TokenKind::Str, "Expected string path after import")?
            .lexeme;
        self.expect(TokenKind::Semi, "Expected ';' after import")?;
        Ok(Stmt::Import {
            path,
            span: import_tok.span,
        })
    }

    fn assign_stmt(&mut self) -> ParseResult<Stmt> {
        let name_tok = self.advance();
        self.expect(TokenKind::Eq, "Expected '='")?;
        let value = self.expression()?;
        self.expect(TokenKind::Semi, "Expected ';' after assignment")?;
        Ok(Stmt::Assign {
            name: name_tok.lexeme,
            value,
            span: name_tok.span,
        })
    }

    // -------------------------
    // Expressions (Pratt)
    // -------------------------

    fn expression(&mut self) -> ParseResult<Expr> {
        self.parse_precedence(0)
    }

    fn parse_precedence(&mut self, min_bp: u8) -> ParseResult<Expr> {
        let mut expr = self.prefix()?;

        loop {
            // Calls and indexing bind tightest of all left denotations.
            if BP_POSTFIX >= min_bp {
                if self.check(TokenKind::LParen) {
                    expr = self.finish_call(expr)?;
                    continue;
                }
                if self.check(TokenKind::LBracket) {
                    expr = self.finish_index(expr)?;
                    continue;
                }
            }

            let Some((bp, op)) = infix_rule(self.peek().kind) else {
                break;
            };
            if bp < min_bp {
                break;
            }

            let op_tok = self.advance();
            // Left-associative: the right operand excludes operators of the
            // same binding power.
            let right = self.parse_precedence(bp + 1)?;
            expr = Expr::Binary {
                op,
                left: Box::new(expr),
                right: Box::new(right),
                span: op_tok.span,
            };
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let lparen = self.advance();
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after arguments")?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span: lparen.span,
        })
    }

    fn finish_index(&mut self, target: Expr) -> ParseResult<Expr> {
        let lbracket = self.advance();
        let index = self.expression()?;
        self.expect(TokenKind::RBracket, "Expected ']' after index")?;
        Ok(Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
            span: lbracket.span,
        })
    }

    fn prefix(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| ParseError {
                    message: format!("Invalid number literal '{}'", token.lexeme),
                    span: token.span,
                })?;
                Ok(Expr::NumberLit {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::StringLit {
                    value: token.lexeme,
                    span: token.span,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLit {
                    value: true,
                    span: token.span,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLit {
                    value: false,
                    span: token.span,
                })
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::NilLit { span: token.span })
            }
            TokenKind::Ident => {
                self.advance();
                Ok(Expr::Ident {
                    name: token.lexeme,
                    span: token.span,
                })
            }
            TokenKind::LBracket => self.list_literal(),
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(TokenKind::RParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_precedence(BP_UNARY)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                    span: token.span,
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_precedence(BP_NOT)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    span: token.span,
                })
            }
            _ => Err(self.error(&format!("Expected expression, got {}", token.kind))),
        }
    }

    fn list_literal(&mut self) -> ParseResult<Expr> {
        let lbracket = self.advance();
        let mut elems = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                elems.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "Expected ']' after list literal")?;
        Ok(Expr::ListLit {
            elems,
            span: lbracket.span,
        })
    }

    // -------------------------
    // Cursor helpers
    // -------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_second_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|token| token.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.error(message))
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.peek().span,
        }
    }
}

pub fn parse_tokens(tokens: Vec<Token>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}

/// Front end in one step: tokenize and parse, attaching the source to any
/// failure for later rendering.
pub fn parse_source(source: &crate::source::SourceRef) -> Result<Program, crate::errors::RafError> {
    let tokens = crate::lexer::tokenize(&source.text).map_err(|error| crate::errors::RafError::Lex {
        error,
        source: source.clone(),
    })?;
    parse_tokens(tokens).map_err(|error| crate::errors::RafError::Parse {
        error,
        source: source.clone(),
    })
}
