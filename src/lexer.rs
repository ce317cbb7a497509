use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character {character:?}")]
    UnexpectedCharacter { character: char, span: Span },
    #[error("Unterminated string literal")]
    UnterminatedString { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. } => *span,
            LexError::UnterminatedString { span } => *span,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;

fn keyword_kind(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "def" => TokenKind::Def,
        "return" => TokenKind::Return,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "nil" => TokenKind::Nil,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "import" => TokenKind::Import,
        _ => return None,
    };
    Some(kind)
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        loop {
            let Some(ch) = self.peek_char() else {
                return Ok(Token::eof(self.span()));
            };

            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.consume_char();
                }
                '/' if self.peek_second() == Some('/') => {
                    self.consume_while(|c| c != '\n');
                }
                _ => return self.read_token(ch),
            }
        }
    }

    fn read_token(&mut self, ch: char) -> LexResult<Token> {
        if ch == '"' {
            return self.read_string();
        }
        if ch.is_ascii_digit() {
            return Ok(self.read_number());
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.read_identifier());
        }

        let span = self.span();

        // Greedy two-char operators before single-char fallbacks.
        if let Some(kind) = self.two_char_operator(ch) {
            let start = self.pos;
            self.consume_char();
            self.consume_char();
            return Ok(Token::new(kind, &self.input[start..self.pos], span));
        }

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Eq,
            '<' => TokenKind::Less,
            '>' => TokenKind::Greater,
            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character: ch,
                    span,
                });
            }
        };
        let start = self.pos;
        self.consume_char();
        Ok(Token::new(kind, &self.input[start..self.pos], span))
    }

    fn two_char_operator(&self, ch: char) -> Option<TokenKind> {
        let kind = match (ch, self.peek_second()?) {
            ('=', '=') => TokenKind::EqEq,
            ('!', '=') => TokenKind::NotEq,
            ('<', '=') => TokenKind::LessEq,
            ('>', '=') => TokenKind::GreaterEq,
            _ => return None,
        };
        Some(kind)
    }

    fn read_number(&mut self) -> Token {
        let span = self.span();
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.')
            && self
                .peek_second()
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit());
        }
        Token::new(TokenKind::Number, &self.input[start..self.pos], span)
    }

    fn read_identifier(&mut self) -> Token {
        let span = self.span();
        let start = self.pos;
        self.consume_while(|c| c.is_alphanumeric() || c == '_');
        let text = &self.input[start..self.pos];
        match keyword_kind(text) {
            Some(kind) => Token::new(kind, text, span),
            None => Token::new(TokenKind::Ident, text, span),
        }
    }

    fn read_string(&mut self) -> LexResult<Token> {
        let span = self.span();
        self.consume_char(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => return Err(LexError::UnterminatedString { span }),
                Some('"') => {
                    self.consume_char();
                    return Ok(Token::new(TokenKind::Str, value, span));
                }
                Some('\\') if self.peek_second().is_some() => {
                    self.consume_char();
                    let escaped = self.consume_char().unwrap_or('\\');
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        // Unknown escapes keep the escaped character.
                        other => value.push(other),
                    }
                }
                Some(ch) => {
                    self.consume_char();
                    value.push(ch);
                }
            }
        }
    }

    fn consume_while<P>(&mut self, keep_predicate: P)
    where
        P: Fn(char) -> bool,
    {
        while let Some(c) = self.peek_char() {
            if !keep_predicate(c) {
                break;
            }
            self.consume_char();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next()?;
        chars.next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
