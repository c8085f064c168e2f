use crate::ast::Position;
use crate::value::parse_number;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A bare word. SBText has no reserved words: the parser's phrase
    /// tables decide what a word means from its position.
    Word,
    Number(f64),
    /// A string literal; the token text is the decoded contents.
    Text,
    /// `+ - * / % = == != < <= > >= !`
    Symbol,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Position,
}

impl Token {
    /// The word in lowercase, if this token is one.
    pub fn word(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_lowercase()),
            _ => None,
        }
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub pos: Position,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.pos.line, self.pos.column)
    }
}

impl Error for LexerError {}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            let pos = self.pos();
            let start = self.offset();
            match ch {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                c if is_zero_width(c) => {
                    self.bump();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\n' => {
                    self.bump();
                    tokens.push(token(TokenKind::Newline, "\n", pos));
                }
                '"' => tokens.push(self.string(pos)?),
                c if c.is_ascii_digit() => tokens.push(self.number(start, pos)?),
                c if c.is_alphabetic() || c == '_' => tokens.push(self.word(start, pos)),
                '(' | ')' | '[' | ']' | ',' => {
                    self.bump();
                    let kind = match ch {
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '[' => TokenKind::LBracket,
                        ']' => TokenKind::RBracket,
                        _ => TokenKind::Comma,
                    };
                    tokens.push(token(kind, &ch.to_string(), pos));
                }
                '+' | '-' | '*' | '/' | '%' => {
                    self.bump();
                    tokens.push(token(TokenKind::Symbol, &ch.to_string(), pos));
                }
                '=' | '!' | '<' | '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                    }
                    let end = self.offset();
                    tokens.push(token(TokenKind::Symbol, &self.source[start..end], pos));
                }
                other => {
                    return Err(LexerError {
                        message: format!("Unexpected character {:?}", other),
                        pos,
                    })
                }
            }
        }
        tokens.push(token(TokenKind::Eof, "", self.pos()));
        Ok(tokens)
    }

    /// Letters, digits, `_`, a trailing `?` (`pressed?`) and inner
    /// apostrophes (`don't`).
    fn word(&mut self, start: usize, pos: Position) -> Token {
        let source = self.source;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '?' | '\'') {
                self.bump();
            } else {
                break;
            }
        }
        token(TokenKind::Word, &source[start..self.offset()], pos)
    }

    /// Decimal numbers plus `0x`/`0b`/`0o` integers; `_` separates digits.
    fn number(&mut self, start: usize, pos: Position) -> Result<Token, LexerError> {
        let source = self.source;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            let so_far = &source[start..self.offset()];
            let radix_prefix = so_far == "0" && matches!(c, 'x' | 'X' | 'b' | 'B' | 'o' | 'O');
            let radix_digit = has_radix_prefix(so_far) && c.is_ascii_alphanumeric();
            if c.is_ascii_digit() || c == '_' || radix_prefix || radix_digit {
                self.bump();
            } else if c == '.' && !seen_dot && !has_radix_prefix(so_far) {
                seen_dot = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &source[start..self.offset()];
        match parse_number(&text.replace('_', "")) {
            Some(value) => Ok(token(TokenKind::Number(value), text, pos)),
            None => Err(LexerError {
                message: format!("Invalid number literal '{}'", text),
                pos,
            }),
        }
    }

    fn string(&mut self, pos: Position) -> Result<Token, LexerError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(token(TokenKind::Text, &out, pos)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => out.push(c),
            }
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            pos,
        })
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.source.len(), |&(i, _)| i)
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

fn token(kind: TokenKind, text: &str, pos: Position) -> Token {
    Token {
        kind,
        text: text.to_string(),
        pos,
    }
}

fn has_radix_prefix(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 2 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'X' | b'b' | b'B' | b'o' | b'O')
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}')
}
