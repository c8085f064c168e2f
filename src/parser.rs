//! Recursive-descent parser for SBText.
//!
//! Statements, reporters and hats are described by phrase tables instead of
//! one parse function each. A phrase is a space-separated pattern:
//!
//! - `word` must appear; `a|b` accepts any one of the words
//! - `=a|b` accepts any one of the words and stores it as the block field
//! - `~word` may appear, bare or as `[word]`
//! - `()` a value, `[]` a dropdown (`[text]` or `(expr)`), `<>` a condition
//! - `[msg]` non-empty menu text used as a text value
//! - `[var]`, `[list]`, `[name]` menu text stored as the block field
//! - `{}` a body closed by `end`; `{else}` may be split in two by `else`
//!
//! Every phrase starting with the current word is tried in table order.
//! When none matches, the error of the attempt that got furthest wins.

use crate::ast::{Decl, Expr, Position, Procedure, Project, Script, Statement, Target};
use crate::lexer::{Token, TokenKind};
use crate::program::{Hat, Opcode, StopScope};
use crate::value::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.pos.line, self.pos.column)
    }
}

impl Error for ParseError {}

const STATEMENTS: &[(&str, Opcode)] = &[
    ("move () ~steps", Opcode::MoveSteps),
    ("turn right () ~degrees", Opcode::TurnRight),
    ("turn left () ~degrees", Opcode::TurnLeft),
    ("point in direction ()", Opcode::PointInDirection),
    ("go to x () y ()", Opcode::GoToXY),
    ("go to =front|back", Opcode::GoToFrontBack),
    ("go =forward|backward () layers|layer", Opcode::GoForwardBackwardLayers),
    ("change x by ()", Opcode::ChangeXBy),
    ("change y by ()", Opcode::ChangeYBy),
    ("change size by ()", Opcode::ChangeSizeBy),
    ("change [var] by ()", Opcode::ChangeVariableBy),
    ("set x to ()", Opcode::SetX),
    ("set y to ()", Opcode::SetY),
    ("set size to () ~%", Opcode::SetSizeTo),
    ("set rotation style [name]", Opcode::SetRotationStyle),
    ("set [var] to ()", Opcode::SetVariableTo),
    ("say () for () ~seconds", Opcode::SayForSecs),
    ("say ()", Opcode::Say),
    ("think () for () ~seconds", Opcode::ThinkForSecs),
    ("think ()", Opcode::Think),
    ("show", Opcode::Show),
    ("hide", Opcode::Hide),
    ("switch costume to []", Opcode::SwitchCostumeTo),
    ("next costume", Opcode::NextCostume),
    ("switch backdrop to []", Opcode::SwitchBackdropTo),
    ("next backdrop", Opcode::NextBackdrop),
    ("broadcast and wait [msg]", Opcode::BroadcastAndWait),
    ("broadcast [msg]", Opcode::Broadcast),
    ("wait until <>", Opcode::WaitUntil),
    ("wait () ~seconds", Opcode::Wait),
    ("repeat until <> {}", Opcode::RepeatUntil),
    ("repeat () {}", Opcode::Repeat),
    ("forever {}", Opcode::Forever),
    ("while <> {}", Opcode::While),
    ("if <> then {else}", Opcode::If),
    ("stop [name]", Opcode::Stop),
    ("create clone of [name]", Opcode::CreateCloneOf),
    ("delete this clone", Opcode::DeleteThisClone),
    ("delete all of [list]", Opcode::DeleteAllOfList),
    ("delete () of [list]", Opcode::DeleteOfList),
    ("reset timer", Opcode::ResetTimer),
    ("add () to [list]", Opcode::AddToList),
    ("insert () at () of [list]", Opcode::InsertAtList),
    ("replace item () of [list] with ()", Opcode::ReplaceItemOfList),
];

const REPORTERS: &[(&str, Opcode)] = &[
    ("pick random () to ()", Opcode::Random),
    ("item () of [list]", Opcode::ItemOfList),
    ("length of [list]", Opcode::LengthOfList),
    ("length of ()", Opcode::Length),
    ("key [] pressed|pressed?", Opcode::KeyPressed),
    ("join () ()", Opcode::Join),
    ("letter () of ()", Opcode::LetterOf),
    ("round ()", Opcode::Round),
    ("=abs|floor|ceiling|sqrt|sin|cos|tan|asin|acos|atan|ln|log ()", Opcode::MathOp),
    ("timer", Opcode::Timer),
    ("x position", Opcode::XPosition),
    ("y position", Opcode::YPosition),
    ("direction", Opcode::Direction),
    ("size", Opcode::Size),
    ("costume =number|name", Opcode::CostumeNumberName),
    ("backdrop =number|name", Opcode::BackdropNumberName),
];

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Flag,
    Clicked,
    Receive,
    Key,
    CloneStart,
}

const HATS: &[(&str, Trigger)] = &[
    ("green flag clicked", Trigger::Flag),
    ("flag clicked", Trigger::Flag),
    ("this sprite clicked", Trigger::Clicked),
    ("i receive [name]", Trigger::Receive),
    ("key [name] pressed", Trigger::Key),
    ("i start as a clone", Trigger::CloneStart),
];

/// Words that end a hat script body that is not closed with its own `end`.
const SCRIPT_TERMINATORS: &[&str] = &["when", "define", "var", "list", "costume", "end"];

#[derive(Debug, Default)]
struct Matched {
    args: Vec<Expr>,
    field: Option<String>,
    bodies: Vec<Vec<Statement>>,
}

struct Failure {
    reached: usize,
    error: ParseError,
}

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let pos = tokens.last().map_or(Position::new(1, 1), |t| t.pos);
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                pos,
            });
        }
        Self { tokens, index: 0 }
    }

    pub fn parse_project(&mut self) -> Result<Project, ParseError> {
        self.skip_newlines();
        let pos = self.current().pos;
        let mut targets = Vec::new();
        while !self.at_end() {
            let token = self.advance();
            let target = if token.is_word("sprite") {
                let name = self.name("Expected a sprite name.")?;
                self.target_body(Target::new(token.pos, name, false))?
            } else if token.is_word("stage") {
                let name = match self.current().kind {
                    TokenKind::Word | TokenKind::Text => self.name("Expected a stage name.")?,
                    _ => "Stage".to_string(),
                };
                self.target_body(Target::new(token.pos, name, true))?
            } else {
                return Err(ParseError {
                    message: "Expected 'sprite' or 'stage'.".to_string(),
                    pos: token.pos,
                });
            };
            targets.push(target);
            self.skip_newlines();
        }
        if targets.is_empty() {
            return Err(ParseError {
                message: "Expected at least one 'stage' or 'sprite' block.".to_string(),
                pos,
            });
        }
        Ok(Project { pos, targets })
    }

    fn target_body(&mut self, mut target: Target) -> Result<Target, ParseError> {
        loop {
            self.skip_newlines();
            if self.at_end() {
                return self.error_here(format!(
                    "Unterminated target block for '{}'. Expected 'end'.",
                    target.name
                ));
            }
            let token = self.advance();
            match token.word().as_deref() {
                Some("end") => return Ok(target),
                Some("var") => {
                    let name = self.name("Expected a variable name.")?;
                    target.variables.push(Decl { pos: token.pos, name });
                }
                Some("list") => {
                    let name = self.name("Expected a list name.")?;
                    target.lists.push(Decl { pos: token.pos, name });
                }
                Some("costume") => {
                    let path = self.expect(TokenKind::Text, "Expected a costume path string.")?;
                    target.costumes.push(Decl {
                        pos: token.pos,
                        name: path.text,
                    });
                }
                Some("define") => target.procedures.push(self.procedure(token.pos)?),
                Some("when") => target.scripts.push(self.script(token.pos)?),
                _ => {
                    return Err(ParseError {
                        message: "Expected 'var', 'list', 'costume', 'define', 'when', or 'end' inside target."
                            .to_string(),
                        pos: token.pos,
                    })
                }
            }
        }
    }

    /// `define NAME (param)...`; `define !NAME` or `define warp NAME` runs
    /// without screen refresh.
    fn procedure(&mut self, pos: Position) -> Result<Procedure, ParseError> {
        let mut warp = false;
        if self.current().is_symbol("!") {
            self.advance();
            warp = true;
        } else if self.current().is_word("warp") && matches!(self.peek_kind(), TokenKind::Word | TokenKind::Text) {
            self.advance();
            warp = true;
        }
        let name = self.name("Expected a procedure name.")?;
        let mut params = Vec::new();
        while self.check(&TokenKind::LParen) {
            self.advance();
            if self.check(&TokenKind::RParen) {
                return self.error_here("Empty parameter declaration is not allowed.");
            }
            params.push(self.name("Expected a parameter name.")?);
            self.expect(TokenKind::RParen, "Expected ')' after parameter name.")?;
        }
        let body = self.block(&["end"])?;
        self.expect_word("end", "Expected 'end' to close procedure definition.")?;
        Ok(Procedure {
            pos,
            name,
            params,
            warp,
            body,
        })
    }

    fn script(&mut self, pos: Position) -> Result<Script, ParseError> {
        let word = self.current().word().unwrap_or_default();
        let candidates = candidates(HATS, &word);
        if candidates.is_empty() {
            return self.error_here("Unknown event header after 'when'.");
        }
        let (matched, trigger) = self.first_match(&candidates, true).map_err(|f| f.error)?;
        let name = matched.field.unwrap_or_default();
        let hat = match trigger {
            Trigger::Flag => Hat::GreenFlag,
            Trigger::Clicked => Hat::Clicked,
            Trigger::Receive => Hat::BroadcastReceived(name),
            Trigger::Key => Hat::KeyPressed(name.to_lowercase()),
            Trigger::CloneStart => Hat::CloneStart,
        };
        let body = self.block(SCRIPT_TERMINATORS)?;
        if self.current().is_word("end") && self.end_closes_script() {
            self.advance();
        }
        Ok(Script { pos, hat, body })
    }

    /// An `end` closes the script unless the next thing after it is another
    /// target or the end of the file, in which case it closes the target.
    fn end_closes_script(&self) -> bool {
        let next = self.tokens[self.index + 1..]
            .iter()
            .find(|t| t.kind != TokenKind::Newline);
        match next {
            None => false,
            Some(t) => !(t.kind == TokenKind::Eof || t.is_word("sprite") || t.is_word("stage")),
        }
    }

    /// Statements up to (not including) one of `stops`, `else`, or the end
    /// of input.
    fn block(&mut self, stops: &[&str]) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            if let Some(word) = self.current().word() {
                if word == "else" || stops.contains(&word.as_str()) {
                    break;
                }
            }
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let token = self.current().clone();
        let Some(word) = token.word() else {
            return self.error_here("Expected a statement.");
        };
        let candidates = candidates(STATEMENTS, &word);
        if candidates.is_empty() {
            return self.call(token);
        }
        let (matched, opcode) = self.first_match(&candidates, true).map_err(|f| f.error)?;
        finish_statement(token.pos, opcode, matched)
    }

    /// Any word that does not start a built-in statement calls a procedure.
    fn call(&mut self, token: Token) -> Result<Statement, ParseError> {
        self.advance();
        let mut args = Vec::new();
        while self.check(&TokenKind::LParen) {
            args.push(self.wrapped_expression()?);
        }
        self.end_of_statement()?;
        Ok(Statement {
            pos: token.pos,
            opcode: Opcode::Call,
            args,
            field: Some(token.text),
            bodies: Vec::new(),
        })
    }

    /// Tries each pattern in turn. On failure the parser is rewound and the
    /// furthest-reaching error is returned.
    fn first_match<T: Copy>(
        &mut self,
        candidates: &[(&'static str, T)],
        line_ends: bool,
    ) -> Result<(Matched, T), Failure> {
        let start = self.index;
        let mut furthest: Option<Failure> = None;
        for &(pattern, tag) in candidates {
            match self.match_pattern(pattern, line_ends) {
                Ok(matched) => return Ok((matched, tag)),
                Err(error) => {
                    let reached = self.index;
                    self.index = start;
                    if furthest.as_ref().map_or(true, |f| reached > f.reached) {
                        furthest = Some(Failure { reached, error });
                    }
                }
            }
        }
        Err(furthest.unwrap_or_else(|| Failure {
            reached: start,
            error: ParseError {
                message: "Unrecognized phrase.".to_string(),
                pos: self.current().pos,
            },
        }))
    }

    fn match_pattern(&mut self, pattern: &str, line_ends: bool) -> Result<Matched, ParseError> {
        let mut matched = Matched::default();
        for element in pattern.split_whitespace() {
            self.element(element, &mut matched)?;
        }
        if line_ends {
            self.end_of_statement()?;
        }
        Ok(matched)
    }

    fn element(&mut self, element: &str, matched: &mut Matched) -> Result<(), ParseError> {
        match element {
            "()" => matched.args.push(self.wrapped_expression()?),
            "[]" => matched.args.push(self.dropdown()?),
            "<>" => matched.args.push(self.condition()?),
            "{}" => matched.bodies.extend(self.bodies(false)?),
            "{else}" => matched.bodies.extend(self.bodies(true)?),
            "[msg]" => {
                let pos = self.current().pos;
                let text = self.menu_name("Message")?;
                matched.args.push(Expr::text(pos, text));
            }
            "[var]" => matched.field = Some(self.variable_name()?),
            "[list]" => matched.field = Some(self.bracket_name("List name")?),
            "[name]" => matched.field = Some(self.menu_name("Menu value")?),
            _ => {
                if let Some(word) = element.strip_prefix('~') {
                    self.optional_word(word);
                } else if let Some(choices) = element.strip_prefix('=') {
                    matched.field = Some(self.one_of(choices)?);
                } else {
                    self.one_of(element)?;
                }
            }
        }
        Ok(())
    }

    fn bodies(&mut self, allow_else: bool) -> Result<Vec<Vec<Statement>>, ParseError> {
        let mut bodies = vec![self.block(&["end"])?];
        if allow_else && self.current().is_word("else") {
            self.advance();
            bodies.push(self.block(&["end"])?);
        }
        self.expect_word("end", "Expected 'end' to close the block.")?;
        Ok(bodies)
    }

    fn one_of(&mut self, choices: &str) -> Result<String, ParseError> {
        if let Some(word) = self.current().word() {
            if choices.split('|').any(|c| c == word) {
                self.advance();
                return Ok(word);
            }
        }
        let expected: Vec<String> = choices.split('|').map(|c| format!("'{}'", c)).collect();
        self.error_here(format!("Expected {}.", expected.join(" or ")))
    }

    fn optional_word(&mut self, word: &str) {
        let token = self.current();
        if token.is_word(word) || token.is_symbol(word) {
            self.advance();
            return;
        }
        let bracketed = token.kind == TokenKind::LBracket
            && self.tokens.get(self.index + 1).is_some_and(|t| t.is_word(word))
            && self
                .tokens
                .get(self.index + 2)
                .is_some_and(|t| t.kind == TokenKind::RBracket);
        if bracketed {
            self.index += 3;
        }
    }

    fn wrapped_expression(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LParen, "Expected '('.")?;
        let expr = self.expression(1)?;
        self.expect(TokenKind::RParen, "Expected ')' after expression.")?;
        Ok(expr)
    }

    /// `[text]` is taken literally, `(...)` is evaluated.
    fn dropdown(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::LBracket) {
            let pos = self.current().pos;
            let tokens = self.bracket_tokens()?;
            return Ok(Expr::text(pos, join_tokens(&tokens)));
        }
        self.wrapped_expression()
    }

    /// A condition runs to the end of the line or to `then`, optionally
    /// wrapped in `<...>`.
    fn condition(&mut self) -> Result<Expr, ParseError> {
        let start = self.current().pos;
        let mut tokens = self.collect_balanced(|t| t.kind == TokenKind::Newline || t.is_word("then"))?;
        if tokens.is_empty() {
            return Err(ParseError {
                message: "Expected a condition.".to_string(),
                pos: start,
            });
        }
        if tokens[0].is_symbol("<") {
            let closed = tokens.len() >= 2 && tokens.last().is_some_and(|t| t.is_symbol(">"));
            if !closed {
                return Err(ParseError {
                    message: "A condition opened with '<' must end with '>'.".to_string(),
                    pos: start,
                });
            }
            tokens.pop();
            tokens.remove(0);
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            pos: self.current().pos,
        });
        let mut inner = Parser::new(tokens);
        let expr = inner.expression(1)?;
        if !inner.at_end() {
            return inner.error_here("Unexpected tokens after the condition.");
        }
        Ok(expr)
    }

    /// Tokens up to the first top-level token matching `stop`.
    fn collect_balanced(&mut self, stop: impl Fn(&Token) -> bool) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        let mut depth = 0i32;
        while !self.at_end() {
            let token = self.current();
            if depth == 0 && stop(token) {
                break;
            }
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return self.error_here("Unbalanced ')' or ']'.");
            }
            out.push(self.advance());
        }
        if depth != 0 {
            return self.error_here("Unclosed '(' or '['.");
        }
        Ok(out)
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while let Some((opcode, negate, precedence)) = binary_operator(self.current()) {
            if precedence < min_precedence {
                break;
            }
            let pos = self.advance().pos;
            let right = self.expression(precedence + 1)?;
            let combined = Expr::reporter(pos, opcode, vec![left, right]);
            left = if negate {
                Expr::reporter(pos, Opcode::Not, vec![combined])
            } else {
                combined
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        if token.is_symbol("-") {
            self.advance();
            return Ok(match self.unary()? {
                Expr::Literal {
                    value: Value::Number(n),
                    ..
                } => Expr::number(token.pos, -n),
                operand => Expr::reporter(token.pos, Opcode::Subtract, vec![Expr::number(token.pos, 0.0), operand]),
            });
        }
        if token.is_word("not") {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::reporter(token.pos, Opcode::Not, vec![operand]));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::number(token.pos, n))
            }
            TokenKind::Text => {
                self.advance();
                Ok(Expr::text(token.pos, token.text))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression(1)?;
                self.expect(TokenKind::RParen, "Expected ')' after grouped expression.")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let name = self.variable_name()?;
                if self.current().is_word("contains") {
                    self.advance();
                    let item = self.wrapped_expression()?;
                    return Ok(Expr::Reporter {
                        pos: token.pos,
                        opcode: Opcode::ListContainsItem,
                        args: vec![item],
                        field: Some(name),
                    });
                }
                Ok(Expr::Var { pos: token.pos, name })
            }
            TokenKind::Word => self.word_expression(token),
            _ => self.error_here("Expected an expression."),
        }
    }

    /// A reporter phrase, or a variable when no phrase gets past its first
    /// word.
    fn word_expression(&mut self, token: Token) -> Result<Expr, ParseError> {
        let word = token.text.to_lowercase();
        let candidates = candidates(REPORTERS, &word);
        if !candidates.is_empty() {
            let start = self.index;
            match self.first_match(&candidates, false) {
                Ok((matched, opcode)) => {
                    return Ok(Expr::Reporter {
                        pos: token.pos,
                        opcode,
                        args: matched.args,
                        field: matched.field,
                    })
                }
                Err(failure) if failure.reached > start + 1 => return Err(failure.error),
                Err(_) => {}
            }
        }
        if self.peek_kind() == TokenKind::LParen {
            return self.error_here(format!(
                "Procedure call '{}' cannot appear inside an expression.",
                token.text
            ));
        }
        self.advance();
        Ok(Expr::Var {
            pos: token.pos,
            name: token.text,
        })
    }

    /// `[name]`, dropping a leading `var` word.
    fn variable_name(&mut self) -> Result<String, ParseError> {
        let mut tokens = self.bracket_tokens()?;
        if tokens.len() > 1 && tokens[0].is_word("var") {
            tokens.remove(0);
        }
        let name = join_tokens(&tokens);
        if name.is_empty() {
            return self.error_here("Variable name cannot be empty.");
        }
        Ok(name)
    }

    fn bracket_name(&mut self, what: &str) -> Result<String, ParseError> {
        let pos = self.current().pos;
        let name = join_tokens(&self.bracket_tokens()?);
        if name.is_empty() {
            return Err(ParseError {
                message: format!("{} cannot be empty.", what),
                pos,
            });
        }
        Ok(name)
    }

    /// Bracket text or a string literal.
    fn menu_name(&mut self, what: &str) -> Result<String, ParseError> {
        if self.check(&TokenKind::Text) {
            let token = self.advance();
            if token.text.trim().is_empty() {
                return Err(ParseError {
                    message: format!("{} cannot be empty.", what),
                    pos: token.pos,
                });
            }
            return Ok(token.text);
        }
        self.bracket_name(what)
    }

    fn bracket_tokens(&mut self) -> Result<Vec<Token>, ParseError> {
        self.expect(TokenKind::LBracket, "Expected '['.")?;
        let mut tokens = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            if matches!(self.current().kind, TokenKind::Newline | TokenKind::Eof) {
                return self.error_here("Expected ']' before the end of the line.");
            }
            tokens.push(self.advance());
        }
        self.advance();
        Ok(tokens)
    }

    fn name(&mut self, message: &str) -> Result<String, ParseError> {
        match self.current().kind {
            TokenKind::Word | TokenKind::Text => Ok(self.advance().text),
            _ => self.error_here(message),
        }
    }

    fn end_of_statement(&self) -> Result<(), ParseError> {
        match self.current().kind {
            TokenKind::Newline | TokenKind::Eof => Ok(()),
            _ => self.error_here("Expected the end of the line."),
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            self.error_here(message)
        }
    }

    fn expect_word(&mut self, word: &str, message: &str) -> Result<Token, ParseError> {
        if self.current().is_word(word) {
            Ok(self.advance())
        } else {
            self.error_here(message)
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().kind == *kind
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.check(&TokenKind::Eof)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.index + 1)
            .map_or(TokenKind::Eof, |t| t.kind.clone())
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn error_here<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            message: message.into(),
            pos: self.current().pos,
        })
    }
}

fn candidates<T: Copy>(table: &[(&'static str, T)], word: &str) -> Vec<(&'static str, T)> {
    table
        .iter()
        .filter(|(pattern, _)| {
            let first = pattern.split_whitespace().next().unwrap_or("");
            first.trim_start_matches('=').split('|').any(|w| w == word)
        })
        .copied()
        .collect()
}

fn finish_statement(pos: Position, opcode: Opcode, matched: Matched) -> Result<Statement, ParseError> {
    let Matched {
        args,
        mut field,
        bodies,
    } = matched;
    let opcode = match opcode {
        Opcode::If if bodies.len() == 2 => Opcode::IfElse,
        other => other,
    };
    match opcode {
        Opcode::Stop => {
            let option = field.as_deref().unwrap_or("");
            if StopScope::parse(option).is_none() {
                return Err(ParseError {
                    message: format!(
                        "Unknown stop option '{}'. Use [all], [this script] or [other scripts in sprite].",
                        option
                    ),
                    pos,
                });
            }
        }
        Opcode::SetRotationStyle => match field.as_deref().and_then(rotation_style_name) {
            Some(style) => field = Some(style.to_string()),
            None => {
                return Err(ParseError {
                    message: "Unknown rotation style. Use [all around], [left-right] or [don't rotate].".to_string(),
                    pos,
                })
            }
        },
        _ => {}
    }
    Ok(Statement {
        pos,
        opcode,
        args,
        field,
        bodies,
    })
}

/// Operator token to opcode, whether the result is negated, and binding
/// strength.
fn binary_operator(token: &Token) -> Option<(Opcode, bool, u8)> {
    if token.is_word("or") {
        return Some((Opcode::Or, false, 1));
    }
    if token.is_word("and") {
        return Some((Opcode::And, false, 2));
    }
    if token.is_word("contains") {
        return Some((Opcode::Contains, false, 3));
    }
    if token.kind != TokenKind::Symbol {
        return None;
    }
    let op = match token.text.as_str() {
        "=" | "==" => (Opcode::Equals, false, 3),
        "!=" => (Opcode::Equals, true, 3),
        "<" => (Opcode::Lt, false, 3),
        ">" => (Opcode::Gt, false, 3),
        "<=" => (Opcode::Gt, true, 3),
        ">=" => (Opcode::Lt, true, 3),
        "+" => (Opcode::Add, false, 4),
        "-" => (Opcode::Subtract, false, 4),
        "*" => (Opcode::Multiply, false, 5),
        "/" => (Opcode::Divide, false, 5),
        "%" => (Opcode::Mod, false, 5),
        _ => return None,
    };
    Some(op)
}

fn join_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Canonical rotation style for loosely written menu text such as
/// `[left - right]` or `[dont rotate]`.
fn rotation_style_name(text: &str) -> Option<&'static str> {
    let letters: String = text
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match letters.as_str() {
        "allaround" => Some("all around"),
        "leftright" => Some("left-right"),
        "dontrotate" => Some("don't rotate"),
        _ => None,
    }
}
