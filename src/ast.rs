//! Syntax tree of an SBText source file.
//!
//! Statements and reporters are already expressed in terms of engine
//! opcodes; the parser's phrase tables do the mapping, so lowering only
//! has to allocate blocks and resolve names.

use crate::program::{Hat, Opcode};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        pos: Position,
        value: Value,
    },
    /// A bare name: a procedure parameter when one is in scope, otherwise
    /// a variable.
    Var {
        pos: Position,
        name: String,
    },
    Reporter {
        pos: Position,
        opcode: Opcode,
        args: Vec<Expr>,
        field: Option<String>,
    },
}

impl Expr {
    pub fn pos(&self) -> Position {
        match self {
            Expr::Literal { pos, .. } | Expr::Var { pos, .. } | Expr::Reporter { pos, .. } => *pos,
        }
    }

    pub fn number(pos: Position, value: f64) -> Self {
        Expr::Literal {
            pos,
            value: Value::Number(value),
        }
    }

    pub fn text(pos: Position, value: impl Into<String>) -> Self {
        Expr::Literal {
            pos,
            value: Value::String(value.into()),
        }
    }

    pub fn reporter(pos: Position, opcode: Opcode, args: Vec<Expr>) -> Self {
        Expr::Reporter {
            pos,
            opcode,
            args,
            field: None,
        }
    }
}

/// One stack block. `bodies` holds the child sequences of control blocks
/// (one for loops and `if`, two for `if`/`else`). Procedure calls use
/// [`Opcode::Call`] with the procedure name as the field.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub pos: Position,
    pub opcode: Opcode,
    pub args: Vec<Expr>,
    pub field: Option<String>,
    pub bodies: Vec<Vec<Statement>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub pos: Position,
    pub hat: Hat,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub pos: Position,
    pub name: String,
    pub params: Vec<String>,
    pub warp: bool,
    pub body: Vec<Statement>,
}

/// A `var`, `list` or `costume` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub pos: Position,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub pos: Position,
    pub name: String,
    pub is_stage: bool,
    pub variables: Vec<Decl>,
    pub lists: Vec<Decl>,
    /// Costume file paths, relative to the source file.
    pub costumes: Vec<Decl>,
    pub procedures: Vec<Procedure>,
    pub scripts: Vec<Script>,
}

impl Target {
    pub fn new(pos: Position, name: String, is_stage: bool) -> Self {
        Self {
            pos,
            name,
            is_stage,
            variables: Vec::new(),
            lists: Vec::new(),
            costumes: Vec::new(),
            procedures: Vec::new(),
            scripts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub pos: Position,
    pub targets: Vec<Target>,
}
