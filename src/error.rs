//! Error types for loading and running stage projects.
//!
//! Two tiers: structural problems are caught while a program is loaded and
//! reject the load; an [`EngineFault`] is an internal invariant violation
//! that halts the run. User-script mistakes are neither; they degrade to
//! fallback values at runtime.

use crate::lexer::LexerError;
use crate::parser::ParseError;
use crate::semantic::SemanticError;
use crate::program::BlockId;
use crate::target::TargetId;
use thiserror::Error;

/// A malformed block program, detected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("unknown opcode '{opcode}'")]
    UnknownOpcode { opcode: String },
    #[error("block {block} expects id {expected} at this position in the graph")]
    BlockIdMismatch { block: BlockId, expected: BlockId },
    #[error("block {from} refers to missing block {missing}")]
    MissingBlock { from: String, missing: BlockId },
    #[error("block {block} ({opcode}) expects {expected} value input(s), got {actual}")]
    WrongValueInputCount {
        block: BlockId,
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("block {block} ({opcode}) requires {expected} child sequence(s), got {actual}")]
    MissingChildSequence {
        block: BlockId,
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("block {block} ({opcode}) has an input of the wrong kind in slot {slot}")]
    MisplacedInput {
        block: BlockId,
        opcode: &'static str,
        slot: usize,
    },
    #[error("block {block} ({opcode}) is a reporter and cannot be part of a stack")]
    ReporterInStack { block: BlockId, opcode: &'static str },
    #[error("block {block} ({opcode}) is a stack block and cannot be used as a value")]
    StackBlockAsValue { block: BlockId, opcode: &'static str },
    #[error("block {block} is owned by more than one parent")]
    SharedBlock { block: BlockId },
    #[error("cycle detected through block {block}")]
    Cycle { block: BlockId },
    #[error("block {block} ({opcode}) is missing its '{field}' field")]
    MissingField {
        block: BlockId,
        opcode: &'static str,
        field: &'static str,
    },
    #[error("block {block} ({opcode}) has invalid field value '{value}'")]
    InvalidField {
        block: BlockId,
        opcode: &'static str,
        value: String,
    },
    #[error("procedure '{name}' is defined more than once")]
    DuplicateProcedure { name: String },
    #[error("procedure '{name}' has duplicate parameter '{param}'")]
    DuplicateParameter { name: String, param: String },
    #[error("block {block} calls unknown procedure '{name}'")]
    UnknownProcedure { block: BlockId, name: String },
    #[error("block {block} calls '{name}' with {actual} argument(s), expected {expected}")]
    ArgumentCount {
        block: BlockId,
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("script {script} has an empty {what} in its hat")]
    EmptyHatName { script: usize, what: &'static str },
}

/// Anything that can reject loading a project, a program or a snapshot.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Lex error: {0}")]
    Lex(#[from] LexerError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Semantic error: {0}")]
    Semantic(#[from] SemanticError),
    #[error("invalid program for target '{target}': {source}")]
    Structural {
        target: String,
        #[source]
        source: StructuralError,
    },
    #[error("Duplicate target name '{0}'.")]
    DuplicateTarget(String),
    #[error("Project can only define one stage.")]
    SecondStage,
    #[error("Project must define a stage before sprites can be added.")]
    MissingStage,
    #[error("unknown target id {0}")]
    UnknownTarget(TargetId),
    #[error("clones cannot receive a program of their own (target {0})")]
    CloneProgram(TargetId),
    #[error("costume error: {0}")]
    Costume(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

/// Internal invariant violation. Fatal to the whole run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFault {
    #[error("thread {thread} refers to missing block {block}")]
    MissingBlock { thread: u64, block: BlockId },
    #[error("thread {thread} belongs to missing target {target}")]
    MissingTarget { thread: u64, target: TargetId },
    #[error("thread {thread} has an empty cursor stack while running")]
    EmptyCursor { thread: u64 },
    #[error("thread {thread} walked a cyclic chain at block {block}")]
    CyclicChain { thread: u64, block: BlockId },
}
