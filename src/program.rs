//! Block program representation.
//!
//! A [`Program`] is the immutable graph of blocks owned by one sprite (and
//! shared read-only by its clones). Blocks live in a dense table indexed by
//! [`BlockId`]; stacks are `next`-linked chains and control blocks own their
//! child sequences through [`Input::Substack`] slots. Programs can only be
//! obtained through [`ProgramBuilder::build`], which runs structural
//! validation, so the interpreter never meets a malformed graph.

use crate::error::StructuralError;
use crate::validate::validate;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Runs as a step of a stack.
    Stack,
    /// Produces a value for an input slot.
    Reporter,
}

/// Static signature of an opcode: what it is, how many value inputs it takes
/// (`None` for variadic), how many child sequences it owns and which field it
/// requires.
#[derive(Debug, Clone, Copy)]
pub struct Shape {
    pub kind: BlockKind,
    pub values: Option<usize>,
    pub substacks: usize,
    pub field: Option<&'static str>,
}

macro_rules! opcodes {
    ($($variant:ident => $name:literal, $kind:ident, $values:expr, $substacks:expr, $field:expr;)*) => {
        /// Every operation the interpreter understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn shape(self) -> Shape {
                match self {
                    $(Opcode::$variant => Shape {
                        kind: BlockKind::$kind,
                        values: $values,
                        substacks: $substacks,
                        field: $field,
                    },)*
                }
            }
        }
    };
}

opcodes! {
    MoveSteps => "motion_movesteps", Stack, Some(1), 0, None;
    TurnRight => "motion_turnright", Stack, Some(1), 0, None;
    TurnLeft => "motion_turnleft", Stack, Some(1), 0, None;
    PointInDirection => "motion_pointindirection", Stack, Some(1), 0, None;
    GoToXY => "motion_gotoxy", Stack, Some(2), 0, None;
    ChangeXBy => "motion_changexby", Stack, Some(1), 0, None;
    SetX => "motion_setx", Stack, Some(1), 0, None;
    ChangeYBy => "motion_changeyby", Stack, Some(1), 0, None;
    SetY => "motion_sety", Stack, Some(1), 0, None;
    SetRotationStyle => "motion_setrotationstyle", Stack, Some(0), 0, Some("STYLE");
    XPosition => "motion_xposition", Reporter, Some(0), 0, None;
    YPosition => "motion_yposition", Reporter, Some(0), 0, None;
    Direction => "motion_direction", Reporter, Some(0), 0, None;
    Say => "looks_say", Stack, Some(1), 0, None;
    SayForSecs => "looks_sayforsecs", Stack, Some(2), 0, None;
    Think => "looks_think", Stack, Some(1), 0, None;
    ThinkForSecs => "looks_thinkforsecs", Stack, Some(2), 0, None;
    Show => "looks_show", Stack, Some(0), 0, None;
    Hide => "looks_hide", Stack, Some(0), 0, None;
    SwitchCostumeTo => "looks_switchcostumeto", Stack, Some(1), 0, None;
    NextCostume => "looks_nextcostume", Stack, Some(0), 0, None;
    SwitchBackdropTo => "looks_switchbackdropto", Stack, Some(1), 0, None;
    NextBackdrop => "looks_nextbackdrop", Stack, Some(0), 0, None;
    ChangeSizeBy => "looks_changesizeby", Stack, Some(1), 0, None;
    SetSizeTo => "looks_setsizeto", Stack, Some(1), 0, None;
    GoToFrontBack => "looks_gotofrontback", Stack, Some(0), 0, Some("FRONT_BACK");
    GoForwardBackwardLayers => "looks_goforwardbackwardlayers", Stack, Some(1), 0, Some("FORWARD_BACKWARD");
    CostumeNumberName => "looks_costumenumbername", Reporter, Some(0), 0, Some("NUMBER_NAME");
    BackdropNumberName => "looks_backdropnumbername", Reporter, Some(0), 0, Some("NUMBER_NAME");
    Size => "looks_size", Reporter, Some(0), 0, None;
    Broadcast => "event_broadcast", Stack, Some(1), 0, None;
    BroadcastAndWait => "event_broadcastandwait", Stack, Some(1), 0, None;
    Wait => "control_wait", Stack, Some(1), 0, None;
    WaitUntil => "control_wait_until", Stack, Some(1), 0, None;
    Repeat => "control_repeat", Stack, Some(1), 1, None;
    Forever => "control_forever", Stack, Some(0), 1, None;
    If => "control_if", Stack, Some(1), 1, None;
    IfElse => "control_if_else", Stack, Some(1), 2, None;
    RepeatUntil => "control_repeat_until", Stack, Some(1), 1, None;
    While => "control_while", Stack, Some(1), 1, None;
    Stop => "control_stop", Stack, Some(0), 0, Some("STOP_OPTION");
    CreateCloneOf => "control_create_clone_of", Stack, Some(0), 0, Some("CLONE_OPTION");
    DeleteThisClone => "control_delete_this_clone", Stack, Some(0), 0, None;
    KeyPressed => "sensing_keypressed", Reporter, Some(1), 0, None;
    Timer => "sensing_timer", Reporter, Some(0), 0, None;
    ResetTimer => "sensing_resettimer", Stack, Some(0), 0, None;
    Add => "operator_add", Reporter, Some(2), 0, None;
    Subtract => "operator_subtract", Reporter, Some(2), 0, None;
    Multiply => "operator_multiply", Reporter, Some(2), 0, None;
    Divide => "operator_divide", Reporter, Some(2), 0, None;
    Mod => "operator_mod", Reporter, Some(2), 0, None;
    Random => "operator_random", Reporter, Some(2), 0, None;
    Lt => "operator_lt", Reporter, Some(2), 0, None;
    Gt => "operator_gt", Reporter, Some(2), 0, None;
    Equals => "operator_equals", Reporter, Some(2), 0, None;
    And => "operator_and", Reporter, Some(2), 0, None;
    Or => "operator_or", Reporter, Some(2), 0, None;
    Not => "operator_not", Reporter, Some(1), 0, None;
    Join => "operator_join", Reporter, Some(2), 0, None;
    LetterOf => "operator_letter_of", Reporter, Some(2), 0, None;
    Length => "operator_length", Reporter, Some(1), 0, None;
    Contains => "operator_contains", Reporter, Some(2), 0, None;
    Round => "operator_round", Reporter, Some(1), 0, None;
    MathOp => "operator_mathop", Reporter, Some(1), 0, Some("OPERATOR");
    SetVariableTo => "data_setvariableto", Stack, Some(1), 0, Some("VARIABLE");
    ChangeVariableBy => "data_changevariableby", Stack, Some(1), 0, Some("VARIABLE");
    Variable => "data_variable", Reporter, Some(0), 0, Some("VARIABLE");
    AddToList => "data_addtolist", Stack, Some(1), 0, Some("LIST");
    DeleteOfList => "data_deleteoflist", Stack, Some(1), 0, Some("LIST");
    DeleteAllOfList => "data_deletealloflist", Stack, Some(0), 0, Some("LIST");
    InsertAtList => "data_insertatlist", Stack, Some(2), 0, Some("LIST");
    ReplaceItemOfList => "data_replaceitemoflist", Stack, Some(2), 0, Some("LIST");
    ItemOfList => "data_itemoflist", Reporter, Some(1), 0, Some("LIST");
    LengthOfList => "data_lengthoflist", Reporter, Some(0), 0, Some("LIST");
    ListContainsItem => "data_listcontainsitem", Reporter, Some(1), 0, Some("LIST");
    Call => "procedures_call", Stack, None, 0, Some("PROCCODE");
    Argument => "argument_reporter_string_number", Reporter, Some(0), 0, Some("VALUE");
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One input slot of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(Value),
    /// A nested reporter block producing the value.
    Block(BlockId),
    /// A child sequence owned by a control block (`None` = empty body).
    Substack(Option<BlockId>),
}

impl Input {
    pub fn number(n: f64) -> Self {
        Input::Literal(Value::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Input::Literal(Value::String(s.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub id: BlockId,
    pub opcode: Opcode,
    pub inputs: Vec<Input>,
    pub field: Option<String>,
    pub next: Option<BlockId>,
}

impl BlockNode {
    /// Value inputs come first; child sequences follow them.
    pub fn value_inputs(&self) -> &[Input] {
        let count = self.inputs.len() - self.opcode.shape().substacks.min(self.inputs.len());
        &self.inputs[..count]
    }

    pub fn field_str(&self) -> &str {
        self.field.as_deref().unwrap_or("")
    }
}

/// The trigger of a script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Hat {
    GreenFlag,
    KeyPressed(String),
    BroadcastReceived(String),
    CloneStart,
    Clicked,
}

impl Hat {
    /// Whether firing this hat while its script is already running restarts
    /// the running thread instead of leaving it alone.
    pub fn restarts_existing(&self) -> bool {
        !matches!(self, Hat::KeyPressed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub hat: Hat,
    pub body: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDef {
    pub name: String,
    pub params: Vec<String>,
    /// Run without screen refresh: loops inside do not yield.
    pub warp: bool,
    pub body: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    blocks: Vec<BlockNode>,
    scripts: Vec<Script>,
    procedures: Vec<ProcedureDef>,
}

impl Program {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockNode> {
        self.blocks.get(id.index())
    }

    pub fn blocks(&self) -> &[BlockNode] {
        &self.blocks
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn procedures(&self) -> &[ProcedureDef] {
        &self.procedures
    }

    pub fn inputs_of(&self, id: BlockId) -> &[Input] {
        self.block(id).map(|b| b.inputs.as_slice()).unwrap_or(&[])
    }

    pub fn next_of(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).and_then(|b| b.next)
    }

    /// Head of the `slot`-th child sequence of a control block.
    pub fn child_sequence_of(&self, id: BlockId, slot: usize) -> Option<BlockId> {
        let block = self.block(id)?;
        let first_substack = block.value_inputs().len();
        match block.inputs.get(first_substack + slot) {
            Some(Input::Substack(head)) => *head,
            _ => None,
        }
    }

    pub fn procedure(&self, name: &str) -> Option<&ProcedureDef> {
        self.procedures
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn from_parts_unchecked(
        blocks: Vec<BlockNode>,
        scripts: Vec<Script>,
        procedures: Vec<ProcedureDef>,
    ) -> Self {
        Self {
            blocks,
            scripts,
            procedures,
        }
    }
}

/// Incremental construction of a [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    blocks: Vec<BlockNode>,
    scripts: Vec<Script>,
    procedures: Vec<ProcedureDef>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, opcode: Opcode, inputs: Vec<Input>, field: Option<&str>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockNode {
            id,
            opcode,
            inputs,
            field: field.map(ToString::to_string),
            next: None,
        });
        id
    }

    /// Adds a block by its opcode name, the form editors and snapshots use.
    pub fn push_named(
        &mut self,
        opcode: &str,
        inputs: Vec<Input>,
        field: Option<&str>,
    ) -> Result<BlockId, StructuralError> {
        let op = Opcode::from_name(opcode).ok_or_else(|| StructuralError::UnknownOpcode {
            opcode: opcode.to_string(),
        })?;
        Ok(self.push(op, inputs, field))
    }

    /// Links the given blocks into a stack and returns its head.
    pub fn stack(&mut self, blocks: &[BlockId]) -> Option<BlockId> {
        for pair in blocks.windows(2) {
            if let Some(block) = self.blocks.get_mut(pair[0].index()) {
                block.next = Some(pair[1]);
            }
        }
        blocks.first().copied()
    }

    pub fn set_next(&mut self, block: BlockId, next: Option<BlockId>) {
        if let Some(node) = self.blocks.get_mut(block.index()) {
            node.next = next;
        }
    }

    pub fn script(&mut self, hat: Hat, body: Option<BlockId>) {
        self.scripts.push(Script { hat, body });
    }

    pub fn procedure(&mut self, name: &str, params: Vec<String>, warp: bool, body: Option<BlockId>) {
        self.procedures.push(ProcedureDef {
            name: name.to_string(),
            params,
            warp,
            body,
        });
    }

    pub fn build(self) -> Result<Program, StructuralError> {
        let program = Program::from_parts_unchecked(self.blocks, self.scripts, self.procedures);
        validate(&program)?;
        Ok(program)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScope {
    All,
    ThisScript,
    OtherScriptsInSprite,
}

impl StopScope {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "all" => Some(StopScope::All),
            "this script" => Some(StopScope::ThisScript),
            "other scripts in sprite" | "other scripts in stage" => {
                Some(StopScope::OtherScriptsInSprite)
            }
            _ => None,
        }
    }
}

/// Clone menu value meaning "the sprite running this block".
pub const CLONE_MYSELF: &str = "_myself_";
