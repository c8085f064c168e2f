//! Execution threads: resumable cursors over one script.
//!
//! A thread never blocks. [`ExecutionThread::step`] runs blocks along the
//! cursor until the thread reaches a yield point, starts waiting, finishes,
//! or uses up its per-tick step budget, then hands control back to the
//! scheduler with the reason recorded in [`ThreadStatus`].

use crate::config::EngineConfig;
use crate::error::EngineFault;
use crate::events::{BroadcastTicket, BroadcastTracker, Event, EventBus};
use crate::program::{BlockId, Input, Opcode, Program, StopScope, CLONE_MYSELF};
use crate::target::{BubbleKind, RotationStyle, Speech, Target, TargetId};
use crate::value::{math_op, Value};
use crate::world::World;
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do when a timed wait runs out.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterWait {
    Nothing,
    /// Clear the bubble if it still shows this speech.
    ClearSpeech(Speech),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Yielded,
    WaitingOnTimer { deadline: Duration, then: AfterWait },
    WaitingOnBroadcast(BroadcastTicket),
    /// A clone-start script whose clone has not been announced yet.
    WaitingOnClone,
    Done,
}

/// Requests a step makes of the scheduler, applied as soon as the step
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    StopAll,
    StopOtherScripts,
    DeleteClone,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LoopMode {
    Times(u64),
    Forever,
    Until,
    While,
}

#[derive(Debug, Clone, PartialEq)]
enum FrameKind {
    Root,
    Branch,
    Loop {
        block: BlockId,
        mode: LoopMode,
        /// Set when the loop yielded after a body pass and must test its
        /// condition on resume.
        recheck: bool,
    },
    Procedure {
        args: Vec<(String, Value)>,
        warp: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    /// Next block to run in this sequence; `None` once the sequence ends.
    pc: Option<BlockId>,
    kind: FrameKind,
}

/// Everything a step may read or mutate besides the thread itself.
pub struct StepContext<'a> {
    pub world: &'a mut World,
    pub bus: &'a mut EventBus,
    pub broadcasts: &'a mut BroadcastTracker,
    pub rng: &'a mut StdRng,
    pub config: &'a EngineConfig,
    pub now: Duration,
    pub timer_start: &'a mut Duration,
    pub keys: &'a BTreeSet<String>,
    /// `(parent, clone)` pairs created during the step.
    pub spawned: Vec<(TargetId, TargetId)>,
}

enum Flow {
    Next,
    /// The block already moved the cursor.
    Jumped,
    /// Move past the block, then hand back control; the block set the status.
    Suspend,
    /// Stay on the block and yield; it runs again next tick.
    Retry,
    Stop(StepOutcome),
    Signal(StepOutcome),
}

enum FrameEnd {
    Continue,
    Yield,
    Done,
}

#[derive(Debug, Clone)]
pub struct ExecutionThread {
    id: ThreadId,
    target: TargetId,
    script: usize,
    program: Arc<Program>,
    frames: Vec<Frame>,
    status: ThreadStatus,
    steps_this_tick: usize,
}

impl ExecutionThread {
    pub fn new(id: ThreadId, target: TargetId, program: Arc<Program>, script: usize) -> Self {
        let body = program.scripts().get(script).and_then(|s| s.body);
        Self {
            id,
            target,
            script,
            program,
            frames: vec![Frame {
                pc: body,
                kind: FrameKind::Root,
            }],
            status: ThreadStatus::Ready,
            steps_this_tick: 0,
        }
    }

    /// A clone-start thread that sleeps until its clone is announced.
    pub fn waiting_for_clone(
        id: ThreadId,
        target: TargetId,
        program: Arc<Program>,
        script: usize,
    ) -> Self {
        let mut thread = Self::new(id, target, program, script);
        thread.status = ThreadStatus::WaitingOnClone;
        thread
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn script(&self) -> usize {
        self.script
    }

    pub fn status(&self) -> &ThreadStatus {
        &self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == ThreadStatus::Done
    }

    pub fn steps_this_tick(&self) -> usize {
        self.steps_this_tick
    }

    pub fn wake(&mut self) {
        if self.status == ThreadStatus::WaitingOnClone {
            self.status = ThreadStatus::Ready;
        }
    }

    pub fn stop(&mut self) {
        self.frames.clear();
        self.status = ThreadStatus::Done;
    }

    fn in_warp(&self) -> bool {
        self.frames
            .iter()
            .any(|f| matches!(f.kind, FrameKind::Procedure { warp: true, .. }))
    }

    fn call_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| matches!(f.kind, FrameKind::Procedure { .. }))
            .count()
    }

    fn advance(&mut self, to: Option<BlockId>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = to;
        }
    }

    /// Runs the thread until its next yield point.
    pub fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, EngineFault> {
        self.steps_this_tick = 0;
        match &self.status {
            ThreadStatus::Done | ThreadStatus::WaitingOnClone => return Ok(StepOutcome::Continue),
            ThreadStatus::WaitingOnTimer { deadline, then } => {
                if ctx.now < *deadline {
                    return Ok(StepOutcome::Continue);
                }
                if let AfterWait::ClearSpeech(speech) = then {
                    if let Some(target) = ctx.world.target_mut(self.target) {
                        if target.speech.as_ref() == Some(speech) {
                            target.speech = None;
                        }
                    }
                }
            }
            ThreadStatus::WaitingOnBroadcast(ticket) => {
                if !ctx.broadcasts.is_complete(*ticket) {
                    return Ok(StepOutcome::Continue);
                }
                ctx.broadcasts.release(*ticket);
            }
            ThreadStatus::Ready | ThreadStatus::Running | ThreadStatus::Yielded => {}
        }
        if ctx.world.target(self.target).is_none() {
            return Err(EngineFault::MissingTarget {
                thread: self.id.0,
                target: self.target,
            });
        }
        self.status = ThreadStatus::Running;
        let program = Arc::clone(&self.program);
        let mut outcome = StepOutcome::Continue;

        loop {
            if self.steps_this_tick >= ctx.config.max_steps_per_tick {
                self.status = ThreadStatus::Yielded;
                return Ok(outcome);
            }
            self.steps_this_tick += 1;

            let Some(frame) = self.frames.last() else {
                return Err(EngineFault::EmptyCursor { thread: self.id.0 });
            };
            let Some(block) = frame.pc else {
                match self.end_frame(ctx, &program)? {
                    FrameEnd::Continue => continue,
                    FrameEnd::Yield => {
                        self.status = ThreadStatus::Yielded;
                        return Ok(outcome);
                    }
                    FrameEnd::Done => {
                        self.stop();
                        return Ok(outcome);
                    }
                }
            };

            let next = program
                .block(block)
                .ok_or(EngineFault::MissingBlock {
                    thread: self.id.0,
                    block,
                })?
                .next;
            match self.execute(block, ctx, &program)? {
                Flow::Next => self.advance(next),
                Flow::Jumped => {}
                Flow::Suspend => {
                    self.advance(next);
                    return Ok(outcome);
                }
                Flow::Retry => {
                    self.status = ThreadStatus::Yielded;
                    return Ok(outcome);
                }
                Flow::Stop(stop) => {
                    self.stop();
                    // A plain stop keeps any request signalled earlier in the step.
                    return Ok(if stop == StepOutcome::Continue { outcome } else { stop });
                }
                Flow::Signal(signal) => {
                    outcome = signal;
                    self.advance(next);
                }
            }
        }
    }

    /// Handles the end of the innermost sequence.
    fn end_frame(
        &mut self,
        ctx: &mut StepContext<'_>,
        program: &Program,
    ) -> Result<FrameEnd, EngineFault> {
        let warp = self.in_warp();
        let Some(frame) = self.frames.last_mut() else {
            return Err(EngineFault::EmptyCursor { thread: self.id.0 });
        };
        let (block, mode, recheck) = match &mut frame.kind {
            FrameKind::Root => return Ok(FrameEnd::Done),
            FrameKind::Branch | FrameKind::Procedure { .. } => {
                self.frames.pop();
                return Ok(FrameEnd::Continue);
            }
            FrameKind::Loop {
                block,
                mode,
                recheck,
            } => (*block, mode, recheck),
        };
        let body = program.child_sequence_of(block, 0);
        match mode {
            LoopMode::Times(remaining) => {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.frames.pop();
                    return Ok(FrameEnd::Continue);
                }
                frame.pc = body;
                Ok(if warp { FrameEnd::Continue } else { FrameEnd::Yield })
            }
            LoopMode::Forever => {
                frame.pc = body;
                Ok(if warp { FrameEnd::Continue } else { FrameEnd::Yield })
            }
            LoopMode::Until | LoopMode::While => {
                if !warp && !*recheck {
                    *recheck = true;
                    return Ok(FrameEnd::Yield);
                }
                *recheck = false;
                let until = *mode == LoopMode::Until;
                let condition = self.input(ctx, program, block, 0, 0)?.to_boolean();
                if condition != until {
                    self.advance(body);
                } else {
                    self.frames.pop();
                }
                Ok(FrameEnd::Continue)
            }
        }
    }

    fn push_loop(&mut self, block: BlockId, mode: LoopMode, body: Option<BlockId>) {
        self.frames.push(Frame {
            pc: body,
            kind: FrameKind::Loop {
                block,
                mode,
                recheck: false,
            },
        });
    }

    fn push_branch(&mut self, body: Option<BlockId>) {
        self.frames.push(Frame {
            pc: body,
            kind: FrameKind::Branch,
        });
    }

    fn target_mut<'w>(&self, world: &'w mut World) -> Result<&'w mut Target, EngineFault> {
        world.target_mut(self.target).ok_or(EngineFault::MissingTarget {
            thread: self.id.0,
            target: self.target,
        })
    }

    fn target_ref<'w>(&self, world: &'w World) -> Result<&'w Target, EngineFault> {
        world.target(self.target).ok_or(EngineFault::MissingTarget {
            thread: self.id.0,
            target: self.target,
        })
    }

    fn execute(
        &mut self,
        block: BlockId,
        ctx: &mut StepContext<'_>,
        program: &Program,
    ) -> Result<Flow, EngineFault> {
        let node = program.block(block).ok_or(EngineFault::MissingBlock {
            thread: self.id.0,
            block,
        })?;
        let id = self.target;

        match node.opcode {
            Opcode::MoveSteps => {
                let steps = self.input(ctx, program, block, 0, 0)?.to_number();
                let direction = self.target_ref(ctx.world)?.direction;
                let radians = (90.0 - direction).to_radians();
                let dx = steps * snap(radians.cos());
                let dy = steps * snap(radians.sin());
                ctx.world.move_by(id, dx, dy);
            }
            Opcode::TurnRight | Opcode::TurnLeft => {
                let degrees = self.input(ctx, program, block, 0, 0)?.to_number();
                let target = self.target_mut(ctx.world)?;
                if !target.is_stage {
                    let signed = if node.opcode == Opcode::TurnRight {
                        degrees
                    } else {
                        -degrees
                    };
                    let direction = target.direction + signed;
                    target.set_direction(direction);
                }
            }
            Opcode::PointInDirection => {
                let degrees = self.input(ctx, program, block, 0, 0)?.to_number();
                let target = self.target_mut(ctx.world)?;
                if !target.is_stage {
                    target.set_direction(degrees);
                }
            }
            Opcode::GoToXY => {
                let x = self.input(ctx, program, block, 0, 0)?.to_number();
                let y = self.input(ctx, program, block, 1, 0)?.to_number();
                ctx.world.move_to(id, x, y);
            }
            Opcode::ChangeXBy => {
                let dx = self.input(ctx, program, block, 0, 0)?.to_number();
                ctx.world.move_by(id, dx, 0.0);
            }
            Opcode::ChangeYBy => {
                let dy = self.input(ctx, program, block, 0, 0)?.to_number();
                ctx.world.move_by(id, 0.0, dy);
            }
            Opcode::SetX => {
                let x = self.input(ctx, program, block, 0, 0)?.to_number();
                let y = self.target_ref(ctx.world)?.y;
                ctx.world.move_to(id, x, y);
            }
            Opcode::SetY => {
                let y = self.input(ctx, program, block, 0, 0)?.to_number();
                let x = self.target_ref(ctx.world)?.x;
                ctx.world.move_to(id, x, y);
            }
            Opcode::SetRotationStyle => {
                if let Some(style) = RotationStyle::parse(node.field_str()) {
                    self.target_mut(ctx.world)?.rotation_style = style;
                }
            }
            Opcode::Say | Opcode::Think => {
                let text = self.input(ctx, program, block, 0, 0)?.to_display_string();
                let kind = if node.opcode == Opcode::Say {
                    BubbleKind::Say
                } else {
                    BubbleKind::Think
                };
                let target = self.target_mut(ctx.world)?;
                target.speech = (!text.is_empty()).then_some(Speech { kind, text });
            }
            Opcode::SayForSecs | Opcode::ThinkForSecs => {
                let text = self.input(ctx, program, block, 0, 0)?.to_display_string();
                let secs = self.input(ctx, program, block, 1, 0)?.to_number();
                let kind = if node.opcode == Opcode::SayForSecs {
                    BubbleKind::Say
                } else {
                    BubbleKind::Think
                };
                let speech = Speech { kind, text };
                self.target_mut(ctx.world)?.speech = Some(speech.clone());
                self.status = ThreadStatus::WaitingOnTimer {
                    deadline: deadline_after(ctx.now, secs),
                    then: AfterWait::ClearSpeech(speech),
                };
                return Ok(Flow::Suspend);
            }
            Opcode::Show | Opcode::Hide => {
                let target = self.target_mut(ctx.world)?;
                if !target.is_stage {
                    target.visible = node.opcode == Opcode::Show;
                }
            }
            Opcode::SwitchCostumeTo => {
                let choice = self.input(ctx, program, block, 0, 0)?;
                switch_costume(self.target_mut(ctx.world)?, &choice);
            }
            Opcode::NextCostume => {
                let target = self.target_mut(ctx.world)?;
                let next = target.costume as i64 + 1;
                target.set_costume(next);
            }
            Opcode::SwitchBackdropTo => {
                let choice = self.input(ctx, program, block, 0, 0)?;
                if let Some(stage) = ctx.world.stage_id().and_then(|s| ctx.world.target_mut(s)) {
                    switch_costume(stage, &choice);
                }
            }
            Opcode::NextBackdrop => {
                if let Some(stage) = ctx.world.stage_id().and_then(|s| ctx.world.target_mut(s)) {
                    let next = stage.costume as i64 + 1;
                    stage.set_costume(next);
                }
            }
            Opcode::ChangeSizeBy => {
                let delta = self.input(ctx, program, block, 0, 0)?.to_number();
                let target = self.target_mut(ctx.world)?;
                if !target.is_stage {
                    let size = target.size + delta;
                    target.set_size(size);
                }
            }
            Opcode::SetSizeTo => {
                let size = self.input(ctx, program, block, 0, 0)?.to_number();
                let target = self.target_mut(ctx.world)?;
                if !target.is_stage {
                    target.set_size(size);
                }
            }
            Opcode::GoToFrontBack => {
                if node.field_str().eq_ignore_ascii_case("front") {
                    ctx.world.go_to_front(id);
                } else {
                    ctx.world.go_to_back(id);
                }
            }
            Opcode::GoForwardBackwardLayers => {
                let layers = self.input(ctx, program, block, 0, 0)?.to_index();
                let delta = if node.field_str().eq_ignore_ascii_case("forward") {
                    layers
                } else {
                    -layers
                };
                ctx.world.change_layer(id, delta);
            }
            Opcode::Broadcast => {
                let name = self.input(ctx, program, block, 0, 0)?.to_display_string();
                ctx.bus.publish(Event::broadcast(&name));
            }
            Opcode::BroadcastAndWait => {
                let name = self.input(ctx, program, block, 0, 0)?.to_display_string();
                let ticket = ctx.broadcasts.open();
                ctx.bus.publish(Event::Broadcast {
                    name,
                    ticket: Some(ticket),
                });
                self.status = ThreadStatus::WaitingOnBroadcast(ticket);
                return Ok(Flow::Suspend);
            }
            Opcode::Wait => {
                let secs = self.input(ctx, program, block, 0, 0)?.to_number();
                self.status = ThreadStatus::WaitingOnTimer {
                    deadline: deadline_after(ctx.now, secs),
                    then: AfterWait::Nothing,
                };
                return Ok(Flow::Suspend);
            }
            Opcode::WaitUntil => {
                if !self.input(ctx, program, block, 0, 0)?.to_boolean() {
                    return Ok(Flow::Retry);
                }
            }
            Opcode::Repeat => {
                let count = self.input(ctx, program, block, 0, 0)?.to_number().round();
                self.advance(node.next);
                if count >= 1.0 {
                    let body = program.child_sequence_of(block, 0);
                    self.push_loop(block, LoopMode::Times(count as u64), body);
                }
                return Ok(Flow::Jumped);
            }
            Opcode::Forever => {
                self.advance(node.next);
                let body = program.child_sequence_of(block, 0);
                self.push_loop(block, LoopMode::Forever, body);
                return Ok(Flow::Jumped);
            }
            Opcode::RepeatUntil | Opcode::While => {
                let condition = self.input(ctx, program, block, 0, 0)?.to_boolean();
                let until = node.opcode == Opcode::RepeatUntil;
                self.advance(node.next);
                if condition != until {
                    let body = program.child_sequence_of(block, 0);
                    let mode = if until { LoopMode::Until } else { LoopMode::While };
                    self.push_loop(block, mode, body);
                }
                return Ok(Flow::Jumped);
            }
            Opcode::If => {
                let condition = self.input(ctx, program, block, 0, 0)?.to_boolean();
                self.advance(node.next);
                if condition {
                    self.push_branch(program.child_sequence_of(block, 0));
                }
                return Ok(Flow::Jumped);
            }
            Opcode::IfElse => {
                let condition = self.input(ctx, program, block, 0, 0)?.to_boolean();
                self.advance(node.next);
                let slot = if condition { 0 } else { 1 };
                self.push_branch(program.child_sequence_of(block, slot));
                return Ok(Flow::Jumped);
            }
            Opcode::Stop => {
                return Ok(match StopScope::parse(node.field_str()) {
                    Some(StopScope::All) => Flow::Stop(StepOutcome::StopAll),
                    Some(StopScope::OtherScriptsInSprite) => {
                        Flow::Signal(StepOutcome::StopOtherScripts)
                    }
                    _ => self.stop_this_script(),
                });
            }
            Opcode::CreateCloneOf => {
                let option = node.field_str();
                let source = if option == CLONE_MYSELF {
                    Some(id)
                } else {
                    ctx.world.find_by_name(option)
                };
                match source {
                    Some(source) => {
                        if let Some(clone) = ctx.world.spawn_clone(source, ctx.config.clone_limit) {
                            ctx.spawned.push((source, clone));
                        }
                    }
                    None => debug!("create clone of unknown sprite '{}'", option),
                }
            }
            Opcode::DeleteThisClone => {
                if self.target_ref(ctx.world)?.is_clone() {
                    return Ok(Flow::Stop(StepOutcome::DeleteClone));
                }
            }
            Opcode::ResetTimer => {
                *ctx.timer_start = ctx.now;
            }
            Opcode::SetVariableTo => {
                let value = self.input(ctx, program, block, 0, 0)?;
                ctx.world.set_variable(id, node.field_str(), value);
            }
            Opcode::ChangeVariableBy => {
                let delta = self.input(ctx, program, block, 0, 0)?;
                ctx.world.change_variable(id, node.field_str(), &delta);
            }
            Opcode::AddToList => {
                let item = self.input(ctx, program, block, 0, 0)?;
                if let Some(list) = ctx.world.list_mut(id, node.field_str()) {
                    list.push(item);
                }
            }
            Opcode::DeleteOfList => {
                let index = self.input(ctx, program, block, 0, 0)?;
                let all = index.to_display_string().eq_ignore_ascii_case("all");
                if let Some(list) = ctx.world.list_mut(id, node.field_str()) {
                    if all {
                        list.clear();
                    } else if let Some(i) = list_index(&index, list.len(), ctx.rng) {
                        list.remove(i);
                    }
                }
            }
            Opcode::DeleteAllOfList => {
                if let Some(list) = ctx.world.list_mut(id, node.field_str()) {
                    list.clear();
                }
            }
            Opcode::InsertAtList => {
                let item = self.input(ctx, program, block, 0, 0)?;
                let index = self.input(ctx, program, block, 1, 0)?;
                if let Some(list) = ctx.world.list_mut(id, node.field_str()) {
                    if let Some(i) = list_index(&index, list.len() + 1, ctx.rng) {
                        list.insert(i, item);
                    }
                }
            }
            Opcode::ReplaceItemOfList => {
                let index = self.input(ctx, program, block, 0, 0)?;
                let item = self.input(ctx, program, block, 1, 0)?;
                if let Some(list) = ctx.world.list_mut(id, node.field_str()) {
                    if let Some(i) = list_index(&index, list.len(), ctx.rng) {
                        list[i] = item;
                    }
                }
            }
            Opcode::Call => {
                let name = node.field_str();
                let Some(procedure) = program.procedure(name) else {
                    debug!("call of unknown procedure '{}'", name);
                    return Ok(Flow::Next);
                };
                if self.call_depth() >= ctx.config.max_call_depth {
                    debug!(
                        "thread {} skipped call to '{}': call depth limit {} reached",
                        self.id, name, ctx.config.max_call_depth
                    );
                    return Ok(Flow::Next);
                }
                let mut args = Vec::with_capacity(procedure.params.len());
                for (slot, param) in procedure.params.iter().enumerate() {
                    args.push((param.clone(), self.input(ctx, program, block, slot, 0)?));
                }
                self.advance(node.next);
                self.frames.push(Frame {
                    pc: procedure.body,
                    kind: FrameKind::Procedure {
                        args,
                        warp: procedure.warp,
                    },
                });
                return Ok(Flow::Jumped);
            }
            // A reporter on its own runs for nothing but its evaluation.
            _ => {
                self.evaluate(ctx, program, block, 0)?;
            }
        }
        Ok(Flow::Next)
    }

    /// Unwinds to the innermost procedure call, or ends the thread when
    /// there is none.
    fn stop_this_script(&mut self) -> Flow {
        while let Some(frame) = self.frames.pop() {
            if matches!(frame.kind, FrameKind::Procedure { .. }) {
                return Flow::Jumped;
            }
        }
        Flow::Stop(StepOutcome::Continue)
    }

    fn input(
        &self,
        ctx: &mut StepContext<'_>,
        program: &Program,
        block: BlockId,
        slot: usize,
        depth: usize,
    ) -> Result<Value, EngineFault> {
        match program.inputs_of(block).get(slot) {
            Some(Input::Literal(value)) => Ok(value.clone()),
            Some(Input::Block(child)) => self.evaluate(ctx, program, *child, depth + 1),
            Some(Input::Substack(_)) | None => Ok(Value::empty()),
        }
    }

    fn evaluate(
        &self,
        ctx: &mut StepContext<'_>,
        program: &Program,
        block: BlockId,
        depth: usize,
    ) -> Result<Value, EngineFault> {
        if depth > program.blocks().len() {
            return Err(EngineFault::CyclicChain {
                thread: self.id.0,
                block,
            });
        }
        let node = program.block(block).ok_or(EngineFault::MissingBlock {
            thread: self.id.0,
            block,
        })?;
        let arg = |ctx: &mut StepContext<'_>, slot: usize| {
            self.input(ctx, program, block, slot, depth)
        };
        let value = match node.opcode {
            Opcode::XPosition => Value::Number(self.target_ref(ctx.world)?.x),
            Opcode::YPosition => Value::Number(self.target_ref(ctx.world)?.y),
            Opcode::Direction => Value::Number(self.target_ref(ctx.world)?.direction),
            Opcode::Size => Value::Number(self.target_ref(ctx.world)?.size.round()),
            Opcode::CostumeNumberName => {
                costume_number_name(self.target_ref(ctx.world)?, node.field_str())
            }
            Opcode::BackdropNumberName => match ctx.world.stage() {
                Some(stage) => costume_number_name(stage, node.field_str()),
                None => Value::empty(),
            },
            Opcode::KeyPressed => {
                let key = arg(ctx, 0)?.to_display_string().to_lowercase();
                let held = if key == "any" {
                    !ctx.keys.is_empty()
                } else {
                    ctx.keys.contains(&key)
                };
                Value::Boolean(held)
            }
            Opcode::Timer => {
                let elapsed = ctx.now.saturating_sub(*ctx.timer_start);
                Value::Number(elapsed.as_secs_f64())
            }
            Opcode::Add => arg(ctx, 0)?.add(&arg(ctx, 1)?),
            Opcode::Subtract => arg(ctx, 0)?.subtract(&arg(ctx, 1)?),
            Opcode::Multiply => arg(ctx, 0)?.multiply(&arg(ctx, 1)?),
            Opcode::Divide => arg(ctx, 0)?.divide(&arg(ctx, 1)?),
            Opcode::Mod => arg(ctx, 0)?.modulo(&arg(ctx, 1)?),
            Opcode::Random => {
                let from = arg(ctx, 0)?;
                let to = arg(ctx, 1)?;
                pick_random(&from, &to, ctx.rng)
            }
            Opcode::Lt => Value::Boolean(arg(ctx, 0)?.compare(&arg(ctx, 1)?) == Ordering::Less),
            Opcode::Gt => {
                Value::Boolean(arg(ctx, 0)?.compare(&arg(ctx, 1)?) == Ordering::Greater)
            }
            Opcode::Equals => Value::Boolean(arg(ctx, 0)?.loosely_equals(&arg(ctx, 1)?)),
            Opcode::And => {
                Value::Boolean(arg(ctx, 0)?.to_boolean() && arg(ctx, 1)?.to_boolean())
            }
            Opcode::Or => Value::Boolean(arg(ctx, 0)?.to_boolean() || arg(ctx, 1)?.to_boolean()),
            Opcode::Not => Value::Boolean(!arg(ctx, 0)?.to_boolean()),
            Opcode::Join => Value::String(format!(
                "{}{}",
                arg(ctx, 0)?.to_display_string(),
                arg(ctx, 1)?.to_display_string()
            )),
            Opcode::LetterOf => {
                let index = arg(ctx, 0)?.to_number();
                let text = arg(ctx, 1)?.to_display_string();
                let letter = if index.is_finite() && index >= 1.0 {
                    text.chars().nth(index.floor() as usize - 1)
                } else {
                    None
                };
                Value::String(letter.map(String::from).unwrap_or_default())
            }
            Opcode::Length => Value::Number(arg(ctx, 0)?.to_display_string().chars().count() as f64),
            Opcode::Contains => {
                let haystack = arg(ctx, 0)?.to_display_string().to_lowercase();
                let needle = arg(ctx, 1)?.to_display_string().to_lowercase();
                Value::Boolean(haystack.contains(&needle))
            }
            Opcode::Round => Value::Number((arg(ctx, 0)?.to_number() + 0.5).floor()),
            Opcode::MathOp => {
                let n = arg(ctx, 0)?.to_number();
                Value::Number(math_op(node.field_str(), n).unwrap_or(f64::NAN))
            }
            Opcode::Variable => ctx.world.get_variable(self.target, node.field_str()),
            Opcode::ItemOfList => {
                let index = arg(ctx, 0)?;
                match ctx.world.list(self.target, node.field_str()) {
                    Some(list) => list_index(&index, list.len(), ctx.rng)
                        .map(|i| list[i].clone())
                        .unwrap_or_else(Value::empty),
                    None => Value::empty(),
                }
            }
            Opcode::LengthOfList => Value::Number(
                ctx.world
                    .list(self.target, node.field_str())
                    .map(|l| l.len())
                    .unwrap_or(0) as f64,
            ),
            Opcode::ListContainsItem => {
                let item = arg(ctx, 0)?;
                let found = ctx
                    .world
                    .list(self.target, node.field_str())
                    .map(|l| l.iter().any(|v| v.loosely_equals(&item)))
                    .unwrap_or(false);
                Value::Boolean(found)
            }
            Opcode::Argument => self.argument(node.field_str()),
            // Stack blocks never sit in value slots of a validated program.
            _ => Value::empty(),
        };
        Ok(value)
    }
}

impl ExecutionThread {
    /// Value of a parameter of the innermost running procedure.
    fn argument(&self, name: &str) -> Value {
        let args = self.frames.iter().rev().find_map(|f| match &f.kind {
            FrameKind::Procedure { args, .. } => Some(args),
            _ => None,
        });
        args.and_then(|args| args.iter().find(|(param, _)| param.eq_ignore_ascii_case(name)))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(Value::empty)
    }
}

fn costume_number_name(target: &Target, which: &str) -> Value {
    if which.eq_ignore_ascii_case("name") {
        Value::String(
            target
                .current_costume()
                .map(|c| c.name.clone())
                .unwrap_or_default(),
        )
    } else {
        Value::Number(target.costume as f64 + 1.0)
    }
}

/// Integers when both bounds look like integers, otherwise a uniform float.
fn pick_random(from: &Value, to: &Value, rng: &mut StdRng) -> Value {
    let a = nan_as_zero(from.to_number());
    let b = nan_as_zero(to.to_number());
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    if low == high {
        return Value::Number(low);
    }
    if looks_integral(from) && looks_integral(to) {
        let picked = rng.gen_range(low.round() as i64..=high.round() as i64);
        return Value::Number(picked as f64);
    }
    Value::Number(low + rng.gen::<f64>() * (high - low))
}

fn looks_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.fract() == 0.0,
        Value::String(s) => !s.contains('.'),
        Value::Boolean(_) => true,
    }
}

fn nan_as_zero(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n
    }
}

fn deadline_after(now: Duration, secs: f64) -> Duration {
    let secs = if secs.is_nan() { 0.0 } else { secs.max(0.0) };
    now.saturating_add(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

// Keeps quarter turns exact so movement along the axes does not drift.
fn snap(v: f64) -> f64 {
    (v * 1e10).round() / 1e10
}

fn switch_costume(target: &mut Target, choice: &Value) {
    if let Value::Number(n) = choice {
        if n.is_finite() {
            target.set_costume(n.round() as i64 - 1);
        }
        return;
    }
    let text = choice.to_display_string();
    if target.set_costume_by_name(&text) {
        return;
    }
    match text.to_ascii_lowercase().as_str() {
        "next costume" | "next backdrop" => {
            let next = target.costume as i64 + 1;
            target.set_costume(next);
        }
        "previous costume" | "previous backdrop" => {
            let previous = target.costume as i64 - 1;
            target.set_costume(previous);
        }
        _ => {
            if let Some(n) = choice.as_numeric().filter(|n| n.is_finite()) {
                if !text.trim().is_empty() {
                    target.set_costume(n.round() as i64 - 1);
                }
            }
        }
    }
}

/// Resolves a one-based list position (`last`, `random` and `any` are also
/// accepted) against a list of `len` slots.
fn list_index(value: &Value, len: usize, rng: &mut StdRng) -> Option<usize> {
    if len == 0 {
        return None;
    }
    match value.to_display_string().to_ascii_lowercase().as_str() {
        "last" => return Some(len - 1),
        "random" | "any" => return Some(rng.gen_range(0..len)),
        _ => {}
    }
    let n = value.to_number();
    if !n.is_finite() {
        return None;
    }
    let index = n.floor();
    if index < 1.0 || index > len as f64 {
        return None;
    }
    Some(index as usize - 1)
}
