//! The engine tick loop.
//!
//! Each [`Scheduler::tick`] drains the events published during the previous
//! tick, steps every live thread once in target layer order, reaps finished
//! threads and redraws the attached surface. Everything runs on the caller's
//! thread; scripts only interleave at their yield points.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::costume::Costume;
use crate::error::{EngineFault, LoadError};
use crate::events::{BroadcastTracker, Event, EventBus};
use crate::program::{Hat, Program};
use crate::render::{Renderer, Surface};
use crate::snapshot::EngineSnapshot;
use crate::target::TargetId;
use crate::thread::{ExecutionThread, StepContext, StepOutcome, ThreadId, ThreadStatus};
use crate::world::World;
use log::{debug, error, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub events_delivered: usize,
    pub threads_started: usize,
    pub threads_stepped: usize,
    pub threads_finished: usize,
    pub threads_live: usize,
    pub rendered: bool,
}

pub struct Scheduler {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    world: World,
    threads: Vec<ExecutionThread>,
    bus: EventBus,
    broadcasts: BroadcastTracker,
    rng: StdRng,
    renderer: Renderer,
    surface: Option<Box<dyn Surface>>,
    keys: BTreeSet<String>,
    timer_start: Duration,
    next_thread: u64,
    tick_count: u64,
    fault: Option<EngineFault>,
}

impl Scheduler {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, SystemClock::new())
    }

    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> Self {
        let world = World::new(config.stage_width, config.stage_height, config.fence_sprites);
        let rng = StdRng::seed_from_u64(config.random_seed);
        let timer_start = clock.now();
        Self {
            config,
            clock: Box::new(clock),
            world,
            threads: Vec::new(),
            bus: EventBus::new(),
            broadcasts: BroadcastTracker::new(),
            rng,
            renderer: Renderer::new(),
            surface: None,
            keys: BTreeSet::new(),
            timer_start,
            next_thread: 1,
            tick_count: 0,
            fault: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct access to the model for hosts (dragging, editor previews).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn fault(&self) -> Option<&EngineFault> {
        self.fault.as_ref()
    }

    pub fn threads(&self) -> &[ExecutionThread] {
        &self.threads
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// No live threads and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.threads.iter().all(|t| t.is_done()) && self.bus.is_empty()
    }

    pub fn add_stage(
        &mut self,
        name: &str,
        program: Program,
        costumes: Vec<Costume>,
    ) -> Result<TargetId, LoadError> {
        self.world.add_stage(name, Arc::new(program), costumes)
    }

    pub fn add_sprite(
        &mut self,
        name: &str,
        program: Program,
        costumes: Vec<Costume>,
    ) -> Result<TargetId, LoadError> {
        self.world.add_sprite(name, Arc::new(program), costumes)
    }

    /// Replaces the program of a sprite or the stage. Its running threads
    /// stop; existing clones keep the program they were cloned with.
    pub fn load_program(&mut self, target: TargetId, program: Program) -> Result<(), LoadError> {
        self.world.set_program(target, Arc::new(program))?;
        self.kill_where(|t| t.target() == target);
        Ok(())
    }

    pub fn attach_surface(&mut self, surface: Box<dyn Surface>) {
        self.surface = Some(surface);
    }

    pub fn detach_surface(&mut self) -> Option<Box<dyn Surface>> {
        self.surface.take()
    }

    pub fn publish(&mut self, event: Event) {
        self.bus.publish(event);
    }

    pub fn broadcast(&mut self, message: &str) {
        self.bus.publish(Event::broadcast(message));
    }

    /// Marks a key as held and announces the press.
    pub fn key_down(&mut self, key: &str) {
        let key = key.to_lowercase();
        self.keys.insert(key.clone());
        self.bus.publish(Event::KeyPressed(key));
    }

    pub fn key_up(&mut self, key: &str) {
        self.keys.remove(&key.to_lowercase());
    }

    pub fn click(&mut self, target: TargetId) {
        self.bus.publish(Event::Clicked(target));
    }

    /// Green flag: stop everything, reset the timer and announce the flag.
    pub fn start(&mut self) {
        self.stop_all();
        self.timer_start = self.clock.now();
        self.bus.publish(Event::GreenFlag);
    }

    /// Halts every thread, drops queued events, deletes clones and clears
    /// speech bubbles.
    pub fn stop_all(&mut self) {
        debug!("stopping all ({} threads)", self.threads.len());
        self.threads.clear();
        self.bus.clear();
        self.broadcasts.clear();
        self.world.delete_all_clones();
        self.world.clear_speech();
    }

    /// Clones `parent` outside of any script, as a script would.
    pub fn spawn_clone(&mut self, parent: TargetId) -> Option<TargetId> {
        let clone = self.world.spawn_clone(parent, self.config.clone_limit)?;
        self.start_clone_threads(parent, clone);
        Some(clone)
    }

    pub fn delete_clone(&mut self, target: TargetId) -> bool {
        if !self.world.delete_clone(target) {
            return false;
        }
        self.kill_where(|t| t.target() == target);
        true
    }

    pub fn export_state(&self) -> EngineSnapshot {
        EngineSnapshot::capture(&self.world, self.tick_count)
    }

    /// Replaces the whole world with a snapshot. On success the engine is
    /// idle; on failure the current world is kept.
    pub fn import_state(&mut self, snapshot: &EngineSnapshot) -> Result<(), LoadError> {
        let mut world = World::new(
            self.config.stage_width,
            self.config.stage_height,
            self.config.fence_sprites,
        );
        snapshot.restore(&mut world)?;
        self.stop_all();
        self.world = world;
        self.renderer.invalidate();
        self.tick_count = snapshot.tick;
        Ok(())
    }

    fn allocate_thread(&mut self) -> ThreadId {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        id
    }

    fn kill_where(&mut self, mut pred: impl FnMut(&ExecutionThread) -> bool) {
        for thread in self.threads.iter_mut() {
            if !thread.is_done() && pred(thread) {
                if let ThreadStatus::WaitingOnBroadcast(ticket) = thread.status() {
                    self.broadcasts.release(*ticket);
                }
                thread.stop();
                self.broadcasts.thread_finished(thread.id());
            }
        }
    }

    fn start_clone_threads(&mut self, parent: TargetId, clone: TargetId) {
        let Some(program) = self.world.target(clone).map(|t| Arc::clone(&t.program)) else {
            return;
        };
        for (index, script) in program.scripts().iter().enumerate() {
            if script.hat == Hat::CloneStart {
                let id = self.allocate_thread();
                self.threads.push(ExecutionThread::waiting_for_clone(
                    id,
                    clone,
                    Arc::clone(&program),
                    index,
                ));
            }
        }
        self.bus.publish(Event::CloneCreated { parent, clone });
    }

    /// Starts (or restarts) the scripts an event triggers, in target
    /// creation order and then script order. Returns the threads started.
    fn deliver(&mut self, event: &Event) -> Vec<ThreadId> {
        if let Event::CloneCreated { clone, .. } = event {
            let mut woken = Vec::new();
            for thread in self.threads.iter_mut().filter(|t| t.target() == *clone) {
                thread.wake();
                woken.push(thread.id());
            }
            return woken;
        }

        let mut matches = Vec::new();
        for target in self.world.targets() {
            for (index, script) in target.program.scripts().iter().enumerate() {
                if event.triggers(&script.hat, target) {
                    matches.push((
                        target.id,
                        Arc::clone(&target.program),
                        index,
                        script.hat.restarts_existing(),
                    ));
                }
            }
        }

        let mut started = Vec::new();
        for (target, program, index, restart) in matches {
            let running = self
                .threads
                .iter()
                .any(|t| !t.is_done() && t.target() == target && t.script() == index);
            if running {
                if !restart {
                    continue;
                }
                self.kill_where(|t| t.target() == target && t.script() == index);
            }
            let id = self.allocate_thread();
            self.threads.push(ExecutionThread::new(id, target, program, index));
            started.push(id);
        }
        if let Event::Broadcast {
            ticket: Some(ticket),
            ..
        } = event
        {
            self.broadcasts.delivered(*ticket, &started);
        }
        started
    }

    pub fn tick(&mut self) -> Result<TickReport, EngineFault> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        self.tick_count += 1;
        let now = self.clock.now();
        let mut report = TickReport {
            tick: self.tick_count,
            ..TickReport::default()
        };

        let events = self.bus.drain();
        report.events_delivered = events.len();
        for event in &events {
            let started = self.deliver(event);
            if !matches!(event, Event::CloneCreated { .. }) {
                report.threads_started += started.len();
            }
        }

        let mut order: Vec<(usize, ThreadId, usize)> = self
            .threads
            .iter()
            .enumerate()
            .map(|(index, t)| (self.world.layer_order(t.target()), t.id(), index))
            .collect();
        order.sort();

        for (_, _, index) in order {
            let thread = &mut self.threads[index];
            if thread.is_done() || *thread.status() == ThreadStatus::WaitingOnClone {
                continue;
            }
            let mut ctx = StepContext {
                world: &mut self.world,
                bus: &mut self.bus,
                broadcasts: &mut self.broadcasts,
                rng: &mut self.rng,
                config: &self.config,
                now,
                timer_start: &mut self.timer_start,
                keys: &self.keys,
                spawned: Vec::new(),
            };
            let result = thread.step(&mut ctx);
            let spawned = std::mem::take(&mut ctx.spawned);
            report.threads_stepped += 1;
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(fault) => {
                    error!("engine fault, halting run: {}", fault);
                    self.fault = Some(fault.clone());
                    return Err(fault);
                }
            };
            let thread_id = thread.id();
            let target = thread.target();
            if thread.is_done() {
                self.broadcasts.thread_finished(thread_id);
            }
            for (parent, clone) in spawned {
                self.start_clone_threads(parent, clone);
            }
            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::StopAll => {
                    self.stop_all();
                    break;
                }
                StepOutcome::StopOtherScripts => {
                    self.kill_where(|t| t.target() == target && t.id() != thread_id);
                }
                StepOutcome::DeleteClone => {
                    self.delete_clone(target);
                }
            }
        }

        let before = self.threads.len();
        self.threads.retain(|t| !t.is_done());
        report.threads_finished = before - self.threads.len();
        report.threads_live = self.threads.len();

        if let Some(surface) = self.surface.as_mut() {
            self.renderer.render(
                &self.world,
                self.config.stage_width,
                self.config.stage_height,
                surface.as_mut(),
            );
            report.rendered = true;
        }
        trace!(
            "tick {}: {} events, {} stepped, {} live",
            report.tick,
            report.events_delivered,
            report.threads_stepped,
            report.threads_live
        );
        Ok(report)
    }

    /// Runs `ticks` ticks back to back without consulting the clock.
    pub fn run_ticks(&mut self, ticks: u64) -> Result<(), EngineFault> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Runs `ticks` ticks paced to the configured rate. A late tick is run
    /// immediately rather than skipped.
    pub fn run_realtime(&mut self, ticks: u64) -> Result<(), EngineFault> {
        let start = self.clock.now();
        for n in 0..ticks {
            self.pace(start, n);
            self.tick()?;
        }
        Ok(())
    }

    /// Sleeps until tick `n` of a run that began at `start` is due. Returns
    /// at once when that time has already passed.
    pub fn pace(&self, start: Duration, n: u64) {
        let interval = self.config.tick_interval();
        let due = start.saturating_add(interval.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX)));
        let now = self.clock.now();
        if due > now {
            self.clock.sleep(due - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::MockClock;
    use crate::config::EngineConfig;
    use crate::scheduler_from_source;
    use std::path::Path;

    #[test]
    fn restarted_waiters_release_their_broadcast_tickets() {
        let source = "stage\n  when flag clicked\n    forever\n      broadcast [tick]\n    end\n  end\nend\n\
                      sprite Cat\n  when I receive [tick]\n    broadcast and wait [slow]\n  end\n  \
                      when I receive [slow]\n    wait (100) seconds\n  end\nend\n";
        let mut scheduler =
            scheduler_from_source(source, Path::new("."), EngineConfig::default(), MockClock::new()).unwrap();
        scheduler.start();
        scheduler.run_ticks(500).unwrap();
        assert!(
            scheduler.broadcasts.open_tickets() <= 2,
            "{} tickets still open",
            scheduler.broadcasts.open_tickets()
        );
    }
}
