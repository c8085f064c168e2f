use sbstage_core::costume::Costume;
use sbstage_core::program::CLONE_MYSELF;
use sbstage_core::{
    Clock, EngineConfig, Hat, Input, MockClock, Opcode, Program, ProgramBuilder, Scheduler, TargetId, Value,
};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scheduler_with(config: EngineConfig) -> (Scheduler, MockClock) {
    init_logging();
    let clock = MockClock::new();
    let mut scheduler = Scheduler::with_clock(config, clock.clone());
    scheduler
        .add_stage("Stage", Program::empty(), vec![Costume::default_svg("backdrop1")])
        .unwrap();
    (scheduler, clock)
}

fn scheduler() -> (Scheduler, MockClock) {
    scheduler_with(EngineConfig::default())
}

fn sprite(scheduler: &mut Scheduler, name: &str, program: Program) -> TargetId {
    scheduler
        .add_sprite(name, program, vec![Costume::default_svg("costume1")])
        .unwrap()
}

fn x_of(scheduler: &Scheduler, id: TargetId) -> f64 {
    scheduler.world().target(id).unwrap().x
}

fn y_of(scheduler: &Scheduler, id: TargetId) -> f64 {
    scheduler.world().target(id).unwrap().y
}

/// `when flag clicked: repeat (times) { change x by (dx) }`
fn repeat_change_x(times: f64, dx: f64) -> Program {
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeXBy, vec![Input::number(dx)], None);
    let repeat = b.push(
        Opcode::Repeat,
        vec![Input::number(times), Input::Substack(Some(change))],
        None,
    );
    b.script(Hat::GreenFlag, Some(repeat));
    b.build().unwrap()
}

fn forever(opcode: Opcode, amount: f64) -> Program {
    let mut b = ProgramBuilder::new();
    let change = b.push(opcode, vec![Input::number(amount)], None);
    let forever = b.push(Opcode::Forever, vec![Input::Substack(Some(change))], None);
    b.script(Hat::GreenFlag, Some(forever));
    b.build().unwrap()
}

#[test]
fn repeat_loop_yields_once_per_pass() {
    let (mut scheduler, _clock) = scheduler();
    let cat = sprite(&mut scheduler, "Cat", repeat_change_x(3.0, 10.0));
    scheduler.start();

    let report = scheduler.tick().unwrap();
    assert_eq!(report.threads_started, 1);
    assert_eq!(x_of(&scheduler, cat), 10.0);

    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, cat), 20.0);

    let report = scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, cat), 30.0);
    assert_eq!(report.threads_live, 0);

    scheduler.run_ticks(5).unwrap();
    assert_eq!(x_of(&scheduler, cat), 30.0);
    assert!(scheduler.is_idle());
}

#[test]
fn nothing_runs_before_the_first_tick() {
    let (mut scheduler, _clock) = scheduler();
    let cat = sprite(&mut scheduler, "Cat", repeat_change_x(3.0, 10.0));
    scheduler.start();
    assert_eq!(x_of(&scheduler, cat), 0.0);
    assert_eq!(scheduler.tick_count(), 0);
}

#[test]
fn broadcast_is_seen_on_the_following_tick() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let send = b.push(Opcode::Broadcast, vec![Input::text("go")], None);
    b.script(Hat::GreenFlag, Some(send));
    sprite(&mut scheduler, "Sender", b.build().unwrap());

    let mut b = ProgramBuilder::new();
    let step = b.push(Opcode::ChangeXBy, vec![Input::number(5.0)], None);
    b.script(Hat::BroadcastReceived("GO".to_string()), Some(step));
    let receiver = sprite(&mut scheduler, "Receiver", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, receiver), 0.0);
    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, receiver), 5.0);
}

#[test]
fn wait_resumes_once_the_deadline_passes() {
    let (mut scheduler, clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let wait = b.push(Opcode::Wait, vec![Input::number(1.0)], None);
    let set = b.push(Opcode::SetX, vec![Input::number(100.0)], None);
    let body = b.stack(&[wait, set]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    for _ in 0..9 {
        clock.advance(Duration::from_millis(100));
        scheduler.tick().unwrap();
        assert_eq!(x_of(&scheduler, cat), 0.0, "woke early at {:?}", scheduler.now());
    }
    clock.advance(Duration::from_millis(100));
    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, cat), 100.0);
}

#[test]
fn paced_run_advances_a_mock_clock_by_whole_ticks() {
    let (mut scheduler, clock) = scheduler();
    sprite(&mut scheduler, "Cat", forever(Opcode::ChangeXBy, 1.0));
    scheduler.start();
    scheduler.run_realtime(31).unwrap();
    let interval = scheduler.config().tick_interval();
    assert_eq!(clock.now(), interval * 30);
    assert_eq!(scheduler.tick_count(), 31);
}

#[test]
fn busy_threads_do_not_starve_each_other() {
    let (mut scheduler, _clock) = scheduler();
    let a = sprite(&mut scheduler, "A", forever(Opcode::ChangeXBy, 1.0));
    let b = sprite(&mut scheduler, "B", forever(Opcode::ChangeYBy, 1.0));
    scheduler.start();
    scheduler.run_ticks(5).unwrap();
    assert_eq!(x_of(&scheduler, a), 5.0);
    assert_eq!(y_of(&scheduler, b), 5.0);
}

#[test]
fn warp_forever_is_cut_by_the_step_budget() {
    let config = EngineConfig {
        max_steps_per_tick: 50,
        ..EngineConfig::default()
    };
    let (mut scheduler, _clock) = scheduler_with(config);
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeYBy, vec![Input::number(1.0)], None);
    let looped = b.push(Opcode::Forever, vec![Input::Substack(Some(change))], None);
    b.procedure("spin", vec![], true, Some(looped));
    let call = b.push(Opcode::Call, vec![], Some("spin"));
    b.script(Hat::GreenFlag, Some(call));
    let stuck = sprite(&mut scheduler, "Stuck", b.build().unwrap());
    let other = sprite(&mut scheduler, "Other", forever(Opcode::ChangeXBy, 1.0));

    scheduler.start();
    scheduler.tick().unwrap();
    let climbed = y_of(&scheduler, stuck);
    assert!(climbed > 1.0 && climbed < 50.0, "climbed {}", climbed);
    let spinner = scheduler.threads().iter().find(|t| t.target() == stuck).unwrap();
    assert_eq!(spinner.steps_this_tick(), 50);
    scheduler.run_ticks(2).unwrap();
    assert_eq!(x_of(&scheduler, other), 3.0);
    assert!(y_of(&scheduler, stuck) > climbed);
}

fn random_fill(seed: u64) -> sbstage_core::EngineSnapshot {
    let config = EngineConfig {
        random_seed: seed,
        ..EngineConfig::default()
    };
    let (mut scheduler, _clock) = scheduler_with(config);
    let mut b = ProgramBuilder::new();
    let random = b.push(
        Opcode::Random,
        vec![Input::number(1.0), Input::number(1000.0)],
        None,
    );
    let add = b.push(Opcode::AddToList, vec![Input::Block(random)], Some("rolls"));
    let repeat = b.push(
        Opcode::Repeat,
        vec![Input::number(20.0), Input::Substack(Some(add))],
        None,
    );
    b.script(Hat::GreenFlag, Some(repeat));
    sprite(&mut scheduler, "Dice", b.build().unwrap());
    scheduler.start();
    scheduler.run_ticks(25).unwrap();
    scheduler.export_state()
}

#[test]
fn same_seed_gives_the_same_run() {
    let first = random_fill(42);
    let second = random_fill(42);
    assert_eq!(first, second);
    let dice = first.targets.iter().find(|t| t.name == "Dice").unwrap();
    let rolls = &dice.lists["rolls"];
    assert_eq!(rolls.len(), 20);
    assert!(rolls.iter().all(|v| (1.0..=1000.0).contains(&v.to_number())));
}

#[test]
fn clones_run_their_own_scripts_on_their_own_state() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let spawn = b.push(Opcode::CreateCloneOf, vec![], Some(CLONE_MYSELF));
    b.script(Hat::GreenFlag, Some(spawn));
    let shift = b.push(Opcode::ChangeXBy, vec![Input::number(50.0)], None);
    let mark = b.push(Opcode::SetVariableTo, vec![Input::text("clone")], Some("who"));
    let body = b.stack(&[shift, mark]);
    b.script(Hat::CloneStart, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());
    scheduler
        .world_mut()
        .target_mut(cat)
        .unwrap()
        .variables
        .insert("who".to_string(), Value::from("original"));

    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().clone_count(), 1);
    scheduler.tick().unwrap();

    let clone = scheduler.world().targets().find(|t| t.is_clone()).unwrap();
    assert_eq!(clone.original, cat);
    assert_eq!(clone.x, 50.0);
    assert_eq!(clone.variables["who"], Value::from("clone"));
    assert_eq!(x_of(&scheduler, cat), 0.0);
    assert_eq!(
        scheduler.world().get_variable(cat, "who"),
        Value::from("original")
    );
    // Drawn directly behind its parent.
    assert_eq!(scheduler.world().layers(), &[clone.id, cat]);
}

#[test]
fn clone_limit_caps_live_clones() {
    let config = EngineConfig {
        clone_limit: 3,
        ..EngineConfig::default()
    };
    let (mut scheduler, _clock) = scheduler_with(config);
    let mut b = ProgramBuilder::new();
    let spawn = b.push(Opcode::CreateCloneOf, vec![], Some(CLONE_MYSELF));
    let repeat = b.push(
        Opcode::Repeat,
        vec![Input::number(10.0), Input::Substack(Some(spawn))],
        None,
    );
    b.script(Hat::GreenFlag, Some(repeat));
    sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(12).unwrap();
    assert_eq!(scheduler.world().clone_count(), 3);

    scheduler.stop_all();
    assert_eq!(scheduler.world().clone_count(), 0);
}

#[test]
fn deleted_clone_takes_its_threads_along() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let spawn = b.push(Opcode::CreateCloneOf, vec![], Some(CLONE_MYSELF));
    b.script(Hat::GreenFlag, Some(spawn));
    let delete = b.push(Opcode::DeleteThisClone, vec![], None);
    b.script(Hat::CloneStart, Some(delete));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(3).unwrap();
    assert_eq!(scheduler.world().clone_count(), 0);
    assert!(scheduler.world().target(cat).is_some(), "originals are never deleted");
    assert!(scheduler.is_idle());
}

#[test]
fn broadcast_and_wait_blocks_until_receivers_finish() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let send = b.push(Opcode::BroadcastAndWait, vec![Input::text("work")], None);
    let done = b.push(Opcode::SetVariableTo, vec![Input::number(1.0)], Some("done"));
    let body = b.stack(&[send, done]);
    b.script(Hat::GreenFlag, body);
    let boss = sprite(&mut scheduler, "Boss", b.build().unwrap());

    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let repeat = b.push(
        Opcode::Repeat,
        vec![Input::number(3.0), Input::Substack(Some(change))],
        None,
    );
    b.script(Hat::BroadcastReceived("work".to_string()), Some(repeat));
    let worker = sprite(&mut scheduler, "Worker", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(4).unwrap();
    assert_eq!(x_of(&scheduler, worker), 3.0);
    assert_eq!(scheduler.world().get_variable(boss, "done"), Value::empty());

    scheduler.run_ticks(1).unwrap();
    assert_eq!(scheduler.world().get_variable(boss, "done"), Value::Number(1.0));
}

#[test]
fn broadcast_and_wait_without_receivers_continues() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let send = b.push(Opcode::BroadcastAndWait, vec![Input::text("nobody")], None);
    let done = b.push(Opcode::SetX, vec![Input::number(9.0)], None);
    let body = b.stack(&[send, done]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(2).unwrap();
    assert_eq!(x_of(&scheduler, cat), 9.0);
}

#[test]
fn stop_other_scripts_leaves_the_caller_running() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let looped = b.push(Opcode::Forever, vec![Input::Substack(Some(change))], None);
    b.script(Hat::GreenFlag, Some(looped));
    let first = b.push(Opcode::ChangeYBy, vec![Input::number(1.0)], None);
    let stop = b.push(Opcode::Stop, vec![], Some("other scripts in sprite"));
    let second = b.push(Opcode::ChangeYBy, vec![Input::number(1.0)], None);
    let body = b.stack(&[first, stop, second]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(4).unwrap();
    assert_eq!(x_of(&scheduler, cat), 1.0);
    assert_eq!(y_of(&scheduler, cat), 2.0);
}

#[test]
fn stop_other_scripts_survives_a_later_stop_this_script() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let looped = b.push(Opcode::Forever, vec![Input::Substack(Some(change))], None);
    b.script(Hat::GreenFlag, Some(looped));
    let others = b.push(Opcode::Stop, vec![], Some("other scripts in sprite"));
    let this = b.push(Opcode::Stop, vec![], Some("this script"));
    let body = b.stack(&[others, this]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(6).unwrap();
    assert_eq!(x_of(&scheduler, cat), 1.0, "forever loop kept running");
    assert!(scheduler.is_idle());
}

#[test]
fn stop_all_halts_every_thread_immediately() {
    let (mut scheduler, _clock) = scheduler();
    let runner = sprite(&mut scheduler, "Runner", forever(Opcode::ChangeXBy, 1.0));

    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeYBy, vec![Input::number(1.0)], None);
    let repeat = b.push(
        Opcode::Repeat,
        vec![Input::number(2.0), Input::Substack(Some(change))],
        None,
    );
    let stop = b.push(Opcode::Stop, vec![], Some("all"));
    let body = b.stack(&[repeat, stop]);
    b.script(Hat::GreenFlag, body);
    let stopper = sprite(&mut scheduler, "Stopper", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(6).unwrap();
    assert_eq!(x_of(&scheduler, runner), 2.0);
    assert_eq!(y_of(&scheduler, stopper), 2.0);
    assert!(scheduler.is_idle());
}

#[test]
fn stop_this_script_ends_only_the_current_thread() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let before = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let stop = b.push(Opcode::Stop, vec![], Some("this script"));
    let after = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let body = b.stack(&[before, stop, after]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());
    let dog = sprite(&mut scheduler, "Dog", forever(Opcode::ChangeXBy, 1.0));

    scheduler.start();
    scheduler.run_ticks(3).unwrap();
    assert_eq!(x_of(&scheduler, cat), 1.0);
    assert_eq!(x_of(&scheduler, dog), 3.0);
}

#[test]
fn green_flag_restarts_running_scripts() {
    let (mut scheduler, _clock) = scheduler();
    let cat = sprite(&mut scheduler, "Cat", repeat_change_x(100.0, 1.0));
    scheduler.start();
    scheduler.run_ticks(3).unwrap();
    scheduler.start();
    scheduler.run_ticks(2).unwrap();
    assert_eq!(x_of(&scheduler, cat), 5.0);
    assert_eq!(scheduler.threads().len(), 1);
}

#[test]
fn key_hats_fire_on_press_and_sensing_follows_held_keys() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let hop = b.push(Opcode::ChangeYBy, vec![Input::number(10.0)], None);
    b.script(Hat::KeyPressed("space".to_string()), Some(hop));
    let any = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    b.script(Hat::KeyPressed("any".to_string()), Some(any));
    let pressed = b.push(Opcode::KeyPressed, vec![Input::text("left arrow")], None);
    let held = b.push(Opcode::SetVariableTo, vec![Input::Block(pressed)], Some("held"));
    let poll = b.push(Opcode::Forever, vec![Input::Substack(Some(held))], None);
    b.script(Hat::GreenFlag, Some(poll));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.key_down("Space");
    scheduler.tick().unwrap();
    assert_eq!(y_of(&scheduler, cat), 10.0);
    assert_eq!(x_of(&scheduler, cat), 1.0);
    scheduler.key_up("space");

    scheduler.key_down("left arrow");
    scheduler.tick().unwrap();
    assert_eq!(y_of(&scheduler, cat), 10.0);
    assert_eq!(x_of(&scheduler, cat), 2.0);
    assert_eq!(scheduler.world().get_variable(cat, "held"), Value::Boolean(true));

    scheduler.key_up("left arrow");
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().get_variable(cat, "held"), Value::Boolean(false));
}

#[test]
fn clicking_starts_only_the_clicked_sprite() {
    let (mut scheduler, _clock) = scheduler();
    let program = || {
        let mut b = ProgramBuilder::new();
        let spin = b.push(Opcode::TurnRight, vec![Input::number(15.0)], None);
        b.script(Hat::Clicked, Some(spin));
        b.build().unwrap()
    };
    let cat = sprite(&mut scheduler, "Cat", program());
    let dog = sprite(&mut scheduler, "Dog", program());

    scheduler.click(dog);
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().target(cat).unwrap().direction, 90.0);
    assert_eq!(scheduler.world().target(dog).unwrap().direction, 105.0);
}

#[test]
fn warp_procedures_finish_their_loops_in_one_tick() {
    let build = |warp: bool| {
        let mut b = ProgramBuilder::new();
        let change = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
        let repeat = b.push(
            Opcode::Repeat,
            vec![Input::number(10.0), Input::Substack(Some(change))],
            None,
        );
        b.procedure("spin", vec![], warp, Some(repeat));
        let call = b.push(Opcode::Call, vec![], Some("spin"));
        b.script(Hat::GreenFlag, Some(call));
        b.build().unwrap()
    };

    let (mut scheduler, _clock) = scheduler();
    let fast = sprite(&mut scheduler, "Fast", build(true));
    let slow = sprite(&mut scheduler, "Slow", build(false));
    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, fast), 10.0);
    assert_eq!(x_of(&scheduler, slow), 1.0);
}

#[test]
fn procedure_arguments_bind_by_name() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let dx = b.push(Opcode::Argument, vec![], Some("dx"));
    let dy = b.push(Opcode::Argument, vec![], Some("DY"));
    let go = b.push(Opcode::GoToXY, vec![Input::Block(dx), Input::Block(dy)], None);
    b.procedure("jump", vec!["dx".to_string(), "dy".to_string()], false, Some(go));
    let call = b.push(
        Opcode::Call,
        vec![Input::number(12.0), Input::text("-4")],
        Some("Jump"),
    );
    b.script(Hat::GreenFlag, Some(call));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(x_of(&scheduler, cat), 12.0);
    assert_eq!(y_of(&scheduler, cat), -4.0);
}

#[test]
fn runaway_recursion_stops_at_the_call_depth_limit() {
    let config = EngineConfig {
        max_call_depth: 8,
        ..EngineConfig::default()
    };
    let (mut scheduler, _clock) = scheduler_with(config);
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeXBy, vec![Input::number(1.0)], None);
    let again = b.push(Opcode::Call, vec![], Some("dive"));
    let body = b.stack(&[change, again]);
    b.procedure("dive", vec![], true, body);
    let call = b.push(Opcode::Call, vec![], Some("dive"));
    b.script(Hat::GreenFlag, Some(call));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.run_ticks(2).unwrap();
    assert_eq!(x_of(&scheduler, cat), 8.0);
    assert!(scheduler.fault().is_none());
}

#[test]
fn say_for_seconds_clears_its_own_bubble() {
    let (mut scheduler, clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let say = b.push(
        Opcode::SayForSecs,
        vec![Input::text("hello"), Input::number(0.5)],
        None,
    );
    b.script(Hat::GreenFlag, Some(say));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    let speech = scheduler.world().target(cat).unwrap().speech.clone();
    assert_eq!(speech.map(|s| s.text), Some("hello".to_string()));

    clock.advance(Duration::from_millis(500));
    scheduler.tick().unwrap();
    assert!(scheduler.world().target(cat).unwrap().speech.is_none());
}

#[test]
fn scripts_degrade_instead_of_failing() {
    let (mut scheduler, _clock) = scheduler();
    let mut b = ProgramBuilder::new();
    let missing = b.push(Opcode::Variable, vec![], Some("nowhere"));
    let divide = b.push(
        Opcode::Divide,
        vec![Input::number(1.0), Input::number(0.0)],
        None,
    );
    let set = b.push(Opcode::SetVariableTo, vec![Input::Block(missing)], Some("copy"));
    let ratio = b.push(Opcode::SetVariableTo, vec![Input::Block(divide)], Some("ratio"));
    let item = b.push(Opcode::ItemOfList, vec![Input::number(5.0)], Some("empty"));
    let third = b.push(Opcode::SetVariableTo, vec![Input::Block(item)], Some("third"));
    let body = b.stack(&[set, ratio, third]);
    b.script(Hat::GreenFlag, body);
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    let world = scheduler.world();
    assert_eq!(world.get_variable(cat, "copy"), Value::empty());
    assert!(world.get_variable(cat, "ratio").to_number().is_nan());
    assert_eq!(world.get_variable(cat, "third"), Value::empty());
    assert!(scheduler.fault().is_none());
}

#[test]
fn globals_live_on_the_stage() {
    init_logging();
    let mut scheduler = Scheduler::with_clock(EngineConfig::default(), MockClock::new());
    let stage = scheduler
        .add_stage("Stage", Program::empty(), vec![Costume::default_svg("backdrop1")])
        .unwrap();
    scheduler
        .world_mut()
        .target_mut(stage)
        .unwrap()
        .variables
        .insert("score".to_string(), Value::Number(0.0));

    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeVariableBy, vec![Input::number(2.0)], Some("score"));
    b.script(Hat::GreenFlag, Some(change));
    let cat = sprite(&mut scheduler, "Cat", b.build().unwrap());
    let mut b = ProgramBuilder::new();
    let change = b.push(Opcode::ChangeVariableBy, vec![Input::number(3.0)], Some("score"));
    b.script(Hat::GreenFlag, Some(change));
    sprite(&mut scheduler, "Dog", b.build().unwrap());

    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().get_variable(stage, "score"), Value::Number(5.0));
    assert!(!scheduler.world().target(cat).unwrap().variables.contains_key("score"));
}

#[test]
fn broadcast_receivers_run_in_layer_order_on_the_next_tick() {
    init_logging();
    let mut scheduler = Scheduler::with_clock(EngineConfig::default(), MockClock::new());
    let stage = scheduler
        .add_stage("Stage", Program::empty(), vec![Costume::default_svg("backdrop1")])
        .unwrap();
    scheduler
        .world_mut()
        .target_mut(stage)
        .unwrap()
        .variables
        .insert("log".to_string(), Value::empty());

    let mut b = ProgramBuilder::new();
    let send = b.push(Opcode::Broadcast, vec![Input::text("go")], None);
    b.script(Hat::GreenFlag, Some(send));
    sprite(&mut scheduler, "Sender", b.build().unwrap());

    let appender = |name: &str| {
        let mut b = ProgramBuilder::new();
        let read = b.push(Opcode::Variable, vec![], Some("log"));
        let join = b.push(Opcode::Join, vec![Input::Block(read), Input::text(name)], None);
        let set = b.push(Opcode::SetVariableTo, vec![Input::Block(join)], Some("log"));
        b.script(Hat::BroadcastReceived("go".to_string()), Some(set));
        b.build().unwrap()
    };
    sprite(&mut scheduler, "A", appender("A"));
    sprite(&mut scheduler, "B", appender("B"));

    scheduler.start();
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().get_variable(stage, "log"), Value::empty());
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().get_variable(stage, "log"), Value::from("AB"));
    scheduler.tick().unwrap();
    assert_eq!(scheduler.world().get_variable(stage, "log"), Value::from("AB"));
}

#[test]
fn clones_share_their_parents_program() {
    let (mut scheduler, _clock) = scheduler();
    let cat = sprite(&mut scheduler, "Cat", repeat_change_x(2.0, 1.0));
    let clone = scheduler.spawn_clone(cat).unwrap();
    let world = scheduler.world();
    let parent = world.target(cat).unwrap();
    let child = world.target(clone).unwrap();
    assert!(Arc::ptr_eq(&parent.program, &child.program));
}

#[test]
fn sprites_need_a_stage_and_unique_names() {
    init_logging();
    let mut scheduler = Scheduler::with_clock(EngineConfig::default(), MockClock::new());
    assert!(matches!(
        scheduler.add_sprite("Cat", Program::empty(), vec![]),
        Err(sbstage_core::LoadError::MissingStage)
    ));
    scheduler.add_stage("Stage", Program::empty(), vec![]).unwrap();
    assert!(matches!(
        scheduler.add_stage("Other", Program::empty(), vec![]),
        Err(sbstage_core::LoadError::SecondStage)
    ));
    scheduler.add_sprite("Cat", Program::empty(), vec![]).unwrap();
    assert!(matches!(
        scheduler.add_sprite("cat", Program::empty(), vec![]),
        Err(sbstage_core::LoadError::DuplicateTarget(_))
    ));
}
