pub mod ast;
pub mod clock;
pub mod config;
pub mod costume;
pub mod error;
pub mod events;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod program;
pub mod render;
pub mod scheduler;
pub mod semantic;
pub mod snapshot;
pub mod target;
pub mod thread;
pub mod validate;
pub mod value;
pub mod world;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineFault, LoadError, StructuralError};
pub use events::Event;
pub use program::{BlockId, Hat, Input, Opcode, Program, ProgramBuilder};
pub use render::{DrawCommand, RecordingSurface, Renderer, Surface, TextSurface};
pub use scheduler::{Scheduler, TickReport};
pub use snapshot::EngineSnapshot;
pub use target::{Target, TargetId};
pub use validate::validate;
pub use value::Value;
pub use world::World;

use anyhow::{Context, Result};
use lexer::Lexer;
use log::warn;
use parser::Parser as SbParser;
use semantic::SemanticReport;
use std::path::{Path, PathBuf};

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let total_stages = 3 + usize::from(args.dump_state.is_some()) + usize::from(args.bundle.is_some());
    let progress = CliProgress::new("Run", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving input path");
    let input = canonicalize_file(&args.input)?;
    let inputs = args.scheduled_inputs();

    stage += 1;
    progress.emit(stage, "Loading project");
    let config = args.engine_config()?;
    let mut scheduler = if args.realtime {
        Scheduler::with_clock(config, SystemClock::new())
    } else {
        Scheduler::with_clock(config, MockClock::new())
    };
    let from_bundle = load_input_file(&input, &mut scheduler)?;
    if args.render_log {
        scheduler.attach_surface(Box::new(TextSurface::new(std::io::stdout())));
    }

    stage += 1;
    progress.emit(stage, &format!("Running {} ticks", args.ticks));
    if !from_bundle {
        scheduler.start();
    }
    let start = scheduler.now();
    for n in 0..args.ticks {
        let tick = scheduler.tick_count() + 1;
        let released = inputs.apply(tick, &mut scheduler)?;
        scheduler.pace(start, n);
        scheduler
            .tick()
            .with_context(|| format!("Engine halted at tick {}", tick))?;
        for key in released {
            scheduler.key_up(&key);
        }
    }

    let snapshot = scheduler.export_state();
    if let Some(path) = &args.dump_state {
        stage += 1;
        progress.emit(stage, "Writing state");
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write state to '{}'.", path.display()))?;
    }
    if let Some(path) = &args.bundle {
        stage += 1;
        progress.emit(stage, "Writing bundle");
        snapshot::write_bundle(path, &snapshot)
            .with_context(|| format!("Failed to write bundle '{}'.", path.display()))?;
    }
    Ok(())
}

/// Loads a `.sbtext` source or a snapshot bundle into `scheduler`. Returns
/// true for a bundle, which is restored idle rather than started.
pub fn load_input_file(path: &Path, scheduler: &mut Scheduler) -> Result<bool> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read '{}'.", path.display()))?;
    if bytes.starts_with(b"PK\x03\x04") {
        let snapshot = snapshot::read_bundle_bytes(&bytes)
            .with_context(|| format!("Failed to read bundle '{}'.", pretty_path(path)))?;
        scheduler.import_state(&snapshot)?;
        return Ok(true);
    }
    let source = String::from_utf8(bytes).with_context(|| format!("'{}' is not UTF-8 text.", pretty_path(path)))?;
    let source_dir = path.parent().unwrap_or(Path::new("."));
    load_source(&source, source_dir, scheduler).map_err(|e| anyhow::anyhow!(format_load_error(&e, path)))?;
    Ok(false)
}

/// Lexes, parses and checks SBText source.
pub fn parse_source(source: &str) -> Result<(ast::Project, SemanticReport), LoadError> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = SbParser::new(tokens);
    let project = parser.parse_project()?;
    let report = semantic::analyze(&project)?;
    Ok((project, report))
}

/// Parses `source` and adds its stage and sprites to `scheduler`. Costume
/// paths are resolved against `source_dir`.
pub fn load_source(source: &str, source_dir: &Path, scheduler: &mut Scheduler) -> Result<(), LoadError> {
    let (project, report) = parse_source(source)?;
    for warning in &report.warnings {
        warn!("{}", warning.message);
    }
    let targets = lower::lower_project(&project, source_dir)?;
    lower::install(targets, scheduler)
}

/// A fresh scheduler running `source`.
pub fn scheduler_from_source(
    source: &str,
    source_dir: &Path,
    config: EngineConfig,
    clock: impl Clock + 'static,
) -> Result<Scheduler, LoadError> {
    let mut scheduler = Scheduler::with_clock(config, clock);
    load_source(source, source_dir, &mut scheduler)?;
    Ok(scheduler)
}

/// Runs `source` headlessly from the green flag for `ticks` ticks and
/// returns the resulting state as JSON.
pub fn run_source_to_json(source: &str, ticks: u64) -> Result<String> {
    let mut scheduler = scheduler_from_source(source, Path::new("."), EngineConfig::default(), MockClock::new())?;
    scheduler.start();
    scheduler.run_realtime(ticks)?;
    Ok(serde_json::to_string(&scheduler.export_state())?)
}

pub fn canonicalize_file(path: &Path) -> Result<PathBuf> {
    if !path.exists() || !path.is_file() {
        return Err(anyhow::anyhow!("Input file not found: '{}'.", path.display()));
    }
    Ok(path.canonicalize()?)
}

fn format_load_error(err: &LoadError, path: &Path) -> String {
    match err {
        LoadError::Lex(e) => format_source_error("Lex error", &e.message, e.pos.line, e.pos.column, path),
        LoadError::Parse(e) => format_source_error("Parse error", &e.message, e.pos.line, e.pos.column, path),
        other => format!("{} (file '{}')", other, pretty_path(path)),
    }
}

fn format_source_error(kind: &str, message: &str, line: usize, column: usize, path: &Path) -> String {
    format!(
        "{}: {} (file '{}', line {}, column {})",
        kind,
        message,
        pretty_path(path),
        line,
        column
    )
}

fn pretty_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if let Some(stripped) = raw.strip_prefix(r"\\?\") {
        stripped.to_string()
    } else {
        raw
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        let step = step.clamp(1, self.total);
        let bar = render_progress_bar(step, self.total, 14);
        eprintln!("[{}] {}... ({}/{}) {}", self.prefix, label, step, self.total, bar);
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}
