use crate::config::EngineConfig;
use crate::scheduler::Scheduler;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sbstage-rs",
    about = "Run SBText stage projects headlessly or in real time."
)]
pub struct Args {
    #[arg(value_name = "INPUT", help = "A .sbtext source file or a state bundle.")]
    pub input: PathBuf,

    #[arg(long, default_value_t = 90, help = "Number of ticks to run.")]
    pub ticks: u64,

    #[arg(
        long,
        help = "Pace ticks against the wall clock instead of a simulated one."
    )]
    pub realtime: bool,

    #[arg(
        long = "press",
        value_name = "KEY@TICK",
        value_parser = parse_scheduled,
        help = "Press KEY just before tick TICK and release it after. Repeatable."
    )]
    pub press: Vec<Scheduled>,

    #[arg(
        long = "broadcast",
        value_name = "MSG@TICK",
        value_parser = parse_scheduled,
        help = "Broadcast MSG just before tick TICK. Repeatable."
    )]
    pub broadcast: Vec<Scheduled>,

    #[arg(
        long = "click",
        value_name = "SPRITE@TICK",
        value_parser = parse_scheduled,
        help = "Click SPRITE just before tick TICK. Repeatable."
    )]
    pub click: Vec<Scheduled>,

    #[arg(long, value_name = "PATH", help = "Write the final state as JSON to this path.")]
    pub dump_state: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Write the final state and costumes as a zip bundle.")]
    pub bundle: Option<PathBuf>,

    #[arg(long, help = "Print one line per drawn sprite after every tick.")]
    pub render_log: bool,

    #[arg(long, default_value_t = 30.0, help = "Ticks per second.")]
    pub tick_rate: f64,

    #[arg(long, default_value_t = 10_000, help = "Blocks one thread may run per tick.")]
    pub max_steps: usize,

    #[arg(long, default_value_t = 300, help = "Maximum number of live clones.")]
    pub clone_limit: usize,

    #[arg(long, default_value_t = 0, help = "Seed for 'pick random'.")]
    pub seed: u64,
}

impl Args {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        if !self.tick_rate.is_finite() || self.tick_rate <= 0.0 {
            anyhow::bail!("--tick-rate must be a positive number.");
        }
        if self.max_steps == 0 {
            anyhow::bail!("--max-steps must be at least 1.");
        }
        Ok(EngineConfig {
            tick_rate_hz: self.tick_rate,
            max_steps_per_tick: self.max_steps,
            clone_limit: self.clone_limit,
            random_seed: self.seed,
            ..EngineConfig::default()
        })
    }

    pub fn scheduled_inputs(&self) -> ScheduledInputs {
        ScheduledInputs {
            presses: self.press.clone(),
            broadcasts: self.broadcast.clone(),
            clicks: self.click.clone(),
        }
    }
}

/// `VALUE@TICK` from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled {
    pub value: String,
    pub tick: u64,
}

pub fn parse_scheduled(text: &str) -> Result<Scheduled, String> {
    let (value, tick) = text
        .rsplit_once('@')
        .ok_or_else(|| format!("expected VALUE@TICK, got '{}'", text))?;
    let tick: u64 = tick
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a tick number", tick))?;
    if tick == 0 {
        return Err("ticks are numbered from 1".to_string());
    }
    if value.trim().is_empty() {
        return Err(format!("missing value before '@' in '{}'", text));
    }
    Ok(Scheduled {
        value: value.trim().to_string(),
        tick,
    })
}

/// Input events to inject at fixed ticks.
#[derive(Debug, Clone, Default)]
pub struct ScheduledInputs {
    pub presses: Vec<Scheduled>,
    pub broadcasts: Vec<Scheduled>,
    pub clicks: Vec<Scheduled>,
}

impl ScheduledInputs {
    /// Publishes everything due at `tick`, before that tick runs. Returns
    /// the keys to release once it has run.
    pub fn apply(&self, tick: u64, scheduler: &mut Scheduler) -> Result<Vec<String>> {
        let mut held = Vec::new();
        for press in self.presses.iter().filter(|p| p.tick == tick) {
            scheduler.key_down(&press.value);
            held.push(press.value.clone());
        }
        for message in self.broadcasts.iter().filter(|b| b.tick == tick) {
            scheduler.broadcast(&message.value);
        }
        for click in self.clicks.iter().filter(|c| c.tick == tick) {
            let Some(target) = scheduler.world().find_by_name(&click.value) else {
                anyhow::bail!("--click names unknown sprite '{}'.", click.value);
            };
            scheduler.click(target);
        }
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_values_split_on_the_last_at() {
        let parsed = parse_scheduled("me@home@12").unwrap();
        assert_eq!(
            parsed,
            Scheduled {
                value: "me@home".to_string(),
                tick: 12
            }
        );
    }

    #[test]
    fn scheduled_rejects_tick_zero_and_garbage() {
        assert!(parse_scheduled("space@0").is_err());
        assert!(parse_scheduled("space").is_err());
        assert!(parse_scheduled("space@soon").is_err());
        assert!(parse_scheduled("@3").is_err());
    }

    #[test]
    fn flags_map_onto_engine_config() {
        let args = Args::parse_from(["sbstage-rs", "game.sbtext", "--tick-rate", "60", "--seed", "7"]);
        let config = args.engine_config().unwrap();
        assert_eq!(config.tick_rate_hz, 60.0);
        assert_eq!(config.random_seed, 7);
        assert_eq!(config.clone_limit, 300);
        assert_eq!(args.ticks, 90);
    }

    #[test]
    fn non_positive_tick_rate_is_rejected() {
        let args = Args::parse_from(["sbstage-rs", "game.sbtext", "--tick-rate", "0"]);
        assert!(args.engine_config().is_err());
    }
}
