use std::time::Duration;

/// Engine tunables. Every value is a default, not a contract; the CLI maps
/// its flags onto these fields.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_rate_hz: f64,
    /// Blocks one thread may execute in a tick before it is forced to yield.
    pub max_steps_per_tick: usize,
    pub clone_limit: usize,
    pub max_call_depth: usize,
    pub stage_width: f64,
    pub stage_height: f64,
    pub random_seed: u64,
    /// Keep sprites inside the stage bounds when they move.
    pub fence_sprites: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            max_steps_per_tick: 10_000,
            clone_limit: 300,
            max_call_depth: 256,
            stage_width: 480.0,
            stage_height: 360.0,
            random_seed: 0,
            fence_sprites: false,
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        let hz = if self.tick_rate_hz.is_finite() && self.tick_rate_hz > 0.0 {
            self.tick_rate_hz
        } else {
            30.0
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}
