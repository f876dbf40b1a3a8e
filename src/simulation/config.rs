//! Tunables for the engine and the detection feed

use std::time::Duration;

use super::error::{SignalError, SignalResult};
use super::types::TRANSITION_TIME;

/// Engine timing and metric constants
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cycle length a new session starts with, in seconds
    pub initial_cycle_length: f64,
    pub min_cycle_length: f64,
    pub max_cycle_length: f64,
    /// Yellow duration at the end of each road's window
    pub transition_time: f64,
    /// Simulated seconds between road snapshots
    pub snapshot_interval: f64,
    /// Throughput reported when the raw value is zero
    pub throughput_fallback: u32,
    /// Efficiency written to a freshly created durable run
    pub initial_efficiency: f64,
    /// Seed for reproducible sessions; `None` draws from the OS
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cycle_length: 60.0,
            min_cycle_length: 45.0,
            max_cycle_length: 90.0,
            transition_time: TRANSITION_TIME,
            snapshot_interval: 10.0,
            throughput_fallback: 20,
            initial_efficiency: 84.0,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_cycle_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_cycle_length = min;
        self.max_cycle_length = max;
        self
    }

    pub fn with_snapshot_interval(mut self, secs: f64) -> Self {
        self.snapshot_interval = secs;
        self
    }

    pub fn validate(&self) -> SignalResult<()> {
        if self.min_cycle_length <= 0.0 || self.min_cycle_length > self.max_cycle_length {
            return Err(SignalError::Config(format!(
                "invalid cycle bounds [{}, {}]",
                self.min_cycle_length, self.max_cycle_length
            )));
        }
        if !(self.min_cycle_length..=self.max_cycle_length).contains(&self.initial_cycle_length) {
            return Err(SignalError::Config(format!(
                "initial cycle length {} outside [{}, {}]",
                self.initial_cycle_length, self.min_cycle_length, self.max_cycle_length
            )));
        }
        // Every road needs a non-empty green window
        if self.transition_time < 0.0 || self.transition_time >= self.min_cycle_length / 4.0 {
            return Err(SignalError::Config(format!(
                "transition time {} must be shorter than a quarter cycle",
                self.transition_time
            )));
        }
        if self.snapshot_interval <= 0.0 {
            return Err(SignalError::Config("snapshot interval must be positive".into()));
        }
        Ok(())
    }
}

/// Detection feed schedule and draw limits
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Time between emissions for one road
    pub period: Duration,
    /// Upper bound (inclusive) of vehicles drawn per frame
    pub max_vehicles: u32,
    /// Maximum number of emissions being produced at the same time
    pub workers: usize,
    pub seed: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(500),
            max_vehicles: 15,
            workers: 4,
            seed: None,
        }
    }
}

impl DetectionConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Frames per minute implied by the period; used to extrapolate flow rate
    pub fn frames_per_minute(&self) -> f64 {
        60.0 / self.period.as_secs_f64()
    }

    pub fn validate(&self) -> SignalResult<()> {
        if self.period.is_zero() {
            return Err(SignalError::Config("detection period must be non-zero".into()));
        }
        if self.workers == 0 {
            return Err(SignalError::Config("detection needs at least one worker".into()));
        }
        Ok(())
    }
}
