//! State of one approach into the intersection

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::{
    Direction, LightState, MAX_PERFORMANCE, MAX_WAIT_TIME, MIN_PERFORMANCE, MIN_WAIT_TIME,
};

/// One road of a session. Created at session start and mutated every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadState {
    pub name: String,
    pub direction: Direction,
    pub light: LightState,
    pub vehicles: u32,
    pub queue: u32,
    /// Seconds, kept within [20, 80]
    pub wait_time: f64,
    /// Percentage, kept within [50, 98]
    pub performance: f64,
}

impl RoadState {
    /// Build a road with randomized starting traffic and a red light
    pub fn new_random<R: Rng + ?Sized>(name: &str, direction: Direction, rng: &mut R) -> Self {
        Self {
            name: name.to_string(),
            direction,
            light: LightState::Red,
            vehicles: rng.random_range(10..20),
            queue: rng.random_range(10..20),
            wait_time: f64::from(rng.random_range(30..60u32)),
            performance: f64::from(rng.random_range(75..95u32)),
        }
    }

    pub fn is_green(&self) -> bool {
        self.light == LightState::Green
    }

    /// Let up to `count` queued vehicles through; returns how many left
    pub fn discharge(&mut self, count: u32) -> u32 {
        let processed = count.min(self.queue);
        self.queue -= processed;
        self.vehicles = self.vehicles.saturating_sub(processed);
        processed
    }

    /// Drop vehicles and queue by up to `count` each, independently
    pub fn clear_by(&mut self, count: u32) {
        self.vehicles = self.vehicles.saturating_sub(count);
        self.queue = self.queue.saturating_sub(count);
    }

    pub fn arrive(&mut self, vehicles: u32, queue: u32) {
        self.vehicles += vehicles;
        self.queue += queue;
    }

    pub fn reduce_wait(&mut self, secs: f64) {
        self.wait_time = (self.wait_time - secs).max(MIN_WAIT_TIME);
    }

    pub fn increase_wait(&mut self, secs: f64) {
        self.wait_time = (self.wait_time + secs).min(MAX_WAIT_TIME);
    }

    /// Performance from the organic model: queue and wait time penalties
    pub fn recompute_performance(&mut self) {
        let queue_penalty = queue_penalty(self.queue);
        let wait_penalty = ((self.wait_time - 30.0) / 2.0).min(20.0);
        self.performance = clamp_performance(100.0 - queue_penalty - wait_penalty);
    }

    /// Performance from a video frame: queue and vehicle-count penalties
    pub fn recompute_performance_from_video(&mut self, vehicle_count: u32) {
        let density_penalty = (vehicle_count as f64).min(20.0);
        self.performance = clamp_performance(100.0 - queue_penalty(self.queue) - density_penalty);
    }
}

fn queue_penalty(queue: u32) -> f64 {
    (queue as f64 * 2.0).min(30.0)
}

fn clamp_performance(raw: f64) -> f64 {
    raw.clamp(MIN_PERFORMANCE, MAX_PERFORMANCE)
}
