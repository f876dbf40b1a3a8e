//! Session-level statistics folded from road states

use serde::{Deserialize, Serialize};

use super::road::RoadState;

/// Throughput reported when the raw value is zero
pub const THROUGHPUT_FALLBACK: u32 = 20;

/// Efficiency reported before any tick has run
pub const DEFAULT_EFFICIENCY: f64 = 84.0;

/// Aggregate statistics for one session at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_processed: u64,
    pub avg_wait_time: f64,
    /// Vehicles per minute
    pub throughput: u32,
    pub efficiency: f64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            total_processed: 0,
            avg_wait_time: 0.0,
            throughput: THROUGHPUT_FALLBACK,
            efficiency: DEFAULT_EFFICIENCY,
        }
    }
}

impl SessionStats {
    /// Compute stats from the current roads.
    ///
    /// `current_cycle` is the elapsed simulated time in seconds.
    pub fn aggregate(
        roads: &[RoadState],
        total_processed: u64,
        current_cycle: f64,
        throughput_fallback: u32,
    ) -> Self {
        if roads.is_empty() {
            return Self {
                total_processed,
                throughput: throughput_fallback,
                ..Self::default()
            };
        }

        let count = roads.len() as f64;
        let avg_wait_time = roads.iter().map(|r| r.wait_time).sum::<f64>() / count;
        let efficiency = roads.iter().map(|r| r.performance).sum::<f64>() / count;

        Self {
            total_processed,
            avg_wait_time: round2(avg_wait_time),
            throughput: throughput(total_processed, current_cycle, throughput_fallback),
            efficiency: round2(efficiency),
        }
    }
}

/// Vehicles per simulated minute, floored and saturated to `u32`.
///
/// Falls back exactly when that result is 0, which includes the undefined
/// `0 / 0` case. Traffic processed at zero elapsed time saturates instead.
pub fn throughput(total_processed: u64, current_cycle: f64, fallback: u32) -> u32 {
    let minutes = current_cycle / 60.0;
    // Float-to-int casts saturate and map NaN to 0
    let per_minute = (total_processed as f64 / minutes).floor() as u32;
    if per_minute == 0 {
        fallback
    } else {
        per_minute
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
