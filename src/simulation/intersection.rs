//! Signal phase logic for the four-way intersection
//!
//! Normal operation splits the cycle into four equal windows, one per road.
//! An emergency override replaces that schedule while it is active.

use serde::{Deserialize, Serialize};

use super::road::RoadState;
use super::types::{Direction, EmergencyVehicle, LightState};

/// Preemption request for one approach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyOverride {
    pub road: Direction,
    pub vehicle_type: EmergencyVehicle,
    pub active: bool,
}

impl EmergencyOverride {
    pub fn new(road: Direction, vehicle_type: EmergencyVehicle) -> Self {
        Self {
            road,
            vehicle_type,
            active: true,
        }
    }
}

/// Light for the road at `index` given the position inside the cycle.
///
/// Road `i` owns `[i * q, (i + 1) * q)` with `q = cycle_length / 4`; it is
/// green until `transition_time` before the window closes, then yellow.
pub fn light_for(
    cycle_position: f64,
    index: usize,
    cycle_length: f64,
    transition_time: f64,
) -> LightState {
    let quarter_cycle = cycle_length / 4.0;
    let road_start = index as f64 * quarter_cycle;
    let road_end = road_start + quarter_cycle;

    if cycle_position >= road_start && cycle_position < road_end - transition_time {
        LightState::Green
    } else if cycle_position >= road_end - transition_time && cycle_position < road_end {
        LightState::Yellow
    } else {
        LightState::Red
    }
}

/// Apply the normal rotating schedule to every road
pub fn apply_phase_schedule(
    roads: &mut [RoadState],
    current_cycle: f64,
    cycle_length: f64,
    transition_time: f64,
) {
    let cycle_position = current_cycle % cycle_length;
    for (index, road) in roads.iter_mut().enumerate() {
        road.light = light_for(cycle_position, index, cycle_length, transition_time);
    }
}

/// Green window of a single road in seconds
pub fn green_window(cycle_length: f64, transition_time: f64) -> f64 {
    cycle_length / 4.0 - transition_time
}
