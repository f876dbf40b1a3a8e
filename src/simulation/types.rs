//! Core types for the signal simulation
//!
//! Identifiers and small enums shared by the engine, the detection feed and
//! the persistence layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::SignalError;

/// A unique identifier for a simulation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Approach direction of a road into the intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Directions in road-index order; index `i` owns the `i`-th quarter of the cycle.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::East => "East",
            Direction::South => "South",
            Direction::West => "West",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SignalError::Config(format!("unknown direction '{}'", s)))
    }
}

/// State of a traffic light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightState {
    Red,
    Yellow,
    Green,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightState::Red => "red",
            LightState::Yellow => "yellow",
            LightState::Green => "green",
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of a vehicle seen by the detection feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Truck,
    Bus,
    Motorcycle,
    Bicycle,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Truck => "truck",
            VehicleClass::Bus => "bus",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Bicycle => "bicycle",
        }
    }
}

/// Weighted draw table: 50% car, 20% truck, 10% bus, 10% motorcycle, 10% bicycle
pub const VEHICLE_CLASS_TABLE: [VehicleClass; 10] = [
    VehicleClass::Car,
    VehicleClass::Car,
    VehicleClass::Car,
    VehicleClass::Car,
    VehicleClass::Car,
    VehicleClass::Truck,
    VehicleClass::Truck,
    VehicleClass::Bus,
    VehicleClass::Motorcycle,
    VehicleClass::Bicycle,
];

/// Kind of emergency vehicle requesting preemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyVehicle {
    Ambulance,
    FireTruck,
    Police,
}

impl EmergencyVehicle {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyVehicle::Ambulance => "ambulance",
            EmergencyVehicle::FireTruck => "fire_truck",
            EmergencyVehicle::Police => "police",
        }
    }
}

impl FromStr for EmergencyVehicle {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ambulance" => Ok(EmergencyVehicle::Ambulance),
            "fire_truck" => Ok(EmergencyVehicle::FireTruck),
            "police" => Ok(EmergencyVehicle::Police),
            other => Err(SignalError::Config(format!("unknown emergency vehicle '{}'", other))),
        }
    }
}

impl fmt::Display for EmergencyVehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default names of the four approaches, in road-index order
pub const ROAD_NAMES: [&str; 4] = ["Road A", "Road B", "Road C", "Road D"];

/// Yellow light duration at the end of each road's window, in seconds
pub const TRANSITION_TIME: f64 = 3.0;

/// Lower bound for a road's wait time in seconds
pub const MIN_WAIT_TIME: f64 = 20.0;

/// Upper bound for a road's wait time in seconds
pub const MAX_WAIT_TIME: f64 = 80.0;

/// Lower bound for a road's performance percentage
pub const MIN_PERFORMANCE: f64 = 50.0;

/// Upper bound for a road's performance percentage
pub const MAX_PERFORMANCE: f64 = 98.0;
