//! Intersection signal simulation
//!
//! This module contains the signal-control engine, the synthetic detection
//! feed that drives adaptive timing, and the durable-store contract they
//! write through. It can be driven headless from the console or embedded
//! behind any front end.

mod config;
mod detection;
mod engine;
mod error;
mod intersection;
mod metrics;
mod persistence;
mod road;
mod session;
mod types;

// Re-export public types for external use
pub use config::{DetectionConfig, EngineConfig};
pub use detection::{
    analyze_traffic_density, density_score, detect_vehicles, AnalyticsSink, BoundingBox,
    ChannelSink, DensityAnalysis, DensityLevel, DetectedVehicle, DetectionFeed, DetectionHandle,
    VideoAnalytics, QUEUE_SPEED_THRESHOLD,
};
pub use engine::{EngineFeedbackSink, SimulationEngine};
pub use error::{SignalError, SignalResult};
pub use intersection::{apply_phase_schedule, green_window, light_for, EmergencyOverride};
pub use metrics::{round2, throughput, SessionStats, DEFAULT_EFFICIENCY, THROUGHPUT_FALLBACK};
pub use persistence::{
    DurableStore, InMemoryStore, OptimizationRecommendation, RecommendationCategory,
    RecommendationPriority, RecommendationStatus, RoadSnapshot, RunStatus, SimulationRun,
    TrafficEvent,
};
pub use road::RoadState;
pub use session::{SessionStore, SimSession};
pub use types::{
    Direction, EmergencyVehicle, LightState, SessionId, VehicleClass, MAX_PERFORMANCE,
    MAX_WAIT_TIME, MIN_PERFORMANCE, MIN_WAIT_TIME, ROAD_NAMES, TRANSITION_TIME,
    VEHICLE_CLASS_TABLE,
};
