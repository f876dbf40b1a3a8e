//! Durable store contract and an in-memory implementation
//!
//! The engine keeps the in-memory session as the source of truth and writes
//! through to a [`DurableStore`]. Write failures are logged by the caller and
//! never stop the simulation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::error::SignalError;
use super::road::RoadState;
use super::types::{LightState, SessionId};

/// Lifecycle status of a durable run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
}

/// Durable counterpart of a session; updated in place, never replaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRun {
    pub id: SessionId,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub speed: f64,
    pub cycles_completed: u32,
    pub total_processed: u64,
    pub avg_wait_time: f64,
    pub efficiency: f64,
    pub emergency_events: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SimulationRun {
    pub fn new(id: SessionId, user_id: &str, speed: f64, efficiency: f64) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.to_string(),
            start_time: now,
            end_time: None,
            status: RunStatus::Running,
            speed,
            cycles_completed: 0,
            total_processed: 0,
            avg_wait_time: 0.0,
            efficiency,
            emergency_events: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Historical copy of one road at a point in simulated time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadSnapshot {
    pub id: Uuid,
    pub session_id: SessionId,
    pub road_name: String,
    pub road_direction: String,
    pub vehicles: u32,
    pub wait_time: f64,
    pub queue_length: u32,
    pub efficiency: f64,
    pub signal_state: LightState,
    pub timestamp: DateTime<Utc>,
}

impl RoadSnapshot {
    pub fn from_road(session_id: SessionId, road: &RoadState, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            road_name: road.name.clone(),
            road_direction: road.direction.to_string(),
            vehicles: road.vehicles,
            wait_time: road.wait_time,
            queue_length: road.queue,
            efficiency: road.performance,
            signal_state: road.light,
            timestamp,
        }
    }
}

/// Logged occurrence such as an emergency preemption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEvent {
    pub id: Uuid,
    pub session_id: SessionId,
    pub event_type: String,
    pub road_name: Option<String>,
    pub vehicle_type: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// Severity attached to a recommendation; mirrors density levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationCategory {
    Timing,
    Infrastructure,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Implemented,
    Dismissed,
}

/// Signal-timing advice derived from a video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRecommendation {
    pub id: Uuid,
    pub session_id: SessionId,
    pub road_name: String,
    pub category: RecommendationCategory,
    pub priority: RecommendationPriority,
    pub recommendation: String,
    /// Percentage
    pub expected_improvement: f64,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
}

/// Collaborator that persists runs, snapshots, events and recommendations
pub trait DurableStore: Send + Sync {
    fn create_run(&self, run: &SimulationRun) -> Result<()>;

    fn update_run(&self, run: &SimulationRun) -> Result<()>;

    fn find_run(&self, id: SessionId) -> Result<Option<SimulationRun>>;

    fn append_road_snapshot(&self, session_id: SessionId, roads: &[RoadState]) -> Result<()>;

    fn append_event(&self, event: &TrafficEvent) -> Result<()>;

    fn append_recommendation(&self, recommendation: &OptimizationRecommendation) -> Result<()>;
}

#[derive(Default)]
struct StoreInner {
    runs: HashMap<SessionId, SimulationRun>,
    snapshots: Vec<RoadSnapshot>,
    events: Vec<TrafficEvent>,
    recommendations: Vec<OptimizationRecommendation>,
}

/// Process-local durable store, used by the headless driver and tests
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runs(&self) -> Vec<SimulationRun> {
        self.lock().runs.values().cloned().collect()
    }

    pub fn snapshots(&self, session_id: SessionId) -> Vec<RoadSnapshot> {
        self.lock()
            .snapshots
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn events(&self, session_id: SessionId) -> Vec<TrafficEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn recommendations(&self, session_id: SessionId) -> Vec<OptimizationRecommendation> {
        self.lock()
            .recommendations
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }
}

impl DurableStore for InMemoryStore {
    fn create_run(&self, run: &SimulationRun) -> Result<()> {
        self.lock().runs.insert(run.id, run.clone());
        Ok(())
    }

    fn update_run(&self, run: &SimulationRun) -> Result<()> {
        let mut inner = self.lock();
        let stored = inner
            .runs
            .get_mut(&run.id)
            .ok_or(SignalError::RunNotFound(run.id))?;
        *stored = SimulationRun {
            updated_at: Utc::now(),
            ..run.clone()
        };
        Ok(())
    }

    fn find_run(&self, id: SessionId) -> Result<Option<SimulationRun>> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    fn append_road_snapshot(&self, session_id: SessionId, roads: &[RoadState]) -> Result<()> {
        let mut inner = self.lock();
        if !inner.runs.contains_key(&session_id) {
            return Err(SignalError::RunNotFound(session_id).into());
        }
        let now = Utc::now();
        inner
            .snapshots
            .extend(roads.iter().map(|road| RoadSnapshot::from_road(session_id, road, now)));
        Ok(())
    }

    fn append_event(&self, event: &TrafficEvent) -> Result<()> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    fn append_recommendation(&self, recommendation: &OptimizationRecommendation) -> Result<()> {
        self.lock().recommendations.push(recommendation.clone());
        Ok(())
    }
}
