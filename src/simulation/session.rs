//! Per-session simulation state and the registry that holds it
//!
//! The registry map is only locked long enough to clone an entry's `Arc`.
//! Each session has its own mutex, so operations on different sessions never
//! contend and operations on one session are applied one at a time.

use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::intersection::EmergencyOverride;
use super::metrics::SessionStats;
use super::road::RoadState;
use super::types::{Direction, SessionId, ROAD_NAMES};

/// In-memory state of one running intersection
#[derive(Debug)]
pub struct SimSession {
    pub id: SessionId,
    pub user_id: String,
    pub speed: f64,
    /// Exactly four roads; index `i` has direction `Direction::ALL[i]`
    pub roads: Vec<RoadState>,
    /// Elapsed simulated seconds
    pub current_cycle: f64,
    pub cycle_length: f64,
    pub total_processed: u64,
    pub cycles_completed: u32,
    pub emergency_override: Option<EmergencyOverride>,
    pub stats: SessionStats,
    /// Set once the session is stopped; a handle obtained before eviction sees this
    pub evicted: bool,
    /// Simulated seconds into the cycle in progress
    pub(crate) cycle_elapsed: f64,
    pub(crate) rng: StdRng,
}

impl SimSession {
    pub fn new(id: SessionId, user_id: &str, speed: f64, cycle_length: f64, mut rng: StdRng) -> Self {
        let roads = ROAD_NAMES
            .iter()
            .zip(Direction::ALL)
            .map(|(name, direction)| RoadState::new_random(name, direction, &mut rng))
            .collect();

        Self {
            id,
            user_id: user_id.to_string(),
            speed,
            roads,
            current_cycle: 0.0,
            cycle_length,
            total_processed: 0,
            cycles_completed: 0,
            emergency_override: None,
            stats: SessionStats::default(),
            evicted: false,
            cycle_elapsed: 0.0,
            rng,
        }
    }

    pub fn road_mut(&mut self, name: &str) -> Option<&mut RoadState> {
        self.roads.iter_mut().find(|r| r.name == name)
    }

    pub fn road(&self, name: &str) -> Option<&RoadState> {
        self.roads.iter().find(|r| r.name == name)
    }

    /// Whether an override is installed and active
    pub fn emergency_active(&self) -> bool {
        self.emergency_override.as_ref().is_some_and(|o| o.active)
    }
}

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<SimSession>>;

/// Lock a session, recovering the state if a previous holder panicked
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, SimSession> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Concurrent registry from session id to session state
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SimSession) -> SessionHandle {
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
