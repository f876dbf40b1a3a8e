//! Simulation engine that drives every session
//!
//! Sessions are advanced by an external driver calling [`SimulationEngine::tick`].
//! All mutation of a session happens while holding that session's lock, and
//! durable writes are issued under the same lock so they land in tick order.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use super::config::EngineConfig;
use super::detection::{analyze_traffic_density, AnalyticsSink, DensityLevel, VideoAnalytics};
use super::error::SignalError;
use super::intersection::{apply_phase_schedule, green_window, EmergencyOverride};
use super::metrics::SessionStats;
use super::persistence::{
    DurableStore, OptimizationRecommendation, RecommendationCategory, RecommendationPriority,
    RecommendationStatus, RunStatus, SimulationRun, TrafficEvent,
};
use super::road::RoadState;
use super::session::{lock_session, SessionStore, SimSession};
use super::types::{LightState, SessionId};

/// Probability that a red approach gains a vehicle while an emergency holds it
const EMERGENCY_SPILLOVER_CHANCE: f64 = 0.3;

/// Vehicles cleared per tick from the preempted approach
const EMERGENCY_CLEAR_RATE: u32 = 2;

/// Probability that a non-green approach sees arrivals on a tick
const ARRIVAL_CHANCE: f64 = 0.5;

/// Density above which a video frame lengthens the cycle
const DENSITY_EXTEND_THRESHOLD: u32 = 20;

/// Density below which a video frame shortens the cycle
const DENSITY_SHORTEN_THRESHOLD: u32 = 10;

/// The engine owning all active sessions
pub struct SimulationEngine {
    config: EngineConfig,
    sessions: SessionStore,
    store: Arc<dyn DurableStore>,
    /// Source of per-session seeds
    seed_rng: Mutex<StdRng>,
}

impl SimulationEngine {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_config(EngineConfig::default(), store)
    }

    pub fn with_config(config: EngineConfig, store: Arc<dyn DurableStore>) -> Self {
        let seed_rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            sessions: SessionStore::new(),
            store,
            seed_rng: Mutex::new(seed_rng),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.ids()
    }

    fn session_rng(&self) -> StdRng {
        let mut seeds = self.seed_rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::from_rng(&mut *seeds)
    }

    /// Run `f` on a live session under its lock. Returns `None` if the session
    /// is unknown or already stopped.
    fn with_session<T>(
        &self,
        id: SessionId,
        operation: &str,
        f: impl FnOnce(&mut SimSession) -> T,
    ) -> Option<T> {
        let Some(handle) = self.sessions.get(id) else {
            warn!(
                "{} in active simulations ({})",
                SignalError::SessionNotFound(id),
                operation
            );
            return None;
        };
        let mut session = lock_session(&handle);
        if session.evicted {
            warn!("Simulation {} was stopped ({})", id, operation);
            return None;
        }
        Some(f(&mut session))
    }

    /// Create a session with four randomized roads and persist its run record
    pub fn create_session(&self, user_id: &str, speed: f64) -> SimulationRun {
        let id = SessionId::new();
        let session = SimSession::new(
            id,
            user_id,
            speed,
            self.config.initial_cycle_length,
            self.session_rng(),
        );

        let run = SimulationRun::new(id, user_id, speed, self.config.initial_efficiency);
        if let Err(e) = self.store.create_run(&run) {
            error!("Failed to persist run for simulation {}: {:#}", id, e);
        }

        self.sessions.insert(session);
        info!("Created simulation {} for user {}", id, user_id);
        run
    }

    /// Advance a session by `delta_time` simulated seconds
    pub fn tick(&self, id: SessionId, delta_time: f64) {
        if !delta_time.is_finite() || delta_time < 0.0 {
            warn!("Ignoring tick of {} s for simulation {}", delta_time, id);
            return;
        }

        self.with_session(id, "tick", |session| {
            session.current_cycle += delta_time;

            if session.emergency_active() {
                Self::handle_emergency_override(session);
            } else {
                self.update_traffic_lights(session, delta_time);
            }

            Self::simulate_traffic(session);

            session.stats = SessionStats::aggregate(
                &session.roads,
                session.total_processed,
                session.current_cycle,
                self.config.throughput_fallback,
            );
            self.persist_tick(session);

            // Fires once per interval boundary crossed by this tick. A tick at
            // least as long as the interval fires every time, but still writes
            // a single snapshot when it crosses several boundaries.
            if session.current_cycle % self.config.snapshot_interval < delta_time {
                if let Err(e) = self.store.append_road_snapshot(session.id, &session.roads) {
                    error!("Failed to save road snapshot for simulation {}: {:#}", session.id, e);
                }
            }
        });
    }

    /// Preempted road goes green and drains; the others hold red and may back up
    fn handle_emergency_override(session: &mut SimSession) {
        let Some(road_direction) = session.emergency_override.as_ref().map(|o| o.road) else {
            return;
        };
        let SimSession { roads, rng, .. } = session;

        for road in roads.iter_mut() {
            if road.direction == road_direction {
                road.light = LightState::Green;
                road.clear_by(EMERGENCY_CLEAR_RATE);
            } else {
                road.light = LightState::Red;
                if rng.random_bool(EMERGENCY_SPILLOVER_CHANCE) {
                    road.arrive(1, 1);
                }
            }
        }
    }

    fn update_traffic_lights(&self, session: &mut SimSession, delta_time: f64) {
        // Elapsed time within the current cycle, measured against the length in force
        session.cycle_elapsed += delta_time;
        if session.cycle_elapsed >= session.cycle_length {
            let wraps = (session.cycle_elapsed / session.cycle_length).floor();
            session.cycle_elapsed -= wraps * session.cycle_length;
            session.cycles_completed = session
                .cycles_completed
                .saturating_add(wraps.min(f64::from(u32::MAX)) as u32);
        }

        apply_phase_schedule(
            &mut session.roads,
            session.current_cycle,
            session.cycle_length,
            self.config.transition_time,
        );
    }

    /// Discharge green approaches, add arrivals to the rest, refresh performance
    fn simulate_traffic(session: &mut SimSession) {
        let SimSession {
            roads,
            rng,
            total_processed,
            ..
        } = session;

        for road in roads.iter_mut() {
            if road.is_green() {
                if road.queue > 0 {
                    let processed = road.discharge(rng.random_range(1..=3));
                    *total_processed += u64::from(processed);
                }
                road.reduce_wait(f64::from(rng.random_range(0..=4u32)));
            } else {
                if rng.random_bool(ARRIVAL_CHANCE) {
                    let vehicles = rng.random_range(0..=1);
                    let queue = rng.random_range(0..=1);
                    road.arrive(vehicles, queue);
                }
                road.increase_wait(f64::from(rng.random_range(0..=2u32)));
            }
            road.recompute_performance();
        }
    }

    /// Look up the durable run; lookup failures count as "not found"
    fn find_run(&self, id: SessionId) -> Option<SimulationRun> {
        match self.store.find_run(id) {
            Ok(Some(run)) => Some(run),
            Ok(None) => {
                debug!("No durable run for simulation {}", id);
                None
            }
            Err(e) => {
                error!("Failed to load run for simulation {}: {:#}", id, e);
                None
            }
        }
    }

    fn persist_tick(&self, session: &SimSession) {
        let Some(mut run) = self.find_run(session.id) else {
            return;
        };
        run.total_processed = session.total_processed;
        run.avg_wait_time = session.stats.avg_wait_time;
        run.efficiency = session.stats.efficiency;
        run.cycles_completed = session.cycles_completed;
        if let Err(e) = self.store.update_run(&run) {
            error!("Failed to update run for simulation {}: {:#}", session.id, e);
        }
    }

    /// Install an emergency override and log it as an event
    pub fn set_emergency_override(&self, id: SessionId, emergency: EmergencyOverride) {
        self.with_session(id, "set emergency override", |session| {
            info!(
                "Emergency override set for simulation {}: {} on {}",
                id, emergency.vehicle_type, emergency.road
            );
            session.emergency_override = Some(emergency.clone());

            if let Err(e) = self.record_emergency_event(id, &emergency) {
                error!("Failed to record emergency event for simulation {}: {:#}", id, e);
            }
        });
    }

    fn record_emergency_event(&self, id: SessionId, emergency: &EmergencyOverride) -> Result<()> {
        let Some(mut run) = self.find_run(id) else {
            return Ok(());
        };

        let event = TrafficEvent {
            id: Uuid::new_v4(),
            session_id: id,
            event_type: "emergency".to_string(),
            road_name: Some(emergency.road.to_string()),
            vehicle_type: Some(emergency.vehicle_type.to_string()),
            description: format!(
                "Emergency override activated for {}",
                emergency.vehicle_type
            ),
            timestamp: Utc::now(),
        };
        self.store
            .append_event(&event)
            .context("Failed to append emergency event")?;

        run.emergency_events += 1;
        self.store
            .update_run(&run)
            .context("Failed to bump emergency event counter")?;
        Ok(())
    }

    pub fn clear_emergency_override(&self, id: SessionId) {
        self.with_session(id, "clear emergency override", |session| {
            session.emergency_override = None;
            info!("Emergency override cleared for simulation {}", id);
        });
    }

    /// Overwrite a road from a video frame and nudge the cycle length.
    ///
    /// This is the only path by which perception changes signal timing.
    pub fn update_road_from_video(&self, id: SessionId, road_name: &str, analytics: &VideoAnalytics) {
        let min_cycle = self.config.min_cycle_length;
        let max_cycle = self.config.max_cycle_length;

        self.with_session(id, "video update", |session| {
            let Some(road) = session.road_mut(road_name) else {
                let missing = SignalError::RoadNotFound {
                    session: id,
                    road: road_name.to_string(),
                };
                warn!("{}", missing);
                return;
            };

            road.vehicles = analytics.vehicle_count;
            road.queue = analytics.queue_length;
            road.recompute_performance_from_video(analytics.vehicle_count);

            let density = analytics.vehicle_count + analytics.queue_length * 2;
            if density > DENSITY_EXTEND_THRESHOLD {
                session.cycle_length = (session.cycle_length + 1.0).clamp(min_cycle, max_cycle);
            } else if density < DENSITY_SHORTEN_THRESHOLD {
                session.cycle_length = (session.cycle_length - 1.0).clamp(min_cycle, max_cycle);
            }

            debug!(
                "Updated {} from video analytics: {} vehicles, {} queue, cycle {}s",
                road_name, analytics.vehicle_count, analytics.queue_length, session.cycle_length
            );
        });
    }

    /// Turn a dense video frame into a persisted timing recommendation.
    ///
    /// Returns `None` for low or medium density and for unknown sessions or roads.
    pub fn recommend_timing(
        &self,
        id: SessionId,
        road_name: &str,
        analytics: &VideoAnalytics,
    ) -> Option<OptimizationRecommendation> {
        let analysis = analyze_traffic_density(analytics);
        let transition_time = self.config.transition_time;

        self.with_session(id, "recommend timing", |session| {
            if session.road(road_name).is_none() {
                let missing = SignalError::RoadNotFound {
                    session: id,
                    road: road_name.to_string(),
                };
                warn!("{}", missing);
                return None;
            }

            let priority = match analysis.density {
                DensityLevel::Low | DensityLevel::Medium => return None,
                DensityLevel::High => RecommendationPriority::High,
                DensityLevel::Critical => RecommendationPriority::Critical,
            };

            let current_green = green_window(session.cycle_length, transition_time);
            let recommended = f64::from(analysis.recommended_green_time);
            let improvement = ((recommended - current_green) / current_green * 100.0).clamp(0.0, 100.0);

            let recommendation = OptimizationRecommendation {
                id: Uuid::new_v4(),
                session_id: id,
                road_name: road_name.to_string(),
                category: RecommendationCategory::Timing,
                priority,
                recommendation: format!(
                    "Extend green phase for {} to {}s (currently {:.0}s)",
                    road_name, analysis.recommended_green_time, current_green
                ),
                expected_improvement: (improvement * 10.0).round() / 10.0,
                status: RecommendationStatus::Pending,
                created_at: Utc::now(),
            };

            if let Err(e) = self.store.append_recommendation(&recommendation) {
                error!("Failed to save recommendation for simulation {}: {:#}", id, e);
            }
            Some(recommendation)
        })
        .flatten()
    }

    /// Move the durable run between statuses; completed runs stay completed
    fn transition_run(&self, id: SessionId, to: RunStatus) -> bool {
        let Some(mut run) = self.find_run(id) else {
            warn!("Simulation {} has no durable run to mark {:?}", id, to);
            return false;
        };
        if run.status == RunStatus::Completed {
            warn!("Simulation {} is already completed", id);
            return false;
        }

        run.status = to;
        if to == RunStatus::Completed {
            run.end_time = Some(Utc::now());
        }
        if let Err(e) = self.store.update_run(&run) {
            error!("Failed to update status of simulation {}: {:#}", id, e);
            return false;
        }
        true
    }

    /// Apply a status transition while holding the session lock when one is live
    fn lifecycle(&self, id: SessionId, to: RunStatus) -> bool {
        match self.sessions.get(id) {
            Some(handle) => {
                let _session = lock_session(&handle);
                self.transition_run(id, to)
            }
            None => self.transition_run(id, to),
        }
    }

    pub fn pause(&self, id: SessionId) {
        if self.lifecycle(id, RunStatus::Paused) {
            info!("Simulation {} paused", id);
        }
    }

    pub fn resume(&self, id: SessionId) {
        if self.lifecycle(id, RunStatus::Running) {
            info!("Simulation {} resumed", id);
        }
    }

    /// Complete the run and evict the session from memory
    pub fn stop(&self, id: SessionId) {
        match self.sessions.get(id) {
            Some(handle) => {
                let mut session = lock_session(&handle);
                session.evicted = true;
                self.sessions.remove(id);
                self.transition_run(id, RunStatus::Completed);
            }
            None => {
                self.transition_run(id, RunStatus::Completed);
            }
        }
        info!("Simulation {} stopped", id);
    }

    /// Current roads, or an empty list for unknown sessions
    pub fn get_roads(&self, id: SessionId) -> Vec<RoadState> {
        self.with_session(id, "get roads", |session| session.roads.clone())
            .unwrap_or_default()
    }

    /// Current stats, or the default stats for unknown sessions
    pub fn get_stats(&self, id: SessionId) -> SessionStats {
        self.with_session(id, "get stats", |session| session.stats.clone())
            .unwrap_or_default()
    }

    pub fn cycle_length(&self, id: SessionId) -> Option<f64> {
        self.with_session(id, "get cycle length", |session| session.cycle_length)
    }

    pub fn current_cycle(&self, id: SessionId) -> Option<f64> {
        self.with_session(id, "get current cycle", |session| session.current_cycle)
    }

    pub fn emergency_override(&self, id: SessionId) -> Option<EmergencyOverride> {
        self.with_session(id, "get emergency override", |session| {
            session.emergency_override.clone()
        })
        .flatten()
    }

    /// Print a summary of a session to the console
    pub fn print_summary(&self, id: SessionId) {
        self.with_session(id, "print summary", |session| {
            println!("=== Intersection Summary ===");
            println!(
                "Time: {:.1}s, Cycle length: {:.0}s, Cycles: {}",
                session.current_cycle, session.cycle_length, session.cycles_completed
            );
            if let Some(emergency) = &session.emergency_override {
                println!(
                    "Emergency: {} on {} ({})",
                    emergency.vehicle_type,
                    emergency.road,
                    if emergency.active { "active" } else { "inactive" }
                );
            }
            println!(
                "Processed: {}, Avg wait: {:.2}s, Throughput: {}/min, Efficiency: {:.2}%",
                session.stats.total_processed,
                session.stats.avg_wait_time,
                session.stats.throughput,
                session.stats.efficiency
            );
            println!("--- Roads ---");
            for road in &session.roads {
                println!(
                    "  {} ({}): light={}, vehicles={}, queue={}, wait={:.0}s, performance={:.1}%",
                    road.name,
                    road.direction,
                    road.light,
                    road.vehicles,
                    road.queue,
                    road.wait_time,
                    road.performance
                );
            }
        });
    }

    /// Draw the intersection with the current light of each approach
    pub fn draw_intersection(&self, id: SessionId) {
        self.with_session(id, "draw intersection", |session| {
            let glyph = |index: usize| match session.roads.get(index).map(|r| r.light) {
                Some(LightState::Green) => 'G',
                Some(LightState::Yellow) => 'Y',
                Some(LightState::Red) => 'R',
                None => ' ',
            };
            let queue = |index: usize| session.roads.get(index).map_or(0, |r| r.queue);

            println!("\n=== Intersection ===");
            println!("Legend: G=Green, Y=Yellow, R=Red, number=queue");
            println!();
            println!("        | {:>3} |", queue(0));
            println!("        |  {}  |", glyph(0));
            println!("--------+-----+--------");
            println!("{:>4} {}  |     |  {} {:<4}", queue(3), glyph(3), glyph(1), queue(1));
            println!("--------+-----+--------");
            println!("        |  {}  |", glyph(2));
            println!("        | {:>3} |", queue(2));
            println!();
        });
    }
}

/// Push sink that feeds every emission back into a session's timing
pub struct EngineFeedbackSink {
    engine: Arc<SimulationEngine>,
    session_id: SessionId,
}

impl EngineFeedbackSink {
    pub fn new(engine: Arc<SimulationEngine>, session_id: SessionId) -> Self {
        Self { engine, session_id }
    }
}

impl AnalyticsSink for EngineFeedbackSink {
    fn deliver(&self, road_name: &str, analytics: &VideoAnalytics) -> Result<()> {
        self.engine
            .update_road_from_video(self.session_id, road_name, analytics);
        Ok(())
    }
}
