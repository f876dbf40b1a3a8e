//! Synthetic vehicle-detection feed
//!
//! Each road gets its own periodic task that draws a frame of detected
//! vehicles and pushes the derived analytics to a sink. Stopping a road
//! signals its task and waits for it to finish, so nothing is delivered for
//! that road once `stop_detection` has returned.

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::config::DetectionConfig;
use super::error::SignalError;
use super::types::{VehicleClass, VEHICLE_CLASS_TABLE};

/// Vehicles slower than this (km/h) count as queued
pub const QUEUE_SPEED_THRESHOLD: f64 = 10.0;

/// Normalized bounding box inside the frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedVehicle {
    pub id: String,
    #[serde(rename = "type")]
    pub vehicle_type: VehicleClass,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// km/h
    pub speed: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// One frame's worth of analytics for a road
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnalytics {
    pub road_name: String,
    pub vehicle_count: u32,
    pub queue_length: u32,
    pub average_speed: f64,
    /// Vehicles per minute extrapolated from this frame
    pub flow_rate: f64,
    pub detected_vehicles: Vec<DetectedVehicle>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensityAnalysis {
    pub density: DensityLevel,
    /// Seconds
    pub recommended_green_time: u32,
    /// 0-100
    pub urgency: u8,
}

/// Weighted congestion score of a frame
pub fn density_score(analytics: &VideoAnalytics) -> f64 {
    f64::from(analytics.vehicle_count) * 2.0
        + f64::from(analytics.queue_length) * 3.0
        + (50.0 - analytics.average_speed) / 10.0
}

/// Classify a frame's congestion and suggest a green time
pub fn analyze_traffic_density(analytics: &VideoAnalytics) -> DensityAnalysis {
    let score = density_score(analytics);

    let (density, recommended_green_time, urgency) = if score < 10.0 {
        (DensityLevel::Low, 15, 20)
    } else if score < 25.0 {
        (DensityLevel::Medium, 25, 50)
    } else if score < 40.0 {
        (DensityLevel::High, 35, 75)
    } else {
        (DensityLevel::Critical, 45, 95)
    };

    debug!(
        "Density for {}: score {:.2} -> {:?}",
        analytics.road_name, score, density
    );

    DensityAnalysis {
        density,
        recommended_green_time,
        urgency,
    }
}

/// Draw one synthetic frame for `road_name`
pub fn detect_vehicles<R: Rng + ?Sized>(
    road_name: &str,
    rng: &mut R,
    config: &DetectionConfig,
) -> VideoAnalytics {
    let timestamp = Utc::now().timestamp_millis();
    let vehicle_count = rng.random_range(0..=config.max_vehicles);

    let detected_vehicles: Vec<DetectedVehicle> = (0..vehicle_count)
        .map(|i| {
            let vehicle_type = VEHICLE_CLASS_TABLE[rng.random_range(0..VEHICLE_CLASS_TABLE.len())];
            let bbox = BoundingBox {
                x: rng.random::<f64>() * 0.8,
                y: rng.random::<f64>() * 0.8,
                width: 0.05 + rng.random::<f64>() * 0.15,
                height: 0.05 + rng.random::<f64>() * 0.15,
            };
            let confidence = 0.5 + rng.random::<f64>() * 0.49;
            let speed = rng.random::<f64>() * 80.0;

            DetectedVehicle {
                id: format!("{}-vehicle-{}-{}", road_name, timestamp, i),
                vehicle_type,
                confidence,
                bbox,
                speed,
                timestamp,
            }
        })
        .collect();

    let queue_length = detected_vehicles
        .iter()
        .filter(|v| v.speed < QUEUE_SPEED_THRESHOLD)
        .count() as u32;

    let average_speed = if detected_vehicles.is_empty() {
        0.0
    } else {
        let mean = detected_vehicles.iter().map(|v| v.speed).sum::<f64>()
            / detected_vehicles.len() as f64;
        (mean * 100.0).round() / 100.0
    };

    VideoAnalytics {
        road_name: road_name.to_string(),
        vehicle_count,
        queue_length,
        average_speed,
        flow_rate: f64::from(vehicle_count) * config.frames_per_minute(),
        detected_vehicles,
        timestamp,
    }
}

/// Consumer of analytics emissions.
///
/// Called from the blocking pool, so it may briefly block. Errors and panics
/// are logged and the feed carries on.
pub trait AnalyticsSink: Send + Sync {
    fn deliver(&self, road_name: &str, analytics: &VideoAnalytics) -> Result<()>;
}

impl<F> AnalyticsSink for F
where
    F: Fn(&str, &VideoAnalytics) -> Result<()> + Send + Sync,
{
    fn deliver(&self, road_name: &str, analytics: &VideoAnalytics) -> Result<()> {
        self(road_name, analytics)
    }
}

/// Sink that forwards emissions into an unbounded tokio channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<VideoAnalytics>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<VideoAnalytics>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<VideoAnalytics>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl AnalyticsSink for ChannelSink {
    fn deliver(&self, road_name: &str, analytics: &VideoAnalytics) -> Result<()> {
        self.tx
            .send(analytics.clone())
            .map_err(|_| SignalError::Delivery {
                road: road_name.to_string(),
                reason: "receiver dropped".to_string(),
            })?;
        Ok(())
    }
}

/// Caller-side view of a running detection task
pub struct DetectionHandle {
    road_name: String,
    emissions: watch::Receiver<u64>,
}

impl DetectionHandle {
    pub fn road_name(&self) -> &str {
        &self.road_name
    }

    /// Number of frames produced so far, delivered or not
    pub fn emissions(&self) -> u64 {
        *self.emissions.borrow()
    }

    /// Wait until at least `count` frames were produced. Returns `false` if the
    /// task ended first.
    pub async fn wait_for(&mut self, count: u64) -> bool {
        self.emissions.wait_for(|n| *n >= count).await.is_ok()
    }

    pub async fn stop(self, feed: &DetectionFeed) {
        feed.stop_detection(&self.road_name).await;
    }
}

struct RunningDetection {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningDetection {
    /// Signal the task and wait for it to exit
    async fn cancel(self, road_name: &str) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("Detection task for {} panicked", road_name);
            }
        }
    }
}

/// Registry of per-road detection tasks
pub struct DetectionFeed {
    config: DetectionConfig,
    tasks: Mutex<HashMap<String, RunningDetection>>,
    /// Bounds how many frames are produced at once across all roads
    permits: Arc<Semaphore>,
    seed_rng: StdMutex<StdRng>,
    closed: AtomicBool,
}

impl Default for DetectionFeed {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl DetectionFeed {
    pub fn new(config: DetectionConfig) -> Self {
        let seed_rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            tasks: Mutex::new(HashMap::new()),
            seed_rng: StdMutex::new(seed_rng),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    fn task_rng(&self) -> StdRng {
        let mut seeds = self.seed_rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::from_rng(&mut *seeds)
    }

    /// Start (or restart) detection for a road.
    ///
    /// The first frame is produced immediately, then one per period until the
    /// road is stopped. Returns `None` once the feed has been shut down.
    pub async fn start_detection<S>(&self, road_name: &str, sink: S) -> Option<DetectionHandle>
    where
        S: AnalyticsSink + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        // Checked under the registry lock so a start cannot slip past shutdown
        if self.closed.load(Ordering::SeqCst) {
            warn!("Detection feed is shut down; not starting {}", road_name);
            return None;
        }

        if let Some(existing) = tasks.remove(road_name) {
            existing.cancel(road_name).await;
            debug!("Restarting vehicle detection for {}", road_name);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = watch::channel(0u64);
        let task = tokio::spawn(run_detection(
            road_name.to_string(),
            self.config.clone(),
            self.task_rng(),
            Arc::new(sink),
            Arc::clone(&self.permits),
            stop_rx,
            progress_tx,
        ));

        tasks.insert(road_name.to_string(), RunningDetection { stop_tx, task });
        info!("Started vehicle detection for {}", road_name);

        Some(DetectionHandle {
            road_name: road_name.to_string(),
            emissions: progress_rx,
        })
    }

    /// Stop a road's detection and wait for its task to exit; no-op if idle
    pub async fn stop_detection(&self, road_name: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(running) = tasks.remove(road_name) {
            running.cancel(road_name).await;
            info!("Stopped vehicle detection for {}", road_name);
        }
    }

    pub async fn stop_all_detections(&self) {
        let mut tasks = self.tasks.lock().await;
        // Signal every task before waiting on any of them
        let stopping: Vec<(String, JoinHandle<()>)> = tasks
            .drain()
            .map(|(road_name, running)| {
                let _ = running.stop_tx.send(());
                (road_name, running.task)
            })
            .collect();
        for (road_name, task) in stopping {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Detection task for {} panicked", road_name);
                }
            }
        }
        info!("Stopped all vehicle detections");
    }

    /// Stop everything and refuse new detections
    pub async fn shutdown(&self) {
        {
            let _tasks = self.tasks.lock().await;
            self.closed.store(true, Ordering::SeqCst);
        }
        self.stop_all_detections().await;
    }

    pub async fn active_roads(&self) -> Vec<String> {
        let mut roads: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        roads.sort();
        roads
    }

    pub async fn is_running(&self, road_name: &str) -> bool {
        self.tasks.lock().await.contains_key(road_name)
    }

    pub fn analyze_traffic_density(&self, analytics: &VideoAnalytics) -> DensityAnalysis {
        analyze_traffic_density(analytics)
    }
}

async fn run_detection(
    road_name: String,
    config: DetectionConfig,
    mut rng: StdRng,
    sink: Arc<dyn AnalyticsSink>,
    permits: Arc<Semaphore>,
    mut stop_rx: oneshot::Receiver<()>,
    progress: watch::Sender<u64>,
) {
    let mut interval = tokio::time::interval(config.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut emitted = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = interval.tick() => {
                let Ok(_permit) = permits.acquire().await else {
                    break;
                };

                let analytics = detect_vehicles(&road_name, &mut rng, &config);

                // Sinks may take blocking locks, so keep them off the runtime workers
                let delivery = {
                    let sink = Arc::clone(&sink);
                    let road_name = road_name.clone();
                    tokio::task::spawn_blocking(move || sink.deliver(&road_name, &analytics))
                };
                match delivery.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Error in vehicle detection for {}: {:#}", road_name, e);
                    }
                    Err(e) if e.is_panic() => {
                        error!("Sink panicked while delivering analytics for {}", road_name);
                    }
                    Err(e) => {
                        error!("Delivery for {} was cancelled: {}", road_name, e);
                    }
                }

                emitted += 1;
                progress.send_replace(emitted);
            }
        }
    }
}
