//! Detection feed: frame generation, scheduling, cancellation and feedback

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use traffic_signal_sim::simulation::{
    detect_vehicles, AnalyticsSink, ChannelSink, DensityLevel, DetectionConfig, DetectionFeed,
    EngineConfig, EngineFeedbackSink, InMemoryStore, SimulationEngine, VehicleClass,
    VideoAnalytics, QUEUE_SPEED_THRESHOLD,
};

fn seeded_feed(seed: u64) -> DetectionFeed {
    DetectionFeed::new(DetectionConfig::default().with_seed(seed))
}

#[test]
fn test_detected_frames_are_consistent() {
    let config = DetectionConfig::default();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..200 {
        let frame = detect_vehicles("Road A", &mut rng, &config);

        assert_eq!(frame.road_name, "Road A");
        assert!(frame.vehicle_count <= 15);
        assert_eq!(frame.detected_vehicles.len(), frame.vehicle_count as usize);
        assert_eq!(frame.flow_rate, f64::from(frame.vehicle_count) * 120.0);

        let slow = frame
            .detected_vehicles
            .iter()
            .filter(|v| v.speed < QUEUE_SPEED_THRESHOLD)
            .count();
        assert_eq!(frame.queue_length as usize, slow);

        if frame.detected_vehicles.is_empty() {
            assert_eq!(frame.average_speed, 0.0);
        } else {
            let mean = frame.detected_vehicles.iter().map(|v| v.speed).sum::<f64>()
                / frame.detected_vehicles.len() as f64;
            assert!((frame.average_speed - mean).abs() <= 0.005 + 1e-9);
        }

        for (i, vehicle) in frame.detected_vehicles.iter().enumerate() {
            assert_eq!(
                vehicle.id,
                format!("Road A-vehicle-{}-{}", frame.timestamp, i)
            );
            assert!((0.5..=0.99).contains(&vehicle.confidence));
            assert!((0.0..80.0).contains(&vehicle.speed));
            assert!((0.0..=0.8).contains(&vehicle.bbox.x));
            assert!((0.0..=0.8).contains(&vehicle.bbox.y));
            assert!((0.05..=0.2).contains(&vehicle.bbox.width));
            assert!((0.05..=0.2).contains(&vehicle.bbox.height));
        }
    }
}

#[test]
fn test_vehicle_class_mix() {
    let config = DetectionConfig::default();
    let mut rng = StdRng::seed_from_u64(7);

    let vehicles: Vec<VehicleClass> = (0..500)
        .flat_map(|_| detect_vehicles("Road B", &mut rng, &config).detected_vehicles)
        .map(|v| v.vehicle_type)
        .collect();
    let share = |class: VehicleClass| {
        vehicles.iter().filter(|v| **v == class).count() as f64 / vehicles.len() as f64
    };

    assert!(vehicles.len() > 1000);
    assert!((share(VehicleClass::Car) - 0.5).abs() < 0.05);
    assert!((share(VehicleClass::Truck) - 0.2).abs() < 0.04);
    assert!((share(VehicleClass::Bicycle) - 0.1).abs() < 0.03);
}

#[test]
fn test_seeded_frames_repeat() {
    let config = DetectionConfig::default();
    let mut first = StdRng::seed_from_u64(3);
    let mut second = StdRng::seed_from_u64(3);

    for _ in 0..20 {
        let a = detect_vehicles("Road C", &mut first, &config);
        let b = detect_vehicles("Road C", &mut second, &config);
        assert_eq!(a.vehicle_count, b.vehicle_count);
        assert_eq!(a.queue_length, b.queue_length);
        assert_eq!(a.average_speed, b.average_speed);
    }
}

#[test]
fn test_frame_serializes_with_camel_case_fields() {
    let mut rng = StdRng::seed_from_u64(5);
    let frame = detect_vehicles("Road D", &mut rng, &DetectionConfig::default());
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["roadName"], "Road D");
    assert!(json.get("vehicleCount").is_some());
    assert!(json.get("queueLength").is_some());
    assert!(json.get("flowRate").is_some());
    if let Some(vehicle) = json["detectedVehicles"].as_array().and_then(|v| v.first()) {
        assert!(vehicle.get("type").is_some());
        assert!(vehicle.get("bbox").is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_frame_is_immediate() {
    let feed = seeded_feed(1);
    let (sink, mut rx) = ChannelSink::channel();
    let start = Instant::now();

    let handle = feed.start_detection("Road A", sink).await.unwrap();
    let frame = rx.recv().await.unwrap();

    assert_eq!(frame.road_name, "Road A");
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(handle.road_name(), "Road A");

    feed.stop_detection("Road A").await;
}

#[tokio::test(start_paused = true)]
async fn test_frames_follow_the_period() {
    let feed = seeded_feed(2);
    let (sink, _rx) = ChannelSink::channel();
    let start = Instant::now();

    let mut handle = feed.start_detection("Road A", sink).await.unwrap();
    assert!(handle.wait_for(5).await);

    // Frames at 0, 0.5, 1.0, 1.5 and 2.0 seconds
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2500), "elapsed {:?}", elapsed);

    handle.stop(&feed).await;
}

#[tokio::test(start_paused = true)]
async fn test_no_frames_after_stop() {
    let feed = seeded_feed(3);
    let (sink, mut rx) = ChannelSink::channel();

    let mut handle = feed.start_detection("Road B", sink).await.unwrap();
    assert!(handle.wait_for(3).await);
    feed.stop_detection("Road B").await;
    assert!(!feed.is_running("Road B").await);

    let produced = handle.emissions();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.emissions(), produced);

    // The sink went away with the task, so the channel drains and closes
    let mut received = 0u64;
    while rx.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, produced);
}

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_running_task() {
    let feed = seeded_feed(4);
    let (first_sink, _first_rx) = ChannelSink::channel();
    let (second_sink, mut second_rx) = ChannelSink::channel();

    let mut first = feed.start_detection("Road C", first_sink).await.unwrap();
    let mut second = feed.start_detection("Road C", second_sink).await.unwrap();

    assert_eq!(feed.active_roads().await, vec!["Road C".to_string()]);
    assert!(!first.wait_for(u64::MAX).await);
    assert!(second.wait_for(2).await);
    assert!(second_rx.recv().await.is_some());

    feed.stop_all_detections().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_keeps_feed_running() {
    let feed = seeded_feed(5);
    let failing = |_: &str, _: &VideoAnalytics| -> anyhow::Result<()> { Err(anyhow!("sink offline")) };

    let mut handle = feed.start_detection("Road A", failing).await.unwrap();
    assert!(handle.wait_for(4).await);
    assert!(feed.is_running("Road A").await);

    feed.stop_detection("Road A").await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_sink_keeps_feed_running() {
    let feed = seeded_feed(6);
    let panicking = |_: &str, _: &VideoAnalytics| -> anyhow::Result<()> { panic!("sink exploded") };

    let mut handle = feed.start_detection("Road D", panicking).await.unwrap();
    assert!(handle.wait_for(3).await);
    assert!(feed.is_running("Road D").await);

    feed.stop_detection("Road D").await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_receiver_is_not_fatal() {
    let feed = seeded_feed(7);
    let (sink, rx) = ChannelSink::channel();
    drop(rx);

    let mut handle = feed.start_detection("Road B", sink).await.unwrap();
    assert!(handle.wait_for(3).await);

    feed.stop_detection("Road B").await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_detections() {
    let feed = DetectionFeed::new(DetectionConfig::default().with_seed(8).with_workers(1));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut handles = Vec::new();
    for road in ["Road A", "Road B", "Road C", "Road D"] {
        let sink = ChannelSink::new(tx.clone());
        handles.push(feed.start_detection(road, sink).await.unwrap());
    }
    drop(tx);
    assert_eq!(feed.active_roads().await.len(), 4);

    // A single permit still lets every road make progress
    for handle in handles.iter_mut() {
        assert!(handle.wait_for(2).await);
    }

    feed.stop_all_detections().await;
    assert!(feed.active_roads().await.is_empty());
    for handle in handles.iter_mut() {
        assert!(!handle.wait_for(u64::MAX).await);
    }

    let mut per_road = std::collections::HashMap::new();
    while let Some(frame) = rx.recv().await {
        *per_road.entry(frame.road_name).or_insert(0u64) += 1;
    }
    for handle in &handles {
        assert_eq!(per_road.get(handle.road_name()), Some(&handle.emissions()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_refuses_new_detections() {
    let feed = seeded_feed(9);
    let (sink, _rx) = ChannelSink::channel();
    feed.start_detection("Road A", sink).await.unwrap();

    feed.shutdown().await;
    assert!(feed.active_roads().await.is_empty());

    let (sink, _rx) = ChannelSink::channel();
    assert!(feed.start_detection("Road A", sink).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_racing_starts_leaves_nothing_running() {
    for round in 0..20u64 {
        let feed = Arc::new(seeded_feed(round));

        let starts: Vec<_> = (0..8)
            .map(|i| {
                let feed = Arc::clone(&feed);
                tokio::spawn(async move {
                    let (sink, _rx) = ChannelSink::channel();
                    feed.start_detection(&format!("Road {}", i), sink).await
                })
            })
            .collect();
        feed.shutdown().await;

        for start in starts {
            if let Some(mut handle) = start.await.unwrap() {
                let ended = tokio::time::timeout(Duration::from_secs(2), handle.wait_for(u64::MAX))
                    .await
                    .expect("detection task outlived shutdown");
                assert!(!ended);
            }
        }
        assert!(feed.active_roads().await.is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_slow_sink_does_not_stall_other_roads() {
    let feed = seeded_feed(13);
    let slow = |_: &str, _: &VideoAnalytics| -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(1500));
        Ok(())
    };
    let (sink, _rx) = ChannelSink::channel();

    feed.start_detection("Road A", slow).await.unwrap();
    let mut fast = feed.start_detection("Road B", sink).await.unwrap();

    // Frames at 0, 0.5 and 1.0 s while Road A's first delivery is still running
    let reached = tokio::time::timeout(Duration::from_millis(1400), fast.wait_for(3)).await;
    assert_eq!(reached, Ok(true));

    feed.stop_all_detections().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopping_idle_road_is_noop() {
    let feed = seeded_feed(10);
    feed.stop_detection("Road Z").await;
    assert!(!feed.is_running("Road Z").await);
    assert!(feed.active_roads().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_frames_feed_back_into_engine() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(SimulationEngine::with_config(
        EngineConfig::default().with_seed(11),
        store,
    ));
    let id = engine.create_session("u1", 1.0).id;

    let feedback = EngineFeedbackSink::new(Arc::clone(&engine), id);
    let frames: Arc<Mutex<Vec<VideoAnalytics>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&frames);
    let sink = move |road: &str, analytics: &VideoAnalytics| -> anyhow::Result<()> {
        feedback.deliver(road, analytics)?;
        recorded.lock().unwrap().push(analytics.clone());
        Ok(())
    };

    let feed = seeded_feed(12);
    let mut handle = feed.start_detection("Road A", sink).await.unwrap();
    assert!(handle.wait_for(6).await);
    feed.stop_detection("Road A").await;

    let frames = frames.lock().unwrap();
    let last = frames.last().unwrap();
    let road = engine.get_roads(id)[0].clone();
    assert_eq!(road.vehicles, last.vehicle_count);
    assert_eq!(road.queue, last.queue_length);

    let cycle_length = engine.cycle_length(id).unwrap();
    let drift = frames.len() as f64;
    assert!((60.0 - drift..=60.0 + drift).contains(&cycle_length));
}

#[test]
fn test_density_levels() {
    let feed = DetectionFeed::default();
    let frame = |vehicle_count: u32, queue_length: u32, average_speed: f64| VideoAnalytics {
        road_name: "Road A".to_string(),
        vehicle_count,
        queue_length,
        average_speed,
        flow_rate: 0.0,
        detected_vehicles: Vec::new(),
        timestamp: 0,
    };

    let low = feed.analyze_traffic_density(&frame(4, 0, 40.0));
    assert_eq!(low.density, DensityLevel::Low);
    assert_eq!(low.recommended_green_time, 15);
    assert_eq!(low.urgency, 20);

    // 10 + 0 + 1 = 11
    let medium = feed.analyze_traffic_density(&frame(5, 0, 40.0));
    assert_eq!(medium.density, DensityLevel::Medium);
    assert_eq!(medium.recommended_green_time, 25);

    // 24 + 0 + 0 = 24
    assert_eq!(
        feed.analyze_traffic_density(&frame(12, 0, 50.0)).density,
        DensityLevel::Medium
    );

    // 22 + 3 + 0 = 25
    let high = feed.analyze_traffic_density(&frame(11, 1, 50.0));
    assert_eq!(high.density, DensityLevel::High);
    assert_eq!(high.urgency, 75);

    // 36 + 3 + 0 = 39
    assert_eq!(
        feed.analyze_traffic_density(&frame(18, 1, 50.0)).density,
        DensityLevel::High
    );

    // 40 + 0 + 0 = 40
    let critical = feed.analyze_traffic_density(&frame(20, 0, 50.0));
    assert_eq!(critical.density, DensityLevel::Critical);
    assert_eq!(critical.recommended_green_time, 45);
    assert_eq!(critical.urgency, 95);
}
