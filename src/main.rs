mod cli_sink;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use traffic_signal_sim::simulation::{
    DetectionConfig, DetectionFeed, Direction, EmergencyOverride, EmergencyVehicle, EngineConfig,
    InMemoryStore, SimulationEngine, ROAD_NAMES,
};

use cli_sink::ReportingSink;

#[derive(Parser)]
#[command(name = "traffic_signal_sim")]
#[command(about = "Adaptive intersection signal simulation (headless)")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "120")]
    ticks: u32,

    /// Simulated seconds per tick
    #[arg(long, default_value = "1.0")]
    delta: f64,

    /// Playback speed recorded on the run
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// User the run belongs to
    #[arg(long, default_value = "headless")]
    user: String,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Run the detection feed on every road and feed it back into the engine
    #[arg(long)]
    video: bool,

    /// Preempt this approach for an emergency vehicle
    #[arg(long)]
    emergency: Option<Direction>,

    /// Emergency vehicle type
    #[arg(long, default_value = "ambulance")]
    emergency_vehicle: EmergencyVehicle,

    /// Tick at which the emergency override is installed
    #[arg(long, default_value = "30")]
    emergency_at: u32,

    /// Number of ticks the emergency override stays installed
    #[arg(long, default_value = "10")]
    emergency_for: u32,

    /// Wall-clock milliseconds to wait between ticks
    #[arg(long, default_value = "0")]
    pace_ms: u64,

    /// Worker threads for the detection feed
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Print every analytics frame as a JSON line
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers.max(1))
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_headless(cli))
}

/// Run one session to completion without any front end
async fn run_headless(cli: Cli) -> Result<()> {
    let mut engine_config = EngineConfig::default();
    let mut detection_config = DetectionConfig::default().with_workers(cli.workers);
    if let Some(seed) = cli.seed {
        engine_config = engine_config.with_seed(seed);
        detection_config = detection_config.with_seed(seed.wrapping_add(1));
    }
    engine_config.validate()?;
    detection_config.validate()?;

    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(SimulationEngine::with_config(engine_config, store.clone()));
    let feed = DetectionFeed::new(detection_config);

    info!("Running traffic signal simulation in headless mode...");
    info!("Ticks: {}, Delta: {}s", cli.ticks, cli.delta);

    let run = engine.create_session(&cli.user, cli.speed);
    let id = run.id;

    println!("Initial state:");
    engine.print_summary(id);
    engine.draw_intersection(id);

    if cli.video {
        for road_name in ROAD_NAMES {
            let sink = ReportingSink::new(Arc::clone(&engine), id, cli.json);
            feed.start_detection(road_name, sink).await;
        }
    }

    // Print a summary once per simulated minute
    let ticks_per_report = (60.0 / cli.delta).ceil().max(1.0) as u32;
    let emergency_end = cli.emergency_at.saturating_add(cli.emergency_for);

    for tick in 1..=cli.ticks {
        if let Some(direction) = cli.emergency {
            if tick == cli.emergency_at {
                engine.set_emergency_override(
                    id,
                    EmergencyOverride::new(direction, cli.emergency_vehicle),
                );
            } else if tick == emergency_end {
                engine.clear_emergency_override(id);
            }
        }

        engine.tick(id, cli.delta);

        if tick % ticks_per_report == 0 {
            println!(
                "--- After tick {} ({:.1}s simulated time) ---",
                tick,
                f64::from(tick) * cli.delta
            );
            engine.print_summary(id);
            engine.draw_intersection(id);
        }

        if cli.pace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.pace_ms)).await;
        }
    }

    feed.shutdown().await;

    println!("=== Final State ===");
    engine.print_summary(id);
    engine.draw_intersection(id);

    let stats = engine.get_stats(id);
    let roads = engine.get_roads(id);
    let cycle_length = engine.cycle_length(id).unwrap_or(engine.config().initial_cycle_length);
    engine.stop(id);

    info!("=== SIMULATION COMPLETE ===");
    info!("Simulated time: {:.1}s", f64::from(cli.ticks) * cli.delta);
    info!("Total processed: {}", stats.total_processed);
    info!("Average wait time: {:.2}s", stats.avg_wait_time);
    info!("Throughput: {}/min", stats.throughput);
    info!("Efficiency: {:.2}%", stats.efficiency);
    info!("Cycle length: {:.0}s", cycle_length);
    for road in &roads {
        info!(
            "{} ({}): vehicles={}, queue={}, wait={:.0}s, performance={:.1}%",
            road.name, road.direction, road.vehicles, road.queue, road.wait_time, road.performance
        );
    }
    info!("Road snapshots: {}", store.snapshots(id).len());
    info!("Emergency events: {}", store.events(id).len());
    info!("Recommendations: {}", store.recommendations(id).len());

    Ok(())
}
