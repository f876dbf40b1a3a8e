use std::process::{Command, Output};

fn run_headless(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_traffic_signal_sim"))
        .args(args)
        .env("RUST_LOG", "warn,traffic_signal_sim=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Find the value logged after `label` in the log output
fn logged_value<'a>(stderr: &'a str, label: &str) -> &'a str {
    let line = stderr
        .lines()
        .find(|line| line.contains(label))
        .unwrap_or_else(|| panic!("Could not find '{}' line. stderr: {}", label, stderr));
    line.split(label)
        .nth(1)
        .map(str::trim)
        .unwrap_or_else(|| panic!("Could not parse value from line: {}", line))
}

/// Test that the simulation runs in headless mode without crashing
#[test]
fn test_headless_simulation_runs() {
    let output = run_headless(&["--ticks", "30", "--seed", "7"]);

    assert!(
        output.status.success(),
        "Simulation failed to run in headless mode. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that simulation statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_headless(&["--ticks", "30", "--seed", "7"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for label in [
        "Total processed:",
        "Average wait time:",
        "Throughput:",
        "Efficiency:",
        "Cycle length:",
        "Road snapshots:",
        "Emergency events:",
        "Recommendations:",
    ] {
        assert!(stderr.contains(label), "Missing '{}' statistic", label);
    }
}

/// Thirty one-second ticks cross the 10 s snapshot boundary three times
#[test]
fn test_snapshots_every_ten_seconds() {
    let output = run_headless(&["--ticks", "30", "--delta", "1.0", "--seed", "3"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    let snapshots: usize = logged_value(&stderr, "Road snapshots:")
        .parse()
        .expect("Could not parse snapshot count");
    assert_eq!(snapshots, 12);
}

#[test]
fn test_emergency_override_is_recorded() {
    let output = run_headless(&[
        "--ticks",
        "20",
        "--emergency",
        "north",
        "--emergency-at",
        "5",
        "--emergency-for",
        "3",
    ]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Emergency override set"));
    assert!(stderr.contains("Emergency override cleared"));
    assert_eq!(logged_value(&stderr, "Emergency events:"), "1");
}

#[test]
fn test_video_feed_runs_and_stops() {
    let output = run_headless(&["--ticks", "10", "--video", "--pace-ms", "50", "--seed", "11"]);
    assert!(
        output.status.success(),
        "Simulation failed with video feed. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Started vehicle detection for Road A"));
    assert!(stderr.contains("Stopped all vehicle detections"));

    let cycle: f64 = logged_value(&stderr, "Cycle length:")
        .trim_end_matches('s')
        .parse()
        .expect("Could not parse cycle length");
    assert!((45.0..=90.0).contains(&cycle));
}

#[test]
fn test_json_frames_are_printed() {
    let output = run_headless(&["--ticks", "4", "--video", "--json", "--pace-ms", "200"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let frame: serde_json::Value = stdout
        .lines()
        .find(|line| line.starts_with('{'))
        .map(|line| serde_json::from_str(line).expect("invalid JSON frame"))
        .expect("No JSON frame printed");
    assert!(frame.get("roadName").is_some());
    assert!(frame.get("vehicleCount").is_some());
    assert!(frame.get("detectedVehicles").is_some());
}

#[test]
fn test_rejects_unknown_direction() {
    let output = run_headless(&["--ticks", "1", "--emergency", "up"]);
    assert!(!output.status.success());
}
