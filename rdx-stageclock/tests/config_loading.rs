use stageclock::config::{BackpressurePolicy, StageclockConfig};
use std::fs;
use std::path::PathBuf;

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("stageclock-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("stageclock.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn load_reads_a_toml_file() {
    let path = temp_config(
        "load",
        r#"
        [streaming]
        poll_interval_ms = 25
        backpressure = "drop_newest"

        [demo]
        subject = "S01"
        trial_count = 12
        "#,
    );

    let config = StageclockConfig::load(&path).unwrap();
    assert_eq!(config.streaming.poll_interval_ms, 25);
    assert_eq!(config.streaming.backpressure, BackpressurePolicy::DropNewest);
    assert_eq!(config.demo.subject, "S01");
    assert_eq!(config.demo.trial_count, 12);
    // Untouched sections keep their defaults.
    assert_eq!(config.pipeline.buffer_capacity, 1024);
    assert_eq!(config.demo.descriptor, "stagedev");

    fs::remove_file(&path).ok();
}

#[test]
fn a_missing_file_means_defaults() {
    let path = std::env::temp_dir().join("stageclock-does-not-exist.toml");
    let config = StageclockConfig::load(&path).unwrap();
    assert_eq!(config.program.sleep_wait_period_ms, 1);
    assert_eq!(config.streaming.queue_capacity, 4096);
}

#[test]
fn malformed_values_are_rejected() {
    let path = temp_config(
        "malformed",
        r#"
        [streaming]
        backpressure = "sometimes"
        "#,
    );
    assert!(StageclockConfig::load(&path).is_err());
    fs::remove_file(&path).ok();
}
