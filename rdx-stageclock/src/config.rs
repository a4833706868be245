//! Defines all configuration structures for Stageclock.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde` and the `config` crate. This allows the
//! scheduler's timing, the streaming queues, and the demo timeline to be tuned
//! externally from the application code.

use crate::staging::Stage;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables overriding file settings,
/// e.g. `STAGECLOCK_STREAMING__QUEUE_CAPACITY=128`.
pub const ENV_PREFIX: &str = "STAGECLOCK";

/// The top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageclockConfig {
    /// Timing of `StageProgram` workers.
    pub program: ProgramConfig,

    /// Queue and polling behaviour of asynchronous streamers.
    pub streaming: StreamingConfig,

    /// Buffering of externally fed stage pipelines.
    pub pipeline: PipelineConfig,

    /// Timeline and devices used by the `stagedev` demo binary.
    pub demo: DemoConfig,
}

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Coarse sleep slice used while the next stage is far away.
    /// Zero disables sleeping, leaving pure busy waiting.
    pub sleep_wait_period_ms: u64,

    /// Flatten preloadable providers into fixed stage lists before starting.
    pub prefer_preloaded: bool,
}

/// What an asynchronous streamer does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Park the producer until the consumer catches up.
    #[default]
    Block,
    /// Evict the oldest queued value to make room.
    DropOldest,
    /// Discard the value being enqueued.
    DropNewest,
}

/// Streaming pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// How long the consumer thread waits for a value before re-checking state.
    /// Bounds shutdown latency.
    pub poll_interval_ms: u64,

    /// Capacity of the producer/consumer queue.
    pub queue_capacity: usize,

    pub backpressure: BackpressurePolicy,
}

/// Settings of `PipelinedStageProvider`s built from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer_capacity: usize,
    pub poll_interval_ms: u64,
}

/// Settings for the demo binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub subject: String,
    pub descriptor: String,
    /// Explicit timeline. When empty the demo builds a preset paradigm.
    pub stages: Vec<Stage>,
    pub trial_count: u32,
    pub heartbeat_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub channel_count: usize,
}

impl StageclockConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `STAGECLOCK_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

impl ProgramConfig {
    pub fn sleep_wait_period(&self) -> Duration {
        Duration::from_millis(self.sleep_wait_period_ms)
    }
}

impl StreamingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// --- Default values ---

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            sleep_wait_period_ms: 1,
            prefer_preloaded: true,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            queue_capacity: 4096,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            poll_interval_ms: 500,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            subject: "demo".to_string(),
            descriptor: "stagedev".to_string(),
            stages: Vec::new(),
            trial_count: 5,
            heartbeat_interval_ms: 1000,
            sample_interval_ms: 4,
            channel_count: 4,
        }
    }
}
