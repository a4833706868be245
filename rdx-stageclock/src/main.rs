use anyhow::{Context, Result};
use stageclock::common::Timestamped;
use stageclock::config::DemoConfig;
use stageclock::io::{source_fn, CachedConsumer, DelegatedConsumer, HeartbeatSource, LogWriter};
use stageclock::prelude::*;
use stageclock::staging::presets;
use stageclock::staging::StageList;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "stageclock.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // 2. Load the configuration. A missing file means defaults.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = StageclockConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from '{}'", config_path))?;
    info!("{} v{} (config: {})", stageclock::ENGINE_NAME, stageclock::VERSION, config_path);

    // 3. Create the session and its streamers.
    let slot = SessionSlot::new();
    let session = Arc::new(Session::new(
        &config.demo.subject,
        &config.demo.descriptor,
        SystemClock::shared(TimeUnit::Millisecond),
        "data",
    )?);
    info!(
        session = %session.full_name(),
        created_at = %session.created_at().format("%Y-%m-%d %H:%M:%S"),
        "Session created."
    );
    let streamers = Arc::new(build_streamers(&config, session.clock())?);

    // 4. Create the engine over the demo timeline.
    let engine = ExperimentEngine::new(
        session.clone(),
        slot,
        &config,
        streamers,
        build_timeline(&config.demo),
    )?;

    // 5. Spawn tasks listening to the event streams, and the Ctrl+C handler.
    spawn_event_listeners(&engine);
    let handle = engine.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received. Stopping the program...");
            handle.interrupt();
        }
    });

    // 6. Run the experiment.
    engine.run_async().await?;
    info!(
        interrupted = session.user_interrupted(),
        duration_ms = session
            .end_time()
            .unwrap_or(0)
            .saturating_sub(session.start_time().unwrap_or(0)),
        "Demo finished."
    );
    Ok(())
}

/// The configured stage list, or the preset paradigm when none is configured.
fn build_timeline(demo: &DemoConfig) -> SharedProvider {
    if demo.stages.is_empty() {
        Arc::new(presets::paradigm(demo.trial_count, 5000))
    } else {
        StageList::shared(demo.stages.clone())
    }
}

/// A heartbeat marker streamer and a synthetic multi-channel sampler.
fn build_streamers(config: &StageclockConfig, clock: SharedClock) -> Result<StreamerCollection> {
    let collection = StreamerCollection::new();

    let heartbeat = HeartbeatSource::new(Duration::from_millis(config.demo.heartbeat_interval_ms));
    let marker_stream = Arc::new(MarkerStreamer::with_source(
        MarkerStreamer::DEFAULT_STREAM_ID,
        clock.clone(),
        heartbeat,
        &config.streaming,
    ));
    marker_stream.attach_consumer(Arc::new(LogWriter::new("marker")))?;
    collection.add_markable(marker_stream)?;

    let sampler = Arc::new(TimestampedStreamer::new(
        "sampler",
        clock,
        sine_source(config.demo.channel_count, config.demo.sample_interval_ms),
        &config.streaming,
    ));
    let counter = AtomicU64::new(0);
    sampler.attach_consumer(Arc::new(DelegatedConsumer::new(
        move |sample: &Timestamped<Vec<f64>>| {
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 1000 == 0 {
                info!(samples = n, timestamp = sample.timestamp, "[SAMPLER] progress");
            }
        },
    )))?;
    sampler.attach_consumer(Arc::new(CachedConsumer::<Timestamped<Vec<f64>>>::new()))?;
    collection.add(sampler)?;

    Ok(collection)
}

/// Sine waves at 10 Hz and up, one channel per harmonic.
fn sine_source(channel_count: usize, interval_ms: u64) -> impl Source<Vec<f64>> {
    let interval = Duration::from_millis(interval_ms.max(1));
    let mut tick: u64 = 0;
    source_fn(move |cancel: &CancellationToken| {
        if cancel.sleep(interval) {
            return Err(AcquireError::Interrupted);
        }
        tick += 1;
        let t = tick as f64 * interval.as_secs_f64();
        Ok((1..=channel_count)
            .map(|channel| (TAU * 10.0 * channel as f64 * t).sin())
            .collect::<Vec<f64>>())
    })
}

/// Spawns tasks, each subscribing to a different event stream.
fn spawn_event_listeners(engine: &ExperimentEngine) {
    let mut program_rx = engine.subscribe_program_events();
    tokio::spawn(async move {
        while let Ok(event) = program_rx.recv().await {
            match event {
                ProgramEvent::StageChanged {
                    program_time,
                    stage: Some(stage),
                    ..
                } => info!(
                    "[STAGE] {:>6} ms => {} {}",
                    program_time,
                    stage.identifier.as_deref().unwrap_or("-"),
                    stage.cue.as_deref().unwrap_or("")
                ),
                ProgramEvent::Faulted { message } => warn!("[PROGRAM] => faulted: {}", message),
                other => info!("[PROGRAM] => {:?}", other),
            }
        }
    });

    for stream in engine.streamers().find_all::<MarkerStreamer>() {
        let mut stream_rx = stream.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = stream_rx.recv().await {
                info!("[STREAM] => {:?}", event);
            }
        });
    }
}
