use stageclock::common::Timestamped;
use stageclock::config::StreamingConfig;
use stageclock::io::RecordingConsumer;
use stageclock::prelude::*;
use stageclock::staging::{PipelinedStageProvider, StageList};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Fixture {
    engine: ExperimentEngine,
    slot: SessionSlot,
    markers: Arc<MarkerStreamer>,
    recorded: Arc<RecordingConsumer<Timestamped<Mark>>>,
}

fn fixture(stages: Vec<Stage>) -> Fixture {
    fixture_over(StageList::shared(stages))
}

fn fixture_over(provider: SharedProvider) -> Fixture {
    let mut config = StageclockConfig::default();
    config.streaming = StreamingConfig {
        poll_interval_ms: 10,
        ..Default::default()
    };
    let session = Arc::new(
        Session::new(
            "tester",
            "engine",
            SystemClock::shared(TimeUnit::Millisecond),
            "data",
        )
        .unwrap(),
    );
    let markers = Arc::new(MarkerStreamer::new(session.clock(), &config.streaming));
    let recorded = Arc::new(RecordingConsumer::<Timestamped<Mark>>::unbounded());
    markers.attach_consumer(recorded.clone()).unwrap();
    let streamers = Arc::new(StreamerCollection::new());
    streamers.add_markable(markers.clone()).unwrap();

    let slot = SessionSlot::new();
    let engine = ExperimentEngine::new(
        session,
        slot.clone(),
        &config,
        streamers,
        provider,
    )
    .unwrap();
    Fixture {
        engine,
        slot,
        markers,
        recorded,
    }
}

fn codes(fixture: &Fixture) -> Vec<i32> {
    fixture.markers.join();
    fixture
        .recorded
        .values()
        .into_iter()
        .map(|m| m.value.code)
        .collect()
}

#[test]
fn run_forwards_stage_markers_between_session_marks() {
    let fixture = fixture(vec![
        Stage::new(10).with_marker(markers::TRIAL_START),
        Stage::new(10),
        Stage::new(0).with_marker(markers::TRIAL_END),
    ]);

    fixture.engine.run().unwrap();

    assert_eq!(
        codes(&fixture),
        vec![
            markers::SESSION_START,
            markers::TRIAL_START,
            markers::TRIAL_END,
            markers::SESSION_END
        ]
    );
    let session = fixture.engine.session();
    assert_eq!(session.state(), SessionState::Finished);
    assert!(!session.user_interrupted());
    assert!(!fixture.slot.is_occupied());
    assert_eq!(fixture.engine.streamers().state(), CollectionState::Stopped);
}

#[test]
fn interrupt_stops_the_program_and_marks_user_exit() {
    let fixture = fixture(vec![Stage::new(10_000).with_marker(markers::BLOCK_START)]);
    let handle = fixture.engine.handle();
    assert!(!handle.interrupt());

    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.interrupt()
    });
    fixture.engine.run().unwrap();
    assert!(interrupter.join().unwrap());

    let session = fixture.engine.session();
    assert!(session.user_interrupted());
    assert!(session.end_time().unwrap() < 5_000);
    assert_eq!(
        codes(&fixture),
        vec![
            markers::SESSION_START,
            markers::BLOCK_START,
            markers::USER_EXIT,
            markers::SESSION_END
        ]
    );
}

#[test]
fn interrupt_ends_a_session_waiting_for_paced_stages() {
    let pipeline = Arc::new(PipelinedStageProvider::new(8, Duration::from_millis(10)));
    let fixture = fixture_over(pipeline.clone());
    let handle = fixture.engine.handle();

    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.interrupt()
    });
    fixture.engine.run().unwrap();
    assert!(interrupter.join().unwrap());

    assert!(pipeline.is_broken());
    assert!(fixture.engine.session().user_interrupted());
    assert_eq!(
        codes(&fixture),
        vec![markers::SESSION_START, markers::USER_EXIT, markers::SESSION_END]
    );
}

#[test]
fn a_busy_slot_refuses_a_second_session() {
    let fixture = fixture(vec![Stage::new(0)]);
    let _other = fixture.slot.acquire("someone-else").unwrap();

    assert!(fixture.engine.run().is_err());
    assert_eq!(fixture.engine.session().state(), SessionState::Initialized);
}

#[tokio::test]
async fn run_async_completes_on_the_blocking_pool() {
    let fixture = fixture(vec![Stage::new(20), Stage::new(20)]);
    let mut events = fixture.engine.subscribe_program_events();

    fixture.engine.run_async().await.unwrap();

    let mut stages = 0;
    while let Ok(event) = events.try_recv() {
        if let ProgramEvent::StageChanged { stage: Some(_), .. } = event {
            stages += 1;
        }
    }
    assert_eq!(stages, 2);
}
