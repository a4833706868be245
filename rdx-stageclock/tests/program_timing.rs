use parking_lot::Mutex;
use stageclock::prelude::*;
use stageclock::staging::{
    CompositeStageProvider, EventWaitingStageProvider, PipelinedStageProvider, StageChangedEvent,
    StageList,
};
use stageclock::sync::WaitHandle;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn clock() -> SharedClock {
    SystemClock::shared(TimeUnit::Millisecond)
}

fn stage(id: &str, duration: u64) -> Stage {
    Stage::new(duration).with_identifier(id)
}

/// Records the identifier of every stage change, `None` for the end.
fn record_changes(program: &StageProgram) -> Arc<Mutex<Vec<Option<String>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    program.on_stage_changed(move |event: &mut StageChangedEvent| {
        sink.lock()
            .push(event.stage().and_then(|s| s.identifier.clone()));
    });
    seen
}

/// Joins `program` on a helper thread, giving up after `timeout`.
fn joins_within(program: &StageProgram, timeout: Duration) -> bool {
    let (done, joined) = mpsc::channel();
    let program = program.clone();
    thread::spawn(move || {
        done.send(program.join().is_ok()).ok();
    });
    joined.recv_timeout(timeout).unwrap_or(false)
}

#[test]
fn fixed_list_yields_every_stage_then_one_end() {
    let program = StageProgram::from_stages(
        clock(),
        [stage("a", 10), stage("b", 0), stage("c", 20)],
    );
    let seen = record_changes(&program);

    assert!(program.start().unwrap());
    program.join().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            Some("a".to_string()),
            Some("b".to_string()),
            Some("c".to_string()),
            None
        ]
    );
    assert!(!program.is_started());
}

#[test]
fn terminate_truncates_the_timeline() {
    let program = StageProgram::from_stages(
        clock(),
        [stage("a", 0), stage("b", 0), stage("c", 0)],
    );
    let seen = record_changes(&program);
    program.on_stage_changed(|event: &mut StageChangedEvent| {
        if event.stage().and_then(|s| s.identifier.as_deref()) == Some("b") {
            event.set_action(StageAction::Terminate);
        }
    });

    program.start().unwrap();
    program.join().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![Some("a".to_string()), Some("b".to_string())]
    );
}

#[test]
fn skip_listener_action_moves_straight_to_the_next_stage() {
    let program = StageProgram::from_stages(
        clock(),
        [stage("skipped", 5000), stage("kept", 0)],
    );
    let seen = record_changes(&program);
    program.on_stage_changed(|event: &mut StageChangedEvent| {
        if event.stage().and_then(|s| s.identifier.as_deref()) == Some("skipped") {
            event.set_action(StageAction::Skip);
        }
    });

    let started = Instant::now();
    program.start().unwrap();
    program.join().unwrap();

    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn skip_ends_a_long_stage_early() {
    let program = StageProgram::from_stages(clock(), [stage("a", 2000), stage("b", 0)]);
    let reached_b = Arc::new(Mutex::new(None));
    let sink = reached_b.clone();
    program.on_stage_changed(move |event: &mut StageChangedEvent| {
        if event.stage().and_then(|s| s.identifier.as_deref()) == Some("b") {
            *sink.lock() = Some(event.program_time());
        }
    });

    let started = Instant::now();
    program.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(program.skip());
    program.join().unwrap();

    assert!(started.elapsed() < Duration::from_millis(1500));
    let at = reached_b.lock().expect("stage b was never presented");
    assert!(at < 1000, "b presented at {} ms", at);
}

#[test]
fn pause_excludes_frozen_time_from_program_time() {
    let program = StageProgram::from_stages(clock(), [stage("a", 300)]);
    program.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(program.pause());
    assert!(!program.pause());
    assert!(program.is_paused());
    let at_pause = program.program_time();
    thread::sleep(Duration::from_millis(200));
    assert!(program.resume());
    let at_resume = program.program_time();
    assert!(
        at_resume.saturating_sub(at_pause) < 50,
        "program time drifted from {} to {}",
        at_pause,
        at_resume
    );

    let resumed = Instant::now();
    program.join().unwrap();
    // The remaining ~250 ms of stage a still has to run after the resume.
    assert!(resumed.elapsed() >= Duration::from_millis(150));
}

#[test]
fn pause_action_freezes_until_resumed() {
    let program = StageProgram::from_stages(clock(), [stage("hold", 0), stage("after", 0)]);
    let seen = record_changes(&program);
    program.on_stage_changed(|event: &mut StageChangedEvent| {
        if event.stage().and_then(|s| s.identifier.as_deref()) == Some("hold") {
            event.set_action(StageAction::Pause);
        }
    });

    program.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !program.is_paused() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(program.is_paused());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.lock().len(), 1);

    assert!(program.resume());
    program.join().unwrap();
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn stop_interrupts_a_running_program() {
    let program = StageProgram::from_stages(clock(), [stage("long", 10_000)]);
    let mut events = program.subscribe_program_events();
    program.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert!(program.stop());
    assert!(!program.stop());
    program.join().unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!program.start().unwrap());

    let mut stopped = false;
    while let Ok(event) = events.try_recv() {
        stopped |= matches!(event, ProgramEvent::Stopped);
    }
    assert!(stopped);
}

#[test]
fn pipelined_program_runs_stages_fed_from_another_thread() {
    let pipeline = Arc::new(PipelinedStageProvider::new(16, Duration::from_millis(10)));
    let program = StageProgram::new(clock(), pipeline.clone()).unwrap();
    let seen = record_changes(&program);
    program.start().unwrap();

    let feeder = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for i in 0..3 {
                pipeline
                    .offer([stage(&format!("fed{}", i), 5)])
                    .unwrap();
                thread::sleep(Duration::from_millis(20));
            }
            pipeline.break_off().unwrap();
        })
    };
    feeder.join().unwrap();
    program.join().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            Some("fed0".to_string()),
            Some("fed1".to_string()),
            Some("fed2".to_string()),
            None
        ]
    );
}

#[test]
fn stop_releases_a_worker_waiting_on_an_unfed_pipeline() {
    let pipeline = Arc::new(PipelinedStageProvider::new(4, Duration::from_millis(10)));
    let program = StageProgram::new(clock(), pipeline.clone()).unwrap();
    let seen = record_changes(&program);
    program.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(program.stop());
    assert!(joins_within(&program, Duration::from_secs(3)));
    assert!(seen.lock().is_empty());
    assert!(pipeline.is_broken());
}

#[test]
fn stop_reaches_a_plain_wait_nested_in_a_composite() {
    let provider = CompositeStageProvider::shared([
        StageList::shared([stage("before", 0)]),
        Arc::new(EventWaitingStageProvider::new(WaitHandle::manual())) as SharedProvider,
        StageList::shared([stage("after", 0)]),
    ]);
    let program = StageProgram::new(clock(), provider).unwrap();
    let seen = record_changes(&program);
    program.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(program.stop());
    assert!(joins_within(&program, Duration::from_secs(3)));
    assert_eq!(*seen.lock(), vec![Some("before".to_string())]);
}
