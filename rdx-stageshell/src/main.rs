use anyhow::Result;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use stageclock::prelude::*;
use stageclock::staging::{presets, StageList, StageRecorder};
use stageclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use std::borrow::Cow;
use std::env;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "stageclock.toml";

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct ShellHighlighter;

impl Highlighter for ShellHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    const LOGO_TEXT: &str = include_str!("../logo.log");
    println!("{}", LOGO_TEXT.cyan());

    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(79).dimmed());
    let license_blurb = "
    This software is provided 'as is', without warranty of any kind.
    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.
    ";
    println!("{}", version_string);
    println!("{}", license_blurb.dimmed());
    println!("{}", "-".repeat(79).dimmed());
}

/// Prints every program event above the prompt.
fn spawn_event_listeners(engine: &ExperimentEngine) {
    let mut program_rx = engine.subscribe_program_events();
    tokio::spawn(async move {
        while let Ok(event) = program_rx.recv().await {
            match event {
                ProgramEvent::StageChanged {
                    program_time,
                    stage: Some(stage),
                    action,
                } => println!(
                    "<-- [STAGE] {:>6} ms {} '{}' ({:?})",
                    program_time,
                    stage.identifier.as_deref().unwrap_or("-"),
                    stage.cue.as_deref().unwrap_or(""),
                    action
                ),
                other => println!("<-- [PROGRAM EVENT] {:?}", other),
            }
        }
    });
}

fn print_status(engine: &ExperimentEngine) {
    let program = engine.program();
    let session = engine.session();
    println!("Session   : {} ({:?})", session.full_name(), session.state());
    println!(
        "Program   : started={} paused={} time={} ms",
        program.is_started(),
        program.is_paused(),
        program.program_time()
    );
    match program.current_stage() {
        Some(stage) => println!(
            "Stage     : {} '{}' {} ms",
            stage.identifier.as_deref().unwrap_or("-"),
            stage.cue.as_deref().unwrap_or(""),
            stage.duration
        ),
        None => println!("Stage     : -"),
    }
    for stream in engine.streamers().streams() {
        println!(
            "Stream    : {} <{}> {:?}, {} consumer(s)",
            stream.stream_id(),
            stream.value_type(),
            stream.state(),
            stream.consumer_count()
        );
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  start                 - Starts the session and its stage program.");
    println!("  pause                 - Freezes the program clock.");
    println!("  resume                - Unfreezes the program clock.");
    println!("  skip                  - Ends the current stage early.");
    println!("  stop                  - Stops the program; the session finishes.");
    println!("  mark <CODE> [LABEL]   - Records a manual mark on the marker stream.");
    println!("  status                - Shows session, program and stream state.");
    println!("  stages                - Lists the stages presented so far.");
    println!("  exit                  - Interrupts a running program and quits.");
}

fn report(done: bool, what: &str) {
    if done {
        println!("--> Program {}.", what);
    } else {
        println!("--> Nothing to do: program not {}.", what);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = StageclockConfig::load(&config_path)?;

    let session = Arc::new(Session::new(
        &config.demo.subject,
        &config.demo.descriptor,
        SystemClock::shared(TimeUnit::Millisecond),
        "data",
    )?);
    let streamers = Arc::new(StreamerCollection::new());
    streamers.add_markable(Arc::new(MarkerStreamer::new(
        session.clock(),
        &config.streaming,
    )))?;
    let timeline: SharedProvider = if config.demo.stages.is_empty() {
        Arc::new(presets::paradigm(config.demo.trial_count, 5000))
    } else {
        StageList::shared(config.demo.stages.clone())
    };
    let engine = ExperimentEngine::new(session, SessionSlot::new(), &config, streamers, timeline)?;
    let handle = engine.handle();

    let recorder = StageRecorder::new();
    recorder.attach(engine.program())?;
    spawn_event_listeners(&engine);

    let mut run_task: Option<JoinHandle<()>> = None;

    let mut rl = Editor::new()?;
    rl.set_helper(Some(ShellHighlighter));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "start" => {
                            if run_task.is_some() {
                                println!("--> The session has already been started.");
                                continue;
                            }
                            info!("Starting {}...", ENGINE_NAME.cyan());
                            let engine = engine.clone();
                            run_task = Some(tokio::spawn(async move {
                                if let Err(e) = engine.run_async().await {
                                    eprintln!("\nExperiment stopped with an error: {:#}", e);
                                }
                            }));
                        }
                        "pause" => report(handle.pause(), "paused"),
                        "resume" => report(handle.resume(), "resumed"),
                        "skip" => report(handle.skip(), "skipping"),
                        "stop" => report(handle.stop(), "stopped"),
                        "mark" => {
                            let Some(code) = args.get(1).and_then(|c| c.parse::<i32>().ok()) else {
                                println!("Usage: mark <CODE> [LABEL]");
                                continue;
                            };
                            let label = (args.len() > 2).then(|| args[2..].join(" "));
                            match handle.mark(label.as_deref(), code) {
                                Ok(Some(timestamp)) => {
                                    println!("--> Marked {} at {} ms.", code, timestamp)
                                }
                                Ok(None) => println!("--> No marker stream is registered."),
                                Err(e) => println!("--> Error: {}", e),
                            }
                        }
                        "status" => print_status(&engine),
                        "stages" => {
                            let stages = recorder.stages();
                            println!("Presented stages ({}):", stages.len());
                            for (i, stage) in stages.iter().enumerate() {
                                println!(
                                    "  #{:<3} {:<24} {:>6} ms  marker={:?}",
                                    i,
                                    stage.identifier.as_deref().unwrap_or("-"),
                                    stage.duration,
                                    stage.marker
                                );
                            }
                        }
                        "help" => print_help(),
                        "exit" => break,
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => break,
        }
    }

    println!("Exiting stageshell...");
    handle.interrupt();
    if let Some(task) = run_task {
        task.await.ok();
    }
    recorder.detach().ok();
    Ok(())
}
