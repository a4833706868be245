//! Ready-made providers for the stages most paradigms share: delays,
//! countdowns, baselines, marker-only stages and a complete trial paradigm.

use super::provider::{CompositeStageProvider, SharedProvider, StageList};
use super::repeating::{RepeatCount, RepeatingStageProvider};
use super::stage::Stage;
use std::sync::Arc;

/// The reserved event code table. Codes below `CUSTOM_BASE` belong to the
/// framework; paradigms allocate their own from `CUSTOM_BASE` upwards.
pub mod markers {
    pub const GLOBAL_BASE: i32 = 0;
    pub const PARADIGM_BASE: i32 = 10;
    pub const SESSION_BASE: i32 = 20;
    pub const BLOCK_BASE: i32 = 30;
    pub const TRIAL_BASE: i32 = 40;
    pub const CUSTOM_BASE: i32 = 100;

    pub const HEARTBEAT: i32 = GLOBAL_BASE;
    pub const BASELINE_START: i32 = GLOBAL_BASE + 1;
    pub const BASELINE_END: i32 = GLOBAL_BASE + 2;
    pub const PARADIGM_START: i32 = PARADIGM_BASE + 1;
    pub const PARADIGM_END: i32 = PARADIGM_BASE + 2;
    pub const SESSION_START: i32 = SESSION_BASE + 1;
    pub const SESSION_END: i32 = SESSION_BASE + 2;
    pub const USER_EXIT: i32 = SESSION_BASE + 9;
    pub const BLOCK_START: i32 = BLOCK_BASE + 1;
    pub const BLOCK_END: i32 = BLOCK_BASE + 2;
    pub const TRIAL_START: i32 = TRIAL_BASE + 1;
    pub const TRIAL_END: i32 = TRIAL_BASE + 2;

    /// Group and name of a reserved code, e.g. `("trial", "start")`.
    pub fn describe(code: i32) -> Option<(&'static str, &'static str)> {
        let described = match code {
            HEARTBEAT => ("global", "heartbeat"),
            BASELINE_START => ("baseline", "start"),
            BASELINE_END => ("baseline", "end"),
            PARADIGM_START => ("paradigm", "start"),
            PARADIGM_END => ("paradigm", "end"),
            SESSION_START => ("session", "start"),
            SESSION_END => ("session", "end"),
            USER_EXIT => ("session", "user-exit"),
            BLOCK_START => ("block", "start"),
            BLOCK_END => ("block", "end"),
            TRIAL_START => ("trial", "start"),
            TRIAL_END => ("trial", "end"),
            _ => return None,
        };
        Some(described)
    }

    pub fn is_reserved(code: i32) -> bool {
        (GLOBAL_BASE..CUSTOM_BASE).contains(&code)
    }
}

/// A marker stage description for `marked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSpec {
    pub code: i32,
    pub duration: u64,
    pub cue: Option<String>,
}

impl MarkerSpec {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            duration: 0,
            cue: None,
        }
    }

    pub fn timed(code: i32, duration: u64, cue: impl Into<String>) -> Self {
        Self {
            code,
            duration,
            cue: Some(cue.into()),
        }
    }

    pub fn to_stage(&self) -> Stage {
        Stage {
            cue: self.cue.clone(),
            duration: self.duration,
            marker: Some(self.code),
            ..Default::default()
        }
    }
}

impl From<i32> for MarkerSpec {
    fn from(code: i32) -> Self {
        Self::new(code)
    }
}

/// A single blank stage lasting `millis`.
pub fn delay(millis: u64) -> StageList {
    delay_with_cue("", millis)
}

pub fn delay_with_cue(cue: &str, millis: u64) -> StageList {
    StageList::new([Stage::new(millis)
        .with_identifier(format!("Delay{}", millis))
        .with_cue(cue)])
}

/// Counts down from `secs`, showing each number for `number_duration`
/// milliseconds followed by a blank for the rest of the second.
pub fn countdown(secs: u32, number_duration: u64) -> StageList {
    StageList::new(countdown_stages(secs, number_duration))
}

pub fn countdown_stages(secs: u32, number_duration: u64) -> Vec<Stage> {
    let number_duration = number_duration.min(1000);
    let blank_duration = 1000 - number_duration;
    let mut stages = Vec::with_capacity(secs as usize * 2);
    for remaining in (1..=secs).rev() {
        if number_duration > 0 {
            stages.push(
                Stage::new(number_duration)
                    .with_identifier(format!("Countdown{}", remaining))
                    .with_cue(remaining.to_string()),
            );
        }
        if blank_duration > 0 {
            stages.push(
                Stage::new(blank_duration)
                    .with_identifier(format!("CountdownBlank{}", remaining))
                    .with_cue(""),
            );
        }
    }
    stages
}

/// One stage per marker.
pub fn marked<M: Into<MarkerSpec>>(markers: impl IntoIterator<Item = M>) -> StageList {
    StageList::new(markers.into_iter().map(|m| m.into().to_stage()))
}

/// A baseline period bracketed by the baseline start and end markers.
pub fn baseline(cue: &str, millis: u64) -> StageList {
    marked([
        MarkerSpec::timed(markers::BASELINE_START, millis, cue),
        MarkerSpec::new(markers::BASELINE_END),
    ])
}

/// A cue shown for `delay_millis` followed by a countdown.
pub fn preparation(cue: &str, delay_millis: u64, countdown_secs: u32) -> CompositeStageProvider {
    let providers: [SharedProvider; 2] = [
        Arc::new(delay_with_cue(cue, delay_millis)),
        Arc::new(countdown(countdown_secs, 700)),
    ];
    CompositeStageProvider::new(providers)
}

/// One trial: a fixation cross, the task cue and a rest period, bracketed by
/// the trial markers.
pub fn trial_stages(index: u32, task_cue: &str) -> Vec<Stage> {
    vec![
        Stage::new(500)
            .with_identifier(format!("Trial{}Fixation", index))
            .with_cue("+")
            .with_marker(markers::TRIAL_START),
        Stage::new(1500)
            .with_identifier(format!("Trial{}Task", index))
            .with_cue(task_cue),
        Stage::new(1000)
            .with_identifier(format!("Trial{}Rest", index))
            .with_cue("")
            .with_marker(markers::TRIAL_END),
    ]
}

/// A complete paradigm: preparation, baseline and `trial_count` trials, all
/// inside the paradigm markers.
pub fn paradigm(trial_count: u32, baseline_millis: u64) -> CompositeStageProvider {
    let trials = RepeatingStageProvider::advanced(
        |index| trial_stages(index + 1, "Imagine"),
        RepeatCount::Times(trial_count),
    );
    let providers: [SharedProvider; 5] = [
        Arc::new(marked([markers::PARADIGM_START])),
        Arc::new(preparation("Get ready", 1000, 3)),
        Arc::new(baseline("Relax", baseline_millis)),
        Arc::new(trials),
        Arc::new(marked([markers::PARADIGM_END])),
    ];
    CompositeStageProvider::new(providers)
}
