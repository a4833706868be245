//! Experiment sessions and the guard that keeps at most one of them running.

use crate::error::SessionError;
use crate::time::{AlignedClock, Clock, SharedClock};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Holds the name of the running session, if any.
///
/// Cloning yields another handle to the same slot. An application normally
/// creates a single slot and passes it to every session it runs.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    active: Arc<Mutex<Option<String>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for `name`. Fails if another session holds it.
    pub fn acquire(&self, name: &str) -> Result<SessionGuard, SessionError> {
        let mut active = self.active.lock();
        if let Some(active) = active.as_ref() {
            return Err(SessionError::SessionActive {
                active: active.clone(),
            });
        }
        *active = Some(name.to_string());
        Ok(SessionGuard {
            slot: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn active(&self) -> Option<String> {
        self.active.lock().clone()
    }

    pub fn is_occupied(&self) -> bool {
        self.active.lock().is_some()
    }
}

/// Proof of holding the session slot; releases it when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    slot: SessionSlot,
    name: String,
}

impl SessionGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = self.slot.active.lock();
        if active.as_deref() == Some(self.name.as_str()) {
            *active = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Started,
    Finished,
}

#[derive(Default)]
struct Progress {
    start_time: Option<u64>,
    end_time: Option<u64>,
    user_interrupted: bool,
    guard: Option<SessionGuard>,
}

/// One run of an experiment for one subject.
///
/// The session clock reads zero at creation; start and end times are session
/// milliseconds.
pub struct Session {
    subject: String,
    descriptor: String,
    clock: Arc<AlignedClock>,
    created_at: DateTime<Local>,
    data_folder: PathBuf,
    progress: Mutex<Progress>,
}

impl Session {
    pub fn new(
        subject: &str,
        descriptor: &str,
        clock: SharedClock,
        data_folder: impl Into<PathBuf>,
    ) -> Result<Self, SessionError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(SessionError::BlankField("subject"));
        }
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(SessionError::BlankField("descriptor"));
        }
        Ok(Self {
            subject: subject.to_string(),
            descriptor: descriptor.to_string(),
            clock: Arc::new(AlignedClock::starting_now(clock)),
            created_at: Local::now(),
            data_folder: data_folder.into(),
            progress: Mutex::new(Progress::default()),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Wall-clock creation time, in ms since the Unix epoch.
    pub fn create_timestamp(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    /// The session clock, zero at creation.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Milliseconds since the session was created.
    pub fn session_time(&self) -> u64 {
        self.clock.millis().max(0) as u64
    }

    pub fn state(&self) -> SessionState {
        let progress = self.progress.lock();
        match (progress.start_time, progress.end_time) {
            (None, _) => SessionState::Initialized,
            (Some(_), None) => SessionState::Started,
            (Some(_), Some(_)) => SessionState::Finished,
        }
    }

    pub fn start_time(&self) -> Option<u64> {
        self.progress.lock().start_time
    }

    pub fn end_time(&self) -> Option<u64> {
        self.progress.lock().end_time
    }

    pub fn user_interrupted(&self) -> bool {
        self.progress.lock().user_interrupted
    }

    /// `{create_timestamp}-{subject}-{descriptor}`, safe for use as a file name.
    pub fn full_name(&self) -> String {
        full_session_name(Some(self.create_timestamp()), &self.subject, &self.descriptor)
    }

    pub fn data_file_prefix(&self) -> PathBuf {
        self.data_folder.join(self.full_name())
    }

    /// Path of a data file for this session, e.g. `prefix#2.csv`.
    pub fn data_file_name(&self, extension: &str, num: Option<u8>) -> PathBuf {
        let mut name = self.full_name();
        if let Some(num) = num {
            name.push_str(&format!("#{}", num));
        }
        let extension = extension.trim().trim_start_matches('.');
        if !extension.is_empty() {
            name.push('.');
            name.push_str(extension);
        }
        self.data_folder.join(name)
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Claims `slot` and records the start time.
    pub fn start(&self, slot: &SessionSlot) -> Result<(), SessionError> {
        let mut progress = self.progress.lock();
        if progress.start_time.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        let guard = slot.acquire(&self.full_name())?;
        let start_time = self.session_time();
        progress.start_time = Some(start_time);
        progress.guard = Some(guard);
        info!(session = %self.full_name(), start_time, "Session started.");
        Ok(())
    }

    /// Records the end time and releases the session slot.
    pub fn finish(&self, user_interrupted: bool) -> Result<(), SessionError> {
        let mut progress = self.progress.lock();
        if progress.start_time.is_none() {
            return Err(SessionError::NotStarted);
        }
        if progress.end_time.is_some() {
            return Err(SessionError::AlreadyFinished);
        }
        let end_time = self.session_time();
        progress.end_time = Some(end_time);
        progress.user_interrupted = user_interrupted;
        progress.guard = None;
        info!(session = %self.full_name(), end_time, user_interrupted, "Session finished.");
        Ok(())
    }
}

/// Builds a session name and strips characters not allowed in file names.
pub fn full_session_name(timestamp: Option<i64>, subject: &str, descriptor: &str) -> String {
    let name = match timestamp {
        Some(timestamp) => format!("{}-{}-{}", timestamp, subject, descriptor),
        None => format!("{}-{}", subject, descriptor),
    };
    name.chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{ManualClock, TimeUnit};

    fn session(subject: &str) -> Session {
        let base = Arc::new(ManualClock::new(TimeUnit::Millisecond));
        Session::new(subject, "ssvep", base, "data").unwrap()
    }

    #[test]
    fn blank_fields_are_rejected() {
        let clock: SharedClock = Arc::new(ManualClock::new(TimeUnit::Millisecond));
        assert!(matches!(
            Session::new("  ", "x", clock.clone(), "data"),
            Err(SessionError::BlankField("subject"))
        ));
        assert!(matches!(
            Session::new("s", "", clock, "data"),
            Err(SessionError::BlankField("descriptor"))
        ));
    }

    #[test]
    fn only_one_session_runs_per_slot() {
        let slot = SessionSlot::new();
        let first = session("alice");
        let second = session("bob");

        first.start(&slot).unwrap();
        assert!(matches!(first.start(&slot), Err(SessionError::AlreadyStarted)));
        assert!(matches!(
            second.start(&slot),
            Err(SessionError::SessionActive { .. })
        ));
        assert_eq!(first.state(), SessionState::Started);

        first.finish(true).unwrap();
        assert!(first.user_interrupted());
        assert!(matches!(first.finish(false), Err(SessionError::AlreadyFinished)));
        assert!(!slot.is_occupied());

        second.start(&slot).unwrap();
        assert_eq!(slot.active(), Some(second.full_name()));
    }

    #[test]
    fn guard_releases_on_drop() {
        let slot = SessionSlot::new();
        {
            let _guard = slot.acquire("one").unwrap();
            assert!(slot.acquire("two").is_err());
        }
        assert!(slot.acquire("two").is_ok());
    }

    #[test]
    fn data_file_names_follow_prefix() {
        let s = session("alice");
        let prefix = s.full_name();
        assert!(prefix.ends_with("-alice-ssvep"));
        assert_eq!(
            s.data_file_name(".csv", Some(2)),
            Path::new("data").join(format!("{}#2.csv", prefix))
        );
        assert_eq!(s.data_file_name("", None), Path::new("data").join(&prefix));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(full_session_name(None, "a/b", "c:d"), "ab-cd");
    }
}
