//! Contains common, primitive types shared by the staging and streaming halves.
//!
//! This module defines the identifier types, the invocation `Priority` used to
//! order filters and consumers, and the small value types (`Timestamped`,
//! `Mark`) that flow through streaming pipelines.

use serde::Deserialize;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies a listener registered on a `StageProgram`.
    ///
    /// The key is returned when a listener is added and can later be used to
    /// remove it. Keys are never reused, preventing stale ID bugs.
    pub struct ListenerId;
}

/// Invocation order of filters and consumers within a streamer.
///
/// Entries are invoked in ascending rank: `Monitor` first, `Lowest` last.
/// Entries sharing a priority keep their attach order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Monitor = -1,
    Highest = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Lowest = 4,
}

/// A capability advertised by a filter or consumer when it is attached.
///
/// Streamers index attached components by these tags so callers can discover
/// e.g. every recording consumer without knowing its concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Keeps a history of received values.
    Recording,
    /// Keeps the most recent value.
    Caching,
    /// Writes values to the log.
    Logging,
    /// Renders values for an operator.
    Display,
    /// Application-defined capability.
    Custom(&'static str),
}

/// A value paired with the time it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamped<T> {
    /// Clock time at which the value was acquired, in the clock's unit.
    pub timestamp: i64,
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(timestamp: i64, value: T) -> Self {
        Self { timestamp, value }
    }

    /// Maps the value while keeping the timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timestamped<U> {
        Timestamped {
            timestamp: self.timestamp,
            value: f(self.value),
        }
    }
}

/// A manual event: an integer code with an optional human-readable label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub label: Option<String>,
    pub code: i32,
}

impl Mark {
    pub fn new(code: i32) -> Self {
        Self { label: None, code }
    }

    pub fn labeled(label: impl Into<String>, code: i32) -> Self {
        Self {
            label: Some(label.into()),
            code,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}({})", label, self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_monitor_first() {
        let mut priorities = vec![
            Priority::Lowest,
            Priority::Normal,
            Priority::Monitor,
            Priority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                Priority::Monitor,
                Priority::High,
                Priority::Normal,
                Priority::Lowest
            ]
        );
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn mark_display_includes_label() {
        assert_eq!(Mark::labeled("trial", 41).to_string(), "trial(41)");
        assert_eq!(Mark::new(7).to_string(), "7");
    }
}
