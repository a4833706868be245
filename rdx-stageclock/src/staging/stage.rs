use serde::Deserialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An opaque object attached to a stage by paradigm code.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// A timed unit of presentation.
///
/// The scheduler only looks at `duration`; every other field is carried through
/// to listeners untouched.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Stage {
    /// Diagnostic name.
    pub identifier: Option<String>,
    pub cue: Option<String>,
    pub subtitle: Option<String>,
    /// Milliseconds the stage stays active.
    pub duration: u64,
    /// Event code published when the stage begins.
    pub marker: Option<i32>,
    #[serde(skip)]
    pub tag: Option<Tag>,
}

impl Stage {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    /// A zero-duration stage carrying only a marker.
    pub fn marker(code: i32) -> Self {
        Self {
            marker: Some(code),
            ..Default::default()
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_cue(mut self, cue: impl Into<String>) -> Self {
        self.cue = Some(cue.into());
        self
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_marker(mut self, marker: i32) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_tag(mut self, tag: impl Any + Send + Sync) -> Self {
        self.tag = Some(Arc::new(tag));
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration)
    }

    /// Returns the tag if it has type `T`.
    pub fn tag_as<T: Any>(&self) -> Option<&T> {
        self.tag.as_deref().and_then(|tag| tag.downcast_ref::<T>())
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("identifier", &self.identifier)
            .field("cue", &self.cue)
            .field("subtitle", &self.subtitle)
            .field("duration", &self.duration)
            .field("marker", &self.marker)
            .field("tagged", &self.tag.is_some())
            .finish()
    }
}

/// Sum of the durations of `stages`.
pub fn total_duration<'a>(stages: impl IntoIterator<Item = &'a Stage>) -> Duration {
    Duration::from_millis(stages.into_iter().map(|stage| stage.duration).sum())
}
