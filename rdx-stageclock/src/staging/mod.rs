//! Stages, stage providers and the `StageProgram` scheduler.

pub mod pipelined;
pub mod presets;
pub mod program;
pub mod provider;
pub mod recorder;
pub mod repeating;
pub mod segmented;
pub mod stage;
pub mod waiting;

pub use pipelined::PipelinedStageProvider;
pub use presets::markers;
pub use program::{StageAction, StageChangedEvent, StageListener, StageProgram};
pub use provider::{
    drain_stages, try_preload, CompositeStageProvider, DelegatedStageProvider,
    EmptyStageProvider, SharedProvider, StageList, StageProvider,
};
pub use recorder::StageRecorder;
pub use repeating::{RepeatCount, RepeatingStageProvider};
pub use segmented::{SegmentSource, SegmentedStageProvider};
pub use stage::{total_duration, Stage, Tag};
pub use waiting::EventWaitingStageProvider;
