//! Time sources: monotonic clocks, unit conversion and the freezable clock
//! that drives stage programs.

pub mod clock;
pub mod freezable;

pub use clock::{with_unit, AlignedClock, Clock, ManualClock, SharedClock, SystemClock, TimeUnit};
pub use freezable::FreezableClock;
