//! Monotonic clocks and time unit conversion.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The unit a `Clock` reports its time in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl TimeUnit {
    fn nanos(self) -> i128 {
        match self {
            TimeUnit::Nanosecond => 1,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Second => 1_000_000_000,
        }
    }

    /// Converts `value` expressed in `self` into `target`, truncating toward zero.
    pub fn convert_to(self, value: i64, target: TimeUnit) -> i64 {
        if self == target {
            return value;
        }
        (value as i128 * self.nanos() / target.nanos()) as i64
    }

    pub fn to_duration(self, value: i64) -> Duration {
        Duration::from_nanos(self.convert_to(value.max(0), TimeUnit::Nanosecond) as u64)
    }

    pub fn from_duration(self, duration: Duration) -> i64 {
        (duration.as_nanos() as i128 / self.nanos()) as i64
    }
}

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Current time, in `unit()`.
    fn time(&self) -> i64;

    fn unit(&self) -> TimeUnit;

    fn millis(&self) -> i64 {
        self.unit().convert_to(self.time(), TimeUnit::Millisecond)
    }
}

/// Shared handle to any clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wraps `clock` so it reports time in `unit`.
pub fn with_unit(clock: SharedClock, unit: TimeUnit) -> SharedClock {
    if clock.unit() == unit {
        return clock;
    }
    Arc::new(ConvertedClock { inner: clock, unit })
}

/// The process-wide monotonic clock, measured from its creation instant.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    unit: TimeUnit,
}

impl SystemClock {
    pub fn new(unit: TimeUnit) -> Self {
        Self {
            origin: Instant::now(),
            unit,
        }
    }

    pub fn millis_clock() -> Self {
        Self::new(TimeUnit::Millisecond)
    }

    pub fn shared(unit: TimeUnit) -> SharedClock {
        Arc::new(Self::new(unit))
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(TimeUnit::Nanosecond)
    }
}

impl Clock for SystemClock {
    fn time(&self) -> i64 {
        self.unit.from_duration(self.origin.elapsed())
    }

    fn unit(&self) -> TimeUnit {
        self.unit
    }
}

struct ConvertedClock {
    inner: SharedClock,
    unit: TimeUnit,
}

impl Clock for ConvertedClock {
    fn time(&self) -> i64 {
        self.inner.unit().convert_to(self.inner.time(), self.unit)
    }

    fn unit(&self) -> TimeUnit {
        self.unit
    }
}

/// A base clock shifted by a constant offset.
///
/// Sessions use this with `offset = -base.time()` so their time starts at zero.
pub struct AlignedClock {
    inner: SharedClock,
    offset: i64,
}

impl AlignedClock {
    pub fn new(inner: SharedClock, offset: i64) -> Self {
        Self { inner, offset }
    }

    /// An aligned clock reading zero right now.
    pub fn starting_now(inner: SharedClock) -> Self {
        let offset = -inner.time();
        Self { inner, offset }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl Clock for AlignedClock {
    fn time(&self) -> i64 {
        self.inner.time() + self.offset
    }

    fn unit(&self) -> TimeUnit {
        self.inner.unit()
    }
}

/// A clock that only moves when told to. Used for offline stepping and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
    unit: TimeUnit,
}

impl ManualClock {
    pub fn new(unit: TimeUnit) -> Self {
        Self {
            now: AtomicI64::new(0),
            unit,
        }
    }

    pub fn set(&self, time: i64) {
        self.now.store(time, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) -> i64 {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn unit(&self) -> TimeUnit {
        self.unit
    }
}
