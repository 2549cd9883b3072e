//! Unit-tagged time primitives built on the CPU cycle counter.
//!
//! Hot paths stamp events with the time-stamp counter (TSC): a raw register
//! read, no locks, monotonic per thread. Wall-clock rendering happens later,
//! off the hot path, through the offset maintained in [`convert`].

pub mod convert;

use once_cell::sync::Lazy;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Units a [`Duration`] can carry. `Cycle` counts raw TSC ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Cycle,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl TimeUnit {
    /// Nanoseconds per unit for wall-clock units.
    ///
    /// `Cycle` has no fixed ratio; cycle conversions go through the
    /// calibrated frequency instead.
    fn ns_factor(self) -> Option<i64> {
        match self {
            TimeUnit::Cycle => None,
            TimeUnit::Nanosecond => Some(1),
            TimeUnit::Microsecond => Some(1_000),
            TimeUnit::Millisecond => Some(1_000_000),
            TimeUnit::Second => Some(1_000_000_000),
        }
    }
}

/// Reads the CPU cycle counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    // SAFETY: rdtsc has no memory effects.
    unsafe { std::arch::x86_64::_rdtsc() }
}

/// Reads the virtual counter register (the aarch64 analogue of rdtsc).
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let value: u64;
    // SAFETY: cntvct_el0 is readable from EL0 and has no side effects.
    unsafe {
        std::arch::asm!("mrs {value}, cntvct_el0", value = out(reg) value, options(nomem, nostack));
    }
    value
}

/// Monotonic-clock fallback for targets without a cycle counter.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    static START: Lazy<Instant> = Lazy::new(Instant::now);
    START.elapsed().as_nanos() as u64
}

/// Measured counter frequency in ticks per nanosecond.
///
/// Calibrated once at first use: a (cycles, wall) sample pair taken around a
/// short sleep. The sleep keeps the relative quantization error of both
/// clocks small.
pub fn cycles_per_ns() -> f64 {
    static CYCLES_PER_NS: Lazy<f64> = Lazy::new(|| {
        let cycles_start = read_cycles();
        let wall_start = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(15));
        let cycles_end = read_cycles();
        let elapsed_ns = wall_start.elapsed().as_nanos() as f64;

        let ratio = (cycles_end.wrapping_sub(cycles_start)) as f64 / elapsed_ns;
        if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        }
    });
    *CYCLES_PER_NS
}

/// Integer time span tagged with its unit.
///
/// Arithmetic preserves the left operand's unit; the right operand is
/// converted first. Wall-unit conversions truncate toward zero.
#[derive(Debug, Clone, Copy)]
pub struct Duration {
    count: i64,
    unit: TimeUnit,
}

impl Duration {
    /// Create a duration of `count` units.
    pub const fn new(count: i64, unit: TimeUnit) -> Self {
        Self { count, unit }
    }

    /// The raw count in this duration's own unit.
    pub fn count(&self) -> i64 {
        self.count
    }

    /// The count converted to `unit`.
    pub fn count_as(&self, unit: TimeUnit) -> i64 {
        self.convert_to(unit).count
    }

    /// This duration's unit.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Convert to another unit, going through the calibrated frequency for
    /// cycle↔wall conversions.
    pub fn convert_to(&self, unit: TimeUnit) -> Duration {
        if self.unit == unit {
            return *self;
        }
        let count = match (self.unit.ns_factor(), unit.ns_factor()) {
            (Some(from), Some(to)) => ((self.count as i128 * from as i128) / to as i128) as i64,
            // cycles -> wall
            (None, Some(to)) => {
                let ns = self.count as f64 / cycles_per_ns();
                (ns / to as f64).round() as i64
            },
            // wall -> cycles
            (Some(from), None) => {
                let ns = self.count as f64 * from as f64;
                (ns * cycles_per_ns()).round() as i64
            },
            (None, None) => self.count,
        };
        Duration { count, unit }
    }

    /// The span in nanoseconds, whatever the unit.
    pub fn as_nanos(&self) -> i64 {
        self.count_as(TimeUnit::Nanosecond)
    }
}

impl std::ops::Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::new(self.count + rhs.count_as(self.unit), self.unit)
    }
}

impl std::ops::Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration::new(self.count - rhs.count_as(self.unit), self.unit)
    }
}

impl std::ops::Div<i64> for Duration {
    type Output = Duration;

    fn div(self, rhs: i64) -> Duration {
        Duration::new(self.count / rhs, self.unit)
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.as_nanos().cmp(&other.as_nanos()))
    }
}

/// Which clock a [`TimePoint`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    /// TSC-based, monotonic, cheap to read. Epoch is machine boot.
    Internal,
    /// Wall clock. Epoch is the Unix epoch.
    System,
}

/// A point in time: a duration since the clock's epoch plus the clock tag.
#[derive(Debug, Clone, Copy)]
pub struct TimePoint {
    since_epoch: Duration,
    clock: ClockType,
}

impl TimePoint {
    /// Construct from a duration since the clock's epoch.
    pub const fn new(since_epoch: Duration, clock: ClockType) -> Self {
        Self { since_epoch, clock }
    }

    /// Duration since the clock's epoch.
    pub fn time_since_epoch(&self) -> Duration {
        self.since_epoch
    }

    /// The clock this point was taken on.
    pub fn clock(&self) -> ClockType {
        self.clock
    }

    /// Convert to the system clock. Internal points go through the
    /// TSC↔wall offset; system points are returned unchanged.
    pub fn to_system(&self) -> TimePoint {
        match self.clock {
            ClockType::System => *self,
            ClockType::Internal => convert::to_system_time(*self),
        }
    }

    /// Render as a [`SystemTime`] for export.
    pub fn as_system_time(&self) -> SystemTime {
        let ns = self.to_system().since_epoch.as_nanos();
        if ns >= 0 {
            UNIX_EPOCH + std::time::Duration::from_nanos(ns as u64)
        } else {
            UNIX_EPOCH
        }
    }

    /// Elapsed duration between two points, in the left operand's unit.
    ///
    /// Mixed-clock comparisons coerce the internal point to system time.
    pub fn elapsed_since(&self, earlier: &TimePoint) -> Duration {
        if self.clock == earlier.clock {
            self.since_epoch - earlier.since_epoch
        } else {
            self.to_system().since_epoch - earlier.to_system().since_epoch
        }
    }
}

impl std::ops::Add<Duration> for TimePoint {
    type Output = TimePoint;

    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint::new(self.since_epoch + rhs, self.clock)
    }
}

impl std::ops::Sub<Duration> for TimePoint {
    type Output = TimePoint;

    fn sub(self, rhs: Duration) -> TimePoint {
        TimePoint::new(self.since_epoch - rhs, self.clock)
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        if self.clock == other.clock {
            self.since_epoch == other.since_epoch
        } else {
            self.to_system().since_epoch == other.to_system().since_epoch
        }
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.clock == other.clock {
            self.since_epoch.partial_cmp(&other.since_epoch)
        } else {
            self.to_system()
                .since_epoch
                .partial_cmp(&other.to_system().since_epoch)
        }
    }
}

/// The internal clock: TSC ticks since boot.
pub mod tsc_clock {
    use super::{ClockType, Duration, TimePoint, TimeUnit};

    /// Current internal time. Compiles to a counter read.
    #[inline(always)]
    pub fn now() -> TimePoint {
        TimePoint::new(
            Duration::new(super::read_cycles() as i64, TimeUnit::Cycle),
            ClockType::Internal,
        )
    }
}

/// The system clock: wall nanoseconds since the Unix epoch.
pub mod system_clock {
    use super::{ClockType, Duration, TimePoint, TimeUnit};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Current wall-clock time.
    pub fn now() -> TimePoint {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        TimePoint::new(Duration::new(ns, TimeUnit::Nanosecond), ClockType::System)
    }
}
