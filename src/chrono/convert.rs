//! TSC-to-wall-clock conversion.
//!
//! A process-wide (offset, taken-at) pair maps internal timestamps onto the
//! system clock. The offset is refreshed once it ages past a timeout;
//! refresh is guarded by a try-acquire flag so conversion never blocks and
//! contenders keep using the stale offset.

use super::{system_clock, tsc_clock, ClockType, Duration, TimePoint, TimeUnit};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Wall-clock offset in nanoseconds, published with release ordering.
static NS_OFFSET: AtomicI64 = AtomicI64::new(0);
/// Cycle timestamp at which the offset was sampled. 0 = never calibrated.
static OFFSET_TIMESTAMP: AtomicI64 = AtomicI64::new(0);
/// Single-acquirer calibration flag.
static CALIBRATING: AtomicBool = AtomicBool::new(false);

/// Recalibrate once the cached offset is older than this.
const OFFSET_TIMEOUT: Duration = Duration::new(15_000_000_000, TimeUnit::Nanosecond);
/// A (before, wall, after) sample is usable when the TSC pair is this close.
const CLOSE_DISTANCE: Duration = Duration::new(15_000, TimeUnit::Nanosecond);
/// Give up on finding a close pair after this many tries.
const MAX_UPDATE_TRIES: u64 = 100;

/// Convert an internal time point to the system clock.
///
/// If no calibration has ever succeeded the raw tick count is treated as
/// nanoseconds (offset zero).
pub(super) fn to_system_time(t: TimePoint) -> TimePoint {
    debug_assert_eq!(t.clock(), ClockType::Internal);

    let current = tsc_clock::now();
    let offset_ts = OFFSET_TIMESTAMP.load(Ordering::Acquire);

    let stale = offset_ts == 0
        || current.time_since_epoch() - Duration::new(offset_ts, TimeUnit::Cycle) > OFFSET_TIMEOUT;

    if stale
        && CALIBRATING
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    {
        refresh_offset();
        CALIBRATING.store(false, Ordering::Release);
    }

    let ns = t.time_since_epoch().convert_to(TimeUnit::Nanosecond)
        + Duration::new(NS_OFFSET.load(Ordering::Acquire), TimeUnit::Nanosecond);
    TimePoint::new(ns, ClockType::System)
}

/// Sample (TSC, wall, TSC) triples until the bracket is tight, then publish
/// the midpoint pairing. On failure the previous offset stays in place.
fn refresh_offset() {
    let mut close_pair = None;
    for _ in 0..MAX_UPDATE_TRIES {
        let cycles_start = tsc_clock::now();
        let wall = system_clock::now();
        let cycles_end = tsc_clock::now();

        if cycles_end.elapsed_since(&cycles_start) < CLOSE_DISTANCE {
            close_pair = Some((cycles_start, wall, cycles_end));
            break;
        }
    }
    let Some((cycles_start, wall, cycles_end)) = close_pair else {
        return;
    };

    let cycles_middle = cycles_start + (cycles_end.time_since_epoch() - cycles_start.time_since_epoch()) / 2;
    let offset_ns = (wall.time_since_epoch()
        - cycles_middle.time_since_epoch().convert_to(TimeUnit::Nanosecond))
    .count_as(TimeUnit::Nanosecond);

    NS_OFFSET.store(offset_ns, Ordering::Release);
    OFFSET_TIMESTAMP.store(
        cycles_middle.time_since_epoch().count_as(TimeUnit::Cycle),
        Ordering::Release,
    );
}
