//! Timer: concurrent interval measurements keyed by instance id.

use crate::chrono::{Duration, TimePoint, TimeUnit};
use crate::config::TimerOptions;
use crate::core::{HandyError, Result};
use crate::stats::Statistics;
use ahash::AHashMap;

#[derive(Debug, Clone, Copy)]
struct Instance {
    started: TimePoint,
    last_touched: TimePoint,
}

/// Tracks in-flight instances and accumulates elapsed milliseconds.
///
/// An instance with no heartbeat or stop inside the idle timeout is removed
/// by [`Timer::sweep`] without recording anything.
#[derive(Debug, Clone)]
pub struct Timer {
    instances: AHashMap<u64, Instance>,
    idle_timeout: Duration,
    values: Statistics,
}

impl Timer {
    pub fn new(options: &TimerOptions) -> Self {
        Self {
            instances: AHashMap::new(),
            idle_timeout: Duration::new(options.idle_timeout_ms as i64, TimeUnit::Millisecond),
            values: Statistics::new(&options.values),
        }
    }

    /// Begin (or restart) the instance `id`.
    pub fn start(&mut self, id: u64, timestamp: TimePoint) {
        self.instances.insert(
            id,
            Instance {
                started: timestamp,
                last_touched: timestamp,
            },
        );
    }

    /// Finish the instance `id`, recording its elapsed time in milliseconds.
    pub fn stop(&mut self, id: u64, timestamp: TimePoint) -> Result<()> {
        let instance = self
            .instances
            .remove(&id)
            .ok_or_else(|| self.missing(id))?;

        let elapsed_ms =
            timestamp.elapsed_since(&instance.started).as_nanos() as f64 / 1_000_000.0;
        self.values.update(elapsed_ms, timestamp);
        Ok(())
    }

    /// Drop the instance `id` without recording.
    pub fn discard(&mut self, id: u64) -> Result<()> {
        self.instances
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| self.missing(id))
    }

    /// Keep the instance `id` alive past the idle timeout.
    pub fn heartbeat(&mut self, id: u64, timestamp: TimePoint) -> Result<()> {
        match self.instances.get_mut(&id) {
            Some(instance) => {
                instance.last_touched = timestamp;
                Ok(())
            },
            None => Err(self.missing(id)),
        }
    }

    /// Remove instances idle longer than the configured timeout.
    ///
    /// Returns how many were discarded. An instance at exactly the timeout
    /// boundary survives until the next sweep.
    pub fn sweep(&mut self, now: TimePoint) -> usize {
        let timeout = self.idle_timeout;
        let before = self.instances.len();
        self.instances
            .retain(|_, instance| !(now.elapsed_since(&instance.last_touched) > timeout));
        before - self.instances.len()
    }

    /// Number of in-flight instances.
    pub fn active_instances(&self) -> usize {
        self.instances.len()
    }

    /// The rolling statistics over recorded intervals (milliseconds).
    pub fn values(&self) -> &Statistics {
        &self.values
    }

    fn missing(&self, id: u64) -> HandyError {
        HandyError::TimerMissingInstance {
            metric: String::new(),
            instance: id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrono::tsc_clock;
    use crate::config::{StatisticsOptions, TimerOptions};
    use crate::stats::{Tag, TagSet};

    fn ms(count: i64) -> Duration {
        Duration::new(count, TimeUnit::Millisecond)
    }

    fn options() -> TimerOptions {
        TimerOptions {
            values: StatisticsOptions {
                tags: TagSet::EMPTY
                    .with(Tag::Value)
                    .with(Tag::Count)
                    .with(Tag::Sum),
                ..StatisticsOptions::default()
            },
            ..TimerOptions::default()
        }
    }

    #[test]
    fn test_start_stop_records_elapsed_ms() {
        let mut timer = Timer::new(&options());
        let start = tsc_clock::now();
        timer.start(1, start);
        timer.stop(1, start + ms(50).convert_to(TimeUnit::Cycle)).unwrap();

        assert_eq!(timer.values().count().unwrap(), 1);
        let recorded = timer.values().value().unwrap();
        assert!((recorded - 50.0).abs() <= 1.0, "recorded {recorded}ms");
        assert_eq!(timer.active_instances(), 0);
    }

    #[test]
    fn test_stop_unknown_instance() {
        let mut timer = Timer::new(&options());
        let err = timer.stop(7, tsc_clock::now()).unwrap_err();
        assert!(matches!(
            err,
            HandyError::TimerMissingInstance { instance: 7, .. }
        ));
        assert_eq!(timer.values().count().unwrap(), 0);
    }

    #[test]
    fn test_discard_drops_without_recording() {
        let mut timer = Timer::new(&options());
        timer.start(1, tsc_clock::now());
        timer.discard(1).unwrap();

        assert_eq!(timer.active_instances(), 0);
        assert_eq!(timer.values().count().unwrap(), 0);
        assert!(timer.discard(1).is_err());
    }

    #[test]
    fn test_concurrent_instances_are_independent() {
        let mut timer = Timer::new(&options());
        let start = tsc_clock::now();
        timer.start(1, start);
        timer.start(2, start);

        timer.stop(1, start + ms(10).convert_to(TimeUnit::Cycle)).unwrap();
        timer.stop(2, start + ms(30).convert_to(TimeUnit::Cycle)).unwrap();

        assert_eq!(timer.values().count().unwrap(), 2);
        let sum = timer.values().sum().unwrap();
        assert!((sum - 40.0).abs() <= 2.0, "sum {sum}ms");
    }

    #[test]
    fn test_sweep_removes_idle_instances() {
        let options = TimerOptions {
            idle_timeout_ms: 100,
            ..options()
        };
        let mut timer = Timer::new(&options);
        let start = tsc_clock::now();
        timer.start(1, start);

        // Within the timeout the instance survives.
        let boundary = start + ms(99).convert_to(TimeUnit::Cycle);
        assert_eq!(timer.sweep(boundary), 0);
        assert_eq!(timer.active_instances(), 1);

        // Past it, the next sweep discards.
        let past = start + ms(150).convert_to(TimeUnit::Cycle);
        assert_eq!(timer.sweep(past), 1);
        assert_eq!(timer.active_instances(), 0);
        // nothing was recorded
        assert_eq!(timer.values().count().unwrap(), 0);
    }

    #[test]
    fn test_heartbeat_defers_sweep() {
        let options = TimerOptions {
            idle_timeout_ms: 100,
            ..options()
        };
        let mut timer = Timer::new(&options);
        let start = tsc_clock::now();
        timer.start(1, start);

        let later = start + ms(90).convert_to(TimeUnit::Cycle);
        timer.heartbeat(1, later).unwrap();

        // 150ms after start is only 60ms after the heartbeat.
        let past = start + ms(150).convert_to(TimeUnit::Cycle);
        assert_eq!(timer.sweep(past), 0);
        assert_eq!(timer.active_instances(), 1);
    }
}
