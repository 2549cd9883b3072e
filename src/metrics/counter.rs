//! Counter: a running total with init/increment/decrement.

use crate::chrono::TimePoint;
use crate::config::StatisticsOptions;
use crate::stats::Statistics;

/// Every mutation pushes the new total into the accumulator, so the
/// statistics describe the counter's trajectory rather than the deltas.
#[derive(Debug, Clone)]
pub struct Counter {
    value: f64,
    timestamp: Option<TimePoint>,
    values: Statistics,
}

impl Counter {
    pub fn new(options: &StatisticsOptions) -> Self {
        Self {
            value: 0.0,
            timestamp: None,
            values: Statistics::new(options),
        }
    }

    /// Reset the counter to `value`.
    pub fn init(&mut self, value: f64, timestamp: TimePoint) {
        self.value = value;
        self.record(timestamp);
    }

    /// Add `delta` to the running total.
    pub fn increment(&mut self, delta: f64, timestamp: TimePoint) {
        self.value += delta;
        self.record(timestamp);
    }

    /// Subtract `delta` from the running total.
    pub fn decrement(&mut self, delta: f64, timestamp: TimePoint) {
        self.value -= delta;
        self.record(timestamp);
    }

    fn record(&mut self, timestamp: TimePoint) {
        self.timestamp = Some(timestamp);
        self.values.update(self.value, timestamp);
    }

    /// The current total.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// When the counter last changed.
    pub fn timestamp(&self) -> Option<TimePoint> {
        self.timestamp
    }

    /// The rolling statistics over the counter's values.
    pub fn values(&self) -> &Statistics {
        &self.values
    }
}
