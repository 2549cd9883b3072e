//! Gauge: a last-value metric.

use crate::chrono::TimePoint;
use crate::config::StatisticsOptions;
use crate::stats::Statistics;

/// Holds the last set value and pushes every set into the accumulator.
#[derive(Debug, Clone)]
pub struct Gauge {
    value: f64,
    timestamp: Option<TimePoint>,
    values: Statistics,
}

impl Gauge {
    pub fn new(options: &StatisticsOptions) -> Self {
        Self {
            value: 0.0,
            timestamp: None,
            values: Statistics::new(options),
        }
    }

    /// Record a new reading.
    pub fn set(&mut self, value: f64, timestamp: TimePoint) {
        self.value = value;
        self.timestamp = Some(timestamp);
        self.values.update(value, timestamp);
    }

    /// The most recent reading.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// When the most recent reading was taken.
    pub fn timestamp(&self) -> Option<TimePoint> {
        self.timestamp
    }

    /// The rolling statistics over all readings.
    pub fn values(&self) -> &Statistics {
        &self.values
    }
}
