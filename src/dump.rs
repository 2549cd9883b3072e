//! Immutable metric snapshots.

use crate::core::{HandyError, Result};
use crate::metrics::Metric;
use ahash::AHashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A frozen copy of every registered metric, published by the aggregator.
///
/// Handed to consumers as `Arc<MetricsDump>`: readers share it without
/// blocking ingestion, and a superseded dump stays valid until its last
/// reader lets go.
#[derive(Debug, Clone)]
pub struct MetricsDump {
    metrics: AHashMap<String, Metric>,
    timestamp: SystemTime,
}

impl MetricsDump {
    /// The empty dump returned before the first publish.
    pub fn empty() -> Self {
        Self {
            metrics: AHashMap::new(),
            timestamp: UNIX_EPOCH,
        }
    }

    pub(crate) fn new(metrics: AHashMap<String, Metric>, timestamp: SystemTime) -> Self {
        Self { metrics, timestamp }
    }

    /// Look up one metric by name.
    pub fn get(&self, name: &str) -> Result<&Metric> {
        self.metrics
            .get(name)
            .ok_or_else(|| HandyError::UnknownMetric(name.to_owned()))
    }

    /// Whether `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Iterate over all (name, metric) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Metric)> {
        self.metrics.iter().map(|(name, metric)| (name.as_str(), metric))
    }

    /// Number of metrics in the dump.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the dump holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Wall-clock time of the publish; the Unix epoch for [`Self::empty`].
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}
