//! Handystats - in-process statistics and metrics.
//!
//! Application threads emit measurements (gauge sets, counter increments,
//! timer intervals) on hot paths; a background aggregator turns them into
//! rolling statistical summaries; consumers grab consistent snapshots for
//! export.
//!
//! # Features
//!
//! - **Cheap emission**: a disabled runtime costs one atomic load; an
//!   enabled one a TSC read plus a wait-free enqueue
//! - **Lock-free ingestion**: MPSC queue with pooled nodes, no allocation
//!   in steady state
//! - **Rolling statistics**: min/max/sum/avg, decayed moving windows,
//!   streaming histograms with approximate quantiles
//! - **Pattern configuration**: brace-expanded, glob-matched option blocks
//!   bound to metric names at first use
//! - **Consistent snapshots**: immutable dumps shared with any number of
//!   readers, never blocking ingestion
//!
//! # Example
//!
//! ```no_run
//! handystats::config_json(r#"{ "enable": true, "dump-interval": 500 }"#)?;
//! handystats::initialize()?;
//!
//! handystats::gauge_set("sessions.active", 42.0);
//! handystats::counter_incr("requests.total", 1.0);
//!
//! handystats::timer_start("db.query", 1);
//! // ... work ...
//! handystats::timer_stop("db.query", 1);
//!
//! let dump = handystats::metrics_dump();
//! if let Ok(metric) = dump.get("requests.total") {
//!     println!("requests so far: {}", metric.values().value()?);
//! }
//!
//! handystats::finalize();
//! # Ok::<(), handystats::HandyError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod chrono;
pub mod config;
pub mod core;
pub mod dump;
pub mod math;
pub mod metrics;
pub mod queue;
pub mod stats;

mod processor;

pub use crate::core::{HandyError, Result};
pub use crate::dump::MetricsDump;
pub use crate::metrics::Metric;
pub use crate::processor::{
    DROPPED_COUNT_METRIC, POP_COUNT_METRIC, QUEUE_SIZE_METRIC, RUN_TIME_METRIC,
};

use crate::metrics::EventKind;
use crate::processor::Core;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Apply a JSON configuration.
///
/// Rejected configurations leave the previous one untouched. On an already
/// initialized runtime this is a diagnosed no-op returning `Ok`; reconfigure
/// through [`finalize`] + [`initialize`].
pub fn config_json(text: &str) -> Result<()> {
    Core::instance().configure_json(text)
}

/// Apply a JSON configuration read from a file.
pub fn config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    Core::instance().configure_file(path.as_ref())
}

/// Start the aggregator thread. A no-op if already running, or if the
/// configuration disables the runtime.
pub fn initialize() -> Result<()> {
    Core::instance().initialize()
}

/// Stop the aggregator: drain pending events (bounded), publish a final
/// snapshot, join the thread, and reset the staged configuration.
pub fn finalize() {
    Core::instance().finalize()
}

/// Whether measurements are currently being collected.
pub fn is_enabled() -> bool {
    Core::instance().is_enabled()
}

/// The most recently published snapshot; empty before the first publish.
pub fn metrics_dump() -> Arc<MetricsDump> {
    Core::instance().dump()
}

/// Set a gauge reading.
#[inline]
pub fn gauge_set(name: &str, value: f64) {
    Core::instance().emit(name, EventKind::GaugeSet(value));
}

/// Set a gauge's first reading. Equivalent to [`gauge_set`].
#[inline]
pub fn gauge_init(name: &str, value: f64) {
    Core::instance().emit(name, EventKind::GaugeSet(value));
}

/// Reset a counter to `value`.
#[inline]
pub fn counter_init(name: &str, value: f64) {
    Core::instance().emit(name, EventKind::CounterInit(value));
}

/// Add `delta` to a counter.
#[inline]
pub fn counter_incr(name: &str, delta: f64) {
    Core::instance().emit(name, EventKind::CounterIncrement(delta));
}

/// Subtract `delta` from a counter.
#[inline]
pub fn counter_decr(name: &str, delta: f64) {
    Core::instance().emit(name, EventKind::CounterDecrement(delta));
}

/// Start a timer instance. Use distinct ids for concurrent measurements.
#[inline]
pub fn timer_start(name: &str, instance: u64) {
    Core::instance().emit(name, EventKind::TimerStart(instance));
}

/// Stop a timer instance, recording its elapsed milliseconds.
#[inline]
pub fn timer_stop(name: &str, instance: u64) {
    Core::instance().emit(name, EventKind::TimerStop(instance));
}

/// Drop a timer instance without recording.
#[inline]
pub fn timer_discard(name: &str, instance: u64) {
    Core::instance().emit(name, EventKind::TimerDiscard(instance));
}

/// Keep a timer instance alive past the idle timeout.
#[inline]
pub fn timer_heartbeat(name: &str, instance: u64) {
    Core::instance().emit(name, EventKind::TimerHeartbeat(instance));
}

/// Instance ids handed out to scoped timers, disjoint from user ids by the
/// high bit.
static SCOPED_INSTANCE: AtomicU64 = AtomicU64::new(1 << 63);

/// Times a scope: starts a timer instance on construction and stops it on
/// drop.
///
/// ```no_run
/// {
///     let _timer = handystats::ScopedTimer::new("request.handle");
///     // ... measured work ...
/// } // recorded here
/// ```
pub struct ScopedTimer {
    name: String,
    instance: u64,
    armed: bool,
}

impl ScopedTimer {
    /// Start timing `name` under a fresh instance id.
    pub fn new(name: &str) -> Self {
        let instance = SCOPED_INSTANCE.fetch_add(1, Ordering::Relaxed);
        timer_start(name, instance);
        Self {
            name: name.to_owned(),
            instance,
            armed: true,
        }
    }

    /// Abandon the measurement; nothing is recorded.
    pub fn discard(mut self) {
        timer_discard(&self.name, self.instance);
        self.armed = false;
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if self.armed {
            timer_stop(&self.name, self.instance);
        }
    }
}
