//! Measurement events carried from producers to the aggregator.

use crate::chrono::{tsc_clock, TimePoint};

/// What a measurement event does to its metric.
///
/// The payload is a value for gauges and counters, an instance id for
/// timers. Copyable so the consumer can read events in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    GaugeSet(f64),
    CounterInit(f64),
    CounterIncrement(f64),
    CounterDecrement(f64),
    TimerStart(u64),
    TimerStop(u64),
    TimerDiscard(u64),
    TimerHeartbeat(u64),
}

/// One enqueued measurement: metric name, operation, and the internal-clock
/// timestamp taken on the emitting thread.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub kind: EventKind,
    pub timestamp: TimePoint,
}

impl Event {
    /// Build an event stamped with the current internal time.
    pub fn new(name: &str, kind: EventKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            timestamp: tsc_clock::now(),
        }
    }

    /// Rewrite this event in place, reusing the name buffer.
    pub fn fill(&mut self, name: &str, kind: EventKind, timestamp: TimePoint) {
        self.name.clear();
        self.name.push_str(name);
        self.kind = kind;
        self.timestamp = timestamp;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: EventKind::GaugeSet(0.0),
            timestamp: tsc_clock::now(),
        }
    }
}
