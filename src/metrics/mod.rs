//! Metric variants and the events that drive them.

pub mod counter;
pub mod event;
pub mod gauge;
pub mod timer;

pub use counter::Counter;
pub use event::{Event, EventKind};
pub use gauge::Gauge;
pub use timer::Timer;

use crate::chrono::TimePoint;
use crate::config::Config;
use crate::core::{HandyError, Result};
use crate::stats::Statistics;

/// A registered metric: one variant plus its accumulator.
#[derive(Debug, Clone)]
pub enum Metric {
    Gauge(Gauge),
    Counter(Counter),
    Timer(Timer),
}

impl Metric {
    /// Build the variant an event implies, with the options the
    /// configuration binds to `name`.
    pub fn for_event(name: &str, kind: EventKind, config: &Config) -> Metric {
        match kind {
            EventKind::GaugeSet(_) => Metric::Gauge(Gauge::new(config.gauge_options_for(name))),
            EventKind::CounterInit(_)
            | EventKind::CounterIncrement(_)
            | EventKind::CounterDecrement(_) => {
                Metric::Counter(Counter::new(config.counter_options_for(name)))
            },
            EventKind::TimerStart(_)
            | EventKind::TimerStop(_)
            | EventKind::TimerDiscard(_)
            | EventKind::TimerHeartbeat(_) => {
                Metric::Timer(Timer::new(config.timer_options_for(name)))
            },
        }
    }

    /// Apply one event. Kind/variant mismatches (a name reused across
    /// types) are reported, not applied.
    pub fn apply(&mut self, kind: EventKind, timestamp: TimePoint) -> Result<()> {
        match (self, kind) {
            (Metric::Gauge(gauge), EventKind::GaugeSet(value)) => {
                gauge.set(value, timestamp);
                Ok(())
            },
            (Metric::Counter(counter), EventKind::CounterInit(value)) => {
                counter.init(value, timestamp);
                Ok(())
            },
            (Metric::Counter(counter), EventKind::CounterIncrement(delta)) => {
                counter.increment(delta, timestamp);
                Ok(())
            },
            (Metric::Counter(counter), EventKind::CounterDecrement(delta)) => {
                counter.decrement(delta, timestamp);
                Ok(())
            },
            (Metric::Timer(timer), EventKind::TimerStart(id)) => {
                timer.start(id, timestamp);
                Ok(())
            },
            (Metric::Timer(timer), EventKind::TimerStop(id)) => timer.stop(id, timestamp),
            (Metric::Timer(timer), EventKind::TimerDiscard(id)) => timer.discard(id),
            (Metric::Timer(timer), EventKind::TimerHeartbeat(id)) => timer.heartbeat(id, timestamp),
            (_, kind) => Err(HandyError::config(format!(
                "event {kind:?} does not match the metric's variant"
            ))),
        }
    }

    /// The variant's accumulator.
    pub fn values(&self) -> &Statistics {
        match self {
            Metric::Gauge(gauge) => gauge.values(),
            Metric::Counter(counter) => counter.values(),
            Metric::Timer(timer) => timer.values(),
        }
    }

    /// Variant name for logs and exporters.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Metric::Gauge(_) => "gauge",
            Metric::Counter(_) => "counter",
            Metric::Timer(_) => "timer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrono::tsc_clock;

    #[test]
    fn test_variant_inferred_from_event() {
        let config = Config::default();
        let metric = Metric::for_event("m", EventKind::GaugeSet(1.0), &config);
        assert!(matches!(metric, Metric::Gauge(_)));

        let metric = Metric::for_event("m", EventKind::CounterIncrement(1.0), &config);
        assert!(matches!(metric, Metric::Counter(_)));

        let metric = Metric::for_event("m", EventKind::TimerStart(0), &config);
        assert!(matches!(metric, Metric::Timer(_)));
    }

    #[test]
    fn test_apply_dispatches() {
        let config = Config::default();
        let now = tsc_clock::now();

        let mut metric = Metric::for_event("m", EventKind::CounterInit(10.0), &config);
        metric.apply(EventKind::CounterInit(10.0), now).unwrap();
        metric.apply(EventKind::CounterIncrement(5.0), now).unwrap();
        match &metric {
            Metric::Counter(counter) => assert_eq!(counter.value(), 15.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
    }

    #[test]
    fn test_mismatched_event_is_rejected() {
        let config = Config::default();
        let mut metric = Metric::for_event("m", EventKind::GaugeSet(1.0), &config);
        let err = metric
            .apply(EventKind::TimerStart(0), tsc_clock::now())
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
