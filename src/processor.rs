//! The aggregation runtime.
//!
//! One background thread drains the event queue, owns the metric registry
//! (single writer, no locks on the data path), and periodically publishes
//! immutable snapshots. A process-wide [`Core`] coordinates configuration,
//! lifecycle, and the emit fast path.
//!
//! Per-event failures are logged and skipped; one bad metric never silences
//! the rest.

use crate::chrono::{tsc_clock, Duration, TimePoint, TimeUnit};
use crate::config::Config;
use crate::core::{HandyError, Result};
use crate::dump::MetricsDump;
use crate::metrics::{Event, EventKind, Metric};
use crate::queue::EventQueue;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

/// Gauge tracking the event queue's size estimate.
pub const QUEUE_SIZE_METRIC: &str = "handystats.message_queue.size";
/// Counter tracking events consumed by the aggregator.
pub const POP_COUNT_METRIC: &str = "handystats.message_queue.pop_count";
/// Counter tracking events shed by the drop policy. Published only when a
/// `queue-size` bound is configured.
pub const DROPPED_COUNT_METRIC: &str = "handystats.message_queue.dropped";
/// Timer spanning the aggregator's lifetime.
pub const RUN_TIME_METRIC: &str = "handystats.process.run_time";

/// Events consumed per loop iteration before housekeeping runs.
const MAX_DRAIN_BATCH: usize = 1_024;
/// How long `finalize` keeps draining before discarding what's left.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::new(1_000, TimeUnit::Millisecond);
/// Sleep between polls once the queue has stayed empty.
const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_micros(500);

struct Aggregator {
    config: Config,
    registry: AHashMap<String, Metric>,
    queue: Arc<EventQueue>,
    dump_slot: Arc<RwLock<Arc<MetricsDump>>>,
    shutdown: Arc<AtomicBool>,
    pop_count: u64,
    timer_errors: u64,
    /// Queue drop total when this run started; the queue outlives runs.
    dropped_baseline: u64,
    dropped_seen: u64,
}

impl Aggregator {
    fn new(
        config: Config,
        queue: Arc<EventQueue>,
        dump_slot: Arc<RwLock<Arc<MetricsDump>>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let dropped_baseline = queue.dropped();
        Self {
            config,
            registry: AHashMap::new(),
            queue,
            dump_slot,
            shutdown,
            pop_count: 0,
            timer_errors: 0,
            dropped_baseline,
            dropped_seen: dropped_baseline,
        }
    }

    fn run(mut self) {
        tracing::debug!("aggregator started");
        self.apply(RUN_TIME_METRIC, EventKind::TimerStart(0), tsc_clock::now());

        let dump_interval =
            Duration::new(self.config.dump_interval_ms as i64, TimeUnit::Millisecond);
        let mut last_dump = tsc_clock::now();
        let mut idle = false;

        loop {
            let drained = self.drain_batch();

            let now = tsc_clock::now();
            self.update_self_metrics(now);
            self.sweep_timers(now);

            if self.shutdown.load(Ordering::Acquire) {
                self.shutdown_drain();
                break;
            }

            if self.config.dump_interval_ms > 0 && now.elapsed_since(&last_dump) >= dump_interval {
                self.publish();
                last_dump = now;
            }

            if drained == 0 {
                if idle {
                    std::thread::sleep(IDLE_SLEEP);
                } else {
                    std::thread::yield_now();
                    idle = true;
                }
            } else {
                idle = false;
            }
        }

        tracing::debug!(
            events = self.pop_count,
            timer_errors = self.timer_errors,
            "aggregator stopped"
        );
    }

    fn drain_batch(&mut self) -> usize {
        let queue = Arc::clone(&self.queue);
        let drained = queue.drain(MAX_DRAIN_BATCH, |event| self.handle_event(event));
        self.pop_count += drained as u64;
        drained
    }

    fn handle_event(&mut self, event: &Event) {
        self.apply(&event.name, event.kind, event.timestamp);
    }

    /// Look up (or lazily create) the metric and apply the operation.
    fn apply(&mut self, name: &str, kind: EventKind, timestamp: TimePoint) {
        if !self.registry.contains_key(name) {
            let metric = Metric::for_event(name, kind, &self.config);
            tracing::debug!(metric = name, kind = metric.kind_name(), "metric registered");
            self.registry.insert(name.to_owned(), metric);
        }
        if let Some(metric) = self.registry.get_mut(name) {
            if let Err(error) = metric.apply(kind, timestamp) {
                match error {
                    HandyError::TimerMissingInstance { instance, .. } => {
                        self.timer_errors += 1;
                        tracing::debug!(metric = name, instance, "timer instance not found");
                    },
                    error => {
                        tracing::warn!(metric = name, error = %error, "event not applied");
                    },
                }
            }
        }
    }

    fn update_self_metrics(&mut self, now: TimePoint) {
        self.update_queue_metrics(now);
        self.apply(RUN_TIME_METRIC, EventKind::TimerHeartbeat(0), now);
    }

    fn update_queue_metrics(&mut self, now: TimePoint) {
        let queue_size = self.queue.len() as f64;
        self.apply(QUEUE_SIZE_METRIC, EventKind::GaugeSet(queue_size), now);
        self.apply(
            POP_COUNT_METRIC,
            EventKind::CounterInit(self.pop_count as f64),
            now,
        );

        if self.queue.capacity().is_some() {
            let dropped = self.queue.dropped();
            if dropped > self.dropped_seen {
                tracing::warn!(
                    error = %HandyError::QueueExhausted,
                    shed = dropped - self.dropped_seen,
                    "drop policy shed events"
                );
                self.dropped_seen = dropped;
            }
            self.apply(
                DROPPED_COUNT_METRIC,
                EventKind::CounterInit((dropped - self.dropped_baseline) as f64),
                now,
            );
        }
    }

    fn sweep_timers(&mut self, now: TimePoint) {
        for metric in self.registry.values_mut() {
            if let Metric::Timer(timer) = metric {
                timer.sweep(now);
            }
        }
    }

    /// Bounded drain on shutdown, then one final publish.
    fn shutdown_drain(&mut self) {
        let deadline = tsc_clock::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while !self.queue.is_empty() && tsc_clock::now() < deadline {
            if self.drain_batch() == 0 {
                std::thread::yield_now();
            }
        }

        let discarded = {
            let queue = Arc::clone(&self.queue);
            let mut discarded = 0u64;
            while queue.pop_with(|_| ()).is_some() {
                discarded += 1;
            }
            discarded
        };
        if discarded > 0 {
            tracing::warn!(discarded, "shutdown drain timed out, events discarded");
        }

        let now = tsc_clock::now();
        self.update_queue_metrics(now);
        self.apply(RUN_TIME_METRIC, EventKind::TimerStop(0), now);
        self.publish();
    }

    fn publish(&mut self) {
        let dump = MetricsDump::new(self.registry.clone(), SystemTime::now());
        tracing::trace!(metrics = dump.len(), "snapshot published");
        *self.dump_slot.write() = Arc::new(dump);
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

struct CoreState {
    config: Config,
    worker: Option<WorkerHandle>,
}

/// Process-wide runtime: configuration, lifecycle, and the emit fast path.
pub(crate) struct Core {
    enabled: AtomicBool,
    queue: Arc<EventQueue>,
    dump_slot: Arc<RwLock<Arc<MetricsDump>>>,
    state: Mutex<CoreState>,
}

static CORE: Lazy<Core> = Lazy::new(|| Core {
    enabled: AtomicBool::new(false),
    queue: Arc::new(EventQueue::new()),
    dump_slot: Arc::new(RwLock::new(Arc::new(MetricsDump::empty()))),
    state: Mutex::new(CoreState {
        config: Config::default(),
        worker: None,
    }),
});

impl Core {
    pub(crate) fn instance() -> &'static Core {
        &CORE
    }

    /// Stage a configuration. Ignored (with a diagnostic) once running.
    pub(crate) fn configure_json(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            tracing::warn!("configuration ignored: runtime is already initialized");
            return Ok(());
        }
        state.config = Config::from_json(text)?;
        Ok(())
    }

    /// Stage a configuration read from a file.
    pub(crate) fn configure_file(&self, path: &std::path::Path) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            tracing::warn!("configuration ignored: runtime is already initialized");
            return Ok(());
        }
        state.config = Config::from_file(path)?;
        Ok(())
    }

    /// Start the aggregator. A no-op if already running, or if the staged
    /// configuration has `enable: false`.
    pub(crate) fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            return Ok(());
        }
        if !state.config.enable {
            tracing::info!("handystats disabled by configuration");
            return Ok(());
        }

        // Clear anything a racing producer managed to enqueue while the
        // runtime was down, and reset the published snapshot.
        while self.queue.pop_with(|_| ()).is_some() {}
        *self.dump_slot.write() = Arc::new(MetricsDump::empty());
        self.queue.set_capacity(state.config.queue_size);

        let shutdown = Arc::new(AtomicBool::new(false));
        let aggregator = Aggregator::new(
            state.config.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.dump_slot),
            Arc::clone(&shutdown),
        );
        let thread = std::thread::Builder::new()
            .name("handystats".to_owned())
            .spawn(move || aggregator.run())?;

        state.worker = Some(WorkerHandle { thread, shutdown });
        self.enabled.store(true, Ordering::Release);
        tracing::info!("handystats initialized");
        Ok(())
    }

    /// Stop the aggregator: producers are cut off first, then the thread
    /// drains (bounded) and publishes a final snapshot before joining.
    pub(crate) fn finalize(&self) {
        let mut state = self.state.lock();
        self.enabled.store(false, Ordering::Release);

        if let Some(worker) = state.worker.take() {
            worker.shutdown.store(true, Ordering::Release);
            if worker.thread.join().is_err() {
                tracing::error!("aggregator thread panicked");
            }
            tracing::info!("handystats finalized");
        }

        // The staged configuration does not survive a shutdown.
        state.config = Config::default();
        while self.queue.pop_with(|_| ()).is_some() {}
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// The emit fast path: one acquire load when disabled.
    ///
    /// Producers never observe drop-policy sheds; the aggregator accounts
    /// for them through the queue's drop counter.
    #[inline]
    pub(crate) fn emit(&self, name: &str, kind: EventKind) {
        if !self.is_enabled() {
            return;
        }
        let _ = self.queue.push(name, kind, tsc_clock::now());
    }

    /// The most recently published snapshot.
    pub(crate) fn dump(&self) -> Arc<MetricsDump> {
        Arc::clone(&self.dump_slot.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_config() -> Config {
        Config::from_json(
            r#"{ "defaults": { "tags": ["value", "count", "sum", "avg", "timestamp"] } }"#,
        )
        .unwrap()
    }

    fn harness(config: Config) -> (Arc<EventQueue>, Arc<RwLock<Arc<MetricsDump>>>, Aggregator) {
        harness_with_queue(config, Arc::new(EventQueue::new()))
    }

    fn harness_with_queue(
        config: Config,
        queue: Arc<EventQueue>,
    ) -> (Arc<EventQueue>, Arc<RwLock<Arc<MetricsDump>>>, Aggregator) {
        let dump_slot = Arc::new(RwLock::new(Arc::new(MetricsDump::empty())));
        let shutdown = Arc::new(AtomicBool::new(true)); // drain once, then exit
        let aggregator = Aggregator::new(
            config,
            Arc::clone(&queue),
            Arc::clone(&dump_slot),
            shutdown,
        );
        (queue, dump_slot, aggregator)
    }

    #[test]
    fn test_drain_applies_events_and_publishes() {
        let (queue, dump_slot, aggregator) = harness(rich_config());

        for i in 0..100 {
            queue.push("requests", EventKind::GaugeSet(i as f64), tsc_clock::now());
        }
        aggregator.run();

        let dump = dump_slot.read().clone();
        let metric = dump.get("requests").unwrap();
        assert_eq!(metric.values().count().unwrap(), 100);
        assert_eq!(metric.values().value().unwrap(), 99.0);
    }

    #[test]
    fn test_metric_created_exactly_once_during_burst() {
        let (queue, dump_slot, aggregator) = harness(Config::default());

        for _ in 0..1_000 {
            queue.push("burst", EventKind::CounterIncrement(1.0), tsc_clock::now());
        }
        aggregator.run();

        let dump = dump_slot.read().clone();
        match dump.get("burst").unwrap() {
            Metric::Counter(counter) => assert_eq!(counter.value(), 1_000.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
    }

    #[test]
    fn test_self_metrics_present_in_dump() {
        let (queue, dump_slot, aggregator) = harness(Config::default());
        queue.push("m", EventKind::GaugeSet(1.0), tsc_clock::now());
        aggregator.run();

        let dump = dump_slot.read().clone();
        assert!(dump.contains(QUEUE_SIZE_METRIC));
        assert!(dump.contains(POP_COUNT_METRIC));
        assert!(dump.contains(RUN_TIME_METRIC));

        match dump.get(QUEUE_SIZE_METRIC).unwrap() {
            Metric::Gauge(gauge) => assert!(gauge.value() >= 0.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
        match dump.get(POP_COUNT_METRIC).unwrap() {
            Metric::Counter(counter) => assert!(counter.value() >= 1.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
    }

    #[test]
    fn test_pattern_config_binds_at_first_use() {
        let config = Config::from_json(
            r#"{
                "req.{a,b}": { "values": { "tags": ["count", "avg"] } }
            }"#,
        )
        .unwrap();
        let (queue, dump_slot, aggregator) = harness(config);

        queue.push("req.a", EventKind::GaugeSet(10.0), tsc_clock::now());
        queue.push("req.b", EventKind::GaugeSet(20.0), tsc_clock::now());
        queue.push("req.c", EventKind::GaugeSet(99.0), tsc_clock::now());
        aggregator.run();

        let dump = dump_slot.read().clone();
        assert_eq!(dump.get("req.a").unwrap().values().count().unwrap(), 1);
        assert_eq!(dump.get("req.b").unwrap().values().count().unwrap(), 1);
        assert!((dump.get("req.a").unwrap().values().avg().unwrap() - 10.0).abs() < 1e-9);

        // req.c fell back to the gauge defaults, where avg is not enabled.
        let stats = dump.get("req.c").unwrap().values();
        assert!(matches!(
            stats.avg().unwrap_err(),
            HandyError::TagNotEnabled("avg")
        ));
    }

    #[test]
    fn test_timer_stop_without_start_is_counted_not_fatal() {
        let (queue, dump_slot, aggregator) = harness(rich_config());

        queue.push("t", EventKind::TimerStop(5), tsc_clock::now());
        queue.push("after", EventKind::GaugeSet(1.0), tsc_clock::now());
        aggregator.run();

        // The bad event did not stop the one after it.
        let dump = dump_slot.read().clone();
        assert!(dump.contains("after"));
        assert_eq!(dump.get("t").unwrap().values().count().unwrap(), 0);
    }

    #[test]
    fn test_shed_events_surface_as_dropped_counter() {
        let queue = Arc::new(EventQueue::bounded(4));
        let (queue, dump_slot, aggregator) = harness_with_queue(Config::default(), queue);

        for i in 0..10 {
            queue.push("flood", EventKind::GaugeSet(i as f64), tsc_clock::now());
        }
        aggregator.run();

        let dump = dump_slot.read().clone();
        match dump.get(DROPPED_COUNT_METRIC).unwrap() {
            Metric::Counter(counter) => assert_eq!(counter.value(), 6.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
        // the four admitted events were still aggregated
        match dump.get("flood").unwrap() {
            Metric::Gauge(gauge) => assert_eq!(gauge.value(), 3.0),
            other => panic!("unexpected variant {}", other.kind_name()),
        }
    }

    #[test]
    fn test_unbounded_queue_publishes_no_dropped_counter() {
        let (queue, dump_slot, aggregator) = harness(Config::default());
        queue.push("m", EventKind::GaugeSet(1.0), tsc_clock::now());
        aggregator.run();

        let dump = dump_slot.read().clone();
        assert!(!dump.contains(DROPPED_COUNT_METRIC));
    }

    #[test]
    fn test_empty_queue_drain_keeps_dump_unchanged() {
        let (_queue, dump_slot, aggregator) = harness(Config::default());
        aggregator.run();

        let first = dump_slot.read().clone();
        let count = first.len();

        // Only self metrics; a second look at the slot is identical.
        let second = dump_slot.read().clone();
        assert_eq!(second.len(), count);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
