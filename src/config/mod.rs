//! Runtime configuration.
//!
//! Two JSON layouts are accepted: the legacy nested format
//! (`statistics` / `metrics` / `metrics-dump` / `core`) and the flat format
//! (`defaults` / `gauge` / `counter` / `timer` / `dump-interval` /
//! `enable` / `queue-size`). Any other top-level key is a brace pattern
//! binding an option block to the metric names it matches (first declared
//! match wins).
//!
//! Parsing is all-or-nothing: a malformed section or pattern rejects the
//! whole document and leaves the active configuration untouched.

pub mod pattern;

use crate::core::{HandyError, Result};
use crate::stats::{Tag, TagSet};
use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

/// Default dump interval when none is configured.
pub const DEFAULT_DUMP_INTERVAL_MS: u64 = 750;
/// Default timer idle timeout.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Top-level keys that are not patterns.
const RESERVED_KEYS: [&str; 11] = [
    "statistics",
    "metrics",
    "metrics-dump",
    "core",
    "defaults",
    "gauge",
    "counter",
    "timer",
    "dump-interval",
    "enable",
    "queue-size",
];

/// Per-accumulator options: the `values` block of a metric section.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsOptions {
    /// Enabled statistic tags.
    pub tags: TagSet,
    /// Moving window length in wall milliseconds.
    pub moving_interval_ms: u64,
    /// Streaming histogram bin budget.
    pub histogram_bins: usize,
    /// Quantile probes offered to exporters.
    pub quantile_probs: Vec<f64>,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            tags: TagSet::EMPTY.with(Tag::Value).with(Tag::Timestamp),
            moving_interval_ms: 1_000,
            histogram_bins: 30,
            quantile_probs: vec![0.25, 0.5, 0.75, 0.9, 0.95],
        }
    }
}

/// Timer options: accumulator options plus the instance idle timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerOptions {
    pub values: StatisticsOptions,
    /// Instances untouched for this long are discarded by the idle sweep.
    pub idle_timeout_ms: u64,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            values: StatisticsOptions::default(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

/// Partial override of [`StatisticsOptions`]; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatisticsPatch {
    tags: Option<Vec<String>>,
    #[serde(rename = "moving-interval-ms")]
    moving_interval_ms: Option<u64>,
    #[serde(rename = "histogram-bins")]
    histogram_bins: Option<usize>,
    #[serde(rename = "quantile-probs")]
    quantile_probs: Option<Vec<f64>>,
}

impl StatisticsPatch {
    fn apply(&self, target: &mut StatisticsOptions) -> Result<()> {
        if let Some(tags) = &self.tags {
            target.tags = TagSet::from_names(tags)?;
        }
        if let Some(interval) = self.moving_interval_ms {
            if interval == 0 {
                return Err(HandyError::config("moving-interval-ms must be positive"));
            }
            target.moving_interval_ms = interval;
        }
        if let Some(bins) = self.histogram_bins {
            if bins == 0 {
                return Err(HandyError::config("histogram-bins must be positive"));
            }
            target.histogram_bins = bins;
        }
        if let Some(probs) = &self.quantile_probs {
            for p in probs {
                if !(*p > 0.0 && *p < 1.0) {
                    return Err(HandyError::config(format!(
                        "quantile prob {p} is outside (0, 1)"
                    )));
                }
            }
            target.quantile_probs = probs.clone();
        }
        Ok(())
    }
}

/// A gauge/counter section: just a `values` block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValuesSection {
    values: Option<StatisticsPatch>,
}

/// A timer section, and the shape accepted for pattern blocks (the metric
/// type behind a pattern is unknown until first use, so the union applies).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricSection {
    values: Option<StatisticsPatch>,
    #[serde(rename = "idle-timeout-ms")]
    idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct DumpSection {
    interval: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoreSection {
    enable: Option<bool>,
    #[serde(rename = "queue-size")]
    queue_size: Option<usize>,
}

/// One configured pattern with its pre-resolved per-type options.
#[derive(Debug, Clone)]
pub struct PatternGroup {
    source: String,
    expansion: Vec<String>,
    globs: Vec<Pattern>,
    raw: Value,
    gauge: StatisticsOptions,
    counter: StatisticsOptions,
    timer: TimerOptions,
}

impl PatternGroup {
    /// The pattern as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The expanded alternatives, in expansion order.
    pub fn expansion(&self) -> &[String] {
        &self.expansion
    }

    /// Whether any expanded alternative glob-matches `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.globs.iter().any(|glob| glob.matches(name))
    }
}

impl PartialEq for PatternGroup {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.raw == other.raw
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Default accumulator options for gauges.
    pub gauge: StatisticsOptions,
    /// Default accumulator options for counters.
    pub counter: StatisticsOptions,
    /// Default timer options.
    pub timer: TimerOptions,
    /// Snapshot publish interval in milliseconds; 0 disables periodic dumps.
    pub dump_interval_ms: u64,
    /// Master switch; `initialize` is a no-op when false.
    pub enable: bool,
    /// Event queue drop-policy threshold; `None` (the default) never sheds.
    pub queue_size: Option<usize>,
    patterns: Vec<PatternGroup>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gauge: StatisticsOptions::default(),
            counter: StatisticsOptions::default(),
            timer: TimerOptions::default(),
            dump_interval_ms: DEFAULT_DUMP_INTERVAL_MS,
            enable: true,
            queue_size: None,
            patterns: Vec::new(),
        }
    }
}

fn section<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| HandyError::config(format!("invalid '{name}' section: {e}")))
}

impl Config {
    /// Parse a configuration document.
    pub fn from_json(text: &str) -> Result<Config> {
        let root: Value = serde_json::from_str(text)?;
        let object = root
            .as_object()
            .ok_or_else(|| HandyError::config("configuration must be a JSON object"))?;

        let mut config = Config::default();

        // Legacy format sections.
        if let Some(value) = object.get("statistics") {
            let patch: StatisticsPatch = section("statistics", value)?;
            config.apply_defaults(&patch)?;
        }
        if let Some(value) = object.get("metrics") {
            let metrics = value
                .as_object()
                .ok_or_else(|| HandyError::config("'metrics' must be an object"))?;
            for (key, value) in metrics {
                match key.as_str() {
                    "gauge" => {
                        let gauge: ValuesSection = section("metrics.gauge", value)?;
                        apply_values(&gauge.values, &mut config.gauge)?;
                    },
                    "counter" => {
                        let counter: ValuesSection = section("metrics.counter", value)?;
                        apply_values(&counter.values, &mut config.counter)?;
                    },
                    "timer" => {
                        let timer: MetricSection = section("metrics.timer", value)?;
                        apply_timer(&timer, &mut config.timer)?;
                    },
                    other => {
                        return Err(HandyError::config(format!(
                            "unknown metric type '{other}' in 'metrics' section"
                        )));
                    },
                }
            }
        }
        if let Some(value) = object.get("metrics-dump") {
            let dump: DumpSection = section("metrics-dump", value)?;
            if let Some(interval) = dump.interval {
                config.dump_interval_ms = interval;
            }
        }
        if let Some(value) = object.get("core") {
            let core: CoreSection = section("core", value)?;
            if let Some(enable) = core.enable {
                config.enable = enable;
            }
            if let Some(size) = core.queue_size {
                config.queue_size = Some(positive_queue_size(size)?);
            }
        }

        // Flat format sections override the legacy ones.
        if let Some(value) = object.get("defaults") {
            let patch: StatisticsPatch = section("defaults", value)?;
            config.apply_defaults(&patch)?;
        }
        if let Some(value) = object.get("gauge") {
            let gauge: ValuesSection = section("gauge", value)?;
            apply_values(&gauge.values, &mut config.gauge)?;
        }
        if let Some(value) = object.get("counter") {
            let counter: ValuesSection = section("counter", value)?;
            apply_values(&counter.values, &mut config.counter)?;
        }
        if let Some(value) = object.get("timer") {
            let timer: MetricSection = section("timer", value)?;
            apply_timer(&timer, &mut config.timer)?;
        }
        if let Some(value) = object.get("dump-interval") {
            config.dump_interval_ms = value
                .as_u64()
                .ok_or_else(|| HandyError::config("'dump-interval' must be an unsigned integer"))?;
        }
        if let Some(value) = object.get("enable") {
            config.enable = value
                .as_bool()
                .ok_or_else(|| HandyError::config("'enable' must be a boolean"))?;
        }
        if let Some(value) = object.get("queue-size") {
            let size = value
                .as_u64()
                .ok_or_else(|| HandyError::config("'queue-size' must be an unsigned integer"))?;
            config.queue_size = Some(positive_queue_size(size as usize)?);
        }

        // Everything else is a pattern, bound in declaration order. Pattern
        // options resolve against the per-type defaults settled above.
        for (key, value) in object {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let expansion = pattern::expand_pattern(key)?;
            let globs = pattern::compile_globs(&expansion)?;
            let overrides: MetricSection = section(key, value)?;

            let mut gauge = config.gauge.clone();
            apply_values(&overrides.values, &mut gauge)?;
            let mut counter = config.counter.clone();
            apply_values(&overrides.values, &mut counter)?;
            let mut timer = config.timer.clone();
            apply_timer(&overrides, &mut timer)?;

            config.patterns.push(PatternGroup {
                source: key.clone(),
                expansion,
                globs,
                raw: value.clone(),
                gauge,
                counter,
                timer,
            });
        }

        Ok(config)
    }

    /// Parse a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Config::from_json(&text)
    }

    fn apply_defaults(&mut self, patch: &StatisticsPatch) -> Result<()> {
        patch.apply(&mut self.gauge)?;
        patch.apply(&mut self.counter)?;
        patch.apply(&mut self.timer.values)
    }

    /// Re-serialize as the flat format.
    pub fn to_json(&self) -> Value {
        let mut root = json!({
            "gauge": { "values": statistics_to_json(&self.gauge) },
            "counter": { "values": statistics_to_json(&self.counter) },
            "timer": {
                "values": statistics_to_json(&self.timer.values),
                "idle-timeout-ms": self.timer.idle_timeout_ms,
            },
            "dump-interval": self.dump_interval_ms,
            "enable": self.enable,
        });
        let object = root.as_object_mut().expect("flat config is an object");
        if let Some(size) = self.queue_size {
            object.insert("queue-size".to_owned(), json!(size));
        }
        for group in &self.patterns {
            object.insert(group.source.clone(), group.raw.clone());
        }
        root
    }

    /// The configured patterns, in declaration order.
    pub fn patterns(&self) -> &[PatternGroup] {
        &self.patterns
    }

    fn select_pattern(&self, name: &str) -> Option<&PatternGroup> {
        self.patterns.iter().find(|group| group.matches(name))
    }

    /// Effective accumulator options for a gauge named `name`.
    pub fn gauge_options_for(&self, name: &str) -> &StatisticsOptions {
        self.select_pattern(name)
            .map(|group| &group.gauge)
            .unwrap_or(&self.gauge)
    }

    /// Effective accumulator options for a counter named `name`.
    pub fn counter_options_for(&self, name: &str) -> &StatisticsOptions {
        self.select_pattern(name)
            .map(|group| &group.counter)
            .unwrap_or(&self.counter)
    }

    /// Effective options for a timer named `name`.
    pub fn timer_options_for(&self, name: &str) -> &TimerOptions {
        self.select_pattern(name)
            .map(|group| &group.timer)
            .unwrap_or(&self.timer)
    }
}

fn positive_queue_size(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(HandyError::config("queue-size must be positive"));
    }
    Ok(size)
}

fn apply_values(patch: &Option<StatisticsPatch>, target: &mut StatisticsOptions) -> Result<()> {
    if let Some(patch) = patch {
        patch.apply(target)?;
    }
    Ok(())
}

fn apply_timer(section: &MetricSection, target: &mut TimerOptions) -> Result<()> {
    apply_values(&section.values, &mut target.values)?;
    if let Some(timeout) = section.idle_timeout_ms {
        if timeout == 0 {
            return Err(HandyError::config("idle-timeout-ms must be positive"));
        }
        target.idle_timeout_ms = timeout;
    }
    Ok(())
}

fn statistics_to_json(options: &StatisticsOptions) -> Value {
    json!({
        "tags": options.tags.names(),
        "moving-interval-ms": options.moving_interval_ms,
        "histogram-bins": options.histogram_bins,
        "quantile-probs": options.quantile_probs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.enable);
        assert_eq!(config.dump_interval_ms, DEFAULT_DUMP_INTERVAL_MS);
        assert_eq!(config.timer.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert!(config.gauge.tags.contains(Tag::Value));
        assert!(config.gauge.tags.contains(Tag::Timestamp));
        assert!(!config.gauge.tags.contains(Tag::Avg));
    }

    #[test]
    fn test_flat_format() {
        let config = Config::from_json(
            r#"{
                "enable": false,
                "dump-interval": 250,
                "gauge": { "values": { "tags": ["count", "avg"] } },
                "timer": { "idle-timeout-ms": 5000 }
            }"#,
        )
        .unwrap();

        assert!(!config.enable);
        assert_eq!(config.dump_interval_ms, 250);
        assert_eq!(config.gauge.tags.names(), vec!["count", "avg"]);
        assert_eq!(config.timer.idle_timeout_ms, 5_000);
        // counter untouched by the gauge section
        assert!(config.counter.tags.contains(Tag::Value));
        assert!(!config.counter.tags.contains(Tag::Avg));
    }

    #[test]
    fn test_legacy_format() {
        let config = Config::from_json(
            r#"{
                "statistics": { "moving-interval-ms": 3000 },
                "metrics": {
                    "gauge": { "values": { "tags": ["value"] } },
                    "timer": { "idle-timeout-ms": 2000 }
                },
                "metrics-dump": { "interval": 500 },
                "core": { "enable": true }
            }"#,
        )
        .unwrap();

        assert!(config.enable);
        assert_eq!(config.dump_interval_ms, 500);
        // the statistics block reaches every metric type
        assert_eq!(config.gauge.moving_interval_ms, 3_000);
        assert_eq!(config.counter.moving_interval_ms, 3_000);
        assert_eq!(config.timer.values.moving_interval_ms, 3_000);
        assert_eq!(config.gauge.tags.names(), vec!["value"]);
        assert_eq!(config.timer.idle_timeout_ms, 2_000);
    }

    #[test]
    fn test_pattern_options() {
        let config = Config::from_json(
            r#"{
                "gauge": { "values": { "tags": ["value"] } },
                "req.{a,b}": { "values": { "tags": ["count", "avg"] } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.patterns().len(), 1);
        assert_eq!(config.patterns()[0].expansion(), ["req.a", "req.b"]);

        assert_eq!(config.gauge_options_for("req.a").tags.names(), vec!["count", "avg"]);
        assert_eq!(config.gauge_options_for("req.b").tags.names(), vec!["count", "avg"]);
        assert_eq!(config.gauge_options_for("req.c").tags.names(), vec!["value"]);
    }

    #[test]
    fn test_pattern_glob_matching() {
        let config = Config::from_json(
            r#"{
                "db.*.latency": { "values": { "tags": ["count"] } }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.timer_options_for("db.primary.latency").values.tags.names(),
            vec!["count"]
        );
        assert_eq!(
            config.timer_options_for("db.primary.errors").values,
            config.timer.values
        );
    }

    #[test]
    fn test_first_declared_pattern_wins() {
        let config = Config::from_json(
            r#"{
                "svc.a": { "values": { "tags": ["count"] } },
                "svc.*": { "values": { "tags": ["sum"] } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.gauge_options_for("svc.a").tags.names(), vec!["count"]);
        assert_eq!(config.gauge_options_for("svc.b").tags.names(), vec!["sum"]);
    }

    #[test]
    fn test_malformed_pattern_rejects_document() {
        assert!(Config::from_json(r#"{ "req.{a,b": {} }"#).is_err());
        assert!(Config::from_json(r#"{ "req.a}": {} }"#).is_err());
    }

    #[test]
    fn test_malformed_json_rejects_document() {
        assert!(Config::from_json("{ not json").is_err());
        assert!(Config::from_json("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        assert!(Config::from_json(r#"{ "gauge": { "valuez": {} } }"#).is_err());
        assert!(Config::from_json(r#"{ "gauge": { "values": { "tags": ["bogus"] } } }"#).is_err());
        assert!(Config::from_json(r#"{ "gauge": { "idle-timeout-ms": 5 } }"#).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_json(r#"{ "defaults": { "moving-interval-ms": 0 } }"#).is_err());
        assert!(Config::from_json(r#"{ "defaults": { "histogram-bins": 0 } }"#).is_err());
        assert!(Config::from_json(r#"{ "defaults": { "quantile-probs": [1.5] } }"#).is_err());
        assert!(Config::from_json(r#"{ "queue-size": 0 }"#).is_err());
        assert!(Config::from_json(r#"{ "queue-size": "lots" }"#).is_err());
    }

    #[test]
    fn test_queue_size_in_both_formats() {
        let config = Config::default();
        assert_eq!(config.queue_size, None);

        let flat = Config::from_json(r#"{ "queue-size": 8192 }"#).unwrap();
        assert_eq!(flat.queue_size, Some(8192));

        let legacy = Config::from_json(r#"{ "core": { "queue-size": 8192 } }"#).unwrap();
        assert_eq!(legacy.queue_size, Some(8192));
        assert_eq!(flat, legacy);
    }

    #[test]
    fn test_roundtrip_preserves_options() {
        let original = Config::from_json(
            r#"{
                "enable": true,
                "dump-interval": 100,
                "queue-size": 2048,
                "defaults": { "moving-interval-ms": 5000 },
                "counter": { "values": { "tags": ["value", "rate"] } },
                "timer": { "idle-timeout-ms": 750 },
                "q.{fast,slow}": { "values": { "tags": ["count", "quantile"], "histogram-bins": 10 } }
            }"#,
        )
        .unwrap();

        let serialized = original.to_json().to_string();
        let reparsed = Config::from_json(&serialized).unwrap();
        assert_eq!(original, reparsed);
    }
}
