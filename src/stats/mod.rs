//! Rolling statistics accumulator.
//!
//! Each metric owns one [`Statistics`] instance. The configured tag set
//! decides which quantities allocate state and which queries are answerable;
//! asking for a disabled tag is an error, not a zero.
//!
//! Moving quantities use exponential decay with a half-life of half the
//! configured window, so no per-sample buffer is kept.

pub mod histogram;

pub use histogram::Histogram;

use crate::chrono::TimePoint;
use crate::config::StatisticsOptions;
use crate::core::{HandyError, Result};
use crate::math::Moments;

/// One statistical quantity an accumulator can maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Value,
    Min,
    Max,
    Count,
    Sum,
    Avg,
    MovingCount,
    MovingSum,
    MovingAvg,
    Histogram,
    Quantile,
    Timestamp,
    Rate,
    Entropy,
    Throughput,
}

impl Tag {
    /// Every tag, in declaration order.
    pub const ALL: [Tag; 15] = [
        Tag::Value,
        Tag::Min,
        Tag::Max,
        Tag::Count,
        Tag::Sum,
        Tag::Avg,
        Tag::MovingCount,
        Tag::MovingSum,
        Tag::MovingAvg,
        Tag::Histogram,
        Tag::Quantile,
        Tag::Timestamp,
        Tag::Rate,
        Tag::Entropy,
        Tag::Throughput,
    ];

    /// Configuration name of this tag.
    pub fn name(&self) -> &'static str {
        match self {
            Tag::Value => "value",
            Tag::Min => "min",
            Tag::Max => "max",
            Tag::Count => "count",
            Tag::Sum => "sum",
            Tag::Avg => "avg",
            Tag::MovingCount => "moving-count",
            Tag::MovingSum => "moving-sum",
            Tag::MovingAvg => "moving-avg",
            Tag::Histogram => "histogram",
            Tag::Quantile => "quantile",
            Tag::Timestamp => "timestamp",
            Tag::Rate => "rate",
            Tag::Entropy => "entropy",
            Tag::Throughput => "throughput",
        }
    }

    /// Parse a configuration name.
    pub fn from_name(name: &str) -> Option<Tag> {
        Tag::ALL.iter().copied().find(|tag| tag.name() == name)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A set of enabled tags, packed into a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagSet(u16);

impl TagSet {
    /// The empty set.
    pub const EMPTY: TagSet = TagSet(0);

    /// Returns a copy with `tag` enabled.
    pub const fn with(self, tag: Tag) -> TagSet {
        TagSet(self.0 | 1 << (tag as u16))
    }

    /// Enable `tag` in place.
    pub fn insert(&mut self, tag: Tag) {
        self.0 |= tag.bit();
    }

    /// Whether `tag` is enabled.
    pub fn contains(&self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }

    /// Whether any of `tags` is enabled.
    pub fn contains_any(&self, tags: &[Tag]) -> bool {
        tags.iter().any(|tag| self.contains(*tag))
    }

    /// Enabled tags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        Tag::ALL.iter().copied().filter(|tag| self.contains(*tag))
    }

    /// Configuration names of the enabled tags.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|tag| tag.name()).collect()
    }

    /// Parse a list of configuration names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<TagSet> {
        let mut set = TagSet::EMPTY;
        for name in names {
            let tag = Tag::from_name(name.as_ref()).ok_or_else(|| {
                HandyError::config(format!("unknown statistics tag '{}'", name.as_ref()))
            })?;
            set.insert(tag);
        }
        Ok(set)
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::EMPTY;
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

/// Tags that require exponentially-decayed moving state.
const MOVING_TAGS: [Tag; 5] = [
    Tag::MovingCount,
    Tag::MovingSum,
    Tag::MovingAvg,
    Tag::Rate,
    Tag::Throughput,
];

/// Tags that require histogram state.
const HISTOGRAM_TAGS: [Tag; 3] = [Tag::Histogram, Tag::Quantile, Tag::Entropy];

/// The rolling statistics of one metric. Single writer: the aggregator.
#[derive(Debug, Clone)]
pub struct Statistics {
    tags: TagSet,
    window_ns: f64,
    quantile_probs: Vec<f64>,

    value: f64,
    min: f64,
    max: f64,
    sum: f64,
    moments: Moments,

    moving_sum: f64,
    moving_count: f64,
    histogram: Option<Histogram>,

    timestamp: Option<TimePoint>,
}

impl Statistics {
    /// Build an accumulator; only state the tag set needs is allocated.
    pub fn new(options: &StatisticsOptions) -> Self {
        let histogram = if options.tags.contains_any(&HISTOGRAM_TAGS) {
            Some(Histogram::new(options.histogram_bins))
        } else {
            None
        };

        Self {
            tags: options.tags,
            window_ns: (options.moving_interval_ms.max(1) as f64) * 1e6,
            quantile_probs: options.quantile_probs.clone(),
            value: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            moments: Moments::new(),
            moving_sum: 0.0,
            moving_count: 0.0,
            histogram,
            timestamp: None,
        }
    }

    /// Fold a sample taken at `timestamp` into every enabled quantity.
    pub fn update(&mut self, value: f64, timestamp: TimePoint) {
        self.decay_to(timestamp);

        self.value = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.moments.push(value);

        if self.tags.contains_any(&MOVING_TAGS) {
            self.moving_sum += value;
            self.moving_count += 1.0;
        }
        if let Some(histogram) = &mut self.histogram {
            histogram.insert(value);
        }

        self.timestamp = Some(timestamp);
    }

    /// Decay moving state to `now` without adding a sample.
    fn decay_to(&mut self, now: TimePoint) {
        let Some(prev) = self.timestamp else {
            return;
        };
        if self.histogram.is_none() && !self.tags.contains_any(&MOVING_TAGS) {
            return;
        }

        let elapsed_ns = now.elapsed_since(&prev).as_nanos();
        if elapsed_ns <= 0 {
            return;
        }

        // Half-life of W/2: a sample's weight halves twice per window.
        let factor = (-(elapsed_ns as f64) / (self.window_ns / 2.0)).exp2();
        self.moving_sum *= factor;
        self.moving_count *= factor;
        if let Some(histogram) = &mut self.histogram {
            histogram.decay(factor);
        }
    }

    /// The enabled tag set.
    pub fn tags(&self) -> TagSet {
        self.tags
    }

    /// The configured quantile probes.
    pub fn quantile_probs(&self) -> &[f64] {
        &self.quantile_probs
    }

    fn check(&self, tag: Tag) -> Result<()> {
        if self.tags.contains(tag) {
            Ok(())
        } else {
            Err(HandyError::TagNotEnabled(tag.name()))
        }
    }

    /// Last sample value.
    pub fn value(&self) -> Result<f64> {
        self.check(Tag::Value)?;
        Ok(self.value)
    }

    /// Smallest sample seen; +inf before any sample.
    pub fn min(&self) -> Result<f64> {
        self.check(Tag::Min)?;
        Ok(self.min)
    }

    /// Largest sample seen; -inf before any sample.
    pub fn max(&self) -> Result<f64> {
        self.check(Tag::Max)?;
        Ok(self.max)
    }

    /// Number of samples.
    pub fn count(&self) -> Result<u64> {
        self.check(Tag::Count)?;
        Ok(self.moments.count())
    }

    /// Sum of all samples.
    pub fn sum(&self) -> Result<f64> {
        self.check(Tag::Sum)?;
        Ok(self.sum)
    }

    /// Mean of all samples.
    pub fn avg(&self) -> Result<f64> {
        self.check(Tag::Avg)?;
        Ok(self.moments.mean())
    }

    /// Decayed sample count inside the moving window.
    pub fn moving_count(&self) -> Result<f64> {
        self.check(Tag::MovingCount)?;
        Ok(self.moving_count)
    }

    /// Decayed sample sum inside the moving window.
    pub fn moving_sum(&self) -> Result<f64> {
        self.check(Tag::MovingSum)?;
        Ok(self.moving_sum)
    }

    /// Decayed mean inside the moving window.
    pub fn moving_avg(&self) -> Result<f64> {
        self.check(Tag::MovingAvg)?;
        if self.moving_count > 0.0 {
            Ok(self.moving_sum / self.moving_count)
        } else {
            Ok(0.0)
        }
    }

    /// Samples per second over the moving window.
    pub fn rate(&self) -> Result<f64> {
        self.check(Tag::Rate)?;
        Ok(self.moving_count / (self.window_ns / 1e9))
    }

    /// Summed value per second over the moving window.
    pub fn throughput(&self) -> Result<f64> {
        self.check(Tag::Throughput)?;
        Ok(self.moving_sum / (self.window_ns / 1e9))
    }

    /// The (centroid, weight) histogram bins.
    pub fn histogram(&self) -> Result<&[(f64, f64)]> {
        self.check(Tag::Histogram)?;
        Ok(self.histogram.as_ref().map(Histogram::bins).unwrap_or(&[]))
    }

    /// Approximate `p`-quantile interpolated from the histogram.
    pub fn quantile(&self, p: f64) -> Result<f64> {
        self.check(Tag::Quantile)?;
        Ok(self
            .histogram
            .as_ref()
            .map(|histogram| histogram.quantile(p))
            .unwrap_or(0.0))
    }

    /// Shannon entropy of the histogram.
    pub fn entropy(&self) -> Result<f64> {
        self.check(Tag::Entropy)?;
        Ok(self
            .histogram
            .as_ref()
            .map(Histogram::entropy)
            .unwrap_or(0.0))
    }

    /// Timestamp of the last sample; `None` before any sample.
    pub fn timestamp(&self) -> Result<Option<TimePoint>> {
        self.check(Tag::Timestamp)?;
        Ok(self.timestamp)
    }
}
