//! Clock correlation between the local host clock and a peer's clock.
//!
//! A [`ClockCorrelator`] keeps a bounded window of [`ClockSample`]s, each a
//! `(local_time, remote_time)` pair measured at the midpoint of a beacon
//! round trip. The offset estimate is the median of the per-sample offsets,
//! which tolerates the occasional sample delayed by a retransmission.
//!
//! All times are nanoseconds. Local times come from the monotonic host
//! clock, never from the wall clock.
//!
//! Conversions never fail: with too few samples they fall back to the best
//! value available and [`ClockCorrelator::is_reliable`] reports `false`.

use serde::Deserialize;
use std::collections::VecDeque;
use thiserror::Error;
use wist_sync_types::SharedTime;

/// Minimum number of samples for an offset estimate.
pub const MIN_SAMPLES: usize = 2;

/// Clock correlation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Not enough samples recorded yet.
    #[error("clock correlation unavailable ({samples} of {MIN_SAMPLES} samples)")]
    Unavailable {
        /// Samples currently held.
        samples: usize,
    },
}

/// Tunables for a [`ClockCorrelator`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CorrelatorSettings {
    /// Number of most recent samples kept (default: 8).
    #[serde(default = "default_window")]
    pub window: usize,
    /// Confidence below which conversions are provisional (default: 0.5).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Sample spread (ns) at which confidence is halved (default: 2ms).
    #[serde(default = "default_spread_tolerance_ns")]
    pub spread_tolerance_ns: u64,
}

fn default_window() -> usize {
    8
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_spread_tolerance_ns() -> u64 {
    2_000_000 // 2ms
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            confidence_threshold: default_confidence_threshold(),
            spread_tolerance_ns: default_spread_tolerance_ns(),
        }
    }
}

/// One measured correspondence between the two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Local host time (ns).
    pub local_time: u64,
    /// Remote clock reading at the same instant (ns).
    pub remote_time: u64,
}

impl ClockSample {
    /// Remote minus local, in nanoseconds.
    pub fn offset(&self) -> i128 {
        self.remote_time as i128 - self.local_time as i128
    }
}

/// Result of [`ClockCorrelator::estimate_offset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetEstimate {
    /// Shared minus local time (ns).
    pub offset: i64,
    /// Median absolute deviation of the sample offsets (ns).
    pub spread: u64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Number of samples the estimate is based on.
    pub samples: usize,
}

/// Converts between local host time and the shared time base of one peer.
#[derive(Debug, Clone)]
pub struct ClockCorrelator {
    settings: CorrelatorSettings,
    samples: VecDeque<ClockSample>,
    estimate: Option<OffsetEstimate>,
}

impl ClockCorrelator {
    /// Create an empty correlator.
    pub fn new(settings: CorrelatorSettings) -> Self {
        let window = settings.window.max(MIN_SAMPLES);
        Self {
            settings: CorrelatorSettings { window, ..settings },
            samples: VecDeque::with_capacity(window),
            estimate: None,
        }
    }

    /// Ingest one sample, evicting the oldest beyond the window.
    pub fn record_sample(&mut self, local_time: u64, remote_time: u64) {
        if self.samples.len() == self.settings.window {
            self.samples.pop_front();
        }
        self.samples.push_back(ClockSample {
            local_time,
            remote_time,
        });
        self.estimate = self.compute_estimate();
    }

    /// Current offset estimate and its confidence.
    pub fn estimate_offset(&self) -> Result<OffsetEstimate, ClockError> {
        self.estimate.ok_or(ClockError::Unavailable {
            samples: self.samples.len(),
        })
    }

    /// Whether the estimate meets the configured confidence threshold.
    pub fn is_reliable(&self) -> bool {
        self.estimate
            .map(|e| e.confidence >= self.settings.confidence_threshold)
            .unwrap_or(false)
    }

    /// Convert a local host time to the shared time base.
    pub fn to_shared(&self, local_time: u64) -> SharedTime {
        SharedTime::new(shift(local_time, self.best_effort_offset()))
    }

    /// Convert a shared time to local host time.
    pub fn to_local(&self, shared_time: SharedTime) -> u64 {
        shift(shared_time.value(), -(self.best_effort_offset() as i128))
    }

    /// The samples currently held, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &ClockSample> {
        self.samples.iter()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples. The next conversion starts from scratch.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.estimate = None;
    }

    /// Offset used for conversions: the estimate, else the single sample,
    /// else zero.
    fn best_effort_offset(&self) -> i64 {
        match (self.estimate, self.samples.back()) {
            (Some(estimate), _) => estimate.offset,
            (None, Some(sample)) => clamp_i64(sample.offset()),
            (None, None) => 0,
        }
    }

    fn compute_estimate(&self) -> Option<OffsetEstimate> {
        if self.samples.len() < MIN_SAMPLES {
            return None;
        }

        let mut offsets: Vec<i128> = self.samples.iter().map(ClockSample::offset).collect();
        let offset = median(&mut offsets);

        let mut deviations: Vec<i128> = offsets.iter().map(|o| (o - offset).abs()).collect();
        let spread = median(&mut deviations).clamp(0, u64::MAX as i128) as u64;

        let fill = self.samples.len() as f64 / self.settings.window as f64;
        let tolerance = self.settings.spread_tolerance_ns.max(1) as f64;
        let confidence = (fill * tolerance / (tolerance + spread as f64)).clamp(0.0, 1.0);

        Some(OffsetEstimate {
            offset: clamp_i64(offset),
            spread,
            confidence,
            samples: self.samples.len(),
        })
    }
}

impl Default for ClockCorrelator {
    fn default() -> Self {
        Self::new(CorrelatorSettings::default())
    }
}

fn median(values: &mut [i128]) -> i128 {
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2
    } else {
        values[mid]
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn shift(time: u64, offset: impl Into<i128>) -> u64 {
    (time as i128 + offset.into()).clamp(0, u64::MAX as i128) as u64
}
