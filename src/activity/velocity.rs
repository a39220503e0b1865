//! Output-rate sampling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::elapsed_between;
use crate::ring::RingBuffer;
use crate::tmux::strip_ansi;
use crate::{zlog_trace, Result};

/// Default number of samples kept per tracker.
pub const DEFAULT_MAX_SAMPLES: usize = 10;

/// One velocity measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocitySample {
    pub timestamp: DateTime<Utc>,
    /// Characters added since the previous capture, never negative.
    pub chars_added: usize,
    /// Chars/sec since the previous capture.
    pub velocity: f64,
}

/// Sliding window of velocity samples for one pane.
///
/// Each [`update`](Self::update) diffs the new capture against the previous
/// one by Unicode character count. Shrinking output (a cleared screen,
/// scrolled-off history) counts as zero growth, not negative.
#[derive(Debug)]
pub struct VelocityTracker {
    pane_id: String,
    samples: RingBuffer<VelocitySample>,
    last_capture: String,
    last_capture_at: Option<DateTime<Utc>>,
}

impl VelocityTracker {
    pub fn new(pane_id: impl Into<String>) -> Self {
        Self::with_capacity(pane_id, DEFAULT_MAX_SAMPLES)
    }

    /// Tracker keeping at most `max_samples` samples; zero means the default.
    pub fn with_capacity(pane_id: impl Into<String>, max_samples: usize) -> Self {
        let max_samples = if max_samples == 0 {
            DEFAULT_MAX_SAMPLES
        } else {
            max_samples
        };
        Self {
            pane_id: pane_id.into(),
            samples: RingBuffer::with_capacity(max_samples),
            last_capture: String::new(),
            last_capture_at: None,
        }
    }

    pub fn pane_id(&self) -> &str {
        &self.pane_id
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Take a new sample at `now` using `capture` to read the pane.
    ///
    /// A capture error is returned as-is and leaves the tracker untouched.
    pub fn update<F>(&mut self, now: DateTime<Utc>, capture: F) -> Result<VelocitySample>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let raw = capture(&self.pane_id)?;
        let clean = strip_ansi(&raw);

        let current = clean.chars().count();
        let previous = self.last_capture.chars().count();
        let chars_added = current.saturating_sub(previous);

        let velocity = match self.last_capture_at {
            Some(prev_at) => {
                let elapsed = elapsed_between(prev_at, now).as_secs_f64();
                if elapsed > 0.0 {
                    chars_added as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let sample = VelocitySample {
            timestamp: now,
            chars_added,
            velocity,
        };
        self.samples.push(sample);
        zlog_trace!(
            "velocity pane={} chars={} added={} v={:.2}",
            self.pane_id,
            current,
            chars_added,
            velocity
        );

        self.last_capture = clean;
        self.last_capture_at = Some(now);
        Ok(sample)
    }

    /// Velocity of the newest sample, or 0.
    pub fn current_velocity(&self) -> f64 {
        self.samples.last().map(|s| s.velocity).unwrap_or(0.0)
    }

    /// Mean velocity over the whole window, or 0 with no samples.
    pub fn average_velocity(&self) -> f64 {
        self.recent_velocity(self.samples.len())
    }

    /// Mean velocity over the newest `n` samples. `n` of zero or larger than
    /// the window uses every sample.
    pub fn recent_velocity(&self, n: usize) -> f64 {
        let len = self.samples.len();
        if len == 0 {
            return 0.0;
        }
        let n = if n == 0 || n > len { len } else { n };
        let sum: f64 = self.samples.iter().rev().take(n).map(|s| s.velocity).sum();
        sum / n as f64
    }

    /// How long since output last grew, as seen from `now`.
    ///
    /// Zero before the first capture. When no retained sample added output,
    /// this is the age of the oldest retained sample, so it never exceeds
    /// the span of the window.
    pub fn last_output_age(&self, now: DateTime<Utc>) -> Duration {
        let Some(last_capture_at) = self.last_capture_at else {
            return Duration::ZERO;
        };

        if let Some(at) = self.last_output_time() {
            return elapsed_between(at, now);
        }
        match self.samples.first() {
            Some(oldest) => elapsed_between(oldest.timestamp, now),
            None => elapsed_between(last_capture_at, now),
        }
    }

    /// Timestamp of the newest sample that added output.
    pub fn last_output_time(&self) -> Option<DateTime<Utc>> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.chars_added > 0)
            .map(|s| s.timestamp)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Copy of the window, oldest first.
    pub fn samples(&self) -> Vec<VelocitySample> {
        self.samples.to_vec()
    }

    /// Control-sequence-free text of the last capture.
    pub fn last_capture(&self) -> &str {
        &self.last_capture
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_capture.clear();
        self.last_capture_at = None;
    }
}
