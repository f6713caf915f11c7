//! Burst detection: grouping presses into runs of continuous typing.
//!
//! A burst is a maximal run of presses where no inter-press gap exceeds
//! the configured timeout. The detector holds at most one open burst and
//! completes it when the next press arrives after the timeout, when the
//! timeout elapses with no press at all, or on shutdown flush.

use crate::config::{Config, DurationMethod};
use tracing::warn;

/// Timestamp regressions up to this size are treated as benign clock skew;
/// anything larger is logged before being clamped.
const TIMESTAMP_SKEW_MS: i64 = 50;

/// A completed run of continuous typing.
#[derive(Debug, Clone, PartialEq)]
pub struct Burst {
    pub start_ms: i64,
    pub end_ms: i64,
    pub key_count: u32,
    pub backspace_count: u32,
    pub duration_ms: i64,
    pub qualifies_for_high_score: bool,
    pub key_timestamps_ms: Vec<i64>,
}

impl Burst {
    fn open_at(timestamp_ms: i64) -> Self {
        Burst {
            start_ms: timestamp_ms,
            end_ms: timestamp_ms,
            key_count: 1,
            backspace_count: 0,
            duration_ms: 0,
            qualifies_for_high_score: false,
            key_timestamps_ms: vec![timestamp_ms],
        }
    }

    /// Presses that produced visible text: each backspace removes one
    /// character and itself cost one press. Floored at zero.
    #[inline]
    pub fn net_key_count(&self) -> u32 {
        self.key_count.saturating_sub(2 * self.backspace_count)
    }

    /// Share of presses that were corrections.
    #[inline]
    pub fn backspace_ratio(&self) -> f64 {
        if self.key_count == 0 {
            0.0
        } else {
            f64::from(self.backspace_count) / f64::from(self.key_count)
        }
    }

    /// Words per minute over net keystrokes, five characters per word.
    #[inline]
    pub fn wpm(&self) -> f64 {
        calculate_wpm(self.net_key_count(), self.duration_ms)
    }
}

/// `(net / 5) / (duration / 60000)`, zero when the duration is zero.
#[inline]
pub fn calculate_wpm(net_key_count: u32, duration_ms: i64) -> f64 {
    if duration_ms <= 0 {
        return 0.0;
    }
    let words = f64::from(net_key_count) / 5.0;
    let minutes = duration_ms as f64 / 60_000.0;
    words / minutes
}

/// A closed burst together with its persistence gate verdict.
///
/// Sub-minimum segments still carry their buffered statistics forward but
/// never produce a burst row.
#[derive(Debug, Clone)]
pub struct ClosedBurst {
    pub burst: Burst,
    pub meets_minimum: bool,
}

pub struct BurstDetector {
    burst_timeout_ms: i64,
    high_score_min_duration_ms: i64,
    duration_method: DurationMethod,
    active_time_threshold_ms: i64,
    min_key_count: u32,
    min_duration_ms: i64,
    current: Option<Burst>,
    last_key_time_ms: Option<i64>,
}

impl BurstDetector {
    pub fn new(config: &Config) -> Self {
        BurstDetector {
            burst_timeout_ms: config.burst_timeout_ms,
            high_score_min_duration_ms: config.high_score_min_duration_ms,
            duration_method: config.burst_duration_calculation,
            active_time_threshold_ms: config.active_time_threshold_ms,
            min_key_count: config.min_burst_key_count,
            min_duration_ms: config.min_burst_duration_ms,
            current: None,
            last_key_time_ms: None,
        }
    }

    /// Feeds one press. Returns the previous burst when this press closed it.
    pub fn on_press(&mut self, timestamp_ms: i64, is_backspace: bool) -> Option<ClosedBurst> {
        let Some(last) = self.last_key_time_ms else {
            self.last_key_time_ms = Some(timestamp_ms);
            let mut burst = Burst::open_at(timestamp_ms);
            if is_backspace {
                burst.backspace_count = 1;
            }
            self.current = Some(burst);
            return None;
        };

        // Clamp out-of-order timestamps so the stored sequence stays
        // nondecreasing; regressions beyond benign skew get logged.
        let effective_ms = if timestamp_ms < last {
            if last - timestamp_ms > TIMESTAMP_SKEW_MS {
                warn!(
                    regression_ms = last - timestamp_ms,
                    "negative duration between presses, clamping to 0"
                );
            }
            last
        } else {
            timestamp_ms
        };
        let gap = effective_ms - last;

        if gap > self.burst_timeout_ms {
            let closed = self.close_current();
            let mut burst = Burst::open_at(timestamp_ms);
            if is_backspace {
                burst.backspace_count = 1;
            }
            self.current = Some(burst);
            self.last_key_time_ms = Some(timestamp_ms);
            return closed;
        }

        if let Some(burst) = self.current.as_mut() {
            burst.key_count += 1;
            if is_backspace {
                burst.backspace_count += 1;
            }
            burst.end_ms = effective_ms;
            burst.key_timestamps_ms.push(effective_ms);
            burst.duration_ms = compute_duration(
                burst,
                self.duration_method,
                self.active_time_threshold_ms,
            );
        }
        self.last_key_time_ms = Some(effective_ms);
        None
    }

    /// Closes the open burst if the timeout has elapsed with no press.
    /// Called from the consumer's idle ticks so a burst does not wait for
    /// the next keystroke to be accounted.
    pub fn poll_timeout(&mut self, now_ms: i64) -> Option<ClosedBurst> {
        let last = self.last_key_time_ms?;
        if now_ms - last > self.burst_timeout_ms {
            let closed = self.close_current();
            self.last_key_time_ms = None;
            return closed;
        }
        None
    }

    /// Unconditionally closes the open burst (shutdown drain).
    pub fn flush(&mut self) -> Option<ClosedBurst> {
        let closed = self.close_current();
        self.last_key_time_ms = None;
        closed
    }

    /// Whether a press at `timestamp_ms` continues the open burst.
    /// Mirrors the gap rule so callers can attribute inter-press intervals.
    pub fn continues_burst(&self, timestamp_ms: i64) -> bool {
        match self.last_key_time_ms {
            Some(last) => (timestamp_ms - last).max(0) <= self.burst_timeout_ms,
            None => false,
        }
    }

    fn close_current(&mut self) -> Option<ClosedBurst> {
        let mut burst = self.current.take()?;
        if burst.key_count == 0 {
            return None;
        }
        if let Some(last) = self.last_key_time_ms {
            burst.end_ms = last;
        }
        burst.duration_ms = compute_duration(
            &burst,
            self.duration_method,
            self.active_time_threshold_ms,
        );
        burst.qualifies_for_high_score = burst.duration_ms >= self.high_score_min_duration_ms;

        let meets_minimum =
            burst.key_count >= self.min_key_count && burst.duration_ms >= self.min_duration_ms;
        Some(ClosedBurst {
            burst,
            meets_minimum,
        })
    }
}

fn compute_duration(burst: &Burst, method: DurationMethod, active_threshold_ms: i64) -> i64 {
    if burst.key_timestamps_ms.len() < 2 {
        return 0;
    }
    match method {
        DurationMethod::TotalTime => burst.end_ms - burst.start_ms,
        DurationMethod::ActiveTime => burst
            .key_timestamps_ms
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|gap| *gap <= active_threshold_ms)
            .sum(),
    }
}
