//! Notification gating and the event interface to the external shell.
//!
//! The core never talks to a UI directly. It emits domain events through
//! [`EventSink`]; the shell implements the sink and decides presentation.
//! Gating (enable flags, debounce, the daily `summary_sent` flag) lives
//! here so every shell gets identical semantics.

use crate::config::ConfigHandle;
use crate::engine::burst::Burst;
use crate::error::Result;
use crate::storage::{DailySummaryRow, KeyStatRow, LocalStore, SyncLogRow};
use chrono::{Local, Timelike};
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// The slowest letter moved to a different key.
#[derive(Debug, Clone)]
pub struct WorstLetterChange {
    pub previous_key_name: Option<String>,
    pub previous_avg_ms: Option<f64>,
    pub new: KeyStatRow,
    /// True when the new worst letter is still faster than the old one was.
    pub improvement: bool,
}

/// Narrow event interface implemented by the external shell.
/// Default bodies are no-ops so shells subscribe selectively.
pub trait EventSink: Send + Sync {
    fn on_burst(&self, _burst: &Burst, _wpm: f64) {}
    fn on_unrealistic(&self, _wpm: f64, _key_count: u32) {}
    fn on_exceptional_burst(&self, _wpm: f64, _threshold_wpm: f64) {}
    fn on_worst_letter_change(&self, _change: &WorstLetterChange) {}
    fn on_daily_summary(&self, _summary: &DailySummaryRow) {}
    fn on_sync_result(&self, _entry: &SyncLogRow) {}
}

/// Headless sink used when no shell is attached: events become log lines.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_burst(&self, burst: &Burst, wpm: f64) {
        info!(
            key_count = burst.key_count,
            duration = %crate::util::format_ms(burst.duration_ms.max(0) as u64),
            wpm = format_args!("{wpm:.1}"),
            "burst recorded"
        );
    }

    fn on_unrealistic(&self, wpm: f64, key_count: u32) {
        info!(
            wpm = format_args!("{wpm:.1}"),
            key_count, "unrealistic burst dropped"
        );
    }

    fn on_exceptional_burst(&self, wpm: f64, threshold_wpm: f64) {
        info!(
            wpm = format_args!("{wpm:.1}"),
            threshold = format_args!("{threshold_wpm:.1}"),
            "exceptional burst"
        );
    }

    fn on_worst_letter_change(&self, change: &WorstLetterChange) {
        info!(
            previous = change.previous_key_name.as_deref().unwrap_or("-"),
            new = %change.new.key_name,
            improvement = change.improvement,
            "worst letter changed"
        );
    }

    fn on_daily_summary(&self, summary: &DailySummaryRow) {
        info!(
            date = %summary.date,
            keystrokes = summary.total_keystrokes,
            bursts = summary.total_bursts,
            avg_wpm = format_args!("{:.1}", summary.avg_wpm),
            "daily summary"
        );
    }

    fn on_sync_result(&self, entry: &SyncLogRow) {
        info!(
            pushed = entry.pushed,
            pulled = entry.pulled,
            merged = entry.merged,
            duration_ms = entry.duration_ms,
            error = entry.error.as_deref().unwrap_or(""),
            "sync finished"
        );
    }
}

struct NotifierState {
    last_worst_letter_notified: Option<Instant>,
}

pub struct Notifier {
    sink: Box<dyn EventSink>,
    config: ConfigHandle,
    state: Mutex<NotifierState>,
}

impl Notifier {
    pub fn new(sink: Box<dyn EventSink>, config: ConfigHandle) -> Self {
        Notifier {
            sink,
            config,
            state: Mutex::new(NotifierState {
                last_worst_letter_notified: None,
            }),
        }
    }

    /// A burst passed all gates and was persisted. Also fires the
    /// exceptional-burst event when the WPM clears the rolling percentile
    /// and the burst qualifies for a high score.
    pub fn burst_recorded(&self, burst: &Burst, wpm: f64, percentile_95: Option<f64>) {
        self.sink.on_burst(burst, wpm);
        if burst.qualifies_for_high_score {
            if let Some(threshold) = percentile_95 {
                if threshold > 0.0 && wpm >= threshold {
                    self.sink.on_exceptional_burst(wpm, threshold);
                }
            }
        }
    }

    /// A burst exceeded the realistic-WPM ceiling and was dropped.
    pub fn unrealistic_burst(&self, wpm: f64, key_count: u32) {
        self.sink.on_unrealistic(wpm, key_count);
    }

    /// The slowest letter changed. Emits when enabled and outside the
    /// debounce window.
    pub fn worst_letter_changed(&self, change: WorstLetterChange) {
        let config = self.config.snapshot();
        if !config.worst_letter_notifications_enabled {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(last) = state.last_worst_letter_notified {
            if last.elapsed() < config.worst_letter_debounce() {
                return;
            }
        }
        state.last_worst_letter_notified = Some(Instant::now());
        drop(state);
        self.sink.on_worst_letter_change(&change);
    }

    /// Fires today's summary once the configured local hour has passed.
    /// Debounced by the `summary_sent` flag on the rollup row.
    pub fn daily_summary_check(&self, store: &LocalStore) -> Result<()> {
        let config = self.config.snapshot();
        let now = Local::now();
        if now.hour() < u32::from(config.notification_time_hour) {
            return Ok(());
        }
        let date = crate::util::today_string();
        let Some(summary) = store.get_daily_summary(&date)? else {
            return Ok(());
        };
        if summary.summary_sent {
            return Ok(());
        }
        store.mark_summary_sent(&date)?;
        self.sink.on_daily_summary(&summary);
        Ok(())
    }

    pub fn sync_finished(&self, entry: &SyncLogRow) {
        self.sink.on_sync_result(entry);
    }
}
