//! Statistical aggregation over the press stream.
//!
//! Per-key, per-digraph and per-word updates are buffered while a burst
//! is open and flushed only when it closes. A burst that fails the
//! realistic-WPM gate discards its whole buffer, so no trace of it ever
//! reaches storage.

use crate::analyzer::Analyzer;
use crate::config::ConfigHandle;
use crate::engine::burst::ClosedBurst;
use crate::engine::words::FinalizedWord;
use crate::error::Result;
use crate::keymap::is_letter_key;
use crate::notify::{Notifier, WorstLetterChange};
use crate::storage::{HighScoreRow, LocalStore};
use crate::util::{date_string_for_ms, now_ms};
use std::sync::Arc;
use tracing::debug;

struct KeySample {
    keycode: u16,
    key_name: String,
    layout: String,
    interval_ms: f64,
}

struct DigraphSample {
    first_keycode: u16,
    first_key: String,
    second_keycode: u16,
    second_key: String,
    layout: String,
    interval_ms: f64,
}

struct PrevPress {
    keycode: u16,
    key_name: String,
    timestamp_ms: i64,
}

pub struct Aggregator {
    store: Arc<LocalStore>,
    config: ConfigHandle,
    notifier: Arc<Notifier>,
    pending_keys: Vec<KeySample>,
    pending_digraphs: Vec<DigraphSample>,
    pending_words: Vec<FinalizedWord>,
    prev_press: Option<PrevPress>,
    /// `(keycode, avg_press_time)` of the last reported slowest letter.
    worst_letter: Option<(u16, String, f64)>,
}

impl Aggregator {
    pub fn new(store: Arc<LocalStore>, config: ConfigHandle, notifier: Arc<Notifier>) -> Self {
        Aggregator {
            store,
            config,
            notifier,
            pending_keys: Vec::new(),
            pending_digraphs: Vec::new(),
            pending_words: Vec::new(),
            prev_press: None,
            worst_letter: None,
        }
    }

    /// Feeds one press. `continues_burst` is whether this press extends
    /// the burst the previous press belonged to; the first press of a
    /// burst contributes no interval sample.
    pub fn on_press(
        &mut self,
        keycode: u16,
        key_name: &str,
        timestamp_ms: i64,
        layout: &str,
        continues_burst: bool,
    ) {
        if continues_burst {
            if let Some(prev) = &self.prev_press {
                let interval_ms = (timestamp_ms - prev.timestamp_ms).max(0) as f64;
                self.pending_keys.push(KeySample {
                    keycode,
                    key_name: key_name.to_string(),
                    layout: layout.to_string(),
                    interval_ms,
                });
                // Digraphs are bounded to alphabetic pairs.
                if is_letter_key(&prev.key_name) && is_letter_key(key_name) {
                    self.pending_digraphs.push(DigraphSample {
                        first_keycode: prev.keycode,
                        first_key: prev.key_name.clone(),
                        second_keycode: keycode,
                        second_key: key_name.to_string(),
                        layout: layout.to_string(),
                        interval_ms,
                    });
                }
            }
        }
        self.prev_press = Some(PrevPress {
            keycode,
            key_name: key_name.to_string(),
            timestamp_ms,
        });
    }

    /// Buffers a finalized word for the open burst.
    pub fn on_word(&mut self, word: FinalizedWord) {
        self.pending_words.push(word);
    }

    /// Handles a closed burst: unrealistic gate first, then the buffered
    /// stat flush, then persistence of the burst itself when it met the
    /// minimum criteria.
    pub fn on_burst_closed(&mut self, closed: &ClosedBurst, layout: &str) -> Result<()> {
        self.prev_press = None;
        let burst = &closed.burst;
        let wpm = burst.wpm();

        let config = self.config.snapshot();
        if wpm > f64::from(config.max_realistic_wpm) {
            let discarded =
                self.pending_keys.len() + self.pending_digraphs.len() + self.pending_words.len();
            self.pending_keys.clear();
            self.pending_digraphs.clear();
            self.pending_words.clear();
            debug!(
                wpm = format_args!("{wpm:.1}"),
                discarded, "dropping unrealistic burst"
            );
            self.notifier.unrealistic_burst(wpm, burst.key_count);
            return Ok(());
        }

        self.flush_pending()?;

        if !closed.meets_minimum {
            return Ok(());
        }

        self.store.insert_burst(burst, wpm)?;
        let date = date_string_for_ms(burst.start_ms);
        if burst.qualifies_for_high_score {
            self.store.insert_high_score(&HighScoreRow {
                date: date.clone(),
                fastest_burst_wpm: wpm,
                burst_duration_sec: burst.duration_ms as f64 / 1000.0,
                burst_duration_ms: burst.duration_ms,
                burst_key_count: burst.key_count,
                timestamp: burst.start_ms,
            })?;
        }
        self.store.accumulate_daily(&date, burst, wpm)?;

        let analyzer = Analyzer::new(&self.store);
        let percentile_95 = analyzer.burst_wpm_percentile(95)?;
        self.notifier.burst_recorded(burst, wpm, percentile_95);

        self.check_worst_letter(&date, layout)?;
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        let now = now_ms();
        for sample in self.pending_keys.drain(..) {
            self.store.record_key_interval(
                sample.keycode,
                &sample.key_name,
                &sample.layout,
                sample.interval_ms,
                now,
            )?;
        }
        for sample in self.pending_digraphs.drain(..) {
            self.store.record_digraph_interval(
                sample.first_keycode,
                &sample.first_key,
                sample.second_keycode,
                &sample.second_key,
                &sample.layout,
                sample.interval_ms,
                now,
            )?;
        }
        for word in self.pending_words.drain(..) {
            self.store.upsert_word(&word)?;
        }
        Ok(())
    }

    /// Re-queries the slowest letter and reports a change through the
    /// notifier, which applies the enable flag and debounce.
    fn check_worst_letter(&mut self, date: &str, layout: &str) -> Result<()> {
        let analyzer = Analyzer::new(&self.store);
        let Some(current) = analyzer.slowest_letter(layout)? else {
            return Ok(());
        };

        self.store
            .set_daily_slowest(date, current.keycode, &current.key_name)?;

        let previous = self.worst_letter.replace((
            current.keycode,
            current.key_name.clone(),
            current.avg_press_time,
        ));
        match previous {
            // Same letter: the average refreshed, nothing to report.
            Some((keycode, _, _)) if keycode == current.keycode => {}
            Some((_, prev_name, prev_avg)) => {
                self.notifier.worst_letter_changed(WorstLetterChange {
                    previous_key_name: Some(prev_name),
                    previous_avg_ms: Some(prev_avg),
                    improvement: current.avg_press_time < prev_avg,
                    new: current,
                });
            }
            None => {}
        }
        Ok(())
    }

    /// Drops any buffered state (shutdown after a final flush attempt).
    pub fn reset(&mut self) {
        self.pending_keys.clear();
        self.pending_digraphs.clear();
        self.pending_words.clear();
        self.prev_press = None;
    }
}
