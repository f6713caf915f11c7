//! The event consumer: single-threaded owner of all aggregation state.
//!
//! Drains the bounded queue with a per-tick budget, feeds the burst
//! detector, word segmenter and aggregator, and adapts its wake interval
//! to typing activity so an idle machine costs almost nothing.

pub mod aggregator;
pub mod burst;
pub mod words;

#[cfg(test)]
mod tests;

use crate::config::ConfigHandle;
use crate::dictionary::Dictionary;
use crate::event::KeyEvent;
use crate::hasher::WordHasher;
use crate::keymap::KEY_BACKSPACE;
use crate::layout::LayoutMonitor;
use crate::notify::Notifier;
use crate::storage::LocalStore;
use self::aggregator::Aggregator;
use self::burst::BurstDetector;
use self::words::WordSegmenter;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Events processed per tick before yielding back to the timer.
const DRAIN_BUDGET: usize = 1000;

/// Wake intervals by recency of activity.
const POLL_ACTIVE: Duration = Duration::from_millis(500);
const POLL_RECENT: Duration = Duration::from_secs(2);
const POLL_IDLE: Duration = Duration::from_secs(5);
const RECENT_THRESHOLD: Duration = Duration::from_secs(5);
const IDLE_THRESHOLD: Duration = Duration::from_secs(30);

pub struct Engine {
    receiver: Receiver<KeyEvent>,
    stop: Arc<AtomicBool>,
    config: ConfigHandle,
    layout: Arc<LayoutMonitor>,
    dictionary: Arc<Mutex<Dictionary>>,
    hasher: Arc<WordHasher>,
    detector: BurstDetector,
    segmenter: WordSegmenter,
    aggregator: Aggregator,
    last_activity: Instant,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: Receiver<KeyEvent>,
        stop: Arc<AtomicBool>,
        config: ConfigHandle,
        layout: Arc<LayoutMonitor>,
        dictionary: Arc<Mutex<Dictionary>>,
        hasher: Arc<WordHasher>,
        store: Arc<LocalStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let snapshot = config.snapshot();
        Engine {
            receiver,
            stop,
            layout,
            dictionary,
            hasher,
            detector: BurstDetector::new(&snapshot),
            segmenter: WordSegmenter::new(snapshot.word_boundary_timeout_ms),
            aggregator: Aggregator::new(store, config.clone(), notifier),
            config,
            last_activity: Instant::now(),
        }
    }

    /// Runs until the stop flag is set, then drains the queue and closes
    /// the open burst.
    pub fn run(mut self) {
        info!("event consumer started");
        let mut current_snapshot = self.config.snapshot();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            // Pick up live configuration changes between ticks.
            let snapshot = self.config.snapshot();
            if !Arc::ptr_eq(&snapshot, &current_snapshot) {
                debug!("configuration changed, rebuilding detector state");
                self.flush_open_burst();
                self.detector = BurstDetector::new(&snapshot);
                self.segmenter = WordSegmenter::new(snapshot.word_boundary_timeout_ms);
                current_snapshot = snapshot;
            }

            match self.receiver.recv_timeout(self.poll_interval()) {
                Ok(event) => {
                    self.last_activity = Instant::now();
                    self.process_event(event);
                    let mut processed = 1;
                    while processed < DRAIN_BUDGET {
                        match self.receiver.try_recv() {
                            Ok(event) => {
                                self.process_event(event);
                                processed += 1;
                            }
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // No presses: the open burst may have timed out.
                    if let Some(closed) = self.detector.poll_timeout(crate::util::now_ms()) {
                        self.close_burst(&closed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("event channel disconnected");
                    break;
                }
            }
        }

        // Shutdown drain: consume whatever the device thread enqueued
        // before it stopped, then account the open burst.
        while let Ok(event) = self.receiver.try_recv() {
            self.process_event(event);
        }
        self.flush_open_burst();
        self.aggregator.reset();
        info!("event consumer stopped");
    }

    fn process_event(&mut self, event: KeyEvent) {
        if !event.is_press {
            return;
        }
        let layout = self.layout.current();
        let is_backspace = event.keycode == KEY_BACKSPACE;

        // Evaluate burst continuity before the detector mutates its state:
        // the first press of a burst contributes no interval sample.
        let continues = self.detector.continues_burst(event.timestamp_ms);
        let closed = self.detector.on_press(event.timestamp_ms, is_backspace);
        if let Some(closed) = closed {
            self.close_burst(&closed);
        }

        self.aggregator.on_press(
            event.keycode,
            &event.key_name,
            event.timestamp_ms,
            &layout,
            continues,
        );

        let dictionary = match self.dictionary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(word) = self.segmenter.on_press(
            event.keycode,
            &event.key_name,
            event.timestamp_ms,
            &layout,
            &dictionary,
            &self.hasher,
        ) {
            drop(dictionary);
            self.aggregator.on_word(word);
        }
    }

    /// Word buffers belong to the burst that just closed; finalize them
    /// into the pending set before the aggregator settles the burst.
    fn close_burst(&mut self, closed: &burst::ClosedBurst) {
        let layout = self.layout.current();
        let dictionary = match self.dictionary.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(word) = self.segmenter.flush(&layout, &dictionary, &self.hasher) {
            self.aggregator.on_word(word);
        }
        drop(dictionary);

        if let Err(e) = self.aggregator.on_burst_closed(closed, &layout) {
            // Hot-path policy: storage failures are logged, never propagated
            // toward the producer.
            error!(error = %e, "failed to persist burst");
        }
    }

    fn flush_open_burst(&mut self) {
        if let Some(closed) = self.detector.flush() {
            self.close_burst(&closed);
        }
    }

    fn poll_interval(&self) -> Duration {
        let idle = self.last_activity.elapsed();
        if idle >= IDLE_THRESHOLD {
            POLL_IDLE
        } else if idle >= RECENT_THRESHOLD {
            POLL_RECENT
        } else {
            POLL_ACTIVE
        }
    }
}
