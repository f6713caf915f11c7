//! End-to-end pipeline scenarios: presses in, rows and events out.
//!
//! Drives the detector, segmenter and aggregator exactly the way the
//! event consumer wires them, against an in-memory store.

use std::sync::{Arc, Mutex};
use typetrace::config::{Config, ConfigHandle};
use typetrace::dictionary::Dictionary;
use typetrace::engine::aggregator::Aggregator;
use typetrace::engine::burst::BurstDetector;
use typetrace::engine::words::WordSegmenter;
use typetrace::hasher::WordHasher;
use typetrace::keymap;
use typetrace::notify::{EventSink, Notifier, WorstLetterChange};
use typetrace::storage::{DailySummaryRow, LocalStore, SyncLogRow};
use typetrace::Burst;

#[derive(Default)]
struct Events {
    bursts: Vec<f64>,
    unrealistic: Vec<(f64, u32)>,
    exceptional: Vec<f64>,
    worst_letter: Vec<String>,
}

struct RecordingSink(Arc<Mutex<Events>>);

impl EventSink for RecordingSink {
    fn on_burst(&self, _burst: &Burst, wpm: f64) {
        self.0.lock().unwrap().bursts.push(wpm);
    }
    fn on_unrealistic(&self, wpm: f64, key_count: u32) {
        self.0.lock().unwrap().unrealistic.push((wpm, key_count));
    }
    fn on_exceptional_burst(&self, wpm: f64, _threshold: f64) {
        self.0.lock().unwrap().exceptional.push(wpm);
    }
    fn on_worst_letter_change(&self, change: &WorstLetterChange) {
        self.0
            .lock()
            .unwrap()
            .worst_letter
            .push(change.new.key_name.clone());
    }
    fn on_daily_summary(&self, _summary: &DailySummaryRow) {}
    fn on_sync_result(&self, _entry: &SyncLogRow) {}
}

/// The consumer wiring without the queue and threads.
struct Pipeline {
    detector: BurstDetector,
    segmenter: WordSegmenter,
    aggregator: Aggregator,
    dictionary: Dictionary,
    hasher: WordHasher,
    store: Arc<LocalStore>,
    events: Arc<Mutex<Events>>,
}

fn scenario_config() -> Config {
    Config {
        burst_timeout_ms: 1000,
        min_burst_key_count: 3,
        min_burst_duration_ms: 500,
        max_realistic_wpm: 300,
        dictionary_mode: "accept_all".to_string(),
        ..Config::default()
    }
}

impl Pipeline {
    fn new(config: Config) -> Self {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let handle = ConfigHandle::new(config.clone());
        let events = Arc::new(Mutex::new(Events::default()));
        let notifier = Arc::new(Notifier::new(
            Box::new(RecordingSink(Arc::clone(&events))),
            handle.clone(),
        ));
        Pipeline {
            detector: BurstDetector::new(&config),
            segmenter: WordSegmenter::new(config.word_boundary_timeout_ms),
            aggregator: Aggregator::new(Arc::clone(&store), handle, notifier),
            dictionary: Dictionary::new(&config, None, None),
            hasher: WordHasher::new(&[0u8; 32]),
            store,
            events,
        }
    }

    fn press(&mut self, keycode: u16, key_name: &str, timestamp_ms: i64) {
        let continues = self.detector.continues_burst(timestamp_ms);
        let closed = self
            .detector
            .on_press(timestamp_ms, keycode == keymap::KEY_BACKSPACE);
        if let Some(closed) = closed {
            if let Some(word) = self.segmenter.flush("us", &self.dictionary, &self.hasher) {
                self.aggregator.on_word(word);
            }
            self.aggregator.on_burst_closed(&closed, "us").unwrap();
        }
        self.aggregator
            .on_press(keycode, key_name, timestamp_ms, "us", continues);
        if let Some(word) = self.segmenter.on_press(
            keycode,
            key_name,
            timestamp_ms,
            "us",
            &self.dictionary,
            &self.hasher,
        ) {
            self.aggregator.on_word(word);
        }
    }

    fn flush(&mut self) {
        if let Some(closed) = self.detector.flush() {
            if let Some(word) = self.segmenter.flush("us", &self.dictionary, &self.hasher) {
                self.aggregator.on_word(word);
            }
            self.aggregator.on_burst_closed(&closed, "us").unwrap();
        }
    }
}

#[test]
fn s1_burst_formation_and_persistence() {
    let mut pipeline = Pipeline::new(scenario_config());
    for (i, t) in [0i64, 200, 400, 600, 800, 1000].iter().enumerate() {
        pipeline.press(30 + i as u16, "a", *t);
    }
    // Gap past the timeout closes the burst.
    pipeline.press(57, "SPACE", 3000);

    let wpms = pipeline.store.burst_wpms().unwrap();
    assert_eq!(wpms.len(), 1);
    assert!((wpms[0] - 72.0).abs() < 1e-9);

    let events = pipeline.events.lock().unwrap();
    assert_eq!(events.bursts.len(), 1);
    assert!(events.unrealistic.is_empty());
}

#[test]
fn s2_minimum_gating_drops_burst_row() {
    let mut pipeline = Pipeline::new(scenario_config());
    for t in [0i64, 100, 200] {
        pipeline.press(30, "a", t);
    }
    pipeline.press(30, "a", 3000);
    pipeline.flush();

    // Duration 200 < 500: no burst row, no burst event.
    assert!(pipeline.store.burst_wpms().unwrap().is_empty());
    assert!(pipeline.events.lock().unwrap().bursts.is_empty());
}

#[test]
fn s3_unrealistic_burst_leaves_no_trace() {
    let mut pipeline = Pipeline::new(scenario_config());
    // 50 presses inside 50 ms.
    for t in 0..50i64 {
        pipeline.press(30, "a", t);
    }
    pipeline.press(30, "a", 5000);

    // No burst, no high score, no per-key statistics from those presses.
    assert!(pipeline.store.burst_wpms().unwrap().is_empty());
    assert!(pipeline.store.all_time_high_score().unwrap().is_none());
    assert!(pipeline
        .store
        .key_stats_for_layout("us", 1)
        .unwrap()
        .is_empty());

    let events = pipeline.events.lock().unwrap();
    assert_eq!(events.unrealistic.len(), 1);
    let (wpm, key_count) = events.unrealistic[0];
    assert!(wpm > 300.0);
    assert_eq!(key_count, 50);
    assert!(events.bursts.is_empty());
}

#[test]
fn s4_digraph_intervals_recorded() {
    let mut pipeline = Pipeline::new(scenario_config());
    pipeline.press(20, "t", 0);
    pipeline.press(35, "h", 150);
    pipeline.press(18, "e", 300);
    // Close the burst so buffered samples flush.
    pipeline.press(57, "SPACE", 5000);

    let digraphs = pipeline.store.digraph_stats_for_layout("us", 1).unwrap();
    assert_eq!(digraphs.len(), 2);
    let th = digraphs
        .iter()
        .find(|d| d.first_keycode == 20 && d.second_keycode == 35)
        .expect("t->h digraph");
    assert!((th.avg_interval_ms - 150.0).abs() < 1e-9);
    assert_eq!(th.total_sequences, 1);
    assert_eq!(th.first_key, "t");
    assert_eq!(th.second_key, "h");

    let he = digraphs
        .iter()
        .find(|d| d.first_keycode == 35 && d.second_keycode == 18)
        .expect("h->e digraph");
    assert!((he.avg_interval_ms - 150.0).abs() < 1e-9);
}

#[test]
fn words_flow_into_word_statistics() {
    let mut pipeline = Pipeline::new(scenario_config());
    pipeline.press(20, "t", 0);
    pipeline.press(35, "h", 100);
    pipeline.press(18, "e", 200);
    pipeline.press(57, "SPACE", 300);
    pipeline.press(20, "t", 400);
    pipeline.press(35, "h", 500);
    pipeline.press(18, "e", 600);
    pipeline.press(57, "SPACE", 5000);
    pipeline.flush();

    let words = pipeline.store.word_stats_for_layout("us", 1).unwrap();
    assert_eq!(words.len(), 1);
    assert_eq!(words[0].word, "the");
    assert_eq!(words[0].observation_count, 2);
    assert_eq!(words[0].total_letters, 6);
}

#[test]
fn daily_summary_accumulates_per_burst() {
    let mut pipeline = Pipeline::new(scenario_config());
    for t in [0i64, 200, 400, 600, 800, 1000] {
        pipeline.press(30, "a", t);
    }
    pipeline.press(30, "a", 3000);
    for t in [10_000i64, 10_300, 10_600, 10_900] {
        pipeline.press(30, "a", t);
    }
    pipeline.press(30, "a", 13_000);
    pipeline.flush();

    let date = typetrace::util::date_string_for_ms(0);
    let summary = pipeline
        .store
        .get_daily_summary(&date)
        .unwrap()
        .expect("summary exists");
    assert_eq!(summary.total_bursts, 2);
    assert_eq!(summary.total_keystrokes, 6 + 4);
    assert!(!summary.summary_sent);
}
