//! Property tests over generated inputs: burst structure, smoothing,
//! queue accounting, hashing and retention.

use proptest::prelude::*;
use typetrace::analyzer::apply_moving_average;
use typetrace::config::Config;
use typetrace::engine::burst::{BurstDetector, ClosedBurst};
use typetrace::hasher::WordHasher;
use typetrace::storage::{BurstRow, HighScoreRow, LocalStore, SyncStore};

const MIN_KEYS: u32 = 5;
const MIN_DURATION: i64 = 400;

fn detector() -> BurstDetector {
    BurstDetector::new(&Config {
        burst_timeout_ms: 1000,
        min_burst_key_count: MIN_KEYS,
        min_burst_duration_ms: MIN_DURATION,
        ..Config::default()
    })
}

/// Nondecreasing press timestamps built from bounded gaps.
fn press_sequence() -> impl Strategy<Value = Vec<(i64, bool)>> {
    prop::collection::vec((0i64..3000, prop::bool::weighted(0.1)), 1..200).prop_map(|gaps| {
        let mut t = 0i64;
        gaps.into_iter()
            .map(|(gap, backspace)| {
                t += gap;
                (t, backspace)
            })
            .collect()
    })
}

fn run_detector(presses: &[(i64, bool)]) -> Vec<ClosedBurst> {
    let mut det = detector();
    let mut closed: Vec<ClosedBurst> = presses
        .iter()
        .filter_map(|(t, backspace)| det.on_press(*t, *backspace))
        .collect();
    if let Some(last) = det.flush() {
        closed.push(last);
    }
    closed
}

proptest! {
    /// Every burst covers a contiguous run of the input presses, in order.
    #[test]
    fn burst_monotonicity(presses in press_sequence()) {
        let closed = run_detector(&presses);
        let timestamps: Vec<i64> = presses.iter().map(|(t, _)| *t).collect();
        let mut cursor = 0usize;
        for burst in &closed {
            let b = &burst.burst;
            let len = b.key_timestamps_ms.len();
            prop_assert_eq!(len as u32, b.key_count);
            prop_assert_eq!(&timestamps[cursor..cursor + len], &b.key_timestamps_ms[..]);
            prop_assert_eq!(b.start_ms, b.key_timestamps_ms[0]);
            prop_assert_eq!(b.end_ms, b.key_timestamps_ms[len - 1]);
            prop_assert!(b.start_ms <= b.end_ms);
            cursor += len;
        }
        // Nothing is lost: bursts partition the full press sequence.
        prop_assert_eq!(cursor, timestamps.len());
    }

    /// Minimum gating holds for every burst marked persistable.
    #[test]
    fn burst_sizing(presses in press_sequence()) {
        for burst in run_detector(&presses) {
            if burst.meets_minimum {
                prop_assert!(burst.burst.key_count >= MIN_KEYS);
                prop_assert!(burst.burst.duration_ms >= MIN_DURATION);
            } else {
                prop_assert!(
                    burst.burst.key_count < MIN_KEYS
                        || burst.burst.duration_ms < MIN_DURATION
                );
            }
        }
    }

    /// Net keystrokes follow the backspace formula, floored at zero.
    #[test]
    fn net_keystroke_formula(presses in press_sequence()) {
        for burst in run_detector(&presses) {
            let b = &burst.burst;
            prop_assert!(b.backspace_count <= b.key_count);
            let expected = (i64::from(b.key_count) - 2 * i64::from(b.backspace_count)).max(0);
            prop_assert_eq!(i64::from(b.net_key_count()), expected);
        }
    }

    /// Smoothed output keeps the input length and stays within its range.
    #[test]
    fn smoothing_bounds(
        values in prop::collection::vec(0.0f64..400.0, 0..300),
        smoothness in 1u32..=100,
    ) {
        let (smoothed, xs) = apply_moving_average(&values, smoothness);
        prop_assert_eq!(smoothed.len(), values.len());
        prop_assert_eq!(xs.len(), values.len());
        if !values.is_empty() {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for v in smoothed {
                prop_assert!(v >= min - 1e-9 && v <= max + 1e-9);
            }
            prop_assert_eq!(xs[0], 1);
            prop_assert_eq!(*xs.last().unwrap(), values.len());
        }
    }

    /// The producer-side overflow policy never loses accounting:
    /// drops + delivered == produced.
    #[test]
    fn queue_drop_accounting(produced in 0usize..500, capacity in 1usize..64) {
        let (sender, receiver) = crossbeam_channel::bounded::<u64>(capacity);
        let mut delivered = 0u64;
        let mut dropped = 0u64;
        for i in 0..produced as u64 {
            match sender.try_send(i) {
                Ok(()) => delivered += 1,
                Err(crossbeam_channel::TrySendError::Full(_)) => dropped += 1,
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }
        prop_assert_eq!(delivered + dropped, produced as u64);
        prop_assert_eq!(receiver.len() as u64, delivered);
    }

    /// Hashes are case-insensitive and deterministic per key.
    #[test]
    fn hash_determinism(word in "[a-zA-Z]{1,24}") {
        let key = [7u8; 32];
        let first = WordHasher::new(&key).hash_word(&word);
        let second = WordHasher::new(&key).hash_word(&word.to_uppercase());
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), 64);
    }
}

#[test]
fn retention_removes_only_old_rows() {
    let store = LocalStore::open_in_memory().unwrap();
    let now = 100 * 86_400_000i64;
    let retention_days = 30i64;
    let cutoff = now - retention_days * 86_400_000;

    let mut bursts = Vec::new();
    for day in [5i64, 50, 80, 99] {
        let ts = day * 86_400_000;
        bursts.push(BurstRow {
            start_time: ts,
            end_time: ts + 8000,
            key_count: 30,
            backspace_count: 0,
            net_key_count: 30,
            duration_ms: 8000,
            avg_wpm: 45.0,
            qualifies_for_high_score: false,
        });
    }
    store.insert_bursts(&bursts).unwrap();
    store
        .insert_high_scores(&[
            HighScoreRow {
                date: "1970-01-06".to_string(),
                fastest_burst_wpm: 80.0,
                burst_duration_sec: 12.0,
                burst_duration_ms: 12_000,
                burst_key_count: 60,
                timestamp: 5 * 86_400_000,
            },
            HighScoreRow {
                date: "1970-04-10".to_string(),
                fastest_burst_wpm: 90.0,
                burst_duration_sec: 12.0,
                burst_duration_ms: 12_000,
                burst_key_count: 70,
                timestamp: 99 * 86_400_000,
            },
        ])
        .unwrap();

    store.delete_old_data(retention_days, now).unwrap();

    for burst in store.fetch_bursts().unwrap() {
        assert!(burst.start_time >= cutoff);
    }
    for score in store.fetch_high_scores().unwrap() {
        assert!(score.timestamp >= cutoff);
    }
    // Aggregates are never retention-swept.
    assert_eq!(store.fetch_bursts().unwrap().len(), 2);
}
