//! Unit tests for the burst detector and word segmenter.

use crate::config::{Config, DurationMethod};
use crate::dictionary::Dictionary;
use crate::engine::burst::{calculate_wpm, BurstDetector, ClosedBurst};
use crate::engine::words::WordSegmenter;
use crate::hasher::WordHasher;

fn test_config() -> Config {
    Config {
        burst_timeout_ms: 1000,
        min_burst_key_count: 3,
        min_burst_duration_ms: 500,
        ..Config::default()
    }
}

fn feed(detector: &mut BurstDetector, timestamps: &[i64]) -> Vec<ClosedBurst> {
    timestamps
        .iter()
        .filter_map(|t| detector.on_press(*t, false))
        .collect()
}

#[test]
fn burst_formation_basic() {
    let mut detector = BurstDetector::new(&test_config());
    let closed = feed(&mut detector, &[0, 200, 400, 600, 800, 1000, 3000]);

    assert_eq!(closed.len(), 1);
    let burst = &closed[0].burst;
    assert_eq!(burst.start_ms, 0);
    assert_eq!(burst.end_ms, 1000);
    assert_eq!(burst.key_count, 6);
    assert_eq!(burst.duration_ms, 1000);
    assert!(closed[0].meets_minimum);
    assert!((burst.wpm() - 72.0).abs() < 1e-9);
}

#[test]
fn burst_below_minimum_duration_is_gated() {
    let mut detector = BurstDetector::new(&test_config());
    let closed = feed(&mut detector, &[0, 100, 200, 3000]);

    assert_eq!(closed.len(), 1);
    assert!(!closed[0].meets_minimum);
    assert_eq!(closed[0].burst.duration_ms, 200);
}

#[test]
fn burst_below_minimum_key_count_is_gated() {
    let mut detector = BurstDetector::new(&test_config());
    let closed = feed(&mut detector, &[0, 600, 3000]);

    assert_eq!(closed.len(), 1);
    assert!(!closed[0].meets_minimum);
    assert_eq!(closed[0].burst.key_count, 2);
}

#[test]
fn timestamps_match_key_count() {
    let mut detector = BurstDetector::new(&test_config());
    let presses: Vec<i64> = (0..20).map(|i| i * 100).collect();
    feed(&mut detector, &presses);
    let closed = detector.flush().unwrap();
    assert_eq!(
        closed.burst.key_timestamps_ms.len() as u32,
        closed.burst.key_count
    );
}

#[test]
fn active_time_duration_skips_long_gaps() {
    let config = Config {
        burst_duration_calculation: DurationMethod::ActiveTime,
        active_time_threshold_ms: 500,
        ..test_config()
    };
    let mut detector = BurstDetector::new(&config);
    // Gaps: 100, 800 (excluded: > 500), 100.
    feed(&mut detector, &[0, 100, 900, 1000]);
    let closed = detector.flush().unwrap();
    assert_eq!(closed.burst.duration_ms, 200);
}

#[test]
fn backspaces_reduce_net_count() {
    let mut detector = BurstDetector::new(&test_config());
    detector.on_press(0, false);
    detector.on_press(100, true);
    detector.on_press(200, true);
    detector.on_press(300, false);
    let closed = detector.flush().unwrap();
    assert_eq!(closed.burst.key_count, 4);
    assert_eq!(closed.burst.backspace_count, 2);
    // 4 - 2*2 floors at zero.
    assert_eq!(closed.burst.net_key_count(), 0);
    assert!((closed.burst.backspace_ratio() - 0.5).abs() < 1e-9);
}

#[test]
fn out_of_order_timestamps_clamp_to_zero_gap() {
    let mut detector = BurstDetector::new(&test_config());
    detector.on_press(1000, false);
    detector.on_press(800, false);
    detector.on_press(1100, false);
    let closed = detector.flush().unwrap();
    let burst = closed.burst;
    assert!(burst
        .key_timestamps_ms
        .windows(2)
        .all(|pair| pair[0] <= pair[1]));
    assert!(burst.duration_ms >= 0);
}

#[test]
fn poll_timeout_closes_idle_burst() {
    let mut detector = BurstDetector::new(&test_config());
    feed(&mut detector, &[0, 200, 400]);
    assert!(detector.poll_timeout(1000).is_none());
    let closed = detector.poll_timeout(2000).unwrap();
    assert_eq!(closed.burst.end_ms, 400);
    // Detector is idle again afterwards.
    assert!(detector.poll_timeout(10_000).is_none());
}

#[test]
fn high_score_qualification_follows_duration() {
    let config = Config {
        min_burst_duration_ms: 500,
        high_score_min_duration_ms: 10_000,
        ..test_config()
    };
    let mut detector = BurstDetector::new(&config);
    let presses: Vec<i64> = (0..=20).map(|i| i * 600).collect();
    feed(&mut detector, &presses);
    let closed = detector.flush().unwrap();
    assert_eq!(closed.burst.duration_ms, 12_000);
    assert!(closed.burst.qualifies_for_high_score);
}

#[test]
fn wpm_formula() {
    assert!((calculate_wpm(6, 1000) - 72.0).abs() < 1e-9);
    assert!((calculate_wpm(50, 50) - 12_000.0).abs() < 1e-6);
    assert_eq!(calculate_wpm(10, 0), 0.0);
}

// --- word segmentation ---

fn accept_all_dictionary() -> Dictionary {
    let config = Config {
        dictionary_mode: "accept_all".to_string(),
        ..Config::default()
    };
    Dictionary::new(&config, None, None)
}

fn hasher() -> WordHasher {
    WordHasher::new(&[0u8; 32])
}

fn type_word(
    segmenter: &mut WordSegmenter,
    dict: &Dictionary,
    hasher: &WordHasher,
    letters: &[(u16, &str, i64)],
) {
    for (code, name, t) in letters {
        let finalized = segmenter.on_press(*code, name, *t, "us", dict, hasher);
        assert!(finalized.is_none());
    }
}

#[test]
fn word_finalized_by_space() {
    let dict = accept_all_dictionary();
    let hasher = hasher();
    let mut segmenter = WordSegmenter::new(1000);

    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[(20, "t", 0), (35, "h", 150), (18, "e", 300)],
    );
    let word = segmenter
        .on_press(57, "SPACE", 450, "us", &dict, &hasher)
        .unwrap();
    assert_eq!(word.word, "the");
    assert_eq!(word.total_letters, 3);
    assert_eq!(word.total_duration_ms, 300);
    assert!((word.speed_ms_per_letter - 100.0).abs() < 1e-9);
    assert_eq!(word.backspace_count, 0);
}

#[test]
fn word_finalized_by_boundary_timeout() {
    let dict = accept_all_dictionary();
    let hasher = hasher();
    let mut segmenter = WordSegmenter::new(1000);

    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[(46, "c", 0), (30, "a", 100), (20, "t", 200)],
    );
    // Next letter arrives after the boundary: previous word finalizes and
    // the new letter opens a fresh buffer.
    let word = segmenter
        .on_press(32, "d", 1500, "us", &dict, &hasher)
        .unwrap();
    assert_eq!(word.word, "cat");
}

#[test]
fn backspace_pops_letter_and_counts_editing() {
    let dict = accept_all_dictionary();
    let hasher = hasher();
    let mut segmenter = WordSegmenter::new(1000);

    // "cart" -> backspace removes 't' -> 'e' appended -> "care".
    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[
            (46, "c", 0),
            (30, "a", 100),
            (19, "r", 200),
            (20, "t", 300),
        ],
    );
    assert!(segmenter
        .on_press(14, "BACKSPACE", 500, "us", &dict, &hasher)
        .is_none());
    assert!(segmenter
        .on_press(18, "e", 600, "us", &dict, &hasher)
        .is_none());

    let word = segmenter.flush("us", &dict, &hasher).unwrap();
    assert_eq!(word.word, "care");
    assert_eq!(word.backspace_count, 1);
    assert_eq!(word.editing_time_ms, 200);
}

#[test]
fn short_and_repeated_words_rejected() {
    let dict = accept_all_dictionary();
    let hasher = hasher();

    let mut segmenter = WordSegmenter::new(1000);
    type_word(&mut segmenter, &dict, &hasher, &[(24, "o", 0), (37, "k", 100)]);
    assert!(segmenter.flush("us", &dict, &hasher).is_none());

    let mut segmenter = WordSegmenter::new(1000);
    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[(30, "a", 0), (30, "a", 100), (30, "a", 200)],
    );
    assert!(segmenter.flush("us", &dict, &hasher).is_none());
}

#[test]
fn invalid_words_discarded_with_real_dictionary() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"Haus\ncare\nPC\n").unwrap();
    let config = Config {
        enabled_dictionaries: file.path().display().to_string(),
        ..Config::default()
    };
    let dict = Dictionary::new(&config, None, None);
    let hasher = hasher();

    // Not in the dictionary: dropped.
    let mut segmenter = WordSegmenter::new(1000);
    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[(45, "x", 0), (21, "y", 100), (44, "z", 200)],
    );
    assert!(segmenter.flush("us", &dict, &hasher).is_none());

    // Dictionary casing wins: haus -> Haus.
    let mut segmenter = WordSegmenter::new(1000);
    type_word(
        &mut segmenter,
        &dict,
        &hasher,
        &[(35, "h", 0), (30, "a", 100), (22, "u", 200), (31, "s", 300)],
    );
    let word = segmenter.flush("us", &dict, &hasher).unwrap();
    assert_eq!(word.word, "Haus");
}
