//! Analyzer read surface: leaderboards with sample-size floors,
//! percentiles, histogram, and the all-time rollups.

use typetrace::analyzer::Analyzer;
use typetrace::storage::{
    BurstRow, DailySummaryRow, DigraphStatRow, KeyStatRow, LocalStore, SyncStore, WordStatRow,
};

fn key_stat(keycode: u16, key_name: &str, avg: f64, total: u64) -> KeyStatRow {
    KeyStatRow {
        keycode,
        key_name: key_name.to_string(),
        layout: "us".to_string(),
        avg_press_time: avg,
        total_presses: total,
        slowest_ms: avg * 2.0,
        fastest_ms: avg / 2.0,
        last_updated: 1000,
    }
}

fn word_stat(word: &str, speed: f64, observations: u64) -> WordStatRow {
    WordStatRow {
        word: word.to_string(),
        layout: "us".to_string(),
        avg_speed_ms_per_letter: speed,
        total_letters: observations * 5,
        total_duration_ms: (speed * 5.0) as i64 * observations as i64,
        observation_count: observations,
        last_seen: 1000,
        backspace_count: 0,
        editing_time_ms: 0,
    }
}

fn burst(start_time: i64, wpm: f64, duration_ms: i64) -> BurstRow {
    BurstRow {
        start_time,
        end_time: start_time + duration_ms,
        key_count: 40,
        backspace_count: 0,
        net_key_count: 40,
        duration_ms,
        avg_wpm: wpm,
        qualifies_for_high_score: duration_ms >= 10_000,
    }
}

#[test]
fn key_leaderboards_filter_letters_and_sample_size() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .put_key_stats(&[
            key_stat(30, "a", 180.0, 50),
            key_stat(31, "s", 120.0, 50),
            key_stat(44, "z", 250.0, 5),      // below the 20-press floor
            key_stat(57, "SPACE", 300.0, 80), // not a letter
        ])
        .unwrap();

    let analyzer = Analyzer::new(&store);
    let slowest = analyzer.slowest_keys(10, "us").unwrap();
    assert_eq!(slowest.len(), 2);
    assert_eq!(slowest[0].key_name, "a");
    assert_eq!(slowest[1].key_name, "s");

    let fastest = analyzer.fastest_keys(1, "us").unwrap();
    assert_eq!(fastest[0].key_name, "s");

    let worst = analyzer.slowest_letter("us").unwrap().unwrap();
    assert_eq!(worst.keycode, 30);
}

#[test]
fn word_leaderboards_require_observations() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .put_word_stats(&[
            word_stat("glacier", 200.0, 4),
            word_stat("the", 80.0, 100),
            word_stat("rare", 500.0, 1), // below the 3-observation floor
        ])
        .unwrap();

    let analyzer = Analyzer::new(&store);
    let slowest = analyzer.slowest_words(10, "us").unwrap();
    assert_eq!(slowest.len(), 2);
    assert_eq!(slowest[0].word, "glacier");
    let fastest = analyzer.fastest_words(1, "us").unwrap();
    assert_eq!(fastest[0].word, "the");
}

#[test]
fn digraph_leaderboards_require_sequences() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .put_digraph_stats(&[
            DigraphStatRow {
                first_keycode: 20,
                second_keycode: 35,
                first_key: "t".to_string(),
                second_key: "h".to_string(),
                layout: "us".to_string(),
                avg_interval_ms: 95.0,
                total_sequences: 40,
                slowest_ms: 200.0,
                fastest_ms: 40.0,
                last_updated: 1000,
            },
            DigraphStatRow {
                first_keycode: 35,
                second_keycode: 18,
                first_key: "h".to_string(),
                second_key: "e".to_string(),
                layout: "us".to_string(),
                avg_interval_ms: 120.0,
                total_sequences: 3, // below the 10-sequence floor
                slowest_ms: 200.0,
                fastest_ms: 80.0,
                last_updated: 1000,
            },
        ])
        .unwrap();

    let analyzer = Analyzer::new(&store);
    assert_eq!(analyzer.slowest_digraphs(10, "us").unwrap().len(), 1);
    assert_eq!(analyzer.fastest_digraphs(10, "us").unwrap().len(), 1);
}

#[test]
fn wpm_percentile_histogram_and_averages() {
    let store = LocalStore::open_in_memory().unwrap();
    let bursts: Vec<BurstRow> = (1..=20)
        .map(|i| burst(i * 60_000, i as f64 * 5.0, 8000))
        .collect();
    store.insert_bursts(&bursts).unwrap();

    let analyzer = Analyzer::new(&store);

    // Nearest rank: ceil(0.95 * 20) = 19th smallest = 95.0.
    let p95 = analyzer.burst_wpm_percentile(95).unwrap().unwrap();
    assert_eq!(p95, 95.0);

    let avg = analyzer.long_term_average_wpm().unwrap().unwrap();
    assert!((avg - 52.5).abs() < 1e-9);

    let histogram = analyzer.wpm_histogram(5).unwrap();
    assert_eq!(histogram.len(), 5);
    let total: u64 = histogram.iter().map(|(_, count)| count).sum();
    assert_eq!(total, 20);

    let (series, xs) = analyzer.wpm_series(50).unwrap();
    assert_eq!(series.len(), 20);
    assert_eq!(xs, (1..=20).collect::<Vec<usize>>());

    let (avg_ms, min_ms, max_ms, p95_ms) = analyzer.burst_duration_stats().unwrap().unwrap();
    assert_eq!(min_ms, 8000);
    assert_eq!(max_ms, 8000);
    assert_eq!(p95_ms, 8000);
    assert!((avg_ms - 8000.0).abs() < 1e-9);
}

#[test]
fn empty_store_yields_no_metrics() {
    let store = LocalStore::open_in_memory().unwrap();
    let analyzer = Analyzer::new(&store);
    assert!(analyzer.burst_wpm_percentile(95).unwrap().is_none());
    assert!(analyzer.long_term_average_wpm().unwrap().is_none());
    assert!(analyzer.today_best_wpm().unwrap().is_none());
    assert!(analyzer.burst_duration_stats().unwrap().is_none());
    assert!(analyzer.wpm_histogram(10).unwrap().is_empty());
    assert!(analyzer.slowest_letter("us").unwrap().is_none());
}

#[test]
fn all_time_rollups_exclude_requested_date() {
    let store = LocalStore::open_in_memory().unwrap();
    store
        .put_daily_summaries(&[
            DailySummaryRow {
                date: "2026-07-30".to_string(),
                total_keystrokes: 4000,
                total_bursts: 40,
                avg_wpm: 60.0,
                slowest_keycode: Some(30),
                slowest_key_name: Some("a".to_string()),
                total_typing_sec: 1200,
                summary_sent: true,
            },
            DailySummaryRow {
                date: "2026-07-31".to_string(),
                total_keystrokes: 1000,
                total_bursts: 10,
                avg_wpm: 55.0,
                slowest_keycode: None,
                slowest_key_name: None,
                total_typing_sec: 300,
                summary_sent: false,
            },
        ])
        .unwrap();

    let (keystrokes, bursts) = store.all_time_keystrokes_and_bursts("2026-07-31").unwrap();
    assert_eq!(keystrokes, 4000);
    assert_eq!(bursts, 40);
    assert_eq!(store.all_time_typing_sec("2026-07-31").unwrap(), 1200);

    let summary = store.get_daily_summary("2026-07-30").unwrap().unwrap();
    assert_eq!(summary.slowest_key_name.as_deref(), Some("a"));
    assert!(summary.summary_sent);
}
