//! Storage operations outside the hot path: CSV export, the hashed
//! ignore flow, settings persistence, and wiping.

use typetrace::hasher::WordHasher;
use typetrace::storage::{LocalStore, SyncStore, WordStatRow};

fn word_stat(word: &str) -> WordStatRow {
    WordStatRow {
        word: word.to_string(),
        layout: "us".to_string(),
        avg_speed_ms_per_letter: 150.0,
        total_letters: 12,
        total_duration_ms: 1800,
        observation_count: 3,
        last_seen: 1000,
        backspace_count: 0,
        editing_time_ms: 0,
    }
}

#[test]
fn csv_export_streams_key_rows_in_range() {
    let store = LocalStore::open_in_memory().unwrap();
    store.record_key_interval(30, "a", "us", 120.0, 1000).unwrap();
    store.record_key_interval(31, "s", "us", 90.0, 2000).unwrap();
    store.record_key_interval(32, "d", "us", 80.0, 9000).unwrap();

    let mut out = Vec::new();
    let rows = store.export_csv(&mut out, 0, 5000).unwrap();
    assert_eq!(rows, 2);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "timestamp_ms,keycode,key_name,layout");
    assert_eq!(lines[1], "1000,30,a,us");
    assert_eq!(lines[2], "2000,31,s,us");
    assert_eq!(lines.len(), 3);
    // LF terminators, no CR.
    assert!(!text.contains('\r'));
}

#[test]
fn ignoring_a_word_stores_hash_and_drops_statistics() {
    let store = LocalStore::open_in_memory().unwrap();
    let hasher = WordHasher::new(&[3u8; 32]);
    store
        .put_word_stats(&[word_stat("Secret"), word_stat("other")])
        .unwrap();

    let hash = hasher.hash_word("secret");
    store.add_ignored_word("secret", &hash, 1234).unwrap();

    assert!(store.is_word_ignored(&hash).unwrap());
    assert!(store.ignored_hashes().unwrap().contains(&hash));

    let remaining = store.fetch_word_stats().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].word, "other");
}

#[test]
fn settings_persist_with_timestamps() {
    let store = LocalStore::open_in_memory().unwrap();
    store.set_setting("burst_timeout_ms", "1500", 1000).unwrap();
    store.set_setting("burst_timeout_ms", "2000", 2000).unwrap();

    let settings = store.all_settings().unwrap();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0].value, "2000");
    assert_eq!(settings[0].updated_at, 2000);
}

#[test]
fn clear_all_can_keep_settings() {
    let store = LocalStore::open_in_memory().unwrap();
    store.put_word_stats(&[word_stat("anything")]).unwrap();
    store.set_setting("max_realistic_wpm", "250", 1000).unwrap();

    store.clear_all(true).unwrap();
    assert!(store.fetch_word_stats().unwrap().is_empty());
    assert_eq!(store.all_settings().unwrap().len(), 1);

    store.clear_all(false).unwrap();
    assert!(store.all_settings().unwrap().is_empty());
}
