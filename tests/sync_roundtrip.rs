//! Synchronizer semantics over two stores: convergence, idempotence,
//! last-writer-wins merges, and the privacy-preserving ignore set.
//!
//! Both sides are in-memory local stores; the synchronizer is generic
//! over the store capability trait, so the merge policy under test is
//! exactly the one used against the remote backend.

use typetrace::hasher::WordHasher;
use typetrace::storage::{
    BurstRow, IgnoredWordRow, KeyStatRow, LocalStore, SettingRow, SyncStore, WordStatRow,
};
use typetrace::sync::sync_once;

fn store() -> LocalStore {
    LocalStore::open_in_memory().unwrap()
}

fn burst_row(start_time: i64) -> BurstRow {
    BurstRow {
        start_time,
        end_time: start_time + 8000,
        key_count: 40,
        backspace_count: 2,
        net_key_count: 36,
        duration_ms: 8000,
        avg_wpm: 54.0,
        qualifies_for_high_score: false,
    }
}

fn key_stat(keycode: u16, avg: f64, total: u64, last_updated: i64) -> KeyStatRow {
    KeyStatRow {
        keycode,
        key_name: "a".to_string(),
        layout: "us".to_string(),
        avg_press_time: avg,
        total_presses: total,
        slowest_ms: avg * 2.0,
        fastest_ms: avg / 2.0,
        last_updated,
    }
}

#[test]
fn append_only_tables_converge_to_union() {
    let local = store();
    let remote = store();

    local.insert_bursts(&[burst_row(1000), burst_row(2000)]).unwrap();
    remote.insert_bursts(&[burst_row(2000), burst_row(3000)]).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());

    let mut local_keys: Vec<i64> = local
        .fetch_bursts()
        .unwrap()
        .iter()
        .map(|b| b.start_time)
        .collect();
    let mut remote_keys: Vec<i64> = remote
        .fetch_bursts()
        .unwrap()
        .iter()
        .map(|b| b.start_time)
        .collect();
    local_keys.sort_unstable();
    remote_keys.sort_unstable();
    assert_eq!(local_keys, vec![1000, 2000, 3000]);
    assert_eq!(remote_keys, vec![1000, 2000, 3000]);

    let bursts = &entry.table_breakdown["bursts"];
    assert_eq!(bursts.pushed, 1);
    assert_eq!(bursts.pulled, 1);
    assert_eq!(bursts.merged, 0);
}

#[test]
fn second_sync_is_idempotent() {
    let local = store();
    let remote = store();

    local.insert_bursts(&[burst_row(1000)]).unwrap();
    local.put_key_stats(&[key_stat(30, 120.0, 10, 500)]).unwrap();
    remote.put_key_stats(&[key_stat(31, 90.0, 5, 600)]).unwrap();

    let (first, _) = sync_once(&local, &remote);
    assert!(first.error.is_none());

    let (second, _) = sync_once(&local, &remote);
    assert!(second.error.is_none());
    for (table, counts) in &second.table_breakdown {
        assert!(
            counts.is_zero(),
            "table {table} moved rows on a no-op sync: {counts:?}"
        );
    }
}

#[test]
fn aggregate_merge_newer_remote_wins() {
    let local = store();
    let remote = store();

    // S5: same key, remote strictly newer.
    local.put_key_stats(&[key_stat(30, 120.0, 10, 1000)]).unwrap();
    remote.put_key_stats(&[key_stat(30, 100.0, 30, 2000)]).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());

    for side in [&local, &remote] {
        let rows = side.fetch_key_stats().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_press_time, 100.0);
        assert_eq!(rows[0].total_presses, 30);
        assert_eq!(rows[0].last_updated, 2000);
    }

    let stats = &entry.table_breakdown["statistics"];
    assert!(stats.pulled >= 1);
    assert_eq!(stats.merged, 1);
}

#[test]
fn aggregate_merge_newer_local_wins() {
    let local = store();
    let remote = store();

    local.put_key_stats(&[key_stat(30, 80.0, 50, 5000)]).unwrap();
    remote.put_key_stats(&[key_stat(30, 120.0, 10, 1000)]).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());

    let remote_rows = remote.fetch_key_stats().unwrap();
    assert_eq!(remote_rows[0].avg_press_time, 80.0);
    assert_eq!(remote_rows[0].last_updated, 5000);
    assert!(entry.table_breakdown["statistics"].pushed >= 1);
}

#[test]
fn equal_timestamps_transfer_nothing() {
    let local = store();
    let remote = store();

    local.put_key_stats(&[key_stat(30, 120.0, 10, 1000)]).unwrap();
    remote.put_key_stats(&[key_stat(30, 100.0, 30, 1000)]).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    let stats = &entry.table_breakdown["statistics"];
    assert!(stats.is_zero());
    // Each side keeps its own payload: no oscillation, no churn.
    assert_eq!(local.fetch_key_stats().unwrap()[0].avg_press_time, 120.0);
    assert_eq!(remote.fetch_key_stats().unwrap()[0].avg_press_time, 100.0);
}

#[test]
fn word_stats_merge_by_last_seen() {
    let local = store();
    let remote = store();

    let older = WordStatRow {
        word: "Haus".to_string(),
        layout: "us".to_string(),
        avg_speed_ms_per_letter: 130.0,
        total_letters: 8,
        total_duration_ms: 1040,
        observation_count: 2,
        last_seen: 1000,
        backspace_count: 0,
        editing_time_ms: 0,
    };
    let newer = WordStatRow {
        avg_speed_ms_per_letter: 110.0,
        observation_count: 5,
        last_seen: 9000,
        ..older.clone()
    };
    local.put_word_stats(std::slice::from_ref(&older)).unwrap();
    remote.put_word_stats(std::slice::from_ref(&newer)).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());
    let local_rows = local.fetch_word_stats().unwrap();
    assert_eq!(local_rows[0].observation_count, 5);
    assert_eq!(local_rows[0].last_seen, 9000);
}

#[test]
fn ignored_word_hashes_are_append_only_and_deterministic() {
    let local = store();
    let remote = store();

    // S6: two processes sharing the master key agree on the hash.
    let key = [0u8; 32];
    let hash_here = WordHasher::new(&key).hash_word("secret");
    let hash_there = WordHasher::new(&key).hash_word("Secret");
    assert_eq!(hash_here, hash_there);
    assert_eq!(hash_here.len(), 64);

    local
        .insert_ignored_words(&[IgnoredWordRow {
            word_hash: hash_here.clone(),
            added_at: 1000,
        }])
        .unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());
    assert_eq!(entry.table_breakdown["ignored_words"].pushed, 1);

    let remote_rows = remote.fetch_ignored_words().unwrap();
    assert_eq!(remote_rows.len(), 1);
    assert_eq!(remote_rows[0].word_hash, hash_here);
}

#[test]
fn settings_merge_last_writer_wins() {
    let local = store();
    let remote = store();

    local
        .put_settings(&[SettingRow {
            key: "burst_timeout_ms".to_string(),
            value: "1500".to_string(),
            updated_at: 1000,
        }])
        .unwrap();
    remote
        .put_settings(&[SettingRow {
            key: "burst_timeout_ms".to_string(),
            value: "2000".to_string(),
            updated_at: 2000,
        }])
        .unwrap();

    let (entry, pulled) = sync_once(&local, &remote);
    assert!(entry.error.is_none());
    assert_eq!(local.fetch_settings().unwrap()[0].value, "2000");
    // The pulled row is surfaced so the caller can apply side effects.
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].key, "burst_timeout_ms");
}

#[test]
fn sync_log_entry_carries_breakdown() {
    let local = store();
    let remote = store();
    local.insert_bursts(&[burst_row(1000)]).unwrap();

    let (entry, _) = sync_once(&local, &remote);
    assert!(entry.error.is_none());
    assert_eq!(entry.pushed, 1);
    assert_eq!(entry.pulled, 0);
    assert!(!entry.machine_name.is_empty());
    assert!(entry.table_breakdown.contains_key("bursts"));
    assert!(entry.table_breakdown.contains_key("statistics"));

    // The breakdown survives a JSON round trip through the log table.
    local.insert_sync_log(std::slice::from_ref(&entry)).unwrap();
    let logged = local.recent_sync_log(10).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].table_breakdown, entry.table_breakdown);
}
