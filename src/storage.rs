//! Persistence surface: row types shared by both backends and the
//! capability trait the synchronizer is generic over.
//!
//! The local backend is an encrypted SQLite file; the remote backend is a
//! PostgreSQL database with the same tables plus a `user_id` partition
//! column. Row types here are the wire contract between them.

pub mod local;
pub mod migrations;
pub mod remote;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use local::LocalStore;
pub use remote::RemoteStore;

/// A persisted burst row. `start_time` is the natural unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstRow {
    pub start_time: i64,
    pub end_time: i64,
    pub key_count: u32,
    pub backspace_count: u32,
    pub net_key_count: u32,
    pub duration_ms: i64,
    pub avg_wpm: f64,
    pub qualifies_for_high_score: bool,
}

/// Per-key press-time aggregate, keyed by `(keycode, layout)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyStatRow {
    pub keycode: u16,
    pub key_name: String,
    pub layout: String,
    pub avg_press_time: f64,
    pub total_presses: u64,
    pub slowest_ms: f64,
    pub fastest_ms: f64,
    pub last_updated: i64,
}

/// Per-digraph interval aggregate, keyed by
/// `(first_keycode, second_keycode, layout)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DigraphStatRow {
    pub first_keycode: u16,
    pub second_keycode: u16,
    pub first_key: String,
    pub second_key: String,
    pub layout: String,
    pub avg_interval_ms: f64,
    pub total_sequences: u64,
    pub slowest_ms: f64,
    pub fastest_ms: f64,
    pub last_updated: i64,
}

/// Per-word speed aggregate, keyed by `(word, layout)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WordStatRow {
    pub word: String,
    pub layout: String,
    pub avg_speed_ms_per_letter: f64,
    pub total_letters: u64,
    pub total_duration_ms: i64,
    pub observation_count: u64,
    pub last_seen: i64,
    pub backspace_count: u64,
    pub editing_time_ms: i64,
}

/// High-score row, unique by `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct HighScoreRow {
    pub date: String,
    pub fastest_burst_wpm: f64,
    pub burst_duration_sec: f64,
    pub burst_duration_ms: i64,
    pub burst_key_count: u32,
    pub timestamp: i64,
}

/// Daily rollup, keyed by local-zone `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummaryRow {
    pub date: String,
    pub total_keystrokes: u64,
    pub total_bursts: u64,
    pub avg_wpm: f64,
    pub slowest_keycode: Option<u16>,
    pub slowest_key_name: Option<String>,
    pub total_typing_sec: i64,
    pub summary_sent: bool,
}

/// Hashed ignored word; the plaintext never reaches storage.
#[derive(Debug, Clone, PartialEq)]
pub struct IgnoredWordRow {
    pub word_hash: String,
    pub added_at: i64,
}

/// A persisted setting, merged last-writer-wins by `updated_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// Per-table transfer counts inside a sync log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub pushed: u64,
    pub pulled: u64,
    pub merged: u64,
}

impl TableCounts {
    pub fn is_zero(&self) -> bool {
        self.pushed == 0 && self.pulled == 0 && self.merged == 0
    }
}

/// One completed (or failed) sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogRow {
    pub timestamp: i64,
    pub machine_name: String,
    pub pushed: u64,
    pub pulled: u64,
    pub merged: u64,
    pub duration_ms: i64,
    pub error: Option<String>,
    /// table name -> counts; serialized as JSON in the store.
    pub table_breakdown: BTreeMap<String, TableCounts>,
}

impl SyncLogRow {
    pub fn breakdown_json(&self) -> String {
        serde_json::to_string(&self.table_breakdown).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn breakdown_from_json(json: &str) -> BTreeMap<String, TableCounts> {
        serde_json::from_str(json).unwrap_or_default()
    }
}

/// The capability set the synchronizer needs from either side.
///
/// Batch writes are transactional per call: a failing call leaves the
/// table untouched so earlier tables' counts stay consistent.
pub trait SyncStore {
    fn side(&self) -> &'static str;

    fn fetch_bursts(&self) -> Result<Vec<BurstRow>>;
    fn insert_bursts(&self, rows: &[BurstRow]) -> Result<usize>;

    fn fetch_high_scores(&self) -> Result<Vec<HighScoreRow>>;
    fn insert_high_scores(&self, rows: &[HighScoreRow]) -> Result<usize>;

    fn fetch_key_stats(&self) -> Result<Vec<KeyStatRow>>;
    fn put_key_stats(&self, rows: &[KeyStatRow]) -> Result<usize>;

    fn fetch_digraph_stats(&self) -> Result<Vec<DigraphStatRow>>;
    fn put_digraph_stats(&self, rows: &[DigraphStatRow]) -> Result<usize>;

    fn fetch_word_stats(&self) -> Result<Vec<WordStatRow>>;
    fn put_word_stats(&self, rows: &[WordStatRow]) -> Result<usize>;

    fn fetch_daily_summaries(&self) -> Result<Vec<DailySummaryRow>>;
    fn put_daily_summaries(&self, rows: &[DailySummaryRow]) -> Result<usize>;

    fn fetch_settings(&self) -> Result<Vec<SettingRow>>;
    fn put_settings(&self, rows: &[SettingRow]) -> Result<usize>;

    fn fetch_ignored_words(&self) -> Result<Vec<IgnoredWordRow>>;
    fn insert_ignored_words(&self, rows: &[IgnoredWordRow]) -> Result<usize>;

    fn fetch_sync_log(&self) -> Result<Vec<SyncLogRow>>;
    fn insert_sync_log(&self, rows: &[SyncLogRow]) -> Result<usize>;

    /// Deletes every word-statistics row whose word matches the given
    /// lowercase set (the `exclude_names_enabled` side effect).
    fn delete_word_stats_matching(&self, words: &std::collections::HashSet<String>)
        -> Result<usize>;
}
