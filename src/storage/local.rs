//! Encrypted local store backed by SQLCipher.
//!
//! One writer connection serializes all mutations; a small pool of reader
//! connections serves analyzer queries. Transient lock contention retries
//! with backoff before surfacing. A database that cannot be decrypted
//! with the current key is moved aside (never deleted) and replaced by a
//! fresh one.

use crate::engine::burst::Burst;
use crate::engine::words::FinalizedWord;
use crate::error::{EngineError, Result};
use crate::storage::migrations::{head_version, LOCAL_MIGRATIONS};
use crate::storage::{
    BurstRow, DailySummaryRow, DigraphStatRow, HighScoreRow, IgnoredWordRow, KeyStatRow,
    SettingRow, SyncLogRow, SyncStore, WordStatRow,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reader connections besides the single writer.
const READER_COUNT: usize = 3;
const WRITE_RETRIES: u32 = 3;

pub struct LocalStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl LocalStore {
    /// Opens (or creates) the encrypted database at `path`.
    ///
    /// When the file exists but cannot be decrypted with `master_key`, it
    /// is renamed with a random suffix and a fresh database is created;
    /// the backup is kept.
    pub fn open(path: &Path, master_key: &[u8; 32]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key_hex = hex::encode(master_key);
        match Self::open_connections(path, Some(&key_hex)) {
            Ok(store) => Ok(store),
            Err(e) if path.exists() && is_decrypt_failure(&e) => {
                let backup = backup_path(path);
                warn!(
                    backup = %backup.display(),
                    "database cannot be decrypted with the current key, moving it aside"
                );
                std::fs::rename(path, &backup)?;
                Self::open_connections(path, Some(&key_hex))
            }
            Err(e) => Err(e),
        }
    }

    /// Unencrypted in-memory store for tests. A single connection serves
    /// reads and writes, since each `:memory:` connection is its own
    /// database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(LocalStore {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    fn open_connections(path: &Path, key_hex: Option<&str>) -> Result<Self> {
        let writer = open_one(path, key_hex)?;
        run_migrations(&writer)?;
        let mut readers = Vec::with_capacity(READER_COUNT);
        for _ in 0..READER_COUNT {
            readers.push(Mutex::new(open_one(path, key_hex)?));
        }
        info!(path = %path.display(), "local store opened");
        Ok(LocalStore {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Runs a closure against the writer connection, retrying transient
    /// lock contention with backoff.
    fn write<T>(&self, f: impl Fn(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = lock(&self.writer);
        let mut delay = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            match f(&conn) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < WRITE_RETRIES && is_transient(&e) => {
                    attempt += 1;
                    debug!(attempt, "transient storage error, retrying: {e}");
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs a closure against a reader connection (round-robin), falling
    /// back to the writer when no readers exist (in-memory store).
    fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        if self.readers.is_empty() {
            let conn = lock(&self.writer);
            return Ok(f(&conn)?);
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = lock(&self.readers[idx]);
        Ok(f(&conn)?)
    }

    // --- ingestion writes ---

    pub fn insert_burst(&self, burst: &Burst, avg_wpm: f64) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO bursts
                 (start_time, end_time, key_count, backspace_count, net_key_count,
                  duration_ms, avg_wpm, qualifies_for_high_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    burst.start_ms,
                    burst.end_ms,
                    burst.key_count,
                    burst.backspace_count,
                    burst.net_key_count(),
                    burst.duration_ms,
                    avg_wpm,
                    burst.qualifies_for_high_score as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn insert_high_score(&self, row: &HighScoreRow) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO high_scores
                 (date, fastest_burst_wpm, burst_duration_sec, burst_key_count,
                  timestamp, burst_duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.date,
                    row.fastest_burst_wpm,
                    row.burst_duration_sec,
                    row.burst_key_count,
                    row.timestamp,
                    row.burst_duration_ms,
                ],
            )?;
            Ok(())
        })
    }

    /// Records one sampled press interval into the per-key aggregate.
    pub fn record_key_interval(
        &self,
        keycode: u16,
        key_name: &str,
        layout: &str,
        interval_ms: f64,
        now_ms: i64,
    ) -> Result<()> {
        self.write(|conn| {
            let existing: Option<(f64, u64, f64, f64)> = conn
                .query_row(
                    "SELECT avg_press_time, total_presses, slowest_ms, fastest_ms
                     FROM statistics WHERE keycode = ?1 AND layout = ?2",
                    params![keycode, layout],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )
                .optional()?;

            let (avg, total, slowest, fastest) = match existing {
                Some((avg, total, slowest, fastest)) => {
                    let n = total as f64;
                    (
                        (avg * n + interval_ms) / (n + 1.0),
                        total + 1,
                        slowest.max(interval_ms),
                        fastest.min(interval_ms),
                    )
                }
                None => (interval_ms, 1, interval_ms, interval_ms),
            };

            conn.execute(
                "INSERT OR REPLACE INTO statistics
                 (keycode, key_name, layout, avg_press_time, total_presses,
                  slowest_ms, fastest_ms, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![keycode, key_name, layout, avg, total, slowest, fastest, now_ms],
            )?;
            Ok(())
        })
    }

    /// Records one digraph interval into the per-pair aggregate.
    #[allow(clippy::too_many_arguments)]
    pub fn record_digraph_interval(
        &self,
        first_keycode: u16,
        first_key: &str,
        second_keycode: u16,
        second_key: &str,
        layout: &str,
        interval_ms: f64,
        now_ms: i64,
    ) -> Result<()> {
        self.write(|conn| {
            let existing: Option<(f64, u64, f64, f64)> = conn
                .query_row(
                    "SELECT avg_interval_ms, total_sequences, slowest_ms, fastest_ms
                     FROM digraph_statistics
                     WHERE first_keycode = ?1 AND second_keycode = ?2 AND layout = ?3",
                    params![first_keycode, second_keycode, layout],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )
                .optional()?;

            let (avg, total, slowest, fastest) = match existing {
                Some((avg, total, slowest, fastest)) => {
                    let n = total as f64;
                    (
                        (avg * n + interval_ms) / (n + 1.0),
                        total + 1,
                        slowest.max(interval_ms),
                        fastest.min(interval_ms),
                    )
                }
                None => (interval_ms, 1, interval_ms, interval_ms),
            };

            conn.execute(
                "INSERT OR REPLACE INTO digraph_statistics
                 (first_keycode, second_keycode, first_key, second_key, layout,
                  avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    first_keycode,
                    second_keycode,
                    first_key,
                    second_key,
                    layout,
                    avg,
                    total,
                    slowest,
                    fastest,
                    now_ms
                ],
            )?;
            Ok(())
        })
    }

    /// Folds one word observation into its running aggregate.
    pub fn upsert_word(&self, word: &FinalizedWord) -> Result<()> {
        self.write(|conn| {
            let existing: Option<(u64, i64, u64, u64, i64)> = conn
                .query_row(
                    "SELECT total_letters, total_duration_ms, observation_count,
                            backspace_count, editing_time_ms
                     FROM word_statistics WHERE word = ?1 AND layout = ?2",
                    params![word.word, word.layout],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    },
                )
                .optional()?;

            let (letters, duration, count, backspaces, editing) = match existing {
                Some((l, d, c, b, e)) => (
                    l + u64::from(word.total_letters),
                    d + word.total_duration_ms,
                    c + 1,
                    b + u64::from(word.backspace_count),
                    e + word.editing_time_ms,
                ),
                None => (
                    u64::from(word.total_letters),
                    word.total_duration_ms,
                    1,
                    u64::from(word.backspace_count),
                    word.editing_time_ms,
                ),
            };
            let avg_speed = if letters > 0 {
                duration as f64 / letters as f64
            } else {
                0.0
            };

            conn.execute(
                "INSERT OR REPLACE INTO word_statistics
                 (word, layout, avg_speed_ms_per_letter, total_letters, total_duration_ms,
                  observation_count, last_seen, backspace_count, editing_time_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    word.word,
                    word.layout,
                    avg_speed,
                    letters,
                    duration,
                    count,
                    word.last_seen_ms,
                    backspaces,
                    editing
                ],
            )?;
            Ok(())
        })
    }

    /// Accumulates a persisted burst into today's rollup.
    pub fn accumulate_daily(&self, date: &str, burst: &Burst, wpm: f64) -> Result<()> {
        self.write(|conn| {
            let existing: Option<(u64, u64, f64, i64)> = conn
                .query_row(
                    "SELECT total_keystrokes, total_bursts, avg_wpm, total_typing_sec
                     FROM daily_summaries WHERE date = ?1",
                    params![date],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )
                .optional()?;

            let (keystrokes, bursts, avg_wpm, typing_sec) = match existing {
                Some((k, b, avg, t)) => (
                    k + u64::from(burst.key_count),
                    b + 1,
                    (avg * b as f64 + wpm) / (b as f64 + 1.0),
                    t + burst.duration_ms / 1000,
                ),
                None => (
                    u64::from(burst.key_count),
                    1,
                    wpm,
                    burst.duration_ms / 1000,
                ),
            };

            conn.execute(
                "INSERT INTO daily_summaries
                 (date, total_keystrokes, total_bursts, avg_wpm, total_typing_sec, summary_sent)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)
                 ON CONFLICT(date) DO UPDATE SET
                     total_keystrokes = ?2, total_bursts = ?3,
                     avg_wpm = ?4, total_typing_sec = ?5",
                params![date, keystrokes, bursts, avg_wpm, typing_sec],
            )?;
            Ok(())
        })
    }

    /// Writes the slowest-letter snapshot onto today's rollup.
    pub fn set_daily_slowest(&self, date: &str, keycode: u16, key_name: &str) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE daily_summaries SET slowest_keycode = ?2, slowest_key_name = ?3
                 WHERE date = ?1",
                params![date, keycode, key_name],
            )?;
            Ok(())
        })
    }

    pub fn get_daily_summary(&self, date: &str) -> Result<Option<DailySummaryRow>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT date, total_keystrokes, total_bursts, avg_wpm, slowest_keycode,
                        slowest_key_name, total_typing_sec, summary_sent
                 FROM daily_summaries WHERE date = ?1",
                params![date],
                daily_from_row,
            )
            .optional()
        })
    }

    pub fn mark_summary_sent(&self, date: &str) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "UPDATE daily_summaries SET summary_sent = 1 WHERE date = ?1",
                params![date],
            )?;
            Ok(())
        })
    }

    // --- ignored words ---

    pub fn is_word_ignored(&self, word_hash: &str) -> Result<bool> {
        self.read(|conn| {
            conn.query_row(
                "SELECT 1 FROM ignored_words WHERE word_hash = ?1",
                params![word_hash],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
        })
    }

    /// Inserts the word's hash and removes its existing statistics in the
    /// same transaction. The plaintext word is used only for the delete
    /// and never stored.
    pub fn add_ignored_word(&self, word_lower: &str, word_hash: &str, now_ms: i64) -> Result<()> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO ignored_words (word_hash, added_at) VALUES (?1, ?2)",
                params![word_hash, now_ms],
            )?;
            tx.execute(
                "DELETE FROM word_statistics WHERE LOWER(word) = ?1",
                params![word_lower],
            )?;
            tx.commit()
        })
    }

    pub fn ignored_hashes(&self) -> Result<HashSet<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT word_hash FROM ignored_words")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    // --- settings ---

    pub fn set_setting(&self, key: &str, value: &str, now_ms: i64) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, now_ms],
            )?;
            Ok(())
        })
    }

    pub fn all_settings(&self) -> Result<Vec<SettingRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT key, value, updated_at FROM settings")?;
            let rows = stmt.query_map([], |row| {
                Ok(SettingRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    // --- analyzer reads ---

    pub fn key_stats_for_layout(&self, layout: &str, min_presses: u64) -> Result<Vec<KeyStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT keycode, key_name, layout, avg_press_time, total_presses,
                        slowest_ms, fastest_ms, last_updated
                 FROM statistics
                 WHERE layout = ?1 AND total_presses >= ?2
                 ORDER BY avg_press_time DESC",
            )?;
            let rows = stmt.query_map(params![layout, min_presses], key_stat_from_row)?;
            rows.collect()
        })
    }

    pub fn digraph_stats_for_layout(
        &self,
        layout: &str,
        min_sequences: u64,
    ) -> Result<Vec<DigraphStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT first_keycode, second_keycode, first_key, second_key, layout,
                        avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated
                 FROM digraph_statistics
                 WHERE layout = ?1 AND total_sequences >= ?2
                 ORDER BY avg_interval_ms DESC",
            )?;
            let rows = stmt.query_map(params![layout, min_sequences], digraph_from_row)?;
            rows.collect()
        })
    }

    pub fn word_stats_for_layout(
        &self,
        layout: &str,
        min_observations: u64,
    ) -> Result<Vec<WordStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT word, layout, avg_speed_ms_per_letter, total_letters, total_duration_ms,
                        observation_count, last_seen, backspace_count, editing_time_ms
                 FROM word_statistics
                 WHERE layout = ?1 AND observation_count >= ?2
                 ORDER BY avg_speed_ms_per_letter DESC",
            )?;
            let rows = stmt.query_map(params![layout, min_observations], word_from_row)?;
            rows.collect()
        })
    }

    /// Burst WPM values ordered by start time (for trends and percentiles).
    pub fn burst_wpms(&self) -> Result<Vec<f64>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT avg_wpm FROM bursts WHERE avg_wpm IS NOT NULL ORDER BY start_time",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
            rows.collect()
        })
    }

    pub fn burst_durations(&self) -> Result<Vec<i64>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT duration_ms FROM bursts ORDER BY duration_ms")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect()
        })
    }

    pub fn best_wpm_for_date(&self, date: &str) -> Result<Option<f64>> {
        // Bursts carry no date column; bound start_time by the local day.
        self.read(|conn| {
            conn.query_row(
                "SELECT MAX(b.avg_wpm) FROM bursts b
                 WHERE b.start_time >= ?1 AND b.start_time < ?2",
                params![local_day_bounds(date).0, local_day_bounds(date).1],
                |row| row.get::<_, Option<f64>>(0),
            )
        })
    }

    pub fn long_term_average_wpm(&self) -> Result<Option<f64>> {
        self.read(|conn| {
            conn.query_row("SELECT AVG(avg_wpm) FROM bursts", [], |row| {
                row.get::<_, Option<f64>>(0)
            })
        })
    }

    pub fn all_time_high_score(&self) -> Result<Option<f64>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT MAX(fastest_burst_wpm) FROM high_scores",
                [],
                |row| row.get::<_, Option<f64>>(0),
            )
        })
    }

    /// All-time keystrokes and bursts, excluding one date's rollup so live
    /// in-memory numbers for today can be added on top.
    pub fn all_time_keystrokes_and_bursts(&self, exclude_date: &str) -> Result<(u64, u64)> {
        self.read(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(total_keystrokes), 0), COALESCE(SUM(total_bursts), 0)
                 FROM daily_summaries WHERE date != ?1",
                params![exclude_date],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })
    }

    pub fn all_time_typing_sec(&self, exclude_date: &str) -> Result<i64> {
        self.read(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(total_typing_sec), 0)
                 FROM daily_summaries WHERE date != ?1",
                params![exclude_date],
                |row| row.get(0),
            )
        })
    }

    pub fn recent_sync_log(&self, limit: u32) -> Result<Vec<SyncLogRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, machine_name, pushed, pulled, merged, duration_ms,
                        error, table_breakdown
                 FROM sync_log ORDER BY timestamp DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], sync_log_from_row)?;
            rows.collect()
        })
    }

    // --- retention, clear, export ---

    /// Deletes bursts, high scores and daily summaries older than
    /// `retention_days`. Running aggregates are never auto-deleted.
    pub fn delete_old_data(&self, retention_days: i64, now_ms: i64) -> Result<usize> {
        if retention_days < 0 {
            return Ok(0);
        }
        let cutoff_ms = now_ms - retention_days * 86_400_000;
        let cutoff_date = crate::util::date_string_for_ms(cutoff_ms);
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut deleted = 0;
            deleted += tx.execute("DELETE FROM bursts WHERE start_time < ?1", params![cutoff_ms])?;
            deleted += tx.execute(
                "DELETE FROM high_scores WHERE timestamp < ?1",
                params![cutoff_ms],
            )?;
            deleted += tx.execute(
                "DELETE FROM daily_summaries WHERE date < ?1",
                params![cutoff_date],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Wipes every table. Settings survive only when `keep_settings`.
    pub fn clear_all(&self, keep_settings: bool) -> Result<()> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            for table in [
                "bursts",
                "statistics",
                "digraph_statistics",
                "high_scores",
                "daily_summaries",
                "word_statistics",
                "ignored_words",
                "sync_log",
            ] {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            if !keep_settings {
                tx.execute("DELETE FROM settings", [])?;
            }
            tx.commit()
        })
    }

    /// Streams per-key statistic rows updated within `[start_ms, end_ms]`
    /// as CSV (`timestamp_ms,keycode,key_name,layout`). Never materializes
    /// the full set.
    pub fn export_csv(&self, out: impl Write, start_ms: i64, end_ms: i64) -> Result<u64> {
        self.read(|conn| {
            let mut writer = csv::Writer::from_writer(out);
            writer
                .write_record(["timestamp_ms", "keycode", "key_name", "layout"])
                .map_err(csv_error)?;

            let mut stmt = conn.prepare(
                "SELECT last_updated, keycode, key_name, layout FROM statistics
                 WHERE last_updated >= ?1 AND last_updated <= ?2
                 ORDER BY last_updated",
            )?;
            let mut rows = stmt.query(params![start_ms, end_ms])?;
            let mut count = 0u64;
            while let Some(row) = rows.next()? {
                let ts: i64 = row.get(0)?;
                let keycode: u16 = row.get(1)?;
                let key_name: String = row.get(2)?;
                let layout: String = row.get(3)?;
                writer
                    .write_record([
                        ts.to_string(),
                        keycode.to_string(),
                        key_name,
                        layout,
                    ])
                    .map_err(csv_error)?;
                count += 1;
            }
            writer.flush().map_err(|e| csv_error(csv::Error::from(e)))?;
            Ok(count)
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn csv_error(e: csv::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn open_one(path: &Path, key_hex: Option<&str>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    if let Some(key) = key_hex {
        // Key first, cipher parameters immediately after; required before
        // the first page read.
        conn.execute_batch(&format!(
            "PRAGMA key = \"x'{key}'\";
             PRAGMA cipher_page_size = 4096;
             PRAGMA kdf_iter = 256000;
             PRAGMA cipher_memory_security = ON;"
        ))?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // First read either decrypts or fails with NotADatabase.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let head = head_version(LOCAL_MIGRATIONS);
    if current >= head {
        return Ok(());
    }
    let fresh = current == 0;
    for migration in LOCAL_MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        if !fresh {
            info!(
                version = migration.version,
                description = migration.description,
                "applied migration"
            );
        }
    }
    if fresh {
        info!(head, "new database stamped to head");
    }
    Ok(())
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn is_decrypt_failure(e: &EngineError) -> bool {
    match e {
        EngineError::Storage(inner) => matches!(
            inner.sqlite_error_code(),
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
        ),
        _ => false,
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "telemetry.db".to_string());
    path.with_file_name(format!("{name}.undecryptable-{suffix}"))
}

/// Epoch-ms bounds of a local-zone `YYYY-MM-DD` day.
fn local_day_bounds(date: &str) -> (i64, i64) {
    use chrono::{Local, NaiveDate, TimeZone};
    let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return (0, i64::MAX);
    };
    let start = day.and_hms_opt(0, 0, 0).unwrap_or_default();
    let start_ms = Local
        .from_local_datetime(&start)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0);
    (start_ms, start_ms + 86_400_000)
}

// --- row mappers ---

fn key_stat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyStatRow> {
    Ok(KeyStatRow {
        keycode: row.get(0)?,
        key_name: row.get(1)?,
        layout: row.get(2)?,
        avg_press_time: row.get(3)?,
        total_presses: row.get(4)?,
        slowest_ms: row.get(5)?,
        fastest_ms: row.get(6)?,
        last_updated: row.get(7)?,
    })
}

fn digraph_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DigraphStatRow> {
    Ok(DigraphStatRow {
        first_keycode: row.get(0)?,
        second_keycode: row.get(1)?,
        first_key: row.get(2)?,
        second_key: row.get(3)?,
        layout: row.get(4)?,
        avg_interval_ms: row.get(5)?,
        total_sequences: row.get(6)?,
        slowest_ms: row.get(7)?,
        fastest_ms: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn word_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WordStatRow> {
    Ok(WordStatRow {
        word: row.get(0)?,
        layout: row.get(1)?,
        avg_speed_ms_per_letter: row.get(2)?,
        total_letters: row.get(3)?,
        total_duration_ms: row.get(4)?,
        observation_count: row.get(5)?,
        last_seen: row.get(6)?,
        backspace_count: row.get(7)?,
        editing_time_ms: row.get(8)?,
    })
}

fn daily_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailySummaryRow> {
    Ok(DailySummaryRow {
        date: row.get(0)?,
        total_keystrokes: row.get(1)?,
        total_bursts: row.get(2)?,
        avg_wpm: row.get(3)?,
        slowest_keycode: row.get(4)?,
        slowest_key_name: row.get(5)?,
        total_typing_sec: row.get(6)?,
        summary_sent: row.get::<_, i64>(7)? != 0,
    })
}

fn sync_log_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncLogRow> {
    let breakdown: Option<String> = row.get(7)?;
    Ok(SyncLogRow {
        timestamp: row.get(0)?,
        machine_name: row.get(1)?,
        pushed: row.get(2)?,
        pulled: row.get(3)?,
        merged: row.get(4)?,
        duration_ms: row.get(5)?,
        error: row.get(6)?,
        table_breakdown: breakdown
            .map(|json| SyncLogRow::breakdown_from_json(&json))
            .unwrap_or_default(),
    })
}

// --- sync capability ---

impl SyncStore for LocalStore {
    fn side(&self) -> &'static str {
        "local"
    }

    fn fetch_bursts(&self) -> Result<Vec<BurstRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT start_time, end_time, key_count, backspace_count, net_key_count,
                        duration_ms, avg_wpm, qualifies_for_high_score
                 FROM bursts",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(BurstRow {
                    start_time: row.get(0)?,
                    end_time: row.get(1)?,
                    key_count: row.get(2)?,
                    backspace_count: row.get(3)?,
                    net_key_count: row.get(4)?,
                    duration_ms: row.get(5)?,
                    avg_wpm: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                    qualifies_for_high_score: row.get::<_, i64>(7)? != 0,
                })
            })?;
            rows.collect()
        })
    }

    fn insert_bursts(&self, rows: &[BurstRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO bursts
                     (start_time, end_time, key_count, backspace_count, net_key_count,
                      duration_ms, avg_wpm, qualifies_for_high_score)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for row in rows {
                    inserted += stmt.execute(params![
                        row.start_time,
                        row.end_time,
                        row.key_count,
                        row.backspace_count,
                        row.net_key_count,
                        row.duration_ms,
                        row.avg_wpm,
                        row.qualifies_for_high_score as i64,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    fn fetch_high_scores(&self) -> Result<Vec<HighScoreRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, fastest_burst_wpm, burst_duration_sec, burst_key_count,
                        timestamp, burst_duration_ms
                 FROM high_scores",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(HighScoreRow {
                    date: row.get(0)?,
                    fastest_burst_wpm: row.get(1)?,
                    burst_duration_sec: row.get(2)?,
                    burst_key_count: row.get(3)?,
                    timestamp: row.get(4)?,
                    burst_duration_ms: row.get(5)?,
                })
            })?;
            rows.collect()
        })
    }

    fn insert_high_scores(&self, rows: &[HighScoreRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO high_scores
                     (date, fastest_burst_wpm, burst_duration_sec, burst_key_count,
                      timestamp, burst_duration_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for row in rows {
                    inserted += stmt.execute(params![
                        row.date,
                        row.fastest_burst_wpm,
                        row.burst_duration_sec,
                        row.burst_key_count,
                        row.timestamp,
                        row.burst_duration_ms,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    fn fetch_key_stats(&self) -> Result<Vec<KeyStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT keycode, key_name, layout, avg_press_time, total_presses,
                        slowest_ms, fastest_ms, last_updated
                 FROM statistics",
            )?;
            let rows = stmt.query_map([], key_stat_from_row)?;
            rows.collect()
        })
    }

    fn put_key_stats(&self, rows: &[KeyStatRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO statistics
                     (keycode, key_name, layout, avg_press_time, total_presses,
                      slowest_ms, fastest_ms, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for row in rows {
                    written += stmt.execute(params![
                        row.keycode,
                        row.key_name,
                        row.layout,
                        row.avg_press_time,
                        row.total_presses,
                        row.slowest_ms,
                        row.fastest_ms,
                        row.last_updated,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn fetch_digraph_stats(&self) -> Result<Vec<DigraphStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT first_keycode, second_keycode, first_key, second_key, layout,
                        avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated
                 FROM digraph_statistics",
            )?;
            let rows = stmt.query_map([], digraph_from_row)?;
            rows.collect()
        })
    }

    fn put_digraph_stats(&self, rows: &[DigraphStatRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO digraph_statistics
                     (first_keycode, second_keycode, first_key, second_key, layout,
                      avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for row in rows {
                    written += stmt.execute(params![
                        row.first_keycode,
                        row.second_keycode,
                        row.first_key,
                        row.second_key,
                        row.layout,
                        row.avg_interval_ms,
                        row.total_sequences,
                        row.slowest_ms,
                        row.fastest_ms,
                        row.last_updated,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn fetch_word_stats(&self) -> Result<Vec<WordStatRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT word, layout, avg_speed_ms_per_letter, total_letters, total_duration_ms,
                        observation_count, last_seen, backspace_count, editing_time_ms
                 FROM word_statistics",
            )?;
            let rows = stmt.query_map([], word_from_row)?;
            rows.collect()
        })
    }

    fn put_word_stats(&self, rows: &[WordStatRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO word_statistics
                     (word, layout, avg_speed_ms_per_letter, total_letters, total_duration_ms,
                      observation_count, last_seen, backspace_count, editing_time_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for row in rows {
                    written += stmt.execute(params![
                        row.word,
                        row.layout,
                        row.avg_speed_ms_per_letter,
                        row.total_letters,
                        row.total_duration_ms,
                        row.observation_count,
                        row.last_seen,
                        row.backspace_count,
                        row.editing_time_ms,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn fetch_daily_summaries(&self) -> Result<Vec<DailySummaryRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date, total_keystrokes, total_bursts, avg_wpm, slowest_keycode,
                        slowest_key_name, total_typing_sec, summary_sent
                 FROM daily_summaries",
            )?;
            let rows = stmt.query_map([], daily_from_row)?;
            rows.collect()
        })
    }

    fn put_daily_summaries(&self, rows: &[DailySummaryRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO daily_summaries
                     (date, total_keystrokes, total_bursts, avg_wpm, slowest_keycode,
                      slowest_key_name, total_typing_sec, summary_sent)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for row in rows {
                    written += stmt.execute(params![
                        row.date,
                        row.total_keystrokes,
                        row.total_bursts,
                        row.avg_wpm,
                        row.slowest_keycode,
                        row.slowest_key_name,
                        row.total_typing_sec,
                        row.summary_sent as i64,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn fetch_settings(&self) -> Result<Vec<SettingRow>> {
        self.all_settings()
    }

    fn put_settings(&self, rows: &[SettingRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO settings (key, value, updated_at)
                     VALUES (?1, ?2, ?3)",
                )?;
                for row in rows {
                    written += stmt.execute(params![row.key, row.value, row.updated_at])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn fetch_ignored_words(&self) -> Result<Vec<IgnoredWordRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare("SELECT word_hash, added_at FROM ignored_words")?;
            let rows = stmt.query_map([], |row| {
                Ok(IgnoredWordRow {
                    word_hash: row.get(0)?,
                    added_at: row.get(1)?,
                })
            })?;
            rows.collect()
        })
    }

    fn insert_ignored_words(&self, rows: &[IgnoredWordRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO ignored_words (word_hash, added_at) VALUES (?1, ?2)",
                )?;
                for row in rows {
                    inserted += stmt.execute(params![row.word_hash, row.added_at])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    fn fetch_sync_log(&self) -> Result<Vec<SyncLogRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, machine_name, pushed, pulled, merged, duration_ms,
                        error, table_breakdown
                 FROM sync_log",
            )?;
            let rows = stmt.query_map([], sync_log_from_row)?;
            rows.collect()
        })
    }

    fn insert_sync_log(&self, rows: &[SyncLogRow]) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO sync_log
                     (timestamp, machine_name, pushed, pulled, merged, duration_ms,
                      error, table_breakdown)
                     SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                     WHERE NOT EXISTS (SELECT 1 FROM sync_log WHERE timestamp = ?1)",
                )?;
                for row in rows {
                    inserted += stmt.execute(params![
                        row.timestamp,
                        row.machine_name,
                        row.pushed,
                        row.pulled,
                        row.merged,
                        row.duration_ms,
                        row.error,
                        row.breakdown_json(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    fn delete_word_stats_matching(&self, words: &HashSet<String>) -> Result<usize> {
        self.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut deleted = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM word_statistics WHERE LOWER(word) = ?1")?;
                for word in words {
                    deleted += stmt.execute(params![word])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }
}
