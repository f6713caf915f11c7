//! Remote store: a user-owned PostgreSQL database mirroring the local
//! schema with a `user_id` partition column leading every primary key.
//!
//! The client is synchronous; sync cycles run on the job pool, never on
//! the event consumer, so blocking network I/O stays off the hot path.

use crate::error::Result;
use crate::storage::migrations::{head_version, REMOTE_MIGRATIONS};
use crate::storage::{
    BurstRow, DailySummaryRow, DigraphStatRow, HighScoreRow, IgnoredWordRow, KeyStatRow,
    SettingRow, SyncLogRow, SyncStore, WordStatRow,
};
use postgres::{Client, NoTls};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info;

pub struct RemoteStore {
    client: Mutex<Client>,
    user_id: String,
}

impl RemoteStore {
    /// Connects and brings the remote schema to head.
    pub fn connect(url: &str, user_id: &str) -> Result<Self> {
        let mut client = Client::connect(url, NoTls)?;
        run_migrations(&mut client)?;
        Ok(RemoteStore {
            client: Mutex::new(client),
            user_id: user_id.to_string(),
        })
    }

}

fn lock(mutex: &Mutex<Client>) -> std::sync::MutexGuard<'_, Client> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run_migrations(client: &mut Client) -> Result<()> {
    client.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;
    let current: i32 = client
        .query_opt("SELECT MAX(version) FROM schema_version", &[])?
        .and_then(|row| row.get::<_, Option<i32>>(0))
        .unwrap_or(0);
    let head = head_version(REMOTE_MIGRATIONS);
    if current as u32 >= head {
        return Ok(());
    }
    for migration in REMOTE_MIGRATIONS
        .iter()
        .filter(|m| m.version > current as u32)
    {
        let mut tx = client.transaction()?;
        tx.batch_execute(migration.up)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[&(migration.version as i32)],
        )?;
        tx.commit()?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied remote migration"
        );
    }
    Ok(())
}

impl SyncStore for RemoteStore {
    fn side(&self) -> &'static str {
        "remote"
    }

    fn fetch_bursts(&self) -> Result<Vec<BurstRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT start_time, end_time, key_count, backspace_count, net_key_count,
                    duration_ms, avg_wpm, qualifies_for_high_score
             FROM bursts WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| BurstRow {
                start_time: row.get(0),
                end_time: row.get(1),
                key_count: row.get::<_, i32>(2) as u32,
                backspace_count: row.get::<_, i32>(3) as u32,
                net_key_count: row.get::<_, i32>(4) as u32,
                duration_ms: row.get(5),
                avg_wpm: row.get::<_, Option<f64>>(6).unwrap_or(0.0),
                qualifies_for_high_score: row.get::<_, i32>(7) != 0,
            })
            .collect())
    }

    fn insert_bursts(&self, rows: &[BurstRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut inserted = 0;
        for row in rows {
            inserted += tx.execute(
                "INSERT INTO bursts
                 (user_id, start_time, end_time, key_count, backspace_count, net_key_count,
                  duration_ms, avg_wpm, qualifies_for_high_score)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (user_id, start_time) DO NOTHING",
                &[
                    &self.user_id,
                    &row.start_time,
                    &row.end_time,
                    &(row.key_count as i32),
                    &(row.backspace_count as i32),
                    &(row.net_key_count as i32),
                    &row.duration_ms,
                    &row.avg_wpm,
                    &(row.qualifies_for_high_score as i32),
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn fetch_high_scores(&self) -> Result<Vec<HighScoreRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT date, fastest_burst_wpm, burst_duration_sec, burst_key_count,
                    timestamp, burst_duration_ms
             FROM high_scores WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| HighScoreRow {
                date: row.get(0),
                fastest_burst_wpm: row.get(1),
                burst_duration_sec: row.get(2),
                burst_key_count: row.get::<_, i32>(3) as u32,
                timestamp: row.get(4),
                burst_duration_ms: row.get(5),
            })
            .collect())
    }

    fn insert_high_scores(&self, rows: &[HighScoreRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut inserted = 0;
        for row in rows {
            inserted += tx.execute(
                "INSERT INTO high_scores
                 (user_id, date, fastest_burst_wpm, burst_duration_sec, burst_key_count,
                  timestamp, burst_duration_ms)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (user_id, timestamp) DO NOTHING",
                &[
                    &self.user_id,
                    &row.date,
                    &row.fastest_burst_wpm,
                    &row.burst_duration_sec,
                    &(row.burst_key_count as i32),
                    &row.timestamp,
                    &row.burst_duration_ms,
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn fetch_key_stats(&self) -> Result<Vec<KeyStatRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT keycode, key_name, layout, avg_press_time, total_presses,
                    slowest_ms, fastest_ms, last_updated
             FROM statistics WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| KeyStatRow {
                keycode: row.get::<_, i32>(0) as u16,
                key_name: row.get(1),
                layout: row.get(2),
                avg_press_time: row.get(3),
                total_presses: row.get::<_, i32>(4) as u64,
                slowest_ms: row.get(5),
                fastest_ms: row.get(6),
                last_updated: row.get(7),
            })
            .collect())
    }

    fn put_key_stats(&self, rows: &[KeyStatRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut written = 0;
        for row in rows {
            written += tx.execute(
                "INSERT INTO statistics
                 (user_id, keycode, key_name, layout, avg_press_time, total_presses,
                  slowest_ms, fastest_ms, last_updated)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (user_id, keycode, layout) DO UPDATE SET
                     key_name = EXCLUDED.key_name,
                     avg_press_time = EXCLUDED.avg_press_time,
                     total_presses = EXCLUDED.total_presses,
                     slowest_ms = EXCLUDED.slowest_ms,
                     fastest_ms = EXCLUDED.fastest_ms,
                     last_updated = EXCLUDED.last_updated",
                &[
                    &self.user_id,
                    &(row.keycode as i32),
                    &row.key_name,
                    &row.layout,
                    &row.avg_press_time,
                    &(row.total_presses as i32),
                    &row.slowest_ms,
                    &row.fastest_ms,
                    &row.last_updated,
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn fetch_digraph_stats(&self) -> Result<Vec<DigraphStatRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT first_keycode, second_keycode, first_key, second_key, layout,
                    avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated
             FROM digraph_statistics WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| DigraphStatRow {
                first_keycode: row.get::<_, i32>(0) as u16,
                second_keycode: row.get::<_, i32>(1) as u16,
                first_key: row.get(2),
                second_key: row.get(3),
                layout: row.get(4),
                avg_interval_ms: row.get(5),
                total_sequences: row.get::<_, i32>(6) as u64,
                slowest_ms: row.get(7),
                fastest_ms: row.get(8),
                last_updated: row.get(9),
            })
            .collect())
    }

    fn put_digraph_stats(&self, rows: &[DigraphStatRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut written = 0;
        for row in rows {
            written += tx.execute(
                "INSERT INTO digraph_statistics
                 (user_id, first_keycode, second_keycode, first_key, second_key, layout,
                  avg_interval_ms, total_sequences, slowest_ms, fastest_ms, last_updated)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (user_id, first_keycode, second_keycode, layout) DO UPDATE SET
                     first_key = EXCLUDED.first_key,
                     second_key = EXCLUDED.second_key,
                     avg_interval_ms = EXCLUDED.avg_interval_ms,
                     total_sequences = EXCLUDED.total_sequences,
                     slowest_ms = EXCLUDED.slowest_ms,
                     fastest_ms = EXCLUDED.fastest_ms,
                     last_updated = EXCLUDED.last_updated",
                &[
                    &self.user_id,
                    &(row.first_keycode as i32),
                    &(row.second_keycode as i32),
                    &row.first_key,
                    &row.second_key,
                    &row.layout,
                    &row.avg_interval_ms,
                    &(row.total_sequences as i32),
                    &row.slowest_ms,
                    &row.fastest_ms,
                    &row.last_updated,
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn fetch_word_stats(&self) -> Result<Vec<WordStatRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT word, layout, avg_speed_ms_per_letter, total_letters, total_duration_ms,
                    observation_count, last_seen, backspace_count, editing_time_ms
             FROM word_statistics WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| WordStatRow {
                word: row.get(0),
                layout: row.get(1),
                avg_speed_ms_per_letter: row.get(2),
                total_letters: row.get::<_, i32>(3) as u64,
                total_duration_ms: row.get(4),
                observation_count: row.get::<_, i32>(5) as u64,
                last_seen: row.get(6),
                backspace_count: row.get::<_, i32>(7) as u64,
                editing_time_ms: row.get(8),
            })
            .collect())
    }

    fn put_word_stats(&self, rows: &[WordStatRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut written = 0;
        for row in rows {
            written += tx.execute(
                "INSERT INTO word_statistics
                 (user_id, word, layout, avg_speed_ms_per_letter, total_letters,
                  total_duration_ms, observation_count, last_seen, backspace_count,
                  editing_time_ms)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (user_id, word, layout) DO UPDATE SET
                     avg_speed_ms_per_letter = EXCLUDED.avg_speed_ms_per_letter,
                     total_letters = EXCLUDED.total_letters,
                     total_duration_ms = EXCLUDED.total_duration_ms,
                     observation_count = EXCLUDED.observation_count,
                     last_seen = EXCLUDED.last_seen,
                     backspace_count = EXCLUDED.backspace_count,
                     editing_time_ms = EXCLUDED.editing_time_ms",
                &[
                    &self.user_id,
                    &row.word,
                    &row.layout,
                    &row.avg_speed_ms_per_letter,
                    &(row.total_letters as i32),
                    &row.total_duration_ms,
                    &(row.observation_count as i32),
                    &row.last_seen,
                    &(row.backspace_count as i32),
                    &row.editing_time_ms,
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn fetch_daily_summaries(&self) -> Result<Vec<DailySummaryRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT date, total_keystrokes, total_bursts, avg_wpm, slowest_keycode,
                    slowest_key_name, total_typing_sec, summary_sent
             FROM daily_summaries WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| DailySummaryRow {
                date: row.get(0),
                total_keystrokes: row.get::<_, i32>(1) as u64,
                total_bursts: row.get::<_, i32>(2) as u64,
                avg_wpm: row.get(3),
                slowest_keycode: row.get::<_, Option<i32>>(4).map(|k| k as u16),
                slowest_key_name: row.get(5),
                total_typing_sec: row.get::<_, i32>(6) as i64,
                summary_sent: row.get::<_, i32>(7) != 0,
            })
            .collect())
    }

    fn put_daily_summaries(&self, rows: &[DailySummaryRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut written = 0;
        for row in rows {
            written += tx.execute(
                "INSERT INTO daily_summaries
                 (user_id, date, total_keystrokes, total_bursts, avg_wpm, slowest_keycode,
                  slowest_key_name, total_typing_sec, summary_sent)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (user_id, date) DO UPDATE SET
                     total_keystrokes = EXCLUDED.total_keystrokes,
                     total_bursts = EXCLUDED.total_bursts,
                     avg_wpm = EXCLUDED.avg_wpm,
                     slowest_keycode = EXCLUDED.slowest_keycode,
                     slowest_key_name = EXCLUDED.slowest_key_name,
                     total_typing_sec = EXCLUDED.total_typing_sec,
                     summary_sent = EXCLUDED.summary_sent",
                &[
                    &self.user_id,
                    &row.date,
                    &(row.total_keystrokes as i32),
                    &(row.total_bursts as i32),
                    &row.avg_wpm,
                    &row.slowest_keycode.map(|k| k as i32),
                    &row.slowest_key_name,
                    &(row.total_typing_sec as i32),
                    &(row.summary_sent as i32),
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn fetch_settings(&self) -> Result<Vec<SettingRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT key, value, updated_at FROM settings WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| SettingRow {
                key: row.get(0),
                value: row.get(1),
                updated_at: row.get(2),
            })
            .collect())
    }

    fn put_settings(&self, rows: &[SettingRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut written = 0;
        for row in rows {
            written += tx.execute(
                "INSERT INTO settings (user_id, key, value, updated_at)
                 VALUES ($1::uuid, $2, $3, $4)
                 ON CONFLICT (user_id, key) DO UPDATE SET
                     value = EXCLUDED.value,
                     updated_at = EXCLUDED.updated_at",
                &[&self.user_id, &row.key, &row.value, &row.updated_at],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn fetch_ignored_words(&self) -> Result<Vec<IgnoredWordRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT word_hash, added_at FROM ignored_words WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| IgnoredWordRow {
                word_hash: row.get(0),
                added_at: row.get(1),
            })
            .collect())
    }

    fn insert_ignored_words(&self, rows: &[IgnoredWordRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut inserted = 0;
        for row in rows {
            inserted += tx.execute(
                "INSERT INTO ignored_words (user_id, word_hash, added_at)
                 VALUES ($1::uuid, $2, $3)
                 ON CONFLICT (user_id, word_hash) DO NOTHING",
                &[&self.user_id, &row.word_hash, &row.added_at],
            )? as usize;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn fetch_sync_log(&self) -> Result<Vec<SyncLogRow>> {
        let mut client = lock(&self.client);
        let rows = client.query(
            "SELECT timestamp, machine_name, pushed, pulled, merged, duration_ms,
                    error, table_breakdown
             FROM sync_log WHERE user_id = $1::uuid",
            &[&self.user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let breakdown: Option<String> = row.get(7);
                SyncLogRow {
                    timestamp: row.get(0),
                    machine_name: row.get(1),
                    pushed: row.get::<_, i32>(2) as u64,
                    pulled: row.get::<_, i32>(3) as u64,
                    merged: row.get::<_, i32>(4) as u64,
                    duration_ms: row.get(5),
                    error: row.get(6),
                    table_breakdown: breakdown
                        .map(|json| SyncLogRow::breakdown_from_json(&json))
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    fn insert_sync_log(&self, rows: &[SyncLogRow]) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut inserted = 0;
        for row in rows {
            inserted += tx.execute(
                "INSERT INTO sync_log
                 (user_id, timestamp, machine_name, pushed, pulled, merged, duration_ms,
                  error, table_breakdown)
                 VALUES ($1::uuid, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (user_id, timestamp) DO NOTHING",
                &[
                    &self.user_id,
                    &row.timestamp,
                    &row.machine_name,
                    &(row.pushed as i32),
                    &(row.pulled as i32),
                    &(row.merged as i32),
                    &row.duration_ms,
                    &row.error,
                    &row.breakdown_json(),
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn delete_word_stats_matching(&self, words: &HashSet<String>) -> Result<usize> {
        let mut client = lock(&self.client);
        let mut tx = client.transaction()?;
        let mut deleted = 0;
        for word in words {
            deleted += tx.execute(
                "DELETE FROM word_statistics WHERE user_id = $1::uuid AND LOWER(word) = $2",
                &[&self.user_id, &word],
            )? as usize;
        }
        tx.commit()?;
        Ok(deleted)
    }
}
