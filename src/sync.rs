//! Bidirectional synchronization between the local and remote stores.
//!
//! Append-only tables exchange missing rows by natural key; aggregate
//! tables merge last-writer-wins on their update timestamp, with ties
//! transferring nothing in either direction so both sides converge
//! without oscillation. Each cycle produces one sync-log entry with a
//! per-table breakdown; a failure in one table aborts the remaining
//! tables but keeps the counts already recorded.

use crate::config::ConfigHandle;
use crate::dictionary::Dictionary;
use crate::error::{EngineError, Result};
use crate::notify::Notifier;
use crate::storage::{
    LocalStore, RemoteStore, SettingRow, SyncLogRow, SyncStore, TableCounts,
};
use crate::util::{machine_name, now_ms};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Merges two sides of one append-only or aggregate table.
struct MergeOutcome<T> {
    to_push: Vec<T>,
    to_pull: Vec<T>,
    merged: u64,
    skipped: Vec<String>,
}

/// Rows missing from the other side, by natural key. Append-only tables
/// never modify a row after insertion.
fn plan_append_only<T: Clone, K: Eq + Hash>(
    local: &[T],
    remote: &[T],
    key: impl Fn(&T) -> K,
) -> MergeOutcome<T> {
    let local_keys: HashSet<K> = local.iter().map(&key).collect();
    let remote_keys: HashSet<K> = remote.iter().map(&key).collect();
    MergeOutcome {
        to_push: local
            .iter()
            .filter(|row| !remote_keys.contains(&key(row)))
            .cloned()
            .collect(),
        to_pull: remote
            .iter()
            .filter(|row| !local_keys.contains(&key(row)))
            .cloned()
            .collect(),
        merged: 0,
        skipped: Vec::new(),
    }
}

/// Last-writer-wins plan for an aggregate table. Where both sides hold
/// the key, the strictly newer row overwrites the other and counts as
/// merged; equal timestamps transfer nothing. Rows with no usable update
/// timestamp on a contested key are skipped and reported.
fn plan_aggregate<T: Clone, K: Eq + Hash>(
    local: &[T],
    remote: &[T],
    key: impl Fn(&T) -> K,
    updated: impl Fn(&T) -> i64,
    describe: impl Fn(&T) -> String,
) -> MergeOutcome<T> {
    let remote_by_key: HashMap<K, &T> = remote.iter().map(|row| (key(row), row)).collect();
    let local_keys: HashSet<K> = local.iter().map(&key).collect();

    let mut outcome = MergeOutcome {
        to_push: Vec::new(),
        to_pull: Vec::new(),
        merged: 0,
        skipped: Vec::new(),
    };

    for row in local {
        match remote_by_key.get(&key(row)) {
            None => outcome.to_push.push(row.clone()),
            Some(other) => {
                let (local_ts, remote_ts) = (updated(row), updated(other));
                if local_ts <= 0 || remote_ts <= 0 {
                    outcome.skipped.push(describe(row));
                } else if local_ts > remote_ts {
                    outcome.to_push.push(row.clone());
                    outcome.merged += 1;
                } else if remote_ts > local_ts {
                    outcome.to_pull.push((*other).clone());
                    outcome.merged += 1;
                }
                // Equal timestamps: both sides already agree on recency;
                // transferring would only make the next sync non-idempotent.
            }
        }
    }
    for row in remote {
        if !local_keys.contains(&key(row)) {
            outcome.to_pull.push(row.clone());
        }
    }
    outcome
}

fn apply<T>(
    outcome: MergeOutcome<T>,
    push: impl Fn(&[T]) -> Result<usize>,
    pull: impl Fn(&[T]) -> Result<usize>,
) -> Result<(TableCounts, Vec<String>)> {
    let pushed = if outcome.to_push.is_empty() {
        0
    } else {
        push(&outcome.to_push)?
    };
    let pulled = if outcome.to_pull.is_empty() {
        0
    } else {
        pull(&outcome.to_pull)?
    };
    Ok((
        TableCounts {
            pushed: pushed as u64,
            pulled: pulled as u64,
            merged: outcome.merged,
        },
        outcome.skipped,
    ))
}

/// One full cycle over every table. Returns the log entry (not yet
/// persisted) and the settings rows that were pulled from the remote, so
/// the caller can apply their local side effects.
pub fn sync_once<L: SyncStore, R: SyncStore>(
    local: &L,
    remote: &R,
) -> (SyncLogRow, Vec<SettingRow>) {
    let started = Instant::now();
    let started_ms = now_ms();
    debug!(local = local.side(), remote = remote.side(), "sync cycle starting");
    let mut breakdown: BTreeMap<String, TableCounts> = BTreeMap::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut error: Option<String> = None;
    let mut pulled_settings: Vec<SettingRow> = Vec::new();

    let mut step = |name: &str,
                    error: &mut Option<String>,
                    f: &mut dyn FnMut() -> Result<(TableCounts, Vec<String>)>| {
        if error.is_some() {
            return;
        }
        match f() {
            Ok((counts, mut skip)) => {
                debug!(
                    table = name,
                    pushed = counts.pushed,
                    pulled = counts.pulled,
                    merged = counts.merged,
                    "table synced"
                );
                skipped.append(&mut skip);
                breakdown.insert(name.to_string(), counts);
            }
            Err(e) => {
                warn!(table = name, error = %e, "sync aborted");
                *error = Some(format!("{name}: {e}"));
            }
        }
    };

    step("bursts", &mut error, &mut || {
        let plan = plan_append_only(
            &local.fetch_bursts()?,
            &remote.fetch_bursts()?,
            |r| r.start_time,
        );
        apply(plan, |rows| remote.insert_bursts(rows), |rows| {
            local.insert_bursts(rows)
        })
    });

    step("high_scores", &mut error, &mut || {
        let plan = plan_append_only(
            &local.fetch_high_scores()?,
            &remote.fetch_high_scores()?,
            |r| r.timestamp,
        );
        apply(
            plan,
            |rows| remote.insert_high_scores(rows),
            |rows| local.insert_high_scores(rows),
        )
    });

    step("statistics", &mut error, &mut || {
        let plan = plan_aggregate(
            &local.fetch_key_stats()?,
            &remote.fetch_key_stats()?,
            |r| (r.keycode, r.layout.clone()),
            |r| r.last_updated,
            |r| format!("statistics({}, {})", r.keycode, r.layout),
        );
        apply(plan, |rows| remote.put_key_stats(rows), |rows| {
            local.put_key_stats(rows)
        })
    });

    step("digraph_statistics", &mut error, &mut || {
        let plan = plan_aggregate(
            &local.fetch_digraph_stats()?,
            &remote.fetch_digraph_stats()?,
            |r| (r.first_keycode, r.second_keycode, r.layout.clone()),
            |r| r.last_updated,
            |r| {
                format!(
                    "digraph_statistics({}, {}, {})",
                    r.first_keycode, r.second_keycode, r.layout
                )
            },
        );
        apply(
            plan,
            |rows| remote.put_digraph_stats(rows),
            |rows| local.put_digraph_stats(rows),
        )
    });

    step("word_statistics", &mut error, &mut || {
        let plan = plan_aggregate(
            &local.fetch_word_stats()?,
            &remote.fetch_word_stats()?,
            |r| (r.word.clone(), r.layout.clone()),
            |r| r.last_seen,
            |r| format!("word_statistics({}, {})", r.word, r.layout),
        );
        apply(
            plan,
            |rows| remote.put_word_stats(rows),
            |rows| local.put_word_stats(rows),
        )
    });

    step("daily_summaries", &mut error, &mut || {
        // Rollups carry no update timestamp of their own; recency follows
        // the larger activity counters, bigger wins.
        let plan = plan_aggregate(
            &local.fetch_daily_summaries()?,
            &remote.fetch_daily_summaries()?,
            |r| r.date.clone(),
            |r| (r.total_keystrokes + r.total_bursts) as i64,
            |r| format!("daily_summaries({})", r.date),
        );
        apply(
            plan,
            |rows| remote.put_daily_summaries(rows),
            |rows| local.put_daily_summaries(rows),
        )
    });

    step("settings", &mut error, &mut || {
        let plan = plan_aggregate(
            &local.fetch_settings()?,
            &remote.fetch_settings()?,
            |r| r.key.clone(),
            |r| r.updated_at,
            |r| format!("settings({})", r.key),
        );
        pulled_settings = plan.to_pull.clone();
        apply(plan, |rows| remote.put_settings(rows), |rows| {
            local.put_settings(rows)
        })
    });

    step("ignored_words", &mut error, &mut || {
        let plan = plan_append_only(
            &local.fetch_ignored_words()?,
            &remote.fetch_ignored_words()?,
            |r| r.word_hash.clone(),
        );
        apply(
            plan,
            |rows| remote.insert_ignored_words(rows),
            |rows| local.insert_ignored_words(rows),
        )
    });

    step("sync_log", &mut error, &mut || {
        let plan = plan_append_only(
            &local.fetch_sync_log()?,
            &remote.fetch_sync_log()?,
            |r| r.timestamp,
        );
        apply(
            plan,
            |rows| remote.insert_sync_log(rows),
            |rows| local.insert_sync_log(rows),
        )
    });

    if !skipped.is_empty() {
        let detail = format!("skipped unresolvable rows: {}", skipped.join(", "));
        error = Some(match error {
            Some(e) => format!("{e}; {detail}"),
            None => detail,
        });
    }

    let totals = breakdown.values().fold(TableCounts::default(), |acc, c| {
        TableCounts {
            pushed: acc.pushed + c.pushed,
            pulled: acc.pulled + c.pulled,
            merged: acc.merged + c.merged,
        }
    });

    let entry = SyncLogRow {
        timestamp: started_ms,
        machine_name: machine_name(),
        pushed: totals.pushed,
        pulled: totals.pulled,
        merged: totals.merged,
        duration_ms: started.elapsed().as_millis() as i64,
        error,
        table_breakdown: breakdown,
    };
    (entry, pulled_settings)
}

/// Owns the sync lock and schedules cycles against the configured remote.
pub struct SyncService {
    store: Arc<LocalStore>,
    config: ConfigHandle,
    notifier: Arc<Notifier>,
    dictionary: Arc<Mutex<Dictionary>>,
    names_file: Option<PathBuf>,
    in_progress: AtomicBool,
}

impl SyncService {
    pub fn new(
        store: Arc<LocalStore>,
        config: ConfigHandle,
        notifier: Arc<Notifier>,
        dictionary: Arc<Mutex<Dictionary>>,
        names_file: Option<PathBuf>,
    ) -> Self {
        SyncService {
            store,
            config,
            notifier,
            dictionary,
            names_file,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Runs one sync cycle. Non-blocking lock: a concurrent attempt
    /// returns `SyncInProgress` immediately.
    pub fn sync_now(&self) -> Result<SyncLogRow> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::SyncInProgress);
        }
        let result = self.run_cycle();
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    fn run_cycle(&self) -> Result<SyncLogRow> {
        let config = self.config.snapshot();
        if !config.postgres_sync_enabled {
            return Err(EngineError::ConfigInvalid(
                "postgres_sync_enabled is off".to_string(),
            ));
        }
        if config.postgres_url.is_empty() || config.sync_user_id.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "postgres_url and sync_user_id must be configured".to_string(),
            ));
        }

        info!("sync starting");
        let remote = match RemoteStore::connect(&config.postgres_url, &config.sync_user_id) {
            Ok(remote) => remote,
            Err(e) => {
                // Unreachable remote still leaves an audit row behind.
                let entry = SyncLogRow {
                    timestamp: now_ms(),
                    machine_name: machine_name(),
                    pushed: 0,
                    pulled: 0,
                    merged: 0,
                    duration_ms: 0,
                    error: Some(e.to_string()),
                    table_breakdown: BTreeMap::new(),
                };
                self.store.insert_sync_log(std::slice::from_ref(&entry))?;
                self.notifier.sync_finished(&entry);
                return Err(e);
            }
        };

        let (entry, pulled_settings) = sync_once(self.store.as_ref(), &remote);
        self.store.insert_sync_log(std::slice::from_ref(&entry))?;
        self.apply_pulled_settings(&pulled_settings)?;
        self.notifier.sync_finished(&entry);
        info!(
            pushed = entry.pushed,
            pulled = entry.pulled,
            merged = entry.merged,
            duration_ms = entry.duration_ms,
            "sync finished"
        );
        Ok(entry)
    }

    /// Applies settings that arrived from the remote. `exclude_names_enabled`
    /// has a cross-cutting side effect: enabling deletes every word-stat row
    /// matching the common-names set; disabling only stops future filtering.
    fn apply_pulled_settings(&self, pulled: &[SettingRow]) -> Result<()> {
        for setting in pulled {
            let previously_enabled = self.config.snapshot().exclude_names_enabled;
            match self.config.apply_setting(&setting.key, &setting.value) {
                Ok(_) => {}
                Err(e) => {
                    // Settings from other machines may target subsystems this
                    // build does not know; they still synced, just no effect.
                    debug!(key = %setting.key, error = %e, "pulled setting not applied");
                    continue;
                }
            }

            if setting.key == "exclude_names_enabled" {
                let enabled = self.config.snapshot().exclude_names_enabled;
                let mut dictionary = match self.dictionary.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                dictionary.set_exclude_names(enabled, self.names_file.as_deref());
                if enabled && !previously_enabled {
                    let deleted = self
                        .store
                        .delete_word_stats_matching(dictionary.names())?;
                    info!(deleted, "removed name statistics after settings sync");
                }
            }
        }
        Ok(())
    }
}
