// Main application entry point.
// Orchestrates command-line parsing, key and storage setup, thread
// startup, signal handling, and ordered shutdown.

use anyhow::Context;
use chrono::NaiveDate;
use crossbeam_channel::bounded;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use typetrace::cli;
use typetrace::config::{Config, ConfigHandle};
use typetrace::device::{self, DeviceSource};
use typetrace::dictionary::Dictionary;
use typetrace::engine::Engine;
use typetrace::error::EngineError;
use typetrace::hasher::WordHasher;
use typetrace::instance::PidLock;
use typetrace::jobs::JobRunner;
use typetrace::layout::LayoutMonitor;
use typetrace::notify::{LogSink, Notifier};
use typetrace::storage::LocalStore;
use typetrace::sync::SyncService;
use typetrace::util::now_ms;

/// Event queue capacity between the device reader and the consumer.
const EVENT_QUEUE_CAPACITY: usize = 1000;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);
const SUMMARY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(6 * 3600);

fn main() -> anyhow::Result<()> {
    let args = cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TYPETRACE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list_devices {
        return device::list_devices().context("listing input devices");
    }

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("config.toml"));
    let config = ConfigHandle::new(Config::load(&config_path)?);

    let master_key = fetch_master_key()?;
    let store = Arc::new(LocalStore::open(
        &data_dir.join("telemetry.db"),
        &master_key,
    )?);

    // Persisted settings overlay the file; they carry cross-machine state.
    for setting in store.all_settings()? {
        if let Err(e) = config.apply_setting(&setting.key, &setting.value) {
            debug!(key = %setting.key, error = %e, "stored setting not applied");
        }
    }

    let hasher = Arc::new(WordHasher::new(&master_key));

    // --- one-shot modes ---

    if let Some(assignment) = &args.set {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| EngineError::ConfigInvalid("expected KEY=VALUE".to_string()))?;
        config.apply_setting(key, value)?;
        store.set_setting(key, value, now_ms())?;
        println!("{key} = {value}");
        return Ok(());
    }

    if let Some(word) = &args.ignore_word {
        let lower = word.to_lowercase();
        store.add_ignored_word(&lower, &hasher.hash_word(&lower), now_ms())?;
        println!("ignored (stored as hash only)");
        return Ok(());
    }

    if let Some(path) = &args.export_csv {
        let start_ms = args
            .export_start
            .as_deref()
            .map(day_start_ms)
            .transpose()?
            .unwrap_or(0);
        let end_ms = args
            .export_end
            .as_deref()
            .map(|d| day_start_ms(d).map(|ms| ms + 86_400_000))
            .transpose()?
            .unwrap_or(i64::MAX);
        let out = File::create(path)?;
        let rows = store.export_csv(out, start_ms, end_ms)?;
        println!("exported {rows} rows to {}", path.display());
        return Ok(());
    }

    if args.retention_sweep {
        let days = config.snapshot().data_retention_days;
        let deleted = store.delete_old_data(days, now_ms())?;
        println!("deleted {deleted} rows (retention {days} days)");
        return Ok(());
    }

    if args.clear_data {
        store.clear_all(true)?;
        println!("all telemetry data cleared");
        return Ok(());
    }

    let ignore_file = data_dir.join("ignorewords.txt");
    let names_file = data_dir.join("names.txt");
    let dictionary = Arc::new(Mutex::new(build_dictionary(
        &config,
        &store,
        &ignore_file,
        &names_file,
    )?));

    let notifier = Arc::new(Notifier::new(Box::new(LogSink), config.clone()));
    let sync_service = Arc::new(SyncService::new(
        Arc::clone(&store),
        config.clone(),
        Arc::clone(&notifier),
        Arc::clone(&dictionary),
        Some(names_file.clone()),
    ));

    if args.sync_now {
        let entry = sync_service.sync_now()?;
        println!(
            "pushed={} pulled={} merged={} duration={}ms",
            entry.pushed, entry.pulled, entry.merged, entry.duration_ms
        );
        return Ok(());
    }

    // --- daemon mode ---

    let _pid_lock = PidLock::acquire(&data_dir.join("typetrace.pid"))?;

    let stop = Arc::new(AtomicBool::new(false));
    let layout = Arc::new(LayoutMonitor::start(|new_layout| {
        info!(layout = %new_layout, "keyboard layout changed");
    }));

    let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY);
    let source = DeviceSource::discover()?;
    let counters = Arc::clone(&source.counters);
    let device_handle = source.start(sender, Arc::clone(&layout), Arc::clone(&stop));

    let engine = Engine::new(
        receiver,
        Arc::clone(&stop),
        config.clone(),
        Arc::clone(&layout),
        Arc::clone(&dictionary),
        Arc::clone(&hasher),
        Arc::clone(&store),
        Arc::clone(&notifier),
    );
    let engine_handle = thread::Builder::new()
        .name("consumer".to_string())
        .spawn(move || engine.run())?;

    let jobs = JobRunner::new(2);

    // Signal thread flips the shared stop flag; every long-lived thread
    // observes it between blocking operations.
    let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])?;
    let stop_for_signals = Arc::clone(&stop);
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "received termination signal");
            stop_for_signals.store(true, Ordering::SeqCst);
        }
    });

    info!("typetrace running");
    let started = Instant::now();

    let mut last_sync = Instant::now();
    let mut last_retention: Option<Instant> = None;
    let mut last_health = Instant::now();
    let mut last_summary_check = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(500));
        let snapshot = config.snapshot();

        if snapshot.auto_sync_enabled
            && snapshot.postgres_sync_enabled
            && last_sync.elapsed() >= snapshot.sync_interval()
        {
            last_sync = Instant::now();
            let service = Arc::clone(&sync_service);
            jobs.submit("sync", move || match service.sync_now() {
                Ok(_) => {}
                Err(EngineError::SyncInProgress) => debug!("sync already in progress"),
                Err(e) => warn!(error = %e, "sync failed"),
            });
        }

        let retention_due =
            last_retention.map_or(true, |t| t.elapsed() >= RETENTION_INTERVAL);
        if snapshot.data_retention_days >= 0 && retention_due {
            last_retention = Some(Instant::now());
            let store = Arc::clone(&store);
            let days = snapshot.data_retention_days;
            jobs.submit("retention", move || {
                match store.delete_old_data(days, now_ms()) {
                    Ok(deleted) if deleted > 0 => info!(deleted, "retention sweep"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            });
        }

        if last_summary_check.elapsed() >= SUMMARY_CHECK_INTERVAL {
            last_summary_check = Instant::now();
            let store = Arc::clone(&store);
            let notifier = Arc::clone(&notifier);
            jobs.submit("daily-summary", move || {
                if let Err(e) = notifier.daily_summary_check(&store) {
                    warn!(error = %e, "daily summary check failed");
                }
            });
        }

        if last_health.elapsed() >= HEALTH_CHECK_INTERVAL {
            last_health = Instant::now();
            let counters = Arc::clone(&counters);
            let store = Arc::clone(&store);
            let layout = Arc::clone(&layout);
            jobs.submit("health-check", move || {
                let produced = counters.produced.load(Ordering::Relaxed);
                let delivered = counters.delivered.load(Ordering::Relaxed);
                let dropped = counters.dropped.load(Ordering::Relaxed);
                let started = Instant::now();
                let query = store.key_stats_for_layout(&layout.current(), 20);
                info!(
                    produced,
                    delivered,
                    dropped,
                    query_ms = started.elapsed().as_millis() as u64,
                    query_ok = query.is_ok(),
                    "health check"
                );
            });
        }
    }

    // Shutdown order: silence the source first, then drain the consumer,
    // then the job pool. Join budget is bounded by each thread's poll
    // timeout.
    info!("shutting down");
    if device_handle.join().is_err() {
        error!("device reader panicked");
    }
    if engine_handle.join().is_err() {
        error!("event consumer panicked");
    }
    jobs.shutdown();
    layout.stop();
    info!(
        uptime = %typetrace::util::format_duration(started.elapsed()),
        "shutdown complete"
    );
    Ok(())
}

fn default_data_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("typetrace");
    }
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    PathBuf::from(home).join(".local/share/typetrace")
}

/// Fetches the 32-byte master key from the OS secret store, generating
/// and persisting one on first run.
fn fetch_master_key() -> typetrace::Result<[u8; 32]> {
    let entry = keyring::Entry::new("typetrace", "master-key")
        .map_err(|e| EngineError::KeyringUnavailable(e.to_string()))?;

    let hex_key = match entry.get_password() {
        Ok(existing) => existing,
        Err(keyring::Error::NoEntry) => {
            let mut key = [0u8; 32];
            rand::Rng::fill(&mut rand::thread_rng(), &mut key);
            let encoded = hex::encode(key);
            entry
                .set_password(&encoded)
                .map_err(|e| EngineError::KeyringUnavailable(e.to_string()))?;
            info!("generated new master key");
            encoded
        }
        Err(e) => return Err(EngineError::KeyringUnavailable(e.to_string())),
    };

    let bytes = hex::decode(&hex_key)
        .map_err(|e| EngineError::KeyringUnavailable(format!("stored key not hex: {e}")))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| EngineError::KeyringUnavailable("stored key has wrong length".to_string()))?;
    Ok(key)
}

fn build_dictionary(
    config: &ConfigHandle,
    store: &LocalStore,
    ignore_file: &Path,
    names_file: &Path,
) -> typetrace::Result<Dictionary> {
    let snapshot = config.snapshot();
    let ignore = ignore_file.exists().then_some(ignore_file);
    let names = names_file.exists().then_some(names_file);
    let mut dictionary = Dictionary::new(&snapshot, ignore, names);
    let hashes: HashSet<String> = store.ignored_hashes()?;
    dictionary.set_ignored_hashes(hashes);
    Ok(dictionary)
}

/// Epoch milliseconds of local midnight for a `YYYY-MM-DD` date.
fn day_start_ms(date: &str) -> typetrace::Result<i64> {
    use chrono::{Local, TimeZone};
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| EngineError::ConfigInvalid(format!("bad date {date:?}: {e}")))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| EngineError::ConfigInvalid(format!("bad date {date:?}")))?;
    Ok(Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0))
}
