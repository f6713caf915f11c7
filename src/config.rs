//! Typed engine configuration.
//!
//! Values come from an optional TOML file, overlaid by rows of the
//! `settings` table (which sync across machines), overlaid by CLI flags.
//! Every component receives an immutable `Arc<Config>` snapshot; live
//! updates build a new snapshot, validate it, and swap. A snapshot that
//! fails validation is rejected and the previous values stay in effect.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// How a burst's duration is computed from its press timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationMethod {
    /// `end_ms - start_ms`.
    TotalTime,
    /// Sum of inter-press gaps not exceeding `active_time_threshold_ms`.
    ActiveTime,
}

impl DurationMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "total_time" => Some(DurationMethod::TotalTime),
            "active_time" => Some(DurationMethod::ActiveTime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationMethod::TotalTime => "total_time",
            DurationMethod::ActiveTime => "active_time",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Burst detection
    pub burst_timeout_ms: i64,
    pub burst_duration_calculation: DurationMethod,
    pub active_time_threshold_ms: i64,
    pub high_score_min_duration_ms: i64,
    pub min_burst_key_count: u32,
    pub min_burst_duration_ms: i64,
    pub max_realistic_wpm: u32,

    // Word segmentation
    pub word_boundary_timeout_ms: i64,

    // Dictionary
    pub dictionary_mode: String,
    pub enabled_languages: String,
    pub enabled_dictionaries: String,
    pub dictionary_auto_fallback: bool,
    pub exclude_names_enabled: bool,

    // Retention
    pub data_retention_days: i64,

    // Sync
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_sec: u64,
    pub postgres_sync_enabled: bool,
    pub postgres_url: String,
    pub sync_user_id: String,

    // Notifications
    pub notification_time_hour: u8,
    pub worst_letter_notifications_enabled: bool,
    pub worst_letter_notification_debounce_min: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            burst_timeout_ms: 1000,
            burst_duration_calculation: DurationMethod::TotalTime,
            active_time_threshold_ms: 500,
            high_score_min_duration_ms: 10_000,
            min_burst_key_count: 10,
            min_burst_duration_ms: 5000,
            max_realistic_wpm: 300,
            word_boundary_timeout_ms: 1000,
            dictionary_mode: "validate".to_string(),
            enabled_languages: "en,de".to_string(),
            enabled_dictionaries: String::new(),
            dictionary_auto_fallback: true,
            exclude_names_enabled: false,
            data_retention_days: -1,
            auto_sync_enabled: false,
            auto_sync_interval_sec: 300,
            postgres_sync_enabled: false,
            postgres_url: String::new(),
            sync_user_id: String::new(),
            notification_time_hour: 18,
            worst_letter_notifications_enabled: false,
            worst_letter_notification_debounce_min: 5,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, or defaults when the file
    /// does not exist. The result is validated before being returned.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&contents)
                .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks per-field bounds and inter-field constraints.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: i64) -> Result<()> {
            if v <= 0 {
                return Err(EngineError::ConfigInvalid(format!(
                    "{name} must be > 0, got {v}"
                )));
            }
            Ok(())
        }

        positive("burst_timeout_ms", self.burst_timeout_ms)?;
        positive("active_time_threshold_ms", self.active_time_threshold_ms)?;
        positive("high_score_min_duration_ms", self.high_score_min_duration_ms)?;
        positive("min_burst_duration_ms", self.min_burst_duration_ms)?;
        positive("word_boundary_timeout_ms", self.word_boundary_timeout_ms)?;

        if self.min_burst_key_count < 1 {
            return Err(EngineError::ConfigInvalid(
                "min_burst_key_count must be >= 1".to_string(),
            ));
        }
        if self.max_realistic_wpm == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_realistic_wpm must be > 0".to_string(),
            ));
        }
        if self.active_time_threshold_ms >= self.burst_timeout_ms {
            return Err(EngineError::ConfigInvalid(format!(
                "active_time_threshold_ms ({}) must be less than burst_timeout_ms ({})",
                self.active_time_threshold_ms, self.burst_timeout_ms
            )));
        }
        if self.data_retention_days < -1 {
            return Err(EngineError::ConfigInvalid(format!(
                "data_retention_days must be >= -1, got {}",
                self.data_retention_days
            )));
        }
        if !matches!(self.dictionary_mode.as_str(), "validate" | "accept_all") {
            return Err(EngineError::ConfigInvalid(format!(
                "dictionary_mode must be 'validate' or 'accept_all', got {:?}",
                self.dictionary_mode
            )));
        }
        if self.auto_sync_interval_sec == 0 {
            return Err(EngineError::ConfigInvalid(
                "auto_sync_interval_sec must be > 0".to_string(),
            ));
        }
        if self.notification_time_hour > 23 {
            return Err(EngineError::ConfigInvalid(format!(
                "notification_time_hour must be 0..=23, got {}",
                self.notification_time_hour
            )));
        }
        if self.worst_letter_notification_debounce_min < 1 {
            return Err(EngineError::ConfigInvalid(
                "worst_letter_notification_debounce_min must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a new snapshot with one setting changed. Used for settings-table
    /// overlay and live updates; unknown keys and parse failures are rejected.
    pub fn with_setting(&self, key: &str, value: &str) -> Result<Config> {
        let mut next = self.clone();
        let bad = |k: &str, v: &str| {
            EngineError::ConfigInvalid(format!("invalid value {v:?} for setting {k:?}"))
        };

        match key {
            "burst_timeout_ms" => {
                next.burst_timeout_ms = value.parse().map_err(|_| bad(key, value))?
            }
            "burst_duration_calculation" => {
                next.burst_duration_calculation =
                    DurationMethod::parse(value).ok_or_else(|| bad(key, value))?
            }
            "active_time_threshold_ms" => {
                next.active_time_threshold_ms = value.parse().map_err(|_| bad(key, value))?
            }
            "high_score_min_duration_ms" => {
                next.high_score_min_duration_ms = value.parse().map_err(|_| bad(key, value))?
            }
            "min_burst_key_count" => {
                next.min_burst_key_count = value.parse().map_err(|_| bad(key, value))?
            }
            "min_burst_duration_ms" => {
                next.min_burst_duration_ms = value.parse().map_err(|_| bad(key, value))?
            }
            "max_realistic_wpm" => {
                next.max_realistic_wpm = value.parse().map_err(|_| bad(key, value))?
            }
            "word_boundary_timeout_ms" => {
                next.word_boundary_timeout_ms = value.parse().map_err(|_| bad(key, value))?
            }
            "dictionary_mode" => next.dictionary_mode = value.to_string(),
            "enabled_languages" => next.enabled_languages = value.to_string(),
            "enabled_dictionaries" => next.enabled_dictionaries = value.to_string(),
            "dictionary_auto_fallback" => {
                next.dictionary_auto_fallback = parse_bool(value).ok_or_else(|| bad(key, value))?
            }
            "exclude_names_enabled" => {
                next.exclude_names_enabled = parse_bool(value).ok_or_else(|| bad(key, value))?
            }
            "data_retention_days" => {
                next.data_retention_days = value.parse().map_err(|_| bad(key, value))?
            }
            "auto_sync_enabled" => {
                next.auto_sync_enabled = parse_bool(value).ok_or_else(|| bad(key, value))?
            }
            "auto_sync_interval_sec" => {
                next.auto_sync_interval_sec = value.parse().map_err(|_| bad(key, value))?
            }
            "postgres_sync_enabled" => {
                next.postgres_sync_enabled = parse_bool(value).ok_or_else(|| bad(key, value))?
            }
            "postgres_url" => next.postgres_url = value.to_string(),
            "sync_user_id" => next.sync_user_id = value.to_string(),
            "notification_time_hour" => {
                next.notification_time_hour = value.parse().map_err(|_| bad(key, value))?
            }
            "worst_letter_notifications_enabled" => {
                next.worst_letter_notifications_enabled =
                    parse_bool(value).ok_or_else(|| bad(key, value))?
            }
            "worst_letter_notification_debounce_min" => {
                next.worst_letter_notification_debounce_min =
                    value.parse().map_err(|_| bad(key, value))?
            }
            _ => {
                return Err(EngineError::ConfigInvalid(format!(
                    "unknown setting key {key:?}"
                )))
            }
        }

        next.validate()?;
        Ok(next)
    }

    /// Languages from the comma-separated `enabled_languages` value.
    pub fn languages(&self) -> Vec<String> {
        self.enabled_languages
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Explicit dictionary file paths, when configured.
    pub fn dictionary_paths(&self) -> Vec<String> {
        self.enabled_dictionaries
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn accept_all_mode(&self) -> bool {
        self.dictionary_mode == "accept_all"
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_sec)
    }

    pub fn worst_letter_debounce(&self) -> Duration {
        Duration::from_secs(u64::from(self.worst_letter_notification_debounce_min) * 60)
    }
}

/// Shared handle over the current configuration snapshot.
///
/// Components keep the handle and take an `Arc<Config>` per operation;
/// updates validate a candidate snapshot before swapping it in, so a bad
/// update leaves the previous values in effect.
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<Arc<Config>>>);

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        ConfigHandle(Arc::new(RwLock::new(Arc::new(config))))
    }

    pub fn snapshot(&self) -> Arc<Config> {
        match self.0.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Applies one setting; rejects unknown keys and constraint violations
    /// without touching the live snapshot.
    pub fn apply_setting(&self, key: &str, value: &str) -> Result<Arc<Config>> {
        let next = Arc::new(self.snapshot().with_setting(key, value)?);
        self.swap(Arc::clone(&next));
        Ok(next)
    }

    fn swap(&self, next: Arc<Config>) {
        match self.0.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
