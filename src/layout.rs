//! Active keyboard layout detection and publication.
//!
//! Detection walks a ladder of sources: the `XKB_DEFAULT_LAYOUT`
//! environment hint, `localectl status`, `/etc/default/keyboard`, and
//! `setxkbmap -query`, falling back to `us`. A monitor thread re-polls on
//! a 60 s cadence and fires a callback when the layout changes.

use std::fs;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Detects the current keyboard layout code (e.g. `us`, `de`).
pub fn detect_layout() -> String {
    if let Ok(env_layout) = std::env::var("XKB_DEFAULT_LAYOUT") {
        // A comma-separated list means multiple configured layouts; the
        // first entry is the active default.
        if let Some(first) = env_layout.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(layout) = layout_from_localectl() {
        return layout;
    }
    if let Some(layout) = layout_from_etc_keyboard() {
        return layout;
    }
    if let Some(layout) = layout_from_setxkbmap() {
        return layout;
    }

    "us".to_string()
}

fn layout_from_localectl() -> Option<String> {
    let output = Command::new("localectl").arg("status").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("X11 Layout:") {
            let layout = rest.trim().split(',').next()?.trim();
            if !layout.is_empty() {
                return Some(layout.to_string());
            }
        }
    }
    None
}

fn layout_from_etc_keyboard() -> Option<String> {
    let contents = fs::read_to_string("/etc/default/keyboard").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.trim().strip_prefix("XKBLAYOUT=") {
            let value = rest.trim_matches(|c| c == '"' || c == '\'');
            let layout = value.split(',').next()?.trim();
            if !layout.is_empty() {
                return Some(layout.to_string());
            }
        }
    }
    None
}

fn layout_from_setxkbmap() -> Option<String> {
    let output = Command::new("setxkbmap").arg("-query").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("layout:") {
            let layout = rest.trim().split(',').next()?.trim();
            if !layout.is_empty() {
                return Some(layout.to_string());
            }
        }
    }
    None
}

/// Publishes the current layout and re-detects on a fixed cadence.
///
/// Readers call [`LayoutMonitor::current`]; a change fires the registered
/// callback from the monitor thread.
pub struct LayoutMonitor {
    current: Arc<Mutex<String>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LayoutMonitor {
    /// Detects the initial layout and starts the poll thread.
    pub fn start(on_change: impl Fn(&str) + Send + 'static) -> Self {
        let initial = detect_layout();
        info!(layout = %initial, "keyboard layout detected");
        if !crate::keymap::is_supported_layout(&initial) {
            debug!(layout = %initial, "no keycode table for layout, key names fall back to us");
        }

        let current = Arc::new(Mutex::new(initial));
        let running = Arc::new(AtomicBool::new(true));

        let current_clone = Arc::clone(&current);
        let running_clone = Arc::clone(&running);
        let handle = thread::spawn(move || {
            // Sleep in short slices so stop is observed promptly.
            let slice = Duration::from_millis(500);
            let mut elapsed = Duration::ZERO;
            while running_clone.load(Ordering::SeqCst) {
                thread::sleep(slice);
                elapsed += slice;
                if elapsed < POLL_INTERVAL {
                    continue;
                }
                elapsed = Duration::ZERO;

                let detected = detect_layout();
                let mut guard = match current_clone.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if *guard != detected {
                    debug!(from = %*guard, to = %detected, "layout change");
                    *guard = detected.clone();
                    drop(guard);
                    on_change(&detected);
                }
            }
        });

        LayoutMonitor {
            current,
            running,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The most recently published layout code.
    pub fn current(&self) -> String {
        match self.current.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Signals the poll thread to stop and joins it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for LayoutMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
