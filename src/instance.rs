//! Single-instance enforcement via a PID lockfile.
//!
//! A live previous instance is asked to terminate (SIGTERM), given five
//! seconds, then killed. The stale file is replaced with our own PID and
//! removed again on drop.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Acquires the lockfile, displacing a live previous instance.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(existing_pid) = read_pid(path) {
            if process_alive(existing_pid) {
                info!(pid = existing_pid, "terminating previous instance");
                // SAFETY: plain signal send to a pid we just probed.
                unsafe { libc::kill(existing_pid, libc::SIGTERM) };

                let deadline = Instant::now() + TERMINATE_GRACE;
                while process_alive(existing_pid) && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(100));
                }
                if process_alive(existing_pid) {
                    warn!(pid = existing_pid, "previous instance ignored SIGTERM, killing");
                    // SAFETY: as above.
                    unsafe { libc::kill(existing_pid, libc::SIGKILL) };
                }
            }
            let _ = fs::remove_file(path);
        }

        fs::write(path, std::process::id().to_string())?;
        Ok(PidLock {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Only remove the file if it still names us; a replacement
        // instance may have taken over.
        if read_pid(&self.path) == Some(std::process::id() as i32) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only probes for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}
