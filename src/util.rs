//! Utility functions shared across modules.

use chrono::Local;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Formats a duration in milliseconds into a human-readable string (ms or s).
#[inline]
pub fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms} ms")
    } else {
        format!("{:.1} s", ms as f64 / 1000.0)
    }
}

/// Formats a `std::time::Duration` into a human-readable string using `humantime`.
#[inline]
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Current wall-clock time in integer milliseconds since epoch.
#[inline]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Today's date in the local zone, formatted `YYYY-MM-DD`.
/// This is the primary key of daily summary rows.
#[inline]
pub fn today_string() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Local date string for an epoch-milliseconds timestamp.
#[inline]
pub fn date_string_for_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_else(today_string)
}

/// Hostname of this machine, used as the `machine_name` in sync log rows.
///
/// Falls back to `"unknown"` when the hostname cannot be read.
pub fn machine_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer of the length we pass.
    let res = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if res != 0 {
        return "unknown".to_string();
    }
    let nul = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..nul]).trim().to_string();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_switches_units() {
        assert_eq!(format_ms(999), "999 ms");
        assert_eq!(format_ms(1500), "1.5 s");
    }

    #[test]
    fn machine_name_is_nonempty() {
        assert!(!machine_name().is_empty());
    }
}
