//! Keyboard device discovery and the reader thread.
//!
//! Enumerates `/dev/input/event*`, keeps devices whose key capability set
//! looks like a keyboard, and reads press events from all of them through
//! a single multiplexed `poll` with a short timeout so the stop flag is
//! observed promptly. Presses are forwarded into the bounded event queue;
//! a full queue drops the newest event and counts it.

use crate::error::{EngineError, Result};
use crate::event::{self, KeyEvent};
use crate::keymap;
use crate::layout::LayoutMonitor;
use crossbeam_channel::{Sender, TrySendError};
use libc::{c_ulong, ioctl};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Multiplexed wait timeout; bounds stop-flag latency.
const POLL_TIMEOUT_MS: i32 = 100;

/// Key codes whose presence marks a device as a keyboard:
/// the letter rows plus SPACE, ENTER and ESC.
const LETTER_CODE_RANGE: std::ops::RangeInclusive<u16> = 16..=50;
const MARKER_CODES: [u16; 3] = [57, 28, 1];

/// Producer-side accounting for the queue overflow property:
/// `dropped + delivered == produced`.
#[derive(Default)]
pub struct QueueCounters {
    pub produced: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
}

/// An opened keyboard device.
struct KeyboardDevice {
    path: PathBuf,
    file: File,
    name: String,
}

pub struct DeviceSource {
    devices: Vec<KeyboardDevice>,
    pub counters: Arc<QueueCounters>,
}

impl DeviceSource {
    /// Enumerates input devices and keeps the keyboards.
    ///
    /// Fails with `NoInputDevices` when nothing usable exists, or
    /// `PermissionDenied` when devices exist but none could be opened.
    pub fn discover() -> Result<Self> {
        let mut devices = Vec::new();
        let mut scanned = 0;
        let mut denied = 0;

        let mut entries: Vec<PathBuf> = fs::read_dir("/dev/input")?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let name = path.file_name()?.to_str()?;
                name.starts_with("event").then_some(path)
            })
            .collect();
        entries.sort();

        for path in entries {
            scanned += 1;
            let file = match OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&path)
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    denied += 1;
                    continue;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping device");
                    continue;
                }
            };

            let fd = file.as_raw_fd();
            if !has_keyboard_keys(fd) {
                continue;
            }
            let name = device_name(fd).unwrap_or_else(|_| "<unknown>".to_string());
            info!(path = %path.display(), name = %name, "found keyboard");
            devices.push(KeyboardDevice { path, file, name });
        }

        if devices.is_empty() {
            if denied > 0 {
                return Err(EngineError::PermissionDenied { scanned, denied });
            }
            return Err(EngineError::NoInputDevices);
        }
        Ok(DeviceSource {
            devices,
            counters: Arc::new(QueueCounters::default()),
        })
    }

    /// Spawns the reader thread. It owns the device handles exclusively
    /// and forwards presses until the stop flag is set.
    pub fn start(
        self,
        sender: Sender<KeyEvent>,
        layout: Arc<LayoutMonitor>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let counters = Arc::clone(&self.counters);
        let mut devices = self.devices;
        thread::spawn(move || {
            info!(devices = devices.len(), "device reader started");
            while !stop.load(Ordering::SeqCst) {
                if devices.is_empty() {
                    error!("all input devices disconnected, reader exiting");
                    break;
                }

                let mut fds: Vec<libc::pollfd> = devices
                    .iter()
                    .map(|d| libc::pollfd {
                        fd: d.file.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    })
                    .collect();

                // SAFETY: fds points at a live, correctly sized array.
                let ready =
                    unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
                if ready < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == ErrorKind::Interrupted {
                        continue;
                    }
                    error!(error = %err, "poll failed, reader exiting");
                    break;
                }
                if ready == 0 {
                    continue;
                }

                let mut disconnected: Vec<usize> = Vec::new();
                for (idx, pollfd) in fds.iter().enumerate() {
                    if pollfd.revents == 0 {
                        continue;
                    }
                    if pollfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
                        disconnected.push(idx);
                        continue;
                    }
                    if let Err(e) =
                        drain_device(pollfd.fd, &layout, &sender, &counters)
                    {
                        if is_disconnect(&e) {
                            disconnected.push(idx);
                        } else {
                            warn!(error = %e, "device read error");
                        }
                    }
                }

                // Runtime disconnect: log, drop the device, keep the rest.
                for idx in disconnected.into_iter().rev() {
                    let device = devices.remove(idx);
                    warn!(path = %device.path.display(), name = %device.name, "device disconnected");
                }
            }
            info!("device reader stopped");
        })
    }
}

/// Reads every queued event from one device (non-blocking) and forwards
/// the presses. Auto-repeats and releases are discarded here so the queue
/// only ever carries presses.
fn drain_device(
    fd: RawFd,
    layout: &LayoutMonitor,
    sender: &Sender<KeyEvent>,
    counters: &QueueCounters,
) -> io::Result<()> {
    loop {
        let raw = match event::read_event_raw(fd) {
            Ok(Some(ev)) => ev,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        };

        if !event::is_key_event(&raw) || !event::is_press(&raw) {
            continue;
        }

        let current_layout = layout.current();
        let key_event = KeyEvent {
            keycode: raw.code,
            key_name: keymap::get_key_name(raw.code, &current_layout),
            timestamp_ms: event::event_milliseconds(&raw),
            is_press: true,
        };

        counters.produced.fetch_add(1, Ordering::Relaxed);
        match sender.try_send(key_event) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                // Never stall the producer: drop the newest event.
                let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    warn!(dropped, "event queue full, dropping events");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(io::Error::new(
                    ErrorKind::BrokenPipe,
                    "event queue disconnected",
                ));
            }
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENODEV)) || e.kind() == ErrorKind::BrokenPipe
}

/// True when the device advertises EV_KEY with letter keys or any of the
/// marker keys.
fn has_keyboard_keys(fd: RawFd) -> bool {
    // Event-type bitmap first: the device must support EV_KEY at all.
    let mut type_bits = [0u8; (input_linux_sys::EV_MAX as usize / 8) + 1];
    if eviocgbit(fd, 0, &mut type_bits).is_err() {
        return false;
    }
    if !is_bit_set(&type_bits, input_linux_sys::EV_KEY as usize) {
        return false;
    }

    // Then the key bitmap for concrete codes.
    let mut key_bits = [0u8; (input_linux_sys::KEY_MAX as usize / 8) + 1];
    if eviocgbit(fd, input_linux_sys::EV_KEY as u8, &mut key_bits).is_err() {
        return false;
    }
    LETTER_CODE_RANGE
        .clone()
        .any(|code| is_bit_set(&key_bits, code as usize))
        || MARKER_CODES
            .iter()
            .any(|code| is_bit_set(&key_bits, *code as usize))
}

#[inline]
fn is_bit_set(buf: &[u8], bit: usize) -> bool {
    let byte = bit / 8;
    byte < buf.len() && (buf[byte] & (1 << (bit % 8))) != 0
}

// Linux ioctl plumbing for EVIOCGNAME and EVIOCGBIT.

const fn ior(ty: u8, nr: u8, size: usize) -> c_ulong {
    ((2u64 << 30) | ((size as u64) << 16) | ((ty as u64) << 8) | (nr as u64)) as c_ulong
}

const EVIOCGNAME_LEN: usize = 256;
const EVIOCGNAME_IOCTL: c_ulong = ior(b'E', 0x06, EVIOCGNAME_LEN);

fn device_name(fd: RawFd) -> io::Result<String> {
    let mut buf = [0u8; EVIOCGNAME_LEN];
    // SAFETY: the buffer matches the length encoded in the ioctl number.
    let res = unsafe { ioctl(fd, EVIOCGNAME_IOCTL, buf.as_mut_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    let nul = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..nul]).to_string())
}

fn eviocgbit(fd: RawFd, ev_type: u8, buf: &mut [u8]) -> io::Result<()> {
    let ioctl_num = ior(b'E', 0x20 + ev_type, buf.len());
    // SAFETY: the buffer length matches the size encoded in the ioctl number.
    let res = unsafe { ioctl(fd, ioctl_num, buf.as_mut_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Prints discovered keyboards to stderr (`--list-devices` mode).
pub fn list_devices() -> Result<()> {
    let source = DeviceSource::discover()?;
    eprintln!("{:<20} {}", "Device", "Name");
    for device in &source.devices {
        eprintln!("{:<20} {}", device.path.display(), device.name);
    }
    Ok(())
}
