//! Raw input event decoding and the queue-borne key event type.

use input_linux_sys::{input_event, EV_KEY};
use std::io::{self, ErrorKind};
use std::mem::size_of;
use std::os::unix::io::RawFd;

/// A decoded key press flowing through the event queue.
///
/// Only presses are produced; releases and auto-repeats are discarded at the
/// device source. Lifetime is queue-bound: consumed within milliseconds and
/// never persisted.
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub keycode: u16,
    pub key_name: String,
    pub timestamp_ms: i64,
    pub is_press: bool,
}

/// Reads exactly one `input_event` from a raw file descriptor.
///
/// Retries on EINTR and partial reads. Returns `Ok(None)` on clean EOF
/// before any byte of an event was read; EOF mid-event is an error.
pub fn read_event_raw(fd: RawFd) -> io::Result<Option<input_event>> {
    let mut buf = [0u8; size_of::<input_event>()];
    let mut bytes_read = 0;
    let total = buf.len();

    while bytes_read < total {
        // SAFETY: the pointer is derived from a live mutable buffer and the
        // length never exceeds the remaining capacity.
        let result = unsafe {
            libc::read(
                fd,
                buf.as_mut_ptr().add(bytes_read) as *mut libc::c_void,
                total - bytes_read,
            )
        };

        match result {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() != ErrorKind::Interrupted {
                    return Err(err);
                }
            }
            0 => {
                if bytes_read == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "EOF reached mid-event",
                ));
            }
            n if n > 0 => bytes_read += n as usize,
            _ => {
                return Err(io::Error::other("libc::read returned unexpected value"));
            }
        }
    }

    // SAFETY: the buffer holds exactly one input_event worth of bytes and
    // input_event has a C representation; alignment is handled by
    // read_unaligned.
    let event: input_event = unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const _) };
    Ok(Some(event))
}

/// Event timestamp in integer milliseconds since epoch.
#[inline]
pub fn event_milliseconds(event: &input_event) -> i64 {
    let sec = event.time.tv_sec as i64;
    let usec = event.time.tv_usec as i64;
    sec * 1_000 + usec / 1_000
}

/// Checks whether the event type is EV_KEY.
#[inline]
pub fn is_key_event(event: &input_event) -> bool {
    i32::from(event.type_) == EV_KEY
}

/// True for value 1 (press). Releases are 0, synthetic auto-repeats are 2.
#[inline]
pub fn is_press(event: &input_event) -> bool {
    event.value == 1
}
