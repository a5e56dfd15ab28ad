//! A minimal binding over the raw inotify syscalls (spec §3 "Watch
//! instance", §4.5, §6). A safe high-level notification crate is
//! deliberately not used here: the daemon's correctness depends on exact
//! control over the read-buffer size, the raw watch-descriptor integer used
//! as a table index (spec §4.3), and decoding only the first event record
//! out of a read that may contain several (spec §4.5's documented
//! limitation).

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

use nix::errno::Errno;

use crate::error::{FatalError, WatchError};
use crate::mask::EventMask;

/// Size in bytes of the fixed portion of `struct inotify_event`:
/// `wd: i32, mask: u32, cookie: u32, len: u32`.
pub const EVENT_HEADER_LEN: usize = 16;

/// A decoded inotify event, as described in spec §3 "Event".
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub watch_id: i32,
    pub mask: EventMask,
    pub cookie: u32,
    /// Present when the watched path is a directory and an entry within it
    /// changed. Kept as raw bytes: the name is read from a null-padded
    /// fixed-size segment and must stop at the first NUL, not trust `len`.
    pub name: Option<Vec<u8>>,
}

/// An open inotify instance, owning exactly one kernel-side watch table.
pub struct Inotify {
    fd: RawFd,
}

impl Inotify {
    /// Opens a new watch instance (`inotify_init1` with `IN_CLOEXEC`).
    pub fn new() -> Result<Self, FatalError> {
        // SAFETY: inotify_init1 has no preconditions; the returned fd is
        // owned exclusively by this instance from here on.
        let fd = unsafe { libc::inotify_init1(libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(FatalError::InotifyInit(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Registers a watch on `path` with `mask`, returning the kernel-issued
    /// watch descriptor (spec §4.3).
    pub fn add_watch(&self, path: &Path, mask: EventMask) -> Result<i32, WatchError> {
        let cpath = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| WatchError::AddWatch {
                path: path.to_owned(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
            })?;

        // SAFETY: `fd` is a valid inotify instance owned by `self`, and
        // `cpath` is a valid NUL-terminated C string for the call's lifetime.
        let wd = unsafe { libc::inotify_add_watch(self.fd, cpath.as_ptr(), mask.bits()) };
        if wd < 0 {
            return Err(WatchError::AddWatch {
                path: path.to_owned(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(wd)
    }

    /// Blocking read of one buffer's worth of events from the kernel. The
    /// buffer should be sized `EVENT_HEADER_LEN + max_name_len + 1` (spec
    /// §4.5 step 1). Returns the number of bytes read, or the raw negative
    /// errno-mapped error on failure — including `EINTR`, which the event
    /// loop must distinguish from other failures (spec §4.5 step 2).
    pub fn read_raw(&self, buf: &mut [u8]) -> Result<usize, Errno> {
        nix::unistd::read(self.fd, buf)
    }
}

impl Drop for Inotify {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.fd);
    }
}

/// Decodes only the first event record in `buf` (spec §4.5: "the current
/// design only decodes the first" when a read packs several events).
pub fn decode_first_event(buf: &[u8], len: usize) -> Option<RawEvent> {
    if len < EVENT_HEADER_LEN {
        return None;
    }

    let watch_id = i32::from_ne_bytes(buf[0..4].try_into().ok()?);
    let mask_bits = u32::from_ne_bytes(buf[4..8].try_into().ok()?);
    let cookie = u32::from_ne_bytes(buf[8..12].try_into().ok()?);
    let name_len = u32::from_ne_bytes(buf[12..16].try_into().ok()?) as usize;

    let name = if name_len == 0 {
        None
    } else {
        let end = EVENT_HEADER_LEN + name_len;
        if end > len {
            None
        } else {
            let raw = &buf[EVENT_HEADER_LEN..end];
            // The declared length includes NUL padding; stop at the first NUL.
            let stop = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Some(raw[..stop].to_vec())
        }
    };

    Some(RawEvent {
        watch_id,
        mask: EventMask::from_bits_truncate(mask_bits),
        cookie,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_raw_event(wd: i32, mask: u32, cookie: u32, name: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&wd.to_ne_bytes());
        buf.extend_from_slice(&mask.to_ne_bytes());
        buf.extend_from_slice(&cookie.to_ne_bytes());
        // Round the declared length up to a 4-byte boundary with NUL padding,
        // matching what the kernel actually produces.
        let padded_len = (name.len() + 1 + 3) / 4 * 4;
        buf.extend_from_slice(&(padded_len as u32).to_ne_bytes());
        buf.extend_from_slice(name);
        buf.resize(EVENT_HEADER_LEN + padded_len, 0);
        buf
    }

    #[test]
    fn decodes_header_and_name() {
        let buf = build_raw_event(3, EventMask::CREATE.bits(), 0, b"a.txt");
        let event = decode_first_event(&buf, buf.len()).unwrap();
        assert_eq!(event.watch_id, 3);
        assert_eq!(event.mask, EventMask::CREATE);
        assert_eq!(event.name.as_deref(), Some(b"a.txt".as_slice()));
    }

    #[test]
    fn decodes_event_without_name() {
        let buf = build_raw_event(1, EventMask::ACCESS.bits(), 0, b"");
        let event = decode_first_event(&buf, buf.len()).unwrap();
        assert_eq!(event.name, None);
    }

    #[test]
    fn only_decodes_the_first_event_in_a_packed_buffer() {
        let mut buf = build_raw_event(1, EventMask::CREATE.bits(), 0, b"first");
        buf.extend(build_raw_event(2, EventMask::DELETE.bits(), 0, b"second"));

        let event = decode_first_event(&buf, buf.len()).unwrap();
        assert_eq!(event.watch_id, 1);
        assert_eq!(event.name.as_deref(), Some(b"first".as_slice()));
    }

    #[test]
    fn name_is_truncated_at_first_nul_not_declared_length() {
        let mut buf = build_raw_event(1, EventMask::CREATE.bits(), 0, b"short");
        // corrupt padding byte right after "short\0" shouldn't leak through
        let event = decode_first_event(&buf, buf.len()).unwrap();
        assert_eq!(event.name.as_deref(), Some(b"short".as_slice()));
        buf.clear();
    }
}
