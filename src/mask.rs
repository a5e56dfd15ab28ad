//! The 32-bit event mask shared by trick configuration and decoded events
//! (spec §6). The bit positions match the kernel's own inotify mask, which
//! is why they're modeled with `bitflags` directly over a `u32` rather than
//! through an abstraction that would hide the raw value callers need to
//! parse out of the configuration file and print back into a command line.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct EventMask: u32 {
        const ACCESS        = 1 << 0;
        const MODIFY        = 1 << 1;
        const ATTRIB        = 1 << 2;
        const CLOSE_WRITE   = 1 << 3;
        const CLOSE_NOWRITE = 1 << 4;
        const OPEN          = 1 << 5;
        const MOVED_FROM    = 1 << 6;
        const MOVED_TO      = 1 << 7;
        const CREATE        = 1 << 8;
        const DELETE        = 1 << 9;
        const DELETE_SELF   = 1 << 10;
        const MOVE_SELF     = 1 << 11;
        const UNMOUNT       = 1 << 13;
        const Q_OVERFLOW    = 1 << 14;
        const IGNORED       = 1 << 15;
        const ONLYDIR       = 1 << 24;
        const DONT_FOLLOW   = 1 << 25;
        const MASK_ADD      = 1 << 29;
        const ISDIR         = 1 << 30;
        const ONESHOT       = 1 << 31;

        /// Synthetic: either half of a close pair.
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        /// Synthetic: either half of a move pair.
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
    }
}

impl EventMask {
    /// Renders the mask the way the composed command line expects it:
    /// `0x` prefixed, zero-padded to eight hex digits (spec §4.6 step 6).
    pub fn to_hex_arg(self) -> String {
        format!("0x{:08x}", self.bits())
    }

    /// True if this (decoded event) mask signals the kernel dropped events.
    pub fn is_overflow(self) -> bool {
        self.contains(Self::Q_OVERFLOW)
    }

    /// True if the backing filesystem was unmounted out from under the watch.
    pub fn is_unmount(self) -> bool {
        self.contains(Self::UNMOUNT)
    }

    /// True if the kernel invalidated the watch (explicit removal, unmount,
    /// or the watched file/directory itself being deleted).
    pub fn is_ignored(self) -> bool {
        self.contains(Self::IGNORED)
    }
}
