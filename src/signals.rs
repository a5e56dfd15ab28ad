//! Signal discipline (spec §4.4).
//!
//! `SIGCHLD` is set to be auto-reaped by the kernel so the daemon never
//! accumulates zombies from its worker processes. `SIGTERM`/`SIGINT`/`SIGHUP`
//! write a word-sized atomic flag from an async-signal-safe handler; the
//! event loop reads and clears it after each interrupted read.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Process-wide, async-signal-safe "last signal caught" word (spec §3).
static CAUGHT: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signum: libc::c_int) {
    CAUGHT.store(signum, Ordering::Relaxed);
}

/// Installs the four trapped signals for the daemon process (spec §4.4).
pub fn install_daemon_handlers() {
    auto_reap_children();

    for sig in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP] {
        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: `record_signal` only performs a relaxed atomic store, which
        // is async-signal-safe.
        unsafe {
            let _ = sigaction(sig, &action);
        }
    }
}

/// Sets `SIGCHLD` to be ignored with `SA_NOCLDWAIT`, which tells the kernel
/// to reap the daemon's worker children automatically (spec §4.4).
pub fn auto_reap_children() {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::SA_NOCLDWAIT, SigSet::empty());
    // SAFETY: installing SIG_IGN has no reentrancy hazards.
    unsafe {
        let _ = sigaction(Signal::SIGCHLD, &action);
    }
}

/// A worker releases every signal trap it inherited from the daemon before
/// doing anything else (spec §4.6 step 1) — this also reverts `SIGCHLD` to
/// its default disposition, which the worker needs so it can `wait()` for
/// its own grandchild before forking it (spec §4.4).
pub fn reset_to_defaults() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGCHLD,
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGHUP,
    ] {
        // SAFETY: installing SIG_DFL has no reentrancy hazards.
        unsafe {
            let _ = sigaction(sig, &action);
        }
    }
}

/// What the event loop found when a blocking read came back interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caught {
    Hangup,
    Interrupt,
    Terminate,
    None,
}

/// Reads and clears the caught-flag (spec §3: "cleared by the loop after
/// consumption").
pub fn take_caught() -> Caught {
    let raw = CAUGHT.swap(0, Ordering::Relaxed);
    match raw {
        x if x == Signal::SIGHUP as i32 => Caught::Hangup,
        x if x == Signal::SIGINT as i32 => Caught::Interrupt,
        x if x == Signal::SIGTERM as i32 => Caught::Terminate,
        _ => Caught::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_caught_clears_the_flag() {
        CAUGHT.store(Signal::SIGHUP as i32, Ordering::Relaxed);
        assert_eq!(take_caught(), Caught::Hangup);
        assert_eq!(take_caught(), Caught::None);
    }

    #[test]
    fn distinguishes_interrupt_from_terminate() {
        CAUGHT.store(Signal::SIGINT as i32, Ordering::Relaxed);
        assert_eq!(take_caught(), Caught::Interrupt);

        CAUGHT.store(Signal::SIGTERM as i32, Ordering::Relaxed);
        assert_eq!(take_caught(), Caught::Terminate);
    }
}
