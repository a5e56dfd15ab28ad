//! The worker process (spec §4.6): everything that happens between a
//! daemon-side `fork` and that worker's own exit.
//!
//! Runs entirely in the child side of the event loop's fork. Every failure
//! here is fatal to the worker only — the daemon never observes it except
//! through its disposition to auto-reap.

use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use nix::fcntl::OFlag;
use nix::unistd::User;

use crate::config::Trick;
use crate::error::WorkerError;
use crate::inotify::RawEvent;
use crate::logging::Logger;
use crate::mail;
use crate::mask::EventMask;
use crate::registry::WatchRegistry;
use crate::signals;

/// System line-length limit for the composed command (spec §4.6 step 6);
/// falls back to a conservative constant when the platform doesn't report
/// one, mirroring `config::login_name_max`.
fn line_max() -> usize {
    nix::unistd::sysconf(nix::unistd::SysconfVar::LINE_MAX)
        .ok()
        .flatten()
        .filter(|&v| v > 0)
        .map(|v| v as usize)
        .unwrap_or(2048)
}

/// Concatenates the trick's path with the event's name, rewriting every
/// apostrophe to `%27` (spec §4.6 step 4). The name is `None` for an event
/// on the watched path itself rather than an entry within it.
pub fn assemble_path(base: &Path, name: Option<&[u8]>, max_name_len: usize) -> Result<String, crate::error::FatalError> {
    let mut path = base.to_string_lossy().into_owned();

    if let Some(name) = name {
        if !path.ends_with('/') {
            path.push('/');
        }
        let name = String::from_utf8_lossy(name);
        path.push_str(&name.replace('\'', "%27"));
    }

    if path.len() > max_name_len {
        return Err(crate::error::FatalError::PathTooLong {
            len: path.len(),
            max: max_name_len,
        });
    }

    Ok(path)
}

/// Builds the literal command string `<script> '<path>' <mask>` (spec §4.6
/// step 6).
pub fn compose_command(script: &str, assembled_path: &str, mask: EventMask) -> String {
    format!("{} '{}' {}", script, assembled_path, mask.to_hex_arg())
}

/// Looks up the account's uid/gid/home/shell (spec §4.6 step 5). Performed
/// here, after fork, rather than at config-load time, so that account
/// changes take effect without a daemon restart (spec §9).
pub fn resolve_account(name: &str) -> Result<User, WorkerError> {
    User::from_name(name)
        .map_err(|source| WorkerError::AccountLookup(name.to_owned(), source))?
        .ok_or_else(|| WorkerError::NoSuchAccount(name.to_owned()))
}

/// Forks the grandchild that execs `<shell> -c <command>` as the resolved
/// account, with both its stdout and stderr dup'd onto the pipe write end
/// (spec §4.6, grandchild behavior). Group is dropped before user, the
/// required order; `std::process::Command` on Unix does this internally
/// when both `.gid()` and `.uid()` are set.
fn spawn_grandchild(user: &User, command: &str, pipe_write: &File) -> Result<Child, WorkerError> {
    let stdout_handle = pipe_write.try_clone().map_err(WorkerError::Spawn)?;
    let stderr_handle = pipe_write.try_clone().map_err(WorkerError::Spawn)?;

    Command::new(&user.shell)
        .arg("-c")
        .arg(command)
        .uid(user.uid.as_raw())
        .gid(user.gid.as_raw())
        .current_dir(&user.dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_handle))
        .stderr(Stdio::from(stderr_handle))
        .spawn()
        .map_err(WorkerError::Spawn)
}

/// Logs a fatal-to-this-worker condition and exits. `Logger::log` already
/// exits the process for any non-zero status; this wrapper only gives the
/// compiler a `!` return type to use at the end of a `match` arm.
fn fatal(logger: &Logger, status: i32, text: &str) -> ! {
    logger.log(status, text);
    unreachable!("Logger::log exits the process for a non-zero status")
}

/// Entry point invoked on the child side of the event loop's fork. Never
/// returns: every path through this function ends in `process::exit`.
pub fn run(registry: &WatchRegistry, event: RawEvent, max_name_len: usize, logger: &Logger) -> ! {
    signals::reset_to_defaults();
    // Only the daemon owns watches (spec §4.6 step 2).
    let _ = nix::unistd::close(registry.inotify.raw_fd());

    // Verbose/`-v` diagnostic: the decoded event-mask dump spec §4.1 calls
    // for. `EventMask`'s `bitflags`-derived `Debug` prints the named bits
    // rather than the raw integer, which is the whole point of decoding.
    tracing::debug!(watch_id = event.watch_id, mask = ?event.mask, "decoded inotify event");

    if event.mask.is_overflow() {
        logger.log(0, "grievous error: inotify event queue overflow, events were dropped");
    }
    if event.mask.is_unmount() {
        logger.log(0, "grievous error: watch backing filesystem was unmounted");
    }
    if event.mask.is_ignored() {
        logger.log(0, "watch invalidated (IN_IGNORED)");
    }

    let Some(trick) = registry.lookup(event.watch_id) else {
        fatal(logger, 1, &format!("worker: no trick registered for watch id {}", event.watch_id));
    };

    let assembled_path = match assemble_path(&trick.path, event.name.as_deref(), max_name_len) {
        Ok(p) => p,
        Err(err) => fatal(logger, 2, &format!("worker: {err}")),
    };

    let account = match resolve_account(&trick.account) {
        Ok(u) => u,
        Err(err) => fatal(logger, 3, &format!("worker: {err}")),
    };

    let command = compose_command(&trick.script, &assembled_path, event.mask);
    let max_line = line_max();
    if command.len() > max_line {
        fatal(
            logger,
            4,
            &format!("worker: {}", WorkerError::CommandTooLong { len: command.len(), max: max_line }),
        );
    }

    // Opened with O_CLOEXEC so that exec (inside `spawn_grandchild`) closes
    // both original ends automatically. Only the dup2'd stdout/stderr
    // targets installed by `Command` survive into the grandchild — dup2
    // always clears FD_CLOEXEC on its target regardless of the source fd's
    // flags. Without this, the grandchild (and anything it forks or execs)
    // would inherit the original read/write ends under arbitrary fd numbers,
    // and a backgrounding script would hold the write end open forever,
    // hanging `capture_output`'s blocking read (spec §4.6 grandchild
    // behavior: "close the original write-end and the read-end").
    let (pipe_read, pipe_write) = match nix::unistd::pipe2(OFlag::O_CLOEXEC) {
        Ok(fds) => fds,
        Err(errno) => fatal(logger, 5, &format!("worker: {}", WorkerError::Pipe(errno.into()))),
    };
    let mut pipe_read = File::from(pipe_read);
    let pipe_write = File::from(pipe_write);

    let child = match spawn_grandchild(&account, &command, &pipe_write) {
        Ok(c) => c,
        Err(err) => fatal(logger, 6, &format!("worker: {err}")),
    };
    // The grandchild inherited its own copies across fork; this process no
    // longer needs the write end, and must drop it so the read side sees
    // end-of-file once the grandchild closes its copies.
    drop(pipe_write);

    match mail::capture_output(&mut pipe_read) {
        Ok(Some(bytes)) => {
            logger.log(0, &format!("worker: captured {} bytes of output", bytes.len().saturating_sub(1)));
            let headers = mail::MailHeaders {
                account: &trick.account,
                mail_to: &trick.mail_to,
                assembled_path: &assembled_path,
                watch_id: event.watch_id,
                mask_bits: event.mask.bits(),
                shell: &account.shell.to_string_lossy(),
                command: &command,
            };
            if let Err(err) = mail::send(&headers, &bytes) {
                logger.log(0, &format!("worker: could not deliver mail: {err}"));
            }
        }
        Ok(None) => {}
        Err(err) => logger.log(0, &format!("worker: error reading grandchild output: {err}")),
    }

    let (status, outcome) = mail::wait_grandchild(child);
    match outcome {
        mail::GrandchildOutcome::Success => logger.log(0, &format!("worker: '{command}' succeeded")),
        mail::GrandchildOutcome::Ambiguous => {
            logger.log(0, &format!("worker: '{command}' returned 127 (ambiguous result)"))
        }
        mail::GrandchildOutcome::Failed(code) => {
            logger.log(0, &format!("worker: '{command}' failed with status {code}"))
        }
        mail::GrandchildOutcome::Unknown => {
            logger.log(0, &format!("worker: could not determine exit status of '{command}'"))
        }
    }

    std::process::exit(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::EventMask;

    #[test]
    fn munges_every_apostrophe_and_none_survive() {
        let base = Path::new("/tmp/inbox");
        let path = assemble_path(base, Some(b"it's a test's file"), 255).unwrap();
        assert_eq!(path, "/tmp/inbox/it%27s a test%27s file");
        assert!(!path.contains('\''));
    }

    #[test]
    fn name_is_none_for_an_event_on_the_watched_path_itself() {
        let base = Path::new("/tmp/inbox");
        let path = assemble_path(base, None, 255).unwrap();
        assert_eq!(path, "/tmp/inbox");
    }

    #[test]
    fn overlong_assembled_path_is_rejected() {
        let base = Path::new("/tmp/inbox");
        let name = "a".repeat(300);
        let err = assemble_path(base, Some(name.as_bytes()), 255).unwrap_err();
        assert!(matches!(err, crate::error::FatalError::PathTooLong { .. }));
    }

    #[test]
    fn composes_the_literal_command_form() {
        let cmd = compose_command("/bin/echo hello", "/tmp/inbox/a.txt", EventMask::CREATE);
        assert_eq!(cmd, "/bin/echo hello '/tmp/inbox/a.txt' 0x00000100");
    }
}
