//! Daemonization (spec §4.8).
//!
//! Only entered when `-d` is given. The creation mask is narrowed before
//! anything else happens, so the pid file and log file this sequence
//! creates are never world-readable by default.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{chdir, dup2, fork, setsid, ForkResult, Pid};

use crate::cli::Options;
use crate::error::FatalError;
use crate::logging::Logger;

/// Creation mask applied before the pid file or log file is created
/// (spec §4.8).
const CREATION_MASK: libc::mode_t = 0o027;

/// Forks, detaches from the controlling terminal, and redirects standard
/// streams, in the order spec §4.8 lays out. Returns in the detached child;
/// the original parent writes the pid file and exits inside this call.
pub fn daemonize(options: &Options, logger: &Logger) -> Result<(), FatalError> {
    // SAFETY: umask has no preconditions and affects only this process.
    unsafe {
        libc::umask(CREATION_MASK);
    }

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    // SAFETY: single-threaded at this point in startup; no other thread
    // can observe an inconsistent post-fork state.
    match unsafe { fork() }.map_err(FatalError::Fork)? {
        ForkResult::Parent { child } => {
            if let Err(err) = write_pid_file(&options.pid_path, child) {
                let _ = kill(child, Signal::SIGTERM);
                return Err(FatalError::PidFile {
                    path: options.pid_path.clone(),
                    source: err,
                });
            }
            logger.log(0, &format!("forked daemon, pid {child}"));
            std::process::exit(0);
        }
        ForkResult::Child => {}
    }

    setsid().map_err(nix_to_fatal)?;

    let devnull = OpenOptions::new()
        .read(true)
        .open("/dev/null")
        .map_err(FatalError::Io)?;
    dup2(devnull.as_raw_fd(), 0).map_err(nix_to_fatal)?;

    chdir("/").map_err(nix_to_fatal)?;

    redirect_to_log_file(&options.log_path)?;

    Ok(())
}

/// Dups both standard output and standard error onto the (append-opened)
/// log file, so that any stray writes outside the `Logger`'s own fixed-
/// format lines still land somewhere durable (spec §4.8 step 6).
fn redirect_to_log_file(log_path: &Path) -> Result<(), FatalError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(FatalError::Io)?;
    let fd = file.as_raw_fd();
    dup2(fd, 1).map_err(nix_to_fatal)?;
    dup2(fd, 2).map_err(nix_to_fatal)?;
    // `file` itself can be dropped: fds 1 and 2 now hold independent
    // references to the same open file description.
    Ok(())
}

fn write_pid_file(path: &Path, pid: Pid) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    writeln!(file, "{pid}")
}

fn nix_to_fatal(err: nix::Error) -> FatalError {
    FatalError::Io(std::io::Error::from(err))
}
