//! Options & Logging (spec §4.1).
//!
//! The daemon's fixed-format log lines are a contract some operators' log
//! scanners depend on, so they're written directly here rather than through
//! `tracing`'s own formatter — `tracing` still carries the daemon's internal
//! diagnostics (see `main.rs`), but never this literal wire format.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::cli::Options;

/// Substituted when `log` is called with an empty string on success
/// (spec §4.1 — preserved verbatim for log-scanner compatibility).
const MISSING_LOG_STRING: &str = "Missing log string. This should not happen.";
/// Substituted when `log` is called with an empty string on failure.
const SKY_IS_FALLING: &str = "The sky is falling!";

/// Owns the destination(s) a log line is written to: stdout/stderr (or the
/// daemonized log file once redirected), and optionally the system log.
pub struct Logger {
    syslog_priority: Option<libc::c_int>,
    /// When set, both "streams" are really this single appended file (spec
    /// §4.1, §4.8): daemon mode redirects stdout and stderr to it.
    log_file_path: Option<PathBuf>,
    log_file: Mutex<Option<File>>,
}

impl Logger {
    pub fn new(options: &Options) -> Self {
        let syslog_priority = options.syslog_level.map(|level| {
            // SAFETY: openlog's `ident` pointer must outlive every syslog()
            // call; a 'static C string satisfies that for the process lifetime.
            unsafe {
                libc::openlog(
                    IDENT.as_ptr(),
                    libc::LOG_PID | libc::LOG_NDELAY,
                    libc::LOG_DAEMON,
                );
            }
            level as libc::c_int
        });

        let log_file_path = if options.log_to_file {
            Some(options.log_path.clone())
        } else {
            None
        };

        let log_file = log_file_path.as_deref().and_then(open_append);

        Self {
            syslog_priority,
            log_file_path,
            log_file: Mutex::new(log_file),
        }
    }

    /// Writes one log line and, if `status != 0`, exits the process with
    /// that status after flushing (spec §4.1).
    pub fn log(&self, status: i32, text: &str) {
        let text = if text.is_empty() {
            if status == 0 {
                MISSING_LOG_STRING
            } else {
                SKY_IS_FALLING
            }
        } else {
            text
        };

        let line = format!(
            "gidget[{}]: {} {}\n",
            std::process::id(),
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            text
        );

        self.write_line(status, &line);

        if let Some(priority) = self.syslog_priority {
            syslog_write(priority, text);
        }

        if status != 0 {
            let _ = std::io::stdout().flush();
            let _ = std::io::stderr().flush();
            std::process::exit(status);
        }
    }

    fn write_line(&self, status: i32, line: &str) {
        let mut guard = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
            return;
        }
        drop(guard);

        if status == 0 {
            let _ = std::io::stdout().write_all(line.as_bytes());
        } else {
            let _ = std::io::stderr().write_all(line.as_bytes());
        }
    }

    /// Reopens the log file. This is the hangup integration point for
    /// external log rotation (spec §4.4, §4.5 step 2).
    pub fn reopen(&self) {
        if let Some(path) = &self.log_file_path {
            let mut guard = self.log_file.lock().unwrap_or_else(|e| e.into_inner());
            *guard = open_append(path);
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.syslog_priority.is_some() {
            // SAFETY: closelog has no preconditions.
            unsafe { libc::closelog() };
        }
    }
}

static IDENT: &[u8] = b"gidget\0";

fn syslog_write(priority: libc::c_int, text: &str) {
    let Ok(fmt) = CString::new("%s") else {
        return;
    };
    let Ok(message) = CString::new(text.replace('\0', "")) else {
        return;
    };
    // SAFETY: both C strings are valid and NUL-terminated for the call's
    // duration; "%s" takes exactly the one varargs argument we supply,
    // so `text` can never be interpreted as a format string.
    unsafe {
        libc::syslog(
            priority,
            fmt.as_ptr() as *const libc::c_char,
            message.as_ptr(),
        );
    }
}

fn open_append(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}
