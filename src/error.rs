//! Error types for each fatal and non-fatal condition described in the design.
//!
//! Configuration and watch-registration errors are per-line/per-trick and
//! never stop the daemon; they are logged and the offending entry is
//! discarded. [`FatalError`] covers the handful of conditions that are
//! allowed to end the process (see spec §7).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A single malformed configuration line.
#[derive(Debug, Error)]
pub enum ConfigLineError {
    #[error("line does not have exactly five colon-separated fields")]
    WrongFieldCount,

    #[error("invisible character")]
    InvisibleCharacter,

    #[error("illegal character")]
    IllegalCharacter,

    #[error("path field is empty")]
    EmptyPath,

    #[error("could not query maximum name length for '{path}': {source}")]
    PathConf { path: PathBuf, source: io::Error },

    #[error("mask field is not a valid decimal u32")]
    BadMask,

    #[error("mask field is zero")]
    ZeroMask,

    #[error("script field longer than 256 bytes")]
    ScriptTooLong,

    #[error("account field longer than the system login-name limit")]
    AccountTooLong,

    #[error("mail-to field longer than 36 bytes")]
    MailToTooLong,
}

/// Errors that abort loading the whole configuration file.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("could not open configuration file '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("could not read configuration file '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// Errors raised when registering a trick's watch with the kernel.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("inotify_add_watch on '{path}' failed: {source}")]
    AddWatch { path: PathBuf, source: io::Error },
}

/// Conditions that are fatal to the whole daemon (spec §7 item 5).
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("kernel issued non-sequential watch descriptor {got}, expected {expected}: heap corrupt")]
    NonSequentialWatch { got: i32, expected: i32 },

    #[error("read from inotify instance returned {0}: daemon dead")]
    DeadRead(isize),

    #[error("inotify_init1 failed: {0}")]
    InotifyInit(io::Error),

    #[error("assembled path exceeds the maximum name length ({len} > {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("could not create pid file '{path}': {source}")]
    PidFile { path: PathBuf, source: io::Error },

    #[error("could not fork: {0}")]
    Fork(nix::Error),

    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Errors confined to a single worker; the daemon is unaffected.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no such account '{0}'")]
    NoSuchAccount(String),

    #[error("account lookup for '{0}' failed: {1}")]
    AccountLookup(String, nix::Error),

    #[error("composed command exceeds the maximum line length ({len} > {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("could not open pipe: {0}")]
    Pipe(io::Error),

    #[error("could not spawn grandchild: {0}")]
    Spawn(io::Error),
}
