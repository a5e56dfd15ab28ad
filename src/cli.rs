//! Command-line options (spec §4.1, §6).
//!
//! `-?` is accepted as a synonym for `--help`: clap has no first-class way
//! to register that as a flag, so `parse` rewrites it in `argv` before
//! handing off to the derived parser.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration path (spec §4.2).
const DEFAULT_CONFIG_PATH: &str = "/etc/gidget.conf";
/// Default pid-file path (spec §4.8).
const DEFAULT_PID_PATH: &str = "/var/run/gidget.pid";
/// Default log-file path, used when `-l` is given without one (spec §4.1).
const DEFAULT_LOG_PATH: &str = "/var/log/gidget.log";
/// `-s` with no value defaults to `LOG_ERR` (spec §4.1).
const DEFAULT_SYSLOG_LEVEL: &str = "3";

#[derive(Parser, Debug)]
#[command(
    name = "gidget",
    version,
    about = "Watches filesystem paths and mails the output of scripts run in response"
)]
struct Cli {
    /// Run as a daemon: fork, detach from the controlling terminal, and
    /// write a pid file (spec §4.8).
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// Log internal diagnostics at debug level instead of the default.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Path to the configuration file (spec §4.2).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Also write log lines to this file; defaults to /var/log/gidget.log
    /// when given without a value (spec §4.1).
    #[arg(
        short = 'l',
        long = "log-file",
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LOG_PATH
    )]
    log_path: Option<PathBuf>,

    /// Path to the pid file written in daemon mode (spec §4.8).
    #[arg(short = 'p', long = "pid-file", value_name = "PATH")]
    pid_path: Option<PathBuf>,

    /// Also log to syslog at this priority (0-7); defaults to LOG_ERR (3)
    /// when given without a value (spec §4.1).
    #[arg(
        short = 's',
        long = "syslog",
        value_name = "LEVEL",
        num_args = 0..=1,
        default_missing_value = DEFAULT_SYSLOG_LEVEL,
        value_parser = clap::value_parser!(u8).range(0..=7)
    )]
    syslog_level: Option<u8>,

    /// Undocumented positional fallback for the configuration path.
    #[arg(hide = true)]
    config_positional: Option<PathBuf>,
}

/// Parsed and defaulted command-line options (spec §4.1).
#[derive(Clone, Debug)]
pub struct Options {
    pub daemon: bool,
    pub verbose: bool,
    pub config_path: PathBuf,
    pub pid_path: PathBuf,
    pub log_to_file: bool,
    pub log_path: PathBuf,
    pub syslog_level: Option<u8>,
}

impl From<Cli> for Options {
    fn from(cli: Cli) -> Self {
        let config_path = cli
            .config_path
            .or(cli.config_positional)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        Self {
            daemon: cli.daemon,
            verbose: cli.verbose,
            config_path,
            pid_path: cli.pid_path.unwrap_or_else(|| PathBuf::from(DEFAULT_PID_PATH)),
            log_to_file: cli.log_path.is_some(),
            log_path: cli.log_path.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            syslog_level: cli.syslog_level,
        }
    }
}

/// Parses `std::env::args_os()` into [`Options`], exiting the process with
/// clap's usual usage message on a bad argument list.
pub fn parse() -> Options {
    parse_from(std::env::args_os())
}

/// Parses an arbitrary argument list, rewriting a bare `-?` to `--help`
/// first since clap has no built-in way to alias it.
///
/// Malformed arguments print clap's usual usage message to standard error
/// and exit 1, per spec §4.1 — clap's own default exit code for a usage
/// error is 2, so the error is caught and re-exited here instead of
/// letting `Cli::parse_from` terminate the process itself.
pub fn parse_from<I, T>(args: I) -> Options
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let rewritten: Vec<std::ffi::OsString> = args
        .into_iter()
        .map(|arg| {
            let arg = arg.into();
            if arg == "-?" {
                std::ffi::OsString::from("--help")
            } else {
                arg
            }
        })
        .collect();

    match Cli::try_parse_from(rewritten) {
        Ok(cli) => cli.into(),
        Err(err) => {
            let _ = err.print();
            use clap::error::ErrorKind;
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => std::process::exit(0),
                _ => std::process::exit(1),
            }
        }
    }
}
