//! Entry point: wires the options, configuration, watch registry, and
//! signal discipline together into the single-threaded event loop
//! (spec §2 C5, §4.5).

mod cli;
mod config;
mod daemon;
mod error;
mod inotify;
mod logging;
mod mail;
mod mask;
mod registry;
mod signals;
mod worker;

use nix::errno::Errno;
use nix::unistd::{fork, ForkResult};
use tracing_subscriber::EnvFilter;

use crate::error::FatalError;
use crate::inotify::{decode_first_event, EVENT_HEADER_LEN};
use crate::logging::Logger;
use crate::registry::WatchRegistry;
use crate::signals::Caught;

fn main() {
    let mut options = cli::parse();
    // Daemon mode always has somewhere durable to log to, flag or no flag
    // (spec §4.8 step 6).
    if options.daemon {
        options.log_to_file = true;
    }

    let logger = Logger::new(&options);
    init_tracing(options.verbose);

    if options.daemon {
        if let Err(err) = daemon::daemonize(&options, &logger) {
            logger.log(2, &format!("{err}"));
            return;
        }
    }

    logger.log(
        0,
        &format!("starting, configuration file {}", options.config_path.display()),
    );

    let loaded = match config::load(&options.config_path, &logger) {
        Ok(loaded) => loaded,
        Err(err) => {
            logger.log(2, &format!("{err}"));
            return;
        }
    };

    if loaded.tricks.is_empty() {
        logger.log(0, "no valid tricks in configuration; watching nothing");
    }

    let inotify_instance = match inotify::Inotify::new() {
        Ok(instance) => instance,
        Err(err) => {
            logger.log(2, &format!("{err}"));
            return;
        }
    };

    let registry = match WatchRegistry::build(inotify_instance, loaded.tricks) {
        Ok(registry) => registry,
        Err(err) => {
            logger.log(2, &format!("{err}"));
            return;
        }
    };

    signals::install_daemon_handlers();

    logger.log(
        0,
        &format!("registered {} trick(s), entering event loop", registry.tricks.len()),
    );

    event_loop(&registry, loaded.max_name_len, &logger);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The single-threaded event loop (spec §4.5). Blocks on the watch
/// instance, dispatches one fork per event, and handles the three signal-
/// interrupted-read outcomes. Never returns: every exit happens through
/// `Logger::log`'s `process::exit` or an explicit one in this function.
fn event_loop(registry: &WatchRegistry, max_name_len: usize, logger: &Logger) -> ! {
    let mut buf = vec![0u8; EVENT_HEADER_LEN + max_name_len + 1];

    loop {
        match registry.inotify.read_raw(&mut buf) {
            Ok(0) => logger.log(2, &format!("{}", FatalError::DeadRead(0))),
            Ok(n) => dispatch(registry, &buf, n, max_name_len, logger),
            Err(Errno::EINTR) => match signals::take_caught() {
                Caught::Hangup => logger.reopen(),
                Caught::Interrupt => logger.log(0, "caught SIGINT, exiting"),
                Caught::Terminate => logger.log(0, "caught SIGTERM, exiting"),
                Caught::None => {}
            },
            Err(errno) => logger.log(2, &format!("{}", FatalError::DeadRead(-(errno as i32 as isize)))),
        }
    }
}

/// Forks a worker for the event at the head of the buffer. The parent
/// always returns immediately to the read loop (spec §4.5 step 4's "only
/// supported return path").
fn dispatch(registry: &WatchRegistry, buf: &[u8], len: usize, max_name_len: usize, logger: &Logger) {
    // SAFETY: the daemon is single-threaded; the child side only runs
    // async-signal-safe code (`signals::reset_to_defaults`) before doing
    // anything else, per spec §4.6 step 1.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => {}
        Ok(ForkResult::Child) => match decode_first_event(buf, len) {
            Some(event) => worker::run(registry, event, max_name_len, logger),
            None => logger.log(1, "worker: could not decode a truncated inotify event"),
        },
        Err(errno) => logger.log(0, &format!("fork failed, dropping this event: {errno}")),
    }
}
