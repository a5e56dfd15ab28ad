//! Configuration loading (spec §4.2).
//!
//! A trick binds one watched path to one action. The loader tokenizes each
//! line, validates every field, and reports (but never aborts on) per-line
//! problems — only a missing or unreadable file is fatal to the whole load.

use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::{pathconf, PathconfVar};
use tracing::warn;

use crate::error::{ConfigLineError, ConfigLoadError};
use crate::logging::Logger;

/// Maximum length of the `script` field (spec §4.2).
pub const MAX_SCRIPT_LEN: usize = 256;
/// Maximum length of the `mail-to` field (spec §4.2).
pub const MAX_MAILTO_LEN: usize = 36;

/// One accepted configuration line: a watched path bound to an action.
///
/// `watch_id` is filled in once the watch is registered with the kernel
/// (spec §4.3); it is `None` between load and registration.
#[derive(Clone, Debug)]
pub struct Trick {
    pub path: PathBuf,
    pub mask: crate::mask::EventMask,
    pub script: String,
    pub account: String,
    pub mail_to: String,
    pub watch_id: Option<i32>,
}

/// Result of loading the configuration file: the accepted tricks, in file
/// order, and the running maximum of every `pathconf`-reported name length
/// seen along the way (spec §4.2's "sizes the event-read buffer").
pub struct LoadedConfig {
    pub tricks: Vec<Trick>,
    pub max_name_len: usize,
}

/// Fallback used when a filesystem's `pathconf(_PC_NAME_MAX)` reports
/// nothing usable; not worth aborting the line over.
const FALLBACK_NAME_MAX: usize = 255;

pub fn load(path: &Path, logger: &Logger) -> Result<LoadedConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::Open {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_owned(),
        source,
    })?;

    let mut tricks = Vec::new();
    let mut max_name_len = 0usize;

    for (lineno, raw_line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = strip_comment(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok((trick, name_max)) => {
                max_name_len = max_name_len.max(name_max);
                tricks.push(trick);
            }
            Err(err) => {
                warn!(line = lineno, error = %err, "discarding malformed configuration line");
                logger.log(0, &format!("discarding configuration line {lineno}: {err}"));
            }
        }
    }

    Ok(LoadedConfig {
        tricks,
        max_name_len: max_name_len.max(FALLBACK_NAME_MAX),
    })
}

/// `#` introduces a comment that extends to end of line.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_line(line: &str) -> Result<(Trick, usize), ConfigLineError> {
    if line.contains('\'') {
        return Err(ConfigLineError::IllegalCharacter);
    }
    if line
        .chars()
        .any(|c| c != '\n' && c.is_control())
    {
        return Err(ConfigLineError::InvisibleCharacter);
    }

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 5 {
        return Err(ConfigLineError::WrongFieldCount);
    }
    let path = fields[0];
    let mask = fields[1];
    let script = fields[2];
    let account = fields[3];
    let mail_to = fields[4];

    if path.is_empty() {
        return Err(ConfigLineError::EmptyPath);
    }
    let path = PathBuf::from(path);
    let name_max = name_max_for(&path)?;

    if mask.is_empty() || !mask.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigLineError::BadMask);
    }
    let mask_bits: u32 = mask.parse().map_err(|_| ConfigLineError::BadMask)?;
    if mask_bits == 0 {
        return Err(ConfigLineError::ZeroMask);
    }
    let mask = crate::mask::EventMask::from_bits_truncate(mask_bits);

    if script.len() > MAX_SCRIPT_LEN {
        return Err(ConfigLineError::ScriptTooLong);
    }

    let login_name_max = login_name_max();
    if account.len() > login_name_max {
        return Err(ConfigLineError::AccountTooLong);
    }

    if mail_to.len() > MAX_MAILTO_LEN {
        return Err(ConfigLineError::MailToTooLong);
    }

    Ok((
        Trick {
            path,
            mask,
            script: script.to_owned(),
            account: account.to_owned(),
            mail_to: mail_to.to_owned(),
            watch_id: None,
        },
        name_max,
    ))
}

/// Queries the filesystem hosting `path` for its maximum file-name length,
/// the `pathconf`-equivalent lookup spec §4.2 requires. A filesystem that
/// doesn't report one (returns `Ok(None)`) falls back to a conservative
/// constant rather than failing the line.
fn name_max_for(path: &Path) -> Result<usize, ConfigLineError> {
    if !path.exists() {
        return Err(ConfigLineError::PathConf {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "path does not exist"),
        });
    }

    match pathconf(path, PathconfVar::NAME_MAX) {
        Ok(Some(max)) if max > 0 => Ok(max as usize),
        Ok(_) => Ok(FALLBACK_NAME_MAX),
        Err(errno) => Err(ConfigLineError::PathConf {
            path: path.to_owned(),
            source: std::io::Error::from(errno),
        }),
    }
}

fn login_name_max() -> usize {
    nix::unistd::sysconf(nix::unistd::SysconfVar::LOGIN_NAME_MAX)
        .ok()
        .flatten()
        .filter(|&v| v > 0)
        .map(|v| v as usize)
        .unwrap_or(256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    fn test_logger() -> Logger {
        Logger::new(&crate::cli::Options {
            daemon: false,
            verbose: false,
            config_path: PathBuf::new(),
            pid_path: PathBuf::new(),
            log_to_file: false,
            log_path: PathBuf::new(),
            syslog_level: None,
        })
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().join("inbox");
        std::fs::create_dir(&watched).unwrap();

        let contents = format!(
            "\n# a comment\n{}:256:/bin/echo hi:nobody:ops@example.test\n   \n# trailing\n",
            watched.display()
        );
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();

        assert_eq!(loaded.tricks.len(), 1);
        assert_eq!(loaded.tricks[0].path, watched);
    }

    #[test]
    fn rejects_line_missing_a_field() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().join("inbox");
        std::fs::create_dir(&watched).unwrap();

        let contents = format!("{}:256:/bin/echo hi:nobody\n", watched.display());
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();
        assert!(loaded.tricks.is_empty());
    }

    #[test]
    fn rejects_apostrophe_anywhere_in_line() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().join("inbox");
        std::fs::create_dir(&watched).unwrap();

        let contents = format!(
            "{}:256:/bin/echo it's bad:nobody:ops@example.test\n",
            watched.display()
        );
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();
        assert!(loaded.tricks.is_empty());
    }

    #[test]
    fn script_field_boundary_256_ok_257_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().join("inbox");
        std::fs::create_dir(&watched).unwrap();

        let ok_script = "/".to_string() + &"a".repeat(MAX_SCRIPT_LEN - 1);
        assert_eq!(ok_script.len(), MAX_SCRIPT_LEN);
        let contents = format!(
            "{}:256:{}:nobody:ops@example.test\n",
            watched.display(),
            ok_script
        );
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();
        assert_eq!(loaded.tricks.len(), 1);

        let too_long_script = ok_script + "a";
        assert_eq!(too_long_script.len(), MAX_SCRIPT_LEN + 1);
        let contents = format!(
            "{}:256:{}:nobody:ops@example.test\n",
            watched.display(),
            too_long_script
        );
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();
        assert!(loaded.tricks.is_empty());
    }

    #[test]
    fn missing_config_file_is_fatal() {
        let result = load(Path::new("/nonexistent/path/to/gidget.conf"), &test_logger());
        assert!(result.is_err());
    }

    #[test]
    fn zero_mask_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let watched = tmp.path().join("inbox");
        std::fs::create_dir(&watched).unwrap();

        let contents = format!(
            "{}:0:/bin/echo hi:nobody:ops@example.test\n",
            watched.display()
        );
        let cfg = write_config(&contents);
        let loaded = load(cfg.path(), &test_logger()).unwrap();
        assert!(loaded.tricks.is_empty());
    }
}
