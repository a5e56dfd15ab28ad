//! The watch registry (spec §4.3): one inotify instance, one registered
//! watch per trick, and the `watch-id -> trick` table that the kernel's
//! own descriptor-numbering scheme lets us index directly.

use tracing::{error, warn};

use crate::config::Trick;
use crate::error::FatalError;
use crate::inotify::Inotify;
use crate::mask::EventMask;

/// Owns the kernel watch instance and the flat, `watch_id - 1` indexed
/// table of tricks (spec §3 invariants, §4.3).
pub struct WatchRegistry {
    pub inotify: Inotify,
    pub tricks: Vec<Trick>,
}

impl WatchRegistry {
    /// Registers one watch per trick. A trick whose registration fails is
    /// reported and dropped (spec §4.3, "not fatal"). Returns an error only
    /// if the kernel ever hands back a descriptor out of the expected
    /// 1, 2, 3, ... sequence — spec §3 calls this a fatal invariant
    /// violation, since the table is indexed by `watch_id - 1`.
    pub fn build(inotify: Inotify, candidates: Vec<Trick>) -> Result<Self, FatalError> {
        let mut tricks = Vec::with_capacity(candidates.len());

        for mut trick in candidates {
            match inotify.add_watch(&trick.path, trick.mask) {
                Ok(wd) => {
                    let expected = tricks.len() as i32 + 1;
                    if wd != expected {
                        error!(got = wd, expected, "kernel issued non-sequential watch descriptor");
                        return Err(FatalError::NonSequentialWatch { got: wd, expected });
                    }
                    trick.watch_id = Some(wd);
                    tricks.push(trick);
                }
                Err(err) => {
                    warn!(path = %trick.path.display(), error = %err, "discarding trick: watch registration failed");
                }
            }
        }

        Ok(Self { inotify, tricks })
    }

    /// Looks up the trick bound to `watch_id`, per the `table[wd - 1]`
    /// invariant (spec §3, §4.6 step 3).
    pub fn lookup(&self, watch_id: i32) -> Option<&Trick> {
        if watch_id < 1 {
            return None;
        }
        self.tricks.get((watch_id - 1) as usize)
    }

    pub fn mask_union(&self) -> EventMask {
        self.tricks
            .iter()
            .fold(EventMask::empty(), |acc, t| acc | t.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::EventMask;
    use std::path::PathBuf;

    fn make_trick(path: PathBuf) -> Trick {
        Trick {
            path,
            mask: EventMask::CREATE,
            script: "/bin/echo".into(),
            account: "nobody".into(),
            mail_to: "ops@example.test".into(),
            watch_id: None,
        }
    }

    #[test]
    fn registers_sequential_watch_ids_matching_table_position() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let inotify = Inotify::new().unwrap();
        let tricks = vec![
            make_trick(dir_a.path().to_owned()),
            make_trick(dir_b.path().to_owned()),
        ];

        let registry = WatchRegistry::build(inotify, tricks).unwrap();
        assert_eq!(registry.tricks.len(), 2);
        for (i, trick) in registry.tricks.iter().enumerate() {
            assert_eq!(trick.watch_id, Some(i as i32 + 1));
        }

        assert!(registry.lookup(1).is_some());
        assert!(registry.lookup(2).is_some());
        assert!(registry.lookup(3).is_none());
        assert!(registry.lookup(0).is_none());
    }

    #[test]
    fn drops_trick_whose_path_does_not_exist() {
        let inotify = Inotify::new().unwrap();
        let tricks = vec![make_trick(PathBuf::from("/definitely/not/a/real/path"))];
        let registry = WatchRegistry::build(inotify, tricks).unwrap();
        assert!(registry.tricks.is_empty());
    }
}
