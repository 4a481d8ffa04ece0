//! Filesystem watcher.
//!
//! `notify`'s watcher runs its own callback on its own thread, synchronously
//! — bridging that into the async world is just a channel: the callback
//! does nothing but forward the event, and an async task on the other end
//! does everything else (filtering, updating local state, enqueuing sync
//! tasks).

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::{ClientError, Result};

#[derive(Debug, Clone)]
pub enum FsChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

/// Files and directories matching any of these are never surfaced to the
/// sync engine: dotfiles, editor swap/backup files, and in-progress
/// temporary writes.
fn should_ignore(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with('.') || name.ends_with(".tmp") || name.ends_with('~'))
        .unwrap_or(true)
}

pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    pub events: mpsc::Receiver<FsChange>,
}

impl FsWatcher {
    pub fn watch(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1024);
        let root_owned = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let Ok(event) = res else { return };
                let change = match event.kind {
                    EventKind::Create(_) => event.paths.into_iter().map(FsChange::Created).next(),
                    EventKind::Modify(_) => event.paths.into_iter().map(FsChange::Modified).next(),
                    EventKind::Remove(_) => event.paths.into_iter().map(FsChange::Removed).next(),
                    _ => None,
                };
                if let Some(change) = change {
                    let path = match &change {
                        FsChange::Created(p) | FsChange::Modified(p) | FsChange::Removed(p) => p,
                    };
                    if !should_ignore(path) {
                        let _ = tx.blocking_send(change);
                    }
                }
                let _ = &root_owned;
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| ClientError::Config(format!("failed to start filesystem watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| ClientError::Config(format!("failed to watch {}: {e}", root.display())))?;

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }
}

/// Initial recursive scan performed once at startup, before live watching
/// takes over — discovers files that changed while the client wasn't
/// running. Reuses the generic directory walker rather than anything
/// watcher-specific.
pub fn initial_scan(root: &Path) -> Result<Vec<PathBuf>> {
    let options = WalkOptions::default();
    let entries =
        walk_directory(root, options).map_err(|e| ClientError::Config(format!("initial scan failed: {e}")))?;
    Ok(entries
        .into_iter()
        .filter(|f| !should_ignore(&f.path))
        .map(|f| f.path)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_dotfiles_and_temp_files() {
        assert!(should_ignore(Path::new("/tmp/sync/.hidden")));
        assert!(should_ignore(Path::new("/tmp/sync/draft.tmp")));
        assert!(should_ignore(Path::new("/tmp/sync/notes.md~")));
        assert!(!should_ignore(Path::new("/tmp/sync/notes.md")));
    }

    #[test]
    fn initial_scan_finds_files_written_before_the_watcher_starts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let found = initial_scan(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
    }
}
