//! Native (OS) watch handles.
//!
//! [`NativeWatch`] is the seam between the multiplexer / local watchers and
//! the operating system. [`NotifyWatch`] implements it with `notify`; tests
//! substitute a recording fake.

use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{FsError, FsResult};
use crate::types::{ChangeEvent, WatchEvent};

/// Where a native watch delivers translated events.
pub type NativeSink = mpsc::UnboundedSender<WatchEvent>;

/// A native watch handle that can be pointed at directories.
pub trait NativeWatch: Send {
    /// Start watching `path`.
    fn watch(&mut self, path: &Path, recursive: bool) -> FsResult<()>;

    /// Stop watching `path`.
    fn unwatch(&mut self, path: &Path) -> FsResult<()>;
}

/// Builds a native watch that reports into the given sink.
pub type NativeWatchFactory = dyn Fn(NativeSink) -> FsResult<Box<dyn NativeWatch>> + Send + Sync;

/// `notify`-backed native watch.
pub struct NotifyWatch {
    watcher: RecommendedWatcher,
}

impl std::fmt::Debug for NotifyWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatch").finish_non_exhaustive()
    }
}

impl NotifyWatch {
    pub fn new(sink: NativeSink) -> FsResult<Self> {
        let mut renames = RenamePairing::default();
        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for translated in renames.translate(event) {
                        let _ = sink.send(translated);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "native watch error");
                    let _ = sink.send(WatchEvent::Error(e.to_string()));
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| map_notify_error(e, Path::new("")))?;
        Ok(Self { watcher })
    }

    /// Factory for [`WatchRegistry`](crate::WatchRegistry) and local watchers.
    pub fn factory() -> Box<NativeWatchFactory> {
        Box::new(|sink| Ok(Box::new(NotifyWatch::new(sink)?) as Box<dyn NativeWatch>))
    }
}

impl NativeWatch for NotifyWatch {
    fn watch(&mut self, path: &Path, recursive: bool) -> FsResult<()> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher
            .watch(path, mode)
            .map_err(|e| map_notify_error(e, path))?;
        tracing::debug!(path = %path.display(), recursive, "native watch started");
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> FsResult<()> {
        self.watcher
            .unwatch(path)
            .map_err(|e| map_notify_error(e, path))?;
        tracing::debug!(path = %path.display(), "native watch stopped");
        Ok(())
    }
}

fn map_notify_error(err: notify::Error, path: &Path) -> FsError {
    match err.kind {
        notify::ErrorKind::Io(io) => FsError::from_io(io, path.display()),
        notify::ErrorKind::PathNotFound => FsError::not_found(path.display().to_string()),
        notify::ErrorKind::WatchNotFound => {
            FsError::other(format!("no watch registered for {}", path.display()))
        }
        notify::ErrorKind::MaxFilesWatch => {
            FsError::other("native watch limit reached".to_string())
        }
        notify::ErrorKind::InvalidConfig(_) | notify::ErrorKind::Generic(_) => {
            FsError::other(err.to_string())
        }
    }
}

/// Folds the halves of a tracked rename into its paired event.
///
/// inotify reports one `rename(2)` inside the watched tree as `From`, `To`
/// and then `Both`, all carrying the same tracker. Only the `Both` is kept.
/// A tracked half that never pairs up (a move into or out of the tree) is
/// reported as a creation or deletion once it is known to be unpaired.
#[derive(Debug, Default)]
pub struct RenamePairing {
    pending_from: Option<(usize, PathBuf)>,
}

impl RenamePairing {
    pub fn translate(&mut self, event: Event) -> Vec<WatchEvent> {
        let tracker = event.attrs.tracker();
        let half = match event.kind {
            EventKind::Modify(ModifyKind::Name(mode)) => Some(mode),
            _ => None,
        };
        let mut out = Vec::new();

        match (half, tracker) {
            (Some(RenameMode::From), Some(tracker)) => {
                self.flush(&mut out);
                if let Some(path) = event.paths.into_iter().next() {
                    self.pending_from = Some((tracker, path));
                }
            }
            (Some(RenameMode::To), Some(tracker)) => {
                if self.pending_tracker() == Some(tracker) {
                    // The Both event that follows carries the rename.
                    return out;
                }
                self.flush(&mut out);
                out.extend(translate(event));
            }
            (Some(RenameMode::Both), Some(tracker)) => {
                if self.pending_tracker() == Some(tracker) {
                    self.pending_from = None;
                } else {
                    self.flush(&mut out);
                }
                out.extend(translate(event));
            }
            _ => {
                self.flush(&mut out);
                out.extend(translate(event));
            }
        }
        out
    }

    fn pending_tracker(&self) -> Option<usize> {
        self.pending_from.as_ref().map(|(tracker, _)| *tracker)
    }

    fn flush(&mut self, out: &mut Vec<WatchEvent>) {
        if let Some((_, path)) = self.pending_from.take() {
            out.push(WatchEvent::Change(ChangeEvent::deleted(path)));
        }
    }
}

/// Translate one `notify` event into contract-shaped events.
///
/// Platforms disagree on how renames arrive: paired (`Both`), split into
/// halves (`From`/`To`), or unannotated (`Any`, resolved by probing the
/// disk). Access events carry no change and are dropped.
pub fn translate(event: Event) -> Vec<WatchEvent> {
    let paths = event.paths;
    let one = |f: fn(PathBuf) -> ChangeEvent| -> Vec<WatchEvent> {
        paths.iter().cloned().map(|p| WatchEvent::Change(f(p))).collect()
    };

    match event.kind {
        EventKind::Create(_) => one(ChangeEvent::created),
        EventKind::Remove(_) => one(ChangeEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            vec![WatchEvent::Change(ChangeEvent::renamed(
                paths[0].clone(),
                paths[1].clone(),
            ))]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => one(ChangeEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => one(ChangeEvent::created),
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                let event = if p.exists() {
                    ChangeEvent::created(p.clone())
                } else {
                    ChangeEvent::deleted(p.clone())
                };
                WatchEvent::Change(event)
            })
            .collect(),
        EventKind::Modify(_) => one(ChangeEvent::changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn test_translate_create_remove_modify() {
        let created = translate(event(EventKind::Create(CreateKind::File), &["/a/x.txt"]));
        assert_eq!(created, vec![WatchEvent::Change(ChangeEvent::created("/a/x.txt"))]);

        let removed = translate(event(EventKind::Remove(RemoveKind::File), &["/a/x.txt"]));
        assert_eq!(removed, vec![WatchEvent::Change(ChangeEvent::deleted("/a/x.txt"))]);

        let modified = translate(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/a/x.txt"],
        ));
        assert_eq!(modified, vec![WatchEvent::Change(ChangeEvent::changed("/a/x.txt"))]);
    }

    #[test]
    fn test_translate_renames() {
        let both = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/a/old.txt", "/a/new.txt"],
        ));
        assert_eq!(
            both,
            vec![WatchEvent::Change(ChangeEvent::renamed("/a/old.txt", "/a/new.txt"))]
        );

        let from = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/a/old.txt"],
        ));
        assert_eq!(from, vec![WatchEvent::Change(ChangeEvent::deleted("/a/old.txt"))]);

        let to = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/a/new.txt"],
        ));
        assert_eq!(to, vec![WatchEvent::Change(ChangeEvent::created("/a/new.txt"))]);
    }

    #[test]
    fn test_translate_ignores_access() {
        let access = translate(event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["/a/x.txt"],
        ));
        assert!(access.is_empty());
    }

    fn rename_half(mode: RenameMode, tracker: usize, paths: &[&str]) -> Event {
        event(EventKind::Modify(ModifyKind::Name(mode)), paths).set_tracker(tracker)
    }

    #[test]
    fn test_tracked_rename_halves_fold_into_one_rename() {
        let mut pairing = RenamePairing::default();
        let mut out = Vec::new();
        out.extend(pairing.translate(rename_half(RenameMode::From, 7, &["/a/old.txt"])));
        out.extend(pairing.translate(rename_half(RenameMode::To, 7, &["/a/new.txt"])));
        out.extend(pairing.translate(rename_half(
            RenameMode::Both,
            7,
            &["/a/old.txt", "/a/new.txt"],
        )));
        assert_eq!(
            out,
            vec![WatchEvent::Change(ChangeEvent::renamed("/a/old.txt", "/a/new.txt"))]
        );
    }

    #[test]
    fn test_unpaired_halves_become_create_and_delete() {
        let mut pairing = RenamePairing::default();

        // Moved out of the tree: known once the next event arrives.
        assert!(pairing.translate(rename_half(RenameMode::From, 3, &["/a/gone.txt"])).is_empty());
        let next = pairing.translate(event(EventKind::Create(CreateKind::File), &["/a/x.txt"]));
        assert_eq!(
            next,
            vec![
                WatchEvent::Change(ChangeEvent::deleted("/a/gone.txt")),
                WatchEvent::Change(ChangeEvent::created("/a/x.txt")),
            ]
        );

        // Moved in from outside.
        let moved_in = pairing.translate(rename_half(RenameMode::To, 4, &["/a/in.txt"]));
        assert_eq!(moved_in, vec![WatchEvent::Change(ChangeEvent::created("/a/in.txt"))]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_rename_on_disk_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        std::fs::write(&old, "x").unwrap();

        let (sink, mut rx) = mpsc::unbounded_channel();
        let mut watch = NotifyWatch::new(sink).unwrap();
        watch.watch(dir.path(), true).unwrap();
        std::fs::rename(&old, &new).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, WatchEvent::Change(ChangeEvent::renamed(&old, &new)));
        let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(extra.is_err(), "unexpected follow-up event: {extra:?}");
    }
}
