//! Turning raw watch noise into the changes a user actually made.
//!
//! Native watchers report editor saves as the mechanics the editor used:
//! delete plus create, rename over the original, delete a backup. The
//! [`ChangeTracker`] keeps a short sliding window of recent raw events and
//! rewrites recognisable sequences into `renamed` or `changed` events for
//! the set of paths it tracks. The rewrites are heuristics; anything not
//! recognised passes through unchanged.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CoreConfig;
use crate::fs::{FileSystem, WATCH_CHANNEL_CAPACITY, WatchStream};
use crate::types::{ChangeEvent, ChangeKind, PathRules, WatchEvent};

/// A raw or emitted event held in the window, with its comparison keys.
#[derive(Debug, Clone)]
struct Seen {
    at: Instant,
    /// Assigned when the event enters the window.
    seq: u64,
    event: ChangeEvent,
    key: PathBuf,
    old_key: Option<PathBuf>,
}

impl Seen {
    fn new(rules: &PathRules, at: Instant, event: ChangeEvent) -> Self {
        let key = rules.normalize(&event.path);
        let old_key = event.old_path.as_deref().map(|p| rules.normalize(p));
        Self {
            at,
            seq: 0,
            event,
            key,
            old_key,
        }
    }
}

/// A reconstruction found under the lock, confirmed (or not) outside it.
#[derive(Debug)]
enum Pattern {
    /// Copy-then-delete: one rename. `consumed` is the cached half.
    SplitMove {
        from: PathBuf,
        to: PathBuf,
        consumed: u64,
    },
    /// Renamed over, backup deleted: the file at `restored` came back.
    RestoreViaRename { deleted: PathBuf, restored: PathBuf },
    /// Deleted, then an edited copy moved into place.
    RestoreViaReplace { path: PathBuf },
}

#[derive(Debug, Default)]
struct TrackerState {
    tracked: HashSet<PathBuf>,
    recent: VecDeque<Seen>,
    next_seq: u64,
}

impl TrackerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(front.at) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_relevant(&self, seen: &Seen) -> bool {
        self.tracked.contains(&seen.key)
            || seen.old_key.as_ref().is_some_and(|k| self.tracked.contains(k))
    }

    fn is_duplicate(&self, seen: &Seen) -> bool {
        seen.event.kind == ChangeKind::Changed
            && self
                .recent
                .iter()
                .any(|s| s.event.kind == ChangeKind::Changed && s.key == seen.key)
    }

    fn find_pattern(&self, seen: &Seen, rules: &PathRules) -> Option<Pattern> {
        let newest_first = || self.recent.iter().rev();
        match seen.event.kind {
            ChangeKind::Created => newest_first()
                .find(|s| s.event.kind == ChangeKind::Deleted && is_split_pair(rules, &s.key, &seen.key))
                .map(|s| Pattern::SplitMove {
                    from: s.event.path.clone(),
                    to: seen.event.path.clone(),
                    consumed: s.seq,
                }),
            ChangeKind::Deleted => {
                let split = newest_first()
                    .find(|s| {
                        s.event.kind == ChangeKind::Created && is_split_pair(rules, &seen.key, &s.key)
                    })
                    .map(|s| Pattern::SplitMove {
                        from: seen.event.path.clone(),
                        to: s.event.path.clone(),
                        consumed: s.seq,
                    });
                split.or_else(|| {
                    newest_first()
                        .find(|s| s.event.kind == ChangeKind::Renamed && s.key == seen.key)
                        .and_then(|s| s.event.old_path.clone())
                        .map(|restored| Pattern::RestoreViaRename {
                            deleted: seen.event.path.clone(),
                            restored,
                        })
                })
            }
            ChangeKind::Renamed => {
                let old_key = seen.old_key.as_ref()?;
                let replaces = self.tracked.contains(&seen.key)
                    && !self.tracked.contains(old_key)
                    && newest_first()
                        .any(|s| s.event.kind == ChangeKind::Deleted && s.key == seen.key);
                replaces.then(|| Pattern::RestoreViaReplace {
                    path: seen.event.path.clone(),
                })
            }
            ChangeKind::Changed => None,
        }
    }

    fn push(&mut self, mut seen: Seen) {
        seen.seq = self.next_seq;
        self.next_seq += 1;
        self.recent.push_back(seen);
    }

    fn record(&mut self, seen: Seen) {
        if seen.event.is_rename() {
            if let Some(old) = &seen.old_key {
                self.tracked.remove(old);
            }
            self.tracked.insert(seen.key.clone());
        }
        self.push(seen);
    }
}

/// Whether a deletion of `deleted` and a creation of `created` look like
/// the two halves of one move: same name in another directory, or another
/// name in the same directory.
fn is_split_pair(rules: &PathRules, deleted: &Path, created: &Path) -> bool {
    if deleted == created {
        return false;
    }
    let (deleted, created) = (deleted.to_string_lossy(), created.to_string_lossy());
    let same_name = rules.name_eq(rules.file_name(&deleted), rules.file_name(&created));
    let same_dir = rules.parent(&deleted) == rules.parent(&created);
    same_name != same_dir
}

/// Coalesces raw change events for a set of tracked files.
///
/// Emitted events are returned from [`process`](Self::process) and
/// broadcast to [`subscribe`](Self::subscribe)rs. Existence checks for the
/// save patterns go to the backend outside the state lock.
#[derive(Debug)]
pub struct ChangeTracker {
    fs: Arc<dyn FileSystem>,
    rules: PathRules,
    window: Duration,
    state: Mutex<TrackerState>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeTracker {
    pub fn new(fs: Arc<dyn FileSystem>, config: &CoreConfig) -> Self {
        let rules = fs.path_rules();
        let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            fs,
            rules,
            window: config.dedup_window(),
            state: Mutex::new(TrackerState::default()),
            tx,
        }
    }

    /// Start reporting events for `path`.
    pub fn track(&self, path: &Path) {
        self.state.lock().tracked.insert(self.rules.normalize(path));
    }

    pub fn untrack(&self, path: &Path) {
        self.state.lock().tracked.remove(&self.rules.normalize(path));
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.state.lock().tracked.contains(&self.rules.normalize(path))
    }

    /// Receiver of every emitted event.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Feed one raw event; returns what it turned into (possibly nothing).
    pub async fn process(&self, raw: ChangeEvent) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let seen = Seen::new(&self.rules, now, raw);

        let pattern = {
            let mut state = self.state.lock();
            state.prune(now, self.window);
            if !state.is_relevant(&seen) {
                // Kept: it may be one half of a pattern completed later.
                state.push(seen);
                return Vec::new();
            }
            if state.is_duplicate(&seen) {
                tracing::trace!(path = %seen.event.path.display(), "duplicate change suppressed");
                return Vec::new();
            }
            state.find_pattern(&seen, &self.rules)
        };

        let raw = seen.event;
        let mut consumed = None;
        let emitted = match pattern {
            Some(Pattern::SplitMove { from, to, consumed: seq }) => {
                consumed = Some(seq);
                tracing::debug!(from = %from.display(), to = %to.display(), "split move coalesced");
                vec![ChangeEvent::renamed(from, to)]
            }
            Some(Pattern::RestoreViaRename { deleted, restored }) => {
                if self.exists(&restored).await {
                    tracing::debug!(path = %restored.display(), "save via rename coalesced");
                    vec![
                        ChangeEvent::renamed(deleted, restored.clone()),
                        ChangeEvent::changed(restored),
                    ]
                } else {
                    vec![raw]
                }
            }
            Some(Pattern::RestoreViaReplace { path }) => {
                if self.exists(&path).await {
                    tracing::debug!(path = %path.display(), "save via replace coalesced");
                    vec![ChangeEvent::changed(path)]
                } else {
                    vec![raw]
                }
            }
            None => vec![raw],
        };

        {
            let mut state = self.state.lock();
            if let Some(seq) = consumed {
                // A cached half pairs once.
                state.recent.retain(|s| s.seq != seq);
            }
            for event in &emitted {
                state.record(Seen::new(&self.rules, Instant::now(), event.clone()));
            }
        }

        for event in &emitted {
            let _ = self.tx.send(event.clone());
        }
        emitted
    }

    async fn exists(&self, path: &Path) -> bool {
        match self.fs.file_exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "existence check failed");
                false
            }
        }
    }

    /// Feed a raw watch stream into this tracker until the stream ends.
    pub fn attach(self: &Arc<Self>, mut stream: WatchStream) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                match event {
                    WatchEvent::Change(change) => {
                        tracker.process(change).await;
                    }
                    WatchEvent::Error(message) => {
                        tracing::warn!(%message, "watch source error");
                    }
                }
            }
            tracing::debug!("change tracker input ended");
        })
    }
}
