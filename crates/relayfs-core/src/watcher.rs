//! Directory watchers assembled from a raw event source and a filter.
//!
//! Backends differ only in where raw events come from (a native watch, a
//! backend's own mutation feed, nothing at all); scoping, name filtering
//! and the notify mask are applied here the same way for all of them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::FsResult;
use crate::fs::{FileWatcher, SearchPattern, WATCH_CHANNEL_CAPACITY};
use crate::native::NativeWatch;
use crate::types::{ChangeEvent, ChangeKind, NotifyFilters, PathRules, WatchEvent, WatcherOptions};

/// Decides which raw events a watcher with given options reports.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    options: WatcherOptions,
    rules: PathRules,
    pattern: SearchPattern,
}

impl WatchFilter {
    pub fn new(options: WatcherOptions, rules: PathRules) -> FsResult<Self> {
        let pattern = SearchPattern::new(&options.filter, rules)?;
        Ok(Self {
            options,
            rules,
            pattern,
        })
    }

    pub fn options(&self) -> &WatcherOptions {
        &self.options
    }

    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        if !self.options.enabled {
            return false;
        }
        let mask = self.options.notify_filter;
        let reported = match event.kind {
            ChangeKind::Changed => mask.reports_content(),
            _ => mask.reports_names(),
        };
        if !reported {
            return false;
        }
        self.in_scope(&event.path) || event.old_path.as_deref().is_some_and(|p| self.in_scope(p))
    }

    fn in_scope(&self, path: &Path) -> bool {
        let raw = path.to_string_lossy();
        let Some(parent) = self.rules.parent(&raw) else {
            return false;
        };
        let parent = Path::new(parent);
        let scoped = if self.options.recursive {
            self.rules.is_within(&self.options.path, parent)
        } else {
            self.rules.eq(&self.options.path, parent)
        };
        scoped && self.pattern.matches(self.rules.file_name(&raw))
    }
}

/// Where a [`FilteredWatcher`] gets its raw events.
#[derive(Debug)]
pub enum EventSource {
    /// A native watch's sink.
    Native(mpsc::UnboundedReceiver<WatchEvent>),
    /// A feed shared by every watcher of one backend.
    Shared(broadcast::Receiver<WatchEvent>),
    /// Nothing ever happens.
    Idle,
}

impl EventSource {
    async fn next(&mut self) -> Option<WatchEvent> {
        match self {
            EventSource::Native(rx) => rx.recv().await,
            EventSource::Shared(rx) => loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "watcher source lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            EventSource::Idle => None,
        }
    }
}

/// A [`FileWatcher`] that filters a raw event source.
///
/// When a native watch is attached, path and recursion changes re-point it;
/// everything else only swaps the filter.
pub struct FilteredWatcher {
    filter: Arc<RwLock<WatchFilter>>,
    tx: broadcast::Sender<WatchEvent>,
    native: Option<Mutex<Box<dyn NativeWatch>>>,
    pump: Option<JoinHandle<()>>,
}

impl fmt::Debug for FilteredWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredWatcher")
            .field("options", self.filter.read().options())
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl FilteredWatcher {
    /// Start filtering `source` under `options`.
    ///
    /// Must be called inside a tokio runtime unless the source is idle.
    pub fn spawn(
        options: WatcherOptions,
        rules: PathRules,
        source: EventSource,
        native: Option<Box<dyn NativeWatch>>,
    ) -> FsResult<Self> {
        let filter = Arc::new(RwLock::new(WatchFilter::new(options, rules)?));
        let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let pump = match source {
            EventSource::Idle => None,
            source => Some(tokio::spawn(pump(source, filter.clone(), tx.clone()))),
        };
        Ok(Self {
            filter,
            tx,
            native: native.map(Mutex::new),
            pump,
        })
    }

    /// A watcher that never reports anything.
    pub fn idle(options: WatcherOptions, rules: PathRules) -> FsResult<Self> {
        Self::spawn(options, rules, EventSource::Idle, None)
    }

    fn update(&self, apply: impl FnOnce(&mut WatcherOptions)) -> FsResult<()> {
        let mut filter = self.filter.write();
        let mut options = filter.options().clone();
        let old = options.clone();
        apply(&mut options);

        if let Some(native) = &self.native
            && (old.path != options.path || old.recursive != options.recursive)
        {
            let mut native = native.lock();
            if let Err(e) = native.unwatch(&old.path) {
                tracing::debug!(path = %old.path.display(), error = %e, "unwatch failed");
            }
            if let Err(e) = native.watch(&options.path, options.recursive) {
                if let Err(restore) = native.watch(&old.path, old.recursive) {
                    tracing::warn!(path = %old.path.display(), error = %restore, "failed to restore watch");
                }
                return Err(e);
            }
        }

        *filter = WatchFilter::new(options, filter.rules)?;
        Ok(())
    }
}

impl Drop for FilteredWatcher {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    mut source: EventSource,
    filter: Arc<RwLock<WatchFilter>>,
    tx: broadcast::Sender<WatchEvent>,
) {
    while let Some(event) = source.next().await {
        let pass = {
            let filter = filter.read();
            match &event {
                WatchEvent::Change(change) => filter.accepts(change),
                WatchEvent::Error(_) => filter.options().enabled,
            }
        };
        if pass {
            // No receivers is fine; nobody is listening yet.
            let _ = tx.send(event);
        }
    }
    tracing::debug!("watcher source closed");
}

#[async_trait]
impl FileWatcher for FilteredWatcher {
    fn options(&self) -> WatcherOptions {
        self.filter.read().options().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }

    async fn set_path(&self, path: PathBuf) -> FsResult<()> {
        self.update(|o| o.path = path)
    }

    async fn set_enabled(&self, enabled: bool) -> FsResult<()> {
        self.update(|o| o.enabled = enabled)
    }

    async fn set_recursive(&self, recursive: bool) -> FsResult<()> {
        self.update(|o| o.recursive = recursive)
    }

    async fn set_filter(&self, filter: String) -> FsResult<()> {
        self.update(|o| o.filter = filter)
    }

    async fn set_notify_filter(&self, notify_filter: NotifyFilters) -> FsResult<()> {
        self.update(|o| o.notify_filter = notify_filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn filter(options: WatcherOptions) -> WatchFilter {
        WatchFilter::new(options, PathRules::UNIX).unwrap()
    }

    #[test]
    fn test_filter_scope() {
        let flat = filter(WatcherOptions::new("/proj"));
        assert!(flat.accepts(&ChangeEvent::changed("/proj/a.txt")));
        assert!(!flat.accepts(&ChangeEvent::changed("/proj/sub/a.txt")));
        assert!(!flat.accepts(&ChangeEvent::changed("/other/a.txt")));

        let deep = filter(WatcherOptions::new("/proj").recursive(true));
        assert!(deep.accepts(&ChangeEvent::changed("/proj/sub/a.txt")));
    }

    #[test]
    fn test_filter_name_and_mask() {
        let axaml = filter(WatcherOptions::new("/proj").with_filter("*.axaml"));
        assert!(axaml.accepts(&ChangeEvent::created("/proj/App.axaml")));
        assert!(!axaml.accepts(&ChangeEvent::created("/proj/App.cs")));

        let names_only = filter(WatcherOptions::new("/proj").with_notify_filter(NotifyFilters::FILE_NAME));
        assert!(names_only.accepts(&ChangeEvent::deleted("/proj/a.txt")));
        assert!(!names_only.accepts(&ChangeEvent::changed("/proj/a.txt")));
    }

    #[test]
    fn test_filter_rename_matches_either_side() {
        let f = filter(WatcherOptions::new("/proj").with_filter("*.axaml"));
        assert!(f.accepts(&ChangeEvent::renamed("/proj/App.axaml", "/proj/App.axaml~")));
        assert!(f.accepts(&ChangeEvent::renamed("/tmp/x", "/proj/App.axaml")));
    }

    #[test]
    fn test_disabled_filter_rejects_everything() {
        let mut options = WatcherOptions::new("/proj");
        options.enabled = false;
        assert!(!filter(options).accepts(&ChangeEvent::changed("/proj/a.txt")));
    }

    #[tokio::test]
    async fn test_filtered_watcher_forwards_and_updates() {
        let (feed, _) = broadcast::channel(16);
        let watcher = FilteredWatcher::spawn(
            WatcherOptions::new("/proj"),
            PathRules::UNIX,
            EventSource::Shared(feed.subscribe()),
            None,
        )
        .unwrap();
        let mut rx = watcher.subscribe();

        feed.send(ChangeEvent::changed("/elsewhere/a.txt").into()).unwrap();
        feed.send(ChangeEvent::changed("/proj/a.txt").into()).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, WatchEvent::Change(ChangeEvent::changed("/proj/a.txt")));

        watcher.set_path(PathBuf::from("/elsewhere")).await.unwrap();
        assert_eq!(watcher.options().path, PathBuf::from("/elsewhere"));
        feed.send(ChangeEvent::changed("/proj/b.txt").into()).unwrap();
        feed.send(ChangeEvent::changed("/elsewhere/b.txt").into()).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, WatchEvent::Change(ChangeEvent::changed("/elsewhere/b.txt")));
    }

    #[tokio::test]
    async fn test_idle_watcher_accepts_updates() {
        let watcher = FilteredWatcher::idle(WatcherOptions::new("/"), PathRules::UNIX).unwrap();
        watcher.set_enabled(false).await.unwrap();
        assert!(!watcher.options().enabled);
        assert!(watcher.set_filter("[".to_string()).await.is_err());
    }
}
