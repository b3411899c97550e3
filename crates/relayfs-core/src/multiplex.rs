//! Sharing one native watch among many file subscriptions.
//!
//! A project with hundreds of watched files must not open hundreds of
//! native watches. Each volume gets one [`WatchMultiplexer`] whose single
//! recursive watch sits on the deepest common ancestor of everything
//! subscribed so far; events fan out to the subscribers of the exact path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::CoreConfig;
use crate::error::{FsError, FsResult};
use crate::fs::{WATCH_CHANNEL_CAPACITY, WatchStream};
use crate::native::{NativeWatch, NativeWatchFactory, NotifyWatch};
use crate::types::{PathRules, WatchEvent};

/// Deepest path both `a` and `b` lie under, or `None` if they share no
/// root (different drives).
pub fn common_prefix(a: &Path, b: &Path) -> Option<PathBuf> {
    let common: PathBuf = a
        .components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.as_os_str())
        .collect();
    if common.as_os_str().is_empty() {
        None
    } else {
        Some(common)
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: broadcast::Sender<WatchEvent>,
}

#[derive(Debug, Default)]
struct MuxState {
    root: Option<PathBuf>,
    bags: HashMap<PathBuf, Vec<Weak<Subscriber>>>,
}

impl MuxState {
    fn live(&self, key: &Path) -> Vec<Arc<Subscriber>> {
        self.bags
            .get(key)
            .map(|bag| bag.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }
}

/// One native watch shared by every file subscription on a volume.
///
/// The root only ever widens; a subscriber that goes away is dropped
/// lazily once dead entries outnumber live ones in its bag.
pub struct WatchMultiplexer {
    rules: PathRules,
    compaction_min: usize,
    state: Arc<Mutex<MuxState>>,
    /// Held across root changes so concurrent subscribes widen in order.
    native: Arc<Mutex<Box<dyn NativeWatch>>>,
    dispatch: JoinHandle<()>,
}

impl fmt::Debug for WatchMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WatchMultiplexer")
            .field("root", &state.root)
            .field("paths", &state.bags.len())
            .finish()
    }
}

impl WatchMultiplexer {
    /// Create a multiplexer around a native watch built by `factory`.
    ///
    /// Spawns the dispatch loop, so this must run inside a tokio runtime.
    pub fn new(factory: &NativeWatchFactory, config: &CoreConfig) -> FsResult<Self> {
        let (sink, raw) = mpsc::unbounded_channel();
        let native = factory(sink)?;
        let state = Arc::new(Mutex::new(MuxState::default()));
        let rules = PathRules::host();
        let dispatch = tokio::spawn(dispatch_loop(raw, state.clone(), rules));
        Ok(Self {
            rules,
            compaction_min: config.compaction_min,
            state,
            native: Arc::new(Mutex::new(native)),
            dispatch,
        })
    }

    /// Raw events for one file.
    ///
    /// Widens the shared watch if `path` lies outside the current root.
    /// Dropping the returned stream ends the subscription.
    pub async fn subscribe(&self, path: &Path) -> FsResult<WatchStream> {
        if !path.has_root() {
            return Err(FsError::invalid_path(format!(
                "watch path must be absolute: {}",
                path.display()
            )));
        }
        let key = self.rules.normalize(path);
        let dir = key
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| FsError::invalid_path(key.display().to_string()))?;

        // Re-rooting walks the new tree on some platforms.
        let native = self.native.clone();
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || reroot(&native, &state, dir))
            .await
            .map_err(|e| FsError::other(format!("watch setup task failed: {e}")))??;

        let (tx, rx) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        let subscriber = Arc::new(Subscriber { tx });
        {
            let mut state = self.state.lock();
            let bag = state.bags.entry(key).or_default();
            bag.push(Arc::downgrade(&subscriber));
            compact(bag, self.compaction_min);
        }
        Ok(WatchStream::new(rx, subscriber))
    }

    /// Current root of the shared native watch.
    pub fn root(&self) -> Option<PathBuf> {
        self.state.lock().root.clone()
    }

    /// Live subscribers of `path`.
    pub fn subscriber_count(&self, path: &Path) -> usize {
        self.state.lock().live(&self.rules.normalize(path)).len()
    }

    /// Stored entries for `path`, dead ones included.
    pub fn bag_len(&self, path: &Path) -> usize {
        self.state
            .lock()
            .bags
            .get(&self.rules.normalize(path))
            .map_or(0, Vec::len)
    }
}

/// Point the native watch at a root covering `dir`, if the current one
/// does not.
fn reroot(
    native: &Mutex<Box<dyn NativeWatch>>,
    state: &Mutex<MuxState>,
    dir: PathBuf,
) -> FsResult<()> {
    let mut native = native.lock();
    let current = state.lock().root.clone();
    let widened = match &current {
        None => dir,
        Some(root) => {
            let common = common_prefix(root, &dir).ok_or_else(|| {
                FsError::invalid_path(format!(
                    "{} is not on the volume of {}",
                    dir.display(),
                    root.display()
                ))
            })?;
            if common == *root {
                return Ok(());
            }
            common
        }
    };

    // inotify keeps one watch per directory: the old root's watch has to be
    // gone before the wider one claims its subtree.
    if let Some(old) = &current
        && let Err(e) = native.unwatch(old)
    {
        tracing::debug!(root = %old.display(), error = %e, "unwatch of old root failed");
    }
    if let Err(e) = native.watch(&widened, true) {
        if let Some(old) = &current
            && let Err(restore) = native.watch(old, true)
        {
            tracing::warn!(root = %old.display(), error = %restore, "could not restore previous watch root");
        }
        return Err(e);
    }
    tracing::debug!(root = %widened.display(), "multiplexer root widened");
    state.lock().root = Some(widened);
    Ok(())
}

impl Drop for WatchMultiplexer {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

fn compact(bag: &mut Vec<Weak<Subscriber>>, min: usize) {
    if bag.len() < min {
        return;
    }
    let dead = bag.iter().filter(|w| w.strong_count() == 0).count();
    if dead > bag.len() - dead {
        bag.retain(|w| w.strong_count() > 0);
        tracing::trace!(removed = dead, remaining = bag.len(), "compacted subscriber bag");
    }
}

async fn dispatch_loop(
    mut raw: mpsc::UnboundedReceiver<WatchEvent>,
    state: Arc<Mutex<MuxState>>,
    rules: PathRules,
) {
    while let Some(event) = raw.recv().await {
        let targets: Vec<Arc<Subscriber>> = {
            let mut state = state.lock();
            match &event {
                WatchEvent::Error(message) => {
                    tracing::warn!(%message, "shared native watch reported an error");
                    state
                        .bags
                        .values()
                        .flat_map(|bag| bag.iter().filter_map(Weak::upgrade))
                        .collect()
                }
                WatchEvent::Change(change) => {
                    let mut keys = vec![rules.normalize(&change.path)];
                    if let Some(old) = &change.old_path {
                        keys.push(rules.normalize(old));
                    }
                    let mut targets = Vec::new();
                    for key in keys {
                        let live = state.live(&key);
                        if live.is_empty() {
                            state.bags.remove(&key);
                        }
                        for subscriber in live {
                            if !targets.iter().any(|t| Arc::ptr_eq(t, &subscriber)) {
                                targets.push(subscriber);
                            }
                        }
                    }
                    targets
                }
            }
        };
        for subscriber in targets {
            let _ = subscriber.tx.send(event.clone());
        }
    }
    tracing::debug!("multiplexer dispatch loop ended");
}

/// Identity of the volume a path lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeId {
    /// A drive or UNC prefix, case-folded.
    Prefix(String),
    /// A Unix device number.
    Device(u64),
    /// Nothing better could be determined.
    Unknown,
}

impl VolumeId {
    /// Volume of `path`, probing the nearest existing ancestor on Unix.
    pub fn of(path: &Path) -> Self {
        if let Some(Component::Prefix(prefix)) = path.components().next() {
            return VolumeId::Prefix(prefix.as_os_str().to_string_lossy().to_lowercase());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            for ancestor in path.ancestors() {
                if let Ok(meta) = std::fs::metadata(ancestor) {
                    return VolumeId::Device(meta.dev());
                }
            }
        }
        VolumeId::Unknown
    }
}

/// Per-volume multiplexers, created on first use.
pub struct WatchRegistry {
    factory: Box<NativeWatchFactory>,
    config: CoreConfig,
    muxes: Mutex<HashMap<VolumeId, Arc<WatchMultiplexer>>>,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("volumes", &self.muxes.lock().len())
            .finish()
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new(NotifyWatch::factory(), CoreConfig::default())
    }
}

impl WatchRegistry {
    pub fn new(factory: Box<NativeWatchFactory>, config: CoreConfig) -> Self {
        Self {
            factory,
            config,
            muxes: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to raw events for one file through its volume's multiplexer.
    pub async fn subscribe(&self, path: &Path) -> FsResult<WatchStream> {
        self.multiplexer(path).await?.subscribe(path).await
    }

    /// The multiplexer responsible for `path`.
    pub async fn multiplexer(&self, path: &Path) -> FsResult<Arc<WatchMultiplexer>> {
        let target = path.to_path_buf();
        let volume = tokio::task::spawn_blocking(move || VolumeId::of(&target))
            .await
            .map_err(|e| FsError::other(format!("volume lookup failed: {e}")))?;
        let mut muxes = self.muxes.lock();
        if let Some(mux) = muxes.get(&volume) {
            return Ok(mux.clone());
        }
        let mux = Arc::new(WatchMultiplexer::new(self.factory.as_ref(), &self.config)?);
        tracing::debug!(?volume, "created watch multiplexer");
        muxes.insert(volume, mux.clone());
        Ok(mux)
    }

    /// Number of volumes with a live multiplexer.
    pub fn volume_count(&self) -> usize {
        self.muxes.lock().len()
    }
}
