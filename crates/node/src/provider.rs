//! Reload provider
//!
//! Serves the newest discovered snapshots and replaces them as re-scans
//! land. A reload opens a complete new [`State`] before swapping it in;
//! readers holding the previous state keep using it until the update
//! callback has returned, after which the previous state is closed and
//! superseded directories are removed (optionally).
//!
//! ## Ordering
//!
//! Every swap draws a ticket. Post-swap work (callback, removal, close)
//! runs on the blocking pool strictly in ticket order, one at a time.

use crate::config::{Config, ConfigError};
use crate::discovery::{find_latest_dirs, removal_marker, Discovered};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use usage_core::MountPoints;
use usage_storage::{BaseDirReader, Database, MultiReader, StoreError, Tree};

/// Directory usage store file inside a snapshot directory
pub const DGUTA_FILE: &str = "dguta.db";
/// Base directory store file inside a snapshot directory
pub const BASEDIRS_FILE: &str = "basedirs.db";

pub type UpdateCallback = Arc<dyn Fn(&State) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ProviderError) + Send + Sync>;

/// Provider error
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("discovery failed in {0:?}: {1}")]
    Discovery(PathBuf, String),
    #[error("no datasets found in {0:?}")]
    NoDatasets(PathBuf),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("removing {0:?} failed: {1}")]
    Remove(PathBuf, String),
    #[error("background task failed: {0}")]
    Task(String),
}

/// One generation of opened snapshots
pub struct State {
    tree: Arc<Tree>,
    base_dirs: Arc<MultiReader>,
    dirs: Vec<PathBuf>,
}

impl State {
    /// Open the directory usage and base directory stores of every
    /// snapshot directory in `dirs`.
    pub fn open(dirs: Vec<PathBuf>, config: &Config) -> Result<Self, ProviderError> {
        let dguta_paths: Vec<PathBuf> = dirs.iter().map(|dir| dir.join(DGUTA_FILE)).collect();
        let basedirs_paths: Vec<PathBuf> =
            dirs.iter().map(|dir| dir.join(BASEDIRS_FILE)).collect();

        let db = Database::open(&dguta_paths)?;
        let mount_points = MountPoints::new(config.store.mount_points.iter().cloned());
        let base_dirs = match MultiReader::open_with_mount_points(
            &basedirs_paths,
            config.store.owners_path.as_deref(),
            &mount_points,
        ) {
            Ok(base_dirs) => base_dirs,
            Err(e) => {
                if let Err(close_err) = db.close() {
                    warn!("Failed to close directory usage stores: {}", close_err);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            tree: Arc::new(Tree::new(db)),
            base_dirs: Arc::new(base_dirs),
            dirs,
        })
    }

    pub fn tree(&self) -> Arc<Tree> {
        self.tree.clone()
    }

    pub fn base_dirs(&self) -> Arc<MultiReader> {
        self.base_dirs.clone()
    }

    /// Snapshot directories this state serves, sorted
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Close every store, joining failures
    pub fn close(&self) -> Result<(), StoreError> {
        let errors = [self.tree.close(), self.base_dirs.close()]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        StoreError::join(errors)
    }
}

struct Inner {
    config: Config,
    state: RwLock<Arc<State>>,
    on_update: RwLock<Option<UpdateCallback>>,
    on_error: RwLock<Option<ErrorCallback>>,
    /// Held for the discover-open-swap section
    reload_lock: Mutex<u64>,
    /// Ticket of the next post-swap job allowed to run
    callback_turn: Mutex<u64>,
    callback_cond: Condvar,
    pending: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Inner {
    fn report(&self, err: &ProviderError) {
        warn!("Provider error: {}", err);
        let callback = self.on_error.read().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    fn discover(&self) -> Result<Discovered, ProviderError> {
        let datasets = &self.config.datasets;
        find_latest_dirs(&datasets.base_dir, &datasets.required_files)
            .map_err(|e| ProviderError::Discovery(datasets.base_dir.clone(), e.to_string()))
    }

    async fn reload(self: &Arc<Self>) -> Result<bool, ProviderError> {
        let inner = Arc::clone(self);
        let runtime = Handle::current();
        tokio::task::spawn_blocking(move || inner.reload_blocking(&runtime))
            .await
            .map_err(|e| ProviderError::Task(e.to_string()))?
    }

    fn reload_blocking(self: &Arc<Self>, runtime: &Handle) -> Result<bool, ProviderError> {
        let mut next_ticket = self.reload_lock.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let discovered = self.discover()?;
        if discovered.latest.is_empty() {
            return Err(ProviderError::NoDatasets(self.config.datasets.base_dir.clone()));
        }
        if self.state.read().dirs == discovered.latest {
            debug!("Datasets unchanged: {} directories", discovered.latest.len());
            return Ok(false);
        }

        let new_state = Arc::new(State::open(discovered.latest, &self.config)?);
        let old_state = std::mem::replace(&mut *self.state.write(), new_state.clone());
        info!(
            "Datasets reloaded: now serving {} directories (was {})",
            new_state.dirs.len(),
            old_state.dirs.len()
        );

        let ticket = *next_ticket;
        *next_ticket += 1;

        let inner = Arc::clone(self);
        let removable = discovered.removable;
        let handle = runtime.spawn_blocking(move || {
            inner.after_swap(ticket, new_state, old_state, removable);
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(true)
    }

    /// Run the update callback, then close the previous state and remove
    /// superseded directories. Waits for every earlier ticket first.
    fn after_swap(
        &self,
        ticket: u64,
        new_state: Arc<State>,
        old_state: Arc<State>,
        removable: Vec<PathBuf>,
    ) {
        let mut turn = self.callback_turn.lock();
        while *turn != ticket {
            self.callback_cond.wait(&mut turn);
        }

        let callback = self.on_update.read().clone();
        if let Some(callback) = callback {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&new_state))) {
                Ok(()) => debug!("Update callback finished for ticket {}", ticket),
                Err(_) => error!("Update callback panicked for ticket {}", ticket),
            }
        }

        if let Err(e) = old_state.close() {
            error!("Failed to close previous datasets: {}", e);
            self.report(&ProviderError::Store(e));
        }

        if self.config.datasets.remove_old {
            for dir in &removable {
                if let Err(e) = remove_dataset(dir) {
                    self.report(&e);
                }
            }
        }

        *turn += 1;
        self.callback_cond.notify_all();
    }
}

/// Mark `dir` so discovery ignores it, then delete it
fn remove_dataset(dir: &Path) -> Result<(), ProviderError> {
    let fail = |e: String| ProviderError::Remove(dir.to_path_buf(), e);
    let marker = removal_marker(dir).ok_or_else(|| fail("no directory name".to_string()))?;
    fs::write(&marker, b"").map_err(|e| fail(e.to_string()))?;
    fs::remove_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    info!("Removed superseded dataset {:?}", dir);
    Ok(())
}

/// Keeps the newest datasets open and reloads them in the background
pub struct Provider {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Provider {
    /// Discover and open the current datasets, then start polling for newer
    /// ones every `datasets.poll_interval_secs`.
    pub async fn open(config: Config) -> Result<Self, ProviderError> {
        config.validate()?;

        let load_config = config.clone();
        let state = tokio::task::spawn_blocking(move || -> Result<State, ProviderError> {
            let datasets = &load_config.datasets;
            let discovered = find_latest_dirs(&datasets.base_dir, &datasets.required_files)
                .map_err(|e| ProviderError::Discovery(datasets.base_dir.clone(), e.to_string()))?;
            if discovered.latest.is_empty() {
                return Err(ProviderError::NoDatasets(datasets.base_dir.clone()));
            }
            State::open(discovered.latest, &load_config)
        })
        .await
        .map_err(|e| ProviderError::Task(e.to_string()))??;

        info!(
            "Provider opened: serving {} directories from {:?}",
            state.dirs.len(),
            config.datasets.base_dir
        );

        let period = config.datasets.poll_interval();
        let inner = Arc::new(Inner {
            config,
            state: RwLock::new(Arc::new(state)),
            on_update: RwLock::new(None),
            on_error: RwLock::new(None),
            reload_lock: Mutex::new(0),
            callback_turn: Mutex::new(0),
            callback_cond: Condvar::new(),
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let poll_inner = inner.clone();
        let poller = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Dataset poller stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poll_inner.reload().await {
                            poll_inner.report(&e);
                        }
                    }
                }
            }
        });

        Ok(Self {
            inner,
            shutdown,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Current directory tree. Holders keep the generation alive until it is
    /// superseded and the update callback has returned.
    pub fn tree(&self) -> Arc<Tree> {
        self.inner.state.read().tree()
    }

    /// Current base directory reader
    pub fn base_dirs(&self) -> Arc<MultiReader> {
        self.inner.state.read().base_dirs()
    }

    /// Snapshot directories currently served
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.inner.state.read().dirs.clone()
    }

    /// Register the callback run after every swap. Calls never overlap.
    pub fn on_update(&self, callback: impl Fn(&State) + Send + Sync + 'static) {
        *self.inner.on_update.write() = Some(Arc::new(callback));
    }

    /// Register the callback run when a background reload fails
    pub fn on_error(&self, callback: impl Fn(&ProviderError) + Send + Sync + 'static) {
        *self.inner.on_error.write() = Some(Arc::new(callback));
    }

    /// Run one discovery pass now. Returns whether the state was replaced.
    pub async fn reload(&self) -> Result<bool, ProviderError> {
        self.inner.reload().await
    }

    /// Stop polling, wait for in-flight callbacks, then close the current
    /// state.
    pub async fn close(&self) -> Result<(), ProviderError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown.send(true);
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                warn!("Dataset poller ended abnormally: {}", e);
            }
        }

        // Wait out a reload that is between discovery and swap
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || drop(inner.reload_lock.lock()))
            .await
            .map_err(|e| ProviderError::Task(e.to_string()))?;

        let pending = std::mem::take(&mut *self.inner.pending.lock());
        for handle in pending {
            if let Err(e) = handle.await {
                warn!("Update callback task failed: {}", e);
            }
        }

        let state = self.inner.state.read().clone();
        tokio::task::spawn_blocking(move || state.close())
            .await
            .map_err(|e| ProviderError::Task(e.to_string()))??;

        info!("Provider closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use usage_core::{Age, DirUsage, FileType, Guta, Usage};
    use usage_storage::{BaseDirsWriter, DirUsageWriter};

    fn write_dataset(base: &Path, name: &str, gid: u32) -> PathBuf {
        let dir = base.join(name);
        fs::create_dir_all(&dir).unwrap();
        let updated_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let mut dguta = DirUsageWriter::new(dir.join(DGUTA_FILE)).unwrap();
        dguta.set_mount_path("/lustre/");
        dguta.set_updated_at(updated_at);
        dguta
            .add(DirUsage::new(
                "/lustre",
                vec![Guta {
                    gid,
                    uid: 1,
                    file_type: FileType::Bam,
                    age: Age::All,
                    count: 1,
                    size: 10,
                    atime: 1,
                    mtime: 2,
                }],
            ))
            .unwrap();
        dguta.close().unwrap();

        let mut basedirs = BaseDirsWriter::new(dir.join(BASEDIRS_FILE)).unwrap();
        basedirs.set_mount_path("/lustre/");
        basedirs.set_updated_at(updated_at);
        basedirs.reset().unwrap();
        basedirs
            .put_group_usage(&Usage {
                gid,
                base_dir: "/lustre/team".to_string(),
                age: Age::All,
                ..Default::default()
            })
            .unwrap();
        basedirs.finalize().unwrap();
        basedirs.close().unwrap();

        dir
    }

    fn config(base: &Path, remove_old: bool) -> Config {
        let mut config = Config::default();
        config.datasets.base_dir = base.to_path_buf();
        config.datasets.poll_interval_secs = 3600;
        config.datasets.remove_old = remove_old;
        config
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_without_datasets_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = Provider::open(config(temp_dir.path(), false)).await.err();
        assert!(matches!(err, Some(ProviderError::NoDatasets(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reload_unchanged_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        write_dataset(temp_dir.path(), "1_a", 1);

        let provider = Provider::open(config(temp_dir.path(), false)).await.unwrap();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        provider.on_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!provider.reload().await.unwrap());
        provider.close().await.unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_old_state_outlives_callback() {
        let temp_dir = TempDir::new().unwrap();
        let old_dir = write_dataset(temp_dir.path(), "1_a", 1);

        let provider = Provider::open(config(temp_dir.path(), true)).await.unwrap();
        let old_base_dirs = provider.base_dirs();

        let updates = Arc::new(AtomicUsize::new(0));
        let old_readable = Arc::new(AtomicBool::new(false));
        let (counter, readable, held) = (updates.clone(), old_readable.clone(), old_base_dirs.clone());
        provider.on_update(move |state| {
            assert_eq!(state.dirs().len(), 1);
            readable.store(held.group_usage(Age::All).is_ok(), Ordering::SeqCst);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let new_dir = write_dataset(temp_dir.path(), "2_a", 2);
        assert!(provider.reload().await.unwrap());
        assert_eq!(provider.dirs(), vec![new_dir]);

        provider.close().await.unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert!(old_readable.load(Ordering::SeqCst));
        assert!(old_base_dirs.group_usage(Age::All).is_err());
        assert!(!old_dir.exists());
        assert!(removal_marker(&old_dir).unwrap().exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callbacks_never_overlap() {
        let temp_dir = TempDir::new().unwrap();
        write_dataset(temp_dir.path(), "1_a", 1);

        let provider = Provider::open(config(temp_dir.path(), false)).await.unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (running_cb, overlapped_cb, seen_cb) = (running.clone(), overlapped.clone(), seen.clone());
        provider.on_update(move |state| {
            if running_cb.fetch_add(1, Ordering::SeqCst) > 0 {
                overlapped_cb.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(100));
            seen_cb.lock().push(state.dirs()[0].clone());
            running_cb.fetch_sub(1, Ordering::SeqCst);
        });

        let second = write_dataset(temp_dir.path(), "2_a", 2);
        assert!(provider.reload().await.unwrap());
        let third = write_dataset(temp_dir.path(), "3_a", 3);
        assert!(provider.reload().await.unwrap());
        assert_eq!(provider.dirs(), vec![third.clone()]);

        provider.close().await.unwrap();
        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(*seen.lock(), vec![second, third]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_reload_keeps_state() {
        let temp_dir = TempDir::new().unwrap();
        let good = write_dataset(temp_dir.path(), "1_a", 1);

        let provider = Provider::open(config(temp_dir.path(), false)).await.unwrap();

        // Required entries exist but are not stores
        let broken = temp_dir.path().join("2_a");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(DGUTA_FILE), b"").unwrap();
        fs::write(broken.join(BASEDIRS_FILE), b"").unwrap();

        assert!(provider.reload().await.is_err());
        assert_eq!(provider.dirs(), vec![good]);
        assert!(provider.base_dirs().group_usage(Age::All).is_ok());

        provider.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poller_swaps_and_reports_errors() {
        let temp_dir = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        write_dataset(temp_dir.path(), "1_a", 1);

        let mut config = config(temp_dir.path(), false);
        config.datasets.poll_interval_secs = 1;
        let provider = Provider::open(config).await.unwrap();

        let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel();
        provider.on_update(move |state| {
            let _ = update_tx.send(state.dirs().to_vec());
        });
        let (error_tx, mut error_rx) = tokio::sync::mpsc::unbounded_channel();
        provider.on_error(move |e| {
            let _ = error_tx.send(matches!(e, ProviderError::Store(_)));
        });

        // Datasets appear in place only once complete
        let second = temp_dir.path().join("2_a");
        fs::rename(write_dataset(staging.path(), "2_a", 2), &second).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), update_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, vec![second.clone()]);
        assert_eq!(provider.dirs(), vec![second.clone()]);

        let broken = staging.path().join("3_a");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(DGUTA_FILE), b"").unwrap();
        fs::write(broken.join(BASEDIRS_FILE), b"").unwrap();
        fs::rename(&broken, temp_dir.path().join("3_a")).unwrap();

        let store_error = tokio::time::timeout(Duration::from_secs(10), error_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(store_error);
        assert_eq!(provider.dirs(), vec![second]);
        assert!(provider.base_dirs().group_usage(Age::All).is_ok());

        provider.close().await.unwrap();
        assert!(update_rx.try_recv().is_err());
    }
}
