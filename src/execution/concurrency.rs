//! Concurrency groups
//!
//! Runs register under a group key (by default the pipeline name and
//! release version). With `cancel_in_progress`, a newer registration cancels
//! the run holding the key. Without it, the newer run waits until the key
//! is free.
//!
//! Groups live in one process unless backed by [`GroupFiles`]: one holder
//! file per key, containing the run id of the current holder. A newer run
//! rewrites the file; the older run watches it, refreshing its timestamp
//! while it still holds the key, and cancels itself once another id appears.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A holder file not refreshed for this long belongs to a run that died
const STALE_AFTER: Duration = Duration::from_secs(60);

struct Slot {
    run_id: Uuid,
    cancel: Arc<watch::Sender<bool>>,
    /// Dropped with the slot, which wakes waiting runs
    released: watch::Sender<()>,
}

/// Who holds a key on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// No file, or one left behind by a dead run
    Free,
    Run(Uuid),
    /// Fresh file that does not hold a run id (yet)
    Unknown,
}

/// Holder files shared by every invocation pointing at the same directory
#[derive(Debug, Clone)]
pub struct GroupFiles {
    dir: PathBuf,
    poll: Duration,
    stale_after: Duration,
}

impl GroupFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll: POLL_INTERVAL,
            stale_after: STALE_AFTER,
        }
    }

    /// `<data dir>/blinko-release/groups`
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blinko-release")
            .join("groups")
    }

    /// How often holders refresh and check their file
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.holder", name))
    }

    async fn holder(&self, path: &Path) -> io::Result<Holder> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Free),
            Err(e) => return Err(e),
        };
        let modified = match fs::metadata(path).await {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Holder::Free),
            Err(e) => return Err(e),
        };

        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age > self.stale_after {
            debug!("Ignoring stale holder file {}", path.display());
            return Ok(Holder::Free);
        }

        Ok(Uuid::parse_str(content.trim())
            .map(Holder::Run)
            .unwrap_or(Holder::Unknown))
    }

    /// Replace the holder in one step
    async fn overwrite(&self, path: &Path, run_id: Uuid) -> io::Result<()> {
        let tmp = path.with_extension(format!("{}.tmp", run_id.simple()));
        fs::write(&tmp, run_id.to_string()).await?;
        fs::rename(&tmp, path).await
    }

    /// Take the key only if nobody holds it
    async fn create(&self, path: &Path, run_id: Uuid) -> io::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Removed stale holder file {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        };
        file.write_all(run_id.to_string().as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Take `key` for `run_id`; returns the live run it superseded
    async fn claim(
        &self,
        key: &str,
        run_id: Uuid,
        cancel_in_progress: bool,
    ) -> io::Result<Option<Uuid>> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);

        loop {
            let holder = self.holder(&path).await?;
            if cancel_in_progress {
                self.overwrite(&path, run_id).await?;
                return Ok(match holder {
                    Holder::Run(previous) if previous != run_id => Some(previous),
                    _ => None,
                });
            }

            match holder {
                Holder::Run(current) if current == run_id => return Ok(None),
                Holder::Free => {
                    if self.create(&path, run_id).await? {
                        return Ok(None);
                    }
                }
                Holder::Run(_) | Holder::Unknown => {
                    debug!("Run {} waiting for group '{}' ({})", run_id, key, path.display());
                    tokio::time::sleep(self.poll).await;
                }
            }
        }
    }

    /// Watch the holder file until another run takes it over
    fn watch(&self, key: &str, run_id: Uuid, cancel: Arc<watch::Sender<bool>>) -> JoinHandle<()> {
        let files = self.clone();
        let path = self.path_for(key);
        let key = key.to_string();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(files.poll).await;
                match files.holder(&path).await {
                    Ok(Holder::Run(holder)) if holder != run_id => {
                        info!("Run {} superseded by run {} in group '{}'", run_id, holder, key);
                        let _ = cancel.send(true);
                        return;
                    }
                    Ok(_) => {
                        if let Err(e) = touch(&path).await {
                            debug!("Cannot refresh {}: {}", path.display(), e);
                        }
                    }
                    Err(e) => warn!("Cannot read holder file {}: {}", path.display(), e),
                }
            }
        })
    }

    fn release(&self, key: &str, run_id: Uuid) {
        let path = self.path_for(key);
        let held = std::fs::read_to_string(&path)
            .map(|content| content.trim() == run_id.to_string())
            .unwrap_or(false);
        if held {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Cannot remove holder file {}: {}", path.display(), e);
            }
        }
    }
}

async fn touch(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(io::Error::other)?
}

/// Registry of active runs per group key
#[derive(Default)]
pub struct ConcurrencyGroups {
    slots: Mutex<HashMap<String, Slot>>,
    files: Option<GroupFiles>,
}

impl ConcurrencyGroups {
    /// Groups seen only by engines of this process
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Groups also seen by every other invocation using the same files
    pub fn shared(files: GroupFiles) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::default(),
            files: Some(files),
        })
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run of this process currently holding `key`
    pub fn holder(&self, key: &str) -> Option<Uuid> {
        self.slots().get(key).map(|slot| slot.run_id)
    }

    /// Take the group key for `run_id`.
    ///
    /// Returns the guard and the run it superseded, if any.
    pub async fn register(
        self: &Arc<Self>,
        key: &str,
        run_id: Uuid,
        cancel_in_progress: bool,
    ) -> io::Result<(RunGuard, Option<Uuid>)> {
        let (mut guard, superseded, cancel) = loop {
            let mut released = {
                let mut slots = self.slots();

                match slots.get(key) {
                    Some(existing) if !cancel_in_progress => {
                        debug!("Run {} waiting for group '{}'", run_id, key);
                        existing.released.subscribe()
                    }
                    _ => {
                        let (cancel, receiver) = watch::channel(false);
                        let cancel = Arc::new(cancel);
                        let (released, _) = watch::channel(());
                        let slot = Slot {
                            run_id,
                            cancel: cancel.clone(),
                            released,
                        };

                        let superseded = slots.insert(key.to_string(), slot).map(|previous| {
                            info!("Run {} supersedes run {} in group '{}'", run_id, previous.run_id, key);
                            let _ = previous.cancel.send(true);
                            previous.run_id
                        });

                        let guard = RunGuard {
                            groups: self.clone(),
                            key: key.to_string(),
                            run_id,
                            cancelled: receiver,
                            watcher: None,
                        };
                        break (guard, superseded, cancel);
                    }
                }
            };

            // Errors once the holder's slot is gone
            let _ = released.changed().await;
        };

        let Some(files) = &self.files else {
            return Ok((guard, superseded));
        };
        let superseded_elsewhere = files.claim(key, run_id, cancel_in_progress).await?;
        if let Some(previous) = superseded_elsewhere {
            info!("Run {} supersedes run {} in group '{}'", run_id, previous, key);
        }
        guard.watcher = Some(files.watch(key, run_id, cancel));

        Ok((guard, superseded.or(superseded_elsewhere)))
    }

    fn release(&self, key: &str, run_id: Uuid) {
        if let Some(files) = &self.files {
            files.release(key, run_id);
        }

        let mut slots = self.slots();
        if slots.get(key).is_some_and(|slot| slot.run_id == run_id) {
            slots.remove(key);
        }
    }
}

/// Membership of a run in its group; leaves the group on drop
pub struct RunGuard {
    groups: Arc<ConcurrencyGroups>,
    key: String,
    run_id: Uuid,
    cancelled: watch::Receiver<bool>,
    watcher: Option<JoinHandle<()>>,
}

impl RunGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Receiver that turns `true` when a newer run supersedes this one
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancelled.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.groups.release(&self.key, self.run_id);
    }
}
