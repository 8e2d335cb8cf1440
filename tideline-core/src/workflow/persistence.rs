//! Execution persistence using JSON file storage

use crate::models::execution::{CurrentExecution, ExecutionKey};
use crate::models::mutable_state::MutableState;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Current-run pointer as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub key: ExecutionKey,
    pub current: CurrentExecution,
}

/// Root JSON store containing all execution data
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonStore {
    /// Every run ever committed
    pub runs: Vec<MutableState>,
    /// One pointer per workflow ID to its latest run
    pub current: Vec<CurrentRecord>,
}

impl JsonStore {
    /// Insert or replace a run, and optionally point its workflow ID at it
    pub fn upsert(&mut self, run: &MutableState, make_current: bool) {
        match self
            .runs
            .iter_mut()
            .find(|r| r.identity() == run.identity())
        {
            Some(existing) => *existing = run.clone(),
            None => self.runs.push(run.clone()),
        }

        if !make_current {
            return;
        }
        let key = run.identity().key();
        let current = run.current_execution();
        match self.current.iter_mut().find(|c| c.key == key) {
            Some(record) => record.current = current,
            None => self.current.push(CurrentRecord { key, current }),
        }
    }
}

/// Storage collaborator the execution store commits through
#[async_trait]
pub trait ExecutionPersistence: Send + Sync {
    /// Persist a run; `make_current` also moves its workflow ID's current pointer
    async fn save(&self, run: &MutableState, make_current: bool) -> Result<()>;

    /// Everything persisted so far
    async fn load_all(&self) -> Result<JsonStore>;
}

fn lock(store: &Mutex<JsonStore>) -> MutexGuard<'_, JsonStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Execution persistence backed by a single JSON file.
///
/// One process owns a store at a time: `new` takes an exclusive lock on the
/// sibling `<store>.lock` file and holds it until the persistence is dropped,
/// so the in-memory mirror is never stale with respect to the file.
pub struct JsonFilePersistence {
    /// Path to JSON store file
    store_path: PathBuf,
    /// Mirror of the file contents; replaced only after a successful write
    store: Mutex<JsonStore>,
    /// Open handle whose exclusive lock marks this process as the owner
    _owner: File,
}

impl JsonFilePersistence {
    /// Claim the store at `store_path` and load what it holds
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create execution store directory")?;
        }

        let owner = claim_store(&store_path)?;
        let store = read_store(&store_path)?;

        Ok(Self {
            store_path,
            store: Mutex::new(store),
            _owner: owner,
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Lock file guarding the store at `store_path`
    pub fn lock_path(store_path: &Path) -> PathBuf {
        sibling(store_path, ".lock")
    }
}

fn sibling(store_path: &Path, suffix: &str) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn claim_store(store_path: &Path) -> Result<File> {
    let lock_path = JsonFilePersistence::lock_path(store_path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => Err(anyhow!(
            "Execution store {} is in use by another process",
            store_path.display()
        )),
        Err(err) => Err(err).context("Failed to lock execution store"),
    }
}

fn read_store(path: &Path) -> Result<JsonStore> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(JsonStore::default()),
        Err(err) => return Err(err).context("Failed to read execution store"),
    };

    if contents.trim().is_empty() {
        return Ok(JsonStore::default());
    }
    serde_json::from_str(&contents).context("Failed to parse execution store JSON")
}

/// Replace the store file with `store`; readers see the old or the new file, never a mix
fn write_store(path: &Path, store: &JsonStore) -> Result<()> {
    let json = serde_json::to_vec_pretty(store).context("Failed to serialize execution store")?;
    let staging = sibling(path, ".tmp");

    let mut file = File::create(&staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;
    file.write_all(&json)
        .context("Failed to write execution store")?;
    file.sync_all()
        .context("Failed to flush execution store to disk")?;

    std::fs::rename(&staging, path).context("Failed to replace execution store file")
}

#[async_trait]
impl ExecutionPersistence for JsonFilePersistence {
    async fn save(&self, run: &MutableState, make_current: bool) -> Result<()> {
        let mut store = lock(&self.store);
        let mut next = store.clone();
        next.upsert(run, make_current);
        write_store(&self.store_path, &next)?;
        *store = next;
        Ok(())
    }

    async fn load_all(&self) -> Result<JsonStore> {
        Ok(lock(&self.store).clone())
    }
}

/// Non-durable persistence; counts commits so tests can observe them
#[derive(Default)]
pub struct InMemoryPersistence {
    store: Mutex<JsonStore>,
    saves: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionPersistence for InMemoryPersistence {
    async fn save(&self, run: &MutableState, make_current: bool) -> Result<()> {
        lock(&self.store).upsert(run, make_current);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_all(&self) -> Result<JsonStore> {
        Ok(lock(&self.store).clone())
    }
}
