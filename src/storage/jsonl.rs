//! JSONL file storage
//!
//! Records are stored one JSON object per line, sorted by key. Every
//! access holds an `fs2` lock on a sibling `.lock` file: shared for reads,
//! exclusive for read-modify-write. Writes go to a temp file that is then
//! renamed over the original, so readers never observe a half-written file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{Task, TaskId, User, UserId};

use super::repository::{
    apply_change_set, ChangeSet, RequestContext, StoreError, TaskRepository, UserRepository,
};

/// A record with a stable key
pub trait Keyed {
    type Key: Ord + Clone;

    fn key(&self) -> Self::Key;
}

impl Keyed for Task {
    type Key = TaskId;

    fn key(&self) -> TaskId {
        self.id.clone()
    }
}

impl Keyed for User {
    type Key = UserId;

    fn key(&self) -> UserId {
        self.id.clone()
    }
}

/// Locked JSONL file of keyed records
pub struct JsonlFile<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlFile<T>
where
    T: Keyed + Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> Result<File> {
        self.ensure_parent()?;
        let lock_path = self.path.with_extension("jsonl.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        if exclusive {
            file.lock_exclusive()
                .context("Failed to acquire write lock on store")?;
        } else {
            file.lock_shared()
                .context("Failed to acquire read lock on store")?;
        }
        Ok(file)
    }

    fn read_unlocked(&self) -> Result<BTreeMap<T::Key, T>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open store: {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut records = BTreeMap::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;

            if line.trim().is_empty() {
                continue;
            }

            let record: T = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Failed to parse record at {}:{}",
                    self.path.display(),
                    line_num + 1
                )
            })?;

            // later lines win, so hand-appended edits take effect
            records.insert(record.key(), record);
        }

        Ok(records)
    }

    fn write_unlocked(&self, records: &BTreeMap<T::Key, T>) -> Result<()> {
        let temp_path = self.path.with_extension("jsonl.tmp");

        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

            let mut writer = BufWriter::new(&file);
            for record in records.values() {
                let line = serde_json::to_string(record).context("Failed to serialize record")?;
                writeln!(writer, "{}", line).context("Failed to write record")?;
            }
            writer.flush().context("Failed to flush store")?;
            file.sync_all().context("Failed to sync store")?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }

    /// Reads all records under a shared lock
    pub fn read_all(&self) -> Result<BTreeMap<T::Key, T>> {
        let _lock = self.lock(false)?;
        self.read_unlocked()
    }

    /// Replaces the file contents under an exclusive lock
    pub fn write_all(&self, records: &BTreeMap<T::Key, T>) -> Result<()> {
        let _lock = self.lock(true)?;
        self.write_unlocked(records)
    }

    /// Read-modify-write under one exclusive lock.
    ///
    /// The file is rewritten only if `f` succeeds.
    pub fn transact<R, E>(&self, f: impl FnOnce(&mut BTreeMap<T::Key, T>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<anyhow::Error>,
    {
        let _lock = self.lock(true)?;
        let mut records = self.read_unlocked()?;
        let result = f(&mut records)?;
        self.write_unlocked(&records)?;
        Ok(result)
    }
}

/// Task repository backed by `tasks.jsonl`
pub struct JsonlTaskRepository {
    file: JsonlFile<Task>,
}

impl JsonlTaskRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl TaskRepository for JsonlTaskRepository {
    fn get_by_id(&self, ctx: &RequestContext, id: &TaskId) -> Result<Task, StoreError> {
        ctx.check()?;
        self.file
            .read_all()?
            .remove(id)
            .ok_or_else(|| StoreError::task_not_found(id))
    }

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<Task>, StoreError> {
        ctx.check()?;
        Ok(self.file.read_all()?.into_values().collect())
    }

    fn get_by_ids(&self, ctx: &RequestContext, ids: &[TaskId]) -> Result<Vec<Task>, StoreError> {
        ctx.check()?;
        let mut all = self.file.read_all()?;
        ids.iter()
            .map(|id| all.remove(id).ok_or_else(|| StoreError::task_not_found(id)))
            .collect()
    }

    fn commit(&self, ctx: &RequestContext, changes: ChangeSet) -> Result<Vec<Task>, StoreError> {
        ctx.check()?;
        self.file.transact(|tasks| apply_change_set(tasks, changes))
    }
}

/// User directory backed by `users.jsonl`
pub struct JsonlUserRepository {
    file: JsonlFile<User>,
}

impl JsonlUserRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonlFile::new(path),
        }
    }

    /// Inserts or replaces a user record
    pub fn upsert(&self, user: User) -> Result<()> {
        self.file.transact(|users| {
            users.insert(user.id.clone(), user);
            Ok::<_, anyhow::Error>(())
        })
    }
}

impl UserRepository for JsonlUserRepository {
    fn get_by_id(&self, ctx: &RequestContext, id: &UserId) -> Result<User, StoreError> {
        ctx.check()?;
        self.file
            .read_all()?
            .remove(id)
            .ok_or_else(|| StoreError::user_not_found(id))
    }

    fn list_all(&self, ctx: &RequestContext) -> Result<Vec<User>, StoreError> {
        ctx.check()?;
        Ok(self.file.read_all()?.into_values().collect())
    }
}
