//! Durable per-repository index storage.
//!
//! Every write lands in a fresh generation directory that is fully written
//! and fsynced before a single atomic rename of the `CURRENT` pointer
//! publishes it. Readers resolve `CURRENT` once and read both files from
//! that immutable generation, so they observe either the old index or the
//! new one, never a mix. The previous generation is kept around for
//! readers still holding it.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::layout::{
    generation_dir, parse_generation, repo_id_from_slot, slot_name, write_synced, CURRENT_FILE,
    PAYLOAD_FILE, RECORD_FILE, STAGING_DIR,
};
use super::models::{checksum, IndexPayload, IndexRecord};
use crate::error::StorageError;
use crate::{Error, Result};

/// Generations kept per repository (current plus predecessors).
const RETAINED_GENERATIONS: u64 = 2;

/// Attempts to resolve a generation that was pruned mid-read.
const READ_ATTEMPTS: usize = 8;

/// How much of a generation a read loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadDepth {
    Record,
    /// Record plus a checksum pass over the payload bytes.
    Verified,
    Full,
}

/// On-disk index store rooted at the index cache path.
#[derive(Debug)]
pub struct IndexStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndexStore {
    /// Open (and create) the store, discarding leftovers of interrupted
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns a fatal `Unwritable` error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR);

        if staging.exists() {
            if let Err(e) = std::fs::remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), error = %e, "Failed to clear staging area");
            }
        }
        std::fs::create_dir_all(&staging).map_err(|e| StorageError::unwritable(&staging, e))?;

        tracing::info!(path = %root.display(), "Index store opened");

        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_dir(&self, repo_id: &str) -> PathBuf {
        self.root.join(slot_name(repo_id))
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR).join(uuid::Uuid::new_v4().to_string())
    }

    fn write_lock(&self, repo_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.write_locks
                .lock()
                .entry(repo_id.to_string())
                .or_default(),
        )
    }

    /// Publish a new index for a repository.
    ///
    /// The payload checksum is computed here and stamped into the stored
    /// record, which is returned with its location filled in.
    ///
    /// # Errors
    ///
    /// Returns `Unwritable` if the index path cannot be written; the
    /// previously published index stays intact.
    pub fn write(
        &self,
        repo_id: &str,
        record: &IndexRecord,
        payload: &IndexPayload,
    ) -> Result<IndexRecord> {
        if repo_id.is_empty() {
            return Err(Error::config("repository id cannot be empty"));
        }
        if record.repo_id != repo_id {
            return Err(Error::internal(format!(
                "record for '{}' written under '{repo_id}'",
                record.repo_id
            )));
        }

        let lock = self.write_lock(repo_id);
        let _guard = lock.lock();

        let payload_bytes = payload.encode()?;
        let mut stored = record.clone();
        stored.payload_checksum = checksum(&payload_bytes);
        stored.location = None;
        let record_bytes = stored.encode()?;

        let staging = self.staging_dir();
        let result = self.publish(repo_id, &staging, &record_bytes, &payload_bytes);
        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        let location = result?;

        tracing::debug!(id = repo_id, path = %location.display(), "Index published");
        stored.location = Some(location);
        Ok(stored)
    }

    fn publish(
        &self,
        repo_id: &str,
        staging: &Path,
        record_bytes: &[u8],
        payload_bytes: &[u8],
    ) -> Result<PathBuf> {
        let unwritable = |path: &Path, e: std::io::Error| -> Error {
            StorageError::unwritable(path, e).into()
        };

        std::fs::create_dir_all(staging).map_err(|e| unwritable(staging, e))?;
        write_synced(&staging.join(RECORD_FILE), record_bytes).map_err(|e| unwritable(staging, e))?;
        write_synced(&staging.join(PAYLOAD_FILE), payload_bytes)
            .map_err(|e| unwritable(staging, e))?;

        let slot = self.slot_dir(repo_id);
        std::fs::create_dir_all(&slot).map_err(|e| unwritable(&slot, e))?;

        let generation = self.list_versions(repo_id)?.last().map_or(1, |g| g + 1);
        let target = slot.join(generation_dir(generation));
        std::fs::rename(staging, &target).map_err(|e| unwritable(&target, e))?;

        let pointer_tmp = slot.join(format!("{CURRENT_FILE}.{}", uuid::Uuid::new_v4()));
        let pointer = slot.join(CURRENT_FILE);
        let swapped = write_synced(&pointer_tmp, generation.to_string().as_bytes())
            .and_then(|()| std::fs::rename(&pointer_tmp, &pointer));
        if let Err(e) = swapped {
            let _ = std::fs::remove_file(&pointer_tmp);
            let _ = std::fs::remove_dir_all(&target);
            return Err(unwritable(&pointer, e));
        }

        self.prune(repo_id, generation);
        Ok(target)
    }

    fn prune(&self, repo_id: &str, current: u64) {
        let Ok(versions) = self.list_versions(repo_id) else {
            return;
        };
        let keep_from = current.saturating_sub(RETAINED_GENERATIONS - 1);
        for generation in versions.into_iter().filter(|g| *g < keep_from) {
            let dir = self.slot_dir(repo_id).join(generation_dir(generation));
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to prune generation");
            }
        }
    }

    fn current_generation(&self, repo_id: &str) -> Result<u64> {
        let pointer = self.slot_dir(repo_id).join(CURRENT_FILE);
        let contents = match std::fs::read_to_string(&pointer) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found("index", repo_id).into());
            }
            Err(e) => return Err(StorageError::corrupt(repo_id, e.to_string()).into()),
        };

        contents
            .trim()
            .parse()
            .map_err(|_| StorageError::corrupt(repo_id, "unreadable CURRENT pointer").into())
    }

    fn read_generation(
        &self,
        repo_id: &str,
        depth: ReadDepth,
    ) -> Result<(IndexRecord, Option<IndexPayload>)> {
        for _ in 0..READ_ATTEMPTS {
            let generation = self.current_generation(repo_id)?;
            let dir = self.slot_dir(repo_id).join(generation_dir(generation));

            let record_bytes = match std::fs::read(dir.join(RECORD_FILE)) {
                Ok(bytes) => bytes,
                // Pruned under us; resolve CURRENT again.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::corrupt(repo_id, e.to_string()).into()),
            };

            let mut record: IndexRecord = serde_json::from_slice(&record_bytes)
                .map_err(|e| StorageError::corrupt(repo_id, format!("bad record: {e}")))?;
            if record.repo_id != repo_id {
                return Err(StorageError::corrupt(
                    repo_id,
                    format!("record belongs to '{}'", record.repo_id),
                )
                .into());
            }
            record.location = Some(dir.clone());

            if depth == ReadDepth::Record {
                return Ok((record, None));
            }

            let payload_bytes = match std::fs::read(dir.join(PAYLOAD_FILE)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::corrupt(repo_id, e.to_string()).into()),
            };

            if checksum(&payload_bytes) != record.payload_checksum {
                return Err(StorageError::corrupt(repo_id, "payload checksum mismatch").into());
            }
            if depth == ReadDepth::Verified {
                return Ok((record, None));
            }

            let payload: IndexPayload = serde_json::from_slice(&payload_bytes)
                .map_err(|e| StorageError::corrupt(repo_id, format!("bad payload: {e}")))?;

            return Ok((record, Some(payload)));
        }

        Err(StorageError::corrupt(repo_id, "generation vanished during read").into())
    }

    /// Read the published record and payload.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing is published, `CorruptIndex` if the
    /// stored files are malformed.
    pub fn read(&self, repo_id: &str) -> Result<(IndexRecord, IndexPayload)> {
        let (record, payload) = self.read_generation(repo_id, ReadDepth::Full)?;
        let payload = payload.ok_or_else(|| Error::internal("payload missing after read"))?;
        Ok((record, payload))
    }

    /// Read only the published record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `CorruptIndex` like [`IndexStore::read`].
    pub fn read_record(&self, repo_id: &str) -> Result<IndexRecord> {
        self.read_generation(repo_id, ReadDepth::Record)
            .map(|(record, _)| record)
    }

    /// Read the published record after checking the payload against its
    /// checksum. The payload is not decoded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `CorruptIndex` like [`IndexStore::read`].
    pub fn verify(&self, repo_id: &str) -> Result<IndexRecord> {
        self.read_generation(repo_id, ReadDepth::Verified)
            .map(|(record, _)| record)
    }

    /// Remove every artifact of a repository. Succeeds if already absent.
    ///
    /// # Errors
    ///
    /// Returns `Unwritable` if the artifacts cannot be removed.
    pub fn delete(&self, repo_id: &str) -> Result<()> {
        let lock = self.write_lock(repo_id);
        let _guard = lock.lock();

        let slot = self.slot_dir(repo_id);
        let trash = self.staging_dir();

        // Detach first so readers see the whole index disappear at once.
        match std::fs::rename(&slot, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.write_locks.lock().remove(repo_id);
                return Ok(());
            }
            Err(e) => return Err(StorageError::unwritable(&slot, e).into()),
        }

        std::fs::remove_dir_all(&trash).map_err(|e| StorageError::unwritable(&trash, e))?;
        self.write_locks.lock().remove(repo_id);
        tracing::info!(id = repo_id, "Index deleted");
        Ok(())
    }

    /// Generations present on disk for a repository, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot directory cannot be listed.
    pub fn list_versions(&self, repo_id: &str) -> Result<Vec<u64>> {
        let entries = match std::fs::read_dir(self.slot_dir(repo_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions: Vec<u64> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_generation))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Ids of every repository with artifacts in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store root cannot be listed.
    pub fn list_repo_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            match repo_id_from_slot(name) {
                Some(id) => ids.push(id),
                None => tracing::warn!(slot = name, "Ignoring unrecognized index directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
