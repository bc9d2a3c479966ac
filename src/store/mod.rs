/// Content-addressed object store
///
/// This module handles:
/// - Mapping identifiers to sharded paths and provisioning the tree (shard.rs)
/// - The startup barrier that keeps requests off an unprovisioned tree (gate.rs)
/// - Idempotent put and plain-bytes get of encoded derivatives

pub mod gate;
pub mod shard;

pub use gate::StoreGate;
pub use shard::{ProvisionedLayout, ShardLayout, SHARD_COUNT, SHARD_FANOUT};

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::identity::{self, Identifier, SCHEMA_V1};

/// What a put actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// The object was already there; content is a function of the id
    AlreadyPresent,
}

/// Object counts gathered by walking the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub objects: u64,
    pub bytes: u64,
    pub occupied_shards: usize,
    pub largest_shard: u64,
}

#[derive(Debug, Clone)]
pub struct Store {
    layout: ShardLayout,
}

impl Store {
    /// Open a store over a provisioned tree
    pub fn new(provisioned: ProvisionedLayout) -> Self {
        Self {
            layout: provisioned.into_layout(),
        }
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn path_for(&self, id: &Identifier) -> PathBuf {
        self.layout.path_for(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.path_for(id).is_file()
    }

    /// Persist `bytes` under `id`
    ///
    /// Skips the write when the object already exists. New objects go
    /// through a temp file in the shard directory and an atomic rename, so
    /// a concurrent reader never sees a half-written file and two writers
    /// racing on the same id both leave identical content behind.
    pub fn put(&self, id: &Identifier, bytes: &[u8]) -> Result<PutOutcome> {
        if id.schema_version == SCHEMA_V1 && identity::content_hash(bytes) != id.content_hash {
            return Err(Error::ContentMismatch(*id));
        }

        let path = self.path_for(id);
        if path.is_file() {
            debug!(id = %id, "object already stored");
            return Ok(PutOutcome::AlreadyPresent);
        }

        let dir = self.layout.shard_dir(id);
        let write_failed = |source: std::io::Error| Error::StoreWriteFailed {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_failed)?;
        tmp.write_all(bytes).map_err(write_failed)?;
        tmp.as_file().sync_all().map_err(write_failed)?;
        tmp.persist(&path).map_err(|e| write_failed(e.error))?;

        debug!(id = %id, path = %path.display(), bytes = bytes.len(), "object written");
        Ok(PutOutcome::Written)
    }

    /// Raw bytes for `id`, `None` if it was never stored
    pub fn get(&self, id: &Identifier) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::StoreReadFailed { path, source }),
        }
    }

    /// Walk the tree and count objects per shard
    ///
    /// Files whose names do not parse as identifiers (stray temp files,
    /// anything dropped in by hand) are ignored.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut per_shard: HashMap<PathBuf, u64> = HashMap::new();
        let mut stats = StoreStats::default();

        for entry in WalkDir::new(self.root()).min_depth(3).max_depth(3) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable store entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_object = entry
                .file_name()
                .to_str()
                .map(|name| name.parse::<Identifier>().is_ok())
                .unwrap_or(false);
            if !is_object {
                continue;
            }

            stats.objects += 1;
            stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            if let Some(parent) = entry.path().parent() {
                *per_shard.entry(parent.to_path_buf()).or_default() += 1;
            }
        }

        stats.occupied_shards = per_shard.len();
        stats.largest_shard = per_shard.values().copied().max().unwrap_or(0);
        Ok(stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identity::{derive, ColorTag};
    use std::sync::OnceLock;
    use tempfile::TempDir;

    /// One provisioned tree shared by tests that only add objects
    ///
    /// Content addressing makes sharing safe: tests can only ever add
    /// objects, and an object's bytes are fixed by its identifier.
    pub(crate) fn shared_store() -> Store {
        static ROOT: OnceLock<(TempDir, ProvisionedLayout)> = OnceLock::new();
        let (_, provisioned) = ROOT.get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let provisioned = ShardLayout::new(dir.path().join("store")).provision().unwrap();
            (dir, provisioned)
        });
        Store::new(provisioned.clone())
    }

    pub(crate) fn fresh_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let provisioned = ShardLayout::new(dir.path().join("store")).provision().unwrap();
        (dir, Store::new(provisioned))
    }

    fn object(payload: &[u8]) -> (Identifier, Vec<u8>) {
        let id = derive(SCHEMA_V1, payload, 3, 2, ColorTag::new(0xAB, 0xCD, 0xEF)).unwrap();
        (id, payload.to_vec())
    }

    #[test]
    fn test_put_then_get_round_trips() {
        let store = shared_store();
        let (id, bytes) = object(b"round trip payload");

        store.put(&id, &bytes).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(bytes));
        assert!(store.path_for(&id).starts_with(store.root()));
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = shared_store();
        let (id, bytes) = object(b"idempotent payload");

        store.put(&id, &bytes).unwrap();
        assert_eq!(store.put(&id, &bytes).unwrap(), PutOutcome::AlreadyPresent);
        assert_eq!(store.get(&id).unwrap(), Some(bytes));

        // No temp files left next to the object
        let siblings = fs::read_dir(store.layout().shard_dir(&id))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .count();
        assert_eq!(siblings, 0);
    }

    #[test]
    fn test_unknown_identifier_is_none() {
        let store = shared_store();
        let (id, _) = object(b"never stored anywhere");
        assert_eq!(store.get(&id).unwrap(), None);
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_rejects_bytes_that_do_not_match_the_hash() {
        let store = shared_store();
        let (id, _) = object(b"the real content");
        let result = store.put(&id, b"something else");
        assert!(matches!(result, Err(Error::ContentMismatch(_))));
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_missing_shard_dir_is_a_write_failure() {
        let (_dir, store) = fresh_store();
        let (id, bytes) = object(b"shard removed underneath");
        fs::remove_dir(store.layout().shard_dir(&id)).unwrap();

        let result = store.put(&id, &bytes);
        assert!(matches!(result, Err(Error::StoreWriteFailed { .. })));
    }

    #[test]
    fn test_stats_counts_objects() {
        let (_dir, store) = fresh_store();
        let payloads: [&[u8]; 3] = [b"one", b"two", b"three"];
        for payload in payloads {
            let (id, bytes) = object(payload);
            store.put(&id, &bytes).unwrap();
        }
        fs::write(store.root().join("00").join("00").join("stray.txt"), b"x").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.objects, 3);
        assert_eq!(stats.bytes, 3 + 3 + 5);
        assert!(stats.occupied_shards >= 1);
        assert!(stats.largest_shard >= 1);
    }
}
