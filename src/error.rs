/// Error taxonomy for the derivative store
///
/// Every pipeline stage returns one of these instead of aborting.
/// None of them are retried internally: puts are idempotent, so the
/// caller can safely repeat a whole ingest after a `StoreWriteFailed`.

use std::path::PathBuf;
use thiserror::Error;

use crate::identity::Identifier;
use crate::pipeline::RungName;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Undecodable, empty or zero-dimension input
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The codec failed on one rung; the whole ingest is aborted
    #[error("failed to encode {rung} rung: {reason}")]
    EncodeFailed { rung: RungName, reason: String },

    /// Disk or permission error while persisting an object
    #[error("failed to write {}: {source}", .path.display())]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Disk or permission error while reading an object back
    #[error("failed to read {}: {source}", .path.display())]
    StoreReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bytes handed to the store do not hash to the identifier's content hash
    #[error("content does not match identifier {0}")]
    ContentMismatch(Identifier),

    /// No object (or no index record) for this identifier
    #[error("not found: {0}")]
    NotFound(Identifier),

    /// The shard tree could not be created; the process must not serve
    #[error("failed to provision store at {}: {source}", .path.display())]
    ProvisionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A read-only open found no complete shard tree
    #[error("no provisioned store at {}: missing {}", .root.display(), .missing.display())]
    NotProvisioned { root: PathBuf, missing: PathBuf },

    /// A request arrived before provisioning finished
    #[error("store is not ready yet")]
    NotReady,

    #[error("invalid identifier {input:?}: {reason}")]
    InvalidIdentifier { input: String, reason: String },

    #[error("invalid ladder: {0}")]
    InvalidLadder(String),

    /// A rung name that is not part of any ladder
    #[error("unknown rung {0:?}")]
    UnknownRung(String),

    #[error("metadata index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// A stored row that no longer parses, or a connection left poisoned
    #[error("metadata index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking worker panicked or was cancelled
    #[error("task join error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreWriteFailed { .. } | Error::NotReady)
    }
}
