/// Path sharding
///
/// Objects live at `root/<h0h1>/<h2h3>/<rendered identifier>` where the two
/// shard levels are the first two hex pairs of the content hash, i.e.
/// characters 5..7 and 7..9 of the rendered identifier. The full
/// 256 x 256 tree is created up front so the write path never has to mkdir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::Identifier;

/// Directories per shard level
pub const SHARD_FANOUT: u32 = 256;

/// Total leaf directories in a provisioned tree
pub const SHARD_COUNT: u32 = SHARD_FANOUT * SHARD_FANOUT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    root: PathBuf,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `(outer, inner)` shard names for an identifier
    pub fn shard_of(id: &Identifier) -> (String, String) {
        (
            format!("{:02x}", id.content_hash[0]),
            format!("{:02x}", id.content_hash[1]),
        )
    }

    /// Leaf directory holding an identifier's object
    pub fn shard_dir(&self, id: &Identifier) -> PathBuf {
        let (outer, inner) = Self::shard_of(id);
        self.root.join(outer).join(inner)
    }

    /// Full object path for an identifier
    pub fn path_for(&self, id: &Identifier) -> PathBuf {
        self.shard_dir(id).join(id.render())
    }

    /// Every leaf directory of a provisioned tree
    fn leaf_dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..SHARD_FANOUT).flat_map(move |outer| {
            let outer_dir = self.root.join(format!("{:02x}", outer));
            (0..SHARD_FANOUT).map(move |inner| outer_dir.join(format!("{:02x}", inner)))
        })
    }

    /// Create every shard directory under the root
    ///
    /// Re-running on an existing tree is a no-op. Any failure is fatal:
    /// there is no lazy mkdir fallback on the write path.
    pub fn provision(self) -> Result<ProvisionedLayout> {
        info!(root = %self.root.display(), "Initializing data store...");
        let started = Instant::now();

        for dir in self.leaf_dirs() {
            fs::create_dir_all(&dir).map_err(|source| Error::ProvisionFailed { path: dir, source })?;
        }

        info!(
            directories = SHARD_COUNT,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Data store ready"
        );
        Ok(ProvisionedLayout { layout: self })
    }

    /// Accept an already provisioned tree without creating anything
    ///
    /// Fails with `NotProvisioned` naming the first missing directory.
    pub fn open_existing(self) -> Result<ProvisionedLayout> {
        let missing = self.leaf_dirs().find(|dir| !dir.is_dir());
        if let Some(missing) = missing {
            return Err(Error::NotProvisioned {
                root: self.root,
                missing,
            });
        }
        debug!(root = %self.root.display(), "existing data store opened");
        Ok(ProvisionedLayout { layout: self })
    }
}

/// Proof that a layout's shard tree exists
///
/// Only `ShardLayout::provision` hands these out, and a `Store` can only
/// be built from one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedLayout {
    layout: ShardLayout,
}

impl ProvisionedLayout {
    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn into_layout(self) -> ShardLayout {
        self.layout
    }
}
