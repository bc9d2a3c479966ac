/// Startup barrier
///
/// Provisioning the shard tree is a one-time blocking phase. Until it is
/// done, callers either wait on `wait_ready` or are turned away by
/// `try_ready` with `Error::NotReady`.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

use super::shard::{ProvisionedLayout, ShardLayout};
use super::Store;
use crate::error::{Error, Result};

pub struct StoreGate {
    ready: watch::Sender<Option<Arc<Store>>>,
}

impl StoreGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(None);
        Self { ready }
    }

    /// Provision `root` on a blocking thread and open the gate
    ///
    /// On failure the gate stays closed; the caller must not serve.
    pub async fn provision(&self, root: PathBuf) -> Result<Arc<Store>> {
        self.open_with(move || ShardLayout::new(root).provision()).await
    }

    /// Open the gate over a tree that must already be provisioned
    ///
    /// Nothing is created, so a wrong root fails with `NotProvisioned`.
    pub async fn open_existing(&self, root: PathBuf) -> Result<Arc<Store>> {
        self.open_with(move || ShardLayout::new(root).open_existing()).await
    }

    async fn open_with<F>(&self, open: F) -> Result<Arc<Store>>
    where
        F: FnOnce() -> Result<ProvisionedLayout> + Send + 'static,
    {
        let provisioned = tokio::task::spawn_blocking(open).await?.map_err(|e| {
            error!(error = %e, "store unavailable");
            e
        })?;

        let store = Arc::new(Store::new(provisioned));
        self.ready.send_replace(Some(Arc::clone(&store)));
        Ok(store)
    }

    /// The store if provisioning has finished, `NotReady` otherwise
    pub fn try_ready(&self) -> Result<Arc<Store>> {
        self.ready.borrow().clone().ok_or(Error::NotReady)
    }

    /// Wait until provisioning has finished
    pub async fn wait_ready(&self) -> Result<Arc<Store>> {
        let mut rx = self.ready.subscribe();
        let store = rx
            .wait_for(|store| store.is_some())
            .await
            .map_err(|_| Error::NotReady)?
            .clone();
        store.ok_or(Error::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.borrow().is_some()
    }
}

impl Default for StoreGate {
    fn default() -> Self {
        Self::new()
    }
}
