/// Keeps `config.json` in step with the in-memory [`ConfigState`].
///
/// The synchronizer subscribes to the state and rewrites the whole file on
/// every change. Writes are serialized behind one async lock, and each write
/// is stamped with the generation it came from: a notification that arrives
/// after a newer one has already been written is skipped, so the file always
/// converges on the latest mutation no matter how the tasks were scheduled.
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConfigData;
use crate::error::StoreError;
use crate::state::{ConfigSnapshot, ConfigState, ConfigSubscriber, Scheduler, SubscriptionId};
use crate::store::DurableStore;

struct WriterState {
    /// `None` once the synchronizer has shut down.
    store: Option<DurableStore>,
    /// Generation currently on disk.
    persisted: u64,
}

struct StoreWriter {
    inner: Mutex<WriterState>,
}

impl StoreWriter {
    /// Writes `snapshot` unless something at least as new is already on disk.
    /// Returns whether the file was rewritten.
    async fn persist(&self, snapshot: &ConfigSnapshot) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if snapshot.generation <= inner.persisted {
            debug!(
                generation = snapshot.generation,
                persisted = inner.persisted,
                "Skipping stale config write"
            );
            return Ok(false);
        }
        let Some(store) = inner.store.as_mut() else {
            return Ok(false);
        };
        store.write(&snapshot.data).await?;
        debug!(generation = snapshot.generation, path = %store.path().display(), "Config persisted");
        inner.persisted = snapshot.generation;
        Ok(true)
    }
}

#[async_trait]
impl ConfigSubscriber for StoreWriter {
    async fn on_config_changed(&self, snapshot: ConfigSnapshot) -> anyhow::Result<()> {
        self.persist(&snapshot)
            .await
            .with_context(|| format!("Failed to persist config generation {}", snapshot.generation))?;
        Ok(())
    }
}

/// Owns the config file handle for the lifetime of the daemon.
///
/// Call [`ConfigSynchronizer::shutdown`] for an orderly close. Dropping the
/// synchronizer still unsubscribes it; the file handle is released once the
/// last in-flight write finishes.
pub struct ConfigSynchronizer {
    state: Arc<ConfigState>,
    writer: Arc<StoreWriter>,
    subscription: Option<SubscriptionId>,
}

impl ConfigSynchronizer {
    /// Loads (or creates) the config file at `path`, seeds a fresh
    /// [`ConfigState`] from it and starts mirroring changes back to disk.
    pub async fn init(path: &Path, scheduler: Arc<dyn Scheduler>) -> Result<Self, StoreError> {
        let (store, data) = DurableStore::open(path, &ConfigData::default()).await?;
        let state = Arc::new(ConfigState::new(data, scheduler));
        Self::attach(store, state).await
    }

    /// Starts mirroring `state` into `store`.
    ///
    /// Generation 0 is taken to be what the store already holds. Anything newer,
    /// including a change racing this call, is written before it returns.
    pub async fn attach(store: DurableStore, state: Arc<ConfigState>) -> Result<Self, StoreError> {
        let writer = Arc::new(StoreWriter {
            inner: Mutex::new(WriterState {
                store: Some(store),
                persisted: 0,
            }),
        });
        let subscription = state.subscribe(writer.clone());
        let synchronizer = Self {
            state,
            writer,
            subscription: Some(subscription),
        };
        synchronizer.sync_now().await?;
        Ok(synchronizer)
    }

    pub fn state(&self) -> &Arc<ConfigState> {
        &self.state
    }

    /// Writes the current state now if the file is behind it.
    pub async fn sync_now(&self) -> Result<bool, StoreError> {
        self.writer.persist(&self.state.snapshot()).await
    }

    /// Unsubscribes, writes the latest state one last time and closes the file.
    pub async fn shutdown(mut self) -> Result<(), StoreError> {
        if let Some(id) = self.subscription.take() {
            self.state.unsubscribe(id);
        }
        let result = self.sync_now().await.map(|_| ());
        let closed = self.writer.inner.lock().await.store.take();
        if let Some(store) = closed {
            info!(path = %store.path().display(), "Config file closed");
        }
        result
    }
}

impl Drop for ConfigSynchronizer {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.state.unsubscribe(id);
        }
    }
}
