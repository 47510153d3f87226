/// In-memory configuration state and its change notifier.
///
/// `ConfigState` is the single source of truth while the daemon runs. Every
/// successful mutator bumps a generation counter and schedules one
/// notification per subscriber on the injected [`Scheduler`]; mutators never
/// wait for subscribers to finish.
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::config::{ConfigData, MonitorTarget, NotificationTarget};
use crate::error::NotFoundError;

/// Runs fire-and-forget work on behalf of the change notifier.
pub trait Scheduler: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns notification tasks onto a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on. Panics outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }
}

/// An immutable view of the configuration at one point in time.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Incremented by every successful mutation; higher is newer.
    pub generation: u64,
    pub data: Arc<ConfigData>,
}

/// Receives a snapshot after every configuration change.
#[async_trait]
pub trait ConfigSubscriber: Send + Sync {
    async fn on_config_changed(&self, snapshot: ConfigSnapshot) -> anyhow::Result<()>;
}

/// Handle returned by [`ConfigState::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct ChangeNotifier {
    scheduler: Arc<dyn Scheduler>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<dyn ConfigSubscriber>)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, subscriber: Arc<dyn ConfigSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Schedules one independent task per subscriber, in subscription order.
    fn notify(&self, snapshot: ConfigSnapshot) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!(
            generation = snapshot.generation,
            subscribers = subscribers.len(),
            "Config changed"
        );

        for (id, subscriber) in subscribers {
            let snapshot = snapshot.clone();
            self.scheduler.spawn(
                async move {
                    let generation = snapshot.generation;
                    let outcome = AssertUnwindSafe(subscriber.on_config_changed(snapshot))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(
                            subscription = id.0,
                            generation,
                            "Config subscriber failed: {e:#}"
                        ),
                        Err(_) => error!(
                            subscription = id.0,
                            generation,
                            "Config subscriber panicked"
                        ),
                    }
                }
                .boxed(),
            );
        }
    }
}

struct Versioned {
    generation: u64,
    data: Arc<ConfigData>,
}

impl Versioned {
    fn commit(&mut self) -> ConfigSnapshot {
        self.generation += 1;
        ConfigSnapshot {
            generation: self.generation,
            data: Arc::clone(&self.data),
        }
    }
}

/// Mutable configuration plus its subscriber list.
///
/// Construct once at startup and share it behind an `Arc`.
pub struct ConfigState {
    inner: RwLock<Versioned>,
    notifier: ChangeNotifier,
}

impl ConfigState {
    pub fn new(initial: ConfigData, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: RwLock::new(Versioned {
                generation: 0,
                data: Arc::new(initial),
            }),
            notifier: ChangeNotifier::new(scheduler),
        }
    }

    /// Returns a consistent copy of the current configuration.
    pub fn get(&self) -> ConfigData {
        (*self.snapshot().data).clone()
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        ConfigSnapshot {
            generation: inner.generation,
            data: Arc::clone(&inner.data),
        }
    }

    pub fn notification_target(&self) -> NotificationTarget {
        self.snapshot().data.notification_target.clone()
    }

    pub fn monitor_targets(&self) -> Vec<MonitorTarget> {
        self.snapshot().data.monitor_targets.clone()
    }

    pub fn set_notification_target(&self, value: NotificationTarget) {
        self.update(|data| data.notification_target = value);
    }

    pub fn set_monitor_targets(&self, value: Vec<MonitorTarget>) {
        self.update(|data| data.monitor_targets = value);
    }

    pub fn add_monitor_target(&self, entry: MonitorTarget) {
        self.update(|data| data.monitor_targets.push(entry));
    }

    /// Removes the first entry equal to `entry`.
    pub fn remove_monitor_target(&self, entry: &MonitorTarget) -> Result<(), NotFoundError> {
        self.try_update(|data| {
            let index = position_of(&data.monitor_targets, entry)?;
            data.monitor_targets.remove(index);
            Ok(())
        })
    }

    /// Replaces the first entry equal to `old` with `new`, keeping its position.
    pub fn replace_monitor_target(
        &self,
        old: &MonitorTarget,
        new: MonitorTarget,
    ) -> Result<(), NotFoundError> {
        self.try_update(|data| {
            let index = position_of(&data.monitor_targets, old)?;
            data.monitor_targets[index] = new;
            Ok(())
        })
    }

    pub fn clear_monitor_targets(&self) {
        self.update(|data| data.monitor_targets.clear());
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ConfigSubscriber>) -> SubscriptionId {
        self.notifier.subscribe(subscriber)
    }

    /// Removes a subscriber. Unknown ids are ignored; returns whether one was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.len()
    }

    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut ConfigData),
    {
        let snapshot = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            change(Arc::make_mut(&mut inner.data));
            inner.commit()
        };
        self.notifier.notify(snapshot);
    }

    /// Like `update`, but a failing `change` leaves the state untouched and
    /// notifies nobody. `change` must not modify `data` before it knows it
    /// will succeed.
    fn try_update<F>(&self, change: F) -> Result<(), NotFoundError>
    where
        F: FnOnce(&mut ConfigData) -> Result<(), NotFoundError>,
    {
        let snapshot = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            change(Arc::make_mut(&mut inner.data))?;
            inner.commit()
        };
        self.notifier.notify(snapshot);
        Ok(())
    }
}

fn position_of(entries: &[MonitorTarget], wanted: &MonitorTarget) -> Result<usize, NotFoundError> {
    entries
        .iter()
        .position(|e| e == wanted)
        .ok_or_else(|| NotFoundError {
            target: wanted.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Queues scheduled tasks until the test decides to run them.
    #[derive(Default)]
    pub(crate) struct ManualScheduler {
        tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
    }

    impl ManualScheduler {
        pub(crate) fn pending(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }

        fn take(&self) -> Vec<BoxFuture<'static, ()>> {
            std::mem::take(&mut *self.tasks.lock().unwrap())
        }

        /// Runs queued tasks one after another in scheduling order.
        pub(crate) async fn run_all(&self) {
            for task in self.take() {
                task.await;
            }
        }

        /// Runs queued tasks newest first, simulating an unlucky executor.
        pub(crate) async fn run_all_reversed(&self) {
            for task in self.take().into_iter().rev() {
                task.await;
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn spawn(&self, task: BoxFuture<'static, ()>) {
            self.tasks.lock().unwrap().push(task);
        }
    }
}
