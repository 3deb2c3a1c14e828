//! Thread-safe handle around [`QueueStore`] that persists after every change.

use crate::config::QueueConfig;
use crate::services::completion::ModalCompletionObserver;
use crate::services::queue_storage::QueueStorage;
use crate::services::queue_store::QueueStore;
use photo_cache::Clock;
use std::sync::{Arc, Mutex, MutexGuard};

/// Queue shared between the UI side, the processor and maintenance
///
/// The lock is only ever held for synchronous store operations, never
/// across an `.await`.
pub struct SharedQueue {
    store: Mutex<QueueStore>,
    storage: Option<Arc<dyn QueueStorage>>,
}

impl SharedQueue {
    pub fn new(store: QueueStore, storage: Option<Arc<dyn QueueStorage>>) -> Self {
        Self {
            store: Mutex::new(store),
            storage,
        }
    }

    pub fn in_memory(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(QueueStore::new(config, clock), None)
    }

    /// Restore the persisted queue; an unreadable snapshot starts an empty queue
    pub fn load(storage: Arc<dyn QueueStorage>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let store = match QueueStore::load(storage.as_ref(), config.clone(), clock.clone()) {
            Ok(store) => store,
            Err(e) => {
                log::error!("Failed to load upload queue, starting empty: {}", e);
                QueueStore::new(config, clock)
            }
        };
        Self::new(store, Some(storage))
    }

    fn lock(&self) -> MutexGuard<'_, QueueStore> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Upload queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Run a read-only view of the store
    pub fn read<T>(&self, f: impl FnOnce(&QueueStore) -> T) -> T {
        let store = self.lock();
        f(&store)
    }

    /// Mutate the store and persist the result
    pub fn update<T>(&self, f: impl FnOnce(&mut QueueStore) -> T) -> T {
        let mut store = self.lock();
        let result = f(&mut store);
        self.persist_locked(&store);
        result
    }

    pub fn persist(&self) {
        let store = self.lock();
        self.persist_locked(&store);
    }

    fn persist_locked(&self, store: &QueueStore) {
        if let Some(storage) = &self.storage {
            if let Err(e) = store.save(storage.as_ref()) {
                log::error!("Failed to persist upload queue: {}", e);
            }
        }
    }

    pub fn set_completion_observer(&self, observer: Arc<dyn ModalCompletionObserver>) {
        self.lock().set_completion_observer(observer);
    }

    /// Drop all items and the persisted snapshot
    pub fn clear(&self) {
        let mut store = self.lock();
        store.clear();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.clear() {
                log::error!("Failed to clear persisted upload queue: {}", e);
            }
        }
    }
}
