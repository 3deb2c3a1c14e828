//! Modal upload completion signaling.
//!
//! The store notifies a single registered observer whenever a modal item
//! gets its result. That can happen twice for the same item (result
//! attached, then status flipped to completed), so consumers must
//! deduplicate by item id. [`ModalCompletionSignal`] does that and exposes
//! the latest completion through a `watch` channel.

use crate::models::QueueItem;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;

/// Remembered ids for deduplication
const SEEN_CAPACITY: usize = 64;

/// Receives modal completions from the queue store
///
/// Called while the store is being mutated; implementations must not call
/// back into the queue.
pub trait ModalCompletionObserver: Send + Sync {
    fn on_modal_completed(&self, item: &QueueItem);
}

pub struct ModalCompletionSignal {
    tx: watch::Sender<Option<QueueItem>>,
    seen: Mutex<VecDeque<String>>,
}

impl ModalCompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            seen: Mutex::new(VecDeque::with_capacity(SEEN_CAPACITY)),
        }
    }

    /// Receiver yielding the most recent (deduplicated) modal completion
    pub fn subscribe(&self) -> watch::Receiver<Option<QueueItem>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<QueueItem> {
        self.tx.borrow().clone()
    }

    /// Waits until the item with `item_id` has been reported
    pub async fn wait_for(&self, item_id: &str) -> Option<QueueItem> {
        let mut rx = self.tx.subscribe();
        let item = rx
            .wait_for(|latest| latest.as_ref().is_some_and(|item| item.id == item_id))
            .await
            .ok()?;
        item.clone()
    }

    /// Returns true the first time an id is seen
    fn mark_seen(&self, item_id: &str) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.iter().any(|id| id == item_id) {
            return false;
        }
        if seen.len() >= SEEN_CAPACITY {
            seen.pop_front();
        }
        seen.push_back(item_id.to_string());
        true
    }
}

impl Default for ModalCompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ModalCompletionObserver for ModalCompletionSignal {
    fn on_modal_completed(&self, item: &QueueItem) {
        if !self.mark_seen(&item.id) {
            log::debug!("Modal completion for {} already delivered", item.id);
            return;
        }
        log::info!("Modal upload {} finished ({})", item.id, item.status);
        self.tx.send_replace(Some(item.clone()));
    }
}
