//! In-memory upload queue with its invariants.
//!
//! The store does no I/O on its own; persistence goes through explicit
//! [`QueueStore::save`] / [`QueueStore::load`] calls.

use crate::config::QueueConfig;
use crate::error::AppError;
use crate::models::{EnqueueOptions, FaceProcessingResult, QueueItem, QueueStatus};
use crate::services::completion::ModalCompletionObserver;
use crate::services::queue_storage::QueueStorage;
use photo_cache::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SNAPSHOT_VERSION: u32 = 1;

const MODAL_TIMEOUT_ERROR: &str = "Modal upload timed out";
const MODAL_DUPLICATE_ERROR: &str = "Duplicate modal upload";

/// Persisted form of the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub version: u32,
    pub saved_at: i64,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveStats {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub can_enqueue: bool,
}

pub struct QueueStore {
    items: Vec<QueueItem>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn ModalCompletionObserver>>,
}

impl QueueStore {
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Vec::new(),
            config,
            clock,
            observer: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register the single modal completion observer, replacing any previous one
    pub fn set_completion_observer(&mut self, observer: Arc<dyn ModalCompletionObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_completion_observer(&mut self) {
        self.observer = None;
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Add a captured photo to the queue
    ///
    /// Returns the new item id, the id of an existing duplicate, or `None`
    /// when the queue is full or another modal upload is in flight.
    pub fn enqueue(
        &mut self,
        photo_uri: &str,
        selected_cam: Option<String>,
        options: EnqueueOptions,
    ) -> Option<String> {
        let now = self.now();

        if let Some(existing) = self.items.iter().find(|item| {
            item.photo_uri == photo_uri
                && item.status.is_active()
                && item.age_ms(now) < self.config.duplicate_window_ms
        }) {
            log::debug!("Duplicate enqueue of {}, reusing {}", photo_uri, existing.id);
            return Some(existing.id.clone());
        }

        if options.is_modal_upload {
            if let Some(existing) = self.items.iter().find(|item| {
                item.is_modal_upload
                    && item.photo_uri == photo_uri
                    && item.status != QueueStatus::Failed
                    && item.age_ms(now) < self.config.modal_duplicate_window_ms
            }) {
                log::debug!("Repeated modal enqueue of {}, reusing {}", photo_uri, existing.id);
                return Some(existing.id.clone());
            }

            if let Some(active) = self.reconcile_modal_items() {
                log::warn!(
                    "Rejecting modal upload of {}: {} is still in flight",
                    photo_uri,
                    active.id
                );
                return None;
            }
        }

        let active = self.active_count();
        if active >= self.config.max_active_items {
            log::warn!(
                "Upload queue full ({} active), rejecting {}",
                active,
                photo_uri
            );
            return None;
        }

        let item = QueueItem::new(photo_uri, selected_cam, options, now);
        let id = item.id.clone();
        log::info!(
            "Enqueued {} ({}, modal: {})",
            id,
            photo_uri,
            item.is_modal_upload
        );
        self.items.push(item);
        Some(id)
    }

    /// Move an item to `status`
    ///
    /// `retry_count` grows only on a transition into `failed`. Returns
    /// false for unknown ids.
    pub fn set_status(&mut self, id: &str, status: QueueStatus, error: Option<String>) -> bool {
        let now = self.now();
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            log::debug!("set_status: unknown queue item {}", id);
            return false;
        };

        if status == QueueStatus::Failed && item.status != QueueStatus::Failed {
            item.retry_count += 1;
        }
        item.status = status;
        if error.is_some() {
            item.last_error = error;
        }

        let mut notify = None;
        if status == QueueStatus::Completed {
            item.completed_at = Some(now);
            // Fallback path: the result arrived before the status flip
            if item.is_modal_upload && item.face_processing_result.is_some() {
                notify = Some(item.clone());
            }
        }

        if let Some(item) = notify {
            self.notify_modal_completed(&item);
        }
        true
    }

    /// Store the face processing result; modal items notify right away
    pub fn attach_result(&mut self, id: &str, result: FaceProcessingResult) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            log::debug!("attach_result: unknown queue item {}", id);
            return false;
        };

        item.face_processing_result = Some(result);
        if item.is_modal_upload {
            let item = item.clone();
            self.notify_modal_completed(&item);
        }
        true
    }

    pub fn set_photo_id(&mut self, id: &str, photo_id: &str) -> bool {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.photo_id = Some(photo_id.to_string());
                true
            }
            None => false,
        }
    }

    fn notify_modal_completed(&self, item: &QueueItem) {
        match &self.observer {
            Some(observer) => observer.on_modal_completed(item),
            None => log::debug!("No completion observer for modal item {}", item.id),
        }
    }

    /// Age-based eviction of finished items. Returns how many were removed.
    pub fn sweep_completed(&mut self) -> usize {
        let now = self.now();
        let config = &self.config;
        let before = self.items.len();

        self.items.retain(|item| match item.status {
            QueueStatus::Completed => {
                let age = now - item.completed_at.unwrap_or(item.timestamp);
                let retention = if item.is_modal_upload {
                    config.modal_completed_retention_ms
                } else {
                    config.completed_retention_ms
                };
                age < retention
            }
            QueueStatus::Failed => item.age_ms(now) < config.failed_retention_ms,
            _ => true,
        });

        let removed = before - self.items.len();
        if removed > 0 {
            log::debug!("Swept {} finished queue items", removed);
        }
        removed
    }

    /// Revive failed items that still have attempts left
    pub fn requeue_failed(&mut self) -> usize {
        let max_retries = self.config.max_retries;
        let mut count = 0;
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.status == QueueStatus::Failed && item.retry_count < max_retries)
        {
            item.status = QueueStatus::Pending;
            count += 1;
        }
        if count > 0 {
            log::info!("Requeued {} failed uploads", count);
        }
        count
    }

    /// Manual retry of a single failed item with a fresh attempt budget
    ///
    /// The item is re-stamped so it is neither swept nor treated as stuck.
    /// Refused for a modal item while another modal upload is in flight.
    pub fn retry_item(&mut self, id: &str) -> bool {
        let now = self.now();
        let blocked = self.reconcile_modal_items().is_some();

        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if item.status != QueueStatus::Failed || (item.is_modal_upload && blocked) {
            return false;
        }

        item.status = QueueStatus::Pending;
        item.retry_count = 0;
        item.last_error = None;
        item.face_processing_result = None;
        item.timestamp = now;
        log::info!("Manual retry of {}", id);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<QueueItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Repair modal bookkeeping left inconsistent by app suspension
    ///
    /// Stuck modal items are failed with a timeout, then only the most
    /// recent of the remaining modal items survives. Returns the survivor.
    pub fn reconcile_modal_items(&mut self) -> Option<QueueItem> {
        let now = self.now();
        let timeout = self.config.modal_timeout_ms;

        let stuck: Vec<String> = self
            .blocking_modal_items()
            .filter(|item| item.age_ms(now) > timeout)
            .map(|item| item.id.clone())
            .collect();
        for id in &stuck {
            log::warn!("Modal upload {} stuck for over {} ms, failing it", id, timeout);
            self.fail_modal(id, MODAL_TIMEOUT_ERROR);
        }

        let mut candidates: Vec<(i64, String)> = self
            .blocking_modal_items()
            .map(|item| (item.timestamp, item.id.clone()))
            .collect();
        if candidates.len() > 1 {
            candidates.sort();
            let (_, survivor) = candidates.pop()?;
            for (_, id) in candidates {
                log::warn!("Duplicate modal upload {} demoted in favor of {}", id, survivor);
                self.fail_modal(&id, MODAL_DUPLICATE_ERROR);
            }
        }

        self.active_modal_item().cloned()
    }

    /// Terminal failure of a modal item; the attached result releases the
    /// waiting screen.
    fn fail_modal(&mut self, id: &str, error: &str) {
        self.set_status(id, QueueStatus::Failed, Some(error.to_string()));
        self.attach_result(id, FaceProcessingResult::failed(error));
    }

    /// Reconcile, then return the single active modal item
    pub fn resolve_active_modal_item(&mut self) -> Option<QueueItem> {
        self.reconcile_modal_items()
    }

    fn blocking_modal_items(&self) -> impl Iterator<Item = &QueueItem> {
        self.items
            .iter()
            .filter(|item| item.is_modal_upload && item.status.is_modal_blocking())
    }

    /// Most recent modal item in pending/processing, without repairing anything
    pub fn active_modal_item(&self) -> Option<&QueueItem> {
        self.blocking_modal_items().max_by_key(|item| item.timestamp)
    }

    pub fn latest_completed_modal_item(&self) -> Option<&QueueItem> {
        self.items
            .iter()
            .filter(|item| item.is_modal_upload && item.status == QueueStatus::Completed)
            .max_by_key(|item| item.completed_at.unwrap_or(item.timestamp))
    }

    /// Next item for the processor: a ready modal item first, otherwise
    /// the oldest ready item.
    pub fn next_ready_item(&self) -> Option<QueueItem> {
        let ready = || self.items.iter().filter(|item| item.status.is_ready());
        ready()
            .filter(|item| item.is_modal_upload)
            .min_by_key(|item| item.timestamp)
            .or_else(|| ready().min_by_key(|item| item.timestamp))
            .cloned()
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_active())
            .count()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for item in &self.items {
            match item.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Retrying => counts.retrying += 1,
                QueueStatus::Completed => counts.completed += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn active_stats(&self) -> ActiveStats {
        let counts = self.status_counts();
        let active = counts.pending + counts.processing + counts.retrying;
        ActiveStats {
            active,
            completed: counts.completed,
            failed: counts.failed,
            total: self.items.len(),
            can_enqueue: active < self.config.max_active_items,
        }
    }

    pub fn to_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.now(),
            items: self.items.clone(),
        }
    }

    /// Rebuild from a snapshot; items caught `processing` become `pending`
    /// since their in-flight call did not survive the process.
    pub fn from_snapshot(
        snapshot: QueueSnapshot,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if snapshot.version != SNAPSHOT_VERSION {
            log::warn!(
                "Queue snapshot version {} (expected {}), loading anyway",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        let mut items = snapshot.items;
        for item in items
            .iter_mut()
            .filter(|item| item.status == QueueStatus::Processing)
        {
            log::info!("Rehydrating interrupted upload {} as pending", item.id);
            item.status = QueueStatus::Pending;
        }

        Self {
            items,
            config,
            clock,
            observer: None,
        }
    }

    pub fn save(&self, storage: &dyn QueueStorage) -> Result<(), AppError> {
        let json = serde_json::to_string(&self.to_snapshot())?;
        storage.save(&json)
    }

    pub fn load(
        storage: &dyn QueueStorage,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        match storage.load()? {
            Some(json) => {
                let snapshot: QueueSnapshot = serde_json::from_str(&json)?;
                log::info!("Loaded upload queue with {} items", snapshot.items.len());
                Ok(Self::from_snapshot(snapshot, config, clock))
            }
            None => Ok(Self::new(config, clock)),
        }
    }
}
