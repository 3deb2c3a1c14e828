//! Sequential upload worker.
//!
//! Picks one ready item at a time (modal items first), uploads it, shares
//! matched faces and records the outcome in the queue. Only one item is
//! ever in flight; a stop/start cycle waits for the previous item to
//! finish before the next one is taken.

use crate::config::ProcessorConfig;
use crate::error::AppError;
use crate::models::{FaceProcessingResult, QueueItem, QueueStatus, ShareContext, UploadedPhoto};
use crate::services::collaborators::{FriendSharer, PhotoUploader};
use crate::services::queue_store::QueueStore;
use crate::services::shared_queue::SharedQueue;
use photo_cache::PhotoCacheDb;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Default)]
struct LoopState {
    running: bool,
    /// Bumped on every start/stop so a superseded loop notices and exits
    generation: u64,
}

pub struct QueueProcessor<U, S> {
    queue: Arc<SharedQueue>,
    uploader: Arc<U>,
    sharer: Arc<S>,
    cache: Option<Arc<PhotoCacheDb>>,
    config: ProcessorConfig,
    state: Mutex<LoopState>,
    /// Held while an item is being processed
    worker: AsyncMutex<()>,
}

impl<U: PhotoUploader, S: FriendSharer> QueueProcessor<U, S> {
    pub fn new(
        queue: Arc<SharedQueue>,
        uploader: Arc<U>,
        sharer: Arc<S>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            uploader,
            sharer,
            cache: None,
            config,
            state: Mutex::new(LoopState::default()),
            worker: AsyncMutex::new(()),
        }
    }

    /// Write an optimistic cache row for every successful upload
    pub fn with_photo_cache(mut self, cache: Arc<PhotoCacheDb>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the worker loop on the current tokio runtime
    ///
    /// Returns false if it was already running or no runtime is available.
    pub fn start(self: &Arc<Self>) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Cannot start upload processor without a runtime: {}", e);
                return false;
            }
        };

        let generation = {
            let mut state = self.state();
            if state.running {
                log::debug!("Upload processor already running");
                return false;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };

        let processor = Arc::clone(self);
        handle.spawn(async move {
            processor.run_loop(generation).await;
        });
        true
    }

    /// Ends the loop after the item currently in flight
    pub fn stop(&self) {
        let mut state = self.state();
        if state.running {
            log::info!("Stopping upload processor");
        }
        state.running = false;
        state.generation += 1;
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state();
        state.running && state.generation == generation
    }

    async fn run_loop(&self, generation: u64) {
        log::info!("Upload processor started");

        while self.is_current(generation) {
            let guard = self.worker.lock().await;
            if !self.is_current(generation) {
                break;
            }

            let Some(item) = self.queue.read(|store| store.next_ready_item()) else {
                drop(guard);
                if self.go_idle(generation) {
                    break;
                }
                continue;
            };

            self.process_item(&item).await;
            drop(guard);

            tokio::time::sleep(self.config.next_item_delay(item.is_modal_upload)).await;
        }

        log::info!("Upload processor stopped");
    }

    /// Marks the processor idle unless work arrived in the meantime.
    /// Returns whether the loop should exit.
    fn go_idle(&self, generation: u64) -> bool {
        let mut state = self.state();
        if !state.running || state.generation != generation {
            return true;
        }
        // Checked under the state lock so a concurrent start() cannot miss it
        if self.queue.read(|store| store.next_ready_item().is_some()) {
            return false;
        }
        log::debug!("Upload queue empty, processor going idle");
        state.running = false;
        true
    }

    /// Process ready items inline until none is left; returns how many
    /// attempts were made. Does not touch the running flag.
    pub async fn drain(&self) -> usize {
        let mut attempts = 0;
        loop {
            let guard = self.worker.lock().await;
            let Some(item) = self.queue.read(|store| store.next_ready_item()) else {
                break;
            };
            self.process_item(&item).await;
            attempts += 1;
            drop(guard);

            tokio::time::sleep(self.config.next_item_delay(item.is_modal_upload)).await;
        }
        attempts
    }

    async fn process_item(&self, item: &QueueItem) {
        self.queue
            .update(|store| store.set_status(&item.id, QueueStatus::Processing, None));
        log::info!(
            "Uploading {} (attempt {}, modal: {})",
            item.id,
            item.retry_count + 1,
            item.is_modal_upload
        );

        match self
            .uploader
            .upload_photo(&item.photo_uri, item.selected_cam.as_deref())
            .await
        {
            Ok(uploaded) => self.handle_success(item, uploaded).await,
            Err(e) => self.handle_failure(item, e),
        }
    }

    async fn handle_success(&self, item: &QueueItem, uploaded: UploadedPhoto) {
        let result = uploaded
            .face_processing_result
            .clone()
            .unwrap_or_default()
            .normalized();
        log::info!(
            "Uploaded {} as photo {} ({} faces, {} friends)",
            item.id,
            uploaded.photo_id,
            result.faces_detected,
            result.friends_matched
        );

        if !self.still_processing(&item.id) {
            log::warn!(
                "Upload of {} finished after the item was resolved, keeping its state",
                item.id
            );
            return;
        }
        self.queue
            .update(|store| store.set_photo_id(&item.id, &uploaded.photo_id));

        if result.has_matches() {
            self.share_matches(item, &uploaded, &result).await;
        }

        if let Some(cache) = &self.cache {
            cache.save_local_photo(
                &uploaded.photo_id,
                &item.photo_uri,
                item.selected_cam.as_deref(),
                Some(&uploaded.owner_identity_id),
                Some(&uploaded.s3_key),
            );
        }

        let attached = self.queue.update(|store| {
            is_processing(store, &item.id) && store.attach_result(&item.id, result)
        });
        if !attached {
            return;
        }

        if item.is_modal_upload {
            // Lets the UI render the result before the item counts as done
            tokio::time::sleep(self.config.modal_settle()).await;
        }

        self.queue.update(|store| {
            if is_processing(store, &item.id) {
                store.set_status(&item.id, QueueStatus::Completed, None);
            }
        });
    }

    /// False once reconciliation or a clear resolved the item mid-upload
    fn still_processing(&self, id: &str) -> bool {
        self.queue.read(|store| is_processing(store, id))
    }

    async fn share_matches(
        &self,
        item: &QueueItem,
        uploaded: &UploadedPhoto,
        result: &FaceProcessingResult,
    ) {
        let context = match &item.selected_cam {
            Some(camera_id) => ShareContext::shared_camera(camera_id.clone()),
            None if item.should_auto_share => ShareContext::personal(),
            None => {
                log::debug!("Auto-share disabled, not sharing photo {}", uploaded.photo_id);
                return;
            }
        };

        let friend_ids = result.matched_friend_ids();
        match self
            .sharer
            .share_to_friends(&uploaded.photo_id, &friend_ids, &result.matches, &context)
            .await
        {
            Ok(()) => log::info!(
                "Shared photo {} with {} friends",
                uploaded.photo_id,
                friend_ids.len()
            ),
            Err(e) => log::warn!("Sharing photo {} failed: {}", uploaded.photo_id, e),
        }
    }

    fn handle_failure(&self, item: &QueueItem, error: AppError) {
        let message = error.to_string();

        self.queue.update(|store| {
            if !is_processing(store, &item.id) {
                log::warn!("Upload of {} failed after the item was resolved: {}", item.id, message);
                return;
            }
            store.set_status(&item.id, QueueStatus::Failed, Some(message.clone()));
            let max_retries = store.config().max_retries;
            let retry_count = store
                .get(&item.id)
                .map(|item| item.retry_count)
                .unwrap_or(max_retries);

            if retry_count < max_retries {
                log::warn!(
                    "Upload of {} failed ({}/{}), will retry: {}",
                    item.id,
                    retry_count,
                    max_retries,
                    message
                );
                store.set_status(&item.id, QueueStatus::Retrying, None);
            } else {
                log::error!(
                    "Upload of {} failed after {} attempts: {}",
                    item.id,
                    retry_count,
                    message
                );
                if item.is_modal_upload {
                    store.attach_result(&item.id, FaceProcessingResult::failed(message.clone()));
                }
            }
        });
    }
}

fn is_processing(store: &QueueStore, id: &str) -> bool {
    store
        .get(id)
        .is_some_and(|item| item.status == QueueStatus::Processing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::models::{EnqueueOptions, FaceMatch};
    use crate::services::completion::ModalCompletionSignal;
    use photo_cache::ManualClock;
    use std::time::Duration;

    struct MockUploader {
        result: Option<FaceProcessingResult>,
        fail: bool,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl MockUploader {
        fn succeeding(result: FaceProcessingResult) -> Self {
            Self {
                result: Some(result),
                fail: false,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                result: None,
                fail: true,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PhotoUploader for MockUploader {
        async fn upload_photo(
            &self,
            photo_uri: &str,
            _selected_cam: Option<&str>,
        ) -> Result<UploadedPhoto, AppError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(photo_uri.to_string());
                calls.len()
            };
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(AppError::Upload("connection reset".to_string()));
            }
            Ok(UploadedPhoto {
                photo_id: format!("photo-{}", n),
                owner_identity_id: "identity-1".to_string(),
                s3_key: format!("photos/{}.jpg", n),
                thumb_key: None,
                face_processing_result: self.result.clone(),
            })
        }
    }

    #[derive(Default)]
    struct MockSharer {
        fail: bool,
        calls: Mutex<Vec<(String, Vec<String>, ShareContext)>>,
    }

    impl MockSharer {
        fn calls(&self) -> Vec<(String, Vec<String>, ShareContext)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FriendSharer for MockSharer {
        async fn share_to_friends(
            &self,
            photo_id: &str,
            friend_ids: &[String],
            _matches: &[FaceMatch],
            context: &ShareContext,
        ) -> Result<(), AppError> {
            self.calls.lock().unwrap().push((
                photo_id.to_string(),
                friend_ids.to_vec(),
                context.clone(),
            ));
            if self.fail {
                Err(AppError::Share("backend unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn one_friend() -> FaceProcessingResult {
        FaceProcessingResult {
            faces_detected: 2,
            matches: vec![FaceMatch::new("u1", 0.93)],
            ..Default::default()
        }
    }

    fn queue() -> Arc<SharedQueue> {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        Arc::new(SharedQueue::in_memory(QueueConfig::default(), clock))
    }

    fn processor(
        queue: &Arc<SharedQueue>,
        uploader: MockUploader,
        sharer: MockSharer,
    ) -> Arc<QueueProcessor<MockUploader, MockSharer>> {
        Arc::new(QueueProcessor::new(
            queue.clone(),
            Arc::new(uploader),
            Arc::new(sharer),
            ProcessorConfig::default(),
        ))
    }

    fn enqueue(queue: &SharedQueue, uri: &str, cam: Option<&str>, options: EnqueueOptions) -> String {
        queue
            .update(|store| store.enqueue(uri, cam.map(str::to_string), options))
            .unwrap()
    }

    fn status(queue: &SharedQueue, id: &str) -> QueueStatus {
        queue.read(|store| store.get(id).unwrap().status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_modal_upload_completes_with_result() {
        let queue = queue();
        let signal = Arc::new(ModalCompletionSignal::new());
        queue.set_completion_observer(signal.clone());
        let processor = processor(&queue, MockUploader::succeeding(one_friend()), MockSharer::default());

        let id = enqueue(
            &queue,
            "file:///modal.jpg",
            None,
            EnqueueOptions {
                is_modal_upload: true,
                should_auto_share: true,
            },
        );
        assert_eq!(processor.drain().await, 1);

        let item = queue.read(|store| store.get(&id).cloned()).unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
        assert_eq!(item.photo_id.as_deref(), Some("photo-1"));
        let result = item.face_processing_result.unwrap();
        assert_eq!(result.faces_detected, 2);
        assert_eq!(result.friends_matched, 1);

        let delivered = signal.latest().unwrap();
        assert_eq!(delivered.id, id);
        assert_eq!(
            delivered.face_processing_result.unwrap().friends_matched,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_camera_shares_regardless_of_auto_share() {
        let queue = queue();
        let processor = processor(&queue, MockUploader::succeeding(one_friend()), MockSharer::default());

        let id = enqueue(&queue, "file:///cam.jpg", Some("cam1"), EnqueueOptions::default());
        processor.drain().await;

        assert_eq!(status(&queue, &id), QueueStatus::Completed);
        let calls = processor.sharer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "photo-1");
        assert_eq!(calls[0].1, vec!["u1".to_string()]);
        assert_eq!(calls[0].2.shared_camera_id.as_deref(), Some("cam1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_personal_share_follows_auto_share_flag() {
        let queue = queue();
        let processor = processor(&queue, MockUploader::succeeding(one_friend()), MockSharer::default());

        enqueue(&queue, "file:///off.jpg", None, EnqueueOptions::default());
        processor.drain().await;
        assert!(processor.sharer.calls().is_empty());

        enqueue(
            &queue,
            "file:///on.jpg",
            None,
            EnqueueOptions {
                is_modal_upload: false,
                should_auto_share: true,
            },
        );
        processor.drain().await;
        let calls = processor.sharer.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].2.is_shared_camera());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_share_without_matches() {
        let queue = queue();
        let processor = processor(
            &queue,
            MockUploader::succeeding(FaceProcessingResult::default()),
            MockSharer::default(),
        );
        let id = enqueue(&queue, "file:///cam.jpg", Some("cam1"), EnqueueOptions::default());
        processor.drain().await;

        assert_eq!(status(&queue, &id), QueueStatus::Completed);
        assert!(processor.sharer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_failure_does_not_fail_item() {
        let queue = queue();
        let sharer = MockSharer {
            fail: true,
            ..Default::default()
        };
        let processor = processor(&queue, MockUploader::succeeding(one_friend()), sharer);

        let id = enqueue(&queue, "file:///cam.jpg", Some("cam1"), EnqueueOptions::default());
        processor.drain().await;
        assert_eq!(status(&queue, &id), QueueStatus::Completed);
        assert_eq!(processor.sharer.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_upload_is_attempted_three_times() {
        let queue = queue();
        let processor = processor(&queue, MockUploader::failing(), MockSharer::default());

        let id = enqueue(&queue, "file:///a.jpg", None, EnqueueOptions::default());
        assert_eq!(processor.drain().await, 3);

        let item = queue.read(|store| store.get(&id).cloned()).unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 3);
        assert!(item.last_error.unwrap().contains("connection reset"));
        assert_eq!(processor.uploader.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_modal_failure_notifies_with_failed_result() {
        let queue = queue();
        let signal = Arc::new(ModalCompletionSignal::new());
        queue.set_completion_observer(signal.clone());
        let processor = processor(&queue, MockUploader::failing(), MockSharer::default());

        let id = enqueue(
            &queue,
            "file:///modal.jpg",
            None,
            EnqueueOptions {
                is_modal_upload: true,
                should_auto_share: false,
            },
        );
        processor.drain().await;

        let delivered = signal.latest().unwrap();
        assert_eq!(delivered.id, id);
        assert_eq!(delivered.status, QueueStatus::Failed);
        assert!(delivered.face_processing_result.unwrap().processing_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_modal_items_jump_the_queue() {
        let queue = queue();
        let processor = processor(
            &queue,
            MockUploader::succeeding(FaceProcessingResult::default()),
            MockSharer::default(),
        );

        enqueue(&queue, "file:///bg1.jpg", None, EnqueueOptions::default());
        enqueue(&queue, "file:///bg2.jpg", None, EnqueueOptions::default());
        enqueue(
            &queue,
            "file:///modal.jpg",
            None,
            EnqueueOptions {
                is_modal_upload: true,
                should_auto_share: false,
            },
        );
        processor.drain().await;

        assert_eq!(
            processor.uploader.calls(),
            vec![
                "file:///modal.jpg".to_string(),
                "file:///bg1.jpg".to_string(),
                "file:///bg2.jpg".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_upload_writes_cache_row() {
        let queue = queue();
        let cache = Arc::new(PhotoCacheDb::in_memory(Arc::new(ManualClock::new(0))));
        let processor = Arc::new(
            QueueProcessor::new(
                queue.clone(),
                Arc::new(MockUploader::succeeding(FaceProcessingResult::default())),
                Arc::new(MockSharer::default()),
                ProcessorConfig::default(),
            )
            .with_photo_cache(cache.clone()),
        );

        enqueue(&queue, "file:///a.jpg", Some("cam1"), EnqueueOptions::default());
        processor.drain().await;

        let row = cache.get_photo("photo-1").unwrap();
        assert_eq!(row.local_uri.as_deref(), Some("file:///a.jpg"));
        assert_eq!(row.camera_id.as_deref(), Some("cam1"));
        assert_eq!(row.s3_key.as_deref(), Some("photos/1.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_processor_goes_idle_when_empty() {
        let queue = queue();
        let processor = processor(
            &queue,
            MockUploader::succeeding(FaceProcessingResult::default()),
            MockSharer::default(),
        );
        let id = enqueue(&queue, "file:///a.jpg", None, EnqueueOptions::default());

        assert!(processor.start());
        assert!(!processor.start());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(status(&queue, &id), QueueStatus::Completed);
        assert!(!processor.is_running());

        // restartable after going idle
        let second = enqueue(&queue, "file:///b.jpg", None, EnqueueOptions::default());
        assert!(processor.start());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(status(&queue, &second), QueueStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_remaining_items_pending() {
        let queue = queue();
        let processor = processor(
            &queue,
            MockUploader::succeeding(FaceProcessingResult::default()),
            MockSharer::default(),
        );
        let first = enqueue(&queue, "file:///a.jpg", None, EnqueueOptions::default());
        let second = enqueue(&queue, "file:///b.jpg", None, EnqueueOptions::default());

        processor.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        processor.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(status(&queue, &first), QueueStatus::Completed);
        assert_eq!(status(&queue, &second), QueueStatus::Pending);
        assert!(!processor.is_running());
    }

    fn stuck_modal_setup(
        uploader: MockUploader,
    ) -> (
        Arc<ManualClock>,
        Arc<SharedQueue>,
        Arc<QueueProcessor<MockUploader, MockSharer>>,
        String,
    ) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = Arc::new(SharedQueue::in_memory(QueueConfig::default(), clock.clone()));
        let processor = processor(&queue, uploader.with_delay(Duration::from_secs(600)), MockSharer::default());
        let id = enqueue(
            &queue,
            "file:///modal.jpg",
            None,
            EnqueueOptions {
                is_modal_upload: true,
                should_auto_share: false,
            },
        );
        (clock, queue, processor, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_keeps_timed_out_modal_failed() {
        let (clock, queue, processor, id) =
            stuck_modal_setup(MockUploader::succeeding(one_friend()));
        let signal = Arc::new(ModalCompletionSignal::new());
        queue.set_completion_observer(signal.clone());

        processor.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.advance(Duration::from_secs(121));
        queue.update(|store| store.reconcile_modal_items());
        let timed_out = signal.latest().unwrap();

        tokio::time::sleep(Duration::from_secs(700)).await;

        let item = queue.read(|store| store.get(&id).cloned()).unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert!(item.photo_id.is_none());
        assert!(item.face_processing_result.unwrap().processing_failed);
        assert_eq!(signal.latest().unwrap(), timed_out);
        assert!(processor.sharer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_retry_timed_out_modal() {
        let (clock, queue, processor, id) = stuck_modal_setup(MockUploader::failing());

        processor.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.advance(Duration::from_secs(121));
        queue.update(|store| store.reconcile_modal_items());

        tokio::time::sleep(Duration::from_secs(700)).await;

        let item = queue.read(|store| store.get(&id).cloned()).unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("Modal upload timed out"));
        assert_eq!(processor.uploader.calls().len(), 1);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let queue = queue();
        let processor = processor(
            &queue,
            MockUploader::succeeding(FaceProcessingResult::default()),
            MockSharer::default(),
        );
        assert!(!processor.start());
        assert!(!processor.is_running());
    }
}
