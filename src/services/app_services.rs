//! Wires queue, processor, URL cache and refresh loop into one app-wide
//! service and drives them from session and lifecycle events.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{EnqueueOptions, QueueItem};
use crate::services::collaborators::{FriendSharer, PhotoUploader, UrlSigner};
use crate::services::completion::ModalCompletionSignal;
use crate::services::queue_processor::QueueProcessor;
use crate::services::queue_storage::{FileQueueStorage, QueueStorage};
use crate::services::queue_store::ActiveStats;
use crate::services::shared_queue::SharedQueue;
use crate::services::url_refresh::UrlRefresher;
use photo_cache::{Clock, PhotoCacheDb, SystemClock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

/// Foreground state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Active,
    Background,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub swept: usize,
    /// Modal item still blocking the UI after reconciliation
    pub active_modal_id: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    current_user: Option<String>,
    /// Survives `end_session` so the next login can detect a user switch
    last_user: Option<String>,
}

pub struct AppServices<U, S, G> {
    config: AppConfig,
    queue: Arc<SharedQueue>,
    processor: Arc<QueueProcessor<U, S>>,
    refresher: Arc<UrlRefresher<G>>,
    cache: Arc<PhotoCacheDb>,
    completion: Arc<ModalCompletionSignal>,
    auto_share: AtomicBool,
    session: Mutex<SessionState>,
    backgrounded: AtomicBool,
    /// Invalidates pending background grace timers
    lifecycle_generation: AtomicU64,
    maintenance: Mutex<Option<watch::Sender<bool>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<U: PhotoUploader, S: FriendSharer, G: UrlSigner> AppServices<U, S, G> {
    /// Production wiring: system clock, queue snapshot file from the config
    pub fn new(config: AppConfig, uploader: Arc<U>, sharer: Arc<S>, signer: Arc<G>) -> Self {
        let storage = config
            .services
            .queue_path
            .as_ref()
            .map(|path| Arc::new(FileQueueStorage::new(path)) as Arc<dyn QueueStorage>);
        Self::with_clock(config, Arc::new(SystemClock), storage, uploader, sharer, signer)
    }

    pub fn with_clock(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        storage: Option<Arc<dyn QueueStorage>>,
        uploader: Arc<U>,
        sharer: Arc<S>,
        signer: Arc<G>,
    ) -> Self {
        let cache = Arc::new(PhotoCacheDb::with_clock(
            config.cache.to_photo_cache_config(),
            clock.clone(),
        ));

        let queue = Arc::new(match storage {
            Some(storage) => SharedQueue::load(storage, config.queue.clone(), clock),
            None => SharedQueue::in_memory(config.queue.clone(), clock),
        });
        let completion = Arc::new(ModalCompletionSignal::new());
        queue.set_completion_observer(completion.clone());

        let processor = Arc::new(
            QueueProcessor::new(queue.clone(), uploader, sharer, config.processor.clone())
                .with_photo_cache(cache.clone()),
        );
        let refresher = Arc::new(UrlRefresher::new(
            cache.clone(),
            signer,
            config.refresh.clone(),
        ));

        Self {
            config,
            queue,
            processor,
            refresher,
            cache,
            completion,
            auto_share: AtomicBool::new(false),
            session: Mutex::new(SessionState::default()),
            backgrounded: AtomicBool::new(false),
            lifecycle_generation: AtomicU64::new(0),
            maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<SharedQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<PhotoCacheDb> {
        &self.cache
    }

    pub fn processor(&self) -> &Arc<QueueProcessor<U, S>> {
        &self.processor
    }

    pub fn refresher(&self) -> &Arc<UrlRefresher<G>> {
        &self.refresher
    }

    /// Deduplicated modal completions for the blocking upload screen
    pub fn completion(&self) -> &Arc<ModalCompletionSignal> {
        &self.completion
    }

    pub fn set_auto_share(&self, enabled: bool) {
        log::info!("Auto-share {}", if enabled { "enabled" } else { "disabled" });
        self.auto_share.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_share_enabled(&self) -> bool {
        self.auto_share.load(Ordering::SeqCst)
    }

    /// Queue a captured photo and make sure the processor runs
    ///
    /// The auto-share preference is captured now; later changes do not
    /// affect this item.
    pub fn enqueue_photo(
        &self,
        photo_uri: &str,
        selected_cam: Option<String>,
        is_modal: bool,
    ) -> Option<String> {
        let options = EnqueueOptions {
            is_modal_upload: is_modal,
            should_auto_share: self.auto_share_enabled(),
        };
        let id = self
            .queue
            .update(|store| store.enqueue(photo_uri, selected_cam, options))?;
        self.processor.start();
        Some(id)
    }

    /// Manual retry of a failed upload from the queue screen. `Ok(false)`
    /// means the item exists but is not retryable right now.
    pub fn retry_upload(&self, id: &str) -> Result<bool, AppError> {
        let retried = self.queue.update(|store| {
            if store.get(id).is_none() {
                return Err(AppError::NotFound(format!("Queue item {}", id)));
            }
            Ok(store.retry_item(id))
        })?;
        if retried {
            self.processor.start();
        }
        Ok(retried)
    }

    pub fn queue_stats(&self) -> ActiveStats {
        self.queue.read(|store| store.active_stats())
    }

    pub fn resolve_active_modal_item(&self) -> Option<QueueItem> {
        self.queue.update(|store| store.resolve_active_modal_item())
    }

    pub fn current_user(&self) -> Option<String> {
        lock(&self.session).current_user.clone()
    }

    pub fn is_session_active(&self) -> bool {
        lock(&self.session).current_user.is_some()
    }

    /// Called after login
    pub fn start_session(self: &Arc<Self>, user_id: &str) {
        {
            let mut session = lock(&self.session);
            if session
                .last_user
                .as_deref()
                .is_some_and(|last| last != user_id)
            {
                log::info!("User changed, clearing photo cache");
                self.cache.clear();
            }
            session.current_user = Some(user_id.to_string());
            session.last_user = Some(user_id.to_string());
        }
        log::info!("Session started for {}", user_id);

        self.cache.cleanup(self.config.cache.cleanup_days);
        self.refresher.start();
        self.processor.start();
        self.start_maintenance();
    }

    /// Called on logout
    pub fn end_session(&self) {
        let user = lock(&self.session).current_user.take();
        log::info!(
            "Session ended for {}",
            user.as_deref().unwrap_or("<no user>")
        );

        self.stop_maintenance();
        self.refresher.stop();
        self.processor.stop();
        self.cache.clear();
    }

    pub fn on_app_state_change(self: &Arc<Self>, state: AppLifecycle) {
        let generation = self.lifecycle_generation.fetch_add(1, Ordering::SeqCst) + 1;

        match state {
            AppLifecycle::Active => {
                self.backgrounded.store(false, Ordering::SeqCst);
                log::info!("App in foreground");
                self.run_maintenance();
                self.processor.start();
                if self.is_session_active() {
                    self.refresher.start();
                }
            }
            AppLifecycle::Background => {
                self.backgrounded.store(true, Ordering::SeqCst);
                self.schedule_background_stop(generation);
            }
        }
    }

    fn schedule_background_stop(self: &Arc<Self>, generation: u64) {
        let grace = self.config.services.background_grace();
        log::info!(
            "App in background, processor stops in {} seconds",
            grace.as_secs()
        );

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("No runtime for the background grace timer, stopping now: {}", e);
                self.processor.stop();
                return;
            }
        };

        let services: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(services) = services.upgrade() else {
                return;
            };
            let still_background = services.backgrounded.load(Ordering::SeqCst)
                && services.lifecycle_generation.load(Ordering::SeqCst) == generation;
            if still_background {
                log::info!("Background grace period over, stopping upload processor");
                services.processor.stop();
            }
        });
    }

    /// Evict finished items and repair modal state
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.queue.update(|store| {
            let swept = store.sweep_completed();
            let active_modal_id = store.reconcile_modal_items().map(|item| item.id);
            MaintenanceReport {
                swept,
                active_modal_id,
            }
        })
    }

    fn start_maintenance(self: &Arc<Self>) {
        let mut slot = lock(&self.maintenance);
        if slot.is_some() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Cannot start queue maintenance without a runtime: {}", e);
                return;
            }
        };

        let (tx, mut shutdown) = watch::channel(false);
        *slot = Some(tx);

        let period = self.config.services.maintenance_interval();
        let services: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // skip the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(services) = services.upgrade() else {
                            break;
                        };
                        let report = services.run_maintenance();
                        if report.swept > 0 {
                            log::debug!("Queue maintenance: {:?}", report);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn stop_maintenance(&self) {
        if let Some(tx) = lock(&self.maintenance).take() {
            let _ = tx.send(true);
        }
    }
}
