//! Proactive re-signing of cached photo URLs before they expire.

use crate::config::RefreshConfig;
use crate::services::collaborators::UrlSigner;
use photo_cache::{PhotoCacheDb, UrlKind};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Rows returned by the expiry scan
    pub scanned: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// URLs that could not be re-signed for lack of a key or owner
    pub skipped: usize,
}

pub struct UrlRefresher<G> {
    cache: Arc<PhotoCacheDb>,
    signer: Arc<G>,
    config: RefreshConfig,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl<G: UrlSigner> UrlRefresher<G> {
    pub fn new(cache: Arc<PhotoCacheDb>, signer: Arc<G>, config: RefreshConfig) -> Self {
        Self {
            cache,
            signer,
            config,
            shutdown: Mutex::new(None),
        }
    }

    fn shutdown_slot(&self) -> MutexGuard<'_, Option<watch::Sender<bool>>> {
        match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_slot().is_some()
    }

    /// Start the periodic loop; the first pass runs immediately
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.shutdown_slot();
        if slot.is_some() {
            log::debug!("URL refresh loop already running");
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Cannot start URL refresh loop without a runtime: {}", e);
                return false;
            }
        };

        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);
        log::info!(
            "Starting URL refresh loop every {} seconds",
            self.config.interval_secs
        );

        let refresher = Arc::clone(self);
        handle.spawn(async move {
            refresher.run(rx).await;
        });
        true
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_slot().take() {
            log::info!("Stopping URL refresh loop");
            let _ = tx.send(true);
        }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.refresh_once().await;
                    if stats.failed > 0 {
                        log::warn!("URL refresh pass finished with failures: {:?}", stats);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        log::debug!("URL refresh loop exited");
    }

    /// Re-sign every populated URL of rows expiring within the buffer
    pub async fn refresh_once(&self) -> RefreshStats {
        let photos = self
            .cache
            .get_photos_needing_refresh(self.config.buffer_minutes);
        let mut stats = RefreshStats {
            scanned: photos.len(),
            ..Default::default()
        };
        if photos.is_empty() {
            log::debug!("No cached URLs close to expiry");
            return stats;
        }
        log::info!("Refreshing signed URLs for {} photos", photos.len());

        for (index, batch) in photos.chunks(self.config.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }

            let mut tasks = JoinSet::new();
            for photo in batch {
                for kind in [UrlKind::Thumb, UrlKind::Full] {
                    if photo.url(kind).is_none() {
                        continue;
                    }
                    let (Some(key), Some(owner)) =
                        (photo.signing_key(kind), photo.owner_identity_id.as_deref())
                    else {
                        log::debug!("Photo {} has no key to re-sign its {} URL", photo.id, kind);
                        stats.skipped += 1;
                        continue;
                    };

                    let signer = Arc::clone(&self.signer);
                    let cache = Arc::clone(&self.cache);
                    let id = photo.id.clone();
                    let key = key.to_string();
                    let owner = owner.to_string();
                    tasks.spawn(async move {
                        match signer.sign_url(&key, &owner).await {
                            Ok(url) => {
                                let updated = cache.update_photo_url(&id, kind, &url);
                                if !updated {
                                    log::warn!("Photo {} vanished before its {} URL was stored", id, kind);
                                }
                                updated
                            }
                            Err(e) => {
                                log::warn!("Failed to re-sign {} URL of photo {}: {}", kind, id, e);
                                false
                            }
                        }
                    });
                }
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(true) => stats.refreshed += 1,
                    Ok(false) => stats.failed += 1,
                    Err(e) => {
                        log::error!("URL refresh task failed: {}", e);
                        stats.failed += 1;
                    }
                }
            }
        }

        log::info!(
            "URL refresh done: {} refreshed, {} failed, {} skipped",
            stats.refreshed,
            stats.failed,
            stats.skipped
        );
        stats
    }
}
