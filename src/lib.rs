//! # SnapShare Core
//!
//! Client-side upload pipeline of the photo sharing app.
//!
//! Captured photos go into a bounded, persisted [`QueueStore`]. A single
//! [`QueueProcessor`] uploads them one at a time, shares recognized
//! friends and reports modal uploads back to the waiting screen. Signed
//! photo URLs are kept in the `photo-cache` crate and re-signed by the
//! [`UrlRefresher`] before they expire. [`AppServices`] ties everything
//! to login sessions and the app lifecycle.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use snapshare_core::{AppConfig, AppLifecycle, AppServices};
//! use std::sync::Arc;
//!
//! snapshare_core::init_logging();
//! let config = AppConfig::load("snapshare.toml".as_ref())?;
//! let services = Arc::new(AppServices::new(config, uploader, sharer, signer));
//!
//! services.start_session(&user_id);
//! let id = services.enqueue_photo("file:///capture.jpg", None, true);
//! services.on_app_state_change(AppLifecycle::Background);
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{
    AppConfig, CacheConfig, ProcessorConfig, QueueConfig, RefreshConfig, ServicesConfig,
    MAX_RETRIES,
};
pub use error::AppError;
pub use models::{
    EnqueueOptions, FaceMatch, FaceProcessingResult, QueueItem, QueueStatus, ShareContext,
    UploadedPhoto,
};
pub use photo_cache::{
    CacheStats, CachedPhoto, CachedPhotoInput, Clock, ManualClock, PhotoCacheDb, SystemClock,
    UrlKind,
};
pub use services::{
    ActiveStats, AppLifecycle, AppServices, FileQueueStorage, FriendSharer, MemoryQueueStorage,
    ModalCompletionObserver, ModalCompletionSignal, PhotoUploader, QueueProcessor, QueueStorage,
    QueueStore, RefreshStats, SharedQueue, StatusCounts, UrlRefresher, UrlSigner,
};

/// Install the platform logger. Safe to call more than once.
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Info)
                .with_tag("snapshare"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    }
}
