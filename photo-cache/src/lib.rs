//! # Photo Cache
//!
//! A local SQLite cache of signed photo URLs.
//!
//! Signed URLs handed out by the backend are only valid for a short time
//! (15 minutes in the current deployment). This crate keeps them, together
//! with the object keys needed to re-sign them, so images can be shown
//! instantly from previously seen data:
//! - Upsert by photo id, single rows or whole batches in one transaction
//! - Independent expiry for thumbnail and full-size URLs
//! - Scan for rows about to expire, for a proactive refresh loop
//! - LRU-style cleanup based on last access
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use photo_cache::{CachedPhotoInput, PhotoCacheConfig, PhotoCacheDb, UrlKind};
//!
//! let cache = PhotoCacheDb::new(PhotoCacheConfig {
//!     database_path: Some("/path/to/photo_cache.db".into()),
//!     ..Default::default()
//! });
//!
//! cache.save_photo(CachedPhotoInput {
//!     id: "p1".to_string(),
//!     thumb_url: Some(signed_url),
//!     ..Default::default()
//! });
//! let soon_stale = cache.get_photos_needing_refresh(5);
//! ```

pub mod clock;
pub mod models;
pub mod schema;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use models::{
    CacheStats, CachedPhoto, CachedPhotoInput, PhotoCacheConfig, UrlKind, DEFAULT_CLEANUP_DAYS,
    DEFAULT_URL_LIFETIME_MINUTES,
};
pub use schema::init_cache_schema;
pub use service::{CacheError, PhotoCacheDb};
