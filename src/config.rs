//! Runtime configuration.
//!
//! Every section has defaults matching the production deployment, so an
//! empty TOML document (or no file at all) yields a working setup.
//!
//! ```toml
//! [queue]
//! max_active_items = 10
//!
//! [refresh]
//! interval_secs = 600
//! buffer_minutes = 5
//! ```

use crate::error::AppError;
use photo_cache::PhotoCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts before an item becomes terminally failed
pub const MAX_RETRIES: u32 = 3;

/// Limits and time windows of the upload queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Items allowed in pending/processing/retrying at once
    pub max_active_items: usize,
    pub max_retries: u32,
    /// Same photo enqueued again within this window returns the existing item
    pub duplicate_window_ms: i64,
    /// Double-tap guard for modal uploads of the same photo
    pub modal_duplicate_window_ms: i64,
    /// A modal item waiting longer than this is considered stuck
    pub modal_timeout_ms: i64,
    pub completed_retention_ms: i64,
    pub modal_completed_retention_ms: i64,
    pub failed_retention_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active_items: 10,
            max_retries: MAX_RETRIES,
            duplicate_window_ms: 2_000,
            modal_duplicate_window_ms: 5_000,
            modal_timeout_ms: 120_000,
            completed_retention_ms: 10_000,
            modal_completed_retention_ms: 60_000,
            failed_retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Pacing of the sequential upload worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub modal_delay_ms: u64,
    pub background_delay_ms: u64,
    /// Pause between attaching a modal result and flipping it to completed
    pub modal_settle_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            modal_delay_ms: 200,
            background_delay_ms: 1_000,
            modal_settle_ms: 100,
        }
    }
}

impl ProcessorConfig {
    pub fn next_item_delay(&self, is_modal: bool) -> Duration {
        if is_modal {
            Duration::from_millis(self.modal_delay_ms)
        } else {
            Duration::from_millis(self.background_delay_ms)
        }
    }

    pub fn modal_settle(&self) -> Duration {
        Duration::from_millis(self.modal_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file of the URL cache; in-memory when unset
    pub database_path: Option<PathBuf>,
    pub url_lifetime_minutes: i64,
    pub cleanup_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            url_lifetime_minutes: photo_cache::DEFAULT_URL_LIFETIME_MINUTES,
            cleanup_days: photo_cache::DEFAULT_CLEANUP_DAYS,
        }
    }
}

impl CacheConfig {
    pub fn to_photo_cache_config(&self) -> PhotoCacheConfig {
        PhotoCacheConfig {
            database_path: self.database_path.clone(),
            url_lifetime_minutes: self.url_lifetime_minutes,
        }
    }
}

/// Signed-URL refresh loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    /// Refresh URLs expiring within this many minutes
    pub buffer_minutes: i64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10 * 60,
            buffer_minutes: 5,
            batch_size: 100,
            batch_pause_ms: 250,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    /// JSON snapshot of the upload queue; not persisted when unset
    pub queue_path: Option<PathBuf>,
    /// How long the processor keeps running after the app is backgrounded
    pub background_grace_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            queue_path: None,
            background_grace_secs: 30,
            maintenance_interval_secs: 5,
        }
    }
}

impl ServicesConfig {
    pub fn background_grace(&self) -> Duration {
        Duration::from_secs(self.background_grace_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
    pub services: ServicesConfig,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.queue.max_active_items == 0 {
            return Err(AppError::Config(
                "queue.max_active_items must be at least 1".to_string(),
            ));
        }
        if self.refresh.batch_size == 0 {
            return Err(AppError::Config(
                "refresh.batch_size must be at least 1".to_string(),
            ));
        }
        if self.refresh.interval_secs == 0 {
            return Err(AppError::Config(
                "refresh.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.services.maintenance_interval_secs == 0 {
            return Err(AppError::Config(
                "services.maintenance_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.queue.max_active_items, 10);
        assert_eq!(config.queue.duplicate_window_ms, 2_000);
        assert_eq!(config.queue.modal_duplicate_window_ms, 5_000);
        assert_eq!(config.refresh.batch_size, 100);
        assert_eq!(config.cache.url_lifetime_minutes, 15);
    }

    #[test]
    fn test_partial_sections_override() {
        let config = AppConfig::from_toml_str(
            r#"
            [queue]
            max_active_items = 4

            [refresh]
            buffer_minutes = 20

            [cache]
            database_path = "/tmp/photo_cache.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_active_items, 4);
        assert_eq!(config.queue.max_retries, MAX_RETRIES);
        assert_eq!(config.refresh.buffer_minutes, 20);
        assert_eq!(config.refresh.interval_secs, 600);
        assert_eq!(
            config.cache.database_path,
            Some(PathBuf::from("/tmp/photo_cache.db"))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_toml_str("[refresh]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = AppConfig::from_toml_str("[queue]\nmax_active_items = \"many\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_processor_delays() {
        let config = ProcessorConfig::default();
        assert_eq!(config.next_item_delay(true), Duration::from_millis(200));
        assert_eq!(config.next_item_delay(false), Duration::from_millis(1_000));
    }
}
