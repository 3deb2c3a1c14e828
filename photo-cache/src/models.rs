use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifetime of a signed URL handed out by the backend
pub const DEFAULT_URL_LIFETIME_MINUTES: i64 = 15;

/// Rows not read for this many days are purged by `cleanup`
pub const DEFAULT_CLEANUP_DAYS: i64 = 30;

/// The two independently expiring URL variants of a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Thumb,
    Full,
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlKind::Thumb => "thumb",
            UrlKind::Full => "full",
        }
    }
}

impl std::fmt::Display for UrlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached photo row
///
/// Carries the denormalized keys needed to re-sign a URL without
/// fetching the photo metadata again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedPhoto {
    pub id: String,
    pub thumb_url: Option<String>,
    pub full_url: Option<String>,
    pub thumb_url_expires: Option<i64>,
    pub full_url_expires: Option<i64>,
    pub camera_id: Option<String>,
    pub owner_id: Option<String>,
    pub owner_identity_id: Option<String>,
    pub s3_key: Option<String>,
    pub thumb_key: Option<String>,
    pub created_at: Option<String>,
    pub last_accessed: i64,
    pub local_uri: Option<String>,
}

impl CachedPhoto {
    pub fn url(&self, kind: UrlKind) -> Option<&str> {
        match kind {
            UrlKind::Thumb => self.thumb_url.as_deref(),
            UrlKind::Full => self.full_url.as_deref(),
        }
    }

    pub fn expires(&self, kind: UrlKind) -> Option<i64> {
        match kind {
            UrlKind::Thumb => self.thumb_url_expires,
            UrlKind::Full => self.full_url_expires,
        }
    }

    /// Object key a fresh URL of `kind` is signed from.
    ///
    /// Thumbnails fall back to the original key when no dedicated
    /// thumbnail key was stored.
    pub fn signing_key(&self, kind: UrlKind) -> Option<&str> {
        match kind {
            UrlKind::Thumb => self.thumb_key.as_deref().or(self.s3_key.as_deref()),
            UrlKind::Full => self.s3_key.as_deref(),
        }
    }

    /// A URL is usable only while `now < expires`.
    pub fn is_url_valid(&self, kind: UrlKind, now_ms: i64) -> bool {
        match (self.url(kind), self.expires(kind)) {
            (Some(_), Some(expires)) => now_ms < expires,
            _ => false,
        }
    }

    /// Populated URL that expires before `now + buffer`.
    pub fn needs_refresh(&self, kind: UrlKind, now_ms: i64, buffer_ms: i64) -> bool {
        match (self.url(kind), self.expires(kind)) {
            (Some(_), Some(expires)) => expires < now_ms + buffer_ms,
            _ => false,
        }
    }

    /// URI for immediate display: a still valid remote URL of `kind`,
    /// otherwise the optimistic local file.
    pub fn display_uri(&self, kind: UrlKind, now_ms: i64) -> Option<&str> {
        if self.is_url_valid(kind, now_ms) {
            self.url(kind)
        } else {
            self.local_uri.as_deref()
        }
    }
}

/// Partial row accepted by `save_photo`
///
/// Missing expiry timestamps default to `now + url lifetime` for every
/// URL that is present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedPhotoInput {
    pub id: String,
    pub thumb_url: Option<String>,
    pub full_url: Option<String>,
    pub thumb_url_expires: Option<i64>,
    pub full_url_expires: Option<i64>,
    pub camera_id: Option<String>,
    pub owner_id: Option<String>,
    pub owner_identity_id: Option<String>,
    pub s3_key: Option<String>,
    pub thumb_key: Option<String>,
    pub created_at: Option<String>,
    pub local_uri: Option<String>,
}

impl CachedPhotoInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Summary of the cache contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub expired_thumb_urls: usize,
    pub expired_full_urls: usize,
    pub local_only: usize,
}

/// Configuration for the photo cache
#[derive(Debug, Clone)]
pub struct PhotoCacheConfig {
    /// SQLite file; `None` keeps the cache in memory
    pub database_path: Option<PathBuf>,
    /// Expiry assigned to URLs saved without an explicit one
    pub url_lifetime_minutes: i64,
}

impl Default for PhotoCacheConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            url_lifetime_minutes: DEFAULT_URL_LIFETIME_MINUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo() -> CachedPhoto {
        CachedPhoto {
            id: "p1".to_string(),
            thumb_url: Some("https://cdn/thumb".to_string()),
            full_url: None,
            thumb_url_expires: Some(10_000),
            full_url_expires: None,
            camera_id: None,
            owner_id: None,
            owner_identity_id: Some("eu-west-1:abc".to_string()),
            s3_key: Some("photos/p1.jpg".to_string()),
            thumb_key: None,
            created_at: None,
            last_accessed: 0,
            local_uri: Some("file:///p1.jpg".to_string()),
        }
    }

    #[test]
    fn test_url_validity() {
        let p = photo();
        assert!(p.is_url_valid(UrlKind::Thumb, 9_999));
        assert!(!p.is_url_valid(UrlKind::Thumb, 10_000));
        assert!(!p.is_url_valid(UrlKind::Full, 0));
    }

    #[test]
    fn test_needs_refresh_only_populated_kinds() {
        let p = photo();
        assert!(p.needs_refresh(UrlKind::Thumb, 6_000, 5_000));
        assert!(!p.needs_refresh(UrlKind::Thumb, 4_000, 5_000));
        assert!(!p.needs_refresh(UrlKind::Full, 6_000, 5_000));
    }

    #[test]
    fn test_signing_key_fallback() {
        let mut p = photo();
        assert_eq!(p.signing_key(UrlKind::Thumb), Some("photos/p1.jpg"));
        p.thumb_key = Some("thumbs/p1.jpg".to_string());
        assert_eq!(p.signing_key(UrlKind::Thumb), Some("thumbs/p1.jpg"));
        assert_eq!(p.signing_key(UrlKind::Full), Some("photos/p1.jpg"));
    }

    #[test]
    fn test_display_uri_falls_back_to_local() {
        let p = photo();
        assert_eq!(p.display_uri(UrlKind::Thumb, 0), Some("https://cdn/thumb"));
        assert_eq!(p.display_uri(UrlKind::Thumb, 20_000), Some("file:///p1.jpg"));
    }
}
