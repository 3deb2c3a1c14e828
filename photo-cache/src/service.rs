use crate::clock::{Clock, SystemClock};
use crate::models::{CacheStats, CachedPhoto, CachedPhotoInput, PhotoCacheConfig, UrlKind};
use crate::schema::init_cache_schema;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const MINUTE_MS: i64 = 60 * 1000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// SQLite bound-parameter budget per `IN (...)` query
const MAX_IDS_PER_QUERY: usize = 500;

const SELECT_COLUMNS: &str = "id, thumb_url, full_url, thumb_url_expires, full_url_expires,
     camera_id, owner_id, owner_identity_id, s3_key, thumb_key, created_at,
     last_accessed, local_uri";

/// Error type for photo cache operations
#[derive(Debug)]
pub enum CacheError {
    DatabaseError(rusqlite::Error),
    IoError(std::io::Error),
    Other(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::DatabaseError(e) => write!(f, "Database error: {}", e),
            CacheError::IoError(e) => write!(f, "IO error: {}", e),
            CacheError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::DatabaseError(err)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err)
    }
}

/// Local cache of signed photo URLs keyed by photo id
///
/// The connection is opened lazily on first use. Every public operation
/// logs storage failures and degrades to "not cached" instead of
/// returning an error, so callers fall back to fetching from the backend.
pub struct PhotoCacheDb {
    config: PhotoCacheConfig,
    clock: Arc<dyn Clock>,
    conn: Mutex<Option<Connection>>,
}

impl PhotoCacheDb {
    /// Create a cache using the system clock
    pub fn new(config: PhotoCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PhotoCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            conn: Mutex::new(None),
        }
    }

    /// In-memory cache, mainly for tests
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(PhotoCacheConfig::default(), clock)
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn url_lifetime_ms(&self) -> i64 {
        self.config.url_lifetime_minutes * MINUTE_MS
    }

    /// Opens the database and applies the schema if that has not happened yet.
    ///
    /// Returns whether the cache is usable.
    pub fn init(&self) -> bool {
        self.with_conn("init", |_| Ok(())).is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Photo cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn open(&self) -> Result<Connection, CacheError> {
        let conn = match &self.config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                log::debug!("Photo cache journal mode: {}", mode);
                conn
            }
            None => Connection::open_in_memory()?,
        };

        init_cache_schema(&conn)?;
        log::debug!(
            "Photo cache initialized ({})",
            self.config
                .database_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string())
        );
        Ok(conn)
    }

    /// Runs `f` against the (lazily opened) connection, logging any failure.
    fn with_conn<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> Result<T, CacheError>,
    ) -> Option<T> {
        let mut guard = self.lock();

        if guard.is_none() {
            match self.open() {
                Ok(conn) => *guard = Some(conn),
                Err(e) => {
                    log::error!("Photo cache init failed: {}", e);
                    return None;
                }
            }
        }

        let conn = guard.as_mut()?;
        match f(conn) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Photo cache {} failed: {}", operation, e);
                None
            }
        }
    }

    /// Get one photo, bumping its `last_accessed`
    pub fn get_photo(&self, id: &str) -> Option<CachedPhoto> {
        let now = self.now_ms();
        self.with_conn("get_photo", |conn| {
            let sql = format!("SELECT {} FROM cached_photos WHERE id = ?1", SELECT_COLUMNS);
            let photo = conn
                .query_row(&sql, params![id], row_to_photo)
                .optional()?;

            let Some(mut photo) = photo else {
                return Ok(None);
            };

            conn.execute(
                "UPDATE cached_photos SET last_accessed = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            photo.last_accessed = now;
            Ok(Some(photo))
        })
        .flatten()
    }

    /// Get every cached photo among `ids`; uncached ids are simply absent
    pub fn get_photos(&self, ids: &[String]) -> HashMap<String, CachedPhoto> {
        if ids.is_empty() {
            return HashMap::new();
        }

        let now = self.now_ms();
        self.with_conn("get_photos", |conn| {
            let tx = conn.transaction()?;
            let mut found = HashMap::new();

            for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
                let placeholders = vec!["?"; chunk.len()].join(", ");

                {
                    let sql = format!(
                        "SELECT {} FROM cached_photos WHERE id IN ({})",
                        SELECT_COLUMNS, placeholders
                    );
                    let mut stmt = tx.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_photo)?;
                    for row in rows {
                        let mut photo = row?;
                        photo.last_accessed = now;
                        found.insert(photo.id.clone(), photo);
                    }
                }

                let sql = format!(
                    "UPDATE cached_photos SET last_accessed = {} WHERE id IN ({})",
                    now, placeholders
                );
                tx.execute(&sql, params_from_iter(chunk.iter()))?;
            }

            tx.commit()?;
            Ok(found)
        })
        .unwrap_or_default()
    }

    /// Upsert one photo. Returns whether the row was written.
    pub fn save_photo(&self, photo: CachedPhotoInput) -> bool {
        let now = self.now_ms();
        let lifetime = self.url_lifetime_ms();
        self.with_conn("save_photo", |conn| {
            upsert_photo(conn, &photo, now, lifetime)?;
            Ok(())
        })
        .is_some()
    }

    /// Upsert a batch in a single transaction (all or nothing)
    pub fn save_photos(&self, photos: Vec<CachedPhotoInput>) -> bool {
        if photos.is_empty() {
            return true;
        }

        let now = self.now_ms();
        let lifetime = self.url_lifetime_ms();
        self.with_conn("save_photos", |conn| {
            let tx = conn.transaction()?;
            for photo in &photos {
                upsert_photo(&tx, photo, now, lifetime)?;
            }
            tx.commit()?;
            log::debug!("Cached {} photos", photos.len());
            Ok(())
        })
        .is_some()
    }

    /// Optimistic insert of a just-captured photo before any remote URL exists
    pub fn save_local_photo(
        &self,
        id: &str,
        local_uri: &str,
        camera_id: Option<&str>,
        owner_identity_id: Option<&str>,
        s3_key: Option<&str>,
    ) -> bool {
        let mut input = CachedPhotoInput::new(id);
        input.local_uri = Some(local_uri.to_string());
        input.camera_id = camera_id.map(str::to_string);
        input.owner_identity_id = owner_identity_id.map(str::to_string);
        input.s3_key = s3_key.map(str::to_string);
        input.created_at =
            chrono::DateTime::from_timestamp_millis(self.now_ms()).map(|at| at.to_rfc3339());
        self.save_photo(input)
    }

    /// Replace one URL kind and reset only that kind's expiry
    pub fn update_photo_url(&self, id: &str, kind: UrlKind, url: &str) -> bool {
        let expires = self.now_ms() + self.url_lifetime_ms();
        let sql = match kind {
            UrlKind::Thumb => {
                "UPDATE cached_photos SET thumb_url = ?1, thumb_url_expires = ?2 WHERE id = ?3"
            }
            UrlKind::Full => {
                "UPDATE cached_photos SET full_url = ?1, full_url_expires = ?2 WHERE id = ?3"
            }
        };

        self.with_conn("update_photo_url", |conn| {
            let rows = conn.execute(sql, params![url, expires, id])?;
            Ok(rows > 0)
        })
        .unwrap_or(false)
    }

    /// Rows with at least one populated URL expiring within `buffer_minutes`
    ///
    /// Read-only: does not touch `last_accessed`. No limit is applied.
    pub fn get_photos_needing_refresh(&self, buffer_minutes: i64) -> Vec<CachedPhoto> {
        let threshold = self.now_ms() + buffer_minutes * MINUTE_MS;
        self.with_conn("get_photos_needing_refresh", |conn| {
            let sql = format!(
                "SELECT {} FROM cached_photos
                 WHERE (thumb_url IS NOT NULL AND thumb_url_expires IS NOT NULL AND thumb_url_expires < ?1)
                    OR (full_url IS NOT NULL AND full_url_expires IS NOT NULL AND full_url_expires < ?1)
                 ORDER BY last_accessed DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![threshold], row_to_photo)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .unwrap_or_default()
    }

    /// Cached photos of one camera, newest first
    pub fn get_photos_by_camera(&self, camera_id: &str) -> Vec<CachedPhoto> {
        self.with_conn("get_photos_by_camera", |conn| {
            let sql = format!(
                "SELECT {} FROM cached_photos WHERE camera_id = ?1 ORDER BY created_at DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![camera_id], row_to_photo)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .unwrap_or_default()
    }

    /// Purge rows not accessed within `days_old` days. Returns rows removed.
    pub fn cleanup(&self, days_old: i64) -> usize {
        let cutoff = self.now_ms() - days_old * DAY_MS;
        let removed = self
            .with_conn("cleanup", |conn| {
                Ok(conn.execute(
                    "DELETE FROM cached_photos WHERE last_accessed < ?1",
                    params![cutoff],
                )?)
            })
            .unwrap_or(0);

        if removed > 0 {
            log::info!("Photo cache cleanup removed {} stale rows", removed);
        }
        removed
    }

    pub fn delete_photo(&self, id: &str) -> bool {
        self.with_conn("delete_photo", |conn| {
            Ok(conn.execute("DELETE FROM cached_photos WHERE id = ?1", params![id])? > 0)
        })
        .unwrap_or(false)
    }

    /// Drop every row. Must run on user switch so no signed URL of one
    /// account survives into another account's session.
    pub fn clear(&self) -> bool {
        self.with_conn("clear", |conn| {
            let removed = conn.execute("DELETE FROM cached_photos", [])?;
            log::info!("Photo cache cleared ({} rows)", removed);
            Ok(())
        })
        .is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.now_ms();
        self.with_conn("stats", |conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN thumb_url IS NOT NULL AND thumb_url_expires <= ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN full_url IS NOT NULL AND full_url_expires <= ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN thumb_url IS NULL AND full_url IS NULL AND local_uri IS NOT NULL THEN 1 ELSE 0 END), 0)
                 FROM cached_photos",
                params![now],
                |row| {
                    Ok(CacheStats {
                        total: row.get::<_, i64>(0)? as usize,
                        expired_thumb_urls: row.get::<_, i64>(1)? as usize,
                        expired_full_urls: row.get::<_, i64>(2)? as usize,
                        local_only: row.get::<_, i64>(3)? as usize,
                    })
                },
            )?;
            Ok(stats)
        })
        .unwrap_or_default()
    }
}

fn upsert_photo(
    conn: &Connection,
    photo: &CachedPhotoInput,
    now: i64,
    lifetime_ms: i64,
) -> Result<(), CacheError> {
    if photo.id.is_empty() {
        return Err(CacheError::Other("Cannot cache a photo without id".to_string()));
    }

    let thumb_expires = photo
        .thumb_url
        .as_ref()
        .map(|_| photo.thumb_url_expires.unwrap_or(now + lifetime_ms));
    let full_expires = photo
        .full_url
        .as_ref()
        .map(|_| photo.full_url_expires.unwrap_or(now + lifetime_ms));

    // local_uri survives a later save of the remote row
    conn.execute(
        "INSERT INTO cached_photos (id, thumb_url, full_url, thumb_url_expires, full_url_expires,
                                    camera_id, owner_id, owner_identity_id, s3_key, thumb_key,
                                    created_at, last_accessed, local_uri)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            thumb_url = excluded.thumb_url,
            full_url = excluded.full_url,
            thumb_url_expires = excluded.thumb_url_expires,
            full_url_expires = excluded.full_url_expires,
            camera_id = excluded.camera_id,
            owner_id = excluded.owner_id,
            owner_identity_id = excluded.owner_identity_id,
            s3_key = excluded.s3_key,
            thumb_key = excluded.thumb_key,
            created_at = COALESCE(excluded.created_at, cached_photos.created_at),
            last_accessed = excluded.last_accessed,
            local_uri = COALESCE(excluded.local_uri, cached_photos.local_uri)",
        params![
            photo.id,
            photo.thumb_url,
            photo.full_url,
            thumb_expires,
            full_expires,
            photo.camera_id,
            photo.owner_id,
            photo.owner_identity_id,
            photo.s3_key,
            photo.thumb_key,
            photo.created_at,
            now,
            photo.local_uri,
        ],
    )?;
    Ok(())
}

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<CachedPhoto> {
    Ok(CachedPhoto {
        id: row.get(0)?,
        thumb_url: row.get(1)?,
        full_url: row.get(2)?,
        thumb_url_expires: row.get(3)?,
        full_url_expires: row.get(4)?,
        camera_id: row.get(5)?,
        owner_id: row.get(6)?,
        owner_identity_id: row.get(7)?,
        s3_key: row.get(8)?,
        thumb_key: row.get(9)?,
        created_at: row.get(10)?,
        last_accessed: row.get(11)?,
        local_uri: row.get(12)?,
    })
}
