use rusqlite::{Connection, Result};

/// Initialize the photo cache schema
pub fn init_cache_schema(conn: &Connection) -> Result<()> {
    // Schema version table for the cache
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM cache_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        create_cache_schema_v1(conn)?;
        conn.execute("INSERT INTO cache_schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

/// Create cache schema version 1
fn create_cache_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cached_photos (
            id TEXT PRIMARY KEY,
            thumb_url TEXT,
            full_url TEXT,
            thumb_url_expires INTEGER,
            full_url_expires INTEGER,
            camera_id TEXT,
            owner_id TEXT,
            owner_identity_id TEXT,
            s3_key TEXT,
            thumb_key TEXT,
            created_at TEXT,
            last_accessed INTEGER NOT NULL,
            local_uri TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_photos_camera ON cached_photos(camera_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_photos_owner ON cached_photos(owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_photos_created ON cached_photos(created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cached_photos_accessed ON cached_photos(last_accessed)",
        [],
    )?;

    Ok(())
}
