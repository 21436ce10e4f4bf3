use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ClientError, Result};

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("org", "orchid", "orchid")?;
    Some(proj.data_dir().join("local.sqlite"))
}

fn now_secs() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ClientError::Config(e.to_string()))?
        .as_secs();
    Ok(secs as i64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub cached_at: i64,
}

/// Browser-style local state: which posts were opened and the last known
/// location. Chat data is never stored here.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| ClientError::Config("no data dir".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS viewed_posts (
                post_id TEXT PRIMARY KEY,
                viewed_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS geolocation (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                cached_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn mark_post_viewed(&self, post_id: &str) -> Result<()> {
        self.mark_post_viewed_at(post_id, now_secs()?)
    }

    fn mark_post_viewed_at(&self, post_id: &str, at: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO viewed_posts (post_id, viewed_at) VALUES (?1, ?2)
            ON CONFLICT(post_id) DO UPDATE SET viewed_at = excluded.viewed_at
            "#,
            params![post_id, at],
        )?;
        Ok(())
    }

    pub fn has_viewed(&self, post_id: &str) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM viewed_posts WHERE post_id = ?1", params![post_id], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    /// Most recently viewed first.
    pub fn viewed_posts(&self, limit: Option<usize>) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT post_id FROM viewed_posts ORDER BY viewed_at DESC, post_id ASC LIMIT ?1")?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn cache_location(&self, lat: f64, lon: f64) -> Result<()> {
        self.cache_location_at(lat, lon, now_secs()?)
    }

    fn cache_location_at(&self, lat: f64, lon: f64, at: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO geolocation (id, lat, lon, cached_at) VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                cached_at = excluded.cached_at
            "#,
            params![lat, lon, at],
        )?;
        Ok(())
    }

    /// Last cached fix, unless it is older than `max_age`.
    pub fn cached_location(&self, max_age: Duration) -> Result<Option<GeoFix>> {
        self.cached_location_at(max_age, now_secs()?)
    }

    fn cached_location_at(&self, max_age: Duration, now: i64) -> Result<Option<GeoFix>> {
        let fix = self
            .conn
            .query_row("SELECT lat, lon, cached_at FROM geolocation WHERE id = 1", [], |row| {
                Ok(GeoFix {
                    lat: row.get(0)?,
                    lon: row.get(1)?,
                    cached_at: row.get(2)?,
                })
            })
            .optional()?;
        Ok(fix.filter(|f| now.saturating_sub(f.cached_at) <= max_age.as_secs() as i64))
    }
}
