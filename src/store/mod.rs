use crate::errors::{AppError, AppResult};
use crate::models::AppSettings;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const NAV_TREE_KEY: &str = "nav:tree";
pub const NAV_UPDATED_KEY: &str = "nav:updated-at";
pub const SETTINGS_KEY: &str = "app:settings";

#[derive(Debug, Clone)]
pub struct FaviconRecord {
    pub host: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Key-value backend for the navigation document, the settings blob and the
/// per-host favicon cache.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AppError::Storage(format!("Cannot create data dir: {}", err)))?;
        }
        let conn = Connection::open(path)
            .map_err(|err| AppError::Storage(format!("Cannot open store at {:?}: {}", path, err)))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|err| AppError::Storage(format!("Cannot apply store schema: {}", err)))?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn read_kv(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn write_kv(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_kv(&self, key: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Wipes the navigation keyspace and the favicon cache. Settings survive.
    pub fn clear_navigation(&self) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_entries WHERE key LIKE 'nav:%'", [])?;
        conn.execute("DELETE FROM favicon_cache", [])?;
        Ok(())
    }

    pub fn favicon_get(&self, host: &str) -> AppResult<Option<FaviconRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT content_type, data, updated_at FROM favicon_cache WHERE host = ?1",
                [host],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match record {
            Some((content_type, data, updated_at)) => {
                let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                    .map_err(|err| AppError::Internal(format!("Bad favicon timestamp: {}", err)))?
                    .with_timezone(&Utc);
                Ok(Some(FaviconRecord {
                    host: host.to_string(),
                    content_type,
                    data,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Stores favicon bytes for a host. Returns false when the stored bytes
    /// are already identical and the write was skipped.
    pub fn favicon_put(&self, host: &str, content_type: &str, data: &[u8]) -> AppResult<bool> {
        let conn = self.conn()?;
        let existing: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM favicon_cache WHERE host = ?1",
                [host],
                |row| row.get(0),
            )
            .optional()?;
        if existing.as_deref() == Some(data) {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO favicon_cache (host, content_type, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(host) DO UPDATE SET
                 content_type = excluded.content_type,
                 data = excluded.data,
                 updated_at = excluded.updated_at",
            params![host, content_type, data, Utc::now().to_rfc3339()],
        )?;
        Ok(true)
    }

    /// Refreshes only the timestamp after a fetch returned identical bytes.
    pub fn favicon_touch(&self, host: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE favicon_cache SET updated_at = ?1 WHERE host = ?2",
            params![Utc::now().to_rfc3339(), host],
        )?;
        Ok(())
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        match self.read_kv(SETTINGS_KEY)? {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)?;
        self.write_kv(SETTINGS_KEY, &serde_json::to_string(&settings)?)?;
        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        if self.read_kv(SETTINGS_KEY)?.is_none() {
            self.write_kv(SETTINGS_KEY, &serde_json::to_string(&AppSettings::default())?)?;
        }
        Ok(())
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target), serde_json::Value::Object(update)) => {
            for (key, value) in update {
                merge_json(target.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => *target = update,
    }
}
