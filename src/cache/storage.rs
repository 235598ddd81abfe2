//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::http::Response;

/// A stored response together with the time it entered the cache.
///
/// The timestamp is observability only; nothing in this system expires
/// entries based on it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend maps (cache name, request key) to a stored response. All access
/// after installation is read-only and install-time access is append-only,
/// so implementations only need to serialize their own internal state.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist. Idempotent: opening the
  /// same name again is a handle to the same underlying store.
  fn open_cache(&self, name: &str) -> Result<()>;

  /// Look up a stored response by request key.
  fn match_request(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a batch of responses as one unit: either every entry lands or
  /// none do.
  fn put_batch(&self, cache: &str, entries: &[(String, Response)]) -> Result<()>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// SQLite-based persistent cache storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches, created lazily on first open
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request URL within a named cache
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn match_request(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM response_cache
         WHERE cache_name = ? AND url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![cache, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_batch(&self, cache: &str, entries: &[(String, Response)]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction without committing rolls everything back, so
    // an early return on any entry leaves the store untouched.
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![cache])
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_vec(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;

      tx.execute(
        "INSERT OR REPLACE INTO response_cache (cache_name, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![cache, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit batch: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory cache storage.
///
/// Nothing survives the process; useful in tests and in hosts that want the
/// interception behavior without a disk footprint.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<HashMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open_cache(&self, name: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    caches.entry(name.to_string()).or_default();
    Ok(())
  }

  fn match_request(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(caches.get(cache).and_then(|entries| entries.get(key)).cloned())
  }

  fn put_batch(&self, cache: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let cache = caches.entry(cache.to_string()).or_default();
    for (key, response) in entries {
      cache.insert(
        key.clone(),
        CachedResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      );
    }

    Ok(())
  }
}

// ============================================================================
// Tests
// ============================================================================
