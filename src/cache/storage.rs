//! Cache storage implementations: SQLite on disk and a plain in-memory map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::traits::{CacheStorage, CachedEntry};
use crate::net::Snapshot;

/// In-memory storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  generations: Mutex<BTreeMap<String, BTreeMap<String, CachedEntry>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, CachedEntry>>>> {
    self
      .generations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn generations(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn has_generation(&self, tag: &str) -> Result<bool> {
    Ok(self.lock()?.contains_key(tag))
  }

  fn put_all(&self, tag: &str, entries: &[CachedEntry]) -> Result<()> {
    let mut generations = self.lock()?;
    let generation = generations.entry(tag.to_string()).or_default();
    for entry in entries {
      generation.insert(entry.key.clone(), entry.clone());
    }
    Ok(())
  }

  fn put(&self, tag: &str, entry: &CachedEntry) -> Result<bool> {
    let mut generations = self.lock()?;
    match generations.get_mut(tag) {
      Some(generation) => {
        generation.insert(entry.key.clone(), entry.clone());
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn get(&self, tag: &str, key: &str) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .lock()?
        .get(tag)
        .and_then(|generation| generation.get(key))
        .cloned(),
    )
  }

  fn keys(&self, tag: &str) -> Result<Vec<String>> {
    Ok(
      self
        .lock()?
        .get(tag)
        .map(|generation| generation.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn delete_generation(&self, tag: &str) -> Result<bool> {
    Ok(self.lock()?.remove(tag).is_some())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Cache database that lives only as long as this value.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cassa").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    tag TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entries keyed by the SHA256 of the request key
CREATE TABLE IF NOT EXISTS entries (
    tag TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    snapshot BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (tag, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_tag ON entries(tag);
"#;

/// Stable, fixed-length storage key for a request key.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

fn insert_entry(conn: &Connection, tag: &str, entry: &CachedEntry) -> Result<()> {
  let data = serde_json::to_vec(&entry.snapshot)
    .map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (tag, key_hash, request_key, snapshot, stored_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        tag,
        key_hash(&entry.key),
        entry.key,
        data,
        entry.stored_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", entry.key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM generations ORDER BY created_at, tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation tag: {}", e))?;

    Ok(tags)
  }

  fn has_generation(&self, tag: &str) -> Result<bool> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM generations WHERE tag = ?", params![tag], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", tag, e))?;

    Ok(found.is_some())
  }

  fn put_all(&self, tag: &str, entries: &[CachedEntry]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (tag) VALUES (?)",
      params![tag],
    )
    .map_err(|e| eyre!("Failed to open generation {}: {}", tag, e))?;

    for entry in entries {
      insert_entry(&tx, tag, entry)?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put(&self, tag: &str, entry: &CachedEntry) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: Option<i64> = tx
      .query_row("SELECT 1 FROM generations WHERE tag = ?", params![tag], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", tag, e))?;

    if exists.is_none() {
      return Ok(false);
    }

    insert_entry(&tx, tag, entry)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  fn get(&self, tag: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let row: Option<(String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT request_key, snapshot, stored_at FROM entries
         WHERE tag = ? AND key_hash = ?",
        params![tag, key_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    match row {
      Some((key, data, stored_at)) => {
        let snapshot: Snapshot = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize snapshot for {}: {}", key, e))?;
        let stored_at = parse_datetime(&stored_at)?;
        Ok(Some(CachedEntry {
          key,
          snapshot,
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn keys(&self, tag: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE tag = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![tag], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }

  fn delete_generation(&self, tag: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", tag, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", tag, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
