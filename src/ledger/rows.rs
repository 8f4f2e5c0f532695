//! Row store boundary: named sheets of rows, addressed by row index.
//!
//! Index 0 of every sheet is its header row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// A single spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
  Empty,
  Text(String),
  Number(f64),
  Date(NaiveDate),
}

pub type Row = Vec<Cell>;

impl Cell {
  pub fn is_empty(&self) -> bool {
    match self {
      Cell::Empty => true,
      Cell::Text(s) => s.is_empty(),
      _ => false,
    }
  }

  /// Display form of the cell. Dates render as `YYYY-MM-DD`.
  pub fn as_string(&self) -> String {
    match self {
      Cell::Empty => String::new(),
      Cell::Text(s) => s.clone(),
      Cell::Number(n) => n.to_string(),
      Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
    }
  }

  /// Numeric value, parsing text cells leniently (leading number wins).
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Cell::Number(n) => Some(*n),
      Cell::Text(s) => parse_leading_number(s),
      _ => None,
    }
  }
}

impl From<&str> for Cell {
  fn from(value: &str) -> Self {
    Cell::Text(value.to_string())
  }
}

impl From<String> for Cell {
  fn from(value: String) -> Self {
    Cell::Text(value)
  }
}

impl From<f64> for Cell {
  fn from(value: f64) -> Self {
    Cell::Number(value)
  }
}

/// Parse the longest numeric prefix of `input`, e.g. `"12.5 EUR"` -> 12.5.
/// Returns `None` when the input does not start with a number.
pub fn parse_leading_number(input: &str) -> Option<f64> {
  let s = input.trim_start();
  let bytes = s.as_bytes();
  let mut end = 0;

  if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
    end += 1;
  }
  let int_start = end;
  while end < bytes.len() && bytes[end].is_ascii_digit() {
    end += 1;
  }
  let mut digits = end - int_start;
  if end < bytes.len() && bytes[end] == b'.' {
    let frac_start = end + 1;
    let mut frac_end = frac_start;
    while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
      frac_end += 1;
    }
    if digits > 0 || frac_end > frac_start {
      digits += frac_end - frac_start;
      end = frac_end;
    }
  }
  if digits == 0 {
    return None;
  }

  // Optional exponent, only if well formed
  if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
    let mut exp_end = end + 1;
    if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
      exp_end += 1;
    }
    let exp_digits = exp_end;
    while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
      exp_end += 1;
    }
    if exp_end > exp_digits {
      end = exp_end;
    }
  }

  s[..end].parse().ok()
}

/// Tabular storage the ledger reads and mutates.
pub trait RowStore: Send + Sync {
  /// All rows of a sheet including the header, or `None` if the sheet does
  /// not exist.
  fn rows(&self, sheet: &str) -> Result<Option<Vec<Row>>>;

  /// Create the sheet if missing and write its header row. Returns whether
  /// the sheet was newly created.
  fn create_sheet(&self, sheet: &str, header: &[&str]) -> Result<bool>;

  fn append(&self, sheet: &str, row: Row) -> Result<()>;

  fn update(&self, sheet: &str, index: usize, row: Row) -> Result<()>;

  fn delete(&self, sheet: &str, index: usize) -> Result<()>;
}

fn header_row(header: &[&str]) -> Row {
  header.iter().map(|h| Cell::from(*h)).collect()
}

/// Row store kept in memory.
#[derive(Default)]
pub struct MemoryRowStore {
  sheets: Mutex<HashMap<String, Vec<Row>>>,
}

impl MemoryRowStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_sheet<T>(&self, sheet: &str, f: impl FnOnce(&mut Vec<Row>) -> Result<T>) -> Result<T> {
    let mut sheets = self.sheets.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let rows = sheets
      .get_mut(sheet)
      .ok_or_else(|| eyre!("Sheet '{}' not found", sheet))?;
    f(rows)
  }
}

impl RowStore for MemoryRowStore {
  fn rows(&self, sheet: &str) -> Result<Option<Vec<Row>>> {
    let sheets = self.sheets.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(sheets.get(sheet).cloned())
  }

  fn create_sheet(&self, sheet: &str, header: &[&str]) -> Result<bool> {
    let mut sheets = self.sheets.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let created = !sheets.contains_key(sheet);
    let rows = sheets.entry(sheet.to_string()).or_default();
    match rows.first_mut() {
      Some(first) => *first = header_row(header),
      None => rows.push(header_row(header)),
    }
    Ok(created)
  }

  fn append(&self, sheet: &str, row: Row) -> Result<()> {
    self.with_sheet(sheet, |rows| {
      rows.push(row);
      Ok(())
    })
  }

  fn update(&self, sheet: &str, index: usize, row: Row) -> Result<()> {
    self.with_sheet(sheet, |rows| {
      let slot = rows
        .get_mut(index)
        .ok_or_else(|| eyre!("Row {} out of range in sheet '{}'", index, sheet))?;
      *slot = row;
      Ok(())
    })
  }

  fn delete(&self, sheet: &str, index: usize) -> Result<()> {
    self.with_sheet(sheet, |rows| {
      if index >= rows.len() {
        return Err(eyre!("Row {} out of range in sheet '{}'", index, sheet));
      }
      rows.remove(index);
      Ok(())
    })
  }
}

/// Row store backed by SQLite. Row order is insertion order.
pub struct SqliteRowStore {
  conn: Mutex<Connection>,
}

const ROWS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sheets (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS sheet_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sheet TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sheet_rows_sheet ON sheet_rows(sheet, id);
"#;

impl SqliteRowStore {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create ledger directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open ledger database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory ledger database: {}", e))?;
    Self::with_connection(conn)
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cassa").join("ledger.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(ROWS_SCHEMA)
      .map_err(|e| eyre!("Failed to run ledger migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn sheet_exists(conn: &Connection, sheet: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row("SELECT 1 FROM sheets WHERE name = ?", params![sheet], |row| row.get(0))
    .optional()
    .map_err(|e| eyre!("Failed to look up sheet '{}': {}", sheet, e))?;
  Ok(found.is_some())
}

fn require_sheet(conn: &Connection, sheet: &str) -> Result<()> {
  if sheet_exists(conn, sheet)? {
    Ok(())
  } else {
    Err(eyre!("Sheet '{}' not found", sheet))
  }
}

/// Storage id of the row at `index` within a sheet.
fn row_id(conn: &Connection, sheet: &str, index: usize) -> Result<Option<i64>> {
  conn
    .query_row(
      "SELECT id FROM sheet_rows WHERE sheet = ? ORDER BY id LIMIT 1 OFFSET ?",
      params![sheet, index as i64],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to locate row {} in sheet '{}': {}", index, sheet, e))
}

fn encode_row(row: &Row) -> Result<String> {
  serde_json::to_string(row).map_err(|e| eyre!("Failed to serialize row: {}", e))
}

impl RowStore for SqliteRowStore {
  fn rows(&self, sheet: &str) -> Result<Option<Vec<Row>>> {
    let conn = self.lock()?;
    if !sheet_exists(&conn, sheet)? {
      return Ok(None);
    }

    let mut stmt = conn
      .prepare("SELECT data FROM sheet_rows WHERE sheet = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let encoded = stmt
      .query_map(params![sheet], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query rows: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read row: {}", e))?;

    let rows = encoded
      .iter()
      .map(|data| {
        serde_json::from_str(data).map_err(|e| eyre!("Failed to deserialize row: {}", e))
      })
      .collect::<Result<Vec<Row>>>()?;

    Ok(Some(rows))
  }

  fn create_sheet(&self, sheet: &str, header: &[&str]) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let created = !sheet_exists(&tx, sheet)?;
    if created {
      tx.execute("INSERT INTO sheets (name) VALUES (?)", params![sheet])
        .map_err(|e| eyre!("Failed to create sheet '{}': {}", sheet, e))?;
    }

    let data = encode_row(&header_row(header))?;
    let written = match row_id(&tx, sheet, 0)? {
      Some(id) => tx.execute("UPDATE sheet_rows SET data = ? WHERE id = ?", params![data, id]),
      None => tx.execute(
        "INSERT INTO sheet_rows (sheet, data) VALUES (?, ?)",
        params![sheet, data],
      ),
    };
    written.map_err(|e| eyre!("Failed to write header of sheet '{}': {}", sheet, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(created)
  }

  fn append(&self, sheet: &str, row: Row) -> Result<()> {
    let conn = self.lock()?;
    require_sheet(&conn, sheet)?;
    conn
      .execute(
        "INSERT INTO sheet_rows (sheet, data) VALUES (?, ?)",
        params![sheet, encode_row(&row)?],
      )
      .map_err(|e| eyre!("Failed to append row to sheet '{}': {}", sheet, e))?;
    Ok(())
  }

  fn update(&self, sheet: &str, index: usize, row: Row) -> Result<()> {
    let conn = self.lock()?;
    require_sheet(&conn, sheet)?;
    let id = row_id(&conn, sheet, index)?
      .ok_or_else(|| eyre!("Row {} out of range in sheet '{}'", index, sheet))?;
    conn
      .execute(
        "UPDATE sheet_rows SET data = ? WHERE id = ?",
        params![encode_row(&row)?, id],
      )
      .map_err(|e| eyre!("Failed to update row {} in sheet '{}': {}", index, sheet, e))?;
    Ok(())
  }

  fn delete(&self, sheet: &str, index: usize) -> Result<()> {
    let conn = self.lock()?;
    require_sheet(&conn, sheet)?;
    let id = row_id(&conn, sheet, index)?
      .ok_or_else(|| eyre!("Row {} out of range in sheet '{}'", index, sheet))?;
    conn
      .execute("DELETE FROM sheet_rows WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete row {} in sheet '{}': {}", index, sheet, e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise_store(store: &dyn RowStore) {
    assert!(store.rows("Movimenti").unwrap().is_none());
    assert!(store.append("Movimenti", vec![Cell::from("x")]).is_err());

    assert!(store.create_sheet("Movimenti", &["ID", "Nota"]).unwrap());
    store.append("Movimenti", vec![Cell::from("1"), Cell::from("a")]).unwrap();
    store.append("Movimenti", vec![Cell::from("2"), Cell::from("b")]).unwrap();
    store.append("Movimenti", vec![Cell::from("3"), Cell::from("c")]).unwrap();

    store.update("Movimenti", 2, vec![Cell::from("2"), Cell::from("B")]).unwrap();
    store.delete("Movimenti", 1).unwrap();
    assert!(store.delete("Movimenti", 9).is_err());

    // Re-running setup keeps the data and rewrites the header
    assert!(!store.create_sheet("Movimenti", &["ID", "Note"]).unwrap());

    let rows = store.rows("Movimenti").unwrap().unwrap();
    assert_eq!(
      rows,
      vec![
        vec![Cell::from("ID"), Cell::from("Note")],
        vec![Cell::from("2"), Cell::from("B")],
        vec![Cell::from("3"), Cell::from("c")],
      ]
    );
  }

  #[test]
  fn test_memory_row_store() {
    exercise_store(&MemoryRowStore::new());
  }

  #[test]
  fn test_sqlite_row_store() {
    exercise_store(&SqliteRowStore::in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_keeps_cell_types() {
    let store = SqliteRowStore::in_memory().unwrap();
    store.create_sheet("Personale", &["ID"]).unwrap();
    let row = vec![
      Cell::from("1"),
      Cell::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()),
      Cell::Number(12.5),
      Cell::Empty,
    ];
    store.append("Personale", row.clone()).unwrap();
    assert_eq!(store.rows("Personale").unwrap().unwrap()[1], row);
  }

  #[test]
  fn test_cell_rendering() {
    assert_eq!(Cell::Number(12.0).as_string(), "12");
    assert_eq!(Cell::Number(0.1).as_string(), "0.1");
    assert_eq!(
      Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()).as_string(),
      "2024-01-05"
    );
    assert!(Cell::from("").is_empty());
    assert!(!Cell::Number(0.0).is_empty());
  }

  #[test]
  fn test_parse_leading_number() {
    assert_eq!(parse_leading_number("12.5"), Some(12.5));
    assert_eq!(parse_leading_number("  7 EUR"), Some(7.0));
    assert_eq!(parse_leading_number("12,50"), Some(12.0));
    assert_eq!(parse_leading_number(".5"), Some(0.5));
    assert_eq!(parse_leading_number("-3"), Some(-3.0));
    assert_eq!(parse_leading_number("1e3x"), Some(1000.0));
    assert_eq!(parse_leading_number("1e"), Some(1.0));
    assert_eq!(parse_leading_number("abc"), None);
    assert_eq!(parse_leading_number(""), None);
    assert_eq!(parse_leading_number("-"), None);
  }
}
