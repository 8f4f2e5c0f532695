use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use super::rows::{parse_leading_number, Cell, Row};

/// Flat named string parameters of an action.
pub type Params = HashMap<String, String>;

/// Parameter names also accepted under their Italian spelling.
const ALIASES: &[(&str, &str)] = &[
  ("date", "data"),
  ("type", "tipo"),
  ("amount", "importo"),
  ("note", "nota"),
  ("category", "categoria"),
  ("name", "nome"),
  ("new_name", "nuovo_nome"),
];

pub const INVALID_PARAMS: &str = "missing or invalid parameters";

/// Value of a parameter, or `""` when absent.
pub fn param<'a>(params: &'a Params, name: &str) -> &'a str {
  if let Some(value) = params.get(name) {
    return value;
  }
  ALIASES
    .iter()
    .find(|(english, _)| *english == name)
    .and_then(|(_, italian)| params.get(*italian))
    .map(String::as_str)
    .unwrap_or("")
}

/// Id for a new record: the given one, or the current epoch milliseconds.
pub fn record_id(params: &Params) -> String {
  match param(params, "id") {
    "" => Utc::now().timestamp_millis().to_string(),
    id => id.to_string(),
  }
}

fn cell(row: &[Cell], index: usize) -> Cell {
  row.get(index).cloned().unwrap_or(Cell::Empty)
}

/// A dated ledger row stored in its own sheet.
pub trait Record: Serialize + Sized {
  const SHEET: &'static str;
  const HEADER: &'static [&'static str];
  /// Accepted values of the `type` column
  const TYPES: &'static [&'static str];
  /// Listing a missing sheet yields an empty list instead of an error
  const OPTIONAL_SHEET: bool;

  fn from_row(row: &[Cell]) -> Self;

  fn to_row(&self) -> Row;

  /// Build and validate a record from action parameters.
  fn from_params(params: &Params, id: String) -> Result<Self, String>;

  fn id(&self) -> &str;

  fn date(&self) -> &str;

  /// Listing order: newest date first, ties broken by id descending.
  /// Undated rows go last.
  fn listing_order(a: &Self, b: &Self) -> Ordering {
    let date_a = parse_date(a.date());
    let date_b = parse_date(b.date());
    date_b.cmp(&date_a).then_with(|| b.id().cmp(a.id()))
  }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Validated common fields shared by both transaction kinds.
struct Movement<'a> {
  date: &'a str,
  kind: &'a str,
  amount: f64,
  note: &'a str,
}

fn movement<'a>(params: &'a Params, types: &[&str]) -> Result<Movement<'a>, String> {
  let date = param(params, "date");
  let kind = param(params, "type");
  let amount = parse_leading_number(param(params, "amount")).unwrap_or(0.0);

  if date.is_empty() || kind.is_empty() || amount <= 0.0 {
    return Err(INVALID_PARAMS.to_string());
  }
  if !types.contains(&kind) {
    return Err(format!("invalid type '{}'", kind));
  }

  Ok(Movement {
    date,
    kind,
    amount,
    note: param(params, "note"),
  })
}

/// Business cash movement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
  pub id: String,
  pub date: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub amount: f64,
  pub note: String,
}

impl Record for Transaction {
  const SHEET: &'static str = "Movimenti";
  const HEADER: &'static [&'static str] = &["ID", "Data", "Tipo", "Importo (€)", "Nota"];
  const TYPES: &'static [&'static str] = &["incasso", "uscita"];
  const OPTIONAL_SHEET: bool = false;

  fn from_row(row: &[Cell]) -> Self {
    Self {
      id: cell(row, 0).as_string(),
      date: cell(row, 1).as_string(),
      kind: cell(row, 2).as_string(),
      amount: cell(row, 3).as_number().unwrap_or(0.0),
      note: cell(row, 4).as_string(),
    }
  }

  fn to_row(&self) -> Row {
    vec![
      Cell::from(self.id.as_str()),
      Cell::from(self.date.as_str()),
      Cell::from(self.kind.as_str()),
      Cell::Number(self.amount),
      Cell::from(self.note.as_str()),
    ]
  }

  fn from_params(params: &Params, id: String) -> Result<Self, String> {
    let m = movement(params, Self::TYPES)?;
    Ok(Self {
      id,
      date: m.date.to_string(),
      kind: m.kind.to_string(),
      amount: m.amount,
      note: m.note.to_string(),
    })
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn date(&self) -> &str {
    &self.date
  }
}

/// Personal expense or income, filed under a category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonalTransaction {
  pub id: String,
  pub date: String,
  pub category: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub amount: f64,
  pub note: String,
}

impl Record for PersonalTransaction {
  const SHEET: &'static str = "Personale";
  const HEADER: &'static [&'static str] =
    &["ID", "Data", "Categoria", "Tipo", "Importo (€)", "Nota"];
  const TYPES: &'static [&'static str] = &["entrata", "incasso", "uscita"];
  const OPTIONAL_SHEET: bool = true;

  fn from_row(row: &[Cell]) -> Self {
    Self {
      id: cell(row, 0).as_string(),
      date: cell(row, 1).as_string(),
      category: cell(row, 2).as_string(),
      kind: cell(row, 3).as_string(),
      amount: cell(row, 4).as_number().unwrap_or(0.0),
      note: cell(row, 5).as_string(),
    }
  }

  fn to_row(&self) -> Row {
    vec![
      Cell::from(self.id.as_str()),
      Cell::from(self.date.as_str()),
      Cell::from(self.category.as_str()),
      Cell::from(self.kind.as_str()),
      Cell::Number(self.amount),
      Cell::from(self.note.as_str()),
    ]
  }

  fn from_params(params: &Params, id: String) -> Result<Self, String> {
    let category = param(params, "category");
    if category.is_empty() {
      return Err(INVALID_PARAMS.to_string());
    }
    let m = movement(params, Self::TYPES)?;
    Ok(Self {
      id,
      date: m.date.to_string(),
      category: category.to_string(),
      kind: m.kind.to_string(),
      amount: m.amount,
      note: m.note.to_string(),
    })
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn date(&self) -> &str {
    &self.date
  }
}
