//! Ledger actions over a row store.
//!
//! Every action catches its own failures and reports them in the returned
//! [`ApiResponse`] instead of propagating them.

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

use super::records::{param, record_id, Params, PersonalTransaction, Record, Transaction};
use super::response::ApiResponse;
use super::rows::{Cell, RowStore};

pub const CATEGORY_SHEET: &str = "Categorie";
const CATEGORY_HEADER: &[&str] = &["Categoria"];
const NOT_FOUND: &str = "record not found";

/// Categories seeded into a fresh category sheet.
pub const DEFAULT_CATEGORIES: &[&str] = &[
  "Abbigliamento",
  "Assicurazione Vita",
  "Auto",
  "Casa",
  "Camper",
  "Cane",
  "Cerimonie",
  "Cultura",
  "Fotografia",
  "Informatica",
  "Senza Categoria",
  "Moto",
  "Multe",
  "Regali",
  "Ristorante / Asporti / Bar",
  "Salute",
  "Spesa Cibo",
  "Sport",
  "Viaggi",
];

pub struct LedgerService<R: RowStore> {
  store: R,
}

fn report(action: &str, result: Result<ApiResponse>) -> ApiResponse {
  match result {
    Ok(response) => response,
    Err(e) => {
      warn!("Ledger action {} failed: {}", action, e);
      ApiResponse::failure(e.to_string())
    }
  }
}

fn setup_hint(sheet: &str) -> String {
  let setup = if sheet == CATEGORY_SHEET {
    "setup_categories"
  } else if sheet == PersonalTransaction::SHEET {
    "setup_personal"
  } else {
    "setup_transactions"
  };
  format!("sheet '{}' not found, run {} first", sheet, setup)
}

impl<R: RowStore> LedgerService<R> {
  pub fn new(store: R) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &R {
    &self.store
  }

  // ==========================================================================
  // Setup
  // ==========================================================================

  pub fn setup_transactions(&self) -> Result<()> {
    self.setup::<Transaction>()
  }

  pub fn setup_personal(&self) -> Result<()> {
    self.setup::<PersonalTransaction>()
  }

  /// Create the category sheet and seed the default categories if it has
  /// no entries yet.
  pub fn setup_categories(&self) -> Result<()> {
    self.store.create_sheet(CATEGORY_SHEET, CATEGORY_HEADER)?;
    let rows = self.store.rows(CATEGORY_SHEET)?.unwrap_or_default();
    if rows.len() <= 1 {
      for name in DEFAULT_CATEGORIES {
        self.store.append(CATEGORY_SHEET, vec![Cell::from(*name)])?;
      }
      info!("Seeded {} default categories", DEFAULT_CATEGORIES.len());
    }
    Ok(())
  }

  fn setup<T: Record>(&self) -> Result<()> {
    if self.store.create_sheet(T::SHEET, T::HEADER)? {
      info!("Created sheet {}", T::SHEET);
    } else {
      debug!("Sheet {} already exists, header refreshed", T::SHEET);
    }
    Ok(())
  }

  // ==========================================================================
  // Transactions
  // ==========================================================================

  pub fn get_transactions(&self) -> ApiResponse {
    report("get", self.list::<Transaction>())
  }

  pub fn add_transaction(&self, params: &Params) -> ApiResponse {
    report("add", self.add::<Transaction>(params))
  }

  pub fn modifica_transaction(&self, params: &Params) -> ApiResponse {
    report("modifica", self.modify::<Transaction>(params))
  }

  pub fn elimina_transaction(&self, params: &Params) -> ApiResponse {
    report("elimina", self.remove::<Transaction>(params))
  }

  // ==========================================================================
  // Personal transactions
  // ==========================================================================

  pub fn get_personal(&self) -> ApiResponse {
    report("get_personal", self.list::<PersonalTransaction>())
  }

  pub fn add_personal(&self, params: &Params) -> ApiResponse {
    report("add_personal", self.add::<PersonalTransaction>(params))
  }

  pub fn modifica_personal(&self, params: &Params) -> ApiResponse {
    report("modifica_personal", self.modify::<PersonalTransaction>(params))
  }

  pub fn elimina_personal(&self, params: &Params) -> ApiResponse {
    report("elimina_personal", self.remove::<PersonalTransaction>(params))
  }

  // ==========================================================================
  // Categories
  // ==========================================================================

  pub fn get_categories(&self) -> ApiResponse {
    report("get_categorie", self.list_categories())
  }

  pub fn add_category(&self, params: &Params) -> ApiResponse {
    report("add_categoria", self.insert_category(params))
  }

  pub fn modifica_category(&self, params: &Params) -> ApiResponse {
    report("modifica_categoria", self.rename_category(params))
  }

  pub fn elimina_category(&self, params: &Params) -> ApiResponse {
    report("del_categoria", self.remove_category(params))
  }

  // ==========================================================================
  // Generic record actions
  // ==========================================================================

  fn list<T: Record>(&self) -> Result<ApiResponse> {
    let rows = match self.store.rows(T::SHEET)? {
      Some(rows) => rows,
      None if T::OPTIONAL_SHEET => return Ok(ApiResponse::with_data(&Vec::<T>::new())),
      None => return Err(eyre!(setup_hint(T::SHEET))),
    };

    let mut records: Vec<T> = rows
      .iter()
      .skip(1)
      .filter(|row| row.first().map(|id| !id.is_empty()).unwrap_or(false))
      .map(|row| T::from_row(row))
      .collect();
    records.sort_by(T::listing_order);

    Ok(ApiResponse::with_data(&records))
  }

  fn add<T: Record>(&self, params: &Params) -> Result<ApiResponse> {
    let record = match T::from_params(params, record_id(params)) {
      Ok(record) => record,
      Err(message) => return Ok(ApiResponse::failure(message)),
    };

    if self.store.rows(T::SHEET)?.is_none() {
      return Ok(ApiResponse::failure(setup_hint(T::SHEET)));
    }

    self.store.append(T::SHEET, record.to_row())?;
    debug!("Added {} to {}", record.id(), T::SHEET);
    Ok(ApiResponse::with_id(record.id()))
  }

  /// Index of the data row whose first cell matches `pred`.
  fn find_row(&self, sheet: &str, pred: impl Fn(&Cell) -> bool) -> Result<Option<usize>> {
    let rows = self
      .store
      .rows(sheet)?
      .ok_or_else(|| eyre!(setup_hint(sheet)))?;

    Ok(
      rows
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, row)| row.first().map(&pred).unwrap_or(false))
        .map(|(index, _)| index),
    )
  }

  fn modify<T: Record>(&self, params: &Params) -> Result<ApiResponse> {
    let id = param(params, "id");
    if id.is_empty() {
      return Ok(ApiResponse::failure("missing id"));
    }
    let record = match T::from_params(params, id.to_string()) {
      Ok(record) => record,
      Err(message) => return Ok(ApiResponse::failure(message)),
    };

    match self.find_row(T::SHEET, |cell| cell.as_string() == id)? {
      Some(index) => {
        self.store.update(T::SHEET, index, record.to_row())?;
        debug!("Updated {} in {}", id, T::SHEET);
        Ok(ApiResponse::ok())
      }
      None => Ok(ApiResponse::failure(NOT_FOUND)),
    }
  }

  fn remove<T: Record>(&self, params: &Params) -> Result<ApiResponse> {
    let id = param(params, "id");
    if id.is_empty() {
      return Ok(ApiResponse::failure("missing id"));
    }

    match self.find_row(T::SHEET, |cell| cell.as_string() == id)? {
      Some(index) => {
        self.store.delete(T::SHEET, index)?;
        debug!("Deleted {} from {}", id, T::SHEET);
        Ok(ApiResponse::ok())
      }
      None => Ok(ApiResponse::failure(NOT_FOUND)),
    }
  }

  // ==========================================================================
  // Category actions
  // ==========================================================================

  fn list_categories(&self) -> Result<ApiResponse> {
    let names: Vec<String> = match self.store.rows(CATEGORY_SHEET)? {
      Some(rows) => rows
        .iter()
        .skip(1)
        .filter_map(|row| row.first().map(Cell::as_string))
        .filter(|name| !name.is_empty())
        .collect(),
      None => Vec::new(),
    };
    Ok(ApiResponse::with_data(&names))
  }

  fn insert_category(&self, params: &Params) -> Result<ApiResponse> {
    let name = param(params, "name").trim();
    if name.is_empty() {
      return Ok(ApiResponse::failure("empty name"));
    }
    if self.store.rows(CATEGORY_SHEET)?.is_none() {
      return Ok(ApiResponse::failure(setup_hint(CATEGORY_SHEET)));
    }

    self.store.append(CATEGORY_SHEET, vec![Cell::from(name)])?;
    Ok(ApiResponse::ok())
  }

  fn rename_category(&self, params: &Params) -> Result<ApiResponse> {
    let name = param(params, "name").trim();
    let new_name = param(params, "new_name").trim();
    if name.is_empty() || new_name.is_empty() {
      return Ok(ApiResponse::failure("empty name"));
    }

    match self.find_row(CATEGORY_SHEET, |cell| cell.as_string().trim() == name)? {
      Some(index) => {
        self
          .store
          .update(CATEGORY_SHEET, index, vec![Cell::from(new_name)])?;
        Ok(ApiResponse::ok())
      }
      None => Ok(ApiResponse::failure("category not found")),
    }
  }

  fn remove_category(&self, params: &Params) -> Result<ApiResponse> {
    let name = param(params, "name").trim();
    if name.is_empty() {
      return Ok(ApiResponse::failure("empty name"));
    }

    match self.find_row(CATEGORY_SHEET, |cell| cell.as_string().trim() == name)? {
      Some(index) => {
        self.store.delete(CATEGORY_SHEET, index)?;
        Ok(ApiResponse::ok())
      }
      None => Ok(ApiResponse::failure("category not found")),
    }
  }
}
