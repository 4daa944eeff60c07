// src/ingest.rs
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::cells::{coerce_string, CellValue};
use crate::ledger::LEDGER_HEADERS;
use crate::store::{StoreError, TableStore};
use crate::views::{PayrollViews, RefreshReport, ViewError};

const NAME_COLUMN: usize = 9;

/// Something that can rebuild the report views after the ledger changed.
///
/// The ingestion layer holds an `Option` of this; whether views are refreshed
/// is decided when the service is built.
pub trait ViewRefresher: Send + Sync {
    fn refresh_views(&self, store: &mut dyn TableStore, now: DateTime<Utc>) -> Result<RefreshReport, ViewError>;
}

impl ViewRefresher for PayrollViews {
    fn refresh_views(&self, store: &mut dyn TableStore, now: DateTime<Utc>) -> Result<RefreshReport, ViewError> {
        self.refresh(store, now)
    }
}

// --- Incoming Records ---

/// A record as posted by the badge reader. Fields are loosely typed JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingRecord {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub date: Value,
    #[serde(default)]
    pub emp: Value,
    #[serde(default)]
    pub min_raw: Value,
    #[serde(default)]
    pub min: Value,
    #[serde(default)]
    pub yen_h: Value,
    #[serde(default)]
    pub yen: Value,
    #[serde(default)]
    pub flags: Value,
    /// `None` (absent or null) keeps the name already stored for this id.
    #[serde(default)]
    pub name: Option<Value>,
}

impl IncomingRecord {
    /// Trimmed id; falsy JSON values (`null`, `false`, `0`, `""`) give an empty id.
    pub fn id(&self) -> String {
        loose_text(&self.id).trim().to_string()
    }

    fn to_row(&self, received_at: &str, existing_name: &str) -> Vec<CellValue> {
        let name = match &self.name {
            Some(value) => loose_text(value),
            None => existing_name.to_string(),
        };
        vec![
            CellValue::Text(self.id()),
            to_cell(&self.date),
            to_cell(&self.emp),
            to_number_or_blank(&self.min_raw),
            to_number_or_blank(&self.min),
            to_number_or_blank(&self.yen_h),
            to_number_or_blank(&self.yen),
            flags_to_cell(&self.flags),
            CellValue::text(received_at),
            CellValue::Text(name),
        ]
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn loose_text(value: &Value) -> String {
    if is_falsy(value) {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_number_or_blank(value: &Value) -> CellValue {
    match value {
        Value::Number(n) => n.as_f64().map_or(CellValue::Empty, CellValue::Number),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map_or(CellValue::Empty, CellValue::Number),
        _ => CellValue::Empty,
    }
}

fn to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::String(s) => CellValue::Text(s.clone()),
        Value::Number(n) => n.as_f64().map_or(CellValue::Empty, CellValue::Number),
        Value::Bool(b) => CellValue::text(if *b { "1" } else { "0" }),
        other => CellValue::Text(other.to_string()),
    }
}

fn flags_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::String(s) => CellValue::Text(s.clone()),
        other => CellValue::Text(other.to_string()),
    }
}

/// Stored name cell as the upsert sees it: blanks and zero read as empty.
fn stored_name(cell: Option<&CellValue>) -> String {
    match cell {
        None | Some(CellValue::Empty) => String::new(),
        Some(CellValue::Number(n)) if *n == 0.0 => String::new(),
        Some(other) => other.to_string(),
    }
}

// --- Ledger Writes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Creates the ledger table if needed and rewrites its header row.
pub fn ensure_ledger<S: TableStore + ?Sized>(store: &mut S, table: &str) -> Result<(), StoreError> {
    if !store.has_table(table) {
        info!("Creating ledger table '{}'", table);
        store.create_table(table)?;
    }
    let header: Vec<CellValue> = LEDGER_HEADERS.iter().map(|h| CellValue::text(*h)).collect();
    store.write_range(table, 0, 0, &[header])
}

/// Inserts or replaces ledger rows keyed by record id.
pub fn upsert_records<S: TableStore + ?Sized>(
    store: &mut S,
    table: &str,
    records: &[IncomingRecord],
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, StoreError> {
    ensure_ledger(store, table)?;
    let mut outcome = UpsertOutcome::default();
    if records.is_empty() {
        return Ok(outcome);
    }

    let mut grid = store.read_all(table)?;
    let mut id_to_row: HashMap<String, usize> = HashMap::new();
    for (i, row) in grid.iter().enumerate().skip(1) {
        let id = row.first().map(coerce_string).unwrap_or_default();
        if !id.is_empty() {
            id_to_row.insert(id, i);
        }
    }

    let received_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut appended: Vec<Vec<CellValue>> = Vec::new();
    let mut pending: HashMap<String, usize> = HashMap::new();

    for record in records {
        let id = record.id();
        if id.is_empty() {
            outcome.skipped += 1;
            continue;
        }

        if let Some(&row) = id_to_row.get(&id) {
            let existing = stored_name(grid[row].get(NAME_COLUMN));
            let new_row = record.to_row(&received_at, &existing);
            store.write_range(table, row, 0, std::slice::from_ref(&new_row))?;
            grid[row] = new_row;
            outcome.updated += 1;
        } else if let Some(&slot) = pending.get(&id) {
            let existing = stored_name(appended[slot].get(NAME_COLUMN));
            appended[slot] = record.to_row(&received_at, &existing);
            outcome.updated += 1;
        } else {
            pending.insert(id, appended.len());
            appended.push(record.to_row(&received_at, ""));
            outcome.inserted += 1;
        }
    }

    if !appended.is_empty() {
        let next_row = store.last_row(table)?;
        store.write_range(table, next_row, 0, &appended)?;
    }

    info!(
        "Ledger upsert: {} inserted, {} updated, {} skipped",
        outcome.inserted, outcome.updated, outcome.skipped
    );
    Ok(outcome)
}

/// Blanks every data row of the ledger, keeping the header. Returns the cleared row count.
pub fn clear_ledger<S: TableStore + ?Sized>(store: &mut S, table: &str) -> Result<usize, StoreError> {
    ensure_ledger(store, table)?;
    let last = store.last_row(table)?;
    if last <= 1 {
        return Ok(0);
    }
    store.clear_range(table, 1, 0, last - 1, LEDGER_HEADERS.len())?;
    debug!("Cleared {} ledger rows", last - 1);
    Ok(last - 1)
}

// --- Request Payloads ---

#[derive(Debug, Clone)]
pub enum IngestRequest {
    Clear,
    Upsert(Vec<IncomingRecord>),
}

impl IngestRequest {
    /// Reads a posted body: an array of records, `{"records": [...]}`, or
    /// `{"op": "clear"}` (`action` is accepted as an alias of `op`).
    pub fn from_json(body: &Value) -> Self {
        if let Value::Object(map) = body {
            let op = map
                .get("op")
                .filter(|v| !is_falsy(v))
                .or_else(|| map.get("action"))
                .map(loose_text)
                .unwrap_or_default();
            if op.trim().eq_ignore_ascii_case("clear") {
                return IngestRequest::Clear;
            }
        }

        let items = match body {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("records") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        IngestRequest::Upsert(
            items
                .iter()
                .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
                .collect(),
        )
    }
}
