// src/ledger.rs
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::cells::{coerce_flags, coerce_int, coerce_string, CellValue, FlagSet};
use crate::views::ViewError;

/// Column order of the raw ledger table as written by the ingestion endpoint.
pub const LEDGER_HEADERS: [&str; 10] = [
    "id",
    "date",
    "emp",
    "min_raw",
    "min",
    "yen_h",
    "yen",
    "flags",
    "received_at",
    "name",
];

/// Columns a ledger must carry for the views to be built.
pub const REQUIRED_COLUMNS: [&str; 8] = ["id", "date", "emp", "min_raw", "min", "yen_h", "yen", "flags"];

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// One ingested clock event, reconstructed from a ledger row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerRecord {
    pub id: String,
    pub date: String,
    pub emp: String,
    pub min_raw: i64,
    pub min: i64,
    pub yen_h: i64,
    pub yen: i64,
    pub flags: FlagSet,
    pub received_at: String,
    pub name: String,
}

// Header name -> column index. Later duplicates win.
struct ColumnIndex(HashMap<String, usize>);

impl ColumnIndex {
    fn from_header(header: &[CellValue]) -> Self {
        let mut map = HashMap::new();
        for (i, cell) in header.iter().enumerate() {
            let key = coerce_string(cell);
            if !key.is_empty() {
                map.insert(key, i);
            }
        }
        Self(map)
    }

    fn get(&self, column: &str) -> Option<usize> {
        self.0.get(column).copied()
    }

    fn require(&self, column: &str) -> Result<usize, ViewError> {
        self.get(column)
            .ok_or_else(|| ViewError::MissingColumn(column.to_string()))
    }
}

struct RequiredColumns {
    id: usize,
    date: usize,
    emp: usize,
    min_raw: usize,
    min: usize,
    yen_h: usize,
    yen: usize,
    flags: usize,
}

fn cell(row: &[CellValue], column: usize) -> &CellValue {
    static EMPTY: CellValue = CellValue::Empty;
    row.get(column).unwrap_or(&EMPTY)
}

/// Reconstructs ledger records from a grid whose first row is the header.
///
/// Fails only when a required column is missing. Rows with a blank id are
/// skipped. Records come back in row order.
pub fn read_ledger(grid: &[Vec<CellValue>]) -> Result<Vec<LedgerRecord>, ViewError> {
    if grid.len() < 2 {
        return Ok(Vec::new());
    }

    let index = ColumnIndex::from_header(&grid[0]);
    // Checked in REQUIRED_COLUMNS order so the first missing one is reported.
    let cols = RequiredColumns {
        id: index.require("id")?,
        date: index.require("date")?,
        emp: index.require("emp")?,
        min_raw: index.require("min_raw")?,
        min: index.require("min")?,
        yen_h: index.require("yen_h")?,
        yen: index.require("yen")?,
        flags: index.require("flags")?,
    };
    let received_col = index.get("received_at");
    let name_col = index.get("name");

    let mut records = Vec::with_capacity(grid.len() - 1);
    let mut skipped = 0usize;
    for row in &grid[1..] {
        let id = coerce_string(cell(row, cols.id));
        if id.is_empty() {
            skipped += 1;
            continue;
        }

        let received_at = received_col
            .map(|c| coerce_string(cell(row, c)))
            .unwrap_or_default();
        let mut date = coerce_string(cell(row, cols.date));
        if date.is_empty() {
            if let Some(prefix) = received_at.get(..10) {
                if ISO_DATE.is_match(prefix) {
                    date = prefix.to_string();
                }
            }
        }

        records.push(LedgerRecord {
            id,
            date,
            emp: coerce_string(cell(row, cols.emp)),
            min_raw: coerce_int(cell(row, cols.min_raw)),
            min: coerce_int(cell(row, cols.min)),
            yen_h: coerce_int(cell(row, cols.yen_h)),
            yen: coerce_int(cell(row, cols.yen)),
            flags: coerce_flags(cell(row, cols.flags)),
            received_at,
            name: name_col
                .map(|c| coerce_string(cell(row, c)))
                .unwrap_or_default(),
        });
    }

    debug!(
        "Read {} ledger records ({} blank-id rows skipped)",
        records.len(),
        skipped
    );
    Ok(records)
}
