// src/views.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::{detail_rows, summary_rows};
use crate::cells::CellValue;
use crate::config::ViewConfig;
use crate::ledger::read_ledger;
use crate::period::{
    detail_employees, employee_table_base, name_map, pick_unique_table_name, union_employees,
    PeriodKey,
};
use crate::store::{StoreError, TableStore};

// --- Table Names ---

pub const SUMMARY_CURRENT_TABLE: &str = "Summary_ThisMonth";
pub const SUMMARY_PREVIOUS_TABLE: &str = "Summary_PrevMonth";
pub const DETAIL_CURRENT_SUFFIX: &str = "ThisMonth";
pub const DETAIL_PREVIOUS_SUFFIX: &str = "PrevMonth";

// Names used before the tables were renamed; migrated on every refresh.
pub const LEGACY_SUMMARY_CURRENT: &str = "summary_this";
pub const LEGACY_SUMMARY_PREVIOUS: &str = "summary_prev";

fn legacy_detail_current(emp: &str) -> String {
    format!("{}_this", emp)
}

fn legacy_detail_previous(emp: &str) -> String {
    format!("{}_prev", emp)
}

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("Ledger table not found: {0}")]
    LedgerNotFound(String),
    #[error("Ledger is missing required column: {0}")]
    MissingColumn(String),
    #[error("Table store error: {0}")]
    Store(#[from] StoreError),
}

// --- Materializer ---

/// Column widths and number formats applied after a table is written.
#[derive(Debug, Clone, Copy)]
pub struct TableLayout {
    pub columns: usize,
    pub widths: &'static [u32],
    /// `(column, pattern)` applied to every data row.
    pub number_formats: &'static [(usize, &'static str)],
}

pub const SUMMARY_LAYOUT: TableLayout = TableLayout {
    columns: 8,
    widths: &[90, 140, 90, 90, 90, 110, 90, 240],
    number_formats: &[(3, "0"), (4, "0.00"), (5, "0"), (6, "0")],
};

pub const DETAIL_LAYOUT: TableLayout = TableLayout {
    columns: 8,
    widths: &[110, 90, 140, 90, 90, 90, 110, 260],
    number_formats: &[(3, "0"), (4, "0"), (5, "0"), (6, "0")],
};

/// Replaces a table's content with `rows` (first row is the header).
///
/// Empty `rows` leaves the table cleared without even a header row; widths are
/// still applied.
pub fn materialize<S: TableStore + ?Sized>(
    store: &mut S,
    name: &str,
    rows: &[Vec<CellValue>],
    layout: &TableLayout,
) -> Result<(), StoreError> {
    if !store.has_table(name) {
        store.create_table(name)?;
    }
    store.clear(name)?;

    if !rows.is_empty() {
        let grid: Vec<_> = rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.resize(layout.columns, CellValue::Empty);
                row
            })
            .collect();
        store.write_range(name, 0, 0, &grid)?;
        store.set_frozen_rows(name, 1)?;
        store.set_row_bold(name, 0)?;
    }

    for (col, width) in layout.widths.iter().enumerate() {
        store.set_column_width(name, col, *width)?;
    }

    let last = store.last_row(name)?;
    if last > 1 {
        for (col, pattern) in layout.number_formats {
            store.set_number_format(name, *col, 1, last - 1, pattern)?;
        }
    }
    debug!("Materialized table '{}' with {} rows", name, rows.len());
    Ok(())
}

/// Renames `legacy` to `canonical` unless `canonical` already exists.
fn migrate_table_name<S: TableStore + ?Sized>(store: &mut S, legacy: &str, canonical: &str) -> Result<(), StoreError> {
    if store.has_table(canonical) || !store.has_table(legacy) {
        return Ok(());
    }
    info!("Renaming legacy table '{}' to '{}'", legacy, canonical);
    store.rename_table(legacy, canonical)
}

/// Puts `leading` first, then every other table in its current order, then the ledger.
fn reorder_tables<S: TableStore + ?Sized>(store: &mut S, leading: &[String], raw: &str) -> Result<(), StoreError> {
    let wanted: HashSet<&str> = leading
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(raw))
        .collect();
    let existing = store.table_names();

    let mut order: Vec<String> = leading
        .iter()
        .filter(|name| existing.contains(name))
        .cloned()
        .collect();
    order.extend(
        existing
            .iter()
            .filter(|name| !wanted.contains(name.as_str()))
            .cloned(),
    );
    if existing.iter().any(|name| name == raw) {
        order.push(raw.to_string());
    }

    for (position, name) in order.iter().enumerate() {
        store.move_table(name, position)?;
    }
    Ok(())
}

// --- Orchestrator ---

/// Outcome of one refresh: the two periods and the final table order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshReport {
    pub current: String,
    pub previous: String,
    pub records: usize,
    pub tables: Vec<String>,
}

/// Rebuilds every report table from the raw ledger.
#[derive(Debug, Clone)]
pub struct PayrollViews {
    config: ViewConfig,
}

impl PayrollViews {
    pub fn new(config: ViewConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Runs one full refresh for the month containing `now` and the month before it.
    ///
    /// Tables are written one at a time. An error aborts the pass and leaves
    /// earlier tables already rewritten.
    pub fn refresh<S: TableStore + ?Sized>(&self, store: &mut S, now: DateTime<Utc>) -> Result<RefreshReport, ViewError> {
        let raw = self.config.raw_table.as_str();
        let labels = &self.config.labels;
        if !store.has_table(raw) {
            return Err(ViewError::LedgerNotFound(raw.to_string()));
        }
        let records = read_ledger(&store.read_all(raw)?)?;

        let current = PeriodKey::from_instant(now);
        let previous = current.previous();
        info!(
            "Refreshing payroll views for {} and {} from {} ledger records",
            current,
            previous,
            records.len()
        );

        let emps = union_employees(&records, current, previous);
        let mut names = name_map(&records, current, previous);
        let detail_emps = detail_employees(&emps, labels);

        migrate_table_name(store, LEGACY_SUMMARY_CURRENT, SUMMARY_CURRENT_TABLE)?;
        migrate_table_name(store, LEGACY_SUMMARY_PREVIOUS, SUMMARY_PREVIOUS_TABLE)?;

        let rows = summary_rows(&records, current, &emps, &mut names, labels);
        materialize(store, SUMMARY_CURRENT_TABLE, &rows, &SUMMARY_LAYOUT)?;
        let rows = summary_rows(&records, previous, &emps, &mut names, labels);
        materialize(store, SUMMARY_PREVIOUS_TABLE, &rows, &SUMMARY_LAYOUT)?;

        let mut used: HashSet<String> = [SUMMARY_CURRENT_TABLE, SUMMARY_PREVIOUS_TABLE]
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut order = vec![
            SUMMARY_CURRENT_TABLE.to_string(),
            SUMMARY_PREVIOUS_TABLE.to_string(),
        ];

        for emp in &detail_emps {
            let base = employee_table_base(emp, names.get(emp).map(String::as_str), labels);
            let current_table = pick_unique_table_name(
                &mut used,
                &format!("{}_{}", base, DETAIL_CURRENT_SUFFIX),
                emp,
            );
            let previous_table = pick_unique_table_name(
                &mut used,
                &format!("{}_{}", base, DETAIL_PREVIOUS_SUFFIX),
                emp,
            );

            migrate_table_name(store, &legacy_detail_current(emp), &current_table)?;
            migrate_table_name(store, &legacy_detail_previous(emp), &previous_table)?;

            let rows = detail_rows(&records, current, emp, &names, labels);
            materialize(store, &current_table, &rows, &DETAIL_LAYOUT)?;
            let rows = detail_rows(&records, previous, emp, &names, labels);
            materialize(store, &previous_table, &rows, &DETAIL_LAYOUT)?;

            order.push(current_table);
            order.push(previous_table);
        }

        reorder_tables(store, &order, raw)?;

        let report = RefreshReport {
            current: current.to_string(),
            previous: previous.to_string(),
            records: records.len(),
            tables: store.table_names(),
        };
        info!(
            "Payroll views refreshed: {} employees, {} tables",
            detail_emps.len(),
            report.tables.len()
        );
        Ok(report)
    }
}
