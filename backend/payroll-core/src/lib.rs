// src/lib.rs
//! Payroll report views for NFC time-clock records.
//!
//! The badge reader posts records that are upserted into a raw ledger table;
//! every change then rebuilds the monthly summary tables and the per-employee
//! detail tables from that ledger.

pub mod aggregate;
pub mod cells;
pub mod config;
pub mod ingest;
pub mod ledger;
pub mod payroll;
pub mod period;
pub mod server;
pub mod store;
pub mod views;

#[cfg(test)]
mod server_tests;
#[cfg(test)]
mod views_tests;

pub use cells::{coerce_flags, coerce_int, coerce_string, CellValue, FlagSet};
pub use config::{Config, ViewConfig};
pub use ingest::{IncomingRecord, UpsertOutcome, ViewRefresher};
pub use ledger::{read_ledger, LedgerRecord};
pub use payroll::{build_daily_records, BuildSummary, EmployeeEnvDir, PayRate, RateSource};
pub use period::PeriodKey;
pub use store::{StoreError, TableStore, Workbook, WorkbookFile};
pub use views::{PayrollViews, RefreshReport, ViewError};
