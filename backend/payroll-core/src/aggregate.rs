// src/aggregate.rs
use std::collections::BTreeMap;

use crate::cells::{join_flags, CellValue, FlagSet};
use crate::ledger::LedgerRecord;
use crate::period::{display_name, PeriodKey};
use crate::store::Grid;

pub const SUMMARY_HEADER: [&str; 8] = ["EmpID", "Name", "Month", "Min", "Hour", "Cost", "Check", "Flags"];
pub const DETAIL_HEADER: [&str; 8] = ["Date", "EmpID", "Name", "RawMin", "Min", "Rate", "Cost", "Flags"];

/// Per-employee totals for one period.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmployeeAggregate {
    pub total_minutes: i64,
    pub total_cost: i64,
    pub flag_union: FlagSet,
}

impl EmployeeAggregate {
    pub fn derived_hours(&self) -> f64 {
        self.total_minutes as f64 / 60.0
    }

    pub fn needs_check(&self) -> bool {
        !self.flag_union.is_empty()
    }

    fn add(&mut self, record: &LedgerRecord) {
        // Coerced cells can already sit at i64::MAX
        self.total_minutes = self.total_minutes.saturating_add(record.min);
        self.total_cost = self.total_cost.saturating_add(record.yen);
        self.flag_union.extend(record.flags.iter().cloned());
    }
}

fn header_row(header: &[&str]) -> Vec<CellValue> {
    header.iter().map(|h| CellValue::text(*h)).collect()
}

/// Folds the period's records into per-employee aggregates.
///
/// Every employee in `emps` gets an entry, even without records. Any non-empty
/// record name seen during the scan overwrites `names`, so later tables in the
/// same refresh see it.
pub fn summarize_period(
    records: &[LedgerRecord],
    period: PeriodKey,
    emps: &[String],
    names: &mut BTreeMap<String, String>,
) -> BTreeMap<String, EmployeeAggregate> {
    let mut aggregates: BTreeMap<String, EmployeeAggregate> = emps
        .iter()
        .map(|emp| (emp.clone(), EmployeeAggregate::default()))
        .collect();

    for record in records {
        if record.emp.is_empty() || !period.contains_date(&record.date) {
            continue;
        }
        aggregates.entry(record.emp.clone()).or_default().add(record);

        let name = record.name.trim();
        if !name.is_empty() {
            names.insert(record.emp.clone(), name.to_string());
        }
    }
    aggregates
}

/// Summary table for a period: header plus one row per employee in `emps` order.
pub fn summary_rows(
    records: &[LedgerRecord],
    period: PeriodKey,
    emps: &[String],
    names: &mut BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Grid {
    let aggregates = summarize_period(records, period, emps, names);
    let period_key = period.to_string();

    let mut rows = Vec::with_capacity(emps.len() + 1);
    rows.push(header_row(&SUMMARY_HEADER));
    for emp in emps {
        let aggregate = aggregates.get(emp).cloned().unwrap_or_default();
        rows.push(vec![
            CellValue::text(emp.as_str()),
            CellValue::text(display_name(emp, names.get(emp).map(String::as_str), labels)),
            CellValue::text(period_key.as_str()),
            CellValue::int(aggregate.total_minutes),
            CellValue::Number(aggregate.derived_hours()),
            CellValue::int(aggregate.total_cost),
            CellValue::int(i64::from(aggregate.needs_check())),
            CellValue::text(join_flags(&aggregate.flag_union)),
        ]);
    }
    rows
}

/// Detail table for one employee and period: one row per record, in ledger order.
///
/// The name column starts at the resolved display name and carries forward the
/// latest non-empty record name; it never reverts to blank.
pub fn detail_rows(
    records: &[LedgerRecord],
    period: PeriodKey,
    emp: &str,
    names: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Grid {
    let mut current_name = display_name(emp, names.get(emp).map(String::as_str), labels);

    let mut rows = vec![header_row(&DETAIL_HEADER)];
    for record in records {
        if record.emp != emp || !period.contains_date(&record.date) {
            continue;
        }
        let name = record.name.trim();
        if !name.is_empty() {
            current_name = name.to_string();
        }
        rows.push(vec![
            CellValue::text(record.date.as_str()),
            CellValue::text(record.emp.as_str()),
            CellValue::text(current_name.as_str()),
            CellValue::int(record.min_raw),
            CellValue::int(record.min),
            CellValue::int(record.yen_h),
            CellValue::int(record.yen),
            CellValue::text(join_flags(&record.flags)),
        ]);
    }
    rows
}
