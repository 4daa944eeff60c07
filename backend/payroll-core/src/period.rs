// src/period.rs
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::ledger::LedgerRecord;

/// Every period and date shown in the report tables is computed in this zone.
pub const VIEW_TIMEZONE: Tz = chrono_tz::Asia::Tokyo;

/// Rank given to employee ids without any digits, so they sort last.
pub const UNNUMBERED_EMPLOYEE_RANK: u64 = 1_000_000;

/// Longest table name the storage engine accepts.
pub const MAX_TABLE_NAME_CHARS: usize = 90;

const FALLBACK_TABLE_NAME: &str = "sheet";

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid digit regex"));

// --- Period Keys ---

/// A calendar month, rendered as `yyyy-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32, // 1-12
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Month containing `instant` in the view timezone.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        let local = instant.with_timezone(&VIEW_TIMEZONE);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (year, month) = key.split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn previous(self) -> Self {
        if self.month <= 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// True when the `yyyy-MM-dd` date string falls inside this month.
    pub fn contains_date(&self, date: &str) -> bool {
        !date.is_empty() && date.get(..7).unwrap_or(date) == self.to_string()
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub fn month_key(instant: DateTime<Utc>) -> String {
    PeriodKey::from_instant(instant).to_string()
}

/// `"2024-01"` -> `"2023-12"`. Returns `None` for keys that are not `yyyy-MM`.
pub fn prev_month_key(key: &str) -> Option<String> {
    PeriodKey::parse(key).map(|p| p.previous().to_string())
}

// --- Employee Ordering ---

/// Numeric value of the first ASCII digit run in the id, or [`UNNUMBERED_EMPLOYEE_RANK`].
pub fn employee_rank(emp: &str) -> u64 {
    DIGIT_RUN
        .find(emp)
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(UNNUMBERED_EMPLOYEE_RANK)
}

pub fn compare_employees(a: &str, b: &str) -> Ordering {
    employee_rank(a)
        .cmp(&employee_rank(b))
        .then_with(|| a.cmp(b))
}

pub fn sort_employees(emps: &mut [String]) {
    emps.sort_by(|a, b| compare_employees(a, b));
}

fn in_either(record: &LedgerRecord, a: PeriodKey, b: PeriodKey) -> bool {
    a.contains_date(&record.date) || b.contains_date(&record.date)
}

/// Employees with at least one record in either period, in employee order.
pub fn union_employees(records: &[LedgerRecord], a: PeriodKey, b: PeriodKey) -> Vec<String> {
    let set: BTreeSet<&str> = records
        .iter()
        .filter(|r| !r.emp.is_empty() && in_either(r, a, b))
        .map(|r| r.emp.as_str())
        .collect();
    let mut out: Vec<String> = set.into_iter().map(str::to_string).collect();
    sort_employees(&mut out);
    out
}

/// Latest non-empty record name per employee over both periods, in ledger order.
pub fn name_map(records: &[LedgerRecord], a: PeriodKey, b: PeriodKey) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for record in records {
        if record.emp.is_empty() || !in_either(record, a, b) {
            continue;
        }
        let name = record.name.trim();
        if !name.is_empty() {
            names.insert(record.emp.clone(), name.to_string());
        }
    }
    names
}

/// Resolved record name, else the static label, else empty.
pub fn display_name(emp: &str, resolved: Option<&str>, labels: &BTreeMap<String, String>) -> String {
    if let Some(name) = resolved.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    labels
        .get(emp)
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

/// Summary employees plus every labelled employee, in employee order.
pub fn detail_employees(summary_emps: &[String], labels: &BTreeMap<String, String>) -> Vec<String> {
    let set: HashSet<&str> = summary_emps
        .iter()
        .map(String::as_str)
        .chain(labels.keys().map(String::as_str))
        .collect();
    let mut out: Vec<String> = set.into_iter().map(str::to_string).collect();
    sort_employees(&mut out);
    out
}

// --- Table Identity ---

pub fn sanitize_table_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let base = if trimmed.is_empty() {
        FALLBACK_TABLE_NAME
    } else {
        trimmed
    };
    base.chars()
        .map(|c| match c {
            '[' | ']' | '*' | '/' | '\\' | '?' | ':' => '_',
            other => other,
        })
        .take(MAX_TABLE_NAME_CHARS)
        .collect()
}

/// Base for an employee's detail tables: display name, or the id when unnamed.
pub fn employee_table_base(emp: &str, resolved: Option<&str>, labels: &BTreeMap<String, String>) -> String {
    let name = display_name(emp, resolved, labels);
    if name.is_empty() {
        sanitize_table_name(emp)
    } else {
        sanitize_table_name(&name)
    }
}

/// Picks a free table name and registers it in `used`.
///
/// Tries the sanitized candidate, then `<candidate>_<emp>`, then `<candidate>_2`,
/// `<candidate>_3`, ... until one is free.
pub fn pick_unique_table_name(used: &mut HashSet<String>, candidate: &str, emp: &str) -> String {
    let base = sanitize_table_name(candidate);
    let chosen = if !used.contains(&base) {
        base
    } else {
        let with_emp = with_suffix(&base, emp);
        if !used.contains(&with_emp) {
            with_emp
        } else {
            let mut k = 2u64;
            loop {
                let numbered = with_suffix(&base, &k.to_string());
                if !used.contains(&numbered) {
                    break numbered;
                }
                k += 1;
            }
        }
    };
    used.insert(chosen.clone());
    chosen
}

/// `<base>_<suffix>`, shortening `base` so the suffix survives truncation.
fn with_suffix(base: &str, suffix: &str) -> String {
    let suffix = sanitize_table_name(suffix);
    let room = MAX_TABLE_NAME_CHARS.saturating_sub(suffix.chars().count() + 1);
    let head: String = base.chars().take(room).collect();
    sanitize_table_name(&format!("{}_{}", head, suffix))
}
