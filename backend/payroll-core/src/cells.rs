// src/cells.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::period::VIEW_TIMEZONE;

/// Sorted, deduplicated set of non-empty flag strings.
pub type FlagSet = BTreeSet<String>;

// --- Cell Values ---

/// A single stored cell. Serialized untagged so a grid on disk is plain JSON:
/// `null`, numbers, strings, nested arrays and `{"date": "..."}` objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    List(Vec<CellValue>),
    Date { date: DateTime<Utc> },
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    pub fn int(n: i64) -> Self {
        CellValue::Number(n as f64)
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
            CellValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            CellValue::Date { date } => write!(f, "{}", date.to_rfc3339()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::int(n)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

// --- Coercion ---

/// Integer view of a cell. Never fails: anything unparseable is 0.
pub fn coerce_int(cell: &CellValue) -> i64 {
    match cell {
        CellValue::Empty => 0,
        CellValue::Number(n) => {
            if n.is_finite() {
                n.floor() as i64
            } else {
                0
            }
        }
        CellValue::Text(s) => parse_int_prefix(s.trim()),
        CellValue::List(_) | CellValue::Date { .. } => parse_int_prefix(cell.to_string().trim()),
    }
}

/// Parses the leading `[+-]?\d+` run of `s`; no digits means 0.
fn parse_int_prefix(s: &str) -> i64 {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return 0;
    }
    // Overlong digit runs saturate rather than wrap.
    let value = digits.parse::<i64>().unwrap_or(i64::MAX);
    if negative {
        -value
    } else {
        value
    }
}

/// Trimmed string view of a cell. Dates render as `yyyy-MM-dd` in the view timezone.
pub fn coerce_string(cell: &CellValue) -> String {
    match cell {
        CellValue::Empty => String::new(),
        CellValue::Date { date } => date
            .with_timezone(&VIEW_TIMEZONE)
            .format("%Y-%m-%d")
            .to_string(),
        other => other.to_string().trim().to_string(),
    }
}

/// Flag-set view of a cell.
///
/// Accepts blanks and `0` (empty set), array cells, JSON array literals such as
/// `["late","missing_out"]`, and comma separated text. A JSON literal that fails
/// to parse falls back to comma splitting.
pub fn coerce_flags(cell: &CellValue) -> FlagSet {
    match cell {
        CellValue::Empty => FlagSet::new(),
        CellValue::Number(n) if *n == 0.0 => FlagSet::new(),
        CellValue::List(items) => clean_flags(items.iter().map(|item| item.to_string())),
        other => {
            let s = other.to_string();
            let s = s.trim();
            if s.is_empty() || s == "0" {
                return FlagSet::new();
            }
            if s.starts_with('[') && s.ends_with(']') {
                if let Ok(serde_json::Value::Array(values)) =
                    serde_json::from_str::<serde_json::Value>(s)
                {
                    return clean_flags(values.into_iter().map(|v| match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    }));
                }
            }
            clean_flags(s.split(',').map(str::to_string))
        }
    }
}

fn clean_flags(items: impl IntoIterator<Item = String>) -> FlagSet {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn join_flags(flags: &FlagSet) -> String {
    flags.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
