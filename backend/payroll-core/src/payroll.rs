// src/payroll.rs
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, PathBuf};
use tracing::{debug, info};

use crate::cells::FlagSet;
use crate::ingest::IncomingRecord;
use crate::period::VIEW_TIMEZONE;

// --- Configuration & Constants ---

pub const DEFAULT_ROUND_UNIT_MINUTES: i64 = 5;

const UNKNOWN_EMPLOYEE: &str = "unknown";
const HOURLY_YEN_KEY: &str = "HOURLY_YEN";
const ROUND_UNIT_KEY: &str = "ROUND_UNIT_MINUTES";

pub const FLAG_DOUBLE_IN: &str = "double_in";
pub const FLAG_ORPHAN_OUT: &str = "orphan_out";
pub const FLAG_MISSING_OUT: &str = "missing_out";
pub const FLAG_CROSS_DAY: &str = "cross_day";
pub const FLAG_NEGATIVE_DURATION: &str = "negative_duration";
pub const FLAG_MISSING_HOURLY_YEN: &str = "missing_hourly_yen";

// --- Pay Rates ---

/// Hourly wage and rounding unit for one employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayRate {
    pub hourly_yen: i64,
    pub round_unit_minutes: i64,
}

impl Default for PayRate {
    fn default() -> Self {
        Self {
            hourly_yen: 0,
            round_unit_minutes: DEFAULT_ROUND_UNIT_MINUTES,
        }
    }
}

impl PayRate {
    pub fn new(hourly_yen: i64, round_unit_minutes: i64) -> Self {
        Self {
            hourly_yen,
            round_unit_minutes,
        }
    }

    fn unit(&self) -> i64 {
        if self.round_unit_minutes <= 0 {
            DEFAULT_ROUND_UNIT_MINUTES
        } else {
            self.round_unit_minutes
        }
    }

    /// Rounds down to a whole number of rounding units.
    pub fn round_minutes(&self, raw_minutes: i64) -> i64 {
        let unit = self.unit();
        raw_minutes.div_euclid(unit).saturating_mul(unit)
    }

    pub fn cost(&self, minutes: i64) -> i64 {
        minutes.saturating_mul(self.hourly_yen).div_euclid(60)
    }
}

/// Where per-employee rates come from.
pub trait RateSource {
    fn rate_for(&self, emp: &str) -> PayRate;
}

impl RateSource for BTreeMap<String, PayRate> {
    fn rate_for(&self, emp: &str) -> PayRate {
        self.get(emp).copied().unwrap_or_default()
    }
}

/// A directory of `<emp>.env` files carrying `HOURLY_YEN` and
/// `ROUND_UNIT_MINUTES`. A missing or unreadable file yields the default rate.
#[derive(Debug, Clone)]
pub struct EmployeeEnvDir {
    dir: PathBuf,
}

impl EmployeeEnvDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn env_path(&self, emp: &str) -> Option<PathBuf> {
        let file = PathBuf::from(format!("{}.env", emp));
        // Only a bare file name may be looked up
        let mut components = file.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.dir.join(file)),
            _ => None,
        }
    }

    fn read_vars(&self, emp: &str) -> HashMap<String, String> {
        let Some(path) = self.env_path(emp) else {
            return HashMap::new();
        };
        match dotenv::from_path_iter(&path) {
            Ok(iter) => iter.filter_map(Result::ok).collect(),
            Err(e) => {
                debug!("No rate file for {} at {}: {}", emp, path.display(), e);
                HashMap::new()
            }
        }
    }
}

fn env_int(vars: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    vars.get(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

impl RateSource for EmployeeEnvDir {
    fn rate_for(&self, emp: &str) -> PayRate {
        let vars = self.read_vars(emp);
        PayRate {
            hourly_yen: env_int(&vars, HOURLY_YEN_KEY, 0),
            round_unit_minutes: env_int(&vars, ROUND_UNIT_KEY, DEFAULT_ROUND_UNIT_MINUTES),
        }
    }
}

// --- Clock Events ---

/// One reader event: `IN`, `OUT` or `ERROR` (other actions are ignored).
#[derive(Debug, Clone, PartialEq)]
pub struct ClockEvent {
    pub ts: DateTime<Tz>,
    pub emp: String,
    pub act: String,
    pub code: String,
}

/// RFC 3339 with offset, or a naive local timestamp read as view-timezone time.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&VIEW_TIMEZONE));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    VIEW_TIMEZONE.from_local_datetime(&naive).earliest()
}

fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum ParsedEvent {
    Event(ClockEvent),
    UnknownEmployee,
    Invalid,
}

fn parse_event(value: &Value) -> ParsedEvent {
    let Value::Object(map) = value else {
        return ParsedEvent::Invalid;
    };
    let emp = match map.get("emp") {
        None | Some(Value::Null) => UNKNOWN_EMPLOYEE.to_string(),
        Some(v) => loose_string(v),
    };
    if emp == UNKNOWN_EMPLOYEE {
        return ParsedEvent::UnknownEmployee;
    }
    let Some(ts) = map
        .get("ts")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(parse_timestamp)
    else {
        return ParsedEvent::Invalid;
    };
    ParsedEvent::Event(ClockEvent {
        ts,
        emp,
        act: map.get("act").map(loose_string).unwrap_or_default(),
        code: match map.get("code") {
            None | Some(Value::Null) => String::new(),
            Some(v) => loose_string(v),
        },
    })
}

// --- Daily Pairing ---

/// Worked minutes and anomaly flags for one employee on one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayTally {
    pub minutes: i64,
    pub flags: FlagSet,
}

/// `(date, emp)`; ordering by date first gives the output order.
pub type DayKey = (String, String);

fn day_of(ts: &DateTime<Tz>) -> String {
    ts.date_naive().format("%Y-%m-%d").to_string()
}

fn tally<'a>(days: &'a mut BTreeMap<DayKey, DayTally>, day: &str, emp: &str) -> &'a mut DayTally {
    days.entry((day.to_string(), emp.to_string())).or_default()
}

/// Pairs IN/OUT events per employee, in the order given.
///
/// Minutes of a shift are booked on the day the shift started.
pub fn tally_days(events: &[ClockEvent]) -> BTreeMap<DayKey, DayTally> {
    let mut open_in: HashMap<&str, DateTime<Tz>> = HashMap::new();
    let mut days: BTreeMap<DayKey, DayTally> = BTreeMap::new();

    for event in events {
        let emp = event.emp.as_str();
        let day = day_of(&event.ts);

        match event.act.as_str() {
            "IN" => {
                if open_in.insert(emp, event.ts).is_some() {
                    tally(&mut days, &day, emp).flags.insert(FLAG_DOUBLE_IN.to_string());
                }
            }
            "OUT" => {
                let Some(started) = open_in.remove(emp) else {
                    tally(&mut days, &day, emp).flags.insert(FLAG_ORPHAN_OUT.to_string());
                    continue;
                };
                let start_day = day_of(&started);
                let minutes = (event.ts - started).num_milliseconds().div_euclid(60_000);
                let entry = tally(&mut days, &start_day, emp);
                if minutes < 0 {
                    entry.flags.insert(FLAG_NEGATIVE_DURATION.to_string());
                    continue;
                }
                entry.minutes = entry.minutes.saturating_add(minutes);
                if start_day != day {
                    entry.flags.insert(FLAG_CROSS_DAY.to_string());
                }
            }
            "ERROR" => {
                let code = if event.code.is_empty() { "error" } else { event.code.as_str() };
                tally(&mut days, &day, emp).flags.insert(format!("error:{}", code));
                if let Some(started) = open_in.remove(emp) {
                    tally(&mut days, &day_of(&started), emp)
                        .flags
                        .insert(FLAG_MISSING_OUT.to_string());
                }
            }
            _ => {}
        }
    }

    for (emp, started) in open_in {
        tally(&mut days, &day_of(&started), emp)
            .flags
            .insert(FLAG_MISSING_OUT.to_string());
    }
    days
}

// --- Record Building ---

/// Stable record id for an employee-day: hex SHA-1 of `date|emp`.
pub fn record_id(date: &str, emp: &str) -> String {
    hex::encode(Sha1::digest(format!("{}|{}", date, emp).as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BuildSummary {
    pub events: usize,
    pub events_unknown_emp: usize,
    pub days_emps: usize,
    pub flags_days: usize,
}

/// Turns raw reader events into one ledger record per employee and day.
///
/// Events without a parseable `ts` are dropped; events for the `unknown`
/// employee are dropped and counted. Days with no minutes and no flags
/// produce no record.
pub fn build_daily_records<R: RateSource + ?Sized>(events: &[Value], rates: &R) -> (Vec<IncomingRecord>, BuildSummary) {
    let mut summary = BuildSummary {
        events: events.len(),
        ..Default::default()
    };

    let mut parsed = Vec::with_capacity(events.len());
    for value in events {
        match parse_event(value) {
            ParsedEvent::Event(event) => parsed.push(event),
            ParsedEvent::UnknownEmployee => summary.events_unknown_emp += 1,
            ParsedEvent::Invalid => {}
        }
    }
    parsed.sort_by_key(|event| event.ts);

    let days = tally_days(&parsed);
    summary.days_emps = days.len();

    let mut records = Vec::new();
    for ((date, emp), day) in days {
        if day.minutes == 0 && day.flags.is_empty() {
            continue;
        }
        let rate = rates.rate_for(&emp);
        let mut flags = day.flags;
        if rate.hourly_yen <= 0 {
            flags.insert(FLAG_MISSING_HOURLY_YEN.to_string());
        }
        let rounded = rate.round_minutes(day.minutes);
        if !flags.is_empty() {
            summary.flags_days += 1;
        }

        records.push(IncomingRecord {
            id: json!(record_id(&date, &emp)),
            date: json!(date),
            emp: json!(emp),
            min_raw: json!(day.minutes),
            min: json!(rounded),
            yen_h: json!(rate.hourly_yen),
            yen: json!(rate.cost(rounded)),
            flags: json!(flags.into_iter().collect::<Vec<_>>()),
            name: None,
        });
    }

    info!(
        "Built {} daily records from {} events ({} unknown employee, {} flagged days)",
        records.len(),
        summary.events,
        summary.events_unknown_emp,
        summary.flags_days
    );
    (records, summary)
}
