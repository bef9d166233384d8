//! Best-effort normalization of a freshly read [`Table`].
//!
//! Cleaning never fails. Columns that cannot be converted are left as they
//! were, and every conversion attempt is recorded in a [`CleaningReport`].

use crate::table::{CellValue, ColumnKind, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info};
use std::collections::HashSet;

/// Column-name keywords that trigger timestamp coercion (matched case-insensitively)
pub const DATE_KEYWORDS: &[&str] = &["date", "time", "日期", "时间", "年", "月", "日"];

/// Characters removed from a cell before the numeric parse
const NUMERIC_NOISE: &[char] = &[
    ',', '，', '$', '¥', '￥', ' ', '\t', '\n', '\r', '　', '(', ')', '（', '）',
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y.%m.%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日 %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d", "%Y年%m月%d日", "%m/%d/%Y",
];

const YEAR_MONTH_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"];

/// Result of one coercion attempt on one column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnOutcome {
    /// Every present value converted
    Coerced,
    /// The attempt failed; the column is unchanged
    KeptAsText,
    /// The column converted, but some present values became missing
    PartiallyNulled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coercion {
    Numeric,
    Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoercionRecord {
    pub column: String,
    pub coercion: Coercion,
    pub outcome: ColumnOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub renamed: Vec<(String, String)>,
    pub dropped_rows: usize,
    pub dropped_columns: usize,
    pub coercions: Vec<CoercionRecord>,
}

impl CleaningReport {
    pub fn outcome(&self, column: &str, coercion: Coercion) -> Option<ColumnOutcome> {
        self.coercions
            .iter()
            .find(|r| r.column == column && r.coercion == coercion)
            .map(|r| r.outcome)
    }
}

/// Cleans a table and discards the report
pub fn clean_table(table: Table) -> Table {
    clean_table_with_report(table).0
}

/// Cleans a table
///
/// Steps, in order: trim and deduplicate column names, drop all-missing rows,
/// drop all-missing columns, coerce text columns that are fully numeric after
/// stripping separators and currency marks, then coerce date-named columns to
/// timestamps.
///
/// Rows and columns are dropped before coercion only. A row whose one present
/// value was an unparseable date stays as an all-missing row.
pub fn clean_table_with_report(table: Table) -> (Table, CleaningReport) {
    let mut report = CleaningReport::default();
    let mut table = table;

    report.renamed = normalize_names(&mut table);
    report.dropped_rows += drop_empty_rows(&mut table);
    report.dropped_columns += drop_empty_columns(&mut table);

    for column in &mut table.columns {
        if column.kind() != ColumnKind::Text {
            continue;
        }
        let (values, outcome) = coerce_numeric(&column.values);
        if let Some(values) = values {
            column.values = values;
            info!("列 '{}' 已转换为数值型", column.name);
        }
        report.coercions.push(CoercionRecord {
            column: column.name.clone(),
            coercion: Coercion::Numeric,
            outcome,
        });
    }

    for column in &mut table.columns {
        if !is_date_column(&column.name) || column.kind() == ColumnKind::Numeric {
            continue;
        }
        let (values, outcome) = coerce_timestamps(&column.values);
        if let Some(values) = values {
            column.values = values;
            info!("列 '{}' 已转换为日期型", column.name);
        }
        report.coercions.push(CoercionRecord {
            column: column.name.clone(),
            coercion: Coercion::Timestamp,
            outcome,
        });
    }

    debug!("Cleaning report: {:?}", report);
    (table, report)
}

/// Trims names and suffixes repeats with `.1`, `.2`, ...
///
/// Returns `(original, new)` for every name that changed.
fn normalize_names(table: &mut Table) -> Vec<(String, String)> {
    let mut renamed = Vec::new();
    let trimmed: Vec<String> = table
        .columns
        .iter()
        .map(|c| c.name.trim().to_string())
        .collect();
    let mut taken: HashSet<String> = HashSet::new();

    for (column, base) in table.columns.iter_mut().zip(trimmed.iter()) {
        let mut name = base.clone();
        let mut suffix = 1;
        while taken.contains(&name) || (name != *base && trimmed.contains(&name)) {
            name = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        taken.insert(name.clone());

        if column.name != name {
            renamed.push((std::mem::replace(&mut column.name, name), column.name.clone()));
        }
    }
    renamed
}

fn drop_empty_rows(table: &mut Table) -> usize {
    let keep: Vec<bool> = (0..table.height()).map(|i| !table.is_row_empty(i)).collect();
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped == 0 {
        return 0;
    }

    for column in &mut table.columns {
        let mut flags = keep.iter();
        column.values.retain(|_| *flags.next().unwrap_or(&true));
    }
    dropped
}

fn drop_empty_columns(table: &mut Table) -> usize {
    let before = table.columns.len();
    table.columns.retain(|c| !c.is_empty());
    before - table.columns.len()
}

/// Removes thousands separators, currency marks, whitespace and parentheses
pub fn strip_numeric_noise(raw: &str) -> String {
    raw.chars().filter(|c| !NUMERIC_NOISE.contains(c)).collect()
}

/// Converts a column to numbers if every cell passes a strict parse
///
/// Missing cells, and text that is empty once stripped, stay missing. Numbers
/// pass through. Any other cell that does not parse keeps the whole column as
/// it was. Returns the converted values, or `None` with
/// [`ColumnOutcome::KeptAsText`].
pub fn coerce_numeric(values: &[CellValue]) -> (Option<Vec<CellValue>>, ColumnOutcome) {
    let mut converted = Vec::with_capacity(values.len());
    let mut nulled = false;

    for value in values {
        let cell = match value {
            CellValue::Missing => CellValue::Missing,
            CellValue::Number(n) => CellValue::Number(*n),
            CellValue::Text(s) => {
                let stripped = strip_numeric_noise(s);
                if stripped.is_empty() {
                    nulled = true;
                    CellValue::Missing
                } else {
                    match stripped.parse::<f64>() {
                        Ok(n) => CellValue::Number(n),
                        Err(_) => return (None, ColumnOutcome::KeptAsText),
                    }
                }
            }
            CellValue::Timestamp(_) => return (None, ColumnOutcome::KeptAsText),
        };
        converted.push(cell);
    }

    let outcome = if nulled {
        ColumnOutcome::PartiallyNulled
    } else {
        ColumnOutcome::Coerced
    };
    (Some(converted), outcome)
}

pub fn is_date_column(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    DATE_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

/// Converts a column to timestamps, turning unparseable cells into missing
///
/// This always converts, even when nothing parses.
pub fn coerce_timestamps(values: &[CellValue]) -> (Option<Vec<CellValue>>, ColumnOutcome) {
    let mut nulled = false;

    let converted: Vec<CellValue> = values
        .iter()
        .map(|value| {
            let parsed = match value {
                CellValue::Missing => return CellValue::Missing,
                CellValue::Timestamp(ts) => Some(*ts),
                CellValue::Text(s) => parse_timestamp(s),
                CellValue::Number(_) => None,
            };
            match parsed {
                Some(ts) => CellValue::Timestamp(ts),
                None => {
                    nulled = true;
                    CellValue::Missing
                }
            }
        })
        .collect();

    let outcome = if nulled {
        ColumnOutcome::PartiallyNulled
    } else {
        ColumnOutcome::Coerced
    };
    (Some(converted), outcome)
}

/// Parses the date and date-time spellings found in spreadsheets
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    // Year-month forms mean the first day of that month.
    let first_of_month = if raw.ends_with('月') {
        format!("{}01日", raw)
    } else {
        let separator = if raw.contains('/') { "/" } else { "-" };
        format!("{}{}01", raw, separator)
    };
    YEAR_MONTH_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&first_of_month, format).ok())
        .map(|date| date.and_time(NaiveTime::MIN))
}
