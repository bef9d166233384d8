use crate::delimited;
use crate::reader::{HeaderLayout, grid_to_table};
use crate::table::{CellValue, ColumnKind, Table};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Finance/analytics report prompt used by the direct HTML pipeline
pub const DEFAULT_ANALYSIS_PROMPT: &str = include_str!("../prompts/default_analysis.md");

/// Prompt for the chart pipeline, where the model only writes the explanation
pub const CHART_EXPLANATION_PROMPT: &str = include_str!("../prompts/chart_explanation.md");

const DATA_HEADING: &str = "## 数据内容\n以下是Excel文件的数据内容（CSV格式）：";
const QUESTION_HEADING: &str = "## 用户问题";

/// Largest magnitude still written without a fractional part
const INTEGRAL_LIMIT: f64 = 1e15;

/// Formats a number the way it appears in the delimited data block
///
/// # Examples
/// ```
/// use sheet_analyst::prompt::format_number;
///
/// assert_eq!(format_number(1200.0), "1200");
/// assert_eq!(format_number(-0.25), "-0.25");
/// ```
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < INTEGRAL_LIMIT {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format("%Y-%m-%d").to_string()
    } else if value.nanosecond() == 0 {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

fn format_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => s.clone(),
        CellValue::Number(n) => format_number(*n),
        CellValue::Timestamp(ts) => format_timestamp(ts),
        CellValue::Missing => String::new(),
    }
}

/// Serializes a table as comma-delimited text: one header line, then one
/// line per row. Missing cells are empty fields.
pub fn to_delimited(table: &Table) -> String {
    let mut out = delimited::format_record(table.columns.iter().map(|c| c.name.as_str()));
    out.push('\n');

    for i in 0..table.height() {
        let fields: Vec<String> = table.columns.iter().map(|c| format_cell(&c.values[i])).collect();
        out.push_str(&delimited::format_record(fields.iter().map(String::as_str)));
        out.push('\n');
    }
    out
}

/// Parses text produced by [`to_delimited`] back into a table
///
/// Numeric columns come back as numbers. Text columns whose every present
/// value is written the way [`format_timestamp`] writes it come back as
/// timestamps, whatever the column is called.
pub fn parse_delimited(text: &str) -> Table {
    let grid = delimited::parse_records(text)
        .into_iter()
        .map(|record| {
            record
                .into_iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Missing
                    } else {
                        CellValue::Text(field)
                    }
                })
                .collect()
        })
        .collect();

    let mut table = grid_to_table(grid, HeaderLayout::Single);
    for column in &mut table.columns {
        if column.kind() != ColumnKind::Text {
            continue;
        }
        let parsed: Option<Vec<CellValue>> = column
            .values
            .iter()
            .map(|value| match value {
                CellValue::Missing => Some(CellValue::Missing),
                CellValue::Text(s) => parse_formatted_timestamp(s).map(CellValue::Timestamp),
                _ => None,
            })
            .collect();
        if let Some(values) = parsed.filter(|values| values.iter().any(|v| !v.is_missing())) {
            column.values = values;
        }
    }
    table
}

fn parse_formatted_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Builds the text sent to the model
///
/// # Arguments
/// * `table` - The cleaned table
/// * `template` - Instructions placed before the data
/// * `question` - Optional free-text question appended after the data
pub fn assemble_prompt(table: &Table, template: &str, question: Option<&str>) -> String {
    let data = to_delimited(table);
    let mut prompt = String::with_capacity(template.len() + data.len() + 128);

    prompt.push_str(template.trim_end());
    prompt.push_str("\n\n");
    prompt.push_str(DATA_HEADING);
    prompt.push('\n');
    prompt.push_str(&data);

    if let Some(question) = question.map(str::trim).filter(|q| !q.is_empty()) {
        prompt.push('\n');
        prompt.push_str(QUESTION_HEADING);
        prompt.push('\n');
        prompt.push_str(question);
        prompt.push('\n');
    }
    prompt
}
