use crate::delimited;
use crate::table::{CellValue, Table};
use calamine::{Data, DataType, Range, Reader, Xls, Xlsx, open_workbook};
use log::{info, warn};
use std::fmt::Display;
use std::io::{Read, Seek};
use std::path::Path;
use thiserror::Error;

/// Extensions accepted by the Excel-only variant
pub const EXCEL_EXTENSIONS: &[&str] = &["xlsx", "xls"];

/// Extensions accepted when CSV uploads are enabled
pub const TABULAR_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];

/// Upper bound for [`HeaderLayout::Auto`] detection
pub const MAX_AUTO_HEADER_LEVELS: usize = 3;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("读取文件失败: {0}")]
    ReadFailure(String),
}

pub type ReadResult<T> = Result<T, ReadError>;

/// How many leading rows of the sheet form the header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderLayout {
    Single,
    Levels(usize),
    /// Follow the worksheet's merged cells: a horizontal merge in the header
    /// adds the row below it, a vertical merge spans the rows it covers.
    /// Sources without merge information read one header row.
    Auto,
}

/// A merged cell block, in rows and columns of the read grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergedRegion {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub supported_extensions: Vec<String>,
    pub header: HeaderLayout,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            supported_extensions: EXCEL_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            header: HeaderLayout::Single,
        }
    }
}

impl ReaderOptions {
    pub fn with_csv() -> Self {
        Self {
            supported_extensions: TABULAR_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        self.supported_extensions
            .iter()
            .any(|e| normalize_extension(e) == extension)
    }
}

/// Lower-cases an extension and strips any leading dot
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// Extension of a file name, e.g. `"report.XLSX"` -> `Some("xlsx")`
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
}

/// Loads the first sheet of a spreadsheet into a [`Table`]
///
/// The declared extension decides the parser, not the path. Uploads are
/// stored under temporary names, so the two may differ.
///
/// # Arguments
/// * `path` - Local file holding the spreadsheet
/// * `extension` - Declared extension, with or without a leading dot
/// * `options` - Supported extensions and header layout
///
/// # Errors
/// * `UnsupportedFormat` if the extension is not in `options.supported_extensions`
/// * `ReadFailure` if the file cannot be opened or parsed
pub fn read_table(
    path: impl AsRef<Path>,
    extension: &str,
    options: &ReaderOptions,
) -> ReadResult<Table> {
    let path = path.as_ref();
    let extension = normalize_extension(extension);

    if !options.supports(&extension) {
        return Err(ReadError::UnsupportedFormat(format!(".{}", extension)));
    }

    let (grid, merged) = match extension.as_str() {
        "xlsx" => xlsx_sheet(path)?,
        "xls" => (
            first_sheet(open_workbook::<Xls<_>, _>(path).map_err(read_failure)?)?,
            Vec::new(),
        ),
        "csv" => (csv_grid(path)?, Vec::new()),
        other => return Err(ReadError::UnsupportedFormat(format!(".{}", other))),
    };

    let layout = match options.header {
        HeaderLayout::Auto => HeaderLayout::Levels(detect_header_depth(&grid, &merged)),
        layout => layout,
    };
    let table = grid_to_table(grid, layout);
    info!(
        "Read {} rows x {} columns from {}",
        table.height(),
        table.width(),
        path.display()
    );
    Ok(table)
}

fn read_failure(err: impl Display) -> ReadError {
    ReadError::ReadFailure(err.to_string())
}

fn first_sheet<RS, R>(mut workbook: R) -> ReadResult<Vec<Vec<CellValue>>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: Display,
{
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReadError::ReadFailure("工作簿中没有工作表".to_string()))?
        .map_err(read_failure)?;

    Ok(range_grid(&range))
}

/// First worksheet of an .xlsx file together with its merged regions
fn xlsx_sheet(path: &Path) -> ReadResult<(Vec<Vec<CellValue>>, Vec<MergedRegion>)> {
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(read_failure)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ReadError::ReadFailure("工作簿中没有工作表".to_string()))?;
    let range = workbook.worksheet_range(&sheet).map_err(read_failure)?;
    let (row0, col0) = range.start().unwrap_or((0, 0));

    // Merge information only guides header detection.
    let merged = match workbook.load_merged_regions() {
        Ok(()) => workbook
            .merged_regions_by_sheet(&sheet)
            .into_iter()
            .map(|(_, _, dims)| MergedRegion {
                first_row: dims.start.0.saturating_sub(row0) as usize,
                first_col: dims.start.1.saturating_sub(col0) as usize,
                last_row: dims.end.0.saturating_sub(row0) as usize,
                last_col: dims.end.1.saturating_sub(col0) as usize,
            })
            .collect(),
        Err(e) => {
            warn!("无法读取合并单元格信息, 按单行表头处理: {}", e);
            Vec::new()
        }
    };

    Ok((range_grid(&range), merged))
}

fn range_grid(range: &Range<Data>) -> Vec<Vec<CellValue>> {
    range
        .rows()
        .map(|row| row.iter().map(excel_cell).collect())
        .collect()
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Missing,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.is_empty() => CellValue::Missing,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(e) => CellValue::Text(e.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(ts) => CellValue::Timestamp(ts),
            None => CellValue::Text(cell.to_string()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn csv_grid(path: &Path) -> ReadResult<Vec<Vec<CellValue>>> {
    let bytes = std::fs::read(path).map_err(read_failure)?;
    let content = String::from_utf8(bytes).map_err(read_failure)?;

    Ok(delimited::parse_records(&content)
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
        .collect())
}

/// Splits a raw cell grid into header paths and data rows and builds the table
///
/// Text data columns whose every present cell parses as a number are typed as
/// numeric. Excel cells already carry their type, so this only affects CSV
/// input and numbers stored as plain text without formatting.
///
/// [`HeaderLayout::Auto`] carries no merge information here and reads one
/// header row; [`read_table`] resolves it before calling this.
pub fn grid_to_table(mut grid: Vec<Vec<CellValue>>, layout: HeaderLayout) -> Table {
    grid.drain(..leading_blank_rows(&grid));
    if grid.is_empty() {
        return Table::default();
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, CellValue::Missing);
    }

    let depth = match layout {
        HeaderLayout::Single | HeaderLayout::Auto => 1,
        HeaderLayout::Levels(n) => n.clamp(1, grid.len()),
    };

    let data = grid.split_off(depth);
    let mut levels: Vec<Vec<Option<String>>> = grid
        .iter()
        .map(|row| row.iter().map(header_fragment).collect())
        .collect();

    if depth > 1 {
        let last = levels.len() - 1;
        for level in &mut levels[..last] {
            forward_fill(level);
        }
    }

    let paths: Vec<Vec<Option<String>>> = (0..width)
        .map(|col| levels.iter().map(|level| level[col].clone()).collect())
        .collect();
    let names = collapse_headers(&paths);
    if depth > 1 {
        info!("成功处理多级表头，合并后的列名: {:?}", names);
    }

    let mut table = Table::from_rows(names, data);
    for column in &mut table.columns {
        promote_numeric_text(&mut column.values);
    }
    table
}

fn leading_blank_rows(grid: &[Vec<CellValue>]) -> usize {
    grid.iter()
        .take_while(|row| row.iter().all(CellValue::is_missing))
        .count()
}

/// Picks the header depth for [`HeaderLayout::Auto`] from merged regions
///
/// Starting from one row below any leading blank rows, the header grows while
/// a merged region starting inside it either spans further down, or spans
/// several columns on the current bottom row (a group label over sub-headers).
/// Depth stays within [`MAX_AUTO_HEADER_LEVELS`] and leaves one data row.
pub fn detect_header_depth(grid: &[Vec<CellValue>], merged: &[MergedRegion]) -> usize {
    let first = leading_blank_rows(grid);
    let rows = grid.len().saturating_sub(first);
    let max_depth = MAX_AUTO_HEADER_LEVELS.min(rows.saturating_sub(1)).max(1);

    let mut depth = 1;
    loop {
        let bottom = first + depth - 1;
        let mut next = depth;
        for region in merged
            .iter()
            .filter(|r| r.first_row >= first && r.first_row <= bottom)
        {
            next = next.max(region.last_row - first + 1);
            if region.last_col > region.first_col && region.last_row == bottom {
                next = next.max(depth + 1);
            }
        }

        let next = next.min(max_depth);
        if next <= depth {
            return depth;
        }
        depth = next;
    }
}

fn header_fragment(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Missing => None,
        CellValue::Text(s) => Some(s.clone()),
        CellValue::Number(n) => Some(crate::prompt::format_number(*n)),
        CellValue::Timestamp(ts) => Some(crate::prompt::format_timestamp(ts)),
    }
}

fn forward_fill(level: &mut [Option<String>]) {
    let mut last: Option<String> = None;
    for fragment in level.iter_mut() {
        match fragment {
            Some(label) if !label.trim().is_empty() => last = Some(label.clone()),
            _ => *fragment = last.clone(),
        }
    }
}

/// Collapses header paths into one name per column
///
/// Blank fragments are discarded, the rest are trimmed and deduplicated
/// keeping the first occurrence, then joined with `_`. A column with no
/// surviving fragment is named `列{n}`, where `n` counts synthesized names
/// only, starting at 1.
pub fn collapse_headers(paths: &[Vec<Option<String>>]) -> Vec<String> {
    let mut synthesized = 0;
    paths
        .iter()
        .map(|path| {
            let mut parts: Vec<&str> = Vec::with_capacity(path.len());
            for fragment in path.iter().flatten() {
                let fragment = fragment.trim();
                if !fragment.is_empty() && !parts.contains(&fragment) {
                    parts.push(fragment);
                }
            }

            if parts.is_empty() {
                synthesized += 1;
                format!("列{}", synthesized)
            } else {
                parts.join("_")
            }
        })
        .collect()
}

fn promote_numeric_text(values: &mut [CellValue]) {
    let mut any_text = false;
    for value in values.iter() {
        match value {
            CellValue::Missing | CellValue::Number(_) => {}
            CellValue::Text(s) if s.trim().parse::<f64>().is_ok() => any_text = true,
            _ => return,
        }
    }
    if !any_text {
        return;
    }

    for value in values.iter_mut() {
        if let CellValue::Text(s) = value {
            if let Ok(n) = s.trim().parse::<f64>() {
                *value = CellValue::Number(n);
            }
        }
    }
}
