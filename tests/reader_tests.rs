use rust_xlsxwriter::{Format, Workbook};
use sheet_analyst::cleaner::{ColumnOutcome, Coercion, clean_table, clean_table_with_report};
use sheet_analyst::prompt::{DEFAULT_ANALYSIS_PROMPT, assemble_prompt};
use sheet_analyst::reader::{HeaderLayout, ReadError, ReaderOptions, read_table};
use sheet_analyst::{CellValue, ColumnKind};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn save(workbook: &mut Workbook, dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    workbook.save(&path).unwrap();
    path
}

fn options(header: HeaderLayout) -> ReaderOptions {
    ReaderOptions {
        header,
        ..ReaderOptions::default()
    }
}

fn ledger(dir: &TempDir) -> PathBuf {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "  客户 ").unwrap();
    sheet.write_string(0, 1, "余额").unwrap();
    sheet.write_string(0, 2, "到期日期").unwrap();
    sheet.write_string(0, 3, "授信额度").unwrap();

    sheet.write_string(1, 0, "甲公司").unwrap();
    sheet.write_number(1, 1, 1200.5).unwrap();
    sheet.write_string(1, 2, "2024-01-31").unwrap();
    sheet.write_string(1, 3, "1,200").unwrap();

    sheet.write_string(2, 0, "乙公司").unwrap();
    sheet.write_number(2, 1, 300.0).unwrap();
    sheet.write_string(2, 2, "2024/02/29").unwrap();
    sheet.write_string(2, 3, "¥3,400").unwrap();

    // Row 3 is left completely blank
    sheet.write_string(4, 0, "丙公司").unwrap();
    sheet.write_number(4, 1, 0.0).unwrap();
    sheet.write_string(4, 2, "待定").unwrap();
    sheet.write_string(4, 3, "5,600").unwrap();

    save(&mut workbook, dir, "ledger.xlsx")
}

#[test]
fn single_header_is_trimmed_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let table = read_table(ledger(&dir), "xlsx", &ReaderOptions::default()).unwrap();

    assert_eq!(table.column_names(), vec!["客户", "余额", "到期日期", "授信额度"]);
    assert_eq!(table.column("余额").unwrap().kind(), ColumnKind::Numeric);
    assert_eq!(table.column("授信额度").unwrap().kind(), ColumnKind::Text);
}

#[test]
fn cleaning_a_workbook_coerces_and_drops() {
    let dir = tempfile::tempdir().unwrap();
    let table = read_table(ledger(&dir), ".XLSX", &ReaderOptions::default()).unwrap();
    let (table, report) = clean_table_with_report(table);

    assert_eq!(report.dropped_rows, 1);
    assert_eq!(table.height(), 3);

    let credit = table.column("授信额度").unwrap();
    assert_eq!(credit.kind(), ColumnKind::Numeric);
    assert_eq!(credit.values[0], CellValue::Number(1200.0));
    assert_eq!(credit.values[1], CellValue::Number(3400.0));

    let due = table.column("到期日期").unwrap();
    assert_eq!(due.kind(), ColumnKind::Timestamp);
    assert!(due.values[2].is_missing());
    assert_eq!(
        report.outcome("到期日期", Coercion::Timestamp),
        Some(ColumnOutcome::PartiallyNulled)
    );
}

#[test]
fn merged_group_header_is_flattened() {
    let dir = tempfile::tempdir().unwrap();
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let format = Format::new();

    sheet.write_string(0, 0, "部门").unwrap();
    sheet.merge_range(0, 1, 0, 2, "收入", &format).unwrap();
    sheet.write_string(1, 0, "名称").unwrap();
    sheet.write_string(1, 1, "一季度").unwrap();
    sheet.write_string(1, 2, "二季度").unwrap();
    sheet.write_string(2, 0, "销售部").unwrap();
    sheet.write_number(2, 1, 10.0).unwrap();
    sheet.write_number(2, 2, 12.0).unwrap();
    let path = save(&mut workbook, &dir, "grouped.xlsx");

    let flat = read_table(&path, "xlsx", &ReaderOptions::default()).unwrap();
    assert_eq!(flat.column_names(), vec!["部门", "收入", "列1"]);

    let table = read_table(&path, "xlsx", &options(HeaderLayout::Auto)).unwrap();
    assert_eq!(
        table.column_names(),
        vec!["部门_名称", "收入_一季度", "收入_二季度"]
    );
    assert_eq!(table.height(), 1);
    assert_eq!(table.column("收入_二季度").unwrap().values, vec![CellValue::Number(12.0)]);
}

#[test]
fn explicit_levels_handle_vertical_merges() {
    let dir = tempfile::tempdir().unwrap();
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let format = Format::new();

    sheet.merge_range(0, 0, 1, 0, "客户", &format).unwrap();
    sheet.merge_range(0, 1, 0, 2, "金额", &format).unwrap();
    sheet.write_string(1, 1, "期初").unwrap();
    sheet.write_string(1, 2, "期末").unwrap();
    sheet.write_string(2, 0, "甲").unwrap();
    sheet.write_number(2, 1, 1.0).unwrap();
    sheet.write_number(2, 2, 2.0).unwrap();
    let path = save(&mut workbook, &dir, "vertical.xlsx");

    let table = read_table(&path, "xlsx", &options(HeaderLayout::Levels(2))).unwrap();
    assert_eq!(table.column_names(), vec!["客户", "金额_期初", "金额_期末"]);

    let detected = read_table(&path, "xlsx", &options(HeaderLayout::Auto)).unwrap();
    assert_eq!(detected.column_names(), table.column_names());
    assert_eq!(detected.height(), 1);
}

#[test]
fn auto_layout_without_merges_reads_one_header_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    sheet.write_string(0, 0, "Name").unwrap();
    sheet.write_string(0, 2, "City").unwrap();
    sheet.write_string(1, 0, "Bob").unwrap();
    sheet.write_string(1, 1, "x").unwrap();
    sheet.write_string(1, 2, "NY").unwrap();
    sheet.write_string(2, 0, "Amy").unwrap();
    sheet.write_string(2, 1, "y").unwrap();
    sheet.write_string(2, 2, "LA").unwrap();
    let path = save(&mut workbook, &dir, "plain.xlsx");

    let table = read_table(&path, "xlsx", &options(HeaderLayout::Auto)).unwrap();
    assert_eq!(table.column_names(), vec!["Name", "列1", "City"]);
    assert_eq!(table.height(), 2);
    assert_eq!(
        table.column("Name").unwrap().values,
        vec![CellValue::text("Bob"), CellValue::text("Amy")]
    );
}

#[test]
fn blank_headers_are_numbered() {
    let dir = tempfile::tempdir().unwrap();
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    sheet.write_string(0, 0, "名称").unwrap();
    sheet.write_string(0, 2, "数量").unwrap();
    sheet.write_string(1, 0, "a").unwrap();
    sheet.write_string(1, 1, "b").unwrap();
    sheet.write_number(1, 2, 3.0).unwrap();
    sheet.write_number(1, 3, 4.0).unwrap();
    let path = save(&mut workbook, &dir, "blank.xlsx");

    let table = read_table(&path, "xlsx", &options(HeaderLayout::Single)).unwrap();
    assert_eq!(table.column_names(), vec!["名称", "列1", "数量", "列2"]);
}

#[test]
fn extension_is_checked_against_options() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("data.csv");
    std::fs::write(&csv, "名称,金额\n甲,\"1,200\"\n乙,30\n").unwrap();

    let err = read_table(&csv, "csv", &ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, ReadError::UnsupportedFormat(ref ext) if ext == ".csv"));

    let table = clean_table(read_table(&csv, "csv", &ReaderOptions::with_csv()).unwrap());
    assert_eq!(
        table.column("金额").unwrap().values,
        vec![CellValue::Number(1200.0), CellValue::Number(30.0)]
    );
}

#[test]
fn mismatched_content_is_a_read_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = ledger(&dir);

    // A zip-based workbook declared as legacy .xls
    let err = read_table(&path, "xls", &ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, ReadError::ReadFailure(_)));

    let missing = read_table(Path::new("/nonexistent/input.xlsx"), "xlsx", &ReaderOptions::default());
    assert!(matches!(missing, Err(ReadError::ReadFailure(_))));
}

#[test]
fn prompt_embeds_the_cleaned_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let table = clean_table(read_table(ledger(&dir), "xlsx", &ReaderOptions::default()).unwrap());
    let prompt = assemble_prompt(&table, DEFAULT_ANALYSIS_PROMPT, Some("哪个客户余额最高？"));

    assert!(prompt.starts_with("## 任务"));
    assert!(prompt.contains("客户,余额,到期日期,授信额度\n"));
    assert!(prompt.contains("甲公司,1200.5,2024-01-31,1200\n"));
    assert!(prompt.contains("丙公司,0,,5600\n"));
    assert!(prompt.trim_end().ends_with("哪个客户余额最高？"));
}
