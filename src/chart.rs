use crate::prompt::{format_number, format_timestamp};
use crate::table::{CellValue, ColumnKind, Table};
use plotters::prelude::*;
use thiserror::Error;

/// Charts generated per report at most
pub const MAX_CHARTS: usize = 4;

/// Category labels drawn on the x axis at most
const MAX_X_LABELS: usize = 12;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("图表绘制失败: {0}")]
    Render(String),

    #[error("列 '{0}' 没有可绘制的数值")]
    NoData(String),
}

pub type ChartResult<T> = Result<T, ChartError>;

/// Available chart types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// Bars per category, used when rows are labelled by text
    Bar,
    /// Connected points, used when rows are labelled by time
    Line,
}

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,

    /// Type of chart to draw
    pub kind: ChartKind,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: String::new(),
            y_label: String::new(),
            width: 800,
            height: 450,
            kind: ChartKind::Bar,
        }
    }
}

/// One numeric column paired with the labels of its rows
#[derive(Clone, Debug, PartialEq)]
pub struct ChartSeries {
    pub label_column: Option<String>,
    pub value_column: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub kind: ChartKind,
}

impl ChartSeries {
    pub fn options(&self) -> ChartOptions {
        let x_label = self.label_column.clone().unwrap_or_else(|| "行号".to_string());
        ChartOptions {
            title: format!("{} / {}", self.value_column, x_label),
            x_label,
            y_label: self.value_column.clone(),
            kind: self.kind,
            ..ChartOptions::default()
        }
    }
}

/// Picks up to `max_charts` numeric columns to chart against a label column
///
/// The first timestamp column labels the rows if there is one (drawn as a
/// line chart), otherwise the first text column (bar chart), otherwise the
/// 1-based row number. Rows whose value is missing are skipped.
pub fn plan_charts(table: &Table, max_charts: usize) -> Vec<ChartSeries> {
    let label_column = table
        .columns
        .iter()
        .find(|c| c.kind() == ColumnKind::Timestamp && !c.is_empty())
        .or_else(|| {
            table
                .columns
                .iter()
                .find(|c| c.kind() == ColumnKind::Text && !c.is_empty())
        });
    let kind = match label_column.map(|c| c.kind()) {
        Some(ColumnKind::Timestamp) => ChartKind::Line,
        _ => ChartKind::Bar,
    };

    table
        .columns
        .iter()
        .filter(|c| c.kind() == ColumnKind::Numeric && !c.is_empty())
        .take(max_charts)
        .map(|column| {
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for (i, value) in column.values.iter().enumerate() {
                let Some(v) = value.as_number() else { continue };
                let label = match label_column.map(|c| &c.values[i]) {
                    Some(CellValue::Text(s)) => s.clone(),
                    Some(CellValue::Timestamp(ts)) => format_timestamp(ts),
                    Some(CellValue::Number(n)) => format_number(*n),
                    Some(CellValue::Missing) => String::new(),
                    None => (i + 1).to_string(),
                };
                labels.push(label);
                values.push(v);
            }
            ChartSeries {
                label_column: label_column.map(|c| c.name.clone()),
                value_column: column.name.clone(),
                labels,
                values,
                kind,
            }
        })
        .collect()
}

/// Y range covering every value and zero, with a little headroom
pub fn value_range(values: &[f64]) -> (f64, f64) {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (max - min).abs() < f64::EPSILON {
        return (min, min + 1.0);
    }
    let pad = (max - min) * 0.05;
    (if min < 0.0 { min - pad } else { min }, max + pad)
}

fn render_error(err: impl std::fmt::Display) -> ChartError {
    ChartError::Render(err.to_string())
}

/// Renders a series as an SVG document
///
/// # Errors
/// * `NoData` if the series holds no values
/// * `Render` if plotters fails, for example when no font is available for labels
pub fn render_svg(series: &ChartSeries, options: &ChartOptions) -> ChartResult<String> {
    if series.values.is_empty() {
        return Err(ChartError::NoData(series.value_column.clone()));
    }

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;

        let n = series.values.len() as f64;
        let (y_min, y_max) = value_range(&series.values);
        let labels = &series.labels;
        let formatter = |x: &f64| {
            labels
                .get(x.floor().max(0.0) as usize)
                .cloned()
                .unwrap_or_default()
        };

        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 24).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..n, y_min..y_max)
            .map_err(render_error)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(series.labels.len().min(MAX_X_LABELS))
            .x_label_formatter(&formatter)
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()
            .map_err(render_error)?;

        match options.kind {
            ChartKind::Bar => {
                let base = 0.0_f64.clamp(y_min, y_max);
                chart
                    .draw_series(series.values.iter().enumerate().map(|(i, &v)| {
                        let x = i as f64;
                        Rectangle::new([(x + 0.15, base), (x + 0.85, v)], BLUE.filled())
                    }))
                    .map_err(render_error)?;
            }
            ChartKind::Line => {
                chart
                    .draw_series(LineSeries::new(
                        series
                            .values
                            .iter()
                            .enumerate()
                            .map(|(i, &v)| (i as f64 + 0.5, v)),
                        &BLUE,
                    ))
                    .map_err(render_error)?;
                chart
                    .draw_series(
                        series
                            .values
                            .iter()
                            .enumerate()
                            .map(|(i, &v)| Circle::new((i as f64 + 0.5, v), 3, BLUE.filled())),
                    )
                    .map_err(render_error)?;
            }
        }

        root.present().map_err(render_error)?;
    }

    Ok(svg)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Builds the chart pipeline's report page: rendered charts first, then the
/// model's explanation fragment
pub fn chart_report_html(title: &str, charts: &[(String, String)], explanation: &str) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"zh-CN\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("<title>{}</title>\n", escape_html(title)));
    html.push_str(
        "<style>body{font-family:sans-serif;max-width:960px;margin:0 auto;padding:24px;}\
         figure{margin:24px 0;}figure svg{width:100%;height:auto;}</style>\n",
    );
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n", escape_html(title)));

    for (caption, svg) in charts {
        html.push_str("<figure>\n");
        html.push_str(svg);
        html.push_str(&format!(
            "\n<figcaption>{}</figcaption>\n</figure>\n",
            escape_html(caption)
        ));
    }

    html.push_str("<article>\n");
    html.push_str(explanation);
    html.push_str("\n</article>\n</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn text_labels_give_bar_charts() {
        let table = Table::new(vec![
            Column::new("客户", vec![CellValue::text("甲"), CellValue::text("乙")]),
            Column::new("额度", vec![CellValue::Number(100.0), CellValue::Missing]),
            Column::new("余额", vec![CellValue::Number(40.0), CellValue::Number(60.0)]),
        ]);
        let plans = plan_charts(&table, MAX_CHARTS);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].kind, ChartKind::Bar);
        assert_eq!(plans[0].labels, vec!["甲"]);
        assert_eq!(plans[0].values, vec![100.0]);
        assert_eq!(plans[1].labels, vec!["甲", "乙"]);
    }

    #[test]
    fn timestamp_labels_give_line_charts() {
        let day = |d| {
            CellValue::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, d)
                    .unwrap()
                    .and_time(NaiveTime::MIN),
            )
        };
        let table = Table::new(vec![
            Column::new("备注", vec![CellValue::text("a"), CellValue::text("b")]),
            Column::new("日期", vec![day(1), day(2)]),
            Column::new("金额", vec![CellValue::Number(1.0), CellValue::Number(2.0)]),
        ]);
        let plans = plan_charts(&table, MAX_CHARTS);

        assert_eq!(plans[0].kind, ChartKind::Line);
        assert_eq!(plans[0].label_column.as_deref(), Some("日期"));
        assert_eq!(plans[0].labels, vec!["2024-01-01", "2024-01-02"]);
    }

    #[test]
    fn row_numbers_label_tables_without_text() {
        let table = Table::new(vec![Column::new(
            "v",
            vec![CellValue::Number(5.0), CellValue::Number(6.0)],
        )]);
        let plans = plan_charts(&table, 1);
        assert_eq!(plans[0].labels, vec!["1", "2"]);
        assert_eq!(plans[0].options().x_label, "行号");
    }

    #[test]
    fn range_includes_zero_and_pads() {
        assert_eq!(value_range(&[]), (0.0, 1.0));
        let (lo, hi) = value_range(&[10.0, 20.0]);
        assert_eq!(lo, 0.0);
        assert!(hi > 20.0);
        let (lo, _) = value_range(&[-5.0, 5.0]);
        assert!(lo < -5.0);
    }

    #[test]
    fn report_page_escapes_titles() {
        let html = chart_report_html(
            "<b>报告</b>",
            &[("余额".to_string(), "<svg></svg>".to_string())],
            "<p>解读</p>",
        );
        assert!(html.contains("<title>&lt;b&gt;报告&lt;/b&gt;</title>"));
        assert!(html.contains("<svg></svg>"));
        assert!(html.find("<svg>").unwrap() < html.find("<p>解读</p>").unwrap());
    }

    #[test]
    fn empty_series_is_rejected_before_drawing() {
        let series = ChartSeries {
            label_column: None,
            value_column: "v".to_string(),
            labels: vec![],
            values: vec![],
            kind: ChartKind::Bar,
        };
        assert!(matches!(
            render_svg(&series, &series.options()),
            Err(ChartError::NoData(_))
        ));
    }
}
