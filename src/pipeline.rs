//! End-to-end analysis: read, clean, prompt, call the model, store the report.

use crate::chart::{MAX_CHARTS, chart_report_html, plan_charts, render_svg};
use crate::cleaner::clean_table_with_report;
use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::llm::LlmClient;
use crate::prompt::{CHART_EXPLANATION_PROMPT, DEFAULT_ANALYSIS_PROMPT, assemble_prompt};
use crate::reader::{
    ReadError, ReadResult, ReaderOptions, extension_of, normalize_extension, read_table,
};
use crate::report::ReportStore;
use crate::table::Table;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

const CHART_REPORT_TITLE: &str = "数据分析图表报告";

/// Charts rendered for one chart report
#[derive(Clone, Debug)]
pub struct RenderedChart {
    pub caption: String,
    pub svg: String,
}

#[derive(Clone, Debug)]
pub struct AnalysisPipeline {
    reader: ReaderOptions,
    llm: LlmClient,
    store: ReportStore,
    http_client: Client,
    max_download_bytes: usize,
}

impl AnalysisPipeline {
    pub fn new(config: &Config) -> AnalysisResult<Self> {
        let llm = LlmClient::new(config.llm.clone())?;
        let store = ReportStore::new(&config.report_dir, &config.report_prefix);
        let http_client = Client::builder()
            .timeout(config.llm.timeout)
            .build()
            .map_err(|e| AnalysisError::Fetch(e.to_string()))?;
        Ok(Self {
            reader: config.reader.clone(),
            llm,
            store,
            http_client,
            max_download_bytes: config.max_upload_bytes,
        })
    }

    pub fn reader(&self) -> &ReaderOptions {
        &self.reader
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    /// Reads and cleans a spreadsheet on the blocking pool
    pub async fn load_table(&self, path: &Path, extension: &str) -> AnalysisResult<Table> {
        let path = path.to_path_buf();
        let extension = extension.to_string();
        let options = self.reader.clone();

        let table = tokio::task::spawn_blocking(move || -> ReadResult<Table> {
            let table = read_table(&path, &extension, &options)?;
            let (table, report) = clean_table_with_report(table);
            debug!(
                "清洗完成: 删除 {} 行, {} 列, 重命名 {:?}, 转换 {:?}",
                report.dropped_rows, report.dropped_columns, report.renamed, report.coercions
            );
            Ok(table)
        })
        .await??;

        info!(
            "数据加载完成: {} 行 x {} 列, 列名 {:?}",
            table.height(),
            table.width(),
            table.column_names()
        );
        Ok(table)
    }

    /// Runs the direct HTML pipeline on a local file
    ///
    /// # Arguments
    /// * `path` - Spreadsheet on disk
    /// * `extension` - Declared extension of the upload
    /// * `chat_id` - Conversation id forwarded to the model
    /// * `question` - Optional question appended to the prompt
    ///
    /// # Returns
    /// * The stored report's name
    pub async fn analyze_file(
        &self,
        path: &Path,
        extension: &str,
        chat_id: Option<&str>,
        question: Option<&str>,
    ) -> AnalysisResult<String> {
        let table = self.load_table(path, extension).await?;
        let prompt = assemble_prompt(&table, DEFAULT_ANALYSIS_PROMPT, question);
        info!("提示词长度: {} 字符", prompt.chars().count());

        let html = self.llm.chat_with_text(&prompt, chat_id).await?;
        Ok(self.store.save(&html)?)
    }

    /// Runs the chart pipeline: charts are drawn locally and the model only
    /// writes the explanation that follows them
    pub async fn analyze_with_charts(
        &self,
        path: &Path,
        extension: &str,
        chat_id: Option<&str>,
        question: Option<&str>,
    ) -> AnalysisResult<String> {
        let table = self.load_table(path, extension).await?;
        let (table, charts) = tokio::task::spawn_blocking(move || {
            let charts = render_charts(&table);
            (table, charts)
        })
        .await?;

        let template = chart_prompt(&charts);
        let prompt = assemble_prompt(&table, &template, question);
        info!(
            "提示词长度: {} 字符, 图表 {} 张",
            prompt.chars().count(),
            charts.len()
        );

        let explanation = self.llm.chat_with_text(&prompt, chat_id).await?;
        let figures: Vec<(String, String)> = charts
            .into_iter()
            .map(|chart| (chart.caption, chart.svg))
            .collect();
        let html = chart_report_html(CHART_REPORT_TITLE, &figures, &explanation);
        Ok(self.store.save(&html)?)
    }

    /// Downloads a spreadsheet and runs the direct HTML pipeline on it
    ///
    /// The extension is taken from `file_name` and checked before anything is
    /// downloaded.
    pub async fn analyze_url(
        &self,
        file_url: &str,
        file_name: &str,
        chat_id: Option<&str>,
        question: Option<&str>,
    ) -> AnalysisResult<String> {
        let extension = extension_of(file_name).unwrap_or_default();
        if !self.reader.supports(&extension) {
            return Err(ReadError::UnsupportedFormat(format!(".{}", extension)).into());
        }

        let file = fetch_to_tempfile(
            &self.http_client,
            file_url,
            &extension,
            self.max_download_bytes,
        )
        .await?;
        self.analyze_file(file.path(), &extension, chat_id, question)
            .await
    }
}

/// Plans and renders the charts for a table, skipping any that fail to draw
pub fn render_charts(table: &Table) -> Vec<RenderedChart> {
    plan_charts(table, MAX_CHARTS)
        .into_iter()
        .filter_map(|series| {
            let options = series.options();
            match render_svg(&series, &options) {
                Ok(svg) => Some(RenderedChart {
                    caption: options.title,
                    svg,
                }),
                Err(e) => {
                    warn!("跳过图表 '{}': {}", options.title, e);
                    None
                }
            }
        })
        .collect()
}

/// Chart explanation template followed by the list of chart titles
pub fn chart_prompt(charts: &[RenderedChart]) -> String {
    let mut template = CHART_EXPLANATION_PROMPT.trim_end().to_string();
    template.push_str("\n\n## 图表清单\n");
    if charts.is_empty() {
        template.push_str("（数据中没有可绘制的数值列，本报告不含图表）\n");
    }
    for (i, chart) in charts.iter().enumerate() {
        template.push_str(&format!("{}. {}\n", i + 1, chart.caption));
    }
    template
}

/// Streams a remote file into a named temporary file with the given extension
///
/// # Errors
/// * `Fetch` if the request fails, the status is not 200, or the body grows
///   past `max_bytes`
pub async fn fetch_to_tempfile(
    client: &Client,
    url: &str,
    extension: &str,
    max_bytes: usize,
) -> AnalysisResult<NamedTempFile> {
    info!("开始下载文件: {}", url);
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AnalysisError::Fetch(e.to_string()))?;

    let status = response.status();
    if status != StatusCode::OK {
        warn!("文件下载返回状态 {}: {}", status.as_u16(), url);
        return Err(AnalysisError::Fetch(status.as_u16().to_string()));
    }
    if let Some(length) = response.content_length().filter(|len| *len > max_bytes as u64) {
        warn!("文件大小 {} 字节超过上限 {} 字节: {}", length, max_bytes, url);
        return Err(too_large(max_bytes));
    }

    let mut file = Builder::new()
        .prefix("upload_")
        .suffix(&format!(".{}", normalize_extension(extension)))
        .tempfile()?;
    let mut size = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AnalysisError::Fetch(e.to_string()))?
    {
        size += chunk.len();
        if size > max_bytes {
            warn!("文件下载超过上限 {} 字节: {}", max_bytes, url);
            return Err(too_large(max_bytes));
        }
        file.write_all(&chunk)?;
    }
    file.flush()?;

    info!("文件下载完成: {} 字节", size);
    Ok(file)
}

fn too_large(max_bytes: usize) -> AnalysisError {
    AnalysisError::Fetch(format!("file exceeds {} bytes", max_bytes))
}

/// Writes uploaded bytes to a named temporary file with the given extension
pub fn spool_upload(bytes: &[u8], extension: &str) -> AnalysisResult<NamedTempFile> {
    let mut file = Builder::new()
        .prefix("upload_")
        .suffix(&format!(".{}", normalize_extension(extension)))
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
