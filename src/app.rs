use axum::{
    Form, Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AnalysisError, AnalysisResult};
use crate::pipeline::{AnalysisPipeline, spool_upload};
use crate::reader::{ReadError, ReaderOptions, extension_of};
use crate::report::ReportError;

pub struct AppState {
    pub config: Config,
    pub pipeline: AnalysisPipeline,
}

impl AppState {
    pub fn new(config: Config) -> AnalysisResult<Self> {
        let pipeline = AnalysisPipeline::new(&config)?;
        Ok(Self { config, pipeline })
    }
}

/// JSON error body `{"error": ..., "message": ...}` with its status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    fn bad_request(error: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, message)
    }

    fn unsupported_format(options: &ReaderOptions) -> Self {
        Self::bad_request(
            "不支持的文件格式",
            format!("只支持{}格式的文件", supported_label(options)),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            warn!("请求被拒绝 ({}): {} - {}", self.status, self.error, self.message);
        }
        (
            self.status,
            Json(json!({"error": self.error, "message": self.message})),
        )
            .into_response()
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        error!("分析文件时出错: {}", err);
        match err {
            AnalysisError::Read(ReadError::UnsupportedFormat(_)) => {
                ApiError::bad_request("不支持的文件格式", err.to_string())
            }
            AnalysisError::Fetch(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "文件下载失败", err.to_string())
            }
            _ => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "分析失败",
                format!("处理文件时发生错误: {}", err),
            ),
        }
    }
}

#[derive(Serialize)]
struct DownloadResponse {
    success: bool,
    message: String,
    download_url: String,
    filename: String,
    timestamp: String,
}

#[derive(Deserialize, Default)]
struct UrlAnalysisRequest {
    file_url: Option<String>,
    file_name: Option<String>,
    uid: Option<String>,
    question: Option<String>,
}

/// A spooled upload and the form fields sent with it
struct Upload {
    file: NamedTempFile,
    extension: String,
    uid: String,
    question: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    let timeout = state.config.request_timeout;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/analyze/download", post(analyze_download))
        .route("/analyze/charts", post(analyze_charts))
        .route("/analyze_by_file_url", post(analyze_by_file_url))
        .route("/download/:filename", get(download_report))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr();
    let app_state = Arc::new(AppState::new(config)?);
    info!("报告目录: {}", app_state.pipeline.store().dir().display());

    let app = router(app_state);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "message": "Excel分析API服务",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/analyze": "POST - 上传Excel文件进行分析 (参数: file, uid可选, question可选)",
            "/analyze/download": "POST - 上传Excel文件并返回下载链接 (参数: file, uid可选, question可选)",
            "/analyze/charts": "POST - 上传Excel文件, 生成图表并解读, 返回下载链接 (参数同上)",
            "/analyze_by_file_url": "POST - 通过文件URL分析Excel文件 (支持JSON和表单数据格式，参数: file_url, file_name, uid可选)",
            "/download/<filename>": "GET - 下载生成的报告",
            "/health": "GET - 健康检查",
        }
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
        "service": "data-analysis-api",
    }))
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = receive_upload(&state, multipart).await?;
    let name = state
        .pipeline
        .analyze_file(
            upload.file.path(),
            &upload.extension,
            Some(upload.uid.as_str()),
            upload.question.as_deref(),
        )
        .await?;
    let html = state.pipeline.store().read(&name).map_err(AnalysisError::from)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        html,
    )
        .into_response())
}

async fn analyze_download(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let upload = receive_upload(&state, multipart).await?;
    let name = state
        .pipeline
        .analyze_file(
            upload.file.path(),
            &upload.extension,
            Some(upload.uid.as_str()),
            upload.question.as_deref(),
        )
        .await?;
    Ok(Json(download_response(&state.config, name)))
}

async fn analyze_charts(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>, ApiError> {
    let upload = receive_upload(&state, multipart).await?;
    let name = state
        .pipeline
        .analyze_with_charts(
            upload.file.path(),
            &upload.extension,
            Some(upload.uid.as_str()),
            upload.question.as_deref(),
        )
        .await?;
    Ok(Json(download_response(&state.config, name)))
}

async fn analyze_by_file_url(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<DownloadResponse>, ApiError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let params = if is_json {
        let Json(params) = Json::<UrlAnalysisRequest>::from_request(request, &())
            .await
            .map_err(|e| {
                ApiError::bad_request("JSON格式错误", format!("无法解析JSON数据: {}", e.body_text()))
            })?;
        params
    } else {
        // Bodies that are not a urlencoded form carry no parameters
        Form::<UrlAnalysisRequest>::from_request(request, &())
            .await
            .map(|Form(params)| params)
            .unwrap_or_default()
    };

    let file_url = non_empty(params.file_url);
    let file_name = non_empty(params.file_name);
    let (Some(file_url), Some(file_name)) = (file_url, file_name) else {
        return Err(ApiError::bad_request(
            "文件URL或文件名缺失",
            "请提供file_url和file_name参数",
        ));
    };

    let extension = extension_of(&file_name).unwrap_or_default();
    if !state.pipeline.reader().supports(&extension) {
        return Err(ApiError::unsupported_format(state.pipeline.reader()));
    }

    let uid = non_empty(params.uid).unwrap_or_else(generate_uid);
    info!("通过URL分析文件: {} ({}), uid={}", file_name, file_url, uid);

    let name = state
        .pipeline
        .analyze_url(&file_url, &file_name, Some(uid.as_str()), non_empty(params.question).as_deref())
        .await?;
    Ok(Json(download_response(&state.config, name)))
}

async fn download_report(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Html<String>, ApiError> {
    match state.pipeline.store().read(&filename) {
        Ok(html) => Ok(Html(html)),
        Err(e @ ReportError::NotFound(_)) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "文件不存在",
            e.to_string(),
        )),
        Err(e @ ReportError::InvalidName(_)) => {
            Err(ApiError::bad_request("无效的文件名", e.to_string()))
        }
        Err(e) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "下载失败",
            format!("下载文件时发生错误: {}", e),
        )),
    }
}

/// Reads the multipart form and spools the `file` field to a temp file
async fn receive_upload(state: &AppState, mut multipart: Multipart) -> Result<Upload, ApiError> {
    let options = state.pipeline.reader();
    let mut file = None;
    let mut misnamed_file = false;
    let mut uid = None;
    let mut question = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("请求格式错误", e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request("文件读取失败", e.to_string()))?;
                file = Some((file_name, bytes));
            }
            "uid" | "question" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request("请求格式错误", e.to_string()))?;
                if name == "uid" {
                    uid = non_empty(Some(value));
                } else {
                    question = non_empty(Some(value));
                }
            }
            _ => misnamed_file |= field.file_name().is_some(),
        }
    }

    let Some((file_name, bytes)) = file else {
        return Err(if misnamed_file {
            ApiError::bad_request(
                "文件参数错误",
                format!("请使用'file'参数上传{}文件", supported_label(options)),
            )
        } else {
            ApiError::bad_request(
                "没有上传文件",
                format!("请上传{}文件", supported_label(options)),
            )
        });
    };

    let extension = extension_of(&file_name).unwrap_or_default();
    if !options.supports(&extension) {
        return Err(ApiError::unsupported_format(options));
    }

    info!("收到上传文件: {} ({} 字节)", file_name, bytes.len());
    let file = spool_upload(&bytes, &extension)?;
    Ok(Upload {
        file,
        extension,
        uid: uid.unwrap_or_else(generate_uid),
        question,
    })
}

fn download_response(config: &Config, filename: String) -> DownloadResponse {
    DownloadResponse {
        success: true,
        message: "分析完成".to_string(),
        download_url: format!(
            "{}/download/{}",
            config.server_base_url,
            urlencoding::encode(&filename)
        ),
        filename,
        timestamp: Local::now().to_rfc3339(),
    }
}

/// `user_` followed by 8 hex characters
pub fn generate_uid() -> String {
    let id = Uuid::new_v4().simple().to_string();
    let uid = format!("user_{}", &id[..8]);
    info!("Generated uid: {}", uid);
    uid
}

/// e.g. `(.xlsx或.xls)`
fn supported_label(options: &ReaderOptions) -> String {
    let extensions: Vec<String> = options
        .supported_extensions
        .iter()
        .map(|e| format!(".{}", e.trim_start_matches('.')))
        .collect();
    format!("({})", extensions.join("或"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
