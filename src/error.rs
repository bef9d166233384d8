use crate::llm::LlmError;
use crate::reader::ReadError;
use crate::report::ReportError;
use thiserror::Error;

/// Failure of one end-to-end analysis run
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Report(#[from] ReportError),

    /// The spreadsheet could not be downloaded from the caller's URL
    #[error("从URL下载文件失败: {0}")]
    Fetch(String),

    #[error("临时文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("后台任务异常终止: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

impl AnalysisError {
    /// Errors caused by the caller's input rather than by the service
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalysisError::Read(ReadError::UnsupportedFormat(_)))
    }
}
