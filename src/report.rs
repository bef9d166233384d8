use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_REPORT_PREFIX: &str = "ai_analysis_report";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Gives up after this many same-second names are taken
const MAX_SUFFIX: u32 = 10_000;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("报告写入失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("无效的报告文件名: {0}")]
    InvalidName(String),

    #[error("报告文件 {0} 不存在")]
    NotFound(String),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Directory of generated reports, named by creation time
///
/// Names follow `prefix_YYYY-MM-DD_HH-MM-SS.html`. When that name is already
/// taken within the same second, `_2`, `_3`, ... is appended before the
/// extension. Files are created with create-new semantics, so concurrent
/// writers never overwrite each other.
#[derive(Clone, Debug)]
pub struct ReportStore {
    dir: PathBuf,
    prefix: String,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes an HTML report stamped with the current local time
    ///
    /// # Returns
    /// * The report's file name, which is also its identifier for [`ReportStore::read`]
    pub fn save(&self, html: &str) -> ReportResult<String> {
        self.save_at(html, Local::now().naive_local())
    }

    pub fn save_at(&self, html: &str, at: NaiveDateTime) -> ReportResult<String> {
        let name = self.write_new(html.as_bytes(), at)?;
        info!("Report saved: {}", self.dir.join(&name).display());
        Ok(name)
    }

    fn write_new(&self, bytes: &[u8], at: NaiveDateTime) -> ReportResult<String> {
        fs::create_dir_all(&self.dir)?;
        let base = format!("{}_{}", self.prefix, at.format(TIMESTAMP_FORMAT));

        for n in 1..=MAX_SUFFIX {
            let name = if n == 1 {
                format!("{}.html", base)
            } else {
                format!("{}_{}.html", base, n)
            };
            let path = self.dir.join(&name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_discard(file, &path, bytes)?;
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReportError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free report name for {}", base),
        )))
    }

    /// Path of a stored report, after checking the name stays inside the store
    pub fn path_of(&self, name: &str) -> ReportResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && !name.contains("..")
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(ReportError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    pub fn read(&self, name: &str) -> ReportResult<String> {
        let path = self.path_of(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ReportError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes a freshly created file, removing it again if the write fails
fn write_or_discard<W: Write>(mut file: W, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let written = file.write_all(bytes).and_then(|()| file.flush());
    if let Err(e) = written {
        drop(file);
        if let Err(remove) = fs::remove_file(path) {
            warn!("Failed to remove partial report {}: {}", path.display(), remove);
        }
        return Err(e);
    }
    Ok(())
}
