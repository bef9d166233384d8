use crate::llm::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, LlmConfig};
use crate::reader::{HeaderLayout, ReaderOptions};
use crate::report::DEFAULT_REPORT_PREFIX;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Service settings, read once at startup and passed by value
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Public origin used to build download links
    pub server_base_url: String,
    pub report_dir: PathBuf,
    pub report_prefix: String,
    pub llm: LlmConfig,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub reader: ReaderOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            server_base_url: format!("http://localhost:{}", DEFAULT_PORT),
            report_dir: PathBuf::from("reports"),
            report_prefix: DEFAULT_REPORT_PREFIX.to_string(),
            llm: LlmConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            reader: ReaderOptions::default(),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset or empty keys use defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let port = parse_or(get("PORT"), "PORT", defaults.port)?;
        let llm_timeout = parse_or(get("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let request_timeout = parse_or(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let max_upload_mb = parse_or(get("MAX_UPLOAD_MB"), "MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ConfigError::Invalid {
                key: "MAX_UPLOAD_MB",
                value: max_upload_mb.to_string(),
            })?;
        let allow_csv = parse_bool_or(get("ALLOW_CSV"), "ALLOW_CSV", false)?;

        let api_key = get("XINGYUN_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            warn!("XINGYUN_API_KEY is not set; analysis requests will be rejected by the API");
        }

        let mut reader = if allow_csv {
            ReaderOptions::with_csv()
        } else {
            ReaderOptions::default()
        };
        reader.header = match get("HEADER_ROWS") {
            None => HeaderLayout::Single,
            Some(raw) if raw.trim().eq_ignore_ascii_case("auto") => HeaderLayout::Auto,
            Some(raw) => match parse_or(Some(raw), "HEADER_ROWS", 1usize)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: "HEADER_ROWS",
                        value: "0".to_string(),
                    });
                }
                1 => HeaderLayout::Single,
                n => HeaderLayout::Levels(n),
            },
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            server_base_url: get("SERVER_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            report_dir: get("REPORT_DIR").map(PathBuf::from).unwrap_or(defaults.report_dir),
            report_prefix: get("REPORT_PREFIX").unwrap_or(defaults.report_prefix),
            llm: LlmConfig {
                api_key,
                base_url: get("XINGYUN_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: get("LLM_MODEL"),
                timeout: Duration::from_secs(llm_timeout),
            },
            request_timeout: Duration::from_secs(request_timeout),
            max_upload_bytes,
            reader,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bool_or(raw: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.server_base_url, "http://localhost:8000");
        assert_eq!(config.report_dir, PathBuf::from("reports"));
        assert_eq!(config.llm.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert!(!config.reader.supports("csv"));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("SERVER_BASE_URL", "https://reports.example.com/"),
            ("XINGYUN_API_KEY", "k"),
            ("LLM_MODEL", "gpt-4o"),
            ("LLM_TIMEOUT_SECS", "30"),
            ("ALLOW_CSV", "true"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.server_base_url, "https://reports.example.com");
        assert_eq!(config.llm.api_key, "k");
        assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert!(config.reader.supports(".CSV"));
        assert_eq!(config.reader.header, HeaderLayout::Single);
    }

    #[test]
    fn header_rows_selects_layout() {
        let two = Config::from_lookup(lookup(&[("HEADER_ROWS", "2")])).unwrap();
        assert_eq!(two.reader.header, HeaderLayout::Levels(2));
        let one = Config::from_lookup(lookup(&[("HEADER_ROWS", "1")])).unwrap();
        assert_eq!(one.reader.header, HeaderLayout::Single);
        assert!(Config::from_lookup(lookup(&[("HEADER_ROWS", "0")])).is_err());
        let auto = Config::from_lookup(lookup(&[("HEADER_ROWS", " Auto ")])).unwrap();
        assert_eq!(auto.reader.header, HeaderLayout::Auto);
    }

    #[test]
    fn upload_limit_overflow_is_rejected() {
        let huge = usize::MAX.to_string();
        let err = Config::from_lookup(lookup(&[("MAX_UPLOAD_MB", huge.as_str())])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MAX_UPLOAD_MB",
                value: huge
            }
        );

        let small = Config::from_lookup(lookup(&[("MAX_UPLOAD_MB", "2")])).unwrap();
        assert_eq!(small.max_upload_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }
}
