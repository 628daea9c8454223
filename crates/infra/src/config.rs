//! Process configuration from the environment (and an optional `.env` file).

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Settings of the external invoice extraction API. Extraction of PDFs without embedded
/// e-invoice XML is disabled when the URL is not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_ttl_minutes: i64,
    pub database_url: Option<String>,
    pub storage_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub extraction: Option<ExtractionConfig>,
    pub recurring_min_occurrences: usize,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_EXTRACTION_MODEL: &str = "invoice-extraction";

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let extraction = get("EXTRACTION_API_URL").map(|api_url| ExtractionConfig {
            api_url,
            api_key: get("EXTRACTION_API_KEY"),
            model: get("EXTRACTION_MODEL").unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
        });

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            jwt_secret,
            jwt_ttl_minutes: parse_or(get("JWT_TTL_MINUTES"), "JWT_TTL_MINUTES", 60)?,
            database_url: get("DATABASE_URL"),
            storage_dir: get("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/files")),
            max_upload_bytes: parse_or(get("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            extraction,
            recurring_min_occurrences: parse_or(
                get("RECURRING_MIN_OCCURRENCES"),
                "RECURRING_MIN_OCCURRENCES",
                kontor_banking::DEFAULT_MIN_OCCURRENCES,
            )?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let c = config(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(c.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(c.jwt_ttl_minutes, 60);
        assert_eq!(c.max_upload_bytes, 10_485_760);
        assert_eq!(c.storage_dir, PathBuf::from("./data/files"));
        assert_eq!(c.recurring_min_occurrences, 3);
        assert!(c.database_url.is_none());
        assert!(c.extraction.is_none());
    }

    #[test]
    fn missing_secret_and_bad_numbers_are_errors() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("JWT_SECRET"))));
        assert!(matches!(
            config(&[("JWT_SECRET", "x"), ("MAX_UPLOAD_BYTES", "lots")]),
            Err(ConfigError::Invalid { key: "MAX_UPLOAD_BYTES", .. })
        ));
    }

    #[test]
    fn extraction_is_enabled_by_its_url() {
        let c = config(&[
            ("JWT_SECRET", "x"),
            ("EXTRACTION_API_URL", "http://localhost:9000/extract"),
            ("DATABASE_URL", " "),
        ])
        .unwrap();
        let e = c.extraction.unwrap();
        assert_eq!(e.model, DEFAULT_EXTRACTION_MODEL);
        assert!(e.api_key.is_none());
        assert!(c.database_url.is_none());
    }
}
