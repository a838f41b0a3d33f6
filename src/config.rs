use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Placeholder value shipped in `.env.example`; treated the same as a missing key.
pub const PLACEHOLDER_API_KEY: &str = "your-gemini-api-key-here";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

/// Percent-difference cut-offs used to rank discrepancies.
///
/// A discrepancy is HIGH when its percent difference is strictly greater than
/// `high_pct`, MEDIUM when strictly greater than `medium_pct`, LOW otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    pub high_pct: f64,
    pub medium_pct: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high_pct: 20.0,
            medium_pct: 10.0,
        }
    }
}

/// Tuning knobs for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub temperature: f32,
    pub quick_temperature: f32,
    pub prefer_overcount: bool,
    pub thresholds: SeverityThresholds,
    /// Number of documents analysed at once. 1 keeps the batch sequential.
    pub batch_concurrency: usize,
    /// Caller-level retry budget for transient payload preparation failures.
    /// Zero disables retries.
    pub prepare_retry_max_elapsed: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            quick_temperature: 0.2,
            prefer_overcount: true,
            thresholds: SeverityThresholds::default(),
            batch_concurrency: 1,
            prepare_retry_max_elapsed: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Vision model
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub gemini_upload_base: String,
    pub gemini_timeout_seconds: u64,
    pub upload_poll_interval_ms: u64,
    pub upload_poll_max_attempts: u32,

    // Analysis
    pub analysis_temperature: f32,
    pub batch_concurrency: usize,
    pub prepare_retry_max_elapsed_seconds: u64,
    pub severity_high_pct: f64,
    pub severity_medium_pct: f64,
    pub prefer_overcount: bool,

    // Request limits
    pub max_upload_bytes: usize,

    /// How long finished batches stay pollable.
    pub batch_retention_seconds: u64,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Trims the API key, rejecting a blank or placeholder value.
pub fn validate_api_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() || key == PLACEHOLDER_API_KEY {
        bail!("GEMINI_API_KEY is not configured (set it in the environment or .env file)");
    }
    Ok(key.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Vision model
        let gemini_api_key =
            validate_api_key(&env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?)?;
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let gemini_api_base = env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
        let gemini_upload_base = env::var("GEMINI_UPLOAD_BASE").unwrap_or_else(|_| {
            "https://generativelanguage.googleapis.com/upload/v1beta".to_string()
        });
        let gemini_timeout_seconds = parse_or("GEMINI_TIMEOUT_SECONDS", 120); // LLM calls are slow
        let upload_poll_interval_ms = parse_or("UPLOAD_POLL_INTERVAL_MS", 1000);
        let upload_poll_max_attempts = parse_or("UPLOAD_POLL_MAX_ATTEMPTS", 60);

        // Analysis
        let analysis_temperature = parse_or("ANALYSIS_TEMPERATURE", 0.1);
        let batch_concurrency = parse_or("BATCH_CONCURRENCY", 1usize).max(1);
        let prepare_retry_max_elapsed_seconds = parse_or("PREPARE_RETRY_MAX_ELAPSED_SECONDS", 0);
        let severity_high_pct = parse_or("SEVERITY_HIGH_PCT", 20.0);
        let severity_medium_pct = parse_or("SEVERITY_MEDIUM_PCT", 10.0);
        let prefer_overcount = parse_or("PREFER_OVERCOUNT", true);

        let max_upload_bytes = parse_or("MAX_UPLOAD_BYTES", 100 * 1024 * 1024);
        let batch_retention_seconds = parse_or("BATCH_RETENTION_SECONDS", 60 * 60);

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            gemini_api_key,
            gemini_model,
            gemini_api_base,
            gemini_upload_base,
            gemini_timeout_seconds,
            upload_poll_interval_ms,
            upload_poll_max_attempts,
            analysis_temperature,
            batch_concurrency,
            prepare_retry_max_elapsed_seconds,
            severity_high_pct,
            severity_medium_pct,
            prefer_overcount,
            max_upload_bytes,
            batch_retention_seconds,
        })
    }

    pub fn analysis(&self) -> AnalysisSettings {
        AnalysisSettings {
            temperature: self.analysis_temperature,
            prefer_overcount: self.prefer_overcount,
            thresholds: SeverityThresholds {
                high_pct: self.severity_high_pct,
                medium_pct: self.severity_medium_pct,
            },
            batch_concurrency: self.batch_concurrency,
            prepare_retry_max_elapsed: Duration::from_secs(self.prepare_retry_max_elapsed_seconds),
            ..AnalysisSettings::default()
        }
    }

    pub fn upload_poll_interval(&self) -> Duration {
        Duration::from_millis(self.upload_poll_interval_ms)
    }

    pub fn batch_retention(&self) -> Duration {
        Duration::from_secs(self.batch_retention_seconds)
    }
}

#[cfg(test)]
impl Settings {
    /// Dev settings pointing the model client at `api_base`.
    pub(crate) fn for_tests(api_base: &str) -> Self {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".into(),
            cors_allow_origins: vec!["http://localhost:3000".into()],
            gemini_api_key: "test-key".into(),
            gemini_model: "gemini-test".into(),
            gemini_api_base: api_base.to_string(),
            gemini_upload_base: format!("{}/upload", api_base),
            gemini_timeout_seconds: 5,
            upload_poll_interval_ms: 5,
            upload_poll_max_attempts: 2,
            analysis_temperature: 0.1,
            batch_concurrency: 1,
            prepare_retry_max_elapsed_seconds: 0,
            severity_high_pct: 20.0,
            severity_medium_pct: 10.0,
            prefer_overcount: true,
            max_upload_bytes: 1024 * 1024,
            batch_retention_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from_str("production"), Environment::Prod);
        assert_eq!(Environment::from_str("PROD"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything"), Environment::Dev);
    }

    #[test]
    fn test_placeholder_key_rejected() {
        assert!(validate_api_key("").is_err());
        assert!(validate_api_key("   ").is_err());
        assert!(validate_api_key(PLACEHOLDER_API_KEY).is_err());
        assert!(validate_api_key("AIzaSyRealLookingKey").is_ok());
    }

    #[test]
    fn test_api_key_is_stored_trimmed() {
        assert_eq!(validate_api_key("  AIzaSyKey\n").unwrap(), "AIzaSyKey");
        assert_eq!(validate_api_key("\tAIzaSyKey ").unwrap(), "AIzaSyKey");
    }

    #[test]
    fn test_default_thresholds() {
        let t = SeverityThresholds::default();
        assert_eq!(t.high_pct, 20.0);
        assert_eq!(t.medium_pct, 10.0);
    }
}
