use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::models::capture::{ScreenType, Viewport};
use crate::services::retry::{Backoff, RetryPolicy};

/// Runtime configuration, read from `VERIFY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directory holding task, request and summary records.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory screenshots and capture reports are written to.
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,

    /// Directory for the append-only audit log. Unset disables file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Optional Prometheus textfile written when a command exits.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,

    /// Optional JSON file overriding viewports and capture types.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Address of the application under test.
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Base URL of the headless browser screenshot service.
    #[serde(default = "default_capture_backend_url")]
    pub capture_backend_url: String,

    /// Bearer token for the screenshot service, if it needs one.
    #[serde(default)]
    pub capture_backend_token: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_capture_max_attempts")]
    pub capture_max_attempts: u32,

    #[serde(default = "default_capture_retry_delay_ms")]
    pub capture_retry_delay_ms: u64,

    /// Multiplier applied to the retry delay after each failed attempt (1.0 = fixed).
    #[serde(default = "default_backoff_factor")]
    pub capture_backoff_factor: f64,

    #[serde(default = "default_capture_max_delay_ms")]
    pub capture_max_delay_ms: u64,

    #[serde(default = "default_capture_attempt_timeout_ms")]
    pub capture_attempt_timeout_ms: u64,

    /// Concurrent captures allowed against the browser backend.
    #[serde(default = "default_capture_max_concurrency")]
    pub capture_max_concurrency: usize,

    #[serde(default = "default_review_timeout_ms")]
    pub review_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub poll_backoff_factor: f64,

    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,

    /// Automated approvals below this confidence count as rejections.
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,

    #[serde(skip, default = "default_viewports")]
    pub viewports: BTreeMap<String, Viewport>,

    #[serde(skip, default = "default_screen_types")]
    pub screen_types: Vec<ScreenType>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("verification")
}

fn default_captures_dir() -> PathBuf {
    PathBuf::from("captures")
}

fn default_target_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_capture_backend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) ",
        "AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
    )
    .to_string()
}

fn default_capture_max_attempts() -> u32 {
    3
}

fn default_capture_retry_delay_ms() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_capture_max_delay_ms() -> u64 {
    30_000
}

fn default_capture_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_capture_max_concurrency() -> usize {
    2
}

fn default_review_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_interval_ms() -> u64 {
    10_000
}

fn default_auto_approve_threshold() -> f64 {
    0.8
}

pub fn default_viewports() -> BTreeMap<String, Viewport> {
    BTreeMap::from([
        (
            "iphone16pro".to_string(),
            Viewport {
                width: 402,
                height: 874,
                name: "iPhone 16 Pro".to_string(),
            },
        ),
        (
            "iphone16promax".to_string(),
            Viewport {
                width: 440,
                height: 956,
                name: "iPhone 16 Pro Max".to_string(),
            },
        ),
    ])
}

pub fn default_screen_types() -> Vec<ScreenType> {
    vec![ScreenType::AppLoad, ScreenType::ContentLoad, ScreenType::Dashboard]
}

/// Shape of `verification-config.json`; only the capture section is read.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default, rename = "screenCapture")]
    screen_capture: Option<ScreenCaptureSection>,
}

#[derive(Debug, Deserialize)]
struct ScreenCaptureSection {
    #[serde(default)]
    viewports: Option<BTreeMap<String, Viewport>>,
    #[serde(default, rename = "captureTypes")]
    capture_types: Option<Vec<ScreenType>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            captures_dir: default_captures_dir(),
            log_dir: None,
            metrics_textfile: None,
            config_file: None,
            target_url: default_target_url(),
            capture_backend_url: default_capture_backend_url(),
            capture_backend_token: None,
            user_agent: default_user_agent(),
            capture_max_attempts: default_capture_max_attempts(),
            capture_retry_delay_ms: default_capture_retry_delay_ms(),
            capture_backoff_factor: default_backoff_factor(),
            capture_max_delay_ms: default_capture_max_delay_ms(),
            capture_attempt_timeout_ms: default_capture_attempt_timeout_ms(),
            capture_max_concurrency: default_capture_max_concurrency(),
            review_timeout_ms: default_review_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_backoff_factor: default_backoff_factor(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            auto_approve_threshold: default_auto_approve_threshold(),
            viewports: default_viewports(),
            screen_types: default_screen_types(),
        }
    }
}

impl AppConfig {
    /// Load from `.env` + environment, then apply the optional config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config: Self = envy::prefixed("VERIFY_").from_env()?;
        if let Some(path) = config.config_file.clone() {
            config.apply_file(&path)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Merge the `screenCapture` section of a JSON config file.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = serde_json::from_str(&raw)?;
        if let Some(section) = file.screen_capture {
            if let Some(viewports) = section.viewports {
                self.viewports = viewports;
            }
            if let Some(types) = section.capture_types {
                self.screen_types = types;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.viewports.is_empty() {
            return Err(ConfigError::Invalid("at least one viewport is required".into()));
        }
        if self.screen_types.is_empty() {
            return Err(ConfigError::Invalid("at least one capture type is required".into()));
        }
        if self.capture_max_attempts == 0 {
            return Err(ConfigError::Invalid("capture_max_attempts must be >= 1".into()));
        }
        if self.capture_max_concurrency == 0 {
            return Err(ConfigError::Invalid("capture_max_concurrency must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.auto_approve_threshold) {
            return Err(ConfigError::Invalid("auto_approve_threshold must be within 0..=1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be >= 1".into()));
        }
        if self.poll_max_interval_ms < self.poll_interval_ms {
            return Err(ConfigError::Invalid(
                "poll_max_interval_ms must be >= poll_interval_ms".into(),
            ));
        }
        for (key, viewport) in &self.viewports {
            viewport
                .validate()
                .map_err(|report| ConfigError::Invalid(format!("viewport {key}: {report}")))?;
        }
        Ok(())
    }

    pub fn capture_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.capture_max_attempts,
            delay: Duration::from_millis(self.capture_retry_delay_ms),
            backoff: Backoff::from_factor(
                self.capture_backoff_factor,
                Duration::from_millis(self.capture_max_delay_ms),
            ),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_backoff(&self) -> Backoff {
        Backoff::from_factor(
            self.poll_backoff_factor,
            Duration::from_millis(self.poll_max_interval_ms),
        )
    }

    pub fn review_timeout(&self) -> Duration {
        Duration::from_millis(self.review_timeout_ms)
    }

    pub fn capture_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_attempt_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
