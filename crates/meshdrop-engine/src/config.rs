use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use meshdrop_contracts::jobs::UploadOptions;
use meshdrop_contracts::placement::{PlacementBounds, PlacementError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("api key is empty; set MESHDROP_API_KEY or pass --api-key")]
    MissingApiKey,
    #[error("invalid api base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("{field} must be a positive number of seconds, got {value}")]
    NonPositiveDuration { field: &'static str, value: f64 },
    #[error("{field} of {value} seconds is outside the representable range")]
    DurationOutOfRange { field: &'static str, value: f64 },
    #[error("artifact extension must be a short alphanumeric suffix, got '{0}'")]
    InvalidExtension(String),
    #[error(transparent)]
    Placement(#[from] PlacementError),
}

/// Connection and timing settings for the reconstruction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub resolution_level: i64,
    /// Seconds between status polls.
    pub poll_interval: f64,
    /// Seconds to keep polling before giving up on a job.
    pub max_wait_time: f64,
    pub upload_timeout: f64,
    pub status_timeout: f64,
    pub download_timeout: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            resolution_level: UploadOptions::default().resolution_level,
            poll_interval: 2.0,
            max_wait_time: 600.0,
            upload_timeout: 300.0,
            status_timeout: 30.0,
            download_timeout: 300.0,
        }
    }
}

/// Validated timing settings. Every value is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimings {
    pub poll_interval: Duration,
    pub max_wait_time: Duration,
    pub upload_timeout: Duration,
    pub status_timeout: Duration,
    pub download_timeout: Duration,
}

impl ServiceConfig {
    pub fn timings(&self) -> Result<ServiceTimings, ConfigError> {
        Ok(ServiceTimings {
            poll_interval: seconds("poll_interval", self.poll_interval)?,
            max_wait_time: seconds("max_wait_time", self.max_wait_time)?,
            upload_timeout: seconds("upload_timeout", self.upload_timeout)?,
            status_timeout: seconds("status_timeout", self.status_timeout)?,
            download_timeout: seconds("download_timeout", self.download_timeout)?,
        })
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            resolution_level: self.resolution_level,
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim().trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        let base = self.base_url();
        let parsed = Url::parse(base).map_err(|err| ConfigError::InvalidBaseUrl {
            url: base.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        self.timings()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub default_spawn_offset: f32,
    pub min_spawn_distance: f32,
    pub max_spawn_distance: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            default_spawn_offset: 1.5,
            min_spawn_distance: 0.5,
            max_spawn_distance: 5.0,
        }
    }
}

impl PlacementConfig {
    pub fn bounds(&self) -> Result<PlacementBounds, PlacementError> {
        PlacementBounds::new(
            self.default_spawn_offset,
            self.min_spawn_distance,
            self.max_spawn_distance,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshdropConfig {
    pub service: ServiceConfig,
    pub placement: PlacementConfig,
    pub artifact_dir: PathBuf,
    pub artifact_extension: String,
}

impl Default for MeshdropConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            placement: PlacementConfig::default(),
            artifact_dir: PathBuf::from("artifacts"),
            artifact_extension: "glb".to_string(),
        }
    }
}

impl MeshdropConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// Overrides fields from `MESHDROP_*` environment variables that are set and non-empty.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Some(value) = non_empty_env("MESHDROP_API_BASE") {
            self.service.api_base_url = value;
        }
        if let Some(value) = non_empty_env("MESHDROP_API_KEY") {
            self.service.api_key = value;
        }
        if let Some(value) = non_empty_env("MESHDROP_RESOLUTION_LEVEL") {
            self.service.resolution_level = value
                .parse()
                .with_context(|| format!("MESHDROP_RESOLUTION_LEVEL is not an integer: {value}"))?;
        }
        if let Some(value) = non_empty_env("MESHDROP_POLL_INTERVAL") {
            self.service.poll_interval = value
                .parse()
                .with_context(|| format!("MESHDROP_POLL_INTERVAL is not a number: {value}"))?;
        }
        if let Some(value) = non_empty_env("MESHDROP_MAX_WAIT") {
            self.service.max_wait_time = value
                .parse()
                .with_context(|| format!("MESHDROP_MAX_WAIT is not a number: {value}"))?;
        }
        if let Some(value) = non_empty_env("MESHDROP_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;
        self.placement.bounds()?;
        let ext = self.artifact_extension.as_str();
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidExtension(ext.to_string()));
        }
        Ok(())
    }
}

/// Rejects values `Duration` cannot hold and values too small to survive the conversion.
fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NonPositiveDuration { field, value });
    }
    let duration = Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::DurationOutOfRange { field, value })?;
    if duration.is_zero() {
        return Err(ConfigError::DurationOutOfRange { field, value });
    }
    Ok(duration)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MeshdropConfig {
        let mut config = MeshdropConfig::default();
        config.service.api_key = "key-123".to_string();
        config
    }

    #[test]
    fn defaults_validate_once_key_is_set() {
        assert_eq!(MeshdropConfig::default().validate(), Err(ConfigError::MissingApiKey));
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn base_url_is_trimmed_and_checked() {
        let mut config = valid();
        config.service.api_base_url = " https://recon.example.com/ ".to_string();
        assert_eq!(config.service.base_url(), "https://recon.example.com");
        assert_eq!(config.validate(), Ok(()));

        config.service.api_base_url = "ftp://recon.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn non_positive_timing_is_rejected() {
        let mut config = valid();
        config.service.poll_interval = 0.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositiveDuration {
                field: "poll_interval",
                value: 0.0,
            })
        );

        let mut config = valid();
        config.service.max_wait_time = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_outside_duration_range_are_rejected() {
        let mut config = valid();
        config.service.max_wait_time = 1e20;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange {
                field: "max_wait_time",
                value: 1e20,
            })
        );

        let mut config = valid();
        config.service.poll_interval = 1e-12;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange {
                field: "poll_interval",
                value: 1e-12,
            })
        );
    }

    #[test]
    fn timings_convert_seconds() -> anyhow::Result<()> {
        let mut config = valid();
        config.service.poll_interval = 0.25;
        let timings = config.service.timings()?;
        assert_eq!(timings.poll_interval, Duration::from_millis(250));
        assert_eq!(timings.max_wait_time, Duration::from_secs(600));
        assert_eq!(timings.status_timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn inverted_spawn_bounds_are_rejected() {
        let mut config = valid();
        config.placement.min_spawn_distance = 6.0;
        assert!(matches!(config.validate(), Err(ConfigError::Placement(_))));
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("meshdrop.json");
        std::fs::write(
            &path,
            r#"{"service": {"api_key": "abc", "poll_interval": 5}, "artifact_dir": "/tmp/models"}"#,
        )?;
        let config = MeshdropConfig::from_json_file(&path)?;
        assert_eq!(config.service.api_key, "abc");
        assert_eq!(config.service.poll_interval, 5.0);
        assert_eq!(config.service.max_wait_time, 600.0);
        assert_eq!(config.artifact_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.placement, PlacementConfig::default());
        Ok(())
    }
}
