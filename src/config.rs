//! Typed settings for the rendition pipeline. The host parses whatever
//! configuration format it likes and hands us these structs; everything is
//! validated at construction so misconfiguration fails fast.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_REGISTRY_REFRESH_INTERVAL_SECS: u64 = 600;
const DEFAULT_CONSUME_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid setting `{setting}`: {message}")]
    Invalid {
        setting: &'static str,
        message: String,
    },
}

/// Behaviour switches for the rendition coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenditionSettings {
    /// Master switch for the rendition pipeline.
    pub enabled: bool,
    /// Legacy thumbnail switch; both must be on for the pipeline to run.
    pub thumbnails_enabled: bool,
    /// Bounded retries of the `consume` apply step on transient graph
    /// failures.
    pub consume_retry_attempts: u32,
}

impl Default for RenditionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            thumbnails_enabled: true,
            consume_retry_attempts: DEFAULT_CONSUME_RETRY_ATTEMPTS,
        }
    }
}

impl RenditionSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.consume_retry_attempts == 0 {
            return Err(SettingsError::Invalid {
                setting: "consume_retry_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Renditions run only when both switches are on.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.thumbnails_enabled
    }
}

/// Reload behaviour of the transform capability registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Whether the background refresh task runs at all. Manual `refresh`
    /// calls work either way.
    pub refresh_enabled: bool,
    pub refresh_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_enabled: true,
            refresh_interval_secs: DEFAULT_REGISTRY_REFRESH_INTERVAL_SECS,
        }
    }
}

impl RegistrySettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.refresh_enabled && self.refresh_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                setting: "refresh_interval_secs",
                message: "must be non-zero when refresh is enabled".to_string(),
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

/// Logging settings consumed by `infra::telemetry::init`.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RenditionSettings::default().validate().expect("valid");
        RegistrySettings::default().validate().expect("valid");
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let settings = RenditionSettings {
            consume_retry_attempts: 0,
            ..RenditionSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_refresh_interval_is_rejected_only_when_enabled() {
        let mut settings = RegistrySettings {
            refresh_interval_secs: 0,
            ..RegistrySettings::default()
        };
        assert!(settings.validate().is_err());

        settings.refresh_enabled = false;
        settings.validate().expect("disabled refresh ignores interval");
    }

    #[test]
    fn enablement_requires_both_switches() {
        let mut settings = RenditionSettings::default();
        assert!(settings.is_enabled());

        settings.thumbnails_enabled = false;
        assert!(!settings.is_enabled());

        settings.thumbnails_enabled = true;
        settings.enabled = false;
        assert!(!settings.is_enabled());
    }
}
