//! Coordinator configuration

use crate::{media::MediaMetadata, types::CaptureConstraints, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default Media Receiver application id
pub const DEFAULT_RECEIVER_APP_ID: &str = "CC1AD845";

/// Casting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    /// Cast receiver application id
    pub receiver_app_id: String,
    /// Title shown on the receiver
    pub media_title: String,
    /// Subtitle shown on the receiver
    pub media_subtitle: String,
    /// Reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Run the reconnection policy when a cast session drops unexpectedly
    pub auto_reconnect: bool,
    /// Interval between Cast SDK availability checks (milliseconds)
    pub sdk_poll_interval_ms: u64,
    /// Number of availability checks before giving up on the SDK
    pub sdk_max_polls: u32,
    /// Delay before forcing the stream back onto the video element (milliseconds)
    pub restore_fallback_ms: u64,
    /// How long a success banner stays visible (milliseconds)
    pub success_banner_ms: u64,
    /// How long an error banner stays visible (milliseconds)
    pub error_banner_ms: u64,
    /// Screen capture constraints
    pub capture: CaptureConstraints,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            receiver_app_id: DEFAULT_RECEIVER_APP_ID.to_string(),
            media_title: "Live Broadcast".to_string(),
            media_subtitle: "Kino".to_string(),
            max_reconnect_attempts: 3,
            auto_reconnect: true,
            sdk_poll_interval_ms: 100,
            sdk_max_polls: 100,
            restore_fallback_ms: 100,
            success_banner_ms: 3000,
            error_banner_ms: 5000,
            capture: CaptureConstraints::default(),
        }
    }
}

impl CastConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: CastConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the coordinator cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.receiver_app_id.trim().is_empty() {
            return Err(Error::InvalidConfig("receiver_app_id is empty".into()));
        }
        if self.sdk_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("sdk_poll_interval_ms must be > 0".into()));
        }
        if self.capture.ideal_width == 0 || self.capture.ideal_height == 0 {
            return Err(Error::InvalidConfig("capture size must be non-zero".into()));
        }
        Ok(())
    }

    pub fn metadata(&self) -> MediaMetadata {
        MediaMetadata {
            title: self.media_title.clone(),
            subtitle: self.media_subtitle.clone(),
        }
    }

    pub fn sdk_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sdk_poll_interval_ms)
    }

    pub fn restore_fallback(&self) -> Duration {
        Duration::from_millis(self.restore_fallback_ms)
    }

    pub fn success_banner(&self) -> Duration {
        Duration::from_millis(self.success_banner_ms)
    }

    pub fn error_banner(&self) -> Duration {
        Duration::from_millis(self.error_banner_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CastConfig::default();
        assert_eq!(config.receiver_app_id, "CC1AD845");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.restore_fallback(), Duration::from_millis(100));
        assert_eq!(config.success_banner(), Duration::from_secs(3));
        assert_eq!(config.error_banner(), Duration::from_secs(5));
        assert_eq!(config.capture.ideal_width, 1920);
        assert!(config.capture.audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CastConfig::from_json(r#"{"media_title": "Match Day", "auto_reconnect": false}"#)
            .unwrap();
        assert_eq!(config.media_title, "Match Day");
        assert!(!config.auto_reconnect);
        assert_eq!(config.sdk_poll_interval_ms, 100);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = CastConfig::from_json(r#"{"receiver_app_id": "  "}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let err = CastConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.error_code(), "JSON");
    }
}
