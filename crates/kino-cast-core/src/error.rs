//! Error types for Kino Cast

use crate::types::Protocol;
use thiserror::Error;

/// Result type alias for casting operations
pub type Result<T> = std::result::Result<T, Error>;

/// Casting error types
///
/// Public coordinator actions never surface these directly: they are logged
/// and folded into a `false` outcome plus a state update.
#[derive(Error, Debug)]
pub enum Error {
    // Capability errors
    #[error("Capability not available: {protocol}")]
    CapabilityAbsent { protocol: Protocol },

    #[error("No media element attached")]
    NoMediaElement,

    #[error("No stream URL configured")]
    MissingStreamUrl,

    // Action errors
    #[error("{protocol} action failed: {reason}")]
    ActionFailed { protocol: Protocol, reason: String },

    #[error("Platform call rejected: {0}")]
    Platform(String),

    // Session errors
    #[error("Session for {protocol} is no longer valid")]
    StaleState { protocol: Protocol },

    #[error("Reconnection attempts exhausted after {attempts} tries")]
    RetryExhausted { attempts: u32 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a platform rejection error
    pub fn platform(msg: impl Into<String>) -> Self {
        Error::Platform(msg.into())
    }

    /// Create an action failure for a protocol
    pub fn action(protocol: Protocol, reason: impl Into<String>) -> Self {
        Error::ActionFailed {
            protocol,
            reason: reason.into(),
        }
    }

    /// Returns true if the user may retry the action manually
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ActionFailed { .. }
                | Error::Platform(_)
                | Error::StaleState { .. }
                | Error::RetryExhausted { .. }
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::CapabilityAbsent { .. } => "CAPABILITY_ABSENT",
            Error::NoMediaElement => "NO_MEDIA_ELEMENT",
            Error::MissingStreamUrl => "MISSING_STREAM_URL",
            Error::ActionFailed { .. } => "ACTION_FAILED",
            Error::Platform(_) => "PLATFORM",
            Error::StaleState { .. } => "STALE_STATE",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::CapabilityAbsent {
            protocol: Protocol::Chromecast,
        };
        assert_eq!(err.error_code(), "CAPABILITY_ABSENT");
        assert!(!err.is_recoverable());

        let err = Error::action(Protocol::Presentation, "no displays");
        assert_eq!(err.to_string(), "presentation action failed: no displays");
        assert!(err.is_recoverable());
    }
}
