//! Capability detection
//!
//! Each flag comes from an independent, side-effect-free probe. A probe that
//! errors degrades its own flag to `false` and leaves the rest intact.

use crate::{platform::Platform, types::CapabilitySnapshot, Result};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Minimum iOS major version shipping AirPlay 2
const AIRPLAY2_MIN_IOS: u32 = 11;

/// User-agent heuristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    raw: String,
    lower: String,
}

impl UserAgent {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            lower: raw.to_lowercase(),
        }
    }

    pub fn is_ios(&self) -> bool {
        ["iphone", "ipad", "ipod"].iter().any(|d| self.lower.contains(d))
    }

    pub fn is_safari(&self) -> bool {
        self.lower.contains("safari") && !self.is_chrome()
    }

    pub fn is_chrome(&self) -> bool {
        self.lower.contains("chrome")
    }

    pub fn is_android(&self) -> bool {
        self.lower.contains("android")
    }

    pub fn is_windows(&self) -> bool {
        self.raw.contains("Windows NT")
    }

    /// Major version from an `OS 16_4` style token
    pub fn ios_major_version(&self) -> Option<u32> {
        let mut rest = self.lower.as_str();
        while let Some(idx) = rest.find("os ") {
            let tail = &rest[idx + 3..];
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() && tail[digits.len()..].starts_with('_') {
                return digits.parse().ok();
            }
            rest = tail;
        }
        None
    }

    pub fn supports_airplay2(&self) -> bool {
        self.is_ios() && self.ios_major_version().unwrap_or(0) >= AIRPLAY2_MIN_IOS
    }

    pub fn supports_miracast(&self) -> bool {
        self.is_windows() || (self.is_android() && self.raw.contains("Samsung"))
    }
}

/// Run a probe, degrading failure to `false`
fn probe(name: &'static str, f: impl FnOnce() -> Result<bool>) -> bool {
    match f() {
        Ok(value) => value,
        Err(e) => {
            warn!(probe = name, error = %e, "Capability probe failed");
            false
        }
    }
}

/// Produces capability snapshots from the platform's feature surfaces
pub struct CapabilityDetector {
    platform: Platform,
}

impl CapabilityDetector {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Probe every capability
    #[instrument(skip(self))]
    pub fn detect(&self) -> CapabilitySnapshot {
        let env = &self.platform.environment;
        let media = self.platform.media.as_ref();

        let ua = match env.user_agent() {
            Ok(raw) => Some(UserAgent::parse(&raw)),
            Err(e) => {
                warn!(error = %e, "User agent unavailable");
                None
            }
        };
        let ua_flag = |f: fn(&UserAgent) -> bool| ua.as_ref().is_some_and(f);

        let chromecast = match &self.platform.cast {
            Some(cast) => probe("chromecast", || cast.is_available()),
            None => false,
        };

        let airplay = ua_flag(|ua| ua.is_ios() || ua.is_safari())
            || probe("airplay.target_event", || env.playback_target_availability_event())
            || media.is_some_and(|m| m.has_playback_target_picker());

        let picture_in_picture = probe("picture_in_picture", || env.picture_in_picture_enabled())
            && media.is_some_and(|m| m.supports_picture_in_picture());

        let screen_share = probe("screen_share", || env.display_media_supported())
            && probe("secure_context", || env.is_secure_context());

        let remote_playback = media
            .and_then(|m| m.remote())
            .is_some_and(|remote| remote.supports_availability_watch());

        let snapshot = CapabilitySnapshot {
            chromecast,
            chromecast_ultra: false,
            chromecast_audio: false,
            airplay,
            airplay2: ua_flag(UserAgent::supports_airplay2),
            picture_in_picture,
            fullscreen: probe("fullscreen", || env.fullscreen_enabled()),
            screen_share,
            presentation: probe("presentation", || env.presentation_supported()),
            remote_presentation_display: probe("remote_presentation_display", || {
                env.remote_presentation_display_supported()
            }),
            remote_playback,
            dlna: false,
            miracast: ua_flag(UserAgent::supports_miracast),
        };

        debug!(?snapshot, "Capabilities detected");
        snapshot
    }

    /// Poll until the Cast sender SDK reports itself available
    ///
    /// Resolves `true` once available, or `false` after `max_polls` checks.
    #[instrument(skip(self))]
    pub async fn wait_for_cast_sdk(&self, interval: Duration, max_polls: u32) -> bool {
        let Some(cast) = self.platform.cast.clone() else {
            return false;
        };

        for poll in 0..max_polls {
            if probe("chromecast", || cast.is_available()) {
                info!(polls = poll + 1, "Cast SDK available");
                return true;
            }
            if poll + 1 < max_polls {
                tokio::time::sleep(interval).await;
            }
        }

        debug!(max_polls, "Gave up waiting for Cast SDK");
        false
    }
}
