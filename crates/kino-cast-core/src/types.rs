//! Core types for Kino Cast

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an output session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output protocols the coordinator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Chromecast,
    AirPlay,
    Presentation,
    RemotePlayback,
    ScreenShare,
    Fullscreen,
    PictureInPicture,
    Dlna,
    Miracast,
}

impl Protocol {
    /// Every protocol, in teardown order
    pub const ALL: [Protocol; 9] = [
        Protocol::Chromecast,
        Protocol::RemotePlayback,
        Protocol::Dlna,
        Protocol::ScreenShare,
        Protocol::Presentation,
        Protocol::AirPlay,
        Protocol::Fullscreen,
        Protocol::PictureInPicture,
        Protocol::Miracast,
    ];

    /// Protocols that keep a persistent session handle
    pub const SESSION_PROTOCOLS: [Protocol; 4] = [
        Protocol::Chromecast,
        Protocol::RemotePlayback,
        Protocol::ScreenShare,
        Protocol::Presentation,
    ];

    /// Whether this protocol keeps a persistent session handle
    pub fn has_session(&self) -> bool {
        Self::SESSION_PROTOCOLS.contains(self)
    }

    /// Whether this protocol belongs to the mutually exclusive cast group
    pub fn is_cast_group(&self) -> bool {
        matches!(
            self,
            Protocol::Chromecast | Protocol::RemotePlayback | Protocol::Presentation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Chromecast => "chromecast",
            Protocol::AirPlay => "airplay",
            Protocol::Presentation => "presentation",
            Protocol::RemotePlayback => "remote_playback",
            Protocol::ScreenShare => "screen_share",
            Protocol::Fullscreen => "fullscreen",
            Protocol::PictureInPicture => "picture_in_picture",
            Protocol::Dlna => "dlna",
            Protocol::Miracast => "miracast",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized || p.as_str().replace('_', "") == normalized)
            .ok_or_else(|| crate::Error::InvalidConfig(format!("unknown protocol '{}'", s)))
    }
}

/// Snapshot of which output protocols are usable in the current environment
///
/// A flag is only `true` when a probe affirmatively matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    pub chromecast: bool,
    /// Proven only once a connected receiver reports 4K support
    pub chromecast_ultra: bool,
    /// Proven only once a connected receiver reports itself as audio-only
    pub chromecast_audio: bool,
    pub airplay: bool,
    pub airplay2: bool,
    pub picture_in_picture: bool,
    pub fullscreen: bool,
    pub screen_share: bool,
    pub presentation: bool,
    pub remote_presentation_display: bool,
    pub remote_playback: bool,
    /// Always false: local-network discovery is unavailable to a sandboxed client
    pub dlna: bool,
    /// Informational only, no action path backs it
    pub miracast: bool,
}

impl CapabilitySnapshot {
    /// Whether the flag gating `protocol`'s actions is set
    pub fn supports(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Chromecast => self.chromecast,
            Protocol::AirPlay => self.airplay,
            Protocol::Presentation => self.presentation,
            Protocol::RemotePlayback => self.remote_playback,
            Protocol::ScreenShare => self.screen_share,
            Protocol::Fullscreen => self.fullscreen,
            Protocol::PictureInPicture => self.picture_in_picture,
            Protocol::Dlna => self.dlna,
            Protocol::Miracast => self.miracast,
        }
    }

    /// Flag names paired with their values, in declaration order
    pub fn flags(&self) -> [(&'static str, bool); 13] {
        [
            ("chromecast", self.chromecast),
            ("chromecastUltra", self.chromecast_ultra),
            ("chromecastAudio", self.chromecast_audio),
            ("airplay", self.airplay),
            ("airplay2", self.airplay2),
            ("pictureInPicture", self.picture_in_picture),
            ("fullscreen", self.fullscreen),
            ("screenShare", self.screen_share),
            ("presentation", self.presentation),
            ("remotePresentationDisplay", self.remote_presentation_display),
            ("remotePlayback", self.remote_playback),
            ("dlna", self.dlna),
            ("miracast", self.miracast),
        ]
    }
}

/// Aggregate connection health across the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastingStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for CastingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CastingStatus::Disconnected => write!(f, "disconnected"),
            CastingStatus::Connecting => write!(f, "connecting"),
            CastingStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Lifecycle of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Handle reserved, native call still in flight
    Pending,
    Connecting,
    Connected,
    /// Native side reported the output has ended
    Ended,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Pending, Connecting) | (Pending, Connected) | (Pending, Ended) |
            (Connecting, Connected) | (Connecting, Ended) |
            (Connected, Connecting) | (Connected, Ended)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "pending"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Ended => write!(f, "ended"),
        }
    }
}

/// Derived view of which outputs are live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityState {
    pub is_casting: bool,
    pub is_screen_sharing: bool,
    pub is_presentation_active: bool,
    pub is_remote_playback_active: bool,
    #[serde(rename = "isDLNAActive")]
    pub is_dlna_active: bool,
    pub is_fullscreen: bool,
    pub is_picture_in_picture: bool,
}

impl ActivityState {
    /// Whether any session-backed output is live
    pub fn any_session_active(&self) -> bool {
        self.is_casting
            || self.is_screen_sharing
            || self.is_presentation_active
            || self.is_remote_playback_active
            || self.is_dlna_active
    }
}

/// Remote Playback connection state as reported by the media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemotePlaybackState {
    Connecting,
    Connected,
    Disconnected,
}

impl RemotePlaybackState {
    pub fn session_state(&self) -> SessionState {
        match self {
            RemotePlaybackState::Connecting => SessionState::Connecting,
            RemotePlaybackState::Connected => SessionState::Connected,
            RemotePlaybackState::Disconnected => SessionState::Ended,
        }
    }
}

/// Receiver details reported by a Cast session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverInfo {
    pub friendly_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ReceiverInfo {
    /// Receiver advertises 4K output
    pub fn is_ultra(&self) -> bool {
        self.friendly_name.contains("Ultra") || self.capabilities.iter().any(|c| c == "4K")
    }

    /// Receiver is an audio-only device
    pub fn is_audio(&self) -> bool {
        self.friendly_name.contains("Audio")
    }
}

/// What currently occupies the video element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MediaSource {
    #[default]
    Empty,
    /// Plain URL source
    Url(String),
    /// Captured display stream, by stream id
    Capture(String),
}

impl MediaSource {
    pub fn is_empty(&self) -> bool {
        matches!(self, MediaSource::Empty)
    }
}

/// Display-media capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1920,
            ideal_height: 1080,
            audio: true,
        }
    }
}

/// Signal asking the playback component to resume the original stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSignal {
    pub stream_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse() {
        assert_eq!("chromecast".parse::<Protocol>().unwrap(), Protocol::Chromecast);
        assert_eq!("screen-share".parse::<Protocol>().unwrap(), Protocol::ScreenShare);
        assert_eq!("remoteplayback".parse::<Protocol>().unwrap(), Protocol::RemotePlayback);
        assert!("bluetooth".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_session_protocols() {
        assert!(Protocol::Chromecast.has_session());
        assert!(Protocol::ScreenShare.has_session());
        assert!(!Protocol::AirPlay.has_session());
        assert!(!Protocol::Fullscreen.has_session());
        assert!(!Protocol::ScreenShare.is_cast_group());
    }

    #[test]
    fn test_session_state_transitions() {
        assert!(SessionState::Pending.can_transition_to(SessionState::Connected));
        assert!(SessionState::Connecting.can_transition_to(SessionState::Connected));
        assert!(SessionState::Connected.can_transition_to(SessionState::Ended));
        assert!(!SessionState::Ended.can_transition_to(SessionState::Connected));
        assert!(!SessionState::Pending.is_active());
        assert!(SessionState::Connecting.is_active());
    }

    #[test]
    fn test_receiver_sub_capabilities() {
        let ultra = ReceiverInfo {
            friendly_name: "Living Room Ultra".into(),
            capabilities: vec![],
        };
        assert!(ultra.is_ultra());
        assert!(!ultra.is_audio());

        let by_caps = ReceiverInfo {
            friendly_name: "Den TV".into(),
            capabilities: vec!["video_out".into(), "4K".into()],
        };
        assert!(by_caps.is_ultra());

        let audio = ReceiverInfo {
            friendly_name: "Kitchen Audio".into(),
            capabilities: vec!["audio_out".into()],
        };
        assert!(audio.is_audio());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = CapabilitySnapshot {
            picture_in_picture: true,
            ..Default::default()
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["pictureInPicture"], true);
        assert_eq!(json["dlna"], false);
        assert!(snapshot.supports(Protocol::PictureInPicture));
    }
}
