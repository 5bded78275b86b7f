//! Platform event boundary
//!
//! Native listeners never touch coordinator state. They hold an [`EventSink`]
//! and push [`PlatformEvent`]s into a channel that the coordinator drains at
//! a single reduction point. Sinks handed to a session carry that session's
//! generation so late events from a released session are dropped.

use crate::types::{Protocol, RemotePlaybackState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Events reported by the host platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// Cast receivers became available or unavailable
    ReceiverAvailability { available: bool },
    /// Cast session update listener fired
    CastSessionUpdate { alive: bool },
    /// Raw message received on a Cast namespace
    CastMessage { namespace: String, message: String },
    /// `remoteplaybackstatechange` fired
    RemotePlaybackStateChanged { state: RemotePlaybackState },
    /// Remote Playback availability watch callback
    RemotePlaybackAvailability { available: bool },
    /// The captured display track ended outside the app
    CaptureTrackEnded,
    /// Presentation connection `close`
    PresentationClosed,
    /// Presentation connection `terminate`
    PresentationTerminated,
    /// Document fullscreen element changed
    FullscreenChanged { active: bool },
    /// Picture-in-Picture window opened or closed
    PictureInPictureChanged { active: bool },
}

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Long-lived listeners (document, SDK), never stale
    Ambient,
    /// Listener bound to one session generation
    Session { protocol: Protocol, generation: u64 },
}

/// Event plus its origin, as queued for the coordinator
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub origin: EventOrigin,
    pub event: PlatformEvent,
}

/// Cloneable handle native listeners use to report events
#[derive(Debug, Clone)]
pub struct EventSink {
    origin: EventOrigin,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub(crate) fn new(origin: EventOrigin, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { origin, tx }
    }

    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    /// Queue an event for the coordinator
    ///
    /// Events sent after the coordinator is dropped are discarded.
    pub fn emit(&self, event: PlatformEvent) {
        trace!(origin = ?self.origin, event = ?event, "Platform event");
        let _ = self.tx.send(TaggedEvent {
            origin: self.origin,
            event,
        });
    }
}

/// Cast media namespace
pub const CAST_MEDIA_NAMESPACE: &str = "urn:x-cast:com.google.cast.media";

/// Whether a Cast media message reports that playback on the receiver ended
///
/// A `MEDIA_STATUS` message with an empty `status` list means the media
/// session is gone. Unparseable messages are ignored.
pub fn is_media_ended_message(namespace: &str, message: &str) -> bool {
    if namespace != CAST_MEDIA_NAMESPACE {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(message) else {
        return false;
    };
    value.get("type").and_then(|t| t.as_str()) == Some("MEDIA_STATUS")
        && value
            .get("status")
            .and_then(|s| s.as_array())
            .is_some_and(|s| s.is_empty())
}
