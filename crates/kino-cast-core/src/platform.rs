//! Host platform seam
//!
//! The coordinator never speaks a casting wire protocol itself. Everything
//! native (Cast sender SDK, media element, document, display capture,
//! Presentation API) sits behind these traits so a browser binding, a
//! desktop shell, or the simulated platform in [`crate::sim`] can drive it.

use crate::{
    events::EventSink,
    media::LoadRequest,
    types::{CaptureConstraints, MediaSource, ReceiverInfo, RemotePlaybackState},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Registration id for a Remote Playback state listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Registration id for a Remote Playback availability watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Read-only feature probes
///
/// Probes must not block and must not mutate the environment. An `Err`
/// means the probe itself could not run.
pub trait Environment: Send + Sync {
    fn user_agent(&self) -> Result<String>;

    /// `WebKitPlaybackTargetAvailabilityEvent` is exposed
    fn playback_target_availability_event(&self) -> Result<bool>;

    /// `document.pictureInPictureEnabled`
    fn picture_in_picture_enabled(&self) -> Result<bool>;

    /// Any of the vendor `fullscreenEnabled` flags
    fn fullscreen_enabled(&self) -> Result<bool>;

    /// `navigator.mediaDevices.getDisplayMedia` is a function
    fn display_media_supported(&self) -> Result<bool>;

    fn is_secure_context(&self) -> Result<bool>;

    /// `PresentationRequest` constructor and `navigator.presentation` both exist
    fn presentation_supported(&self) -> Result<bool>;

    fn remote_presentation_display_supported(&self) -> Result<bool>;
}

/// Cast sender SDK
#[async_trait]
pub trait CastSdk: Send + Sync {
    /// The sender library finished loading and reports itself available
    fn is_available(&self) -> Result<bool>;

    /// Initialize the API; receiver availability is reported through `sink`
    async fn initialize(&self, receiver_app_id: &str, sink: EventSink) -> Result<()>;

    /// Ask the user to pick a receiver and open a session
    async fn request_session(&self, receiver_app_id: &str) -> Result<Box<dyn CastSession>>;
}

/// A live Cast sender session
#[async_trait]
pub trait CastSession: Send + Sync {
    fn session_id(&self) -> String;

    fn receiver(&self) -> ReceiverInfo;

    /// Register the session update listener and the media namespace listener
    fn add_listeners(&self, sink: EventSink);

    async fn load_media(&self, request: LoadRequest) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// The video surface
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn source(&self) -> MediaSource;

    fn set_source(&self, source: MediaSource);

    async fn play(&self) -> Result<()>;

    /// `requestPictureInPicture` exists on the element
    fn supports_picture_in_picture(&self) -> bool;

    async fn request_picture_in_picture(&self) -> Result<()>;

    async fn request_fullscreen(&self) -> Result<()>;

    /// `webkitShowPlaybackTargetPicker` exists on the element
    fn has_playback_target_picker(&self) -> bool;

    fn show_playback_target_picker(&self) -> Result<()>;

    /// Remote Playback object, if the element exposes one
    fn remote(&self) -> Option<Arc<dyn RemotePlayback>>;
}

/// Remote Playback API object of a media element
#[async_trait]
pub trait RemotePlayback: Send + Sync {
    fn state(&self) -> RemotePlaybackState;

    /// `watchAvailability` is present
    fn supports_availability_watch(&self) -> bool;

    fn add_state_listener(&self, sink: EventSink) -> ListenerId;

    fn remove_state_listener(&self, id: ListenerId);

    async fn watch_availability(&self, sink: EventSink) -> Result<WatchId>;

    async fn cancel_watch_availability(&self, id: WatchId) -> Result<()>;

    async fn prompt(&self) -> Result<()>;
}

/// Document-level fullscreen and Picture-in-Picture state
#[async_trait]
pub trait DocumentSurface: Send + Sync {
    fn fullscreen_active(&self) -> bool;

    fn picture_in_picture_active(&self) -> bool;

    /// Register fullscreen and PiP change listeners
    fn add_change_listeners(&self, sink: EventSink);

    async fn exit_fullscreen(&self) -> Result<()>;

    async fn exit_picture_in_picture(&self) -> Result<()>;
}

/// Display capture
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_display_media(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn DisplayStream>>;
}

/// A captured display stream
pub trait DisplayStream: Send + Sync {
    fn id(&self) -> String;

    /// Register the `ended` listener on the first video track
    fn on_video_track_ended(&self, sink: EventSink);

    fn stop_tracks(&self);
}

/// Presentation API entry point
pub trait PresentationApi: Send + Sync {
    fn create_request(&self, urls: Vec<String>) -> Result<Box<dyn PresentationRequest>>;
}

/// A pending `PresentationRequest`
#[async_trait]
pub trait PresentationRequest: Send + Sync {
    /// `Ok(None)` when the request cannot report display availability
    async fn availability(&self) -> Result<Option<bool>>;

    async fn start(&self) -> Result<Box<dyn PresentationConnection>>;
}

/// An established presentation connection
#[async_trait]
pub trait PresentationConnection: Send + Sync {
    fn id(&self) -> String;

    /// Register `close` and `terminate` listeners
    fn add_listeners(&self, sink: EventSink);

    async fn terminate(&self) -> Result<()>;
}

/// Bundle of the native surfaces available to the coordinator
///
/// Absent surfaces are `None`; actions needing them fail without a native call.
#[derive(Clone)]
pub struct Platform {
    pub environment: Arc<dyn Environment>,
    pub cast: Option<Arc<dyn CastSdk>>,
    pub media: Option<Arc<dyn MediaElement>>,
    pub document: Option<Arc<dyn DocumentSurface>>,
    pub media_devices: Option<Arc<dyn MediaDevices>>,
    pub presentation: Option<Arc<dyn PresentationApi>>,
}

impl Platform {
    /// Platform with only an environment and no native surfaces
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self {
            environment,
            cast: None,
            media: None,
            document: None,
            media_devices: None,
            presentation: None,
        }
    }

    pub fn with_cast(mut self, cast: Arc<dyn CastSdk>) -> Self {
        self.cast = Some(cast);
        self
    }

    pub fn with_media(mut self, media: Arc<dyn MediaElement>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_document(mut self, document: Arc<dyn DocumentSurface>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_media_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.media_devices = Some(devices);
        self
    }

    pub fn with_presentation(mut self, presentation: Arc<dyn PresentationApi>) -> Self {
        self.presentation = Some(presentation);
        self
    }
}
