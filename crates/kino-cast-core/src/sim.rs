//! Simulated host platform
//!
//! A scriptable, in-memory implementation of every [`crate::platform`] seam.
//! Native calls are counted so callers can assert that gated actions never
//! reached the platform, and the `trigger_*` methods play the part of the
//! user or the remote device.

use crate::{
    events::{EventSink, PlatformEvent, CAST_MEDIA_NAMESPACE},
    media::LoadRequest,
    platform::{
        CastSdk, CastSession, DisplayStream, DocumentSurface, Environment, ListenerId,
        MediaDevices, MediaElement, Platform, PresentationApi, PresentationConnection,
        PresentationRequest, RemotePlayback, WatchId,
    },
    types::{CaptureConstraints, MediaSource, ReceiverInfo, RemotePlaybackState},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Static description of the simulated client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimEnvironment {
    pub user_agent: String,
    pub cast_sdk_loaded: bool,
    /// SDK turns available on this availability check
    pub cast_sdk_ready_after_polls: Option<u32>,
    pub playback_target_event: bool,
    pub playback_target_picker: bool,
    pub picture_in_picture: bool,
    pub fullscreen: bool,
    pub display_media: bool,
    pub secure_context: bool,
    pub presentation: bool,
    pub remote_presentation_display: bool,
    pub remote_playback: bool,
    pub media_element: bool,
    /// Probe names that return an error (`user_agent`, `fullscreen`, ...)
    pub failing_probes: Vec<String>,
    /// Receiver reported by new Cast sessions
    pub receiver: ReceiverInfo,
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
                .to_string(),
            cast_sdk_loaded: false,
            cast_sdk_ready_after_polls: None,
            playback_target_event: false,
            playback_target_picker: false,
            picture_in_picture: false,
            fullscreen: false,
            display_media: false,
            secure_context: true,
            presentation: false,
            remote_presentation_display: false,
            remote_playback: false,
            media_element: true,
            failing_probes: Vec::new(),
            receiver: ReceiverInfo {
                friendly_name: "Living Room TV".to_string(),
                capabilities: vec!["video_out".to_string(), "audio_out".to_string()],
            },
        }
    }
}

impl SimEnvironment {
    /// Desktop Chrome in a secure context
    pub fn desktop() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            cast_sdk_loaded: true,
            picture_in_picture: true,
            fullscreen: true,
            display_media: true,
            presentation: true,
            remote_playback: true,
            ..Self::default()
        }
    }

    /// Every surface present
    pub fn everything() -> Self {
        Self {
            playback_target_event: true,
            playback_target_picker: true,
            remote_presentation_display: true,
            ..Self::desktop()
        }
    }

    /// No optional surface at all
    pub fn bare() -> Self {
        Self {
            secure_context: false,
            media_element: false,
            ..Self::default()
        }
    }

    fn probe(&self, name: &str, value: bool) -> Result<bool> {
        if self.failing_probes.iter().any(|p| p == name) {
            return Err(Error::platform(format!("probe '{}' threw", name)));
        }
        Ok(value)
    }
}

/// Scripted outcomes of native calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimBehavior {
    pub cast_session_error: Option<String>,
    pub cast_load_error: Option<String>,
    pub cast_stop_error: Option<String>,
    pub remote_prompt_error: Option<String>,
    pub remote_watch_error: Option<String>,
    /// Remote device connects after a successful prompt
    pub remote_connects: bool,
    pub display_media_error: Option<String>,
    /// `None` when availability cannot be reported
    pub presentation_availability: Option<bool>,
    pub presentation_availability_error: bool,
    pub presentation_start_error: Option<String>,
    pub presentation_terminate_error: Option<String>,
    pub fullscreen_error: Option<String>,
    pub picture_in_picture_error: Option<String>,
    pub play_error: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            cast_session_error: None,
            cast_load_error: None,
            cast_stop_error: None,
            remote_prompt_error: None,
            remote_watch_error: None,
            remote_connects: true,
            display_media_error: None,
            presentation_availability: Some(true),
            presentation_availability_error: false,
            presentation_start_error: None,
            presentation_terminate_error: None,
            fullscreen_error: None,
            picture_in_picture_error: None,
            play_error: false,
        }
    }
}

/// Native call counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimCalls {
    pub cast_sdk_polls: u32,
    pub cast_initializations: u32,
    pub session_requests: u32,
    pub media_loads: u32,
    pub session_stops: u32,
    pub pickers_shown: u32,
    pub remote_prompts: u32,
    pub remote_watches: u32,
    pub remote_watch_cancels: u32,
    pub state_listeners_added: u32,
    pub state_listeners_removed: u32,
    pub display_media_requests: u32,
    pub tracks_stopped: u32,
    pub presentation_requests: u32,
    pub presentation_starts: u32,
    pub presentation_terminations: u32,
    pub fullscreen_requests: u32,
    pub fullscreen_exits: u32,
    pub picture_in_picture_requests: u32,
    pub picture_in_picture_exits: u32,
    pub plays: u32,
}

impl SimCalls {
    /// Calls that act on the platform (probes and listener bookkeeping excluded)
    pub fn native_actions(&self) -> u32 {
        self.session_requests
            + self.media_loads
            + self.session_stops
            + self.pickers_shown
            + self.remote_prompts
            + self.display_media_requests
            + self.tracks_stopped
            + self.presentation_requests
            + self.presentation_starts
            + self.presentation_terminations
            + self.fullscreen_requests
            + self.fullscreen_exits
            + self.picture_in_picture_requests
            + self.picture_in_picture_exits
            + self.plays
    }
}

struct SimState {
    env: SimEnvironment,
    behavior: SimBehavior,
    calls: SimCalls,
    next_id: u64,
    media_source: MediaSource,
    last_load: Option<LoadRequest>,
    last_constraints: Option<CaptureConstraints>,
    availability_sink: Option<EventSink>,
    /// Listeners per Cast session id
    cast_sinks: Vec<(String, EventSink)>,
    remote_state: RemotePlaybackState,
    remote_listeners: HashMap<u64, EventSink>,
    remote_watches: HashMap<u64, EventSink>,
    capture_sinks: Vec<EventSink>,
    /// Listeners per presentation connection id
    presentation_sinks: Vec<(String, EventSink)>,
    document_sinks: Vec<EventSink>,
    fullscreen: bool,
    picture_in_picture: bool,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit_document(&self, event: PlatformEvent) {
        for sink in &self.document_sinks {
            sink.emit(event.clone());
        }
    }

    fn set_remote_state(&mut self, state: RemotePlaybackState) {
        self.remote_state = state;
        for sink in self.remote_listeners.values() {
            sink.emit(PlatformEvent::RemotePlaybackStateChanged { state });
        }
    }
}

type Shared = Arc<Mutex<SimState>>;

fn fail_with(error: &Option<String>) -> Result<()> {
    match error {
        Some(msg) => Err(Error::platform(msg.clone())),
        None => Ok(()),
    }
}

/// Simulated platform handle
#[derive(Clone)]
pub struct SimulatedPlatform {
    state: Shared,
}

impl SimulatedPlatform {
    pub fn new(env: SimEnvironment) -> Self {
        Self::with_behavior(env, SimBehavior::default())
    }

    pub fn with_behavior(env: SimEnvironment, behavior: SimBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                env,
                behavior,
                calls: SimCalls::default(),
                next_id: 0,
                media_source: MediaSource::Empty,
                last_load: None,
                last_constraints: None,
                availability_sink: None,
                cast_sinks: Vec::new(),
                remote_state: RemotePlaybackState::Disconnected,
                remote_listeners: HashMap::new(),
                remote_watches: HashMap::new(),
                capture_sinks: Vec::new(),
                presentation_sinks: Vec::new(),
                document_sinks: Vec::new(),
                fullscreen: false,
                picture_in_picture: false,
            })),
        }
    }

    /// Build the platform bundle for a coordinator or detector
    pub fn platform(&self) -> Platform {
        let env = self.state.lock().env.clone();
        let mut platform = Platform::new(Arc::new(SimEnv(self.state.clone())))
            .with_cast(Arc::new(SimCast(self.state.clone())))
            .with_document(Arc::new(SimDocument(self.state.clone())));
        if env.media_element {
            platform = platform.with_media(Arc::new(SimMedia(self.state.clone())));
        }
        if env.display_media {
            platform = platform.with_media_devices(Arc::new(SimDevices(self.state.clone())));
        }
        if env.presentation {
            platform = platform.with_presentation(Arc::new(SimPresentation(self.state.clone())));
        }
        platform
    }

    pub fn update_behavior(&self, f: impl FnOnce(&mut SimBehavior)) {
        f(&mut self.state.lock().behavior);
    }

    /// Change the described client after construction
    pub fn update_environment(&self, f: impl FnOnce(&mut SimEnvironment)) {
        f(&mut self.state.lock().env);
    }

    pub fn calls(&self) -> SimCalls {
        self.state.lock().calls.clone()
    }

    pub fn media_source(&self) -> MediaSource {
        self.state.lock().media_source.clone()
    }

    /// Act as the playback component writing a source
    pub fn set_media_source(&self, source: MediaSource) {
        self.state.lock().media_source = source;
    }

    pub fn last_load_request(&self) -> Option<LoadRequest> {
        self.state.lock().last_load.clone()
    }

    pub fn last_capture_constraints(&self) -> Option<CaptureConstraints> {
        self.state.lock().last_constraints
    }

    pub fn remote_listener_count(&self) -> usize {
        self.state.lock().remote_listeners.len()
    }

    pub fn remote_watch_count(&self) -> usize {
        self.state.lock().remote_watches.len()
    }

    /// The lazily loaded sender library finished loading
    pub fn load_cast_sdk(&self) {
        self.state.lock().env.cast_sdk_loaded = true;
    }

    pub fn trigger_receiver_availability(&self, available: bool) {
        let state = self.state.lock();
        if let Some(sink) = &state.availability_sink {
            sink.emit(PlatformEvent::ReceiverAvailability { available });
        }
    }

    /// Receiver disconnected on its own
    pub fn trigger_cast_session_lost(&self) {
        let state = self.state.lock();
        for (_, sink) in &state.cast_sinks {
            sink.emit(PlatformEvent::CastSessionUpdate { alive: false });
        }
    }

    /// Receiver reports an empty media status
    pub fn trigger_cast_media_ended(&self) {
        let state = self.state.lock();
        for (_, sink) in &state.cast_sinks {
            sink.emit(PlatformEvent::CastMessage {
                namespace: CAST_MEDIA_NAMESPACE.to_string(),
                message: r#"{"type":"MEDIA_STATUS","status":[]}"#.to_string(),
            });
        }
    }

    pub fn trigger_remote_state(&self, remote_state: RemotePlaybackState) {
        self.state.lock().set_remote_state(remote_state);
    }

    pub fn trigger_remote_availability(&self, available: bool) {
        let state = self.state.lock();
        for sink in state.remote_watches.values() {
            sink.emit(PlatformEvent::RemotePlaybackAvailability { available });
        }
    }

    /// User pressed "Stop sharing" in the OS chrome
    pub fn trigger_user_stopped_sharing(&self) {
        let state = self.state.lock();
        for sink in &state.capture_sinks {
            sink.emit(PlatformEvent::CaptureTrackEnded);
        }
    }

    pub fn trigger_presentation_closed(&self) {
        let state = self.state.lock();
        for (_, sink) in &state.presentation_sinks {
            sink.emit(PlatformEvent::PresentationClosed);
        }
    }

    pub fn trigger_presentation_terminated(&self) {
        let state = self.state.lock();
        for (_, sink) in &state.presentation_sinks {
            sink.emit(PlatformEvent::PresentationTerminated);
        }
    }

    /// User left fullscreen with the Escape key
    pub fn trigger_fullscreen_exit(&self) {
        let mut state = self.state.lock();
        state.fullscreen = false;
        state.emit_document(PlatformEvent::FullscreenChanged { active: false });
    }
}

struct SimEnv(Shared);

impl Environment for SimEnv {
    fn user_agent(&self) -> Result<String> {
        let state = self.0.lock();
        state.env.probe("user_agent", true)?;
        Ok(state.env.user_agent.clone())
    }

    fn playback_target_availability_event(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("airplay.target_event", state.env.playback_target_event)
    }

    fn picture_in_picture_enabled(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("picture_in_picture", state.env.picture_in_picture)
    }

    fn fullscreen_enabled(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("fullscreen", state.env.fullscreen)
    }

    fn display_media_supported(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("screen_share", state.env.display_media)
    }

    fn is_secure_context(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("secure_context", state.env.secure_context)
    }

    fn presentation_supported(&self) -> Result<bool> {
        let state = self.0.lock();
        state.env.probe("presentation", state.env.presentation)
    }

    fn remote_presentation_display_supported(&self) -> Result<bool> {
        let state = self.0.lock();
        state
            .env
            .probe("remote_presentation_display", state.env.remote_presentation_display)
    }
}

struct SimCast(Shared);

#[async_trait]
impl CastSdk for SimCast {
    fn is_available(&self) -> Result<bool> {
        let mut state = self.0.lock();
        state.calls.cast_sdk_polls += 1;
        let polls = state.calls.cast_sdk_polls;
        if state.env.cast_sdk_ready_after_polls.is_some_and(|n| polls >= n) {
            state.env.cast_sdk_loaded = true;
        }
        state.env.probe("chromecast", state.env.cast_sdk_loaded)
    }

    async fn initialize(&self, _receiver_app_id: &str, sink: EventSink) -> Result<()> {
        let mut state = self.0.lock();
        if !state.env.cast_sdk_loaded {
            return Err(Error::platform("cast sender library not loaded"));
        }
        state.calls.cast_initializations += 1;
        state.availability_sink = Some(sink);
        Ok(())
    }

    async fn request_session(&self, _receiver_app_id: &str) -> Result<Box<dyn CastSession>> {
        let mut state = self.0.lock();
        state.calls.session_requests += 1;
        if !state.env.cast_sdk_loaded {
            return Err(Error::platform("cast sender library not loaded"));
        }
        fail_with(&state.behavior.cast_session_error)?;
        Ok(Box::new(SimCastSession {
            id: Uuid::new_v4().to_string(),
            receiver: state.env.receiver.clone(),
            state: self.0.clone(),
        }))
    }
}

struct SimCastSession {
    id: String,
    receiver: ReceiverInfo,
    state: Shared,
}

#[async_trait]
impl CastSession for SimCastSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn receiver(&self) -> ReceiverInfo {
        self.receiver.clone()
    }

    fn add_listeners(&self, sink: EventSink) {
        self.state.lock().cast_sinks.push((self.id.clone(), sink));
    }

    async fn load_media(&self, request: LoadRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.media_loads += 1;
        fail_with(&state.behavior.cast_load_error)?;
        state.last_load = Some(request);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.session_stops += 1;
        fail_with(&state.behavior.cast_stop_error)?;
        for (_, sink) in state.cast_sinks.iter().filter(|(id, _)| *id == self.id) {
            sink.emit(PlatformEvent::CastSessionUpdate { alive: false });
        }
        Ok(())
    }
}

struct SimMedia(Shared);

#[async_trait]
impl MediaElement for SimMedia {
    fn source(&self) -> MediaSource {
        self.0.lock().media_source.clone()
    }

    fn set_source(&self, source: MediaSource) {
        self.0.lock().media_source = source;
    }

    async fn play(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.plays += 1;
        if state.behavior.play_error {
            return Err(Error::platform("play() rejected: autoplay blocked"));
        }
        Ok(())
    }

    fn supports_picture_in_picture(&self) -> bool {
        self.0.lock().env.picture_in_picture
    }

    async fn request_picture_in_picture(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.picture_in_picture_requests += 1;
        fail_with(&state.behavior.picture_in_picture_error)?;
        state.picture_in_picture = true;
        state.emit_document(PlatformEvent::PictureInPictureChanged { active: true });
        Ok(())
    }

    async fn request_fullscreen(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.fullscreen_requests += 1;
        fail_with(&state.behavior.fullscreen_error)?;
        state.fullscreen = true;
        state.emit_document(PlatformEvent::FullscreenChanged { active: true });
        Ok(())
    }

    fn has_playback_target_picker(&self) -> bool {
        self.0.lock().env.playback_target_picker
    }

    fn show_playback_target_picker(&self) -> Result<()> {
        let mut state = self.0.lock();
        if !state.env.playback_target_picker {
            return Err(Error::platform("webkitShowPlaybackTargetPicker is not a function"));
        }
        state.calls.pickers_shown += 1;
        Ok(())
    }

    fn remote(&self) -> Option<Arc<dyn RemotePlayback>> {
        if self.0.lock().env.remote_playback {
            Some(Arc::new(SimRemote(self.0.clone())))
        } else {
            None
        }
    }
}

struct SimRemote(Shared);

#[async_trait]
impl RemotePlayback for SimRemote {
    fn state(&self) -> RemotePlaybackState {
        self.0.lock().remote_state
    }

    fn supports_availability_watch(&self) -> bool {
        true
    }

    fn add_state_listener(&self, sink: EventSink) -> ListenerId {
        let mut state = self.0.lock();
        state.calls.state_listeners_added += 1;
        let id = state.next_id();
        state.remote_listeners.insert(id, sink);
        ListenerId(id)
    }

    fn remove_state_listener(&self, id: ListenerId) {
        let mut state = self.0.lock();
        if state.remote_listeners.remove(&id.0).is_some() {
            state.calls.state_listeners_removed += 1;
        }
    }

    async fn watch_availability(&self, sink: EventSink) -> Result<WatchId> {
        let mut state = self.0.lock();
        state.calls.remote_watches += 1;
        fail_with(&state.behavior.remote_watch_error)?;
        let id = state.next_id();
        state.remote_watches.insert(id, sink);
        Ok(WatchId(id))
    }

    async fn cancel_watch_availability(&self, id: WatchId) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.remote_watch_cancels += 1;
        state.remote_watches.remove(&id.0);
        Ok(())
    }

    async fn prompt(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.remote_prompts += 1;
        fail_with(&state.behavior.remote_prompt_error)?;
        if state.behavior.remote_connects {
            state.set_remote_state(RemotePlaybackState::Connecting);
            state.set_remote_state(RemotePlaybackState::Connected);
        }
        Ok(())
    }
}

struct SimDocument(Shared);

#[async_trait]
impl DocumentSurface for SimDocument {
    fn fullscreen_active(&self) -> bool {
        self.0.lock().fullscreen
    }

    fn picture_in_picture_active(&self) -> bool {
        self.0.lock().picture_in_picture
    }

    fn add_change_listeners(&self, sink: EventSink) {
        self.0.lock().document_sinks.push(sink);
    }

    async fn exit_fullscreen(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.fullscreen_exits += 1;
        fail_with(&state.behavior.fullscreen_error)?;
        state.fullscreen = false;
        state.emit_document(PlatformEvent::FullscreenChanged { active: false });
        Ok(())
    }

    async fn exit_picture_in_picture(&self) -> Result<()> {
        let mut state = self.0.lock();
        state.calls.picture_in_picture_exits += 1;
        fail_with(&state.behavior.picture_in_picture_error)?;
        state.picture_in_picture = false;
        state.emit_document(PlatformEvent::PictureInPictureChanged { active: false });
        Ok(())
    }
}

struct SimDevices(Shared);

#[async_trait]
impl MediaDevices for SimDevices {
    async fn get_display_media(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn DisplayStream>> {
        let mut state = self.0.lock();
        state.calls.display_media_requests += 1;
        state.last_constraints = Some(constraints);
        fail_with(&state.behavior.display_media_error)?;
        state.capture_sinks.clear();
        Ok(Box::new(SimStream {
            id: Uuid::new_v4().to_string(),
            state: self.0.clone(),
        }))
    }
}

struct SimStream {
    id: String,
    state: Shared,
}

impl DisplayStream for SimStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn on_video_track_ended(&self, sink: EventSink) {
        self.state.lock().capture_sinks.push(sink);
    }

    fn stop_tracks(&self) {
        self.state.lock().calls.tracks_stopped += 1;
    }
}

struct SimPresentation(Shared);

impl PresentationApi for SimPresentation {
    fn create_request(&self, urls: Vec<String>) -> Result<Box<dyn PresentationRequest>> {
        let mut state = self.0.lock();
        state.calls.presentation_requests += 1;
        if urls.is_empty() {
            return Err(Error::platform("PresentationRequest needs at least one URL"));
        }
        Ok(Box::new(SimPresentationRequest(self.0.clone())))
    }
}

struct SimPresentationRequest(Shared);

#[async_trait]
impl PresentationRequest for SimPresentationRequest {
    async fn availability(&self) -> Result<Option<bool>> {
        let state = self.0.lock();
        if state.behavior.presentation_availability_error {
            return Err(Error::platform("getAvailability() not supported"));
        }
        Ok(state.behavior.presentation_availability)
    }

    async fn start(&self) -> Result<Box<dyn PresentationConnection>> {
        let mut state = self.0.lock();
        state.calls.presentation_starts += 1;
        fail_with(&state.behavior.presentation_start_error)?;
        Ok(Box::new(SimPresentationConnection {
            id: Uuid::new_v4().to_string(),
            state: self.0.clone(),
        }))
    }
}

struct SimPresentationConnection {
    id: String,
    state: Shared,
}

#[async_trait]
impl PresentationConnection for SimPresentationConnection {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn add_listeners(&self, sink: EventSink) {
        self.state.lock().presentation_sinks.push((self.id.clone(), sink));
    }

    async fn terminate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.presentation_terminations += 1;
        fail_with(&state.behavior.presentation_terminate_error)?;
        for (_, sink) in state.presentation_sinks.iter().filter(|(id, _)| *id == self.id) {
            sink.emit(PlatformEvent::PresentationTerminated);
        }
        Ok(())
    }
}
