//! Casting Coordinator - owns every output session
//!
//! Coordinates:
//! - Capability snapshot and its incremental revisions
//! - Per-protocol start/stop/enter/exit actions
//! - Session lifecycle driven by platform events
//! - Aggregate casting status
//! - Reconnection after an unexpected drop
//!
//! All state mutation happens synchronously under one lock, either inside an
//! action between native calls or in [`CastingCoordinator::process_events`],
//! the single reduction point for platform events.

use crate::{
    config::CastConfig,
    detector::CapabilityDetector,
    events::{is_media_ended_message, EventOrigin, EventSink, PlatformEvent, TaggedEvent},
    media::LoadRequest,
    platform::{CastSession, MediaElement, Platform, PresentationApi, PresentationConnection},
    reconnect::{ReconnectPolicy, FALLBACK_CHAIN},
    session::{spawn_detached, Handoff, NativeSession, ReleaseReason, SessionHandle, SessionTable},
    types::{
        ActivityState, CapabilitySnapshot, CastingStatus, MediaSource, Protocol, RestoreSignal,
        SessionState,
    },
    Error, Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

struct CoordinatorState {
    capabilities: CapabilitySnapshot,
    sessions: SessionTable,
    fullscreen: bool,
    picture_in_picture: bool,
    status: CastingStatus,
    stream_url: Option<String>,
    reconnect: ReconnectPolicy,
    last_dropped: Option<Protocol>,
}

impl CoordinatorState {
    fn activity(&self) -> ActivityState {
        ActivityState {
            is_casting: self.sessions.is_active(Protocol::Chromecast),
            is_screen_sharing: self.sessions.is_active(Protocol::ScreenShare),
            is_presentation_active: self.sessions.is_active(Protocol::Presentation),
            is_remote_playback_active: self.sessions.is_active(Protocol::RemotePlayback),
            is_dlna_active: self.sessions.is_active(Protocol::Dlna),
            is_fullscreen: self.fullscreen,
            is_picture_in_picture: self.picture_in_picture,
        }
    }

    /// Health of the most active cast-group session
    fn aggregate_status(&self) -> CastingStatus {
        let states: Vec<SessionState> = Protocol::SESSION_PROTOCOLS
            .iter()
            .filter(|p| p.is_cast_group())
            .filter_map(|p| self.sessions.get(*p).map(|h| h.state))
            .collect();

        if states.contains(&SessionState::Connected) {
            CastingStatus::Connected
        } else if states.contains(&SessionState::Connecting) {
            CastingStatus::Connecting
        } else {
            CastingStatus::Disconnected
        }
    }
}

/// Outcome of reserving a protocol's session slot
enum Reservation {
    /// A live session already exists
    Existing,
    New(u64),
}

/// Multi-protocol casting session manager
pub struct CastingCoordinator {
    config: CastConfig,
    platform: Platform,
    detector: CapabilityDetector,
    state: Mutex<CoordinatorState>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TaggedEvent>>>,
    status_tx: watch::Sender<CastingStatus>,
    capabilities_tx: watch::Sender<CapabilitySnapshot>,
    restore_tx: broadcast::Sender<RestoreSignal>,
    drop_tx: broadcast::Sender<Protocol>,
    start_guards: HashMap<Protocol, tokio::sync::Mutex<()>>,
    reconnect_guard: tokio::sync::Mutex<()>,
    this: Weak<CastingCoordinator>,
}

impl CastingCoordinator {
    /// Create a coordinator and take the initial capability snapshot
    pub fn new(platform: Platform, config: CastConfig) -> Arc<Self> {
        let detector = CapabilityDetector::new(platform.clone());
        let capabilities = detector.detect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(CastingStatus::Disconnected);
        let (capabilities_tx, _) = watch::channel(capabilities);
        let (restore_tx, _) = broadcast::channel(16);
        let (drop_tx, _) = broadcast::channel(16);

        let (fullscreen, picture_in_picture) = match &platform.document {
            Some(document) => {
                document.add_change_listeners(EventSink::new(EventOrigin::Ambient, events_tx.clone()));
                (document.fullscreen_active(), document.picture_in_picture_active())
            }
            None => (false, false),
        };

        let start_guards = Protocol::SESSION_PROTOCOLS
            .into_iter()
            .map(|p| (p, tokio::sync::Mutex::new(())))
            .collect();

        info!(?capabilities, "Casting coordinator created");

        Arc::new_cyclic(|this| Self {
            state: Mutex::new(CoordinatorState {
                capabilities,
                sessions: SessionTable::default(),
                fullscreen,
                picture_in_picture,
                status: CastingStatus::Disconnected,
                stream_url: None,
                reconnect: ReconnectPolicy::new(config.max_reconnect_attempts),
                last_dropped: None,
            }),
            config,
            platform,
            detector,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            status_tx,
            capabilities_tx,
            restore_tx,
            drop_tx,
            start_guards,
            reconnect_guard: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Initialize the Cast SDK, waiting for it in the background if needed
    ///
    /// Returns the wait task when the SDK was not loaded yet. It resolves
    /// `true` once the SDK became available and capabilities were re-detected.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Option<JoinHandle<bool>> {
        let cast = self.platform.cast.clone()?;

        if cast.is_available().unwrap_or(false) {
            self.init_cast_sdk().await;
            return None;
        }

        let this = self.this.clone();
        let detector = CapabilityDetector::new(self.platform.clone());
        let interval = self.config.sdk_poll_interval();
        let max_polls = self.config.sdk_max_polls;

        Some(tokio::spawn(async move {
            if !detector.wait_for_cast_sdk(interval, max_polls).await {
                return false;
            }
            let Some(coordinator) = this.upgrade() else {
                return false;
            };
            coordinator.redetect();
            coordinator.init_cast_sdk().await;
            true
        }))
    }

    async fn init_cast_sdk(&self) {
        let Some(cast) = self.platform.cast.clone() else {
            return;
        };
        let sink = EventSink::new(EventOrigin::Ambient, self.events_tx.clone());
        match cast.initialize(&self.config.receiver_app_id, sink).await {
            Ok(()) => info!(app_id = %self.config.receiver_app_id, "Cast SDK initialized"),
            Err(e) => warn!(error = %e, "Cast initialization failed"),
        }
    }

    /// Recompute the capability snapshot
    ///
    /// Running sessions are left alone even if their flag turned `false`.
    /// Receiver sub-capabilities proven by a live Cast session are kept.
    pub fn redetect(&self) -> CapabilitySnapshot {
        let mut fresh = self.detector.detect();
        let mut state = self.state.lock();
        if state.sessions.is_active(Protocol::Chromecast) {
            fresh.chromecast_ultra = state.capabilities.chromecast_ultra;
            fresh.chromecast_audio = state.capabilities.chromecast_audio;
        }
        state.capabilities = fresh;
        drop(state);
        self.capabilities_tx.send_replace(fresh);
        fresh
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &CastConfig {
        &self.config
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.process_events();
        self.state.lock().capabilities
    }

    pub fn activity(&self) -> ActivityState {
        self.process_events();
        self.state.lock().activity()
    }

    pub fn status(&self) -> CastingStatus {
        self.process_events();
        self.state.lock().status
    }

    /// Handles of every session the coordinator currently owns
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.process_events();
        self.state.lock().sessions.handles()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.lock().reconnect.attempts()
    }

    /// Protocol whose session dropped most recently without a local stop
    pub fn last_dropped(&self) -> Option<Protocol> {
        self.process_events();
        self.state.lock().last_dropped
    }

    pub fn stream_url(&self) -> Option<String> {
        self.state.lock().stream_url.clone()
    }

    /// Set the stream cast sessions and restore signals refer to
    pub fn set_stream_url(&self, url: impl Into<String>) {
        let url = url.into();
        let url = if url.trim().is_empty() { None } else { Some(url) };
        debug!(url = ?url, "Stream URL set");
        self.state.lock().stream_url = url;
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CastingStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_capabilities(&self) -> watch::Receiver<CapabilitySnapshot> {
        self.capabilities_tx.subscribe()
    }

    /// Restore signals sent when a screen capture ends
    pub fn subscribe_restore(&self) -> broadcast::Receiver<RestoreSignal> {
        self.restore_tx.subscribe()
    }

    /// Protocols that dropped without a local stop
    pub fn subscribe_drops(&self) -> broadcast::Receiver<Protocol> {
        self.drop_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Event reduction
    // ------------------------------------------------------------------

    /// Apply every queued platform event
    ///
    /// Returns the number of events reduced. A no-op once the event loop was
    /// handed to [`CastingCoordinator::spawn_event_loop`].
    pub fn process_events(&self) -> usize {
        let pending: Vec<TaggedEvent> = {
            let mut guard = self.events_rx.lock();
            let Some(rx) = guard.as_mut() else {
                return 0;
            };
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        let count = pending.len();
        for event in pending {
            self.reduce(event);
        }
        count
    }

    /// Reduce platform events on a background task as they arrive
    pub fn spawn_event_loop(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.events_rx.lock().take()?;
        let this = self.this.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(coordinator) = this.upgrade() else {
                    break;
                };
                coordinator.reduce(event);
            }
            debug!("Event loop stopped");
        }))
    }

    fn reduce(&self, tagged: TaggedEvent) {
        let mut state = self.state.lock();

        if let EventOrigin::Session {
            protocol,
            generation,
        } = tagged.origin
        {
            if !state.sessions.is_current(protocol, generation) {
                debug!(%protocol, generation, event = ?tagged.event, "Dropping event from released session");
                return;
            }
        }

        let mut dropped = None;
        let mut forced = None;
        let session_event = matches!(tagged.origin, EventOrigin::Session { .. });
        match (tagged.origin, tagged.event) {
            (_, PlatformEvent::ReceiverAvailability { available }) => {
                state.capabilities.chromecast = available;
                self.capabilities_tx.send_replace(state.capabilities);
                debug!(available, "Cast receiver availability");
            }
            (_, PlatformEvent::FullscreenChanged { active }) => state.fullscreen = active,
            (_, PlatformEvent::PictureInPictureChanged { active }) => {
                state.picture_in_picture = active
            }
            (EventOrigin::Session { protocol, generation }, event) => match event {
                PlatformEvent::CastSessionUpdate { alive: false } => {
                    info!(%protocol, "Cast session ended on the receiver");
                    self.release_locked(&mut state, protocol, generation, ReleaseReason::RemoteEnded);
                    dropped = Some(protocol);
                }
                PlatformEvent::CastMessage { namespace, message } => {
                    if is_media_ended_message(&namespace, &message) {
                        info!("Cast media session ended");
                        if let Err(e) = state.sessions.set_state(protocol, generation, SessionState::Ended) {
                            debug!(%protocol, error = %e, "Cannot mark Cast media ended");
                        }
                    }
                }
                PlatformEvent::RemotePlaybackStateChanged { state: remote_state } => {
                    let next = remote_state.session_state();
                    if next == SessionState::Ended {
                        let was_active = state.sessions.is_active(protocol);
                        self.release_locked(&mut state, protocol, generation, ReleaseReason::RemoteEnded);
                        if was_active {
                            dropped = Some(protocol);
                        }
                    } else if let Err(e) = state.sessions.set_state(protocol, generation, next) {
                        debug!(%protocol, error = %e, "Cannot apply remote playback state");
                    }
                }
                PlatformEvent::RemotePlaybackAvailability { available: false } => {
                    info!("Remote playback device no longer available");
                    self.release_locked(&mut state, protocol, generation, ReleaseReason::RemoteEnded);
                    forced = Some(CastingStatus::Disconnected);
                }
                PlatformEvent::CaptureTrackEnded => {
                    info!("Screen sharing stopped outside the app");
                    self.release_locked(&mut state, protocol, generation, ReleaseReason::RemoteEnded);
                }
                PlatformEvent::PresentationClosed | PlatformEvent::PresentationTerminated => {
                    info!("Presentation connection closed");
                    self.release_locked(&mut state, protocol, generation, ReleaseReason::RemoteEnded);
                }
                other => debug!(%protocol, event = ?other, "Ignoring platform event"),
            },
            (EventOrigin::Ambient, other) => debug!(event = ?other, "Ignoring ambient event"),
        }

        if session_event {
            let status = forced.unwrap_or_else(|| state.aggregate_status());
            self.publish_status_locked(&mut state, status);
        }

        if let Some(protocol) = dropped {
            state.last_dropped = Some(protocol);
            drop(state);
            self.on_unexpected_drop(protocol);
        }
    }

    fn on_unexpected_drop(&self, protocol: Protocol) {
        warn!(%protocol, "Session dropped unexpectedly");
        let _ = self.drop_tx.send(protocol);

        if !self.config.auto_reconnect {
            return;
        }
        let Some(coordinator) = self.this.upgrade() else {
            return;
        };
        spawn_detached(async move {
            let reconnected = coordinator.reconnect().await;
            info!(%protocol, reconnected, "Automatic reconnection finished");
        });
    }

    /// Remove a session entry and run its release routine
    ///
    /// Listener and video-surface cleanup happens now; the native close
    /// calls run in the background.
    fn release_locked(
        &self,
        state: &mut CoordinatorState,
        protocol: Protocol,
        generation: u64,
        reason: ReleaseReason,
    ) {
        let Some(entry) = state.sessions.remove_if_current(protocol, generation) else {
            return;
        };
        if protocol == Protocol::Chromecast {
            self.reset_receiver_flags_locked(state);
        }
        if let Some(native) = entry.native {
            native.detach(&self.handoff(state));
            spawn_detached(async move {
                if let Err(e) = native.close(reason).await {
                    debug!(%protocol, error = %e, "Native close after release failed");
                }
            });
        }
    }

    fn reset_receiver_flags_locked(&self, state: &mut CoordinatorState) {
        if state.capabilities.chromecast_ultra || state.capabilities.chromecast_audio {
            state.capabilities.chromecast_ultra = false;
            state.capabilities.chromecast_audio = false;
            self.capabilities_tx.send_replace(state.capabilities);
        }
    }

    fn handoff(&self, state: &CoordinatorState) -> Handoff {
        Handoff {
            media: self.platform.media.clone(),
            restore_tx: self.restore_tx.clone(),
            stream_url: state.stream_url.clone(),
            fallback_delay: self.config.restore_fallback(),
        }
    }

    fn publish_status_locked(&self, state: &mut CoordinatorState, status: CastingStatus) {
        if state.status != status {
            info!(from = %state.status, to = %status, "Casting status");
            state.status = status;
        }
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn set_status(&self, status: CastingStatus) {
        let mut state = self.state.lock();
        self.publish_status_locked(&mut state, status);
    }

    fn refresh_status(&self) {
        let mut state = self.state.lock();
        let status = state.aggregate_status();
        self.publish_status_locked(&mut state, status);
    }

    // ------------------------------------------------------------------
    // Action plumbing
    // ------------------------------------------------------------------

    /// Run an action body, mapping every failure to `false`
    async fn run_action<F>(&self, protocol: Protocol, body: F) -> bool
    where
        F: Future<Output = Result<bool>>,
    {
        match body.await {
            Ok(success) => {
                debug!(%protocol, success, "Action finished");
                success
            }
            Err(e @ Error::CapabilityAbsent { .. }) => {
                debug!(%protocol, error = %e, "Action not offered");
                false
            }
            Err(e) => {
                warn!(%protocol, code = e.error_code(), error = %e, "Action failed");
                false
            }
        }
    }

    fn ensure_capability(&self, protocol: Protocol) -> Result<()> {
        if self.state.lock().capabilities.supports(protocol) {
            Ok(())
        } else {
            Err(Error::CapabilityAbsent { protocol })
        }
    }

    fn require_stream_url(&self) -> Result<String> {
        self.state.lock().stream_url.clone().ok_or(Error::MissingStreamUrl)
    }

    fn require_media(&self) -> Result<Arc<dyn MediaElement>> {
        self.platform.media.clone().ok_or(Error::NoMediaElement)
    }

    fn sink(&self, protocol: Protocol, generation: u64) -> EventSink {
        EventSink::new(
            EventOrigin::Session {
                protocol,
                generation,
            },
            self.events_tx.clone(),
        )
    }

    /// Claim the session slot for `protocol`
    ///
    /// A live session, or one whose native object is attached and still
    /// waiting on the device, makes the start idempotent. A leftover ended
    /// session is released first.
    fn reserve(&self, protocol: Protocol) -> Reservation {
        let mut state = self.state.lock();
        if let Some(handle) = state.sessions.get(protocol) {
            if handle.state.is_active() || state.sessions.is_opening(protocol) {
                return Reservation::Existing;
            }
            let generation = handle.generation;
            self.release_locked(&mut state, protocol, generation, ReleaseReason::LocalStop);
        }
        Reservation::New(state.sessions.reserve(protocol))
    }

    /// Attach the native object; closes it if the slot was released meanwhile
    async fn attach(&self, protocol: Protocol, generation: u64, native: NativeSession) -> Result<()> {
        let rejected = self.state.lock().sessions.attach(protocol, generation, native);
        match rejected {
            Ok(()) => Ok(()),
            Err(native) => {
                info!(%protocol, "Session released while starting, closing it");
                native.detach(&self.handoff(&self.state.lock()));
                let _ = native.close(ReleaseReason::LocalStop).await;
                Err(Error::StaleState { protocol })
            }
        }
    }

    fn mark(&self, protocol: Protocol, generation: u64, state: SessionState) -> Result<()> {
        self.state.lock().sessions.set_state(protocol, generation, state)
    }

    /// Drop a reservation whose start failed
    async fn abandon(&self, protocol: Protocol, generation: u64) {
        let entry = self.state.lock().sessions.remove_if_current(protocol, generation);
        if let Some(native) = entry.and_then(|e| e.native) {
            native.detach(&self.handoff(&self.state.lock()));
            if let Err(e) = native.close(ReleaseReason::LocalStop).await {
                debug!(%protocol, error = %e, "Close after failed start failed");
            }
        }
    }

    fn start_guard(&self, protocol: Protocol) -> &tokio::sync::Mutex<()> {
        &self.start_guards[&protocol]
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Start `protocol` through its start/enter action
    pub async fn start(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Chromecast => self.start_chromecast().await,
            Protocol::AirPlay => self.start_airplay().await,
            Protocol::Presentation => self.start_presentation().await,
            Protocol::RemotePlayback => self.start_remote_playback().await,
            Protocol::ScreenShare => self.start_screen_share().await,
            Protocol::Fullscreen => self.enter_fullscreen().await,
            Protocol::PictureInPicture => self.enter_picture_in_picture().await,
            Protocol::Dlna => self.start_dlna().await,
            Protocol::Miracast => {
                debug!("Miracast is informational only");
                false
            }
        }
    }

    /// Open a Cast session and load the stream on the receiver
    #[instrument(skip(self))]
    pub async fn start_chromecast(&self) -> bool {
        self.run_action(Protocol::Chromecast, self.try_start_chromecast()).await
    }

    async fn try_start_chromecast(&self) -> Result<bool> {
        const P: Protocol = Protocol::Chromecast;
        self.process_events();
        self.ensure_capability(P)?;
        let url = self.require_stream_url()?;
        let cast = self
            .platform
            .cast
            .clone()
            .ok_or(Error::CapabilityAbsent { protocol: P })?;

        let _guard = self.start_guard(P).lock().await;
        self.process_events();
        let generation = match self.reserve(P) {
            Reservation::Existing => return Ok(true),
            Reservation::New(generation) => generation,
        };

        let session: Arc<dyn CastSession> =
            match cast.request_session(&self.config.receiver_app_id).await {
                Ok(session) => Arc::from(session),
                Err(e) => {
                    self.abandon(P, generation).await;
                    return Err(e);
                }
            };
        session.add_listeners(self.sink(P, generation));
        let receiver = session.receiver();
        self.attach(P, generation, NativeSession::Cast(session.clone()))
            .await?;

        let request = LoadRequest::live(&url, self.config.metadata());
        info!(
            url = %url,
            content_type = %request.media.content_type,
            receiver = %receiver.friendly_name,
            "Loading media on receiver"
        );
        if let Err(e) = session.load_media(request).await {
            self.abandon(P, generation).await;
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.sessions.set_state(P, generation, SessionState::Connected)?;
            state.capabilities.chromecast_ultra = receiver.is_ultra();
            state.capabilities.chromecast_audio = receiver.is_audio();
            self.capabilities_tx.send_replace(state.capabilities);
        }
        self.refresh_status();
        Ok(true)
    }

    /// Show the AirPlay target picker
    #[instrument(skip(self))]
    pub async fn start_airplay(&self) -> bool {
        self.run_action(Protocol::AirPlay, self.try_start_airplay()).await
    }

    async fn try_start_airplay(&self) -> Result<bool> {
        self.ensure_capability(Protocol::AirPlay)?;
        let media = self.require_media()?;

        if media.has_playback_target_picker() {
            media.show_playback_target_picker()?;
            return Ok(true);
        }
        if let Some(remote) = media.remote() {
            remote.prompt().await?;
            return Ok(true);
        }
        Err(Error::action(Protocol::AirPlay, "no playback target picker on the media element"))
    }

    /// Prompt for a Remote Playback device
    #[instrument(skip(self))]
    pub async fn start_remote_playback(&self) -> bool {
        let success = self
            .run_action(Protocol::RemotePlayback, self.try_start_remote_playback())
            .await;
        if !success && !self.activity().is_remote_playback_active {
            self.set_status(CastingStatus::Disconnected);
        }
        success
    }

    async fn try_start_remote_playback(&self) -> Result<bool> {
        const P: Protocol = Protocol::RemotePlayback;
        self.process_events();
        self.ensure_capability(P)?;
        let media = self.require_media()?;
        let remote = media.remote().ok_or(Error::CapabilityAbsent { protocol: P })?;

        let _guard = self.start_guard(P).lock().await;
        self.process_events();
        let generation = match self.reserve(P) {
            Reservation::Existing => return Ok(true),
            Reservation::New(generation) => generation,
        };

        // Listen before prompting so the first transition is not missed
        let listener = remote.add_state_listener(self.sink(P, generation));
        let watch = match remote.watch_availability(self.sink(P, generation)).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Cannot watch remote playback availability");
                None
            }
        };
        self.attach(
            P,
            generation,
            NativeSession::RemotePlayback {
                remote: remote.clone(),
                listener,
                watch,
            },
        )
        .await?;

        if let Err(e) = remote.prompt().await {
            self.abandon(P, generation).await;
            return Err(e);
        }

        self.process_events();
        Ok(true)
    }

    /// DLNA cannot be driven from a sandboxed client; always `false`
    pub async fn start_dlna(&self) -> bool {
        warn!("DLNA is unavailable: local-network UPnP control is not possible from a sandboxed client");
        false
    }

    /// Capture the display and show it on the video element
    #[instrument(skip(self))]
    pub async fn start_screen_share(&self) -> bool {
        self.run_action(Protocol::ScreenShare, self.try_start_screen_share())
            .await
    }

    async fn try_start_screen_share(&self) -> Result<bool> {
        const P: Protocol = Protocol::ScreenShare;
        self.process_events();
        self.ensure_capability(P)?;
        let media = self.require_media()?;
        let devices = self
            .platform
            .media_devices
            .clone()
            .ok_or(Error::CapabilityAbsent { protocol: P })?;

        let _guard = self.start_guard(P).lock().await;
        self.process_events();
        let generation = match self.reserve(P) {
            Reservation::Existing => return Ok(true),
            Reservation::New(generation) => generation,
        };

        let stream = match devices.get_display_media(self.config.capture).await {
            Ok(stream) => stream,
            Err(e) => {
                self.abandon(P, generation).await;
                return Err(e);
            }
        };
        stream.on_video_track_ended(self.sink(P, generation));
        let capture_id = stream.id();
        self.attach(P, generation, NativeSession::ScreenShare(stream))
            .await?;

        media.set_source(MediaSource::Capture(capture_id.clone()));
        self.mark(P, generation, SessionState::Connected)?;
        info!(capture = %capture_id, "Screen sharing started");
        Ok(true)
    }

    /// Present the stream on a secondary display
    #[instrument(skip(self))]
    pub async fn start_presentation(&self) -> bool {
        self.run_action(Protocol::Presentation, self.try_start_presentation())
            .await
    }

    async fn try_start_presentation(&self) -> Result<bool> {
        const P: Protocol = Protocol::Presentation;
        self.process_events();
        self.ensure_capability(P)?;
        let url = self.require_stream_url()?;
        let api = self
            .platform
            .presentation
            .clone()
            .ok_or(Error::CapabilityAbsent { protocol: P })?;

        let _guard = self.start_guard(P).lock().await;
        self.process_events();
        let generation = match self.reserve(P) {
            Reservation::Existing => return Ok(true),
            Reservation::New(generation) => generation,
        };

        let outcome = self.open_presentation(api.as_ref(), url).await;

        let connection = match outcome {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                self.abandon(P, generation).await;
                return Err(Error::action(P, "no presentation displays available"));
            }
            Err(e) => {
                self.abandon(P, generation).await;
                return Err(e);
            }
        };

        connection.add_listeners(self.sink(P, generation));
        self.attach(P, generation, NativeSession::Presentation(connection))
            .await?;
        self.mark(P, generation, SessionState::Connected)?;
        self.refresh_status();
        Ok(true)
    }

    /// `Ok(None)` when the platform reports no display to present on
    async fn open_presentation(
        &self,
        api: &dyn PresentationApi,
        url: String,
    ) -> Result<Option<Arc<dyn PresentationConnection>>> {
        let request = api.create_request(vec![url])?;

        match request.availability().await {
            Ok(Some(false)) => {
                info!("No presentation displays available");
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Cannot check presentation availability, attempting direct start");
            }
        }

        let connection = request.start().await?;
        Ok(Some(Arc::from(connection)))
    }

    #[instrument(skip(self))]
    pub async fn enter_fullscreen(&self) -> bool {
        self.run_action(Protocol::Fullscreen, self.try_enter(Protocol::Fullscreen))
            .await
    }

    #[instrument(skip(self))]
    pub async fn exit_fullscreen(&self) -> bool {
        self.run_action(Protocol::Fullscreen, self.try_exit(Protocol::Fullscreen))
            .await
    }

    #[instrument(skip(self))]
    pub async fn enter_picture_in_picture(&self) -> bool {
        self.run_action(
            Protocol::PictureInPicture,
            self.try_enter(Protocol::PictureInPicture),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn exit_picture_in_picture(&self) -> bool {
        self.run_action(
            Protocol::PictureInPicture,
            self.try_exit(Protocol::PictureInPicture),
        )
        .await
    }

    /// Ask the document; the reduced flags may lag behind the event loop
    fn display_mode_active(&self, protocol: Protocol) -> bool {
        if let Some(document) = &self.platform.document {
            return match protocol {
                Protocol::Fullscreen => document.fullscreen_active(),
                _ => document.picture_in_picture_active(),
            };
        }
        let state = self.state.lock();
        match protocol {
            Protocol::Fullscreen => state.fullscreen,
            _ => state.picture_in_picture,
        }
    }

    /// Request a display mode; already being in it counts as success
    async fn try_enter(&self, protocol: Protocol) -> Result<bool> {
        self.process_events();
        self.ensure_capability(protocol)?;
        if self.display_mode_active(protocol) {
            return Ok(true);
        }
        let media = self.require_media()?;
        match protocol {
            Protocol::Fullscreen => media.request_fullscreen().await?,
            _ => media.request_picture_in_picture().await?,
        }
        self.process_events();
        Ok(true)
    }

    /// Leave a display mode; `false` when it was not active
    async fn try_exit(&self, protocol: Protocol) -> Result<bool> {
        self.process_events();
        self.ensure_capability(protocol)?;
        if !self.display_mode_active(protocol) {
            return Ok(false);
        }
        let document = self
            .platform
            .document
            .clone()
            .ok_or(Error::CapabilityAbsent { protocol })?;
        match protocol {
            Protocol::Fullscreen => document.exit_fullscreen().await?,
            _ => document.exit_picture_in_picture().await?,
        }
        self.process_events();
        Ok(true)
    }

    /// Tear down every live session
    ///
    /// Each protocol is attempted independently. The result is the AND of the
    /// attempted teardowns; the status ends `disconnected` either way.
    #[instrument(skip(self))]
    pub async fn stop_all(&self) -> bool {
        self.process_events();

        let (entries, handoff) = {
            let mut state = self.state.lock();
            let entries = state.sessions.drain();
            if entries.iter().any(|e| e.handle.protocol == Protocol::Chromecast) {
                self.reset_receiver_flags_locked(&mut state);
            }
            (entries, self.handoff(&state))
        };

        let mut success = true;
        for entry in entries {
            let protocol = entry.handle.protocol;
            let Some(native) = entry.native else {
                debug!(%protocol, "Released pending session");
                continue;
            };
            native.detach(&handoff);
            match native.close(ReleaseReason::LocalStop).await {
                Ok(()) => info!(%protocol, "Session stopped"),
                Err(e) => {
                    error!(%protocol, error = %e, "Failed to stop session");
                    success = false;
                }
            }
        }

        self.set_status(CastingStatus::Disconnected);
        success
    }

    /// Try to restore casting after an unexpected disconnect
    ///
    /// Walks the fallback chain (Chromecast, then Remote Playback) for at
    /// most `max_reconnect_attempts` consecutive invocations.
    #[instrument(skip(self))]
    pub async fn reconnect(&self) -> bool {
        let _guard = self.reconnect_guard.lock().await;
        self.process_events();

        let capabilities = {
            let mut state = self.state.lock();
            if !state.reconnect.try_begin() {
                let e = Error::RetryExhausted {
                    attempts: state.reconnect.attempts(),
                };
                info!(code = e.error_code(), "{}", e);
                self.publish_status_locked(&mut state, CastingStatus::Disconnected);
                return false;
            }
            info!(attempt = state.reconnect.attempts(), "Reconnecting");
            self.publish_status_locked(&mut state, CastingStatus::Connecting);
            state.capabilities
        };

        for protocol in FALLBACK_CHAIN {
            if capabilities.supports(protocol) && self.start(protocol).await {
                let mut state = self.state.lock();
                state.reconnect.reset();
                self.publish_status_locked(&mut state, CastingStatus::Connected);
                info!(%protocol, "Reconnected");
                return true;
            }
        }

        self.set_status(CastingStatus::Disconnected);
        false
    }
}

impl Drop for CastingCoordinator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let entries = state.sessions.drain();
        if entries.is_empty() {
            return;
        }
        let handoff = Handoff {
            media: self.platform.media.clone(),
            restore_tx: self.restore_tx.clone(),
            stream_url: state.stream_url.clone(),
            fallback_delay: self.config.restore_fallback(),
        };
        for entry in entries {
            let protocol = entry.handle.protocol;
            if let Some(native) = entry.native {
                native.detach(&handoff);
                spawn_detached(async move {
                    if let Err(e) = native.close(ReleaseReason::LocalStop).await {
                        debug!(%protocol, error = %e, "Close on disposal failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBehavior, SimEnvironment, SimulatedPlatform};
    use crate::types::{ReceiverInfo, RemotePlaybackState};

    const STREAM: &str = "https://cdn.example.com/live/master.m3u8";

    fn manual_config() -> CastConfig {
        CastConfig {
            auto_reconnect: false,
            ..CastConfig::default()
        }
    }

    fn coordinator(sim: &SimulatedPlatform, config: CastConfig) -> Arc<CastingCoordinator> {
        let coordinator = CastingCoordinator::new(sim.platform(), config);
        coordinator.set_stream_url(STREAM);
        coordinator
    }

    #[tokio::test]
    async fn test_absent_capability_makes_no_native_call() {
        let sim = SimulatedPlatform::new(SimEnvironment::bare());
        let coordinator = coordinator(&sim, manual_config());
        let before = sim.calls().native_actions();

        for protocol in Protocol::ALL {
            assert!(!coordinator.start(protocol).await, "{} started", protocol);
        }
        assert!(!coordinator.exit_fullscreen().await);
        assert!(!coordinator.exit_picture_in_picture().await);
        assert_eq!(sim.calls().native_actions(), before);
    }

    #[tokio::test]
    async fn test_chromecast_records_receiver_flags() {
        let env = SimEnvironment {
            receiver: ReceiverInfo {
                friendly_name: "Chromecast Ultra".to_string(),
                capabilities: vec!["video_out".to_string()],
            },
            ..SimEnvironment::desktop()
        };
        let sim = SimulatedPlatform::new(env);
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_chromecast().await);
        assert!(coordinator.activity().is_casting);
        assert_eq!(coordinator.status(), CastingStatus::Connected);
        assert!(coordinator.capabilities().chromecast_ultra);
        assert!(!coordinator.capabilities().chromecast_audio);

        // ultra survives a re-detection while the session lives
        assert!(coordinator.redetect().chromecast_ultra);

        assert!(coordinator.stop_all().await);
        assert!(!coordinator.capabilities().chromecast_ultra);
        assert_eq!(coordinator.status(), CastingStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_chromecast().await);
        assert!(coordinator.start_chromecast().await);
        assert_eq!(sim.calls().session_requests, 1);
        assert_eq!(coordinator.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_chromecast_requires_stream_url() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = CastingCoordinator::new(sim.platform(), manual_config());

        assert!(!coordinator.start_chromecast().await);
        assert!(!coordinator.start_presentation().await);
        assert_eq!(sim.calls().session_requests, 0);
        assert_eq!(sim.calls().presentation_requests, 0);
    }

    #[tokio::test]
    async fn test_load_failure_releases_session() {
        let sim = SimulatedPlatform::with_behavior(
            SimEnvironment::desktop(),
            SimBehavior {
                cast_load_error: Some("LOAD_FAILED".to_string()),
                ..SimBehavior::default()
            },
        );
        let coordinator = coordinator(&sim, manual_config());

        assert!(!coordinator.start_chromecast().await);
        assert!(!coordinator.activity().is_casting);
        assert!(coordinator.sessions().is_empty());
        assert_eq!(sim.calls().session_stops, 1);
        assert_eq!(coordinator.last_dropped(), None);
    }

    #[tokio::test]
    async fn test_events_from_stopped_session_are_ignored() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());
        let mut drops = coordinator.subscribe_drops();

        assert!(coordinator.start_chromecast().await);
        assert!(coordinator.stop_all().await);

        // the stop produced a late "session gone" update; it must not count as a drop
        sim.trigger_cast_session_lost();
        assert!(coordinator.process_events() >= 1);
        assert_eq!(coordinator.last_dropped(), None);
        assert!(drops.try_recv().is_err());
        assert_eq!(coordinator.status(), CastingStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_media_status_ends_casting() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_chromecast().await);
        sim.trigger_cast_media_ended();
        assert!(!coordinator.activity().is_casting);
        assert_eq!(coordinator.status(), CastingStatus::Disconnected);

        // the next start replaces the ended session
        assert!(coordinator.start_chromecast().await);
        assert_eq!(sim.calls().session_requests, 2);
        assert!(coordinator.activity().is_casting);
    }

    #[tokio::test]
    async fn test_remote_playback_prompt_failure_tears_down_listeners() {
        let sim = SimulatedPlatform::with_behavior(
            SimEnvironment::desktop(),
            SimBehavior {
                remote_prompt_error: Some("NotAllowedError".to_string()),
                ..SimBehavior::default()
            },
        );
        let coordinator = coordinator(&sim, manual_config());

        assert!(!coordinator.start_remote_playback().await);
        assert_eq!(sim.remote_listener_count(), 0);
        assert_eq!(sim.remote_watch_count(), 0);
        assert!(!coordinator.activity().is_remote_playback_active);
        assert_eq!(coordinator.status(), CastingStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_remote_playback_follows_device_state() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_remote_playback().await);
        assert!(coordinator.activity().is_remote_playback_active);
        assert_eq!(coordinator.status(), CastingStatus::Connected);

        sim.trigger_remote_state(RemotePlaybackState::Disconnected);
        assert!(!coordinator.activity().is_remote_playback_active);
        assert_eq!(coordinator.last_dropped(), Some(Protocol::RemotePlayback));
        assert_eq!(sim.remote_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_availability_loss_is_not_a_drop() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_remote_playback().await);
        sim.trigger_remote_availability(false);
        assert!(!coordinator.activity().is_remote_playback_active);
        assert_eq!(coordinator.status(), CastingStatus::Disconnected);
        assert_eq!(coordinator.last_dropped(), None);
    }

    #[tokio::test]
    async fn test_presentation_availability() {
        let sim = SimulatedPlatform::with_behavior(
            SimEnvironment::desktop(),
            SimBehavior {
                presentation_availability: Some(false),
                ..SimBehavior::default()
            },
        );
        let coordinator = coordinator(&sim, manual_config());

        assert!(!coordinator.start_presentation().await);
        assert_eq!(sim.calls().presentation_starts, 0);
        assert!(coordinator.sessions().is_empty());

        // a failing availability check still attempts the start
        sim.update_behavior(|b| {
            b.presentation_availability = None;
            b.presentation_availability_error = true;
        });
        assert!(coordinator.start_presentation().await);
        assert_eq!(sim.calls().presentation_starts, 1);
        assert!(coordinator.activity().is_presentation_active);

        sim.trigger_presentation_closed();
        assert!(!coordinator.activity().is_presentation_active);
    }

    #[tokio::test]
    async fn test_display_modes_track_document_events() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(!coordinator.exit_fullscreen().await);
        assert_eq!(sim.calls().fullscreen_exits, 0);

        assert!(coordinator.enter_fullscreen().await);
        assert!(coordinator.activity().is_fullscreen);
        assert!(coordinator.enter_fullscreen().await);
        assert_eq!(sim.calls().fullscreen_requests, 1);

        sim.trigger_fullscreen_exit();
        assert!(!coordinator.activity().is_fullscreen);

        assert!(coordinator.enter_picture_in_picture().await);
        assert!(coordinator.exit_picture_in_picture().await);
        assert!(!coordinator.activity().is_picture_in_picture);
    }

    #[tokio::test]
    async fn test_dlna_and_miracast_never_start() {
        let sim = SimulatedPlatform::new(SimEnvironment::everything());
        let coordinator = coordinator(&sim, manual_config());

        assert!(!coordinator.start(Protocol::Dlna).await);
        assert!(!coordinator.start(Protocol::Miracast).await);
        assert!(!coordinator.activity().is_dlna_active);
    }

    #[tokio::test]
    async fn test_drop_triggers_automatic_reconnect() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, CastConfig::default());
        let mut drops = coordinator.subscribe_drops();

        assert!(coordinator.start_chromecast().await);
        sim.trigger_cast_session_lost();
        coordinator.process_events();
        assert_eq!(drops.recv().await.unwrap(), Protocol::Chromecast);

        for _ in 0..20 {
            if coordinator.activity().is_casting {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(coordinator.activity().is_casting);
        assert_eq!(sim.calls().session_requests, 2);
        assert_eq!(coordinator.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_waits_for_late_sdk() {
        let env = SimEnvironment {
            cast_sdk_loaded: false,
            cast_sdk_ready_after_polls: Some(4),
            ..SimEnvironment::desktop()
        };
        let sim = SimulatedPlatform::new(env);
        let coordinator = coordinator(&sim, manual_config());
        assert!(!coordinator.capabilities().chromecast);

        let wait = coordinator.initialize().await.unwrap();
        assert!(wait.await.unwrap());
        assert!(coordinator.capabilities().chromecast);
        assert_eq!(sim.calls().cast_initializations, 1);

        sim.trigger_receiver_availability(false);
        assert!(!coordinator.capabilities().chromecast);
    }

    #[tokio::test]
    async fn test_initialize_with_loaded_sdk() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.initialize().await.is_none());
        assert_eq!(sim.calls().cast_initializations, 1);
    }

    #[tokio::test]
    async fn test_background_event_loop() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());

        let handle = coordinator.spawn_event_loop().unwrap();
        assert!(coordinator.spawn_event_loop().is_none());

        assert!(coordinator.enter_fullscreen().await);
        for _ in 0..20 {
            if coordinator.activity().is_fullscreen {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(coordinator.activity().is_fullscreen);
        assert_eq!(coordinator.process_events(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_display_mode_toggle_with_event_loop() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());
        let handle = coordinator.spawn_event_loop().unwrap();

        // no yield between calls: the loop has not reduced the change yet
        assert!(coordinator.enter_fullscreen().await);
        assert!(coordinator.exit_fullscreen().await);
        assert_eq!(sim.calls().fullscreen_requests, 1);
        assert_eq!(sim.calls().fullscreen_exits, 1);

        assert!(coordinator.enter_picture_in_picture().await);
        assert!(coordinator.exit_picture_in_picture().await);
        assert!(!coordinator.exit_picture_in_picture().await);
        assert_eq!(sim.calls().picture_in_picture_exits, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_remote_playback_start_while_waiting_on_device() {
        let sim = SimulatedPlatform::with_behavior(
            SimEnvironment::desktop(),
            SimBehavior {
                remote_connects: false,
                ..SimBehavior::default()
            },
        );
        let coordinator = coordinator(&sim, manual_config());

        assert!(coordinator.start_remote_playback().await);
        assert!(!coordinator.activity().is_remote_playback_active);
        assert!(coordinator.start_remote_playback().await);

        let calls = sim.calls();
        assert_eq!(calls.remote_prompts, 1);
        assert_eq!(calls.state_listeners_added, 1);
        assert_eq!(calls.state_listeners_removed, 0);
        assert_eq!(sim.remote_listener_count(), 1);

        // the device gave up before connecting: release without a drop
        sim.trigger_remote_state(RemotePlaybackState::Disconnected);
        assert!(coordinator.sessions().is_empty());
        assert_eq!(sim.remote_listener_count(), 0);
        assert_eq!(coordinator.last_dropped(), None);
    }

    #[tokio::test]
    async fn test_capability_loss_keeps_active_session() {
        let sim = SimulatedPlatform::new(SimEnvironment::desktop());
        let coordinator = coordinator(&sim, manual_config());
        assert!(coordinator.initialize().await.is_none());

        assert!(coordinator.start_chromecast().await);
        sim.trigger_receiver_availability(false);
        sim.update_environment(|env| env.failing_probes.push("chromecast".to_string()));
        assert!(!coordinator.redetect().chromecast);

        assert!(coordinator.activity().is_casting);
        assert_eq!(coordinator.status(), CastingStatus::Connected);
        assert!(!coordinator.capabilities().chromecast);
        assert_eq!(sim.calls().session_stops, 0);
    }
}
