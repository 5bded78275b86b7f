//! Output session bookkeeping
//!
//! One entry per protocol, keyed by [`Protocol`]. The native objects live
//! only here; callers see the opaque [`SessionHandle`]. Every teardown path
//! (local stop, remote termination, switch, drop of the coordinator) goes
//! through [`NativeSession::detach`] followed by [`NativeSession::close`].

use crate::{
    platform::{
        CastSession, DisplayStream, ListenerId, MediaElement, PresentationConnection,
        RemotePlayback, WatchId,
    },
    types::{MediaSource, Protocol, RestoreSignal, SessionId, SessionState},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Caller-visible description of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: SessionId,
    pub protocol: Protocol,
    pub generation: u64,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

/// Why a session is being released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The app asked to stop
    LocalStop,
    /// The platform reported the session gone
    RemoteEnded,
}

/// Native resources held for a live session
pub(crate) enum NativeSession {
    Cast(Arc<dyn CastSession>),
    RemotePlayback {
        remote: Arc<dyn RemotePlayback>,
        listener: ListenerId,
        watch: Option<WatchId>,
    },
    ScreenShare(Box<dyn DisplayStream>),
    Presentation(Arc<dyn PresentationConnection>),
}

impl std::fmt::Debug for NativeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeSession::Cast(s) => write!(f, "Cast({})", s.session_id()),
            NativeSession::RemotePlayback { listener, watch, .. } => {
                write!(f, "RemotePlayback({:?}, {:?})", listener, watch)
            }
            NativeSession::ScreenShare(s) => write!(f, "ScreenShare({})", s.id()),
            NativeSession::Presentation(c) => write!(f, "Presentation({})", c.id()),
        }
    }
}

/// Video surface handoff after a capture ends
#[derive(Clone)]
pub(crate) struct Handoff {
    pub media: Option<Arc<dyn MediaElement>>,
    pub restore_tx: broadcast::Sender<RestoreSignal>,
    pub stream_url: Option<String>,
    pub fallback_delay: Duration,
}

impl Handoff {
    /// Clear the capture, signal the playback component, arm the fallback
    fn restore(&self, capture_id: &str) {
        let Some(media) = self.media.clone() else {
            return;
        };

        if media.source() == MediaSource::Capture(capture_id.to_string()) {
            media.set_source(MediaSource::Empty);
        }

        let Some(url) = self.stream_url.clone() else {
            debug!("No stream URL to restore after capture");
            return;
        };

        let listeners = self.restore_tx.send(RestoreSignal {
            stream_url: url.clone(),
        });
        debug!(listeners = listeners.unwrap_or(0), "Restore signal sent");

        let delay = self.fallback_delay;
        spawn_detached(async move {
            tokio::time::sleep(delay).await;
            if media.source().is_empty() {
                info!(url = %url, "No listener restored the stream, restoring directly");
                media.set_source(MediaSource::Url(url));
                if let Err(e) = media.play().await {
                    debug!(error = %e, "Playback after restore was rejected");
                }
            }
        });
    }
}

impl NativeSession {
    /// Synchronous part of the release: listeners and the video surface
    pub(crate) fn detach(&self, handoff: &Handoff) {
        match self {
            NativeSession::RemotePlayback {
                remote, listener, ..
            } => remote.remove_state_listener(*listener),
            NativeSession::ScreenShare(stream) => {
                stream.stop_tracks();
                handoff.restore(&stream.id());
            }
            NativeSession::Cast(_) | NativeSession::Presentation(_) => {}
        }
    }

    /// Native close calls; remote-ended sessions skip the ones already done
    pub(crate) async fn close(self, reason: ReleaseReason) -> Result<()> {
        match self {
            NativeSession::Cast(session) if reason == ReleaseReason::LocalStop => {
                session.stop().await
            }
            NativeSession::Presentation(connection) if reason == ReleaseReason::LocalStop => {
                connection.terminate().await
            }
            NativeSession::RemotePlayback {
                remote,
                watch: Some(watch),
                ..
            } => remote.cancel_watch_availability(watch).await,
            _ => Ok(()),
        }
    }
}

/// A session table entry
#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub handle: SessionHandle,
    pub native: Option<NativeSession>,
}

/// Owned-resource table, at most one entry per protocol
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    entries: BTreeMap<Protocol, SessionEntry>,
    next_generation: u64,
}

impl SessionTable {
    /// Reserve a pending entry, returning its generation
    pub fn reserve(&mut self, protocol: Protocol) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            protocol,
            SessionEntry {
                handle: SessionHandle {
                    id: SessionId::new(),
                    protocol,
                    generation,
                    state: SessionState::Pending,
                    started_at: Utc::now(),
                },
                native: None,
            },
        );
        debug!(%protocol, generation, "Session reserved");
        generation
    }

    pub fn is_current(&self, protocol: Protocol, generation: u64) -> bool {
        self.entries
            .get(&protocol)
            .is_some_and(|e| e.handle.generation == generation)
    }

    /// Store the native object on a still-current entry
    ///
    /// Hands the native object back when the entry was released meanwhile.
    pub fn attach(
        &mut self,
        protocol: Protocol,
        generation: u64,
        native: NativeSession,
    ) -> std::result::Result<(), NativeSession> {
        match self.entries.get_mut(&protocol) {
            Some(entry) if entry.handle.generation == generation => {
                entry.native = Some(native);
                Ok(())
            }
            _ => Err(native),
        }
    }

    /// Move a current entry to `state`
    pub fn set_state(&mut self, protocol: Protocol, generation: u64, state: SessionState) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&protocol)
            .filter(|e| e.handle.generation == generation)
            .ok_or(Error::StaleState { protocol })?;

        let current = entry.handle.state;
        if current == state {
            return Ok(());
        }
        if !current.can_transition_to(state) {
            warn!(%protocol, from = %current, to = %state, "Ignoring invalid session transition");
            return Ok(());
        }
        entry.handle.state = state;
        debug!(%protocol, generation, from = %current, to = %state, "Session state");
        Ok(())
    }

    pub fn get(&self, protocol: Protocol) -> Option<&SessionHandle> {
        self.entries.get(&protocol).map(|e| &e.handle)
    }

    pub fn is_active(&self, protocol: Protocol) -> bool {
        self.get(protocol).is_some_and(|h| h.state.is_active())
    }

    /// Native object attached, waiting on the device to connect
    pub fn is_opening(&self, protocol: Protocol) -> bool {
        self.entries
            .get(&protocol)
            .is_some_and(|e| e.handle.state == SessionState::Pending && e.native.is_some())
    }

    pub fn remove_if_current(&mut self, protocol: Protocol, generation: u64) -> Option<SessionEntry> {
        if self.is_current(protocol, generation) {
            self.entries.remove(&protocol)
        } else {
            None
        }
    }

    /// Remove every entry, in teardown order
    pub fn drain(&mut self) -> Vec<SessionEntry> {
        let mut drained = Vec::with_capacity(self.entries.len());
        for protocol in Protocol::ALL {
            if let Some(entry) = self.entries.remove(&protocol) {
                drained.push(entry);
            }
        }
        drained
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.entries.values().map(|e| e.handle.clone()).collect()
    }
}

/// Run a future on the ambient runtime, if there is one
pub(crate) fn spawn_detached<F>(future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("No async runtime available, skipping background task"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_bumps_generation() {
        let mut table = SessionTable::default();
        let first = table.reserve(Protocol::Chromecast);
        let second = table.reserve(Protocol::Chromecast);

        assert!(second > first);
        assert!(!table.is_current(Protocol::Chromecast, first));
        assert!(table.is_current(Protocol::Chromecast, second));
        assert_eq!(table.handles().len(), 1);
    }

    #[test]
    fn test_state_requires_current_generation() {
        let mut table = SessionTable::default();
        let generation = table.reserve(Protocol::Presentation);

        assert!(!table.is_active(Protocol::Presentation));
        table
            .set_state(Protocol::Presentation, generation, SessionState::Connected)
            .unwrap();
        assert!(table.is_active(Protocol::Presentation));

        let stale = table.set_state(Protocol::Presentation, generation + 1, SessionState::Ended);
        assert!(matches!(stale, Err(Error::StaleState { .. })));
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let mut table = SessionTable::default();
        let generation = table.reserve(Protocol::RemotePlayback);
        table
            .set_state(Protocol::RemotePlayback, generation, SessionState::Ended)
            .unwrap();
        table
            .set_state(Protocol::RemotePlayback, generation, SessionState::Connected)
            .unwrap();
        assert_eq!(
            table.get(Protocol::RemotePlayback).map(|h| h.state),
            Some(SessionState::Ended)
        );
    }

    #[test]
    fn test_drain_in_teardown_order() {
        let mut table = SessionTable::default();
        table.reserve(Protocol::Presentation);
        table.reserve(Protocol::ScreenShare);
        table.reserve(Protocol::Chromecast);

        let order: Vec<_> = table.drain().iter().map(|e| e.handle.protocol).collect();
        assert_eq!(
            order,
            vec![Protocol::Chromecast, Protocol::ScreenShare, Protocol::Presentation]
        );
        assert!(table.handles().is_empty());
    }
}
