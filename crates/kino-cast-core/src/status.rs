//! User-facing action status
//!
//! Tracks the pending action and a timed outcome banner for the display
//! layer. Only one pending indicator is shown: the most recently started
//! action's.

use crate::config::CastConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Banner severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerKind {
    Success,
    Error,
}

/// Outcome message shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub kind: BannerKind,
    pub action: String,
    pub message: String,
}

/// What the display layer should render
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Action showing a pending indicator
    pub loading: Option<String>,
    pub banner: Option<Banner>,
}

struct BoardState {
    loading: Option<String>,
    banner: Option<(Banner, Instant, u64)>,
    banner_seq: u64,
}

impl BoardState {
    fn view(&self, now: Instant) -> StatusView {
        StatusView {
            loading: self.loading.clone(),
            banner: self
                .banner
                .as_ref()
                .filter(|(_, expires, _)| *expires > now)
                .map(|(banner, _, _)| banner.clone()),
        }
    }
}

struct Shared {
    state: Mutex<BoardState>,
    tx: watch::Sender<StatusView>,
}

impl Shared {
    fn publish(&self) {
        let view = self.state.lock().view(Instant::now());
        self.tx.send_replace(view);
    }
}

/// Status/notification surface
#[derive(Clone)]
pub struct StatusBoard {
    shared: Arc<Shared>,
    success_ttl: Duration,
    error_ttl: Duration,
}

impl StatusBoard {
    pub fn new(success_ttl: Duration, error_ttl: Duration) -> Self {
        let (tx, _) = watch::channel(StatusView::default());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BoardState {
                    loading: None,
                    banner: None,
                    banner_seq: 0,
                }),
                tx,
            }),
            success_ttl,
            error_ttl,
        }
    }

    pub fn from_config(config: &CastConfig) -> Self {
        Self::new(config.success_banner(), config.error_banner())
    }

    /// Current view, with expired banners dropped
    pub fn view(&self) -> StatusView {
        self.shared.state.lock().view(Instant::now())
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusView> {
        self.shared.tx.subscribe()
    }

    /// Mark `action` as pending and clear any banner
    pub fn begin(&self, action: &str) {
        {
            let mut state = self.shared.state.lock();
            state.loading = Some(action.to_string());
            state.banner = None;
        }
        debug!(action, "Action started");
        self.shared.publish();
    }

    /// Record the outcome of `action` and schedule the banner's removal
    pub fn settle(&self, action: &str, success: bool) {
        let (kind, message, ttl) = if success {
            (
                BannerKind::Success,
                format!("{} started successfully", action),
                self.success_ttl,
            )
        } else {
            (
                BannerKind::Error,
                format!(
                    "Could not start {}. Check that your device is connected.",
                    action
                ),
                self.error_ttl,
            )
        };

        let seq = {
            let mut state = self.shared.state.lock();
            if state.loading.as_deref() == Some(action) {
                state.loading = None;
            }
            state.banner_seq += 1;
            let seq = state.banner_seq;
            let banner = Banner {
                kind,
                action: action.to_string(),
                message,
            };
            state.banner = Some((banner, Instant::now() + ttl, seq));
            seq
        };
        debug!(action, success, "Action settled");
        self.shared.publish();

        let shared = self.shared.clone();
        crate::session::spawn_detached(async move {
            tokio::time::sleep(ttl).await;
            let cleared = {
                let mut state = shared.state.lock();
                if state.banner.as_ref().is_some_and(|(_, _, s)| *s == seq) {
                    state.banner = None;
                    true
                } else {
                    false
                }
            };
            if cleared {
                shared.publish();
            }
        });
    }

    /// Run `action` with loading and outcome tracking
    pub async fn track<F>(&self, action: &str, future: F) -> bool
    where
        F: Future<Output = bool>,
    {
        self.begin(action);
        let success = future.await;
        self.settle(action, success);
        success
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::from_config(&CastConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_success_banner_expires_after_ttl() {
        let board = StatusBoard::default();
        assert!(board.track("chromecast", async { true }).await);

        let view = board.view();
        assert_eq!(view.loading, None);
        let banner = view.banner.unwrap();
        assert_eq!(banner.kind, BannerKind::Success);
        assert_eq!(banner.action, "chromecast");

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(board.view().banner.is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(board.view().banner.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_banner_lasts_longer() {
        let board = StatusBoard::default();
        assert!(!board.track("presentation", async { false }).await);

        tokio::time::sleep(Duration::from_secs(4)).await;
        let banner = board.view().banner.unwrap();
        assert_eq!(banner.kind, BannerKind::Error);
        assert!(banner.message.contains("presentation"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(board.view().banner.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_pending_indicator() {
        let board = StatusBoard::default();
        board.begin("chromecast");
        board.begin("screen_share");
        assert_eq!(board.view().loading.as_deref(), Some("screen_share"));

        // an older action settling does not clear the newer indicator
        board.settle("chromecast", true);
        assert_eq!(board.view().loading.as_deref(), Some("screen_share"));

        board.settle("screen_share", false);
        assert_eq!(board.view().loading, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_banner_survives_older_timer() {
        let board = StatusBoard::default();
        board.settle("chromecast", true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        board.settle("airplay", false);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let banner = board.view().banner.unwrap();
        assert_eq!(banner.action, "airplay");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_clear() {
        let board = StatusBoard::default();
        let mut rx = board.subscribe();
        board.settle("fullscreen", true);
        assert!(rx.borrow_and_update().banner.is_some());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().banner.is_none());
    }
}
