//! Kino Cast Core - Multi-protocol casting session manager
//!
//! This crate routes a live stream to external displays:
//! - Capability detection for every output protocol
//! - Chromecast, AirPlay, Remote Playback and Presentation sessions
//! - Screen sharing with hand-back of the video surface
//! - Fullscreen and Picture-in-Picture display modes
//! - Aggregate casting status and bounded reconnection
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Kino Cast Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  Capability  │  │   Session    │  │  Reconnect   │           │
//! │  │   Detector   │  │    Table     │  │   Policy     │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Casting   │                              │
//! │                    │ Coordinator │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │    Status    │  │  Platform   │  │   Platform   │            │
//! │  │    Board     │  │   Events    │  │    Seams     │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use kino_cast_core::{CastConfig, CastingCoordinator, SimEnvironment, SimulatedPlatform};
//!
//! # async fn run() {
//! let sim = SimulatedPlatform::new(SimEnvironment::desktop());
//! let coordinator = CastingCoordinator::new(sim.platform(), CastConfig::default());
//! coordinator.set_stream_url("https://cdn.example.com/live/master.m3u8");
//!
//! if coordinator.capabilities().chromecast && coordinator.start_chromecast().await {
//!     println!("casting: {}", coordinator.status());
//! }
//! coordinator.stop_all().await;
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod events;
pub mod media;
pub mod platform;
pub mod reconnect;
pub mod session;
pub mod sim;
pub mod status;
pub mod types;

pub use config::CastConfig;
pub use coordinator::CastingCoordinator;
pub use detector::{CapabilityDetector, UserAgent};
pub use error::{Error, Result};
pub use events::{EventOrigin, EventSink, PlatformEvent};
pub use media::{detect_content_type, LoadRequest, StreamContentType};
pub use platform::{
    CastSdk, CastSession, DisplayStream, DocumentSurface, Environment, MediaDevices,
    MediaElement, Platform, PresentationApi, PresentationConnection, PresentationRequest,
    RemotePlayback,
};
pub use reconnect::{ReconnectPolicy, FALLBACK_CHAIN};
pub use session::{ReleaseReason, SessionHandle};
pub use sim::{SimBehavior, SimCalls, SimEnvironment, SimulatedPlatform};
pub use status::{Banner, BannerKind, StatusBoard, StatusView};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the casting library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Cast Core initialized");
}
