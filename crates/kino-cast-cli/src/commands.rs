//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context;
use console::style;
use kino_cast_core::{
    detect_content_type, ActivityState, CapabilityDetector, CapabilitySnapshot, CastConfig,
    CastingCoordinator, CastingStatus, LoadRequest, Protocol, RemotePlaybackState, SimBehavior,
    SimCalls, SimEnvironment, SimulatedPlatform, StatusBoard, StreamContentType,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// How long to wait for an automatic reconnection
const RECONNECT_WAIT: Duration = Duration::from_secs(2);

/// Resolve an environment preset name or JSON file
pub fn load_environment(name: &str) -> anyhow::Result<SimEnvironment> {
    match name {
        "desktop" => Ok(SimEnvironment::desktop()),
        "everything" => Ok(SimEnvironment::everything()),
        "bare" => Ok(SimEnvironment::bare()),
        "default" => Ok(SimEnvironment::default()),
        path => read_json(Path::new(path)).context("loading environment"),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Detect capabilities
pub fn detect(env: &str, format: &str) -> anyhow::Result<()> {
    let sim = SimulatedPlatform::new(load_environment(env)?);
    let snapshot = CapabilityDetector::new(sim.platform()).detect();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_json(&snapshot)),
        OutputFormat::Table => println!("{}", output::capability_table(&snapshot)),
        OutputFormat::Text => {
            println!("Capabilities ({}):", env);
            println!("{}", output::capability_lines(&snapshot));
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ContentTypeReport<'a> {
    url: &'a str,
    content_type: StreamContentType,
}

/// Show the content type chosen for a stream URL
pub fn content_type(url: &str, format: &str) -> anyhow::Result<()> {
    let content_type = detect_content_type(url);

    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let report = ContentTypeReport { url, content_type };
            println!("{}", output::format_json(&report));
        }
        _ => println!("{}", content_type),
    }

    Ok(())
}

/// Arguments of the `simulate` command
pub struct SimulateArgs {
    pub url: String,
    pub protocol: Protocol,
    pub env: String,
    pub behavior: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub drop: bool,
}

/// Outcome of a simulated session
#[derive(Serialize)]
struct SimulationReport {
    protocol: Protocol,
    capabilities: CapabilitySnapshot,
    started: bool,
    message: Option<String>,
    activity: ActivityState,
    status: CastingStatus,
    load_request: Option<LoadRequest>,
    dropped: Option<Protocol>,
    reconnected: Option<bool>,
    stopped: bool,
    final_status: CastingStatus,
    native_calls: SimCalls,
}

/// Run one protocol through start, optional drop, and stop
pub async fn simulate(args: SimulateArgs, format: &str) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => CastConfig::from_file(path)?,
        None => CastConfig::default(),
    };
    let behavior: SimBehavior = match &args.behavior {
        Some(path) => read_json(path).context("loading behavior")?,
        None => SimBehavior::default(),
    };
    let sim = SimulatedPlatform::with_behavior(load_environment(&args.env)?, behavior);

    let coordinator = CastingCoordinator::new(sim.platform(), config.clone());
    coordinator.set_stream_url(&args.url);
    if let Some(wait) = coordinator.initialize().await {
        let ready = wait.await?;
        info!(ready, "Cast SDK wait finished");
    }

    let board = StatusBoard::from_config(&config);
    let started = board
        .track(args.protocol.as_str(), coordinator.start(args.protocol))
        .await;

    let mut report = SimulationReport {
        protocol: args.protocol,
        capabilities: coordinator.capabilities(),
        started,
        message: board.view().banner.map(|b| b.message),
        activity: coordinator.activity(),
        status: coordinator.status(),
        load_request: sim.last_load_request(),
        dropped: None,
        reconnected: None,
        stopped: false,
        final_status: CastingStatus::Disconnected,
        native_calls: SimCalls::default(),
    };

    if args.drop && started {
        let mut status = coordinator.subscribe_status();
        trigger_remote_drop(&sim, args.protocol);
        coordinator.process_events();
        report.dropped = coordinator.last_dropped();

        if report.dropped.is_some() {
            let reconnected = if config.auto_reconnect {
                let connected = status.wait_for(|s| *s == CastingStatus::Connected);
                matches!(tokio::time::timeout(RECONNECT_WAIT, connected).await, Ok(Ok(_)))
            } else {
                coordinator.reconnect().await
            };
            report.reconnected = Some(reconnected);
        }
    }

    report.stopped = coordinator.stop_all().await;
    report.final_status = coordinator.status();
    report.native_calls = sim.calls();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_json(&report)),
        _ => print_report(&report),
    }

    Ok(())
}

/// Play the remote side ending the session
fn trigger_remote_drop(sim: &SimulatedPlatform, protocol: Protocol) {
    match protocol {
        Protocol::Chromecast => sim.trigger_cast_session_lost(),
        Protocol::RemotePlayback => sim.trigger_remote_state(RemotePlaybackState::Disconnected),
        Protocol::ScreenShare => sim.trigger_user_stopped_sharing(),
        Protocol::Presentation => sim.trigger_presentation_terminated(),
        Protocol::Fullscreen => sim.trigger_fullscreen_exit(),
        other => warn!(protocol = %other, "No remote drop to simulate"),
    }
}

fn outcome(ok: bool) -> console::StyledObject<&'static str> {
    if ok {
        style("ok").green()
    } else {
        style("failed").red()
    }
}

fn print_report(report: &SimulationReport) {
    println!("Simulating {}:", style(report.protocol).bold());
    println!("  Start: {}", outcome(report.started));
    if let Some(message) = &report.message {
        println!("  {}", message);
    }
    println!("  Status: {}", report.status);

    if let Some(request) = &report.load_request {
        println!(
            "  Loaded: {} ({})",
            request.media.content_id, request.media.content_type
        );
    }

    let active: Vec<&str> = [
        ("casting", report.activity.is_casting),
        ("screen sharing", report.activity.is_screen_sharing),
        ("presentation", report.activity.is_presentation_active),
        ("remote playback", report.activity.is_remote_playback_active),
        ("fullscreen", report.activity.is_fullscreen),
        ("picture-in-picture", report.activity.is_picture_in_picture),
    ]
    .into_iter()
    .filter(|(_, on)| *on)
    .map(|(name, _)| name)
    .collect();
    if !active.is_empty() {
        println!("  Active: {}", active.join(", "));
    }

    if let Some(protocol) = report.dropped {
        println!("  Dropped: {}", protocol);
    }
    if let Some(reconnected) = report.reconnected {
        println!("  Reconnect: {}", outcome(reconnected));
    }

    println!("  Stop all: {}", outcome(report.stopped));
    println!("  Final status: {}", report.final_status);
    println!("  Native calls: {}", report.native_calls.native_actions());
}
