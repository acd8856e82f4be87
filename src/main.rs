//! Airwave - Main entry point
//!
//! Command-line radio stream player: connects to a stream URL, runs the
//! decode pipeline, renders to the default audio device, and logs
//! session events until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use airwave::audio::{AudioSink, CpalSink};
use airwave::config::{ConfigOverrides, StreamConfig};
use airwave::decode::SymphoniaEngine;
use airwave::events::PlayerEvent;
use airwave::metrics::SessionMetrics;
use airwave::playback::PlayerSession;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for airwave
#[derive(Parser, Debug)]
#[command(name = "airwave")]
#[command(about = "Streaming radio player")]
#[command(version)]
struct Args {
    /// Stream URL to play (overrides the config file)
    #[arg(env = "AIRWAVE_URL")]
    url: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "AIRWAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Audio output device name (default device if omitted)
    #[arg(short, long, env = "AIRWAVE_DEVICE")]
    device: Option<String>,

    /// Disable automatic reconnection
    #[arg(long)]
    no_reconnect: bool,

    /// Maximum reconnect attempts before giving up
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// List audio output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airwave=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in CpalSink::list_devices().context("Failed to enumerate audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    // Config file first, then command-line overrides on top
    let base = match &args.config {
        Some(path) => StreamConfig::from_toml_file(path)
            .await
            .context("Failed to load configuration")?,
        None => {
            let url = args
                .url
                .clone()
                .context("A stream URL is required (argument or config file)")?;
            StreamConfig::new(url)
        }
    };
    let config = base.with_overrides(ConfigOverrides {
        url: args.url,
        auto_reconnect: args.no_reconnect.then_some(false),
        max_reconnect_attempts: args.max_reconnects,
    });

    info!("Starting airwave for {}", config.url);

    let session = PlayerSession::new(config, Arc::new(SymphoniaEngine::new()))
        .context("Failed to create session")?;
    let mut events = session.subscribe();
    let metrics = SessionMetrics::spawn(session.bus());

    // The sink idles behind the render gate until the session reaches
    // Playing, so starting it first cannot drain the pre-roll fill
    let mut sink = CpalSink::new(args.device);
    sink.start(session.queue(), session.render_gate())
        .context("Failed to start audio output")?;

    session.start().context("Failed to start session")?;

    // Log events until the session ends or the user interrupts
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::StateChanged { previous, current, .. }) => {
                    info!("State: {} -> {}", previous, current);
                    if current.is_terminal() {
                        break;
                    }
                }
                Ok(PlayerEvent::StallDetected { .. }) => warn!("Playback stalled"),
                Ok(PlayerEvent::StallRecovered { attempts, .. }) => {
                    info!("Stall recovered after {} underrun ticks", attempts);
                }
                Ok(PlayerEvent::SessionError { kind, detail, .. }) => {
                    warn!("{} error: {}", kind, detail);
                }
                Ok(PlayerEvent::SessionFailed { reason, .. }) => {
                    error!("Session failed: {}", reason);
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event stream lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    session.stop().await;
    sink.stop();

    let snap = metrics.snapshot();
    info!(
        "Session totals: {} buffers, {} stalls ({} recovered), {} errors",
        snap.buffers_delivered, snap.stalls_detected, snap.stalls_recovered, snap.session_errors
    );
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
