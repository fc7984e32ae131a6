//! MeetMe Conference Bridge
//!
//! Conference bridge daemon. Call legs are handed to the [`Bridge`] by the
//! telephony front end; this binary hosts the engine, its health and metrics
//! endpoints, and an operator console on stdin.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8082)
//!
//! # Console
//!
//! Each stdin line is an admin command (`list`, `lock 600`, `kick 600 all`,
//! ...) or a management action written as
//! `action MeetmeMute Meetme=600 Usernum=2`.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Load the rooms file
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the bridge over the mixing engine
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start the event log and the operator console
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use meetme_bridge::actors::Bridge;
use meetme_bridge::admin::{self, manager, ManagerAction};
use meetme_bridge::config::{Config, ConfigError, RoomsFile};
use meetme_bridge::control::ControlPlane;
use meetme_bridge::events::EventBus;
use meetme_bridge::mixer::NullMixer;
use meetme_bridge::observability::{health_router, init_metrics_recorder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes first: it decides the log format
    let config = Config::from_env().context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meetme_bridge=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting MeetMe bridge");
    info!(
        rooms_file = %config.rooms_file.display(),
        health_bind_address = %config.health_bind_address,
        poll_interval_ms = config.poll_interval.as_millis(),
        room_id_space = config.room_id_space,
        pin_attempts = config.pin_attempts,
        "Configuration loaded successfully"
    );

    // A missing rooms file only means there are no static rooms
    let rooms = match RoomsFile::load(&config.rooms_file) {
        Ok(rooms) => rooms,
        Err(ConfigError::Io { path, source }) => {
            warn!(%path, error = %source, "Rooms file not readable, starting without static rooms");
            RoomsFile::default()
        }
        Err(e) => return Err(e).context("Failed to load rooms file"),
    };
    info!(static_rooms = rooms.rooms().len(), "Rooms file loaded");

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(anyhow::Error::msg)?;
    info!("Prometheus metrics recorder initialized");

    let bridge = Arc::new(Bridge::from_config(&config, rooms, Arc::new(NullMixer::new())));
    let shutdown_token = bridge.child_token();

    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address: {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&bridge)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    tokio::spawn(run_event_log(bridge.events().clone(), shutdown_token.child_token()));
    tokio::spawn(run_console(bridge.control().clone(), shutdown_token.child_token()));

    info!("MeetMe bridge running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    // Readiness drops as soon as the bridge stops accepting calls
    info!("Shutdown signal received, initiating graceful shutdown...");
    let aborted = bridge.shutdown(config.shutdown_timeout).await;
    if aborted > 0 {
        warn!(aborted, "Calls aborted at shutdown");
    }

    info!("MeetMe bridge shutdown complete");
    Ok(())
}

/// Write every bridge event to the log as one JSON object.
async fn run_event_log(events: EventBus, cancel_token: CancellationToken) {
    let mut receiver = events.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "bridge.events", event = event.name(), %json, "Bridge event"),
                    Err(e) => warn!(target: "bridge.events", error = %e, "Event not serializable"),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(target: "bridge.events", missed, "Event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(target: "bridge.events", "Event log stopped");
}

/// Operator console on stdin.
async fn run_console(control: ControlPlane, cancel_token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => print!("{}", console_line(&control, line.trim())),
            Ok(None) => {
                debug!("Console input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Console read failed");
                break;
            }
        }
    }
}

fn console_line(control: &ControlPlane, line: &str) -> String {
    let Some(rest) = line.strip_prefix("action ") else {
        return admin::run_line(control, line);
    };
    let mut words = rest.split_whitespace();
    let Some(action) = words.next().and_then(ManagerAction::from_name) else {
        return "Response: Error\r\nMessage: Invalid/unknown command\r\n\r\n".to_string();
    };
    let headers: Vec<(String, String)> = words
        .filter_map(|word| word.split_once('='))
        .map(|(key, value)| (key.to_string(), value.replace('_', " ")))
        .collect();
    manager::handle(control, action, &headers).render()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
