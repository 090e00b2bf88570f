//! # Voice Chat Relay - Main Application Entry Point
//!
//! Serves a browser client and a WebSocket endpoint. Every recording sent
//! over the socket runs through the voice pipeline:
//!
//! ffmpeg conversion → Whisper transcription → content filter →
//! chat completion → speech synthesis → one JSON event back to the sender.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **state**: Shared application state handed to handlers and actors
//! - **websocket**: One actor per browser connection
//! - **pipeline**: The per-message exchange and its failure policy
//! - **audio / transcription / filter / dialogue / synthesis**: The stages
//! - **conversation**: Per-connection transcripts
//! - **middleware**: Request logging
//! - **handlers**: The client page
//! - **tls**: Optional HTTPS, needed for microphone access off localhost

mod audio;
mod config;
mod conversation;
mod device;
mod dialogue;
mod error;
mod filter;
mod handlers;
mod middleware;
mod pipeline;
mod protocol;
mod state;
mod synthesis;
mod tls;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-chat-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Whisper model: {}, device preference: {}, chat model: {}",
        config.models.whisper_model, config.models.device, config.dialogue.model
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let tls_config = match config.tls_files()? {
        Some((cert, key)) => Some(tls::load_server_config(&cert, &key)?),
        None => None,
    };
    let app_state = AppState::from_config(config).await?;

    setup_signal_handlers();

    let scheme = if tls_config.is_some() { "https" } else { "http" };
    info!("Starting HTTP server on {}://{}", scheme, bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(handlers::index))
            .route("/ws", web::get().to(websocket::voice_websocket))
    });
    let server = match tls_config {
        Some(tls_config) => server.bind_rustls_0_23(&bind_addr, tls_config)?,
        None => server.bind(&bind_addr)?,
    }
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!(
        uptime_secs = app_state.get_uptime_seconds(),
        open_sessions = app_state.sessions().len(),
        "Server stopped gracefully"
    );
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_chat_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for SIGINT: {}", e);
                        return;
                    }
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
