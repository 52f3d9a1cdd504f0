/// padel-booker — Booking Service
///
/// What it does:
///   1. Serves a small authenticated HTTP API (book / status / config)
///   2. Runs at most one booking job at a time in headless Chrome
///   3. Journals every job to ./logs/<date>.jsonl, optional NTFY push
///
/// Environment:
///   API_USERNAME / API_PASSWORD       basic auth for /api/*
///   BOOKER_USERNAME / BOOKER_PASSWORD club site login
///   ENABLE_BOOKING=true               actually confirm (default: dry run)
///   PADEL_BIND (0.0.0.0:8080), CONFIG_PATH, EVENT_LOG_DIR, NTFY_TOPIC
///
/// Run:
///   cargo run --bin padel-booker

mod api;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use api::{ApiAuth, AppState, HttpResponse, MAX_REQUEST_BYTES};
use booking_core::{BookingService, Credentials, EngineSettings, DEFAULT_CONFIG_PATH};
use chrome_surface::ChromeLauncher;
use dotenv::dotenv;
use logger::{now_iso, EventLogger, ServiceStatusEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

async fn handle_http_connection(mut stream: TcpStream, state: AppState) -> Result<()> {
    let mut raw = Vec::with_capacity(8192);
    let mut buf = vec![0u8; 8192];

    let response = loop {
        let n = stream.read(&mut buf).await.context("http read")?;
        if n == 0 {
            if raw.is_empty() {
                return Ok(());
            }
            break HttpResponse::detail(400, "incomplete request");
        }
        raw.extend_from_slice(&buf[..n]);

        if let Some(req) = api::parse_request(&raw) {
            debug!("{} {}", req.method, req.path);
            break api::handle(&state, &req);
        }
        if raw.len() > MAX_REQUEST_BYTES {
            break HttpResponse::detail(413, "request too large");
        }
    };

    stream.write_all(&response.to_bytes()).await.context("http write")?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn start_http_server(state: AppState, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await.context("http bind")?;
    info!("🎾 padel-booker listening on http://{} (GET /health, /api/status, /api/config; POST /api/book, /api/config)", bind);

    loop {
        let (stream, peer) = listener.accept().await.context("http accept")?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_http_connection(stream, state).await {
                debug!("http handler err {}: {}", peer, e);
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let settings = EngineSettings::from_env().context("Invalid engine settings")?;
    info!("=== padel-booker ===");
    info!(
        "Mode: {} | device: {} | max attempts: {} | max days back: {}",
        if settings.enable_booking { "LIVE BOOKING" } else { "DRY RUN" },
        settings.device_mode,
        settings.max_attempts,
        settings.max_days_back
    );

    let api_auth = ApiAuth::from_env();
    if api_auth.is_none() {
        warn!("API_USERNAME / API_PASSWORD not set, /api/* will answer 500");
    }
    let booker = match Credentials::from_env() {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("{}; POST /api/book will answer 500", e);
            None
        }
    };

    let bind: SocketAddr = env::var("PADEL_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("PADEL_BIND must be host:port")?;
    let config_path = env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let log_dir = env::var("EVENT_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let ntfy_topic = env::var("NTFY_TOPIC").ok().filter(|t| !t.trim().is_empty());

    info!("Config: {} | Logs: ./{}/", config_path.display(), log_dir);

    let launcher = ChromeLauncher::from_env();
    let logger = Arc::new(EventLogger::new(&log_dir));
    let state = AppState {
        service: BookingService::new(Arc::new(launcher)),
        settings,
        config_path,
        api_auth,
        booker,
        logger: logger.clone(),
        ntfy_topic,
    };

    let status_event = |status: &str| ServiceStatusEvent {
        ts:     now_iso(),
        event:  ServiceStatusEvent::EVENT,
        status: status.to_string(),
        bind:   bind.to_string(),
    };
    logger.log_or_warn(&status_event("listening"));

    tokio::select! {
        res = start_http_server(state, bind) => res?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
    }

    logger.log_or_warn(&status_event("stopped"));
    Ok(())
}
