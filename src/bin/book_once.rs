//! One-shot booking from the command line (cron / manual runs).
//!
//! Reads the booking plan from CONFIG_PATH (default data/config.json),
//! site credentials from BOOKER_USERNAME / BOOKER_PASSWORD, runs one job
//! and prints the result JSON. Exit code 0 on success, 1 otherwise.
//!
//! Run:
//!   cargo run --bin book-once -- Erik Anna Bram Cas Daan

use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use booking_core::{
    BookingError, BookingJob, BookingPlan, BookingRequest, BookingResult, BookingService, Credentials, EngineSettings,
    DEFAULT_CONFIG_PATH,
};
use chrome_surface::ChromeLauncher;
use dotenv::dotenv;
use logger::{now_iso, BookingFinishedEvent, BookingStartedEvent, EventLogger};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn request_from_args(args: &[String]) -> Result<BookingRequest> {
    let Some((organizer, candidates)) = args.split_first() else {
        bail!("usage: book-once <organizer-first-name> <candidate>...");
    };
    let request = BookingRequest {
        organizer:  organizer.clone(),
        candidates: candidates.to_vec(),
    };
    request.validate().context("Invalid booking request")?;
    Ok(request)
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

    // Single instance lock
    let lock_file_path = env::temp_dir().join("padel_booker_book_once.lock");
    let lock_file = File::create(&lock_file_path)
        .with_context(|| format!("Failed to create lock file at {}", lock_file_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Another book-once run is already in progress! Exiting.");
            std::process::exit(1);
        }
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let request = request_from_args(&args)?;

    let config_path = env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let plan = BookingPlan::load(&config_path)?;
    plan.validate()?;
    let settings = EngineSettings::from_env().context("Invalid engine settings")?;
    let credentials = Credentials::from_env()?;

    let logger = EventLogger::new(env::var("EVENT_LOG_DIR").unwrap_or_else(|_| "logs".to_string()));
    logger.log_or_warn(&BookingStartedEvent {
        ts:             now_iso(),
        event:          BookingStartedEvent::EVENT,
        trigger:        "cli".into(),
        booking_date:   plan.booking_date.to_string(),
        start_time:     plan.start_time.format("%H:%M").to_string(),
        duration_hours: plan.duration_hours,
        device_mode:    settings.device_mode.to_string(),
        dry_run:        !settings.enable_booking,
        candidates:     request.candidates.len(),
    });
    info!(
        "🎾 Booking {} {} for {}h ({})",
        plan.booking_date,
        plan.start_time.format("%H:%M"),
        plan.duration_hours,
        if settings.enable_booking { "live" } else { "dry run" }
    );

    let service = BookingService::new(Arc::new(ChromeLauncher::from_env()));
    let started = service.start(BookingJob { plan, credentials, request, settings })?;
    let result = started
        .handle
        .await
        .unwrap_or_else(|e| BookingError::Unexpected(e.to_string()).into());

    let (players, booked_date) = match &result {
        BookingResult::Success { players, booked_date, .. } => (players.clone(), Some(booked_date.to_string())),
        BookingResult::Failure { .. } => (Vec::new(), None),
    };
    logger.log_or_warn(&BookingFinishedEvent {
        ts: now_iso(),
        event: BookingFinishedEvent::EVENT,
        success: result.is_success(),
        message: result.message().to_string(),
        booked_date,
        players,
        elapsed_ms: (chrono::Utc::now() - started.started_at).num_milliseconds(),
    });

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
