/// padel-booker — Logger
/// JSONL booking journal, NTFY alerts

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    /// Appends `event` as one line to `<log_dir>/<YYYY-MM-DD>.jsonl`.
    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Like [`EventLogger::log`], but only warns on failure.
    pub fn log_or_warn<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("Event log write failed: {}", e);
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct BookingStartedEvent {
    pub ts:             String,
    pub event:          &'static str,   // "BOOKING_STARTED"
    pub trigger:        String,         // "api" | "cli"
    pub booking_date:   String,
    pub start_time:     String,
    pub duration_hours: f64,
    pub device_mode:    String,
    pub dry_run:        bool,
    pub candidates:     usize,
}

impl BookingStartedEvent {
    pub const EVENT: &'static str = "BOOKING_STARTED";
}

#[derive(Serialize, Debug)]
pub struct BookingFinishedEvent {
    pub ts:          String,
    pub event:       &'static str,     // "BOOKING_FINISHED"
    pub success:     bool,
    pub message:     String,
    pub booked_date: Option<String>,
    pub players:     Vec<String>,
    pub elapsed_ms:  i64,
}

impl BookingFinishedEvent {
    pub const EVENT: &'static str = "BOOKING_FINISHED";
}

#[derive(Serialize, Debug)]
pub struct ServiceStatusEvent {
    pub ts:      String,
    pub event:   &'static str,         // "SERVICE_STATUS"
    pub status:  String,               // "listening" | "stopped"
    pub bind:    String,
}

impl ServiceStatusEvent {
    pub const EVENT: &'static str = "SERVICE_STATUS";
}

/// Push alert to ntfy.sh/`topic`.
pub async fn send_ntfy_alert(topic: &str, msg: &str, title: &str) {
    let client = reqwest::Client::new();
    match client
        .post(format!("https://ntfy.sh/{topic}"))
        .header("Title", title)
        .header("Priority", "high")
        .header("Tags", "tennis")
        .body(msg.to_string())
        .send()
        .await
    {
        Ok(_)  => tracing::info!("NTFY sent: {}", title),
        Err(e) => tracing::warn!("NTFY failed: {}", e),
    }
}
