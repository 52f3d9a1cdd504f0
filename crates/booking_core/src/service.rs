//! Runs booking jobs in the background, one at a time.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::browser::SessionLauncher;
use crate::error::BookingError;
use crate::job::{BookingJob, BookingResult};
use crate::status::{BookingStatus, BookingStatusTracker};

pub struct StartedJob {
    pub started_at: DateTime<Utc>,
    /// Resolves with the same result the tracker records.
    pub handle:     JoinHandle<BookingResult>,
}

#[derive(Clone)]
pub struct BookingService {
    tracker:  BookingStatusTracker,
    launcher: Arc<dyn SessionLauncher>,
}

impl BookingService {
    pub fn new(launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            tracker: BookingStatusTracker::new(),
            launcher,
        }
    }

    pub fn status(&self) -> BookingStatus {
        self.tracker.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.tracker.is_running()
    }

    /// Claims the job slot, then runs `job` on a blocking worker. Nothing is
    /// launched when a job is already running.
    pub fn start(&self, job: BookingJob) -> Result<StartedJob, BookingError> {
        let lease = self.tracker.try_start().ok_or(BookingError::AlreadyRunning)?;
        let started_at = lease.started_at();
        let launcher = Arc::clone(&self.launcher);

        let handle = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job.run(launcher.as_ref())))
                .unwrap_or_else(|payload| {
                    error!("Booking job panicked");
                    BookingError::Unexpected(panic_message(payload.as_ref())).into()
                });
            info!(success = result.is_success(), "Booking job finished: {}", result.message());
            lease.finish(result.clone());
            result
        });

        Ok(StartedJob { started_at, handle })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job panicked".to_string()
    }
}
