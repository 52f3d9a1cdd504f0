//! Process-wide single-flight booking state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::job::BookingResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookingStatus {
    pub running:    bool,
    pub result:     Option<BookingResult>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Shared status holder. Clones share the same state.
#[derive(Clone, Default)]
pub struct BookingStatusTracker {
    inner: Arc<Mutex<BookingStatus>>,
}

impl BookingStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BookingStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> BookingStatus {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Claims the single job slot. `None` while another job holds it.
    /// Check and transition happen under one lock.
    pub fn try_start(&self) -> Option<JobLease> {
        let mut status = self.lock();
        if status.running {
            return None;
        }
        let now = Utc::now();
        *status = BookingStatus {
            running:    true,
            result:     None,
            started_at: Some(now),
        };
        info!("Booking job started at {}", now.to_rfc3339());
        Some(JobLease {
            tracker:    self.clone(),
            started_at: now,
            finished:   false,
        })
    }

    fn complete(&self, result: BookingResult) {
        let mut status = self.lock();
        status.running = false;
        status.result = Some(result);
    }
}

/// Held by the running job. Dropping it without [`JobLease::finish`]
/// (panic, early return) records a failure.
pub struct JobLease {
    tracker:    BookingStatusTracker,
    started_at: DateTime<Utc>,
    finished:   bool,
}

impl JobLease {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finish(mut self, result: BookingResult) {
        self.finished = true;
        self.tracker.complete(result);
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Booking job ended without a result");
            self.tracker
                .complete(BookingResult::failure("unexpected error: booking job ended without a result"));
        }
    }
}
