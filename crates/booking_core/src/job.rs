//! One booking attempt from login to result.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::browser::{wait_for_absence, wait_for_presence, BrowserSurface, Locator, OptionChoice, SessionLauncher};
use crate::error::{BookingError, BrowserError};
use crate::fallback::{FallbackSearch, FoundRun};
use crate::navigation::navigator_for;
use crate::rotation::{PlayerRotationEngine, RejectionRule, SiteForm};
use crate::settings::{hhmm, BookingPlan, Credentials, EngineSettings};

/// What to book. Never mutated after the job starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingTarget {
    pub date:           NaiveDate,
    pub start:          NaiveTime,
    pub duration_hours: f64,
}

impl From<&BookingPlan> for BookingTarget {
    fn from(plan: &BookingPlan) -> Self {
        Self {
            date:           plan.booking_date,
            start:          plan.start_time,
            duration_hours: plan.duration_hours,
        }
    }
}

/// Who plays: the organizer (seat 1, logged in) and candidates for the
/// other seats in preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    #[serde(rename = "booker_first_name")]
    pub organizer:  String,
    #[serde(rename = "player_candidates")]
    pub candidates: Vec<String>,
}

impl BookingRequest {
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.organizer.trim().is_empty() || self.candidates.is_empty() {
            return Err(BookingError::Configuration(
                "booker_first_name and player_candidates must be provided".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum BookingResult {
    #[serde(rename = "success")]
    Success {
        message:     String,
        players:     Vec<String>,
        court:       String,
        booked_date: NaiveDate,
        #[serde(with = "hhmm")]
        start:       NaiveTime,
        #[serde(with = "hhmm")]
        end:         NaiveTime,
        confirmed:   bool,
    },
    #[serde(rename = "error")]
    Failure { message: String },
}

impl BookingResult {
    pub fn failure(message: impl Into<String>) -> Self {
        BookingResult::Failure { message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BookingResult::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            BookingResult::Success { message, .. } | BookingResult::Failure { message } => message,
        }
    }
}

impl From<BookingError> for BookingResult {
    fn from(err: BookingError) -> Self {
        BookingResult::failure(err.to_string())
    }
}

pub struct BookingJob {
    pub plan:        BookingPlan,
    pub credentials: Credentials,
    pub request:     BookingRequest,
    pub settings:    EngineSettings,
}

impl BookingJob {
    /// Opens a session, books, and always closes the session again.
    pub fn run(&self, launcher: &dyn SessionLauncher) -> BookingResult {
        if let Err(e) = self.plan.validate().and_then(|_| self.request.validate()) {
            return e.into();
        }

        let mut browser = match launcher.launch(self.settings.device_mode) {
            Ok(b) => b,
            Err(e) => {
                error!("Could not open browser session: {}", e);
                return BookingError::from(e).into();
            }
        };

        let result = self.run_with(browser.as_mut());
        browser.close();

        match result {
            Ok(result) => result,
            Err(e) => {
                error!("❌ Booking failed: {}", e);
                e.into()
            }
        }
    }

    /// The pipeline on an already open session. Does not close it.
    pub fn run_with(&self, browser: &mut dyn BrowserSurface) -> Result<BookingResult, BookingError> {
        let target = BookingTarget::from(&self.plan);
        let site = &self.plan.site;
        let wait = self.settings.wait;
        let rule = RejectionRule::new(&site.rejection_pattern)?;

        self.login(browser)?;

        let navigator = navigator_for(self.settings.device_mode, site, wait);
        let search = FallbackSearch { navigator: navigator.as_ref(), site };
        let found = search
            .find(browser, target.date, target.start, target.duration_hours, self.settings.max_days_back)?
            .ok_or_else(|| self.slot_not_found(&target))?;
        let FoundRun { run, date } = found;
        info!(
            "🎾 Booking {} on {} from {} to {}",
            run.court(),
            date,
            run.first().start.format("%H:%M"),
            run.end().format("%H:%M")
        );

        browser.click(&Locator::nth(&site.free_slot, run.first().cell))?;
        let first_seat = site.seat_select_for(site.seats.first().copied().unwrap_or(2));
        wait_for_presence(browser, &wait, &first_seat)?;

        let end = run.end().format(hhmm::FORMAT).to_string();
        browser
            .select_option(&Locator::css(&site.end_time_select), OptionChoice::Value(&end))
            .map_err(|e| match e {
                BrowserError::ElementNotFound(_) => BookingError::EndTimeUnavailable(end.clone()),
                other => other.into(),
            })?;

        let engine = PlayerRotationEngine {
            rule:           &rule,
            organizer:      &self.request.organizer,
            max_attempts:   self.settings.max_attempts,
            enable_booking: self.settings.enable_booking,
        };
        let mut form = SiteForm::new(browser, site, wait);
        let rotation = engine.run(&mut form, &self.request.candidates)?;

        let verb = if rotation.confirmed { "Booking successful" } else { "Dry run successful" };
        Ok(BookingResult::Success {
            message:     format!("{verb} with players: {}", rotation.players.join(", ")),
            players:     rotation.players,
            court:       run.court().to_string(),
            booked_date: date,
            start:       run.first().start,
            end:         run.end(),
            confirmed:   rotation.confirmed,
        })
    }

    fn login(&self, browser: &mut dyn BrowserSurface) -> Result<(), BookingError> {
        let site = &self.plan.site;
        let wait = &self.settings.wait;
        info!("Logging in as {}", self.credentials.username);

        let attempt = |browser: &mut dyn BrowserSurface| -> Result<(), BrowserError> {
            browser.navigate(&self.plan.login_url)?;
            wait_for_presence(browser, wait, &site.login_username)?;
            browser.send_text(&Locator::css(&site.login_username), &self.credentials.username)?;
            browser.send_text(&Locator::css(&site.login_password), &self.credentials.password)?;
            browser.click(&Locator::css(&site.login_button))?;
            wait_for_absence(browser, wait, &site.login_form)
        };

        attempt(browser).map_err(|e| {
            warn!("Login failed: {}", e);
            BookingError::LoginFailed(e.to_string())
        })?;
        info!("Login successful");
        Ok(())
    }

    fn slot_not_found(&self, target: &BookingTarget) -> BookingError {
        let mut earliest = target.date;
        for _ in 0..self.settings.max_days_back {
            earliest = crate::fallback::previous_business_day(earliest);
        }
        BookingError::SlotNotFound {
            start:          target.start.format(hhmm::FORMAT).to_string(),
            duration_hours: target.duration_hours,
            earliest:       earliest.to_string(),
            latest:         target.date.to_string(),
        }
    }
}
