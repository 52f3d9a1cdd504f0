//! Participant selection with recovery from per-player rejections.
//!
//! The site refuses a booking when one of the chosen players is not allowed
//! to play any more this period, naming that player in a dialog or popup.
//! [`PlayerRotationEngine`] blocks the named player and retries with the
//! remaining pool, bounded by the attempt limit.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::{error, info, warn};

use crate::browser::{BrowserSurface, Locator, OptionChoice, WaitPolicy};
use crate::error::BookingError;
use crate::settings::SiteProfile;

/// Seats 2, 3 and 4 must be filled; seat 1 is the organizer.
pub const PLAYERS_NEEDED: usize = 3;

// ── Rejection parsing ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RejectionRule {
    pattern: Regex,
}

impl RejectionRule {
    /// `pattern` must have one capture group holding the player name.
    pub fn new(pattern: &str) -> Result<Self, BookingError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| BookingError::Configuration(format!("invalid rejection pattern: {e}")))?;
        if pattern.captures_len() < 2 {
            return Err(BookingError::Configuration(
                "rejection pattern needs a capture group for the player name".into(),
            ));
        }
        Ok(Self { pattern })
    }

    pub fn blocked_player(&self, text: &str) -> Option<String> {
        self.pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Where a rejection was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionSignal {
    Dialog(String),
    Popup(String),
}

impl RejectionSignal {
    pub fn text(&self) -> &str {
        match self {
            RejectionSignal::Dialog(t) | RejectionSignal::Popup(t) => t,
        }
    }
}

// ── Form seam ────────────────────────────────────────────────────────────────

/// The booking form as the rotation loop sees it.
pub trait ParticipantForm {
    /// Names offered for `seat`.
    fn available_options(&mut self, seat: u8) -> Result<Vec<String>, BookingError>;
    fn choose(&mut self, seat: u8, name: &str) -> Result<(), BookingError>;
    fn submit(&mut self) -> Result<(), BookingError>;
    /// Rejection raised by the last submit, dismissing it.
    fn rejection(&mut self) -> Result<Option<RejectionSignal>, BookingError>;
    fn confirm(&mut self) -> Result<(), BookingError>;
    fn seats(&self) -> Vec<u8>;
}

/// [`ParticipantForm`] over the live booking page.
pub struct SiteForm<'a> {
    browser: &'a mut dyn BrowserSurface,
    site:    &'a SiteProfile,
    wait:    WaitPolicy,
}

impl<'a> SiteForm<'a> {
    pub fn new(browser: &'a mut dyn BrowserSurface, site: &'a SiteProfile, wait: WaitPolicy) -> Self {
        Self { browser, site, wait }
    }

    fn dismiss_popup(&mut self) -> Result<(), BookingError> {
        let buttons = self.browser.count(&self.site.popup_button)?;
        for nth in 0..buttons {
            let button = Locator::nth(&self.site.popup_button, nth);
            if self.browser.is_visible(&button)? {
                self.browser.click(&button)?;
                return Ok(());
            }
        }
        warn!("Popup has no visible button to dismiss it");
        Ok(())
    }
}

impl ParticipantForm for SiteForm<'_> {
    fn available_options(&mut self, seat: u8) -> Result<Vec<String>, BookingError> {
        let select = Locator::css(self.site.seat_select_for(seat));
        Ok(self
            .browser
            .options(&select)?
            .into_iter()
            .map(|o| o.text.trim().to_string())
            .collect())
    }

    fn choose(&mut self, seat: u8, name: &str) -> Result<(), BookingError> {
        let select = Locator::css(self.site.seat_select_for(seat));
        self.browser.select_option(&select, OptionChoice::VisibleText(name))?;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BookingError> {
        self.browser.click(&Locator::css(&self.site.submit_button))?;
        self.wait.pause();
        Ok(())
    }

    fn rejection(&mut self) -> Result<Option<RejectionSignal>, BookingError> {
        if let Some(text) = self.browser.take_dialog()? {
            return Ok(Some(RejectionSignal::Dialog(text)));
        }

        let popup = Locator::css(&self.site.popup);
        if self.browser.count(&self.site.popup)? == 0 || !self.browser.is_visible(&popup)? {
            return Ok(None);
        }
        let text = self.browser.read_text(&popup)?;
        self.dismiss_popup()?;
        Ok(Some(RejectionSignal::Popup(text)))
    }

    fn confirm(&mut self) -> Result<(), BookingError> {
        self.browser.click(&Locator::css(&self.site.confirm_button))?;
        self.wait.pause();
        Ok(())
    }

    fn seats(&self) -> Vec<u8> {
        self.site.seats.clone()
    }
}

// ── Rotation loop ────────────────────────────────────────────────────────────

/// Mutable part of one rotation run. `blocked` only grows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationState {
    pub blocked:  BTreeSet<String>,
    pub attempts: usize,
}

impl RotationState {
    /// Original pool minus everything blocked so far, order kept.
    pub fn remaining<'p>(&self, pool: &'p [String]) -> Vec<&'p String> {
        pool.iter().filter(|p| !self.blocked.contains(*p)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub players:   Vec<String>,
    pub confirmed: bool,
    pub state:     RotationState,
}

pub struct PlayerRotationEngine<'a> {
    pub rule:           &'a RejectionRule,
    pub organizer:      &'a str,
    pub max_attempts:   usize,
    pub enable_booking: bool,
}

impl PlayerRotationEngine<'_> {
    pub fn run(&self, form: &mut dyn ParticipantForm, pool: &[String]) -> Result<Rotation, BookingError> {
        let mut state = RotationState::default();

        loop {
            let remaining = state.remaining(pool);
            if remaining.len() < PLAYERS_NEEDED {
                error!("Not enough non-blocked players left (blocked: {:?})", state.blocked);
                return Err(BookingError::PlayerSelectionExhausted(format!(
                    "not enough players available after removing blocked players: {}",
                    join(&state.blocked)
                )));
            }
            if state.attempts >= self.max_attempts {
                error!("Maximum booking attempts reached ({})", self.max_attempts);
                return Err(BookingError::PlayerSelectionExhausted(format!(
                    "maximum booking attempts reached ({})",
                    self.max_attempts
                )));
            }

            let selected = self.fill_seats(form, &remaining, &state)?;
            if selected.len() < PLAYERS_NEEDED {
                return Err(BookingError::PlayerSelectionExhausted(format!(
                    "could only select {} of {} players",
                    selected.len(),
                    PLAYERS_NEEDED
                )));
            }

            form.submit()?;
            state.attempts += 1;

            let Some(signal) = form.rejection()? else {
                if self.enable_booking {
                    info!("✅ BOOKING ENABLED: confirming booking");
                    form.confirm()?;
                } else {
                    info!("BOOKING DISABLED: skipping final confirmation (dry run)");
                }
                info!("Players selected for booking: {:?}", selected);
                return Ok(Rotation {
                    players: selected,
                    confirmed: self.enable_booking,
                    state,
                });
            };

            warn!(attempt = state.attempts, "Booking rejected: {}", signal.text());
            match self.rule.blocked_player(signal.text()) {
                Some(name) if name == self.organizer => {
                    error!("Organizer {} is blocked, cancelling booking", name);
                    return Err(BookingError::OrganizerBlocked(name));
                }
                Some(name) => {
                    info!("Blocked player detected: {}", name);
                    state.blocked.insert(name);
                }
                None => {
                    error!("Unknown booking error, aborting");
                    return Err(BookingError::UnrecognizedRejection(signal.text().to_string()));
                }
            }
        }
    }

    /// Seats filled in order, each with the first remaining name the seat
    /// offers that is not already seated.
    fn fill_seats(
        &self,
        form: &mut dyn ParticipantForm,
        remaining: &[&String],
        state: &RotationState,
    ) -> Result<Vec<String>, BookingError> {
        let mut selected: Vec<String> = Vec::with_capacity(PLAYERS_NEEDED);

        for seat in form.seats() {
            let offered = form.available_options(seat)?;
            let pick = remaining.iter().find(|name| {
                !state.blocked.contains(name.as_str())
                    && !selected.iter().any(|s| s == name.as_str())
                    && offered.iter().any(|o| o == name.as_str())
            });
            match pick {
                Some(name) => {
                    form.choose(seat, name)?;
                    info!("Selected {} as player {}", name, seat);
                    selected.push((*name).clone());
                }
                None => {
                    error!("No available player for seat {}", seat);
                    break;
                }
            }
        }

        Ok(selected)
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
