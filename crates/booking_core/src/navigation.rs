//! Moving the schedule to a target date.
//!
//! Two layouts of the same site:
//! - desktop: month calendar with prev/next controls + a day cell per date,
//!   the matrix shows its date in a label (`"Zo 30-11-2025"`)
//! - mobile: a `<select>` with one option per bookable date (`2025-11-30`)
//!
//! Both sit behind [`NavigationStrategy`]; the rest of the core never looks
//! at [`DeviceMode`] after [`navigator_for`] picked one.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{wait_for_presence, wait_until, BrowserSurface, Locator, OptionChoice, WaitPolicy};
use crate::error::{BookingError, BrowserError};
use crate::settings::SiteProfile;

/// Upper bound on prev/next clicks in the desktop calendar.
pub const MAX_MONTH_STEPS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Mobile,
    Desktop,
}

impl FromStr for DeviceMode {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(DeviceMode::Mobile),
            "desktop" => Ok(DeviceMode::Desktop),
            other => Err(BookingError::Configuration(format!(
                "invalid device mode '{other}', expected 'mobile' or 'desktop'"
            ))),
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Mobile => f.write_str("mobile"),
            DeviceMode::Desktop => f.write_str("desktop"),
        }
    }
}

pub trait NavigationStrategy: Send + Sync {
    /// Drives the page towards `target`. Returns once the change was
    /// requested; use [`NavigationStrategy::wait_for_matrix_date`] to know
    /// it settled.
    fn navigate_to_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError>;

    /// Blocks until the slot matrix shows `target`, or fails with
    /// `NavigationTimeout`.
    fn wait_for_matrix_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError>;
}

pub fn navigator_for(mode: DeviceMode, site: &SiteProfile, wait: WaitPolicy) -> Box<dyn NavigationStrategy> {
    match mode {
        DeviceMode::Mobile => Box::new(MobileNavigation::new(site.clone(), wait)),
        DeviceMode::Desktop => Box::new(DesktopNavigation::new(site.clone(), wait)),
    }
}

fn settle_error(target: NaiveDate) -> impl Fn(BrowserError) -> BookingError {
    move |e| BookingError::navigation(target, e.to_string())
}

// ── Desktop ──────────────────────────────────────────────────────────────────

pub struct DesktopNavigation {
    site: SiteProfile,
    wait: WaitPolicy,
}

impl DesktopNavigation {
    pub fn new(site: SiteProfile, wait: WaitPolicy) -> Self {
        Self { site, wait }
    }

    fn shown_month(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(i32, u32), BookingError> {
        let label = browser.read_text(&Locator::css(&self.site.calendar_title))?;
        parse_month_label(&label, &self.site.month_names).ok_or_else(|| {
            BookingError::navigation(target, format!("unreadable calendar header '{}'", label.trim()))
        })
    }
}

/// `"Nov 2025"` → `(2025, 11)`. Month names compare case-insensitively.
pub fn parse_month_label(label: &str, month_names: &[String]) -> Option<(i32, u32)> {
    let mut parts = label.split_whitespace();
    let month = parts.next()?;
    let year = parts.next()?.parse().ok()?;
    let idx = month_names.iter().position(|m| m.eq_ignore_ascii_case(month))?;
    Some((year, idx as u32 + 1))
}

/// `"Zo 30-11-2025"` → 2025-11-30; the date is the last token.
pub fn parse_matrix_date(label: &str, format: &str) -> Option<NaiveDate> {
    let token = label.split_whitespace().last()?;
    NaiveDate::parse_from_str(token, format).ok()
}

impl NavigationStrategy for DesktopNavigation {
    fn navigate_to_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError> {
        info!("Navigating to {} (desktop)", target);
        wait_for_presence(browser, &self.wait, &self.site.calendar_title).map_err(settle_error(target))?;

        let wanted = (target.year(), target.month());
        let mut steps = 0;
        loop {
            let shown = self.shown_month(browser, target)?;
            if shown == wanted {
                break;
            }
            if steps >= MAX_MONTH_STEPS {
                warn!("Calendar stuck on {}/{} after {} steps", shown.1, shown.0, steps);
                return Err(BookingError::navigation(
                    target,
                    format!("calendar still on {}/{} after {MAX_MONTH_STEPS} steps", shown.1, shown.0),
                ));
            }

            let control = if shown < wanted { &self.site.calendar_next } else { &self.site.calendar_prev };
            debug!("Calendar on {}/{}, clicking {}", shown.1, shown.0, control);
            browser.click(&Locator::css(control))?;
            steps += 1;

            self.wait.pause();
            wait_for_presence(browser, &self.wait, &self.site.calendar_title).map_err(settle_error(target))?;
        }

        let cell = self.site.day_cell_for(target);
        browser.click(&Locator::css(&cell)).map_err(|e| match e {
            BrowserError::ElementNotFound(_) => BookingError::navigation(target, format!("day cell {cell} not on the calendar")),
            other => other.into(),
        })?;

        wait_for_presence(browser, &self.wait, &self.site.matrix_container).map_err(settle_error(target))?;
        info!("Calendar moved to {} in {} step(s)", target, steps);
        Ok(())
    }

    fn wait_for_matrix_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError> {
        let title = Locator::css(&self.site.matrix_date_title);
        let format = self.site.matrix_date_format.as_str();
        wait_until(browser, &self.wait, "matrix date", |b| {
            let label = b.read_text(&title)?;
            Ok(parse_matrix_date(&label, format) == Some(target))
        })
        .map_err(settle_error(target))
    }
}

// ── Mobile ───────────────────────────────────────────────────────────────────

pub struct MobileNavigation {
    site: SiteProfile,
    wait: WaitPolicy,
}

impl MobileNavigation {
    pub fn new(site: SiteProfile, wait: WaitPolicy) -> Self {
        Self { site, wait }
    }
}

fn canonical(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl NavigationStrategy for MobileNavigation {
    fn navigate_to_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError> {
        info!("Navigating to {} (mobile)", target);
        wait_for_presence(browser, &self.wait, &self.site.schedule_form).map_err(settle_error(target))?;

        let select = Locator::css(&self.site.date_select);
        let value = canonical(target);
        if let Err(e) = browser.select_option(&select, OptionChoice::Value(&value)) {
            let offered: Vec<String> = browser
                .options(&select)
                .map(|opts| opts.into_iter().map(|o| o.value).filter(|v| !v.is_empty()).collect())
                .unwrap_or_default();
            warn!("Date {} not in dropdown ({}), available: {:?}", value, e, offered);
            return Err(BookingError::navigation(
                target,
                format!("date not offered, available: {}", offered.join(", ")),
            ));
        }

        self.wait.pause();
        wait_for_presence(browser, &self.wait, &self.site.matrix_container).map_err(settle_error(target))?;
        Ok(())
    }

    fn wait_for_matrix_date(&self, browser: &mut dyn BrowserSurface, target: NaiveDate) -> Result<(), BookingError> {
        let select = Locator::css(&self.site.date_select);
        let wanted = canonical(target);
        wait_until(browser, &self.wait, "selected date", |b| {
            let selected = b.options(&select)?.into_iter().find(|o| o.selected);
            Ok(selected.is_some_and(|o| o.value == wanted))
        })
        .map_err(settle_error(target))
    }
}
