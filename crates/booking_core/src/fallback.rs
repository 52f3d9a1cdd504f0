//! Retrying slot discovery on earlier business days.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use tracing::{info, warn};

use crate::browser::BrowserSurface;
use crate::error::BookingError;
use crate::navigation::NavigationStrategy;
use crate::settings::SiteProfile;
use crate::slots::{find_consecutive_slots, SlotRun};

/// Business day before `date`: Monday, Saturday and Sunday all go back to
/// the preceding Friday in one step.
pub fn previous_business_day(date: NaiveDate) -> NaiveDate {
    let back = match date.weekday() {
        Weekday::Mon => 3,
        Weekday::Sun => 2,
        _ => 1,
    };
    date - Duration::days(back)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRun {
    pub run:  SlotRun,
    pub date: NaiveDate,
}

pub struct FallbackSearch<'a> {
    pub navigator: &'a dyn NavigationStrategy,
    pub site:      &'a SiteProfile,
}

impl FallbackSearch<'_> {
    /// Looks on `date`, then on up to `max_days_back` earlier business days,
    /// so at most `max_days_back + 1` navigations. Navigation problems on
    /// `date` itself end the search; on an earlier day they only skip that day.
    pub fn find(
        &self,
        browser: &mut dyn BrowserSurface,
        date: NaiveDate,
        start: NaiveTime,
        duration_hours: f64,
        max_days_back: u32,
    ) -> Result<Option<FoundRun>, BookingError> {
        let mut candidate = date;

        for visited in 0..=max_days_back {
            if visited > 0 {
                candidate = previous_business_day(candidate);
                info!("No slot yet, trying earlier day {} ({}/{})", candidate, visited, max_days_back);
            }

            let settled = self
                .navigator
                .navigate_to_date(browser, candidate)
                .and_then(|_| self.navigator.wait_for_matrix_date(browser, candidate));
            match settled {
                Ok(()) => {}
                Err(e @ BookingError::NavigationTimeout { .. }) if visited > 0 => {
                    warn!("Skipping {}: {}", candidate, e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if let Some(run) = find_consecutive_slots(browser, self.site, start, duration_hours)? {
                if candidate != date {
                    info!("📅 Found slot on fallback date {} instead of {}", candidate, date);
                }
                return Ok(Some(FoundRun { run, date: candidate }));
            }
        }

        Ok(None)
    }
}
