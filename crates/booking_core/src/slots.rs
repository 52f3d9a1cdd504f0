//! Free-slot matrix: reading cells into [`Slot`]s and finding a bookable window.

use chrono::{NaiveTime, Timelike};
use serde::Serialize;
use tracing::{debug, info};

use crate::browser::{wait_for_presence, BrowserSurface, Locator, WaitPolicy};
use crate::error::BookingError;
use crate::settings::SiteProfile;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// One free cell of the matrix. `cell` is its index among the free-slot
/// matches on the page, used to click it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub court: String,
    pub start: NaiveTime,
    pub end:   NaiveTime,
    pub cell:  usize,
}

impl Slot {
    /// Parses `"HH:MM - HH:MM"`. Anything else yields `None`.
    pub fn parse(court: &str, period: &str, cell: usize) -> Option<Self> {
        let (start, end) = period.trim().split_once('-')?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self {
            court: court.to_string(),
            start,
            end,
            cell,
        })
    }

    /// Length in minutes; a cell ending at or after midnight wraps.
    pub fn minutes(&self) -> u32 {
        let start = self.start.num_seconds_from_midnight() / 60;
        let end = self.end.num_seconds_from_midnight() / 60;
        (end + MINUTES_PER_DAY - start) % MINUTES_PER_DAY
    }

    pub fn hours(&self) -> f64 {
        f64::from(self.minutes()) / 60.0
    }
}

/// Contiguous slots on one court. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRun {
    slots: Vec<Slot>,
}

impl SlotRun {
    fn new(first: Slot) -> Self {
        Self { slots: vec![first] }
    }

    pub fn first(&self) -> &Slot {
        &self.slots[0]
    }

    pub fn end(&self) -> NaiveTime {
        self.slots[self.slots.len() - 1].end
    }

    pub fn court(&self) -> &str {
        &self.first().court
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn minutes(&self) -> u32 {
        self.slots.iter().map(Slot::minutes).sum()
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

pub struct SlotMatrixReader<'a> {
    site: &'a SiteProfile,
}

impl<'a> SlotMatrixReader<'a> {
    pub fn new(site: &'a SiteProfile) -> Self {
        Self { site }
    }

    /// All free cells currently on the page, in page order. Cells whose
    /// period text does not parse are skipped.
    pub fn read(&self, browser: &mut dyn BrowserSurface) -> Result<Vec<Slot>, BookingError> {
        let total = browser.count(&self.site.free_slot)?;
        let mut slots = Vec::with_capacity(total);

        for cell in 0..total {
            let at = Locator::nth(&self.site.free_slot, cell);
            let period = match browser.read_text(&at.clone().within(&self.site.slot_period)) {
                Ok(text) => text,
                Err(e) => {
                    debug!("Skipping free cell {}: {}", cell, e);
                    continue;
                }
            };
            let court = browser
                .read_attribute(&at, &self.site.court_attribute)?
                .unwrap_or_default();

            match Slot::parse(&court, &period, cell) {
                Some(slot) => slots.push(slot),
                None => debug!("Skipping free cell {} with period '{}'", cell, period.trim()),
            }
        }

        info!("Found {} free slot(s) on the page", slots.len());
        Ok(slots)
    }
}

// ── Finding ──────────────────────────────────────────────────────────────────

/// First cell starting at `start` whose own length is `duration_hours`
/// (within 0.01 h).
pub fn find_exact(slots: &[Slot], start: NaiveTime, duration_hours: f64) -> Option<&Slot> {
    slots
        .iter()
        .find(|s| s.start == start && (s.hours() - duration_hours).abs() < 0.01)
}

/// Stitches same-court cells starting at `start` until `duration_hours` is
/// covered. Courts are tried in the order they first appear; the first one
/// that satisfies the request wins.
pub fn find_consecutive(slots: &[Slot], start: NaiveTime, duration_hours: f64) -> Option<SlotRun> {
    let needed = (duration_hours * 60.0).trunc() as u32;

    let mut courts: Vec<(&str, Vec<&Slot>)> = Vec::new();
    for slot in slots {
        match courts.iter().position(|(court, _)| *court == slot.court) {
            Some(i) => courts[i].1.push(slot),
            None => courts.push((slot.court.as_str(), vec![slot])),
        }
    }

    for (court, mut cells) in courts {
        cells.sort_by_key(|s| s.start);

        for (i, first) in cells.iter().enumerate() {
            if first.start != start {
                continue;
            }

            let mut run = SlotRun::new((*first).clone());
            let mut total = first.minutes();
            for next in &cells[i + 1..] {
                if total >= needed || next.start != run.end() {
                    break;
                }
                total += next.minutes();
                run.slots.push((*next).clone());
            }

            if total >= needed {
                info!(
                    "Found consecutive slots on {} from {} to {}",
                    court,
                    start.format("%H:%M"),
                    run.end().format("%H:%M")
                );
                return Some(run);
            }
        }
    }

    debug!("No run of {}h from {} on any court", duration_hours, start.format("%H:%M"));
    None
}

/// Precise mode against the live page: waits for the matrix, then
/// [`find_exact`].
pub fn check_availability(
    browser: &mut dyn BrowserSurface,
    site: &SiteProfile,
    wait: &WaitPolicy,
    start: NaiveTime,
    duration_hours: f64,
) -> Result<Option<Slot>, BookingError> {
    wait_for_presence(browser, wait, &site.matrix_container)?;
    let slots = SlotMatrixReader::new(site).read(browser)?;
    Ok(find_exact(&slots, start, duration_hours).cloned())
}

/// Stitching mode against the live page.
pub fn find_consecutive_slots(
    browser: &mut dyn BrowserSurface,
    site: &SiteProfile,
    start: NaiveTime,
    duration_hours: f64,
) -> Result<Option<SlotRun>, BookingError> {
    let slots = SlotMatrixReader::new(site).read(browser)?;
    Ok(find_consecutive(&slots, start, duration_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{slot_cell, FakeBrowser, FakeElement};
    use std::time::Duration;

    fn t(hhmm: &str) -> NaiveTime {
        NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
    }

    fn slots(cells: &[(&str, &str)]) -> Vec<Slot> {
        cells
            .iter()
            .enumerate()
            .map(|(i, (court, period))| Slot::parse(court, period, i).unwrap())
            .collect()
    }

    #[test]
    fn parses_period_text() {
        let slot = Slot::parse("Padel 1", " 21:30 - 23:00 ", 4).unwrap();
        assert_eq!(slot.start, t("21:30"));
        assert_eq!(slot.end, t("23:00"));
        assert_eq!(slot.cell, 4);
        assert_eq!(slot.minutes(), 90);
    }

    #[test]
    fn rejects_malformed_period_text() {
        assert!(Slot::parse("Padel 1", "vol", 0).is_none());
        assert!(Slot::parse("Padel 1", "21:00", 0).is_none());
        assert!(Slot::parse("Padel 1", "21:00 - 25:00", 0).is_none());
    }

    #[test]
    fn cell_ending_at_midnight_wraps() {
        let slot = Slot::parse("Padel 1", "23:00 - 00:00", 0).unwrap();
        assert_eq!(slot.minutes(), 60);
    }

    #[test]
    fn exact_match_uses_tolerance() {
        let cells = slots(&[("Padel 1", "21:00 - 22:00"), ("Padel 2", "21:30 - 23:00")]);

        let hit = find_exact(&cells, t("21:30"), 1.5).unwrap();
        assert_eq!(hit.court, "Padel 2");
        assert!(find_exact(&cells, t("21:30"), 1.49).is_none());
        assert!(find_exact(&cells, t("21:00"), 1.5).is_none());
    }

    #[test]
    fn stitches_adjacent_cells() {
        let cells = slots(&[("Padel 1", "21:00 - 22:00"), ("Padel 1", "22:00 - 23:00")]);

        let run = find_consecutive(&cells, t("21:00"), 2.0).unwrap();
        assert_eq!(run.first().cell, 0);
        assert_eq!(run.end(), t("23:00"));
        assert_eq!(run.slots().len(), 2);
    }

    #[test]
    fn gap_breaks_the_run() {
        let cells = slots(&[("Padel 1", "21:00 - 22:00"), ("Padel 1", "23:00 - 00:00")]);
        assert!(find_consecutive(&cells, t("21:00"), 2.0).is_none());
    }

    #[test]
    fn cells_are_sorted_before_stitching() {
        let cells = slots(&[("Padel 1", "22:00 - 22:30"), ("Padel 1", "21:00 - 22:00")]);

        let run = find_consecutive(&cells, t("21:00"), 1.5).unwrap();
        assert_eq!(run.first().cell, 1);
        assert_eq!(run.end(), t("22:30"));
    }

    #[test]
    fn stops_extending_once_covered() {
        let cells = slots(&[
            ("Padel 1", "21:00 - 21:30"),
            ("Padel 1", "21:30 - 22:00"),
            ("Padel 1", "22:00 - 22:30"),
        ]);

        let run = find_consecutive(&cells, t("21:00"), 1.0).unwrap();
        assert_eq!(run.end(), t("22:00"));
        assert_eq!(run.minutes(), 60);
    }

    #[test]
    fn fractional_minutes_are_truncated() {
        let cells = slots(&[("Padel 1", "21:00 - 22:00"), ("Padel 1", "22:00 - 22:59")]);

        let run = find_consecutive(&cells, t("21:00"), 1.995).unwrap();
        assert_eq!(run.minutes(), 119);
        assert_eq!(run.end(), t("22:59"));
    }

    #[test]
    fn first_satisfying_court_wins() {
        let cells = slots(&[
            ("Padel 2", "21:00 - 21:30"),
            ("Padel 1", "21:00 - 22:30"),
            ("Padel 2", "21:30 - 22:00"),
            ("Padel 2", "22:00 - 22:30"),
        ]);

        let run = find_consecutive(&cells, t("21:00"), 1.5).unwrap();
        assert_eq!(run.court(), "Padel 2");
        assert_eq!(run.slots().len(), 3);
    }

    #[test]
    fn courts_are_never_mixed() {
        let cells = slots(&[("Padel 1", "21:00 - 22:00"), ("Padel 2", "22:00 - 23:00")]);
        assert!(find_consecutive(&cells, t("21:00"), 2.0).is_none());
    }

    #[test]
    fn reader_skips_unparseable_cells_and_keeps_page_index() {
        let mut browser = FakeBrowser::new();
        browser.put_element(".slot.normal.free", slot_cell("Padel 1", "21:00 - 22:00"));
        browser.put_element(".slot.normal.free", slot_cell("Padel 1", "geen tijd"));
        browser.put_element(".slot.normal.free", FakeElement::text("no period child"));
        browser.put_element(".slot.normal.free", FakeElement::text("").child(".slot-period", FakeElement::text("22:00 - 23:00")));

        let read = SlotMatrixReader::new(&SiteProfile::default()).read(&mut browser).unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].cell, 0);
        assert_eq!(read[1].cell, 3);
        assert_eq!(read[1].court, "");
    }

    #[test]
    fn check_availability_waits_for_matrix() {
        let wait = WaitPolicy {
            timeout: Duration::from_millis(20),
            poll:    Duration::from_millis(5),
            settle:  Duration::ZERO,
        };
        let site = SiteProfile::default();
        let mut browser = FakeBrowser::new();
        browser.put_element(".slot.normal.free", slot_cell("Padel 1", "21:30 - 23:00"));

        assert!(check_availability(&mut browser, &site, &wait, t("21:30"), 1.5).is_err());

        browser.put(".matrix-container", "");
        let hit = check_availability(&mut browser, &site, &wait, t("21:30"), 1.5).unwrap();
        assert_eq!(hit.map(|s| s.court), Some("Padel 1".to_string()));
    }
}
