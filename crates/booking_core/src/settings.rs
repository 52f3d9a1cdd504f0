//! Configuration the core reads.
//!
//! - `BookingPlan`   — `data/config.json` (what to book)
//! - `EngineSettings` — env knobs (how hard to try)
//! - `Credentials`   — site login from env
//! - `SiteProfile`   — selectors/formats of the booking site, overridable
//!   through the `site` object of the config file

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::browser::WaitPolicy;
use crate::error::BookingError;
use crate::navigation::DeviceMode;

pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";

/// `HH:MM` (de)serialisation for `NaiveTime`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingPlan {
    pub login_url:      String,
    pub booking_date:   NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time:     NaiveTime,
    pub duration_hours: f64,
    #[serde(default)]
    pub site:           SiteProfile,
}

impl BookingPlan {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BookingError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| BookingError::Configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
            .map_err(|e| BookingError::Configuration(format!("invalid {}: {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BookingError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| BookingError::Configuration(format!("cannot create {}: {e}", dir.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BookingError::Configuration(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| BookingError::Configuration(format!("cannot write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), BookingError> {
        if self.login_url.trim().is_empty() {
            return Err(BookingError::Configuration("login_url is empty".into()));
        }
        if !(self.duration_hours > 0.0 && self.duration_hours <= 24.0) {
            return Err(BookingError::Configuration(format!(
                "duration_hours must be in (0, 24], got {}",
                self.duration_hours
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub enable_booking: bool,
    pub max_attempts:   usize,
    pub max_days_back:  u32,
    pub device_mode:    DeviceMode,
    pub wait:           WaitPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enable_booking: false,
            max_attempts:   2,
            max_days_back:  7,
            device_mode:    DeviceMode::Mobile,
            wait:           WaitPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, BookingError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, BookingError> {
        let defaults = Self::default();

        let enable_booking = get("ENABLE_BOOKING")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.enable_booking);
        let max_attempts = parse_knob(&get, "MAX_BOOKING_ATTEMPTS", defaults.max_attempts)?;
        let max_days_back = parse_knob(&get, "MAX_DAYS_BACK", defaults.max_days_back)?;
        let timeout_secs = parse_knob(&get, "WAIT_TIMEOUT_SECS", defaults.wait.timeout.as_secs())?;
        let device_mode = match get("DEVICE_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.device_mode,
        };

        if max_attempts == 0 {
            return Err(BookingError::Configuration("MAX_BOOKING_ATTEMPTS must be at least 1".into()));
        }

        Ok(Self {
            enable_booking,
            max_attempts,
            max_days_back,
            device_mode,
            wait: defaults.wait.with_timeout(Duration::from_secs(timeout_secs)),
        })
    }
}

fn parse_knob<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, BookingError> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BookingError::Configuration(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, BookingError> {
        let get = |key: &str| env::var(key).ok().filter(|v| !v.is_empty());
        match (get("BOOKER_USERNAME"), get("BOOKER_PASSWORD")) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(BookingError::Configuration(
                "BOOKER_USERNAME and BOOKER_PASSWORD environment variables must be set".into(),
            )),
        }
    }
}

/// Rendering conventions of the booking site. Every field can be overridden
/// from the config file; missing fields keep the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub login_username:     String,
    pub login_password:     String,
    pub login_form:         String,
    pub login_button:       String,

    pub calendar_title:     String,
    pub calendar_next:      String,
    pub calendar_prev:      String,
    /// `{year}`, `{month}` and `{day}` are substituted without zero padding.
    pub day_cell:           String,
    pub month_names:        Vec<String>,
    pub matrix_date_title:  String,
    pub matrix_date_format: String,
    pub matrix_container:   String,

    pub schedule_form:      String,
    pub date_select:        String,

    pub free_slot:          String,
    pub slot_period:        String,
    pub court_attribute:    String,

    /// `{seat}` is substituted with each entry of `seats`.
    pub seat_select:        String,
    pub seats:              Vec<u8>,
    pub end_time_select:    String,
    pub submit_button:      String,
    pub confirm_button:     String,
    pub popup:              String,
    pub popup_button:       String,
    /// First capture group is the rejected player's name.
    pub rejection_pattern:  String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        let s = |v: &str| v.to_string();
        Self {
            login_username:     s("[name='username']"),
            login_password:     s("[name='password']"),
            login_form:         s("#login-form"),
            login_button:       s("#login-form button"),

            calendar_title:     s("#calendar_date_title"),
            calendar_next:      s(".month.next a"),
            calendar_prev:      s(".month.prev a"),
            day_cell:           s("#cal_{year}_{month}_{day} .cal-link"),
            month_names:        ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            matrix_date_title:  s("#matrix_date_title"),
            matrix_date_format: s("%d-%m-%Y"),
            matrix_container:   s(".matrix-container"),

            schedule_form:      s("#schedule-index"),
            date_select:        s("select[name='date']"),

            free_slot:          s(".slot.normal.free"),
            slot_period:        s(".slot-period"),
            court_attribute:    s("title"),

            seat_select:        s("select[name='players[{seat}]']"),
            seats:              vec![2, 3, 4],
            end_time_select:    s("select[name='end_time']"),
            submit_button:      s("#__make_submit"),
            confirm_button:     s("#__make_submit2"),
            popup:              s(".swal2-popup"),
            popup_button:       s(".swal2-popup button"),
            rejection_pattern:  s(r"\[\d+] ([^ ]+) [^ ]+ mag niet meer spelen"),
        }
    }
}

impl SiteProfile {
    pub fn day_cell_for(&self, date: NaiveDate) -> String {
        use chrono::Datelike;
        self.day_cell
            .replace("{year}", &date.year().to_string())
            .replace("{month}", &date.month().to_string())
            .replace("{day}", &date.day().to_string())
    }

    pub fn seat_select_for(&self, seat: u8) -> String {
        self.seat_select.replace("{seat}", &seat.to_string())
    }
}
