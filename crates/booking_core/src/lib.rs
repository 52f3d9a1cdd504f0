//! Booking engine for a padel club's reservation site.
//!
//! Everything here talks to the site through [`BrowserSurface`]; the
//! headless Chrome implementation lives in the `chrome_surface` crate.
//!
//! Flow of one job:
//!   login → navigate to date → find slot run (falling back to earlier
//!   business days) → open booking form → rotate players until accepted
//!   → confirm (unless dry run)

pub mod browser;
pub mod error;
pub mod fallback;
pub mod job;
pub mod navigation;
pub mod rotation;
pub mod service;
pub mod settings;
pub mod slots;
pub mod status;

#[cfg(test)]
mod testing;

pub use browser::{BrowserSurface, Locator, OptionChoice, SelectOption, SessionLauncher, WaitPolicy};
pub use error::{BookingError, BrowserError};
pub use job::{BookingJob, BookingRequest, BookingResult, BookingTarget};
pub use navigation::{navigator_for, DeviceMode, NavigationStrategy};
pub use service::{BookingService, StartedJob};
pub use settings::{BookingPlan, Credentials, EngineSettings, SiteProfile, DEFAULT_CONFIG_PATH};
pub use status::{BookingStatus, BookingStatusTracker};
