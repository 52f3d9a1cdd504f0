//! Browser capability consumed by the core.
//!
//! The automation layer (headless Chrome in production, a scripted fake in
//! tests) implements [`BrowserSurface`]. Elements are addressed by
//! [`Locator`] values instead of live handles, so nothing in the core borrows
//! from the session.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::BrowserError;

/// CSS selector + index among its matches + optional descendant selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub selector: String,
    pub nth:      usize,
    pub child:    Option<String>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::nth(selector, 0)
    }

    pub fn nth(selector: impl Into<String>, nth: usize) -> Self {
        Self {
            selector: selector.into(),
            nth,
            child: None,
        }
    }

    pub fn within(mut self, child: impl Into<String>) -> Self {
        self.child = Some(child.into());
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.selector, self.nth)?;
        if let Some(child) = &self.child {
            write!(f, " {child}")?;
        }
        Ok(())
    }
}

/// How an `<option>` is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionChoice<'a> {
    Value(&'a str),
    VisibleText(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value:    String,
    pub text:     String,
    pub selected: bool,
}

pub trait BrowserSurface {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Number of elements currently matching `selector` (0 when none).
    fn count(&mut self, selector: &str) -> Result<usize, BrowserError>;

    fn read_text(&mut self, target: &Locator) -> Result<String, BrowserError>;

    fn read_attribute(&mut self, target: &Locator, name: &str) -> Result<Option<String>, BrowserError>;

    fn click(&mut self, target: &Locator) -> Result<(), BrowserError>;

    fn send_text(&mut self, target: &Locator, text: &str) -> Result<(), BrowserError>;

    fn select_option(&mut self, target: &Locator, choice: OptionChoice<'_>) -> Result<(), BrowserError>;

    fn options(&mut self, target: &Locator) -> Result<Vec<SelectOption>, BrowserError>;

    fn is_visible(&mut self, target: &Locator) -> Result<bool, BrowserError>;

    /// Text of a native dialog (alert/confirm) raised since the last call,
    /// accepting it. `None` when no dialog was raised.
    fn take_dialog(&mut self) -> Result<Option<String>, BrowserError>;

    /// Releases the session. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens browser sessions for jobs.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, mode: crate::navigation::DeviceMode) -> Result<Box<dyn BrowserSurface>, BrowserError>;
}

/// Bounds every wait against the browser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll:    Duration,
    /// Pause after an action whose effect is not directly observable
    /// (submit, final confirmation, month stepping).
    pub settle:  Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll:    Duration::from_millis(250),
            settle:  Duration::from_secs(1),
        }
    }
}

impl WaitPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pause(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

/// Polls `ready` until it returns `Ok(true)` or the policy's timeout passes.
/// Errors from the predicate count as "not yet"; the last one ends up in the
/// timeout message.
pub fn wait_until<F>(
    browser: &mut dyn BrowserSurface,
    policy: &WaitPolicy,
    what: &str,
    mut ready: F,
) -> Result<(), BrowserError>
where
    F: FnMut(&mut dyn BrowserSurface) -> Result<bool, BrowserError>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut last_err = None;

    loop {
        match ready(browser) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                debug!("wait for {what}: {e}");
                last_err = Some(e);
            }
        }

        if Instant::now() >= deadline {
            let what = match last_err {
                Some(e) => format!("{what} (last error: {e})"),
                None => what.to_string(),
            };
            return Err(BrowserError::Timeout {
                what,
                after: policy.timeout,
            });
        }

        thread::sleep(policy.poll);
    }
}

pub fn wait_for_presence(
    browser: &mut dyn BrowserSurface,
    policy: &WaitPolicy,
    selector: &str,
) -> Result<(), BrowserError> {
    wait_until(browser, policy, selector, |b| Ok(b.count(selector)? > 0))
}

pub fn wait_for_absence(
    browser: &mut dyn BrowserSurface,
    policy: &WaitPolicy,
    selector: &str,
) -> Result<(), BrowserError> {
    let what = format!("{selector} to disappear");
    wait_until(browser, policy, &what, |b| Ok(b.count(selector)? == 0))
}
