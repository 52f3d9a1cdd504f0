//! headless Chrome behind `booking_core::BrowserSurface`.
//!
//! Every call is blocking (headless_chrome talks CDP synchronously), so
//! sessions are opened and driven from `tokio::task::spawn_blocking`.
//!
//! Native `alert()`/`confirm()` are caught at the CDP level: a tab listener
//! on `Page.javascriptDialogOpening` queues the message and accepts the
//! dialog, whichever document raised it. `take_dialog` pops that queue.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::{Context, Result};
use booking_core::{
    BrowserError, BrowserSurface, DeviceMode, Locator, OptionChoice, SelectOption, SessionLauncher,
};
use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde::Deserialize;
use tracing::{debug, info, warn};

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const MOBILE_WINDOW: (u32, u32) = (390, 844);
const DESKTOP_WINDOW: (u32, u32) = (1366, 900);

const SELECT_OPTION: &str = r#"function(byValue, wanted) {
  const opt = Array.from(this.options).find(o => byValue ? o.value === wanted : o.text.trim() === wanted);
  if (!opt) return false;
  this.value = opt.value;
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

const LIST_OPTIONS: &str = r#"function() {
  return JSON.stringify(Array.from(this.options).map(o => ({ value: o.value, text: o.text, selected: o.selected })));
}"#;

const IS_VISIBLE: &str = r#"function() {
  const style = window.getComputedStyle(this);
  return style.visibility !== 'hidden' && style.display !== 'none'
    && !!(this.offsetWidth || this.offsetHeight || this.getClientRects().length);
}"#;

// ── Launcher ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub path:     Option<PathBuf>,
    pub headless: bool,
}

impl ChromeLauncher {
    /// `CHROME_PATH` (auto-detect when unset), `CHROME_HEADLESS` (default true).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            path:     get("CHROME_PATH").filter(|p| !p.trim().is_empty()).map(PathBuf::from),
            headless: get("CHROME_HEADLESS").map_or(true, |v| !v.trim().eq_ignore_ascii_case("false")),
        }
    }

    fn open(&self, mode: DeviceMode) -> Result<ChromeSession> {
        let window = match mode {
            DeviceMode::Mobile => MOBILE_WINDOW,
            DeviceMode::Desktop => DESKTOP_WINDOW,
        };
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .sandbox(false)
            .window_size(Some(window))
            .path(self.path.clone())
            .build()
            .context("Failed to build Chrome launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome")?;
        let tab = browser.new_tab().context("Failed to create browser tab")?;
        if mode == DeviceMode::Mobile {
            tab.set_user_agent(MOBILE_USER_AGENT, None, None)
                .context("Failed to set mobile user agent")?;
        }

        let dialogs = DialogQueue::default();
        watch_dialogs(&tab, dialogs.clone())?;

        info!("🌐 Chrome session open ({} mode, headless={})", mode, self.headless);
        Ok(ChromeSession {
            browser: Some(browser),
            tab,
            dialogs,
        })
    }
}

impl SessionLauncher for ChromeLauncher {
    fn launch(&self, mode: DeviceMode) -> Result<Box<dyn BrowserSurface>, BrowserError> {
        self.open(mode)
            .map(|s| Box::new(s) as Box<dyn BrowserSurface>)
            .map_err(|e| BrowserError::Session(format!("{e:#}")))
    }
}

// ── Dialogs ──────────────────────────────────────────────────────────────────

/// Messages of native dialogs, oldest first. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct DialogQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl DialogQueue {
    pub fn record(&self, message: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message.to_string());
    }

    pub fn pop(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

/// Queues and accepts every dialog the tab opens. Holds the tab weakly so
/// the listener does not keep it alive.
fn watch_dialogs(tab: &Arc<Tab>, dialogs: DialogQueue) -> Result<()> {
    let weak: Weak<Tab> = Arc::downgrade(tab);
    tab.add_event_listener(Arc::new(move |event: &Event| {
        if let Event::PageJavascriptDialogOpening(opening) = event {
            debug!("dialog: {}", opening.params.message);
            dialogs.record(&opening.params.message);
            if let Some(tab) = weak.upgrade() {
                if let Err(e) = tab.get_dialog().accept(None) {
                    warn!("Could not accept dialog: {}", e);
                }
            }
        }
    }))
    .context("Failed to register dialog listener")?;
    Ok(())
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct ChromeSession {
    browser: Option<Browser>,
    tab:     Arc<Tab>,
    dialogs: DialogQueue,
}

#[derive(Deserialize)]
struct RawOption {
    value:    String,
    text:     String,
    selected: bool,
}

fn session_err(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Session(e.to_string())
}

/// JS string literal for `s`.
fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

impl ChromeSession {
    fn element(&self, target: &Locator) -> Result<Element<'_>, BrowserError> {
        let missing = |e: anyhow::Error| {
            if e.downcast_ref::<NoElementFound>().is_some() {
                BrowserError::ElementNotFound(target.to_string())
            } else {
                session_err(e)
            }
        };

        let mut all = self.tab.find_elements(&target.selector).map_err(missing)?;
        if target.nth >= all.len() {
            return Err(BrowserError::ElementNotFound(target.to_string()));
        }
        let el = all.swap_remove(target.nth);
        match &target.child {
            Some(child) => el.find_element(child).map_err(missing),
            None => Ok(el),
        }
    }

    fn eval(&self, script: &str) -> Result<Option<serde_json::Value>, BrowserError> {
        self.tab
            .evaluate(script, false)
            .map(|r| r.value)
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    fn call(
        &self,
        target: &Locator,
        function: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, BrowserError> {
        let el = self.element(target)?;
        el.call_js_fn(function, args, false)
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .value
            .ok_or_else(|| BrowserError::Script(format!("no value returned for {target}")))
    }
}

impl BrowserSurface for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!("navigate {}", url);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(session_err)
    }

    fn count(&mut self, selector: &str) -> Result<usize, BrowserError> {
        let script = format!("document.querySelectorAll({}).length", quote(selector));
        Ok(self.eval(&script)?.and_then(|v| v.as_u64()).unwrap_or(0) as usize)
    }

    fn read_text(&mut self, target: &Locator) -> Result<String, BrowserError> {
        self.element(target)?.get_inner_text().map_err(session_err)
    }

    fn read_attribute(&mut self, target: &Locator, name: &str) -> Result<Option<String>, BrowserError> {
        self.element(target)?.get_attribute_value(name).map_err(session_err)
    }

    fn click(&mut self, target: &Locator) -> Result<(), BrowserError> {
        self.element(target)?.click().map(|_| ()).map_err(session_err)
    }

    fn send_text(&mut self, target: &Locator, text: &str) -> Result<(), BrowserError> {
        let el = self.element(target)?;
        el.focus()
            .and_then(|el| el.type_into(text))
            .map(|_| ())
            .map_err(session_err)
    }

    fn select_option(&mut self, target: &Locator, choice: OptionChoice<'_>) -> Result<(), BrowserError> {
        let (by_value, wanted) = match choice {
            OptionChoice::Value(v) => (true, v),
            OptionChoice::VisibleText(t) => (false, t),
        };
        let found = self.call(target, SELECT_OPTION, vec![by_value.into(), wanted.into()])?;
        if found.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(format!("option {choice:?} in {target}")))
        }
    }

    fn options(&mut self, target: &Locator) -> Result<Vec<SelectOption>, BrowserError> {
        let raw = self.call(target, LIST_OPTIONS, vec![])?;
        let json = raw
            .as_str()
            .ok_or_else(|| BrowserError::Script(format!("options of {target} not a string")))?;
        let parsed: Vec<RawOption> =
            serde_json::from_str(json).map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(parsed
            .into_iter()
            .map(|o| SelectOption {
                value:    o.value,
                text:     o.text,
                selected: o.selected,
            })
            .collect())
    }

    fn is_visible(&mut self, target: &Locator) -> Result<bool, BrowserError> {
        Ok(self.call(target, IS_VISIBLE, vec![])?.as_bool().unwrap_or(false))
    }

    fn take_dialog(&mut self) -> Result<Option<String>, BrowserError> {
        Ok(self.dialogs.pop())
    }

    fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            if let Err(e) = self.tab.close(true) {
                debug!("Tab close failed: {}", e);
            }
            drop(browser);
            info!("Chrome session closed");
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.close();
    }
}
