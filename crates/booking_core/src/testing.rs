//! Scripted in-memory browser used by the unit tests.
//!
//! Elements live in a selector → list map. Click and select hooks mutate
//! that map to simulate the site reacting (login form disappearing, matrix
//! re-rendering for another date, rejection dialogs after submit).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::browser::{BrowserSurface, Locator, OptionChoice, SelectOption};
use crate::error::BrowserError;

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub text:     String,
    pub attrs:    HashMap<String, String>,
    pub children: HashMap<String, FakeElement>,
    pub options:  Vec<SelectOption>,
    pub visible:  bool,
}

impl FakeElement {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text:     text.into(),
            attrs:    HashMap::new(),
            children: HashMap::new(),
            options:  Vec::new(),
            visible:  true,
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, child: FakeElement) -> Self {
        self.children.insert(selector.to_string(), child);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// `<select>` whose options use the same string for value and text.
    pub fn select<S: AsRef<str>>(values: &[S]) -> Self {
        let mut el = Self::text("");
        el.options = values
            .iter()
            .map(|v| SelectOption {
                value:    v.as_ref().to_string(),
                text:     v.as_ref().to_string(),
                selected: false,
            })
            .collect();
        el
    }

    pub fn selected_value(&self) -> Option<&str> {
        self.options.iter().find(|o| o.selected).map(|o| o.value.as_str())
    }
}

#[derive(Default)]
pub struct FakeDom {
    pub elements: HashMap<String, Vec<FakeElement>>,
    pub dialogs:  VecDeque<String>,
}

impl FakeDom {
    pub fn put(&mut self, selector: &str, el: FakeElement) {
        self.elements.entry(selector.to_string()).or_default().push(el);
    }

    pub fn set(&mut self, selector: &str, els: Vec<FakeElement>) {
        self.elements.insert(selector.to_string(), els);
    }

    pub fn remove(&mut self, selector: &str) {
        self.elements.remove(selector);
    }

    pub fn first(&self, selector: &str) -> Option<&FakeElement> {
        self.elements.get(selector).and_then(|els| els.first())
    }

    pub fn first_mut(&mut self, selector: &str) -> Option<&mut FakeElement> {
        self.elements.get_mut(selector).and_then(|els| els.first_mut())
    }

    pub fn selected(&self, selector: &str) -> Option<String> {
        self.first(selector)
            .and_then(|el| el.selected_value())
            .map(str::to_string)
    }
}

type Hook = Box<dyn FnMut(&mut FakeDom, &Locator) + Send>;

pub struct FakeBrowser {
    pub dom:        FakeDom,
    click_hooks:    HashMap<String, Hook>,
    select_hooks:   HashMap<String, Hook>,
    pub clicks:     Vec<Locator>,
    pub typed:      Vec<(Locator, String)>,
    pub selections: Vec<(Locator, String)>,
    pub visits:     Vec<String>,
    pub closed:     Arc<AtomicUsize>,
}

fn hook_key(target: &Locator) -> String {
    match &target.child {
        Some(child) => format!("{} {}", target.selector, child),
        None => target.selector.clone(),
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            dom:          FakeDom::default(),
            click_hooks:  HashMap::new(),
            select_hooks: HashMap::new(),
            clicks:       Vec::new(),
            typed:        Vec::new(),
            selections:   Vec::new(),
            visits:       Vec::new(),
            closed:       Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn put(&mut self, selector: &str, text: &str) {
        self.dom.put(selector, FakeElement::text(text));
    }

    pub fn put_element(&mut self, selector: &str, el: FakeElement) {
        self.dom.put(selector, el);
    }

    pub fn push_dialog(&mut self, text: &str) {
        self.dom.dialogs.push_back(text.to_string());
    }

    pub fn on_click(&mut self, key: &str, hook: impl FnMut(&mut FakeDom, &Locator) + Send + 'static) {
        self.click_hooks.insert(key.to_string(), Box::new(hook));
    }

    pub fn on_select(&mut self, key: &str, hook: impl FnMut(&mut FakeDom, &Locator) + Send + 'static) {
        self.select_hooks.insert(key.to_string(), Box::new(hook));
    }

    pub fn clicked(&self, selector: &str) -> usize {
        self.clicks.iter().filter(|l| hook_key(l) == selector).count()
    }

    pub fn selections_on(&self, selector: &str) -> Vec<String> {
        self.selections
            .iter()
            .filter(|(l, _)| l.selector == selector)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn element(&self, target: &Locator) -> Result<&FakeElement, BrowserError> {
        let el = self
            .dom
            .elements
            .get(&target.selector)
            .and_then(|els| els.get(target.nth))
            .ok_or_else(|| BrowserError::ElementNotFound(target.to_string()))?;
        match &target.child {
            Some(child) => el
                .children
                .get(child)
                .ok_or_else(|| BrowserError::ElementNotFound(target.to_string())),
            None => Ok(el),
        }
    }

    fn element_mut(&mut self, target: &Locator) -> Result<&mut FakeElement, BrowserError> {
        let missing = || BrowserError::ElementNotFound(target.to_string());
        let el = self
            .dom
            .elements
            .get_mut(&target.selector)
            .and_then(|els| els.get_mut(target.nth))
            .ok_or_else(missing)?;
        match &target.child {
            Some(child) => el.children.get_mut(child).ok_or_else(missing),
            None => Ok(el),
        }
    }

    // ── Site scripts ─────────────────────────────────────────────────────────

    /// Login form whose button makes the form disappear.
    pub fn with_login(mut self) -> Self {
        self.put("[name='username']", "");
        self.put("[name='password']", "");
        self.put("#login-form", "");
        self.put("#login-form button", "Inloggen");
        self.on_click("#login-form button", |dom, _| dom.remove("#login-form"));
        self
    }

    /// Mobile schedule: a date `<select>` offering `offered`, re-rendering the
    /// free cells from `days` whenever a date is chosen.
    pub fn mobile_schedule(mut self, offered: &[NaiveDate], days: Vec<(NaiveDate, Vec<(&str, &str)>)>) -> Self {
        let values: Vec<String> = offered.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect();
        self.put("#schedule-index", "");
        self.put(".matrix-container", "");
        self.put_element("select[name='date']", FakeElement::select(values.as_slice()));

        let days: HashMap<String, Vec<FakeElement>> = days
            .into_iter()
            .map(|(date, cells)| {
                let cells = cells.into_iter().map(|(court, period)| slot_cell(court, period)).collect();
                (date.format("%Y-%m-%d").to_string(), cells)
            })
            .collect();

        self.on_select("select[name='date']", move |dom, _| {
            let chosen = dom.selected("select[name='date']").unwrap_or_default();
            let cells = days.get(&chosen).cloned().unwrap_or_default();
            dom.set(".slot.normal.free", cells);
        });
        self
    }

    /// Booking form opened by clicking a free cell: three seat selects
    /// offering `members`, an end-time select, and a submit button that
    /// rejects any selection containing a key of `rejections` with its text.
    pub fn booking_form(mut self, members: &[&str], end_times: &[&str], rejections: Vec<(&str, &str)>) -> Self {
        let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        let end_times: Vec<String> = end_times.iter().map(|t| t.to_string()).collect();

        self.on_click(".slot.normal.free", move |dom, _| {
            for seat in 2..=4 {
                dom.set(&format!("select[name='players[{seat}]']"), vec![FakeElement::select(members.as_slice())]);
            }
            dom.set("select[name='end_time']", vec![FakeElement::select(end_times.as_slice())]);
            dom.set("#__make_submit", vec![FakeElement::text("Verder")]);
            dom.set("#__make_submit2", vec![FakeElement::text("Bevestigen")]);
        });

        let rejections: Vec<(String, String)> = rejections
            .into_iter()
            .map(|(name, msg)| (name.to_string(), msg.to_string()))
            .collect();
        self.on_click("#__make_submit", move |dom, _| {
            let seated: Vec<String> = (2..=4)
                .filter_map(|seat| dom.selected(&format!("select[name='players[{seat}]']")))
                .collect();
            if let Some((_, msg)) = rejections.iter().find(|(name, _)| seated.contains(name)) {
                dom.dialogs.push_back(msg.clone());
            }
        });
        self
    }
}

pub fn slot_cell(court: &str, period: &str) -> FakeElement {
    FakeElement::text(period)
        .attr("title", court)
        .child(".slot-period", FakeElement::text(period))
}

impl BrowserSurface for FakeBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.visits.push(url.to_string());
        Ok(())
    }

    fn count(&mut self, selector: &str) -> Result<usize, BrowserError> {
        Ok(self.dom.elements.get(selector).map_or(0, Vec::len))
    }

    fn read_text(&mut self, target: &Locator) -> Result<String, BrowserError> {
        self.element(target).map(|el| el.text.clone())
    }

    fn read_attribute(&mut self, target: &Locator, name: &str) -> Result<Option<String>, BrowserError> {
        self.element(target).map(|el| el.attrs.get(name).cloned())
    }

    fn click(&mut self, target: &Locator) -> Result<(), BrowserError> {
        self.element(target)?;
        self.clicks.push(target.clone());
        if let Some(hook) = self.click_hooks.get_mut(&hook_key(target)) {
            hook(&mut self.dom, target);
        }
        Ok(())
    }

    fn send_text(&mut self, target: &Locator, text: &str) -> Result<(), BrowserError> {
        self.element(target)?;
        self.typed.push((target.clone(), text.to_string()));
        Ok(())
    }

    fn select_option(&mut self, target: &Locator, choice: OptionChoice<'_>) -> Result<(), BrowserError> {
        let el = self.element_mut(target)?;
        let idx = el
            .options
            .iter()
            .position(|o| match choice {
                OptionChoice::Value(v) => o.value == v,
                OptionChoice::VisibleText(t) => o.text.trim() == t,
            })
            .ok_or_else(|| BrowserError::ElementNotFound(format!("option {choice:?} in {target}")))?;
        for (i, o) in el.options.iter_mut().enumerate() {
            o.selected = i == idx;
        }
        let value = el.options[idx].value.clone();

        self.selections.push((target.clone(), value));
        if let Some(hook) = self.select_hooks.get_mut(&hook_key(target)) {
            hook(&mut self.dom, target);
        }
        Ok(())
    }

    fn options(&mut self, target: &Locator) -> Result<Vec<SelectOption>, BrowserError> {
        self.element(target).map(|el| el.options.clone())
    }

    fn is_visible(&mut self, target: &Locator) -> Result<bool, BrowserError> {
        self.element(target).map(|el| el.visible)
    }

    fn take_dialog(&mut self) -> Result<Option<String>, BrowserError> {
        Ok(self.dom.dialogs.pop_front())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
