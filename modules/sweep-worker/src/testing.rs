// Test mocks for the sweep pipeline.
//
// Three mocks matching the three collaborator seams:
// - MockActuator (Actuator): in-memory following page and profiles
// - ManualClock (Clock): time only moves when the test says so
// - RecordingSleeper (Sleeper): returns immediately, remembers every delay,
//   and can be told to hang on one of them
//
// Plus `test_config` for a Config whose files live in a temp directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use sweep_common::{Config, InteractionError};

use crate::actuator::{Actuator, ActuatorResult, ElementRef, RowSnapshot};
use crate::locator;
use crate::sweep::SweepDeps;
use crate::throttle::{Clock, Sleeper};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Config for account "me" with every file under `dir`, session persistence
/// off and a fixed jitter seed.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::new("me");
    config.state_file = dir.join("state.json");
    config.audit_file = dir.join("invalid_accounts.csv");
    config.session_file = dir.join("session.json");
    config.persist_session = false;
    config.jitter_seed = Some(7);
    config
}

/// Fixed start instant for clock-driven tests.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn deps(
    actuator: Arc<MockActuator>,
    clock: Arc<ManualClock>,
    sleeper: Arc<RecordingSleeper>,
) -> SweepDeps {
    SweepDeps {
        actuator,
        clock,
        sleeper,
    }
}

// ---------------------------------------------------------------------------
// MockActuator
// ---------------------------------------------------------------------------

/// How a profile page behaves when visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockProfile {
    /// Renders `text` with `posts` post tiles.
    Page { text: String, posts: usize },
    /// Shows a retry prompt for the first `failures` loads, then `then`.
    Flaky { failures: u32, then: Box<MockProfile> },
    /// Navigation times out.
    Timeout,
}

impl MockProfile {
    pub fn posts(n: usize) -> Self {
        Self::Page {
            text: "Bio".to_string(),
            posts: n,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::Page {
            text: text.to_string(),
            posts: 0,
        }
    }

    pub fn flaky(failures: u32, then: MockProfile) -> Self {
        Self::Flaky {
            failures,
            then: Box::new(then),
        }
    }
}

#[derive(Debug, Clone)]
struct MockRow {
    handle: Option<String>,
    text: String,
    has_control: bool,
    vanishing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    Blank,
    Following,
    Profile(String),
}

#[derive(Debug)]
struct Inner {
    page: Page,
    rows: Vec<MockRow>,
    visible: usize,
    page_size: usize,
    profiles: HashMap<String, MockProfile>,
    profile_loads: HashMap<String, u32>,
    container: &'static str,
    scroll_containers: Vec<Option<String>>,
    arrivals: Vec<MockRow>,
    navigations: Vec<String>,
    clicks: Vec<String>,
    session: String,
    imported: Option<String>,
}

/// Stateful in-memory browser. Understands the first strategy of every
/// locator list (the list container is configurable); the fallbacks never match. Clicking a row's unfollow control
/// removes the row, so later positions shift like the real list.
pub struct MockActuator {
    inner: Mutex<Inner>,
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockActuator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                page: Page::Blank,
                rows: Vec::new(),
                visible: 0,
                page_size: usize::MAX,
                profiles: HashMap::new(),
                profile_loads: HashMap::new(),
                container: locator::LIST_CONTAINER[0].selector,
                scroll_containers: Vec::new(),
                arrivals: Vec::new(),
                navigations: Vec::new(),
                clicks: Vec::new(),
                session: "[]".to_string(),
                imported: None,
            }),
        }
    }

    fn push_row(self, row: MockRow) -> Self {
        self.lock().rows.push(row);
        self
    }

    /// A followed account whose profile renders `profile`.
    pub fn follow(self, handle: &str, profile: MockProfile) -> Self {
        self.lock().profiles.insert(handle.to_string(), profile);
        self.push_row(MockRow {
            handle: Some(handle.to_string()),
            text: format!("{handle}\n@{handle}\nFollowing"),
            has_control: true,
            vanishing: false,
        })
    }

    /// A followed account whose row text shows `text` instead of the usual label.
    pub fn follow_with_text(self, handle: &str, text: &str) -> Self {
        self.push_row(MockRow {
            handle: Some(handle.to_string()),
            text: text.to_string(),
            has_control: true,
            vanishing: false,
        })
    }

    /// A row with no readable username anywhere.
    pub fn follow_unnamed(self, text: &str) -> Self {
        self.push_row(MockRow {
            handle: None,
            text: text.to_string(),
            has_control: true,
            vanishing: false,
        })
    }

    /// A row with no unfollow control.
    pub fn follow_without_control(self, handle: &str, profile: MockProfile) -> Self {
        self.lock().profiles.insert(handle.to_string(), profile);
        self.push_row(MockRow {
            handle: Some(handle.to_string()),
            text: format!("{handle}\n@{handle}"),
            has_control: false,
            vanishing: false,
        })
    }

    /// A row that drops out of the list as soon as anything is clicked.
    pub fn follow_vanishing(self, handle: &str, profile: MockProfile) -> Self {
        self.lock().profiles.insert(handle.to_string(), profile);
        self.push_row(MockRow {
            handle: Some(handle.to_string()),
            text: format!("{handle}\n@{handle}\nFollowing"),
            has_control: true,
            vanishing: true,
        })
    }

    /// A followed account that appears at the top of the list the first time
    /// a row is scrolled into view, shifting every row below it down by one.
    pub fn follow_arriving(self, handle: &str, profile: MockProfile) -> Self {
        let mut inner = self.lock();
        inner.profiles.insert(handle.to_string(), profile);
        inner.arrivals.push(MockRow {
            handle: Some(handle.to_string()),
            text: format!("{handle}\n@{handle}\nFollowing"),
            has_control: true,
            vanishing: false,
        });
        drop(inner);
        self
    }

    /// Render the list container with `selector` instead of the first strategy's.
    pub fn with_container(self, selector: &'static str) -> Self {
        self.lock().container = selector;
        self
    }

    /// Render only `n` rows per scroll.
    pub fn with_page_size(self, n: usize) -> Self {
        self.lock().page_size = n.max(1);
        self
    }

    pub fn with_session(self, blob: &str) -> Self {
        self.lock().session = blob.to_string();
        self
    }

    // --- Inspection ---

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    /// Profile URLs visited (everything but the following page).
    pub fn profile_visits(&self) -> Vec<String> {
        self.lock()
            .navigations
            .iter()
            .filter(|u| !u.ends_with("/following"))
            .cloned()
            .collect()
    }

    pub fn remaining(&self) -> Vec<String> {
        self.lock()
            .rows
            .iter()
            .map(|r| r.handle.clone().unwrap_or_default())
            .collect()
    }

    /// Container passed to every scroll, in order.
    pub fn scroll_containers(&self) -> Vec<Option<String>> {
        self.lock().scroll_containers.clone()
    }

    pub fn imported_session(&self) -> Option<String> {
        self.lock().imported.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn visible_rows(&self) -> &[MockRow] {
        match self.page {
            Page::Following => &self.rows[..self.visible.min(self.rows.len())],
            _ => &[],
        }
    }

    fn current_profile(&self) -> Option<&MockProfile> {
        match &self.page {
            Page::Profile(handle) => self.profiles.get(handle),
            _ => None,
        }
    }

    /// The profile as rendered on this load, after any flaky failures.
    fn rendered_profile(&self) -> Option<(&str, usize, bool)> {
        let Page::Profile(handle) = &self.page else {
            return None;
        };
        let loads = self.profile_loads.get(handle).copied().unwrap_or(0);
        let mut profile = self.current_profile()?;
        let mut failing = false;
        if let MockProfile::Flaky { failures, then } = profile {
            failing = loads <= *failures;
            profile = then;
        }
        match profile {
            MockProfile::Page { text, posts } => Some((text.as_str(), *posts, failing)),
            _ => None,
        }
    }

    fn row_index(&self, element: &ElementRef) -> ActuatorResult<usize> {
        let row = element.within.as_deref().unwrap_or(element);
        if row.selector != locator::FOLLOW_ITEM[0].selector || row.index >= self.visible_rows().len()
        {
            return Err(InteractionError::ElementNotFound(format!(
                "{} #{}",
                row.selector, row.index
            )));
        }
        if let Some(expect) = row.expect.as_ref() {
            let found = &self.visible_rows()[row.index];
            if !expect.matches(&[found.handle.clone()], &found.text) {
                return Err(InteractionError::StaleReference(format!(
                    "row #{} no longer shows @{}",
                    row.index, expect.handle
                )));
            }
        }
        Ok(row.index)
    }
}

fn profile_handle(url: &str) -> Option<String> {
    url.rsplit_once("/@").map(|(_, h)| h.trim_end_matches('/').to_string())
}

#[async_trait]
impl Actuator for MockActuator {
    async fn navigate(&self, url: &str, timeout: Duration) -> ActuatorResult<()> {
        let mut inner = self.lock();
        inner.navigations.push(url.to_string());

        if url.ends_with("/following") {
            inner.page = Page::Following;
            inner.visible = inner.page_size.min(inner.rows.len());
            return Ok(());
        }

        let handle = profile_handle(url).unwrap_or_default();
        if matches!(inner.profiles.get(&handle), Some(MockProfile::Timeout)) {
            inner.page = Page::Blank;
            return Err(InteractionError::Timeout {
                after: timeout,
                what: format!("navigate to {url}"),
            });
        }
        *inner.profile_loads.entry(handle.clone()).or_insert(0) += 1;
        inner.profiles.entry(handle.clone()).or_insert(MockProfile::posts(3));
        inner.page = Page::Profile(handle);
        Ok(())
    }

    async fn current_url(&self) -> ActuatorResult<String> {
        Ok(self.lock().navigations.last().cloned().unwrap_or_default())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> ActuatorResult<()> {
        let inner = self.lock();
        let ready = match &inner.page {
            Page::Following => !inner.visible_rows().is_empty(),
            Page::Profile(_) => true,
            Page::Blank => false,
        };
        if ready {
            Ok(())
        } else {
            Err(InteractionError::Timeout {
                after: timeout,
                what: format!("wait for {selector}"),
            })
        }
    }

    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
        label: Option<&str>,
    ) -> ActuatorResult<Vec<ElementRef>> {
        let inner = self.lock();

        if let Some(row) = scope {
            let index = inner.row_index(row)?;
            let control = &locator::UNFOLLOW_CONTROL[0];
            let found = selector == control.selector
                && label == control.label
                && inner.visible_rows()[index].has_control;
            return Ok(if found {
                vec![ElementRef::child(row, selector, label, 0)]
            } else {
                Vec::new()
            });
        }

        let count = if selector == locator::FOLLOW_ITEM[0].selector {
            inner.visible_rows().len()
        } else if selector == inner.container {
            usize::from(inner.page == Page::Following)
        } else if selector == locator::POST_ITEM[0].selector {
            inner.rendered_profile().map(|(_, posts, _)| posts).unwrap_or(0)
        } else if selector == locator::RETRY_AFFORDANCE[0].selector
            && label == locator::RETRY_AFFORDANCE[0].label
        {
            usize::from(inner.rendered_profile().is_some_and(|(_, _, failing)| failing))
        } else {
            0
        };

        Ok((0..count)
            .map(|i| ElementRef {
                label: label.map(String::from),
                ..ElementRef::nth(selector, i)
            })
            .collect())
    }

    async fn rows(
        &self,
        item_selector: &str,
        field_selectors: &[&str],
    ) -> ActuatorResult<Vec<RowSnapshot>> {
        let inner = self.lock();
        if item_selector != locator::FOLLOW_ITEM[0].selector {
            return Ok(Vec::new());
        }
        Ok(inner
            .visible_rows()
            .iter()
            .map(|r| RowSnapshot {
                text: r.text.clone(),
                fields: field_selectors
                    .iter()
                    .map(|f| {
                        if *f == locator::ROW_USERNAME[0].selector {
                            r.handle.clone()
                        } else {
                            None
                        }
                    })
                    .collect(),
            })
            .collect())
    }

    async fn page_text(&self) -> ActuatorResult<String> {
        let inner = self.lock();
        Ok(inner
            .rendered_profile()
            .map(|(text, _, _)| text.to_string())
            .unwrap_or_default())
    }

    async fn click(&self, element: &ElementRef) -> ActuatorResult<()> {
        let mut inner = self.lock();
        let index = inner.row_index(element)?;
        let row = inner.rows.remove(index);
        inner.visible = inner.visible.saturating_sub(1);
        inner.clicks.push(row.handle.unwrap_or_default());

        let before = inner.rows.len();
        inner.rows.retain(|r| !r.vanishing);
        let vanished = before - inner.rows.len();
        inner.visible = inner.visible.saturating_sub(vanished);
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> ActuatorResult<()> {
        let mut inner = self.lock();
        inner.row_index(element)?;

        let arrivals = std::mem::take(&mut inner.arrivals);
        for row in arrivals.into_iter().rev() {
            inner.rows.insert(0, row);
            inner.visible += 1;
        }
        Ok(())
    }

    async fn scroll_to_end(
        &self,
        container: Option<&str>,
        item_selector: &str,
    ) -> ActuatorResult<usize> {
        let mut inner = self.lock();
        inner.scroll_containers.push(container.map(String::from));
        if inner.page != Page::Following {
            return Ok(0);
        }
        inner.visible = inner.visible.saturating_add(inner.page_size).min(inner.rows.len());
        Ok(if item_selector == locator::FOLLOW_ITEM[0].selector {
            inner.visible
        } else {
            0
        })
    }

    async fn export_session(&self) -> ActuatorResult<String> {
        Ok(self.lock().session.clone())
    }

    async fn import_session(&self, blob: &str) -> ActuatorResult<()> {
        self.lock().imported = Some(blob.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    /// Never returns from the `n`-th sleep of this duration.
    stall: Option<(Duration, usize)>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hangs forever on the `nth` sleep of `duration`, like a run killed mid-wait.
    pub fn stalling_at(duration: Duration, nth: usize) -> Self {
        Self {
            stall: Some((duration, nth)),
            ..Self::default()
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_of(&self, duration: Duration) -> usize {
        self.sleeps().into_iter().filter(|d| *d == duration).count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let seen = {
            let mut sleeps = self.sleeps.lock().unwrap_or_else(|e| e.into_inner());
            sleeps.push(duration);
            sleeps.iter().filter(|d| **d == duration).count()
        };
        if self.stall == Some((duration, seen)) {
            std::future::pending::<()>().await;
        }
    }
}
