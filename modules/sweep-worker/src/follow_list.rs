use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use sweep_common::{normalize_handle, AccountRecord, Config, InteractionError};

use crate::actuator::{Actuator, ActuatorResult, ElementRef, RowSnapshot};
use crate::locator::{self, Locator};
use crate::throttle::Sleeper;

/// Hard ceiling on how many rows are loaded.
pub const MAX_ENUMERATED: usize = 15_000;

/// Unchanged scroll rounds that mean the list is fully loaded.
const STABLE_ROUNDS: u32 = 3;
/// Unchanged rounds tolerated while the list is still empty.
const EMPTY_ROUNDS: u32 = 10;
const SCROLL_SETTLE: Duration = Duration::from_secs(2);
const PROGRESS_EVERY: usize = 100;

/// First `@handle` token in a row's text.
static AT_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_.]{2,})").expect("valid regex"));

/// The following list, as rendered by the actuator.
pub struct FollowList<'a> {
    actuator: &'a dyn Actuator,
    sleeper: &'a dyn Sleeper,
    config: &'a Config,
}

impl<'a> FollowList<'a> {
    pub fn new(actuator: &'a dyn Actuator, sleeper: &'a dyn Sleeper, config: &'a Config) -> Self {
        Self {
            actuator,
            sleeper,
            config,
        }
    }

    /// Navigate to the following page and wait for the first row.
    pub async fn open(&self) -> ActuatorResult<()> {
        let timeout = self.config.interaction_timeout;
        info!(url = self.config.following_url.as_str(), "Opening following page");

        self.actuator
            .navigate(&self.config.following_url, timeout)
            .await?;
        locator::wait_any(self.actuator, locator::FOLLOW_ITEM, timeout).await?;

        let current = self.actuator.current_url().await?;
        if !current.to_lowercase().contains("/following") {
            warn!(
                url = current.as_str(),
                "Current page does not look like a following page, continuing anyway"
            );
        }
        Ok(())
    }

    /// Scroll until every row is loaded, then read each row's handle and text.
    pub async fn load(&self) -> ActuatorResult<Vec<AccountRecord>> {
        let item = self.scroll_until_loaded().await?;
        let fields = username_fields();

        let rows = self.actuator.rows(item.selector, &fields).await?;

        let accounts: Vec<AccountRecord> = rows
            .into_iter()
            .take(self.limit())
            .enumerate()
            .map(|(position, row)| {
                let handle = row_handle(&row).unwrap_or_default();
                AccountRecord::new(handle, row.text, position)
            })
            .collect();

        let unreadable = accounts.iter().filter(|a| !a.has_handle()).count();
        if unreadable > 0 {
            warn!(unreadable, "Some rows have no readable username");
        }
        info!(total = accounts.len(), "Following list enumerated");
        Ok(accounts)
    }

    /// Scroll the list to the bottom until the row count stops changing.
    /// Returns the row strategy that matched.
    async fn scroll_until_loaded(&self) -> ActuatorResult<&'static Locator> {
        let container = self.container().await;
        let item = match locator::find_all_first(self.actuator, None, locator::FOLLOW_ITEM).await? {
            Some((matched, _)) => matched,
            None => &locator::FOLLOW_ITEM[0],
        };
        let cap = self.limit();

        let mut previous = 0usize;
        let mut unchanged = 0u32;

        loop {
            let count = self.actuator.scroll_to_end(container, item.selector).await?;
            self.sleeper.sleep(SCROLL_SETTLE).await;

            if count == previous {
                unchanged += 1;
            } else {
                unchanged = 0;
                if count / PROGRESS_EVERY != previous / PROGRESS_EVERY {
                    info!(loaded = count, "Loading following list...");
                }
            }
            previous = count;

            if count == 0 && unchanged >= EMPTY_ROUNDS {
                warn!("No rows loaded after repeated scrolling; is the following page open?");
                break;
            }
            if count > 0 && unchanged >= STABLE_ROUNDS {
                info!(total = count, "Finished loading following list");
                break;
            }
            if count >= cap {
                info!(total = count, cap, "Row cap reached, stopping scroll");
                break;
            }
        }

        Ok(item)
    }

    /// Scrollable container, first matching strategy wins. `None` scrolls the window.
    async fn container(&self) -> Option<&'static str> {
        match locator::find_all_first(self.actuator, None, locator::LIST_CONTAINER).await {
            Ok(Some((matched, _))) => {
                debug!(strategy = matched.name, "List container found");
                Some(matched.selector)
            }
            Ok(None) => {
                debug!("No list container matched, scrolling the window");
                None
            }
            Err(e) => {
                debug!(error = %e, "List container lookup failed, scrolling the window");
                None
            }
        }
    }

    fn limit(&self) -> usize {
        match self.config.max_accounts {
            0 => MAX_ENUMERATED,
            n => n.min(MAX_ENUMERATED),
        }
    }

    /// Find the row for `account` in the live list. Tries the recorded position
    /// first, then searches by handle; the list may have reflowed since.
    /// The returned ref still checks the handle when it is acted on.
    pub async fn resolve(&self, account: &AccountRecord) -> ActuatorResult<ElementRef> {
        if !account.has_handle() {
            return Err(InteractionError::StaleReference(format!(
                "row {} has no handle to verify against",
                account.position
            )));
        }
        let fields = username_fields();

        for item in locator::FOLLOW_ITEM {
            let rows = self.actuator.rows(item.selector, &fields).await?;
            let matches =
                |row: &RowSnapshot| row_handle(row).as_deref() == Some(account.handle.as_str());

            let index = if rows.get(account.position).is_some_and(matches) {
                Some(account.position)
            } else {
                rows.iter().position(matches)
            };

            if let Some(index) = index {
                if index != account.position {
                    debug!(
                        handle = account.handle.as_str(),
                        from = account.position,
                        to = index,
                        "Row moved since enumeration"
                    );
                }
                return Ok(ElementRef::nth(item.selector, index).showing(&account.handle, &fields));
            }
        }

        Err(InteractionError::StaleReference(format!(
            "@{} is no longer in the list",
            account.handle
        )))
    }
}

fn username_fields() -> Vec<&'static str> {
    locator::ROW_USERNAME.iter().map(|l| l.selector).collect()
}

/// First non-empty username field, else the first `@handle` in the row text.
fn row_handle(row: &RowSnapshot) -> Option<String> {
    row.fields
        .iter()
        .flatten()
        .map(|v| normalize_handle(v))
        .find(|v| !v.is_empty())
        .or_else(|| handle_from_text(&row.text))
}

fn handle_from_text(text: &str) -> Option<String> {
    AT_HANDLE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
