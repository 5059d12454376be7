// Named locator strategies for the parts of the page the sweep touches.
//
// Each target is an ordered list; the first strategy that matches wins.
// Selector churn on the site only ever touches this file.

use std::time::Duration;

use tracing::debug;

use crate::actuator::{Actuator, ActuatorResult, ElementRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub name: &'static str,
    pub selector: &'static str,
    pub label: Option<&'static str>,
}

const fn css(name: &'static str, selector: &'static str) -> Locator {
    Locator {
        name,
        selector,
        label: None,
    }
}

const fn labelled(name: &'static str, selector: &'static str, label: &'static str) -> Locator {
    Locator {
        name,
        selector,
        label: Some(label),
    }
}

/// Scrollable container of the following list.
pub const LIST_CONTAINER: &[Locator] = &[
    css("e2e item list", r#"[data-e2e="following-item-list"]"#),
    css("legacy list class", ".following-list"),
];

/// One row of the following list.
pub const FOLLOW_ITEM: &[Locator] = &[
    css("e2e following item", r#"[data-e2e="following-item"]"#),
    css("user list row", r#"[data-e2e="user-list"] li"#),
];

/// Username inside a row.
pub const ROW_USERNAME: &[Locator] = &[
    css("e2e following username", r#"[data-e2e="following-username"]"#),
    css("e2e user title", r#"[data-e2e="user-title"]"#),
];

/// The control that unfollows the account in a row.
pub const UNFOLLOW_CONTROL: &[Locator] = &[
    labelled("following button", "button", "Following"),
    labelled("e2e follow button", r#"[data-e2e="follow-button"]"#, "Following"),
];

/// Present once a profile page has finished rendering, whatever its state.
pub const PROFILE_SETTLED: &[Locator] = &[
    css("e2e user page", r#"[data-e2e="user-page"]"#),
    css("e2e user title", r#"[data-e2e="user-title"]"#),
    css("main content", "main"),
];

/// Retry/refresh prompt shown when a profile fails to load.
pub const RETRY_AFFORDANCE: &[Locator] = &[
    labelled("refresh button", "button", "Refresh"),
    labelled("retry button", "button", "Retry"),
];

/// One post tile on a profile.
pub const POST_ITEM: &[Locator] = &[
    css("e2e post item", r#"[data-e2e="user-post-item"]"#),
    css("post item list child", r#"[data-e2e="user-post-item-list"] > div"#),
];

/// Comma-joined selector matching any strategy. Labels are ignored.
pub fn any_of(strategies: &[Locator]) -> String {
    strategies
        .iter()
        .map(|l| l.selector)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wait until any strategy matches.
pub async fn wait_any(
    actuator: &dyn Actuator,
    strategies: &[Locator],
    timeout: Duration,
) -> ActuatorResult<()> {
    actuator.wait_for(&any_of(strategies), timeout).await
}

/// All matches of the first strategy that matches anything.
///
/// A strategy that errors is skipped. If nothing matches and at least one
/// strategy errored, the last error is returned.
pub async fn find_all_first(
    actuator: &dyn Actuator,
    scope: Option<&ElementRef>,
    strategies: &'static [Locator],
) -> ActuatorResult<Option<(&'static Locator, Vec<ElementRef>)>> {
    let mut last_err = None;
    let mut any_ok = false;

    for locator in strategies {
        match actuator.find_all(scope, locator.selector, locator.label).await {
            Ok(found) if !found.is_empty() => {
                debug!(strategy = locator.name, matches = found.len(), "Locator matched");
                return Ok(Some((locator, found)));
            }
            Ok(_) => any_ok = true,
            Err(e) => {
                debug!(strategy = locator.name, error = %e, "Locator failed");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) if !any_ok => Err(e),
        _ => Ok(None),
    }
}

/// First match of the first strategy that matches anything.
pub async fn find_first(
    actuator: &dyn Actuator,
    scope: Option<&ElementRef>,
    strategies: &'static [Locator],
) -> ActuatorResult<Option<ElementRef>> {
    Ok(find_all_first(actuator, scope, strategies)
        .await?
        .and_then(|(_, found)| found.into_iter().next()))
}

/// Match count of the first strategy that matches anything (0 if none do).
pub async fn count_first(
    actuator: &dyn Actuator,
    strategies: &'static [Locator],
) -> ActuatorResult<usize> {
    Ok(find_all_first(actuator, None, strategies)
        .await?
        .map(|(_, found)| found.len())
        .unwrap_or(0))
}
