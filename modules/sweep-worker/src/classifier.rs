// Decides whether a followed account is dead.
//
// Checks run cheapest first and stop at the first conclusive signal:
//   1. handle shape (default `user` + digits, missing username)
//   2. row text markers already visible in the list
//   3. profile fetch, retried once on a load failure
//   4. not-found / banned markers in the profile
//   5. zero posts
// Anything inconclusive, including every error from steps 3-5, is Valid.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use sweep_common::{AccountRecord, ClassificationVerdict, Config, InvalidReason};

use crate::actuator::{Actuator, ActuatorResult};
use crate::locator;

/// Profile loads attempted before giving up (the first try plus one retry).
const PROFILE_ATTEMPTS: u32 = 2;

const NOT_FOUND_MARKERS: &[&str] = &[
    "couldn't find this account",
    "account not found",
    "user not found",
    "content is unavailable",
];

const BANNED_MARKERS: &[&str] = &["account banned", "banned account", "this account was banned"];

/// Handles that render as nothing useful.
const BLANK_HANDLES: &[&str] = &["", "_"];

/// Auto-assigned handles: `user` followed only by digits.
static DEFAULT_USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^user\d+$").expect("valid regex"));

/// Outcome of evaluating one account, before collapsing to a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Valid,
    Invalid(InvalidReason),
    /// No confident signal either way.
    Indeterminate(String),
}

impl Assessment {
    /// Indeterminate collapses to Valid.
    pub fn into_verdict(self) -> ClassificationVerdict {
        match self {
            Assessment::Invalid(reason) => ClassificationVerdict::Invalid(reason),
            Assessment::Valid | Assessment::Indeterminate(_) => ClassificationVerdict::Valid,
        }
    }
}

/// What a rendered profile looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub text: String,
    pub post_count: usize,
}

pub struct Classifier<'a> {
    actuator: &'a dyn Actuator,
    config: &'a Config,
}

impl<'a> Classifier<'a> {
    pub fn new(actuator: &'a dyn Actuator, config: &'a Config) -> Self {
        Self { actuator, config }
    }

    /// Full classification: local checks, then the profile.
    pub async fn classify(&self, account: &AccountRecord) -> ClassificationVerdict {
        if let Some(reason) = self.local_verdict(account) {
            return ClassificationVerdict::Invalid(reason);
        }
        self.inspect_profile(&account.handle).await.into_verdict()
    }

    /// Checks that need nothing beyond the enumeration itself.
    pub fn local_verdict(&self, account: &AccountRecord) -> Option<InvalidReason> {
        if BLANK_HANDLES.contains(&account.handle.as_str()) {
            return Some(InvalidReason::MissingUsername);
        }
        if DEFAULT_USERNAME.is_match(&account.handle) {
            return Some(InvalidReason::DefaultUsername);
        }
        marker_reason(&account.raw_text)
    }

    /// Fetch the profile and judge it. Never errors: failures are Indeterminate.
    pub async fn inspect_profile(&self, handle: &str) -> Assessment {
        match self.fetch_profile(handle).await {
            Ok(Some(snapshot)) => judge(&snapshot),
            Ok(None) => {
                warn!(handle, "Profile failed to load after retry, assuming valid");
                Assessment::Indeterminate("profile failed to load".to_string())
            }
            Err(e) => {
                warn!(handle, error = %e, "Profile check failed, assuming valid");
                Assessment::Indeterminate(e.to_string())
            }
        }
    }

    async fn fetch_profile(&self, handle: &str) -> ActuatorResult<Option<ProfileSnapshot>> {
        let url = self.config.profile_url(handle);
        let timeout: Duration = self.config.interaction_timeout;

        for attempt in 1..=PROFILE_ATTEMPTS {
            debug!(handle, attempt, "Loading profile");
            self.actuator.navigate(&url, timeout).await?;
            locator::wait_any(self.actuator, locator::PROFILE_SETTLED, timeout).await?;

            if locator::find_first(self.actuator, None, locator::RETRY_AFFORDANCE)
                .await?
                .is_some()
            {
                info!(handle, attempt, "Profile shows a retry prompt");
                continue;
            }

            let text = self.actuator.page_text().await?;
            let post_count = locator::count_first(self.actuator, locator::POST_ITEM).await?;
            return Ok(Some(ProfileSnapshot { text, post_count }));
        }

        Ok(None)
    }
}

/// Steps 4-5 against a loaded profile.
pub fn judge(snapshot: &ProfileSnapshot) -> Assessment {
    if let Some(reason) = marker_reason(&snapshot.text) {
        return Assessment::Invalid(reason);
    }
    if snapshot.post_count == 0 {
        return Assessment::Invalid(InvalidReason::NoContent);
    }
    Assessment::Valid
}

fn marker_reason(text: &str) -> Option<InvalidReason> {
    let lower = text.to_lowercase();
    if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(InvalidReason::AccountNotFound);
    }
    if BANNED_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(InvalidReason::BannedAccount);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(text: &str, posts: usize) -> ProfileSnapshot {
        ProfileSnapshot {
            text: text.to_string(),
            post_count: posts,
        }
    }

    #[test]
    fn default_pattern_matches_only_prefix_plus_digits() {
        let re = &*DEFAULT_USERNAME;
        assert!(re.is_match("user48213"));
        assert!(re.is_match("user1234567890123"));
        assert!(!re.is_match("user"));
        assert!(!re.is_match("username"));
        assert!(!re.is_match("user123abc"));
        assert!(!re.is_match("superuser123"));
    }

    #[test]
    fn not_found_marker_wins_over_post_count() {
        assert_eq!(
            judge(&snapshot("Couldn't find this account", 0)),
            Assessment::Invalid(InvalidReason::AccountNotFound)
        );
    }

    #[test]
    fn banned_marker_is_detected() {
        assert_eq!(
            judge(&snapshot("This account was banned due to violations", 3)),
            Assessment::Invalid(InvalidReason::BannedAccount)
        );
    }

    #[test]
    fn zero_posts_is_no_content() {
        assert_eq!(
            judge(&snapshot("Some bio", 0)),
            Assessment::Invalid(InvalidReason::NoContent)
        );
    }

    #[test]
    fn profile_with_posts_is_valid() {
        assert_eq!(judge(&snapshot("Some bio", 12)), Assessment::Valid);
    }

    #[test]
    fn indeterminate_collapses_to_valid() {
        assert_eq!(
            Assessment::Indeterminate("timeout".into()).into_verdict(),
            ClassificationVerdict::Valid
        );
    }

    #[test]
    fn banned_substring_in_a_name_is_not_a_marker() {
        assert_eq!(marker_reason("bannedcats · 12 videos"), None);
    }
}
