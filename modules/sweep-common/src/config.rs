use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::SweepError;

const DEFAULT_COOLDOWN_SECS: i64 = 10_800;
const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_ACTION_DELAY_SECS: u64 = 5;
const DEFAULT_CHECK_DELAY_SECS: f64 = 3.0;
const DEFAULT_CHECK_JITTER: f64 = 0.3;
const DEFAULT_INTERACTION_TIMEOUT_SECS: u64 = 30;

/// Upper bounds on accepted values; anything larger falls back to the default.
const MAX_COOLDOWN_SECS: i64 = 365 * 86_400;
const MAX_DELAY_SECS: u64 = 86_400;
const MAX_INTERACTION_TIMEOUT_SECS: u64 = 3_600;

/// Application configuration loaded from environment variables.
/// Read once at startup; immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // Account
    pub username: String,
    pub following_url: String,
    /// `{handle}` is replaced with the account handle.
    pub profile_url_template: String,

    // Pacing
    pub cooldown: chrono::Duration,
    pub batch_size: usize,
    pub action_delay: Duration,
    pub check_delay: Duration,
    /// Fraction of `check_delay`, applied as ±jitter.
    pub check_jitter: f64,
    pub jitter_seed: Option<u64>,
    pub interaction_timeout: Duration,

    // Behavior
    /// 0 = unlimited.
    pub max_accounts: usize,
    pub dry_run: bool,
    pub dry_run_reeligible: bool,

    // Browser
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    pub headless: bool,
    pub persist_session: bool,

    // Files
    pub state_file: PathBuf,
    pub audit_file: PathBuf,
    pub session_file: PathBuf,
}

impl Config {
    /// Defaults for everything except the account itself.
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            following_url: format!("https://www.tiktok.com/@{username}/following"),
            profile_url_template: "https://www.tiktok.com/@{handle}".to_string(),
            cooldown: chrono::Duration::seconds(DEFAULT_COOLDOWN_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            action_delay: Duration::from_secs(DEFAULT_ACTION_DELAY_SECS),
            check_delay: Duration::from_secs_f64(DEFAULT_CHECK_DELAY_SECS),
            check_jitter: DEFAULT_CHECK_JITTER,
            jitter_seed: None,
            interaction_timeout: Duration::from_secs(DEFAULT_INTERACTION_TIMEOUT_SECS),
            max_accounts: 0,
            dry_run: false,
            dry_run_reeligible: false,
            browserless_url: "http://localhost:3000".to_string(),
            browserless_token: None,
            headless: false,
            persist_session: true,
            state_file: PathBuf::from("state.json"),
            audit_file: PathBuf::from("invalid_accounts.csv"),
            session_file: PathBuf::from("session.json"),
        }
    }

    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, SweepError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    /// Malformed optional values fall back to defaults with a warning; only a
    /// missing account name is fatal.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SweepError> {
        let username = lookup("TIKTOK_USERNAME")
            .map(|u| crate::normalize_handle(&u))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                SweepError::Config("TIKTOK_USERNAME environment variable is required".to_string())
            })?;

        let mut config = Self::new(&username);

        if let Some(url) = non_empty(lookup("FOLLOWING_URL")) {
            config.following_url = url;
        }
        if let Some(template) = non_empty(lookup("PROFILE_URL_TEMPLATE")) {
            if template.contains("{handle}") {
                config.profile_url_template = template;
            } else {
                warn!(
                    key = "PROFILE_URL_TEMPLATE",
                    value = template.as_str(),
                    "Template has no {{handle}} placeholder, using default"
                );
            }
        }

        let cooldown = parsed(&lookup, "UNFOLLOW_DELAY", DEFAULT_COOLDOWN_SECS, |v| {
            (0..=MAX_COOLDOWN_SECS).contains(v)
        });
        config.cooldown = chrono::Duration::seconds(cooldown);
        config.batch_size = parsed(&lookup, "BATCH_SIZE", DEFAULT_BATCH_SIZE, |v| *v >= 1);
        config.action_delay = Duration::from_secs(parsed(
            &lookup,
            "ACTION_DELAY",
            DEFAULT_ACTION_DELAY_SECS,
            |v| *v <= MAX_DELAY_SECS,
        ));
        config.check_delay = Duration::from_secs_f64(parsed(
            &lookup,
            "CHECK_DELAY",
            DEFAULT_CHECK_DELAY_SECS,
            |v| (0.0..=MAX_DELAY_SECS as f64).contains(v),
        ));
        config.check_jitter = parsed(&lookup, "CHECK_JITTER", DEFAULT_CHECK_JITTER, |v| {
            (0.0..=1.0).contains(v)
        });
        config.interaction_timeout = Duration::from_secs(parsed(
            &lookup,
            "INTERACTION_TIMEOUT",
            DEFAULT_INTERACTION_TIMEOUT_SECS,
            |v| (1..=MAX_INTERACTION_TIMEOUT_SECS).contains(v),
        ));
        config.max_accounts = parsed(&lookup, "MAX_ACCOUNTS", 0usize, |_| true);
        config.jitter_seed = lookup("JITTER_SEED").and_then(|s| s.trim().parse().ok());

        config.dry_run = flag(&lookup, "DRY_RUN", false);
        config.dry_run_reeligible = flag(&lookup, "DRY_RUN_REELIGIBLE", false);
        config.headless = flag(&lookup, "HEADLESS", false);
        config.persist_session = flag(&lookup, "PERSIST_SESSION", true);

        if let Some(url) = non_empty(lookup("BROWSERLESS_URL")) {
            config.browserless_url = url;
        }
        config.browserless_token = non_empty(lookup("BROWSERLESS_TOKEN"));

        if let Some(path) = non_empty(lookup("STATE_FILE")) {
            config.state_file = PathBuf::from(path);
        }
        if let Some(path) = non_empty(lookup("AUDIT_FILE")) {
            config.audit_file = PathBuf::from(path);
        }
        if let Some(path) = non_empty(lookup("SESSION_FILE")) {
            config.session_file = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Profile URL for one account.
    pub fn profile_url(&self, handle: &str) -> String {
        self.profile_url_template.replace("{handle}", handle)
    }

    pub fn log_redacted(&self) {
        info!("Config loaded:");
        info!("  TIKTOK_USERNAME: {}", self.username);
        info!("  FOLLOWING_URL: {}", self.following_url);
        info!(
            "  UNFOLLOW_DELAY: {}s ({:.1}h)",
            self.cooldown.num_seconds(),
            self.cooldown.num_seconds() as f64 / 3600.0
        );
        info!("  BATCH_SIZE: {}", self.batch_size);
        info!("  ACTION_DELAY: {}s", self.action_delay.as_secs());
        info!(
            "  CHECK_DELAY: {:.1}s ±{:.0}%",
            self.check_delay.as_secs_f64(),
            self.check_jitter * 100.0
        );
        info!("  MAX_ACCOUNTS: {}", self.max_accounts);
        info!("  DRY_RUN: {}", self.dry_run);
        info!("  DRY_RUN_REELIGIBLE: {}", self.dry_run_reeligible);
        info!("  HEADLESS: {}", self.headless);
        info!("  PERSIST_SESSION: {}", self.persist_session);
        info!("  BROWSERLESS_URL: {}", self.browserless_url);
        info!(
            "  BROWSERLESS_TOKEN: {}",
            preview_opt(&self.browserless_token)
        );
        info!("  STATE_FILE: {}", self.state_file.display());
        info!("  AUDIT_FILE: {}", self.audit_file.display());
        info!("  SESSION_FILE: {}", self.session_file.display());
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(key, value = raw.as_str(), default = %default, "Invalid value, using default");
            default
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        None => default,
    }
}

fn preview_opt(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => {
            let head: String = v.chars().take(5).collect();
            format!("{head}...({} chars)", v.chars().count())
        }
        _ => "<not set>".to_string(),
    }
}
