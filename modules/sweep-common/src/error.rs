use std::time::Duration;

use thiserror::Error;

/// Failure while talking to the browser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteractionError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("Timed out after {}s: {what}", .after.as_secs())]
    Timeout { after: Duration, what: String },

    #[error("Browser backend error: {0}")]
    Backend(String),
}

impl InteractionError {
    /// Missing elements, stale references and timeouts are expected while the
    /// page is in flux. Backend errors usually mean the browser itself is unwell.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error(transparent)]
    Interaction(#[from] InteractionError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
