use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// One followed account as observed in the current enumeration.
///
/// `position` is only meaningful against the enumeration it came from. The
/// list can reflow between classification and remediation, so anything that
/// acts on the account must re-resolve it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub handle: String,
    pub raw_text: String,
    pub position: usize,
}

impl AccountRecord {
    pub fn new(handle: impl Into<String>, raw_text: impl Into<String>, position: usize) -> Self {
        Self {
            handle: normalize_handle(&handle.into()),
            raw_text: raw_text.into(),
            position,
        }
    }

    /// Accounts whose handle could not be read are never written to the ledger.
    pub fn has_handle(&self) -> bool {
        !self.handle.is_empty()
    }
}

/// Strip surrounding whitespace and a single leading `@`.
/// "@someone " → "someone"
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).trim().to_string()
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Why an account was judged invalid. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Auto-assigned identity that was never customized (`user` + digits).
    DefaultUsername,
    /// The row rendered without a readable username.
    MissingUsername,
    AccountNotFound,
    BannedAccount,
    /// Profile loaded but shows zero posts.
    NoContent,
}

impl InvalidReason {
    /// Human-readable label, as written to the audit export.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DefaultUsername => "Default username",
            Self::MissingUsername => "Missing username",
            Self::AccountNotFound => "Account not found",
            Self::BannedAccount => "Banned account",
            Self::NoContent => "No content",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationVerdict {
    Valid,
    Invalid(InvalidReason),
}

impl ClassificationVerdict {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(*reason),
        }
    }
}

/// An invalid verdict, stamped with the handle and the instant it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub handle: String,
    pub reason: InvalidReason,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_at_and_whitespace() {
        assert_eq!(normalize_handle("  @someone "), "someone");
        assert_eq!(normalize_handle("plain"), "plain");
        assert_eq!(normalize_handle("@"), "");
    }

    #[test]
    fn only_invalid_verdicts_carry_a_reason() {
        assert_eq!(ClassificationVerdict::Valid.reason(), None);
        let v = ClassificationVerdict::Invalid(InvalidReason::NoContent);
        assert!(v.is_invalid());
        assert_eq!(v.reason(), Some(InvalidReason::NoContent));
    }

    #[test]
    fn reason_display_uses_label() {
        assert_eq!(InvalidReason::BannedAccount.to_string(), "Banned account");
    }
}
