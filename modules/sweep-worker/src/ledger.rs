//! Progress ledger: the only state that survives between runs.
//!
//! `ProgressLedger` is a plain snapshot. Every mutation consumes the old
//! snapshot and returns the next one; writing it out is a separate step owned
//! by `LedgerStore`, so callers persist after each item explicitly.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sweep_common::{AccountRecord, Detection, InvalidReason, SweepError};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationEvent {
    #[serde(rename = "username")]
    pub handle: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// An invalid verdict remembered so the account stays eligible for
/// remediation in later runs without being classified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedAccount {
    #[serde(rename = "username")]
    pub handle: String,
    pub reason: InvalidReason,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLedger {
    #[serde(default, with = "timestamp::option")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(rename = "processed_accounts", default)]
    pub classified: BTreeSet<String>,
    #[serde(rename = "unfollowed_accounts", default)]
    pub remediations: Vec<RemediationEvent>,
    #[serde(rename = "flagged_accounts", default)]
    pub flagged: Vec<FlaggedAccount>,
    #[serde(rename = "dry_run_accounts", default)]
    pub dry_run: BTreeSet<String>,
}

/// An invalid account eligible for remediation this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub account: AccountRecord,
    pub reason: InvalidReason,
}

impl ProgressLedger {
    pub fn is_classified(&self, handle: &str) -> bool {
        self.classified.contains(handle)
    }

    pub fn is_remediated(&self, handle: &str) -> bool {
        self.remediations.iter().any(|e| e.handle == handle)
    }

    pub fn flagged_reason(&self, handle: &str) -> Option<InvalidReason> {
        self.flagged
            .iter()
            .find(|f| f.handle == handle)
            .map(|f| f.reason)
    }

    #[must_use]
    pub fn mark_classified(mut self, handle: &str) -> Self {
        if !handle.is_empty() {
            self.classified.insert(handle.to_string());
        }
        self
    }

    #[must_use]
    pub fn flag(mut self, detection: &Detection) -> Self {
        if !detection.handle.is_empty() && self.flagged_reason(&detection.handle).is_none() {
            self.flagged.push(FlaggedAccount {
                handle: detection.handle.clone(),
                reason: detection.reason,
                timestamp: detection.detected_at,
            });
        }
        self
    }

    /// No-op if the handle already has a remediation event.
    #[must_use]
    pub fn record_remediation(mut self, handle: &str, at: DateTime<Utc>) -> Self {
        if !handle.is_empty() && !self.is_remediated(handle) {
            self.remediations.push(RemediationEvent {
                handle: handle.to_string(),
                timestamp: at,
            });
        }
        self.dry_run.remove(handle);
        self
    }

    #[must_use]
    pub fn record_dry_run(mut self, handle: &str) -> Self {
        if !handle.is_empty() {
            self.dry_run.insert(handle.to_string());
        }
        self
    }

    /// Only ever moves forward.
    #[must_use]
    pub fn advance_last_run(mut self, at: DateTime<Utc>) -> Self {
        self.last_run = Some(match self.last_run {
            Some(prev) if prev > at => prev,
            _ => at,
        });
        self
    }

    /// Flagged, not yet remediated accounts present in `accounts`, in
    /// `accounts` order. Dry-run handles are excluded unless `dry_run_reeligible`.
    pub fn remediation_candidates(
        &self,
        accounts: &[AccountRecord],
        dry_run_reeligible: bool,
    ) -> Vec<Candidate> {
        accounts
            .iter()
            .filter(|a| a.has_handle() && !self.is_remediated(&a.handle))
            .filter(|a| dry_run_reeligible || !self.dry_run.contains(&a.handle))
            .filter_map(|a| {
                self.flagged_reason(&a.handle).map(|reason| Candidate {
                    account: a.clone(),
                    reason,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a corrupt ledger is moved aside to.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// Load the ledger. Never fails: a missing file yields an empty ledger, a
    /// corrupt one is renamed to `<path>.backup` and an empty ledger returned.
    pub fn load(&self) -> ProgressLedger {
        match self.try_load() {
            Ok(Some(ledger)) => {
                info!(
                    path = %self.path.display(),
                    classified = ledger.classified.len(),
                    remediated = ledger.remediations.len(),
                    "Loaded ledger"
                );
                ledger
            }
            Ok(None) => {
                info!(path = %self.path.display(), "No ledger found, starting fresh");
                ProgressLedger::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt ledger, starting fresh");
                self.quarantine();
                ProgressLedger::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<ProgressLedger>, SweepError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| SweepError::CorruptState(format!("unreadable: {e}")))?;
        let ledger = serde_json::from_str(&raw)
            .map_err(|e| SweepError::CorruptState(e.to_string()))?;
        Ok(Some(ledger))
    }

    fn quarantine(&self) {
        let backup = self.backup_path();
        match fs::rename(&self.path, &backup) {
            Ok(()) => info!(backup = %backup.display(), "Old ledger backed up"),
            Err(e) => warn!(error = %e, "Could not back up corrupt ledger"),
        }
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn try_save(&self, ledger: &ProgressLedger) -> Result<(), SweepError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let persistence = |e: std::io::Error| SweepError::Persistence(e.to_string());

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persistence)?;
        serde_json::to_writer_pretty(&mut tmp, ledger)
            .map_err(|e| SweepError::Persistence(e.to_string()))?;
        tmp.write_all(b"\n").map_err(persistence)?;
        tmp.as_file().sync_all().map_err(persistence)?;
        tmp.persist(&self.path)
            .map_err(|e| SweepError::Persistence(e.error.to_string()))?;
        Ok(())
    }

    /// Best-effort save. Failure is logged and the run carries on with the
    /// in-memory ledger.
    pub fn save(&self, ledger: &ProgressLedger) -> bool {
        match self.try_save(ledger) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Ledger saved");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not save ledger");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// RFC 3339 on write. On read, RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// (taken as UTC).
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|ndt| ndt.and_utc())
            })
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_str(&dt.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp: {raw}"))
                }),
            }
        }
    }
}
