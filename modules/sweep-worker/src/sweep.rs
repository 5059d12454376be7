use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use sweep_common::{ClassificationVerdict, Config, Detection, SweepError};

use crate::actuator::Actuator;
use crate::audit::AuditSink;
use crate::classifier::Classifier;
use crate::follow_list::FollowList;
use crate::ledger::LedgerStore;
use crate::remediator::Remediator;
use crate::stats::SweepStats;
use crate::throttle::{self, Clock, Sleeper, Throttle};

const PROGRESS_EVERY: u32 = 100;

/// External collaborators, injected so tests can swap in mocks.
#[derive(Clone)]
pub struct SweepDeps {
    pub actuator: Arc<dyn Actuator>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug)]
pub enum SweepOutcome {
    /// The previous run was too recent; nothing was touched.
    Cooldown { next_run: DateTime<Utc> },
    Completed(SweepStats),
}

pub struct Sweep {
    config: Config,
    deps: SweepDeps,
    store: LedgerStore,
    audit: AuditSink,
}

impl Sweep {
    pub fn new(config: Config, deps: SweepDeps) -> Self {
        let store = LedgerStore::new(&config.state_file);
        let audit = AuditSink::new(&config.audit_file);
        Self {
            config,
            deps,
            store,
            audit,
        }
    }

    /// One full run: cooldown gate, enumerate, classify, audit, remediate.
    /// The ledger is saved after every item, so an interrupted run loses at
    /// most the account in flight.
    pub async fn run(&self) -> Result<SweepOutcome> {
        self.restore_session().await?;

        let ledger = self.store.load();
        let now = self.deps.clock.now();

        if !throttle::should_run(&ledger, self.config.cooldown, now) {
            let next_run = throttle::next_run_at(&ledger, self.config.cooldown).unwrap_or(now);
            info!(
                next_run = %next_run,
                hours_left = hours_between(now, next_run),
                "Cooldown active, skipping this run"
            );
            return Ok(SweepOutcome::Cooldown { next_run });
        }

        let actuator = self.deps.actuator.as_ref();
        let follow_list = FollowList::new(actuator, self.deps.sleeper.as_ref(), &self.config);
        let classifier = Classifier::new(actuator, &self.config);
        let mut throttle = Throttle::new(&self.config, self.deps.sleeper.clone());
        let mut stats = SweepStats::default();

        // ---- Enumerate ----

        follow_list
            .open()
            .await
            .context("Failed to open following page")?;
        let mut accounts = follow_list
            .load()
            .await
            .context("Failed to enumerate following list")?;

        stats.accounts_enumerated = accounts.len() as u32;
        stats.unreadable_rows = accounts.iter().filter(|a| !a.has_handle()).count() as u32;

        // ---- Classify ----

        let mut ledger = ledger;
        let mut detections = Vec::new();

        for account in &accounts {
            if account.has_handle() && ledger.is_classified(&account.handle) {
                stats.already_classified += 1;
                continue;
            }

            let verdict = match classifier.local_verdict(account) {
                Some(reason) => ClassificationVerdict::Invalid(reason),
                None => {
                    if stats.profile_checks > 0 {
                        throttle.pause_between_checks().await;
                    }
                    stats.profile_checks += 1;
                    classifier
                        .inspect_profile(&account.handle)
                        .await
                        .into_verdict()
                }
            };
            stats.classified += 1;

            if let ClassificationVerdict::Invalid(reason) = verdict {
                stats.record_invalid(reason);
                info!(
                    handle = account.handle.as_str(),
                    position = account.position,
                    reason = %reason,
                    "Invalid account"
                );
                let detection = Detection {
                    handle: account.handle.clone(),
                    reason,
                    detected_at: self.deps.clock.now(),
                };
                ledger = ledger.flag(&detection);
                detections.push(detection);
            }

            ledger = ledger.mark_classified(&account.handle);
            self.store.save(&ledger);

            if stats.classified % PROGRESS_EVERY == 0 {
                info!(
                    classified = stats.classified,
                    total = stats.accounts_enumerated,
                    invalid = stats.invalid_found,
                    "Classification progress"
                );
            }
        }

        info!(
            classified = stats.classified,
            skipped = stats.already_classified,
            invalid = stats.invalid_found,
            "Classification complete"
        );

        match self.audit.append(&detections) {
            Ok(rows) => stats.audit_rows = rows as u32,
            Err(e) => warn!(error = %e, "Failed to write audit export, continuing"),
        }

        // ---- Remediate ----

        // Profile checks navigated away; the rows must be read again.
        if stats.profile_checks > 0 {
            follow_list
                .open()
                .await
                .context("Failed to return to following page")?;
            accounts = follow_list
                .load()
                .await
                .context("Failed to re-enumerate following list")?;
        }

        let candidates = ledger.remediation_candidates(&accounts, self.config.dry_run_reeligible);
        stats.eligible = candidates.len() as u32;

        let remediator = Remediator::new(
            actuator,
            &follow_list,
            &throttle,
            &self.store,
            self.deps.clock.as_ref(),
            &self.config,
        );
        let (ledger, report) = remediator
            .remediate(ledger, &candidates, self.config.batch_size)
            .await;

        stats.attempted = report.attempted() as u32;
        stats.unfollowed = report.unfollowed() as u32;
        stats.dry_run = report.dry_run() as u32;
        stats.skipped = report.skipped() as u32;
        stats.lifetime_unfollowed = ledger.remediations.len() as u32;

        if let Some(next_run) = throttle::next_run_at(&ledger, self.config.cooldown) {
            info!(
                next_run = %next_run,
                hours_left = hours_between(self.deps.clock.now(), next_run),
                "Next run scheduled"
            );
        }
        let remaining = candidates.len().saturating_sub(report.attempted());
        if remaining > 0 {
            info!(remaining, "Invalid accounts left for later runs");
        }

        self.save_session().await;

        info!(
            total = stats.lifetime_unfollowed,
            "Total accounts unfollowed to date"
        );
        Ok(SweepOutcome::Completed(stats))
    }

    async fn restore_session(&self) -> Result<()> {
        if !self.config.persist_session {
            return Ok(());
        }
        let path = &self.config.session_file;
        let blob = match fs::read_to_string(path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SweepError::Config(format!(
                    "session file {} not found; export a logged-in session first or set PERSIST_SESSION=false",
                    path.display()
                ))
                .into());
            }
            Err(e) => {
                return Err(SweepError::Persistence(format!(
                    "could not read session file {}: {e}",
                    path.display()
                ))
                .into());
            }
        };

        self.deps
            .actuator
            .import_session(&blob)
            .await
            .context("Failed to restore browser session")?;
        info!(path = %path.display(), "Restored browser session");
        Ok(())
    }

    /// Best-effort: a failed export only costs a fresh login next time.
    async fn save_session(&self) {
        if !self.config.persist_session {
            return;
        }
        let path = &self.config.session_file;
        match self.deps.actuator.export_session().await {
            Ok(blob) => match fs::write(path, blob) {
                Ok(()) => info!(path = %path.display(), "Saved browser session"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to save session"),
            },
            Err(e) => warn!(error = %e, "Failed to export browser session"),
        }
    }
}

/// Whole tenths of an hour, never negative.
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_seconds().max(0) as f64 / 360.0).round() / 10.0
}
