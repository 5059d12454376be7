use tracing::{info, warn};

use sweep_common::{Config, InteractionError};

use crate::actuator::Actuator;
use crate::follow_list::FollowList;
use crate::ledger::{Candidate, LedgerStore, ProgressLedger};
use crate::locator;
use crate::throttle::{Clock, Throttle};

/// What happened to one attempted account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    Unfollowed,
    /// Everything but the click ran.
    DryRun,
    /// The row could not be found again in the live list.
    Unresolved(String),
    /// The row was found but had no unfollow control.
    ActionTargetMissing,
    /// The browser failed while locating or clicking the control.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct RemediationReport {
    pub outcomes: Vec<(String, RemediationOutcome)>,
}

impl RemediationReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, wanted: fn(&RemediationOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| wanted(o)).count()
    }

    pub fn unfollowed(&self) -> usize {
        self.count(|o| matches!(o, RemediationOutcome::Unfollowed))
    }

    pub fn dry_run(&self) -> usize {
        self.count(|o| matches!(o, RemediationOutcome::DryRun))
    }

    pub fn skipped(&self) -> usize {
        self.attempted() - self.unfollowed() - self.dry_run()
    }
}

pub struct Remediator<'a> {
    actuator: &'a dyn Actuator,
    follow_list: &'a FollowList<'a>,
    throttle: &'a Throttle,
    store: &'a LedgerStore,
    clock: &'a dyn Clock,
    config: &'a Config,
}

impl<'a> Remediator<'a> {
    pub fn new(
        actuator: &'a dyn Actuator,
        follow_list: &'a FollowList<'a>,
        throttle: &'a Throttle,
        store: &'a LedgerStore,
        clock: &'a dyn Clock,
        config: &'a Config,
    ) -> Self {
        Self {
            actuator,
            follow_list,
            throttle,
            store,
            clock,
            config,
        }
    }

    /// Attempt the first `batch_size` candidates in order. The ledger is saved
    /// after every item, and `last_run` advanced once the batch is done (even
    /// when there was nothing to do).
    pub async fn remediate(
        &self,
        mut ledger: ProgressLedger,
        candidates: &[Candidate],
        batch_size: usize,
    ) -> (ProgressLedger, RemediationReport) {
        let batch = &candidates[..batch_size.min(candidates.len())];
        let mut report = RemediationReport::default();

        if self.config.dry_run {
            info!(batch = batch.len(), "Dry run: unfollow clicks are suppressed");
        }
        info!(
            batch = batch.len(),
            eligible = candidates.len(),
            limit = batch_size,
            "Remediating invalid accounts"
        );

        for candidate in batch {
            let handle = candidate.account.handle.clone();
            let outcome = self.remediate_one(candidate).await;

            ledger = ledger.mark_classified(&handle);
            ledger = match outcome {
                RemediationOutcome::Unfollowed => {
                    ledger.record_remediation(&handle, self.clock.now())
                }
                RemediationOutcome::DryRun => ledger.record_dry_run(&handle),
                _ => ledger,
            };
            self.store.save(&ledger);

            // Paced only once the outcome is on disk.
            if matches!(
                outcome,
                RemediationOutcome::Unfollowed | RemediationOutcome::DryRun
            ) {
                self.throttle.pause_after_action().await;
            }
            report.outcomes.push((handle, outcome));
        }

        ledger = ledger.advance_last_run(self.clock.now());
        self.store.save(&ledger);

        info!(
            unfollowed = report.unfollowed(),
            dry_run = report.dry_run(),
            skipped = report.skipped(),
            "Batch complete"
        );
        (ledger, report)
    }

    async fn remediate_one(&self, candidate: &Candidate) -> RemediationOutcome {
        let handle = candidate.account.handle.as_str();

        let row = match self.follow_list.resolve(&candidate.account).await {
            Ok(row) => row,
            Err(e) => {
                warn!(handle, error = %e, "Could not re-locate row, skipping");
                return RemediationOutcome::Unresolved(e.to_string());
            }
        };

        let control = match locator::find_first(self.actuator, Some(&row), locator::UNFOLLOW_CONTROL)
            .await
        {
            Ok(Some(control)) => control,
            Ok(None) => {
                warn!(handle, "No unfollow control in row, skipping");
                return RemediationOutcome::ActionTargetMissing;
            }
            Err(e) => {
                warn!(handle, error = %e, "Could not locate unfollow control, skipping");
                return RemediationOutcome::Failed(e.to_string());
            }
        };

        if let Err(e) = self.actuator.scroll_into_view(&row).await {
            warn!(handle, error = %e, "Could not scroll row into view, skipping");
            return RemediationOutcome::Failed(e.to_string());
        }
        self.throttle.settle().await;

        if self.config.dry_run {
            info!(handle, reason = %candidate.reason, "Would unfollow (dry run)");
            return RemediationOutcome::DryRun;
        }

        match self.actuator.click(&control).await {
            Ok(()) => {}
            Err(e @ InteractionError::StaleReference(_)) => {
                warn!(handle, error = %e, "Row changed before the click, skipping");
                return RemediationOutcome::Unresolved(e.to_string());
            }
            Err(e) => {
                warn!(handle, error = %e, "Unfollow click failed, skipping");
                return RemediationOutcome::Failed(e.to_string());
            }
        }

        info!(handle, reason = %candidate.reason, "Unfollowed");
        RemediationOutcome::Unfollowed
    }
}
