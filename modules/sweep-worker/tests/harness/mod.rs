//! Shared setup for pipeline tests: a temp directory for the ledger, audit and
//! session files, plus the three mocks wired into a `Sweep`.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use sweep_common::Config;
use sweep_worker::ledger::{LedgerStore, ProgressLedger};
use sweep_worker::stats::SweepStats;
use sweep_worker::sweep::{Sweep, SweepOutcome};
use sweep_worker::testing::{self, ManualClock, MockActuator, RecordingSleeper};

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub actuator: Arc<MockActuator>,
    pub clock: Arc<ManualClock>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(actuator: MockActuator) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = testing::test_config(dir.path());
        Self {
            dir,
            config,
            actuator: Arc::new(actuator),
            clock: Arc::new(ManualClock::new(testing::epoch())),
            sleeper: Arc::new(RecordingSleeper::new()),
        }
    }

    pub fn sweep(&self) -> Sweep {
        Sweep::new(
            self.config.clone(),
            testing::deps(
                self.actuator.clone(),
                self.clock.clone(),
                self.sleeper.clone(),
            ),
        )
    }

    pub async fn outcome(&self) -> SweepOutcome {
        self.sweep().run().await.expect("sweep run failed")
    }

    /// Run and expect it to get past the cooldown gate.
    pub async fn run(&self) -> SweepStats {
        match self.outcome().await {
            SweepOutcome::Completed(stats) => stats,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    pub fn ledger(&self) -> ProgressLedger {
        LedgerStore::new(&self.config.state_file).load()
    }

    pub fn skip_cooldown(&self) {
        self.clock.advance(self.config.cooldown);
    }

    pub fn audit_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.config.audit_file)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }
}

/// `n` accounts with auto-assigned handles `user1..=userN`.
pub fn default_handles(actuator: MockActuator, n: usize) -> MockActuator {
    (1..=n).fold(actuator, |a, i| {
        a.follow(&format!("user{i}"), testing::MockProfile::posts(5))
    })
}
