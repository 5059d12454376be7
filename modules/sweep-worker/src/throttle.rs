use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use sweep_common::Config;

use crate::ledger::ProgressLedger;

/// Short pause after scrolling a row into view, before clicking it.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Clock / Sleeper seams
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ---------------------------------------------------------------------------
// Run gate
// ---------------------------------------------------------------------------

/// True when no run has completed yet, or the cooldown has fully elapsed.
/// The boundary is inclusive.
pub fn should_run(ledger: &ProgressLedger, cooldown: chrono::Duration, now: DateTime<Utc>) -> bool {
    match next_run_at(ledger, cooldown) {
        None => true,
        Some(next) => now >= next,
    }
}

/// Earliest instant the next run may start, if a run has completed before.
/// A cooldown reaching past the calendar means never.
pub fn next_run_at(ledger: &ProgressLedger, cooldown: chrono::Duration) -> Option<DateTime<Utc>> {
    ledger.last_run.map(|last| {
        last.checked_add_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Pacing between actions and between profile checks.
pub struct Throttle {
    sleeper: Arc<dyn Sleeper>,
    rng: StdRng,
    action_delay: Duration,
    check_delay: Duration,
    check_jitter: f64,
}

impl Throttle {
    pub fn new(config: &Config, sleeper: Arc<dyn Sleeper>) -> Self {
        let rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            sleeper,
            rng,
            action_delay: config.action_delay,
            check_delay: config.check_delay,
            check_jitter: config.check_jitter,
        }
    }

    /// Fixed wait after each remediation action.
    pub fn per_action_delay(&self) -> Duration {
        self.action_delay
    }

    /// Randomized wait between profile checks, uniform within ±jitter of the base.
    pub fn per_check_delay(&mut self) -> Duration {
        jittered(self.check_delay, self.check_jitter, &mut self.rng)
    }

    pub async fn pause_after_action(&self) {
        let delay = self.per_action_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Pausing after action");
        self.sleeper.sleep(delay).await;
    }

    pub async fn pause_between_checks(&mut self) {
        let delay = self.per_check_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Pausing between checks");
        self.sleeper.sleep(delay).await;
    }

    pub async fn settle(&self) {
        self.sleeper.sleep(SETTLE_DELAY).await;
    }
}

/// `base` scaled by a uniform factor in `[1 - fraction, 1 + fraction]`.
pub fn jittered(base: Duration, fraction: f64, rng: &mut impl Rng) -> Duration {
    let fraction = fraction.clamp(0.0, 1.0);
    if fraction == 0.0 || base.is_zero() {
        return base;
    }
    let factor = 1.0 + rng.random_range(-fraction..=fraction);
    base.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_last_run(at: DateTime<Utc>) -> ProgressLedger {
        ProgressLedger::default().advance_last_run(at)
    }

    #[test]
    fn first_run_is_always_allowed() {
        assert!(should_run(
            &ProgressLedger::default(),
            chrono::Duration::hours(3),
            Utc::now()
        ));
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let last = Utc::now();
        let cooldown = chrono::Duration::seconds(10_800);
        let ledger = ledger_with_last_run(last);

        assert!(!should_run(
            &ledger,
            cooldown,
            last + cooldown - chrono::Duration::seconds(1)
        ));
        assert!(should_run(&ledger, cooldown, last + cooldown));
    }

    #[test]
    fn two_hours_into_three_hour_cooldown_is_too_soon() {
        let now = Utc::now();
        let ledger = ledger_with_last_run(now - chrono::Duration::seconds(7_200));
        assert!(!should_run(&ledger, chrono::Duration::seconds(10_800), now));
    }

    #[test]
    fn oversized_cooldown_never_elapses() {
        let now = Utc::now();
        let ledger = ledger_with_last_run(now - chrono::Duration::seconds(60));
        let cooldown = chrono::Duration::seconds(9_000_000_000_000_000);

        assert!(!should_run(&ledger, cooldown, now));
        assert_eq!(
            next_run_at(&ledger, cooldown),
            Some(DateTime::<Utc>::MAX_UTC)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_secs(10);
        for _ in 0..1_000 {
            let d = jittered(base, 0.3, &mut rng);
            assert!(d >= Duration::from_millis(6_999), "{d:?} below lower bound");
            assert!(d <= Duration::from_millis(13_001), "{d:?} above upper bound");
        }
    }

    #[test]
    fn jitter_is_deterministic_for_seed() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let base = Duration::from_secs(3);
        for _ in 0..10 {
            assert_eq!(jittered(base, 0.5, &mut a), jittered(base, 0.5, &mut b));
        }
    }

    #[test]
    fn zero_jitter_returns_base() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            jittered(Duration::from_secs(4), 0.0, &mut rng),
            Duration::from_secs(4)
        );
    }
}
