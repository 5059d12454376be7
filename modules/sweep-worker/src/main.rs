use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sweep_common::{Config, SweepError};
use sweep_worker::browserless::BrowserlessActuator;
use sweep_worker::sweep::{Sweep, SweepDeps, SweepOutcome};
use sweep_worker::throttle::{SystemClock, TokioSleeper};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sweep=info".parse()?))
        .init();

    info!("Following-list sweep starting...");

    // Load config; a bad config is the only thing that fails the process.
    let config = Config::from_env()?;
    config.log_redacted();

    if config.dry_run {
        warn!("DRY_RUN is set: nothing will be unfollowed");
    }

    let actuator = BrowserlessActuator::new(&config)?;
    let deps = SweepDeps {
        actuator: Arc::new(actuator),
        clock: Arc::new(SystemClock),
        sleeper: Arc::new(TokioSleeper),
    };
    let sweep = Sweep::new(config, deps);

    tokio::select! {
        result = sweep.run() => match result {
            Ok(SweepOutcome::Completed(stats)) => info!("Sweep complete. {stats}"),
            Ok(SweepOutcome::Cooldown { next_run }) => {
                info!(next_run = %next_run, "Nothing to do until the cooldown ends")
            }
            // A missing session file surfaces here as a config error.
            Err(e) if matches!(e.downcast_ref::<SweepError>(), Some(SweepError::Config(_))) => {
                return Err(e);
            }
            Err(e) => error!("Sweep failed: {e:#}"),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, progress saved");
        }
    }

    Ok(())
}
