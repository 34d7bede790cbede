//! Tunnel recovery: restart the tunnel service, let it settle, then confirm with a fresh probe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use thiserror::Error;

use crate::platform::{CommandRunner, Sleeper};
use crate::probe::{ProbeError, StatusProbe, TunnelObservation, excerpt};
use crate::runner::RunError;

pub const RESTART_ARGS: [&str; 3] = ["tunnel", "service", "restart"];

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("error restarting tunnel: {0}")]
    Restart(#[source] RunError),
    #[error("failed to restart tunnel (exit code {code:?}): {stderr}")]
    Rejected { code: Option<i32>, stderr: String },
    #[error("could not confirm tunnel after restart: {0}")]
    Confirm(#[source] ProbeError),
}

/// Outcome of one restart attempt. Consumed by the monitor right away.
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub triggered_at: DateTime<Local>,
    pub succeeded: bool,
    /// Observation from the confirmation probe, when one was taken.
    pub observation: Option<TunnelObservation>,
}

pub struct RecoveryAction {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<StatusProbe>,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
    settle_delay: Duration,
}

impl RecoveryAction {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<StatusProbe>,
        sleeper: Arc<dyn Sleeper>,
        timeout: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            runner,
            probe,
            sleeper,
            timeout,
            settle_delay,
        }
    }

    pub fn attempt_recovery(&self) -> RecoveryAttempt {
        let triggered_at = Local::now();
        info!("Attempting to restart tunnel...");

        match self.restart_and_confirm() {
            Ok(observation) => {
                if observation.connected {
                    info!("Tunnel '{}' confirmed connected after restart", observation.name);
                } else {
                    warn!("Tunnel '{}' still not connected after restart", observation.name);
                }
                RecoveryAttempt {
                    triggered_at,
                    succeeded: observation.connected,
                    observation: Some(observation),
                }
            }
            Err(e) => {
                error!("{}", e);
                RecoveryAttempt {
                    triggered_at,
                    succeeded: false,
                    observation: None,
                }
            }
        }
    }

    fn restart_and_confirm(&self) -> Result<TunnelObservation, RecoveryError> {
        let output = self
            .runner
            .run(&RESTART_ARGS, self.timeout)
            .map_err(RecoveryError::Restart)?;

        if !output.success() {
            return Err(RecoveryError::Rejected {
                code: output.code,
                stderr: excerpt(&output.stderr),
            });
        }

        info!(
            "Tunnel service restart command executed, waiting {:?}",
            self.settle_delay
        );
        self.sleeper.sleep(self.settle_delay);

        self.probe.probe().map_err(RecoveryError::Confirm)
    }
}
