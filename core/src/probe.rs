//! Tunnel status probing via `<cli> tunnel status`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::platform::CommandRunner;
use crate::runner::RunError;

pub const STATUS_ARGS: [&str; 2] = ["tunnel", "status"];
pub const CONNECTED_MARKER: &str = "Connected";
pub const UNKNOWN_TUNNEL: &str = "Unknown";

const EXCERPT_LEN: usize = 200;

/// One probe result. Superseded by the next one, never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelObservation {
    pub connected: bool,
    pub name: String,
    pub observed_at: DateTime<Local>,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("status check timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse tunnel status JSON: {source} (output: {excerpt:?})")]
    MalformedOutput {
        #[source]
        source: serde_json::Error,
        excerpt: String,
    },
    #[error("status command exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("error checking tunnel status: {0}")]
    Unexpected(#[source] RunError),
}

#[derive(Deserialize)]
struct StatusReport {
    #[serde(default)]
    tunnel: Option<TunnelSection>,
}

#[derive(Deserialize)]
struct TunnelSection {
    #[serde(default)]
    tunnel: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Parse the JSON printed by `tunnel status` into `(connected, name)`.
pub fn parse_status(stdout: &str) -> Result<(bool, String), serde_json::Error> {
    let report: StatusReport = serde_json::from_str(stdout)?;
    let section = report.tunnel.unwrap_or(TunnelSection {
        tunnel: None,
        name: None,
    });

    let connected = section
        .tunnel
        .as_deref()
        .map(str::trim)
        .is_some_and(|state| state == CONNECTED_MARKER);
    let name = section
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| UNKNOWN_TUNNEL.to_string());

    Ok((connected, name))
}

pub(crate) fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Queries the tunnel CLI for its current connection state.
pub struct StatusProbe {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl StatusProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn probe(&self) -> Result<TunnelObservation, ProbeError> {
        let result = self.query();
        match &result {
            Ok(obs) if obs.connected => info!("Tunnel '{}' is connected", obs.name),
            Ok(obs) => warn!("Tunnel '{}' is not connected", obs.name),
            Err(e) => error!("Failed to check tunnel status: {}", e),
        }
        result
    }

    fn query(&self) -> Result<TunnelObservation, ProbeError> {
        let output = self
            .runner
            .run(&STATUS_ARGS, self.timeout)
            .map_err(|e| match e {
                RunError::Timeout(after) => ProbeError::Timeout(after),
                other => ProbeError::Unexpected(other),
            })?;

        if !output.success() {
            return Err(ProbeError::NonZeroExit {
                code: output.code,
                stderr: excerpt(&output.stderr),
            });
        }

        let (connected, name) =
            parse_status(&output.stdout).map_err(|source| ProbeError::MalformedOutput {
                source,
                excerpt: excerpt(&output.stdout),
            })?;

        Ok(TunnelObservation {
            connected,
            name,
            observed_at: Local::now(),
        })
    }
}
