//! Tunnel health state machine.
//!
//! Owns the only mutable monitor state. Probes and restarts run without the
//! lock held; each result is then folded into the state in one critical
//! section, so counter updates always start from the current value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::platform::StatusListener;
use crate::probe::{StatusProbe, TunnelObservation, UNKNOWN_TUNNEL};
use crate::recovery::{RecoveryAction, RecoveryAttempt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Nothing observed yet.
    Unknown,
    Connected,
    Disconnected { retries: u32 },
    /// Retry budget spent; only a successful probe or manual restart leaves this state.
    GivingUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorColor {
    Green,
    Red,
}

impl From<TunnelState> for IndicatorColor {
    fn from(state: TunnelState) -> Self {
        match state {
            TunnelState::Connected => IndicatorColor::Green,
            _ => IndicatorColor::Red,
        }
    }
}

/// Emitted to the presentation layer after every state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    pub state: TunnelState,
    pub color: IndicatorColor,
    pub status_text: String,
}

#[derive(Debug, Clone)]
pub struct MonitorState {
    pub running: bool,
    pub latest: Option<TunnelObservation>,
    pub consecutive_failure_retries: u32,
    pub state: TunnelState,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            running: false,
            latest: None,
            consecutive_failure_retries: 0,
            state: TunnelState::Unknown,
        }
    }
}

/// What a tick did and how long the scheduler should wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub state: TunnelState,
    pub pause: Duration,
    pub restart_attempted: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Manual,
}

pub struct MonitorStateMachine {
    config: MonitorConfig,
    probe: Arc<StatusProbe>,
    recovery: RecoveryAction,
    listener: Arc<dyn StatusListener>,
    state: Mutex<MonitorState>,
}

impl MonitorStateMachine {
    pub fn new(
        config: MonitorConfig,
        probe: Arc<StatusProbe>,
        recovery: RecoveryAction,
        listener: Arc<dyn StatusListener>,
    ) -> Self {
        Self {
            config,
            probe,
            recovery,
            listener,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Marks the monitor running and seeds the state with an initial probe.
    pub fn start(&self) -> TunnelState {
        self.lock().running = true;
        self.check_now()
    }

    pub fn request_quit(&self) {
        let mut state = self.lock();
        if state.running {
            info!("Tunnel monitor stopping...");
        }
        state.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Copy of the current state, for presentation and tests.
    pub fn snapshot(&self) -> MonitorState {
        self.lock().clone()
    }

    pub fn status_text(&self) -> String {
        render_status(&self.lock(), self.config.max_retries)
    }

    /// One monitoring cycle: probe, then restart within the retry budget.
    pub fn tick(&self) -> TickOutcome {
        let observation = self.probe.probe().ok();

        // The exhausted check and the GivingUp write share the observation's critical section.
        let (event, connected, retries, exhausted) = {
            let mut state = self.lock();
            let connected = self.apply_observation(&mut state, observation);
            let retries = state.consecutive_failure_retries;
            let exhausted = !connected && retries >= self.config.max_retries;
            if exhausted {
                state.state = TunnelState::GivingUp;
            }
            (self.event(&state), connected, retries, exhausted)
        };

        if connected {
            self.emit(&event);
            return TickOutcome {
                state: TunnelState::Connected,
                pause: self.config.check_interval,
                restart_attempted: false,
            };
        }

        if exhausted {
            error!(
                "Failed to restart tunnel after {} attempts",
                self.config.max_retries
            );
            self.emit(&event);
            return TickOutcome {
                state: TunnelState::GivingUp,
                pause: self.config.check_interval,
                restart_attempted: false,
            };
        }

        self.emit(&event);
        warn!(
            "Tunnel disconnected. Attempting restart (attempt {}/{})",
            retries + 1,
            self.config.max_retries
        );

        let attempt = self.recovery.attempt_recovery();
        let event = {
            let mut state = self.lock();
            self.apply_recovery(&mut state, attempt, Trigger::Scheduled);
            self.event(&state)
        };
        self.emit(&event);

        let pause = if event.state == TunnelState::Connected {
            info!("Tunnel successfully restarted");
            self.config.check_interval
        } else {
            self.config.retry_delay.saturating_add(self.config.check_interval)
        };

        TickOutcome {
            state: event.state,
            pause,
            restart_attempted: true,
        }
    }

    /// Probe immediately, outside the tick schedule.
    pub fn check_now(&self) -> TunnelState {
        let observation = self.probe.probe().ok();
        let event = {
            let mut state = self.lock();
            self.apply_observation(&mut state, observation);
            self.event(&state)
        };
        self.emit(&event);
        event.state
    }

    /// Restart immediately, outside the tick schedule. Returns whether the tunnel came back.
    pub fn restart_now(&self) -> bool {
        info!("Manual tunnel restart requested");
        let attempt = self.recovery.attempt_recovery();
        let succeeded = attempt.succeeded;
        let event = {
            let mut state = self.lock();
            self.apply_recovery(&mut state, attempt, Trigger::Manual);
            self.event(&state)
        };
        self.emit(&event);
        succeeded
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // The state is a projection of the last observation, safe to reuse after a panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &MonitorEvent) {
        debug!("Emitting {:?} ({:?})", event.state, event.color);
        self.listener.on_state_change(event);
    }

    fn event(&self, state: &MonitorState) -> MonitorEvent {
        MonitorEvent {
            state: state.state,
            color: state.state.into(),
            status_text: render_status(state, self.config.max_retries),
        }
    }

    fn apply_observation(
        &self,
        state: &mut MonitorState,
        observation: Option<TunnelObservation>,
    ) -> bool {
        let observation = observation.unwrap_or_else(|| failed_observation(state));
        let connected = observation.connected;
        state.latest = Some(observation);

        if connected {
            reset_retries(state);
            state.state = TunnelState::Connected;
        } else {
            state.state = degraded(state, self.config.max_retries);
        }
        connected
    }

    fn apply_recovery(&self, state: &mut MonitorState, attempt: RecoveryAttempt, trigger: Trigger) {
        debug!(
            "Recovery triggered at {} finished (succeeded: {})",
            attempt.triggered_at.format("%H:%M:%S"),
            attempt.succeeded
        );

        let observation = match attempt.observation {
            Some(obs) => obs,
            None => failed_observation(state),
        };

        if attempt.succeeded {
            state.latest = Some(TunnelObservation {
                connected: true,
                ..observation
            });
            reset_retries(state);
            state.state = TunnelState::Connected;
            return;
        }

        state.latest = Some(TunnelObservation {
            connected: false,
            ..observation
        });
        if trigger == Trigger::Scheduled {
            state.consecutive_failure_retries =
                (state.consecutive_failure_retries + 1).min(self.config.max_retries);
        }
        state.state = degraded(state, self.config.max_retries);
    }
}

/// Disconnected, unless the budget was already spent and nothing has succeeded since.
fn degraded(state: &MonitorState, max_retries: u32) -> TunnelState {
    if state.state == TunnelState::GivingUp && state.consecutive_failure_retries >= max_retries {
        TunnelState::GivingUp
    } else {
        TunnelState::Disconnected {
            retries: state.consecutive_failure_retries,
        }
    }
}

fn reset_retries(state: &mut MonitorState) {
    if state.consecutive_failure_retries > 0 {
        info!(
            "Retry counter reset after {} failed restart attempt(s)",
            state.consecutive_failure_retries
        );
    }
    state.consecutive_failure_retries = 0;
}

/// A failed probe counts as disconnected and keeps the last known tunnel name.
fn failed_observation(state: &MonitorState) -> TunnelObservation {
    TunnelObservation {
        connected: false,
        name: state
            .latest
            .as_ref()
            .map(|obs| obs.name.clone())
            .unwrap_or_else(|| UNKNOWN_TUNNEL.to_string()),
        observed_at: Local::now(),
    }
}

fn render_status(state: &MonitorState, max_retries: u32) -> String {
    let Some(latest) = &state.latest else {
        return "Status unknown\nWaiting for first check".to_string();
    };

    let mut text = if latest.connected {
        format!("✓ Connected\nTunnel: {}", latest.name)
    } else {
        format!("✗ Disconnected\nTunnel: {}", latest.name)
    };

    match state.state {
        TunnelState::GivingUp => {
            text.push_str(&format!("\nGave up after {max_retries} restart attempts"));
        }
        TunnelState::Disconnected { retries } if retries > 0 => {
            text.push_str(&format!("\nRestart attempts: {retries}/{max_retries}"));
        }
        _ => {}
    }

    let relative = humantime_fmt::format_relative(latest.observed_at.into());
    text.push_str(&format!(
        "\nLast check: {} ({relative})",
        latest.observed_at.format("%H:%M:%S")
    ));
    text
}
