// core/src/scheduler.rs
//
// Periodic tick loop for the tunnel monitor.
// Runs on its own thread so manual commands never wait for a tick in progress.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::monitor::MonitorStateMachine;

/// Stop flag the loop can sleep on; setting it wakes any pending pause.
#[derive(Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn trigger(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.cvar.notify_all();
    }

    pub fn reset(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`. Returns `true` if stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        // No representable deadline means wait until triggered.
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                break;
            }
            stopped = self
                .cvar
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

/// Drives `MonitorStateMachine::tick` until stopped.
pub struct TickScheduler {
    monitor: Arc<MonitorStateMachine>,
    stop: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickScheduler {
    pub fn new(monitor: Arc<MonitorStateMachine>) -> Self {
        Self {
            monitor,
            stop: Arc::new(StopSignal::default()),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Start the monitoring thread. The first tick runs one check interval after start,
    /// since `MonitorStateMachine::start` already probed.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("Scheduler is already running");
            return;
        }
        self.stop.reset();

        let monitor = Arc::clone(&self.monitor);
        let stop = Arc::clone(&self.stop);

        let spawned = thread::Builder::new()
            .name("tunnel-monitor".into())
            .spawn(move || {
                info!("Monitoring loop started");
                let interval = monitor.config().check_interval;
                let mut pause = interval;

                while monitor.is_running() && !stop.wait(pause) {
                    pause = match panic::catch_unwind(AssertUnwindSafe(|| monitor.tick())) {
                        Ok(outcome) => {
                            debug!(
                                "Tick finished in state {:?}, next check in {:?}",
                                outcome.state, outcome.pause
                            );
                            outcome.pause
                        }
                        Err(cause) => {
                            error!("Error in monitoring loop: {}", panic_message(&*cause));
                            interval
                        }
                    };
                }

                info!("Monitoring loop stopped");
            });

        match spawned {
            Ok(thread) => *handle = Some(thread),
            Err(e) => error!("Failed to start monitoring thread: {e}"),
        }
    }

    /// Ask the loop to stop; a tick already in flight finishes first.
    pub fn stop(&self) {
        self.monitor.request_quit();
        self.stop.trigger();
        info!("Stopping monitoring loop");
    }

    /// Stop and wait for the loop thread to exit.
    pub fn shutdown(&self) {
        self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Monitoring thread panicked during shutdown");
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

pub(crate) fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::TunnelState;
    use crate::monitor::tests::harness_with;
    use crate::platform::CommandRunner;
    use crate::probe::tests::status_json;
    use crate::runner::{CommandOutput, RunError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports a connected tunnel on every call, optionally panicking on one of them.
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
        panic_on: Option<usize>,
    }

    impl CommandRunner for CountingRunner {
        fn run(&self, _args: &[&str], _timeout: Duration) -> Result<CommandOutput, RunError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on == Some(n) {
                panic!("status parser blew up");
            }
            status_json("Connected", "dev-box")
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(5),
            ..MonitorConfig::default()
        }
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn stop_signal_wait_times_out_without_trigger() {
        let signal = StopSignal::default();
        let started = Instant::now();
        assert!(!signal.wait(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_signal_wakes_sleeper() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(waiter.join().unwrap());
        assert!(signal.is_triggered());
    }

    #[test]
    fn stop_signal_survives_unrepresentable_timeout() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn loop_ticks_until_stopped() {
        let runner = Arc::new(CountingRunner::default());
        let h = harness_with(runner.clone(), fast_config());
        h.monitor.start();

        let scheduler = TickScheduler::new(h.monitor.clone());
        scheduler.start();
        assert!(wait_for(|| runner.calls.load(Ordering::SeqCst) >= 4));

        scheduler.shutdown();
        assert!(!scheduler.is_running());
        assert!(!h.monitor.is_running());

        let after = runner.calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(runner.calls.load(Ordering::SeqCst), after);
        assert_eq!(h.monitor.snapshot().state, TunnelState::Connected);
    }

    #[test]
    fn stop_interrupts_a_long_pause() {
        let runner = Arc::new(CountingRunner::default());
        let config = MonitorConfig {
            check_interval: Duration::from_secs(3600),
            ..MonitorConfig::default()
        };
        let h = harness_with(runner, config);
        h.monitor.start();

        let scheduler = TickScheduler::new(h.monitor.clone());
        scheduler.start();
        let started = Instant::now();
        scheduler.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn panicking_tick_does_not_end_the_loop() {
        let runner = Arc::new(CountingRunner {
            panic_on: Some(1),
            ..CountingRunner::default()
        });
        let h = harness_with(runner.clone(), fast_config());
        h.monitor.start();

        let scheduler = TickScheduler::new(h.monitor.clone());
        scheduler.start();
        assert!(wait_for(|| runner.calls.load(Ordering::SeqCst) >= 3));
        assert!(scheduler.is_running());
        scheduler.shutdown();
        assert_eq!(h.monitor.snapshot().state, TunnelState::Connected);
    }

    #[test]
    fn loop_does_nothing_when_monitor_not_started() {
        let runner = Arc::new(CountingRunner::default());
        let h = harness_with(runner.clone(), fast_config());

        let scheduler = TickScheduler::new(h.monitor.clone());
        scheduler.start();
        assert!(wait_for(|| !scheduler.is_running()));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }
}
