pub mod commands;
pub mod config;
pub mod logger;
pub mod monitor;
pub mod probe;
pub mod recovery;
pub mod runner;
pub mod scheduler;

/// Interfaces that platform shells can implement to adapt the core library
/// without pulling in platform-specific dependencies.
pub mod platform {
    use std::time::Duration;

    use crate::monitor::MonitorEvent;
    use crate::runner::{CommandOutput, RunError};

    /// Receives every state-change event emitted by the monitor.
    pub trait StatusListener: Send + Sync {
        fn on_state_change(&self, event: &MonitorEvent);
    }

    /// Trait for dispatching user-visible notifications.
    pub trait Notifier: Send + Sync {
        fn info(&self, title: &str, body: &str);
        fn warn(&self, title: &str, body: &str);
        fn error(&self, title: &str, body: &str);
    }

    /// Trait for logging sinks beyond the default logger.
    pub trait LoggerSink {
        fn init(&self);
    }

    /// Trait for platform-correct config/log paths.
    pub trait AppPaths {
        fn config_path(&self) -> std::path::PathBuf;
        fn log_path(&self) -> std::path::PathBuf;
    }

    /// Trait for launching detached helper programs (log viewer and such).
    pub trait ProcessSpawner: Send + Sync {
        fn spawn(
            &self,
            program: &str,
            args: &[String],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    }

    /// Runs the tunnel CLI to completion, bounded by a timeout.
    pub trait CommandRunner: Send + Sync {
        fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, RunError>;
    }

    /// Blocking delay; swapped out in tests so nothing actually waits.
    pub trait Sleeper: Send + Sync {
        fn sleep(&self, duration: Duration);
    }

    /// Sleeper backed by `std::thread::sleep`.
    #[derive(Default, Clone, Copy)]
    pub struct ThreadSleeper;

    impl Sleeper for ThreadSleeper {
        fn sleep(&self, duration: Duration) {
            std::thread::sleep(duration);
        }
    }
}
