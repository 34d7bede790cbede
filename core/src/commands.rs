//! User-facing commands, independent of any tray toolkit.
//! Shells map their menu items onto `MonitorCommand` and hand them to the dispatcher.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::monitor::MonitorStateMachine;
use crate::platform::{Notifier, ProcessSpawner};
use crate::scheduler::TickScheduler;

pub const NOTIFY_TITLE: &str = "Tunnel Monitor";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MonitorCommand {
    Status,
    CheckNow,
    Restart,
    ViewLogs,
    Quit,
}

pub struct CommandDispatcher {
    monitor: Arc<MonitorStateMachine>,
    scheduler: Arc<TickScheduler>,
    notifier: Arc<dyn Notifier>,
    spawner: Arc<dyn ProcessSpawner>,
    log_viewer: String,
    log_path: PathBuf,
}

impl CommandDispatcher {
    pub fn new(
        monitor: Arc<MonitorStateMachine>,
        scheduler: Arc<TickScheduler>,
        notifier: Arc<dyn Notifier>,
        spawner: Arc<dyn ProcessSpawner>,
        log_viewer: String,
        log_path: PathBuf,
    ) -> Self {
        Self {
            monitor,
            scheduler,
            notifier,
            spawner,
            log_viewer,
            log_path,
        }
    }

    /// Handle one command. Breaks once the user asked to quit.
    pub fn dispatch(&self, command: MonitorCommand) -> ControlFlow<()> {
        match command {
            MonitorCommand::Status => {
                self.notifier.info(NOTIFY_TITLE, &self.monitor.status_text());
            }
            MonitorCommand::CheckNow => {
                self.spawn_check();
            }
            MonitorCommand::Restart => {
                self.spawn_restart();
            }
            MonitorCommand::ViewLogs => self.open_logs(),
            MonitorCommand::Quit => {
                self.scheduler.stop();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Probe on a short-lived thread; the running tick loop is not consulted.
    pub fn spawn_check(&self) -> JoinHandle<()> {
        self.notifier.info(NOTIFY_TITLE, "Checking tunnel status...");
        let monitor = Arc::clone(&self.monitor);
        thread::spawn(move || {
            let state = monitor.check_now();
            info!("Manual check finished: {:?}", state);
        })
    }

    pub fn spawn_restart(&self) -> JoinHandle<()> {
        let monitor = Arc::clone(&self.monitor);
        let notifier = Arc::clone(&self.notifier);
        thread::spawn(move || {
            notifier.info(NOTIFY_TITLE, "Restarting tunnel...");
            if monitor.restart_now() {
                notifier.info(NOTIFY_TITLE, "Tunnel restarted successfully");
            } else {
                notifier.error(NOTIFY_TITLE, "Failed to restart tunnel");
            }
        })
    }

    fn open_logs(&self) {
        info!("Opening log file {:?} with {}", self.log_path, self.log_viewer);
        let args = vec![self.log_path.display().to_string()];
        if let Err(e) = self.spawner.spawn(&self.log_viewer, &args) {
            error!("Failed to open log file: {}", e);
            self.notifier
                .warn(NOTIFY_TITLE, &format!("Could not open log file: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::monitor::TunnelState;
    use crate::monitor::tests::harness_with;
    use crate::probe::tests::{ScriptedRunner, exit_with, status_json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingNotifier {
        fn bodies(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn info(&self, _title: &str, body: &str) {
            self.sent.lock().unwrap().push(("info", body.to_string()));
        }
        fn warn(&self, _title: &str, body: &str) {
            self.sent.lock().unwrap().push(("warn", body.to_string()));
        }
        fn error(&self, _title: &str, body: &str) {
            self.sent.lock().unwrap().push(("error", body.to_string()));
        }
    }

    #[derive(Default)]
    struct RecordingSpawner {
        spawned: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    impl ProcessSpawner for RecordingSpawner {
        fn spawn(
            &self,
            program: &str,
            args: &[String],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.fail {
                return Err("viewer not installed".into());
            }
            self.spawned
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            Ok(())
        }
    }

    struct Setup {
        runner: Arc<ScriptedRunner>,
        monitor: Arc<MonitorStateMachine>,
        notifier: Arc<RecordingNotifier>,
        spawner: Arc<RecordingSpawner>,
        dispatcher: CommandDispatcher,
    }

    fn setup(spawner: RecordingSpawner) -> Setup {
        let h = harness_with(Arc::new(ScriptedRunner::default()), MonitorConfig::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let spawner = Arc::new(spawner);
        let scheduler = Arc::new(TickScheduler::new(h.monitor.clone()));
        let dispatcher = CommandDispatcher::new(
            h.monitor.clone(),
            scheduler,
            notifier.clone(),
            spawner.clone(),
            "xdg-open".into(),
            PathBuf::from("/tmp/tunnel_watch.log"),
        );
        Setup {
            runner: h.runner,
            monitor: h.monitor,
            notifier,
            spawner,
            dispatcher,
        }
    }

    #[test]
    fn status_notifies_summary() {
        let s = setup(RecordingSpawner::default());
        s.runner.push(status_json("Connected", "dev-box"));
        s.monitor.check_now();

        assert!(s.dispatcher.dispatch(MonitorCommand::Status).is_continue());
        let bodies = s.notifier.bodies();
        assert!(bodies[0].contains("Connected"));
        assert!(bodies[0].contains("dev-box"));
    }

    #[test]
    fn check_now_runs_off_thread() {
        let s = setup(RecordingSpawner::default());
        s.runner.push(status_json("Connected", "dev-box"));

        s.dispatcher.spawn_check().join().unwrap();
        assert_eq!(s.monitor.snapshot().state, TunnelState::Connected);
        assert_eq!(s.notifier.bodies(), vec!["Checking tunnel status..."]);
    }

    #[test]
    fn restart_reports_success() {
        let s = setup(RecordingSpawner::default());
        s.runner
            .push(exit_with(0, ""))
            .push(status_json("Connected", "dev-box"));

        s.dispatcher.spawn_restart().join().unwrap();
        assert_eq!(
            s.notifier.bodies(),
            vec!["Restarting tunnel...", "Tunnel restarted successfully"]
        );
    }

    #[test]
    fn restart_reports_failure() {
        let s = setup(RecordingSpawner::default());
        s.runner.push(exit_with(1, "access denied"));

        s.dispatcher.spawn_restart().join().unwrap();
        let sent = s.notifier.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap(), &("error", "Failed to restart tunnel".to_string()));
    }

    #[test]
    fn view_logs_opens_log_file() {
        let s = setup(RecordingSpawner::default());
        s.dispatcher.dispatch(MonitorCommand::ViewLogs);

        let spawned = s.spawner.spawned.lock().unwrap();
        assert_eq!(spawned[0].0, "xdg-open");
        assert_eq!(spawned[0].1, vec!["/tmp/tunnel_watch.log".to_string()]);
    }

    #[test]
    fn view_logs_failure_is_reported_not_fatal() {
        let s = setup(RecordingSpawner {
            fail: true,
            ..RecordingSpawner::default()
        });
        assert!(s.dispatcher.dispatch(MonitorCommand::ViewLogs).is_continue());
        assert_eq!(s.notifier.sent.lock().unwrap()[0].0, "warn");
    }

    #[test]
    fn quit_stops_monitor() {
        let s = setup(RecordingSpawner::default());
        s.runner.push(status_json("Connected", "dev-box"));
        s.monitor.start();

        assert!(s.dispatcher.dispatch(MonitorCommand::Quit).is_break());
        assert!(!s.monitor.is_running());
    }
}
