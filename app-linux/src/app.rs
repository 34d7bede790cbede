use std::sync::Arc;
use std::sync::mpsc::Sender;

use log::{error, info, warn};
use tunnel_watch_core::commands::CommandDispatcher;
use tunnel_watch_core::config::Config;
use tunnel_watch_core::monitor::{MonitorEvent, MonitorStateMachine};
use tunnel_watch_core::platform::{AppPaths, ThreadSleeper};
use tunnel_watch_core::probe::StatusProbe;
use tunnel_watch_core::recovery::RecoveryAction;
use tunnel_watch_core::runner::SystemRunner;
use tunnel_watch_core::scheduler::TickScheduler;

use crate::desktop::{ChannelListener, DesktopSpawner, NotifySend};
use crate::paths::LinuxPaths;

/// Shared application state for the Linux shell.
pub struct AppState {
    pub monitor: Arc<MonitorStateMachine>,
    pub scheduler: Arc<TickScheduler>,
    pub dispatcher: CommandDispatcher,
}

impl AppState {
    pub fn new(paths: Arc<LinuxPaths>, events: Sender<MonitorEvent>) -> Self {
        let config = match Config::load_with(paths.as_ref()) {
            Ok(config) => {
                info!("Loaded configuration successfully");
                config
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                warn!("Using default configuration");
                Config::default()
            }
        };

        let monitor_config = config.monitor_config();
        let runner = Arc::new(SystemRunner::new(config.cli.clone(), config.get_path()));
        info!("Watching tunnel through {}", runner.program());

        let probe = Arc::new(StatusProbe::new(runner.clone(), monitor_config.probe_timeout));
        let recovery = RecoveryAction::new(
            runner,
            probe.clone(),
            Arc::new(ThreadSleeper),
            monitor_config.recovery_timeout,
            monitor_config.settle_delay,
        );
        let monitor = Arc::new(MonitorStateMachine::new(
            monitor_config,
            probe,
            recovery,
            Arc::new(ChannelListener::new(events)),
        ));
        let scheduler = Arc::new(TickScheduler::new(monitor.clone()));

        let dispatcher = CommandDispatcher::new(
            monitor.clone(),
            scheduler.clone(),
            Arc::new(NotifySend),
            Arc::new(DesktopSpawner),
            config.log_viewer(),
            paths.log_path(),
        );

        Self {
            monitor,
            scheduler,
            dispatcher,
        }
    }

    pub fn cleanup(&self) {
        self.scheduler.stop();
    }
}
