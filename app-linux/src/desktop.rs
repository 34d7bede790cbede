//! Desktop integrations: notifications, helper processes, and the event bridge
//! from the monitor thread to the GTK loop.

use std::process::{Child, Command};
use std::sync::Mutex;
use std::sync::mpsc::Sender;
use std::thread;

use log::{debug, warn};
use tunnel_watch_core::monitor::MonitorEvent;
use tunnel_watch_core::platform::{Notifier, ProcessSpawner, StatusListener};

/// Forwards monitor events to the tray loop; tray-icon objects must stay on the GTK thread.
pub struct ChannelListener {
    tx: Mutex<Sender<MonitorEvent>>,
}

impl ChannelListener {
    pub fn new(tx: Sender<MonitorEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl StatusListener for ChannelListener {
    fn on_state_change(&self, event: &MonitorEvent) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.send(event.clone()).is_err() {
            debug!("tray loop gone, dropping {:?}", event.state);
        }
    }
}

/// Wait for a detached helper on its own thread so it does not linger as a zombie.
fn reap(mut child: Child, what: &str) {
    let what = what.to_string();
    let spawned = thread::Builder::new()
        .name("reaper".into())
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => debug!("{what} exited with {status}"),
            Ok(_) => {}
            Err(e) => warn!("failed to wait for {what}: {e}"),
        });
    if let Err(e) = spawned {
        warn!("could not start reaper thread: {e}");
    }
}

/// Notifications through `notify-send` (libnotify).
pub struct NotifySend;

impl NotifySend {
    fn send(&self, urgency: &str, title: &str, body: &str) {
        let result = Command::new("notify-send")
            .args(["--app-name", title, "--urgency", urgency, title, body])
            .spawn();
        match result {
            Ok(child) => reap(child, "notify-send"),
            Err(e) => warn!("notify-send failed ({e}); notification was: {title}: {body}"),
        }
    }
}

impl Notifier for NotifySend {
    fn info(&self, title: &str, body: &str) {
        self.send("low", title, body);
    }

    fn warn(&self, title: &str, body: &str) {
        self.send("normal", title, body);
    }

    fn error(&self, title: &str, body: &str) {
        self.send("critical", title, body);
    }
}

#[derive(Default)]
pub struct DesktopSpawner;

impl ProcessSpawner for DesktopSpawner {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let child = Command::new(program).args(args).spawn()?;
        reap(child, program);
        Ok(())
    }
}
