//! Linux tray shell for tunnel_watch.
//! Shows a green/red disc for tunnel health and a menu for manual checks and restarts.

mod app;
mod desktop;
mod menu;
mod paths;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use gtk::glib;
use log::{error, info, warn};
use tray_icon::menu::MenuEvent;
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};
use tunnel_watch_core::commands::MonitorCommand;
use tunnel_watch_core::logger::{FileLogger, install_panic_hook};
use tunnel_watch_core::monitor::{IndicatorColor, MonitorEvent};
use tunnel_watch_core::platform::{AppPaths, LoggerSink};

use crate::app::AppState;
use crate::menu::{build_id_lookup, build_menu};
use crate::paths::LinuxPaths;

fn main() {
    let paths = Arc::new(LinuxPaths);
    let logger = FileLogger::new(paths.log_path());
    logger.init();
    install_panic_hook();

    info!("{}", "=".repeat(50));
    info!("Tunnel monitor starting...");
    info!("Log file: {}", logger.path().display());
    info!("{}", "=".repeat(50));

    // required for tray-icon on Linux
    if let Err(e) = gtk::init() {
        error!("Fatal error: failed to init GTK: {e}");
        std::process::exit(1);
    }

    let (event_tx, event_rx) = mpsc::channel();
    let app_state = AppState::new(paths, event_tx);
    let running = Arc::new(AtomicBool::new(true));

    let initial = app_state.monitor.start();
    let (green_icon, red_icon) = build_icons();
    let (menu, handles) = build_menu();
    let id_lookup = build_id_lookup(&handles);

    let initial_icon = match IndicatorColor::from(initial) {
        IndicatorColor::Green => green_icon.clone(),
        IndicatorColor::Red => red_icon.clone(),
    };
    let tray_icon = match TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_icon(initial_icon)
        .with_tooltip(app_state.monitor.status_text())
        .build()
    {
        Ok(tray_icon) => tray_icon,
        Err(e) => {
            error!("Fatal error: failed to create tray icon: {e}");
            std::process::exit(1);
        }
    };

    app_state.scheduler.start();
    info!("Tunnel monitor started");

    // Ctrl+C behaves like Exit
    {
        let scheduler = app_state.scheduler.clone();
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Received interrupt signal");
            scheduler.stop();
            running.store(false, Ordering::SeqCst);
        }) {
            warn!("failed to install Ctrl-C handler: {e}");
        }
    }

    let mut looper = EventLoop {
        tray_icon,
        id_lookup,
        events: event_rx,
        app_state,
        green_icon,
        red_icon,
        running,
    };

    // The panic hook has already logged the fatal error.
    let result = panic::catch_unwind(AssertUnwindSafe(|| looper.run()));
    info!("Tunnel monitor stopped");
    if result.is_err() {
        std::process::exit(1);
    }
}

struct EventLoop {
    tray_icon: TrayIcon,
    id_lookup: HashMap<muda::MenuId, MonitorCommand>,
    events: Receiver<MonitorEvent>,
    app_state: AppState,
    green_icon: Icon,
    red_icon: Icon,
    running: Arc<AtomicBool>,
}

impl EventLoop {
    fn run(&mut self) {
        info!("tray icon ready; entering event loop");

        while self.running.load(Ordering::SeqCst) {
            // Process menu events (non-blocking)
            while let Ok(event) = MenuEvent::receiver().try_recv() {
                self.handle_menu_event(event.id);
            }

            // Apply state changes pushed by the monitor threads
            while let Ok(event) = self.events.try_recv() {
                self.apply(&event);
            }

            glib::idle_add_local_once(|| {}); // allow GTK to process pending work
            while gtk::events_pending() {
                gtk::main_iteration_do(false);
            }

            thread::sleep(Duration::from_millis(50));
        }

        info!("exiting event loop; cleaning up");
        self.app_state.cleanup();
    }

    fn handle_menu_event(&mut self, id: muda::MenuId) {
        if let Some(command) = self.id_lookup.get(&id).copied()
            && self.app_state.dispatcher.dispatch(command).is_break()
        {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn apply(&mut self, event: &MonitorEvent) {
        let icon = match event.color {
            IndicatorColor::Green => self.green_icon.clone(),
            IndicatorColor::Red => self.red_icon.clone(),
        };
        if let Err(e) = self.tray_icon.set_icon(Some(icon)) {
            warn!("failed to update tray icon: {e}");
        }
        if let Err(e) = self.tray_icon.set_tooltip(Some(&event.status_text)) {
            warn!("failed to update tooltip: {e}");
        }
    }
}

fn build_icons() -> (Icon, Icon) {
    let green = disc_icon([0x2e, 0xb8, 0x4b, 0xff], true);
    let red = disc_icon([0xd9, 0x34, 0x2b, 0xff], false);
    (green, red)
}

/// Filled disc with a white rim; the healthy glyph also gets a white center dot.
fn disc_icon(color: [u8; 4], center_dot: bool) -> Icon {
    const SIZE: usize = 32;
    const WHITE: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

    let center = (SIZE as f32 - 1.0) / 2.0;
    let outer = SIZE as f32 / 2.0 - 1.0;
    let rim = outer - 1.5;
    let dot = 3.0;

    let mut data = Vec::with_capacity(SIZE * SIZE * 4);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let dist = (dx * dx + dy * dy).sqrt();
            let pixel = if dist > outer {
                [0, 0, 0, 0]
            } else if dist > rim || (center_dot && dist <= dot) {
                WHITE
            } else {
                color
            };
            data.extend_from_slice(&pixel);
        }
    }

    match Icon::from_rgba(data, SIZE as u32, SIZE as u32) {
        Ok(icon) => icon,
        Err(e) => {
            error!("Fatal error: failed to build icon: {e}");
            std::process::exit(1);
        }
    }
}
