use std::collections::HashMap;

use log::debug;
use tray_icon::menu::{Menu, MenuId, MenuItem, PredefinedMenuItem};
use tunnel_watch_core::commands::MonitorCommand;

pub struct MenuHandles {
    pub status_id: MenuId,
    pub check_now_id: MenuId,
    pub restart_id: MenuId,
    pub view_logs_id: MenuId,
    pub quit_id: MenuId,
}

fn append_item(menu: &Menu, label: &str) -> MenuId {
    let item = MenuItem::new(label, true, None);
    let id = item.id().clone();
    if let Err(e) = menu.append(&item) {
        debug!("failed to append '{label}' item: {e}");
    }
    id
}

fn append_separator(menu: &Menu) {
    if let Err(e) = menu.append(&PredefinedMenuItem::separator()) {
        debug!("failed to append separator: {e}");
    }
}

pub fn build_menu() -> (Menu, MenuHandles) {
    let menu = Menu::new();

    let status_id = append_item(&menu, "Status");
    let check_now_id = append_item(&menu, "Check Now");
    let restart_id = append_item(&menu, "Restart Tunnel");
    append_separator(&menu);
    let view_logs_id = append_item(&menu, "View Logs");
    append_separator(&menu);
    let quit_id = append_item(&menu, "Exit");

    (
        menu,
        MenuHandles {
            status_id,
            check_now_id,
            restart_id,
            view_logs_id,
            quit_id,
        },
    )
}

pub fn build_id_lookup(handles: &MenuHandles) -> HashMap<MenuId, MonitorCommand> {
    let mut map = HashMap::new();
    map.insert(handles.status_id.clone(), MonitorCommand::Status);
    map.insert(handles.check_now_id.clone(), MonitorCommand::CheckNow);
    map.insert(handles.restart_id.clone(), MonitorCommand::Restart);
    map.insert(handles.view_logs_id.clone(), MonitorCommand::ViewLogs);
    map.insert(handles.quit_id.clone(), MonitorCommand::Quit);
    map
}
