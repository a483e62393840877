mod commands;
mod layout;
mod logger;
mod menu;

pub(crate) use commands::dispatch;
pub(crate) use layout::locate_repo_root;
pub(crate) use logger::install_logger;
pub(crate) use menu::select_steps;
