use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.tasksync`, shared with the config file.
pub fn tasksync_root(home: &Path) -> PathBuf {
    tasksync_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    tasksync_root(home).join(DAEMON_SOCKET)
}
