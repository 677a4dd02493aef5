use std::path::{Path, PathBuf};

pub const SERVICE_LABEL: &str = "dev.keepalive.service";

pub const SERVICE_STDOUT_LOG: &str = "service.log";
pub const SERVICE_STDERR_LOG: &str = "service-err.log";
pub const SERVICE_SOCKET: &str = "service.sock";
pub const NOTIFICATION_FILE: &str = "notification.json";
pub const RESTART_MARKER: &str = "restart.json";

pub fn keepalive_root(home: &Path) -> PathBuf {
    home.join(".keepalive")
}

pub fn run_dir(home: &Path) -> PathBuf {
    keepalive_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(SERVICE_SOCKET)
}

pub fn notification_path(home: &Path) -> PathBuf {
    run_dir(home).join(NOTIFICATION_FILE)
}

pub fn restart_marker_path(home: &Path) -> PathBuf {
    run_dir(home).join(RESTART_MARKER)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    keepalive_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(SERVICE_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(SERVICE_STDERR_LOG)
}

pub fn launch_agents_dir(home: &Path) -> PathBuf {
    home.join("Library").join("LaunchAgents")
}

pub fn launchd_plist_path(home: &Path) -> PathBuf {
    launch_agents_dir(home).join(format!("{SERVICE_LABEL}.plist"))
}
