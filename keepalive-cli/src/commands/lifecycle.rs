//! `keepalive start|update|restart|stop`: persist the request, then signal.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use keepalive_core::{
    CallbackHandle, ConfigStore, EventType, FileStore, NotificationButton, ServiceAction,
    ServiceStatus, TaskCallbackConfig,
};
use keepalive_service::paths::{logs_dir, stderr_log_path, stdout_log_path};
use keepalive_service::{discard_marker, request_signal, ServiceError};

use super::home_dir;

/// Option changes persisted alongside the action. Unset flags leave the
/// stored value untouched.
#[derive(Args, Debug, Default)]
pub struct OptionArgs {
    /// Callback handle to run (a key of `callbacks` in config.yaml).
    #[arg(long)]
    pub callback: Option<i64>,

    /// Repeat event cadence: nothing, once or repeat.
    #[arg(long, value_parser = parse_event_type)]
    pub event: Option<EventType>,

    /// Interval between repeat events.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    #[arg(long)]
    pub wake_lock: Option<bool>,

    #[arg(long)]
    pub network_lock: Option<bool>,

    /// Notification title.
    #[arg(long)]
    pub title: Option<String>,

    /// Notification text.
    #[arg(long)]
    pub text: Option<String>,

    /// Notification progress percentage.
    #[arg(long)]
    pub progress: Option<u8>,

    /// Notification button as `id=text`. Repeat to add more; replaces the stored buttons.
    #[arg(long = "button", value_parser = parse_button)]
    pub buttons: Vec<NotificationButton>,

    /// Remove every notification button.
    #[arg(long, conflicts_with = "buttons")]
    pub clear_buttons: bool,
}

impl OptionArgs {
    fn touches_task_options(&self) -> bool {
        self.event.is_some()
            || self.interval_ms.is_some()
            || self.wake_lock.is_some()
            || self.network_lock.is_some()
    }

    fn touches_content(&self) -> bool {
        self.title.is_some()
            || self.text.is_some()
            || self.progress.is_some()
            || !self.buttons.is_empty()
            || self.clear_buttons
    }

    /// Write every record these flags change.
    pub fn apply(self, store: &FileStore) -> Result<()> {
        if let Some(handle) = self.callback {
            store
                .save_task_callback(&TaskCallbackConfig {
                    callback_handle: Some(CallbackHandle(handle)),
                })
                .context("failed to save task callback")?;
        }

        if self.touches_task_options() {
            let mut options = store
                .load_task_options()
                .context("failed to load task options")?;
            if let Some(kind) = self.event {
                options.event_action.kind = kind;
            }
            if let Some(interval) = self.interval_ms {
                options.event_action.interval_millis = interval;
            }
            if options.event_action.kind == EventType::Repeat
                && options.event_action.interval_millis == 0
            {
                bail!("--event repeat needs a non-zero --interval-ms");
            }
            if let Some(wake) = self.wake_lock {
                options.allow_wake_lock = wake;
            }
            if let Some(network) = self.network_lock {
                options.allow_network_lock = network;
            }
            store
                .save_task_options(&options)
                .context("failed to save task options")?;
        }

        if self.touches_content() {
            let mut content = store
                .load_notification_content()
                .context("failed to load notification content")?;
            if let Some(title) = self.title {
                content.title = title;
            }
            if let Some(text) = self.text {
                content.text = text;
            }
            if let Some(progress) = self.progress {
                content.progress = progress;
            }
            if self.clear_buttons {
                content.buttons.clear();
            } else if !self.buttons.is_empty() {
                content.buttons = self.buttons;
            }
            store
                .save_notification_content(&content)
                .context("failed to save notification content")?;
        }
        Ok(())
    }
}

pub fn run(action: ServiceAction, options: OptionArgs) -> Result<()> {
    let home = home_dir()?;
    let store = FileStore::at(&home);

    options.apply(&store)?;
    store
        .save_service_status(&ServiceStatus::new(action))
        .context("failed to save service status")?;

    match request_signal(&home, action) {
        Ok(reply) => {
            let stickiness = reply
                .get("stickiness")
                .and_then(|value| value.as_str())
                .unwrap_or("unknown");
            println!("{} {action} ({stickiness})", "signalled".green());
        }
        Err(ServiceError::ServiceNotRunning { .. }) => match action {
            ServiceAction::Start | ServiceAction::Restart => {
                let pid = launch_detached(&home)?;
                println!("{} service (pid {pid})", "launched".green());
            }
            ServiceAction::Stop => {
                // A crash restart may still be pending from the last exit.
                if discard_marker(&home).context("failed to cancel scheduled restart")? {
                    println!("service is not running; stop persisted, pending restart cancelled");
                } else {
                    println!("service is not running; stop persisted");
                }
            }
            _ => println!("service is not running; {action} persisted"),
        },
        Err(err) => return Err(err).with_context(|| format!("failed to signal {action}")),
    }
    Ok(())
}

/// Spawn `keepalive run` in the background with output appended to the service logs.
fn launch_detached(home: &Path) -> Result<u32> {
    let program = std::env::current_exe().context("could not locate the keepalive binary")?;
    let logs = logs_dir(home);
    fs::create_dir_all(&logs).with_context(|| format!("create {}", logs.display()))?;

    let open = |path: &Path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))
    };
    let stdout = open(&stdout_log_path(home))?;
    let stderr = open(&stderr_log_path(home))?;

    let child = Command::new(program)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .context("failed to launch the service")?;
    Ok(child.id())
}

fn parse_event_type(raw: &str) -> std::result::Result<EventType, String> {
    match raw.to_ascii_lowercase().as_str() {
        "nothing" => Ok(EventType::Nothing),
        "once" => Ok(EventType::Once),
        "repeat" => Ok(EventType::Repeat),
        other => Err(format!(
            "unknown event type '{other}'; expected: nothing, once, repeat"
        )),
    }
}

fn parse_button(raw: &str) -> std::result::Result<NotificationButton, String> {
    match raw.split_once('=') {
        Some((id, text)) if !id.trim().is_empty() => Ok(NotificationButton::new(id.trim(), text)),
        _ => Err(format!("expected a button as id=text, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepalive_core::EventAction;
    use tempfile::TempDir;

    #[test]
    fn unset_flags_leave_records_alone() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::at(home.path());
        store
            .save_task_callback(&TaskCallbackConfig {
                callback_handle: Some(CallbackHandle(3)),
            })
            .expect("seed");

        OptionArgs {
            title: Some("Syncing".into()),
            ..OptionArgs::default()
        }
        .apply(&store)
        .expect("apply");

        assert_eq!(
            store.load_task_callback().expect("callback").callback_handle,
            Some(CallbackHandle(3))
        );
        assert_eq!(store.load_notification_content().expect("content").title, "Syncing");
        assert!(!store.record_path(keepalive_core::Record::TaskOptions).exists());
    }

    #[test]
    fn interval_alone_keeps_the_stored_cadence() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::at(home.path());
        OptionArgs {
            event: Some(EventType::Repeat),
            interval_ms: Some(1000),
            ..OptionArgs::default()
        }
        .apply(&store)
        .expect("apply");

        OptionArgs {
            interval_ms: Some(250),
            ..OptionArgs::default()
        }
        .apply(&store)
        .expect("apply");

        assert_eq!(
            store.load_task_options().expect("options").event_action,
            EventAction::repeat(250)
        );
    }

    #[test]
    fn repeat_without_interval_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let err = OptionArgs {
            event: Some(EventType::Repeat),
            ..OptionArgs::default()
        }
        .apply(&FileStore::at(home.path()))
        .unwrap_err();
        assert!(err.to_string().contains("--interval-ms"), "got: {err}");
    }

    #[test]
    fn buttons_parse_as_id_and_text() {
        assert_eq!(
            parse_button("stop=Stop now").expect("button"),
            NotificationButton::new("stop", "Stop now")
        );
        assert!(parse_button("=text").is_err());
        assert!(parse_button("no-separator").is_err());
    }
}
