//! `keepalive status`: live session view.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};

use keepalive_core::{ConfigStore, FileStore};
use keepalive_service::paths::socket_path;
use keepalive_service::{request_status, ServiceError};

use super::home_dir;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let payload = match request_status(&home) {
            Ok(status) => status,
            Err(ServiceError::ServiceNotRunning { socket }) => {
                let persisted = FileStore::at(&home)
                    .load_service_status()
                    .context("failed to load persisted service status")?;
                json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                    "persisted_action": persisted.action,
                })
            }
            Err(err) => return Err(err).context("failed to query service status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_human(&payload, &socket_path(&home).display().to_string());
        Ok(())
    }
}

fn print_human(payload: &Value, socket: &str) {
    let Some(session) = payload.get("session") else {
        println!("{:<14}{}", "service", "not running".red());
        println!("{:<14}{}", "socket", socket);
        if let Some(action) = payload.get("persisted_action").and_then(Value::as_str) {
            println!("{:<14}{}", "persisted", action);
        }
        return;
    };

    let running = session.get("running").and_then(Value::as_bool).unwrap_or(false);
    let state = if running { "running".green() } else { "idle".yellow() };
    println!(
        "{:<14}{} (pid {}, up {}s)",
        "service",
        state,
        payload["pid"],
        payload["uptime_seconds"]
    );
    println!("{:<14}{}", "action", text(&session["last_action"]));
    println!("{:<14}{}", "callback", text(&session["callback_handle"]));
    println!("{:<14}{}", "event", text(&session["event_action"]));
    println!("{:<14}{}", "bridge", flag(&session["bridge_live"], "live", "down"));
    println!("{:<14}{}", "timer", flag(&session["timer_armed"], "armed", "idle"));
    match session.get("notification").filter(|n| !n.is_null()) {
        Some(notification) => println!(
            "{:<14}#{} rev {}",
            "notification", notification["service_id"], notification["revision"]
        ),
        None => println!("{:<14}{}", "notification", "hidden".dimmed()),
    }

    let mut locks = Vec::new();
    if session["wake_lock"].as_bool() == Some(true) {
        locks.push("wake");
    }
    if session["network_lock"].as_bool() == Some(true) {
        locks.push("network");
    }
    let locks = if locks.is_empty() {
        "none".to_string()
    } else {
        locks.join(", ")
    };
    println!("{:<14}{}", "locks", locks);
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flag(value: &Value, on: &str, off: &str) -> String {
    if value.as_bool() == Some(true) {
        on.green().to_string()
    } else {
        off.dimmed().to_string()
    }
}
