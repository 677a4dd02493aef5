//! `keepalive send|event|task-removed`: deliver host events to the running service.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use keepalive_service::reconciler::ExternalEvent;
use keepalive_service::{request_event, request_send, request_task_removed, ServiceError};

use super::home_dir;

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Payload handed to the callback's `onReceiveData`.
    pub data: String,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let reply = not_running_hint(request_send(&home, self.data))
            .context("failed to send data")?;
        if reply["delivered"].as_bool() == Some(true) {
            println!("{}", "delivered".green());
        } else {
            println!("{}", "dropped: no running session".yellow());
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct EventArgs {
    /// pressed, dismissed or button.
    pub kind: String,

    /// Button id, for `button` events.
    #[arg(long)]
    pub id: Option<String>,
}

impl EventArgs {
    pub fn run(self) -> Result<()> {
        let Some(event) = ExternalEvent::parse(&self.kind) else {
            bail!(
                "unknown event kind '{}'; expected: pressed, dismissed, button",
                self.kind
            );
        };
        if event == ExternalEvent::ButtonPressed && self.id.is_none() {
            bail!("button events need --id");
        }

        let home = home_dir()?;
        not_running_hint(request_event(&home, &self.kind, self.id))
            .context("failed to relay event")?;
        println!("{} {}", "relayed".green(), event.method());
        Ok(())
    }
}

pub fn task_removed() -> Result<()> {
    let home = home_dir()?;
    let reply = not_running_hint(request_task_removed(&home))
        .context("failed to report task removal")?;
    println!("{}", reply["directive"].as_str().unwrap_or("unknown"));
    Ok(())
}

fn not_running_hint<T>(result: Result<T, ServiceError>) -> Result<T> {
    result.map_err(|err| match err {
        ServiceError::ServiceNotRunning { .. } => {
            anyhow::Error::new(err).context("start it with `keepalive start`")
        }
        other => other.into(),
    })
}
