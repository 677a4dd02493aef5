//! Keepalive: foreground service host CLI.
//!
//! # Usage
//!
//! ```text
//! keepalive run [--resurrected]
//! keepalive start|update|restart [--callback <id>] [--event nothing|once|repeat] [--interval-ms <n>]
//!                                [--wake-lock <bool>] [--network-lock <bool>]
//!                                [--title <t>] [--text <t>] [--progress <n>] [--button id=text]...
//! keepalive stop
//! keepalive status [--json]
//! keepalive send <data>
//! keepalive event pressed|dismissed|button [--id <button>]
//! keepalive task-removed
//! keepalive install|uninstall
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    lifecycle::OptionArgs,
    relay::{EventArgs, SendArgs},
    service::{RelaunchArgs, RunArgs},
    status::StatusArgs,
};
use keepalive_core::ServiceAction;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "keepalive",
    version,
    about = "Keep an application callback running as a supervised background service",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the service in the foreground (reconciler + socket server).
    Run(RunArgs),

    /// Persist START plus any option changes, then start or signal the service.
    Start(OptionArgs),

    /// Persist UPDATE plus option changes and signal a running service.
    Update(OptionArgs),

    /// Persist RESTART plus any option changes, then start or signal the service.
    Restart(OptionArgs),

    /// Persist STOP and signal a running service.
    Stop,

    /// Show the live session, or the persisted action when not running.
    Status(StatusArgs),

    /// Deliver a data payload to the running callback.
    Send(SendArgs),

    /// Relay a notification event to the running callback.
    Event(EventArgs),

    /// Report that the host task was removed.
    TaskRemoved,

    /// Install and bootstrap the launchd agent.
    Install,

    /// Boot out and remove the launchd agent.
    Uninstall,

    /// Re-enter the service after a scheduled restart delay.
    #[command(hide = true)]
    Relaunch(RelaunchArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => return args.run(),
        Commands::Relaunch(args) => return args.run(),
        Commands::Start(options) => commands::lifecycle::run(ServiceAction::Start, options),
        Commands::Update(options) => commands::lifecycle::run(ServiceAction::Update, options),
        Commands::Restart(options) => commands::lifecycle::run(ServiceAction::Restart, options),
        Commands::Stop => commands::lifecycle::run(ServiceAction::Stop, OptionArgs::default()),
        Commands::Status(args) => args.run(),
        Commands::Send(args) => args.run(),
        Commands::Event(args) => args.run(),
        Commands::TaskRemoved => commands::relay::task_removed(),
        Commands::Install => commands::launchd::install(),
        Commands::Uninstall => commands::launchd::uninstall(),
    }?;
    Ok(ExitCode::SUCCESS)
}
