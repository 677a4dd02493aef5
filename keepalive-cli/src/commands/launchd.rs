//! `keepalive install|uninstall`: launchd agent management.

use anyhow::{Context, Result};

use keepalive_service::{install_launchd, uninstall_launchd};

use super::home_dir;

pub fn install() -> Result<()> {
    let home = home_dir()?;
    let binary = std::env::current_exe().context("could not locate the keepalive binary")?;
    let path = install_launchd(&home, &binary).context("failed to install launchd agent")?;
    println!("installed launchd agent: {}", path.display());
    Ok(())
}

pub fn uninstall() -> Result<()> {
    let home = home_dir()?;
    uninstall_launchd(&home).context("failed to uninstall launchd agent")?;
    println!("uninstalled launchd agent");
    Ok(())
}
