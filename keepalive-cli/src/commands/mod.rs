pub mod launchd;
pub mod lifecycle;
pub mod relay;
pub mod service;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
