//! Still capture through the Raspberry Pi camera utility.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{Camera, CaptureOptions};

pub struct CommandCamera {
    command: String,
}

impl CommandCamera {
    /// `command` is the capture executable, e.g. `libcamera-jpeg` or `rpicam-jpeg`.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl Camera for CommandCamera {
    async fn capture_jpeg(&self, path: &Path, options: CaptureOptions) -> Result<()> {
        let status = Command::new(&self.command)
            .arg("-o")
            .arg(path)
            .args(["--width", &options.width.to_string()])
            .args(["--rotation", &options.rotation.to_string()])
            .arg("--nopreview")
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.command))?;
        if !status.success() {
            bail!("{} exited with {status}", self.command);
        }
        Ok(())
    }
}
