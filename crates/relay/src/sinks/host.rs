use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::HostControl;

/// Reboots the machine through systemd. Needs passwordless sudo for
/// `systemctl reboot`.
pub struct SystemctlHost;

#[async_trait]
impl HostControl for SystemctlHost {
    async fn reboot(&self) -> Result<()> {
        let status = Command::new("sudo")
            .args(["systemctl", "reboot"])
            .status()
            .await
            .context("failed to run systemctl reboot")?;
        if !status.success() {
            bail!("systemctl reboot exited with {status}");
        }
        Ok(())
    }
}
