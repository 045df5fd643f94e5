//! Reporting sinks: the chat, spreadsheet, social and camera services the
//! relay publishes to, plus host control. Each is a trait so the task
//! sequence can run against fakes in tests.

pub mod camera;
pub mod discord;
pub mod host;
pub mod sheets;
pub mod x;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::osc::Transport;

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One data row read back from a monthly sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub width: u32,
    pub rotation: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            width: 1920,
            rotation: 180,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Log in. The caller retries on failure.
    async fn connect(&self) -> Result<()>;
    async fn list_channels(&self) -> Result<Vec<Channel>>;
    async fn send_text(&self, channel_id: &str, text: &str) -> Result<()>;
    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()>;
}

#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn authenticate(&self) -> Result<()>;
    /// Create the sheet with `header` as its first row unless it exists.
    async fn ensure_sheet(&self, name: &str, header: &[String]) -> Result<()>;
    async fn append_row(&self, name: &str, values: &[serde_json::Value]) -> Result<()>;
    async fn update_header_row(&self, name: &str, values: &[String]) -> Result<()>;
    async fn read_rows(&self, name: &str) -> Result<Vec<SheetRow>>;
}

#[async_trait]
pub trait SocialPoster: Send + Sync {
    async fn post_text(&self, body: &str) -> Result<()>;
}

#[async_trait]
pub trait Camera: Send + Sync {
    async fn capture_jpeg(&self, path: &Path, options: CaptureOptions) -> Result<()>;
}

#[async_trait]
pub trait HostControl: Send + Sync {
    async fn reboot(&self) -> Result<()>;
}

/// Every collaborator the relay talks to. Optional sinks are `None` when
/// their credentials are not configured.
#[derive(Clone)]
pub struct Sinks {
    pub chat: Arc<dyn ChatClient>,
    pub sheets: Option<Arc<dyn SheetStore>>,
    pub social: Option<Arc<dyn SocialPoster>>,
    pub camera: Option<Arc<dyn Camera>>,
    pub host: Arc<dyn HostControl>,
    pub transport: Arc<dyn Transport>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Turn a non-success HTTP response into an error carrying status and body.
pub(crate) async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    bail!("{what} failed ({status}): {body}");
}
