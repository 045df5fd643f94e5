//! The regular-task sequence run on every gate-pass.
//!
//! Steps run in order and never abort each other: chat status per device,
//! the hourly spreadsheet row, the morning social summary, and the photo
//! slots. Every failed sink call is counted in the returned report; the
//! caller decides what the count means.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Timelike};
use chrono_tz::Tz;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::registry::Device;
use crate::sinks::sheets::sheet_name_for;
use crate::sinks::{CaptureOptions, Channel, Sinks};

/// Hour (reference timezone) the social summary is posted, at minute 0.
pub const SOCIAL_POST_HOUR: u32 = 7;

/// Daily `(hour, minute)` slots at which a photo is taken.
pub const PHOTO_SLOTS: [(u32, u32); 4] = [(7, 0), (11, 0), (17, 0), (19, 0)];

const PUMP_NOTE: &str = " <Pump active>";

/// Per-cycle settings that come from configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Chat channel photos are posted to.
    pub camera_channel: Option<String>,
    pub capture_path: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub attempts: u32,
    pub failures: u32,
    pub messages_sent: u32,
    pub row_appended: bool,
    pub summary_posted: bool,
    pub photo_published: bool,
}

impl CycleReport {
    fn record(&mut self, step: &str, result: Result<()>) -> bool {
        self.attempts += 1;
        match result {
            Ok(()) => true,
            Err(e) => {
                self.failures += 1;
                error!(step, "network error: {e:#}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

pub fn timestamp(now: &DateTime<Tz>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// `[label] humidity: H%, temperature: T℃`
///
/// Always two decimals, so a device that has not reported yet shows `0.00`.
pub fn summary_line(device: &Device) -> String {
    format!(
        "[{}] humidity: {:.2}%, temperature: {:.2}\u{2103}",
        device.label, device.humidity, device.temperature
    )
}

/// Chat status line: timestamp, summary, and the pump note on even hours
/// at minute 0 for devices with a pump.
pub fn status_line(now: &DateTime<Tz>, device: &Device) -> String {
    let mut line = format!("[{}]{}", timestamp(now), summary_line(device));
    if now.hour() % 2 == 0 && now.minute() == 0 && device.has_pump {
        line.push_str(PUMP_NOTE);
    }
    line
}

/// Spreadsheet header: timestamp, then temperature and humidity per device.
pub fn sheet_header(devices: &[Device]) -> Vec<String> {
    let mut header = vec!["timestamp".to_string()];
    for d in devices {
        header.push(format!("[{}] temperature(\u{2103})", d.label));
        header.push(format!("[{}] humidity(%)", d.label));
    }
    header
}

/// `[temperature, humidity]` per device, flattened in device order.
pub fn reading_values(devices: &[Device]) -> Vec<Value> {
    devices
        .iter()
        .flat_map(|d| [json!(d.temperature), json!(d.humidity)])
        .collect()
}

fn channel_id<'a>(channels: &'a [Channel], name: &str) -> Option<&'a str> {
    channels
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.id.as_str())
}

pub fn is_photo_slot(now: &DateTime<Tz>) -> bool {
    PHOTO_SLOTS.contains(&(now.hour(), now.minute()))
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Capture a photo and post it to the camera channel.
pub async fn publish_photo(sinks: &Sinks, settings: &CycleSettings) -> Result<()> {
    let camera = sinks
        .camera
        .as_ref()
        .ok_or_else(|| anyhow!("camera is disabled"))?;
    camera
        .capture_jpeg(&settings.capture_path, CaptureOptions::default())
        .await?;

    let Some(name) = settings.camera_channel.as_deref() else {
        debug!("no camera channel configured, photo not posted");
        return Ok(());
    };
    let channels = sinks.chat.list_channels().await?;
    match channel_id(&channels, name) {
        Some(id) => sinks.chat.send_file(id, Path::new(&settings.capture_path)).await,
        None => {
            debug!(channel = %name, "camera channel not found");
            Ok(())
        }
    }
}

async fn publish_status(sinks: &Sinks, now: &DateTime<Tz>, devices: &[Device], report: &mut CycleReport) {
    let channels = match sinks.chat.list_channels().await {
        Ok(c) => c,
        Err(e) => {
            report.record("list_channels", Err(e));
            return;
        }
    };

    for device in devices {
        let Some(id) = channel_id(&channels, &device.channel) else {
            debug!(tag = %device.tag, channel = %device.channel, "chat channel not found");
            continue;
        };
        let line = status_line(now, device);
        if report.record("status", sinks.chat.send_text(id, &line).await) {
            report.messages_sent += 1;
            info!("{line}");
        }
    }
}

/// Run the whole sequence for one gate-pass.
pub async fn run(
    sinks: &Sinks,
    settings: &CycleSettings,
    now: &DateTime<Tz>,
    devices: &[Device],
) -> CycleReport {
    let mut report = CycleReport::default();

    publish_status(sinks, now, devices, &mut report).await;

    let values = reading_values(devices);
    if now.minute() == 0 && !values.is_empty() {
        if let Some(sheets) = &sinks.sheets {
            let name = sheet_name_for(now);
            let mut row = vec![json!(timestamp(now))];
            row.extend(values);
            let result = async {
                sheets.ensure_sheet(&name, &sheet_header(devices)).await?;
                sheets.append_row(&name, &row).await
            }
            .await;
            report.row_appended = report.record("sheet", result);
        }
    }

    if now.minute() == 0 && now.hour() == SOCIAL_POST_HOUR {
        if let Some(social) = &sinks.social {
            let body = devices
                .iter()
                .map(summary_line)
                .collect::<Vec<_>>()
                .join("\n");
            report.summary_posted = report.record("social", social.post_text(&body).await);
        }
    }

    if sinks.camera.is_some() && is_photo_slot(now) {
        report.photo_published = report.record("photo", publish_photo(sinks, settings).await);
    }

    report
}

// ===========================================================================
// Tests
// ===========================================================================
