//! Process settings from the environment and the static device map from a
//! TOML file. Both are validated up front and report every violation found.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::osc::{COMMAND_NAMESPACE, TRIGGER_ADDR};
use crate::registry::{Device, DeviceRegistry};
use crate::scheduler::TriggerMode;

const DEFAULT_BOT_NAME: &str = "kscbot";
const DEFAULT_INTERVAL_MIN: u32 = 10;
const DEFAULT_CREDENTIALS: &str = "./.credentials/gcp.json";
const DEFAULT_DEVICE_MAP: &str = "devices.toml";
const DEFAULT_OSC_PORT: u16 = 12000;
const DEFAULT_OSC_BIND: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_WEB_PORT: u16 = 8080;
const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Tokyo;
const DEFAULT_CAPTURE_PATH: &str = "capture.jpg";
const DEFAULT_CAMERA_COMMAND: &str = "libcamera-jpeg";

// ---------------------------------------------------------------------------
// Environment settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Settings {
    pub trigger: TriggerMode,
    pub bot_name: String,
    /// Regular-task interval in minutes, 1..=60.
    pub interval: u32,
    pub with_camera: bool,
    pub discord_token: Option<String>,
    pub camera_channel: Option<String>,
    pub credentials_path: PathBuf,
    pub spreadsheet_id: Option<String>,
    pub x_token: Option<String>,
    pub device_map_path: PathBuf,
    /// Local address the OSC socket binds; loopback when a dev node shares the host.
    pub osc_bind: IpAddr,
    pub osc_port: u16,
    pub web_port: u16,
    pub timezone: Tz,
    pub capture_path: PathBuf,
    pub camera_command: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset and blank values
    /// fall back to defaults; unparseable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut errors: Vec<String> = Vec::new();

        let trigger = match get("UPDATE_TRIG") {
            None => TriggerMode::Internal,
            Some(v) => v.parse().unwrap_or_else(|e: String| {
                errors.push(format!("UPDATE_TRIG: {e}"));
                TriggerMode::Internal
            }),
        };

        let interval = parse_or(&get, "REGULAR_TASK_INTERVAL", DEFAULT_INTERVAL_MIN, &mut errors);
        if !(1..=60).contains(&interval) {
            errors.push(format!(
                "REGULAR_TASK_INTERVAL: {interval} out of range [1, 60]"
            ));
        }

        let with_camera = match get("WITH_RPI_CAMERA").as_deref() {
            None => false,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    errors.push(format!("WITH_RPI_CAMERA: '{other}' is not a boolean"));
                    false
                }
            },
        };

        let timezone = match get("TIMEZONE") {
            None => DEFAULT_TIMEZONE,
            Some(v) => v.parse::<Tz>().unwrap_or_else(|_| {
                errors.push(format!("TIMEZONE: unknown timezone '{v}'"));
                DEFAULT_TIMEZONE
            }),
        };

        let osc_bind = parse_or(&get, "OSC_BIND", DEFAULT_OSC_BIND, &mut errors);
        let osc_port = parse_or(&get, "OSC_PORT", DEFAULT_OSC_PORT, &mut errors);
        let web_port = parse_or(&get, "WEB_PORT", DEFAULT_WEB_PORT, &mut errors);

        if !errors.is_empty() {
            bail!(
                "environment validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }

        Ok(Self {
            trigger,
            bot_name: get("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            interval,
            with_camera,
            discord_token: get("DISCORD_TOKEN"),
            camera_channel: get("DISCORD_CHANNEL_CAMERA"),
            credentials_path: get("GOOGLE_CREDENTIALS_PATH")
                .unwrap_or_else(|| DEFAULT_CREDENTIALS.to_string())
                .into(),
            spreadsheet_id: get("GOOGLE_SPREADSHEET_ID"),
            x_token: get("X_ACCESS_TOKEN"),
            device_map_path: get("DEVICE_MAP_PATH")
                .unwrap_or_else(|| DEFAULT_DEVICE_MAP.to_string())
                .into(),
            osc_bind,
            osc_port,
            web_port,
            timezone,
            capture_path: get("CAPTURE_PATH")
                .unwrap_or_else(|| DEFAULT_CAPTURE_PATH.to_string())
                .into(),
            camera_command: get("CAMERA_COMMAND")
                .unwrap_or_else(|| DEFAULT_CAMERA_COMMAND.to_string()),
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    errors: &mut Vec<String>,
) -> T
where
    T: std::str::FromStr,
{
    match get(key) {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            errors.push(format!("{key}: '{v}' is not valid"));
            default
        }),
    }
}

// ---------------------------------------------------------------------------
// Device map
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeviceMap {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub tag: String,
    pub label: String,
    pub channel: String,
    #[serde(default)]
    pub has_pump: bool,
}

impl DeviceMap {
    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = || {
                if d.tag.is_empty() {
                    format!("devices[{i}]")
                } else {
                    format!("device '{}'", d.tag)
                }
            };

            if d.tag.trim().is_empty() {
                errors.push(format!("{}: tag is empty", ctx()));
            } else if !d.tag.starts_with('/') {
                errors.push(format!("{}: tag must start with '/'", ctx()));
            } else if !seen.insert(&d.tag) {
                errors.push(format!("{}: duplicate tag", ctx()));
            }

            for reserved in [COMMAND_NAMESPACE, TRIGGER_ADDR] {
                if in_namespace(&d.tag, reserved) {
                    errors.push(format!("{}: tag is inside reserved '{reserved}'", ctx()));
                }
            }

            if d.label.trim().is_empty() {
                errors.push(format!("{}: label is empty", ctx()));
            }
            if d.channel.trim().is_empty() {
                errors.push(format!("{}: channel is empty", ctx()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "device map validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Pairs of tags where one is a path-segment prefix of the other.
    pub fn overlapping_tags(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::new();
        for (i, a) in self.devices.iter().enumerate() {
            for b in &self.devices[i + 1..] {
                if in_namespace(&b.tag, &a.tag) || in_namespace(&a.tag, &b.tag) {
                    pairs.push((a.tag.as_str(), b.tag.as_str()));
                }
            }
        }
        pairs
    }

    pub fn into_registry(self) -> DeviceRegistry {
        DeviceRegistry::new(
            self.devices
                .into_iter()
                .map(|d| Device::new(&d.tag, &d.label, &d.channel, d.has_pump))
                .collect(),
        )
    }
}

/// `tag` equals `prefix` or continues it on a `/` boundary.
fn in_namespace(tag: &str, prefix: &str) -> bool {
    match tag.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Load and validate the device map from a TOML file.
pub fn load_devices(path: &Path) -> Result<DeviceMap> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read device map: {}", path.display()))?;
    let map: DeviceMap = toml::from_str(&contents)
        .with_context(|| format!("failed to parse device map: {}", path.display()))?;
    map.validate()
        .with_context(|| format!("invalid device map: {}", path.display()))?;

    for (a, b) in map.overlapping_tags() {
        warn!(first = %a, second = %b, "device tags overlap; earlier entry wins");
    }
    Ok(map)
}

// ===========================================================================
// Tests
// ===========================================================================
