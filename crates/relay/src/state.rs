//! Shared runtime state: the device registry, scheduler bookkeeping, the
//! failure counter and a ring buffer of recent events for the status page.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::registry::{Device, DeviceRegistry};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the relay mutates at runtime. Locks are held only between
/// awaits, never across a call into a sink.
pub struct SystemState {
    pub started_at: Instant,
    pub chat_connected: bool,
    pub registry: DeviceRegistry,
    /// Minute-of-hour of the last gate-pass; `None` until the first one.
    pub last_fired_minute: Option<u32>,
    pub network_failures: u32,
    pub cycle_running: bool,
    pub reboot_scheduled: bool,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Sync,
    Cycle,
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub chat_connected: bool,
    pub last_fired_minute: Option<u32>,
    pub network_failures: u32,
    pub reboot_scheduled: bool,
    pub devices: Vec<Device>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            started_at: Instant::now(),
            chat_connected: false,
            registry,
            last_fired_minute: None,
            network_failures: 0,
            cycle_running: false,
            reboot_scheduled: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared(registry: DeviceRegistry) -> SharedState {
        Arc::new(RwLock::new(Self::new(registry)))
    }

    /// Store a telemetry reading. Returns false for an unknown tag.
    pub fn record_reading(&mut self, tag: &str, humidity: f64, temperature: f64) -> bool {
        if !self.registry.set_reading(tag, humidity, temperature) {
            return false;
        }
        self.push_event(
            EventKind::Reading,
            format!("{tag}: humidity={humidity:.2} temperature={temperature:.2}"),
        );
        true
    }

    /// Store the address a device announced in its ping.
    pub fn record_sync(&mut self, tag: &str, address: &str) -> bool {
        if !self.registry.set_address(tag, address) {
            return false;
        }
        let label = self.registry.get(tag).map_or(tag, |d| d.label.as_str());
        let detail = format!("{label} ({tag}) at {address}");
        self.push_event(EventKind::Sync, detail);
        true
    }

    /// Add sink failures to the running count and return the new total.
    pub fn add_failures(&mut self, n: u32) -> u32 {
        self.network_failures = self.network_failures.saturating_add(n);
        self.network_failures
    }

    pub fn record_cycle(&mut self, detail: String) {
        self.push_event(EventKind::Cycle, detail);
    }

    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            chat_connected: self.chat_connected,
            last_fired_minute: self.last_fired_minute,
            network_failures: self.network_failures,
            reboot_scheduled: self.reboot_scheduled,
            devices: self.registry.snapshot(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
