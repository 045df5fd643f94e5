//! Inbound message dispatch: triggers, admin commands and device telemetry.
//!
//! All mutable state lives in [`SystemState`]; the dispatcher takes the lock
//! only for short, await-free sections. Regular-task cycles and admin
//! commands run as spawned tasks so telemetry keeps flowing while a sink
//! call is outstanding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use rosc::OscMessage;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::osc::{self, AdminCommand, TRIGGER_ADDR};
use crate::registry::Device;
use crate::scheduler::gate_passes;
use crate::sinks::sheets::sheet_name_for;
use crate::sinks::{ChatClient, Sinks};
use crate::state::SharedState;
use crate::tasks::{self, CycleReport, CycleSettings};

/// Reboot once the failure count exceeds this.
pub const FAILURE_THRESHOLD: u32 = 2;

/// Delay between deciding to reboot and rebooting.
pub const REBOOT_DELAY: Duration = Duration::from_secs(4);

/// Pause between chat login attempts.
pub const CHAT_RETRY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Regular-task interval in minutes.
    pub interval: u32,
    pub cycle: CycleSettings,
}

/// What handling one inbound message led to.
#[derive(Debug)]
pub enum Outcome {
    /// Unroutable or malformed; nothing changed.
    Dropped,
    Reading,
    Synced,
    Command(JoinHandle<()>),
    /// Trigger outside the gate.
    Idle,
    /// Gate passed but the previous cycle is still running.
    Busy,
    Cycle(JoinHandle<CycleReport>),
}

#[derive(Clone)]
pub struct Relay {
    shared: SharedState,
    sinks: Sinks,
    settings: Arc<RelaySettings>,
}

impl Relay {
    pub fn new(shared: SharedState, sinks: Sinks, settings: RelaySettings) -> Self {
        Self {
            shared,
            sinks,
            settings: Arc::new(settings),
        }
    }

    pub async fn handle(&self, msg: OscMessage, now: DateTime<Tz>) -> Outcome {
        if msg.addr == TRIGGER_ADDR {
            return self.on_trigger(now).await;
        }
        if let Some(cmd) = AdminCommand::parse(&msg.addr) {
            return Outcome::Command(self.on_command(cmd, now));
        }
        self.on_device_message(msg, now).await
    }

    // -----------------------------------------------------------------------
    // Telemetry ingest
    // -----------------------------------------------------------------------

    async fn on_device_message(&self, msg: OscMessage, now: DateTime<Tz>) -> Outcome {
        let tag = {
            let st = self.shared.read().await;
            match st.registry.find_by_address(&msg.addr) {
                Some(d) => d.tag.clone(),
                None => return Outcome::Dropped,
            }
        };

        if osc::is_ping(&msg.addr) {
            let Some(address) = osc::ping_address(&msg.args) else {
                warn!(tag = %tag, addr = %msg.addr, args = ?msg.args, "ping without address, dropped");
                return Outcome::Dropped;
            };
            self.shared.write().await.record_sync(&tag, address);
            if let Err(e) = self
                .sinks
                .transport
                .send(address, osc::sync_message(&now))
                .await
            {
                warn!(tag = %tag, %address, "sync reply failed: {e:#}");
            }
            debug!(tag = %tag, %address, "ping answered");
            return Outcome::Synced;
        }

        match osc::reading_values(&msg.args) {
            Some((humidity, temperature)) => {
                self.shared
                    .write()
                    .await
                    .record_reading(&tag, humidity, temperature);
                debug!(tag = %tag, humidity, temperature, "reading stored");
                Outcome::Reading
            }
            None => {
                warn!(tag = %tag, addr = %msg.addr, args = ?msg.args, "malformed telemetry, dropped");
                Outcome::Dropped
            }
        }
    }

    // -----------------------------------------------------------------------
    // Scheduler gate + regular-task cycle
    // -----------------------------------------------------------------------

    async fn on_trigger(&self, now: DateTime<Tz>) -> Outcome {
        let minute = now.minute();
        let devices = {
            let mut st = self.shared.write().await;
            if !gate_passes(minute, self.settings.interval, st.last_fired_minute, st.chat_connected) {
                return Outcome::Idle;
            }
            st.last_fired_minute = Some(minute);
            if st.cycle_running {
                warn!(minute, "previous cycle still running, skipping this one");
                st.record_error(format!("cycle at minute {minute} skipped: previous still running"));
                return Outcome::Busy;
            }
            st.cycle_running = true;
            st.registry.snapshot()
        };

        let relay = self.clone();
        Outcome::Cycle(tokio::spawn(async move { relay.run_cycle(now, devices).await }))
    }

    async fn run_cycle(&self, now: DateTime<Tz>, devices: Vec<Device>) -> CycleReport {
        let report = tasks::run(&self.sinks, &self.settings.cycle, &now, &devices).await;

        let mut st = self.shared.write().await;
        st.cycle_running = false;
        if report.failures == 0 && report.attempts > 0 {
            st.network_failures = 0;
        } else {
            st.add_failures(report.failures);
        }
        let failures = st.network_failures;
        st.record_cycle(format!(
            "cycle at {:02}:{:02}: {} sent, {} failed",
            now.hour(),
            now.minute(),
            report.messages_sent,
            report.failures
        ));

        if failures > FAILURE_THRESHOLD && !st.reboot_scheduled {
            st.reboot_scheduled = true;
            st.record_error(format!("{failures} network errors, rebooting"));
            drop(st);
            error!(
                failures,
                "[{}] network error is detected multiple times, rebooting in {}s",
                tasks::timestamp(&now),
                REBOOT_DELAY.as_secs()
            );
            self.schedule_reboot();
        }
        report
    }

    /// Reboot after [`REBOOT_DELAY`]. A failed reboot clears the flag so
    /// the next failing cycle escalates again.
    fn schedule_reboot(&self) {
        let host = self.sinks.host.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REBOOT_DELAY).await;
            if let Err(e) = host.reboot().await {
                error!("reboot failed: {e:#}");
                let mut st = shared.write().await;
                st.reboot_scheduled = false;
                st.record_error(format!("reboot failed: {e:#}"));
            }
        });
    }

    // -----------------------------------------------------------------------
    // Admin commands
    // -----------------------------------------------------------------------

    fn on_command(&self, cmd: AdminCommand, now: DateTime<Tz>) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let label = format!("{cmd:?}").to_lowercase();
            let result = match &cmd {
                AdminCommand::Reboot => {
                    info!("reboot requested");
                    relay.sinks.host.reboot().await
                }
                AdminCommand::Capture => match &relay.sinks.camera {
                    Some(_) => tasks::publish_photo(&relay.sinks, &relay.settings.cycle).await,
                    None => {
                        debug!("capture requested but camera is disabled");
                        return;
                    }
                },
                AdminCommand::Sheet => relay.refresh_sheet_header(&now).await,
                AdminCommand::Unknown(rest) => {
                    warn!(command = %rest, "unknown admin command ignored");
                    return;
                }
            };

            let mut st = relay.shared.write().await;
            match result {
                Ok(()) => st.record_command(format!("{label} done")),
                Err(e) => {
                    error!(command = %label, "admin command failed: {e:#}");
                    st.add_failures(1);
                    st.record_error(format!("{label} failed: {e:#}"));
                }
            }
        })
    }

    async fn refresh_sheet_header(&self, now: &DateTime<Tz>) -> anyhow::Result<()> {
        let Some(sheets) = &self.sinks.sheets else {
            debug!("sheet refresh requested but spreadsheet is disabled");
            return Ok(());
        };
        let devices = self.shared.read().await.registry.snapshot();
        sheets
            .update_header_row(&sheet_name_for(now), &tasks::sheet_header(&devices))
            .await
    }
}

/// Log in to chat, retrying forever, then flag the relay as connected.
pub async fn connect_chat(chat: Arc<dyn ChatClient>, shared: SharedState) {
    loop {
        match chat.connect().await {
            Ok(()) => break,
            Err(e) => {
                error!("chat login failed: {e:#}");
                info!("..retry after {} seconds", CHAT_RETRY.as_secs());
                tokio::time::sleep(CHAT_RETRY).await;
            }
        }
    }

    {
        let mut st = shared.write().await;
        st.chat_connected = true;
        st.record_system("chat connected".to_string());
    }
    info!("chat interface activated");

    match chat.list_channels().await {
        Ok(channels) => {
            for c in channels {
                info!(channel = %c.name, id = %c.id, "chat channel");
            }
        }
        Err(e) => warn!("could not list chat channels: {e:#}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
