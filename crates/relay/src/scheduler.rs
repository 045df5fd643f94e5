//! Trigger source and the debounced periodic gate.
//!
//! In internal mode the relay sends itself `/trig` once a second over the
//! transport. Every `/trig`, wherever it came from, is checked against the
//! gate; a pass runs the regular-task sequence once for that minute.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::osc::{trigger_message, Transport};

/// Period of the internal trigger.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Internal,
    /// `/trig` arrives from elsewhere; no emitter is started.
    External,
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            other => Err(format!("unknown trigger mode '{other}' (use internal/external)")),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Whether a trigger at `minute` may fire the regular tasks.
///
/// Fires only on minutes divisible by `interval`, at most once per minute,
/// and only while chat is connected.
pub fn gate_passes(minute: u32, interval: u32, last_fired: Option<u32>, connected: bool) -> bool {
    interval > 0 && minute % interval == 0 && last_fired != Some(minute) && connected
}

/// Emit `/trig` to ourselves forever. Intended to be `tokio::spawn`-ed.
pub async fn emit_ticks(transport: Arc<dyn Transport>) {
    info!(period_ms = TICK_INTERVAL.as_millis() as u64, "internal trigger started");
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = transport.send("127.0.0.1", trigger_message()).await {
            warn!("internal trigger send failed: {e:#}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::fake::FakeTransport;

    // -- gate ---------------------------------------------------------------

    #[test]
    fn fires_on_interval_minute() {
        assert!(gate_passes(10, 10, None, true));
        assert!(gate_passes(0, 10, Some(50), true));
    }

    #[test]
    fn never_fires_off_interval() {
        for minute in 0..60 {
            if minute % 10 != 0 {
                assert!(!gate_passes(minute, 10, None, true), "minute {minute}");
            }
        }
    }

    #[test]
    fn at_most_once_per_minute() {
        assert!(!gate_passes(20, 10, Some(20), true));
    }

    #[test]
    fn requires_chat_connection() {
        assert!(!gate_passes(30, 10, None, false));
    }

    #[test]
    fn same_minute_next_hour_fires_again_after_another_pass() {
        // 10 -> 20 -> ... -> 10: the debounce only remembers the last minute.
        assert!(gate_passes(10, 10, Some(0), true));
    }

    #[test]
    fn interval_one_fires_every_minute() {
        assert!(gate_passes(7, 1, Some(6), true));
    }

    #[test]
    fn zero_interval_never_fires() {
        assert!(!gate_passes(0, 0, None, true));
    }

    // -- mode ---------------------------------------------------------------

    #[test]
    fn parse_trigger_mode() {
        assert_eq!("internal".parse::<TriggerMode>(), Ok(TriggerMode::Internal));
        assert_eq!(" External ".parse::<TriggerMode>(), Ok(TriggerMode::External));
        assert!("cron".parse::<TriggerMode>().is_err());
    }

    // -- emitter ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn emitter_sends_trig_to_self_every_second() {
        let transport = Arc::new(FakeTransport::default());
        let handle = tokio::spawn(emit_ticks(transport.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        let sent = transport.sent.lock().unwrap();
        // immediate first tick, then at 1s and 2s
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(host, m)| host == "127.0.0.1" && m.addr == "/trig"));
    }
}
