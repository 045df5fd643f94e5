//! OSC address space, payload helpers and the outbound UDP transport.
//!
//! Devices publish under their tag, admin commands live under `/cmd`, and
//! the scheduler listens for `/trig`. Everything else is routed by prefix.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Address space
// ---------------------------------------------------------------------------

pub(crate) const TRIGGER_ADDR: &str = "/trig";
pub(crate) const COMMAND_NAMESPACE: &str = "/cmd";
pub(crate) const SYNC_ADDR: &str = "/sync";
const PING_SUFFIX: &str = "/ping";

/// Largest datagram we accept; OSC messages from the sensors are tiny.
pub(crate) const MAX_DATAGRAM: usize = 1536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AdminCommand {
    Reboot,
    Capture,
    Sheet,
    Unknown(String),
}

impl AdminCommand {
    /// Parse an address in the `/cmd` namespace. Returns `None` for anything
    /// outside it, so device routing never sees `/cmd/...`.
    pub(crate) fn parse(addr: &str) -> Option<Self> {
        let rest = addr.strip_prefix(COMMAND_NAMESPACE)?;
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        Some(match rest {
            "/reboot" => Self::Reboot,
            "/capture" => Self::Capture,
            "/sheet" => Self::Sheet,
            other => Self::Unknown(other.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

pub(crate) fn is_ping(addr: &str) -> bool {
    addr.ends_with(PING_SUFFIX)
}

/// The network address a device announces in its ping.
pub(crate) fn ping_address(args: &[OscType]) -> Option<&str> {
    match args.first() {
        Some(OscType::String(s)) if !s.trim().is_empty() => Some(s.trim()),
        _ => None,
    }
}

fn as_f64(arg: &OscType) -> Option<f64> {
    let v = match arg {
        OscType::Float(v) => *v as f64,
        OscType::Double(v) => *v,
        OscType::Int(v) => *v as f64,
        OscType::Long(v) => *v as f64,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// `(humidity, temperature)` from a telemetry message, both rounded to two
/// decimals. `None` if either argument is missing or not numeric.
pub(crate) fn reading_values(args: &[OscType]) -> Option<(f64, f64)> {
    let humidity = as_f64(args.first()?)?;
    let temperature = as_f64(args.get(1)?)?;
    Some((round2(humidity), round2(temperature)))
}

/// Two-decimal rounding of the exact binary value, half away from zero.
///
/// A value can only sit exactly on a thousandths `5` when it is a multiple
/// of 1/8, so those are rounded in integer thousandths; everything else is
/// not a tie and `{:.2}` already prints the nearest digits.
pub(crate) fn round2(v: f64) -> f64 {
    let eighths = v * 8.0;
    if eighths.fract() == 0.0 && eighths.abs() < 1e12 {
        let thousandths = eighths as i64 * 125;
        if thousandths.abs() % 10 == 5 {
            let hundredths = (thousandths + 5 * thousandths.signum()) / 10;
            return hundredths as f64 / 100.0;
        }
    }
    format!("{v:.2}").parse().unwrap_or(v)
}

/// `/sync hour minute second` in the reference timezone.
pub(crate) fn sync_message(now: &DateTime<Tz>) -> OscMessage {
    OscMessage {
        addr: SYNC_ADDR.to_string(),
        args: vec![
            OscType::Int(now.hour() as i32),
            OscType::Int(now.minute() as i32),
            OscType::Int(now.second() as i32),
        ],
    }
}

pub(crate) fn trigger_message() -> OscMessage {
    OscMessage {
        addr: TRIGGER_ADDR.to_string(),
        args: vec![],
    }
}

/// Decode one datagram, flattening bundles into their messages in order.
pub(crate) fn decode(buf: &[u8]) -> Result<Vec<OscMessage>> {
    let (_, packet) =
        rosc::decoder::decode_udp(buf).map_err(|e| anyhow!("osc decode failed: {e:?}"))?;
    let mut out = Vec::new();
    flatten(packet, &mut out);
    Ok(out)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(m) => out.push(m),
        OscPacket::Bundle(b) => {
            for p in b.content {
                flatten(p, out);
            }
        }
    }
}

pub(crate) fn encode(msg: OscMessage) -> Result<Vec<u8>> {
    rosc::encoder::encode(&OscPacket::Message(msg)).map_err(|e| anyhow!("osc encode failed: {e:?}"))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outbound side of the local message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to `host` on the transport port.
    async fn send(&self, host: &str, msg: OscMessage) -> Result<()>;
}

/// UDP transport sharing the relay's bound socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    port: u16,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, port: u16) -> Self {
        Self { socket, port }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, host: &str, msg: OscMessage) -> Result<()> {
        let addr = msg.addr.clone();
        let buf = encode(msg)?;
        let target: SocketAddr = tokio::net::lookup_host((host, self.port))
            .await
            .with_context(|| format!("failed to resolve {host}"))?
            .next()
            .ok_or_else(|| anyhow!("no address for {host}"))?;
        self.socket
            .send_to(&buf, target)
            .await
            .with_context(|| format!("failed to send {addr} to {target}"))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
