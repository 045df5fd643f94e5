//! Development sensor node speaking the relay's OSC protocol.
//!
//! The relay answers pings at `<NODE_IP>:<OSC_PORT>`, so the node binds that
//! exact address. To run next to the relay on one host, start the relay with
//! `OSC_BIND=127.0.0.1` and leave the node on its default `127.0.0.2`.

mod sim;

use anyhow::{anyhow, Context, Result};
use rosc::{OscMessage, OscPacket, OscType};
use std::{
    env,
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sim::{ClimateSim, Sample, Scenario};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn ping_message(tag: &str, ip: &str) -> OscMessage {
    OscMessage {
        addr: format!("{tag}/ping"),
        args: vec![OscType::String(ip.to_string())],
    }
}

fn reading_message(tag: &str, sample: Sample) -> OscMessage {
    let args = match sample {
        Sample::Climate {
            humidity,
            temperature,
        } => vec![OscType::Float(humidity as f32), OscType::Float(temperature as f32)],
        Sample::Dropout => vec![OscType::String("nan".into())],
    };
    OscMessage {
        addr: tag.to_string(),
        args,
    }
}

const DEFAULT_NODE_IP: &str = "127.0.0.2";

/// Where the node listens: the address it announces, on the transport port.
fn node_bind(node_ip: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = node_ip
        .parse()
        .with_context(|| format!("NODE_IP '{node_ip}' is not an IP address"))?;
    Ok(SocketAddr::new(ip, port))
}

/// `h:m:s` from a `/sync` reply, if it is one.
fn sync_time(packet: &OscPacket) -> Option<(i32, i32, i32)> {
    let OscPacket::Message(msg) = packet else {
        return None;
    };
    if msg.addr != "/sync" {
        return None;
    }
    match msg.args.as_slice() {
        [OscType::Int(h), OscType::Int(m), OscType::Int(s)] => Some((*h, *m, *s)),
        _ => None,
    }
}

async fn send(socket: &UdpSocket, relay: SocketAddr, msg: OscMessage) -> Result<()> {
    let buf = rosc::encoder::encode(&OscPacket::Message(msg))
        .map_err(|e| anyhow!("osc encode failed: {e:?}"))?;
    socket
        .send_to(&buf, relay)
        .await
        .with_context(|| format!("send to {relay} failed"))?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let tag = env::var("NODE_TAG").unwrap_or_else(|_| "/sensorA".to_string());
    let relay_host = env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("OSC_PORT", 12000);
    let node_ip = env::var("NODE_IP").unwrap_or_else(|_| DEFAULT_NODE_IP.to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 10);
    let ping_every_s: u64 = env_or("PING_EVERY_S", 60);
    let diurnal_period_s: f64 = env_or("SIM_DIURNAL_PERIOD_S", 600.0);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let relay: SocketAddr = tokio::net::lookup_host((relay_host.as_str(), port))
        .await
        .with_context(|| format!("failed to resolve {relay_host}"))?
        .next()
        .with_context(|| format!("no address for {relay_host}"))?;
    let bind = node_bind(&node_ip, port)?;
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    info!(%tag, %relay, %bind, %scenario, sample_every_s, "sensor node started");

    let mut sim = ClimateSim::new(scenario, sample_every_s as f64, diurnal_period_s);
    let mut sample_tick = tokio::time::interval(Duration::from_secs(sample_every_s.max(1)));
    let mut ping_tick = tokio::time::interval(Duration::from_secs(ping_every_s.max(1)));
    let mut buf = [0u8; 1536];

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if let Err(e) = send(&socket, relay, ping_message(&tag, &node_ip)).await {
                    warn!("ping failed: {e:#}");
                }
            }
            _ = sample_tick.tick() => {
                let sample = sim.sample();
                match send(&socket, relay, reading_message(&tag, sample)).await {
                    Ok(()) => info!(?sample, "published reading"),
                    Err(e) => warn!("publish failed: {e:#}"),
                }
            }
            recv = socket.recv_from(&mut buf) => {
                let Ok((len, from)) = recv else { continue };
                match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => match sync_time(&packet) {
                        Some((h, m, s)) => info!(%from, "relay time {h:02}:{m:02}:{s:02}"),
                        None => warn!(%from, ?packet, "unexpected packet"),
                    },
                    Err(e) => warn!(%from, "undecodable datagram: {e:?}"),
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
