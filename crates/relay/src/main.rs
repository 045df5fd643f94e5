mod config;
mod osc;
mod registry;
mod relay;
mod scheduler;
mod sinks;
mod state;
mod tasks;
mod web;

use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use osc::{Transport, UdpTransport, MAX_DATAGRAM};
use relay::{connect_chat, Relay, RelaySettings};
use scheduler::TriggerMode;
use sinks::camera::CommandCamera;
use sinks::discord::DiscordClient;
use sinks::host::SystemctlHost;
use sinks::sheets::{sheet_name_for_now, SheetsClient};
use sinks::x::XClient;
use sinks::{Camera, ChatClient, SheetStore, Sinks, SocialPoster};
use state::SystemState;
use tasks::CycleSettings;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let settings = Settings::from_env()?;
    let tz = settings.timezone;
    info!(
        "{} started at {}",
        settings.bot_name,
        Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S")
    );

    let registry = config::load_devices(&settings.device_map_path)?.into_registry();
    for d in registry.iter() {
        info!(tag = %d.tag, label = %d.label, channel = %d.channel, has_pump = d.has_pump, "device created");
    }
    if registry.is_empty() {
        warn!("device map is empty, nothing will be reported");
    } else {
        info!(count = registry.len(), "devices registered");
    }
    let shared = SystemState::shared(registry);

    // ── Transport ───────────────────────────────────────────────────
    let bind = SocketAddr::new(settings.osc_bind, settings.osc_port);
    let socket = Arc::new(
        UdpSocket::bind(bind)
            .await
            .with_context(|| format!("failed to bind OSC port {}", settings.osc_port))?,
    );
    let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new(socket.clone(), settings.osc_port));
    info!(%bind, "listening for OSC");

    // ── Sinks ───────────────────────────────────────────────────────
    let chat: Arc<dyn ChatClient> = Arc::new(DiscordClient::new(
        settings.discord_token.as_deref().unwrap_or_default(),
    ));

    let sheets: Option<Arc<dyn SheetStore>> = match &settings.spreadsheet_id {
        Some(id) => {
            let client = SheetsClient::new(&settings.credentials_path, id);
            match client.authenticate().await {
                Ok(()) => {
                    info!("spreadsheet authenticated");
                    let name = sheet_name_for_now(tz);
                    match client.read_rows(&name).await {
                        Ok(rows) => info!(sheet = %name, rows = rows.len(), "rows recorded this month"),
                        Err(e) => warn!(sheet = %name, "could not read sheet: {e:#}"),
                    }
                }
                Err(e) => error!("spreadsheet authentication failed: {e:#}"),
            }
            Some(Arc::new(client))
        }
        None => {
            info!("GOOGLE_SPREADSHEET_ID not set, spreadsheet disabled");
            None
        }
    };

    let social: Option<Arc<dyn SocialPoster>> = match &settings.x_token {
        Some(token) => Some(Arc::new(XClient::new(token))),
        None => {
            info!("X_ACCESS_TOKEN not set, social post disabled");
            None
        }
    };

    let camera: Option<Arc<dyn Camera>> = if settings.with_camera {
        Some(Arc::new(CommandCamera::new(&settings.camera_command)))
    } else {
        None
    };

    let sinks = Sinks {
        chat: chat.clone(),
        sheets,
        social,
        camera,
        host: Arc::new(SystemctlHost),
        transport: transport.clone(),
    };

    let relay = Relay::new(
        shared.clone(),
        sinks,
        RelaySettings {
            interval: settings.interval,
            cycle: CycleSettings {
                camera_channel: settings.camera_channel.clone(),
                capture_path: settings.capture_path.clone(),
            },
        },
    );

    // ── Background tasks ────────────────────────────────────────────
    {
        let web_state = shared.clone();
        let port = settings.web_port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, port).await {
                error!("status endpoint stopped: {e:#}");
            }
        });
    }

    if settings.discord_token.is_some() {
        tokio::spawn(connect_chat(chat, shared.clone()));
    } else {
        warn!("DISCORD_TOKEN not set, chat stays disconnected and regular tasks never run");
    }

    info!(mode = %settings.trigger, interval = settings.interval, "trigger configured");
    if settings.trigger == TriggerMode::Internal {
        tokio::spawn(scheduler::emit_ticks(transport));
    }

    // ── Receive loop ────────────────────────────────────────────────
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("OSC receive error: {e}");
                continue;
            }
        };
        let messages = match osc::decode(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                warn!(%from, "undecodable datagram: {e:#}");
                continue;
            }
        };
        for msg in messages {
            debug!(%from, addr = %msg.addr, "message");
            relay.handle(msg, Utc::now().with_timezone(&tz)).await;
        }
    }
}
