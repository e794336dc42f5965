//! toothd: demo driver for the Toothlink pairing engine.
//!
//! Runs complete pairing workflows between simulated radios sharing one
//! in-process airspace, so the engine can be exercised without hardware.
//!
//! # Usage
//!
//! ```text
//! toothd [--config PATH] pair-demo [--host-name NAME] [--service-index I] [--message M]
//! toothd [--config PATH] scan-demo [--hosts N] [--keep-alive] [--json]
//! ```
//!
//! The log level comes from the config file (`[engine] log_level`) unless
//! `RUST_LOG` is set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tooth_core::{Peer, PeerAddress, ServiceId, Session};
use tooth_engine::infrastructure::storage::config::{self, AppConfig, ConfigError};
use tooth_engine::{
    send_message, Airspace, EngineSettings, HandshakeError, LoopbackConfig, Orchestrator, Radio,
    ScanRequest, TeethRequest, ToothRequest,
};

/// How long a demo waits for the pairing to complete.
const DEMO_TIMEOUT: Duration = Duration::from_secs(30);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Toothlink pairing engine demo.
#[derive(Debug, Parser)]
#[command(name = "toothd", about = "Toothlink pairing engine demo driver", version)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, env = "TOOTHD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pair a simulated host and client and exchange one message.
    PairDemo {
        /// Name the host advertises.  Without it the host keeps its name,
        /// adds the host marker, and the client joins by marker.
        #[arg(long)]
        host_name: Option<String>,

        /// Index into the well-known service table.  Defaults to the
        /// configured service.
        #[arg(long)]
        service_index: Option<usize>,

        /// Text the client sends once connected.
        #[arg(long, default_value = "hello from toothd")]
        message: String,
    },

    /// Advertise a few hosts and scan for them.
    ScanDemo {
        /// Number of advertising hosts.
        #[arg(long, default_value_t = 3)]
        hosts: u8,

        /// Leave the scanner's radio on after the scan.
        #[arg(long)]
        keep_alive: bool,

        /// Print peers as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

/// One peer as printed by `scan-demo`.
#[derive(Debug, Serialize)]
struct PeerRow {
    address: String,
    name: String,
    host: bool,
}

impl From<&Peer> for PeerRow {
    fn from(peer: &Peer) -> Self {
        Self {
            address: peer.address.to_string(),
            name: peer.display_name.clone(),
            host: peer.is_host(),
        }
    }
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let loaded = match path {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    match loaded {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
        Err(e) => Err(e).context("loading configuration"),
    }
}

fn address(n: u8) -> PeerAddress {
    PeerAddress::from_octets([0x02, 0x7e, 0x00, 0x00, 0x00, n])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load(cli.config.as_ref())?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.engine.log_level)),
        )
        .init();

    let settings = cfg.engine_settings().context("invalid configuration")?;

    match cli.command {
        Command::PairDemo {
            host_name,
            service_index,
            message,
        } => {
            let service_id = match service_index {
                Some(index) => ServiceId::known(index)
                    .with_context(|| format!("no well-known service at index {index}"))?,
                None => settings.default_service,
            };
            pair_demo(settings, host_name, service_id, message).await
        }
        Command::ScanDemo {
            hosts,
            keep_alive,
            json,
        } => scan_demo(settings, hosts, keep_alive, json).await,
    }
}

// ── pair-demo ─────────────────────────────────────────────────────────────────

async fn pair_demo(
    settings: EngineSettings,
    host_name: Option<String>,
    service_id: ServiceId,
    message: String,
) -> anyhow::Result<()> {
    let air = Airspace::new();
    let host_radio = air.add_radio(address(1), "toothd-host");
    let client_radio = air.add_radio(address(2), "toothd-client");
    let host = Orchestrator::init(Arc::new(host_radio.clone()), settings.clone())?;
    let client = Orchestrator::init(Arc::new(client_radio), settings)?;

    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<Session>();
    let started = host.teeth(TeethRequest {
        name: host_name.clone(),
        service_id: Some(service_id),
        on_started: Some(Arc::new(|| info!("host listening"))),
        on_accepted: Some(Arc::new(move |session: Session| {
            let _ = accepted_tx.send(session);
        })),
    });
    if !started {
        bail!("host refused to start");
    }
    println!("host advertising as {:?} under {service_id}", host.device_name());

    let (connected_tx, mut connected_rx) = mpsc::unbounded_channel::<Result<Session, String>>();
    let error_tx = connected_tx.clone();
    let outcome = client.tooth(ToothRequest {
        target_name: host_name,
        service_id: Some(service_id),
        on_connected: Some(Arc::new(move |session: Session| {
            let _ = connected_tx.send(Ok(session));
        })),
        on_error: Some(Arc::new(move |e: HandshakeError| {
            let _ = error_tx.send(Err(e.to_string()));
        })),
        ..ToothRequest::default()
    });
    println!("client scan: {outcome}");

    let client_session = tokio::time::timeout(DEMO_TIMEOUT, connected_rx.recv())
        .await
        .context("client never connected")?
        .context("client handshake dropped")?
        .map_err(anyhow::Error::msg)?;
    let host_session = tokio::time::timeout(DEMO_TIMEOUT, accepted_rx.recv())
        .await
        .context("host never accepted")?
        .context("host server dropped")?;
    println!("paired: client {} <-> host {}", client_session.peer(), host_session.peer());

    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<String>();
    host.listen_for_message(
        host_session,
        Some(Arc::new(move |text: String| {
            let _ = message_tx.send(text);
        })),
    );
    send_message(&client_session, &message).await?;
    let received = tokio::time::timeout(DEMO_TIMEOUT, message_rx.recv())
        .await
        .context("host never received the message")?
        .context("message listener stopped")?;
    println!("host received: {received:?}");

    let restored = host_radio.advertised_name();
    if restored == "toothd-host" {
        println!("host name restored to {restored:?}");
    } else {
        warn!(name = %restored, "host name was not restored");
    }

    client.untooth(None);
    host.stop_listening_for_message();
    host.release_resources(true);
    client.release_resources(true);
    Ok(())
}

// ── scan-demo ─────────────────────────────────────────────────────────────────

async fn scan_demo(
    settings: EngineSettings,
    hosts: u8,
    keep_alive: bool,
    json: bool,
) -> anyhow::Result<()> {
    let air = Airspace::new();
    let mut advertisers = Vec::with_capacity(usize::from(hosts));
    for n in 0..hosts {
        let radio = air.add_radio(address(n.saturating_add(10)), &format!("device-{n}"));
        let engine = Orchestrator::init(Arc::new(radio), settings.clone())?;
        engine.teeth(TeethRequest::default());
        advertisers.push(engine);
    }

    let scanner_radio = air.add_radio_with(
        address(1),
        "toothd-scanner",
        LoopbackConfig {
            scan_duration: Duration::from_secs(3),
            ..LoopbackConfig::default()
        },
    );
    let scanner = Orchestrator::init(Arc::new(scanner_radio.clone()), settings)?;

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<()>();
    let outcome = scanner.scan_radius(ScanRequest {
        keep_alive,
        on_scan_started: Some(Arc::new(|| info!("scan started"))),
        on_scan_finished: Some(Arc::new(move || {
            let _ = finished_tx.send(());
        })),
        on_peer_found: Some(Arc::new(move |peer: Peer| {
            let row = PeerRow::from(&peer);
            if json {
                match serde_json::to_string(&row) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "could not encode peer"),
                }
            } else {
                let tag = if row.host { " (host)" } else { "" };
                println!("found {} {:?}{tag}", row.address, row.name);
            }
        })),
        ..ScanRequest::default()
    });
    println!("scan: {outcome}");
    if !outcome.is_scanning() {
        bail!("scan did not start: {outcome}");
    }

    tokio::time::timeout(DEMO_TIMEOUT, finished_rx.recv())
        .await
        .context("scan never finished")?;

    let peers = scanner.peers();
    println!("registry holds {} peer(s)", peers.len());
    if json {
        let rows: Vec<PeerRow> = peers.iter().map(PeerRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }

    if !keep_alive {
        let grace = scanner.settings().grace_period;
        tokio::time::sleep(grace + Duration::from_millis(500)).await;
        println!("scanner radio on after grace period: {}", scanner_radio.is_enabled());
    }

    for engine in &advertisers {
        engine.release_resources(true);
    }
    scanner.release_resources(true);
    Ok(())
}
