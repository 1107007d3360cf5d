mod config;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use gattlink_ble::PeripheralSession;
use gattlink_core::{
    append_checksum, checksum8, strip_checksum, verify_checksum, ByteCounters, Direction, Packet,
    PeerId, TransportConfig,
};
use gattlink_peripheral::{
    AttributeServer, DeviceInfo, LoopbackAdapter, LoopbackLink, PeripheralService, SharedServer,
    UartPeripheral,
};
use gattlink_transport::{LinkEvent, RadioLink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CliConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a UART peripheral in-process and send to it over a loopback link
    Loopback {
        /// Text to send; a checksum byte is appended
        #[arg(long)]
        payload: String,
        /// Wait for the peripheral's echo
        #[arg(long)]
        wait_reply: bool,
    },
    /// Append the command checksum to a hex payload
    Checksum { hex: String },
    /// Connect to a nearby UART peripheral and send a payload
    #[cfg(feature = "btleplug")]
    Send {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        wait_reply: bool,
    },
}

struct LoopbackOptions {
    transport: TransportConfig,
    local_name: String,
    central_id: PeerId,
    device_info: DeviceInfo,
}

impl LoopbackOptions {
    fn from_config(config: &CliConfig) -> anyhow::Result<Self> {
        Ok(Self {
            transport: config.transport().context("invalid transport settings")?,
            local_name: config.local_name.clone(),
            central_id: PeerId::new(config.central_id.clone()),
            device_info: config.device_info(),
        })
    }
}

#[derive(Debug)]
struct LoopbackReport {
    reply: Option<Bytes>,
    central: ByteCounters,
    peripheral: ByteCounters,
    peripheral_packets: usize,
}

fn checksum_report(input: &str) -> anyhow::Result<String> {
    let bytes = hex::decode(input.trim()).context("payload is not valid hex")?;
    let framed = append_checksum(&bytes);
    let mut report = format!(
        "framed: {}\nchecksum: {:02x}\nverifies: {}",
        hex::encode(&framed),
        checksum8(&bytes),
        verify_checksum(&framed)
    );
    if let Some(body) = strip_checksum(&bytes) {
        report.push_str(&format!("\ninput already framed: {}", hex::encode(body)));
    }
    Ok(report)
}

fn spawn_pump<L>(
    session: Arc<PeripheralSession<L>>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) -> JoinHandle<()>
where
    L: RadioLink + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(packet) = session.handle_event(event) {
                debug!(bytes = packet.len(), "rx packet");
            }
        }
    })
}

/// Completes a chunked echo: `first` resolved the reply wait, the remaining
/// notifications land in the central ledger until the checksum verifies.
async fn collect_reply(
    first: Bytes,
    received: &mut mpsc::UnboundedReceiver<Packet>,
    timeout: Duration,
) -> anyhow::Result<Bytes> {
    let mut reply = first.to_vec();
    let complete = tokio::time::timeout(timeout, async {
        while !verify_checksum(&reply) {
            match received.recv().await {
                Some(packet) if packet.direction == Direction::Rx => {
                    reply.extend_from_slice(&packet.payload)
                }
                Some(_) => {}
                None => return false,
            }
        }
        true
    })
    .await
    .unwrap_or(false);
    anyhow::ensure!(complete, "echo incomplete after {timeout:?}");
    Ok(Bytes::from(reply))
}

/// Peripheral side of the loopback: reassembles TX writes until the trailing
/// checksum verifies, then notifies the whole message back on RX.
fn spawn_echo(server: SharedServer, uart: Arc<UartPeripheral>) -> JoinHandle<()> {
    let (_id, mut received) = uart.ledger().observe();
    tokio::spawn(async move {
        let mut message = Vec::new();
        while let Some(packet) = received.recv().await {
            if packet.direction != Direction::Rx {
                continue;
            }
            message.extend_from_slice(&packet.payload);
            if message.len() < 2 || !verify_checksum(&message) {
                continue;
            }
            let reply = std::mem::take(&mut message);
            let mut guard = server.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = uart.send(&mut *guard, reply) {
                tracing::warn!(error = %err, "echo failed");
            }
        }
    })
}

async fn run_loopback(
    options: LoopbackOptions,
    payload: &[u8],
    wait_reply: bool,
) -> anyhow::Result<LoopbackReport> {
    let uart = UartPeripheral::with_notify_mtu(
        options.transport.packet_cache_enabled,
        options.transport.mtu,
    );
    let mut server = AttributeServer::new(LoopbackAdapter::default());
    uart.install(&mut server);
    server.add_service(PeripheralService::device_information(&options.device_info));
    server
        .start_advertising(Some(options.local_name.clone()))
        .context("start advertising")?;
    let server: SharedServer = Arc::new(Mutex::new(server));
    let echo = wait_reply.then(|| spawn_echo(Arc::clone(&server), Arc::clone(&uart)));

    let (link, events) = LoopbackLink::connect(Arc::clone(&server), options.central_id)
        .context("connect loopback central")?;
    let link = link.with_mtu(options.transport.mtu);
    let session = Arc::new(PeripheralSession::new(link, options.transport));
    let pump = spawn_pump(Arc::clone(&session), events);
    session.enable().await.context("enable uart")?;
    info!(local_name = %options.local_name, "loopback central connected");

    let command = append_checksum(payload);
    let (_observer, mut central_rx) = session.ledger().observe();
    let reply = if wait_reply {
        let first = session.send_and_wait(&command, None).await?;
        let timeout = session.config().reply_timeout;
        Some(collect_reply(first, &mut central_rx, timeout).await?)
    } else {
        session.send(&command).await?;
        None
    };
    session.disable().await?;

    let report = LoopbackReport {
        reply,
        central: session.ledger().counters(),
        peripheral: uart.ledger().counters(),
        peripheral_packets: uart.ledger().len(),
    };
    pump.abort();
    if let Some(echo) = echo {
        echo.abort();
    }
    Ok(report)
}

#[cfg(feature = "btleplug")]
async fn run_send(config: &CliConfig, payload: &[u8], wait_reply: bool) -> anyhow::Result<()> {
    use gattlink_ble::btleplug_backend::{BtleplugLink, BtleplugLinkConfig};

    let transport = config.transport().context("invalid transport settings")?;
    let link_config = BtleplugLinkConfig {
        connect_timeout: config.connect_timeout,
        allowlist: config.ble_allowlist.clone(),
        mtu: transport.mtu,
        ..BtleplugLinkConfig::default()
    };
    let (link, events) = BtleplugLink::connect(link_config).await?;
    let session = Arc::new(PeripheralSession::new(link, transport));
    let pump = spawn_pump(Arc::clone(&session), events);
    session.enable().await.context("enable uart")?;

    let command = append_checksum(payload);
    if wait_reply {
        let reply = session.send_and_wait(&command, None).await?;
        println!("reply: {}", hex::encode(&reply));
    } else {
        session.send(&command).await?;
    }
    session.disable().await?;
    print_counters("central", session.ledger().counters());
    pump.abort();
    Ok(())
}

fn print_counters(side: &str, counters: ByteCounters) {
    println!(
        "{side}: sent {} bytes, received {} bytes",
        counters.sent, counters.received
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("GATTLINK_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Checksum { hex } => {
            println!("{}", checksum_report(&hex)?);
        }
        Commands::Loopback {
            payload,
            wait_reply,
        } => {
            let config = CliConfig::new(cli.config).context("failed to load config")?;
            let options = LoopbackOptions::from_config(&config)?;
            let report = run_loopback(options, payload.as_bytes(), wait_reply).await?;
            if let Some(reply) = &report.reply {
                println!("reply: {}", hex::encode(reply));
            }
            print_counters("central", report.central);
            print_counters("peripheral", report.peripheral);
            println!("peripheral packets: {}", report.peripheral_packets);
        }
        #[cfg(feature = "btleplug")]
        Commands::Send {
            payload,
            wait_reply,
        } => {
            let config = CliConfig::new(cli.config).context("failed to load config")?;
            run_send(&config, payload.as_bytes(), wait_reply).await?;
        }
    }
    Ok(())
}
