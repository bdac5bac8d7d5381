//! `ramb` — SCP81 compliance harness
//!
//! Runs either side of the GP Amendment B admin protocol: `ramb server`
//! accepts PSK-TLS connections and drives a provisioning script against
//! whatever connects; `ramb agent` simulates one or many cards against a
//! server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ramb_agent::{DeviceConfig, Fleet};
use ramb_scp::{ScpVariant, SecurityLevel, StaticKeys};
use ramb_server::{AdminServer, ProvisioningScript, ServerConfig};
use ramb_session::{LogSink, RetryPolicy};
use ramb_transport::{CipherPolicy, MemoryKeyStore};

#[derive(Parser)]
#[command(name = "ramb", version, about = "SCP81 remote application management harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the administration server
    Server(ServerArgs),
    /// Run simulated card agents
    Agent(AgentArgs),
}

#[derive(clap::Args)]
struct ServerArgs {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:9443")]
    listen: SocketAddr,

    /// Worker pool size
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// PSK entries as identity:hexkey; repeatable
    #[arg(long = "psk", value_name = "IDENTITY:HEXKEY")]
    psk: Vec<String>,

    /// Static ENC/MAC/DEK key (hex, 16 bytes) for the secure channel script
    #[arg(long, default_value = "00000000000000000000000000000000")]
    scp_key: String,

    /// Drive the authenticated audit script instead of plain SELECT
    #[arg(long)]
    audit: bool,

    /// Secure channel variant for the audit script
    #[arg(long, value_parser = ["scp02", "scp03"], default_value = "scp02")]
    scp: String,

    /// Also encrypt command payloads (SCP03 only)
    #[arg(long)]
    encrypt: bool,

    /// Per-session inactivity timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Offer the legacy SHA-1 PSK suites
    #[arg(long)]
    allow_legacy_sha1: bool,

    /// Offer the NULL (unencrypted) PSK suites
    #[arg(long)]
    allow_null: bool,
}

#[derive(clap::Args)]
struct AgentArgs {
    /// Server address
    #[arg(long)]
    connect: SocketAddr,

    /// PSK identity
    #[arg(long, default_value = "test_card")]
    identity: String,

    /// PSK value in hex
    #[arg(long, default_value = "00000000000000000000000000000000")]
    key: String,

    /// Static secure channel key in hex (16 bytes)
    #[arg(long, default_value = "00000000000000000000000000000000")]
    scp_key: String,

    /// Secure channel variant the simulated card speaks
    #[arg(long, value_parser = ["scp02", "scp03"], default_value = "scp02")]
    scp: String,

    /// Number of concurrent simulated devices
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Reconnection attempts for retryable failures
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Delay injected before each R-APDU, in milliseconds
    #[arg(long)]
    response_delay_ms: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

fn parse_key16(hex_key: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hex_key).context("key is not valid hex")?;
    <[u8; 16]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow::anyhow!("key must be exactly 16 bytes"))
}

fn parse_variant(name: &str) -> ScpVariant {
    match name {
        "scp03" => ScpVariant::Scp03,
        _ => ScpVariant::Scp02,
    }
}

fn cipher_policy(allow_legacy_sha1: bool, allow_null: bool) -> CipherPolicy {
    let mut policy = CipherPolicy::new();
    if allow_legacy_sha1 {
        policy = policy.with_legacy_sha1();
    }
    if allow_null {
        policy = policy.with_null_ciphers();
    }
    policy
}

fn run_server(args: ServerArgs) -> Result<()> {
    let mut key_store = MemoryKeyStore::new();
    for entry in &args.psk {
        let Some((identity, hex_key)) = entry.split_once(':') else {
            bail!("--psk expects identity:hexkey, got {entry:?}");
        };
        let key = hex::decode(hex_key).context("PSK is not valid hex")?;
        key_store.insert(identity, key);
    }
    if key_store.is_empty() {
        // The compliance default: identity test_card, sixteen zero bytes
        key_store.insert("test_card", vec![0u8; 16]);
    }

    let static_keys = StaticKeys::from_single_key(parse_key16(&args.scp_key)?);
    let variant = parse_variant(&args.scp);
    let level = if args.encrypt {
        SecurityLevel::MacEnc
    } else {
        SecurityLevel::Mac
    };
    let script = if args.audit {
        ProvisioningScript::authenticated_audit(variant, level)
    } else {
        ProvisioningScript::select_isd()
    };

    let config = ServerConfig {
        listen: args.listen,
        workers: args.workers,
        inactivity_timeout: Duration::from_secs(args.timeout),
        cipher_policy: cipher_policy(args.allow_legacy_sha1, args.allow_null),
        ..ServerConfig::default()
    };

    let server = AdminServer::bind(
        config,
        Arc::new(key_store),
        static_keys,
        script,
        Arc::new(LogSink),
    )?;
    server.run()?;
    Ok(())
}

fn run_agent(args: AgentArgs) -> Result<()> {
    let psk_key = hex::decode(&args.key).context("PSK is not valid hex")?;
    let scp_key = parse_key16(&args.scp_key)?;
    let variant = parse_variant(&args.scp);

    let devices = (0..args.devices)
        .map(|index| {
            let identity = if args.devices == 1 {
                args.identity.clone()
            } else {
                format!("{}_{index}", args.identity)
            };
            let mut config = DeviceConfig::new(args.connect, identity, psk_key.clone());
            config.card.scp_keys = StaticKeys::from_single_key(scp_key);
            config.card.variant = variant;
            config.retry = RetryPolicy {
                max_attempts: args.retries,
                ..RetryPolicy::default()
            };
            config.connect_timeout = Duration::from_secs(args.connect_timeout);
            config.response_delay = args.response_delay_ms.map(Duration::from_millis);
            config
        })
        .collect();

    let snapshot = Fleet::new(devices, Arc::new(LogSink)).run();
    println!(
        "sessions: {} completed, {} failed; {} APDUs; {} reconnects",
        snapshot.sessions_completed,
        snapshot.sessions_failed,
        snapshot.apdus_exchanged,
        snapshot.reconnect_attempts,
    );
    if snapshot.sessions_failed > 0 {
        bail!("{} device session(s) failed", snapshot.sessions_failed);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Server(args) => run_server(args),
        Commands::Agent(args) => run_agent(args),
    }
}
