//! Veilwire server binary.
//!
//! # Usage
//!
//! ```bash
//! # Create an authority key once
//! veilwire-server --generate-key authority.key
//!
//! # Serve with it
//! veilwire-server --bind 0.0.0.0:7100 --identity 203.0.113.7:7100 --key authority.key
//!
//! # Ephemeral key (development)
//! veilwire-server --bind 127.0.0.1:7100
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use veilwire_core::{HandshakeConfig, TransportConfig};
use veilwire_server::{Server, ServerRuntimeConfig, keys};

/// Veilwire channel server
#[derive(Parser, Debug)]
#[command(name = "veilwire-server")]
#[command(about = "Authenticated DH handshake and encrypted channel server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7100")]
    bind: String,

    /// Identity signed into handshakes (the address clients dial)
    #[arg(long)]
    identity: Option<String>,

    /// Path to the hex authority key
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// DH modulus size in bits
    #[arg(long, default_value_t = veilwire_core::handshake::DEFAULT_PRIME_BITS)]
    prime_bits: u64,

    /// KDF iterations; clients must use the same value
    #[arg(long, default_value_t = veilwire_core::handshake::DEFAULT_KDF_ITERATIONS)]
    kdf_iterations: u32,

    /// Reuse the handshake IV and omit record tags
    #[arg(long)]
    legacy_transport: bool,

    /// Handshake time limit in seconds
    #[arg(long, default_value = "30")]
    handshake_timeout_secs: u64,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write a new authority key to this path and exit
    #[arg(long, value_name = "PATH")]
    generate_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if let Some(path) = &args.generate_key {
        let key = keys::write_new_key_file(path)?;
        tracing::info!(path = %path.display(), "authority key written");
        tracing::info!(public_key = %key.public_key().to_hex(), "distribute this public key to clients");
        return Ok(());
    }

    tracing::info!("Veilwire server starting");

    let transport =
        if args.legacy_transport { TransportConfig::legacy() } else { TransportConfig::default() };
    if args.legacy_transport {
        tracing::warn!("legacy transport: records carry no tag and reuse the session IV");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        identity: args.identity,
        key_path: args.key,
        handshake: HandshakeConfig {
            prime_bits: args.prime_bits,
            kdf_iterations: args.kdf_iterations,
            ..HandshakeConfig::default()
        },
        transport,
        handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
        max_connections: args.max_connections,
    };

    let server = Server::bind(config).await?;

    tracing::info!(public_key = %server.public_key().to_hex(), "authority public key");
    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
