//! Veilwire server.
//!
//! Tokio TCP server for the Veilwire channel. The server is the handshake
//! initiator: it generates fresh DH parameters per connection, signs them
//! with its authority key, and arms an encrypted transport once the client
//! replies.
//!
//! # Architecture
//!
//! Protocol logic lives in the Sans-IO state machines of [`veilwire_core`].
//! This crate is the glue: it accepts sockets, runs the CPU-heavy handshake
//! steps on the blocking pool under a timeout, owns the [`SessionCache`], and
//! dispatches decrypted requests to a [`Router`].
//!
//! # Components
//!
//! - [`Server`]: listener and accept loop
//! - [`Router`] / [`DefaultRouter`]: request dispatch
//! - [`keys`]: authority key file handling

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connection;
mod error;
pub mod keys;
mod router;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

pub use error::ServerError;
pub use router::{DefaultRouter, Router, SessionContext};
use tokio::{
    net::TcpListener,
    sync::{Mutex, Semaphore},
};
use veilwire_core::{HandshakeConfig, SessionCache, TransportConfig};
use veilwire_crypto::{AuthorityKeyPair, AuthorityPublicKey};

use crate::{
    connection::{ConnectionShared, handle_connection},
    keys::KeySource,
};

/// Default limit for the whole handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:7100")
    pub bind_address: String,
    /// Identity signed into every handshake: the address clients dial.
    /// Defaults to the bound local address.
    pub identity: Option<String>,
    /// Path to the hex authority key. Generates an ephemeral key if unset.
    pub key_path: Option<PathBuf>,
    /// Handshake parameters
    pub handshake: HandshakeConfig,
    /// Record format
    pub transport: TransportConfig,
    /// Limit for the whole handshake, prime generation included
    pub handshake_timeout: Duration,
    /// Connections beyond this are dropped at accept
    pub max_connections: usize,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7100".to_string(),
            identity: None,
            key_path: None,
            handshake: HandshakeConfig::default(),
            transport: TransportConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Production Veilwire server.
pub struct Server {
    listener: TcpListener,
    shared: Arc<ConnectionShared>,
    limiter: Arc<Semaphore>,
    key_source: KeySource,
}

impl Server {
    /// Load the authority key and bind the listener.
    ///
    /// # Errors
    ///
    /// - `Config` if the bind address or key file is invalid
    /// - `Io` if the address cannot be bound
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let (authority, key_source) = keys::load_or_generate(config.key_path.as_deref())?;
        Self::bind_with_authority(config, authority, key_source).await
    }

    /// Bind with an already loaded authority key.
    ///
    /// # Errors
    ///
    /// - `Config` if the bind address is invalid
    /// - `Io` if the address cannot be bound
    pub async fn bind_with_authority(
        config: ServerRuntimeConfig,
        authority: AuthorityKeyPair,
        key_source: KeySource,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;
        if config.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be positive".to_string()));
        }

        let listener = TcpListener::bind(addr).await?;
        let identity = match config.identity {
            Some(identity) => identity,
            None => listener.local_addr()?.to_string(),
        };

        tracing::info!(%identity, "listening on {}", listener.local_addr()?);

        let shared = Arc::new(ConnectionShared {
            authority: Arc::new(authority),
            identity,
            handshake: config.handshake,
            transport: config.transport,
            handshake_timeout: config.handshake_timeout,
            sessions: Arc::new(Mutex::new(SessionCache::new())),
            router: Arc::new(DefaultRouter),
        });

        Ok(Self {
            listener,
            shared,
            limiter: Arc::new(Semaphore::new(config.max_connections)),
            key_source,
        })
    }

    /// Replace the request router.
    ///
    /// Call before [`Server::run`].
    #[must_use]
    pub fn with_router(mut self, router: impl Router) -> Self {
        let shared = ConnectionShared {
            authority: Arc::clone(&self.shared.authority),
            identity: self.shared.identity.clone(),
            handshake: self.shared.handshake.clone(),
            transport: self.shared.transport,
            handshake_timeout: self.shared.handshake_timeout,
            sessions: Arc::clone(&self.shared.sessions),
            router: Arc::new(router),
        };
        self.shared = Arc::new(shared);
        self
    }

    /// Run the accept loop.
    ///
    /// Runs until the task is cancelled. Per-connection failures are logged
    /// and never stop the loop.
    pub async fn run(self) -> Result<(), ServerError> {
        if self.key_source == KeySource::Ephemeral {
            tracing::warn!("no authority key configured - using an ephemeral key");
            tracing::warn!("clients cannot pin an ephemeral key across restarts");
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                    continue;
                },
            };

            let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
                tracing::warn!(%peer, "connection limit reached, dropping connection");
                continue;
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, "set_nodelay failed: {}", e);
            }

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let _permit = permit;
                match handle_connection(stream, peer, shared).await {
                    Ok(()) => {},
                    Err(ServerError::Handshake(err)) if err.is_attack_indicator() => {
                        tracing::warn!(%peer, "handshake rejected: {}", err);
                    },
                    Err(ServerError::Record(err)) => {
                        tracing::warn!(%peer, "closing connection: {}", err);
                    },
                    Err(e) => {
                        tracing::debug!(%peer, "connection ended: {}", e);
                    },
                }
            });
        }
    }

    /// Local address the server is bound to.
    ///
    /// # Errors
    ///
    /// - `Io` if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Identity signed into every handshake.
    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    /// Public half of the authority key. Clients need it to connect.
    pub fn public_key(&self) -> AuthorityPublicKey {
        self.shared.authority.public_key()
    }

    /// Shared session cache.
    pub fn sessions(&self) -> Arc<Mutex<SessionCache>> {
        Arc::clone(&self.shared.sessions)
    }
}
