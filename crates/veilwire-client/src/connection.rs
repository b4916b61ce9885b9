//! TCP connection and responder-side handshake.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use num_bigint::BigUint;
use rand::rngs::OsRng;
use serde_json::Map;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use veilwire_core::{
    EncryptedTransport, HandshakeConfig, HandshakeError, Responder, TransportConfig, decode_init,
    reply_envelope,
};
use veilwire_crypto::AuthorityPublicKey;
use veilwire_proto::{
    FrameDecoder, HANDSHAKE_MAX_FRAME_SIZE, MAX_FRAME_SIZE, MessageEnvelope, Method, Status,
    encode_frame, payloads::PING,
};

use crate::error::ClientError;

/// Default limit for the whole handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for one request/response round trip
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity the server must prove: the address as the client dials it
    pub server_identity: String,
    /// Key the server signs its handshake with
    pub server_public_key: AuthorityPublicKey,
    /// Handshake parameters; `kdf_iterations` and `seed_len` must match the
    /// server
    pub handshake: HandshakeConfig,
    /// Record format; `integrity` must match the server
    pub transport: TransportConfig,
    /// Limit for the whole handshake
    pub handshake_timeout: Duration,
    /// Limit for each request
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with default parameters.
    pub fn new(server_identity: impl Into<String>, server_public_key: AuthorityPublicKey) -> Self {
        Self {
            server_identity: server_identity.into(),
            server_public_key,
            handshake: HandshakeConfig::default(),
            transport: TransportConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// What the handshake established. Contains no key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Server identity verified by signature
    pub server_identity: String,
    /// Server socket address
    pub server_addr: SocketAddr,
    /// Agreed DH modulus
    pub modulus: BigUint,
    /// Agreed DH generator
    pub generator: BigUint,
}

/// Connect to a server and complete the handshake.
///
/// The server speaks first. The client validates the signed parameters,
/// tests the modulus for primality off the async runtime, and replies.
///
/// # Errors
///
/// - `Io` if the connection fails
/// - `Handshake` if the server's message is malformed or not authentic
/// - `Timeout` if the handshake exceeds `handshake_timeout`
/// - `ConnectionClosed` if the server hangs up mid-handshake
pub async fn connect(
    addr: impl ToSocketAddrs,
    config: ClientConfig,
) -> Result<ConnectedClient, ClientError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let mut decoder = FrameDecoder::with_max_frame_size(HANDSHAKE_MAX_FRAME_SIZE);
    let mut transport = EncryptedTransport::new((), config.transport);

    let handshake = respond(&mut stream, &mut decoder, &mut transport, &config);
    let session = match tokio::time::timeout(config.handshake_timeout, handshake).await {
        Ok(result) => result?,
        Err(_) => return Err(ClientError::Timeout { operation: "handshake" }),
    };
    decoder.set_max_frame_size(MAX_FRAME_SIZE);

    tracing::info!(
        server_addr = %session.server_addr,
        identity = %session.server_identity,
        "session established"
    );

    Ok(ConnectedClient { stream, decoder, transport, session, request_timeout: config.request_timeout })
}

async fn respond(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    transport: &mut EncryptedTransport<(), OsRng>,
    config: &ClientConfig,
) -> Result<SessionSummary, ClientError> {
    // Unarmed: handshake bytes pass through in the clear
    let frame = read_frame(stream, decoder).await?.ok_or(ClientError::ConnectionClosed)?;
    let init_bytes = transport.read(&frame)?;

    let mut responder = Responder::new(
        config.server_identity.clone(),
        config.server_public_key,
        config.handshake.clone(),
    );
    let (reply, completion) = tokio::task::spawn_blocking(move || {
        let init = decode_init(&init_bytes)?;
        responder.handle_init(&init, &mut OsRng)
    })
    .await
    .map_err(|e| ClientError::Internal(format!("handshake task failed: {e}")))??;

    let body = reply_envelope(reply)?.to_bytes()?;
    let record = transport.seal(&body)?;
    stream.write_all(&encode_frame(&record)?).await?;

    let identity = completion
        .authenticated_identity
        .clone()
        .ok_or_else(|| HandshakeError::AuthenticationFailure {
            reason: "server identity not verified".to_string(),
        })?;
    transport.arm(completion.material.clone())?;

    Ok(SessionSummary {
        server_identity: identity,
        server_addr: stream.peer_addr()?,
        modulus: completion.modulus,
        generator: completion.generator,
    })
}

/// Established, encrypted connection to a server.
///
/// Requests are sequential: each call writes one record and waits for one
/// response.
pub struct ConnectedClient {
    stream: TcpStream,
    decoder: FrameDecoder,
    transport: EncryptedTransport<(), OsRng>,
    session: SessionSummary,
    request_timeout: Duration,
}

impl ConnectedClient {
    /// Send a request and wait for the response.
    ///
    /// # Errors
    ///
    /// - `Transport` if the response fails authentication
    /// - `Protocol` if the response is not a valid envelope
    /// - `Timeout` if no response arrives within `request_timeout`
    /// - `ConnectionClosed` if the server hung up
    pub async fn request(
        &mut self,
        envelope: &MessageEnvelope,
    ) -> Result<MessageEnvelope, ClientError> {
        let body = envelope.to_bytes()?;
        self.request_bytes(&body).await
    }

    /// Send arbitrary plaintext as one record and decode the response.
    ///
    /// For talking to servers with non-JSON payloads and for exercising
    /// server error paths.
    ///
    /// # Errors
    ///
    /// - As for [`ConnectedClient::request`]
    pub async fn request_bytes(&mut self, body: &[u8]) -> Result<MessageEnvelope, ClientError> {
        let record = self.transport.seal(body)?;
        self.stream.write_all(&encode_frame(&record)?).await?;

        let read = read_frame(&mut self.stream, &mut self.decoder);
        let frame = match tokio::time::timeout(self.request_timeout, read).await {
            Ok(frame) => frame?.ok_or(ClientError::ConnectionClosed)?,
            Err(_) => return Err(ClientError::Timeout { operation: "request" }),
        };

        let plaintext = self.transport.read(&frame)?;
        Ok(MessageEnvelope::from_bytes(&plaintext)?)
    }

    /// Round-trip a `ping` and return the elapsed time.
    ///
    /// # Errors
    ///
    /// - `Rejected` if the server does not answer with a success status
    /// - As for [`ConnectedClient::request`]
    pub async fn ping(&mut self) -> Result<Duration, ClientError> {
        let started = Instant::now();
        let response =
            self.request(&MessageEnvelope::request(None, Method::Get, PING, Map::new())).await?;

        match response.status() {
            Some(status) if status.is_success() => Ok(started.elapsed()),
            Some(status) => Err(ClientError::Rejected(status.clone())),
            None => Err(ClientError::Rejected(Status::bad_request(
                "response carried no status",
            ))),
        }
    }

    /// Summary of the established session.
    pub fn session(&self) -> &SessionSummary {
        &self.session
    }

    /// Destroy key material and close the socket.
    ///
    /// # Errors
    ///
    /// - `Io` if the shutdown fails
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.transport.connection_lost();
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Read until one frame is complete. `None` on clean EOF.
async fn read_frame(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
) -> Result<Option<Vec<u8>>, ClientError> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(Some(frame.to_vec()));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.extend(&chunk[..n]);
    }
}
