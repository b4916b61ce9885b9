//! Per-connection task: initiator handshake, then request serving.
//!
//! ```text
//! accept ──> record DH parameters in the session cache
//!        ──> Initiator::start (blocking pool) ──> handshake.init
//!        <── handshake.reply ──> Initiator::handle_reply (blocking pool)
//!        ──> arm transport, install key material
//!        <─> request / response records until EOF or an integrity failure
//!        ──> remove cache entry, destroy key material
//! ```
//!
//! One writer task owns the socket's write half. Everything else queues
//! records to it, so writes never interleave. The queue is bounded: a peer
//! that stops reading while it keeps sending requests fills it and the
//! connection is closed.
//!
//! Until the transport is armed, frames are capped at
//! [`HANDSHAKE_MAX_FRAME_SIZE`] and handshake payloads are decoded on the
//! blocking pool.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use rand::rngs::OsRng;
use serde_json::Map;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
};
use veilwire_core::{
    CancelToken, DuplexTransport, EncryptedTransport, HandshakeCompletion, HandshakeConfig,
    Initiator, SessionCache, TransportConfig, TransportError, decode_reply, init_envelope,
};
use veilwire_crypto::AuthorityKeyPair;
use veilwire_proto::{
    FrameDecoder, HANDSHAKE_MAX_FRAME_SIZE, Header, MAX_FRAME_SIZE, MessageEnvelope, Method,
    Status, encode_frame,
};

use crate::{
    error::ServerError,
    router::{Router, SessionContext},
};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Records queued for the writer task before the connection is dropped
pub(crate) const WRITE_QUEUE_CAPACITY: usize = 32;

/// How long queued records may take to flush after the connection ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by every connection task.
pub(crate) struct ConnectionShared {
    pub authority: Arc<AuthorityKeyPair>,
    pub identity: String,
    pub handshake: HandshakeConfig,
    pub transport: TransportConfig,
    pub handshake_timeout: Duration,
    pub sessions: Arc<Mutex<SessionCache>>,
    pub router: Arc<dyn Router>,
}

/// Queues records for the writer task.
struct RecordSink(mpsc::Sender<Vec<u8>>);

impl DuplexTransport for RecordSink {
    fn write(&mut self, record: Vec<u8>) -> Result<(), TransportError> {
        self.0.try_send(record).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Backpressure { capacity: self.0.max_capacity() },
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

type ServerTransport = EncryptedTransport<RecordSink, OsRng>;

/// Drive one connection to completion.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<ConnectionShared>,
) -> Result<(), ServerError> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(write_records(writer, rx, peer));

    let mut transport = EncryptedTransport::new(RecordSink(tx), shared.transport);
    let result = serve(&mut reader, &mut transport, peer, &shared).await;

    shared.sessions.lock().await.remove(&peer);
    transport.connection_lost();

    // Closing the queue lets the writer flush and exit. A peer that is not
    // reading would keep it blocked in write_all.
    drop(transport);
    let abort = writer_task.abort_handle();
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => tracing::debug!(%peer, "writer task failed: {}", e),
        Err(_) => {
            abort.abort();
            tracing::debug!(%peer, "peer not reading, dropped unsent records");
        },
    }

    result
}

async fn serve(
    reader: &mut OwnedReadHalf,
    transport: &mut ServerTransport,
    peer: SocketAddr,
    shared: &ConnectionShared,
) -> Result<(), ServerError> {
    let mut decoder = FrameDecoder::with_max_frame_size(HANDSHAKE_MAX_FRAME_SIZE);

    let cancel = CancelToken::new();
    let pending = handshake(reader, &mut decoder, transport, peer, shared, cancel.clone());
    let completion = match tokio::time::timeout(shared.handshake_timeout, pending).await {
        Ok(result) => result?,
        Err(_) => {
            // Stops prime generation still running on the blocking pool
            cancel.cancel();
            return Err(ServerError::HandshakeTimeout);
        },
    };

    transport.arm(completion.material.clone())?;
    decoder.set_max_frame_size(MAX_FRAME_SIZE);
    shared
        .sessions
        .lock()
        .await
        .install(peer, completion.material)
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    tracing::info!(%peer, modulus_bits = completion.modulus.bits(), "session established");

    while let Some(frame) = read_frame(reader, &mut decoder).await? {
        let plaintext = transport.read(&frame)?;
        let response = respond(&plaintext, peer, shared);
        transport.write(&response.to_bytes()?)?;
    }

    tracing::debug!(%peer, "peer closed connection");
    Ok(())
}

async fn handshake(
    reader: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    transport: &mut ServerTransport,
    peer: SocketAddr,
    shared: &ConnectionShared,
    cancel: CancelToken,
) -> Result<HandshakeCompletion, ServerError> {
    let initiator = Initiator::new(
        shared.identity.clone(),
        Arc::clone(&shared.authority),
        shared.handshake.clone(),
    );

    let (initiator, init) = tokio::task::spawn_blocking(move || {
        let mut initiator = initiator;
        let init = initiator.start(&mut OsRng, &cancel);
        (initiator, init)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("handshake task failed: {e}")))?;
    let init = init?;

    shared.sessions.lock().await.record_parameters(
        peer,
        init.generator.clone(),
        init.modulus.clone(),
    );

    // Unarmed: handshake messages pass through in the clear
    transport.write(&init_envelope(init)?.to_bytes()?)?;

    let Some(frame) = read_frame(reader, decoder).await? else {
        return Err(ServerError::Io("peer closed connection during handshake".to_string()));
    };
    let reply_bytes = transport.read(&frame)?;

    let completion = tokio::task::spawn_blocking(move || {
        let mut initiator = initiator;
        let reply = decode_reply(&reply_bytes)?;
        initiator.handle_reply(&reply)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("handshake task failed: {e}")))??;

    Ok(completion)
}

fn respond(plaintext: &[u8], peer: SocketAddr, shared: &ConnectionShared) -> MessageEnvelope {
    match MessageEnvelope::from_bytes(plaintext) {
        Ok(request) if request.status().is_some() => {
            MessageEnvelope::response_to(&request, Status::bad_request("expected a request"), Map::new())
        },
        Ok(request) => {
            let context = SessionContext {
                peer_addr: peer,
                session_token: request.identity().map(str::to_string),
            };
            shared.router.route(&context, &request)
        },
        Err(e) => {
            tracing::debug!(%peer, "malformed envelope: {}", e);
            MessageEnvelope::new(
                Header::Status(Status::bad_request(e.to_string())),
                Method::Post,
                "",
                Map::new(),
            )
        },
    }
}

async fn write_records(
    mut writer: OwnedWriteHalf,
    mut records: mpsc::Receiver<Vec<u8>>,
    peer: SocketAddr,
) {
    while let Some(record) = records.recv().await {
        let frame = match encode_frame(&record) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%peer, "dropping outbound record: {}", e);
                continue;
            },
        };

        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!(%peer, "write failed: {}", e);
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(%peer, "shutdown failed: {}", e);
    }
}

/// Read until one frame is complete. `None` on clean EOF.
async fn read_frame(
    reader: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
) -> Result<Option<Vec<u8>>, ServerError> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(Some(frame.to_vec()));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.extend(&chunk[..n]);
    }
}
