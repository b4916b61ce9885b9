//! End-to-end tests over real TCP sockets
//!
//! Server and client run on one Tokio runtime with small primes so each
//! handshake takes milliseconds.

use std::{sync::Arc, time::Duration};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::Map;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
    task::JoinHandle,
};
use veilwire_client::{ClientConfig, ClientError, connect};
use veilwire_core::{
    EncryptedTransport, HandshakeConfig, HandshakeError, Responder, SessionCache, TransportConfig,
    decode_init, reply_envelope,
};
use veilwire_crypto::{AuthorityKeyPair, AuthorityPublicKey};
use veilwire_proto::{
    FrameDecoder, HANDSHAKE_MAX_FRAME_SIZE, MessageEnvelope, Method, Status, encode_frame,
};
use veilwire_server::{Server, ServerRuntimeConfig, keys::KeySource};

fn handshake_config() -> HandshakeConfig {
    HandshakeConfig {
        prime_bits: 256,
        min_prime_bits: 128,
        max_prime_bits: 1024,
        kdf_iterations: 100,
        ..HandshakeConfig::default()
    }
}

struct Running {
    identity: String,
    public_key: AuthorityPublicKey,
    sessions: Arc<tokio::sync::Mutex<SessionCache>>,
    task: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start_server(handshake_timeout: Duration) -> Running {
    let authority = AuthorityKeyPair::generate(&mut ChaCha20Rng::seed_from_u64(7));
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        handshake: handshake_config(),
        handshake_timeout,
        ..ServerRuntimeConfig::default()
    };

    let server = Server::bind_with_authority(config, authority, KeySource::File).await.unwrap();
    Running {
        identity: server.identity().to_string(),
        public_key: server.public_key(),
        sessions: server.sessions(),
        task: tokio::spawn(async move {
            let _ = server.run().await;
        }),
    }
}

fn client_config(server: &Running) -> ClientConfig {
    ClientConfig {
        handshake: handshake_config(),
        ..ClientConfig::new(server.identity.clone(), server.public_key)
    }
}

async fn wait_for_empty_cache(sessions: &tokio::sync::Mutex<SessionCache>) {
    wait_for_empty_cache_within(sessions, Duration::from_secs(2)).await;
}

async fn wait_for_empty_cache_within(sessions: &tokio::sync::Mutex<SessionCache>, limit: Duration) {
    let polls = limit.as_millis() / 20;
    for _ in 0..polls {
        if sessions.lock().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session cache never emptied");
}

async fn read_one_frame(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> Option<Vec<u8>> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(frame) = decoder.next_frame().unwrap() {
            return Some(frame.to_vec());
        }
        // A reset counts as closed: the server may hang up with input unread
        let Ok(n) = stream.read(&mut chunk).await else {
            return None;
        };
        if n == 0 {
            return None;
        }
        decoder.extend(&chunk[..n]);
    }
}

#[tokio::test]
async fn ping_after_handshake() {
    let server = start_server(Duration::from_secs(10)).await;
    let mut client = connect(server.identity.as_str(), client_config(&server)).await.unwrap();

    assert_eq!(client.session().server_identity, server.identity);
    assert_eq!(client.session().modulus.bits(), 256);

    client.ping().await.unwrap();
    client.ping().await.unwrap();

    let peer_established = {
        let sessions = server.sessions.lock().await;
        sessions.len() == 1
    };
    assert!(peer_established);

    client.close().await.unwrap();
    wait_for_empty_cache(&server.sessions).await;
}

#[tokio::test]
async fn unknown_endpoint_is_not_found() {
    let server = start_server(Duration::from_secs(10)).await;
    let mut client = connect(server.identity.as_str(), client_config(&server)).await.unwrap();

    let request = MessageEnvelope::request(Some("token".into()), Method::Post, "files.list", Map::new());
    let response = client.request(&request).await.unwrap();

    assert_eq!(response.status().unwrap().code, Status::NOT_FOUND);
    assert_eq!(response.endpoint, "files.list");
}

#[tokio::test]
async fn malformed_envelope_gets_bad_request() {
    let server = start_server(Duration::from_secs(10)).await;
    let mut client = connect(server.identity.as_str(), client_config(&server)).await.unwrap();

    let response = client.request_bytes(b"{not json").await.unwrap();
    assert_eq!(response.status().unwrap().code, Status::BAD_REQUEST);

    // Connection survives a malformed envelope
    client.ping().await.unwrap();
}

#[tokio::test]
async fn wrong_public_key_is_rejected() {
    let server = start_server(Duration::from_secs(10)).await;
    let impostor = AuthorityKeyPair::generate(&mut ChaCha20Rng::seed_from_u64(99));
    let config = ClientConfig {
        handshake: handshake_config(),
        ..ClientConfig::new(server.identity.clone(), impostor.public_key())
    };

    let result = connect(server.identity.as_str(), config).await;
    assert!(matches!(
        result,
        Err(ClientError::Handshake(HandshakeError::AuthenticationFailure { .. }))
    ));
    wait_for_empty_cache(&server.sessions).await;
}

#[tokio::test]
async fn wrong_identity_is_rejected() {
    let server = start_server(Duration::from_secs(10)).await;
    let config = ClientConfig {
        handshake: handshake_config(),
        ..ClientConfig::new("192.0.2.1:7100", server.public_key)
    };

    let result = connect(server.identity.as_str(), config).await;
    assert!(matches!(
        result,
        Err(ClientError::Handshake(HandshakeError::AuthenticationFailure { .. }))
    ));
}

#[tokio::test]
async fn silent_peer_times_out() {
    let server = start_server(Duration::from_millis(300)).await;
    let mut stream = TcpStream::connect(server.identity.as_str()).await.unwrap();
    let mut decoder = FrameDecoder::new();

    // Server speaks first, then gives up waiting for a reply
    let init = read_one_frame(&mut stream, &mut decoder).await.unwrap();
    assert!(decode_init(&init).is_ok());

    let closed = tokio::time::timeout(Duration::from_secs(5), read_one_frame(&mut stream, &mut decoder))
        .await
        .unwrap();
    assert!(closed.is_none());
    wait_for_empty_cache(&server.sessions).await;
}

/// Client side of the handshake done by hand, for peers that misbehave
/// after it.
async fn raw_session(
    server: &Running,
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
) -> EncryptedTransport<()> {
    let init = decode_init(&read_one_frame(stream, decoder).await.unwrap()).unwrap();
    let mut responder = Responder::new(server.identity.clone(), server.public_key, handshake_config());
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let (reply, completion) = responder.handle_init(&init, &mut rng).unwrap();
    let reply = reply_envelope(reply).unwrap().to_bytes().unwrap();
    stream.write_all(&encode_frame(&reply).unwrap()).await.unwrap();

    let mut transport = EncryptedTransport::new((), TransportConfig::default());
    transport.arm(completion.material).unwrap();
    transport
}

#[tokio::test]
async fn forged_record_closes_connection() {
    let server = start_server(Duration::from_secs(10)).await;
    let mut stream = TcpStream::connect(server.identity.as_str()).await.unwrap();
    let mut decoder = FrameDecoder::new();
    let mut transport = raw_session(&server, &mut stream, &mut decoder).await;

    let ping = MessageEnvelope::request(None, Method::Get, "ping", Map::new());
    let mut record = transport.seal(&ping.to_bytes().unwrap()).unwrap();
    record[20] ^= 0x01;
    stream.write_all(&encode_frame(&record).unwrap()).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), read_one_frame(&mut stream, &mut decoder))
        .await
        .unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn oversized_handshake_frame_closes_connection() {
    let server = start_server(Duration::from_secs(10)).await;
    let mut stream = TcpStream::connect(server.identity.as_str()).await.unwrap();
    let mut decoder = FrameDecoder::new();
    read_one_frame(&mut stream, &mut decoder).await.unwrap();

    // Multi-megabyte reply whose publicValue is one huge decimal string
    let digits = "7".repeat(3 * 1024 * 1024);
    let reply = format!(
        r#"{{"identity":null,"method":"POST","endpoint":"handshake.reply","payload":{{"publicValue":"{digits}","encryptedSeed":""}}}}"#
    );
    assert!(reply.len() > HANDSHAKE_MAX_FRAME_SIZE);
    let _ = stream.write_all(&encode_frame(reply.as_bytes()).unwrap()).await;

    let closed = tokio::time::timeout(Duration::from_secs(2), read_one_frame(&mut stream, &mut decoder))
        .await
        .unwrap();
    assert!(closed.is_none());
    wait_for_empty_cache(&server.sessions).await;
}

#[tokio::test]
async fn peer_that_never_reads_is_disconnected() {
    let server = start_server(Duration::from_secs(10)).await;
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let mut stream = socket.connect(server.identity.parse().unwrap()).await.unwrap();
    let mut decoder = FrameDecoder::new();
    let mut transport = raw_session(&server, &mut stream, &mut decoder).await;

    // Long endpoints are echoed back, so responses pile up quickly
    let request =
        MessageEnvelope::request(None, Method::Get, "x".repeat(16 * 1024), Map::new());
    let record = encode_frame(&transport.seal(&request.to_bytes().unwrap()).unwrap()).unwrap();

    let flood = tokio::spawn(async move {
        for _ in 0..10_000 {
            if stream.write_all(&record).await.is_err() {
                return;
            }
        }
    });

    wait_for_empty_cache_within(&server.sessions, Duration::from_secs(60)).await;
    flood.abort();
}

#[tokio::test]
async fn concurrent_clients_get_independent_sessions() {
    let server = start_server(Duration::from_secs(10)).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let config = client_config(&server);
        let addr = server.identity.clone();
        handles.push(tokio::spawn(async move {
            let mut client = connect(addr.as_str(), config).await.unwrap();
            client.ping().await.unwrap();
            client.session().modulus.clone()
        }));
    }

    let mut moduli = Vec::new();
    for handle in handles {
        moduli.push(handle.await.unwrap());
    }
    moduli.sort();
    moduli.dedup();

    // Fresh parameters per connection
    assert_eq!(moduli.len(), 4);
}
