//! Authenticated Diffie-Hellman handshake.
//!
//! Sans-IO state machines for both roles. Methods take decoded payloads and
//! return payloads to send; the driver owns the socket, the timeout and the
//! thread the CPU-heavy steps run on.
//!
//! # Protocol
//!
//! ```text
//! Initiator (holds AuthorityKeyPair)        Responder (knows AuthorityPublicKey)
//!
//! p = random prime, g, e ∈ [2, p-2]
//! A = g^e mod p, iv = random(16)
//! sig = Sign(transcript(identity, p, g, A, iv))
//!                 ── handshake.init {p, g, A, iv, sig} ──>
//!                                            check fields, Verify(sig), p prime
//!                                            e' ∈ [2, p-2], B = g^e' mod p
//!                                            seed = random, sealed = Seal(seed)
//!                 <── handshake.reply {B, sealed} ────────
//! seed = Open(sealed)
//! key = KDF(B^e mod p, seed)                 key = KDF(A^e' mod p, seed)
//! ```
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  start   ┌────────────────────┐  handle_reply  ┌────────────┐
//! │ Init │─────────>│ AwaitingPeerPublic │───────────────>│ KeyDerived │
//! └──────┘          └────────────────────┘                └────────────┘
//!    │ handle_init (responder)                                  ↑
//!    └──────────────────────────────────────────────────────────┘
//!
//!   any error except InvalidState ──> Failed
//! ```
//!
//! # Security
//!
//! - The signature covers a transcript of the initiator's network identity
//!   and every DH value, so neither the identity nor the parameters can be
//!   swapped in transit.
//! - The responder checks every field before using it. A violation is a
//!   possible attack and ends the handshake.
//! - The secret exponent lives only inside [`DheParty`] and is dropped as
//!   soon as the mutual secret is computed or the handshake fails.
//! - Key material is handed out all at once in [`HandshakeCompletion`];
//!   nothing partial ever reaches the transport.

use std::sync::Arc;

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use veilwire_crypto::{
    AuthorityKeyPair, AuthorityPublicKey, BLOCK_SIZE, CryptoError, DheParty, KEY_SIZE,
    SIGNATURE_SIZE, derive_key, is_probable_prime, validate_public_value,
};
use veilwire_proto::{
    Header, HandshakeInit, HandshakeReply, MessageEnvelope, Method, Payload, ProtocolError,
};

use crate::{cancel::CancelToken, error::HandshakeError, transport::SessionKeyMaterial};

/// Prime size the initiator generates by default.
pub const DEFAULT_PRIME_BITS: u64 = 2048;

/// Smallest modulus a responder accepts by default.
pub const DEFAULT_MIN_PRIME_BITS: u64 = 1024;

/// Largest modulus a responder accepts by default. Bounds verification cost.
pub const DEFAULT_MAX_PRIME_BITS: u64 = 4096;

/// Default generator.
pub const DEFAULT_GENERATOR: u32 = 2;

/// Default KDF iteration count. Both sides must agree.
pub const DEFAULT_KDF_ITERATIONS: u32 = 10_000;

/// Default responder seed length.
pub const DEFAULT_SEED_LEN: usize = 32;

/// Miller-Rabin rounds the responder runs on a received modulus.
pub const DEFAULT_PRIMALITY_ROUNDS: usize = 24;

/// Domain separation label for the signed transcript.
const TRANSCRIPT_LABEL: &[u8] = b"veilwire handshake v1";

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent or received
    Init,
    /// Initiator sent its public value and waits for the reply
    AwaitingPeerPublic,
    /// Session key derived; the handshake is complete
    KeyDerived,
    /// Handshake aborted; the connection must be closed
    Failed,
}

/// Handshake parameters. Both sides must agree on `kdf_iterations` and
/// `seed_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Modulus size generated by the initiator
    pub prime_bits: u64,
    /// Smallest modulus the responder accepts
    pub min_prime_bits: u64,
    /// Largest modulus the responder accepts
    pub max_prime_bits: u64,
    /// Generator sent by the initiator
    pub generator: u32,
    /// KDF iterations
    pub kdf_iterations: u32,
    /// Responder seed (KDF salt) length
    pub seed_len: usize,
    /// Miller-Rabin rounds for a received modulus
    pub primality_rounds: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            prime_bits: DEFAULT_PRIME_BITS,
            min_prime_bits: DEFAULT_MIN_PRIME_BITS,
            max_prime_bits: DEFAULT_MAX_PRIME_BITS,
            generator: DEFAULT_GENERATOR,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            seed_len: DEFAULT_SEED_LEN,
            primality_rounds: DEFAULT_PRIMALITY_ROUNDS,
        }
    }
}

/// Successful handshake result.
///
/// The driver installs `material` in the transport and the session cache.
#[derive(Debug, Clone)]
pub struct HandshakeCompletion {
    /// Symmetric key and session IV
    pub material: SessionKeyMaterial,
    /// Initiator identity verified by signature. `None` on the initiator,
    /// which does not authenticate the responder at this layer.
    pub authenticated_identity: Option<String>,
    /// Agreed modulus
    pub modulus: BigUint,
    /// Agreed generator
    pub generator: BigUint,
}

/// Initiator side of the handshake.
pub struct Initiator {
    state: HandshakeState,
    identity: String,
    authority: Arc<AuthorityKeyPair>,
    config: HandshakeConfig,
    party: Option<DheParty>,
    iv: [u8; BLOCK_SIZE],
}

impl Initiator {
    /// Create an initiator that signs as `identity` (its network address as
    /// the responder dialed it).
    pub fn new(
        identity: impl Into<String>,
        authority: Arc<AuthorityKeyPair>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            state: HandshakeState::Init,
            identity: identity.into(),
            authority,
            config,
            party: None,
            iv: [0; BLOCK_SIZE],
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Generate parameters and the signed first message.
    ///
    /// CPU-bound: generates a `prime_bits` prime. Run it off the accept path.
    /// `cancel` is polled between prime candidates.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not in `Init`
    /// - `Cancelled` if `cancel` fired during prime generation
    /// - `Crypto` if the configuration is unusable
    pub fn start<R>(&mut self, rng: &mut R, cancel: &CancelToken) -> Result<HandshakeInit, HandshakeError>
    where
        R: RngCore + CryptoRng,
    {
        self.expect_state(HandshakeState::Init, "start")?;

        let party = DheParty::generate(self.config.prime_bits, self.config.generator, rng, || {
            cancel.is_cancelled()
        })
        .map_err(|err| self.fail(crypto_to_local(err)))?;

        rng.fill_bytes(&mut self.iv);

        let public_value = party.public_value();
        let transcript = transcript(
            &self.identity,
            party.modulus(),
            party.generator(),
            &public_value,
            &self.iv,
        );
        let signature = self.authority.sign(&transcript);

        let init = HandshakeInit {
            modulus: party.modulus().clone(),
            generator: party.generator().clone(),
            public_value,
            iv: self.iv.to_vec(),
            signature: signature.to_vec(),
        };

        self.party = Some(party);
        self.state = HandshakeState::AwaitingPeerPublic;
        Ok(init)
    }

    /// Consume the responder's reply and derive the session key.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not in `AwaitingPeerPublic`
    /// - `ProtocolViolation` for an out-of-range public value or a seed of
    ///   the wrong length
    /// - `AuthenticationFailure` if the sealed seed cannot be opened
    pub fn handle_reply(
        &mut self,
        reply: &HandshakeReply,
    ) -> Result<HandshakeCompletion, HandshakeError> {
        self.expect_state(HandshakeState::AwaitingPeerPublic, "handle_reply")?;

        let Some(party) = self.party.take() else {
            return Err(self.fail(HandshakeError::violation("missing DH state")));
        };

        self.complete(party, reply).map_err(|err| self.fail(err))
    }

    fn complete(
        &mut self,
        party: DheParty,
        reply: &HandshakeReply,
    ) -> Result<HandshakeCompletion, HandshakeError> {
        validate_public_value(party.modulus(), &reply.public_value)
            .map_err(|err| HandshakeError::violation(format!("responder public value: {err}")))?;

        let seed = self
            .authority
            .open_seed(&reply.encrypted_seed)
            .map_err(|err| HandshakeError::authentication(err.to_string()))?;
        if seed.len() != self.config.seed_len {
            return Err(HandshakeError::violation(format!(
                "seed is {} bytes, expected {}",
                seed.len(),
                self.config.seed_len
            )));
        }

        let modulus = party.modulus().clone();
        let generator = party.generator().clone();
        let secret = party.mutual_secret(&reply.public_value).map_err(crypto_to_violation)?;
        let key = session_key(&secret.to_padded_bytes(&modulus), &seed, self.config.kdf_iterations)?;

        self.state = HandshakeState::KeyDerived;
        Ok(HandshakeCompletion {
            material: SessionKeyMaterial::new(key, self.iv),
            authenticated_identity: None,
            modulus,
            generator,
        })
    }

    fn expect_state(&self, expected: HandshakeState, operation: &str) -> Result<(), HandshakeError> {
        if self.state != expected {
            return Err(HandshakeError::InvalidState {
                state: self.state,
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        self.state = HandshakeState::Failed;
        self.party = None;
        err
    }
}

/// Responder side of the handshake.
pub struct Responder {
    state: HandshakeState,
    expected_identity: String,
    authority: AuthorityPublicKey,
    config: HandshakeConfig,
}

impl Responder {
    /// Create a responder that expects the initiator to prove it is
    /// `expected_identity` (the address the responder dialed).
    pub fn new(
        expected_identity: impl Into<String>,
        authority: AuthorityPublicKey,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            state: HandshakeState::Init,
            expected_identity: expected_identity.into(),
            authority,
            config,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Validate the initiator's message, reply, and derive the session key.
    ///
    /// CPU-bound: tests the received modulus for primality.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not in `Init`
    /// - `ProtocolViolation` for any malformed or out-of-range field
    /// - `AuthenticationFailure` if the signature does not verify for the
    ///   expected identity
    pub fn handle_init<R>(
        &mut self,
        init: &HandshakeInit,
        rng: &mut R,
    ) -> Result<(HandshakeReply, HandshakeCompletion), HandshakeError>
    where
        R: RngCore + CryptoRng,
    {
        if self.state != HandshakeState::Init {
            return Err(HandshakeError::InvalidState {
                state: self.state,
                operation: "handle_init".to_string(),
            });
        }

        match self.respond(init, rng) {
            Ok(result) => {
                self.state = HandshakeState::KeyDerived;
                Ok(result)
            },
            Err(err) => {
                self.state = HandshakeState::Failed;
                Err(err)
            },
        }
    }

    fn respond<R>(
        &self,
        init: &HandshakeInit,
        rng: &mut R,
    ) -> Result<(HandshakeReply, HandshakeCompletion), HandshakeError>
    where
        R: RngCore + CryptoRng,
    {
        let iv: [u8; BLOCK_SIZE] = init.iv.as_slice().try_into().map_err(|_| {
            HandshakeError::violation(format!("iv is {} bytes, expected {BLOCK_SIZE}", init.iv.len()))
        })?;
        if init.signature.len() != SIGNATURE_SIZE {
            return Err(HandshakeError::violation(format!(
                "signature is {} bytes, expected {SIGNATURE_SIZE}",
                init.signature.len()
            )));
        }

        let bits = init.modulus.bits();
        if bits < self.config.min_prime_bits || bits > self.config.max_prime_bits {
            return Err(HandshakeError::violation(format!(
                "modulus is {bits} bits, accepted range {}..={}",
                self.config.min_prime_bits, self.config.max_prime_bits
            )));
        }
        validate_public_value(&init.modulus, &init.generator)
            .map_err(|_| HandshakeError::violation("generator outside [2, p-2]"))?;
        validate_public_value(&init.modulus, &init.public_value)
            .map_err(|_| HandshakeError::violation("initiator public value outside [2, p-2]"))?;

        let transcript = transcript(
            &self.expected_identity,
            &init.modulus,
            &init.generator,
            &init.public_value,
            &iv,
        );
        self.authority.verify(&transcript, &init.signature).map_err(|_| {
            HandshakeError::authentication(format!(
                "signature does not verify for {}",
                self.expected_identity
            ))
        })?;

        if !is_probable_prime(&init.modulus, self.config.primality_rounds, rng) {
            return Err(HandshakeError::violation("modulus is not prime"));
        }

        let party = DheParty::with_parameters(init.modulus.clone(), init.generator.clone(), rng)
            .map_err(crypto_to_violation)?;
        let public_value = party.public_value();

        let mut seed = zeroize::Zeroizing::new(vec![0u8; self.config.seed_len]);
        rng.fill_bytes(&mut seed);
        let encrypted_seed = self.authority.seal(&seed, rng);

        let secret = party.mutual_secret(&init.public_value).map_err(crypto_to_violation)?;
        let key =
            session_key(&secret.to_padded_bytes(&init.modulus), &seed, self.config.kdf_iterations)?;

        let reply = HandshakeReply { public_value, encrypted_seed };
        let completion = HandshakeCompletion {
            material: SessionKeyMaterial::new(key, iv),
            authenticated_identity: Some(self.expected_identity.clone()),
            modulus: init.modulus.clone(),
            generator: init.generator.clone(),
        };
        Ok((reply, completion))
    }
}

/// Canonical bytes signed by the initiator.
///
/// Each field is length-prefixed (u32 big endian) so no two distinct
/// transcripts share an encoding.
pub fn transcript(
    identity: &str,
    modulus: &BigUint,
    generator: &BigUint,
    public_value: &BigUint,
    iv: &[u8],
) -> Vec<u8> {
    let fields: [&[u8]; 5] = [
        identity.as_bytes(),
        &modulus.to_bytes_be(),
        &generator.to_bytes_be(),
        &public_value.to_bytes_be(),
        iv,
    ];

    let mut out = Vec::with_capacity(
        TRANSCRIPT_LABEL.len() + fields.iter().map(|field| field.len() + 4).sum::<usize>(),
    );
    out.extend_from_slice(TRANSCRIPT_LABEL);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Wrap the initiator's message in an envelope.
///
/// # Errors
///
/// - `ProtocolViolation` if encoding fails
pub fn init_envelope(init: HandshakeInit) -> Result<MessageEnvelope, HandshakeError> {
    Payload::HandshakeInit(init)
        .into_envelope(Header::Identity(None), Method::Post)
        .map_err(protocol_to_violation)
}

/// Wrap the responder's reply in an envelope.
///
/// # Errors
///
/// - `ProtocolViolation` if encoding fails
pub fn reply_envelope(reply: HandshakeReply) -> Result<MessageEnvelope, HandshakeError> {
    Payload::HandshakeReply(reply)
        .into_envelope(Header::Identity(None), Method::Post)
        .map_err(protocol_to_violation)
}

/// Decode the initiator's message from raw bytes.
///
/// # Errors
///
/// - `ProtocolViolation` for malformed JSON, the wrong endpoint or a bad field
pub fn decode_init(bytes: &[u8]) -> Result<HandshakeInit, HandshakeError> {
    match decode_payload(bytes)? {
        Payload::HandshakeInit(init) => Ok(init),
        other => Err(HandshakeError::violation(format!(
            "expected handshake.init, got {}",
            other.endpoint()
        ))),
    }
}

/// Decode the responder's reply from raw bytes.
///
/// # Errors
///
/// - `ProtocolViolation` for malformed JSON, the wrong endpoint or a bad field
pub fn decode_reply(bytes: &[u8]) -> Result<HandshakeReply, HandshakeError> {
    match decode_payload(bytes)? {
        Payload::HandshakeReply(reply) => Ok(reply),
        other => Err(HandshakeError::violation(format!(
            "expected handshake.reply, got {}",
            other.endpoint()
        ))),
    }
}

fn decode_payload(bytes: &[u8]) -> Result<Payload, HandshakeError> {
    let envelope = MessageEnvelope::from_bytes(bytes).map_err(protocol_to_violation)?;
    Payload::from_envelope(&envelope).map_err(protocol_to_violation)
}

fn session_key(
    secret: &[u8],
    seed: &[u8],
    iterations: u32,
) -> Result<[u8; KEY_SIZE], HandshakeError> {
    let derived = zeroize::Zeroizing::new(
        derive_key(secret, KEY_SIZE, iterations, Some(seed)).map_err(HandshakeError::Crypto)?,
    );
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&derived);
    Ok(key)
}

fn protocol_to_violation(err: ProtocolError) -> HandshakeError {
    HandshakeError::violation(err.to_string())
}

fn crypto_to_violation(err: CryptoError) -> HandshakeError {
    HandshakeError::violation(err.to_string())
}

fn crypto_to_local(err: CryptoError) -> HandshakeError {
    match err {
        CryptoError::Cancelled => HandshakeError::Cancelled,
        other => HandshakeError::Crypto(other),
    }
}
