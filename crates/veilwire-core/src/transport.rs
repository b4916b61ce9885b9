//! Encrypted transport wrapper.
//!
//! Wraps a duplex byte transport and applies AES-128-CBC once session key
//! material is installed. Before that, bytes pass through unchanged in both
//! directions.
//!
//! # Record Format
//!
//! ```text
//! ┌────────┬──────────────────────────┬──────────────────┐
//! │ IV(16) │ CBC ciphertext (n × 16)  │ HMAC-SHA-256(32) │
//! └────────┴──────────────────────────┴──────────────────┘
//!                                       only with Integrity::HmacSha256
//! ```
//!
//! Readers always decrypt with the IV carried in the record, so a reader
//! accepts records from writers with either [`IvPolicy`].
//!
//! # Concurrency
//!
//! One transport per connection. [`EncryptedTransport::write`] takes
//! `&mut self`, so concurrent writers must go through a single owner (one
//! writer task per connection, or a lock around the transport).

use std::fmt;

use rand::{CryptoRng, RngCore, rngs::OsRng};
use veilwire_crypto::{
    BLOCK_SIZE, CryptoError, KEY_SIZE, RoundKeySchedule, cbc,
    mac::{self, MAC_KEY_SIZE, TAG_SIZE},
};
use zeroize::{Zeroize, Zeroizing};

use crate::error::TransportError;

/// Smallest armed record without a tag: IV plus one trailer block
const MIN_RECORD_SIZE: usize = BLOCK_SIZE + BLOCK_SIZE;

/// Symmetric key and session IV produced by a handshake.
///
/// Both fields are exactly 16 bytes. Wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; BLOCK_SIZE],
}

impl SessionKeyMaterial {
    /// Build from fixed-size arrays.
    pub fn new(key: [u8; KEY_SIZE], iv: [u8; BLOCK_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Build from slices, checking sizes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial` if either slice is not 16 bytes
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, TransportError> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| TransportError::InvalidKeyMaterial {
            reason: format!("key must be {KEY_SIZE} bytes, got {}", key.len()),
        })?;
        let iv: [u8; BLOCK_SIZE] = iv.try_into().map_err(|_| TransportError::InvalidKeyMaterial {
            reason: format!("iv must be {BLOCK_SIZE} bytes, got {}", iv.len()),
        })?;
        Ok(Self { key, iv })
    }

    /// Symmetric key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Session IV chosen by the handshake initiator.
    pub fn iv(&self) -> &[u8; BLOCK_SIZE] {
        &self.iv
    }
}

impl Drop for SessionKeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// How writers choose the IV for each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvPolicy {
    /// Fresh random IV for every record
    #[default]
    PerMessage,
    /// Reuse the handshake IV for every record.
    ///
    /// Leaks equality of leading plaintext blocks across records. Kept for
    /// peers that expect the session IV.
    Session,
}

/// Whether records carry an authentication tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    /// HMAC-SHA-256 over `iv || ciphertext`, verified before decryption
    #[default]
    HmacSha256,
    /// No tag; tampering is detected only by chance
    None,
}

/// Transport configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportConfig {
    /// IV selection for outgoing records
    pub iv_policy: IvPolicy,
    /// Tagging of records
    pub integrity: Integrity,
}

impl TransportConfig {
    /// Session IV and no tag, for peers that predate record authentication.
    pub fn legacy() -> Self {
        Self { iv_policy: IvPolicy::Session, integrity: Integrity::None }
    }
}

/// Byte sink underneath an [`EncryptedTransport`].
pub trait DuplexTransport {
    /// Send one record.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the peer is gone
    /// - `TransportError::Backpressure` if the record cannot be queued
    fn write(&mut self, record: Vec<u8>) -> Result<(), TransportError>;
}

/// In-memory capture of written records.
impl DuplexTransport for Vec<Vec<u8>> {
    fn write(&mut self, record: Vec<u8>) -> Result<(), TransportError> {
        self.push(record);
        Ok(())
    }
}

struct ArmedState {
    material: SessionKeyMaterial,
    schedule: RoundKeySchedule,
    mac_key: Option<Zeroizing<[u8; MAC_KEY_SIZE]>>,
}

/// Transparent encryption over a [`DuplexTransport`].
///
/// # Invariants
///
/// - Armed or unarmed, never partially armed. Key, IV, schedule and MAC key
///   are installed together by [`EncryptedTransport::arm`].
/// - Once armed, material does not change until
///   [`EncryptedTransport::connection_lost`] destroys it.
pub struct EncryptedTransport<T, R = OsRng> {
    inner: T,
    rng: R,
    config: TransportConfig,
    armed: Option<ArmedState>,
}

impl<T> EncryptedTransport<T, OsRng> {
    /// Create an unarmed transport using the OS RNG for IVs.
    pub fn new(inner: T, config: TransportConfig) -> Self {
        Self::with_rng(inner, config, OsRng)
    }
}

impl<T, R> EncryptedTransport<T, R>
where
    R: RngCore + CryptoRng,
{
    /// Create an unarmed transport with a caller-supplied RNG.
    pub fn with_rng(inner: T, config: TransportConfig, rng: R) -> Self {
        Self { inner, rng, config, armed: None }
    }

    /// Install session key material.
    ///
    /// Idempotent: arming again with identical material is a no-op.
    ///
    /// # Errors
    ///
    /// - `AlreadyArmed` if different material is already installed
    pub fn arm(&mut self, material: SessionKeyMaterial) -> Result<(), TransportError> {
        if let Some(armed) = &self.armed {
            return if armed.material == material { Ok(()) } else { Err(TransportError::AlreadyArmed) };
        }

        let schedule = RoundKeySchedule::from_key(material.key());
        let mac_key = match self.config.integrity {
            Integrity::HmacSha256 => Some(mac::derive_mac_key(material.key())),
            Integrity::None => None,
        };

        self.armed = Some(ArmedState { material, schedule, mac_key });
        Ok(())
    }

    /// [`EncryptedTransport::arm`] from raw slices.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyMaterial` if key or IV is not 16 bytes. The transport
    ///   stays unarmed.
    /// - `AlreadyArmed` as for [`EncryptedTransport::arm`]
    pub fn arm_from_slices(&mut self, key: &[u8], iv: &[u8]) -> Result<(), TransportError> {
        self.arm(SessionKeyMaterial::from_slices(key, iv)?)
    }

    /// Whether key material is installed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Turn plaintext into a wire record. Passthrough when unarmed.
    ///
    /// # Errors
    ///
    /// - `Crypto` if the plaintext is too long for the length trailer
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(armed) = &self.armed else {
            return Ok(plaintext.to_vec());
        };

        let iv = match self.config.iv_policy {
            IvPolicy::PerMessage => {
                let mut iv = [0u8; BLOCK_SIZE];
                self.rng.fill_bytes(&mut iv);
                iv
            },
            IvPolicy::Session => *armed.material.iv(),
        };

        let ciphertext = cbc::encrypt_with_schedule(plaintext, &armed.schedule, &iv)
            .map_err(TransportError::Crypto)?;

        let tag_len = if armed.mac_key.is_some() { TAG_SIZE } else { 0 };
        let mut record = Vec::with_capacity(BLOCK_SIZE + ciphertext.len() + tag_len);
        record.extend_from_slice(&iv);
        record.extend_from_slice(&ciphertext);

        if let Some(mac_key) = &armed.mac_key {
            let tag = mac::compute_tag(&mac_key[..], &[record.as_slice()]);
            record.extend_from_slice(&tag);
        }

        Ok(record)
    }

    /// Turn a wire record back into plaintext. Passthrough when unarmed.
    ///
    /// With a MAC the tag is checked before any decryption. The IV is taken
    /// from the record, not from the session material.
    ///
    /// # Errors
    ///
    /// - `MalformedCiphertext` if the record is too short or misaligned
    /// - `AuthenticationFailure` if the tag does not verify
    /// - `DecryptionIntegrityFailure` if the padding check fails
    pub fn read(&self, record: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(armed) = &self.armed else {
            return Ok(record.to_vec());
        };

        let body = match &armed.mac_key {
            Some(mac_key) => {
                let Some(body_len) = record.len().checked_sub(TAG_SIZE) else {
                    return Err(TransportError::MalformedCiphertext { len: record.len() });
                };
                let (body, tag) = record.split_at(body_len);
                check_record_shape(body, record.len())?;
                mac::verify_tag(&mac_key[..], &[body], tag)
                    .map_err(|_| TransportError::AuthenticationFailure)?;
                body
            },
            None => {
                check_record_shape(record, record.len())?;
                record
            },
        };

        let (iv, ciphertext) = body.split_at(BLOCK_SIZE);
        let mut iv_block = [0u8; BLOCK_SIZE];
        iv_block.copy_from_slice(iv);

        cbc::decrypt_with_schedule(ciphertext, &armed.schedule, &iv_block).map_err(|err| match err {
            CryptoError::InvalidCiphertextLength { .. } => {
                TransportError::MalformedCiphertext { len: record.len() }
            },
            other => TransportError::DecryptionIntegrityFailure { reason: other.to_string() },
        })
    }

    /// Destroy key material. The transport returns to passthrough.
    pub fn connection_lost(&mut self) {
        self.armed = None;
    }

    /// Underlying transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Underlying transport, mutably.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T, R> EncryptedTransport<T, R>
where
    T: DuplexTransport,
    R: RngCore + CryptoRng,
{
    /// Seal `data` and forward it to the underlying transport.
    ///
    /// # Errors
    ///
    /// - As for [`EncryptedTransport::seal`]
    /// - Whatever the underlying transport returns
    pub fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let record = self.seal(data)?;
        self.inner.write(record)
    }
}

impl<T: fmt::Debug, R> fmt::Debug for EncryptedTransport<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedTransport")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .field("armed", &self.armed.is_some())
            .finish_non_exhaustive()
    }
}

fn check_record_shape(body: &[u8], record_len: usize) -> Result<(), TransportError> {
    if body.len() < MIN_RECORD_SIZE || body.len() % BLOCK_SIZE != 0 {
        return Err(TransportError::MalformedCiphertext { len: record_len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn material() -> SessionKeyMaterial {
        SessionKeyMaterial::new([0x11; 16], [0x22; 16])
    }

    fn transport(config: TransportConfig) -> EncryptedTransport<Vec<Vec<u8>>, ChaCha20Rng> {
        EncryptedTransport::with_rng(Vec::new(), config, ChaCha20Rng::seed_from_u64(5))
    }

    fn armed(config: TransportConfig) -> EncryptedTransport<Vec<Vec<u8>>, ChaCha20Rng> {
        let mut transport = transport(config);
        transport.arm(material()).unwrap();
        transport
    }

    #[test]
    fn unarmed_write_is_passthrough() {
        let mut transport = transport(TransportConfig::default());
        transport.write(b"plain bytes").unwrap();
        assert_eq!(transport.inner(), &vec![b"plain bytes".to_vec()]);
        assert_eq!(transport.read(b"plain bytes").unwrap(), b"plain bytes");
    }

    #[test]
    fn armed_roundtrip_both_modes() {
        for config in [TransportConfig::default(), TransportConfig::legacy()] {
            let mut transport = armed(config);
            transport.write(b"hello over the wire").unwrap();
            let record = transport.inner()[0].clone();
            assert_ne!(record, b"hello over the wire");
            assert_eq!(transport.read(&record).unwrap(), b"hello over the wire");
        }
    }

    #[test]
    fn record_layout() {
        let mut transport = armed(TransportConfig::default());
        let record = transport.seal(b"abc").unwrap();
        assert_eq!(record.len(), 16 + 32 + 32);

        let mut legacy = armed(TransportConfig::legacy());
        let record = legacy.seal(b"abc").unwrap();
        assert_eq!(record.len(), 16 + 32);
        assert_eq!(&record[..16], &[0x22; 16]);
    }

    #[test]
    fn per_message_ivs_differ() {
        let mut transport = armed(TransportConfig::default());
        let a = transport.seal(b"same").unwrap();
        let b = transport.seal(b"same").unwrap();
        assert_ne!(a[..16], b[..16]);
        assert_ne!(a, b);
    }

    #[test]
    fn session_policy_reuses_iv() {
        let config = TransportConfig { iv_policy: IvPolicy::Session, integrity: Integrity::HmacSha256 };
        let mut transport = armed(config);
        let a = transport.seal(b"same").unwrap();
        let b = transport.seal(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reader_uses_record_iv() {
        let mut writer = armed(TransportConfig::default());
        let reader = armed(TransportConfig { iv_policy: IvPolicy::Session, ..TransportConfig::default() });
        let record = writer.seal(b"cross-policy").unwrap();
        assert_eq!(reader.read(&record).unwrap(), b"cross-policy");
    }

    #[test]
    fn mac_rejects_every_single_bit_flip() {
        let mut transport = armed(TransportConfig::default());
        let record = transport.seal(b"authenticated payload").unwrap();
        for index in 0..record.len() {
            let mut tampered = record.clone();
            tampered[index] ^= 0x01;
            assert_eq!(
                transport.read(&tampered),
                Err(TransportError::AuthenticationFailure),
                "flip at {index}"
            );
        }
    }

    #[test]
    fn legacy_mode_misses_body_flip() {
        let mut transport = armed(TransportConfig::legacy());
        let plaintext = [0x41u8; 64];
        let mut record = transport.seal(&plaintext).unwrap();

        // Flip a bit in the first ciphertext block; trailer block untouched
        record[BLOCK_SIZE] ^= 0x01;
        let decrypted = transport.read(&record).unwrap();
        assert_eq!(decrypted.len(), plaintext.len());
        assert_ne!(decrypted, plaintext);
    }

    #[test]
    fn legacy_trailer_damage_is_non_authoritative_failure() {
        let mut transport = armed(TransportConfig::legacy());
        let mut record = transport.seal(b"x").unwrap();
        // Damage the block before the trailer so the trailer decrypts as junk
        let penultimate = record.len() - 2 * BLOCK_SIZE;
        for byte in &mut record[penultimate..penultimate + BLOCK_SIZE] {
            *byte ^= 0xFF;
        }
        match transport.read(&record) {
            Err(TransportError::DecryptionIntegrityFailure { .. }) => {},
            Ok(garbage) => assert_ne!(garbage, b"x"),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_records() {
        let transport = armed(TransportConfig::default());
        assert_eq!(transport.read(&[0u8; 10]), Err(TransportError::MalformedCiphertext { len: 10 }));
        assert_eq!(
            transport.read(&[0u8; 16 + 20 + 32]),
            Err(TransportError::MalformedCiphertext { len: 68 })
        );

        let legacy = armed(TransportConfig::legacy());
        assert_eq!(legacy.read(&[0u8; 16]), Err(TransportError::MalformedCiphertext { len: 16 }));
    }

    #[test]
    fn arm_is_idempotent_and_exclusive() {
        let mut transport = armed(TransportConfig::default());
        assert!(transport.arm(material()).is_ok());
        assert_eq!(
            transport.arm(SessionKeyMaterial::new([0x99; 16], [0x22; 16])),
            Err(TransportError::AlreadyArmed)
        );
    }

    #[test]
    fn wrong_sizes_leave_transport_unarmed() {
        let mut transport = transport(TransportConfig::default());
        assert!(matches!(
            transport.arm_from_slices(&[0u8; 15], &[0u8; 16]),
            Err(TransportError::InvalidKeyMaterial { .. })
        ));
        assert!(matches!(
            transport.arm_from_slices(&[0u8; 16], &[0u8; 17]),
            Err(TransportError::InvalidKeyMaterial { .. })
        ));
        assert!(!transport.is_armed());
        transport.write(b"still plain").unwrap();
        assert_eq!(transport.inner()[0], b"still plain");
    }

    #[test]
    fn connection_lost_destroys_material() {
        let mut transport = armed(TransportConfig::default());
        transport.connection_lost();
        assert!(!transport.is_armed());
        assert!(transport.arm(SessionKeyMaterial::new([0x99; 16], [0; 16])).is_ok());
    }

    #[test]
    fn debug_redacts_material() {
        let rendered = format!("{:?}", material());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("17"));
    }
}
