//! AES-128-CBC with length-trailer padding
//!
//! # Padding
//!
//! Not PKCS#7. The plaintext is cut into 16-byte blocks and only the last
//! partial block is right-filled with ASCII `'0'`. One more block is always
//! appended that holds the original length as 16 ASCII decimal digits:
//!
//! ```text
//! "hello"  →  "hello00000000000" "0000000000000005"
//! ```
//!
//! Unpadding parses the trailer and keeps that many leading bytes, which
//! drops filler and trailer with one slice. A block-aligned plaintext still
//! gets the trailer block, so ciphertext length is always
//! `ceil(len / 16) * 16 + 16`.
//!
//! # Integrity
//!
//! There is none. A trailer that fails to parse is a hint that the key or
//! data is wrong, but a flipped bit in any block other than the last two
//! decrypts without complaint. Authenticate ciphertext with [`crate::mac`]
//! before trusting the output of [`decrypt`].

use crate::{
    aes::{BLOCK_SIZE, Block, RoundKeySchedule, decrypt_array, encrypt_array},
    error::CryptoError,
};

/// IV size in bytes
pub const IV_SIZE: usize = BLOCK_SIZE;

/// Width of the decimal length trailer
const TRAILER_SIZE: usize = BLOCK_SIZE;

/// Filler byte for the final partial block
const FILLER: u8 = b'0';

/// Largest length representable in the 16-digit trailer
const MAX_PLAINTEXT_LEN: u64 = 9_999_999_999_999_999;

/// Apply length-trailer padding.
///
/// # Errors
///
/// - `PlaintextTooLong` if the length needs more than 16 decimal digits
pub fn pad(plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() as u64 > MAX_PLAINTEXT_LEN {
        return Err(CryptoError::PlaintextTooLong { len: plaintext.len() });
    }

    let body_len = plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let mut padded = Vec::with_capacity(body_len + TRAILER_SIZE);
    padded.extend_from_slice(plaintext);
    padded.resize(body_len, FILLER);
    padded.extend_from_slice(format!("{:0width$}", plaintext.len(), width = TRAILER_SIZE).as_bytes());

    debug_assert_eq!(padded.len() % BLOCK_SIZE, 0);
    Ok(padded)
}

/// Strip length-trailer padding.
///
/// # Errors
///
/// - `InvalidCiphertextLength` if `padded` is shorter than the trailer
/// - `InvalidPadding` if the trailer is not 16 ASCII digits or claims more
///   bytes than precede it
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let Some(body_len) = padded.len().checked_sub(TRAILER_SIZE) else {
        return Err(CryptoError::InvalidCiphertextLength { len: padded.len() });
    };
    let (body, trailer) = padded.split_at(body_len);

    if !trailer.iter().all(u8::is_ascii_digit) {
        return Err(CryptoError::InvalidPadding {
            reason: "length trailer is not decimal".to_string(),
        });
    }

    let len = trailer.iter().fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));
    let len = usize::try_from(len).map_err(|_| CryptoError::InvalidPadding {
        reason: format!("length {len} does not fit in memory"),
    })?;

    if len > body.len() {
        return Err(CryptoError::InvalidPadding {
            reason: format!("length {len} exceeds {} decrypted bytes", body.len()),
        });
    }

    Ok(body[..len].to_vec())
}

/// Pad then encrypt with AES-128-CBC.
///
/// # Errors
///
/// - `InvalidKeySize`, `InvalidIvSize` for wrong-sized inputs
/// - `PlaintextTooLong` (see [`pad`])
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let schedule = RoundKeySchedule::expand(key)?;
    encrypt_with_schedule(plaintext, &schedule, as_iv(iv)?)
}

/// Decrypt with AES-128-CBC then unpad.
///
/// # Errors
///
/// - `InvalidKeySize`, `InvalidIvSize` for wrong-sized inputs
/// - `InvalidCiphertextLength` if not a positive multiple of 16
/// - `InvalidPadding` (see [`unpad`])
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let schedule = RoundKeySchedule::expand(key)?;
    decrypt_with_schedule(ciphertext, &schedule, as_iv(iv)?)
}

/// [`encrypt`] with a pre-expanded key.
pub fn encrypt_with_schedule(
    plaintext: &[u8],
    schedule: &RoundKeySchedule,
    iv: &Block,
) -> Result<Vec<u8>, CryptoError> {
    let padded = pad(plaintext)?;
    encrypt_blocks(&padded, schedule, iv)
}

/// [`decrypt`] with a pre-expanded key.
pub fn decrypt_with_schedule(
    ciphertext: &[u8],
    schedule: &RoundKeySchedule,
    iv: &Block,
) -> Result<Vec<u8>, CryptoError> {
    let padded = decrypt_blocks(ciphertext, schedule, iv)?;
    unpad(&padded)
}

/// CBC-encrypt block-aligned data without padding.
///
/// # Errors
///
/// - `InvalidCiphertextLength` if `data` is empty or not block-aligned
pub fn encrypt_blocks(
    data: &[u8],
    schedule: &RoundKeySchedule,
    iv: &Block,
) -> Result<Vec<u8>, CryptoError> {
    check_aligned(data)?;

    let mut output = Vec::with_capacity(data.len());
    let mut chain = *iv;

    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        for (out, (byte, prev)) in block.iter_mut().zip(chunk.iter().zip(chain.iter())) {
            *out = byte ^ prev;
        }
        chain = encrypt_array(&block, schedule);
        output.extend_from_slice(&chain);
    }

    Ok(output)
}

/// CBC-decrypt block-aligned data without unpadding.
///
/// The chain value for block `i + 1` is ciphertext block `i` as received,
/// never the decrypted block.
///
/// # Errors
///
/// - `InvalidCiphertextLength` if `data` is empty or not block-aligned
pub fn decrypt_blocks(
    data: &[u8],
    schedule: &RoundKeySchedule,
    iv: &Block,
) -> Result<Vec<u8>, CryptoError> {
    check_aligned(data)?;

    let mut output = Vec::with_capacity(data.len());
    let mut chain = *iv;

    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut cipher_block = [0u8; BLOCK_SIZE];
        cipher_block.copy_from_slice(chunk);

        let intermediate = decrypt_array(&cipher_block, schedule);
        output.extend(intermediate.iter().zip(chain.iter()).map(|(byte, prev)| byte ^ prev));

        chain = cipher_block;
    }

    Ok(output)
}

/// Ciphertext length for a plaintext of `plaintext_len` bytes.
pub fn ciphertext_len(plaintext_len: usize) -> usize {
    plaintext_len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE + TRAILER_SIZE
}

fn check_aligned(data: &[u8]) -> Result<(), CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength { len: data.len() });
    }
    Ok(())
}

fn as_iv(iv: &[u8]) -> Result<&Block, CryptoError> {
    iv.try_into().map_err(|_| CryptoError::InvalidIvSize { expected: IV_SIZE, actual: iv.len() })
}
