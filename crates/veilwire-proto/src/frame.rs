//! Length-prefixed framing.
//!
//! The underlying transport is a raw byte stream, so each message is
//! delimited by a 4-byte big-endian length:
//!
//! `[len: u32 BE][body: len bytes]`
//!
//! Framing is applied outside the encrypted transport. The length covers the
//! sealed record once the session is armed, so it reveals message sizes but
//! nothing else.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Length prefix size
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum frame body size (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame limit before the session is armed. Handshake messages for the
/// largest accepted modulus are a few KiB.
pub const HANDSHAKE_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Prefix `body` with its length.
///
/// # Errors
///
/// - `ProtocolError::FrameTooLarge` if `body` exceeds [`MAX_FRAME_SIZE`]
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Incremental frame decoder.
///
/// Bytes arrive in arbitrary chunks; [`FrameDecoder::extend`] buffers them and
/// [`FrameDecoder::next_frame`] yields complete bodies in order.
///
/// # Security
///
/// - The declared length is checked against the decoder's limit as soon as
///   the prefix is available.
/// - Nothing is reserved for a declared length. The buffer grows only with
///   bytes actually received, so an idle peer costs what it sent.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// Create an empty decoder limited to [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty decoder with a tighter limit.
    ///
    /// Limits above [`MAX_FRAME_SIZE`] are clamped to it.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { buffer: BytesMut::new(), max_frame_size: max_frame_size.min(MAX_FRAME_SIZE) }
    }

    /// Change the limit for frames not yet returned. Clamped to
    /// [`MAX_FRAME_SIZE`].
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
    }

    /// Current frame limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Append received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame body, if one is buffered.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the next prefix declares more than
    ///   the decoder's limit. The stream cannot be resynchronized after this.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let Some(prefix) = self.buffer.get(..LENGTH_PREFIX_SIZE) else {
            return Ok(None);
        };

        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        len_bytes.copy_from_slice(prefix);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: len, max: self.max_frame_size });
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        let body = self.buffer.split_to(len).freeze();

        debug_assert_eq!(body.len(), len);
        Ok(Some(body))
    }
}
