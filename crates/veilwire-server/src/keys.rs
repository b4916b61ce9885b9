//! Authority key loading.
//!
//! The key file holds the 64-byte authority key pair as hex: the Ed25519
//! signing seed followed by the X25519 sealing secret. Surrounding whitespace
//! is ignored.

use std::{fs, path::Path};

use rand::rngs::OsRng;
use veilwire_crypto::AuthorityKeyPair;
use zeroize::Zeroizing;

use crate::error::ServerError;

/// Where the authority key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Read from a key file
    File,
    /// Generated at startup; clients cannot pin it across restarts
    Ephemeral,
}

/// Load the key from `path`, or generate an ephemeral one.
///
/// # Errors
///
/// - `Config` if the file cannot be read or does not hold a valid key
pub fn load_or_generate(path: Option<&Path>) -> Result<(AuthorityKeyPair, KeySource), ServerError> {
    match path {
        Some(path) => Ok((read_key_file(path)?, KeySource::File)),
        None => Ok((AuthorityKeyPair::generate(&mut OsRng), KeySource::Ephemeral)),
    }
}

/// Read a hex key file.
///
/// # Errors
///
/// - `Config` if the file cannot be read or does not hold a valid key
pub fn read_key_file(path: &Path) -> Result<AuthorityKeyPair, ServerError> {
    let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| {
        ServerError::Config(format!("failed to read key '{}': {e}", path.display()))
    })?);

    AuthorityKeyPair::from_hex(contents.trim())
        .map_err(|e| ServerError::Config(format!("invalid key '{}': {e}", path.display())))
}

/// Generate a key pair and write it to `path` as hex.
///
/// Refuses to overwrite an existing file. On Unix the file is created with
/// mode `0600`.
///
/// # Errors
///
/// - `Config` if the file exists or cannot be written
pub fn write_new_key_file(path: &Path) -> Result<AuthorityKeyPair, ServerError> {
    use std::io::Write;

    let key = AuthorityKeyPair::generate(&mut OsRng);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| {
        ServerError::Config(format!("failed to create key '{}': {e}", path.display()))
    })?;
    file.write_all(key.to_hex().as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(|e| ServerError::Config(format!("failed to write key '{}': {e}", path.display())))?;

    Ok(key)
}
