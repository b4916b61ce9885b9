//! Per-peer session state.
//!
//! The accept loop records the DH parameters when a connection starts,
//! installs the key material once the handshake completes, and binds a user
//! after application-level login. Entries are removed when the connection
//! closes.
//!
//! The secret exponent is deliberately absent: it lives only inside the
//! handshake state machine and dies with it.

use std::{collections::HashMap, net::SocketAddr};

use num_bigint::BigUint;

use crate::{error::SessionCacheError, transport::SessionKeyMaterial};

/// State cached for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCacheEntry {
    /// DH generator
    pub dhe_base: BigUint,
    /// DH modulus
    pub dhe_modulus: BigUint,
    /// Session key and IV. `None` until the handshake completes
    pub material: Option<SessionKeyMaterial>,
    /// Token issued at login
    pub session_token: Option<String>,
    /// User bound to this connection (after login)
    pub user_id: Option<u64>,
}

impl SessionCacheEntry {
    fn new(dhe_base: BigUint, dhe_modulus: BigUint) -> Self {
        Self { dhe_base, dhe_modulus, material: None, session_token: None, user_id: None }
    }
}

/// Map from peer address to [`SessionCacheEntry`].
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<SocketAddr, SessionCacheEntry>,
}

impl SessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh entry for `addr` with the handshake parameters.
    ///
    /// Replaces any previous entry for the address, including its key
    /// material. Returns the replaced entry.
    pub fn record_parameters(
        &mut self,
        addr: SocketAddr,
        dhe_base: BigUint,
        dhe_modulus: BigUint,
    ) -> Option<SessionCacheEntry> {
        self.entries.insert(addr, SessionCacheEntry::new(dhe_base, dhe_modulus))
    }

    /// Install the key material derived by the handshake.
    ///
    /// # Errors
    ///
    /// - `UnknownPeer` if no parameters were recorded for `addr`
    pub fn install(
        &mut self,
        addr: SocketAddr,
        material: SessionKeyMaterial,
    ) -> Result<(), SessionCacheError> {
        let entry = self.entries.get_mut(&addr).ok_or(SessionCacheError::UnknownPeer { addr })?;
        entry.material = Some(material);
        Ok(())
    }

    /// Bind a logged-in user to an established session.
    ///
    /// # Errors
    ///
    /// - `UnknownPeer` if no entry exists for `addr`
    /// - `NotEstablished` if the handshake has not completed
    pub fn bind_user(
        &mut self,
        addr: SocketAddr,
        session_token: impl Into<String>,
        user_id: u64,
    ) -> Result<(), SessionCacheError> {
        let entry = self.entries.get_mut(&addr).ok_or(SessionCacheError::UnknownPeer { addr })?;
        if entry.material.is_none() {
            return Err(SessionCacheError::NotEstablished { addr });
        }

        entry.session_token = Some(session_token.into());
        entry.user_id = Some(user_id);
        Ok(())
    }

    /// Entry for `addr`. `None` if the peer is unknown.
    pub fn get(&self, addr: &SocketAddr) -> Option<&SessionCacheEntry> {
        self.entries.get(addr)
    }

    /// Whether `addr` has completed a handshake.
    pub fn is_established(&self, addr: &SocketAddr) -> bool {
        self.entries.get(addr).is_some_and(|entry| entry.material.is_some())
    }

    /// Remove and return the entry for `addr`.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<SessionCacheEntry> {
        self.entries.remove(addr)
    }

    /// Number of cached peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn material() -> SessionKeyMaterial {
        SessionKeyMaterial::new([7; 16], [9; 16])
    }

    #[test]
    fn lifecycle() {
        let mut cache = SessionCache::new();
        assert!(cache.is_empty());

        assert!(cache.record_parameters(addr(1), 2u32.into(), 23u32.into()).is_none());
        assert!(!cache.is_established(&addr(1)));
        assert_eq!(cache.len(), 1);

        cache.install(addr(1), material()).unwrap();
        assert!(cache.is_established(&addr(1)));

        cache.bind_user(addr(1), "token-1", 42).unwrap();
        let entry = cache.get(&addr(1)).unwrap();
        assert_eq!(entry.user_id, Some(42));
        assert_eq!(entry.session_token.as_deref(), Some("token-1"));
        assert_eq!(entry.dhe_modulus, BigUint::from(23u32));

        let removed = cache.remove(&addr(1)).unwrap();
        assert_eq!(removed.material, Some(material()));
        assert!(cache.is_empty());
        assert!(!cache.is_established(&addr(1)));
    }

    #[test]
    fn install_requires_recorded_peer() {
        let mut cache = SessionCache::new();
        assert_eq!(
            cache.install(addr(2), material()),
            Err(SessionCacheError::UnknownPeer { addr: addr(2) })
        );
    }

    #[test]
    fn bind_user_requires_established_session() {
        let mut cache = SessionCache::new();
        assert_eq!(
            cache.bind_user(addr(3), "t", 1),
            Err(SessionCacheError::UnknownPeer { addr: addr(3) })
        );

        cache.record_parameters(addr(3), 2u32.into(), 23u32.into());
        assert_eq!(
            cache.bind_user(addr(3), "t", 1),
            Err(SessionCacheError::NotEstablished { addr: addr(3) })
        );
        assert_eq!(cache.get(&addr(3)).unwrap().user_id, None);
    }

    #[test]
    fn record_parameters_replaces_stale_entry() {
        let mut cache = SessionCache::new();
        cache.record_parameters(addr(4), 2u32.into(), 23u32.into());
        cache.install(addr(4), material()).unwrap();

        let previous = cache.record_parameters(addr(4), 5u32.into(), 47u32.into()).unwrap();
        assert!(previous.material.is_some());
        assert!(!cache.is_established(&addr(4)));
        assert_eq!(cache.len(), 1);
    }
}
