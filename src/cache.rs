//! Persistent peer cache.
//!
//! Known peers are written to disk so a restarted node can resume contacting
//! the fabric without re-learning every identity through Whois. Records are
//! addressed by 40-bit overlay address, one file per peer:
//!
//! ```text
//! [identity:34][endpoint count:1][endpoints…][last seen ms:8 BE]
//! ```
//!
//! The endpoints are the peer's known physical addresses in their
//! [`Endpoint`] wire form; the topology re-learns them as candidate paths
//! when the record is loaded.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::identity::{Address, Identity, PeerIdentity, IDENTITY_MARSHAL_SIZE};
use crate::peer::Peer;

/// Cap on endpoints kept per cached peer.
const MAX_CACHED_ENDPOINTS: usize = 16;

/// Errors from the peer cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cache record for {0}")]
    MalformedRecord(Address),
}

/// Directory-backed store of peer identities and last-known endpoints.
pub struct PeerCache {
    dir: PathBuf,
}

impl PeerCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, addr: Address) -> PathBuf {
        self.dir.join(addr.to_string())
    }

    /// Write one peer record.
    pub fn save(&self, peer: &Peer, now: i64) -> Result<(), CacheError> {
        let endpoints: Vec<Endpoint> = peer
            .paths()
            .iter()
            .take(MAX_CACHED_ENDPOINTS)
            .map(|p| Endpoint::inet(p.address()))
            .collect();

        let mut record = Vec::with_capacity(IDENTITY_MARSHAL_SIZE + 1 + 8);
        peer.identity().marshal(&mut record);
        record.push(endpoints.len() as u8);
        for endpoint in &endpoints {
            endpoint
                .marshal(&mut record)
                .map_err(|_| CacheError::MalformedRecord(peer.address()))?;
        }
        record.extend_from_slice(&now.to_be_bytes());
        std::fs::write(self.record_path(peer.address()), &record)?;
        debug!(peer = %peer.address(), endpoints = endpoints.len(), "Cached peer");
        Ok(())
    }

    /// Load a peer record, reconstructing the peer with keys derived from
    /// the local identity.
    ///
    /// Returns the peer plus its cached endpoints (the caller canonicalizes
    /// them into paths). Absent and corrupt records both yield None; corrupt
    /// files are removed.
    pub fn load(
        &self,
        local: &Identity,
        addr: Address,
    ) -> Option<(Arc<Peer>, Vec<Endpoint>)> {
        let path = self.record_path(addr);
        let record = std::fs::read(&path).ok()?;
        match Self::parse(addr, &record) {
            Ok((identity, endpoints)) => {
                Some((Arc::new(Peer::new(local, identity)), endpoints))
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "Discarding corrupt peer cache record");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn parse(addr: Address, record: &[u8]) -> Result<(PeerIdentity, Vec<Endpoint>), CacheError> {
        let malformed = || CacheError::MalformedRecord(addr);
        let (identity, mut at) = PeerIdentity::unmarshal(record).map_err(|_| malformed())?;
        if identity.address() != addr {
            return Err(malformed());
        }

        let count = *record.get(at).ok_or_else(malformed)? as usize;
        at += 1;
        let mut endpoints = Vec::with_capacity(count.min(MAX_CACHED_ENDPOINTS));
        for _ in 0..count {
            let (endpoint, consumed) =
                Endpoint::unmarshal(&record[at..]).map_err(|_| malformed())?;
            at += consumed;
            endpoints.push(endpoint);
        }
        if record.len() != at + 8 {
            return Err(malformed());
        }
        Ok((identity, endpoints))
    }

    /// Remove one peer record, if present.
    pub fn forget(&self, addr: Address) {
        let _ = std::fs::remove_file(self.record_path(addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(fill: u8) -> Identity {
        Identity::from_secret_bytes(&[fill; 32]).unwrap()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);
        let peer = Peer::new(&local, *remote.public());
        peer.learn_path(Arc::new(crate::path::Path::new(
            1,
            "192.0.2.7:9993".parse().unwrap(),
        )));

        cache.save(&peer, 12345).unwrap();
        let (loaded, endpoints) = cache.load(&local, remote.address()).unwrap();
        assert_eq!(loaded.address(), remote.address());
        assert_eq!(loaded.identity_hash(), remote.public().hash());
        assert_eq!(endpoints.len(), 1);
        assert_eq!(
            endpoints[0].inet_addr(),
            Some("192.0.2.7:9993".parse().unwrap())
        );
    }

    #[test]
    fn test_save_load_without_endpoints() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);
        let peer = Peer::new(&local, *remote.public());

        cache.save(&peer, 1).unwrap();
        let (_, endpoints) = cache.load(&local, remote.address()).unwrap();
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        assert!(cache.load(&identity(1), Address::from_u64(0x42)).is_none());
    }

    #[test]
    fn test_corrupt_record_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);

        std::fs::write(
            dir.path().join(remote.address().to_string()),
            b"not a record",
        )
        .unwrap();
        assert!(cache.load(&local, remote.address()).is_none());
        // The corrupt file was removed.
        assert!(!dir.path().join(remote.address().to_string()).exists());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);
        let peer = Peer::new(&local, *remote.public());
        peer.learn_path(Arc::new(crate::path::Path::new(
            1,
            "192.0.2.7:9993".parse().unwrap(),
        )));
        cache.save(&peer, 1).unwrap();

        let path = dir.path().join(remote.address().to_string());
        let mut record = std::fs::read(&path).unwrap();
        record.truncate(record.len() - 4);
        std::fs::write(&path, &record).unwrap();
        assert!(cache.load(&local, remote.address()).is_none());
    }

    #[test]
    fn test_record_under_wrong_address_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);
        let peer = Peer::new(&local, *remote.public());
        cache.save(&peer, 1).unwrap();

        let other = Address::from_u64(0x0102030405);
        std::fs::copy(
            dir.path().join(remote.address().to_string()),
            dir.path().join(other.to_string()),
        )
        .unwrap();
        assert!(cache.load(&local, other).is_none());
    }

    #[test]
    fn test_forget() {
        let dir = TempDir::new().unwrap();
        let cache = PeerCache::open(dir.path()).unwrap();
        let local = identity(1);
        let remote = identity(2);
        let peer = Peer::new(&local, *remote.public());
        cache.save(&peer, 1).unwrap();
        cache.forget(remote.address());
        assert!(cache.load(&local, remote.address()).is_none());
    }
}
