//! Network topology database: peers, physical paths, roots, trust.
//!
//! The topology is the shared directory every switch thread consults. Peers
//! and paths are reference-counted and canonical — one live instance per
//! overlay address, one per (local socket, remote address) pair — so
//! liveness stamps taken on any thread are visible to all.
//!
//! ## Locking
//!
//! Two read/write locks: one over the peer maps and root set, one over the
//! path map. Lookups and traversals take read locks; inserts, removals and
//! root mutations take write locks. The `each_*` traversals run their
//! callback **under the read lock** — callbacks must not re-enter mutating
//! topology operations or they will deadlock. Use [`Topology::get_all_peers`]
//! when the callback needs to mutate.

mod trust;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, info};

use crate::cache::PeerCache;
use crate::identity::{Address, Identity, IdentityHash, PeerIdentity};
use crate::packet::UDP_DEFAULT_PAYLOAD_MTU;
use crate::path::{Path, LOCAL_SOCKET_ANY};
use crate::peer::Peer;

pub use trust::{CidrError, InetCidr, PhysicalPathConfig, MAX_CONFIGURABLE_PATHS};

/// How often roots are re-ranked by periodic maintenance.
pub const ROOT_RANK_INTERVAL: i64 = 60_000;

/// Process-wide salt for path hash keys, drawn once from a secure source.
///
/// Salting prevents a remote sender from grinding addresses that collide in
/// the path map. Read-only after first use.
fn path_hash_salt() -> u64 {
    static SALT: OnceLock<u64> = OnceLock::new();
    *SALT.get_or_init(|| rand::Rng::random(&mut rand::rng()))
}

/// 64-bit integer finalizer (splitmix64).
fn hash64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Key for looking up paths by local socket and remote address.
fn path_hash(local_socket: i64, remote: &SocketAddr) -> u64 {
    let salt = path_hash_salt();
    match remote.ip() {
        IpAddr::V4(ip) => hash64(salt ^ u64::from(u32::from(ip)))
            .wrapping_add(u64::from(remote.port()))
            .wrapping_add(local_socket as u64),
        IpAddr::V6(ip) => {
            let octets = ip.octets();
            let lo = u64::from_be_bytes(octets[..8].try_into().expect("16 octets"));
            let hi = u64::from_be_bytes(octets[8..].try_into().expect("16 octets"));
            hash64(salt ^ lo.wrapping_add(hi))
                .wrapping_add(u64::from(remote.port()))
                .wrapping_add(local_socket as u64)
        }
    }
}

/// Peer maps and root set, guarded together by one lock.
///
/// Invariant: a peer present in `by_addr` is present in `by_hash` and
/// `by_probe` under its derived keys; removal clears all three.
#[derive(Default)]
struct PeerMaps {
    by_addr: HashMap<Address, Arc<Peer>>,
    by_hash: HashMap<IdentityHash, Arc<Peer>>,
    by_probe: HashMap<u64, Arc<Peer>>,
    /// Designated root identities, keyed by overlay address.
    roots: HashMap<Address, PeerIdentity>,
    /// Root peer records, kept sorted ascending by apparent latency.
    root_peers: Vec<Arc<Peer>>,
}

impl PeerMaps {
    fn insert(&mut self, peer: Arc<Peer>) {
        self.by_addr.insert(peer.address(), Arc::clone(&peer));
        self.by_hash
            .insert(*peer.identity_hash(), Arc::clone(&peer));
        self.by_probe.insert(peer.probe(), Arc::clone(&peer));
        if self.roots.contains_key(&peer.address())
            && !self.root_peers.iter().any(|p| Arc::ptr_eq(p, &peer))
        {
            self.root_peers.push(peer);
        }
    }

    fn remove(&mut self, addr: Address) -> Option<Arc<Peer>> {
        let peer = self.by_addr.remove(&addr)?;
        self.by_hash.remove(peer.identity_hash());
        self.by_probe.remove(&peer.probe());
        self.root_peers.retain(|p| !Arc::ptr_eq(p, &peer));
        Some(peer)
    }
}

/// Database of peers, canonical paths, root ranking and path trust.
pub struct Topology {
    identity: Arc<Identity>,
    cache: Option<Arc<PeerCache>>,
    peers: RwLock<PeerMaps>,
    /// Salted-hash buckets; each bucket is scanned for an exact
    /// (local socket, remote address) match so hash collisions can never
    /// alias two distinct pairs onto one path.
    paths: RwLock<HashMap<u64, Vec<Arc<Path>>>>,
    physical_paths: RwLock<Vec<(InetCidr, PhysicalPathConfig)>>,
    last_root_rank: AtomicI64,
}

impl Topology {
    /// Create a topology for the local identity, optionally cache-backed.
    pub fn new(identity: Arc<Identity>, cache: Option<Arc<PeerCache>>) -> Self {
        Self {
            identity,
            cache,
            peers: RwLock::new(PeerMaps::default()),
            paths: RwLock::new(HashMap::new()),
            physical_paths: RwLock::new(Vec::new()),
            last_root_rank: AtomicI64::new(0),
        }
    }

    /// The local node's overlay address.
    pub fn local_address(&self) -> Address {
        self.identity.address()
    }

    // === Peers ===

    /// Look up a peer by overlay address, optionally falling back to the
    /// persistent cache.
    ///
    /// On a cache hit the insert is double-checked under the write lock: if
    /// a concurrent inserter won the race, its record is returned instead of
    /// the just-loaded one.
    pub fn peer(&self, addr: Address, load_from_cache: bool) -> Option<Arc<Peer>> {
        {
            let maps = self.peers.read().expect("topology peers lock");
            if let Some(peer) = maps.by_addr.get(&addr) {
                return Some(Arc::clone(peer));
            }
        }
        if !load_from_cache {
            return None;
        }
        let (loaded, endpoints) = self.cache.as_ref()?.load(&self.identity, addr)?;
        {
            let mut maps = self.peers.write().expect("topology peers lock");
            if let Some(existing) = maps.by_addr.get(&addr) {
                return Some(Arc::clone(existing));
            }
            maps.insert(Arc::clone(&loaded));
        }
        // Cached endpoints become candidate paths (not yet live).
        for endpoint in endpoints {
            if let Some(remote) = endpoint.inet_addr() {
                loaded.learn_path(self.path(LOCAL_SOCKET_ANY, remote));
            }
        }
        Some(loaded)
    }

    /// Look up a peer by 384-bit identity hash. Memory only.
    pub fn peer_by_hash(&self, hash: &IdentityHash) -> Option<Arc<Peer>> {
        let maps = self.peers.read().expect("topology peers lock");
        maps.by_hash.get(hash).cloned()
    }

    /// Look up a peer by inbound probe value. Memory only.
    pub fn peer_by_probe(&self, probe: u64) -> Option<Arc<Peer>> {
        let maps = self.peers.read().expect("topology peers lock");
        maps.by_probe.get(&probe).cloned()
    }

    /// Insert a peer unless one with the same address exists.
    ///
    /// Returns the winning record; the caller must replace its handle with
    /// the returned one.
    pub fn add(&self, peer: Arc<Peer>) -> Arc<Peer> {
        let mut maps = self.peers.write().expect("topology peers lock");
        if let Some(existing) = maps.by_addr.get(&peer.address()) {
            return Arc::clone(existing);
        }
        debug!(peer = %peer.address(), "Added peer");
        maps.insert(Arc::clone(&peer));
        peer
    }

    /// Remove a peer from every index.
    pub fn remove(&self, addr: Address) -> Option<Arc<Peer>> {
        let mut maps = self.peers.write().expect("topology peers lock");
        maps.remove(addr)
    }

    /// Number of peers in memory.
    pub fn peer_count(&self) -> usize {
        self.peers.read().expect("topology peers lock").by_addr.len()
    }

    // === Traversals ===

    /// Apply `f` to every peer, holding the peer read lock throughout.
    ///
    /// `f` must not call mutating topology operations (deadlock).
    pub fn each_peer(&self, mut f: impl FnMut(&Arc<Peer>)) {
        let maps = self.peers.read().expect("topology peers lock");
        for peer in maps.by_addr.values() {
            f(peer);
        }
    }

    /// Apply `f(peer, is_root)` to every peer, holding the peer read lock
    /// throughout. Same re-entrancy contract as [`Topology::each_peer`].
    pub fn each_peer_with_root(&self, mut f: impl FnMut(&Arc<Peer>, bool)) {
        let maps = self.peers.read().expect("topology peers lock");
        for peer in maps.by_addr.values() {
            f(peer, maps.roots.contains_key(&peer.address()));
        }
    }

    /// Apply `f` to every canonical path, holding the path read lock
    /// throughout. Same re-entrancy contract as [`Topology::each_peer`].
    pub fn each_path(&self, mut f: impl FnMut(&Arc<Path>)) {
        let paths = self.paths.read().expect("topology paths lock");
        for bucket in paths.values() {
            for path in bucket {
                f(path);
            }
        }
    }

    /// Copy every peer into `out` (lock released before return), for callers
    /// that need to mutate while iterating.
    pub fn get_all_peers(&self, out: &mut Vec<Arc<Peer>>) {
        let maps = self.peers.read().expect("topology peers lock");
        out.clear();
        out.extend(maps.by_addr.values().cloned());
    }

    // === Paths ===

    /// Canonicalize a (local socket, remote address) pair.
    ///
    /// Two lookups with the same pair return the same shared instance;
    /// distinct pairs whose salted hashes collide still get distinct paths.
    pub fn path(&self, local_socket: i64, remote: SocketAddr) -> Arc<Path> {
        let key = path_hash(local_socket, &remote);
        {
            let paths = self.paths.read().expect("topology paths lock");
            if let Some(bucket) = paths.get(&key) {
                if let Some(path) = bucket
                    .iter()
                    .find(|p| p.local_socket() == local_socket && p.address() == remote)
                {
                    return Arc::clone(path);
                }
            }
        }
        let created = Arc::new(Path::new(local_socket, remote));
        let mut paths = self.paths.write().expect("topology paths lock");
        let bucket = paths.entry(key).or_default();
        if let Some(existing) = bucket
            .iter()
            .find(|p| p.local_socket() == local_socket && p.address() == remote)
        {
            return Arc::clone(existing);
        }
        bucket.push(Arc::clone(&created));
        created
    }

    /// Number of canonical paths currently known.
    pub fn path_count(&self) -> usize {
        let paths = self.paths.read().expect("topology paths lock");
        paths.values().map(|b| b.len()).sum()
    }

    // === Roots ===

    /// Designate a root server, optionally with a bootstrap address to
    /// attempt first contact through.
    pub fn add_root(&self, identity: PeerIdentity, bootstrap: Option<SocketAddr>) -> Arc<Peer> {
        let peer = {
            let mut maps = self.peers.write().expect("topology peers lock");
            maps.roots.insert(identity.address(), identity);
            match maps.by_addr.get(&identity.address()) {
                Some(existing) => {
                    let existing = Arc::clone(existing);
                    if !maps.root_peers.iter().any(|p| Arc::ptr_eq(p, &existing)) {
                        maps.root_peers.push(Arc::clone(&existing));
                    }
                    existing
                }
                None => {
                    let peer = Arc::new(Peer::new(&self.identity, identity));
                    maps.insert(Arc::clone(&peer));
                    peer
                }
            }
        };
        if let Some(addr) = bootstrap {
            peer.learn_path(self.path(LOCAL_SOCKET_ANY, addr));
        }
        info!(root = %identity.address(), "Added root");
        peer
    }

    /// Remove a root designation. The peer record itself survives.
    pub fn remove_root(&self, identity: &PeerIdentity) -> bool {
        let mut maps = self.peers.write().expect("topology peers lock");
        if maps.roots.remove(&identity.address()).is_none() {
            return false;
        }
        maps.root_peers.retain(|p| p.address() != identity.address());
        true
    }

    /// True if this identity is a designated root.
    pub fn is_root(&self, identity: &PeerIdentity) -> bool {
        let maps = self.peers.read().expect("topology peers lock");
        maps.roots.get(&identity.address()) == Some(identity)
    }

    /// True if this overlay address belongs to a designated root.
    pub fn is_root_address(&self, addr: Address) -> bool {
        let maps = self.peers.read().expect("topology peers lock");
        maps.roots.contains_key(&addr)
    }

    /// The current best (lowest-latency) root.
    pub fn root(&self) -> Option<Arc<Peer>> {
        let maps = self.peers.read().expect("topology peers lock");
        maps.root_peers.first().cloned()
    }

    /// The best root whose address is not in `exclude` (Whois retries
    /// consult a different root each attempt).
    pub fn best_root_excluding(&self, exclude: &[Address]) -> Option<Arc<Peer>> {
        let maps = self.peers.read().expect("topology peers lock");
        maps.root_peers
            .iter()
            .find(|p| !exclude.contains(&p.address()))
            .cloned()
    }

    /// Sort roots ascending by apparent round-trip latency.
    pub fn rank_roots(&self, now: i64) {
        let mut maps = self.peers.write().expect("topology peers lock");
        maps.root_peers.sort_by_key(|p| p.latency());
        self.last_root_rank.store(now, Ordering::Relaxed);
    }

    // === Physical path trust ===

    /// MTU and trusted path ID for an outbound physical destination.
    ///
    /// The first configured block containing the address wins; defaults are
    /// the standard MTU and no trust.
    pub fn get_outbound_path_info(&self, remote: SocketAddr) -> (usize, u64) {
        let table = self.physical_paths.read().expect("physical path lock");
        for (cidr, config) in table.iter() {
            if cidr.contains(remote.ip()) {
                return (config.mtu, config.trusted_path_id);
            }
        }
        (UDP_DEFAULT_PAYLOAD_MTU, 0)
    }

    /// Trusted path ID for an outbound physical destination, or 0 for none.
    pub fn get_outbound_path_trust(&self, remote: SocketAddr) -> u64 {
        let table = self.physical_paths.read().expect("physical path lock");
        for (cidr, config) in table.iter() {
            if cidr.contains(remote.ip()) {
                return config.trusted_path_id;
            }
        }
        0
    }

    /// Validate a trusted path ID claimed by an inbound packet.
    pub fn should_inbound_path_be_trusted(&self, from: SocketAddr, trusted_path_id: u64) -> bool {
        if trusted_path_id == 0 {
            return false;
        }
        let table = self.physical_paths.read().expect("physical path lock");
        table
            .iter()
            .any(|(cidr, config)| config.trusted_path_id == trusted_path_id && cidr.contains(from.ip()))
    }

    /// Add, replace or remove one physical path configuration entry.
    ///
    /// `(None, _)` clears the whole table; `(Some(net), None)` removes the
    /// entry for `net`; `(Some(net), Some(config))` adds or replaces it. The
    /// table swap is atomic under the write lock and capped at
    /// [`MAX_CONFIGURABLE_PATHS`] entries.
    pub fn set_physical_path_configuration(
        &self,
        network: Option<InetCidr>,
        config: Option<PhysicalPathConfig>,
    ) {
        let mut table = self.physical_paths.write().expect("physical path lock");
        match (network, config) {
            (None, _) => table.clear(),
            (Some(net), None) => table.retain(|(cidr, _)| *cidr != net),
            (Some(net), Some(config)) => {
                if let Some(entry) = table.iter_mut().find(|(cidr, _)| *cidr == net) {
                    entry.1 = config;
                } else if table.len() < MAX_CONFIGURABLE_PATHS {
                    table.push((net, config));
                }
            }
        }
    }

    // === Maintenance ===

    /// Periodic maintenance: garbage-collect dead paths, write dirty peers
    /// back to the cache, and re-rank roots on a coarser cadence.
    pub fn do_periodic_tasks(&self, now: i64) {
        {
            let mut paths = self.paths.write().expect("topology paths lock");
            for bucket in paths.values_mut() {
                bucket.retain(|p| Arc::strong_count(p) > 1 || p.recently_active(now));
            }
            paths.retain(|_, bucket| !bucket.is_empty());
        }

        let mut peers = Vec::new();
        self.get_all_peers(&mut peers);
        for peer in &peers {
            peer.prune_dead_paths(now);
            if peer.is_dirty() {
                if let Some(cache) = &self.cache {
                    if cache.save(peer, now).is_ok() {
                        peer.mark_clean();
                    }
                }
            }
        }

        if now - self.last_root_rank.load(Ordering::Relaxed) >= ROOT_RANK_INTERVAL {
            self.rank_roots(now);
        }
    }

    /// Snapshot every in-memory peer to the cache.
    pub fn save_all(&self, now: i64) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut peers = Vec::new();
        self.get_all_peers(&mut peers);
        for peer in &peers {
            if cache.save(peer, now).is_ok() {
                peer.mark_clean();
            }
        }
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("local", &self.local_address())
            .field("peers", &self.peer_count())
            .field("paths", &self.path_count())
            .finish()
    }
}
