//! WEFT: Woven Ethernet Fabric Transport
//!
//! The packet switching core of a peer-to-peer Ethernet overlay. Each node
//! owns a cryptographic identity and exchanges encrypted, authenticated,
//! possibly-fragmented packets with other nodes over unreliable datagram
//! transports — directly, via a relay, or via a well-known root server —
//! turning local Ethernet frames into overlay packets and back.

pub mod bloom;
pub mod cache;
pub mod config;
pub mod demarc;
pub mod endpoint;
pub mod ethernet;
pub mod identity;
pub mod multicast;
pub mod network;
pub mod packet;
pub mod path;
pub mod peer;
pub mod switch;
pub mod tap;
pub mod topology;

mod util;

/// Software version, carried in HELLO.
pub const VERSION_MAJOR: u8 = 0;
/// Software version, carried in HELLO.
pub const VERSION_MINOR: u8 = 1;
/// Software version, carried in HELLO.
pub const VERSION_REVISION: u16 = 0;

// Re-export identity types
pub use identity::{
    decode_secret, decode_wpub, decode_wsec, encode_wpub, encode_wsec, Address, Identity,
    IdentityError, IdentityHash, PairKeys, PeerIdentity,
};

// Re-export the wire types
pub use endpoint::{Endpoint, EndpointError, EndpointKind};
pub use packet::{Cipher, Fragment, Packet, PacketError, Verb};

// Re-export Ethernet types
pub use ethernet::{Mac, MulticastGroup};

// Re-export core subsystems
pub use cache::{CacheError, PeerCache};
pub use config::{Config, ConfigError};
pub use demarc::{Demarc, DemarcError, UdpDemarc};
pub use multicast::Multicaster;
pub use network::{MembershipPolicy, Network};
pub use path::Path;
pub use peer::Peer;
pub use switch::{IncomingPacket, Switch};
pub use tap::EthernetTap;
pub use topology::{InetCidr, PhysicalPathConfig, Topology};

pub use util::now_ms;
