//! Tagged network endpoint descriptor with a stable wire form.
//!
//! An [`Endpoint`] names any destination a packet may be steered toward: an
//! overlay address with its identity hash, a raw IPv4/IPv6 socket address, a
//! DNS name and port, a URL, or a LAN-local Ethernet MAC.
//!
//! ## Wire layout
//!
//! ```text
//! [tag:1][variant body][x:2][y:2][z:2]
//! ```
//!
//! The trailing three big-endian i16 words are a location triple in
//! kilometers, reserved for geolocated routing and not consulted by the
//! switching core. `Nil` marshals to the tag byte alone.

use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use thiserror::Error;

use crate::ethernet::Mac;
use crate::identity::{Address, IdentityHash};

/// Maximum length of a DNS name or URL body.
pub const ENDPOINT_MAX_NAME_SIZE: usize = 255;

/// Maximum marshaled size: tag + length byte + name + port + location.
pub const ENDPOINT_MARSHAL_SIZE_MAX: usize = 1 + 1 + ENDPOINT_MAX_NAME_SIZE + 2 + 6;

// Wire tag values. InetV4 and InetV6 are distinct tags sharing one variant.
const TAG_NIL: u8 = 0;
const TAG_OVERLAY: u8 = 1;
const TAG_DNSNAME: u8 = 2;
const TAG_URL: u8 = 3;
const TAG_INET_V4: u8 = 4;
const TAG_ETHERNET: u8 = 5;
const TAG_INET_V6: u8 = 6;

/// Errors from endpoint marshaling.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("malformed endpoint encoding")]
    MalformedEncoding,

    #[error("name too long: {0} bytes")]
    NameTooLong(usize),
}

/// The variant payload of an [`Endpoint`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// Empty endpoint.
    Nil,
    /// Overlay address plus identity hash, for relaying and meshy behavior.
    Overlay(Address, IdentityHash),
    /// DNS name and port that resolves to a socket address.
    DnsName(String, u16),
    /// URL for HTTP or WebSocket transport.
    Url(String),
    /// IPv4 or IPv6 socket address.
    Inet(SocketAddr),
    /// 48-bit LAN-local Ethernet address.
    Ethernet(Mac),
}

/// A destination descriptor: variant payload plus reserved location triple.
///
/// Ordering is total, structural, and stable across runs (lexicographic on
/// the wire tag then the body), so two peers can independently sort an
/// unordered pair of endpoints into the same canonical key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    kind: EndpointKind,
    /// X,Y,Z location in kilometers; reserved, zero when unknown.
    location: [i16; 3],
}

impl Endpoint {
    /// The nil endpoint.
    pub fn nil() -> Self {
        Self::new(EndpointKind::Nil)
    }

    /// Create an endpoint with a zero location triple.
    pub fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            location: [0; 3],
        }
    }

    /// Create an overlay endpoint.
    pub fn overlay(addr: Address, hash: IdentityHash) -> Self {
        Self::new(EndpointKind::Overlay(addr, hash))
    }

    /// Create an Inet endpoint from a socket address of either family.
    pub fn inet(sa: SocketAddr) -> Self {
        Self::new(EndpointKind::Inet(sa))
    }

    /// Create a DNS name endpoint.
    pub fn dns_name(name: impl Into<String>, port: u16) -> Self {
        Self::new(EndpointKind::DnsName(name.into(), port))
    }

    /// Create a URL endpoint.
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(EndpointKind::Url(url.into()))
    }

    /// Create an Ethernet endpoint.
    pub fn ethernet(mac: Mac) -> Self {
        Self::new(EndpointKind::Ethernet(mac))
    }

    /// Return the variant payload.
    pub fn kind(&self) -> &EndpointKind {
        &self.kind
    }

    /// Set the location triple (kilometers).
    pub fn set_location(&mut self, location: [i16; 3]) {
        self.location = location;
    }

    /// Return the location triple (kilometers).
    pub fn location(&self) -> [i16; 3] {
        self.location
    }

    /// True unless this is the nil endpoint.
    pub fn is_some(&self) -> bool {
        !matches!(self.kind, EndpointKind::Nil)
    }

    // === Accessors (neutral values on tag mismatch) ===

    /// Socket address, or None for other tags.
    pub fn inet_addr(&self) -> Option<SocketAddr> {
        match self.kind {
            EndpointKind::Inet(sa) => Some(sa),
            _ => None,
        }
    }

    /// DNS name, or empty string for other tags.
    pub fn dns_name_str(&self) -> &str {
        match &self.kind {
            EndpointKind::DnsName(name, _) => name,
            _ => "",
        }
    }

    /// DNS port, or -1 for other tags.
    pub fn dns_port(&self) -> i32 {
        match self.kind {
            EndpointKind::DnsName(_, port) => port as i32,
            _ => -1,
        }
    }

    /// Overlay address, or nil for other tags.
    pub fn overlay_address(&self) -> Address {
        match self.kind {
            EndpointKind::Overlay(addr, _) => addr,
            _ => Address::NIL,
        }
    }

    /// Identity hash, or None for other tags.
    pub fn identity_hash(&self) -> Option<&IdentityHash> {
        match &self.kind {
            EndpointKind::Overlay(_, hash) => Some(hash),
            _ => None,
        }
    }

    /// URL, or empty string for other tags.
    pub fn url_str(&self) -> &str {
        match &self.kind {
            EndpointKind::Url(url) => url,
            _ => "",
        }
    }

    /// Ethernet MAC, or the zero MAC for other tags.
    pub fn ethernet_mac(&self) -> Mac {
        match self.kind {
            EndpointKind::Ethernet(mac) => mac,
            _ => Mac::default(),
        }
    }

    /// The wire tag byte for this endpoint.
    pub fn type_byte(&self) -> u8 {
        match &self.kind {
            EndpointKind::Nil => TAG_NIL,
            EndpointKind::Overlay(..) => TAG_OVERLAY,
            EndpointKind::DnsName(..) => TAG_DNSNAME,
            EndpointKind::Url(..) => TAG_URL,
            EndpointKind::Inet(SocketAddr::V4(_)) => TAG_INET_V4,
            EndpointKind::Inet(SocketAddr::V6(_)) => TAG_INET_V6,
            EndpointKind::Ethernet(_) => TAG_ETHERNET,
        }
    }

    // === Wire form ===

    /// Append the wire form to a buffer, returning the bytes written.
    pub fn marshal(&self, buf: &mut Vec<u8>) -> Result<usize, EndpointError> {
        let start = buf.len();
        buf.push(self.type_byte());
        match &self.kind {
            EndpointKind::Nil => {
                // Nil is a single tag byte with no location trailer.
                return Ok(buf.len() - start);
            }
            EndpointKind::Overlay(addr, hash) => {
                buf.extend_from_slice(addr.as_bytes());
                buf.extend_from_slice(hash.as_bytes());
            }
            EndpointKind::DnsName(name, port) => {
                if name.len() > ENDPOINT_MAX_NAME_SIZE {
                    return Err(EndpointError::NameTooLong(name.len()));
                }
                buf.push(name.len() as u8);
                buf.extend_from_slice(name.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            EndpointKind::Url(url) => {
                if url.len() > ENDPOINT_MAX_NAME_SIZE {
                    return Err(EndpointError::NameTooLong(url.len()));
                }
                buf.push(url.len() as u8);
                buf.extend_from_slice(url.as_bytes());
            }
            EndpointKind::Inet(SocketAddr::V4(sa)) => {
                buf.extend_from_slice(&sa.ip().octets());
                buf.extend_from_slice(&sa.port().to_be_bytes());
            }
            EndpointKind::Inet(SocketAddr::V6(sa)) => {
                buf.extend_from_slice(&sa.ip().octets());
                buf.extend_from_slice(&sa.port().to_be_bytes());
            }
            EndpointKind::Ethernet(mac) => {
                buf.extend_from_slice(mac.as_bytes());
            }
        }
        for axis in self.location {
            buf.extend_from_slice(&axis.to_be_bytes());
        }
        Ok(buf.len() - start)
    }

    /// Parse the wire form, returning the endpoint and bytes consumed.
    pub fn unmarshal(data: &[u8]) -> Result<(Self, usize), EndpointError> {
        let tag = *data.first().ok_or(EndpointError::MalformedEncoding)?;
        let mut at = 1usize;

        let kind = match tag {
            TAG_NIL => return Ok((Self::nil(), 1)),
            TAG_OVERLAY => {
                let addr = Address::from_slice(take(data, &mut at, 5)?)
                    .map_err(|_| EndpointError::MalformedEncoding)?;
                let hash = IdentityHash::from_slice(take(data, &mut at, 48)?)
                    .map_err(|_| EndpointError::MalformedEncoding)?;
                EndpointKind::Overlay(addr, hash)
            }
            TAG_DNSNAME => {
                let len = take(data, &mut at, 1)?[0] as usize;
                let name = std::str::from_utf8(take(data, &mut at, len)?)
                    .map_err(|_| EndpointError::MalformedEncoding)?
                    .to_string();
                let port = u16::from_be_bytes(take2(data, &mut at)?);
                EndpointKind::DnsName(name, port)
            }
            TAG_URL => {
                let len = take(data, &mut at, 1)?[0] as usize;
                let url = std::str::from_utf8(take(data, &mut at, len)?)
                    .map_err(|_| EndpointError::MalformedEncoding)?
                    .to_string();
                EndpointKind::Url(url)
            }
            TAG_INET_V4 => {
                let ip = take(data, &mut at, 4)?;
                let ip = Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]);
                let port = u16::from_be_bytes(take2(data, &mut at)?);
                EndpointKind::Inet(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }
            TAG_INET_V6 => {
                let raw = take(data, &mut at, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                let port = u16::from_be_bytes(take2(data, &mut at)?);
                EndpointKind::Inet(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    0,
                    0,
                )))
            }
            TAG_ETHERNET => {
                let mac = Mac::from_slice(take(data, &mut at, 6)?);
                EndpointKind::Ethernet(mac)
            }
            _ => return Err(EndpointError::MalformedEncoding),
        };

        let mut location = [0i16; 3];
        for axis in &mut location {
            *axis = i16::from_be_bytes(take2(data, &mut at)?);
        }

        Ok((Self { kind, location }, at))
    }

    /// Body bytes used for ordering: the marshaled form without the tag.
    fn ordering_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // marshal only fails on oversized names, which compare by prefix
        // anyway; fall back to the raw string bytes in that case.
        match self.marshal(&mut buf) {
            Ok(_) => buf.split_off(1),
            Err(_) => match &self.kind {
                EndpointKind::DnsName(name, _) => name.as_bytes().to_vec(),
                EndpointKind::Url(url) => url.as_bytes().to_vec(),
                _ => Vec::new(),
            },
        }
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_byte()
            .cmp(&other.type_byte())
            .then_with(|| self.ordering_body().cmp(&other.ordering_body()))
            // Nil carries no body, so break its ties on the location triple
            // to stay consistent with equality.
            .then_with(|| self.location.cmp(&other.location))
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(sa: SocketAddr) -> Self {
        Self::inet(sa)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EndpointKind::Nil => write!(f, "nil"),
            EndpointKind::Overlay(addr, _) => write!(f, "overlay:{}", addr),
            EndpointKind::DnsName(name, port) => write!(f, "dns:{}:{}", name, port),
            EndpointKind::Url(url) => write!(f, "url:{}", url),
            EndpointKind::Inet(sa) => write!(f, "inet:{}", sa),
            EndpointKind::Ethernet(mac) => write!(f, "eth:{}", mac),
        }
    }
}

fn take<'a>(data: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], EndpointError> {
    let end = at.checked_add(n).ok_or(EndpointError::MalformedEncoding)?;
    if end > data.len() {
        return Err(EndpointError::MalformedEncoding);
    }
    let slice = &data[*at..end];
    *at = end;
    Ok(slice)
}

fn take2(data: &[u8], at: &mut usize) -> Result<[u8; 2], EndpointError> {
    let s = take(data, at, 2)?;
    Ok([s[0], s[1]])
}
