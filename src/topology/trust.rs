//! Trusted physical path configuration.
//!
//! Operators may declare CIDR blocks (a secure LAN, a private interconnect)
//! whose traffic skips packet cryptography and may use a non-default MTU.
//! The table is a short ordered list scanned linearly; the first containing
//! entry wins.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::packet::UDP_DEFAULT_PAYLOAD_MTU;

/// Upper bound on configured physical path entries.
pub const MAX_CONFIGURABLE_PATHS: usize = 32;

/// Errors parsing CIDR notation.
#[derive(Debug, Error)]
pub enum CidrError {
    #[error("invalid CIDR '{0}'")]
    Invalid(String),
}

/// An IP network in CIDR notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InetCidr {
    ip: IpAddr,
    prefix_len: u8,
}

impl InetCidr {
    /// Create a CIDR block; the prefix length is clamped to the family width.
    pub fn new(ip: IpAddr, prefix_len: u8) -> Self {
        let max = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        Self {
            ip,
            prefix_len: prefix_len.min(max),
        }
    }

    /// True if `addr` falls inside this block. Families never match across.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.ip, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_match(&net.octets(), &ip.octets(), self.prefix_len)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_match(&net.octets(), &ip.octets(), self.prefix_len)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: &[u8], ip: &[u8], prefix_len: u8) -> bool {
    let full = (prefix_len / 8) as usize;
    if net[..full] != ip[..full] {
        return false;
    }
    let rem = prefix_len % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (net[full] & mask) == (ip[full] & mask)
}

impl FromStr for InetCidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, len) = s.split_once('/').ok_or_else(|| CidrError::Invalid(s.into()))?;
        let ip: IpAddr = ip.parse().map_err(|_| CidrError::Invalid(s.into()))?;
        let prefix_len: u8 = len.parse().map_err(|_| CidrError::Invalid(s.into()))?;
        let max = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(CidrError::Invalid(s.into()));
        }
        Ok(Self { ip, prefix_len })
    }
}

impl fmt::Display for InetCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// Per-CIDR physical path settings.
#[derive(Clone, Copy, Debug)]
pub struct PhysicalPathConfig {
    /// Nonzero to mark packets on this path as trusted (skipping packet
    /// cryptography). Zero is never a valid trusted path ID.
    pub trusted_path_id: u64,
    /// Payload MTU for destinations in this block.
    pub mtu: usize,
}

impl Default for PhysicalPathConfig {
    fn default() -> Self {
        Self {
            trusted_path_id: 0,
            mtu: UDP_DEFAULT_PAYLOAD_MTU,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_v4_containment() {
        let cidr: InetCidr = "10.0.0.0/8".parse().unwrap();
        assert!(cidr.contains(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(!cidr.contains(IpAddr::V4(Ipv4Addr::new(11, 0, 0, 1))));
    }

    #[test]
    fn test_non_octet_prefix() {
        let cidr: InetCidr = "192.168.4.0/22".parse().unwrap();
        assert!(cidr.contains(IpAddr::V4(Ipv4Addr::new(192, 168, 7, 255))));
        assert!(!cidr.contains(IpAddr::V4(Ipv4Addr::new(192, 168, 8, 0))));
    }

    #[test]
    fn test_v6_containment() {
        let cidr: InetCidr = "fd00::/8".parse().unwrap();
        assert!(cidr.contains(IpAddr::V6(Ipv6Addr::new(0xfd12, 0, 0, 0, 0, 0, 0, 1))));
        assert!(!cidr.contains(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))));
    }

    #[test]
    fn test_families_never_cross_match() {
        let cidr: InetCidr = "0.0.0.0/0".parse().unwrap();
        assert!(!cidr.contains(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        let cidr: InetCidr = "0.0.0.0/0".parse().unwrap();
        assert!(cidr.contains(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("10.0.0.0".parse::<InetCidr>().is_err());
        assert!("10.0.0.0/33".parse::<InetCidr>().is_err());
        assert!("banana/8".parse::<InetCidr>().is_err());
    }
}
