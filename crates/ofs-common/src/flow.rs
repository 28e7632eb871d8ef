//! Transport 4-tuple
//!
//! The flow identity used by the elephant-flow detector: IPv4 source and
//! destination addresses plus TCP/UDP source and destination ports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// IPv4 transport 4-tuple (addresses in host byte order)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourTuple {
    /// Source IPv4 address
    pub ip_src: u32,
    /// Destination IPv4 address
    pub ip_dst: u32,
    /// TCP/UDP source port
    pub tcp_src: u16,
    /// TCP/UDP destination port
    pub tcp_dst: u16,
}

impl FourTuple {
    /// Create from raw fields
    #[inline(always)]
    pub const fn new(ip_src: u32, ip_dst: u32, tcp_src: u16, tcp_dst: u16) -> Self {
        Self {
            ip_src,
            ip_dst,
            tcp_src,
            tcp_dst,
        }
    }

    /// Create from typed addresses
    #[inline(always)]
    pub fn from_v4(src: Ipv4Addr, dst: Ipv4Addr, tcp_src: u16, tcp_dst: u16) -> Self {
        Self::new(u32::from(src), u32::from(dst), tcp_src, tcp_dst)
    }

    /// Source address
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_src)
    }

    /// Destination address
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_dst)
    }

    /// Get reverse (reply direction) tuple
    #[inline(always)]
    pub const fn reverse(&self) -> Self {
        Self::new(self.ip_dst, self.ip_src, self.tcp_dst, self.tcp_src)
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_addr(),
            self.tcp_src,
            self.dst_addr(),
            self.tcp_dst
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_exact() {
        let a = FourTuple::new(0xC0A80101, 0x08080808, 12345, 443);
        let b = FourTuple::from_v4(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(8, 8, 8, 8), 12345, 443);
        assert_eq!(a, b);
        assert_ne!(a, a.reverse());
        assert_eq!(a, a.reverse().reverse());
    }

    #[test]
    fn test_display() {
        let ft = FourTuple::from_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1000, 80);
        assert_eq!(ft.to_string(), "10.0.0.1:1000 -> 10.0.0.2:80");
    }
}
