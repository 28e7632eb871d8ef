//! L2-L4 header extraction
//!
//! Parses the fields flow tables match on and the 4-tuple the elephant
//! sketch records. Parsing never fails: anything that is truncated or not
//! understood simply leaves the corresponding layer unset.

use ofs_common::FourTuple;
use std::fmt;
use std::net::Ipv4Addr;

/// Ethernet header size
const ETH_HDR_SIZE: usize = 14;
/// VLAN tag size
const VLAN_TAG_SIZE: usize = 4;
/// Minimum IPv4 header size
const IPV4_MIN_HDR: usize = 20;
const TCP_MIN_HDR: usize = 20;
const UDP_HDR: usize = 8;

/// EtherType IPv4
pub const ETH_TYPE_IPV4: u16 = 0x0800;
/// EtherType 802.1Q
pub const ETH_TYPE_VLAN: u16 = 0x8100;
/// EtherType 802.1ad
pub const ETH_TYPE_QINQ: u16 = 0x88a8;
/// IP protocol TCP
pub const IP_PROTO_TCP: u8 = 6;
/// IP protocol UDP
pub const IP_PROTO_UDP: u8 = 17;

/// Parsed IPv4 header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Fields {
    /// Source address
    pub src: u32,
    /// Destination address
    pub dst: u32,
    /// Protocol number
    pub proto: u8,
    /// Time to live
    pub ttl: u8,
    /// Differentiated services code point
    pub dscp: u8,
    /// Header length in bytes
    pub header_len: usize,
}

/// Transport ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L4Ports {
    /// Source port
    pub src: u16,
    /// Destination port
    pub dst: u16,
}

/// Match fields extracted from a packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketFields {
    /// Ingress port
    pub in_port: u32,
    /// Logical tunnel id
    pub tunnel_id: u64,
    /// Innermost EtherType, 0 for runt frames
    pub eth_type: u16,
    /// Outermost VLAN id
    pub vlan_id: Option<u16>,
    /// Offset of the L3 header
    pub l3_offset: usize,
    /// IPv4 header
    pub ipv4: Option<Ipv4Fields>,
    /// TCP/UDP ports (first fragment only)
    pub l4: Option<L4Ports>,
}

impl PacketFields {
    /// Parse `data` received on `in_port`
    pub fn parse(data: &[u8], in_port: u32, tunnel_id: u64) -> Self {
        let mut fields = PacketFields {
            in_port,
            tunnel_id,
            ..Default::default()
        };

        if data.len() < ETH_HDR_SIZE {
            return fields;
        }

        // Walk any number of VLAN tags
        let mut offset = 12;
        let mut ether_type = read_u16(data, offset);
        while ether_type == ETH_TYPE_VLAN || ether_type == ETH_TYPE_QINQ {
            if offset + 2 + VLAN_TAG_SIZE > data.len() {
                return fields;
            }
            if fields.vlan_id.is_none() {
                fields.vlan_id = Some(read_u16(data, offset + 2) & 0x0fff);
            }
            offset += VLAN_TAG_SIZE;
            ether_type = read_u16(data, offset);
        }
        fields.eth_type = ether_type;
        fields.l3_offset = offset + 2;

        if ether_type != ETH_TYPE_IPV4 {
            return fields;
        }

        let l3 = fields.l3_offset;
        if l3 + IPV4_MIN_HDR > data.len() || data[l3] >> 4 != 4 {
            return fields;
        }
        let header_len = ((data[l3] & 0x0F) as usize) * 4;
        if header_len < IPV4_MIN_HDR || l3 + header_len > data.len() {
            return fields;
        }

        let ipv4 = Ipv4Fields {
            src: read_u32(data, l3 + 12),
            dst: read_u32(data, l3 + 16),
            proto: data[l3 + 9],
            ttl: data[l3 + 8],
            dscp: data[l3 + 1] >> 2,
            header_len,
        };
        fields.ipv4 = Some(ipv4);

        // Non-first fragments carry no transport header
        let frag_offset = read_u16(data, l3 + 6) & 0x1fff;
        if frag_offset != 0 {
            return fields;
        }

        let l4 = l3 + header_len;
        let min_len = match ipv4.proto {
            IP_PROTO_TCP => TCP_MIN_HDR,
            IP_PROTO_UDP => UDP_HDR,
            _ => return fields,
        };
        if l4 + min_len <= data.len() {
            fields.l4 = Some(L4Ports {
                src: read_u16(data, l4),
                dst: read_u16(data, l4 + 2),
            });
        }

        fields
    }

    /// IPv4 TCP/UDP 4-tuple, `None` for anything else
    pub fn four_tuple(&self) -> Option<FourTuple> {
        match (self.ipv4, self.l4) {
            (Some(ip), Some(ports)) => Some(FourTuple::new(ip.src, ip.dst, ports.src, ports.dst)),
            _ => None,
        }
    }

    /// False when an IPv4 TTL would expire at this hop
    pub fn is_ttl_valid(&self) -> bool {
        self.ipv4.map_or(true, |ip| ip.ttl > 1)
    }
}

impl fmt::Display for PacketFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{eth_type=\"0x{:04x}\"", self.eth_type)?;
        if let Some(vlan) = self.vlan_id {
            write!(f, ", vlan=\"{}\"", vlan)?;
        }
        if let Some(ip) = self.ipv4 {
            write!(
                f,
                ", ipv4_src=\"{}\", ipv4_dst=\"{}\", ip_proto=\"{}\", ttl=\"{}\"",
                Ipv4Addr::from(ip.src),
                Ipv4Addr::from(ip.dst),
                ip.proto,
                ip.ttl
            )?;
        }
        if let Some(ports) = self.l4 {
            write!(f, ", tp_src=\"{}\", tp_dst=\"{}\"", ports.src, ports.dst)?;
        }
        f.write_str("}")
    }
}

/// IPv4 header of `data` as described by `fields`, `None` if the data no
/// longer holds it
fn ipv4_header<'a>(data: &'a mut [u8], fields: &PacketFields) -> Option<&'a mut [u8]> {
    let ip = fields.ipv4?;
    let l3 = fields.l3_offset;
    data.get_mut(l3..l3.checked_add(ip.header_len)?)
}

/// Decrement the IPv4 TTL, returning false when nothing was changed
pub(crate) fn dec_ipv4_ttl(data: &mut [u8], fields: &PacketFields) -> bool {
    let Some(header) = ipv4_header(data, fields) else { return false };
    if header[8] == 0 {
        return false;
    }
    header[8] -= 1;
    refresh_ipv4_checksum(header);
    true
}

/// Rewrite the DSCP bits of the IPv4 TOS byte, preserving ECN
pub(crate) fn set_ipv4_dscp(data: &mut [u8], fields: &PacketFields, dscp: u8) -> bool {
    let Some(header) = ipv4_header(data, fields) else { return false };
    let ecn = header[1] & 0x03;
    header[1] = (dscp << 2) | ecn;
    refresh_ipv4_checksum(header);
    true
}

/// Recompute the header checksum in place
fn refresh_ipv4_checksum(header: &mut [u8]) {
    header[10] = 0;
    header[11] = 0;
    let sum = ipv4_checksum(header);
    header[10..12].copy_from_slice(&sum.to_be_bytes());
}

/// One's complement sum over an IPv4 header
pub(crate) fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[inline(always)]
fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

#[inline(always)]
fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
