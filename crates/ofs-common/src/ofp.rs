//! OpenFlow 1.3 reserved identifiers
//!
//! Only the sentinels the dataplane reasons about are listed here; the
//! wire layer owns the full protocol catalogue.

use std::fmt;

/// Maximum number of physical and logical switch ports
pub const OFPP_MAX: u32 = 0xffff_ff00;
/// Send the packet out the input port
pub const OFPP_IN_PORT: u32 = 0xffff_fff8;
/// Submit the packet to the first flow table (packet-out only)
pub const OFPP_TABLE: u32 = 0xffff_fff9;
/// Forward using the non-OpenFlow pipeline
pub const OFPP_NORMAL: u32 = 0xffff_fffa;
/// Flood using the non-OpenFlow pipeline
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
/// All standard ports except the input port
pub const OFPP_ALL: u32 = 0xffff_fffc;
/// Send to the controller
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
/// Local OpenFlow port
pub const OFPP_LOCAL: u32 = 0xffff_fffe;
/// Wildcard port, also "no output port decided"
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Last usable group number
pub const OFPG_MAX: u32 = 0xffff_ff00;
/// All groups (delete requests)
pub const OFPG_ALL: u32 = 0xffff_fffc;
/// Wildcard group, also "no output group decided"
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Last usable table number
pub const OFPTT_MAX: u8 = 0xfe;
/// Wildcard table used in requests
pub const OFPTT_ALL: u8 = 0xff;

/// Packet is not buffered on the switch
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
/// Controller max_len meaning "send the whole packet, never buffer"
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// Printable port number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortNo(pub u32);

impl fmt::Display for PortNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            OFPP_IN_PORT => f.write_str("in_port"),
            OFPP_TABLE => f.write_str("table"),
            OFPP_NORMAL => f.write_str("normal"),
            OFPP_FLOOD => f.write_str("flood"),
            OFPP_ALL => f.write_str("all"),
            OFPP_CONTROLLER => f.write_str("ctrl"),
            OFPP_LOCAL => f.write_str("local"),
            OFPP_ANY => f.write_str("any"),
            port => write!(f, "{}", port),
        }
    }
}

/// Printable group number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupNo(pub u32);

impl fmt::Display for GroupNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            OFPG_ALL => f.write_str("all"),
            OFPG_ANY => f.write_str("any"),
            group => write!(f, "{}", group),
        }
    }
}

/// Printable buffer id (`None` is `OFP_NO_BUFFER`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferNo(pub Option<u32>);

impl fmt::Display for BufferNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None | Some(OFP_NO_BUFFER) => f.write_str("none"),
            Some(id) => write!(f, "{}", id),
        }
    }
}

/// True for a port a flow entry may name in an output action
pub fn is_valid_output_port(port: u32) -> bool {
    match port {
        0 | OFPP_ANY | OFPP_TABLE => false,
        p if p <= OFPP_MAX => true,
        OFPP_IN_PORT | OFPP_NORMAL | OFPP_FLOOD | OFPP_ALL | OFPP_CONTROLLER | OFPP_LOCAL => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_port_names() {
        assert_eq!(PortNo(OFPP_CONTROLLER).to_string(), "ctrl");
        assert_eq!(PortNo(OFPP_ANY).to_string(), "any");
        assert_eq!(PortNo(7).to_string(), "7");
        assert_eq!(GroupNo(OFPG_ANY).to_string(), "any");
        assert_eq!(BufferNo(None).to_string(), "none");
        assert_eq!(BufferNo(Some(0x105)).to_string(), "261");
    }

    #[test]
    fn test_output_port_validity() {
        assert!(is_valid_output_port(1));
        assert!(is_valid_output_port(OFPP_CONTROLLER));
        assert!(is_valid_output_port(OFPP_FLOOD));
        assert!(!is_valid_output_port(0));
        assert!(!is_valid_output_port(OFPP_TABLE));
        assert!(!is_valid_output_port(OFPP_ANY));
        assert!(!is_valid_output_port(0xffff_ff10));
    }
}
