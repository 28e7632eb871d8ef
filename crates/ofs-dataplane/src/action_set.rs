//! Actions and the per-packet action set
//!
//! Immediate actions run as soon as an apply-actions instruction executes.
//! Write-actions accumulate in the [`ActionSet`], at most one action of each
//! kind, and run when the packet leaves the pipeline.

use crate::packet::Packet;
use ofs_common::ofp::{self, GroupNo, PortNo};
use ofs_common::{BadActionCode, OflError, OflResult};
use std::fmt;

/// Set-field targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetField {
    /// IPv4 DSCP (6 bits)
    IpDscp(u8),
}

/// A single action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send out of a port, `max_len` bytes go to the controller
    Output {
        /// Egress port
        port: u32,
        /// Bytes sent when the port is the controller
        max_len: u16,
    },
    /// Process through a group
    Group(u32),
    /// Select an egress queue
    SetQueue(u32),
    /// Decrement IPv4 TTL
    DecNwTtl,
    /// Rewrite a header field
    SetField(SetField),
}

impl Action {
    /// Output to the controller with the given truncation
    pub fn to_controller(max_len: u16) -> Self {
        Action::Output {
            port: ofp::OFPP_CONTROLLER,
            max_len,
        }
    }

    /// Output to a port
    pub fn output(port: u32) -> Self {
        Action::Output { port, max_len: 0 }
    }

    /// Check arguments before the action is installed
    pub fn validate(&self) -> OflResult<()> {
        match *self {
            Action::Output { port, .. } if !ofp::is_valid_output_port(port) => {
                Err(OflError::BadAction(BadActionCode::BadOutPort))
            }
            Action::Group(group) if group > ofp::OFPG_MAX => {
                Err(OflError::BadAction(BadActionCode::BadOutGroup))
            }
            Action::SetField(SetField::IpDscp(dscp)) if dscp > 0x3f => {
                Err(OflError::BadAction(BadActionCode::BadArgument))
            }
            _ => Ok(()),
        }
    }

    /// Run a header-rewriting action on `pkt`
    ///
    /// Output, group and queue actions only record a decision and are
    /// handled by the caller.
    pub(crate) fn apply(&self, pkt: &mut Packet) {
        match *self {
            Action::DecNwTtl => {
                if !pkt.dec_nw_ttl() {
                    tracing::trace!("dec_nw_ttl on packet without IPv4 header");
                }
            }
            Action::SetField(SetField::IpDscp(dscp)) => {
                if !pkt.set_ip_dscp(dscp) {
                    tracing::trace!("set_field ip_dscp on packet without IPv4 header");
                }
            }
            Action::SetQueue(queue) => pkt.output_mut().queue = queue,
            Action::Group(group) => pkt.output_mut().group = group,
            Action::Output { port, max_len } => {
                let out = pkt.output_mut();
                out.port = port;
                out.port_max_len = max_len;
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Action::Output { port, max_len } => {
                write!(f, "out{{port=\"{}\", mlen=\"{}\"}}", PortNo(port), max_len)
            }
            Action::Group(group) => write!(f, "grp{{id=\"{}\"}}", GroupNo(group)),
            Action::SetQueue(queue) => write!(f, "queue{{id=\"{}\"}}", queue),
            Action::DecNwTtl => f.write_str("dec_nw_ttl"),
            Action::SetField(SetField::IpDscp(dscp)) => write!(f, "set_field{{ip_dscp=\"{}\"}}", dscp),
        }
    }
}

/// Where the packet goes once the action set has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDecision {
    /// Group chosen by the action set, `OFPG_ANY` for none
    pub group: u32,
    /// Port chosen by the action set, `OFPP_ANY` for none
    pub port: u32,
    /// Bytes of a controller-bound packet to send
    pub port_max_len: u16,
    /// Egress queue
    pub queue: u32,
}

impl Default for OutputDecision {
    fn default() -> Self {
        Self {
            group: ofp::OFPG_ANY,
            port: ofp::OFPP_ANY,
            port_max_len: 0,
            queue: 0,
        }
    }
}

/// Write-actions accumulated across tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionSet {
    dec_nw_ttl: bool,
    set_field: Option<SetField>,
    queue: Option<u32>,
    group: Option<u32>,
    output: Option<(u32, u16)>,
}

impl ActionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `actions`, replacing any action of the same kind
    pub fn write(&mut self, actions: &[Action]) {
        for action in actions {
            match *action {
                Action::Output { port, max_len } => self.output = Some((port, max_len)),
                Action::Group(group) => self.group = Some(group),
                Action::SetQueue(queue) => self.queue = Some(queue),
                Action::DecNwTtl => self.dec_nw_ttl = true,
                Action::SetField(field) => self.set_field = Some(field),
            }
        }
    }

    /// Remove every action
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// No actions present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.dec_nw_ttl as usize
            + self.set_field.is_some() as usize
            + self.queue.is_some() as usize
            + self.group.is_some() as usize
            + self.output.is_some() as usize
    }

    /// Actions in execution order
    pub fn ordered(&self) -> Vec<Action> {
        let mut actions = Vec::with_capacity(self.len());
        if self.dec_nw_ttl {
            actions.push(Action::DecNwTtl);
        }
        if let Some(field) = self.set_field {
            actions.push(Action::SetField(field));
        }
        if let Some(queue) = self.queue {
            actions.push(Action::SetQueue(queue));
        }
        if let Some(group) = self.group {
            actions.push(Action::Group(group));
        }
        if let Some((port, max_len)) = self.output {
            actions.push(Action::Output { port, max_len });
        }
        actions
    }

    /// Run and empty the set
    ///
    /// A group action takes precedence over output, as in OpenFlow 1.3, so
    /// the output port is left undecided when a group is present.
    pub fn execute(&mut self, pkt: &mut Packet) {
        let has_group = self.group.is_some();
        for action in self.ordered() {
            if has_group && matches!(action, Action::Output { .. }) {
                continue;
            }
            action.apply(pkt);
        }
        self.clear();
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, action) in self.ordered().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", action)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_replaces_same_kind() {
        let mut set = ActionSet::new();
        set.write(&[Action::output(1), Action::SetQueue(3)]);
        set.write(&[Action::output(2)]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.ordered(), vec![Action::SetQueue(3), Action::output(2)]);
    }

    #[test]
    fn test_execution_order() {
        let mut set = ActionSet::new();
        set.write(&[
            Action::output(4),
            Action::Group(1),
            Action::SetField(SetField::IpDscp(10)),
            Action::SetQueue(2),
            Action::DecNwTtl,
        ]);
        assert_eq!(
            set.ordered(),
            vec![
                Action::DecNwTtl,
                Action::SetField(SetField::IpDscp(10)),
                Action::SetQueue(2),
                Action::Group(1),
                Action::output(4),
            ]
        );
    }

    #[test]
    fn test_clear_and_display() {
        let mut set = ActionSet::new();
        assert_eq!(set.to_string(), "[]");
        set.write(&[Action::to_controller(128), Action::DecNwTtl]);
        assert_eq!(set.to_string(), "[dec_nw_ttl, out{port=\"ctrl\", mlen=\"128\"}]");
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(Action::output(1).validate().is_ok());
        assert!(Action::to_controller(0xffff).validate().is_ok());
        assert_eq!(
            Action::output(0).validate(),
            Err(OflError::BadAction(BadActionCode::BadOutPort))
        );
        assert_eq!(
            Action::output(ofp::OFPP_ANY).validate(),
            Err(OflError::BadAction(BadActionCode::BadOutPort))
        );
        assert_eq!(
            Action::Group(ofp::OFPG_ANY).validate(),
            Err(OflError::BadAction(BadActionCode::BadOutGroup))
        );
        assert_eq!(
            Action::SetField(SetField::IpDscp(64)).validate(),
            Err(OflError::BadAction(BadActionCode::BadArgument))
        );
    }
}
