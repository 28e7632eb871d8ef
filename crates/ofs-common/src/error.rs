//! Control-plane error taxonomy
//!
//! Every control-plane operation of the dataplane reports failure as an
//! [`OflError`]. The wire layer turns it into an OpenFlow error message
//! through [`OflError::wire_type`] and [`OflError::wire_code`].

use thiserror::Error;

/// Bad request codes (`OFPET_BAD_REQUEST`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadRequestCode {
    /// Specified buffer has already been used
    BufferEmpty = 7,
    /// Specified buffer does not exist
    BufferUnknown = 8,
    /// Table id out of range
    BadTableId = 9,
    /// Invalid port
    BadPort = 11,
}

/// Bad action codes (`OFPET_BAD_ACTION`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadActionCode {
    /// Problem validating output port
    BadOutPort = 4,
    /// Bad action argument
    BadArgument = 5,
    /// Problem validating output group
    BadOutGroup = 9,
}

/// Bad instruction codes (`OFPET_BAD_INSTRUCTION`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadInstructionCode {
    /// Invalid table id in goto-table
    BadTableId = 2,
    /// Instruction appears more than once
    BadLen = 7,
}

/// Bad match codes (`OFPET_BAD_MATCH`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadMatchCode {
    /// Unsupported field value
    BadValue = 7,
    /// Prerequisite field is missing
    BadPrereq = 9,
}

/// Flow-mod failure codes (`OFPET_FLOW_MOD_FAILED`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowModFailedCode {
    /// No more room in the table
    TableFull = 1,
    /// Table does not exist
    BadTableId = 2,
    /// Overlapping entry with `CHECK_OVERLAP` set
    Overlap = 3,
}

/// Table-mod failure codes (`OFPET_TABLE_MOD_FAILED`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TableModFailedCode {
    /// Table does not exist
    BadTable = 0,
    /// Unsupported configuration bits
    BadConfig = 1,
}

/// Table-features failure codes (`OFPET_TABLE_FEATURES_FAILED`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TableFeaturesFailedCode {
    /// Switch refuses to reconfigure its tables
    Eperm = 5,
}

/// Control-plane error
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OflError {
    /// Malformed or unsatisfiable request
    #[error("bad request: {0:?}")]
    BadRequest(BadRequestCode),

    /// Invalid action in a flow-mod or packet-out
    #[error("bad action: {0:?}")]
    BadAction(BadActionCode),

    /// Invalid instruction in a flow-mod
    #[error("bad instruction: {0:?}")]
    BadInstruction(BadInstructionCode),

    /// Invalid match
    #[error("bad match: {0:?}")]
    BadMatch(BadMatchCode),

    /// Flow table refused the modification
    #[error("flow mod failed: {0:?}")]
    FlowModFailed(FlowModFailedCode),

    /// Table configuration refused
    #[error("table mod failed: {0:?}")]
    TableModFailed(TableModFailedCode),

    /// Table features request refused
    #[error("table features failed: {0:?}")]
    TableFeaturesFailed(TableFeaturesFailedCode),
}

impl OflError {
    /// OpenFlow 1.3 `ofp_error_type`
    pub fn wire_type(&self) -> u16 {
        match self {
            OflError::BadRequest(_) => 1,
            OflError::BadAction(_) => 2,
            OflError::BadInstruction(_) => 3,
            OflError::BadMatch(_) => 4,
            OflError::FlowModFailed(_) => 5,
            OflError::TableModFailed(_) => 8,
            OflError::TableFeaturesFailed(_) => 13,
        }
    }

    /// Type-specific error code
    pub fn wire_code(&self) -> u16 {
        match *self {
            OflError::BadRequest(c) => c as u16,
            OflError::BadAction(c) => c as u16,
            OflError::BadInstruction(c) => c as u16,
            OflError::BadMatch(c) => c as u16,
            OflError::FlowModFailed(c) => c as u16,
            OflError::TableModFailed(c) => c as u16,
            OflError::TableFeaturesFailed(c) => c as u16,
        }
    }
}

/// Result type for control-plane operations
pub type OflResult<T> = Result<T, OflError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_mapping() {
        let err = OflError::FlowModFailed(FlowModFailedCode::BadTableId);
        assert_eq!(err.wire_type(), 5);
        assert_eq!(err.wire_code(), 2);

        let err = OflError::BadRequest(BadRequestCode::BufferUnknown);
        assert_eq!((err.wire_type(), err.wire_code()), (1, 8));

        let err = OflError::TableFeaturesFailed(TableFeaturesFailedCode::Eperm);
        assert_eq!((err.wire_type(), err.wire_code()), (13, 5));
    }

    #[test]
    fn test_display() {
        let err = OflError::BadInstruction(BadInstructionCode::BadTableId);
        assert_eq!(err.to_string(), "bad instruction: BadTableId");
    }
}
