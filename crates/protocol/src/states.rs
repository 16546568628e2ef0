//! Accelerator lifecycle states
//!
//! The power/attach task and the firmware update task each expose their
//! current state for diagnostics and tests. Transitions are driven only by
//! host events and by completions of transfers the tasks issued themselves.

use std::fmt;

/// State of the accelerator's vendor-class attach sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttachState {
    #[default]
    Unattached,
    /// Enumerated, class driver about to be initialised
    Attached,
    /// SET_INTERFACE in flight
    SetInterface,
    /// GET_STATUS in flight
    GetStatus,
    /// Handshake done, the device handle is usable
    Connected,
    EnumerationFailed,
    Error,
}

impl AttachState {
    /// Whether the task is waiting on a transfer it issued
    pub fn is_pending(&self) -> bool {
        matches!(self, AttachState::SetInterface | AttachState::GetStatus)
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttachState::Unattached => "unattached",
            AttachState::Attached => "attached",
            AttachState::SetInterface => "set-interface",
            AttachState::GetStatus => "get-status",
            AttachState::Connected => "connected",
            AttachState::EnumerationFailed => "enumeration-failed",
            AttachState::Error => "error",
        };
        f.write_str(s)
    }
}

/// State of the firmware download sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DfuState {
    #[default]
    Unattached,
    Attached,
    SetInterface,
    /// GET_STATUS after SET_INTERFACE or after a download block
    GetStatus,
    /// DNLOAD block in flight
    Transfer,
    /// Empty DNLOAD that ends the download phase
    ZeroLengthTransfer,
    /// UPLOAD block in flight
    ReadBack,
    /// GET_STATUS after an upload block
    GetStatusRead,
    Detach,
    /// GET_STATUS after DFU_DETACH
    CheckStatus,
    /// Image written and verified, bus reset issued
    Complete,
    Error,
}

impl DfuState {
    /// Terminal states wait for the device to go away
    pub fn is_terminal(&self) -> bool {
        matches!(self, DfuState::Complete | DfuState::Error)
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DfuState::Unattached => "unattached",
            DfuState::Attached => "attached",
            DfuState::SetInterface => "set-interface",
            DfuState::GetStatus => "get-status",
            DfuState::Transfer => "transfer",
            DfuState::ZeroLengthTransfer => "zero-length-transfer",
            DfuState::ReadBack => "read-back",
            DfuState::GetStatusRead => "get-status-read",
            DfuState::Detach => "detach",
            DfuState::CheckStatus => "check-status",
            DfuState::Complete => "complete",
            DfuState::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_unattached() {
        assert_eq!(AttachState::default(), AttachState::Unattached);
        assert_eq!(DfuState::default(), DfuState::Unattached);
    }

    #[test]
    fn test_pending_and_terminal() {
        assert!(AttachState::SetInterface.is_pending());
        assert!(!AttachState::Connected.is_pending());
        assert!(DfuState::Complete.is_terminal());
        assert!(DfuState::Error.is_terminal());
        assert!(!DfuState::ReadBack.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(AttachState::EnumerationFailed.to_string(), "enumeration-failed");
        assert_eq!(DfuState::GetStatusRead.to_string(), "get-status-read");
    }
}
