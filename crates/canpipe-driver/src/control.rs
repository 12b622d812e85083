//! Per-client control requests.

use canpipe_hw::Register;
use serde::{Deserialize, Serialize};

/// A control request issued through [`Client::control`](crate::Client::control).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    EnableLoopback,
    DisableLoopback,
    EnableSelfReception,
    DisableSelfReception,
    /// Start delivering received frames and status records to this client.
    EnableMessageAccept,
    /// Read-only register mirror.
    ReadRegister { register: Register },
}

/// Result of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Done,
    Register { register: Register, value: u32 },
}

impl ControlReply {
    /// Register value, if this reply carries one.
    pub fn value(&self) -> Option<u32> {
        match self {
            Self::Register { value, .. } => Some(*value),
            Self::Done => None,
        }
    }
}
