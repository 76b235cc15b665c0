//! Error types for protocol exchanges and dumps.

use std::io;

use thiserror::Error;

use crate::protocol::FrameStatus;

/// Failure of a command/response exchange.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The device answered FAIL; carries its message verbatim.
    #[error("{0}")]
    Fail(String),

    #[error("Failed to send {0} command")]
    SendFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Failure of a partition dump.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Failed to send dump command")]
    SendFailed,

    #[error("No response from device")]
    NoResponse,

    #[error("Invalid response length ({0} bytes)")]
    ShortResponse(usize),

    #[error("Device reported failure: {0}")]
    DeviceFailure(String),

    #[error("Device did not start dump mode (got {status} {payload:?})")]
    NotStarted { status: FrameStatus, payload: String },

    #[error("Device stopped sending data after {0} empty reads")]
    Stalled(u32),

    #[error("Write failed: {0}")]
    Io(#[from] io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No data was dumped")]
    Empty,
}

impl ProtocolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProtocolError::Cancelled)
    }
}

impl DumpError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DumpError::Cancelled | DumpError::Protocol(ProtocolError::Cancelled)
        )
    }
}
