//! USB Transport layer abstraction.
//!
//! Defines the `TransportLink` trait for the bulk byte channel,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{FLUSH_TIMEOUT, RESPONSE_LEN};

/// Failures while opening and claiming a device.
///
/// Only raised while building a handle. Once a [`TransportLink`] exists its
/// I/O never fails loudly.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Device did not reappear after reset")]
    Vanished,

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Failed to open endpoint 0x{address:02X}: {message}")]
    EndpointFailed { address: u8, message: String },

    #[error("No matching bootloader interface")]
    NoMatch,
}

/// Duplex byte channel over a claimed interface's bulk endpoints.
///
/// Timeouts and transport faults are indistinguishable at this layer:
/// both degrade to `false` / `None`.
pub trait TransportLink {
    /// Write raw bytes to the OUT endpoint.
    fn send(&mut self, data: &[u8]) -> bool;

    /// Read at most `max_len` bytes from the IN endpoint.
    fn receive(&mut self, max_len: usize, timeout: Duration) -> Option<Vec<u8>>;

    /// Discard stale responses left over from an earlier exchange.
    ///
    /// Returns the number of bytes thrown away.
    fn flush(&mut self) -> usize {
        let mut discarded = 0;
        while let Some(stale) = self.receive(RESPONSE_LEN, FLUSH_TIMEOUT) {
            discarded += stale.len();
        }
        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Flushed stale responses");
        }
        discarded
    }

    /// Get the device VID.
    fn vendor_id(&self) -> u16;

    /// Get the device PID.
    fn product_id(&self) -> u16;
}
