//! nusb-based USB transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use nusb::Interface;
use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, In, Out};
use tracing::{debug, info, instrument, trace};

use super::traits::{TransportError, TransportLink};
use crate::locator::InterfaceMatch;
use crate::protocol::DUMP_BLOCK_SIZE;

/// Size of each queued bulk transfer.
///
/// One high-speed max packet, so a full final packet without a trailing ZLP
/// still completes its transfer.
const TRANSFER_SIZE: usize = DUMP_BLOCK_SIZE;

/// nusb-based USB transport. Owns the claimed interface; the claim is
/// released when this value is dropped.
pub struct NusbTransport {
    reader: EndpointRead<Bulk>,
    writer: EndpointWrite<Bulk>,
    // Dropped last so the endpoints go away before the claim.
    _interface: Interface,
    interface_number: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Wrap an already claimed interface.
    #[instrument(level = "debug", skip(interface), fields(interface = found.interface_number))]
    pub fn from_claimed(
        interface: Interface,
        found: &InterfaceMatch,
        vid: u16,
        pid: u16,
        send_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let in_ep = interface
            .endpoint::<Bulk, In>(found.in_endpoint)
            .map_err(|e| TransportError::EndpointFailed {
                address: found.in_endpoint,
                message: e.to_string(),
            })?;
        let out_ep = interface
            .endpoint::<Bulk, Out>(found.out_endpoint)
            .map_err(|e| TransportError::EndpointFailed {
                address: found.out_endpoint,
                message: e.to_string(),
            })?;

        let reader = in_ep.reader(TRANSFER_SIZE);
        let writer = out_ep
            .writer(TRANSFER_SIZE)
            .with_write_timeout(send_timeout);

        info!(
            in_ep = %format!("0x{:02X}", found.in_endpoint),
            out_ep = %format!("0x{:02X}", found.out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            reader,
            writer,
            _interface: interface,
            interface_number: found.interface_number,
            vid,
            pid,
        })
    }
}

impl TransportLink for NusbTransport {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn send(&mut self, data: &[u8]) -> bool {
        let result = self
            .writer
            .write_all(data)
            .and_then(|_| self.writer.flush());

        match result {
            Ok(()) => {
                debug!(bytes_written = data.len(), "Write complete");
                true
            }
            Err(e) => {
                debug!(error = %e, "Write failed");
                false
            }
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn receive(&mut self, max_len: usize, timeout: Duration) -> Option<Vec<u8>> {
        self.reader.set_read_timeout(timeout);
        let mut buf = vec![0u8; max_len];

        match self.reader.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                trace!(bytes_read = n, "Read complete");
                Some(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                trace!(timeout_ms = timeout.as_millis() as u64, "Read timed out");
                None
            }
            Err(e) => {
                debug!(error = %e, "Read failed");
                None
            }
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl Drop for NusbTransport {
    fn drop(&mut self) {
        info!(interface = self.interface_number, "Releasing interface");
    }
}
