//! Command/response client for the bootloader protocol.
//!
//! Every exchange follows the same shape: drain stale bytes, send one ASCII
//! command, read the frame(s) answering it. Nothing is pipelined.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::catalog::{PartitionCatalog, parse_hex};
use crate::error::ProtocolError;
use crate::protocol::{Command, FrameStatus, ProtocolFrame, RESPONSE_LEN};
use crate::transport::TransportLink;

/// Default wait for the answer to a `getvar`.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

pub struct ProtocolClient<T: TransportLink> {
    transport: T,
    query_timeout: Duration,
    cancel: CancelToken,
}

impl<T: TransportLink> ProtocolClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Flush stale responses, then send `command`.
    pub fn send_command(&mut self, command: &Command) -> bool {
        self.transport.flush();
        debug!(command = %command, "Sending command");
        self.transport.send(&command.to_bytes())
    }

    /// One raw read, bracketed by cancellation checks.
    pub fn read_raw(
        &mut self,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.check_cancelled()?;
        let bytes = self.transport.receive(max_len, timeout);
        self.check_cancelled()?;
        Ok(bytes)
    }

    /// Read one response frame. `None` covers both silence and reads too
    /// short to carry a status.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<ProtocolFrame>, ProtocolError> {
        let frame = self
            .read_raw(RESPONSE_LEN, timeout)?
            .and_then(|bytes| ProtocolFrame::parse(&bytes));
        if let Some(frame) = &frame {
            debug!(?frame, "Frame received");
        }
        Ok(frame)
    }

    /// `getvar:<name>`.
    ///
    /// OKAY yields the payload text, FAIL raises the device message, and
    /// every other outcome (no answer, short answer, other status) is `None`.
    #[instrument(skip(self))]
    pub fn query_variable(&mut self, name: &str) -> Result<Option<String>, ProtocolError> {
        self.query(Command::GetVar(name.to_string()))
    }

    /// Size of `partition` in bytes, 0 when the device gives no usable answer.
    #[instrument(skip(self))]
    pub fn partition_size(&mut self, partition: &str) -> Result<u64, ProtocolError> {
        let size = self
            .query(Command::partition_size(partition))?
            .and_then(|text| parse_hex(&text))
            .unwrap_or(0);
        Ok(size)
    }

    fn query(&mut self, command: Command) -> Result<Option<String>, ProtocolError> {
        if !self.send_command(&command) {
            warn!(command = %command, "Send failed, treating as no answer");
            return Ok(None);
        }

        let Some(frame) = self.read_frame(self.query_timeout)? else {
            debug!(command = %command, "No answer");
            return Ok(None);
        };

        match frame.status {
            FrameStatus::Okay => Ok(Some(frame.text())),
            FrameStatus::Fail => Err(ProtocolError::Fail(frame.text())),
            status => {
                debug!(command = %command, %status, "Unexpected status, ignoring");
                Ok(None)
            }
        }
    }

    /// `getvar:all`, folded into a catalog.
    ///
    /// Reads until OKAY, FAIL or silence.
    #[instrument(skip(self))]
    pub fn enumerate_all(&mut self) -> Result<PartitionCatalog, ProtocolError> {
        let command = Command::getvar_all();
        if !self.send_command(&command) {
            return Err(ProtocolError::SendFailed(command.to_string()));
        }

        let mut catalog = PartitionCatalog::new();
        loop {
            let Some(bytes) = self.read_raw(RESPONSE_LEN, self.query_timeout)? else {
                debug!("Enumeration ended without OKAY");
                break;
            };
            let Some(frame) = ProtocolFrame::parse(&bytes) else {
                continue;
            };

            match frame.status {
                FrameStatus::Info => {
                    let info = frame.text();
                    if !catalog.absorb_info(&info) {
                        debug!(info = %info, "Skipping variable");
                    }
                }
                FrameStatus::Okay => break,
                FrameStatus::Fail => return Err(ProtocolError::Fail(frame.text())),
                status => debug!(%status, "Ignoring frame during enumeration"),
            }
        }

        debug!(partitions = catalog.len(), "Enumeration complete");
        Ok(catalog)
    }
}
