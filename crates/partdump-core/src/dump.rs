//! Streaming storage dump.
//!
//! After `oem dump-storage <partition>` is accepted with `DUMPSTART`, the
//! device pushes raw blocks on the IN endpoint and signals the end in-band
//! with `UMPEND` or `END`. The marker search runs over partition data too,
//! so content containing either sequence ends the dump early; device
//! firmware depends on this framing and it is kept as is.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::ProtocolClient;
use crate::error::{DumpError, ProtocolError};
use crate::events::{DumpEvent, DumpObserver, LogLevel};
use crate::protocol::{
    Command, DUMP_BLOCK_SIZE, DUMP_START, FrameStatus, ProtocolFrame, RESPONSE_LEN,
    find_end_marker,
};
use crate::state::{DumpPhase, DumpState};
use crate::transport::TransportLink;

/// Timing and retry knobs for one dump.
#[derive(Debug, Clone)]
pub struct DumpSettings {
    /// Pause between sending the dump command and reading its answer.
    pub start_delay: Duration,
    /// Wait for the `DUMPSTART` frame.
    pub handshake_timeout: Duration,
    /// Bytes requested per streaming read.
    pub block_size: usize,
    /// Wait for each streamed block.
    pub stream_timeout: Duration,
    /// Consecutive empty reads tolerated while streaming; `None` retries
    /// forever.
    pub max_stall_retries: Option<u32>,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(10000),
            block_size: DUMP_BLOCK_SIZE,
            stream_timeout: Duration::from_millis(5000),
            max_stall_retries: None,
        }
    }
}

/// One dump of one partition, driven to `Complete` or `Failed`.
pub struct DumpSession<'a, T: TransportLink, O: DumpObserver + ?Sized> {
    client: &'a mut ProtocolClient<T>,
    observer: &'a O,
    settings: &'a DumpSettings,
    partition: &'a str,
    phase: DumpPhase,
    state: DumpState,
}

impl<'a, T: TransportLink, O: DumpObserver + ?Sized> DumpSession<'a, T, O> {
    pub fn new(
        client: &'a mut ProtocolClient<T>,
        observer: &'a O,
        settings: &'a DumpSettings,
        partition: &'a str,
    ) -> Self {
        Self {
            client,
            observer,
            settings,
            partition,
            phase: DumpPhase::Idle,
            state: DumpState::new(),
        }
    }

    pub fn phase(&self) -> DumpPhase {
        self.phase
    }

    pub fn state(&self) -> &DumpState {
        &self.state
    }

    /// Run the session to a terminal phase, writing payload bytes to `sink`.
    ///
    /// On failure, bytes already written stay in `sink`.
    pub fn run<W: Write>(&mut self, sink: &mut W) -> Result<DumpState, DumpError> {
        self.run_with(|| Ok(sink))
    }

    /// Like [`run`](Self::run), but the sink is only opened once the device
    /// has accepted the dump and streaming starts.
    #[instrument(skip_all, fields(partition = %self.partition))]
    pub fn run_with<W, F>(&mut self, open: F) -> Result<DumpState, DumpError>
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        match self.drive(open) {
            Ok(()) => Ok(self.state.clone()),
            Err(e) => {
                warn!(error = %e, bytes = self.state.bytes_written, "Dump failed");
                if !self.phase.is_terminal() {
                    self.goto_phase(DumpPhase::Failed);
                }
                Err(e)
            }
        }
    }

    fn drive<W, F>(&mut self, open: F) -> Result<(), DumpError>
    where
        W: Write,
        F: FnOnce() -> io::Result<W>,
    {
        self.query_size()?;
        self.start_dump()?;

        let mut sink = open()?;
        let streamed = self.stream(&mut sink);
        // Keep whatever arrived, even on the failure path.
        let flushed = sink.flush();
        streamed?;
        Ok(flushed?)
    }

    fn goto_phase(&mut self, next: DumpPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        info!(from = %self.phase, to = %next, "Phase transition");
        self.observer.on_event(&DumpEvent::PhaseChanged {
            from: self.phase,
            to: next,
        });
        self.phase = next;
    }

    fn query_size(&mut self) -> Result<(), DumpError> {
        self.goto_phase(DumpPhase::SizeQuery);

        self.state.expected_size = match self.client.partition_size(self.partition) {
            Ok(size) => size,
            Err(ProtocolError::Cancelled) => return Err(DumpError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Size query failed, continuing without a size");
                self.observer.on_event(&DumpEvent::Log {
                    level: LogLevel::Warn,
                    message: format!("Could not get size of {}: {}", self.partition, e),
                });
                0
            }
        };

        self.observer.on_event(&DumpEvent::SizeQueried {
            partition: self.partition.to_string(),
            size: self.state.expected_size,
        });
        Ok(())
    }

    fn start_dump(&mut self) -> Result<(), DumpError> {
        let command = Command::DumpStorage(self.partition.to_string());
        if !self.client.send_command(&command) {
            return Err(DumpError::SendFailed);
        }
        self.goto_phase(DumpPhase::CmdSent);

        if !self.settings.start_delay.is_zero() {
            thread::sleep(self.settings.start_delay);
        }

        let bytes = self
            .read(RESPONSE_LEN, self.settings.handshake_timeout)?
            .ok_or(DumpError::NoResponse)?;
        let frame = ProtocolFrame::parse(&bytes).ok_or(DumpError::ShortResponse(bytes.len()))?;
        debug!(?frame, "Dump handshake");

        match frame.status {
            FrameStatus::Fail => Err(DumpError::DeviceFailure(frame.text())),
            FrameStatus::Dump if frame.payload.starts_with(DUMP_START) => {
                self.goto_phase(DumpPhase::Streaming);
                Ok(())
            }
            status => Err(DumpError::NotStarted {
                status,
                payload: frame.text(),
            }),
        }
    }

    fn stream<W: Write>(&mut self, sink: &mut W) -> Result<(), DumpError> {
        loop {
            let block = match self.read(self.settings.block_size, self.settings.stream_timeout)? {
                Some(block) if !block.is_empty() => block,
                _ => {
                    let stalls = self.state.record_stall();
                    self.observer.on_event(&DumpEvent::Stall { attempt: stalls });
                    if let Some(max) = self.settings.max_stall_retries
                        && stalls > max
                    {
                        return Err(DumpError::Stalled(stalls));
                    }
                    continue;
                }
            };
            self.state.stalls = 0;

            if let Some(end) = find_end_marker(&block) {
                debug!(offset = end, discarded = block.len() - end, "End marker");
                self.write(sink, &block[..end])?;
                self.state.terminated = true;
                self.goto_phase(DumpPhase::Complete);
                return Ok(());
            }
            self.write(sink, &block)?;
        }
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Option<Vec<u8>>, DumpError> {
        self.client.read_raw(max_len, timeout).map_err(|e| {
            if e.is_cancelled() {
                DumpError::Cancelled
            } else {
                DumpError::Protocol(e)
            }
        })
    }

    fn write<W: Write>(&mut self, sink: &mut W, bytes: &[u8]) -> Result<(), DumpError> {
        if bytes.is_empty() {
            return Ok(());
        }
        sink.write_all(bytes)?;
        let total = self.state.record(bytes.len());
        self.observer.on_event(&DumpEvent::Progress {
            written: bytes.len() as u64,
            total,
            expected: self.state.expected_size,
        });
        Ok(())
    }
}
