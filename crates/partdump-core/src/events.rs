//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow device discovery and dump
//! progress without the core knowing how it is displayed.

use std::fmt;

use crate::state::DumpPhase;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the locator and dump sessions.
#[derive(Debug, Clone)]
pub enum DumpEvent {
    /// Polling for a bootloader-mode device.
    WaitingForDevice,
    /// Device matched and claimed.
    DeviceConnected { vid: u16, pid: u16 },
    /// Dump session moved to a new phase.
    PhaseChanged { from: DumpPhase, to: DumpPhase },
    /// Result of the best-effort size query (0 when unknown).
    SizeQueried { partition: String, size: u64 },
    /// Bytes appended to the sink.
    Progress {
        /// Bytes written by this block.
        written: u64,
        /// Running total for the session.
        total: u64,
        /// Expected partition size, 0 when unknown.
        expected: u64,
    },
    /// A streaming read returned nothing.
    Stall { attempt: u32 },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Dump finished successfully.
    Complete { partition: String, bytes: u64 },
    /// Operation failed.
    Error { message: String },
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Observer trait for receiving dump events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DumpObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DumpEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DumpObserver for NullObserver {
    fn on_event(&self, _event: &DumpEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DumpObserver for TracingObserver {
    fn on_event(&self, event: &DumpEvent) {
        match event {
            DumpEvent::WaitingForDevice => {
                tracing::info!("Waiting for bootloader device...");
            }
            DumpEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            DumpEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            DumpEvent::SizeQueried { partition, size } => {
                tracing::info!(partition = %partition, size, "Partition size");
            }
            DumpEvent::Progress {
                total, expected, ..
            } => {
                let pct = if *expected > 0 {
                    (*total * 100) / *expected
                } else {
                    0
                };
                tracing::trace!(total, progress = %format!("{}%", pct), "Progress");
            }
            DumpEvent::Stall { attempt } => {
                tracing::debug!(attempt, "No data from device, retrying");
            }
            DumpEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DumpEvent::Complete { partition, bytes } => {
                tracing::info!(partition = %partition, bytes, "Dump complete");
            }
            DumpEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
        }
    }
}

/// Observer that keeps every event, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<DumpEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<DumpEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(written, total)` of every progress event.
    pub(crate) fn progress(&self) -> Vec<(u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DumpEvent::Progress { written, total, .. } => Some((written, total)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn phases(&self) -> Vec<DumpPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DumpEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl DumpObserver for RecordingObserver {
    fn on_event(&self, event: &DumpEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
