//! partdump-core: dump raw partitions from a bootloader-mode device over USB.
//!
//! The device exposes a vendor interface (class 0xFF, subclass 0x42,
//! protocol 0x03) speaking a text-command / status-frame protocol. This
//! crate finds and claims that interface, queries variables, enumerates
//! partitions, and streams `oem dump-storage` output to a file.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Status frames, commands, wire constants
//! - **Transport**: Bulk byte channel abstraction (nusb, mock)
//! - **Locator**: Interface matching and claiming
//! - **Client**: Variable queries and partition enumeration
//! - **Dump / State**: Streaming dump state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator and configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use partdump_core::{CancelToken, DumperConfig, PartitionDumper, TracingObserver};
//!
//! let config = DumperConfig::default();
//! let mut dumper =
//!     PartitionDumper::connect(&config, Arc::new(TracingObserver), CancelToken::new())
//!         .expect("no device");
//! let report = dumper.dump_partition("boot", "boot.img").expect("dump failed");
//! println!("{} bytes", report.bytes_written);
//! ```

pub mod cancel;
pub mod catalog;
pub mod client;
pub mod dump;
pub mod error;
pub mod events;
pub mod locator;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use catalog::{PartitionCatalog, PartitionRecord};
pub use client::ProtocolClient;
pub use dump::{DumpSession, DumpSettings};
pub use error::{DumpError, ProtocolError};
pub use events::{DumpEvent, DumpObserver, LogLevel, NullObserver, TracingObserver};
pub use locator::{DeviceLocator, InterfaceMatch, LocatorConfig, LocatorError};
pub use protocol::{Command, FrameStatus, ProtocolFrame};
pub use session::{DumpReport, DumperConfig, PartitionDumper};
pub use state::{DumpPhase, DumpState};
pub use transport::{MockTransport, NusbTransport, TransportError, TransportLink};
