//! Protocol constants for the bootloader-mode USB interface.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// bInterfaceClass of the bootloader interface (vendor specific).
pub const BOOTLOADER_CLASS: u8 = 0xFF;
/// bInterfaceSubClass of the bootloader interface.
pub const BOOTLOADER_SUBCLASS: u8 = 0x42;
/// bInterfaceProtocol of the bootloader interface.
pub const BOOTLOADER_PROTOCOL: u8 = 0x03;

// ============================================================================
// Status Tags (Device -> Host)
// ============================================================================

/// Every response starts with a 4-byte ASCII status tag.
pub const STATUS_LEN: usize = 4;

pub const STATUS_OKAY: &[u8; 4] = b"OKAY";
pub const STATUS_FAIL: &[u8; 4] = b"FAIL";
pub const STATUS_INFO: &[u8; 4] = b"INFO";
pub const STATUS_DATA: &[u8; 4] = b"DATA";
pub const STATUS_DUMP: &[u8; 4] = b"DUMP";

/// Payload prefix of the DUMP frame that opens a storage dump.
pub const DUMP_START: &[u8] = b"START";

/// In-band end markers, checked in this order.
pub const END_MARKERS: [&[u8]; 2] = [b"UMPEND", b"END"];

// ============================================================================
// Commands (Host -> Device)
// ============================================================================

pub const CMD_GETVAR: &str = "getvar:";
pub const CMD_DUMP_STORAGE: &str = "oem dump-storage ";

/// Variable that makes the device stream every variable as INFO frames.
pub const VAR_ALL: &str = "all";

pub const VAR_PARTITION_SIZE: &str = "partition-size:";
pub const VAR_PARTITION_TYPE: &str = "partition-type:";

// ============================================================================
// Sizes and Timing
// ============================================================================

/// Read size for command responses.
pub const RESPONSE_LEN: usize = 64;
/// Read size for streamed dump blocks.
pub const DUMP_BLOCK_SIZE: usize = 0x200;

/// Per-read timeout used while draining stale responses.
pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);
