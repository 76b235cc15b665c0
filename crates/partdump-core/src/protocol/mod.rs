//! Protocol module - status frames, commands and wire constants.

pub mod command;
pub mod constants;
pub mod frame;

pub use command::Command;
pub use constants::*;
pub use frame::{FrameStatus, ProtocolFrame, find_end_marker};
