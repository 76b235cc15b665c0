//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockRead, MockTransport};
pub use nusb::NusbTransport;
pub use traits::{TransportError, TransportLink};
