//! Bootloader device discovery.
//!
//! Discovery is split in two: [`find_match`] is a pure function over
//! descriptor summaries, while [`DeviceLocator`] walks the bus, applies it,
//! and performs the side-effecting claim.

use std::thread;
use std::time::{Duration, Instant};

use nusb::descriptors::TransferType;
use nusb::transfer::Direction;
use nusb::{Device, DeviceInfo, Interface, MaybeFuture, list_devices};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cancel::CancelToken;
use crate::events::{DumpEvent, DumpObserver};
use crate::protocol::{BOOTLOADER_CLASS, BOOTLOADER_PROTOCOL, BOOTLOADER_SUBCLASS};
use crate::transport::{NusbTransport, TransportError, TransportLink};

/// Endpoint direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSummary {
    pub address: u8,
    pub direction: EndpointDirection,
    pub bulk: bool,
}

/// Descriptor fields of one interface alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    pub configuration: u8,
    pub interface_number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointSummary>,
}

/// A claimable bootloader interface and its bulk endpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceMatch {
    pub configuration: u8,
    pub interface_number: u8,
    pub in_endpoint: u8,
    pub out_endpoint: u8,
}

impl InterfaceSummary {
    pub fn is_bootloader(&self) -> bool {
        self.class == BOOTLOADER_CLASS
            && self.subclass == BOOTLOADER_SUBCLASS
            && self.protocol == BOOTLOADER_PROTOCOL
    }

    /// The interface's single bulk endpoint in `direction`, if exactly one
    /// exists.
    fn sole_bulk(&self, direction: EndpointDirection) -> Option<u8> {
        let mut found = self
            .endpoints
            .iter()
            .filter(|ep| ep.bulk && ep.direction == direction);
        let first = found.next()?;
        match found.next() {
            Some(_) => None,
            None => Some(first.address),
        }
    }
}

/// Match a single interface against the bootloader triple.
pub fn match_interface(iface: &InterfaceSummary) -> Option<InterfaceMatch> {
    if !iface.is_bootloader() {
        return None;
    }
    Some(InterfaceMatch {
        configuration: iface.configuration,
        interface_number: iface.interface_number,
        in_endpoint: iface.sole_bulk(EndpointDirection::In)?,
        out_endpoint: iface.sole_bulk(EndpointDirection::Out)?,
    })
}

/// First interface matching the bootloader triple with both endpoints.
pub fn find_match(interfaces: &[InterfaceSummary]) -> Option<InterfaceMatch> {
    interfaces.iter().find_map(match_interface)
}

/// Descriptor summaries for every configuration of an opened device.
pub fn summarize(device: &Device) -> Vec<InterfaceSummary> {
    let mut summaries = Vec::new();
    for config in device.configurations() {
        for iface in config.interfaces() {
            for alt in iface.alt_settings() {
                summaries.push(InterfaceSummary {
                    configuration: config.configuration_value(),
                    interface_number: iface.interface_number(),
                    class: alt.class(),
                    subclass: alt.subclass(),
                    protocol: alt.protocol(),
                    endpoints: alt
                        .endpoints()
                        .map(|ep| EndpointSummary {
                            address: ep.address(),
                            direction: match ep.direction() {
                                Direction::In => EndpointDirection::In,
                                Direction::Out => EndpointDirection::Out,
                            },
                            bulk: ep.transfer_type() == TransferType::Bulk,
                        })
                        .collect(),
                });
            }
        }
    }
    summaries
}

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("Timeout waiting for device after {secs}s")]
    Timeout { secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Discovery timing.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Pause between bus scans.
    pub poll_interval: Duration,
    /// Pause between device reset and interface claim.
    pub settle_delay: Duration,
    /// Give up after this long; `None` waits forever.
    pub deadline: Option<Duration>,
    /// Write timeout for the resulting handle.
    pub send_timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(500),
            deadline: None,
            send_timeout: Duration::from_millis(5000),
        }
    }
}

/// Settle periods to wait for a reset device to re-enumerate.
const REOPEN_ATTEMPTS: u32 = 5;

/// Polls USB until a bootloader interface can be claimed.
pub struct DeviceLocator<'a, O: DumpObserver + ?Sized> {
    config: LocatorConfig,
    observer: &'a O,
    cancel: CancelToken,
}

impl<'a, O: DumpObserver + ?Sized> DeviceLocator<'a, O> {
    pub fn new(config: LocatorConfig, observer: &'a O) -> Self {
        Self {
            config,
            observer,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Block until a device is found and claimed.
    ///
    /// Candidates that fail inspection or claiming are skipped; only the
    /// deadline or cancellation end the wait.
    #[instrument(level = "info", skip(self))]
    pub fn scan(&self) -> Result<NusbTransport, LocatorError> {
        self.observer.on_event(&DumpEvent::WaitingForDevice);
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(LocatorError::Cancelled);
            }
            poll_count += 1;

            if let Some(transport) = self.poll_once() {
                info!(
                    "Found device = {:04x}:{:04x} after {} polls",
                    transport.vendor_id(),
                    transport.product_id(),
                    poll_count
                );
                self.observer.on_event(&DumpEvent::DeviceConnected {
                    vid: transport.vendor_id(),
                    pid: transport.product_id(),
                });
                return Ok(transport);
            }

            if let Some(deadline) = self.config.deadline
                && start.elapsed() >= deadline
            {
                return Err(LocatorError::Timeout {
                    secs: deadline.as_secs(),
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn poll_once(&self) -> Option<NusbTransport> {
        let devices = match list_devices().wait() {
            Ok(devices) => devices,
            Err(e) => {
                debug!(error = %e, "Device enumeration failed");
                return None;
            }
        };

        for device_info in devices {
            if !advertises_bootloader(&device_info) {
                continue;
            }
            match self.try_candidate(&device_info) {
                Ok(transport) => return Some(transport),
                Err(e) => {
                    debug!(
                        vid = %format!("{:04X}", device_info.vendor_id()),
                        pid = %format!("{:04X}", device_info.product_id()),
                        error = %e,
                        "Skipping candidate"
                    );
                }
            }
        }
        None
    }

    fn try_candidate(&self, device_info: &DeviceInfo) -> Result<NusbTransport, TransportError> {
        let port = PortKey::of(device_info);
        let device = open(device_info)?;
        let found = find_match(&summarize(&device)).ok_or(TransportError::NoMatch)?;

        // A reset device must be found and opened again.
        let device = if prepare(&device, &found) {
            drop(device);
            self.reopen(&port)?
        } else {
            device
        };
        let interface = claim(&device, &found)?;

        NusbTransport::from_claimed(
            interface,
            &found,
            port.vendor_id,
            port.product_id,
            self.config.send_timeout,
        )
    }

    /// Find the device on `port` again after a reset.
    fn reopen(&self, port: &PortKey) -> Result<Device, TransportError> {
        for attempt in 1..=REOPEN_ATTEMPTS {
            thread::sleep(self.config.settle_delay);
            let found = list_devices()
                .wait()
                .map_err(|e| TransportError::OpenFailed(e.to_string()))?
                .find(|info| PortKey::of(info) == *port);
            if let Some(device_info) = found {
                return open(&device_info);
            }
            debug!(attempt, "Device not back after reset yet");
        }
        Err(TransportError::Vanished)
    }
}

/// Where a device is plugged in. Unlike the bus address, this survives a
/// reset and re-enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PortKey {
    vendor_id: u16,
    product_id: u16,
    bus_id: String,
    port_chain: Vec<u8>,
}

impl PortKey {
    fn of(device_info: &DeviceInfo) -> Self {
        Self {
            vendor_id: device_info.vendor_id(),
            product_id: device_info.product_id(),
            bus_id: device_info.bus_id().to_string(),
            port_chain: device_info.port_chain().to_vec(),
        }
    }
}

/// Device control steps run before the claim.
trait DeviceControl {
    fn detach(&self, interface: u8);
    fn configure(&self, value: u8) -> Result<(), String>;
    fn reset(&self) -> Result<(), String>;
}

impl DeviceControl for Device {
    fn detach(&self, interface: u8) {
        detach_kernel_driver(self, interface);
    }

    fn configure(&self, value: u8) -> Result<(), String> {
        self.set_configuration(value).wait().map_err(|e| e.to_string())
    }

    fn reset(&self) -> Result<(), String> {
        Device::reset(self).wait().map_err(|e| e.to_string())
    }
}

/// Detach, configure and reset, all best-effort. Returns `true` when the
/// reset went through and `device` is no longer usable.
#[instrument(level = "debug", skip(device))]
fn prepare<D: DeviceControl>(device: &D, found: &InterfaceMatch) -> bool {
    device.detach(found.interface_number);

    if let Err(e) = device.configure(found.configuration) {
        debug!(
            configuration = found.configuration,
            error = %e,
            "Set configuration failed, continuing"
        );
    }

    match device.reset() {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Reset failed, continuing");
            false
        }
    }
}

fn open(device_info: &DeviceInfo) -> Result<Device, TransportError> {
    device_info
        .open()
        .wait()
        .map_err(|e| TransportError::OpenFailed(e.to_string()))
}

/// Cheap pre-filter on the cached interface list, before opening anything.
fn advertises_bootloader(device_info: &DeviceInfo) -> bool {
    device_info.interfaces().any(|iface| {
        iface.class() == BOOTLOADER_CLASS
            && iface.subclass() == BOOTLOADER_SUBCLASS
            && iface.protocol() == BOOTLOADER_PROTOCOL
    })
}

/// Claim the interface, detaching any kernel driver that rebound after a
/// reset.
fn claim(device: &Device, found: &InterfaceMatch) -> Result<Interface, TransportError> {
    detach_kernel_driver(device, found.interface_number);

    device
        .claim_interface(found.interface_number)
        .wait()
        .map_err(|e| TransportError::ClaimInterfaceFailed {
            interface: found.interface_number,
            message: e.to_string(),
        })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn detach_kernel_driver(device: &Device, interface: u8) {
    if let Err(e) = device.detach_kernel_driver(interface) {
        // Usually just means no driver was bound.
        debug!(interface, error = %e, "Kernel driver not detached");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn detach_kernel_driver(_device: &Device, _interface: u8) {}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn bulk(address: u8) -> EndpointSummary {
        EndpointSummary {
            address,
            direction: if address & 0x80 != 0 {
                EndpointDirection::In
            } else {
                EndpointDirection::Out
            },
            bulk: true,
        }
    }

    fn iface(number: u8, triple: (u8, u8, u8), endpoints: Vec<EndpointSummary>) -> InterfaceSummary {
        InterfaceSummary {
            configuration: 1,
            interface_number: number,
            class: triple.0,
            subclass: triple.1,
            protocol: triple.2,
            endpoints,
        }
    }

    const TRIPLE: (u8, u8, u8) = (0xFF, 0x42, 0x03);

    #[test]
    fn test_matching_interface() {
        let found = find_match(&[iface(0, TRIPLE, vec![bulk(0x81), bulk(0x01)])]).unwrap();
        assert_eq!(
            found,
            InterfaceMatch {
                configuration: 1,
                interface_number: 0,
                in_endpoint: 0x81,
                out_endpoint: 0x01,
            }
        );
    }

    #[test]
    fn test_each_triple_field_must_match() {
        for triple in [(0xFE, 0x42, 0x03), (0xFF, 0x43, 0x03), (0xFF, 0x42, 0x01)] {
            let interfaces = [iface(0, triple, vec![bulk(0x81), bulk(0x01)])];
            assert_eq!(find_match(&interfaces), None, "{:?}", triple);
        }
    }

    #[test]
    fn test_both_directions_required() {
        assert_eq!(find_match(&[iface(0, TRIPLE, vec![bulk(0x81)])]), None);
        assert_eq!(find_match(&[iface(0, TRIPLE, vec![bulk(0x01)])]), None);
        assert_eq!(find_match(&[iface(0, TRIPLE, vec![])]), None);
    }

    #[test]
    fn test_non_bulk_and_duplicate_endpoints_rejected() {
        let mut interrupt_in = bulk(0x82);
        interrupt_in.bulk = false;
        assert_eq!(
            find_match(&[iface(0, TRIPLE, vec![interrupt_in, bulk(0x01)])]),
            None
        );

        assert_eq!(
            find_match(&[iface(0, TRIPLE, vec![bulk(0x81), bulk(0x83), bulk(0x01)])]),
            None
        );
    }

    /// Records calls and fails the steps it is told to.
    #[derive(Default)]
    struct FakeControl {
        configure_fails: bool,
        reset_fails: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl DeviceControl for FakeControl {
        fn detach(&self, _interface: u8) {
            self.calls.borrow_mut().push("detach");
        }

        fn configure(&self, _value: u8) -> Result<(), String> {
            self.calls.borrow_mut().push("configure");
            if self.configure_fails {
                return Err("not supported".into());
            }
            Ok(())
        }

        fn reset(&self) -> Result<(), String> {
            self.calls.borrow_mut().push("reset");
            if self.reset_fails {
                return Err("not supported".into());
            }
            Ok(())
        }
    }

    fn sample_match() -> InterfaceMatch {
        InterfaceMatch {
            configuration: 1,
            interface_number: 0,
            in_endpoint: 0x81,
            out_endpoint: 0x01,
        }
    }

    #[test]
    fn test_prepare_reports_reset() {
        let control = FakeControl::default();
        assert!(prepare(&control, &sample_match()));
        assert_eq!(*control.calls.borrow(), vec!["detach", "configure", "reset"]);
    }

    #[test]
    fn test_prepare_failures_are_not_fatal() {
        // WinUSB supports neither step; the same handle is then claimed.
        let control = FakeControl {
            configure_fails: true,
            reset_fails: true,
            ..Default::default()
        };
        assert!(!prepare(&control, &sample_match()));
        assert_eq!(*control.calls.borrow(), vec!["detach", "configure", "reset"]);

        let control = FakeControl {
            configure_fails: true,
            ..Default::default()
        };
        assert!(prepare(&control, &sample_match()));
    }

    #[test]
    fn test_port_key_distinguishes_ports() {
        let key = PortKey {
            vendor_id: 0x18D1,
            product_id: 0x4EE0,
            bus_id: "3".into(),
            port_chain: vec![1, 4],
        };
        assert_ne!(
            PortKey {
                product_id: 0x4EE1,
                ..key.clone()
            },
            key
        );
        assert_ne!(
            PortKey {
                port_chain: vec![1, 5],
                ..key.clone()
            },
            key
        );
    }

    #[test]
    fn test_skips_to_matching_interface() {
        let interfaces = [
            iface(0, (0x08, 0x06, 0x50), vec![bulk(0x81), bulk(0x01)]),
            iface(1, TRIPLE, vec![bulk(0x81)]),
            iface(2, TRIPLE, vec![bulk(0x83), bulk(0x02)]),
        ];
        let found = find_match(&interfaces).unwrap();
        assert_eq!(found.interface_number, 2);
        assert_eq!((found.in_endpoint, found.out_endpoint), (0x83, 0x02));
    }
}
