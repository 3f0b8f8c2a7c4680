//! USB transport layer.
//!
//! The protocol engine talks to hardware through the [`Transport`]
//! trait; [`UsbTransport`] is the libusb-backed implementation. Keeping
//! the seam here lets the session and command layers run against a
//! scripted transport in tests.

use std::time::Duration;

use rusb::{DeviceHandle, UsbContext};

use crate::types::{PRODUCT_ID, VENDOR_ID};

/// Timeout for control transfers.
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for bulk frame transfers. A full 4096-point frame is under
/// 29 KiB, which a full-speed device drains well within this bound.
const BULK_TIMEOUT: Duration = Duration::from_millis(1000);

/// USB configuration the DAC exposes its interface on.
const CONFIGURATION: u8 = 1;
/// Interface carrying both the control and bulk endpoints.
const INTERFACE: u8 = 0;

/// Errors from the raw transport.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// libusb-level failure.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// The device handle is not open.
    #[error("device handle is not open")]
    NotOpen,

    /// A transfer moved fewer bytes than requested.
    #[error("short transfer: {transferred} of {expected} bytes")]
    ShortTransfer { transferred: usize, expected: usize },
}

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Host USB capability consumed by the protocol engine.
///
/// One implementor owns one physical device handle. All methods take
/// `&mut self`: transfers on a single device are serialized by
/// construction, and the session layer never issues a transfer while
/// another is outstanding.
pub trait Transport: Send {
    /// Opens the device handle, selects the configuration, and claims
    /// the interface.
    fn open(&mut self) -> TransportResult<()>;

    /// Releases the interface and closes the handle. Idempotent.
    fn close(&mut self);

    /// Returns whether the handle is currently open.
    fn is_open(&self) -> bool;

    /// Sends a command request on the control-out path.
    fn control_out(&mut self, request: u8, payload: &[u8]) -> TransportResult<()>;

    /// Reads a command response on the control-in path into `buf`,
    /// returning the number of bytes transferred.
    fn control_in(&mut self, request: u8, buf: &mut [u8]) -> TransportResult<usize>;

    /// Streams an encoded frame buffer on a bulk-out endpoint.
    fn bulk_out(&mut self, endpoint: u8, data: &[u8]) -> TransportResult<()>;
}

/// libusb-backed transport for one DAC.
pub struct UsbTransport<T: UsbContext> {
    device: rusb::Device<T>,
    handle: Option<DeviceHandle<T>>,
}

impl<T: UsbContext> UsbTransport<T> {
    /// Wraps an enumerated USB device. The handle stays closed until
    /// [`Transport::open`] is called.
    pub fn new(device: rusb::Device<T>) -> Self {
        Self {
            device,
            handle: None,
        }
    }

    /// Returns the bus:address position of the device, a stable
    /// identifier for the current plug-in session.
    pub fn address(&self) -> String {
        format!("{}:{}", self.device.bus_number(), self.device.address())
    }

    fn handle(&self) -> TransportResult<&DeviceHandle<T>> {
        self.handle.as_ref().ok_or(TransportError::NotOpen)
    }
}

impl<T: UsbContext> Transport for UsbTransport<T> {
    fn open(&mut self) -> TransportResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.device.open()?;
        // On Linux a kernel driver may hold the interface.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.set_active_configuration(CONFIGURATION)?;
        handle.claim_interface(INTERFACE)?;

        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.release_interface(INTERFACE);
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn control_out(&mut self, request: u8, payload: &[u8]) -> TransportResult<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        let transferred =
            self.handle()?
                .write_control(request_type, request, 0, 0, payload, CONTROL_TIMEOUT)?;
        if transferred != payload.len() {
            return Err(TransportError::ShortTransfer {
                transferred,
                expected: payload.len(),
            });
        }
        Ok(())
    }

    fn control_in(&mut self, request: u8, buf: &mut [u8]) -> TransportResult<usize> {
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        let transferred =
            self.handle()?
                .read_control(request_type, request, 0, 0, buf, CONTROL_TIMEOUT)?;
        Ok(transferred)
    }

    fn bulk_out(&mut self, endpoint: u8, data: &[u8]) -> TransportResult<()> {
        let transferred = self.handle()?.write_bulk(endpoint, data, BULK_TIMEOUT)?;
        if transferred != data.len() {
            return Err(TransportError::ShortTransfer {
                transferred,
                expected: data.len(),
            });
        }
        Ok(())
    }
}

impl<T: UsbContext> Drop for UsbTransport<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Enumerates the bus and returns every attached DAC.
pub fn discover_devices<T: UsbContext>(context: &T) -> TransportResult<Vec<rusb::Device<T>>> {
    let mut matches = Vec::new();
    for device in context.devices()?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if descriptor.vendor_id() == VENDOR_ID && descriptor.product_id() == PRODUCT_ID {
            matches.push(device);
        }
    }
    Ok(matches)
}
