//! USB driver for laser projector DACs.
//!
//! The crate speaks the device's native USB protocol directly: frames
//! of 12-bit points are validated and encoded on the host, streamed
//! over a bulk endpoint, and paced by polling the device's readiness.
//! Commands (stop, shutter, status, naming, firmware queries) run as
//! short request/response exchanges on the control channel.
//!
//! # Example
//!
//! ```no_run
//! use helios_dac::{DacController, Frame, Point, PlaybackControl, PlaybackLoop, ProducerResult};
//!
//! fn main() -> helios_dac::Result<()> {
//!     let controller = DacController::new()?;
//!     let mut devices = controller.list_devices()?;
//!     let mut device = devices.pop().expect("no DAC attached");
//!     device.connect()?;
//!
//!     // A horizontal red scanline
//!     let points: Vec<Point> = (0..500)
//!         .map(|i| Point::rgb(i * 8, 0x0800, 255, 0, 0))
//!         .collect();
//!     let frame = Frame::new(30_000, points);
//!
//!     let control = PlaybackControl::new();
//!     control.arm();
//!     let mut playback = PlaybackLoop::new(device, control.clone());
//!
//!     let mut remaining = 100;
//!     playback.run(|device| {
//!         device.send_frame(&frame)?;
//!         remaining -= 1;
//!         Ok(if remaining > 0 {
//!             ProducerResult::Continue
//!         } else {
//!             ProducerResult::End
//!         })
//!     })?;
//!
//!     playback.close()
//! }
//! ```
//!
//! # Concurrency
//!
//! A [`Device`] serializes all of its operations through `&mut self`;
//! move it to a playback thread and steer it with a cloned
//! [`PlaybackControl`]. Sessions for different devices are independent.
//!
//! # Feature flags
//!
//! - `serde`: `Serialize`/`Deserialize` on [`Point`], [`Frame`], and
//!   [`FrameFlags`].
//! - `vendored`: build and statically link libusb instead of using the
//!   system library.

pub mod codec;
pub mod command;
pub mod device;
pub mod error;
pub mod playback;
pub mod transport;
pub mod types;

pub use codec::{encode_frame, encode_points, EncodingError, NAME_MAX_BYTES};
pub use command::ProtocolConfig;
pub use device::{DacController, Device, UsbDevice};
pub use error::{Error, Result};
pub use playback::{PlaybackControl, PlaybackLoop, ProducerResult, RunExit};
pub use transport::{discover_devices, Transport, TransportError, UsbTransport};
pub use types::{
    ConnectionState, DeviceStatus, Frame, FrameFlags, Point, EP_BULK_OUT, MAX_COORDINATE,
    MAX_FRAME_BYTES, MAX_POINTS, MAX_PPS, MIN_PPS, PRODUCT_ID, VENDOR_ID,
};

// Callers pairing their own rusb context with the transport layer can
// use the same rusb version the crate was built against.
pub use rusb;
