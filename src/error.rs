//! Crate-level error types.

use crate::codec::EncodingError;
use crate::transport::TransportError;

/// Errors that can occur during DAC operations.
///
/// A device reporting "not ready" is *not* an error:
/// [`Device::get_status`](crate::device::Device::get_status) returns
/// [`DeviceStatus::NotReady`](crate::types::DeviceStatus::NotReady) so
/// callers can always tell backpressure apart from failure.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Frame or point data failed validation before any transfer.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// The device answered with an unexpected response code.
    #[error("response code mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Mismatch { expected: u8, actual: u8 },

    /// The response buffer was too short to carry the expected payload.
    #[error("malformed response ({len} bytes)")]
    MalformedResponse { len: usize },

    /// Opening or claiming the device failed.
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),

    /// A control or bulk transfer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session has been closed.
    #[error("device is closed")]
    Closed,

    /// The session is not in the ready state.
    #[error("device is not connected")]
    NotConnected,

    /// A frame submission is already in progress on this session.
    #[error("a frame transfer is already in flight")]
    FrameInFlight,
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;
