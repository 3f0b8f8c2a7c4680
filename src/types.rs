//! Core value types for frames and points.
//!
//! Points use the DAC's native ranges: 12-bit unsigned coordinates and
//! 8-bit color channels. The crate performs no color-space conversion or
//! path optimization; frames are transported exactly as given.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// USB vendor ID of the DAC.
pub const VENDOR_ID: u16 = 0x1209;
/// USB product ID of the DAC.
pub const PRODUCT_ID: u16 = 0xE500;

/// Bulk-out endpoint used for frame data.
pub const EP_BULK_OUT: u8 = 0x02;

/// Maximum number of points in a single frame.
pub const MAX_POINTS: usize = 0x1000;
/// Maximum coordinate value (12-bit range).
pub const MAX_COORDINATE: u16 = 0x0FFF;
/// Minimum supported point rate in points per second.
pub const MIN_PPS: u16 = 7;
/// Maximum supported point rate in points per second.
pub const MAX_PPS: u16 = 0xFFFF;

/// Size in bytes of one encoded point.
pub const POINT_SIZE_BYTES: usize = 7;
/// Size in bytes of the encoded frame trailer (rate, count, flags).
pub const FRAME_TRAILER_BYTES: usize = 5;
/// Size in bytes of the largest possible encoded frame.
pub const MAX_FRAME_BYTES: usize = MAX_POINTS * POINT_SIZE_BYTES + FRAME_TRAILER_BYTES;

/// A single laser point in device-native ranges.
///
/// Coordinates `x` and `y` are 12-bit unsigned (0-4095); color channels
/// and intensity are 8-bit. Points are immutable value data: build a
/// sequence, hand it to [`Device::send_frame`](crate::device::Device::send_frame),
/// and the crate holds no reference to it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    /// X coordinate (0-4095).
    pub x: u16,
    /// Y coordinate (0-4095).
    pub y: u16,
    /// Red channel (0-255).
    pub r: u8,
    /// Green channel (0-255).
    pub g: u8,
    /// Blue channel (0-255).
    pub b: u8,
    /// Intensity (0-255).
    pub i: u8,
}

impl Point {
    /// Creates a point with every field given explicitly.
    pub fn new(x: u16, y: u16, r: u8, g: u8, b: u8, i: u8) -> Self {
        Self { x, y, r, g, b, i }
    }

    /// Creates a point from color channels with a computed intensity.
    ///
    /// The intensity defaults to 0 when all channels are 0 (a blanked
    /// point) and 255 otherwise. Use [`Point::new`] to set it explicitly.
    pub fn rgb(x: u16, y: u16, r: u8, g: u8, b: u8) -> Self {
        let i = if r == 0 && g == 0 && b == 0 { 0 } else { 255 };
        Self { x, y, r, g, b, i }
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: u16, y: u16) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

/// Playback flags carried in the frame trailer.
///
/// `start_immediately` makes the device interrupt the currently playing
/// frame instead of finishing it first; `single_shot` plays the frame
/// once instead of looping it until the next submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameFlags {
    /// Interrupt the currently playing frame.
    pub start_immediately: bool,
    /// Play the frame once instead of looping.
    pub single_shot: bool,
}

impl FrameFlags {
    /// Flags with both bits clear (loop, play out current frame first).
    pub const DEFAULT: FrameFlags = FrameFlags {
        start_immediately: false,
        single_shot: false,
    };

    /// Returns the wire flags byte.
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.start_immediately {
            bits |= 1 << 0;
        }
        if self.single_shot {
            bits |= 1 << 1;
        }
        bits
    }
}

/// One complete point sequence plus playback parameters.
///
/// A frame is transient: it is encoded into the session's transfer
/// buffer on submission and not retained afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    /// Ordered point sequence (1..=4096 points).
    pub points: Vec<Point>,
    /// Requested point rate in points per second (7-65535).
    pub pps: u16,
    /// Playback flags.
    pub flags: FrameFlags,
}

impl Frame {
    /// Creates a frame with default flags.
    pub fn new(pps: u16, points: Vec<Point>) -> Self {
        Self {
            points,
            pps,
            flags: FrameFlags::DEFAULT,
        }
    }

    /// Sets the playback flags (builder pattern).
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Device-reported readiness to accept the next frame.
///
/// `NotReady` is a first-class result, not an error: the device is
/// still playing the previous frame and the caller should poll again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The device can accept a new frame.
    Ready,
    /// The device is still busy with the previous frame.
    NotReady,
}

/// Connection lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state; the transport handle is not open.
    Disconnected,
    /// `connect()` is opening and claiming the transport handle.
    Connecting,
    /// Connected and accepting frames.
    Ready,
    /// Terminal state; the transport handle has been released.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Point Tests
    // ==========================================================================

    #[test]
    fn test_point_rgb_defaults_intensity_to_zero_when_blanked() {
        let point = Point::rgb(100, 200, 0, 0, 0);
        assert_eq!(point.i, 0);
    }

    #[test]
    fn test_point_rgb_defaults_intensity_to_full_when_lit() {
        // Any non-zero channel lights the point at full intensity
        assert_eq!(Point::rgb(0, 0, 1, 0, 0).i, 255);
        assert_eq!(Point::rgb(0, 0, 0, 1, 0).i, 255);
        assert_eq!(Point::rgb(0, 0, 0, 0, 1).i, 255);
    }

    #[test]
    fn test_point_new_keeps_explicit_intensity() {
        let point = Point::new(1, 2, 255, 255, 255, 17);
        assert_eq!(point.i, 17);
    }

    #[test]
    fn test_point_blanked_is_dark_at_position() {
        let point = Point::blanked(0x123, 0x456);
        assert_eq!((point.x, point.y), (0x123, 0x456));
        assert_eq!((point.r, point.g, point.b, point.i), (0, 0, 0, 0));
    }

    // ==========================================================================
    // FrameFlags Tests
    // ==========================================================================

    #[test]
    fn test_frame_flags_default_is_zero() {
        assert_eq!(FrameFlags::DEFAULT.bits(), 0);
        assert_eq!(FrameFlags::default().bits(), 0);
    }

    #[test]
    fn test_frame_flags_bit_layout() {
        let start = FrameFlags {
            start_immediately: true,
            single_shot: false,
        };
        let single = FrameFlags {
            start_immediately: false,
            single_shot: true,
        };
        let both = FrameFlags {
            start_immediately: true,
            single_shot: true,
        };
        assert_eq!(start.bits(), 0b01);
        assert_eq!(single.bits(), 0b10);
        assert_eq!(both.bits(), 0b11);
    }

    // ==========================================================================
    // Serde Tests
    // ==========================================================================

    #[cfg(feature = "serde")]
    #[test]
    fn test_frame_serde_roundtrip() {
        let frame = Frame::new(30_000, vec![Point::rgb(10, 20, 255, 0, 0)]).with_flags(
            FrameFlags {
                start_immediately: true,
                single_shot: false,
            },
        );

        let json = serde_json::to_string(&frame).expect("serialize to JSON");
        let restored: Frame = serde_json::from_str(&json).expect("deserialize from JSON");

        assert_eq!(restored, frame);
    }
}
