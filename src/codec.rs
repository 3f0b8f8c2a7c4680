//! Wire codec for frame buffers and command-response payloads.
//!
//! The frame layout is fixed by the hardware: 7 bytes per point (12-bit
//! x and y packed into 3 bytes, then r, g, b, i) followed by a 5-byte
//! trailer (rate, point count, flags, all little-endian). The layout
//! must be reproduced bit-exactly; see [`encode_frame`].

use crate::command;
use crate::error::{Error, Result};
use crate::types::{
    DeviceStatus, Frame, FrameFlags, Point, FRAME_TRAILER_BYTES, MAX_COORDINATE, MAX_POINTS,
    MIN_PPS, POINT_SIZE_BYTES,
};

/// Maximum length of a device name on the wire, excluding the NUL.
pub const NAME_MAX_BYTES: usize = 31;

/// Frame validation errors, rejected locally before any transfer.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    /// The frame contains no points.
    #[error("frame contains no points")]
    EmptyFrame,

    /// The frame exceeds the 4096-point hardware limit.
    #[error("frame has {count} points, maximum is {max}", max = MAX_POINTS)]
    TooManyPoints { count: usize },

    /// The point rate is below the 7 pps hardware minimum.
    #[error("point rate {pps} is below the minimum of {min} pps", min = MIN_PPS)]
    RateOutOfRange { pps: u16 },

    /// A coordinate exceeds the 12-bit range.
    #[error("{axis} coordinate {value} exceeds the 12-bit range")]
    CoordinateOutOfRange { axis: char, value: u16 },
}

/// Computes the encoded point count and rate for a frame of `count`
/// points at `pps`.
///
/// Certain buffer lengths trigger a framing artifact in the hardware:
/// when `(count - 45) % 64 == 0` the encoded count is reduced by one
/// (the trailing point is dropped from the wire buffer only) and the
/// rate is rescaled to `round(pps * (count - 1) / count)`, preserving
/// the total frame playback duration. This quirk adjustment is fixed
/// and must not be made configurable.
pub(crate) fn adjusted_count_and_rate(count: usize, pps: u16) -> (usize, u16) {
    if count >= 45 && (count - 45) % 64 == 0 {
        let encoded = count - 1;
        let numerator = pps as u32 * encoded as u32;
        let rate = (numerator + count as u32 / 2) / count as u32;
        (encoded, rate as u16)
    } else {
        (count, pps)
    }
}

/// Encodes a frame into `out`, replacing its contents.
///
/// Convenience wrapper around [`encode_points`].
pub fn encode_frame(frame: &Frame, out: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
    encode_points(&frame.points, frame.pps, frame.flags, out)
}

/// Encodes a point sequence plus playback parameters into `out`,
/// replacing its contents.
///
/// The buffer is cleared and filled with the per-point records and the
/// trailer. Validation failures leave `out` cleared and nothing is
/// transferred.
pub fn encode_points(
    points: &[Point],
    pps: u16,
    flags: FrameFlags,
    out: &mut Vec<u8>,
) -> std::result::Result<(), EncodingError> {
    out.clear();

    if points.is_empty() {
        return Err(EncodingError::EmptyFrame);
    }
    if points.len() > MAX_POINTS {
        return Err(EncodingError::TooManyPoints {
            count: points.len(),
        });
    }
    if pps < MIN_PPS {
        return Err(EncodingError::RateOutOfRange { pps });
    }
    for point in points {
        if point.x > MAX_COORDINATE {
            return Err(EncodingError::CoordinateOutOfRange {
                axis: 'x',
                value: point.x,
            });
        }
        if point.y > MAX_COORDINATE {
            return Err(EncodingError::CoordinateOutOfRange {
                axis: 'y',
                value: point.y,
            });
        }
    }

    let (count, pps) = adjusted_count_and_rate(points.len(), pps);

    out.reserve(count * POINT_SIZE_BYTES + FRAME_TRAILER_BYTES);
    for point in &points[..count] {
        out.push((point.x >> 4) as u8);
        out.push((((point.x & 0x0F) << 4) | (point.y >> 8)) as u8);
        out.push((point.y & 0xFF) as u8);
        out.push(point.r);
        out.push(point.g);
        out.push(point.b);
        out.push(point.i);
    }
    out.push((pps & 0xFF) as u8);
    out.push((pps >> 8) as u8);
    out.push((count & 0xFF) as u8);
    out.push((count >> 8) as u8);
    out.push(flags.bits());

    Ok(())
}

/// Checks the leading response-code byte against the expected code.
fn check_code(response: &[u8], expected: u8) -> Result<()> {
    let &actual = response.first().ok_or(Error::MalformedResponse { len: 0 })?;
    if actual != expected {
        return Err(Error::Mismatch { expected, actual });
    }
    Ok(())
}

/// Decodes a status response into the device's readiness.
pub fn decode_status(response: &[u8]) -> Result<DeviceStatus> {
    check_code(response, command::RESPONSE_STATUS)?;
    let &ready = response.get(1).ok_or(Error::MalformedResponse {
        len: response.len(),
    })?;
    Ok(if ready != 0 {
        DeviceStatus::Ready
    } else {
        DeviceStatus::NotReady
    })
}

/// Decodes a firmware-version response.
///
/// The version is a little-endian u32 following the response code.
pub fn decode_firmware_version(response: &[u8]) -> Result<u32> {
    check_code(response, command::RESPONSE_FIRMWARE_VERSION)?;
    let bytes: [u8; 4] = response
        .get(1..5)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Error::MalformedResponse {
            len: response.len(),
        })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Decodes a name response into a string.
///
/// The name is NUL-terminated and at most 31 bytes; bytes after the
/// terminator are ignored. Non-UTF-8 bytes are replaced.
pub fn decode_name(response: &[u8]) -> Result<String> {
    check_code(response, command::RESPONSE_NAME)?;
    if response.len() < 2 {
        return Err(Error::MalformedResponse {
            len: response.len(),
        });
    }
    let raw = &response[1..response.len().min(1 + NAME_MAX_BYTES)];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}
