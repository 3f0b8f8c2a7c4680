//! Control-channel command protocol: codes, request payloads, and the
//! shared retry policy.
//!
//! Commands are short request/response exchanges on the control channel.
//! This module is a pure protocol layer: it builds request payloads and
//! decides retry behavior, while the device session owns the transport
//! and actually performs the transfers.

use std::time::Duration;

use crate::codec::NAME_MAX_BYTES;
use crate::error::Error;

// =============================================================================
// Command and Response Codes
// =============================================================================

/// Stop playback (ack only).
pub const CMD_STOP: u8 = 0x01;
/// Open or close the shutter (ack only, 1-byte level payload).
pub const CMD_SET_SHUTTER: u8 = 0x02;
/// Query readiness for the next frame.
pub const CMD_GET_STATUS: u8 = 0x03;
/// Query the firmware version.
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x04;
/// Query the device name.
pub const CMD_GET_NAME: u8 = 0x05;
/// Set the device name (31-byte payload).
pub const CMD_SET_NAME: u8 = 0x06;
/// Erase the firmware, dropping the device into its bootloader.
pub const CMD_ERASE_FIRMWARE: u8 = 0x07;

/// Expected response code for [`CMD_GET_STATUS`].
pub const RESPONSE_STATUS: u8 = 0x83;
/// Expected response code for [`CMD_GET_FIRMWARE_VERSION`].
pub const RESPONSE_FIRMWARE_VERSION: u8 = 0x84;
/// Expected response code for [`CMD_GET_NAME`].
pub const RESPONSE_NAME: u8 = 0x85;

/// Length of a control-in response buffer.
pub const RESPONSE_LEN: usize = 32;

/// Reserved byte carried by query and bare-command requests.
pub(crate) const REQUEST_RESERVED: u8 = 0x00;

// =============================================================================
// Request Payloads
// =============================================================================

/// Builds the set-name request payload.
///
/// The payload is a fixed 31-byte buffer: the name truncated to 30
/// bytes, NUL-padded so a terminator is always present on the wire.
pub(crate) fn name_payload(name: &str) -> [u8; NAME_MAX_BYTES] {
    let mut payload = [0u8; NAME_MAX_BYTES];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_MAX_BYTES - 1);
    payload[..len].copy_from_slice(&bytes[..len]);
    payload
}

/// Builds the set-shutter request payload.
pub(crate) fn shutter_payload(open: bool) -> [u8; 1] {
    [if open { 1 } else { 0 }]
}

// =============================================================================
// Protocol Configuration
// =============================================================================

/// Tunable protocol parameters.
///
/// The status retry ceiling is deliberately configurable: firmware
/// revisions differ in how long they stay busy between frames, so the
/// safe ceiling is hardware-dependent. The defaults are the defensive
/// values; the stop settle delay is a hardware-imposed quiescence
/// period and should not normally be shortened.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Maximum attempts for one status poll before reporting not ready.
    pub status_attempts: u32,
    /// Maximum attempts for retried commands (firmware version, name, stop).
    pub command_attempts: u32,
    /// Wait after a successful stop before further commands are safe.
    pub stop_settle: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            status_attempts: 512,
            command_attempts: 3,
            stop_settle: Duration::from_millis(100),
        }
    }
}

impl ProtocolConfig {
    /// Sets the status poll attempt ceiling (builder pattern).
    pub fn with_status_attempts(mut self, attempts: u32) -> Self {
        self.status_attempts = attempts;
        self
    }

    /// Sets the command retry ceiling (builder pattern).
    pub fn with_command_attempts(mut self, attempts: u32) -> Self {
        self.command_attempts = attempts;
        self
    }

    /// Sets the post-stop settle delay (builder pattern).
    pub fn with_stop_settle(mut self, settle: Duration) -> Self {
        self.stop_settle = settle;
        self
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Outcome of a single command attempt.
pub(crate) enum Attempt<T> {
    /// The exchange completed with a result.
    Done(T),
    /// Retryable outcome. A busy status poll retries with no error;
    /// a mismatched response carries the error for the exhaustion path.
    Retry(Option<Error>),
    /// Non-retryable failure, surfaced immediately.
    Fatal(Error),
}

/// Bounded retry policy shared by all command exchanges.
///
/// Each command family decides which failures are retryable by mapping
/// its attempt outcome into [`Attempt`]; the policy only owns the
/// ceiling and the exhaustion path.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            // A ceiling of zero would never issue the exchange at all.
            max_attempts: max_attempts.max(1),
        }
    }

    /// Runs `op` until it completes, fails fatally, or the attempt
    /// ceiling is reached. `on_exhausted` receives the last retryable
    /// error and supplies the final outcome, allowing status polling to
    /// turn exhaustion into a not-ready result rather than an error.
    pub(crate) fn run<T>(
        &self,
        mut op: impl FnMut() -> Attempt<T>,
        on_exhausted: impl FnOnce(Option<Error>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut last = None;
        for _ in 0..self.max_attempts {
            match op() {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(err) => last = err.or(last),
                Attempt::Fatal(err) => return Err(err),
            }
        }
        on_exhausted(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Payload Tests
    // ==========================================================================

    #[test]
    fn test_name_payload_is_nul_padded() {
        let payload = name_payload("laser");
        assert_eq!(&payload[..5], b"laser");
        assert!(payload[5..].iter().all(|&b| b == 0));
        assert_eq!(payload.len(), 31);
    }

    #[test]
    fn test_name_payload_truncates_and_keeps_terminator() {
        let long = "x".repeat(64);
        let payload = name_payload(&long);
        assert_eq!(&payload[..30], "x".repeat(30).as_bytes());
        assert_eq!(payload[30], 0);
    }

    #[test]
    fn test_shutter_payload_levels() {
        assert_eq!(shutter_payload(true), [1]);
        assert_eq!(shutter_payload(false), [0]);
    }

    // ==========================================================================
    // Retry Policy Tests
    // ==========================================================================

    #[test]
    fn test_retry_policy_returns_first_success() {
        let mut calls = 0;
        let result = RetryPolicy::new(5).run(
            || {
                calls += 1;
                if calls < 3 {
                    Attempt::Retry(Some(Error::Closed))
                } else {
                    Attempt::Done(calls)
                }
            },
            |_| panic!("should not exhaust"),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_policy_fatal_stops_immediately() {
        let mut calls = 0;
        let result: Result<(), Error> = RetryPolicy::new(5).run(
            || {
                calls += 1;
                Attempt::Fatal(Error::Closed)
            },
            |_| panic!("should not exhaust"),
        );
        assert!(matches!(result, Err(Error::Closed)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_policy_exhaustion_consumes_exact_ceiling() {
        let mut calls = 0;
        let result = RetryPolicy::new(4).run(
            || {
                calls += 1;
                Attempt::<()>::Retry(Some(Error::Closed))
            },
            |last| {
                assert!(matches!(last, Some(Error::Closed)));
                Err(Error::NotConnected)
            },
        );
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_retry_policy_zero_ceiling_still_attempts_once() {
        let mut calls = 0;
        let _ = RetryPolicy::new(0).run(
            || {
                calls += 1;
                Attempt::Done(())
            },
            |_| unreachable!(),
        );
        assert_eq!(calls, 1);
    }
}
