//! Continuous playback driven by a frame producer.
//!
//! [`PlaybackLoop`] owns a device session and alternates status polls
//! with frame submissions: whenever the device reports ready, the
//! producer callback supplies the next frame. A cloneable
//! [`PlaybackControl`] arms, pauses, and stops the loop from other
//! threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::device::Device;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{ConnectionState, DeviceStatus};

/// Backoff between status polls while the device is busy or the loop
/// is disarmed.
const DEFAULT_POLL_BACKOFF: Duration = Duration::from_micros(500);

/// Cross-thread handle controlling a [`PlaybackLoop`].
///
/// Cheap to clone; all clones observe the same flags. The control
/// starts disarmed, so a loop spawned before the first frame is staged
/// idles until [`arm`](Self::arm) is called.
#[derive(Debug, Clone, Default)]
pub struct PlaybackControl {
    inner: Arc<ControlFlags>,
}

#[derive(Debug, Default)]
struct ControlFlags {
    armed: AtomicBool,
    stop: AtomicBool,
}

impl PlaybackControl {
    /// Creates a disarmed control.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the loop submit frames.
    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::Release);
    }

    /// Pauses frame submission without ending the loop. The device
    /// keeps looping its last frame.
    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::Release);
    }

    /// Asks the loop to end. Takes effect at the next iteration.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    /// Whether frame submission is currently armed.
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }
}

/// Outcome the producer reports after each submission opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerResult {
    /// More frames will follow.
    Continue,
    /// The producer has no further frames; end the loop.
    End,
}

/// Why [`PlaybackLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The control requested a stop.
    Stopped,
    /// The producer reported [`ProducerResult::End`].
    ProducerEnded,
    /// The session was closed out from under the loop.
    DeviceClosed,
}

/// Drives a device with frames from a producer callback.
///
/// The loop runs on the calling thread; spawn a thread around
/// [`run`](Self::run) for background playback and keep the
/// [`PlaybackControl`] clone on the controlling side.
pub struct PlaybackLoop<T: Transport> {
    device: Device<T>,
    control: PlaybackControl,
    poll_backoff: Duration,
}

impl<T: Transport> PlaybackLoop<T> {
    /// Wraps a connected session.
    pub fn new(device: Device<T>, control: PlaybackControl) -> Self {
        Self {
            device,
            control,
            poll_backoff: DEFAULT_POLL_BACKOFF,
        }
    }

    /// Sets the sleep between polls while busy or disarmed (builder
    /// pattern).
    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    /// A clone of the loop's control handle.
    pub fn control(&self) -> PlaybackControl {
        self.control.clone()
    }

    /// Runs until stopped, until the producer ends, or until the
    /// session closes.
    ///
    /// Each iteration checks the control flags, polls device status,
    /// and on a ready device invokes `producer` with exclusive access
    /// to the session so it can call
    /// [`Device::send_frame`](crate::device::Device::send_frame)
    /// directly. Transport and encoding errors from the producer or
    /// the status poll end the loop with the error; the session state
    /// is left as the failing operation left it.
    pub fn run(
        &mut self,
        mut producer: impl FnMut(&mut Device<T>) -> Result<ProducerResult>,
    ) -> Result<RunExit> {
        loop {
            if self.control.is_stop_requested() {
                debug!("playback loop: stop requested");
                return Ok(RunExit::Stopped);
            }
            if self.device.state() == ConnectionState::Closed {
                return Ok(RunExit::DeviceClosed);
            }
            if !self.control.is_armed() {
                std::thread::sleep(self.poll_backoff);
                continue;
            }

            match self.device.get_status()? {
                DeviceStatus::Ready => match producer(&mut self.device)? {
                    ProducerResult::Continue => {}
                    ProducerResult::End => return Ok(RunExit::ProducerEnded),
                },
                DeviceStatus::NotReady => std::thread::sleep(self.poll_backoff),
            }
        }
    }

    /// Stops playback on the device and closes the session.
    pub fn close(&mut self) -> Result<()> {
        self.device.close()
    }

    /// Releases the session for direct use.
    pub fn into_device(self) -> Device<T> {
        self.device
    }
}
