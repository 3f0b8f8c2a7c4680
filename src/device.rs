//! Device session: connection lifecycle, command exchanges, and frame
//! submission for one physical DAC.

use log::{debug, warn};

use crate::codec;
use crate::command::{
    self, Attempt, ProtocolConfig, RetryPolicy, CMD_ERASE_FIRMWARE, CMD_GET_FIRMWARE_VERSION,
    CMD_GET_NAME, CMD_GET_STATUS, CMD_SET_NAME, CMD_SET_SHUTTER, CMD_STOP, REQUEST_RESERVED,
    RESPONSE_LEN,
};
use crate::error::{Error, Result};
use crate::transport::{Transport, UsbTransport};
use crate::types::{
    ConnectionState, DeviceStatus, Frame, FrameFlags, Point, EP_BULK_OUT, MAX_FRAME_BYTES,
};

/// Point rate used when neither the frame nor the caller supplies one.
const DEFAULT_PPS: u16 = 30_000;

/// A session with one physical DAC.
///
/// The session owns its transport exclusively: all operations take
/// `&mut self`, so command exchanges and frame sends on one device
/// complete in the order issued. Sessions for different devices share
/// no state and may run concurrently.
///
/// # Lifecycle
///
/// `Disconnected` → [`connect`](Self::connect) → `Ready` →
/// [`close`](Self::close) → `Closed`. A failed transfer while `Ready`
/// surfaces an error but does not change state; the next operation may
/// retry. `Closed` is terminal.
pub struct Device<T: Transport> {
    transport: T,
    state: ConnectionState,
    config: ProtocolConfig,
    default_pps: u16,
    firmware_version: Option<u32>,
    name: Option<String>,
    /// Reused for every frame encoding; sized for the largest frame.
    frame_buffer: Vec<u8>,
    /// Guards against reentrant submission from a playback producer.
    frame_in_flight: bool,
}

impl<T: Transport> Device<T> {
    /// Pairs a session with a transport handle, starting disconnected.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ProtocolConfig::default())
    }

    /// Pairs a session with a transport handle and explicit protocol
    /// parameters.
    pub fn with_config(transport: T, config: ProtocolConfig) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            config,
            default_pps: DEFAULT_PPS,
            firmware_version: None,
            name: None,
            frame_buffer: Vec::with_capacity(MAX_FRAME_BYTES),
            frame_in_flight: false,
        }
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last-known firmware version, populated during [`connect`](Self::connect)
    /// or by [`get_firmware_version`](Self::get_firmware_version).
    pub fn firmware_version(&self) -> Option<u32> {
        self.firmware_version
    }

    /// Last-known device name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The rate used when a frame is submitted without one.
    pub fn default_pps(&self) -> u16 {
        self.default_pps
    }

    /// Sets the rate used when a frame is submitted without one.
    pub fn set_default_pps(&mut self, pps: u16) {
        self.default_pps = pps;
    }

    /// Opens the transport, claims the interface, and queries the
    /// device identity.
    ///
    /// Idempotent once `Ready`. The identity queries (firmware version
    /// and name) are best-effort: their failure is logged but does not
    /// block the session from reaching `Ready`.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Closed => return Err(Error::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.state = ConnectionState::Connecting;
        if let Err(err) = self.transport.open() {
            self.state = ConnectionState::Disconnected;
            return Err(Error::Connection(err));
        }

        match self.query_firmware_version() {
            Ok(version) => self.firmware_version = Some(version),
            Err(err) => debug!("firmware version query failed during connect: {}", err),
        }
        match self.query_name() {
            Ok(name) => self.name = Some(name),
            Err(err) => debug!("name query failed during connect: {}", err),
        }

        self.state = ConnectionState::Ready;
        debug!(
            "connected (firmware {:?}, name {:?})",
            self.firmware_version, self.name
        );
        Ok(())
    }

    /// Polls the device's readiness to accept the next frame.
    ///
    /// Retries busy responses and mismatched response codes up to the
    /// configured status ceiling. A ceiling exhausted by busy answers
    /// alone yields [`DeviceStatus::NotReady`]; a device that kept
    /// answering with a malformed or mismatched response surfaces that
    /// error instead, so backpressure stays distinguishable from a
    /// misbehaving device. Transport failures surface immediately.
    pub fn get_status(&mut self) -> Result<DeviceStatus> {
        self.ensure_open()?;
        let policy = RetryPolicy::new(self.config.status_attempts);
        policy.run(
            || match self.query(CMD_GET_STATUS) {
                Ok(response) => match codec::decode_status(&response) {
                    Ok(DeviceStatus::Ready) => Attempt::Done(DeviceStatus::Ready),
                    Ok(DeviceStatus::NotReady) => Attempt::Retry(None),
                    Err(err) => Attempt::Retry(Some(err)),
                },
                Err(err) => Attempt::Fatal(err),
            },
            |last| last.map_or(Ok(DeviceStatus::NotReady), Err),
        )
    }

    /// Submits one frame over the streaming channel.
    ///
    /// The frame is encoded into the session's transfer buffer and sent
    /// in a single bulk transfer. A frame rate of 0 falls back to the
    /// session default. This does not poll status first; callers that
    /// want blocking semantics confirm readiness via
    /// [`get_status`](Self::get_status).
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let pps = if frame.pps == 0 {
            self.default_pps
        } else {
            frame.pps
        };
        self.send_points(&frame.points, Some(pps), frame.flags)
    }

    /// Submits one frame from a borrowed point slice.
    ///
    /// `rate` of `None` uses the session default.
    pub fn send_points(
        &mut self,
        points: &[Point],
        rate: Option<u16>,
        flags: FrameFlags,
    ) -> Result<()> {
        self.ensure_ready()?;
        if self.frame_in_flight {
            return Err(Error::FrameInFlight);
        }

        let pps = rate.unwrap_or(self.default_pps);
        codec::encode_points(points, pps, flags, &mut self.frame_buffer)?;

        self.frame_in_flight = true;
        let result = self.transport.bulk_out(EP_BULK_OUT, &self.frame_buffer);
        self.frame_in_flight = false;
        result?;
        Ok(())
    }

    /// Stops playback and waits out the settle delay.
    ///
    /// The stop request is retried on transport failure up to the
    /// command ceiling. The settle delay is hardware-imposed: further
    /// commands are not safe until it has elapsed.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_open()?;
        let policy = RetryPolicy::new(self.config.command_attempts);
        policy.run(
            || match self.transport.control_out(CMD_STOP, &[REQUEST_RESERVED]) {
                Ok(()) => Attempt::Done(()),
                Err(err) => Attempt::Retry(Some(Error::Transport(err))),
            },
            |last| Err(last.unwrap_or(Error::NotConnected)),
        )?;
        std::thread::sleep(self.config.stop_settle);
        Ok(())
    }

    /// Opens or closes the shutter.
    pub fn set_shutter(&mut self, open: bool) -> Result<()> {
        self.ensure_open()?;
        self.transport
            .control_out(CMD_SET_SHUTTER, &command::shutter_payload(open))?;
        Ok(())
    }

    /// Erases the firmware, dropping the device into its bootloader.
    ///
    /// The device will not respond to further commands until it is
    /// reflashed and power-cycled.
    pub fn erase_firmware(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.transport
            .control_out(CMD_ERASE_FIRMWARE, &[REQUEST_RESERVED])?;
        Ok(())
    }

    /// Queries the firmware version, updating the cached value.
    pub fn get_firmware_version(&mut self) -> Result<u32> {
        self.ensure_open()?;
        let version = self.query_firmware_version()?;
        self.firmware_version = Some(version);
        Ok(version)
    }

    /// Queries the device name, updating the cached value.
    pub fn get_name(&mut self) -> Result<String> {
        self.ensure_open()?;
        let name = self.query_name()?;
        self.name = Some(name.clone());
        Ok(name)
    }

    /// Sets the device name (truncated to 30 bytes on the wire).
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.transport
            .control_out(CMD_SET_NAME, &command::name_payload(name))?;
        self.name = Some(name.to_string());
        Ok(())
    }

    /// Stops playback and releases the transport handle.
    ///
    /// Safe to call repeatedly: once `Closed`, further calls are no-ops
    /// and no second stop exchange is issued. The stop is best-effort;
    /// a failure still releases the handle.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Closed;
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Ready => {}
        }

        if let Err(err) = self.stop() {
            warn!("stop during close failed: {}", err);
        }
        self.transport.close();
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Rejects operations on closed or never-connected sessions.
    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(Error::Closed),
            ConnectionState::Disconnected => Err(Error::NotConnected),
            ConnectionState::Connecting | ConnectionState::Ready => Ok(()),
        }
    }

    /// Frames are only accepted in the `Ready` state.
    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(Error::Closed),
            _ => Err(Error::NotConnected),
        }
    }

    /// One control exchange: request out, response in.
    fn query(&mut self, request: u8) -> Result<Vec<u8>> {
        self.transport.control_out(request, &[REQUEST_RESERVED])?;
        let mut buf = [0u8; RESPONSE_LEN];
        let len = self.transport.control_in(request, &mut buf)?;
        Ok(buf[..len].to_vec())
    }

    /// Firmware version exchange with the command retry ceiling.
    fn query_firmware_version(&mut self) -> Result<u32> {
        let policy = RetryPolicy::new(self.config.command_attempts);
        policy.run(
            || match self.query(CMD_GET_FIRMWARE_VERSION) {
                Ok(response) => match codec::decode_firmware_version(&response) {
                    Ok(version) => Attempt::Done(version),
                    Err(err) => Attempt::Retry(Some(err)),
                },
                Err(err) => Attempt::Fatal(err),
            },
            |last| Err(last.unwrap_or(Error::NotConnected)),
        )
    }

    /// Name exchange with the command retry ceiling.
    fn query_name(&mut self) -> Result<String> {
        let policy = RetryPolicy::new(self.config.command_attempts);
        policy.run(
            || match self.query(CMD_GET_NAME) {
                Ok(response) => match codec::decode_name(&response) {
                    Ok(name) => Attempt::Done(name),
                    Err(err) => Attempt::Retry(Some(err)),
                },
                Err(err) => Attempt::Fatal(err),
            },
            |last| Err(last.unwrap_or(Error::NotConnected)),
        )
    }
}

/// A [`Device`] backed by the libusb transport.
pub type UsbDevice = Device<UsbTransport<rusb::Context>>;

// =============================================================================
// Controller
// =============================================================================

/// Enumerates DACs on the USB bus and pairs each with a session.
pub struct DacController {
    context: rusb::Context,
}

impl DacController {
    /// Initializes a libusb context.
    pub fn new() -> Result<Self> {
        let context = rusb::Context::new().map_err(|e| Error::Connection(e.into()))?;
        Ok(Self { context })
    }

    /// Lists all attached DACs as disconnected sessions.
    ///
    /// Call [`Device::connect`] on each session before use.
    pub fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let devices = crate::transport::discover_devices(&self.context)?;
        Ok(devices
            .into_iter()
            .map(|device| Device::new(UsbTransport::new(device)))
            .collect())
    }
}
