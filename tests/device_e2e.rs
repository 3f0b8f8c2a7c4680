//! End-to-end tests against a scripted transport.
//!
//! These exercise the public API the way an application would: list,
//! connect, poll, stream, stop, close. The transport records every
//! transfer so the tests can assert on exact wire traffic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helios_dac::{
    ConnectionState, Device, DeviceStatus, Frame, FrameFlags, PlaybackControl, PlaybackLoop,
    Point, ProducerResult, ProtocolConfig, RunExit, Transport,
};
use helios_dac::command::{
    CMD_GET_FIRMWARE_VERSION, CMD_GET_NAME, CMD_GET_STATUS, CMD_STOP, RESPONSE_FIRMWARE_VERSION,
    RESPONSE_LEN, RESPONSE_NAME, RESPONSE_STATUS,
};
use helios_dac::transport::TransportResult;

/// Traffic recorded by the scripted transport, shared with the test
/// body so it survives moving the device into a playback loop.
#[derive(Default)]
struct Traffic {
    control_out: Vec<(u8, Vec<u8>)>,
    bulk: Vec<Vec<u8>>,
    status_polls: usize,
}

impl Traffic {
    fn stops(&self) -> usize {
        self.control_out
            .iter()
            .filter(|(request, _)| *request == CMD_STOP)
            .count()
    }
}

/// Transport that answers from a fixed script and logs all traffic.
struct ScriptedTransport {
    traffic: Arc<Mutex<Traffic>>,
    /// Status polls answered "busy" before each "ready". Refreshed
    /// after every ready answer so a streaming loop sees a device that
    /// goes busy after each frame.
    busy_per_frame: usize,
    busy_remaining: usize,
    /// When set, the device never reports ready.
    never_ready: bool,
    open: bool,
}

impl ScriptedTransport {
    fn new(traffic: Arc<Mutex<Traffic>>) -> Self {
        Self {
            traffic,
            busy_per_frame: 0,
            busy_remaining: 0,
            never_ready: false,
            open: false,
        }
    }

    fn with_busy_per_frame(mut self, polls: usize) -> Self {
        self.busy_per_frame = polls;
        self.busy_remaining = polls;
        self
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> TransportResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn control_out(&mut self, request: u8, payload: &[u8]) -> TransportResult<()> {
        self.traffic
            .lock()
            .unwrap()
            .control_out
            .push((request, payload.to_vec()));
        Ok(())
    }

    fn control_in(&mut self, request: u8, buf: &mut [u8]) -> TransportResult<usize> {
        buf.fill(0);
        match request {
            CMD_GET_STATUS => {
                self.traffic.lock().unwrap().status_polls += 1;
                buf[0] = RESPONSE_STATUS;
                if self.never_ready || self.busy_remaining > 0 {
                    self.busy_remaining = self.busy_remaining.saturating_sub(1);
                    buf[1] = 0;
                } else {
                    self.busy_remaining = self.busy_per_frame;
                    buf[1] = 1;
                }
            }
            CMD_GET_FIRMWARE_VERSION => {
                buf[0] = RESPONSE_FIRMWARE_VERSION;
                buf[1..5].copy_from_slice(&6u32.to_le_bytes());
            }
            CMD_GET_NAME => {
                buf[0] = RESPONSE_NAME;
                buf[1..9].copy_from_slice(b"Helios 1");
            }
            _ => {}
        }
        Ok(RESPONSE_LEN)
    }

    fn bulk_out(&mut self, _endpoint: u8, data: &[u8]) -> TransportResult<()> {
        self.traffic.lock().unwrap().bulk.push(data.to_vec());
        Ok(())
    }
}

fn test_config() -> ProtocolConfig {
    ProtocolConfig::default().with_stop_settle(Duration::ZERO)
}

fn scripted_device(traffic: &Arc<Mutex<Traffic>>) -> Device<ScriptedTransport> {
    Device::with_config(ScriptedTransport::new(Arc::clone(traffic)), test_config())
}

fn scanline(points: usize) -> Frame {
    Frame::new(
        30_000,
        (0..points)
            .map(|i| Point::rgb((i % 4096) as u16, 0x0800, 255, 0, 0))
            .collect(),
    )
}

#[test]
fn full_lifecycle_produces_expected_traffic() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let mut device = scripted_device(&traffic);

    device.connect().unwrap();
    assert_eq!(device.state(), ConnectionState::Ready);
    assert_eq!(device.firmware_version(), Some(6));
    assert_eq!(device.name(), Some("Helios 1"));

    assert_eq!(device.get_status().unwrap(), DeviceStatus::Ready);
    device.send_frame(&scanline(500)).unwrap();
    device.stop().unwrap();
    device.close().unwrap();
    assert_eq!(device.state(), ConnectionState::Closed);

    let traffic = traffic.lock().unwrap();
    assert_eq!(traffic.bulk.len(), 1);
    // Explicit stop plus the one issued by close
    assert_eq!(traffic.stops(), 2);

    // 500 points at 7 bytes each plus the 5-byte trailer
    let sent = &traffic.bulk[0];
    assert_eq!(sent.len(), 3505);
    assert_eq!(&sent[3500..], &[0x30, 0x75, 0xF4, 0x01, 0x00]);
}

#[test]
fn status_poll_waits_through_busy_answers() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let transport = ScriptedTransport::new(Arc::clone(&traffic)).with_busy_per_frame(7);
    let mut device = Device::with_config(transport, test_config());
    device.connect().unwrap();

    assert_eq!(device.get_status().unwrap(), DeviceStatus::Ready);
    assert_eq!(traffic.lock().unwrap().status_polls, 8);
}

#[test]
fn status_poll_exhaustion_reports_not_ready() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let mut transport = ScriptedTransport::new(Arc::clone(&traffic));
    transport.never_ready = true;
    let config = test_config().with_status_attempts(16);
    let mut device = Device::with_config(transport, config);
    device.connect().unwrap();

    assert_eq!(device.get_status().unwrap(), DeviceStatus::NotReady);
    assert_eq!(traffic.lock().unwrap().status_polls, 16);
}

#[test]
fn oversized_frame_is_rejected_before_any_transfer() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let mut device = scripted_device(&traffic);
    device.connect().unwrap();

    assert!(device.send_frame(&scanline(4097)).is_err());
    assert!(traffic.lock().unwrap().bulk.is_empty());

    // The session is still usable
    device.send_frame(&scanline(1)).unwrap();
    assert_eq!(traffic.lock().unwrap().bulk.len(), 1);
}

#[test]
fn double_close_stops_exactly_once() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let mut device = scripted_device(&traffic);
    device.connect().unwrap();

    device.close().unwrap();
    device.close().unwrap();
    assert_eq!(traffic.lock().unwrap().stops(), 1);
}

#[test]
fn playback_loop_streams_until_producer_ends() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let transport = ScriptedTransport::new(Arc::clone(&traffic)).with_busy_per_frame(2);
    let mut device = Device::with_config(transport, test_config());
    device.connect().unwrap();

    let control = PlaybackControl::new();
    control.arm();
    let mut playback = PlaybackLoop::new(device, control)
        .with_poll_backoff(Duration::from_micros(10));

    let frame = scanline(100).with_flags(FrameFlags {
        start_immediately: false,
        single_shot: false,
    });
    let mut remaining = 5;
    let exit = playback
        .run(|device| {
            device.send_frame(&frame)?;
            remaining -= 1;
            Ok(if remaining > 0 {
                ProducerResult::Continue
            } else {
                ProducerResult::End
            })
        })
        .unwrap();

    assert_eq!(exit, RunExit::ProducerEnded);
    assert_eq!(traffic.lock().unwrap().bulk.len(), 5);

    playback.close().unwrap();
    let device = playback.into_device();
    assert_eq!(device.state(), ConnectionState::Closed);
}

#[test]
fn playback_loop_stop_request_ends_the_run() {
    let traffic = Arc::new(Mutex::new(Traffic::default()));
    let mut device = scripted_device(&traffic);
    device.connect().unwrap();

    let control = PlaybackControl::new();
    control.arm();
    let mut playback = PlaybackLoop::new(device, control.clone());

    let frame = scanline(10);
    let exit = playback
        .run(|device| {
            device.send_frame(&frame)?;
            // Ask for a stop from inside the producer; the loop honors
            // it on its next iteration.
            control.stop();
            Ok(ProducerResult::Continue)
        })
        .unwrap();

    assert_eq!(exit, RunExit::Stopped);
    assert_eq!(traffic.lock().unwrap().bulk.len(), 1);
}
