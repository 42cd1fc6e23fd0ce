//! # Acquisition Loop
//!
//! Drives the sensor board at the pace the board sets. Each iteration polls the board, and either
//! waits as long as the board asks, or reads the waiting frame into the frame queue.
//!
//! When the frame queue is full the board is not polled at all: frames stay on the board (where
//! they may be dropped) rather than overwriting frames the converter has not processed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::tof::{PollStatus, RawFrame};
use log::{debug, info, warn};

use crate::{config::RuntimeConfig, ring_buf::Producer, spi_driver::TofBus};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Wait before checking again when the frame queue is full.
const QUEUE_FULL_SLEEP: Duration = Duration::from_millis(250);

/// Wait after a failed poll.
const POLL_ERROR_SLEEP: Duration = Duration::from_secs(2);

/// Wait after a frame transfer, so that the bus isn't hammered.
const POST_READ_SLEEP: Duration = Duration::from_millis(1);

/// Longest single sleep between two checks of the shutdown flag.
const SHUTDOWN_CHECK_PERIOD: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct AcqLoop<B> {
    bus: B,
    frames: Producer<RawFrame>,
    config: Arc<RuntimeConfig>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Outcome of a single iteration of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqStep {
    /// The frame queue is full, the board was not polled.
    QueueFull,

    /// The poll failed or returned garbage.
    PollFailed,

    /// The board asked for the given number of milliseconds before the next poll.
    Wait(u8),

    /// A frame was read and published.
    Published,

    /// The board had a frame but reading it failed, the frame is lost.
    ReadFailed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AcqStep {
    /// How long to sleep before the next iteration.
    pub fn sleep_duration(&self) -> Duration {
        match self {
            AcqStep::QueueFull => QUEUE_FULL_SLEEP,
            AcqStep::PollFailed => POLL_ERROR_SLEEP,
            AcqStep::Wait(ms) => Duration::from_millis(*ms as u64),
            AcqStep::Published | AcqStep::ReadFailed => POST_READ_SLEEP,
        }
    }
}

impl<B: TofBus> AcqLoop<B> {
    pub fn new(bus: B, frames: Producer<RawFrame>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            bus,
            frames,
            config,
        }
    }

    /// Run until shutdown is requested, then release the bus.
    pub fn run(mut self) {
        info!("Acquisition loop started");

        while !self.config.shutdown_requested() {
            let step = self.step();
            self.sleep(step.sleep_duration());
        }

        self.bus.close();
        info!("Acquisition loop stopped");
    }

    /// Perform one iteration of the loop without sleeping.
    pub fn step(&mut self) -> AcqStep {
        if let Some(sensor_idx) = self.config.take_calib_bus_request() {
            if let Err(e) = self.bus.send_calibration_offset(sensor_idx) {
                warn!("Could not send the calibration command: {}", e);
            }
        }

        if self.frames.is_full() {
            warn!("Frame queue full, not polling the sensor board");
            return AcqStep::QueueFull;
        }

        let debug_id = self.config.debug_id();

        match self.bus.poll_availability(debug_id) {
            Ok(PollStatus::Ready) => (),
            Ok(PollStatus::MultipleElapsed) => {
                warn!("Sensor board skipped frames that were never read")
            }
            Ok(PollStatus::RemoteOverflow) => warn!("Sensor board frame buffer overflowed"),
            Ok(PollStatus::Wait(ms)) => return AcqStep::Wait(ms),
            Err(e) => {
                warn!("Polling the sensor board failed: {}", e);
                return AcqStep::PollFailed;
            }
        }

        let frame = match self.bus.read_frame(debug_id, self.config.verbose()) {
            Ok(f) => f,
            Err(e) => {
                warn!("Reading a frame failed, it is dropped: {}", e);
                return AcqStep::ReadFailed;
            }
        };

        debug!("Frame from sensor {} read", frame.sensor_idx);

        // There is only one producer and the queue wasn't full above, so there is space
        match self.frames.push(frame) {
            Ok(()) => AcqStep::Published,
            Err(_) => AcqStep::QueueFull,
        }
    }

    /// Sleep, waking early if shutdown is requested.
    fn sleep(&self, duration: Duration) {
        let end = Instant::now() + duration;

        loop {
            let now = Instant::now();
            if now >= end || self.config.shutdown_requested() {
                break;
            }
            thread::sleep((end - now).min(SHUTDOWN_CHECK_PERIOD));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ring_buf::{ring_buf, RingBufError},
        spi_driver::{mock::MockSpi, TofSpi},
    };
    use comms_if::eqpt::tof::{poll_response, RobotPose, FRAME_LEN, POLL_LEN};

    fn frame_bytes(sensor_idx: u8) -> Vec<u8> {
        RawFrame::new(sensor_idx, RobotPose::default()).to_bytes()
    }

    #[test]
    fn test_poll_outcomes() -> Result<(), RingBufError> {
        let spi = MockSpi::new();
        let (tx, mut rx) = ring_buf(16)?;
        let config = Arc::new(RuntimeConfig::default());
        let mut acq = AcqLoop::new(TofSpi::new(spi.clone()), tx, config);

        spi.inject_response(&poll_response(30));
        assert_eq!(acq.step(), AcqStep::Wait(30));
        assert_eq!(acq.step().sleep_duration(), POLL_ERROR_SLEEP);

        spi.inject_response(&poll_response(254));
        spi.inject_response(&frame_bytes(2));
        assert_eq!(acq.step(), AcqStep::Published);
        assert_eq!(rx.pop().map(|f| f.sensor_idx), Some(2));

        // A stale frame is dropped rather than published
        let mut stale = RawFrame::new(1, RobotPose::default());
        stale.status = 0;
        spi.inject_response(&poll_response(255));
        spi.inject_response(&stale.to_bytes());
        assert_eq!(acq.step(), AcqStep::ReadFailed);
        assert!(rx.is_empty());

        Ok(())
    }

    #[test]
    fn test_back_pressure() -> Result<(), RingBufError> {
        let spi = MockSpi::new();
        let (tx, mut rx) = ring_buf(16)?;
        let config = Arc::new(RuntimeConfig::default());
        let mut acq = AcqLoop::new(TofSpi::new(spi.clone()), tx, config);

        for i in 0..15 {
            spi.inject_response(&poll_response(255));
            spi.inject_response(&frame_bytes(i % 4));
            assert_eq!(acq.step(), AcqStep::Published);
        }

        // Full: the board must not even be polled
        spi.inject_response(&poll_response(255));
        spi.inject_response(&frame_bytes(3));
        let n_written = spi.written().len();
        assert_eq!(acq.step(), AcqStep::QueueFull);
        assert_eq!(acq.step().sleep_duration(), QUEUE_FULL_SLEEP);
        assert_eq!(spi.written().len(), n_written);
        assert_eq!(spi.pending_responses(), 2);

        // Once the consumer makes room the waiting frame is read
        assert_eq!(rx.pop().map(|f| f.sensor_idx), Some(0));
        assert_eq!(acq.step(), AcqStep::Published);
        assert_eq!(rx.len(), 15);

        let written = spi.written();
        assert_eq!(written[written.len() - 2].len(), POLL_LEN);
        assert_eq!(written[written.len() - 1].len(), FRAME_LEN);

        Ok(())
    }

    #[test]
    fn test_calibration_request() -> Result<(), RingBufError> {
        let spi = MockSpi::new();
        let (tx, _rx) = ring_buf(4)?;
        let config = Arc::new(RuntimeConfig::default());
        let mut acq = AcqLoop::new(TofSpi::new(spi.clone()), tx, config.clone());

        config.increment_debug_id();
        assert!(config.trigger_calibration(1).is_ok());

        // The command is write-only, the scripted response belongs to the poll after it
        spi.inject_response(&poll_response(100));
        assert_eq!(acq.step(), AcqStep::Wait(100));

        let written = spi.written();
        assert_eq!(written[0], vec![0xE7, 0xF5, 0x0F, 0xCA, 1]);
        assert_eq!(written[1], vec![0, 0, 0, 0, 1]);

        // Sent once only
        spi.inject_response(&poll_response(100));
        acq.step();
        assert_eq!(spi.written().len(), 3);

        Ok(())
    }

    #[test]
    fn test_run_until_shutdown() -> Result<(), RingBufError> {
        let spi = MockSpi::new();
        let (tx, mut rx) = ring_buf(16)?;
        let config = Arc::new(RuntimeConfig::default());
        let acq = AcqLoop::new(TofSpi::new(spi.clone()), tx, config.clone());

        spi.inject_response(&poll_response(255));
        spi.inject_response(&frame_bytes(0));

        let handle = thread::spawn(move || acq.run());

        let start = Instant::now();
        while rx.is_empty() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(rx.pop().map(|f| f.sensor_idx), Some(0));

        // The loop is now backing off after failed polls, shutdown must still be prompt
        config.request_shutdown();
        let start = Instant::now();
        assert!(handle.join().is_ok());
        assert!(start.elapsed() < Duration::from_secs(1));

        Ok(())
    }
}
