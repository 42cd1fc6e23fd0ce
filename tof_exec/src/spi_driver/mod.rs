//! # SPI Driver Module
//!
//! Speaks the polling protocol of the ToF sensor board. The board decides when frames are imaged,
//! so the driver never just reads a frame: it first polls availability with a short transfer and
//! only performs a full frame transfer when the board reports one is waiting. Reading without a
//! frame being available returns an old frame, or a torn mix of two frames.
//!
//! [`TofSpi`] works over any `embedded-hal` blocking SPI implementation, see [`spidev`] for the
//! Linux spidev backed bus.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Linux spidev bus used on the robot.
pub mod spidev;

#[cfg(test)]
pub(crate) mod mock;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Debug;

use comms_if::eqpt::tof::{
    frame_request, parse_poll_response, poll_request, CalibOffsetCmd, PollStatus, RawFrame,
    WireError, NUM_DBG_VALUES,
};
use embedded_hal::blocking::spi::{Transfer, Write};
use log::{debug, info};
use util::maths::ang32_to_deg;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The operations the acquisition loop needs from the bus to the sensor board.
pub trait TofBus {
    /// Ask the board whether a frame is ready, and if not how long to wait.
    fn poll_availability(&mut self, debug_id: u8) -> Result<PollStatus, TofSpiError>;

    /// Read one full frame. Only valid after a poll reported a frame as available.
    ///
    /// When `verbose` is set the frame's timing and debug data is logged.
    fn read_frame(&mut self, debug_id: u8, verbose: bool) -> Result<RawFrame, TofSpiError>;

    /// Ask the board to run an offset self-calibration of one sensor. No acknowledgement is
    /// expected.
    fn send_calibration_offset(&mut self, sensor_idx: u8) -> Result<(), TofSpiError>;

    /// Release the bus.
    fn close(self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Driver for the sensor board over an SPI bus.
pub struct TofSpi<SPI> {
    spi: SPI,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`TofSpi`] driver.
#[derive(Debug, thiserror::Error)]
pub enum TofSpiError {
    #[error("The SPI device is unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("SPI transfer failed: {0}")]
    TransferFailure(String),

    #[error("Unexpected data from the sensor board: {0}")]
    ProtocolViolation(WireError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<SPI> TofSpi<SPI> {
    /// Wrap an already configured bus (mode 0, 8 bits per word).
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }
}

impl<SPI, E> TofBus for TofSpi<SPI>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    E: Debug,
{
    fn poll_availability(&mut self, debug_id: u8) -> Result<PollStatus, TofSpiError> {
        let mut buf = poll_request(debug_id);

        self.spi
            .transfer(&mut buf)
            .map_err(|e| TofSpiError::TransferFailure(format!("{:?}", e)))?;

        parse_poll_response(&buf).map_err(TofSpiError::ProtocolViolation)
    }

    fn read_frame(&mut self, debug_id: u8, verbose: bool) -> Result<RawFrame, TofSpiError> {
        let mut buf = frame_request(debug_id);

        self.spi
            .transfer(&mut buf)
            .map_err(|e| TofSpiError::TransferFailure(format!("{:?}", e)))?;

        let frame = RawFrame::from_bytes(&buf).map_err(TofSpiError::ProtocolViolation)?;

        if verbose {
            log_frame_diagnostics(&frame);
        }

        // The status inside the frame tells us if we've read a frame the board didn't have ready
        match PollStatus::from_status_byte(frame.status) {
            Ok(s) if s.frame_available() => Ok(frame),
            _ => Err(TofSpiError::ProtocolViolation(WireError::StaleFrame(
                frame.status,
            ))),
        }
    }

    fn send_calibration_offset(&mut self, sensor_idx: u8) -> Result<(), TofSpiError> {
        info!("Requesting offset calibration of sensor {}", sensor_idx);

        self.spi
            .write(&CalibOffsetCmd { sensor_idx }.to_bytes())
            .map_err(|e| TofSpiError::TransferFailure(format!("{:?}", e)))
    }

    fn close(self) {
        // The device handle is closed when the bus is dropped
        drop(self.spi);
        debug!("SPI device released");
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn log_frame_diagnostics(frame: &RawFrame) {
    info!(
        "Frame (sensor_idx = {}) read ok, pose = ({}, {}, {:.1} deg)",
        frame.sensor_idx,
        frame.robot_pose.x,
        frame.robot_pose.y,
        ang32_to_deg(frame.robot_pose.ang)
    );

    let stamps: Vec<String> = frame
        .timestamps
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}:{:.1}", i, *t as f64 / 10.0))
        .collect();
    info!("    Timestamps (ms): {}", stamps.join(" "));

    let deltas: Vec<String> = frame
        .timestamp_deltas_ms()
        .iter()
        .enumerate()
        .map(|(i, d)| format!(">{}:{:.1}", i + 1, d))
        .collect();
    info!("    Deltas (ms): {}", deltas.join(" "));

    let dbg: Vec<String> = (0..NUM_DBG_VALUES)
        .map(|i| format!("[{}] {:11}", i, frame.dbg_i32[i]))
        .collect();
    info!("    Debug: {}", dbg.join("  "));
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
