//! Consumers of the frames captured while a sensor runs its offset self-calibration.

use log::info;

use super::scan::Point;

/// Receives the projected frames of a sensor being calibrated.
pub trait CalibFeedback: Send {
    /// Called for each captured frame of the calibrated sensor, `frame_num` counting from 0.
    fn frame(&mut self, sensor_idx: u8, frame_num: u32, points: &[Point], mean_range_mm: f64);

    /// Called once the requested number of frames has been captured.
    fn complete(&mut self, _sensor_idx: u8) {}
}

/// Logs a summary of each captured frame.
#[derive(Debug, Default)]
pub struct LogFeedback;

impl CalibFeedback for LogFeedback {
    fn frame(&mut self, sensor_idx: u8, frame_num: u32, points: &[Point], mean_range_mm: f64) {
        info!(
            "Calibration of sensor {}, frame {}: {} points, mean range {:.0} mm",
            sensor_idx,
            frame_num,
            points.len(),
            mean_range_mm
        );
    }

    fn complete(&mut self, sensor_idx: u8) {
        info!("Calibration feedback of sensor {} complete", sensor_idx);
    }
}
