//! Point cloud scans, the output of the converter.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::tof::{RobotPose, NUM_SENSORS, TOF_PIXELS};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Most points a scan can hold, one per pixel of every sensor.
pub const MAX_POINTS: usize = NUM_SENSORS * TOF_PIXELS;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point in space.
///
/// Units: millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// The raw depth image of one sensor, kept in a scan for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDepth {
    pub sensor_idx: u8,
    pub depth: Vec<u16>,
}

/// One full sweep of all sensors.
#[derive(Debug, Clone)]
pub struct Scan {
    /// Number of this scan among the published ones, starting at 0.
    pub seq: u64,

    /// Time the scan was completed.
    pub timestamp: DateTime<Utc>,

    /// Robot pose as reported with the reference sensor's frame.
    pub robot_pose: RobotPose,

    /// Raw depth image of the selected passthrough sensor, if any.
    pub raw_depth: Option<RawDepth>,

    /// Amplitude image of each sensor, indexed by sensor index.
    pub ampl_images: Vec<Vec<u8>>,

    /// At most [`MAX_POINTS`] points.
    pub points: Vec<Point>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Scan {
    pub fn new() -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            robot_pose: RobotPose::default(),
            raw_depth: None,
            ampl_images: vec![vec![0; TOF_PIXELS]; NUM_SENSORS],
            points: Vec::with_capacity(MAX_POINTS),
        }
    }

    /// Clear the scan for reuse, keeping its allocations.
    pub fn reset(&mut self) {
        self.robot_pose = RobotPose::default();
        self.raw_depth = None;
        self.points.clear();
        for img in self.ampl_images.iter_mut() {
            img.iter_mut().for_each(|a| *a = 0);
        }
    }
}

impl Default for Scan {
    fn default() -> Self {
        Self::new()
    }
}
