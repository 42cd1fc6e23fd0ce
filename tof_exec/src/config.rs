//! # Runtime Configuration
//!
//! Settings the operator can change while the pipeline runs. They are shared between the
//! operator's thread and the pipeline threads as atomics, each one read at most once per loop
//! iteration.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    convert::TryFrom,
    sync::atomic::{AtomicBool, AtomicI8, AtomicU8, Ordering},
};

use comms_if::eqpt::tof::NUM_SENSORS;
use log::info;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of a sensor index atomic meaning no sensor.
const NO_SENSOR: i8 = -1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct RuntimeConfig {
    raw_passthrough: AtomicI8,
    pointcloud_mode: AtomicU8,
    verbose: AtomicBool,
    debug_id: AtomicU8,

    /// Calibration command waiting to be sent on the bus.
    calib_bus_request: AtomicI8,

    /// Calibration waiting to be picked up by the converter.
    calib_feedback_request: AtomicI8,

    shutdown: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which point cloud, if any, is computed for each scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointcloudMode {
    Off,

    /// Points relative to the robot origin.
    RobotFrame,

    /// Points relative to the robot origin, translated by the robot's position.
    WorldFrame,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No sensor with index {0}")]
    InvalidSensorIdx(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PointcloudMode {
    /// Off, then robot frame, then world frame, then off again.
    pub fn next(self) -> Self {
        match self {
            PointcloudMode::Off => PointcloudMode::RobotFrame,
            PointcloudMode::RobotFrame => PointcloudMode::WorldFrame,
            PointcloudMode::WorldFrame => PointcloudMode::Off,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            PointcloudMode::Off => 0,
            PointcloudMode::RobotFrame => 1,
            PointcloudMode::WorldFrame => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PointcloudMode::RobotFrame,
            2 => PointcloudMode::WorldFrame,
            _ => PointcloudMode::Off,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(PointcloudMode::RobotFrame)
    }
}

impl RuntimeConfig {
    pub fn new(pointcloud_mode: PointcloudMode) -> Self {
        Self {
            raw_passthrough: AtomicI8::new(NO_SENSOR),
            pointcloud_mode: AtomicU8::new(pointcloud_mode.to_u8()),
            verbose: AtomicBool::new(false),
            debug_id: AtomicU8::new(0),
            calib_bus_request: AtomicI8::new(NO_SENSOR),
            calib_feedback_request: AtomicI8::new(NO_SENSOR),
            shutdown: AtomicBool::new(false),
        }
    }

    // ---- RAW PASSTHROUGH ----

    /// Select which sensor's raw depth image is copied into scans.
    pub fn set_raw_passthrough_sensor(&self, sensor_idx: Option<u8>) -> Result<(), ConfigError> {
        let v = match sensor_idx {
            Some(i) => sensor_to_i8(i)?,
            None => NO_SENSOR,
        };

        self.raw_passthrough.store(v, Ordering::Release);
        Ok(())
    }

    pub fn raw_passthrough_sensor(&self) -> Option<u8> {
        i8_to_sensor(self.raw_passthrough.load(Ordering::Acquire))
    }

    /// Move the raw passthrough selection up or down within none, 0, 1, 2, 3, stopping at either
    /// end. Returns the new selection.
    pub fn step_raw_passthrough(&self, step: i8) -> Option<u8> {
        let max = NUM_SENSORS as i8 - 1;

        // Only the operator's thread writes this value
        let cur = self.raw_passthrough.load(Ordering::Acquire);
        let new = cur.saturating_add(step).max(NO_SENSOR).min(max);
        self.raw_passthrough.store(new, Ordering::Release);

        info!("Raw depth passthrough from sensor {:?}", i8_to_sensor(new));
        i8_to_sensor(new)
    }

    // ---- POINT CLOUD MODE ----

    pub fn set_pointcloud_mode(&self, mode: PointcloudMode) {
        self.pointcloud_mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn pointcloud_mode(&self) -> PointcloudMode {
        PointcloudMode::from_u8(self.pointcloud_mode.load(Ordering::Acquire))
    }

    pub fn cycle_pointcloud_mode(&self) -> PointcloudMode {
        let mode = self.pointcloud_mode().next();
        self.set_pointcloud_mode(mode);

        info!("Point cloud mode: {:?}", mode);
        mode
    }

    // ---- VERBOSE DIAGNOSTICS ----

    /// Returns the new state.
    pub fn toggle_verbose_diagnostics(&self) -> bool {
        let verbose = !self.verbose.fetch_xor(true, Ordering::AcqRel);

        info!("Verbose frame diagnostics {}", if verbose { "on" } else { "off" });
        verbose
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Acquire)
    }

    // ---- DEBUG ID ----

    pub fn increment_debug_id(&self) -> u8 {
        let id = self.debug_id.load(Ordering::Acquire).wrapping_add(1);
        self.debug_id.store(id, Ordering::Release);

        info!("Sensor board debug id = {}", id);
        id
    }

    /// Decrement the debug id, stopping at 0.
    pub fn decrement_debug_id(&self) -> u8 {
        let id = self.debug_id.load(Ordering::Acquire).saturating_sub(1);
        self.debug_id.store(id, Ordering::Release);

        info!("Sensor board debug id = {}", id);
        id
    }

    pub fn debug_id(&self) -> u8 {
        self.debug_id.load(Ordering::Acquire)
    }

    // ---- CALIBRATION ----

    /// Request an offset self-calibration of a sensor.
    ///
    /// The command is sent by the acquisition loop on its next iteration. A request made before
    /// the previous one was taken replaces it.
    pub fn trigger_calibration(&self, sensor_idx: u8) -> Result<(), ConfigError> {
        let v = sensor_to_i8(sensor_idx)?;

        self.calib_feedback_request.store(v, Ordering::Release);
        self.calib_bus_request.store(v, Ordering::Release);
        Ok(())
    }

    /// Take the pending calibration command, if any.
    pub fn take_calib_bus_request(&self) -> Option<u8> {
        i8_to_sensor(self.calib_bus_request.swap(NO_SENSOR, Ordering::AcqRel))
    }

    /// Take the pending calibration for the converter, if any.
    pub fn take_calib_feedback_request(&self) -> Option<u8> {
        i8_to_sensor(self.calib_feedback_request.swap(NO_SENSOR, Ordering::AcqRel))
    }

    // ---- SHUTDOWN ----

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn sensor_to_i8(sensor_idx: u8) -> Result<i8, ConfigError> {
    if (sensor_idx as usize) < NUM_SENSORS {
        Ok(sensor_idx as i8)
    } else {
        Err(ConfigError::InvalidSensorIdx(sensor_idx))
    }
}

fn i8_to_sensor(v: i8) -> Option<u8> {
    u8::try_from(v).ok()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
