//! # Sensor Mounts
//!
//! Where each of the four sensors sits on the robot and how it is rotated. The mount mode selects
//! which calibration axis is horizontal once mounted, and their signs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use comms_if::eqpt::tof::NUM_SENSORS;

use crate::params::MountParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pose of one sensor relative to the robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorMount {
    pub mode: MountMode,

    /// Position relative to the robot origin.
    ///
    /// Units: millimeters
    pub x: f64,
    pub y: f64,

    /// Heading relative to the robot.
    ///
    /// Units: radians
    pub heading: f64,

    /// Tilt relative to the ground.
    ///
    /// Units: radians
    pub vertical: f64,

    /// Height above the ground.
    ///
    /// Units: millimeters
    pub z: f64,
}

/// The mounts of all sensors, indexed by sensor index.
#[derive(Debug, Clone, PartialEq)]
pub struct MountTable {
    mounts: [SensorMount; NUM_SENSORS],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The four ways a sensor can be fixed to the chassis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    /// Mode 1, on its side with the calibration's vertical axis horizontal.
    SideLeft,

    /// Mode 2, on its other side.
    SideRight,

    /// Mode 3, the orientation the lens was calibrated in.
    Upright,

    /// Mode 4, upside down.
    UpsideDown,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MountError {
    #[error("Unknown mount mode {0}, expected 1, 2, 3 or 4")]
    UnknownMode(u8),

    #[error("Expected {} sensor mounts, found {0}", NUM_SENSORS)]
    WrongSensorCount(usize),

    #[error("No sensor with index {0}")]
    InvalidSensorIdx(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TryFrom<u8> for MountMode {
    type Error = MountError;

    fn try_from(mode: u8) -> Result<Self, Self::Error> {
        match mode {
            1 => Ok(MountMode::SideLeft),
            2 => Ok(MountMode::SideRight),
            3 => Ok(MountMode::Upright),
            4 => Ok(MountMode::UpsideDown),
            m => Err(MountError::UnknownMode(m)),
        }
    }
}

impl MountMode {
    /// Map calibration angles `(x_ang, y_ang)` to `(horizontal, vertical)` angles of the mounted
    /// sensor.
    #[inline]
    pub fn lookup(self, x_ang: f32, y_ang: f32) -> (f32, f32) {
        match self {
            MountMode::SideLeft => (-y_ang, x_ang),
            MountMode::SideRight => (y_ang, -x_ang),
            MountMode::Upright => (-x_ang, y_ang),
            MountMode::UpsideDown => (x_ang, -y_ang),
        }
    }
}

impl TryFrom<&MountParams> for SensorMount {
    type Error = MountError;

    fn try_from(p: &MountParams) -> Result<Self, Self::Error> {
        Ok(Self {
            mode: MountMode::try_from(p.mode)?,
            x: p.x_mm,
            y: p.y_mm,
            heading: p.heading_deg.to_radians(),
            vertical: p.vertical_deg.to_radians(),
            z: p.height_mm,
        })
    }
}

impl Default for MountTable {
    /// The robot's sensors: left rear, right rear, right front, left front.
    fn default() -> Self {
        let m = |mode, x, y, heading_deg: f64, z| SensorMount {
            mode,
            x,
            y,
            heading: heading_deg.to_radians(),
            vertical: 0.0,
            z,
        };

        Self {
            mounts: [
                m(MountMode::SideRight, -276.0, -233.0, 90.0, 227.0),
                m(MountMode::SideLeft, -276.0, 233.0, 270.0, 227.0),
                m(MountMode::SideRight, 154.0, 164.0, 0.0, 228.0),
                m(MountMode::SideLeft, 154.0, -164.0, 0.0, 228.0),
            ],
        }
    }
}

impl MountTable {
    /// Build the table from parameters, or use the built-in one if there are none.
    pub fn from_params(params: Option<&[MountParams]>) -> Result<Self, MountError> {
        let params = match params {
            Some(p) => p,
            None => return Ok(Self::default()),
        };

        if params.len() != NUM_SENSORS {
            return Err(MountError::WrongSensorCount(params.len()));
        }

        let mut table = Self::default();
        for (mount, p) in table.mounts.iter_mut().zip(params) {
            *mount = SensorMount::try_from(p)?;
        }

        Ok(table)
    }

    pub fn get(&self, sensor_idx: u8) -> Result<&SensorMount, MountError> {
        self.mounts
            .get(sensor_idx as usize)
            .ok_or(MountError::InvalidSensorIdx(sensor_idx))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
