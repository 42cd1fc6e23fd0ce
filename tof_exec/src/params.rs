//! # ToF Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the ToF executable, normally loaded from `params/tof_exec.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TofExecParams {
    /// The bus the sensor board is connected to.
    pub spi: SpiParams,

    /// Write every completed scan's point cloud into the session archive.
    pub save_clouds: bool,

    /// Number of frames of the calibrated sensor handed to the calibration feedback after an
    /// offset calibration is requested.
    pub calib_feedback_frames: u32,

    /// Overrides the built-in sensor mount table. Must contain exactly one entry per sensor, in
    /// sensor index order.
    pub mounts: Option<Vec<MountParams>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpiParams {
    /// SPI bus number, i.e. the `X` in `/dev/spidevX.Y`.
    pub bus: u8,

    /// Slave select line, i.e. the `Y` in `/dev/spidevX.Y`.
    pub slave_select: u8,

    /// Units: hertz
    pub clock_hz: u32,
}

/// Where and how a single sensor is mounted on the robot.
#[derive(Debug, Clone, Deserialize)]
pub struct MountParams {
    /// Orientation of the sensor, one of 1, 2, 3 or 4.
    pub mode: u8,

    /// Position of the sensor relative to the robot origin.
    ///
    /// Units: millimeters
    pub x_mm: f64,
    pub y_mm: f64,

    /// Heading of the sensor relative to the robot.
    ///
    /// Units: degrees
    pub heading_deg: f64,

    /// Vertical tilt of the sensor relative to the ground.
    ///
    /// Units: degrees
    pub vertical_deg: f64,

    /// Units: millimeters
    pub height_mm: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TofExecParams {
    fn default() -> Self {
        Self {
            spi: SpiParams::default(),
            save_clouds: false,
            calib_feedback_frames: 10,
            mounts: None,
        }
    }
}

impl Default for SpiParams {
    fn default() -> Self {
        Self {
            bus: 0,
            slave_select: 0,
            clock_hz: 32_000_000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() -> Result<(), util::params::LoadError> {
        let params: TofExecParams = util::params::from_str("")?;

        assert_eq!(params.spi.bus, 0);
        assert_eq!(params.spi.clock_hz, 32_000_000);
        assert!(!params.save_clouds);
        assert!(params.mounts.is_none());

        Ok(())
    }

    #[test]
    fn test_mount_override() -> Result<(), util::params::LoadError> {
        let params: TofExecParams = util::params::from_str(
            r#"
            save_clouds = true

            [spi]
            clock_hz = 16000000

            [[mounts]]
            mode = 3
            x_mm = 10.0
            y_mm = -10.0
            heading_deg = 45.0
            vertical_deg = -5.0
            height_mm = 300.0
            "#,
        )?;

        assert!(params.save_clouds);
        assert_eq!(params.spi.clock_hz, 16_000_000);
        assert_eq!(params.spi.slave_select, 0);

        let mounts = params.mounts.unwrap_or_default();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mode, 3);
        assert_eq!(mounts[0].heading_deg, 45.0);

        Ok(())
    }
}
