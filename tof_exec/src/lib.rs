//! # ToF library.
//!
//! Acquisition and point cloud pipeline for the robot's four time-of-flight sensors. Exposed as a
//! library so that benches and other crates in the workspace can use its items.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Acquisition loop - polls the sensor board and reads frames into the frame queue
pub mod acq;

/// Calibration - builds the per-pixel angle tables from the measured lens calibration
pub mod calib;

/// Cloud conversion - denoises frames, projects them into points and assembles scans
pub mod cloud;

/// Runtime configuration shared between the operator and the pipeline threads
pub mod config;

/// Sensor mount geometry
pub mod mount;

/// Parameters of the ToF executable
pub mod params;

/// Pipeline - starts and owns the acquisition and conversion threads
pub mod pipeline;

/// Single producer, single consumer queues
pub mod ring_buf;

/// SPI driver - speaks the sensor board's polling protocol
pub mod spi_driver;
