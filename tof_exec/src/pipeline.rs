//! # Pipeline
//!
//! Owns the acquisition and converter threads and the queues between them, and is the interface
//! the rest of the executable uses: completed scans are pulled with
//! [`TofPipeline::try_get_completed_scan`] and the runtime settings are changed through the
//! setters.
//!
//! ```text
//! AcqLoop --frames (16 slots)--> CloudConverter --scans (32 slots)--> consumer
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};

use comms_if::tc::TofTc;
use log::{info, warn};

use crate::{
    acq::AcqLoop,
    calib::{AngleTables, CalibError},
    cloud::{scan::Scan, CloudConverter},
    config::{ConfigError, PointcloudMode, RuntimeConfig},
    mount::{MountError, MountTable},
    params::TofExecParams,
    ring_buf::{ring_buf, Consumer, RingBufError},
    spi_driver::{TofBus, TofSpiError},
};

#[cfg(feature = "calib_feedback")]
use crate::cloud::feedback::LogFeedback;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Slots in the frame queue, which holds one less frame.
pub const FRAME_QUEUE_SLOTS: usize = 16;

/// Slots in the scan queue, which holds one less scan.
pub const SCAN_QUEUE_SLOTS: usize = 32;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TofPipeline {
    config: Arc<RuntimeConfig>,
    scans: Consumer<Scan>,
    scans_dropped: Arc<AtomicU64>,

    acq_handle: Option<JoinHandle<()>>,
    conv_handle: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Could not build the angle tables: {0}")]
    CalibError(#[from] CalibError),

    #[error("Invalid sensor mounts: {0}")]
    MountError(#[from] MountError),

    #[error("Could not create a queue: {0}")]
    RingBufError(#[from] RingBufError),

    #[error("Could not open the sensor board bus: {0}")]
    BusError(#[from] TofSpiError),

    #[error("Could not spawn the {0} thread: {1}")]
    ThreadSpawnError(&'static str, std::io::Error),

    #[error("The {0} thread panicked")]
    ThreadPanicked(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TofPipeline {
    /// Build the angle tables, open the bus and start both threads.
    ///
    /// `open_bus` is run on the acquisition thread, which then owns the bus for its whole life.
    /// Failing to open it is returned here and no thread is left running.
    pub fn start<B, F>(open_bus: F, params: &TofExecParams) -> Result<Self, PipelineError>
    where
        B: TofBus + 'static,
        F: FnOnce() -> Result<B, TofSpiError> + Send + 'static,
    {
        let tables = AngleTables::new()?;
        let mounts = MountTable::from_params(params.mounts.as_deref())?;
        info!("Angle tables built");

        let config = Arc::new(RuntimeConfig::default());
        let (frame_tx, frame_rx) = ring_buf(FRAME_QUEUE_SLOTS)?;
        let (scan_tx, scan_rx) = ring_buf(SCAN_QUEUE_SLOTS)?;

        // ---- ACQUISITION THREAD ----

        let (open_tx, open_rx) = mpsc::sync_channel(1);
        let acq_config = config.clone();

        let acq_handle = thread::Builder::new()
            .name("tof_acq".into())
            .spawn(move || {
                let bus = match open_bus() {
                    Ok(b) => b,
                    Err(e) => {
                        open_tx.send(Err(e)).ok();
                        return;
                    }
                };
                open_tx.send(Ok(())).ok();

                AcqLoop::new(bus, frame_tx, acq_config).run();
            })
            .map_err(|e| PipelineError::ThreadSpawnError("acquisition", e))?;

        match open_rx.recv() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                acq_handle.join().ok();
                return Err(PipelineError::BusError(e));
            }
            Err(_) => return Err(PipelineError::ThreadPanicked("acquisition")),
        }

        // ---- CONVERTER THREAD ----

        let converter = CloudConverter::new(tables, mounts, config.clone(), scan_tx);

        #[cfg(feature = "calib_feedback")]
        let converter =
            converter.with_calib_feedback(Box::new(LogFeedback), params.calib_feedback_frames);

        let scans_dropped = converter.scans_dropped();

        let conv_handle = match thread::Builder::new()
            .name("tof_conv".into())
            .spawn(move || converter.run(frame_rx))
        {
            Ok(h) => h,
            Err(e) => {
                config.request_shutdown();
                acq_handle.join().ok();
                return Err(PipelineError::ThreadSpawnError("converter", e));
            }
        };

        info!("ToF pipeline started");

        Ok(Self {
            config,
            scans: scan_rx,
            scans_dropped,
            acq_handle: Some(acq_handle),
            conv_handle: Some(conv_handle),
        })
    }

    /// Take the oldest completed scan, if any.
    pub fn try_get_completed_scan(&mut self) -> Option<Scan> {
        self.scans.pop()
    }

    /// Number of completed scans dropped because the consumer wasn't keeping up.
    pub fn scans_dropped(&self) -> u64 {
        self.scans_dropped.load(Ordering::Relaxed)
    }

    /// Ask both threads to stop. They finish their current operation first.
    pub fn request_shutdown(&self) {
        self.config.request_shutdown();
    }

    /// Stop both threads and wait for them.
    pub fn join(mut self) -> Result<(), PipelineError> {
        self.stop()
    }

    pub fn set_raw_passthrough_sensor(&self, sensor_idx: Option<u8>) -> Result<(), ConfigError> {
        self.config.set_raw_passthrough_sensor(sensor_idx)
    }

    pub fn step_raw_passthrough(&self, step: i8) -> Option<u8> {
        self.config.step_raw_passthrough(step)
    }

    pub fn set_pointcloud_mode(&self, mode: PointcloudMode) {
        self.config.set_pointcloud_mode(mode)
    }

    pub fn cycle_pointcloud_mode(&self) -> PointcloudMode {
        self.config.cycle_pointcloud_mode()
    }

    pub fn trigger_calibration(&self, sensor_idx: u8) -> Result<(), ConfigError> {
        info!("Offset calibration of sensor {} requested", sensor_idx);
        self.config.trigger_calibration(sensor_idx)
    }

    pub fn toggle_verbose_diagnostics(&self) -> bool {
        self.config.toggle_verbose_diagnostics()
    }

    pub fn increment_debug_id(&self) -> u8 {
        self.config.increment_debug_id()
    }

    pub fn decrement_debug_id(&self) -> u8 {
        self.config.decrement_debug_id()
    }

    /// Apply an operator command.
    ///
    /// Returns `true` if the command asks the executable to quit, in which case shutdown of both
    /// threads has already been requested.
    pub fn handle_tc(&self, tc: TofTc) -> bool {
        match tc {
            TofTc::Quit => {
                info!("Quit command received");
                self.request_shutdown();
                return true;
            }
            TofTc::RawSensorPrev => {
                self.step_raw_passthrough(-1);
            }
            TofTc::RawSensorNext => {
                self.step_raw_passthrough(1);
            }
            TofTc::CalibOffset(idx) => {
                if let Err(e) = self.trigger_calibration(idx) {
                    warn!("Cannot calibrate: {}", e);
                }
            }
            TofTc::ToggleVerbose => {
                self.toggle_verbose_diagnostics();
            }
            TofTc::CyclePointcloudMode => {
                self.cycle_pointcloud_mode();
            }
            TofTc::DebugIdIncr => {
                self.increment_debug_id();
            }
            TofTc::DebugIdDecr => {
                self.decrement_debug_id();
            }
        }

        false
    }

    /// The shared runtime configuration.
    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        self.config.request_shutdown();

        let acq = join_thread("acquisition", self.acq_handle.take());
        let conv = join_thread("converter", self.conv_handle.take());

        acq.and(conv)
    }
}

impl Drop for TofPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn join_thread(name: &'static str, handle: Option<JoinHandle<()>>) -> Result<(), PipelineError> {
    match handle {
        Some(h) => h.join().map_err(|_| PipelineError::ThreadPanicked(name)),
        None => Ok(()),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::spi_driver::{mock::MockSpi, TofSpi};
    use comms_if::eqpt::tof::{poll_response, RawFrame, RobotPose};
    use std::time::{Duration, Instant};

    #[test]
    fn test_end_to_end() -> Result<(), PipelineError> {
        let spi = MockSpi::new();
        let pose = RobotPose {
            ang: 1 << 29,
            x: 100,
            y: 200,
        };

        for idx in 0..4 {
            let mut frame = RawFrame::new(idx, RobotPose::default());
            if idx == 2 {
                frame.robot_pose = pose;
            }
            frame.depth_mut().iter_mut().for_each(|d| *d = 100);

            spi.inject_response(&poll_response(255));
            spi.inject_response(&frame.to_bytes());
        }

        let bus_spi = spi.clone();
        let mut pipeline =
            TofPipeline::start(move || Ok(TofSpi::new(bus_spi)), &TofExecParams::default())?;

        let start = Instant::now();
        let scan = loop {
            if let Some(s) = pipeline.try_get_completed_scan() {
                break Some(s);
            }
            if start.elapsed() > Duration::from_secs(5) {
                break None;
            }
            thread::sleep(Duration::from_millis(5));
        };

        pipeline.join()?;

        let scan = scan.expect("no scan completed");
        assert_eq!(scan.seq, 0);
        assert_eq!(scan.robot_pose, pose);
        assert!(!scan.points.is_empty());

        // Mounts sit 227 or 228 mm above ground and every sample is 100 mm away
        assert!(scan.points.iter().all(|p| p.z >= 127 && p.z <= 328));

        Ok(())
    }

    #[test]
    fn test_handle_tc() -> Result<(), PipelineError> {
        let bus_spi = MockSpi::new();
        let pipeline =
            TofPipeline::start(move || Ok(TofSpi::new(bus_spi)), &TofExecParams::default())?;

        assert!(!pipeline.handle_tc(TofTc::CyclePointcloudMode));
        assert_eq!(pipeline.config().pointcloud_mode(), PointcloudMode::WorldFrame);

        assert!(!pipeline.handle_tc(TofTc::RawSensorNext));
        assert!(!pipeline.handle_tc(TofTc::RawSensorNext));
        assert_eq!(pipeline.config().raw_passthrough_sensor(), Some(1));
        assert!(!pipeline.handle_tc(TofTc::RawSensorPrev));
        assert_eq!(pipeline.config().raw_passthrough_sensor(), Some(0));

        assert!(!pipeline.handle_tc(TofTc::ToggleVerbose));
        assert!(pipeline.config().verbose());

        assert!(!pipeline.handle_tc(TofTc::DebugIdIncr));
        assert!(!pipeline.handle_tc(TofTc::DebugIdIncr));
        assert!(!pipeline.handle_tc(TofTc::DebugIdDecr));
        assert_eq!(pipeline.config().debug_id(), 1);

        // Nothing above stops the threads, only a quit does
        assert!(!pipeline.config().shutdown_requested());
        assert!(pipeline.handle_tc(TofTc::Quit));
        assert!(pipeline.config().shutdown_requested());

        pipeline.join()
    }

    #[test]
    fn test_bus_unavailable() {
        let result = TofPipeline::start(
            || -> Result<TofSpi<MockSpi>, TofSpiError> {
                Err(TofSpiError::DeviceUnavailable("no such device".into()))
            },
            &TofExecParams::default(),
        );

        assert!(matches!(
            result,
            Err(PipelineError::BusError(TofSpiError::DeviceUnavailable(_)))
        ));
    }

    #[test]
    fn test_bad_mounts() {
        let params: TofExecParams = util::params::from_str(
            r#"
            [[mounts]]
            mode = 1
            x_mm = 0.0
            y_mm = 0.0
            heading_deg = 0.0
            vertical_deg = 0.0
            height_mm = 0.0
            "#,
        )
        .expect("params should parse");

        let result = TofPipeline::start(|| Ok(TofSpi::new(MockSpi::new())), &params);
        assert!(matches!(
            result,
            Err(PipelineError::MountError(MountError::WrongSensorCount(1)))
        ));
    }
}
