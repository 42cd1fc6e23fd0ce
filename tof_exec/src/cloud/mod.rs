//! # Cloud Module
//!
//! Turns the stream of raw frames into point cloud scans.
//!
//! The sensors are read round-robin, 0 to 3. A scan starts with a frame from sensor 0 and is
//! published once sensor 3's frame has been added. Any break in the sequence discards the scan
//! in progress, and frames are then ignored until the next frame from sensor 0.
//!
//! If the scan queue is full when a scan completes, the new scan is dropped and counted; scans
//! the consumer has not read yet are never overwritten.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod projection;
pub mod scan;

#[cfg(feature = "calib_feedback")]
pub mod feedback;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use chrono::Utc;
use comms_if::eqpt::tof::{RawFrame, NUM_SENSORS};
use log::{debug, info, warn};

use crate::{
    calib::AngleTables,
    config::{PointcloudMode, RuntimeConfig},
    mount::MountTable,
    ring_buf::{Consumer, Producer},
};
use scan::{RawDepth, Scan};

#[cfg(feature = "calib_feedback")]
use feedback::{CalibFeedback, LogFeedback};
#[cfg(feature = "calib_feedback")]
use scan::Point;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The sensor whose frame sets the scan's robot pose.
const REFERENCE_SENSOR: u8 = 2;

/// Sleep when there is no frame to process.
const EMPTY_QUEUE_SLEEP: Duration = Duration::from_millis(5);

#[cfg(feature = "calib_feedback")]
const DEFAULT_CALIB_FEEDBACK_FRAMES: u32 = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CloudConverter {
    tables: AngleTables,
    mounts: MountTable,
    config: Arc<RuntimeConfig>,

    scans: Producer<Scan>,
    scans_dropped: Arc<AtomicU64>,

    /// The scan in progress.
    scan: Scan,

    /// Sequence number of the next completed scan.
    next_seq: u64,

    prev_idx: Option<u8>,
    synced: bool,

    #[cfg(feature = "calib_feedback")]
    calib: CalibCapture,
}

#[cfg(feature = "calib_feedback")]
struct CalibCapture {
    sink: Box<dyn CalibFeedback>,
    frames_per_run: u32,

    /// Sensor being calibrated and the number of its frames captured so far.
    active: Option<(u8, u32)>,

    points: Vec<Point>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What happened to a frame given to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Added to the scan in progress.
    Added,

    /// Completed the scan, which was published with this sequence number.
    Published(u64),

    /// Completed the scan, which was dropped because the scan queue is full.
    Dropped(u64),

    /// Ignored while waiting for a frame from sensor 0.
    Unsynced,

    /// Used as calibration feedback, or ignored during a calibration.
    #[cfg(feature = "calib_feedback")]
    Calibration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Frame from sensor {0}, which doesn't exist")]
    OutOfRangeSensorIndex(u8),

    #[error("Expected a frame from sensor {expected} but got one from sensor {found}")]
    SynchronizationLoss { expected: u8, found: u8 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CloudConverter {
    pub fn new(
        tables: AngleTables,
        mounts: MountTable,
        config: Arc<RuntimeConfig>,
        scans: Producer<Scan>,
    ) -> Self {
        Self {
            tables,
            mounts,
            config,
            scans,
            scans_dropped: Arc::new(AtomicU64::new(0)),
            scan: Scan::new(),
            next_seq: 0,
            prev_idx: None,
            synced: false,
            #[cfg(feature = "calib_feedback")]
            calib: CalibCapture {
                sink: Box::new(LogFeedback),
                frames_per_run: DEFAULT_CALIB_FEEDBACK_FRAMES,
                active: None,
                points: Vec::new(),
            },
        }
    }

    /// Send the frames captured during calibrations to the given sink, `frames_per_run` frames
    /// per calibration.
    #[cfg(feature = "calib_feedback")]
    pub fn with_calib_feedback(
        mut self,
        sink: Box<dyn CalibFeedback>,
        frames_per_run: u32,
    ) -> Self {
        self.calib.sink = sink;
        self.calib.frames_per_run = frames_per_run;
        self
    }

    /// Counter of the scans dropped because the scan queue was full.
    pub fn scans_dropped(&self) -> Arc<AtomicU64> {
        self.scans_dropped.clone()
    }

    /// Process frames until shutdown is requested.
    pub fn run(mut self, mut frames: Consumer<RawFrame>) {
        info!("Converter started");

        while !self.config.shutdown_requested() {
            let frame = match frames.pop() {
                Some(f) => f,
                None => {
                    thread::sleep(EMPTY_QUEUE_SLEEP);
                    continue;
                }
            };

            match self.process_frame(&frame) {
                Ok(FrameOutcome::Published(seq)) => debug!("Scan {} published", seq),
                Ok(_) => (),
                Err(e) => warn!("Frame discarded: {}", e),
            }
        }

        info!("Converter stopped");
    }

    /// Add a frame to the scan in progress.
    pub fn process_frame(&mut self, frame: &RawFrame) -> Result<FrameOutcome, ConvertError> {
        let idx = frame.sensor_idx;

        if idx as usize >= NUM_SENSORS {
            return Err(ConvertError::OutOfRangeSensorIndex(idx));
        }

        let expected = self.prev_idx.map_or(0, |p| (p + 1) % NUM_SENSORS as u8);
        self.prev_idx = Some(idx);

        #[cfg(feature = "calib_feedback")]
        {
            if let Some(outcome) = self.calibration_frame(frame) {
                return Ok(outcome);
            }
        }

        let mut sync_loss = None;
        if self.synced && idx != expected {
            warn!(
                "Expected a frame from sensor {}, got sensor {}, ignoring frames until sensor 0",
                expected, idx
            );
            self.synced = false;
            sync_loss = Some(ConvertError::SynchronizationLoss {
                expected,
                found: idx,
            });
        }

        if idx == 0 {
            self.synced = true;
            self.scan.reset();
        }

        if !self.synced {
            return match sync_loss {
                Some(e) => Err(e),
                None => Ok(FrameOutcome::Unsynced),
            };
        }

        let offset = match self.config.pointcloud_mode() {
            PointcloudMode::Off => None,
            PointcloudMode::RobotFrame => Some((0.0, 0.0)),
            // Translation only, the robot's heading is not applied
            PointcloudMode::WorldFrame => {
                Some((frame.robot_pose.x as f64, frame.robot_pose.y as f64))
            }
        };

        if let Some(offset) = offset {
            let mount = self
                .mounts
                .get(idx)
                .map_err(|_| ConvertError::OutOfRangeSensorIndex(idx))?;
            projection::project_frame(
                frame.depth(),
                &self.tables,
                mount,
                offset,
                &mut self.scan.points,
            );
        }

        if idx == REFERENCE_SENSOR {
            self.scan.robot_pose = frame.robot_pose;
        }

        if self.config.raw_passthrough_sensor() == Some(idx) {
            self.scan.raw_depth = Some(RawDepth {
                sensor_idx: idx,
                depth: frame.depth().to_vec(),
            });
        }

        self.scan.ampl_images[idx as usize].copy_from_slice(frame.ampl());

        if idx as usize == NUM_SENSORS - 1 {
            Ok(self.publish())
        } else {
            Ok(FrameOutcome::Added)
        }
    }

    fn publish(&mut self) -> FrameOutcome {
        let seq = self.next_seq;
        self.next_seq += 1;

        // Keep the buffer, it is reset by the next frame from sensor 0
        if self.scans.is_full() {
            let n = self.scans_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Scan queue full, scan {} dropped ({} dropped so far)", seq, n);
            return FrameOutcome::Dropped(seq);
        }

        let mut scan = mem::replace(&mut self.scan, Scan::new());
        scan.seq = seq;
        scan.timestamp = Utc::now();

        match self.scans.push(scan) {
            Ok(()) => FrameOutcome::Published(seq),
            Err(scan) => {
                self.scan = scan;
                self.scans_dropped.fetch_add(1, Ordering::Relaxed);
                FrameOutcome::Dropped(seq)
            }
        }
    }

    /// Handle calibration requests and route frames while a calibration is running.
    ///
    /// Returns `None` if no calibration is running and the frame should be processed normally.
    #[cfg(feature = "calib_feedback")]
    fn calibration_frame(&mut self, frame: &RawFrame) -> Option<FrameOutcome> {
        if let Some(sensor_idx) = self.config.take_calib_feedback_request() {
            if self.calib.frames_per_run > 0 {
                info!(
                    "Capturing {} frames of sensor {} as calibration feedback",
                    self.calib.frames_per_run, sensor_idx
                );
                self.calib.active = Some((sensor_idx, 0));
                self.synced = false;
            }
        }

        let calib = &mut self.calib;
        let (sensor_idx, captured) = calib.active.as_mut()?;

        if frame.sensor_idx != *sensor_idx {
            return Some(FrameOutcome::Calibration);
        }

        if let Ok(mount) = self.mounts.get(*sensor_idx) {
            calib.points.clear();
            let stats = projection::project_frame(
                frame.depth(),
                &self.tables,
                mount,
                (0.0, 0.0),
                &mut calib.points,
            );

            let mean_range = if stats.n_points > 0 {
                stats.range_sum / stats.n_points as f64
            } else {
                0.0
            };

            calib
                .sink
                .frame(*sensor_idx, *captured, &calib.points, mean_range);
        }

        *captured += 1;

        if *captured >= calib.frames_per_run {
            calib.sink.complete(*sensor_idx);
            calib.active = None;
        }

        Some(FrameOutcome::Calibration)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::ring_buf::{ring_buf, Consumer};
    use comms_if::eqpt::tof::{RobotPose, TOF_PIXELS};

    fn converter(scan_slots: usize, mode: PointcloudMode) -> (CloudConverter, Consumer<Scan>) {
        let (tx, rx) = ring_buf(scan_slots).expect("bad scan queue size");
        let tables = AngleTables::new().expect("angle tables failed to build");
        let config = Arc::new(RuntimeConfig::new(mode));

        (
            CloudConverter::new(tables, MountTable::default(), config, tx),
            rx,
        )
    }

    /// A frame seeing a flat surface `depth` mm away.
    fn frame(sensor_idx: u8, depth: u16) -> RawFrame {
        let mut f = RawFrame::new(sensor_idx, RobotPose::default());
        f.depth_mut().iter_mut().for_each(|d| *d = depth);
        f.ampl_mut().iter_mut().for_each(|a| *a = 10 + sensor_idx);
        f
    }

    fn feed(conv: &mut CloudConverter, seq: &[u8]) -> Vec<Result<FrameOutcome, ConvertError>> {
        seq.iter()
            .map(|idx| conv.process_frame(&frame(*idx, 600)))
            .collect()
    }

    #[test]
    fn test_full_sweeps() {
        let (mut conv, mut rx) = converter(32, PointcloudMode::Off);

        let outcomes = feed(&mut conv, &[0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(outcomes[3], Ok(FrameOutcome::Published(0)));
        assert_eq!(outcomes[7], Ok(FrameOutcome::Published(1)));

        let scans: Vec<Scan> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[1].seq, 1);
        assert!(scans[0].timestamp <= scans[1].timestamp);

        // No points with the point cloud off, but the amplitude images are there
        assert!(scans[0].points.is_empty());
        for (i, img) in scans[0].ampl_images.iter().enumerate() {
            assert!(img.iter().all(|a| *a == 10 + i as u8));
        }
    }

    #[test]
    fn test_broken_sweep() {
        let (mut conv, mut rx) = converter(32, PointcloudMode::RobotFrame);

        let outcomes = feed(&mut conv, &[0, 1, 3, 0, 1, 2, 3]);
        assert_eq!(
            outcomes[2],
            Err(ConvertError::SynchronizationLoss {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(outcomes[3], Ok(FrameOutcome::Added));
        assert_eq!(outcomes[6], Ok(FrameOutcome::Published(0)));

        assert!(rx.pop().is_some());
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_waits_for_sensor_0() {
        let (mut conv, mut rx) = converter(32, PointcloudMode::RobotFrame);

        let outcomes = feed(&mut conv, &[2, 3, 0, 1, 2, 3]);
        assert_eq!(outcomes[0], Ok(FrameOutcome::Unsynced));
        assert_eq!(outcomes[1], Ok(FrameOutcome::Unsynced));
        assert_eq!(outcomes[5], Ok(FrameOutcome::Published(0)));

        // Out of range frames are rejected without touching the sequence
        assert_eq!(
            conv.process_frame(&frame(4, 600)),
            Err(ConvertError::OutOfRangeSensorIndex(4))
        );
        assert_eq!(
            conv.process_frame(&frame(0, 600)),
            Ok(FrameOutcome::Added)
        );

        assert_eq!(std::iter::from_fn(|| rx.pop()).count(), 1);
    }

    #[test]
    fn test_scan_contents() {
        let (mut conv, mut rx) = converter(32, PointcloudMode::RobotFrame);
        conv.config
            .set_raw_passthrough_sensor(Some(1))
            .expect("sensor 1 should be valid");

        for idx in 0..4 {
            let mut f = frame(idx, 500 + idx as u16);
            f.robot_pose = RobotPose {
                ang: idx as i32,
                x: 10 * idx as i32,
                y: 0,
            };
            assert!(conv.process_frame(&f).is_ok());
        }

        let scan = rx.pop().expect("no scan published");
        assert_eq!(scan.robot_pose.x, 20);
        assert_eq!(scan.robot_pose.ang, 2);

        let raw = scan.raw_depth.expect("no raw depth");
        assert_eq!(raw.sensor_idx, 1);
        assert_eq!(raw.depth.len(), TOF_PIXELS);
        assert!(raw.depth.iter().all(|d| *d == 501));

        // Every interior pixel of every sensor produces a point
        assert_eq!(scan.points.len(), 4 * 158 * 58);
    }

    #[test]
    fn test_world_frame() {
        let (mut robot, mut robot_rx) = converter(32, PointcloudMode::RobotFrame);
        let (mut world, mut world_rx) = converter(32, PointcloudMode::WorldFrame);

        for idx in 0..4 {
            let mut f = frame(idx, 700);
            f.robot_pose = RobotPose {
                ang: 1 << 29,
                x: 1000,
                y: -2000,
            };
            assert!(robot.process_frame(&f).is_ok());
            assert!(world.process_frame(&f).is_ok());
        }

        let a = robot_rx.pop().expect("no robot frame scan");
        let b = world_rx.pop().expect("no world frame scan");
        assert_eq!(a.points.len(), b.points.len());

        // Translated by the robot position, not rotated
        for (p, q) in a.points.iter().zip(b.points.iter()) {
            assert!((q.x - p.x - 1000).abs() <= 1);
            assert!((q.y - p.y + 2000).abs() <= 1);
            assert_eq!(p.z, q.z);
        }
    }

    #[test]
    fn test_full_scan_queue_drops_newest() {
        // 3 slots hold 2 scans
        let (mut conv, mut rx) = converter(3, PointcloudMode::Off);
        let dropped = conv.scans_dropped();

        let sweep = [0, 1, 2, 3];
        assert_eq!(feed(&mut conv, &sweep)[3], Ok(FrameOutcome::Published(0)));
        assert_eq!(feed(&mut conv, &sweep)[3], Ok(FrameOutcome::Published(1)));
        assert_eq!(feed(&mut conv, &sweep)[3], Ok(FrameOutcome::Dropped(2)));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        // The unread scans are untouched
        assert_eq!(rx.pop().map(|s| s.seq), Some(0));

        assert_eq!(feed(&mut conv, &sweep)[3], Ok(FrameOutcome::Published(3)));
        assert_eq!(rx.pop().map(|s| s.seq), Some(1));
        assert_eq!(rx.pop().map(|s| s.seq), Some(3));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[cfg(feature = "calib_feedback")]
    #[test]
    fn test_calibration_feedback() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorder {
            frames: Arc<Mutex<Vec<(u8, u32, usize)>>>,
            completed: Arc<Mutex<Vec<u8>>>,
        }

        impl CalibFeedback for Recorder {
            fn frame(&mut self, sensor_idx: u8, frame_num: u32, points: &[Point], range: f64) {
                assert!((range - 600.0).abs() < 1e-6);
                if let Ok(mut f) = self.frames.lock() {
                    f.push((sensor_idx, frame_num, points.len()));
                }
            }

            fn complete(&mut self, sensor_idx: u8) {
                if let Ok(mut c) = self.completed.lock() {
                    c.push(sensor_idx);
                }
            }
        }

        let recorder = Recorder::default();
        let frames = recorder.frames.clone();
        let completed = recorder.completed.clone();

        let (conv, mut rx) = converter(32, PointcloudMode::RobotFrame);
        let config = conv.config.clone();
        let mut conv = conv.with_calib_feedback(Box::new(recorder), 2);

        feed(&mut conv, &[0, 1]);
        assert!(config.trigger_calibration(1).is_ok());

        // Calibration lasts until the second frame of sensor 1, scans resume at the next sensor 0
        let outcomes = feed(&mut conv, &[2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3]);
        assert!(outcomes[..8]
            .iter()
            .all(|o| *o == Ok(FrameOutcome::Calibration)));
        assert_eq!(outcomes[8], Ok(FrameOutcome::Unsynced));
        assert_eq!(outcomes[10], Ok(FrameOutcome::Added));
        assert_eq!(outcomes[13], Ok(FrameOutcome::Published(0)));

        assert_eq!(
            *frames.lock().expect("poisoned"),
            vec![(1, 0, 158 * 58), (1, 1, 158 * 58)]
        );
        assert_eq!(*completed.lock().expect("poisoned"), vec![1]);

        // The sweep interrupted by the calibration never completes
        assert_eq!(rx.pop().map(|s| s.seq), Some(0));
        assert!(rx.pop().is_none());
    }
}
