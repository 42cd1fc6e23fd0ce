//! # ToF Sensor Board Wire Format
//!
//! The sensor board is connected as an SPI slave, but it is the real timing master: it images
//! its four sensors on its own schedule and we can only ask it whether a frame is waiting.
//!
//! Three exchanges exist, all little-endian and packed:
//!
//! - Availability poll: a 5 byte transfer, the board answers with [`POLL_MAGIC`] and a status
//!   byte (see [`PollStatus`]).
//! - Frame read: a [`FRAME_LEN`] byte transfer returning one [`RawFrame`].
//! - Offset calibration command: a write-only [`CalibOffsetCmd`].
//!
//! Byte 4 of the outbound buffer of polls and frame reads carries the current debug id.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Width of a sensor image in pixels.
pub const TOF_XS: usize = 160;

/// Height of a sensor image in pixels.
pub const TOF_YS: usize = 60;

/// Number of pixels in a sensor image.
pub const TOF_PIXELS: usize = TOF_XS * TOF_YS;

/// Number of sensors connected to the board.
pub const NUM_SENSORS: usize = 4;

/// Number of diagnostic timestamps in a frame.
pub const NUM_TIMESTAMPS: usize = 24;

/// Number of debug values in a frame.
pub const NUM_DBG_VALUES: usize = 8;

/// Magic number heading an availability poll response.
pub const POLL_MAGIC: u32 = 0x1122_3344;

/// Magic number heading an offset calibration command.
pub const CALIB_MAGIC: u32 = 0xCA0F_F5E7;

/// Length of an availability poll transfer.
pub const POLL_LEN: usize = 5;

/// Length of an offset calibration command.
pub const CALIB_CMD_LEN: usize = 5;

/// Position of the debug id in the outbound buffer of polls and frame reads.
pub const DEBUG_ID_OFFSET: usize = 4;

/// Status: the board's frame buffer overflowed, frames were lost.
pub const STATUS_OVERFLOW: u8 = 253;

/// Status: more than one frame became available since the last read.
pub const STATUS_MULTIPLE: u8 = 254;

/// Status: a frame is available.
pub const STATUS_AVAILABLE: u8 = 255;

/// Largest status value which is a suggested wait in milliseconds.
pub const MAX_WAIT_MS: u8 = 250;

const HEADER_OFFSET: usize = 0;
const STATUS_OFFSET: usize = 4;
const SENSOR_IDX_OFFSET: usize = 7;
const POSE_OFFSET: usize = 8;
const DEPTH_OFFSET: usize = POSE_OFFSET + 12;
const AMPL_OFFSET: usize = DEPTH_OFFSET + 2 * TOF_PIXELS;
const TIMESTAMPS_OFFSET: usize = AMPL_OFFSET + TOF_PIXELS;
const DBG_OFFSET: usize = TIMESTAMPS_OFFSET + 2 * NUM_TIMESTAMPS;

/// Length of a full frame transfer (28 900 bytes).
pub const FRAME_LEN: usize = DBG_OFFSET + 4 * NUM_DBG_VALUES;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pose of the robot at the time a frame was acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RobotPose {
    /// Heading, the full `i32` range covers one turn and is left to overflow freely.
    pub ang: i32,

    /// Units: millimeters
    pub x: i32,

    /// Units: millimeters
    pub y: i32,
}

/// One acquisition of one sensor, as read from the board.
///
/// The depth and amplitude grids always hold exactly [`TOF_PIXELS`] samples, stored row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub header: u32,

    /// Board status at the time of the read, see [`PollStatus`].
    pub status: u8,

    /// Index of the sensor, expected to be in `0..NUM_SENSORS` but not guaranteed by the board.
    pub sensor_idx: u8,

    pub robot_pose: RobotPose,

    /// Depth in millimeters, 0 means no return.
    depth: Vec<u16>,

    ampl: Vec<u8>,

    /// Timestamps of the board's processing steps in 0.1 ms units.
    pub timestamps: [u16; NUM_TIMESTAMPS],

    pub dbg_i32: [i32; NUM_DBG_VALUES],
}

/// Command requesting the board to run an offset self-calibration of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibOffsetCmd {
    pub sensor_idx: u8,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Frame availability as reported by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A frame can be read now.
    Ready,

    /// A frame can be read now, but others were missed since the last read.
    MultipleElapsed,

    /// A frame can be read now, but the board's own buffer overflowed.
    RemoteOverflow,

    /// No frame yet, poll again after this many milliseconds.
    Wait(u8),
}

/// Errors raised while decoding data from the board.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Expected {expected} bytes, got {found}")]
    BadLength { expected: usize, found: usize },

    #[error("Unexpected magic number 0x{0:08x}")]
    BadMagic(u32),

    #[error("The board did not respond (status 0)")]
    NoResponse,

    #[error("Reserved status value {0}")]
    ReservedStatus(u8),

    #[error("Frame has status {0}, the board had no frame ready")]
    StaleFrame(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PollStatus {
    /// Interpret a status byte.
    pub fn from_status_byte(status: u8) -> Result<Self, WireError> {
        match status {
            0 => Err(WireError::NoResponse),
            1..=MAX_WAIT_MS => Ok(PollStatus::Wait(status)),
            STATUS_OVERFLOW => Ok(PollStatus::RemoteOverflow),
            STATUS_MULTIPLE => Ok(PollStatus::MultipleElapsed),
            STATUS_AVAILABLE => Ok(PollStatus::Ready),
            s => Err(WireError::ReservedStatus(s)),
        }
    }

    pub fn to_status_byte(self) -> u8 {
        match self {
            PollStatus::Ready => STATUS_AVAILABLE,
            PollStatus::MultipleElapsed => STATUS_MULTIPLE,
            PollStatus::RemoteOverflow => STATUS_OVERFLOW,
            PollStatus::Wait(ms) => ms,
        }
    }

    /// True if a frame can be read after this status.
    pub fn frame_available(&self) -> bool {
        !matches!(self, PollStatus::Wait(_))
    }
}

impl RawFrame {
    /// Create a frame with empty (all invalid) depth and amplitude grids.
    pub fn new(sensor_idx: u8, robot_pose: RobotPose) -> Self {
        Self {
            header: 0,
            status: STATUS_AVAILABLE,
            sensor_idx,
            robot_pose,
            depth: vec![0; TOF_PIXELS],
            ampl: vec![0; TOF_PIXELS],
            timestamps: [0; NUM_TIMESTAMPS],
            dbg_i32: [0; NUM_DBG_VALUES],
        }
    }

    /// Decode a frame from the bytes of a full frame transfer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != FRAME_LEN {
            return Err(WireError::BadLength {
                expected: FRAME_LEN,
                found: buf.len(),
            });
        }

        let mut depth = vec![0u16; TOF_PIXELS];
        LittleEndian::read_u16_into(&buf[DEPTH_OFFSET..AMPL_OFFSET], &mut depth);

        let mut timestamps = [0u16; NUM_TIMESTAMPS];
        LittleEndian::read_u16_into(&buf[TIMESTAMPS_OFFSET..DBG_OFFSET], &mut timestamps);

        let mut dbg_i32 = [0i32; NUM_DBG_VALUES];
        LittleEndian::read_i32_into(&buf[DBG_OFFSET..FRAME_LEN], &mut dbg_i32);

        Ok(Self {
            header: LittleEndian::read_u32(&buf[HEADER_OFFSET..]),
            status: buf[STATUS_OFFSET],
            sensor_idx: buf[SENSOR_IDX_OFFSET],
            robot_pose: RobotPose {
                ang: LittleEndian::read_i32(&buf[POSE_OFFSET..]),
                x: LittleEndian::read_i32(&buf[POSE_OFFSET + 4..]),
                y: LittleEndian::read_i32(&buf[POSE_OFFSET + 8..]),
            },
            depth,
            ampl: buf[AMPL_OFFSET..TIMESTAMPS_OFFSET].to_vec(),
            timestamps,
            dbg_i32,
        })
    }

    /// Encode the frame the way the board sends it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FRAME_LEN];

        LittleEndian::write_u32(&mut buf[HEADER_OFFSET..], self.header);
        buf[STATUS_OFFSET] = self.status;
        buf[SENSOR_IDX_OFFSET] = self.sensor_idx;
        LittleEndian::write_i32(&mut buf[POSE_OFFSET..], self.robot_pose.ang);
        LittleEndian::write_i32(&mut buf[POSE_OFFSET + 4..], self.robot_pose.x);
        LittleEndian::write_i32(&mut buf[POSE_OFFSET + 8..], self.robot_pose.y);
        LittleEndian::write_u16_into(&self.depth, &mut buf[DEPTH_OFFSET..AMPL_OFFSET]);
        buf[AMPL_OFFSET..TIMESTAMPS_OFFSET].copy_from_slice(&self.ampl);
        LittleEndian::write_u16_into(&self.timestamps, &mut buf[TIMESTAMPS_OFFSET..DBG_OFFSET]);
        LittleEndian::write_i32_into(&self.dbg_i32, &mut buf[DBG_OFFSET..FRAME_LEN]);

        buf
    }

    pub fn depth(&self) -> &[u16] {
        &self.depth
    }

    pub fn depth_mut(&mut self) -> &mut [u16] {
        &mut self.depth
    }

    pub fn ampl(&self) -> &[u8] {
        &self.ampl
    }

    pub fn ampl_mut(&mut self) -> &mut [u8] {
        &mut self.ampl
    }

    /// Depth at the given pixel.
    ///
    /// # Panics
    /// - If the pixel is outside the image.
    pub fn depth_at(&self, x: usize, y: usize) -> u16 {
        self.depth[y * TOF_XS + x]
    }

    /// Time between successive processing steps on the board, in milliseconds.
    pub fn timestamp_deltas_ms(&self) -> Vec<f64> {
        self.timestamps
            .windows(2)
            .map(|w| w[1].wrapping_sub(w[0]) as f64 / 10.0)
            .collect()
    }
}

impl CalibOffsetCmd {
    pub fn to_bytes(&self) -> [u8; CALIB_CMD_LEN] {
        let mut buf = [0u8; CALIB_CMD_LEN];
        LittleEndian::write_u32(&mut buf, CALIB_MAGIC);
        buf[4] = self.sensor_idx;
        buf
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the outbound buffer of an availability poll.
pub fn poll_request(debug_id: u8) -> [u8; POLL_LEN] {
    let mut buf = [0u8; POLL_LEN];
    buf[DEBUG_ID_OFFSET] = debug_id;
    buf
}

/// Build the outbound buffer of a frame read.
pub fn frame_request(debug_id: u8) -> Vec<u8> {
    let mut buf = vec![0u8; FRAME_LEN];
    buf[DEBUG_ID_OFFSET] = debug_id;
    buf
}

/// Decode the inbound bytes of an availability poll.
pub fn parse_poll_response(buf: &[u8]) -> Result<PollStatus, WireError> {
    if buf.len() != POLL_LEN {
        return Err(WireError::BadLength {
            expected: POLL_LEN,
            found: buf.len(),
        });
    }

    let magic = LittleEndian::read_u32(buf);
    if magic != POLL_MAGIC {
        return Err(WireError::BadMagic(magic));
    }

    PollStatus::from_status_byte(buf[4])
}

/// Encode a poll response the way the board sends it.
pub fn poll_response(status: u8) -> [u8; POLL_LEN] {
    let mut buf = [0u8; POLL_LEN];
    LittleEndian::write_u32(&mut buf, POLL_MAGIC);
    buf[4] = status;
    buf
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
