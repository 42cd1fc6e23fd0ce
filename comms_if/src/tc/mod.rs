//! # Telecommand module
//!
//! This module provides the operator commands accepted by the ToF executable. Commands are either
//! typed as single keys on the console or sent as JSON packets.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use serde_json::{self, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the ToF executable by the operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum TofTc {
    /// Stop acquisition and exit.
    Quit,

    /// Select the previous sensor (or none) for raw depth passthrough.
    RawSensorPrev,

    /// Select the next sensor for raw depth passthrough.
    RawSensorNext,

    /// Request an offset self-calibration of the given sensor.
    CalibOffset(u8),

    /// Toggle verbose frame diagnostics.
    ToggleVerbose,

    /// Cycle the point cloud mode: off, relative to robot, relative to world.
    CyclePointcloudMode,

    /// Increment the debug id sent to the board.
    DebugIdIncr,

    /// Decrement the debug id sent to the board.
    DebugIdDecr,
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("TC has an invalid type ({0})")]
    InvalidType(String),

    #[error("TC of type {0} is expected to have a sensor index payload but it doesn't")]
    MissingPayload(String),

    #[error("Sensor index {0} is out of range")]
    InvalidSensorIdx(u64),
}

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of sensors which can be targeted by a calibration command.
const NUM_CALIB_TARGETS: u64 = 4;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TofTc {
    /// Get the command bound to a console key, if any.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'q' => Some(TofTc::Quit),
            'z' => Some(TofTc::RawSensorPrev),
            'x' => Some(TofTc::RawSensorNext),
            'v' => Some(TofTc::ToggleVerbose),
            'p' => Some(TofTc::CyclePointcloudMode),
            '+' => Some(TofTc::DebugIdIncr),
            '-' => Some(TofTc::DebugIdDecr),
            '0'..='3' => key.to_digit(10).map(|d| TofTc::CalibOffset(d as u8)),
            _ => None,
        }
    }

    /// Parse a console line.
    ///
    /// Lines starting with `{` are parsed as a single JSON TC, otherwise every character bound to
    /// a key produces a TC and the others are ignored.
    pub fn parse_line(line: &str) -> Result<Vec<Self>, TcParseError> {
        let line = line.trim();

        if line.starts_with('{') {
            Ok(vec![Self::from_json(line)?])
        } else {
            Ok(line.chars().filter_map(Self::from_key).collect())
        }
    }

    /// Parse a new TC from a JSON packet, for example `{"type": "CALIB", "payload": 2}`.
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        // Parse the JSON string into a value
        let val: Value = serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)?;

        // Get the type of the TC
        let tc_type = match val["type"].as_str() {
            Some(s) => s,
            None => {
                return Err(TcParseError::InvalidType(String::from(
                    "Expected \"type\" to be a string",
                )))
            }
        };

        match tc_type {
            "QUIT" => Ok(TofTc::Quit),
            "RAW_PREV" => Ok(TofTc::RawSensorPrev),
            "RAW_NEXT" => Ok(TofTc::RawSensorNext),
            "VERBOSE" => Ok(TofTc::ToggleVerbose),
            "POINTCLOUD" => Ok(TofTc::CyclePointcloudMode),
            "DBG_INCR" => Ok(TofTc::DebugIdIncr),
            "DBG_DECR" => Ok(TofTc::DebugIdDecr),
            "CALIB" => {
                let idx = val["payload"]
                    .as_u64()
                    .ok_or_else(|| TcParseError::MissingPayload(tc_type.to_string()))?;

                if idx >= NUM_CALIB_TARGETS {
                    return Err(TcParseError::InvalidSensorIdx(idx));
                }

                Ok(TofTc::CalibOffset(idx as u8))
            }
            t => Err(TcParseError::InvalidType(format!(
                "{} is not a recognised TC type",
                t
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
