//! Utility maths functions
//!
//! The robot reports its heading as a wrapping 32 bit integer, where the whole `i32` range
//! covers exactly one turn. One unit is therefore 360/2^32 degrees (about 83.8 ndeg), and
//! overflow is the natural wrap from +180 to -180 degrees.

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of wrapped angle units in one full turn.
const ANG32_UNITS_PER_TURN: f64 = 4_294_967_296.0;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a wrapped 32 bit angle into radians in the range [-pi, pi).
pub fn ang32_to_rad(ang: i32) -> f64 {
    ang as f64 * std::f64::consts::TAU / ANG32_UNITS_PER_TURN
}

/// Convert a wrapped 32 bit angle into degrees in the range [-180, 180).
pub fn ang32_to_deg(ang: i32) -> f64 {
    ang as f64 * 360.0 / ANG32_UNITS_PER_TURN
}

/// Convert an angle in degrees into a wrapped 32 bit angle.
///
/// Any angle is accepted, it is wrapped into one turn first.
pub fn deg_to_ang32(deg: f64) -> i32 {
    let turns = (deg / 360.0).rem_euclid(1.0);
    let units = (turns * ANG32_UNITS_PER_TURN).round() as i64;

    // Values in the upper half of the turn wrap to negative angles
    units as u32 as i32
}
