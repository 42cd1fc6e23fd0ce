//! Measured lens calibration for one quadrant of the image.
//!
//! Each point gives the pixel a known direction lands on and that direction's horizontal and
//! vertical angle from the optical axis in degrees. Rows run from the top edge of the image down
//! to the horizontal centre line (row 29), columns from the left edge to the vertical centre line
//! (column 80).

/// Number of measured rows.
pub const GRID_ROWS: usize = 7;

/// Number of measured points in each row.
pub const GRID_COLS: usize = 6;

/// A single measured calibration point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibGridPoint {
    pub sens_x: i32,
    pub sens_y: i32,
    pub ang_x: f32,
    pub ang_y: f32,
}

const fn pt(sens_x: i32, sens_y: i32, ang_x: f32, ang_y: f32) -> CalibGridPoint {
    CalibGridPoint {
        sens_x,
        sens_y,
        ang_x,
        ang_y,
    }
}

/// The top-left quadrant of the sensor lens.
#[rustfmt::skip]
pub const LENS_QUADRANT_GRID: [[CalibGridPoint; GRID_COLS]; GRID_ROWS] = [
    [pt(12,  2, 50.0, 25.0), pt(19,  1, 45.0, 25.0), pt(28,  0, 40.0, 25.0), pt(43, -1, 30.0, 25.0), pt(62, -2, 15.0, 25.0), pt(80, -2, 0.0, 25.0)],
    [pt(11,  5, 50.0, 22.5), pt(19,  4, 45.0, 22.5), pt(27,  3, 40.0, 22.5), pt(42,  2, 30.0, 22.5), pt(62,  1, 15.0, 22.5), pt(80,  1, 0.0, 22.5)],
    [pt(11,  8, 50.0, 20.0), pt(19,  6, 45.0, 20.0), pt(27,  6, 40.0, 20.0), pt(42,  5, 30.0, 20.0), pt(62,  4, 15.0, 20.0), pt(80,  4, 0.0, 20.0)],
    [pt(10, 10, 50.0, 17.5), pt(18,  9, 45.0, 17.5), pt(27,  9, 40.0, 17.5), pt(42,  8, 30.0, 17.5), pt(62,  8, 15.0, 17.5), pt(80,  8, 0.0, 17.5)],
    [pt(10, 13, 50.0, 15.0), pt(18, 12, 45.0, 15.0), pt(27, 12, 40.0, 15.0), pt(42, 11, 30.0, 15.0), pt(62, 11, 15.0, 15.0), pt(80, 11, 0.0, 15.0)],
    [pt(10, 19, 50.0, 10.0), pt(18, 18, 45.0, 10.0), pt(26, 18, 40.0, 10.0), pt(42, 17, 30.0, 10.0), pt(62, 17, 15.0, 10.0), pt(80, 17, 0.0, 10.0)],
    [pt(10, 29, 50.0,  0.0), pt(18, 29, 45.0,  0.0), pt(26, 29, 40.0,  0.0), pt(42, 29, 30.0,  0.0), pt(62, 29, 15.0,  0.0), pt(80, 29, 0.0,  0.0)],
];
