//! # Calibration Module
//!
//! Builds the per-pixel angle lookup tables used to project depth samples into space.
//!
//! Only one quadrant of the lens is measured (see [`grid`]), sparsely. The builder:
//!
//! 1. Interpolates along each measured row, extrapolating to the left of its first point with
//!    the slope of the first interval.
//! 2. Fills each column of the top-left quadrant vertically between populated rows,
//!    extrapolating upwards where the top rows are missing.
//! 3. Mirrors the top-left quadrant onto the bottom-left one, negating the vertical angle. The
//!    last row has no source and is extrapolated from the two rows above it.
//! 4. Mirrors the left half onto the right half about column 80, negating the horizontal angle.
//!    Column 0 has no counterpart and keeps its value.
//!
//! Angles are stored in radians.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod grid;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::f64::consts::PI;

use comms_if::eqpt::tof::{TOF_PIXELS, TOF_XS, TOF_YS};
use log::debug;

use grid::{CalibGridPoint, GRID_COLS, LENS_QUADRANT_GRID};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Centre column, the axis of the horizontal mirroring.
const HALF_XS: usize = TOF_XS / 2;

/// Number of rows in the measured (top) half.
const HALF_YS: usize = TOF_YS / 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Dense horizontal and vertical angle tables, one entry per pixel, in the calibration's own axes.
///
/// Which of the two is horizontal once the sensor is mounted depends on the mount mode, see
/// [`crate::mount::MountMode::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub struct AngleTables {
    x_angs: Vec<f32>,
    y_angs: Vec<f32>,
}

/// Tables under construction, unpopulated cells hold NaN.
struct Builder {
    x_angs: Vec<f32>,
    y_angs: Vec<f32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalibError {
    #[error("The calibration grid has no rows")]
    EmptyGrid,

    #[error("Row {0} of the calibration grid does not have strictly increasing pixel columns")]
    UnsortedRow(usize),

    #[error("Column {0} has a single populated row, cannot extrapolate upwards from it")]
    CannotExtrapolate(usize),

    #[error("Cell ({x}, {y}) is still unpopulated after building the tables")]
    Unpopulated { x: usize, y: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AngleTables {
    /// Build the tables for the sensors' lens.
    pub fn new() -> Result<Self, CalibError> {
        Self::build(&LENS_QUADRANT_GRID)
    }

    /// Build the tables from a measured top-left quadrant.
    pub fn build(grid: &[[CalibGridPoint; GRID_COLS]]) -> Result<Self, CalibError> {
        if grid.is_empty() {
            return Err(CalibError::EmptyGrid);
        }

        for (i, row) in grid.iter().enumerate() {
            if row.windows(2).any(|p| p[1].sens_x <= p[0].sens_x) {
                return Err(CalibError::UnsortedRow(i));
            }
        }

        let mut b = Builder {
            x_angs: vec![f32::NAN; TOF_PIXELS],
            y_angs: vec![f32::NAN; TOF_PIXELS],
        };

        for row in grid {
            b.fill_row(row);
        }
        b.fill_columns()?;
        b.mirror_bottom();
        b.mirror_right();

        let unpopulated =
            (0..TOF_PIXELS).find(|&i| !b.x_angs[i].is_finite() || !b.y_angs[i].is_finite());
        if let Some(i) = unpopulated {
            return Err(CalibError::Unpopulated {
                x: i % TOF_XS,
                y: i / TOF_XS,
            });
        }

        debug!("Angle tables built from {} calibration rows", grid.len());

        Ok(Self {
            x_angs: b.x_angs,
            y_angs: b.y_angs,
        })
    }

    /// Angles at the given pixel as `(x_ang, y_ang)`.
    ///
    /// Panics if the pixel is outside of the image.
    #[inline]
    pub fn at(&self, px: usize, py: usize) -> (f32, f32) {
        let i = py * TOF_XS + px;
        (self.x_angs[i], self.y_angs[i])
    }

    pub fn x_angs(&self) -> &[f32] {
        &self.x_angs
    }

    pub fn y_angs(&self) -> &[f32] {
        &self.y_angs
    }
}

impl Builder {
    fn get(&self, px: usize, py: usize) -> (f32, f32) {
        let i = py * TOF_XS + px;
        (self.x_angs[i], self.y_angs[i])
    }

    fn put(&mut self, px: usize, py: usize, x_ang: f32, y_ang: f32) {
        let i = py * TOF_XS + px;
        self.x_angs[i] = x_ang;
        self.y_angs[i] = y_ang;
    }

    fn is_set(&self, px: usize, py: usize) -> bool {
        !self.x_angs[py * TOF_XS + px].is_nan()
    }

    /// Set a cell from angles in degrees, ignoring cells outside the image.
    fn put_deg(&mut self, px: i32, py: i32, ax: f32, ay: f32) {
        if px < 0 || py < 0 || px >= TOF_XS as i32 || py >= TOF_YS as i32 {
            return;
        }

        self.put(px as usize, py as usize, deg_to_rad(ax), deg_to_rad(ay));
    }

    fn fill_row(&mut self, row: &[CalibGridPoint; GRID_COLS]) {
        // Left of the first point, continue the first interval's slope
        let first = &row[0];
        let (ax_per_px, py_per_px) = slopes(&row[0], &row[1]);
        let mut cur_ax = -first.ang_x + ax_per_px * first.sens_x as f32;
        let cur_ay = -first.ang_y;
        let mut cur_py = first.sens_y as f32 - py_per_px * first.sens_x as f32;

        for px in 0..first.sens_x {
            self.put_deg(px, (cur_py + 0.5) as i32, cur_ax, cur_ay);
            cur_py += py_per_px;
            cur_ax -= ax_per_px;
        }

        for pair in row.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let (ax_per_px, py_per_px) = slopes(a, b);
            let mut cur_ax = -a.ang_x;
            let cur_ay = -a.ang_y;
            let mut cur_py = a.sens_y as f32;

            for px in a.sens_x..b.sens_x {
                self.put_deg(px, (cur_py + 0.5) as i32, cur_ax, cur_ay);
                cur_py += py_per_px;
                cur_ax -= ax_per_px;
            }
        }

        let last = &row[GRID_COLS - 1];
        self.put_deg(last.sens_x, last.sens_y, last.ang_x, -last.ang_y);
    }

    fn fill_columns(&mut self) -> Result<(), CalibError> {
        for px in 0..=HALF_XS {
            let mut prev: Option<(usize, f32, f32)> = None;

            for py in 0..HALF_YS {
                if !self.is_set(px, py) {
                    continue;
                }

                let (now_x, now_y) = self.get(px, py);

                match prev {
                    // Gap at the top, extrapolate from this row and the next populated one
                    None if py > 0 => {
                        let next_py = (py + 1..TOF_YS)
                            .find(|&ny| self.is_set(px, ny))
                            .ok_or(CalibError::CannotExtrapolate(px))?;
                        let (next_x, next_y) = self.get(px, next_py);

                        let steps = (next_py - py) as f32;
                        let dx = (next_x - now_x) / steps;
                        let dy = (next_y - now_y) / steps;
                        let mut cur_x = now_x - dx * py as f32;
                        let mut cur_y = now_y - dy * py as f32;

                        for iy in 0..py {
                            self.put(px, iy, cur_x, cur_y);
                            cur_x += dx;
                            cur_y += dy;
                        }
                    }
                    None => (),
                    Some((prev_at, prev_x, prev_y)) => {
                        let steps = prev_at as f32 - py as f32;
                        let dx = (prev_x - now_x) / steps;
                        let dy = (prev_y - now_y) / steps;
                        let mut cur_x = prev_x;
                        let mut cur_y = prev_y;

                        for iy in prev_at + 1..py {
                            cur_x += dx;
                            cur_y += dy;
                            self.put(px, iy, cur_x, cur_y);
                        }
                    }
                }

                prev = Some((py, now_x, now_y));
            }
        }

        Ok(())
    }

    fn mirror_bottom(&mut self) {
        for px in 0..=HALF_XS {
            for py in 0..HALF_YS {
                let (x, y) = self.get(px, py);
                self.put(px, TOF_YS - py - 2, x, -y);
            }

            let (x_58, y_58) = self.get(px, TOF_YS - 2);
            let (x_57, y_57) = self.get(px, TOF_YS - 3);
            self.put(px, TOF_YS - 1, x_58 - (x_57 - x_58), y_58 - (y_57 - y_58));
        }
    }

    fn mirror_right(&mut self) {
        for py in 0..TOF_YS {
            for px in 1..HALF_XS {
                let (x, y) = self.get(px, py);
                self.put(TOF_XS - px, py, -x, y);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Angle change and row change per pixel column between two points of a row.
fn slopes(a: &CalibGridPoint, b: &CalibGridPoint) -> (f32, f32) {
    let dpx = (b.sens_x - a.sens_x) as f32;
    let dpy = (b.sens_y - a.sens_y) as f32;
    ((b.ang_x - a.ang_x) / dpx, dpy / dpx)
}

fn deg_to_rad(deg: f32) -> f32 {
    (deg as f64 * (2.0 * PI / 360.0)) as f32
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
