//! Depth image to point projection.
//!
//! Each pixel away from the image border is denoised using its 3x3 neighbourhood: samples far
//! from the neighbourhood average are rejected, and the range of the pixel is the average of the
//! remaining ones. If the accepted samples lie mostly on one side of the pixel the angle lookup is
//! moved one pixel towards that side. The range and angles are then turned into a point using the
//! sensor's mount.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::tof::{TOF_XS, TOF_YS};

use super::scan::{Point, MAX_POINTS};
use crate::{calib::AngleTables, mount::SensorMount};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum distance of a sample from its neighbourhood's average to be kept.
///
/// Units: millimeters
const CONFORMING_TOLERANCE: i32 = 350;

/// A pixel needs more than this many valid (non-zero) samples in its neighbourhood.
const MIN_VALID: i32 = 4;

/// A pixel needs more than this many conforming samples in its neighbourhood.
const MIN_CONFORMING: i32 = 2;

/// Net offset of the conforming samples beyond which the angle lookup is moved.
const ANCHOR_SHIFT_THRESHOLD: i32 = 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The denoised range of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Units: millimeters
    pub range: f32,

    /// Pixel to look the angles up at.
    pub anchor_x: usize,
    pub anchor_y: usize,
}

/// Summary of the points produced from one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectionStats {
    /// Points appended to the output.
    pub n_points: usize,

    /// Sum of the ranges of the appended points.
    pub range_sum: f64,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Project a depth image, appending the points to `points` until it holds [`MAX_POINTS`].
///
/// `offset` is added to the x and y of every point.
pub fn project_frame(
    depth: &[u16],
    tables: &AngleTables,
    mount: &SensorMount,
    offset: (f64, f64),
    points: &mut Vec<Point>,
) -> ProjectionStats {
    let mut stats = ProjectionStats::default();

    for py in 1..TOF_YS - 1 {
        for px in 1..TOF_XS - 1 {
            let sample = match denoise(depth, px, py) {
                Some(s) => s,
                None => continue,
            };

            if points.len() >= MAX_POINTS {
                continue;
            }

            points.push(to_point(&sample, tables, mount, offset));
            stats.n_points += 1;
            stats.range_sum += sample.range as f64;
        }
    }

    stats
}

/// Denoise the pixel at `(px, py)`, which must not be on the image border.
///
/// Returns `None` if the neighbourhood is too sparse or too inconsistent to give a range.
pub fn denoise(depth: &[u16], px: usize, py: usize) -> Option<Sample> {
    let neighbourhood = || {
        (-1i32..=1).flat_map(move |dy| {
            (-1i32..=1).map(move |dx| {
                let i = (py as i32 + dy) as usize * TOF_XS + (px as i32 + dx) as usize;
                (dx, dy, depth[i] as i32)
            })
        })
    };

    let (n_valid, sum) = neighbourhood()
        .filter(|&(_, _, d)| d != 0)
        .fold((0, 0), |(n, s), (_, _, d)| (n + 1, s + d));

    if n_valid <= MIN_VALID {
        return None;
    }

    let avg = sum / n_valid;

    let mut n_conforming = 0;
    let mut sum_conforming = 0;
    let mut cumul_dx = 0;
    let mut cumul_dy = 0;

    for (dx, dy, d) in neighbourhood() {
        if d != 0 && d > avg - CONFORMING_TOLERANCE && d < avg + CONFORMING_TOLERANCE {
            n_conforming += 1;
            sum_conforming += d;
            cumul_dx += dx;
            cumul_dy += dy;
        }
    }

    if n_conforming <= MIN_CONFORMING {
        return None;
    }

    Some(Sample {
        range: sum_conforming as f32 / n_conforming as f32,
        anchor_x: shift_anchor(px, cumul_dx),
        anchor_y: shift_anchor(py, cumul_dy),
    })
}

fn shift_anchor(p: usize, cumul: i32) -> usize {
    if cumul < -ANCHOR_SHIFT_THRESHOLD {
        p - 1
    } else if cumul > ANCHOR_SHIFT_THRESHOLD {
        p + 1
    } else {
        p
    }
}

fn to_point(
    sample: &Sample,
    tables: &AngleTables,
    mount: &SensorMount,
    offset: (f64, f64),
) -> Point {
    let (x_ang, y_ang) = tables.at(sample.anchor_x, sample.anchor_y);
    let (hor, ver) = mount.mode.lookup(x_ang, y_ang);

    let hor = hor as f64 + mount.heading;
    let ver = ver as f64 + mount.vertical;
    let d = sample.range as f64;

    let x = d * ver.cos() * hor.cos() + mount.x + offset.0;
    let y = -(d * ver.cos() * hor.sin()) + mount.y + offset.1;
    let z = d * ver.sin() + mount.z;

    Point {
        x: x as i32,
        y: y as i32,
        z: z as i32,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        calib::CalibError,
        mount::{MountMode, MountTable},
    };
    use comms_if::eqpt::tof::TOF_PIXELS;

    /// A blank depth image with the 3x3 neighbourhood of `(px, py)` set, row by row.
    fn with_neighbourhood(px: usize, py: usize, values: [u16; 9]) -> Vec<u16> {
        let mut depth = vec![0; TOF_PIXELS];
        for (i, v) in values.iter().enumerate() {
            let x = px + i % 3 - 1;
            let y = py + i / 3 - 1;
            depth[y * TOF_XS + x] = *v;
        }
        depth
    }

    #[test]
    fn test_denoise() {
        let depth = with_neighbourhood(20, 10, [0, 500, 510, 505, 500, 0, 495, 505, 0]);

        // 6 valid samples averaging 502, all conforming, offsets cancel out
        let s = denoise(&depth, 20, 10);
        assert_eq!(
            s,
            Some(Sample {
                range: 502.5,
                anchor_x: 20,
                anchor_y: 10
            })
        );
    }

    #[test]
    fn test_denoise_rejects() {
        // Outliers are excluded from the range
        let depth = with_neighbourhood(5, 5, [500, 500, 500, 500, 500, 500, 500, 500, 2000]);
        assert_eq!(denoise(&depth, 5, 5).map(|s| s.range), Some(500.0));

        // Too few valid samples
        let depth = with_neighbourhood(5, 5, [500, 500, 500, 500, 0, 0, 0, 0, 0]);
        assert_eq!(denoise(&depth, 5, 5), None);

        // Enough valid samples but only one near their average
        let depth = with_neighbourhood(5, 5, [100, 100, 2000, 3000, 4000, 0, 0, 0, 0]);
        assert_eq!(denoise(&depth, 5, 5), None);
    }

    #[test]
    fn test_anchor_shift() {
        // Samples only in the centre and right columns, biased right
        let depth = with_neighbourhood(30, 20, [0, 700, 700, 0, 700, 700, 0, 700, 700]);
        let s = denoise(&depth, 30, 20);
        assert_eq!(s.map(|s| (s.anchor_x, s.anchor_y)), Some((31, 20)));

        // Top two rows, biased up
        let depth = with_neighbourhood(30, 20, [700, 700, 700, 700, 700, 700, 0, 0, 0]);
        let s = denoise(&depth, 30, 20);
        assert_eq!(s.map(|s| (s.anchor_x, s.anchor_y)), Some((30, 19)));
    }

    #[test]
    fn test_project_frame() -> Result<(), CalibError> {
        let tables = AngleTables::new()?;
        let mount = SensorMount {
            mode: MountMode::Upright,
            x: 100.0,
            y: -50.0,
            heading: 0.0,
            vertical: 0.0,
            z: 200.0,
        };

        // A uniform wall
        let depth = vec![1000; TOF_PIXELS];
        let mut points = Vec::new();
        let stats = project_frame(&depth, &tables, &mount, (0.0, 0.0), &mut points);

        assert_eq!(stats.n_points, (TOF_XS - 2) * (TOF_YS - 2));
        assert_eq!(points.len(), stats.n_points);
        assert!((stats.range_sum / stats.n_points as f64 - 1000.0).abs() < 1e-6);

        // Everything lies in front of the sensor, no further than the range
        for p in points.iter() {
            assert!(p.x > 100 && p.x <= 1100);
            assert!((p.y + 50).abs() <= 1000);
            assert!((p.z - 200).abs() <= 1000);
        }

        // The offset only moves points horizontally
        let mut shifted = Vec::new();
        project_frame(&depth, &tables, &mount, (10.0, 20.0), &mut shifted);
        for (a, b) in points.iter().zip(shifted.iter()) {
            assert!((b.x - a.x - 10).abs() <= 1);
            assert!((b.y - a.y - 20).abs() <= 1);
            assert_eq!(a.z, b.z);
        }

        Ok(())
    }

    #[test]
    fn test_point_capacity() -> Result<(), Box<dyn std::error::Error>> {
        let tables = AngleTables::new()?;
        let mounts = MountTable::default();
        let mount = mounts.get(0)?;

        let depth = vec![800; TOF_PIXELS];
        let mut points = vec![Point::default(); MAX_POINTS - 10];
        let stats = project_frame(&depth, &tables, mount, (0.0, 0.0), &mut points);

        assert_eq!(stats.n_points, 10);
        assert_eq!(points.len(), MAX_POINTS);

        Ok(())
    }
}
