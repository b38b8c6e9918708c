//! Forward-mapped image rotation.
//!
//! Every source pixel is pushed to the destination cell its rotated
//! coordinate falls into. Samples that land outside the grid are dropped and
//! destination cells nobody writes keep the [`SENTINEL`] value, so the output
//! may contain holes. There is no interpolation.
//!
//! ```text
//! xpos =  dx * cos + dy * sin + px      dx = col - px
//! ypos = -dx * sin + dy * cos + py      dy = row - py
//! ```
//!
//! With [`Pivot::Origin`] this is the plain transform about `(0, 0)`.

use crate::image::ImageGrid;
use crate::{ComputeError, ComputeResult};

/// Pre-fill value for destination cells.
pub const SENTINEL: f32 = 1234.0;

/// Angle used by the demo when none is given (315 degrees).
pub const DEFAULT_ANGLE_DEGREES: f32 = 315.0;

/// Rotation angle as a `(sin, cos)` pair, fixed for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationParams {
    pub sin_theta: f32,
    pub cos_theta: f32,
}

impl RotationParams {
    /// Build from raw components. Both must be finite.
    pub fn new(sin_theta: f32, cos_theta: f32) -> ComputeResult<Self> {
        if !sin_theta.is_finite() || !cos_theta.is_finite() {
            return Err(ComputeError::InvalidArgument(format!(
                "rotation components must be finite (sin={sin_theta}, cos={cos_theta})"
            )));
        }
        Ok(Self { sin_theta, cos_theta })
    }

    /// Build from an angle in degrees.
    ///
    /// Exact multiples of 90 degrees produce exact `{-1, 0, 1}` components.
    pub fn from_degrees(degrees: f32) -> ComputeResult<Self> {
        if !degrees.is_finite() {
            return Err(ComputeError::InvalidArgument(format!("angle must be finite, got {degrees}")));
        }
        let normalized = degrees.rem_euclid(360.0);
        let exact = match normalized {
            a if a == 0.0 => Some((0.0, 1.0)),
            a if a == 90.0 => Some((1.0, 0.0)),
            a if a == 180.0 => Some((0.0, -1.0)),
            a if a == 270.0 => Some((-1.0, 0.0)),
            _ => None,
        };
        let (sin_theta, cos_theta) = exact.unwrap_or_else(|| {
            let rad = (normalized as f64).to_radians();
            (rad.sin() as f32, rad.cos() as f32)
        });
        Self::new(sin_theta, cos_theta)
    }
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            sin_theta: -std::f32::consts::FRAC_1_SQRT_2,
            cos_theta: std::f32::consts::FRAC_1_SQRT_2,
        }
    }
}

/// Point the rotation turns about.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Pivot {
    /// Grid origin `(0, 0)`.
    #[default]
    Origin,
    /// Geometric center `((cols-1)/2, (rows-1)/2)`.
    Center,
    /// Explicit `(x, y)` in column/row units.
    At { x: f32, y: f32 },
}

impl Pivot {
    /// Pivot as `(x, y)` for a grid of the given size.
    pub fn coords(&self, rows: usize, cols: usize) -> (f32, f32) {
        match *self {
            Self::Origin => (0.0, 0.0),
            Self::Center => (
                (cols.saturating_sub(1)) as f32 / 2.0,
                (rows.saturating_sub(1)) as f32 / 2.0,
            ),
            Self::At { x, y } => (x, y),
        }
    }

    /// Parse `origin`, `center` or `X,Y`.
    pub fn parse(s: &str) -> ComputeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "origin" => Ok(Self::Origin),
            "center" | "centre" => Ok(Self::Center),
            other => {
                let parts: Vec<&str> = other.split(',').map(str::trim).collect();
                match parts.as_slice() {
                    [x, y] => {
                        let x = x.parse::<f32>();
                        let y = y.parse::<f32>();
                        match (x, y) {
                            (Ok(x), Ok(y)) => Ok(Self::At { x, y }),
                            _ => Err(ComputeError::InvalidArgument(format!("invalid pivot: {s}"))),
                        }
                    }
                    _ => Err(ComputeError::InvalidArgument(format!("invalid pivot: {s}"))),
                }
            }
        }
    }
}

/// Destination `(row, col)` for source `(row, col)`, or `None` when the
/// rotated sample falls outside the grid.
///
/// Bounds are tested on the floored coordinate, so `xpos == cols` is
/// dropped rather than clamped.
#[inline]
pub fn map_coordinate(
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
    params: RotationParams,
    pivot: (f32, f32),
) -> Option<(usize, usize)> {
    let (px, py) = pivot;
    let dx = col as f32 - px;
    let dy = row as f32 - py;
    let xpos = dx * params.cos_theta + dy * params.sin_theta + px;
    let ypos = -dx * params.sin_theta + dy * params.cos_theta + py;

    let fx = xpos.floor();
    let fy = ypos.floor();
    if fx >= 0.0 && fx < cols as f32 && fy >= 0.0 && fy < rows as f32 {
        Some((fy as usize, fx as usize))
    } else {
        None
    }
}

/// Single-threaded rotation used as the reference for device results.
pub fn rotate_reference(src: &ImageGrid, params: RotationParams, pivot: Pivot, sentinel: f32) -> ImageGrid {
    let (rows, cols) = (src.rows, src.cols);
    let pivot = pivot.coords(rows, cols);
    let mut dst = ImageGrid::filled(rows, cols, sentinel);

    for row in 0..rows {
        for col in 0..cols {
            if let Some((dr, dc)) = map_coordinate(row, col, rows, cols, params, pivot) {
                dst.data[dr * cols + dc] = src.data[row * cols + col];
            }
        }
    }
    dst
}

/// Summary of a rotation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationReport {
    /// Destination cells holding a source sample.
    pub written_cells: usize,
    /// Destination cells still holding the sentinel.
    pub holes: usize,
    /// Source samples that did not survive (out of bounds or overwritten).
    pub dropped: usize,
}

impl RotationReport {
    /// Measure a destination grid. A source sample equal to the sentinel
    /// counts as a hole.
    pub fn measure(dst: &ImageGrid, sentinel: f32, source_len: usize) -> Self {
        let holes = dst.data.iter().filter(|&&v| v == sentinel).count();
        let written_cells = dst.data.len() - holes;
        Self {
            written_cells,
            holes,
            dropped: source_len.saturating_sub(written_cells),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_degrees_snaps_right_angles() {
        let p = RotationParams::from_degrees(90.0).unwrap();
        assert_eq!((p.sin_theta, p.cos_theta), (1.0, 0.0));
        let p = RotationParams::from_degrees(-90.0).unwrap();
        assert_eq!((p.sin_theta, p.cos_theta), (-1.0, 0.0));
        let p = RotationParams::from_degrees(540.0).unwrap();
        assert_eq!((p.sin_theta, p.cos_theta), (0.0, -1.0));
    }

    #[test]
    fn test_default_is_315_degrees() {
        let d = RotationParams::default();
        let p = RotationParams::from_degrees(DEFAULT_ANGLE_DEGREES).unwrap();
        assert!((d.sin_theta - p.sin_theta).abs() < 1e-6);
        assert!((d.cos_theta - p.cos_theta).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(RotationParams::new(f32::NAN, 1.0).is_err());
        assert!(RotationParams::from_degrees(f32::INFINITY).is_err());
    }

    #[test]
    fn test_pivot_parse() {
        assert_eq!(Pivot::parse("origin").unwrap(), Pivot::Origin);
        assert_eq!(Pivot::parse("Center").unwrap(), Pivot::Center);
        assert_eq!(Pivot::parse("2.5, 4").unwrap(), Pivot::At { x: 2.5, y: 4.0 });
        assert!(Pivot::parse("left").is_err());
    }

    #[test]
    fn test_identity_mapping() {
        let p = RotationParams::from_degrees(0.0).unwrap();
        assert_eq!(map_coordinate(2, 3, 4, 5, p, (0.0, 0.0)), Some((2, 3)));
    }

    #[test]
    fn test_negative_coordinate_dropped() {
        // 90 degrees about the origin sends every column > 0 to a negative row.
        let p = RotationParams::from_degrees(90.0).unwrap();
        assert_eq!(map_coordinate(1, 0, 4, 4, p, (0.0, 0.0)), Some((0, 1)));
        assert_eq!(map_coordinate(1, 1, 4, 4, p, (0.0, 0.0)), None);
    }

    #[test]
    fn test_report_counts() {
        let src = ImageGrid::from_f32(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let dst = rotate_reference(&src, RotationParams::from_degrees(180.0).unwrap(), Pivot::Origin, SENTINEL);
        let report = RotationReport::measure(&dst, SENTINEL, src.len());
        assert_eq!(report.written_cells, 1);
        assert_eq!(report.holes, 3);
        assert_eq!(report.dropped, 3);
        assert_eq!(dst.get(0, 0), Some(1.0));
    }
}
