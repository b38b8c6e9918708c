//! Single-channel sample grid used by the rotation kernel.

use crate::{ComputeError, ComputeResult};

/// Image stored as a flat row-major `f32` grid.
///
/// Sample `(row, col)` lives at `row * cols + col`.
#[derive(Clone, PartialEq)]
pub struct ImageGrid {
    /// Raw samples.
    pub(crate) data: Vec<f32>,
    /// Number of rows (height).
    pub rows: usize,
    /// Number of columns (width).
    pub cols: usize,
}

impl ImageGrid {
    /// Create from f32 data.
    pub fn from_f32(data: Vec<f32>, rows: usize, cols: usize) -> ComputeResult<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| ComputeError::InvalidArgument(format!("grid {rows}x{cols} overflows")))?;
        if data.len() != expected {
            return Err(ComputeError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Create a grid with every sample set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            data: vec![value; rows * cols],
            rows,
            cols,
        }
    }

    /// Get sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get mutable sample data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the grid and return its samples.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Flat index of `(row, col)`.
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Sample at `(row, col)`, or `None` outside the grid.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[self.index(row, col)])
        } else {
            None
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the grid has no samples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for ImageGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGrid")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("samples", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_size_check() {
        let err = ImageGrid::from_f32(vec![0.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, ComputeError::BufferSizeMismatch { expected: 6, actual: 5 }));
    }

    #[test]
    fn test_row_major_addressing() {
        let grid = ImageGrid::from_f32((0..6).map(|v| v as f32).collect(), 2, 3).unwrap();
        assert_eq!(grid.index(1, 2), 5);
        assert_eq!(grid.get(1, 0), Some(3.0));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.get(0, 3), None);
    }
}
