//! Work-grid sizing and dispatch ranges.
//!
//! The reduction kernel runs `global_size = compute_units * local_size`
//! work items split into `buckets = global_size / local_size` work groups,
//! one partial sum per group. Sizes come from the device query; overrides
//! only replace the queried values, they never produce a ragged grid.

use crate::device::DeviceInfo;
use crate::{ComputeError, ComputeResult};

/// Validated 1D work grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGrid {
    /// Compute units the grid was sized for.
    pub compute_units: u32,
    /// Work items per work group.
    pub local_size: usize,
    /// Total work items.
    pub global_size: usize,
}

/// Caller-supplied replacements for queried device capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridOverrides {
    pub local_size: Option<usize>,
    pub compute_units: Option<u32>,
}

impl WorkGrid {
    /// Grid of `compute_units` groups of `local_size` items.
    pub fn from_capabilities(compute_units: u32, local_size: usize) -> ComputeResult<Self> {
        if compute_units == 0 {
            return Err(ComputeError::InvalidGrid("device reports zero compute units".into()));
        }
        if local_size == 0 {
            return Err(ComputeError::InvalidGrid("local size must be non-zero".into()));
        }
        let global_size = (compute_units as usize)
            .checked_mul(local_size)
            .ok_or_else(|| ComputeError::InvalidGrid(format!(
                "{compute_units} compute units x {local_size} items overflows"
            )))?;
        Ok(Self { compute_units, local_size, global_size })
    }

    /// Grid from an explicit global size. The global size must be a
    /// multiple of the local size.
    pub fn with_global(global_size: usize, local_size: usize) -> ComputeResult<Self> {
        if local_size == 0 || global_size == 0 {
            return Err(ComputeError::InvalidGrid(format!(
                "global_size={global_size}, local_size={local_size} must be non-zero"
            )));
        }
        if global_size % local_size != 0 {
            return Err(ComputeError::InvalidGrid(format!(
                "global_size={global_size} is not a multiple of local_size={local_size}"
            )));
        }
        let groups = global_size / local_size;
        let compute_units = u32::try_from(groups)
            .map_err(|_| ComputeError::InvalidGrid(format!("{groups} work groups exceeds u32")))?;
        Ok(Self { compute_units, local_size, global_size })
    }

    /// Size the grid from a device query.
    ///
    /// The local size is the override, else the device's fixed local size,
    /// else its maximum work-group size.
    pub fn from_device(info: &DeviceInfo, overrides: GridOverrides) -> ComputeResult<Self> {
        let local_size = overrides
            .local_size
            .or(info.fixed_local_size)
            .unwrap_or(info.max_work_group_size);
        if local_size > info.max_work_group_size {
            return Err(ComputeError::InvalidGrid(format!(
                "local_size={local_size} exceeds device maximum {}",
                info.max_work_group_size
            )));
        }
        if let Some(fixed) = info.fixed_local_size {
            if local_size != fixed {
                return Err(ComputeError::InvalidGrid(format!(
                    "device '{}' only runs work groups of {fixed}, requested {local_size}",
                    info.name
                )));
            }
        }
        let compute_units = overrides.compute_units.unwrap_or(info.compute_units);
        Self::from_capabilities(compute_units, local_size)
    }

    /// Number of work groups, and so of partial sums.
    pub fn buckets(&self) -> usize {
        self.global_size / self.local_size
    }

    /// Total terms summed when each item handles `floats_per_item`.
    ///
    /// Fails with [`ComputeError::InvalidGrid`] when the count does not fit
    /// a `usize`, so term indices never wrap during dispatch.
    pub fn total_terms(&self, floats_per_item: usize) -> ComputeResult<usize> {
        self.global_size.checked_mul(floats_per_item).ok_or_else(|| {
            ComputeError::InvalidGrid(format!(
                "{} work items x {floats_per_item} terms overflows",
                self.global_size
            ))
        })
    }

    /// Dispatch range for this grid.
    pub fn range(&self) -> NdRange {
        NdRange::Linear { global: self.global_size, local: self.local_size }
    }
}

/// Dispatch shape for one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdRange {
    /// 1D range split into groups of `local` items.
    Linear { global: usize, local: usize },
    /// 2D range with one item per grid cell; the device picks group shape.
    Grid2d { rows: usize, cols: usize },
}

impl NdRange {
    /// Total work items.
    pub fn work_items(&self) -> usize {
        match *self {
            Self::Linear { global, .. } => global,
            Self::Grid2d { rows, cols } => rows * cols,
        }
    }
}
