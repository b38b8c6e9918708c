//! CPU backend using rayon for parallelization.
//!
//! Kernels are executed natively rather than interpreted: the entry point
//! selects the Rust implementation, the program supplies the build-time
//! work-group size. Work groups map onto rayon tasks.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;
use tracing::trace;

use super::{DevicePrimitives, PiLaunch, RotateLaunch};
use crate::device::DeviceInfo;
use crate::kernel::KernelKind;
use crate::pi::{group_reduce, work_item_sum};
use crate::program::Program;
use crate::rotate::map_coordinate;
use crate::{ComputeError, ComputeResult};

/// Host device executing kernels on the rayon pool.
pub struct CpuDevice {
    info: DeviceInfo,
}

impl CpuDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self { info }
    }

    fn check_entry(&self, program: &Program, entry: &str) -> ComputeResult<KernelKind> {
        if !program.has_entry_point(entry) {
            return Err(ComputeError::Enqueue(format!(
                "program '{}' has no entry point '{entry}'",
                program.label()
            )));
        }
        KernelKind::for_entry(entry)
            .ok_or_else(|| ComputeError::Enqueue(format!("{} cannot execute '{entry}'", self.info.name)))
    }
}

impl DevicePrimitives for CpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn exec_rotate(
        &self,
        program: &Program,
        entry: &str,
        src: &[f32],
        dst: &mut [f32],
        launch: &RotateLaunch,
    ) -> ComputeResult<()> {
        trace!(entry, rows = launch.rows, cols = launch.cols, "CpuDevice::exec_rotate");
        if self.check_entry(program, entry)? != KernelKind::Rotate {
            return Err(ComputeError::Enqueue(format!("'{entry}' is not a rotation kernel")));
        }
        let (rows, cols) = (launch.rows, launch.cols);
        let cells = rows * cols;
        if src.len() != cells || dst.len() != cells {
            return Err(ComputeError::BufferSizeMismatch {
                expected: cells,
                actual: if src.len() != cells { src.len() } else { dst.len() },
            });
        }

        // Work items write without synchronisation. Destination cells are
        // stored as f32 bits so colliding writes stay well defined; the last
        // store wins.
        let out: Vec<AtomicU32> = dst.iter().map(|v| AtomicU32::new(v.to_bits())).collect();
        (0..rows).into_par_iter().for_each(|row| {
            for col in 0..cols {
                if let Some((dr, dc)) = map_coordinate(row, col, rows, cols, launch.params, launch.pivot) {
                    out[dr * cols + dc].store(src[row * cols + col].to_bits(), Ordering::Relaxed);
                }
            }
        });

        for (d, cell) in dst.iter_mut().zip(out) {
            *d = f32::from_bits(cell.into_inner());
        }
        Ok(())
    }

    fn exec_partial_sums(
        &self,
        program: &Program,
        entry: &str,
        launch: &PiLaunch,
        out: &mut [f32],
    ) -> ComputeResult<()> {
        trace!(entry, global = launch.grid.global_size, local = launch.grid.local_size, "CpuDevice::exec_partial_sums");
        let series = match self.check_entry(program, entry)? {
            KernelKind::PiSum(series) => series,
            KernelKind::Rotate => {
                return Err(ComputeError::Enqueue(format!("'{entry}' is not a reduction kernel")));
            }
        };
        if series != launch.series {
            return Err(ComputeError::Enqueue(format!(
                "'{entry}' computes the {} series, launch asked for {}",
                series.name(),
                launch.series.name()
            )));
        }

        let grid = launch.grid;
        if let Some(fixed) = self.info.fixed_local_size {
            if grid.local_size != fixed {
                return Err(ComputeError::DeviceRuntime(format!(
                    "{} is built for work groups of {fixed}, got {}",
                    self.info.name, grid.local_size
                )));
            }
        }
        let buckets = grid.buckets();
        if out.len() < buckets {
            return Err(ComputeError::BufferSizeMismatch { expected: buckets, actual: out.len() });
        }

        let local_size = grid.local_size;
        let fpi = launch.floats_per_item;
        let total = grid.total_terms(fpi)?;

        out[..buckets].par_iter_mut().enumerate().for_each(|(group, slot)| {
            let mut local = vec![0.0f32; local_size];
            local.par_iter_mut().enumerate().for_each(|(lid, v)| {
                *v = work_item_sum(series, group * local_size + lid, fpi, total);
            });
            // barrier: every work item of the group has stored its value
            *slot = group_reduce(&local);
        });
        Ok(())
    }
}
