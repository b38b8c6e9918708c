//! End-to-end demo pipelines.
//!
//! Each call opens a session on the given device, builds the program, binds
//! arguments, dispatches once, reads the result back and releases every
//! resource before returning.
//!
//! ```ignore
//! use offload_compute::{pipeline, DeviceInfo, PiConfig, TermSeries};
//!
//! let config = PiConfig::default()
//!     .series(TermSeries::QuarterCircle)
//!     .floats_per_item(8)
//!     .local_size(64);
//! let run = pipeline::estimate_pi(&DeviceInfo::host_cpu(), &config)?;
//! ```

use tracing::{debug, info, trace};

use crate::device::DeviceInfo;
use crate::grid::{GridOverrides, NdRange, WorkGrid};
use crate::image::ImageGrid;
use crate::kernel::KernelArg;
use crate::kernels::BuiltinKernel;
use crate::pi::{DEFAULT_FLOATS_PER_ITEM, PiEstimate, TermSeries};
use crate::program::ProgramSource;
use crate::rotate::{Pivot, RotationParams, RotationReport, SENTINEL};
use crate::session::{BufferAccess, BufferInit, ComputeSession};
use crate::{ComputeError, ComputeResult};

fn int_arg(value: usize, what: &str) -> ComputeResult<KernelArg> {
    i32::try_from(value)
        .map(KernelArg::Int)
        .map_err(|_| ComputeError::InvalidArgument(format!("{what}={value} does not fit a kernel int")))
}

/// Pi estimation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PiConfig {
    pub series: TermSeries,
    /// Consecutive terms summed by each work item.
    pub floats_per_item: usize,
    /// Replacements for the queried device sizes.
    pub overrides: GridOverrides,
    /// Kernel to run instead of the built-in one.
    pub program: Option<ProgramSource>,
}

impl Default for PiConfig {
    fn default() -> Self {
        Self {
            series: TermSeries::default(),
            floats_per_item: DEFAULT_FLOATS_PER_ITEM,
            overrides: GridOverrides::default(),
            program: None,
        }
    }
}

impl PiConfig {
    pub fn series(mut self, series: TermSeries) -> Self {
        self.series = series;
        self
    }

    pub fn floats_per_item(mut self, n: usize) -> Self {
        self.floats_per_item = n;
        self
    }

    pub fn local_size(mut self, n: usize) -> Self {
        self.overrides.local_size = Some(n);
        self
    }

    pub fn compute_units(mut self, n: u32) -> Self {
        self.overrides.compute_units = Some(n);
        self
    }

    /// Use a user-supplied kernel text or precompiled binary.
    pub fn program(mut self, program: ProgramSource) -> Self {
        self.program = Some(program);
        self
    }
}

/// Result of [`estimate_pi`].
#[derive(Debug, Clone)]
pub struct PiRun {
    pub device_name: String,
    pub grid: WorkGrid,
    pub estimate: PiEstimate,
}

/// Run the partial-sum kernel on `device` and reduce on the host.
pub fn estimate_pi(device: &DeviceInfo, config: &PiConfig) -> ComputeResult<PiRun> {
    trace!(device = %device.name, series = config.series.name(), "pipeline::estimate_pi");
    if config.floats_per_item == 0 {
        return Err(ComputeError::InvalidArgument("floats_per_item must be non-zero".into()));
    }
    let grid = WorkGrid::from_device(device, config.overrides)?;
    let total_terms = grid.total_terms(config.floats_per_item)?;
    debug!(
        compute_units = grid.compute_units,
        local_size = grid.local_size,
        global_size = grid.global_size,
        buckets = grid.buckets(),
        "work grid"
    );

    let builtin = BuiltinKernel::Pi;
    let source = config.program.clone().unwrap_or_else(|| builtin.source());

    let mut session = ComputeSession::create(device)?;
    let program = session.build_program(&source, &builtin.build_options(grid.local_size))?;
    let kernel = session.create_kernel(program, config.series.entry_point())?;
    let result = session.create_buffer(BufferInit::Zeroed(grid.buckets()), BufferAccess::WriteOnly)?;

    session.set_arg(kernel, 0, int_arg(config.floats_per_item, "floats_per_item")?)?;
    session.set_arg(kernel, 1, int_arg(grid.local_size, "local_size")?)?;
    session.set_arg(kernel, 2, KernelArg::Local(grid.local_size * std::mem::size_of::<f32>()))?;
    session.set_arg(kernel, 3, KernelArg::Buffer(result))?;

    session.enqueue(kernel, grid.range())?;
    let partials = session.read_buffer(result)?;
    session.release()?;

    let estimate = PiEstimate::from_partials(partials);
    info!(pi = estimate.pi, terms = total_terms, "pi estimated");
    Ok(PiRun {
        device_name: device.name.clone(),
        grid,
        estimate,
    })
}

/// Image rotation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationConfig {
    pub params: RotationParams,
    pub pivot: Pivot,
    /// Value destination cells start with.
    pub sentinel: f32,
    /// Kernel to run instead of the built-in one.
    pub program: Option<ProgramSource>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            params: RotationParams::default(),
            pivot: Pivot::default(),
            sentinel: SENTINEL,
            program: None,
        }
    }
}

impl RotationConfig {
    pub fn params(mut self, params: RotationParams) -> Self {
        self.params = params;
        self
    }

    /// Set the angle in degrees.
    pub fn angle(self, degrees: f32) -> ComputeResult<Self> {
        Ok(self.params(RotationParams::from_degrees(degrees)?))
    }

    pub fn pivot(mut self, pivot: Pivot) -> Self {
        self.pivot = pivot;
        self
    }

    pub fn sentinel(mut self, sentinel: f32) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn program(mut self, program: ProgramSource) -> Self {
        self.program = Some(program);
        self
    }
}

/// Result of [`rotate_image`].
#[derive(Debug, Clone)]
pub struct RotationRun {
    pub device_name: String,
    pub output: ImageGrid,
    pub report: RotationReport,
}

/// Rotate `src` on `device`.
pub fn rotate_image(device: &DeviceInfo, src: &ImageGrid, config: &RotationConfig) -> ComputeResult<RotationRun> {
    trace!(device = %device.name, rows = src.rows, cols = src.cols, "pipeline::rotate_image");
    let (rows, cols) = (src.rows, src.cols);
    let (pivot_x, pivot_y) = config.pivot.coords(rows, cols);

    let builtin = BuiltinKernel::Rotate;
    let source = config.program.clone().unwrap_or_else(|| builtin.source());

    let mut session = ComputeSession::create(device)?;
    let program = session.build_program(&source, &builtin.build_options(1))?;
    let kernel = session.create_kernel(program, "rotate")?;
    let src_buf = session.create_buffer(BufferInit::CopyFrom(src.data().to_vec()), BufferAccess::ReadOnly)?;
    let dst_buf = session.create_buffer(BufferInit::Filled(src.len(), config.sentinel), BufferAccess::WriteOnly)?;

    session.set_arg(kernel, 0, KernelArg::Buffer(src_buf))?;
    session.set_arg(kernel, 1, KernelArg::Buffer(dst_buf))?;
    session.set_arg(kernel, 2, KernelArg::Float(config.params.sin_theta))?;
    session.set_arg(kernel, 3, KernelArg::Float(config.params.cos_theta))?;
    session.set_arg(kernel, 4, int_arg(rows, "rows")?)?;
    session.set_arg(kernel, 5, int_arg(cols, "cols")?)?;
    session.set_arg(kernel, 6, KernelArg::Float(pivot_x))?;
    session.set_arg(kernel, 7, KernelArg::Float(pivot_y))?;

    session.enqueue(kernel, NdRange::Grid2d { rows, cols })?;
    let data = session.read_buffer(dst_buf)?;
    session.release()?;

    let output = ImageGrid::from_f32(data, rows, cols)?;
    let report = RotationReport::measure(&output, config.sentinel, src.len());
    info!(
        written = report.written_cells,
        holes = report.holes,
        dropped = report.dropped,
        "image rotated"
    );
    Ok(RotationRun {
        device_name: device.name.clone(),
        output,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_floats_per_item_rejected() {
        let config = PiConfig::default().floats_per_item(0);
        assert!(estimate_pi(&DeviceInfo::host_cpu(), &config).is_err());
    }

    #[test]
    fn test_config_setters() {
        let c = PiConfig::default().local_size(32).compute_units(2).series(TermSeries::QuarterCircle);
        assert_eq!(c.overrides, GridOverrides { local_size: Some(32), compute_units: Some(2) });
        assert_eq!(c.series, TermSeries::QuarterCircle);

        let r = RotationConfig::default().angle(90.0).unwrap().pivot(Pivot::Center);
        assert_eq!(r.params.sin_theta, 1.0);
        assert_eq!(r.pivot, Pivot::Center);
        assert_eq!(r.sentinel, SENTINEL);
    }
}
