//! Execution backends.
//!
//! # Architecture
//!
//! ```text
//! ComputeSession
//!     └── Box<dyn DevicePrimitives>
//!             ├── CpuDevice  (rayon, work groups emulated on the host)
//!             └── WgpuDevice (WGSL compute pipelines)
//! ```
//!
//! The session validates arguments and ranges; a backend only runs a launch
//! that is already known to be well formed.

mod cpu_backend;
mod detect;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

pub use cpu_backend::CpuDevice;
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuDevice;

use std::fmt;

use crate::device::DeviceInfo;
use crate::grid::WorkGrid;
use crate::pi::TermSeries;
use crate::program::Program;
use crate::rotate::RotationParams;
use crate::{ComputeError, ComputeResult};

/// Available compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Best available (wgpu > CPU).
    #[default]
    Auto,
    /// Host CPU using rayon.
    Cpu,
    /// wgpu (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto => true,
            Self::Cpu => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => WgpuDevice::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One rotation dispatch over a `rows x cols` grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateLaunch {
    pub rows: usize,
    pub cols: usize,
    pub params: RotationParams,
    /// Pivot `(x, y)` in column/row units.
    pub pivot: (f32, f32),
}

/// One partial-sum dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiLaunch {
    pub series: TermSeries,
    pub floats_per_item: usize,
    pub grid: WorkGrid,
}

/// Kernel execution on one device.
///
/// Calls are blocking: when one returns, the outputs are in host memory.
pub trait DevicePrimitives: Send + Sync {
    /// Device this instance executes on.
    fn info(&self) -> &DeviceInfo;

    /// Backend name.
    fn name(&self) -> &'static str;

    /// Run the `entry` rotation kernel of `program`.
    ///
    /// `dst` arrives pre-filled; cells no sample lands in keep their value.
    fn exec_rotate(
        &self,
        program: &Program,
        entry: &str,
        src: &[f32],
        dst: &mut [f32],
        launch: &RotateLaunch,
    ) -> ComputeResult<()>;

    /// Run the `entry` partial-sum kernel of `program`, writing one value
    /// per work group into `out[..launch.grid.buckets()]`.
    fn exec_partial_sums(
        &self,
        program: &Program,
        entry: &str,
        launch: &PiLaunch,
        out: &mut [f32],
    ) -> ComputeResult<()>;
}

/// Open the execution primitives for a device.
pub fn open_device(info: &DeviceInfo) -> ComputeResult<Box<dyn DevicePrimitives>> {
    match info.backend {
        Backend::Cpu => Ok(Box::new(CpuDevice::new(info.clone()))),
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                Ok(Box::new(WgpuDevice::open(info)?))
            }
            #[cfg(not(feature = "wgpu"))]
            {
                Err(ComputeError::BackendNotAvailable(
                    "wgpu feature not enabled".to_string()
                ))
            }
        }
        Backend::Auto => Err(ComputeError::BackendNotAvailable(format!(
            "device '{}' has no concrete backend",
            info.name
        ))),
    }
}
