//! Heterogeneous compute host API for the offload demos.
//!
//! Provides a small OpenCL-style host layer (devices, programs, kernels,
//! sessions) over a CPU (rayon) backend and an optional wgpu backend, plus
//! the two demo kernels: image rotation and the Pi partial-sum reduction.
//!
//! # Architecture
//!
//! ```text
//! pipeline (estimate_pi / rotate_image)
//!     └── ComputeSession (stage machine, buffers, kernel args)
//!             └── DevicePrimitives trait
//!                     ├── CpuDevice  (rayon, emulated work groups)
//!                     └── WgpuDevice (WGSL compute shaders)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use offload_compute::{select_device, DeviceSelector, pipeline, PiConfig};
//!
//! let device = select_device(DeviceSelector::Default)?;
//! let run = pipeline::estimate_pi(&device, &PiConfig::default())?;
//! println!("Pi is calculated as: {}", run.estimate.pi);
//! ```

pub mod backend;
pub mod device;
pub mod grid;
pub mod image;
pub mod kernel;
pub mod kernels;
pub mod pi;
pub mod pipeline;
pub mod program;
pub mod rotate;
pub mod session;

pub use backend::{
    Backend, BackendInfo, CpuDevice, DevicePrimitives, PiLaunch, RotateLaunch,
    describe_backends, detect_backends, open_device, select_best_backend,
};
#[cfg(feature = "wgpu")]
pub use backend::WgpuDevice;
pub use device::{DeviceInfo, DeviceKind, DeviceSelector, PlatformInfo, describe_platforms, enumerate_platforms, select_device};
pub use grid::{GridOverrides, NdRange, WorkGrid};
pub use image::ImageGrid;
pub use kernel::{ArgKind, Kernel, KernelArg, KernelKind};
pub use kernels::BuiltinKernel;
pub use pi::{PiEstimate, TermSeries};
pub use pipeline::{PiConfig, PiRun, RotationConfig, RotationRun};
pub use program::{
    BinaryLoader, BuildOptions, Program, ProgramCompiler, ProgramId, ProgramSource, SourceCompiler,
    TargetDescriptor, build_program, compiler_for, precompile,
};
pub use rotate::{Pivot, RotationParams, RotationReport, SENTINEL};
pub use session::{BufferAccess, BufferId, BufferInit, ComputeSession, KernelId, ResourceKind, SessionStage};

use thiserror::Error;

/// Host API errors.
///
/// Every variant is fatal for the demos: the CLI reports it and exits.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Device enumeration failed: {0}")]
    DeviceEnumeration(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Failed to build program: {0}")]
    ProgramBuild(String),

    #[error("Failed to create kernel '{kernel}': {reason}")]
    KernelCreation { kernel: String, reason: String },

    #[error("Couldn't set kernel argument {index} of '{kernel}': {reason}")]
    ArgumentBinding { kernel: String, index: usize, reason: String },

    #[error("Couldn't enqueue the kernel: {0}")]
    Enqueue(String),

    #[error("Couldn't read the buffer: {0}")]
    Readback(String),

    #[error("Device runtime failure: {0}")]
    DeviceRuntime(String),

    #[error("Invalid work grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid session stage: {operation} requires {required:?}, session is {actual:?}")]
    InvalidStage {
        operation: &'static str,
        required: SessionStage,
        actual: SessionStage,
    },

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComputeError {
    /// True for failures raised by the device runtime itself rather than
    /// by a rejected host call. The rotation demo aborts on these.
    pub fn is_device_runtime(&self) -> bool {
        matches!(self, Self::DeviceRuntime(_))
    }
}

pub type ComputeResult<T> = Result<T, ComputeError>;
