//! Built-in WGSL kernel sources.

use crate::program::{BuildOptions, ProgramSource};
use crate::{ComputeError, ComputeResult};

/// Forward-mapped image rotation (`rotate`).
pub const ROTATE: &str = include_str!("../kernels/rotate.wgsl");

/// Pi partial sums (`pi_calc`, `pi_calc_quadrant`). Needs `LOCAL_SIZE`.
pub const PI_CALC: &str = include_str!("../kernels/pi_calc.wgsl");

/// Kernel sources shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKernel {
    Rotate,
    Pi,
}

impl BuiltinKernel {
    pub fn parse(s: &str) -> ComputeResult<Self> {
        match s.to_lowercase().as_str() {
            "rotate" | "rotation" => Ok(Self::Rotate),
            "pi" | "pi_calc" => Ok(Self::Pi),
            other => Err(ComputeError::InvalidArgument(format!("unknown builtin kernel: {other}"))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rotate => "rotate.wgsl",
            Self::Pi => "pi_calc.wgsl",
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Rotate => ROTATE,
            Self::Pi => PI_CALC,
        }
    }

    pub fn source(&self) -> ProgramSource {
        ProgramSource::text(self.label(), self.text())
    }

    /// Defines the kernel needs for a work group of `local_size`.
    pub fn build_options(&self, local_size: usize) -> BuildOptions {
        match self {
            Self::Rotate => BuildOptions::new(),
            Self::Pi => BuildOptions::new().define("LOCAL_SIZE", local_size),
        }
    }
}
