//! Kernel objects and their argument signatures.

use std::fmt;

use crate::pi::TermSeries;
use crate::program::{Program, ProgramId};
use crate::session::BufferId;
use crate::{ComputeError, ComputeResult};

/// Kind of value a kernel parameter takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Float,
    /// Work-group local memory, given as a byte size.
    Local,
    Buffer,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Local => "local",
            Self::Buffer => "buffer",
        })
    }
}

/// Value bound to one kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int(i32),
    Float(f32),
    Local(usize),
    Buffer(BufferId),
}

impl KernelArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Float(_) => ArgKind::Float,
            Self::Local(_) => ArgKind::Local,
            Self::Buffer(_) => ArgKind::Buffer,
        }
    }
}

const ROTATE_SIGNATURE: &[ArgKind] = &[
    ArgKind::Buffer, // src
    ArgKind::Buffer, // dst
    ArgKind::Float,  // sin
    ArgKind::Float,  // cos
    ArgKind::Int,    // rows
    ArgKind::Int,    // cols
    ArgKind::Float,  // pivot x
    ArgKind::Float,  // pivot y
];

const PI_SIGNATURE: &[ArgKind] = &[
    ArgKind::Int,    // floats per item
    ArgKind::Int,    // local size
    ArgKind::Local,  // local scratch
    ArgKind::Buffer, // result
];

/// What an entry point computes. Backends dispatch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Rotate,
    PiSum(TermSeries),
}

impl KernelKind {
    /// Kind for an entry point name, if the host knows how to launch it.
    pub fn for_entry(entry: &str) -> Option<Self> {
        match entry {
            "rotate" => Some(Self::Rotate),
            other => TermSeries::from_entry_point(other).map(Self::PiSum),
        }
    }

    pub fn signature(&self) -> &'static [ArgKind] {
        match self {
            Self::Rotate => ROTATE_SIGNATURE,
            Self::PiSum(_) => PI_SIGNATURE,
        }
    }
}

/// An entry point of a built program plus its bound arguments.
#[derive(Debug, Clone)]
pub struct Kernel {
    name: String,
    kind: KernelKind,
    program: ProgramId,
    args: Vec<Option<KernelArg>>,
}

impl Kernel {
    /// Create a kernel for `entry` of `program`.
    pub fn new(program_id: ProgramId, program: &Program, entry: &str) -> ComputeResult<Self> {
        if !program.has_entry_point(entry) {
            return Err(ComputeError::KernelCreation {
                kernel: entry.to_string(),
                reason: format!("program '{}' has no such entry point", program.label()),
            });
        }
        let kind = KernelKind::for_entry(entry).ok_or_else(|| ComputeError::KernelCreation {
            kernel: entry.to_string(),
            reason: "entry point has no known launch signature".into(),
        })?;
        Ok(Self {
            name: entry.to_string(),
            kind,
            program: program_id,
            args: vec![None; kind.signature().len()],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Bind argument `index`, checking it against the signature.
    pub fn set_arg(&mut self, index: usize, arg: KernelArg) -> ComputeResult<()> {
        let signature = self.kind.signature();
        let expected = *signature.get(index).ok_or_else(|| ComputeError::ArgumentBinding {
            kernel: self.name.clone(),
            index,
            reason: format!("kernel takes {} arguments", signature.len()),
        })?;
        if arg.kind() != expected {
            return Err(ComputeError::ArgumentBinding {
                kernel: self.name.clone(),
                index,
                reason: format!("expected {expected}, got {}", arg.kind()),
            });
        }
        if let KernelArg::Local(0) = arg {
            return Err(ComputeError::ArgumentBinding {
                kernel: self.name.clone(),
                index,
                reason: "local memory size must be non-zero".into(),
            });
        }
        self.args[index] = Some(arg);
        Ok(())
    }

    pub fn arg(&self, index: usize) -> Option<KernelArg> {
        self.args.get(index).copied().flatten()
    }

    pub fn all_bound(&self) -> bool {
        self.args.iter().all(Option::is_some)
    }

    /// Index of the first unbound argument.
    pub fn first_unbound(&self) -> Option<usize> {
        self.args.iter().position(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_entry() {
        assert_eq!(KernelKind::for_entry("rotate"), Some(KernelKind::Rotate));
        assert_eq!(KernelKind::for_entry("pi_calc"), Some(KernelKind::PiSum(TermSeries::Leibniz)));
        assert_eq!(
            KernelKind::for_entry("pi_calc_quadrant"),
            Some(KernelKind::PiSum(TermSeries::QuarterCircle))
        );
        assert_eq!(KernelKind::for_entry("main"), None);
    }

    #[test]
    fn test_signatures() {
        assert_eq!(KernelKind::Rotate.signature().len(), 8);
        assert_eq!(KernelKind::PiSum(TermSeries::Leibniz).signature()[2], ArgKind::Local);
    }
}
