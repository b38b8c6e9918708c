//! Host session: the context, queue, programs, kernels and buffers of one
//! device, walked through a fixed sequence of stages.
//!
//! ```text
//! Uninitialized -> ContextCreated -> ProgramBuilt -> KernelArgsBound
//!               -> Dispatched -> ResultsRead -> Released
//! ```
//!
//! Every call checks the stage it needs and fails with
//! [`ComputeError::InvalidStage`] otherwise. Dispatch is synchronous: when
//! [`ComputeSession::enqueue`] returns, output buffers hold the results.
//! Resources are released buffers first, then the queue, kernels, programs
//! and finally the context.

use tracing::{debug, info, trace};

use crate::backend::{DevicePrimitives, PiLaunch, RotateLaunch, open_device};
use crate::device::DeviceInfo;
use crate::grid::{NdRange, WorkGrid};
use crate::kernel::{Kernel, KernelArg, KernelKind};
use crate::pi::TermSeries;
use crate::program::{BuildOptions, Program, ProgramId, ProgramSource, build_program};
use crate::rotate::RotationParams;
use crate::{ComputeError, ComputeResult};

/// Session lifecycle stage. Stages are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStage {
    Uninitialized,
    ContextCreated,
    ProgramBuilt,
    KernelArgsBound,
    Dispatched,
    ResultsRead,
    Released,
}

/// Handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Handle to a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub(crate) usize);

/// Initial buffer contents.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferInit {
    /// `len` zeros.
    Zeroed(usize),
    /// `len` copies of a value.
    Filled(usize, f32),
    /// Copy of host data.
    CopyFrom(Vec<f32>),
}

/// How kernels may access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BufferAccess {
    fn writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Resource classes in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Queue,
    Kernel,
    Program,
    Context,
}

#[derive(Debug)]
struct DeviceBuffer {
    data: Vec<f32>,
    access: BufferAccess,
}

/// One device's host-side state.
pub struct ComputeSession {
    device: Box<dyn DevicePrimitives>,
    stage: SessionStage,
    programs: Vec<Program>,
    kernels: Vec<Kernel>,
    buffers: Vec<DeviceBuffer>,
}

impl ComputeSession {
    /// Create the context and in-order queue for a device.
    pub fn create(info: &DeviceInfo) -> ComputeResult<Self> {
        trace!(device = %info.name, "ComputeSession::create");
        let device = open_device(info)?;
        Ok(Self::with_primitives(device))
    }

    /// Session over already opened primitives.
    pub fn with_primitives(device: Box<dyn DevicePrimitives>) -> Self {
        debug!(device = %device.info().name, backend = device.name(), "context and queue created");
        Self {
            device,
            stage: SessionStage::ContextCreated,
            programs: Vec::new(),
            kernels: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn device(&self) -> &DeviceInfo {
        self.device.info()
    }

    fn require(&self, operation: &'static str, required: SessionStage) -> ComputeResult<()> {
        if self.stage < required || self.stage == SessionStage::Released {
            return Err(ComputeError::InvalidStage { operation, required, actual: self.stage });
        }
        Ok(())
    }

    fn advance(&mut self, to: SessionStage) {
        if to != self.stage {
            debug!(from = ?self.stage, to = ?to, "session stage");
            self.stage = to;
        }
    }

    /// Build a program for this session's device.
    pub fn build_program(&mut self, source: &ProgramSource, options: &BuildOptions) -> ComputeResult<ProgramId> {
        trace!(label = source.label(), "ComputeSession::build_program");
        self.require("build_program", SessionStage::ContextCreated)?;
        let program = build_program(source, &self.device.info().target(), options)?;
        self.programs.push(program);
        self.advance(self.stage.max(SessionStage::ProgramBuilt));
        Ok(ProgramId(self.programs.len() - 1))
    }

    pub fn program(&self, id: ProgramId) -> ComputeResult<&Program> {
        self.programs
            .get(id.0)
            .ok_or_else(|| ComputeError::InvalidArgument(format!("unknown program {}", id.0)))
    }

    /// Create a kernel for entry point `entry`.
    pub fn create_kernel(&mut self, program: ProgramId, entry: &str) -> ComputeResult<KernelId> {
        trace!(entry, "ComputeSession::create_kernel");
        self.require("create_kernel", SessionStage::ProgramBuilt)?;
        let prog = self.programs.get(program.0).ok_or_else(|| ComputeError::KernelCreation {
            kernel: entry.to_string(),
            reason: format!("unknown program {}", program.0),
        })?;
        let device = self.device.info();
        if prog.kind() != device.kind {
            return Err(ComputeError::KernelCreation {
                kernel: entry.to_string(),
                reason: format!("program was built for {}, device is {}", prog.kind(), device.kind),
            });
        }
        let kernel = Kernel::new(program, prog, entry)?;
        self.kernels.push(kernel);
        Ok(KernelId(self.kernels.len() - 1))
    }

    /// Allocate a device buffer.
    pub fn create_buffer(&mut self, init: BufferInit, access: BufferAccess) -> ComputeResult<BufferId> {
        self.require("create_buffer", SessionStage::ContextCreated)?;
        let data = match init {
            BufferInit::Zeroed(len) => vec![0.0; len],
            BufferInit::Filled(len, value) => vec![value; len],
            BufferInit::CopyFrom(data) => data,
        };
        trace!(len = data.len(), ?access, "ComputeSession::create_buffer");
        self.buffers.push(DeviceBuffer { data, access });
        Ok(BufferId(self.buffers.len() - 1))
    }

    /// Bind argument `index` of a kernel.
    pub fn set_arg(&mut self, kernel: KernelId, index: usize, arg: KernelArg) -> ComputeResult<()> {
        self.require("set_arg", SessionStage::ProgramBuilt)?;
        if let KernelArg::Buffer(id) = arg {
            if id.0 >= self.buffers.len() {
                return Err(ComputeError::ArgumentBinding {
                    kernel: self.kernel_name(kernel),
                    index,
                    reason: format!("unknown buffer {}", id.0),
                });
            }
        }
        let k = self.kernels.get_mut(kernel.0).ok_or_else(|| ComputeError::ArgumentBinding {
            kernel: format!("#{}", kernel.0),
            index,
            reason: "unknown kernel".into(),
        })?;
        k.set_arg(index, arg)?;
        if k.all_bound() {
            self.advance(self.stage.max(SessionStage::KernelArgsBound));
        }
        Ok(())
    }

    fn kernel_name(&self, kernel: KernelId) -> String {
        self.kernels
            .get(kernel.0)
            .map(|k| k.name().to_string())
            .unwrap_or_else(|| format!("#{}", kernel.0))
    }

    /// Validate and run a kernel over `range`. Blocks until done.
    pub fn enqueue(&mut self, kernel: KernelId, range: NdRange) -> ComputeResult<()> {
        trace!(kernel = kernel.0, ?range, "ComputeSession::enqueue");
        self.require("enqueue", SessionStage::KernelArgsBound)?;
        let k = self
            .kernels
            .get(kernel.0)
            .cloned()
            .ok_or_else(|| ComputeError::Enqueue(format!("unknown kernel {}", kernel.0)))?;
        if let Some(index) = k.first_unbound() {
            return Err(ComputeError::Enqueue(format!("argument {index} of '{}' is not set", k.name())));
        }

        match k.kind() {
            KernelKind::Rotate => self.enqueue_rotate(&k, range)?,
            KernelKind::PiSum(series) => self.enqueue_partial_sums(&k, series, range)?,
        }
        self.advance(SessionStage::Dispatched);
        Ok(())
    }

    fn int_arg(k: &Kernel, index: usize) -> ComputeResult<i32> {
        match k.arg(index) {
            Some(KernelArg::Int(v)) => Ok(v),
            _ => Err(ComputeError::Enqueue(format!("argument {index} of '{}' must be an int", k.name()))),
        }
    }

    fn float_arg(k: &Kernel, index: usize) -> ComputeResult<f32> {
        match k.arg(index) {
            Some(KernelArg::Float(v)) => Ok(v),
            _ => Err(ComputeError::Enqueue(format!("argument {index} of '{}' must be a float", k.name()))),
        }
    }

    fn buffer_arg(k: &Kernel, index: usize) -> ComputeResult<BufferId> {
        match k.arg(index) {
            Some(KernelArg::Buffer(id)) => Ok(id),
            _ => Err(ComputeError::Enqueue(format!("argument {index} of '{}' must be a buffer", k.name()))),
        }
    }

    fn size_arg(k: &Kernel, index: usize) -> ComputeResult<usize> {
        let v = Self::int_arg(k, index)?;
        usize::try_from(v)
            .map_err(|_| ComputeError::Enqueue(format!("argument {index} of '{}' is negative ({v})", k.name())))
    }

    fn enqueue_rotate(&mut self, k: &Kernel, range: NdRange) -> ComputeResult<()> {
        let src = Self::buffer_arg(k, 0)?;
        let dst = Self::buffer_arg(k, 1)?;
        let params = RotationParams::new(Self::float_arg(k, 2)?, Self::float_arg(k, 3)?)
            .map_err(|e| ComputeError::Enqueue(e.to_string()))?;
        let rows = Self::size_arg(k, 4)?;
        let cols = Self::size_arg(k, 5)?;
        let pivot = (Self::float_arg(k, 6)?, Self::float_arg(k, 7)?);

        let NdRange::Grid2d { rows: range_rows, cols: range_cols } = range else {
            return Err(ComputeError::Enqueue("rotate needs a 2D range".into()));
        };
        if (range_rows, range_cols) != (rows, cols) {
            return Err(ComputeError::Enqueue(format!(
                "range {range_rows}x{range_cols} does not match image {rows}x{cols}"
            )));
        }
        if src == dst {
            return Err(ComputeError::Enqueue("rotate source and destination must differ".into()));
        }
        let cells = rows * cols;
        for id in [src, dst] {
            let len = self.buffers[id.0].data.len();
            if len != cells {
                return Err(ComputeError::Enqueue(format!(
                    "buffer {} holds {len} samples, image has {cells}",
                    id.0
                )));
            }
        }
        if !self.buffers[dst.0].access.writable() {
            return Err(ComputeError::Enqueue("rotate destination is read-only".into()));
        }

        let launch = RotateLaunch { rows, cols, params, pivot };
        let program = &self.programs[k.program().0];
        let mut out = std::mem::take(&mut self.buffers[dst.0].data);
        let result = self
            .device
            .exec_rotate(program, k.name(), &self.buffers[src.0].data, &mut out, &launch);
        self.buffers[dst.0].data = out;
        result?;

        info!(rows, cols, device = %self.device.info().name, "rotation dispatched");
        Ok(())
    }

    fn enqueue_partial_sums(&mut self, k: &Kernel, series: TermSeries, range: NdRange) -> ComputeResult<()> {
        let floats_per_item = Self::size_arg(k, 0)?;
        let local_arg = Self::size_arg(k, 1)?;
        let local_bytes = match k.arg(2) {
            Some(KernelArg::Local(bytes)) => bytes,
            _ => return Err(ComputeError::Enqueue("argument 2 must be local memory".into())),
        };
        let result = Self::buffer_arg(k, 3)?;

        let NdRange::Linear { global, local } = range else {
            return Err(ComputeError::Enqueue(format!("'{}' needs a 1D range", k.name())));
        };
        let grid = WorkGrid::with_global(global, local).map_err(|e| ComputeError::Enqueue(e.to_string()))?;
        if floats_per_item == 0 {
            return Err(ComputeError::Enqueue("floats_per_item must be non-zero".into()));
        }
        grid.total_terms(floats_per_item)
            .map_err(|e| ComputeError::Enqueue(e.to_string()))?;
        if local_arg != local {
            return Err(ComputeError::Enqueue(format!(
                "local_size argument {local_arg} does not match range local size {local}"
            )));
        }
        let needed = local * std::mem::size_of::<f32>();
        if local_bytes < needed {
            return Err(ComputeError::Enqueue(format!(
                "local memory of {local_bytes} bytes is too small for {local} items ({needed} bytes)"
            )));
        }
        let device = self.device.info();
        if local > device.max_work_group_size {
            return Err(ComputeError::Enqueue(format!(
                "local size {local} exceeds device maximum {}",
                device.max_work_group_size
            )));
        }
        let program = &self.programs[k.program().0];
        if let Some(compiled) = program.local_size() {
            if compiled != local {
                return Err(ComputeError::Enqueue(format!(
                    "program was built for LOCAL_SIZE={compiled}, range uses {local}"
                )));
            }
        }
        let buckets = grid.buckets();
        let buffer = &self.buffers[result.0];
        if buffer.data.len() < buckets {
            return Err(ComputeError::Enqueue(format!(
                "result buffer holds {} values, {buckets} work groups need one each",
                buffer.data.len()
            )));
        }
        if !buffer.access.writable() {
            return Err(ComputeError::Enqueue("result buffer is read-only".into()));
        }

        let launch = PiLaunch { series, floats_per_item, grid };
        let mut out = std::mem::take(&mut self.buffers[result.0].data);
        let run = self.device.exec_partial_sums(program, k.name(), &launch, &mut out);
        self.buffers[result.0].data = out;
        run?;

        info!(global, local, buckets, series = series.name(), "partial sums dispatched");
        Ok(())
    }

    /// Copy a buffer back to the host.
    pub fn read_buffer(&mut self, buffer: BufferId) -> ComputeResult<Vec<f32>> {
        trace!(buffer = buffer.0, "ComputeSession::read_buffer");
        if self.stage < SessionStage::Dispatched || self.stage == SessionStage::Released {
            return Err(ComputeError::Readback(format!(
                "nothing has been dispatched (session is {:?})",
                self.stage
            )));
        }
        let data = self
            .buffers
            .get(buffer.0)
            .map(|b| b.data.clone())
            .ok_or_else(|| ComputeError::Readback(format!("unknown buffer {}", buffer.0)))?;
        self.advance(SessionStage::ResultsRead);
        Ok(data)
    }

    /// Free every resource and return the order they were freed in.
    pub fn release(&mut self) -> ComputeResult<Vec<ResourceKind>> {
        if self.stage == SessionStage::Released {
            return Err(ComputeError::InvalidStage {
                operation: "release",
                required: SessionStage::ContextCreated,
                actual: self.stage,
            });
        }

        let mut order = Vec::new();
        for (i, _) in self.buffers.drain(..).enumerate() {
            debug!(buffer = i, "released buffer");
            order.push(ResourceKind::Buffer);
        }
        debug!("released queue");
        order.push(ResourceKind::Queue);
        for k in self.kernels.drain(..) {
            debug!(kernel = k.name(), "released kernel");
            order.push(ResourceKind::Kernel);
        }
        for p in self.programs.drain(..) {
            debug!(program = p.label(), "released program");
            order.push(ResourceKind::Program);
        }
        debug!(device = %self.device.info().name, "released context");
        order.push(ResourceKind::Context);

        self.advance(SessionStage::Released);
        Ok(order)
    }
}

impl Drop for ComputeSession {
    fn drop(&mut self) {
        if self.stage != SessionStage::Released {
            let _ = self.release();
        }
    }
}
