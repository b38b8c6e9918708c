//! wgpu backend: programs run as WGSL compute pipelines.
//!
//! Pipelines use automatic layouts, so a user-supplied kernel only has to
//! match the bindings of the built-in one for its entry point:
//!
//! | kernel   | binding 0            | binding 1        | binding 2        |
//! |----------|----------------------|------------------|------------------|
//! | rotate   | `RotateParams` (uniform) | `src` (read) | `dst` (read_write) |
//! | pi_calc* | `PiParams` (uniform) | `result` (read_write) | |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace};
use wgpu::util::DeviceExt;

use super::{Backend, DevicePrimitives, PiLaunch, RotateLaunch};
use crate::device::{DeviceInfo, DeviceKind};
use crate::kernel::KernelKind;
use crate::program::Program;
use crate::{ComputeError, ComputeResult};

/// wgpu does not report compute units; grids are sized with this instead.
pub const WGPU_DEFAULT_COMPUTE_UNITS: u32 = 8;

/// Rotation kernel workgroup shape, fixed in `rotate.wgsl`.
const ROTATE_WORKGROUP: u32 = 16;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RotateParams {
    sin_theta: f32,
    cos_theta: f32,
    pivot_x: f32,
    pivot_y: f32,
    rows: u32,
    cols: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PiParams {
    floats_per_item: u32,
    local_size: u32,
    total_terms: u32,
    _pad: u32,
}

fn to_u32(value: usize, what: &str) -> ComputeResult<u32> {
    u32::try_from(value).map_err(|_| ComputeError::Enqueue(format!("{what}={value} does not fit the GPU kernel")))
}

/// GPU device opened through wgpu.
pub struct WgpuDevice {
    info: DeviceInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: Mutex<HashMap<(u64, String), Arc<wgpu::ComputePipeline>>>,
}

impl WgpuDevice {
    fn instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        })
    }

    fn describe(index: usize, adapter: &wgpu::Adapter) -> DeviceInfo {
        let info = adapter.get_info();
        let limits = adapter.limits();
        DeviceInfo {
            name: info.name.clone(),
            vendor: format!("{:?}", info.backend),
            kind: DeviceKind::Gpu,
            backend: Backend::Wgpu,
            compute_units: WGPU_DEFAULT_COMPUTE_UNITS,
            max_work_group_size: limits.max_compute_invocations_per_workgroup as usize,
            fixed_local_size: None,
            requires_binary: false,
            global_mem_bytes: 0,
            adapter_index: Some(index),
        }
    }

    /// Every adapter, as a GPU device.
    pub fn enumerate() -> Vec<DeviceInfo> {
        trace!("WgpuDevice::enumerate");
        Self::instance()
            .enumerate_adapters(wgpu::Backends::all())
            .iter()
            .enumerate()
            .map(|(i, adapter)| Self::describe(i, adapter))
            .collect()
    }

    pub fn is_available() -> bool {
        !Self::enumerate().is_empty()
    }

    /// Open the adapter a [`DeviceInfo`] from [`enumerate`](Self::enumerate) refers to.
    pub fn open(info: &DeviceInfo) -> ComputeResult<Self> {
        let index = info.adapter_index.ok_or_else(|| {
            ComputeError::BackendNotAvailable(format!("'{}' is not a wgpu adapter", info.name))
        })?;
        let adapter = Self::instance()
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .nth(index)
            .ok_or_else(|| ComputeError::DeviceEnumeration(format!("wgpu adapter {index} disappeared")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("offload device"),
                required_limits: adapter.limits(),
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| ComputeError::DeviceRuntime(format!("failed to create wgpu device: {e}")))?;

        info!("Opened wgpu device: {} ({})", info.name, info.vendor);
        Ok(Self {
            info: info.clone(),
            device,
            queue,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` inside a validation error scope.
    ///
    /// Validation errors raised by `f` come back as [`ComputeError::Enqueue`]
    /// instead of reaching wgpu's uncaptured-error handler.
    fn validated<T>(&self, what: &str, f: impl FnOnce() -> T) -> ComputeResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(ComputeError::Enqueue(format!("{what} failed validation: {err}"))),
            None => Ok(value),
        }
    }

    fn pipeline(&self, program: &Program, entry: &str) -> ComputeResult<Arc<wgpu::ComputePipeline>> {
        if !program.has_entry_point(entry) {
            return Err(ComputeError::Enqueue(format!(
                "program '{}' has no entry point '{entry}'",
                program.label()
            )));
        }
        let key = (program.fingerprint(), entry.to_string());
        let mut cache = self
            .pipelines
            .lock()
            .map_err(|_| ComputeError::DeviceRuntime("pipeline cache poisoned".into()))?;
        if let Some(pipeline) = cache.get(&key) {
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = self.validated(&format!("'{entry}'"), || {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.label()),
                source: wgpu::ShaderSource::Wgsl(program.source().into()),
            });
            self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: None,
                module: &module,
                entry_point: Some(entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        debug!(entry, label = program.label(), "compute pipeline created");
        let pipeline = Arc::new(pipeline);
        cache.insert(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    fn storage_buffer(&self, label: &str, data: &[f32], extra: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE | extra,
        })
    }

    /// Dispatch, copy `output` back and block until `out` holds it.
    fn dispatch_and_read(
        &self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: (u32, u32),
        output: &wgpu::Buffer,
        out: &mut [f32],
    ) -> ComputeResult<()> {
        let size = std::mem::size_of_val(out) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offload readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.validated("dispatch", || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("offload dispatch") });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("offload kernel"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
            }
            encoder.copy_buffer_to_buffer(output, 0, &staging, 0, size);
            self.queue.submit(std::iter::once(encoder.finish()));
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| ComputeError::Readback(format!("map callback dropped: {e}")))?
            .map_err(|e| ComputeError::DeviceRuntime(format!("buffer map failed: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging.unmap();
        Ok(())
    }
}

impl DevicePrimitives for WgpuDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn exec_rotate(
        &self,
        program: &Program,
        entry: &str,
        src: &[f32],
        dst: &mut [f32],
        launch: &RotateLaunch,
    ) -> ComputeResult<()> {
        trace!(entry, rows = launch.rows, cols = launch.cols, "WgpuDevice::exec_rotate");
        if KernelKind::for_entry(entry) != Some(KernelKind::Rotate) {
            return Err(ComputeError::Enqueue(format!("'{entry}' is not a rotation kernel")));
        }
        let cells = launch.rows * launch.cols;
        if src.len() != cells || dst.len() != cells {
            return Err(ComputeError::BufferSizeMismatch {
                expected: cells,
                actual: if src.len() != cells { src.len() } else { dst.len() },
            });
        }
        if cells == 0 {
            return Ok(());
        }

        let params = RotateParams {
            sin_theta: launch.params.sin_theta,
            cos_theta: launch.params.cos_theta,
            pivot_x: launch.pivot.0,
            pivot_y: launch.pivot.1,
            rows: to_u32(launch.rows, "rows")?,
            cols: to_u32(launch.cols, "cols")?,
            _pad0: 0,
            _pad1: 0,
        };

        let pipeline = self.pipeline(program, entry)?;
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rotate params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let src_buf = self.storage_buffer("rotate src", src, wgpu::BufferUsages::empty());
        let dst_buf = self.storage_buffer("rotate dst", dst, wgpu::BufferUsages::COPY_SRC);

        let bind_group = self.validated("rotate bindings", || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("rotate bind group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: params_buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: src_buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: dst_buf.as_entire_binding() },
                ],
            })
        })?;

        let groups = (
            params.cols.div_ceil(ROTATE_WORKGROUP),
            params.rows.div_ceil(ROTATE_WORKGROUP),
        );
        self.dispatch_and_read(&pipeline, &bind_group, groups, &dst_buf, dst)
    }

    fn exec_partial_sums(
        &self,
        program: &Program,
        entry: &str,
        launch: &PiLaunch,
        out: &mut [f32],
    ) -> ComputeResult<()> {
        trace!(entry, global = launch.grid.global_size, local = launch.grid.local_size, "WgpuDevice::exec_partial_sums");
        if KernelKind::for_entry(entry) != Some(KernelKind::PiSum(launch.series)) {
            return Err(ComputeError::Enqueue(format!(
                "'{entry}' does not compute the {} series",
                launch.series.name()
            )));
        }
        let grid = launch.grid;
        let buckets = grid.buckets();
        if out.len() < buckets {
            return Err(ComputeError::BufferSizeMismatch { expected: buckets, actual: out.len() });
        }
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        let groups = to_u32(buckets, "buckets")?;
        if groups > max_groups {
            return Err(ComputeError::Enqueue(format!(
                "{groups} work groups exceeds the adapter limit of {max_groups}"
            )));
        }

        let params = PiParams {
            floats_per_item: to_u32(launch.floats_per_item, "floats_per_item")?,
            local_size: to_u32(grid.local_size, "local_size")?,
            total_terms: to_u32(grid.total_terms(launch.floats_per_item)?, "total_terms")?,
            _pad: 0,
        };

        let pipeline = self.pipeline(program, entry)?;
        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("pi params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let result_buf = self.storage_buffer("pi result", &out[..buckets], wgpu::BufferUsages::COPY_SRC);

        let bind_group = self.validated("pi bindings", || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pi bind group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: params_buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: result_buf.as_entire_binding() },
                ],
            })
        })?;

        self.dispatch_and_read(&pipeline, &bind_group, (groups, 1), &result_buf, &mut out[..buckets])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::WorkGrid;
    use crate::image::ImageGrid;
    use crate::kernels::BuiltinKernel;
    use crate::pi::{TermSeries, reference_partial_sums};
    use crate::program::{BuildOptions, ProgramSource, build_program};
    use crate::rotate::{Pivot, RotationParams, SENTINEL, rotate_reference};
    use approx::assert_relative_eq;

    /// First adapter, or `None` on machines without one.
    fn gpu() -> Option<WgpuDevice> {
        let info = WgpuDevice::enumerate().into_iter().next()?;
        match WgpuDevice::open(&info) {
            Ok(dev) => Some(dev),
            Err(e) => {
                eprintln!("skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn test_partial_sums_match_reference() {
        let Some(dev) = gpu() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        let local = 64.min(dev.info().max_work_group_size);
        let pi = BuiltinKernel::Pi;
        let program = build_program(&pi.source(), &dev.info().target(), &pi.build_options(local)).unwrap();
        let grid = WorkGrid::from_capabilities(4, local).unwrap();

        for series in [TermSeries::Leibniz, TermSeries::QuarterCircle] {
            let launch = PiLaunch { series, floats_per_item: 4, grid };
            let mut out = vec![0.0; grid.buckets()];
            dev.exec_partial_sums(&program, series.entry_point(), &launch, &mut out).unwrap();

            let expected = reference_partial_sums(series, &grid, 4).unwrap();
            for (got, want) in out.iter().zip(&expected) {
                assert_relative_eq!(*got, *want, epsilon = 1e-5, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_rotate_matches_reference_at_right_angle() {
        let Some(dev) = gpu() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        let rotate = BuiltinKernel::Rotate;
        let program = build_program(&rotate.source(), &dev.info().target(), &rotate.build_options(1)).unwrap();

        let (rows, cols) = (20, 20);
        let src = ImageGrid::from_f32((0..rows * cols).map(|v| v as f32).collect(), rows, cols).unwrap();
        let params = RotationParams::from_degrees(90.0).unwrap();
        let launch = RotateLaunch { rows, cols, params, pivot: Pivot::Center.coords(rows, cols) };
        let mut dst = vec![SENTINEL; rows * cols];
        dev.exec_rotate(&program, "rotate", src.data(), &mut dst, &launch).unwrap();

        let expected = rotate_reference(&src, params, Pivot::Center, SENTINEL);
        assert_eq!(dst, expected.data());
    }

    #[test]
    fn test_mismatched_bindings_are_reported() {
        let Some(dev) = gpu() else {
            eprintln!("skipping: no wgpu adapter");
            return;
        };
        // Two storage bindings where the host binds a uniform at 0.
        let source = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;

@compute @workgroup_size(16, 16)
fn rotate(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i < arrayLength(&dst)) {
        dst[i] = src[i];
    }
}
"#;
        let program = build_program(
            &ProgramSource::text("two_bindings.wgsl", source),
            &dev.info().target(),
            &BuildOptions::new(),
        )
        .unwrap();
        let launch = RotateLaunch {
            rows: 4,
            cols: 4,
            params: RotationParams::from_degrees(0.0).unwrap(),
            pivot: (0.0, 0.0),
        };
        let src = vec![1.0; 16];
        let mut dst = vec![SENTINEL; 16];
        let err = dev.exec_rotate(&program, "rotate", &src, &mut dst, &launch).unwrap_err();
        assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
    }
}
