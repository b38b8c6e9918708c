//! Platform and device enumeration.
//!
//! Devices are grouped into platforms the way an OpenCL ICD loader reports
//! them. The host platform is always present and carries two devices: the
//! rayon-backed CPU and an accelerator emulator that behaves like a
//! fixed-function board (fixed work-group size, precompiled programs only).
//! With the `wgpu` feature every adapter shows up on a second platform.

use std::fmt;

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::program::TargetDescriptor;
use crate::{ComputeError, ComputeResult};

/// Largest work group the CPU device accepts.
pub const CPU_MAX_WORK_GROUP_SIZE: usize = 256;

/// Work-group size the accelerator emulator is built for.
pub const ACCELERATOR_LOCAL_SIZE: usize = 16;

/// Compute units the accelerator emulator reports.
pub const ACCELERATOR_COMPUTE_UNITS: u32 = 4;

/// Fallback when system memory cannot be detected (4 GB).
const DEFAULT_HOST_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Accelerator => "accelerator",
        }
    }

    /// Stable tag used in program containers.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Cpu => 1,
            Self::Gpu => 2,
            Self::Accelerator => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Cpu),
            2 => Some(Self::Gpu),
            3 => Some(Self::Accelerator),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> ComputeResult<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "accelerator" | "acc" | "fpga" => Ok(Self::Accelerator),
            other => Err(ComputeError::InvalidArgument(format!("unknown device kind: {other}"))),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities of one compute device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Device name.
    pub name: String,
    /// Vendor or driver name.
    pub vendor: String,
    pub kind: DeviceKind,
    /// Backend that executes kernels on this device.
    pub backend: Backend,
    /// Parallel compute units.
    pub compute_units: u32,
    /// Largest work group the device accepts.
    pub max_work_group_size: usize,
    /// Work-group size the device is hard-wired to, if any.
    pub fixed_local_size: Option<usize>,
    /// Only precompiled program containers can be loaded.
    pub requires_binary: bool,
    /// Device memory in bytes (0 if unknown).
    pub global_mem_bytes: u64,
    /// Adapter position for wgpu devices.
    pub adapter_index: Option<usize>,
}

impl DeviceInfo {
    /// Host CPU device executed by rayon.
    pub fn host_cpu() -> Self {
        let cores = sys_info::cpu_num().unwrap_or(0);
        let mhz = sys_info::cpu_speed().unwrap_or(0);
        let name = match (cores, mhz) {
            (0, _) => "Host CPU".to_string(),
            (c, 0) => format!("Host CPU ({c} cores)"),
            (c, s) => format!("Host CPU ({c} cores @ {s} MHz)"),
        };
        let global_mem_bytes = sys_info::mem_info()
            .map(|m| m.total * 1024)
            .unwrap_or(DEFAULT_HOST_MEMORY);

        Self {
            name,
            vendor: "rayon".into(),
            kind: DeviceKind::Cpu,
            backend: Backend::Cpu,
            compute_units: rayon::current_num_threads().max(1) as u32,
            max_work_group_size: CPU_MAX_WORK_GROUP_SIZE,
            fixed_local_size: None,
            requires_binary: false,
            global_mem_bytes,
            adapter_index: None,
        }
    }

    /// Fixed-function accelerator emulated on the host.
    pub fn accelerator_emulator() -> Self {
        Self {
            name: "Accelerator emulator".into(),
            vendor: "rayon".into(),
            kind: DeviceKind::Accelerator,
            backend: Backend::Cpu,
            compute_units: ACCELERATOR_COMPUTE_UNITS,
            max_work_group_size: ACCELERATOR_LOCAL_SIZE,
            fixed_local_size: Some(ACCELERATOR_LOCAL_SIZE),
            requires_binary: true,
            global_mem_bytes: 0,
            adapter_index: None,
        }
    }

    /// Program target matching this device.
    pub fn target(&self) -> TargetDescriptor {
        TargetDescriptor {
            kind: self.kind,
            backend: self.backend,
            requires_binary: self.requires_binary,
        }
    }
}

/// A platform and the devices it exposes.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub name: String,
    pub devices: Vec<DeviceInfo>,
}

/// List every platform and device visible to this build.
pub fn enumerate_platforms() -> Vec<PlatformInfo> {
    trace!("device::enumerate_platforms");
    let mut platforms = vec![PlatformInfo {
        name: "Host (rayon)".into(),
        devices: vec![DeviceInfo::host_cpu(), DeviceInfo::accelerator_emulator()],
    }];

    #[cfg(feature = "wgpu")]
    {
        let devices = crate::backend::WgpuDevice::enumerate();
        if !devices.is_empty() {
            platforms.push(PlatformInfo { name: "wgpu".into(), devices });
        }
    }

    debug!(count = platforms.len(), "platforms enumerated");
    platforms
}

/// Platform listing in the demo's console format.
pub fn describe_platforms() -> String {
    let mut desc = String::new();
    for (i, platform) in enumerate_platforms().iter().enumerate() {
        desc.push_str(&format!("{} found ..\nPlatform: {}\n", i + 1, platform.name));
        for device in &platform.devices {
            desc.push_str(&format!("Device: {}\n", device.name));
        }
    }
    desc
}

/// Device choice, mirroring the default/cpu/gpu/accelerator selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// Best available: a GPU when one is usable, otherwise the host CPU.
    #[default]
    Default,
    Cpu,
    Gpu,
    Accelerator,
}

impl DeviceSelector {
    pub fn parse(s: &str) -> ComputeResult<Self> {
        match s.to_lowercase().as_str() {
            "default" | "auto" => Ok(Self::Default),
            other => Ok(match DeviceKind::parse(other)? {
                DeviceKind::Cpu => Self::Cpu,
                DeviceKind::Gpu => Self::Gpu,
                DeviceKind::Accelerator => Self::Accelerator,
            }),
        }
    }

    fn wants(&self, kind: DeviceKind) -> bool {
        match self {
            Self::Default => true,
            Self::Cpu => kind == DeviceKind::Cpu,
            Self::Gpu => kind == DeviceKind::Gpu,
            Self::Accelerator => kind == DeviceKind::Accelerator,
        }
    }
}

/// Pick a device.
pub fn select_device(selector: DeviceSelector) -> ComputeResult<DeviceInfo> {
    let devices: Vec<DeviceInfo> = enumerate_platforms()
        .into_iter()
        .flat_map(|p| p.devices)
        .filter(|d| selector.wants(d.kind))
        .collect();

    let chosen = match selector {
        DeviceSelector::Default => {
            let best = crate::backend::select_best_backend();
            devices
                .iter()
                .find(|d| d.backend == best && d.kind != DeviceKind::Accelerator)
                .or_else(|| devices.iter().find(|d| d.kind == DeviceKind::Cpu))
                .cloned()
        }
        _ => devices.into_iter().next(),
    };

    let device = chosen.ok_or_else(|| {
        ComputeError::DeviceEnumeration(format!("no device matches selector {selector:?}"))
    })?;
    debug!(device = %device.name, kind = %device.kind, "device selected");
    Ok(device)
}
