//! Which backends this build can dispatch to, and which one default device
//! selection prefers.

use tracing::debug;

use super::Backend;

/// A compiled-in backend and what it found on this machine.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub backend: Backend,
    /// Devices the backend exposes.
    pub devices: Vec<String>,
    /// Auto-selection rank; higher wins.
    pub priority: u32,
    pub summary: &'static str,
}

impl BackendInfo {
    pub fn available(&self) -> bool {
        !self.devices.is_empty()
    }
}

/// Check every compiled-in backend, best first.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut found = vec![BackendInfo {
        backend: Backend::Cpu,
        devices: vec![
            crate::device::DeviceInfo::host_cpu().name,
            crate::device::DeviceInfo::accelerator_emulator().name,
        ],
        priority: 10,
        summary: "rayon work groups on the host, plus the accelerator emulator",
    }];

    #[cfg(feature = "wgpu")]
    {
        let devices: Vec<String> = super::WgpuDevice::enumerate().into_iter().map(|d| d.name).collect();
        if devices.is_empty() {
            tracing::warn!("wgpu is compiled in but reports no adapter");
        }
        found.push(BackendInfo {
            backend: Backend::Wgpu,
            devices,
            priority: 100,
            summary: "WGSL compute pipelines (Vulkan/Metal/DX12)",
        });
    }
    #[cfg(not(feature = "wgpu"))]
    debug!("built without the wgpu feature");

    found.sort_by(|a, b| b.priority.cmp(&a.priority));
    debug!(count = found.len(), "backends detected");
    found
}

/// Highest-priority backend with at least one device.
pub fn select_best_backend() -> Backend {
    detect_backends()
        .into_iter()
        .find(BackendInfo::available)
        .map(|b| b.backend)
        .unwrap_or(Backend::Cpu)
}

/// One line per backend: `[+] cpu: ... (2 devices)`.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|info| {
            let mark = if info.available() { '+' } else { '-' };
            format!(
                "[{mark}] {}: {} ({} devices)\n",
                info.backend,
                info.summary,
                info.devices.len()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_first() {
        let found = detect_backends();
        assert!(found.windows(2).all(|w| w[0].priority >= w[1].priority));
        let cpu = found.iter().find(|b| b.backend == Backend::Cpu).unwrap();
        assert_eq!(cpu.devices.len(), 2);
    }

    #[test]
    fn test_describe_marks_cpu_available() {
        assert!(describe_backends().contains("[+] cpu: "));
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn test_cpu_is_best_without_wgpu() {
        assert_eq!(select_best_backend(), Backend::Cpu);
    }
}
