//! CLI command implementations

pub mod compile;
pub mod devices;
pub mod pi;
pub mod rotate;

use anyhow::{Context, Result, bail};
use offload_compute::{DeviceInfo, DeviceSelector, ProgramSource};
use std::path::PathBuf;

/// Resolve a `--device` selector to a concrete device.
pub fn pick_device(selector: &str) -> Result<DeviceInfo> {
    let selector = DeviceSelector::parse(selector)?;
    offload_compute::select_device(selector).context("Failed to select a device")
}

/// Load a user kernel from `--kernel` or `--binary`, if either was given.
pub fn load_program(kernel: Option<&PathBuf>, binary: Option<&PathBuf>) -> Result<Option<ProgramSource>> {
    match (kernel, binary) {
        (Some(_), Some(_)) => bail!("--kernel and --binary are mutually exclusive"),
        (Some(path), None) => ProgramSource::load_text(path)
            .map(Some)
            .with_context(|| format!("Failed to load kernel: {}", path.display())),
        (None, Some(path)) => ProgramSource::load_binary(path)
            .map(Some)
            .with_context(|| format!("Failed to load program binary: {}", path.display())),
        (None, None) => Ok(None),
    }
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
