//! Rotate command - forward-mapped bitmap rotation on a compute device

use anyhow::{Context, Result};
use offload_compute::{Pivot, RotationConfig, describe_platforms, pipeline};
use std::time::Instant;

use crate::RotateArgs;
use crate::commands::{load_program, pick_device};

#[allow(unused_imports)]
use tracing::{debug, error, info, trace};

/// Platform listing followed by a blank line, printed before the image loads.
fn platform_banner() -> String {
    format!("{}\n", describe_platforms())
}

pub fn run(args: RotateArgs, verbose: u8) -> Result<()> {
    trace!(input = %args.input.display(), angle = args.angle, "rotate::run");

    print!("{}", platform_banner());

    let device = pick_device(&args.device)?;
    let src = offload_io::read_bitmap(&args.input)
        .with_context(|| format!("Failed to load: {}", args.input.display()))?;
    println!("imageRows={}, imageCols={}", src.rows, src.cols);

    let mut config = RotationConfig::default()
        .angle(args.angle)?
        .pivot(Pivot::parse(&args.pivot)?);
    if let Some(program) = load_program(args.kernel.as_ref(), args.binary.as_ref())? {
        config = config.program(program);
    }

    let start = Instant::now();
    println!("Running on device: {}", device.name);
    let run = match pipeline::rotate_image(&device, &src, &config) {
        Ok(run) => run,
        Err(e) if e.is_device_runtime() => {
            println!("An exception is caught for image rotation.");
            error!("{e}");
            std::process::abort();
        }
        Err(e) => return Err(e).context("Image rotation failed"),
    };
    println!("{} seconds", start.elapsed().as_secs_f64());

    if verbose > 0 {
        println!(
            "written={}, holes={}, dropped={}",
            run.report.written_cells, run.report.holes, run.report.dropped
        );
    }

    offload_io::write_bitmap(&args.output, &run.output)
        .with_context(|| format!("Failed to save: {}", args.output.display()))?;
    println!("Output image saved as: {}", args.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lists_platforms_first() {
        let banner = platform_banner();
        assert!(banner.starts_with("1 found ..\nPlatform: "));
        assert!(banner.contains("Device: "));
        assert!(banner.ends_with("\n\n"));
    }
}
