//! Pi command - work-group partial sums reduced on the host

use anyhow::{Context, Result};
use offload_compute::{PiConfig, TermSeries, pipeline};

use crate::PiArgs;
use crate::commands::{load_program, pick_device};

#[allow(unused_imports)]
use tracing::{debug, info, trace};

pub fn run(args: PiArgs, verbose: u8) -> Result<()> {
    trace!(series = %args.series, fpi = args.floats_per_item, "pi::run");

    let device = pick_device(&args.device)?;
    println!("device name= {}", device.name);

    let mut config = PiConfig::default()
        .series(TermSeries::parse(&args.series)?)
        .floats_per_item(args.floats_per_item);
    if let Some(local) = args.local_size {
        config = config.local_size(local);
    }
    if let Some(units) = args.compute_units {
        config = config.compute_units(units);
    }
    if let Some(program) = load_program(args.kernel.as_ref(), args.binary.as_ref())? {
        if verbose > 0 {
            println!("Using program: {}", program.label());
        }
        config = config.program(program);
    }

    let run = pipeline::estimate_pi(&device, &config).context("Pi estimation failed")?;
    let grid = run.grid;

    println!("num_comp_units={}", grid.compute_units);
    println!("local_size={}", grid.local_size);
    println!("global_size={}, local_size={}", grid.global_size, grid.local_size);
    println!("Number of global buckets is: {}", grid.buckets());

    println!("\nResults: ");
    for (b, value) in run.estimate.partials.iter().enumerate() {
        println!("workgroup {b} result: {value:.6}");
    }
    println!("Pi is calculated as: {:.6}", run.estimate.pi);

    if verbose > 0 {
        println!(
            "terms={}, |error|={:.6}",
            grid.total_terms(config.floats_per_item)?,
            run.estimate.error()
        );
    }

    Ok(())
}
