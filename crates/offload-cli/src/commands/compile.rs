//! Compile command - write a precompiled program container

use anyhow::{Context, Result, bail};
use offload_compute::device::ACCELERATOR_LOCAL_SIZE;
use offload_compute::{BuildOptions, BuiltinKernel, DeviceKind, ProgramSource, precompile};
use std::fs;

use crate::CompileArgs;
use crate::commands::format_size;

#[allow(unused_imports)]
use tracing::{debug, info, trace};

pub fn run(args: CompileArgs, verbose: u8) -> Result<()> {
    trace!(target_kind = %args.target, output = %args.output.display(), "compile::run");

    let kind = DeviceKind::parse(&args.target)?;
    let (source, mut options) = match (&args.kernel, &args.builtin) {
        (Some(path), None) => {
            let source = ProgramSource::load_text(path)
                .with_context(|| format!("Failed to load kernel: {}", path.display()))?;
            let options = match args.local_size {
                Some(local) => BuildOptions::new().define("LOCAL_SIZE", local),
                None => BuildOptions::new(),
            };
            (source, options)
        }
        (None, Some(name)) => {
            let builtin = BuiltinKernel::parse(name)?;
            let local = args.local_size.unwrap_or(ACCELERATOR_LOCAL_SIZE);
            (builtin.source(), builtin.build_options(local))
        }
        _ => bail!("exactly one of --kernel or --builtin is required"),
    };

    for define in &args.defines {
        options = options.define_str(define)?;
    }
    if verbose > 0 {
        for (name, value) in options.defines() {
            println!("  -D {name}={value}");
        }
    }

    let bytes = precompile(&source, kind, &options)
        .with_context(|| format!("Failed to build {}", source.label()))?;
    fs::write(&args.output, &bytes)
        .with_context(|| format!("Failed to write: {}", args.output.display()))?;

    info!(bytes = bytes.len(), target = %kind, "program container written");
    println!(
        "Wrote {} ({}) for {} to {}",
        source.label(),
        format_size(bytes.len() as u64),
        kind,
        args.output.display()
    );
    Ok(())
}
