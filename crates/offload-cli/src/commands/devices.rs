//! Devices command - platform and backend listing

use anyhow::Result;
use offload_compute::{describe_backends, enumerate_platforms};

use crate::DevicesArgs;
use crate::commands::format_size;

#[allow(unused_imports)]
use tracing::{debug, info, trace};

pub fn run(args: DevicesArgs, verbose: u8) -> Result<()> {
    trace!(long = args.long, verbose, "devices::run");

    let platforms = enumerate_platforms();
    for (i, platform) in platforms.iter().enumerate() {
        println!("{} found ..", i + 1);
        println!("Platform: {}", platform.name);
        for device in &platform.devices {
            println!("Device: {}", device.name);
            if args.long || verbose > 0 {
                println!("  kind:               {}", device.kind);
                println!("  vendor:             {}", device.vendor);
                println!("  backend:            {}", device.backend);
                println!("  compute units:      {}", device.compute_units);
                println!("  max work group:     {}", device.max_work_group_size);
                if let Some(local) = device.fixed_local_size {
                    println!("  fixed local size:   {local}");
                }
                if device.global_mem_bytes > 0 {
                    println!("  memory:             {}", format_size(device.global_mem_bytes));
                }
                if device.requires_binary {
                    println!("  programs:           precompiled only");
                }
            }
        }
    }
    println!();
    print!("{}", describe_backends());

    Ok(())
}
