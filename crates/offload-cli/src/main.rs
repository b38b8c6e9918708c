//! offload - heterogeneous compute demos
//!
//! Image rotation and Pi estimation dispatched through the offload host API.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "offload")]
#[command(author, version, about = "Heterogeneous compute demos: image rotation and Pi reduction")]
#[command(long_about = "
Runs the two offload demos on the host CPU, the accelerator emulator or a
wgpu adapter.

Examples:
  offload devices                              # List platforms and devices
  offload rotate ./Images/cat.bmp -a 315       # Rotate a bitmap
  offload rotate cat.bmp --pivot center -a 90
  offload pi --local-size 64 --compute-units 8 # Estimate Pi
  offload pi --series quadrant -n 16
  offload compile --builtin pi -o pi.ofkb      # Precompile for the accelerator
  offload pi --device accelerator --binary pi.ofkb
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List platforms, devices and compute backends
    #[command(visible_alias = "d")]
    Devices(DevicesArgs),

    /// Rotate a bitmap by a fixed angle
    #[command(visible_alias = "r")]
    Rotate(RotateArgs),

    /// Estimate Pi with a work-group partial-sum reduction
    Pi(PiArgs),

    /// Precompile a kernel into a program container
    #[command(visible_alias = "c")]
    Compile(CompileArgs),
}

#[derive(Args)]
struct DevicesArgs {
    /// Show device capabilities
    #[arg(short, long)]
    long: bool,
}

#[derive(Args)]
struct RotateArgs {
    /// Input bitmap
    #[arg(default_value = "./Images/cat.bmp")]
    input: PathBuf,

    /// Output bitmap
    #[arg(short, long, default_value = "cat-rotated.bmp")]
    output: PathBuf,

    /// Rotation angle in degrees
    #[arg(short, long, default_value = "315", allow_negative_numbers = true)]
    angle: f32,

    /// Rotation pivot: origin, center, or X,Y
    #[arg(long, default_value = "origin")]
    pivot: String,

    /// Device: default, cpu, gpu, accelerator
    #[arg(long, default_value = "default")]
    device: String,

    /// Kernel source to use instead of the built-in one
    #[arg(long, conflicts_with = "binary")]
    kernel: Option<PathBuf>,

    /// Precompiled program container
    #[arg(long)]
    binary: Option<PathBuf>,
}

#[derive(Args)]
struct PiArgs {
    /// Terms summed by each work item
    #[arg(short = 'f', long, default_value = "4")]
    floats_per_item: usize,

    /// Work-group size (default: device preferred size)
    #[arg(short, long)]
    local_size: Option<usize>,

    /// Number of work groups (default: device compute units)
    #[arg(short = 'n', long)]
    compute_units: Option<u32>,

    /// Series: leibniz or quadrant
    #[arg(short, long, default_value = "leibniz")]
    series: String,

    /// Device: default, cpu, gpu, accelerator
    #[arg(long, default_value = "default")]
    device: String,

    /// Kernel source to use instead of the built-in one
    #[arg(long, conflicts_with = "binary")]
    kernel: Option<PathBuf>,

    /// Precompiled program container
    #[arg(long)]
    binary: Option<PathBuf>,
}

#[derive(Args)]
struct CompileArgs {
    /// Kernel source file
    #[arg(short, long, required_unless_present = "builtin", conflicts_with = "builtin")]
    kernel: Option<PathBuf>,

    /// Built-in kernel: pi or rotate
    #[arg(short, long)]
    builtin: Option<String>,

    /// Define NAME=VALUE (repeatable)
    #[arg(short = 'D', long = "define")]
    defines: Vec<String>,

    /// Work-group size baked in as LOCAL_SIZE
    #[arg(short, long)]
    local_size: Option<usize>,

    /// Target device kind: cpu, gpu, accelerator
    #[arg(short, long, default_value = "accelerator")]
    target: String,

    /// Output container
    #[arg(short, long)]
    output: PathBuf,
}

/// Set up console logging, plus an optional log file.
///
/// The returned guard must stay alive until exit so buffered file output
/// gets flushed.
fn init_logging(verbose: u8, log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .with(file_layer)
                .try_init()
                .context("Failed to initialise logging")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter())
                .with(console)
                .try_init()
                .context("Failed to initialise logging")?;
            Ok(None)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_ref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Devices(args) => commands::devices::run(args, cli.verbose),
        Commands::Rotate(args) => commands::rotate::run(args, cli.verbose),
        Commands::Pi(args) => commands::pi::run(args, cli.verbose),
        Commands::Compile(args) => commands::compile::run(args, cli.verbose),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rotate_defaults() {
        let cli = Cli::try_parse_from(["offload", "rotate"]).unwrap();
        let Commands::Rotate(args) = cli.command else {
            panic!("expected rotate");
        };
        assert_eq!(args.input, PathBuf::from("./Images/cat.bmp"));
        assert_eq!(args.output, PathBuf::from("cat-rotated.bmp"));
        assert_eq!(args.angle, 315.0);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["offload", "pi", "-vv", "-j", "2", "-l", "32"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, 2);
        let Commands::Pi(args) = cli.command else {
            panic!("expected pi");
        };
        assert_eq!(args.local_size, Some(32));
        assert_eq!(args.floats_per_item, 4);
    }

    #[test]
    fn test_compile_needs_input() {
        assert!(Cli::try_parse_from(["offload", "compile", "-o", "x.ofkb"]).is_err());
        assert!(Cli::try_parse_from(["offload", "compile", "-b", "pi", "-o", "x.ofkb"]).is_ok());
    }
}
