use std::{fs::File, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use container::GridSize;
use encoder::{
    encode::{EncodeOptions, run_encode},
    optimize::run_optimize,
    record::run_record,
};
use parse_size::parse_size;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "its-encoder", about = "Produce Indexed Terminal Stream recordings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Encode a typescript + timing pair into an ITS recording.
    Encode(EncodeArgs),
    /// Re-encode a recording with a freshly trained compression dictionary.
    Optimize(OptimizeArgs),
    /// Record the current shell session straight into an ITS file.
    Record(RecordArgs),
}

#[derive(clap::Args, Debug)]
struct EncodeArgs {
    /// Raw terminal output, as captured by script(1).
    script: PathBuf,
    /// Matching timing stream of "seconds bytes" lines.
    timing: PathBuf,
    output: PathBuf,
    #[arg(short = 'f', long, default_value_t = 1.0)]
    fps: f64,
    /// Size of the virtual terminal the recording plays back on.
    #[arg(long, value_name = "ROWSxCOLS", default_value = "24x80")]
    buffer_size: GridSize,
    /// Drop the script's first line (the script(1) banner).
    #[arg(long)]
    skip_script_header: bool,
    /// Byte budget for dictionary training samples.
    #[arg(long, default_value = "2GiB", value_parser = |s: &str| parse_size(s).map(|v| v as usize))]
    dict_mem: usize,
    /// Target size of the trained dictionary.
    #[arg(long, default_value = "5MiB", value_parser = |s: &str| parse_size(s).map(|v| v as usize))]
    dict_size: usize,
}

#[derive(clap::Args, Debug)]
struct OptimizeArgs {
    input: PathBuf,
    output: PathBuf,
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    output: PathBuf,
    /// Record at a fixed size instead of the current terminal's.
    #[arg(long, value_name = "ROWSxCOLS")]
    buffer_size: Option<GridSize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Encode(args) => {
            anyhow::ensure!(args.fps > 0.0, "fps must be positive");
            let mut script = File::open(&args.script)
                .with_context(|| format!("opening {}", args.script.display()))?;
            let mut timing = File::open(&args.timing)
                .with_context(|| format!("opening {}", args.timing.display()))?;
            let out = File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&args.output)
                .with_context(|| format!("opening {} for writing", args.output.display()))?;
            let opts = EncodeOptions {
                fps: args.fps,
                size: args.buffer_size,
                skip_script_header: args.skip_script_header,
                sample_budget: args.dict_mem,
                dict_size: args.dict_size,
                progress: true,
            };
            let frames = run_encode(&mut script, &mut timing, out, &opts)?;
            eprintln!("Wrote {} frames to {}", frames, args.output.display());
        }
        Command::Optimize(args) => {
            let input = File::open(&args.input)
                .with_context(|| format!("opening {}", args.input.display()))?;
            let out = File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&args.output)
                .with_context(|| format!("opening {} for writing", args.output.display()))?;
            let frames = run_optimize(input, out, true)?;
            eprintln!("Wrote {} frames to {}", frames, args.output.display());
        }
        Command::Record(args) => {
            run_record(&args.output, args.buffer_size)?;
        }
    }

    Ok(())
}
