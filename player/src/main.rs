use std::{
    fs::File,
    io::{self, BufReader, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use container::read::Reader;
use crossterm::tty::IsTty;
use player::{
    playback::{PlayOptions, TerminalGuard, run_player},
    profile::{format_rgb, load_color_profile, print_calibration_pattern},
};
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[command(name = "its-player", about = "Play Indexed Terminal Stream recordings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Play a recording in the current terminal.
    Play(PlayArgs),
    /// Print the palette calibration pattern for screenshotting.
    GetColorProfile {
        #[arg(long)]
        even_if_not_tty: bool,
    },
    /// Decode a color profile screenshot and show what it contains.
    CheckColorProfile { profile: PathBuf },
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    file: PathBuf,
    /// Calibration screenshot used to resolve palette-indexed colors.
    #[arg(short = 'c', long, value_name = "FILE")]
    color_profile: Option<PathBuf>,
    #[arg(long)]
    even_if_not_tty: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Play(args) => {
            if !args.even_if_not_tty {
                anyhow::ensure!(
                    io::stdin().is_tty() && io::stdout().is_tty(),
                    "stdin and/or stdout are not terminals (pass --even-if-not-tty to override)"
                );
            }
            let profile = args
                .color_profile
                .as_deref()
                .map(load_color_profile)
                .transpose()?;
            let file = File::open(&args.file)
                .with_context(|| format!("opening {}", args.file.display()))?;
            let reader = Reader::new(BufReader::new(file))
                .read_header()?
                .read_index()?;

            let guard = TerminalGuard::enter()?;
            let result = run_player(reader, PlayOptions { profile });
            drop(guard);
            result?;
        }
        Command::GetColorProfile { even_if_not_tty } => {
            if !even_if_not_tty {
                anyhow::ensure!(
                    io::stdin().is_tty() && io::stdout().is_tty(),
                    "stdin and/or stdout are not terminals (pass --even-if-not-tty to override)"
                );
            }
            let mut stdout = io::stdout();
            print_calibration_pattern(&mut stdout)?;
        }
        Command::CheckColorProfile { profile } => {
            let profile = load_color_profile(&profile)?;
            let mut stdout = io::stdout();
            writeln!(stdout, "fg: {}", format_rgb(profile.fg))?;
            writeln!(stdout, "bg: {}", format_rgb(profile.bg))?;
            for i in 0..16 {
                writeln!(stdout, "{}: {}", i, format_rgb(profile.palette[i]))?;
            }
            writeln!(stdout, "...")?;
        }
    }

    Ok(())
}
