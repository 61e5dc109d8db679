use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use container::{FormatDuration, read::Reader};

#[derive(clap::Parser)]
struct ProbeArgs {
    /// Dump every index entry to this file.
    #[arg(long)]
    index: Option<PathBuf>,
    /// Decode and print every frame header.
    #[arg(long)]
    inspect_frames: bool,
    input: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = ProbeArgs::parse();

    let input = BufReader::new(File::open(&cli.input)?);
    let reader = Reader::new(input).read_header()?;
    println!("Header: \n{:#?}", reader.header());

    let mut reader = reader.read_index()?;
    println!(
        "{} frames, {} of playback",
        reader.frame_count(),
        FormatDuration(Duration::from_secs_f64(reader.index().last_time().max(0.0)))
    );

    if let Some(index_path) = cli.index {
        println!("Dumping index to {}...", index_path.display());
        let mut index_debug = BufWriter::new(File::create(index_path)?);
        for (id, entry) in reader.index().frames.iter().enumerate() {
            writeln!(
                index_debug,
                "{id}: {} -> byte {}",
                FormatDuration(Duration::from_secs_f64(entry.time_offset.max(0.0))),
                entry.byte_offset
            )?;
        }
    }

    if cli.inspect_frames {
        for id in 0..reader.frame_count() {
            match reader.read_frame(id) {
                Ok(record) => println!("{}", record.info),
                Err(err) => println!("frame {id}: unreadable ({err})"),
            }
        }
    }

    Ok(())
}
