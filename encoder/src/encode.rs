//! Two-pass encode: sample a reduced-rate pass to train the compression
//! dictionary, then rewind everything and write the real thing.

use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use container::{
    Frame, GridSize, Result, encode_frame_into, format_seconds, metadata::CompressionMode,
    write::ItsWriter,
};
use humansize::{DECIMAL, format_size};

use crate::{
    timing::FramePass,
    vt::{Emulator, StagePalette, Vt100Emulator, sample_content},
};

/// Roughly how many frames the collection pass aims for.
const COLLECT_TARGET_FRAMES: f64 = 200.0;

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub fps: f64,
    pub size: GridSize,
    pub skip_script_header: bool,
    /// Byte budget for serialized dictionary samples.
    pub sample_budget: usize,
    pub dict_size: usize,
    pub progress: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            fps: 1.0,
            size: GridSize::new(24, 80),
            skip_script_header: false,
            sample_budget: 2 * 1024 * 1024 * 1024,
            dict_size: 5 * 1024 * 1024,
            progress: false,
        }
    }
}

struct Totals {
    frames: u64,
    duration: f64,
    bytes: u64,
}

pub fn run_encode<S, T, W>(
    script: &mut S,
    timing: &mut T,
    out: W,
    opts: &EncodeOptions,
) -> Result<u64>
where
    S: Read + Seek,
    T: Read + Seek,
    W: Write + Seek,
{
    let stage = StagePalette::solarized();

    let totals = scan_totals(script, timing, opts)?;
    if opts.progress {
        eprintln!(
            "{} frames, {} over {} of script",
            totals.frames,
            format_seconds(totals.duration),
            format_size(totals.bytes, DECIMAL)
        );
    }

    let dict = collect_and_train(script, timing, opts, &stage, &totals)?;

    rewind(script, timing)?;
    let mut emulator = reset_emulator(opts.size);
    let mut writer = ItsWriter::new(out, opts.size, CompressionMode::Zstd, dict.as_deref())?;
    let mut pass = new_pass(opts.fps, timing, script, opts)?;
    while let Some(chunk) = pass.next_frame()? {
        emulator.feed(&chunk.data);
        emulator.drain_responses();
        let content = sample_content(&emulator, opts.size, &stage);
        let info = Frame::builder()
            .frame_id(chunk.frame_id)
            .time(chunk.time)
            .duration(chunk.duration)
            .build();
        writer.write_frame(&info, &content)?;
        if opts.progress {
            eprint!(
                "\r\x1b[2KEncoding frame {} of {}, t={}s of {}s read={} of {}",
                chunk.frame_id,
                totals.frames,
                ((chunk.time + chunk.duration) * 10.0).round() / 10.0,
                totals.duration,
                format_size(pass.bytes_consumed(), DECIMAL),
                format_size(totals.bytes, DECIMAL)
            );
        }
    }
    if opts.progress {
        eprintln!("\r\x1b[2KFinalizing...");
    }
    let frames = writer.frames_written();
    writer.finalize()?;
    Ok(frames)
}

fn rewind(script: &mut impl Seek, timing: &mut impl Seek) -> Result<()> {
    script.seek(SeekFrom::Start(0))?;
    timing.seek(SeekFrom::Start(0))?;
    Ok(())
}

fn reset_emulator(size: GridSize) -> Vt100Emulator {
    let mut emulator = Vt100Emulator::new(size);
    emulator.feed(b"\x1b[0m\x1b[2J");
    emulator
}

fn new_pass<'a, S: Read, T: Read>(
    fps: f64,
    timing: &'a mut T,
    script: &'a mut S,
    opts: &EncodeOptions,
) -> Result<FramePass<BufReader<&'a mut T>, &'a mut S>> {
    let mut pass = FramePass::new(fps, BufReader::new(timing), script);
    if opts.skip_script_header {
        pass.skip_script_header()?;
    }
    Ok(pass)
}

fn scan_totals<S: Read + Seek, T: Read + Seek>(
    script: &mut S,
    timing: &mut T,
    opts: &EncodeOptions,
) -> Result<Totals> {
    rewind(script, timing)?;
    let mut pass = new_pass(opts.fps, timing, script, opts)?;
    let mut totals = Totals {
        frames: 0,
        duration: 0.0,
        bytes: 0,
    };
    while let Some(chunk) = pass.next_frame()? {
        totals.frames = chunk.frame_id + 1;
        totals.duration = chunk.time + chunk.duration;
        totals.bytes = pass.bytes_consumed();
    }
    totals.duration = totals.duration.round();
    Ok(totals)
}

/// Collection pass: re-run the cadence at a rate that lands near
/// [`COLLECT_TARGET_FRAMES`] frames, serialize each one unsaved, and train a
/// dictionary from the pile. Capped by the sample byte budget, never by
/// seeking the timing stream around.
fn collect_and_train<S: Read + Seek, T: Read + Seek>(
    script: &mut S,
    timing: &mut T,
    opts: &EncodeOptions,
    stage: &StagePalette,
    totals: &Totals,
) -> Result<Option<Vec<u8>>> {
    rewind(script, timing)?;
    let collect_fps = if totals.duration >= 1.0 {
        COLLECT_TARGET_FRAMES / totals.duration
    } else {
        opts.fps
    };

    let mut emulator = reset_emulator(opts.size);
    let mut pass = new_pass(collect_fps, timing, script, opts)?;
    let mut samples: Vec<u8> = Vec::new();
    let mut sample_sizes: Vec<usize> = Vec::new();
    while let Some(chunk) = pass.next_frame()? {
        emulator.feed(&chunk.data);
        emulator.drain_responses();
        let content = sample_content(&emulator, opts.size, stage);
        let info = Frame::builder()
            .frame_id(chunk.frame_id)
            .time(chunk.time)
            .duration(chunk.duration)
            .build();
        let before = samples.len();
        encode_frame_into(&info, &content, &mut samples)?;
        sample_sizes.push(samples.len() - before);

        if opts.progress {
            eprint!(
                "\r\x1b[2KCollecting frames for compression dict ({:.0}%), read={} of {}",
                (chunk.frame_id as f64 / COLLECT_TARGET_FRAMES * 100.0).min(100.0),
                format_size(pass.bytes_consumed(), DECIMAL),
                format_size(totals.bytes, DECIMAL)
            );
        }
        if samples.len() >= opts.sample_budget {
            break;
        }
    }
    if opts.progress {
        eprintln!();
    }

    Ok(train_dictionary(&samples, &sample_sizes, opts.dict_size))
}

/// Training wants a decent pile of samples; a recording short enough to fall
/// under that is compressed without a dictionary instead.
pub fn train_dictionary(
    samples: &[u8],
    sample_sizes: &[usize],
    dict_size: usize,
) -> Option<Vec<u8>> {
    if sample_sizes.len() < 8 {
        tracing::warn!(
            samples = sample_sizes.len(),
            "too few frames to train a dictionary"
        );
        return None;
    }
    match zstd::dict::from_continuous(samples, sample_sizes, dict_size) {
        Ok(dict) if !dict.is_empty() => Some(dict),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(error = %err, "dictionary training failed, compressing without one");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use container::{FrameContent, read::Reader};

    use super::*;

    fn encode_to_bytes(script: &[u8], timing: &str, fps: f64, size: GridSize) -> (u64, Vec<u8>) {
        let mut script = Cursor::new(script.to_vec());
        let mut timing = Cursor::new(timing.as_bytes().to_vec());
        let mut out = Cursor::new(Vec::new());
        let opts = EncodeOptions {
            fps,
            size,
            ..EncodeOptions::default()
        };
        let frames = run_encode(&mut script, &mut timing, &mut out, &opts).unwrap();
        (frames, out.into_inner())
    }

    fn row_text(content: &FrameContent) -> String {
        content.cells.iter().map(|c| c.chars.as_str()).collect()
    }

    #[test]
    fn two_timing_lines_make_two_frames() {
        let (frames, bytes) =
            encode_to_bytes(b"aaabbb", "0.5 3\n0.5 3\n", 2.0, GridSize::new(1, 8));
        assert_eq!(frames, 2);

        let mut reader = Reader::new(Cursor::new(bytes))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        let first = reader.read_frame(0).unwrap();
        assert_eq!(first.info.time, 0.0);
        assert_eq!(first.info.duration, 0.5);
        assert_eq!(row_text(&first.content), "aaa     ");
        let second = reader.read_frame(1).unwrap();
        assert_eq!(second.info.time, 0.5);
        assert_eq!(second.info.duration, 0.5);
        assert_eq!(row_text(&second.content), "aaabbb  ");
    }

    #[test]
    fn single_character_frame() {
        let (frames, bytes) = encode_to_bytes(b"A", "1.0 1\n", 1.0, GridSize::new(1, 2));
        assert_eq!(frames, 1);
        let mut reader = Reader::new(Cursor::new(bytes))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        let record = reader.read_frame(0).unwrap();
        let chars: Vec<&str> = record.content.cells.iter().map(|c| c.chars.as_str()).collect();
        assert_eq!(chars, ["A", " "]);
    }

    #[test]
    fn styled_cell_survives_the_file() {
        let script = b"\x1b[1;31mX\x1b[0m";
        let timing = format!("0.5 {}\n", script.len());
        let (_, bytes) = encode_to_bytes(script, &timing, 2.0, GridSize::new(1, 1));
        let mut reader = Reader::new(Cursor::new(bytes))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        let cell = reader.read_frame(0).unwrap().content.cells[0].clone();
        assert_eq!(cell.chars, "X");
        assert!(cell.style.bold);
        assert!(!cell.style.underline);
        let container::Color::Rgb(r, g, _) = cell.style.fg else {
            panic!("expected RGB fg");
        };
        assert!(r > g);
    }

    #[test]
    fn seek_by_time_in_a_long_recording() {
        let timing: String = "0.1 1\n".repeat(100);
        let script = vec![b'x'; 100];
        let (frames, bytes) = encode_to_bytes(&script, &timing, 10.0, GridSize::new(2, 4));
        assert_eq!(frames, 100);
        let reader = Reader::new(Cursor::new(bytes))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        assert_eq!(reader.search_for_frame(5.0), 50);
        assert_eq!(reader.search_for_frame(-1.0), 0);
        assert_eq!(reader.search_for_frame(1000.0), 99);
    }
}
