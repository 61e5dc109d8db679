//! Rebuild an existing recording with a freshly trained dictionary. Frames
//! are taken from the input file as-is, so no terminal emulation runs here;
//! the output is byte-different but frame-for-frame identical.

use std::io::{Read, Seek, Write};

use container::{
    Result, index::ItsIndex, metadata::CompressionMode, read::Reader, write::ItsWriter,
};
use humansize::{DECIMAL, format_size};

use crate::encode::train_dictionary;

/// How many frames the dictionary pass samples, spread evenly over the file.
const NUM_SAMPLES: u64 = 1000;

const DICT_SIZE: usize = 5 * 1024 * 1024;

pub fn run_optimize<R, W>(input: R, out: W, progress: bool) -> Result<u64>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let reader = Reader::new(input).read_header()?;
    let first_frame_offset = reader.header().first_frame_offset;
    let frames_end = reader.header().index_offset;
    let mut reader = reader.read_index()?;

    // Scan the frame stream front to back instead of trusting the input's
    // index; a stale index still yields a correct rebuild.
    let mut scanned = ItsIndex::default();
    let mut next_offset = first_frame_offset;
    while next_offset < frames_end {
        let this_offset = next_offset;
        match reader.read_frame_at(this_offset) {
            Ok((record, after)) => {
                scanned.push(record.info.time, this_offset);
                next_offset = after;
            }
            Err(err) => {
                tracing::warn!(offset = this_offset, error = %err, "frame scan stopped early");
                break;
            }
        }
        if progress && scanned.count() % 10 == 0 {
            eprint!(
                "\r\x1b[2KIndexing frames... ({})",
                format_size(next_offset, DECIMAL)
            );
        }
    }
    if progress {
        eprintln!("\r\x1b[2KThere are {} frames.", scanned.count());
    }

    let mut samples: Vec<u8> = Vec::new();
    let mut sample_sizes: Vec<usize> = Vec::new();
    let skip = (scanned.count() / NUM_SAMPLES).max(1);
    let mut i = 0;
    while i < scanned.count() {
        if let Some(entry) = scanned.entry(i) {
            let (bytes, _) = reader.read_frame_bytes_at(entry.byte_offset)?;
            sample_sizes.push(bytes.len());
            samples.extend_from_slice(&bytes);
        }
        i += skip;
    }
    if progress {
        eprintln!("Building compression dict from {} samples...", sample_sizes.len());
    }
    let dict = train_dictionary(&samples, &sample_sizes, DICT_SIZE);
    drop(samples);

    let mut writer = ItsWriter::new(out, reader.size(), CompressionMode::Zstd, dict.as_deref())?;
    for entry in scanned.frames.clone() {
        match reader.read_frame_at(entry.byte_offset) {
            Ok((record, _)) => writer.write_frame(&record.info, &record.content)?,
            Err(err) => {
                tracing::warn!(offset = entry.byte_offset, error = %err, "skipping unreadable frame");
                continue;
            }
        }
        if progress && writer.frames_written() % 5 == 0 {
            eprint!(
                "\r\x1b[2KWriting frame {} / {}",
                writer.frames_written(),
                scanned.count()
            );
        }
    }
    if progress {
        eprintln!("\r\x1b[2KWrote {} frames, finalizing file...", writer.frames_written());
    }
    let frames = writer.frames_written();
    writer.finalize()?;
    Ok(frames)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use container::GridSize;

    use super::*;
    use crate::encode::{EncodeOptions, run_encode};

    #[test]
    fn optimize_preserves_every_frame() {
        let timing: String = "0.25 4\n".repeat(24);
        let script: Vec<u8> = (0..96u8).map(|i| b'a' + i % 26).collect();
        let mut script = Cursor::new(script);
        let mut timing = Cursor::new(timing.into_bytes());
        let mut original = Cursor::new(Vec::new());
        let opts = EncodeOptions {
            fps: 4.0,
            size: GridSize::new(2, 6),
            ..EncodeOptions::default()
        };
        run_encode(&mut script, &mut timing, &mut original, &opts).unwrap();
        let original = original.into_inner();

        let mut optimized = Cursor::new(Vec::new());
        let frames =
            run_optimize(Cursor::new(original.clone()), &mut optimized, false).unwrap();
        let optimized = optimized.into_inner();

        let mut a = Reader::new(Cursor::new(original))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        let mut b = Reader::new(Cursor::new(optimized))
            .read_header()
            .unwrap()
            .read_index()
            .unwrap();
        assert_eq!(a.frame_count(), frames);
        assert_eq!(a.frame_count(), b.frame_count());
        for i in 0..a.frame_count() {
            assert_eq!(a.read_frame(i).unwrap(), b.read_frame(i).unwrap());
        }
    }
}
