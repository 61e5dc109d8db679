//! Frame cadence driven by a `script`-style timing stream: lines of
//! `Δseconds Δbytes` that say how long the terminal was quiet before the
//! next span of output bytes.

use std::io::{self, BufRead, Read};

/// One sampled frame's worth of script bytes with its derived timing.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameChunk {
    pub frame_id: u64,
    pub time: f64,
    pub duration: f64,
    pub data: Vec<u8>,
}

/// Pulls timing lines and accumulates deltas until at least `1/fps` seconds
/// have passed, then hands out the matching script span. Reads are sequential
/// and non-overlapping; together the emitted chunks cover the script prefix
/// exactly up to the last frame.
pub struct FramePass<T: BufRead, S: Read> {
    timing: T,
    script: S,
    spf: f64,
    acc_secs: f64,
    acc_bytes: u64,
    elapsed: f64,
    next_frame_id: u64,
    script_offset: u64,
    done: bool,
    line: String,
}

impl<T: BufRead, S: Read> FramePass<T, S> {
    pub fn new(fps: f64, timing: T, script: S) -> FramePass<T, S> {
        FramePass {
            timing,
            script,
            spf: 1.0 / fps,
            acc_secs: 0.0,
            acc_bytes: 0,
            elapsed: 0.0,
            next_frame_id: 0,
            script_offset: 0,
            done: false,
            line: String::new(),
        }
    }

    /// Drops the script's first line (typescript files open with a
    /// "Script started on ..." banner that carries no timing entry).
    pub fn skip_script_header(&mut self) -> io::Result<u64> {
        let mut skipped = 0u64;
        let mut byte = [0u8; 1];
        loop {
            match self.script.read(&mut byte)? {
                0 => break,
                _ => {
                    skipped += 1;
                    if byte[0] == b'\n' {
                        break;
                    }
                }
            }
        }
        self.script_offset += skipped;
        Ok(skipped)
    }

    /// Total script bytes consumed so far, including a skipped header line.
    pub fn bytes_consumed(&self) -> u64 {
        self.script_offset
    }

    pub fn next_frame(&mut self) -> io::Result<Option<FrameChunk>> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.line.clear();
            if self.timing.read_line(&mut self.line)? == 0 {
                self.done = true;
                return Ok(None);
            }
            let trimmed = self.line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }

            let (secs, step) = parse_timing_line(trimmed)?;
            self.acc_secs += secs;
            self.acc_bytes += step;
            if self.acc_secs < self.spf {
                continue;
            }

            let mut data = vec![0u8; self.acc_bytes as usize];
            let got = read_full(&mut self.script, &mut data)?;
            data.truncate(got);
            if (got as u64) < self.acc_bytes {
                // premature EOF: emit what is there, then stop
                self.done = true;
            }

            let chunk = FrameChunk {
                frame_id: self.next_frame_id,
                time: self.elapsed,
                duration: self.acc_secs,
                data,
            };
            self.script_offset += got as u64;
            self.elapsed += self.acc_secs;
            self.next_frame_id += 1;
            self.acc_secs = 0.0;
            self.acc_bytes = 0;
            return Ok(Some(chunk));
        }
    }
}

fn parse_timing_line(line: &str) -> io::Result<(f64, u64)> {
    let mut fields = line.split_whitespace();
    let parsed = match (fields.next(), fields.next()) {
        (Some(secs), Some(step)) => secs
            .parse::<f64>()
            .ok()
            .zip(step.parse::<u64>().ok()),
        _ => None,
    };
    parsed.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed timing line {line:?}"),
        )
    })
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(fps: f64, timing: &str, script: &str) -> Vec<FrameChunk> {
        let mut pass = FramePass::new(fps, timing.as_bytes(), script.as_bytes());
        let mut chunks = Vec::new();
        while let Some(chunk) = pass.next_frame().unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn one_frame_per_matching_interval() {
        let chunks = collect(2.0, "0.5 3\n0.5 3\n", "aaabbb");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].frame_id, 0);
        assert_eq!(chunks[0].time, 0.0);
        assert_eq!(chunks[0].duration, 0.5);
        assert_eq!(chunks[0].data, b"aaa");
        assert_eq!(chunks[1].frame_id, 1);
        assert_eq!(chunks[1].time, 0.5);
        assert_eq!(chunks[1].duration, 0.5);
        assert_eq!(chunks[1].data, b"bbb");
    }

    #[test]
    fn short_intervals_accumulate() {
        let chunks = collect(1.0, "0.4 1\n0.4 1\n0.4 1\n0.4 1\n0.4 1\n", "abcde");
        // 0.4+0.4+0.4 crosses 1s, then the remaining two lines never do.
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].duration, 0.4 + 0.4 + 0.4);
        assert_eq!(chunks[0].data, b"abc");
    }

    #[test]
    fn chunks_cover_the_script_prefix_exactly() {
        let timing = "0.6 2\n0.7 3\n0.2 1\n0.9 4\n1.5 2\n";
        let script = "ab cde f ghij kl";
        let chunks = collect(1.0, timing, script);
        let mut joined = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.frame_id, i as u64);
            joined.extend_from_slice(&chunk.data);
        }
        assert!(script.as_bytes().starts_with(&joined));
        let times: Vec<f64> = chunks.iter().map(|c| c.time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn premature_script_eof_stops_the_pass() {
        let chunks = collect(1.0, "1.0 4\n1.0 4\n", "abcde");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].data, b"abcd");
        assert_eq!(chunks[1].data, b"e");
    }

    #[test]
    fn header_skip_is_explicit() {
        let script = "banner line\naaabbb";
        let mut pass = FramePass::new(2.0, "0.5 3\n0.5 3\n".as_bytes(), script.as_bytes());
        let skipped = pass.skip_script_header().unwrap();
        assert_eq!(skipped, 12);
        let chunk = pass.next_frame().unwrap().unwrap();
        assert_eq!(chunk.data, b"aaa");
        assert_eq!(pass.bytes_consumed(), 15);
    }

    #[test]
    fn malformed_timing_is_invalid_data() {
        let mut pass = FramePass::new(1.0, "bogus\n".as_bytes(), "x".as_bytes());
        let err = pass.next_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
