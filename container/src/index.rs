use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::EncodableData;

/// Two close-enough frame times compare equal when searching.
pub const TIME_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub time_offset: f64,
    pub byte_offset: u64,
}

/// Trailing table of (time, byte offset) pairs, one per frame, in frame-id
/// order. Stored zstd-compressed behind a u64 big-endian length marker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItsIndex {
    pub frames: Vec<IndexEntry>,
}

impl ItsIndex {
    pub fn push(&mut self, time_offset: f64, byte_offset: u64) {
        self.frames.push(IndexEntry {
            time_offset,
            byte_offset,
        });
    }

    pub fn count(&self) -> u64 {
        self.frames.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn entry(&self, frame_id: u64) -> Option<IndexEntry> {
        self.frames.get(frame_id as usize).copied()
    }

    pub fn last_time(&self) -> f64 {
        self.frames.last().map(|e| e.time_offset).unwrap_or(0.0)
    }

    /// Frame id whose time offset is closest at-or-before `time`, clamped to
    /// the first/last frame for out-of-range times.
    pub fn search_for_frame(&self, time: f64) -> u64 {
        let frames = &self.frames;
        if frames.is_empty() || frames[0].time_offset + TIME_TOLERANCE >= time {
            return 0;
        }
        if frames[frames.len() - 1].time_offset - TIME_TOLERANCE < time {
            return frames.len() as u64 - 1;
        }
        let at_or_before = frames.partition_point(|e| e.time_offset <= time + TIME_TOLERANCE);
        at_or_before as u64 - 1
    }
}

impl EncodableData for ItsIndex {
    fn estimated_size(&self) -> Option<usize> {
        Some(8 + self.frames.len() * 16)
    }

    fn encode_into<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        out.write_u64::<BigEndian>(self.frames.len() as u64)?;
        for entry in &self.frames {
            out.write_f64::<BigEndian>(entry.time_offset)?;
            out.write_u64::<BigEndian>(entry.byte_offset)?;
        }
        Ok(8 + self.frames.len() as u64 * 16)
    }

    fn decode_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let count = input.read_u64::<BigEndian>()?;
        let mut frames = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let time_offset = input.read_f64::<BigEndian>()?;
            let byte_offset = input.read_u64::<BigEndian>()?;
            frames.push(IndexEntry {
                time_offset,
                byte_offset,
            });
        }
        Ok(ItsIndex { frames })
    }
}
