use std::{
    fmt::Display,
    io::{self, Read, Write},
    str::FromStr,
    time::Duration,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use typed_builder::TypedBuilder;

pub mod attrs;
pub mod index;
pub mod metadata;
pub mod read;
pub mod write;

pub use attrs::{Cell, CellStyle, Color};

/*

File Format!

-- (magic: 11 bytes, 0x01 "ITS-PROTO3")
-- (marker: header len, u32 BE) Header: DER-encoded ItsHeader
-- Frames, each: (marker: len, u32 BE) zstd(frame record)
-- at header.index_offset: (marker: len, u64 BE) zstd(frame index)

*/

pub const FILE_MAGIC: &[u8; 11] = b"\x01ITS-PROTO3";

/// Upper bound accepted for the header length marker.
pub const MAX_HEADER_LEN: u32 = 10_000;

/// Frames longer than this are rejected as corrupt before any payload
/// allocation happens.
pub const MAX_FRAME_LEN: u32 = 50 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not an ITS file (bad magic)")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of file")]
    TruncatedFile,
    #[error("corrupt stream: {0}")]
    Corrupt(String),
    #[error("invalid grid dimension {rows}x{cols}")]
    InvalidDimension { rows: u32, cols: u32 },
    #[error("invalid frame index: {0}")]
    InvalidIndex(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("terminal emulation failed: {0}")]
    VtEmulation(String),
}

impl Error {
    pub fn corrupt(what: impl Display) -> Error {
        Error::Corrupt(what.to_string())
    }

    /// Reads past the end of a record are truncation, not garden-variety I/O.
    pub fn from_read(err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedFile
        } else {
            Error::Io(err)
        }
    }
}

pub struct FormatDuration(pub Duration);

impl Display for FormatDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seconds = self.0.as_secs() % 60;
        let minutes = (self.0.as_secs() / 60) % 60;
        let hours = (self.0.as_secs() / 60) / 60;
        let frac_secs = self.0.subsec_millis();
        write!(f, "{hours:0>2}:{minutes:0>2}:{seconds:0>2}.{frac_secs:0>3}")
    }
}

/// Seconds-as-f64 variant used for frame times; negative values clamp to zero.
pub fn format_seconds(secs: f64) -> FormatDuration {
    FormatDuration(Duration::from_secs_f64(secs.max(0.0)))
}

pub trait EncodableData: Sized {
    fn estimated_size(&self) -> Option<usize>;

    /// returns bytes written
    fn encode_into<W: Write>(&self, out: &mut W) -> io::Result<u64>;

    fn decode_from<R: Read>(input: &mut R) -> io::Result<Self>;

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.estimated_size().unwrap_or(256));
        self.encode_into(&mut vec).unwrap();
        vec
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub rows: u32,
    pub cols: u32,
}

impl GridSize {
    pub fn new(rows: u32, cols: u32) -> GridSize {
        GridSize { rows, cols }
    }

    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

impl Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl FromStr for GridSize {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (rows, cols) = s.split_once('x').ok_or("expected ROWSxCOLS")?;
        let rows = rows.parse().map_err(|_| "invalid row count")?;
        let cols = cols.parse().map_err(|_| "invalid column count")?;
        if rows == 0 || cols == 0 {
            return Err("grid must be non-empty");
        }
        Ok(GridSize { rows, cols })
    }
}

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum FrameType {
    #[default]
    Keyframe = 0,
}

impl TryFrom<u8> for FrameType {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        match value {
            0 => Ok(FrameType::Keyframe),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unrecognized frame type {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, TypedBuilder)]
pub struct Frame {
    pub frame_id: u64,
    /// Seconds since the start of the recording.
    pub time: f64,
    /// Seconds this frame stays on screen.
    pub duration: f64,
    #[builder(default, setter(skip))]
    pub frame_type: FrameType,
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame {} @ {} (+{:.3}s)",
            self.frame_id,
            format_seconds(self.time),
            self.duration
        )
    }
}

/// Flat row-major grid of cells. Indexing needs the grid size, which lives in
/// the file header rather than in every frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameContent {
    pub cells: Vec<Cell>,
}

impl FrameContent {
    pub fn blank(size: GridSize) -> FrameContent {
        FrameContent {
            cells: vec![Cell::blank(); size.cell_count()],
        }
    }

    pub fn cell_at(&self, row: u32, col: u32, size: &GridSize) -> &Cell {
        &self.cells[(size.cols * row + col) as usize]
    }

    pub fn set_cell_at(&mut self, row: u32, col: u32, cell: Cell, size: &GridSize) {
        self.cells[(size.cols * row + col) as usize] = cell;
    }
}

/// One full keyframe on the wire: metadata followed by the two parallel cell
/// sequences (chars, then attribute codes).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameRecord {
    pub info: Frame,
    pub content: FrameContent,
}

/// Serializes a frame without requiring an owned [`FrameRecord`]; the writer
/// streams borrowed frames through here.
pub fn encode_frame_into<W: Write>(
    info: &Frame,
    content: &FrameContent,
    out: &mut W,
) -> io::Result<u64> {
    let mut total_bytes = 0u64;

    out.write_u64::<BigEndian>(info.frame_id)?;
    out.write_f64::<BigEndian>(info.time)?;
    out.write_f64::<BigEndian>(info.duration)?;
    out.write_u8(info.frame_type as u8)?;
    out.write_u32::<BigEndian>(content.cells.len() as u32)?;
    total_bytes += 8 * 3 + 1 + 4;

    for cell in &content.cells {
        out.write_u16::<BigEndian>(cell.chars.len() as u16)?;
        out.write_all(cell.chars.as_bytes())?;
        total_bytes += 2 + cell.chars.len() as u64;
    }
    for cell in &content.cells {
        out.write_u64::<BigEndian>(cell.style.attr_code())?;
        total_bytes += 8;
    }

    Ok(total_bytes)
}

impl EncodableData for FrameRecord {
    fn estimated_size(&self) -> Option<usize> {
        Some(
            8 + 8 + 8 // id + time + duration
            + 1 // frame type
            + 4 // cell count
            + self.content.cells.iter().map(|c| 2 + c.chars.len() + 8).sum::<usize>(),
        )
    }

    fn encode_into<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        encode_frame_into(&self.info, &self.content, out)
    }

    fn decode_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let frame_id = input.read_u64::<BigEndian>()?;
        let time = input.read_f64::<BigEndian>()?;
        let duration = input.read_f64::<BigEndian>()?;
        let frame_type = FrameType::try_from(input.read_u8()?)?;
        let cell_count = input.read_u32::<BigEndian>()? as usize;

        let mut chars = Vec::with_capacity(cell_count.min(1 << 20));
        for _ in 0..cell_count {
            let len = input.read_u16::<BigEndian>()? as usize;
            let mut buf = vec![0u8; len];
            input.read_exact(&mut buf)?;
            chars.push(
                String::from_utf8(buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            );
        }

        let mut cells = Vec::with_capacity(cell_count.min(1 << 20));
        for chars in chars {
            let code = input.read_u64::<BigEndian>()?;
            cells.push(Cell {
                chars,
                style: CellStyle::from_attr_code(code),
            });
        }

        let mut info = Frame::builder()
            .frame_id(frame_id)
            .time(time)
            .duration(duration)
            .build();
        info.frame_type = frame_type;

        Ok(FrameRecord {
            info,
            content: FrameContent { cells },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attrs::Color;

    #[test]
    fn frame_record_roundtrip() {
        let size = GridSize::new(2, 2);
        let mut content = FrameContent::blank(size);
        content.set_cell_at(
            0,
            1,
            Cell {
                chars: "Ä".to_string(),
                style: CellStyle {
                    fg: Color::Rgb(220, 50, 47),
                    bg: Color::Indexed(3),
                    bold: true,
                    underline: false,
                },
            },
            &size,
        );

        let record = FrameRecord {
            info: Frame::builder().frame_id(7).time(1.25).duration(0.25).build(),
            content,
        };

        let encoded = record.encode_to_vec();
        let decoded = FrameRecord::decode_from(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(encoded.len() as u64, {
            let mut sink = Vec::new();
            record.encode_into(&mut sink).unwrap()
        });
    }

    #[test]
    fn grid_size_parses() {
        let size: GridSize = "24x80".parse().unwrap();
        assert_eq!(size, GridSize::new(24, 80));
        assert!("24".parse::<GridSize>().is_err());
        assert!("0x80".parse::<GridSize>().is_err());
    }

    #[test]
    fn unknown_frame_type_is_invalid_data() {
        let record = FrameRecord::default();
        let mut encoded = record.encode_to_vec();
        encoded[24] = 9; // frame type byte
        let err = FrameRecord::decode_from(&mut encoded.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
