//! Streaming writer. The file is written once, front to back, with the
//! header patched in place on finalize.

use std::{
    io::{Seek, SeekFrom, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use byteorder::{BigEndian, WriteBytesExt};
use rasn::types::OctetString;
use zstd::{bulk::Compressor, zstd_safe};

use crate::{
    EncodableData, Error, FILE_MAGIC, Frame, FrameContent, GridSize, Result, encode_frame_into,
    index::ItsIndex,
    metadata::{CompressionMode, ItsHeader},
};

/// Per-frame and index compression level.
pub const COMPRESS_LEVEL: i32 = 8;
/// Level used for the dictionary embedded in the header.
pub const DICT_COMPRESS_LEVEL: i32 = 3;

pub struct ItsWriter<W: Write + Seek> {
    out: W,
    size: GridSize,
    header: ItsHeader,
    header_offset: u64,
    max_header_len: usize,
    offset: u64,
    first_frame_offset: u64,
    index: ItsIndex,
    compressor: Option<Compressor<'static>>,
    raw: Vec<u8>,
    compressed: Vec<u8>,
}

impl<W: Write + Seek> ItsWriter<W> {
    /// Writes the magic and a worst-case header reservation, leaving the
    /// writer positioned at the first frame.
    pub fn new(
        out: W,
        size: GridSize,
        mode: CompressionMode,
        dict: Option<&[u8]>,
    ) -> Result<ItsWriter<W>> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let compressed_dict = match (mode, dict) {
            (CompressionMode::Zstd, Some(dict)) => {
                OctetString::from(zstd::bulk::compress(dict, DICT_COMPRESS_LEVEL)?)
            }
            _ => OctetString::default(),
        };

        let compressor = match (mode, dict) {
            (CompressionMode::None, _) => None,
            (CompressionMode::Zstd, Some(dict)) => {
                Some(Compressor::with_dictionary(COMPRESS_LEVEL, dict)?)
            }
            (CompressionMode::Zstd, None) => Some(Compressor::new(COMPRESS_LEVEL)?),
        };

        let mut writer = ItsWriter {
            out,
            size,
            header: ItsHeader::new(timestamp, size.rows, size.cols, mode, compressed_dict),
            header_offset: 0,
            max_header_len: 0,
            offset: 0,
            first_frame_offset: 0,
            index: ItsIndex::default(),
            compressor,
            raw: Vec::with_capacity(size.cell_count() * 16),
            compressed: Vec::new(),
        };
        writer.init_output_file()?;
        Ok(writer)
    }

    fn init_output_file(&mut self) -> Result<()> {
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(FILE_MAGIC)?;
        self.offset = FILE_MAGIC.len() as u64;

        // Offsets are still u64::MAX placeholders here, which is what makes
        // this encoding the longest the header can ever get.
        self.max_header_len = encode_header(&self.header)?.len();
        self.header_offset = self.offset;
        self.out.write_u32::<BigEndian>(self.max_header_len as u32)?;
        self.offset += 4 + self.max_header_len as u64;
        self.first_frame_offset = self.offset;

        self.header.first_frame_offset = self.first_frame_offset;
        self.header.index_offset = 0;
        self.patch_header()?;
        self.out.seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }

    fn patch_header(&mut self) -> Result<()> {
        let buf = encode_header(&self.header)?;
        if buf.len() > self.max_header_len {
            return Err(Error::Io(std::io::Error::other(format!(
                "header length grew from {} to {}",
                self.max_header_len,
                buf.len()
            ))));
        }
        self.out.seek(SeekFrom::Start(self.header_offset))?;
        self.out.write_u32::<BigEndian>(buf.len() as u32)?;
        self.out.write_all(&buf)?;
        Ok(())
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn frames_written(&self) -> u64 {
        self.index.count()
    }

    pub fn write_frame(&mut self, info: &Frame, content: &FrameContent) -> Result<()> {
        self.index.push(info.time, self.offset);

        self.raw.clear();
        encode_frame_into(info, content, &mut self.raw)?;

        let body: &[u8] = match &mut self.compressor {
            Some(compressor) => {
                self.compressed.clear();
                self.compressed
                    .reserve(zstd_safe::compress_bound(self.raw.len()));
                let len = compressor.compress_to_buffer(&self.raw, &mut self.compressed)?;
                self.compressed.truncate(len);
                &self.compressed
            }
            None => &self.raw,
        };

        self.out.write_u32::<BigEndian>(body.len() as u32)?;
        self.out.write_all(body)?;
        self.offset += 4 + body.len() as u64;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<W> {
        let index_offset = self.offset;
        self.header.index_offset = index_offset;
        self.header.first_frame_offset = self.first_frame_offset;
        self.patch_header()?;

        self.out.seek(SeekFrom::Start(index_offset))?;
        let index_buf = self.index.encode_to_vec();
        let body = match self.header.compression_mode {
            CompressionMode::Zstd => zstd::bulk::compress(&index_buf, COMPRESS_LEVEL)?,
            CompressionMode::None => index_buf,
        };
        self.out.write_u64::<BigEndian>(body.len() as u64)?;
        self.out.write_all(&body)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn encode_header(header: &ItsHeader) -> Result<Vec<u8>> {
    rasn::der::encode(header)
        .map_err(|e| Error::Io(std::io::Error::other(format!("header encoding: {e}"))))
}
