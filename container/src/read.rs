//! Random-access reader. Opening is staged the same way the file is laid
//! out: magic and header first, then the trailing index; only a fully opened
//! [`ItsReader`] can fetch frames.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use zstd::dict::DecoderDictionary;

use crate::{
    EncodableData, Error, FILE_MAGIC, FrameRecord, GridSize, MAX_FRAME_LEN, MAX_HEADER_LEN,
    Result,
    index::ItsIndex,
    metadata::{CompressionMode, FORMAT_VERSION, ItsHeader},
};

pub struct Reader<R: Read + Seek> {
    reader: R,
}

#[derive(Debug)]
pub struct HeaderReader<R: Read + Seek> {
    reader: R,
    header: ItsHeader,
    size: GridSize,
    header_end: u64,
    file_len: u64,
}

pub struct ItsReader<R: Read + Seek> {
    reader: R,
    header: ItsHeader,
    size: GridSize,
    index: ItsIndex,
    ddict: Option<DecoderDictionary<'static>>,
}

impl<R: Read + Seek> Reader<R> {
    pub fn new(reader: R) -> Reader<R> {
        Reader { reader }
    }

    pub fn read_header(mut self) -> Result<HeaderReader<R>> {
        let mut magic = [0u8; FILE_MAGIC.len()];
        self.reader
            .read_exact(&mut magic)
            .map_err(|_| Error::BadMagic)?;
        if &magic != FILE_MAGIC {
            return Err(Error::BadMagic);
        }

        let header_len = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(Error::from_read)?;
        if header_len < 1 || header_len > MAX_HEADER_LEN {
            return Err(Error::corrupt(format!("invalid header length {header_len}")));
        }
        let mut header_buf = vec![0u8; header_len as usize];
        self.reader
            .read_exact(&mut header_buf)
            .map_err(Error::from_read)?;
        let header = rasn::der::decode::<ItsHeader>(&header_buf)
            .map_err(|e| Error::corrupt(format!("header: {e}")))?;

        if header.version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }
        let size = GridSize::new(header.rows, header.cols);
        if size.cell_count() == 0 {
            return Err(Error::InvalidDimension {
                rows: header.rows,
                cols: header.cols,
            });
        }

        let file_len = self.reader.seek(SeekFrom::End(0))?;

        Ok(HeaderReader {
            header_end: FILE_MAGIC.len() as u64 + 4 + header_len as u64,
            reader: self.reader,
            header,
            size,
            file_len,
        })
    }
}

impl<R: Read + Seek> HeaderReader<R> {
    pub fn header(&self) -> &ItsHeader {
        &self.header
    }

    pub fn read_index(mut self) -> Result<ItsReader<R>> {
        let index_offset = self.header.index_offset;
        if index_offset <= self.header_end {
            return Err(Error::InvalidIndex("index offset inside the header"));
        }

        self.reader.seek(SeekFrom::Start(index_offset))?;
        let index_len = self
            .reader
            .read_u64::<BigEndian>()
            .map_err(Error::from_read)?;
        if index_offset
            .checked_add(8 + index_len)
            .is_none_or(|end| end > self.file_len)
        {
            return Err(Error::InvalidIndex("index length overruns the file"));
        }
        let mut index_buf = vec![0u8; index_len as usize];
        self.reader
            .read_exact(&mut index_buf)
            .map_err(Error::from_read)?;

        let ddict = match self.header.compression_mode {
            CompressionMode::Zstd => {
                index_buf = zstd::stream::decode_all(index_buf.as_slice())
                    .map_err(|e| Error::corrupt(format!("index: {e}")))?;

                if self.header.compression_dict.is_empty() {
                    None
                } else {
                    let dict = zstd::stream::decode_all(self.header.compression_dict.as_ref())
                        .map_err(|e| Error::corrupt(format!("compression dict: {e}")))?;
                    Some(DecoderDictionary::copy(&dict))
                }
            }
            CompressionMode::None => None,
        };

        let index = ItsIndex::decode_from(&mut index_buf.as_slice())
            .map_err(|e| Error::corrupt(format!("index: {e}")))?;
        if index.is_empty() {
            return Err(Error::InvalidIndex("empty index"));
        }

        Ok(ItsReader {
            reader: self.reader,
            header: self.header,
            size: self.size,
            index,
            ddict,
        })
    }
}

impl<R: Read + Seek> ItsReader<R> {
    pub fn header(&self) -> &ItsHeader {
        &self.header
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn index(&self) -> &ItsIndex {
        &self.index
    }

    pub fn frame_count(&self) -> u64 {
        self.index.count()
    }

    /// Frame id whose time offset is closest at-or-before `time`.
    pub fn search_for_frame(&self, time: f64) -> u64 {
        self.index.search_for_frame(time)
    }

    pub fn frame_offset(&self, frame_id: u64) -> Result<u64> {
        self.index
            .entry(frame_id)
            .map(|e| e.byte_offset)
            .ok_or(Error::InvalidIndex("frame id out of range"))
    }

    /// Decompressed frame-message bytes at `byte_offset`, plus the offset of
    /// the following frame.
    pub fn read_frame_bytes_at(&mut self, byte_offset: u64) -> Result<(Vec<u8>, u64)> {
        self.reader.seek(SeekFrom::Start(byte_offset))?;
        let frame_len = self
            .reader
            .read_u32::<BigEndian>()
            .map_err(Error::from_read)?;
        if frame_len > MAX_FRAME_LEN {
            return Err(Error::corrupt(format!(
                "invalid frame byte length near {byte_offset:#x}"
            )));
        }
        let mut buf = vec![0u8; frame_len as usize];
        self.reader.read_exact(&mut buf).map_err(Error::from_read)?;
        let next_offset = byte_offset + 4 + frame_len as u64;

        let buf = match (self.header.compression_mode, &self.ddict) {
            (CompressionMode::None, _) => buf,
            (CompressionMode::Zstd, ddict) => {
                let mut decoder = match ddict {
                    Some(ddict) => zstd::stream::read::Decoder::with_prepared_dictionary(
                        std::io::BufReader::new(buf.as_slice()),
                        ddict,
                    ),
                    None => zstd::stream::read::Decoder::new(buf.as_slice()),
                }
                .map_err(|e| Error::corrupt(format!("frame: {e}")))?;
                let mut out = Vec::with_capacity(self.size.cell_count() * 16);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| Error::corrupt(format!("frame: {e}")))?;
                out
            }
        };

        Ok((buf, next_offset))
    }

    /// Full decode of the frame at `byte_offset`; the grid is validated
    /// against the header dimensions.
    pub fn read_frame_at(&mut self, byte_offset: u64) -> Result<(FrameRecord, u64)> {
        let (buf, next_offset) = self.read_frame_bytes_at(byte_offset)?;
        let record = FrameRecord::decode_from(&mut buf.as_slice())
            .map_err(|e| Error::corrupt(format!("frame: {e}")))?;
        if record.content.cells.len() != self.size.cell_count() {
            return Err(Error::corrupt(format!(
                "frame {} carries {} cells for a {} grid",
                record.info.frame_id,
                record.content.cells.len(),
                self.size
            )));
        }
        Ok((record, next_offset))
    }

    pub fn read_frame(&mut self, frame_id: u64) -> Result<FrameRecord> {
        let offset = self.frame_offset(frame_id)?;
        Ok(self.read_frame_at(offset)?.0)
    }
}
