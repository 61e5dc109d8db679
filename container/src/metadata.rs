use std::{fmt::Display, str::FromStr};

use rasn::prelude::*;

#[derive(AsnType, Debug, Clone, Decode, Encode, PartialEq, Eq, Hash, Copy)]
#[rasn(enumerated)]
#[repr(u8)]
pub enum CompressionMode {
    None = 0,
    Zstd = 1,
}

impl FromStr for CompressionMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" | "null" => CompressionMode::None,
            "zst" | "zstd" => CompressionMode::Zstd,
            _ => return Err("Invalid compression mode!"),
        })
    }
}

impl Display for CompressionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CompressionMode::None => "none",
            CompressionMode::Zstd => "zstd",
        })
    }
}

/// Self-describing file header. Written behind the magic with a u32
/// big-endian length marker; rewritten in place on finalize, which is why the
/// writer reserves the worst-case encoding up front.
#[derive(AsnType, Debug, Clone, Decode, Encode, PartialEq)]
pub struct ItsHeader {
    #[rasn(tag(explicit(context, 0)))]
    pub version: u32,
    /// Seconds since the Unix epoch at creation time.
    #[rasn(tag(explicit(context, 1)))]
    pub timestamp: u64,
    #[rasn(tag(explicit(context, 2)))]
    pub rows: u32,
    #[rasn(tag(explicit(context, 3)))]
    pub cols: u32,
    #[rasn(identifier = "compression-mode", tag(explicit(context, 4)))]
    pub compression_mode: CompressionMode,
    /// zstd-compressed training dictionary; empty when frames are compressed
    /// without one.
    #[rasn(identifier = "compression-dict", tag(explicit(context, 5)))]
    pub compression_dict: OctetString,
    #[rasn(identifier = "first-frame-offset", tag(explicit(context, 6)))]
    pub first_frame_offset: u64,
    #[rasn(identifier = "index-offset", tag(explicit(context, 7)))]
    pub index_offset: u64,
}

pub const FORMAT_VERSION: u32 = 1;

impl ItsHeader {
    pub fn new(
        timestamp: u64,
        rows: u32,
        cols: u32,
        compression_mode: CompressionMode,
        compression_dict: OctetString,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            timestamp,
            rows,
            cols,
            compression_mode,
            compression_dict,
            first_frame_offset: u64::MAX,
            index_offset: u64::MAX,
        }
    }
}
