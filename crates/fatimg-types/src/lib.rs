#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Payload bytes per data block.
pub const BLOCK_SIZE: usize = 2048;

/// Maximum file name length stored in an inode record.
pub const MAX_NAME_LEN: usize = 24;

/// Superblock: three 64-bit little-endian words.
pub const SUPERBLOCK_SIZE: usize = 24;

/// Inode record: name (24) + file size (4) + head block (4).
pub const INODE_SIZE: usize = MAX_NAME_LEN + 4 + 4;

/// Size of one serialized FAT entry.
pub const FAT_ENTRY_SIZE: usize = 4;

/// Per-block FAT budget used when deriving the block count from the image size.
///
/// Existing images were sized with a platform word per FAT slot even though each
/// serialized entry is only [`FAT_ENTRY_SIZE`] bytes; the surplus stays unused at
/// the end of the image. Changing this changes the block count `create` produces.
pub const FAT_SLOT_RESERVATION: usize = 8;

/// Raw FAT value marking the last block of a chain.
pub const FAT_RAW_END: i32 = -1;

/// Raw FAT value marking an unallocated block.
pub const FAT_RAW_FREE: i32 = -2;

/// Raw inode head value for an unoccupied slot.
pub const INODE_RAW_NO_HEAD: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
    #[must_use]
    pub fn to_usize(self) -> usize {
        self.0 as usize
    }

    /// Next index, `None` on overflow.
    #[must_use]
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Decode a non-negative raw on-disk index.
    pub fn from_raw(raw: i32) -> Result<Self, ParseError> {
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| ParseError::IntegerConversion {
                field: "block_index",
            })
    }

    /// Encode as the signed on-disk representation.
    pub fn to_raw(self) -> Result<i32, ParseError> {
        i32::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_index",
        })
    }
}

/// Index of a slot in the inode table (the "id" printed by dump).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeSlot(pub u32);

impl InodeSlot {
    #[must_use]
    pub fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// Decoded FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FatEntry {
    Free,
    End,
    Next(BlockIndex),
}

impl FatEntry {
    pub fn from_raw(raw: i32) -> Result<Self, ParseError> {
        match raw {
            FAT_RAW_FREE => Ok(Self::Free),
            FAT_RAW_END => Ok(Self::End),
            n if n >= 0 => Ok(Self::Next(BlockIndex::from_raw(n)?)),
            _ => Err(ParseError::InvalidField {
                field: "fat_entry",
                reason: "negative value other than END or FREE",
            }),
        }
    }

    pub fn to_raw(self) -> Result<i32, ParseError> {
        match self {
            Self::Free => Ok(FAT_RAW_FREE),
            Self::End => Ok(FAT_RAW_END),
            Self::Next(next) => next.to_raw(),
        }
    }

    #[must_use]
    pub fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_i32(data: &[u8], offset: usize) -> Result<i32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a zero-padded name field. A full field has no terminator.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

pub fn u64_to_u32(value: u64, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "{FAT_RAW_FREE}"),
            Self::End => write!(f, "{FAT_RAW_END}"),
            Self::Next(next) => write!(f, "{next}"),
        }
    }
}
