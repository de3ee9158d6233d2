#![forbid(unsafe_code)]
//! On-disk format for fatimg images.
//!
//! Pure encoding crate with no I/O. Decodes byte slices into the superblock,
//! inode records and FAT entries, encodes them back bit-exactly, and computes
//! region offsets (see [`layout`]).
//!
//! All multi-byte fields are little-endian. Superblock words are 64-bit.

pub mod layout;

pub use layout::{Layout, blocks_for_image_size, block_byte_offset};

use fatimg_types::{
    BlockIndex, FAT_ENTRY_SIZE, FatEntry, INODE_RAW_NO_HEAD, INODE_SIZE, MAX_NAME_LEN, ParseError,
    SUPERBLOCK_SIZE, ensure_slice, read_fixed, read_le_i32, read_le_u32, read_le_u64,
    trim_nul_padded,
};
use serde::{Deserialize, Serialize};

/// Fixed image header, written once by `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub image_size_bytes: u64,
    /// Advisory only; the live count is recomputed from the FAT.
    pub free_block_count_hint: u64,
    pub total_block_count: u64,
}

impl Superblock {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, SUPERBLOCK_SIZE)?;
        Ok(Self {
            image_size_bytes: read_le_u64(bytes, 0x00)?,
            free_block_count_hint: read_le_u64(bytes, 0x08)?,
            total_block_count: read_le_u64(bytes, 0x10)?,
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0_u8; SUPERBLOCK_SIZE];
        out[0x00..0x08].copy_from_slice(&self.image_size_bytes.to_le_bytes());
        out[0x08..0x10].copy_from_slice(&self.free_block_count_hint.to_le_bytes());
        out[0x10..0x18].copy_from_slice(&self.total_block_count.to_le_bytes());
        out
    }
}

/// One inode slot as stored on disk.
///
/// `head == None` marks an unoccupied slot; name and size of unoccupied
/// slots carry no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub name: [u8; MAX_NAME_LEN],
    pub file_size: u32,
    pub head: Option<BlockIndex>,
}

impl Default for InodeRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl InodeRecord {
    pub const EMPTY: Self = Self {
        name: [0_u8; MAX_NAME_LEN],
        file_size: 0,
        head: None,
    };

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.head.is_some()
    }

    /// Name bytes up to the first NUL (or the whole field when full).
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MAX_NAME_LEN);
        &self.name[..end]
    }

    #[must_use]
    pub fn name_lossy(&self) -> String {
        trim_nul_padded(&self.name)
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, INODE_SIZE)?;
        let name = read_fixed::<MAX_NAME_LEN>(bytes, 0)?;
        let file_size = read_le_u32(bytes, MAX_NAME_LEN)?;
        let raw_head = read_le_i32(bytes, MAX_NAME_LEN + 4)?;
        let head = match raw_head {
            INODE_RAW_NO_HEAD => None,
            n if n >= 0 => Some(BlockIndex::from_raw(n)?),
            _ => {
                return Err(ParseError::InvalidField {
                    field: "inode_head_block",
                    reason: "negative value other than NONE",
                });
            }
        };
        Ok(Self {
            name,
            file_size,
            head,
        })
    }

    pub fn write_to(&self, out: &mut [u8; INODE_SIZE]) -> Result<(), ParseError> {
        let raw_head = match self.head {
            Some(head) => head.to_raw()?,
            None => INODE_RAW_NO_HEAD,
        };
        out[..MAX_NAME_LEN].copy_from_slice(&self.name);
        out[MAX_NAME_LEN..MAX_NAME_LEN + 4].copy_from_slice(&self.file_size.to_le_bytes());
        out[MAX_NAME_LEN + 4..].copy_from_slice(&raw_head.to_le_bytes());
        Ok(())
    }
}

/// Decode `count` consecutive inode records.
pub fn parse_inode_table(bytes: &[u8], count: usize) -> Result<Vec<InodeRecord>, ParseError> {
    let len = count.checked_mul(INODE_SIZE).ok_or(ParseError::InvalidField {
        field: "inode_table",
        reason: "length overflow",
    })?;
    let table = ensure_slice(bytes, 0, len)?;
    table
        .chunks_exact(INODE_SIZE)
        .map(InodeRecord::parse_from_bytes)
        .collect()
}

pub fn encode_inode_table(records: &[InodeRecord]) -> Result<Vec<u8>, ParseError> {
    let mut out = vec![0_u8; records.len() * INODE_SIZE];
    for (record, chunk) in records.iter().zip(out.chunks_exact_mut(INODE_SIZE)) {
        let slot: &mut [u8; INODE_SIZE] =
            chunk.try_into().map_err(|_| ParseError::InvalidField {
                field: "inode_table",
                reason: "chunk size mismatch",
            })?;
        record.write_to(slot)?;
    }
    Ok(out)
}

/// Decode `count` consecutive FAT entries.
pub fn parse_fat_table(bytes: &[u8], count: usize) -> Result<Vec<FatEntry>, ParseError> {
    let len = count
        .checked_mul(FAT_ENTRY_SIZE)
        .ok_or(ParseError::InvalidField {
            field: "fat_table",
            reason: "length overflow",
        })?;
    let table = ensure_slice(bytes, 0, len)?;
    (0..count)
        .map(|idx| read_le_i32(table, idx * FAT_ENTRY_SIZE).and_then(FatEntry::from_raw))
        .collect()
}

pub fn encode_fat_table(entries: &[FatEntry]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(entries.len() * FAT_ENTRY_SIZE);
    for entry in entries {
        out.extend_from_slice(&entry.to_raw()?.to_le_bytes());
    }
    Ok(out)
}
