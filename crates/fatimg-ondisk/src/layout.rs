//! Image geometry.
//!
//! An image is laid out as
//!
//! ```text
//! | superblock | inode table (N × INODE_SIZE) | FAT (N × FAT_ENTRY_SIZE) | data (N × BLOCK_SIZE) |
//! ```
//!
//! where `N` is the block count. Every block costs one inode slot, one FAT
//! slot and its own payload, so `N` follows directly from the image size.

use fatimg_types::{
    BLOCK_SIZE, BlockIndex, FAT_ENTRY_SIZE, FAT_SLOT_RESERVATION, INODE_SIZE, ParseError,
    SUPERBLOCK_SIZE, u64_to_u32,
};
use serde::{Deserialize, Serialize};

/// Bytes of image budget consumed by each block.
pub const PER_BLOCK_COST: u64 = (INODE_SIZE + FAT_SLOT_RESERVATION + BLOCK_SIZE) as u64;

/// Largest block count whose indices still fit the signed 32-bit FAT entry.
pub const MAX_BLOCK_COUNT: u32 = i32::MAX as u32;

/// Number of blocks an image of `total_bytes` holds.
///
/// Fails when the image cannot hold a superblock plus one block, or when the
/// count would not be addressable by FAT entries.
pub fn blocks_for_image_size(total_bytes: u64) -> Result<u32, ParseError> {
    let usable = total_bytes
        .checked_sub(SUPERBLOCK_SIZE as u64)
        .ok_or(ParseError::InvalidField {
            field: "image_size",
            reason: "smaller than the superblock",
        })?;
    let count = usable / PER_BLOCK_COST;
    if count == 0 {
        return Err(ParseError::InvalidField {
            field: "image_size",
            reason: "too small to hold a single block",
        });
    }
    let count = u64_to_u32(count, "block_count")?;
    if count > MAX_BLOCK_COUNT {
        return Err(ParseError::InvalidField {
            field: "block_count",
            reason: "exceeds signed 32-bit FAT entry range",
        });
    }
    Ok(count)
}

/// Byte offset of `block` in an image with `block_count` blocks.
#[must_use]
pub fn block_byte_offset(block_count: u32, block: BlockIndex) -> u64 {
    Layout::new(block_count).block_byte_offset(block)
}

/// Fixed byte offsets of every region for a given block count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    block_count: u32,
}

impl Layout {
    #[must_use]
    pub fn new(block_count: u32) -> Self {
        Self { block_count }
    }

    /// Layout for a fresh image of `total_bytes`.
    pub fn for_image_size(total_bytes: u64) -> Result<Self, ParseError> {
        blocks_for_image_size(total_bytes).map(Self::new)
    }

    #[must_use]
    pub fn block_count(self) -> u32 {
        self.block_count
    }

    #[must_use]
    pub fn inode_table_offset(self) -> u64 {
        SUPERBLOCK_SIZE as u64
    }

    #[must_use]
    pub fn inode_table_len(self) -> u64 {
        u64::from(self.block_count) * INODE_SIZE as u64
    }

    #[must_use]
    pub fn fat_table_offset(self) -> u64 {
        self.inode_table_offset() + self.inode_table_len()
    }

    #[must_use]
    pub fn fat_table_len(self) -> u64 {
        u64::from(self.block_count) * FAT_ENTRY_SIZE as u64
    }

    /// First byte of block 0; also the length of the header (superblock + tables).
    #[must_use]
    pub fn data_region_offset(self) -> u64 {
        self.fat_table_offset() + self.fat_table_len()
    }

    #[must_use]
    pub fn data_region_end(self) -> u64 {
        self.data_region_offset() + u64::from(self.block_count) * BLOCK_SIZE as u64
    }

    #[must_use]
    pub fn block_byte_offset(self, block: BlockIndex) -> u64 {
        self.data_region_offset() + u64::from(block.0) * BLOCK_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_block_cost_matches_record_sizes() {
        assert_eq!(PER_BLOCK_COST, 32 + 8 + 2048);
    }

    #[test]
    fn block_count_floor_division() {
        let one = SUPERBLOCK_SIZE as u64 + PER_BLOCK_COST;
        assert_eq!(blocks_for_image_size(one), Ok(1));
        assert_eq!(blocks_for_image_size(one + PER_BLOCK_COST - 1), Ok(1));
        assert_eq!(blocks_for_image_size(one + PER_BLOCK_COST), Ok(2));
        // 1 MiB image.
        assert_eq!(
            blocks_for_image_size(1 << 20),
            Ok(u32::try_from(((1_u64 << 20) - 24) / 2088).unwrap())
        );
    }

    #[test]
    fn too_small_images_are_rejected() {
        assert!(blocks_for_image_size(0).is_err());
        assert!(blocks_for_image_size(SUPERBLOCK_SIZE as u64 - 1).is_err());
        assert!(blocks_for_image_size(SUPERBLOCK_SIZE as u64).is_err());
        assert!(blocks_for_image_size(SUPERBLOCK_SIZE as u64 + PER_BLOCK_COST - 1).is_err());
    }

    #[test]
    fn region_offsets_are_contiguous() {
        let layout = Layout::new(10);
        assert_eq!(layout.inode_table_offset(), 24);
        assert_eq!(layout.fat_table_offset(), 24 + 320);
        assert_eq!(layout.data_region_offset(), 24 + 320 + 40);
        assert_eq!(layout.block_byte_offset(BlockIndex(0)), 384);
        assert_eq!(layout.block_byte_offset(BlockIndex(3)), 384 + 3 * 2048);
        assert_eq!(layout.data_region_end(), 384 + 10 * 2048);
        assert_eq!(
            block_byte_offset(10, BlockIndex(3)),
            layout.block_byte_offset(BlockIndex(3))
        );
    }

    #[test]
    fn fresh_layout_fits_inside_image() {
        for size in [2112_u64, 10_000, 65_536, 1 << 20, 3_000_001] {
            let layout = Layout::for_image_size(size).expect("layout");
            assert!(
                layout.data_region_end() <= size,
                "size={size} end={}",
                layout.data_region_end()
            );
        }
    }
}
