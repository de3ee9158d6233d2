#![forbid(unsafe_code)]
//! Block allocation.
//!
//! ## Design
//!
//! The File Allocation Table holds one entry per data block. An entry is
//! `Free`, `End` (last block of a chain) or `Next(i)`, the following block of
//! the same file. A file is the singly linked list that starts at its inode's
//! head block, so chains are index-linked lists over one flat array.
//!
//! Allocation is lowest-index-first: a new chain starts at the first free
//! block, and every extension takes the first free block after the previous
//! one. The policy is deterministic and images built by the same sequence of
//! operations are byte-identical.
//!
//! Free blocks are counted by a full scan on demand; nothing is cached.

use fatimg_error::{FatError, Result};
use fatimg_types::{BLOCK_SIZE, BlockIndex, FatEntry};
use tracing::trace;

/// Blocks needed to store `len` bytes. An empty file still occupies one block.
#[must_use]
pub fn required_blocks(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64).max(1)
}

/// Bytes stored in the last block of a chain for a file of `len` bytes.
///
/// A non-empty file whose length is an exact multiple of `BLOCK_SIZE` fills
/// its last block completely.
#[must_use]
pub fn tail_len(len: u64) -> usize {
    let rem = (len % BLOCK_SIZE as u64) as usize;
    if rem == 0 && len > 0 { BLOCK_SIZE } else { rem }
}

/// In-memory File Allocation Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    entries: Vec<FatEntry>,
}

impl AllocationTable {
    /// Table with every block free.
    #[must_use]
    pub fn new_free(block_count: u32) -> Self {
        Self {
            entries: vec![FatEntry::Free; block_count as usize],
        }
    }

    #[must_use]
    pub fn from_entries(entries: Vec<FatEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[FatEntry] {
        &self.entries
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, block: BlockIndex) -> Option<FatEntry> {
        self.entries.get(block.to_usize()).copied()
    }

    fn slot_mut(&mut self, block: BlockIndex) -> Result<&mut FatEntry> {
        let count = self.entries.len();
        self.entries.get_mut(block.to_usize()).ok_or_else(|| {
            FatError::ImageCorrupt(format!(
                "block out of range: block={block} block_count={count}"
            ))
        })
    }

    /// First free block strictly after `after`, or from block 0 when `after` is `None`.
    #[must_use]
    pub fn find_free_block(&self, after: Option<BlockIndex>) -> Option<BlockIndex> {
        let start = after.map_or(0, |b| b.to_usize() + 1);
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, entry)| entry.is_free())
            .and_then(|(idx, _)| u32::try_from(idx).ok().map(BlockIndex))
    }

    /// `FAT[prev] = next`. The caller has just allocated `prev`.
    pub fn link_chain(&mut self, prev: BlockIndex, next: BlockIndex) -> Result<()> {
        if next.to_usize() >= self.entries.len() {
            return Err(FatError::ImageCorrupt(format!(
                "link target out of range: block={next} block_count={}",
                self.entries.len()
            )));
        }
        *self.slot_mut(prev)? = FatEntry::Next(next);
        Ok(())
    }

    /// `FAT[tail] = END`.
    pub fn terminate_chain(&mut self, tail: BlockIndex) -> Result<()> {
        *self.slot_mut(tail)? = FatEntry::End;
        Ok(())
    }

    /// Blocks of the chain starting at `head`, in order.
    ///
    /// A chain that leaves the table, reaches a free block, or is longer than
    /// the table (a cycle) is reported as corruption.
    pub fn chain(&self, head: BlockIndex) -> Result<Vec<BlockIndex>> {
        let mut out = Vec::new();
        let mut cur = head;
        loop {
            let Some(entry) = self.get(cur) else {
                return Err(FatError::ImageCorrupt(format!(
                    "chain from block {head} leaves the table at block {cur}"
                )));
            };
            out.push(cur);
            if out.len() > self.entries.len() {
                return Err(FatError::ImageCorrupt(format!(
                    "chain from block {head} does not terminate"
                )));
            }
            match entry {
                FatEntry::End => return Ok(out),
                FatEntry::Next(next) => cur = next,
                FatEntry::Free => {
                    return Err(FatError::ImageCorrupt(format!(
                        "chain from block {head} reaches free block {cur}"
                    )));
                }
            }
        }
    }

    /// Return every block of the chain at `head` to the free pool.
    ///
    /// `None` is an empty chain and a no-op. The chain is validated before any
    /// entry changes, so a malformed chain leaves the table untouched.
    pub fn free_chain(&mut self, head: Option<BlockIndex>) -> Result<usize> {
        let Some(head) = head else {
            return Ok(0);
        };
        let blocks = self.chain(head)?;
        for block in &blocks {
            *self.slot_mut(*block)? = FatEntry::Free;
        }
        trace!(head = head.0, freed = blocks.len(), "freed chain");
        Ok(blocks.len())
    }

    /// Number of free blocks (full scan).
    #[must_use]
    pub fn count_free(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_free()).count() as u64
    }

    /// Check that every link points inside the table.
    pub fn validate_links(&self) -> Result<()> {
        for (idx, entry) in self.entries.iter().enumerate() {
            if let FatEntry::Next(next) = entry {
                if next.to_usize() >= self.entries.len() {
                    return Err(FatError::ImageCorrupt(format!(
                        "FAT entry {idx} links to block {next} beyond block_count={}",
                        self.entries.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(raw: &[i32]) -> AllocationTable {
        AllocationTable::from_entries(
            raw.iter()
                .map(|v| FatEntry::from_raw(*v).expect("entry"))
                .collect(),
        )
    }

    #[test]
    fn required_blocks_rounds_up_with_empty_minimum() {
        assert_eq!(required_blocks(0), 1);
        assert_eq!(required_blocks(1), 1);
        assert_eq!(required_blocks(2047), 1);
        assert_eq!(required_blocks(2048), 1);
        assert_eq!(required_blocks(2049), 2);
        assert_eq!(required_blocks(5 * 2048), 5);
    }

    #[test]
    fn tail_len_fills_exact_multiples() {
        assert_eq!(tail_len(0), 0);
        assert_eq!(tail_len(1), 1);
        assert_eq!(tail_len(2047), 2047);
        assert_eq!(tail_len(2048), 2048);
        assert_eq!(tail_len(2049), 1);
        assert_eq!(tail_len(3 * 2048), 2048);
    }

    #[test]
    fn find_free_is_lowest_index_first() {
        let fat = table(&[-1, -2, 5, -2, -1, -1, -2]);
        assert_eq!(fat.find_free_block(None), Some(BlockIndex(1)));
        assert_eq!(fat.find_free_block(Some(BlockIndex(0))), Some(BlockIndex(1)));
        // Strictly after.
        assert_eq!(fat.find_free_block(Some(BlockIndex(1))), Some(BlockIndex(3)));
        assert_eq!(fat.find_free_block(Some(BlockIndex(3))), Some(BlockIndex(6)));
        assert_eq!(fat.find_free_block(Some(BlockIndex(6))), None);
        assert_eq!(fat.find_free_block(Some(BlockIndex(100))), None);
    }

    #[test]
    fn build_and_walk_chain() {
        let mut fat = AllocationTable::new_free(6);
        let a = fat.find_free_block(None).unwrap();
        // Nothing is marked until linked or terminated, so scan after `a`.
        let b = fat.find_free_block(Some(a)).unwrap();
        let c = fat.find_free_block(Some(b)).unwrap();
        fat.link_chain(a, b).unwrap();
        fat.link_chain(b, c).unwrap();
        fat.terminate_chain(c).unwrap();

        assert_eq!(fat.chain(a).unwrap(), vec![BlockIndex(0), BlockIndex(1), BlockIndex(2)]);
        assert_eq!(fat.count_free(), 3);
        assert_eq!(fat.get(BlockIndex(2)), Some(FatEntry::End));
    }

    #[test]
    fn free_chain_releases_every_block() {
        let mut fat = table(&[2, -2, 4, -1, -1, -2]);
        assert_eq!(fat.count_free(), 2);
        assert_eq!(fat.free_chain(Some(BlockIndex(0))).unwrap(), 3);
        assert_eq!(fat.count_free(), 5);
        assert_eq!(fat.get(BlockIndex(3)), Some(FatEntry::End));
    }

    #[test]
    fn free_chain_none_is_noop() {
        let mut fat = table(&[-1, -2]);
        assert_eq!(fat.free_chain(None).unwrap(), 0);
        assert_eq!(fat, table(&[-1, -2]));
    }

    #[test]
    fn malformed_chains_are_corruption_and_leave_table_untouched() {
        // 0 -> 1 -> 0 cycle.
        let mut cyclic = table(&[1, 0, -2]);
        assert!(matches!(
            cyclic.free_chain(Some(BlockIndex(0))),
            Err(FatError::ImageCorrupt(_))
        ));
        assert_eq!(cyclic, table(&[1, 0, -2]));

        // 0 -> 1 where 1 is free.
        let dangling = table(&[1, -2]);
        assert!(dangling.chain(BlockIndex(0)).is_err());

        // 0 -> 9, out of range.
        let escaping = table(&[9, -2]);
        assert!(escaping.chain(BlockIndex(0)).is_err());
        assert!(escaping.validate_links().is_err());
        assert!(table(&[1, -1]).validate_links().is_ok());
    }

    #[test]
    fn out_of_range_mutations_fail() {
        let mut fat = AllocationTable::new_free(2);
        assert!(fat.link_chain(BlockIndex(0), BlockIndex(2)).is_err());
        assert!(fat.link_chain(BlockIndex(5), BlockIndex(0)).is_err());
        assert!(fat.terminate_chain(BlockIndex(2)).is_err());
        assert_eq!(fat.count_free(), 2);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn allocate(fat: &mut AllocationTable, len: usize) -> Option<BlockIndex> {
            let mut prev: Option<BlockIndex> = None;
            let mut head = None;
            for _ in 0..len {
                let next = fat.find_free_block(prev)?;
                match prev {
                    Some(p) => fat.link_chain(p, next).ok()?,
                    None => head = Some(next),
                }
                prev = Some(next);
            }
            fat.terminate_chain(prev?).ok()?;
            head
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn chains_stay_disjoint_and_accounted(
                ops in proptest::collection::vec((1_usize..6, any::<bool>()), 1..40),
            ) {
                let total = 48_u32;
                let mut fat = AllocationTable::new_free(total);
                let mut live: Vec<(BlockIndex, usize)> = Vec::new();

                for (len, free_oldest) in ops {
                    if free_oldest && !live.is_empty() {
                        let (head, len) = live.remove(0);
                        prop_assert_eq!(fat.free_chain(Some(head)).unwrap(), len);
                    } else if fat.count_free() >= len as u64 {
                        let head = allocate(&mut fat, len).expect("space was checked");
                        live.push((head, len));
                    }

                    let used: usize = live.iter().map(|(_, len)| len).sum();
                    prop_assert_eq!(fat.count_free(), u64::from(total) - used as u64);

                    let mut seen = BTreeSet::new();
                    for (head, len) in &live {
                        let blocks = fat.chain(*head).unwrap();
                        prop_assert_eq!(blocks.len(), *len);
                        for block in blocks {
                            prop_assert!(seen.insert(block), "block {} shared", block);
                        }
                    }
                }
            }
        }
    }
}
