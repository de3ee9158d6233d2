//! Diagnostic snapshot of the in-memory tables.

use fatimg_alloc::AllocationTable;
use fatimg_inode::InodeTable;
use serde::Serialize;
use std::fmt;

/// One inode slot, occupied or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeDump {
    pub id: u32,
    pub name: String,
    pub file_size: u32,
    /// `None` for an unoccupied slot.
    pub head: Option<u32>,
}

/// Block sequence of one occupied file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDump {
    pub name: String,
    pub blocks: Vec<u32>,
    /// Set when the walk stopped on a malformed chain; `blocks` then holds
    /// the prefix that was reachable.
    pub error: Option<String>,
}

/// Full dump: every slot, every file chain, the raw FAT and the free count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpReport {
    pub block_count: u32,
    pub inodes: Vec<InodeDump>,
    pub chains: Vec<ChainDump>,
    /// Raw on-disk FAT values (`-1` END, `-2` FREE).
    pub fat: Vec<i32>,
    pub free_blocks: u64,
}

impl DumpReport {
    pub(crate) fn collect(inodes: &InodeTable, fat: &AllocationTable) -> Self {
        let inode_dumps = inodes
            .records()
            .iter()
            .zip(0_u32..)
            .map(|(rec, id)| InodeDump {
                id,
                name: rec.name_lossy(),
                file_size: rec.file_size,
                head: rec.head.map(|b| b.0),
            })
            .collect();

        let chains = inodes
            .occupied()
            .filter_map(|(_, rec)| rec.head.map(|head| (rec, head)))
            .map(|(rec, head)| match fat.chain(head) {
                Ok(blocks) => ChainDump {
                    name: rec.name_lossy(),
                    blocks: blocks.into_iter().map(|b| b.0).collect(),
                    error: None,
                },
                Err(err) => ChainDump {
                    name: rec.name_lossy(),
                    blocks: reachable_prefix(fat, head),
                    error: Some(err.to_string()),
                },
            })
            .collect();

        let raw_fat = fat
            .entries()
            .iter()
            .map(|entry| entry.to_raw().unwrap_or(i32::MIN))
            .collect();

        Self {
            block_count: u32::try_from(fat.block_count()).unwrap_or(u32::MAX),
            inodes: inode_dumps,
            chains,
            fat: raw_fat,
            free_blocks: fat.count_free(),
        }
    }
}

/// Blocks visited before a malformed chain stops, bounded by the table size.
pub(crate) fn reachable_prefix(fat: &AllocationTable, head: fatimg_types::BlockIndex) -> Vec<u32> {
    use fatimg_types::FatEntry;

    let mut out = Vec::new();
    let mut cur = head;
    while out.len() < fat.block_count() {
        let Some(entry) = fat.get(cur) else { break };
        out.push(cur.0);
        match entry {
            FatEntry::Next(next) => cur = next,
            FatEntry::End | FatEntry::Free => break,
        }
    }
    out
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "I - nodes list:")?;
        for inode in &self.inodes {
            writeln!(f, "Id: {}", inode.id)?;
            writeln!(f, "Name: {}", inode.name)?;
            writeln!(f, "File size: {}", inode.file_size)?;
            match inode.head {
                Some(head) => writeln!(f, "First data block: {head}")?,
                None => writeln!(f, "First data block: -1")?,
            }
            writeln!(f)?;
        }

        writeln!(f, "Files occupy blocks:")?;
        for chain in &self.chains {
            write!(f, "{}\t", chain.name)?;
            for block in &chain.blocks {
                write!(f, "{block}, ")?;
            }
            if let Some(err) = &chain.error {
                write!(f, "[{err}]")?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "FAT table:")?;
        for value in &self.fat {
            write!(f, "{value}, ")?;
        }
        writeln!(f)?;
        writeln!(f, "Free blocks count: {}", self.free_blocks)
    }
}
