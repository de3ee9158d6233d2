//! Offline consistency check over the inode table and FAT.
//!
//! Checks performed:
//! - every occupied inode's chain stays in range, never reaches a free block
//!   and terminates;
//! - no block belongs to two files;
//! - every non-free block is reachable from some file;
//! - chain length agrees with the recorded file size;
//! - occupied names are unique.

use crate::dump::reachable_prefix;
use fatimg_alloc::{AllocationTable, required_blocks};
use fatimg_inode::InodeTable;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckIssue {
    BrokenChain { name: String, reason: String },
    SharedBlock { block: u32, owners: Vec<String> },
    OrphanBlock { block: u32, raw_entry: i32 },
    SizeMismatch {
        name: String,
        file_size: u32,
        chain_blocks: usize,
        expected_blocks: u64,
    },
    DuplicateName { name: String },
}

impl fmt::Display for CheckIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenChain { name, reason } => write!(f, "broken chain in {name:?}: {reason}"),
            Self::SharedBlock { block, owners } => {
                write!(f, "block {block} shared by {}", owners.join(", "))
            }
            Self::OrphanBlock { block, raw_entry } => {
                write!(f, "block {block} allocated ({raw_entry}) but owned by no file")
            }
            Self::SizeMismatch {
                name,
                file_size,
                chain_blocks,
                expected_blocks,
            } => write!(
                f,
                "{name:?} is {file_size} bytes ({expected_blocks} blocks) but its chain has {chain_blocks}"
            ),
            Self::DuplicateName { name } => write!(f, "name {name:?} used by more than one inode"),
        }
    }
}

/// Result of [`crate::FatFs::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub files_checked: usize,
    pub blocks_in_use: u64,
    pub issues: Vec<CheckIssue>,
}

impl CheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub(crate) fn collect(inodes: &InodeTable, fat: &AllocationTable) -> Self {
        let mut issues = Vec::new();
        let mut owners: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        let mut names: BTreeSet<String> = BTreeSet::new();
        let mut files_checked = 0;

        for (_, rec) in inodes.occupied() {
            files_checked += 1;
            let name = rec.name_lossy();
            if !names.insert(name.clone()) {
                issues.push(CheckIssue::DuplicateName { name: name.clone() });
            }
            let Some(head) = rec.head else { continue };

            let blocks: BTreeSet<u32> = match fat.chain(head) {
                Ok(chain) => {
                    let expected_blocks = required_blocks(u64::from(rec.file_size));
                    if chain.len() as u64 != expected_blocks {
                        issues.push(CheckIssue::SizeMismatch {
                            name: name.clone(),
                            file_size: rec.file_size,
                            chain_blocks: chain.len(),
                            expected_blocks,
                        });
                    }
                    chain.into_iter().map(|b| b.0).collect()
                }
                Err(err) => {
                    issues.push(CheckIssue::BrokenChain {
                        name: name.clone(),
                        reason: err.to_string(),
                    });
                    reachable_prefix(fat, head).into_iter().collect()
                }
            };
            for block in blocks {
                owners.entry(block).or_default().push(name.clone());
            }
        }

        for (block, names) in &owners {
            if names.len() > 1 {
                issues.push(CheckIssue::SharedBlock {
                    block: *block,
                    owners: names.clone(),
                });
            }
        }

        for (idx, entry) in fat.entries().iter().enumerate() {
            let Ok(block) = u32::try_from(idx) else { break };
            if !entry.is_free() && !owners.contains_key(&block) {
                issues.push(CheckIssue::OrphanBlock {
                    block,
                    raw_entry: entry.to_raw().unwrap_or(i32::MIN),
                });
            }
        }

        Self {
            files_checked,
            blocks_in_use: fat.block_count() as u64 - fat.count_free(),
            issues,
        }
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "files: {}  blocks in use: {}",
            self.files_checked, self.blocks_in_use
        )?;
        if self.is_clean() {
            return writeln!(f, "clean");
        }
        for issue in &self.issues {
            writeln!(f, "- {issue}")?;
        }
        writeln!(f, "{} issue(s)", self.issues.len())
    }
}
