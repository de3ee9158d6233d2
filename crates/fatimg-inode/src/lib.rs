#![forbid(unsafe_code)]
//! Inode management.
//!
//! The inode table is a fixed array with one slot per data block. A slot is
//! occupied while it has a head block; occupied names are unique. Lookups
//! and free-slot discovery are linear scans in slot order.

use fatimg_error::{FatError, Result};
use fatimg_ondisk::InodeRecord;
use fatimg_types::{BlockIndex, InodeSlot, MAX_NAME_LEN};

/// Validate a file name and pack it into the zero-padded on-disk field.
pub fn encode_name(name: &str) -> Result<[u8; MAX_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.contains(&0) {
        return Err(FatError::InvalidName(name.to_owned()));
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(FatError::NameTooLong {
            len: bytes.len(),
            max: MAX_NAME_LEN,
        });
    }
    let mut out = [0_u8; MAX_NAME_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// In-memory inode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeTable {
    slots: Vec<InodeRecord>,
}

impl InodeTable {
    /// Table of `count` unoccupied slots.
    #[must_use]
    pub fn new_empty(count: u32) -> Self {
        Self {
            slots: vec![InodeRecord::EMPTY; count as usize],
        }
    }

    #[must_use]
    pub fn from_records(slots: Vec<InodeRecord>) -> Self {
        Self { slots }
    }

    #[must_use]
    pub fn records(&self) -> &[InodeRecord] {
        &self.slots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, slot: InodeSlot) -> Option<&InodeRecord> {
        self.slots.get(slot.to_usize())
    }

    /// Occupied slots in table order.
    pub fn occupied(&self) -> impl Iterator<Item = (InodeSlot, &InodeRecord)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, rec)| rec.is_occupied())
            .filter_map(|(idx, rec)| u32::try_from(idx).ok().map(|i| (InodeSlot(i), rec)))
    }

    /// Occupied slot whose name equals `name` (compared over the full name field).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<InodeSlot> {
        let wanted = name.as_bytes();
        if wanted.len() > MAX_NAME_LEN {
            return None;
        }
        self.occupied()
            .find(|(_, rec)| rec.name_bytes() == wanted)
            .map(|(slot, _)| slot)
    }

    /// First unoccupied slot.
    #[must_use]
    pub fn find_free_slot(&self) -> Option<InodeSlot> {
        self.slots
            .iter()
            .position(|rec| !rec.is_occupied())
            .and_then(|idx| u32::try_from(idx).ok().map(InodeSlot))
    }

    fn slot_mut(&mut self, slot: InodeSlot) -> Result<&mut InodeRecord> {
        let count = self.slots.len();
        self.slots.get_mut(slot.to_usize()).ok_or_else(|| {
            FatError::ImageCorrupt(format!(
                "inode slot out of range: slot={slot} slot_count={count}"
            ))
        })
    }

    /// Claim `slot` for a file.
    pub fn occupy(
        &mut self,
        slot: InodeSlot,
        name: [u8; MAX_NAME_LEN],
        file_size: u32,
        head: BlockIndex,
    ) -> Result<()> {
        *self.slot_mut(slot)? = InodeRecord {
            name,
            file_size,
            head: Some(head),
        };
        Ok(())
    }

    /// Return `slot` to the free pool, zeroing name and size.
    pub fn release(&mut self, slot: InodeSlot) -> Result<InodeRecord> {
        let rec = self.slot_mut(slot)?;
        Ok(std::mem::replace(rec, InodeRecord::EMPTY))
    }
}
