#![forbid(unsafe_code)]
//! fatimg filesystem façade.
//!
//! [`FatFs`] composes the block store, the File Allocation Table and the
//! inode table into the user-facing operations: create, mount, unmount,
//! copy-in, copy-out, delete, list, dump and check.
//!
//! # Persistence model
//!
//! Mount reads the inode table and FAT into memory. Every mutation changes
//! only that mirror, except file payload, which goes straight to the data
//! region. [`FatFs::unmount`] writes both tables back; it is the only point
//! where metadata reaches the image. Dropping a handle without unmounting
//! discards metadata changes.
//!
//! Exactly one handle may be open on an image at a time. Opening the same
//! image twice is unsupported and not detected.
//!
//! # Opening a filesystem
//!
//! ```no_run
//! use fatimg_core::FatFs;
//!
//! FatFs::create("disk.img", 1 << 20)?;
//! let mut fs = FatFs::mount("disk.img")?;
//! fs.copy_in(&b"hello"[..], 5, "greeting")?;
//! assert_eq!(fs.list_files(), ["greeting"]);
//! fs.unmount()?;
//! # Ok::<(), fatimg_error::FatError>(())
//! ```

mod check;
mod dump;

pub use check::{CheckIssue, CheckReport};
pub use dump::{ChainDump, DumpReport, InodeDump};
pub use fatimg_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use fatimg_error::{FatError, Result};
pub use fatimg_ondisk::{Layout, Superblock};
pub use fatimg_types::{BLOCK_SIZE, BlockIndex, FatEntry, InodeSlot, MAX_NAME_LEN};

use fatimg_alloc::{AllocationTable, required_blocks, tail_len};
use fatimg_block::BlockStore;
use fatimg_inode::{InodeTable, encode_name};
use fatimg_ondisk::{encode_fat_table, encode_inode_table, parse_fat_table, parse_inode_table};
use fatimg_types::{ParseError, SUPERBLOCK_SIZE, u64_to_usize};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Options controlling how an image is mounted.
///
/// By default, mount-time validation is enabled. Disable it only for
/// diagnostic workflows (such as dumping a damaged image) where reading
/// inconsistent tables is intentional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Skip structural validation of the inode table and FAT (link and head
    /// ranges). Records that cannot be decoded at all still fail the mount.
    pub skip_validation: bool,
}

/// Convert a header decode failure into the user-facing error.
fn parse_error_to_fat(e: &ParseError) -> FatError {
    FatError::ImageCorrupt(e.to_string())
}

/// Convert a geometry failure for a new image into the user-facing error.
fn geometry_error(e: &ParseError) -> FatError {
    FatError::InvalidGeometry(e.to_string())
}

/// A mounted image.
#[derive(Debug)]
pub struct FatFs<D: ByteDevice> {
    superblock: Superblock,
    layout: Layout,
    store: BlockStore<D>,
    inodes: InodeTable,
    fat: AllocationTable,
}

impl FatFs<FileByteDevice> {
    /// Create a new image of exactly `size_bytes` at `path`, formatted and
    /// flushed. The image is left unmounted.
    pub fn create(path: impl AsRef<Path>, size_bytes: u64) -> Result<()> {
        let path = path.as_ref();
        // Reject impossible sizes before touching the host filesystem.
        Layout::for_image_size(size_bytes).map_err(|e| geometry_error(&e))?;
        let dev = FileByteDevice::create(path, size_bytes)?;
        Self::format(dev)?.unmount()?;
        info!(path = %path.display(), size_bytes, "created image");
        Ok(())
    }

    /// Mount the image at `path` with default options (validation enabled).
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        Self::mount_with_options(path, &OpenOptions::default())
    }

    pub fn mount_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(dev, options)
    }

    /// Remove the image file at `path`.
    pub fn destroy_image(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_file(path).map_err(|source| FatError::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "deleted image");
        Ok(())
    }

    /// Copy a host file into the image as `dest_name`.
    pub fn copy_in_from_path(
        &mut self,
        source: impl AsRef<Path>,
        dest_name: &str,
    ) -> Result<InodeSlot> {
        let source = source.as_ref();
        let host_err = |source_err| FatError::HostFile {
            path: source.to_path_buf(),
            source: source_err,
        };
        let file = File::open(source).map_err(host_err)?;
        let len = file.metadata().map_err(host_err)?.len();
        self.copy_in(BufReader::new(file), len, dest_name)
    }

    /// Copy `source_name` out of the image into a host file at `dest`.
    ///
    /// The destination is created only once the source name is known to exist.
    pub fn copy_out_to_path(&self, source_name: &str, dest: impl AsRef<Path>) -> Result<u64> {
        let dest = dest.as_ref();
        if self.inodes.find_by_name(source_name).is_none() {
            return Err(FatError::NotFound(source_name.to_owned()));
        }
        let file = File::create(dest).map_err(|source| FatError::HostFile {
            path: dest.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        let written = self.copy_out(source_name, &mut writer)?;
        writer.flush()?;
        Ok(written)
    }
}

impl<D: ByteDevice> FatFs<D> {
    /// Format `dev` as an empty filesystem sized by the device length.
    ///
    /// Writes the superblock immediately; the empty tables are written by
    /// [`FatFs::unmount`]. Any previous contents of the header are replaced.
    pub fn format(dev: D) -> Result<Self> {
        let size_bytes = dev.len_bytes();
        let layout = Layout::for_image_size(size_bytes).map_err(|e| geometry_error(&e))?;
        let block_count = layout.block_count();
        let superblock = Superblock {
            image_size_bytes: size_bytes,
            free_block_count_hint: u64::from(block_count),
            total_block_count: u64::from(block_count),
        };
        let store = BlockStore::new(dev, layout.data_region_offset(), block_count);
        store.write_header(0, &superblock.to_bytes())?;
        debug!(size_bytes, block_count, "formatted image");

        Ok(Self {
            superblock,
            layout,
            store,
            inodes: InodeTable::new_empty(block_count),
            fat: AllocationTable::new_free(block_count),
        })
    }

    /// Mount a filesystem from an already-opened device.
    pub fn from_device(dev: D, options: &OpenOptions) -> Result<Self> {
        let len = dev.len_bytes();
        if len < SUPERBLOCK_SIZE as u64 {
            return Err(FatError::ImageCorrupt(format!(
                "image is {len} bytes, smaller than the {SUPERBLOCK_SIZE}-byte superblock"
            )));
        }

        let mut raw_sb = [0_u8; SUPERBLOCK_SIZE];
        dev.read_exact_at(0, &mut raw_sb)?;
        let superblock = Superblock::parse_from_bytes(&raw_sb).map_err(|e| parse_error_to_fat(&e))?;

        let block_count = u32::try_from(superblock.total_block_count)
            .ok()
            .filter(|count| *count <= fatimg_ondisk::layout::MAX_BLOCK_COUNT)
            .ok_or_else(|| {
                FatError::ImageCorrupt(format!(
                    "block count {} exceeds the FAT entry range",
                    superblock.total_block_count
                ))
            })?;
        let layout = Layout::new(block_count);
        if layout.data_region_end() > len {
            return Err(FatError::ImageCorrupt(format!(
                "superblock claims {block_count} blocks ending at byte {} but the image is {len} bytes",
                layout.data_region_end()
            )));
        }
        let count = block_count as usize;

        let mut raw_inodes = vec![
            0_u8;
            u64_to_usize(layout.inode_table_len(), "inode_table_len")
                .map_err(|e| parse_error_to_fat(&e))?
        ];
        dev.read_exact_at(layout.inode_table_offset(), &mut raw_inodes)?;
        let inodes = parse_inode_table(&raw_inodes, count).map_err(|e| parse_error_to_fat(&e))?;

        let mut raw_fat = vec![
            0_u8;
            u64_to_usize(layout.fat_table_len(), "fat_table_len")
                .map_err(|e| parse_error_to_fat(&e))?
        ];
        dev.read_exact_at(layout.fat_table_offset(), &mut raw_fat)?;
        let fat = parse_fat_table(&raw_fat, count).map_err(|e| parse_error_to_fat(&e))?;

        let inodes = InodeTable::from_records(inodes);
        let fat = AllocationTable::from_entries(fat);

        if options.skip_validation {
            warn!(block_count, "mounting without table validation");
        } else {
            fat.validate_links()?;
            if let Some((slot, rec)) = inodes
                .occupied()
                .find(|(_, rec)| rec.head.is_some_and(|head| head.0 >= block_count))
            {
                return Err(FatError::ImageCorrupt(format!(
                    "inode {slot} ({:?}) head block {:?} beyond block_count={block_count}",
                    rec.name_lossy(),
                    rec.head
                )));
            }
        }

        info!(
            block_count,
            image_size = superblock.image_size_bytes,
            free_blocks = fat.count_free(),
            "mounted image"
        );

        Ok(Self {
            superblock,
            layout,
            store: BlockStore::new(dev, layout.data_region_offset(), block_count),
            inodes,
            fat,
        })
    }

    /// Flush the inode table and FAT to the image and release the handle.
    ///
    /// Returns the underlying device.
    pub fn unmount(self) -> Result<D> {
        let mut header = encode_inode_table(self.inodes.records()).map_err(|e| parse_error_to_fat(&e))?;
        header.extend(encode_fat_table(self.fat.entries()).map_err(|e| parse_error_to_fat(&e))?);
        self.store
            .write_header(self.layout.inode_table_offset(), &header)?;
        self.store.sync()?;
        info!(
            block_count = self.layout.block_count(),
            free_blocks = self.fat.count_free(),
            "unmounted image"
        );
        Ok(self.store.into_inner())
    }

    /// Copy `source_len` bytes from `source` into a new file named `dest_name`.
    ///
    /// Every rejection (bad name, name collision, not enough free blocks, no
    /// free inode) happens before any table changes. A read or write failure
    /// inside the block loop leaves the already-linked blocks allocated but
    /// owned by no inode; [`FatFs::check`] reports them as orphans.
    pub fn copy_in<R: Read>(
        &mut self,
        mut source: R,
        source_len: u64,
        dest_name: &str,
    ) -> Result<InodeSlot> {
        let name = encode_name(dest_name)?;
        if self.inodes.find_by_name(dest_name).is_some() {
            debug!(name = dest_name, "copy-in rejected: name exists");
            return Err(FatError::NameCollision(dest_name.to_owned()));
        }

        let required = required_blocks(source_len);
        let available = self.fat.count_free();
        if available < required {
            debug!(name = dest_name, required, available, "copy-in rejected: no space");
            return Err(FatError::InsufficientSpace {
                required,
                available,
            });
        }
        let file_size = u32::try_from(source_len).map_err(|_| {
            FatError::InvalidGeometry(format!(
                "file of {source_len} bytes exceeds the 32-bit size field"
            ))
        })?;
        let slot = self.inodes.find_free_slot().ok_or(FatError::InodeTableFull)?;

        let mut head: Option<BlockIndex> = None;
        let mut prev: Option<BlockIndex> = None;
        let mut remaining = source_len;
        let mut buf = vec![0_u8; BLOCK_SIZE];
        loop {
            let block = self.fat.find_free_block(prev).ok_or_else(|| {
                FatError::ImageCorrupt("free block count disagrees with FAT scan".to_owned())
            })?;
            self.fat.terminate_chain(block)?;
            match prev {
                Some(prev) => self.fat.link_chain(prev, block)?,
                None => head = Some(block),
            }
            prev = Some(block);

            let chunk = usize::try_from(remaining).map_or(BLOCK_SIZE, |r| r.min(BLOCK_SIZE));
            if chunk > 0 {
                source.read_exact(&mut buf[..chunk])?;
                self.store.write_block(block, &buf[..chunk])?;
            }
            remaining -= chunk as u64;
            if remaining == 0 {
                break;
            }
        }

        let head = head.ok_or_else(|| FatError::ImageCorrupt("empty chain".to_owned()))?;
        self.inodes.occupy(slot, name, file_size, head)?;
        debug!(
            name = dest_name,
            slot = slot.0,
            head = head.0,
            size = source_len,
            blocks = required,
            "copied file in"
        );
        Ok(slot)
    }

    /// Write the contents of `source_name` to `dest`, returning the byte count.
    pub fn copy_out<W: Write>(&self, source_name: &str, mut dest: W) -> Result<u64> {
        let slot = self
            .inodes
            .find_by_name(source_name)
            .ok_or_else(|| FatError::NotFound(source_name.to_owned()))?;
        let rec = self
            .inodes
            .get(slot)
            .ok_or_else(|| FatError::NotFound(source_name.to_owned()))?;
        let head = rec
            .head
            .ok_or_else(|| FatError::NotFound(source_name.to_owned()))?;

        let file_size = u64::from(rec.file_size);
        let blocks = self.fat.chain(head)?;
        if blocks.len() as u64 != required_blocks(file_size) {
            return Err(FatError::ImageCorrupt(format!(
                "file {source_name:?} of {file_size} bytes has a {}-block chain",
                blocks.len()
            )));
        }

        let mut written = 0_u64;
        let last = blocks.len() - 1;
        for (pos, block) in blocks.iter().enumerate() {
            let len = if pos == last {
                tail_len(file_size)
            } else {
                BLOCK_SIZE
            };
            let data = self.store.read_block_prefix(*block, len)?;
            dest.write_all(data.as_slice())?;
            written += len as u64;
        }
        debug!(name = source_name, bytes = written, blocks = blocks.len(), "copied file out");
        Ok(written)
    }

    /// Remove `name` and free its blocks. Returns `false` when no such file exists.
    pub fn delete_file(&mut self, name: &str) -> Result<bool> {
        let Some(slot) = self.inodes.find_by_name(name) else {
            debug!(name, "delete: no such file");
            return Ok(false);
        };
        let head = self.inodes.get(slot).and_then(|rec| rec.head);
        let freed = self.fat.free_chain(head)?;
        self.inodes.release(slot)?;
        debug!(name, slot = slot.0, freed, "deleted file");
        Ok(true)
    }

    /// Names of all files, in inode-table order.
    #[must_use]
    pub fn list_files(&self) -> Vec<String> {
        self.inodes
            .occupied()
            .map(|(_, rec)| rec.name_lossy())
            .collect()
    }

    /// Size in bytes of `name`, if present.
    #[must_use]
    pub fn file_size(&self, name: &str) -> Option<u64> {
        self.inodes
            .find_by_name(name)
            .and_then(|slot| self.inodes.get(slot))
            .map(|rec| u64::from(rec.file_size))
    }

    /// Free blocks, recounted from the FAT.
    #[must_use]
    pub fn free_block_count(&self) -> u64 {
        self.fat.count_free()
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.layout.block_count()
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn inode_table(&self) -> &InodeTable {
        &self.inodes
    }

    #[must_use]
    pub fn allocation_table(&self) -> &AllocationTable {
        &self.fat
    }

    #[must_use]
    pub fn device(&self) -> &D {
        self.store.inner()
    }

    /// Diagnostic snapshot of every inode slot, every chain and the raw FAT.
    #[must_use]
    pub fn dump(&self) -> DumpReport {
        DumpReport::collect(&self.inodes, &self.fat)
    }

    /// Verify chain integrity, disjointness and inode/chain agreement.
    #[must_use]
    pub fn check(&self) -> CheckReport {
        CheckReport::collect(&self.inodes, &self.fat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatimg_ondisk::InodeRecord;

    /// Image with `blocks` data blocks.
    fn image_len(blocks: u64) -> usize {
        usize::try_from(SUPERBLOCK_SIZE as u64 + blocks * fatimg_ondisk::layout::PER_BLOCK_COST)
            .unwrap()
    }

    fn fresh(blocks: u64) -> FatFs<MemByteDevice> {
        FatFs::format(MemByteDevice::new(image_len(blocks))).expect("format")
    }

    fn remount(fs: FatFs<MemByteDevice>) -> FatFs<MemByteDevice> {
        let dev = fs.unmount().expect("unmount");
        FatFs::from_device(dev, &OpenOptions::default()).expect("mount")
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn read_back(fs: &FatFs<MemByteDevice>, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        fs.copy_out(name, &mut out).expect("copy out");
        out
    }

    #[test]
    fn format_then_mount_is_empty() {
        let fs = remount(fresh(8));
        assert_eq!(fs.block_count(), 8);
        assert_eq!(fs.free_block_count(), 8);
        assert!(fs.list_files().is_empty());
        assert_eq!(fs.superblock().free_block_count_hint, 8);
        assert_eq!(fs.superblock().total_block_count, 8);
        assert_eq!(
            fs.superblock().image_size_bytes,
            image_len(8) as u64
        );
    }

    #[test]
    fn format_rejects_tiny_device() {
        let err = FatFs::format(MemByteDevice::new(image_len(1) - 1)).unwrap_err();
        assert!(matches!(err, FatError::InvalidGeometry(_)), "{err:?}");
    }

    #[test]
    fn round_trip_boundary_sizes() {
        let mut fs = fresh(16);
        let sizes = [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 3 * BLOCK_SIZE + 17];
        for (i, size) in sizes.iter().enumerate() {
            let data = pattern(*size);
            fs.copy_in(data.as_slice(), data.len() as u64, &format!("f{i}"))
                .expect("copy in");
        }
        let fs = remount(fs);
        for (i, size) in sizes.iter().enumerate() {
            assert_eq!(read_back(&fs, &format!("f{i}")), pattern(*size), "size {size}");
        }
    }

    #[test]
    fn exact_multiple_reads_full_last_block() {
        let mut fs = fresh(4);
        let data = vec![0xAB_u8; 2 * BLOCK_SIZE];
        fs.copy_in(data.as_slice(), data.len() as u64, "even").unwrap();
        let out = read_back(&fs, "even");
        assert_eq!(out.len(), 2 * BLOCK_SIZE);
        assert_eq!(out, data);
    }

    #[test]
    fn free_count_tracks_copy_and_delete() {
        let mut fs = fresh(10);
        let before = fs.free_block_count();
        let data = pattern(2 * BLOCK_SIZE + 1);
        fs.copy_in(data.as_slice(), data.len() as u64, "three").unwrap();
        assert_eq!(fs.free_block_count(), before - 3);
        assert!(fs.delete_file("three").unwrap());
        assert_eq!(fs.free_block_count(), before);
    }

    #[test]
    fn empty_file_consumes_one_block() {
        let mut fs = fresh(3);
        fs.copy_in(std::io::empty(), 0, "empty").unwrap();
        assert_eq!(fs.free_block_count(), 2);
        assert_eq!(fs.file_size("empty"), Some(0));
        let head = fs.inode_table().records()[0].head.unwrap();
        assert_eq!(fs.allocation_table().get(head), Some(FatEntry::End));
        assert!(read_back(&fs, "empty").is_empty());
    }

    #[test]
    fn allocation_is_lowest_index_first() {
        let mut fs = fresh(6);
        fs.copy_in(&[1_u8; 10][..], 10, "a").unwrap();
        fs.copy_in(&[2_u8; 10][..], 10, "b").unwrap();
        fs.delete_file("a").unwrap();
        // Block 0 is free again; a two-block file takes 0 then the next free, 2.
        let data = pattern(BLOCK_SIZE + 1);
        fs.copy_in(data.as_slice(), data.len() as u64, "c").unwrap();

        let slot = fs.inode_table().find_by_name("c").unwrap();
        let head = fs.inode_table().get(slot).unwrap().head.unwrap();
        assert_eq!(
            fs.allocation_table().chain(head).unwrap(),
            vec![BlockIndex(0), BlockIndex(2)]
        );
        // Slot 0 was released by the delete and is reused.
        assert_eq!(slot, InodeSlot(0));
    }

    #[test]
    fn name_collision_changes_nothing() {
        let mut fs = fresh(4);
        fs.copy_in(&b"one"[..], 3, "dup").unwrap();
        let inodes = fs.inode_table().clone();
        let fat = fs.allocation_table().clone();

        let err = fs.copy_in(&b"two"[..], 3, "dup").unwrap_err();
        assert!(matches!(err, FatError::NameCollision(ref n) if n == "dup"));
        assert_eq!(fs.inode_table(), &inodes);
        assert_eq!(fs.allocation_table(), &fat);
    }

    #[test]
    fn insufficient_space_changes_nothing() {
        let mut fs = fresh(2);
        let data = pattern(3 * BLOCK_SIZE);
        let err = fs
            .copy_in(data.as_slice(), data.len() as u64, "big")
            .unwrap_err();
        assert!(matches!(
            err,
            FatError::InsufficientSpace {
                required: 3,
                available: 2
            }
        ));
        assert_eq!(fs.free_block_count(), 2);
        assert!(fs.list_files().is_empty());
    }

    #[test]
    fn invalid_names_are_rejected_before_mutation() {
        let mut fs = fresh(2);
        assert!(matches!(
            fs.copy_in(&b"x"[..], 1, &"n".repeat(MAX_NAME_LEN + 1)),
            Err(FatError::NameTooLong { .. })
        ));
        assert!(matches!(
            fs.copy_in(&b"x"[..], 1, ""),
            Err(FatError::InvalidName(_))
        ));
        assert_eq!(fs.free_block_count(), 2);
    }

    #[test]
    fn list_after_delete() {
        let mut fs = fresh(4);
        fs.copy_in(&b"a"[..], 1, "A").unwrap();
        fs.copy_in(&b"b"[..], 1, "B").unwrap();
        fs.delete_file("A").unwrap();
        assert_eq!(fs.list_files(), ["B"]);
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut fs = fresh(4);
        fs.copy_in(&b"a"[..], 1, "A").unwrap();
        let inodes = fs.inode_table().clone();
        let fat = fs.allocation_table().clone();
        assert!(!fs.delete_file("nope").unwrap());
        assert_eq!(fs.inode_table(), &inodes);
        assert_eq!(fs.allocation_table(), &fat);
    }

    #[test]
    fn copy_out_missing_is_not_found() {
        let fs = fresh(2);
        let mut out = Vec::new();
        assert!(matches!(
            fs.copy_out("ghost", &mut out),
            Err(FatError::NotFound(_))
        ));
    }

    #[test]
    fn short_source_is_io_error() {
        let mut fs = fresh(4);
        let err = fs.copy_in(&b"abc"[..], 10, "liar").unwrap_err();
        assert!(matches!(err, FatError::Io(_)), "{err:?}");
        // The failed copy registered no file.
        assert!(fs.list_files().is_empty());
    }

    #[test]
    fn mount_unmount_without_changes_is_stable() {
        let mut fs = fresh(5);
        fs.copy_in(pattern(5000).as_slice(), 5000, "x").unwrap();
        let fs = remount(fs);
        let inodes = fs.inode_table().clone();
        let fat = fs.allocation_table().clone();
        let before = fs.device().snapshot();

        let fs = remount(fs);
        assert_eq!(fs.inode_table(), &inodes);
        assert_eq!(fs.allocation_table(), &fat);
        assert_eq!(fs.device().snapshot(), before);
    }

    #[test]
    fn mount_rejects_device_smaller_than_superblock() {
        let err = FatFs::from_device(MemByteDevice::new(10), &OpenOptions::default()).unwrap_err();
        assert!(matches!(err, FatError::ImageCorrupt(_)));
    }

    #[test]
    fn mount_rejects_truncated_tables() {
        let dev = fresh(4).unmount().unwrap();
        let mut raw = dev.into_inner();
        // Keep the superblock and part of the inode table only.
        raw.truncate(SUPERBLOCK_SIZE + 40);
        let err = FatFs::from_device(MemByteDevice::from_bytes(raw), &OpenOptions::default())
            .unwrap_err();
        assert!(matches!(err, FatError::ImageCorrupt(_)), "{err:?}");
    }

    #[test]
    fn mount_rejects_block_count_beyond_image() {
        let huge = Superblock {
            image_size_bytes: 4096 + SUPERBLOCK_SIZE as u64,
            free_block_count_hint: 0,
            total_block_count: u64::from(fatimg_ondisk::layout::MAX_BLOCK_COUNT),
        };
        let mut raw = huge.to_bytes().to_vec();
        raw.resize(SUPERBLOCK_SIZE + 4096, 0);
        let err = FatFs::from_device(MemByteDevice::from_bytes(raw), &OpenOptions::default())
            .unwrap_err();
        assert!(matches!(err, FatError::ImageCorrupt(_)), "{err:?}");
    }

    #[test]
    fn mount_rejects_data_region_past_end() {
        // Header for 4 blocks, but room for only one data block.
        let layout = Layout::new(4);
        let short_len = usize::try_from(layout.data_region_offset()).unwrap() + BLOCK_SIZE;
        let mut raw = fresh(4).unmount().unwrap().into_inner();
        raw.truncate(short_len);

        for skip_validation in [false, true] {
            let err = FatFs::from_device(
                MemByteDevice::from_bytes(raw.clone()),
                &OpenOptions { skip_validation },
            )
            .unwrap_err();
            assert!(matches!(err, FatError::ImageCorrupt(_)), "{err:?}");
        }
    }

    #[test]
    fn copy_in_with_every_slot_taken_is_inode_table_full() {
        let layout = Layout::new(2);
        let dev = fresh(2).unmount().unwrap();
        let taken: Vec<InodeRecord> = ["a", "b"]
            .iter()
            .map(|name| InodeRecord {
                name: encode_name(name).unwrap(),
                file_size: 0,
                head: Some(BlockIndex(0)),
            })
            .collect();
        dev.write_all_at(layout.inode_table_offset(), &encode_inode_table(&taken).unwrap())
            .unwrap();

        let mut fs = FatFs::from_device(
            dev,
            &OpenOptions {
                skip_validation: true,
            },
        )
        .unwrap();
        assert_eq!(fs.free_block_count(), 2);
        let fat = fs.allocation_table().clone();

        let err = fs.copy_in(&b"late"[..], 4, "c").unwrap_err();
        assert!(matches!(err, FatError::InodeTableFull), "{err:?}");
        assert_eq!(err.result_code(), -4);
        assert_eq!(fs.allocation_table(), &fat);
        assert_eq!(fs.list_files(), ["a", "b"]);
    }

    #[test]
    fn mount_validation_catches_bad_links_unless_skipped() {
        let dev = fresh(3).unmount().unwrap();
        let layout = Layout::new(3);
        // FAT[1] = 7, beyond the table.
        dev.write_all_at(layout.fat_table_offset() + 4, &7_i32.to_le_bytes())
            .unwrap();

        let err = FatFs::from_device(dev, &OpenOptions::default()).unwrap_err();
        assert!(matches!(err, FatError::ImageCorrupt(_)));
    }

    #[test]
    fn skip_validation_mounts_damaged_image() {
        let dev = fresh(3).unmount().unwrap();
        let layout = Layout::new(3);
        dev.write_all_at(layout.fat_table_offset() + 4, &7_i32.to_le_bytes())
            .unwrap();

        let fs = FatFs::from_device(
            dev,
            &OpenOptions {
                skip_validation: true,
            },
        )
        .unwrap();
        assert_eq!(fs.free_block_count(), 2);
        assert!(!fs.check().is_clean());
    }

    #[test]
    fn options_serialize() {
        let opts = OpenOptions {
            skip_validation: true,
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: OpenOptions = serde_json::from_str(&json).unwrap();
        assert!(back.skip_validation);
    }
}
