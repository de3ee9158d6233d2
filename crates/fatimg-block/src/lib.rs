#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `ByteDevice` trait (pread/pwrite-style access to the image),
//! a file-backed and an in-memory implementation, and [`BlockStore`], which
//! addresses the data region in fixed `BLOCK_SIZE` units.

use fatimg_error::{FatError, Result};
use fatimg_types::{BLOCK_SIZE, BlockIndex};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chunk used when zero-filling a fresh image.
const ZERO_FILL_CHUNK: usize = 64 * 1024;

/// Owned block buffer.
///
/// Invariant: length <= `BLOCK_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset I/O (pread/pwrite semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// A range that runs past the end of the device is a short read and
    /// reported as [`FatError::ImageCorrupt`].
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn checked_end(offset: u64, len: usize, what: &str) -> Result<u64> {
    u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| FatError::ImageCorrupt(format!("{what} range overflows u64")))
}

fn short_read(offset: u64, len: usize, device_len: u64) -> FatError {
    FatError::ImageCorrupt(format!(
        "short read: offset={offset} len={len} image_len={device_len}"
    ))
}

/// File-backed byte device using `pread`/`pwrite` style I/O.
///
/// Opens the image read-write; a single handle per image is assumed.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileByteDevice {
    /// Open an existing image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| FatError::StoreUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    /// Create (or truncate) an image of exactly `len` zero bytes.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| FatError::StoreUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        let zeros = vec![0_u8; ZERO_FILL_CHUNK];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = usize::try_from(remaining).map_or(ZERO_FILL_CHUNK, |r| r.min(ZERO_FILL_CHUNK));
            file.write_all(&zeros[..chunk])?;
            remaining -= chunk as u64;
        }
        file.flush()?;
        debug!(path = %path.display(), len, "zero-filled image");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = checked_end(offset, buf.len(), "read")?;
        if end > self.len {
            return Err(short_read(offset, buf.len(), self.len));
        }
        self.file.read_exact_at(buf, offset).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                short_read(offset, buf.len(), self.len)
            } else {
                FatError::Io(err)
            }
        })
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let end = checked_end(offset, buf.len(), "write")?;
        if end > self.len {
            return Err(FatError::ImageCorrupt(format!(
                "write out of bounds: offset={offset} len={} image_len={}",
                buf.len(),
                self.len
            )));
        }
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Fixed-size in-memory byte device.
#[derive(Debug)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self::from_bytes(vec![0_u8; len])
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes.into_inner()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let device_len = bytes.len() as u64;
        let end = checked_end(offset, buf.len(), "read")?;
        if end > device_len {
            return Err(short_read(offset, buf.len(), device_len));
        }
        // Both bounds are <= bytes.len(), so they fit usize.
        let (start, end) = (offset as usize, end as usize);
        buf.copy_from_slice(&bytes[start..end]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let device_len = bytes.len() as u64;
        let end = checked_end(offset, buf.len(), "write")?;
        if end > device_len {
            return Err(FatError::ImageCorrupt(format!(
                "write out of bounds: offset={offset} len={} image_len={device_len}",
                buf.len()
            )));
        }
        let (start, end) = (offset as usize, end as usize);
        bytes[start..end].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed view of an image's data region.
///
/// Block `i` lives at `data_offset + i * BLOCK_SIZE`. Header bytes (everything
/// before `data_offset`) are reached through [`BlockStore::read_header`] and
/// [`BlockStore::write_header`].
#[derive(Debug)]
pub struct BlockStore<D: ByteDevice> {
    inner: D,
    data_offset: u64,
    block_count: u32,
}

impl<D: ByteDevice> BlockStore<D> {
    #[must_use]
    pub fn new(inner: D, data_offset: u64, block_count: u32) -> Self {
        Self {
            inner,
            data_offset,
            block_count,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    #[must_use]
    pub fn into_inner(self) -> D {
        self.inner
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    fn block_offset(&self, block: BlockIndex) -> Result<u64> {
        if block.0 >= self.block_count {
            return Err(FatError::ImageCorrupt(format!(
                "block out of range: block={block} block_count={}",
                self.block_count
            )));
        }
        u64::from(block.0)
            .checked_mul(BLOCK_SIZE as u64)
            .and_then(|rel| rel.checked_add(self.data_offset))
            .ok_or_else(|| FatError::ImageCorrupt("block offset overflow".to_owned()))
    }

    /// Read a full block.
    pub fn read_block(&self, block: BlockIndex) -> Result<BlockBuf> {
        self.read_block_prefix(block, BLOCK_SIZE)
    }

    /// Read the first `len` bytes of a block.
    pub fn read_block_prefix(&self, block: BlockIndex, len: usize) -> Result<BlockBuf> {
        if len > BLOCK_SIZE {
            return Err(FatError::ImageCorrupt(format!(
                "block read of {len} bytes exceeds block size {BLOCK_SIZE}"
            )));
        }
        let offset = self.block_offset(block)?;
        let mut buf = vec![0_u8; len];
        self.inner.read_exact_at(offset, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    /// Write `data` at the start of a block. A short `data` leaves the block tail untouched.
    pub fn write_block(&self, block: BlockIndex, data: &[u8]) -> Result<()> {
        if data.len() > BLOCK_SIZE {
            return Err(FatError::ImageCorrupt(format!(
                "write_block data size {} exceeds block size {BLOCK_SIZE}",
                data.len()
            )));
        }
        let offset = self.block_offset(block)?;
        self.inner.write_all_at(offset, data)
    }

    /// Raw read from the header region.
    pub fn read_header(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact_at(offset, buf)
    }

    /// Raw write to the header region.
    pub fn write_header(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write_all_at(offset, data)
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
