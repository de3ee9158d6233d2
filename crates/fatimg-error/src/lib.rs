#![forbid(unsafe_code)]
//! Error types for fatimg.
//!
//! # Error Taxonomy
//!
//! fatimg uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `fatimg-types` | Byte-level decode failures in header records |
//! | Runtime | `FatError` | `fatimg-error` (this crate) | User-facing errors for the CLI and API consumers |
//!
//! `fatimg-error` does not depend on `fatimg-types`. The `ParseError → FatError`
//! conversion lives in `fatimg-core`, which turns every decode failure found while
//! mounting into [`FatError::ImageCorrupt`].
//!
//! ## Result Codes
//!
//! The CLI prints a numeric result for `push` and `pull` instead of failing the
//! process. Every variant maps to exactly one code via [`FatError::result_code`];
//! the match is exhaustive so a new variant cannot ship without a code.
//!
//! | Variant | Code |
//! |---------|------|
//! | `HostFile` | -1 |
//! | `NameCollision` | -2 |
//! | `NotFound` | -2 |
//! | `InsufficientSpace` | -3 |
//! | `ImageCorrupt` | -3 |
//! | `InodeTableFull` | -4 |
//! | `NameTooLong` | -5 |
//! | `InvalidName` | -5 |
//! | `InvalidGeometry` | -6 |
//! | `StoreUnavailable` | -7 |
//! | `Io` | -8 |
//!
//! Codes -1..-3 keep the values existing scripts already match on: -2 means
//! "the name was the problem" and -3 means "the blocks were the problem" for
//! both directions of copy.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all fatimg operations.
#[derive(Debug, Error)]
pub enum FatError {
    /// Operating system I/O error on the image (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image cannot be opened or created at `path`.
    #[error("image unavailable at {}", path.display())]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A host-side source or destination file cannot be opened.
    #[error("host file {}", path.display())]
    HostFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Short read of the header, inode or FAT region, an image smaller than a
    /// superblock, or structurally impossible table contents.
    #[error("image corrupt: {0}")]
    ImageCorrupt(String),

    /// The requested image size cannot hold a single block, or the block count
    /// does not fit the on-disk entry width.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Copy-in target name is already occupied.
    #[error("file exists: {0}")]
    NameCollision(String),

    /// Fewer free blocks than the copy requires.
    #[error("insufficient space: need {required} blocks, {available} free")]
    InsufficientSpace { required: u64, available: u64 },

    /// No free inode slot.
    #[error("inode table full")]
    InodeTableFull,

    /// Copy-out or lookup target name is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name exceeds the inode name field.
    #[error("name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    /// Name is empty or contains a NUL byte.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

impl FatError {
    /// Numeric result printed by the CLI for copy operations.
    #[must_use]
    pub fn result_code(&self) -> i32 {
        match self {
            Self::HostFile { .. } => -1,
            Self::NameCollision(_) | Self::NotFound(_) => -2,
            Self::InsufficientSpace { .. } | Self::ImageCorrupt(_) => -3,
            Self::InodeTableFull => -4,
            Self::NameTooLong { .. } | Self::InvalidName(_) => -5,
            Self::InvalidGeometry(_) => -6,
            Self::StoreUnavailable { .. } => -7,
            Self::Io(_) => -8,
        }
    }

    /// Whether this error was raised before the image could be used at all.
    #[must_use]
    pub fn is_mount_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::ImageCorrupt(_) | Self::InvalidGeometry(_)
        )
    }
}

/// Result alias using `FatError`.
pub type Result<T> = std::result::Result<T, FatError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io() -> std::io::Error {
        std::io::Error::other("test")
    }

    #[test]
    fn result_code_mapping_covers_all_variants() {
        let cases: Vec<(FatError, i32)> = vec![
            (
                FatError::HostFile {
                    path: "src.bin".into(),
                    source: io(),
                },
                -1,
            ),
            (FatError::NameCollision("a".into()), -2),
            (FatError::NotFound("a".into()), -2),
            (
                FatError::InsufficientSpace {
                    required: 3,
                    available: 1,
                },
                -3,
            ),
            (FatError::ImageCorrupt("short read".into()), -3),
            (FatError::InodeTableFull, -4),
            (FatError::NameTooLong { len: 30, max: 24 }, -5),
            (FatError::InvalidName(String::new()), -5),
            (FatError::InvalidGeometry("too small".into()), -6),
            (
                FatError::StoreUnavailable {
                    path: "fs.img".into(),
                    source: io(),
                },
                -7,
            ),
            (FatError::Io(io()), -8),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.result_code(), *expected, "wrong code for {error:?}");
        }
    }

    #[test]
    fn display_formatting() {
        let err = FatError::InsufficientSpace {
            required: 4,
            available: 2,
        };
        assert_eq!(err.to_string(), "insufficient space: need 4 blocks, 2 free");

        let err = FatError::StoreUnavailable {
            path: "/tmp/missing.img".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.to_string(), "image unavailable at /tmp/missing.img");
        assert!(std::error::Error::source(&err).is_some());

        let err = FatError::HostFile {
            path: "in.bin".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.to_string(), "host file in.bin");
        assert!(std::error::Error::source(&err).is_some());

        assert_eq!(
            FatError::NameCollision("notes".into()).to_string(),
            "file exists: notes"
        );
        assert_eq!(
            FatError::NameTooLong { len: 25, max: 24 }.to_string(),
            "name too long: 25 bytes (max 24)"
        );
    }

    #[test]
    fn mount_failures_are_classified() {
        assert!(FatError::ImageCorrupt("x".into()).is_mount_failure());
        assert!(FatError::InvalidGeometry("x".into()).is_mount_failure());
        assert!(!FatError::NotFound("x".into()).is_mount_failure());
        assert!(!FatError::InodeTableFull.is_mount_failure());
    }
}
