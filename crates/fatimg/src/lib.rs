#![forbid(unsafe_code)]
//! fatimg: a single-file FAT filesystem image library.
//!
//! Stable entry point for downstream users. Everything lives in
//! `fatimg-core`; this crate re-exports it so callers depend on one name.

pub use fatimg_core::*;
