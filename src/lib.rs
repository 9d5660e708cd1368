//! # bitum Core Library
//!
//! Packs many small files into a few large append-only blobs (`.bitumen`),
//! keeps a SQLite index of where every file lives inside them, and
//! synchronizes a directory with a copy of those blobs in object storage.
//!
//! ## Key Modules
//!
//! - [`scan`]: walks a directory into file entries (size, BLAKE3 hash, mode).
//! - [`index`]: the `bitumen.sqlite3` table of blob locations.
//! - [`planner`]: assigns files to blobs (size tiers or greedy capacity).
//! - [`archive`] and [`extract`]: write blobs, read files back out of them.
//! - [`snapshot`] and [`diff`]: compare disk, local index and remote index.
//! - [`storage`]: the object store seam, with local-directory and S3 backends.
//! - [`sync`]: the upload and download flows plus maintenance operations.

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod config;
pub mod diff;
pub mod error;
pub mod extract;
pub mod format;
pub mod index;
pub mod planner;
pub mod scan;
pub mod snapshot;
pub mod storage;
pub mod sync;

// Cross-platform filesystem helpers
pub mod fsx;

pub use error::{ArchiveIntegrityError, BitumError, Result};
