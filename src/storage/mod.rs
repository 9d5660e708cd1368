//! # Object Storage
//!
//! The sync engine needs three things from a remote store: upload an object,
//! read an object (optionally one byte range of it) and learn an object's
//! size. [`ObjectStore`] captures exactly that; [`LocalObjectStore`] backs it
//! with a directory and [`S3ObjectStore`] with an S3-compatible bucket.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::archive::blob_file_name;
use crate::error::{BitumError, Result};
use crate::index::INDEX_FILENAME;

/// A readable object body.
pub type ObjectReader = Box<dyn Read + Send>;

/// Half-open byte window `[offset, offset + length)` of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Offset of the last byte in the window.
    pub fn last_byte(&self) -> Result<u64> {
        self.offset
            .checked_add(self.length)
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(|| BitumError::Storage(format!("invalid byte range: offset {} length {}", self.offset, self.length)))
    }

    /// Value of the HTTP `Range` header, e.g. `bytes=100-149`.
    pub fn header_value(&self) -> Result<String> {
        Ok(format!("bytes={}-{}", self.offset, self.last_byte()?))
    }
}

/// Capabilities the sync engine needs from remote storage.
pub trait ObjectStore {
    /// Uploads the file at `path` under `key`, replacing any existing object.
    fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Opens the object for reading, restricted to `range` when given.
    /// Returns `Ok(None)` when the object does not exist.
    fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<ObjectReader>>;

    /// Size of the object, or `Ok(None)` when it does not exist.
    fn head(&self, key: &str) -> Result<Option<u64>>;

    /// Human-readable location, used in prompts and log lines.
    fn describe(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Downloads the whole object `key` into `dest`. Returns `Ok(false)` when the
/// object does not exist, leaving `dest` untouched.
pub fn download_object(store: &dyn ObjectStore, key: &str, dest: &Path) -> Result<bool> {
    let Some(mut body) = store.get(key, None)? else {
        return Ok(false);
    };
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| BitumError::io(e, dir))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BitumError::io(e, dir))?;
    let bytes = std::io::copy(&mut body, tmp.as_file_mut()).map_err(|e| BitumError::io(e, dest))?;
    tmp.persist(dest).map_err(|e| BitumError::io(e.error, dest))?;
    debug!(key, bytes, dest = %dest.display(), "downloaded object");
    Ok(true)
}

/// Naming of blobs and the index under a remote prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteLayout {
    prefix: String,
}

impl RemoteLayout {
    /// A non-empty prefix always ends with `/`.
    pub fn new(prefix: &str) -> Self {
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn blob_key(&self, blob_id: &str) -> String {
        format!("{}{}", self.prefix, blob_file_name(blob_id))
    }

    pub fn index_key(&self) -> String {
        format!("{}{}", self.prefix, INDEX_FILENAME)
    }
}
