//! # Blob Format
//!
//! A blob is the raw concatenation of whole file contents: no header, no
//! magic bytes, no per-entry framing. The index records are the only way to
//! find a file inside a blob, so the writer records `(blob, path, offset,
//! size, hash, perms)` for every file at the exact cursor position where its
//! bytes start.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::common::FileEntry;
use crate::error::{BitumError, Result};
use crate::format::human_size;
use crate::index::IndexRecord;
use crate::planner::BlobAssignment;
use crate::scan::disk_path;

/// File extension of blobs, locally and remotely.
pub const BLOB_EXTENSION: &str = "bitumen";

/// Buffer size of the blob writer.
const WRITE_BUFFER: usize = 8 * 1024 * 1024;

/// `{blob_id}.bitumen`
pub fn blob_file_name(blob_id: &str) -> String {
    format!("{blob_id}.{BLOB_EXTENSION}")
}

/// Where the bytes of an entry come from while packing.
pub trait ContentSource {
    fn open(&self, entry: &FileEntry) -> Result<Box<dyn Read + '_>>;
}

/// Reads entries from a directory tree on disk.
pub struct DiskContent<'a> {
    root: &'a Path,
}

impl<'a> DiskContent<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }
}

impl ContentSource for DiskContent<'_> {
    fn open(&self, entry: &FileEntry) -> Result<Box<dyn Read + '_>> {
        let path = disk_path(self.root, &entry.path)?;
        let file = File::open(&path).map_err(|e| BitumError::io(e, path))?;
        Ok(Box::new(file))
    }
}

/// Writes one blob sequentially, producing its index records.
pub struct ArchiveWriter {
    blob_id: String,
    path: PathBuf,
    writer: BufWriter<File>,
    cursor: u64,
    records: Vec<IndexRecord>,
}

impl ArchiveWriter {
    /// Creates (truncating) the blob file at `path`.
    pub fn create(blob_id: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| BitumError::io(e, &path))?;
        Ok(Self {
            blob_id: blob_id.into(),
            path,
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            cursor: 0,
            records: Vec::new(),
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Copies the whole content of `entry` into the blob and records it at
    /// the current cursor. The number of bytes copied must equal the
    /// entry's size.
    pub fn append(&mut self, entry: &FileEntry, reader: &mut dyn Read) -> Result<&IndexRecord> {
        let expected = entry.size.ok_or_else(|| BitumError::UnsizedEntry(entry.path.clone()))?;
        let copied = io::copy(reader, &mut self.writer).map_err(|e| BitumError::io(e, &self.path))?;
        if copied != expected {
            return Err(BitumError::PackSizeMismatch {
                path: entry.path.clone(),
                expected,
                actual: copied,
            });
        }

        self.records.push(IndexRecord {
            blob_id: self.blob_id.clone(),
            path: entry.path.clone(),
            byte_offset: self.cursor,
            size: copied,
            hash: entry.hash,
            perms: entry.perms,
        });
        self.cursor += copied;
        Ok(&self.records[self.records.len() - 1])
    }

    /// Flushes the blob and returns the records in write order.
    pub fn finish(mut self) -> Result<Vec<IndexRecord>> {
        self.writer.flush().map_err(|e| BitumError::io(e, &self.path))?;
        debug!(blob = %self.blob_id, bytes = self.cursor, files = self.records.len(), "blob written");
        Ok(self.records)
    }
}

/// Writes one planned blob into `blob_dir` and returns its index records.
pub fn write_blob(blob_dir: &Path, assignment: &BlobAssignment, source: &dyn ContentSource) -> Result<Vec<IndexRecord>> {
    let path = blob_dir.join(blob_file_name(&assignment.blob_id));
    info!(
        blob = %assignment.blob_id,
        files = assignment.entries.len(),
        size = %human_size(assignment.cumulative_size),
        "writing blob"
    );
    let mut writer = ArchiveWriter::create(assignment.blob_id.clone(), path)?;
    for entry in &assignment.entries {
        let mut reader = source.open(entry)?;
        writer.append(entry, &mut reader)?;
    }
    writer.finish()
}
