//! # Extraction Module
//!
//! Reads files back out of blobs. Three modes share one copy routine:
//!
//! - sequential: walk a blob front to back, checking that every record starts
//!   exactly where the read cursor is;
//! - random access: seek straight to one record inside a local blob;
//! - remote range: ranged GET of one record from the object store.
//!
//! Every mode creates parent directories as needed, verifies the byte count
//! against the record and reapplies the recorded permission bits.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Workspace;
use crate::error::{ArchiveIntegrityError, BitumError, Result};
use crate::fsx;
use crate::index::{IndexRecord, IndexStore};
use crate::scan::{disk_path, require_dir};
use crate::storage::{ByteRange, ObjectStore, RemoteLayout};

/// Chunk size used while streaming file bodies to disk.
pub const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// Totals of an extraction run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub blobs: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Sequential reader over one blob.
pub struct ArchiveReader {
    blob_id: String,
    path: PathBuf,
    reader: BufReader<File>,
    cursor: u64,
}

impl ArchiveReader {
    pub fn open(blob_id: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| BitumError::io(e, &path))?;
        Ok(Self {
            blob_id: blob_id.into(),
            path,
            reader: BufReader::with_capacity(STREAM_CHUNK_SIZE * 4, file),
            cursor: 0,
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Extracts the next record below `out_dir`. The record must start at the
    /// current cursor.
    pub fn extract_next(&mut self, record: &IndexRecord, out_dir: &Path) -> Result<u64> {
        if record.byte_offset != self.cursor {
            return Err(ArchiveIntegrityError::OffsetMismatch {
                blob_id: self.blob_id.clone(),
                path: record.path.clone(),
                expected: record.byte_offset,
                actual: self.cursor,
            }
            .into());
        }
        let dest = disk_path(out_dir, &record.path)?;
        let mut body = (&mut self.reader).take(record.size);
        let written = write_record(&mut body, record, &dest)
            .map_err(|e| with_path_if_missing(e, &self.path))?;
        self.cursor += written;
        Ok(written)
    }

    /// Extracts `records` (one blob's records, ascending offset) in order.
    pub fn extract_all(&mut self, records: &[IndexRecord], out_dir: &Path) -> Result<u64> {
        let mut total = 0;
        for record in records {
            total += self.extract_next(record, out_dir)?;
        }
        debug!(blob = %self.blob_id, files = records.len(), bytes = total, "blob extracted");
        Ok(total)
    }
}

/// Sequentially extracts every blob named by `index` from the workspace
/// into `out_dir`, which must already exist. Every indexed path is checked
/// before the first file is written.
pub fn extract_all(workspace: &Workspace, index: &IndexStore, out_dir: &Path) -> Result<ExtractSummary> {
    require_dir(out_dir)?;
    let mut blobs = Vec::new();
    for blob_id in index.blob_ids()? {
        let records = index.records_for_blob(&blob_id)?;
        for record in &records {
            disk_path(out_dir, &record.path)?;
        }
        blobs.push((blob_id, records));
    }

    let mut summary = ExtractSummary::default();
    for (blob_id, records) in blobs {
        info!(blob = %blob_id, files = records.len(), "extracting blob");
        let mut reader = ArchiveReader::open(blob_id.as_str(), workspace.blob_path(&blob_id))?;
        summary.bytes += reader.extract_all(&records, out_dir)?;
        summary.files += records.len();
        summary.blobs += 1;
    }
    Ok(summary)
}

/// Random-access extraction of one record from a local blob into `dest`.
pub fn extract_single(record: &IndexRecord, blob_path: &Path, dest: &Path) -> Result<u64> {
    let mut file = File::open(blob_path).map_err(|e| BitumError::io(e, blob_path))?;
    file.seek(SeekFrom::Start(record.byte_offset))
        .map_err(|e| BitumError::io(e, blob_path))?;
    let mut body = file.take(record.size);
    write_record(&mut body, record, dest)
}

/// Fetches one record from the remote copy of its blob with a ranged GET and
/// writes it to `dest`.
pub fn fetch_remote_range(store: &dyn ObjectStore, layout: &RemoteLayout, record: &IndexRecord, dest: &Path) -> Result<u64> {
    if record.size == 0 {
        return write_record(&mut std::io::empty(), record, dest);
    }
    let key = layout.blob_key(&record.blob_id);
    let range = ByteRange::new(record.byte_offset, record.size);
    debug!(key = %key, range = %range.header_value()?, path = %record.path, "ranged fetch");
    let mut body = store
        .get(&key, Some(range))?
        .ok_or_else(|| BitumError::ObjectNotFound(store.describe(&key)))?;
    // Never trust the server to honour the window length.
    let mut limited = (&mut body).take(record.size);
    write_record(&mut limited, record, dest)
}

/// Streams `body` into `dest` in fixed-size chunks, then checks the byte count
/// and applies the record's permissions.
fn write_record(body: &mut dyn Read, record: &IndexRecord, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BitumError::io(e, parent))?;
    }
    let mut out = File::create(dest).map_err(|e| BitumError::io(e, dest))?;
    let mut buf = [0u8; STREAM_CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(|e| BitumError::io(e, dest))?;
        written += n as u64;
    }
    out.flush().map_err(|e| BitumError::io(e, dest))?;

    if written != record.size {
        return Err(ArchiveIntegrityError::ByteCount {
            blob_id: record.blob_id.clone(),
            path: record.path.clone(),
            expected: record.size,
            actual: written,
        }
        .into());
    }
    apply_permissions(dest, record.perms)?;
    Ok(written)
}

/// Applies recorded permission bits; records without perms leave the file as
/// created.
pub fn apply_permissions(path: &Path, perms: Option<u32>) -> Result<()> {
    match perms {
        Some(mode) => fsx::set_unix_permissions(path, mode).map_err(|e| BitumError::io(e, path)),
        None => Ok(()),
    }
}

/// Read errors from the blob arrive through `io::Read` without a path.
fn with_path_if_missing(err: BitumError, path: &Path) -> BitumError {
    match err {
        BitumError::Io { source, path: p } if p.as_os_str().is_empty() => BitumError::io(source, path),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_blob, DiskContent};
    use crate::common::FileEntry;
    use crate::planner::BlobAssignment;
    use crate::storage::LocalObjectStore;

    fn record(blob: &str, path: &str, off: u64, size: u64) -> IndexRecord {
        IndexRecord {
            blob_id: blob.into(),
            path: path.into(),
            byte_offset: off,
            size,
            hash: None,
            perms: Some(0o640),
        }
    }

    #[test]
    fn sequential_extraction_restores_files() {
        let ws_dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(ws_dir.path());
        fs::write(ws.blob_path("b"), b"aaabbbbcc").unwrap();
        let mut index = IndexStore::open_in_memory().unwrap();
        index
            .upsert(&[record("b", "/x/a", 0, 3), record("b", "/b", 3, 4), record("b", "/x/y/c", 7, 2)])
            .unwrap();

        let out = tempfile::tempdir().unwrap();
        let summary = extract_all(&ws, &index, out.path()).unwrap();
        assert_eq!(summary, ExtractSummary { blobs: 1, files: 3, bytes: 9 });
        assert_eq!(fs::read(out.path().join("x/a")).unwrap(), b"aaa");
        assert_eq!(fs::read(out.path().join("b")).unwrap(), b"bbbb");
        assert_eq!(fs::read(out.path().join("x/y/c")).unwrap(), b"cc");
    }

    #[test]
    fn extraction_needs_an_existing_target() {
        let ws_dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(ws_dir.path());
        let index = IndexStore::open_in_memory().unwrap();
        let missing = ws_dir.path().join("typo");
        let err = extract_all(&ws, &index, &missing).unwrap_err();
        assert!(matches!(err, BitumError::MissingRoot(_)));
        assert!(!missing.exists());
    }

    #[test]
    fn escaping_record_stops_extraction_before_any_write() {
        let ws_dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(ws_dir.path());
        fs::write(ws.blob_path("b"), b"okevil").unwrap();
        let mut index = IndexStore::open_in_memory().unwrap();
        index
            .upsert(&[record("b", "/ok", 0, 2), record("b", "/../evil", 2, 4)])
            .unwrap();

        let base = tempfile::tempdir().unwrap();
        let out = base.path().join("out");
        fs::create_dir(&out).unwrap();
        let err = extract_all(&ws, &index, &out).unwrap_err();
        assert!(matches!(err, BitumError::UnsafePath(ref p) if p == "/../evil"));
        assert!(!out.join("ok").exists());
        assert!(!base.path().join("evil").exists());
    }

    /// Fails its first read with `Interrupted`, then serves `data`.
    struct InterruptedOnce {
        interrupted: bool,
        data: &'static [u8],
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("f");
        let mut body = InterruptedOnce {
            interrupted: false,
            data: b"payload",
        };
        assert_eq!(write_record(&mut body, &record("b", "/f", 0, 7), &dest).unwrap(), 7);
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn gap_in_offsets_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("b.bitumen");
        fs::write(&blob, b"aaabbbb").unwrap();
        let mut reader = ArchiveReader::open("b", &blob).unwrap();
        let records = [record("b", "/a", 0, 3), record("b", "/b", 4, 3)];
        let err = reader.extract_all(&records, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            BitumError::Integrity(ArchiveIntegrityError::OffsetMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn truncated_blob_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("b.bitumen");
        fs::write(&blob, b"aaa").unwrap();
        let err = extract_single(&record("b", "/a", 1, 5), &blob, &dir.path().join("a")).unwrap_err();
        assert!(matches!(
            err,
            BitumError::Integrity(ArchiveIntegrityError::ByteCount { expected: 5, actual: 2, .. })
        ));
    }

    #[test]
    fn random_access_reads_only_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("b.bitumen");
        fs::write(&blob, b"0123456789").unwrap();
        let dest = dir.path().join("out/one");
        assert_eq!(extract_single(&record("b", "/one", 4, 3), &blob, &dest).unwrap(), 3);
        assert_eq!(fs::read(&dest).unwrap(), b"456");
    }

    #[cfg(unix)]
    #[test]
    fn extraction_restores_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("run.sh"), b"#!/bin/sh\n").unwrap();
        let mut plan = BlobAssignment::new("p");
        plan.push(FileEntry::file("/run.sh", Some(10), None, Some(0o750)));
        let ws_dir = tempfile::tempdir().unwrap();
        let records = write_blob(ws_dir.path(), &plan, &DiskContent::new(src.path())).unwrap();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("run.sh");
        extract_single(&records[0], &ws_dir.path().join("p.bitumen"), &dest).unwrap();
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o7777, 0o750);
    }

    #[test]
    fn remote_range_fetch_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("remote")).unwrap();
        let layout = RemoteLayout::new("pre");
        let blob = dir.path().join("blobY.bitumen");
        let mut payload = vec![b'.'; 100];
        payload.extend_from_slice(&[b'z'; 50]);
        fs::write(&blob, &payload).unwrap();
        store.put_file(&layout.blob_key("blobY"), &blob).unwrap();

        let dest = dir.path().join("local/b.txt");
        let n = fetch_remote_range(&store, &layout, &record("blobY", "/b.txt", 100, 50), &dest).unwrap();
        assert_eq!(n, 50);
        assert_eq!(fs::read(&dest).unwrap(), vec![b'z'; 50]);

        // No object named "gone" exists, so only the zero-size shortcut can succeed.
        let empty = dir.path().join("local/empty");
        fetch_remote_range(&store, &layout, &record("gone", "/empty", 0, 0), &empty).unwrap();
        assert_eq!(fs::metadata(&empty).unwrap().len(), 0);

        let err = fetch_remote_range(&store, &layout, &record("gone", "/x", 0, 1), &dir.path().join("x")).unwrap_err();
        assert!(matches!(err, BitumError::ObjectNotFound(_)));
    }
}
