//! # Tree Scanner
//!
//! Walks a directory and produces the entries of every regular file below it,
//! with optional size, permission and content-hash columns.
//!
//! Directories are descended into but never reported. Symbolic links are
//! followed; links whose target is missing, links that loop, and entries the
//! process may not stat are logged and skipped. Any other OS error aborts the
//! scan.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::common::{ContentHash, FileEntry, ScanFlags, PATH_SEP};
use crate::error::{BitumError, Result};
use crate::fsx;

/// Block size used when streaming a file through the hasher.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Scanner for a single root directory.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    root: PathBuf,
    flags: ScanFlags,
    exclude: Option<Regex>,
}

impl TreeScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flags: ScanFlags::all(),
            exclude: None,
        }
    }

    pub fn flags(mut self, flags: ScanFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Skip every entry whose logical path (e.g. `/dir/file.txt`) matches.
    /// A matching directory is not descended into.
    pub fn exclude(mut self, pattern: Option<Regex>) -> Self {
        self.exclude = pattern;
        self
    }

    /// Compiles `pattern` and uses it as the exclusion filter.
    pub fn exclude_pattern(self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)?;
        Ok(self.exclude(Some(re)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the tree and returns the file entries in walk order (sorted by
    /// file name within each directory).
    pub fn scan(&self) -> Result<Vec<FileEntry>> {
        require_dir(&self.root)?;

        let root = self.root.as_path();
        let exclude = self.exclude.as_ref();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                match (exclude, logical_path(root, e.path())) {
                    (Some(re), Ok(rel)) => !re.is_match(&rel),
                    _ => true,
                }
            });

        let mut entries = Vec::new();
        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    skip_or_fail(err)?;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(md) => md,
                Err(err) => {
                    skip_or_fail(err)?;
                    continue;
                }
            };

            let hash = if self.flags.hashes {
                match hash_file(path) {
                    Ok(h) => Some(h),
                    Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                        warn!(path = %path.display(), "permission denied while hashing, skipping");
                        continue;
                    }
                    Err(e) => return Err(BitumError::io(e, path)),
                }
            } else {
                None
            };

            let rel = logical_path(root, path)?;
            entries.push(FileEntry::file(
                rel,
                self.flags.sizes.then(|| metadata.len()),
                hash,
                if self.flags.perms { fsx::permission_bits(&metadata) } else { None },
            ));
        }

        debug!(root = %root.display(), files = entries.len(), "scan finished");
        Ok(entries)
    }
}

/// Decides whether a walk error is one of the skippable conditions.
fn skip_or_fail(err: walkdir::Error) -> Result<()> {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    if err.loop_ancestor().is_some() {
        warn!(path = %path.display(), "symlink loop, skipping");
        return Ok(());
    }
    if let Some(io_err) = err.io_error() {
        if io_err.kind() == io::ErrorKind::NotFound {
            warn!(path = %path.display(), "dangling symlink, skipping");
            return Ok(());
        }
        if fsx::is_symlink_loop(io_err) {
            warn!(path = %path.display(), "too many levels of symbolic links, skipping");
            return Ok(());
        }
        if io_err.kind() == io::ErrorKind::PermissionDenied {
            warn!(path = %path.display(), "permission denied, skipping");
            return Ok(());
        }
    }
    Err(BitumError::io(io::Error::from(err), path))
}

/// Logical path of `path` below `root`: `/`-separated with a leading `/`.
pub fn logical_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| BitumError::StripPrefix {
        prefix: root.to_path_buf(),
        path: path.to_path_buf(),
    })?;
    let mut out = String::new();
    for comp in rel.components() {
        let part = comp
            .as_os_str()
            .to_str()
            .ok_or_else(|| BitumError::NonUtf8Path(path.to_path_buf()))?;
        out.push(PATH_SEP);
        out.push_str(part);
    }
    Ok(out)
}

/// Fails with [`BitumError::MissingRoot`] unless `root` is an existing
/// directory.
pub fn require_dir(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(BitumError::MissingRoot(root.to_path_buf()))
    }
}

/// Resolves a logical path against a root directory on disk. Only plain name
/// components are accepted, so the result always stays below `root`.
pub fn disk_path(root: &Path, logical: &str) -> Result<PathBuf> {
    // A leading `/` would make `join` discard the root.
    let relative = Path::new(logical.trim_start_matches(PATH_SEP));
    let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
    if relative.as_os_str().is_empty() || !plain {
        return Err(BitumError::UnsafePath(logical.to_string()));
    }
    Ok(root.join(relative))
}

/// Streams a file through BLAKE3 in fixed-size blocks.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
