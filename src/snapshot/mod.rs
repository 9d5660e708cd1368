//! Snapshot: a point-in-time view of a file tree, from one of three sources.
//!
//! The local disk, the local index and the remote index all produce the same
//! [`Snapshot`] type through [`SnapshotSource`], so the diff engine and the
//! sync flows never care where a view came from.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use tracing::debug;

use crate::common::{FileEntry, ScanFlags, PATH_SEP};
use crate::error::{BitumError, Result};
use crate::index::{IndexRecord, IndexStore, INDEX_FILENAME};
use crate::scan::TreeScanner;
use crate::storage::{download_object, ObjectStore, RemoteLayout};

/// An immutable set of entries plus a lookup by path.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashSet<FileEntry>,
    by_path: HashMap<String, FileEntry>,
}

impl Snapshot {
    /// Builds a snapshot. When several entries share a path, the first one
    /// is the one returned by [`Snapshot::get`].
    pub fn from_entries<I: IntoIterator<Item = FileEntry>>(entries: I) -> Self {
        let mut set = HashSet::new();
        let mut by_path = HashMap::new();
        for entry in entries {
            by_path.entry(entry.path.clone()).or_insert_with(|| entry.clone());
            set.insert(entry);
        }
        Self { entries: set, by_path }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.by_path.get(path)
    }

    pub fn contains(&self, entry: &FileEntry) -> bool {
        self.entries.contains(entry)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    /// Sum of all known file sizes.
    pub fn total_size(&self) -> u64 {
        self.by_path.values().filter_map(|e| e.size).sum()
    }
}

/// Anything that can produce a [`Snapshot`].
pub trait SnapshotSource {
    fn snapshot(&self) -> Result<Snapshot>;

    /// Short label for log lines and reports.
    fn describe(&self) -> String;
}

/// Named snapshot sources, as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LocalFiles,
    LocalDb,
    RemoteDb,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalFiles => "local-files",
            SourceKind::LocalDb => "local-db",
            SourceKind::RemoteDb => "remote-db",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local-files" => Ok(SourceKind::LocalFiles),
            "local-db" => Ok(SourceKind::LocalDb),
            "remote-db" => Ok(SourceKind::RemoteDb),
            other => Err(format!(
                "unknown source '{other}' (expected local-files, local-db or remote-db)"
            )),
        }
    }
}

/// The tree on disk.
pub struct DiskSource {
    scanner: TreeScanner,
}

impl DiskSource {
    pub fn new(scanner: TreeScanner) -> Self {
        Self { scanner }
    }
}

impl SnapshotSource for DiskSource {
    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::from_entries(self.scanner.scan()?))
    }

    fn describe(&self) -> String {
        format!("{} ({})", SourceKind::LocalFiles, self.scanner.root().display())
    }
}

/// The files recorded in an open index.
pub struct IndexSource<'a> {
    index: &'a IndexStore,
    flags: ScanFlags,
    exclude: Option<Regex>,
}

impl<'a> IndexSource<'a> {
    pub fn new(index: &'a IndexStore, flags: ScanFlags, exclude: Option<Regex>) -> Self {
        Self { index, flags, exclude }
    }
}

impl SnapshotSource for IndexSource<'_> {
    fn snapshot(&self) -> Result<Snapshot> {
        snapshot_of_records(self.index.all_records()?, self.flags, self.exclude.as_ref())
    }

    fn describe(&self) -> String {
        match self.index.path() {
            Some(p) => format!("{} ({})", SourceKind::LocalDb, p.display()),
            None => SourceKind::LocalDb.to_string(),
        }
    }
}

/// The index stored next to the remote blobs. It is downloaded into a
/// temporary directory that is removed once the snapshot is built.
pub struct RemoteIndexSource<'a> {
    store: &'a dyn ObjectStore,
    layout: RemoteLayout,
    flags: ScanFlags,
    exclude: Option<Regex>,
}

impl<'a> RemoteIndexSource<'a> {
    pub fn new(store: &'a dyn ObjectStore, layout: RemoteLayout, flags: ScanFlags, exclude: Option<Regex>) -> Self {
        Self {
            store,
            layout,
            flags,
            exclude,
        }
    }
}

impl SnapshotSource for RemoteIndexSource<'_> {
    fn snapshot(&self) -> Result<Snapshot> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(INDEX_FILENAME);
        let key = self.layout.index_key();
        if !download_object(self.store, &key, &path)? {
            return Err(BitumError::ObjectNotFound(self.store.describe(&key)));
        }
        let index = IndexStore::open(&path)?;
        snapshot_of_records(index.all_records()?, self.flags, self.exclude.as_ref())
    }

    fn describe(&self) -> String {
        format!("{} ({})", SourceKind::RemoteDb, self.store.describe(&self.layout.index_key()))
    }
}

/// Converts index records into entries, masking the properties that `flags`
/// switch off so they compare equal to a disk scan taken with the same flags.
fn snapshot_of_records(records: Vec<IndexRecord>, flags: ScanFlags, exclude: Option<&Regex>) -> Result<Snapshot> {
    let total = records.len();
    let entries: Vec<FileEntry> = records
        .into_iter()
        .filter(|r| !exclude.is_some_and(|re| is_excluded(re, &r.path)))
        .map(|r| {
            FileEntry::file(
                r.path,
                flags.sizes.then_some(r.size),
                if flags.hashes { r.hash } else { None },
                if flags.perms { r.perms } else { None },
            )
        })
        .collect();
    debug!(records = total, kept = entries.len(), "snapshot from index");
    Ok(Snapshot::from_entries(entries))
}

/// True when the pattern matches `path` or any of its ancestor directories,
/// which is what pruning the walk at an excluded directory amounts to.
pub fn is_excluded(pattern: &Regex, path: &str) -> bool {
    path.match_indices(PATH_SEP)
        .map(|(i, _)| &path[..i])
        .filter(|prefix| !prefix.is_empty())
        .chain(std::iter::once(path))
        .any(|p| pattern.is_match(p))
}
