//! # Sync Orchestrator
//!
//! Drives the two synchronization flows between a directory on disk and its
//! remote copy:
//!
//! - [`upload`]: disk → remote. New files go into fresh blobs, blobs holding
//!   changed files are rewritten whole, and the index is upserted and pushed.
//! - [`download`]: remote → disk. Missing or changed files are fetched with
//!   ranged reads; recorded permissions are always reapplied. Nothing is
//!   ever deleted on either side.
//!
//! The maintenance operations (full rebuild, integrity comparisons, size
//! checks, bulk transfers, extraction) live in [`maintenance`].

mod download;
mod maintenance;
mod upload;

pub use download::{download, DownloadReport};
pub use maintenance::{
    build, check_sizes, download_all, extract_all, extract_single_file, upload_all, BuildReport, SizeCheck,
    SizeCheckReport,
};
pub use upload::{upload, UploadOptions, UploadReport};

use std::path::Path;

use regex::Regex;
use tracing::info;

use crate::common::ScanFlags;
use crate::config::Workspace;
use crate::diff::{DiffOutcome, TreeDiff};
use crate::error::{BitumError, Result};
use crate::format::timed;
use crate::index::IndexStore;
use crate::scan::TreeScanner;
use crate::snapshot::{DiskSource, IndexSource, RemoteIndexSource, Snapshot, SnapshotSource, SourceKind};
use crate::storage::{ObjectStore, RemoteLayout};

/// The remote side of a sync: a store and where things live in it.
#[derive(Clone, Copy)]
pub struct Remote<'a> {
    pub store: &'a dyn ObjectStore,
    pub layout: &'a RemoteLayout,
}

impl<'a> Remote<'a> {
    pub fn new(store: &'a dyn ObjectStore, layout: &'a RemoteLayout) -> Self {
        Self { store, layout }
    }
}

/// How a diff is shown to the operator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffView {
    /// Print every changed path, not just the per-class totals.
    pub list: bool,
    /// Collapse one-sided paths into their top-most missing directory.
    pub dir_norecurse: bool,
    /// Emit the diff as JSON instead of text.
    pub json: bool,
}

/// Everything needed to build any of the named snapshot sources.
pub struct SourceSet<'a> {
    pub root: &'a Path,
    pub workspace: &'a Workspace,
    pub remote: Option<Remote<'a>>,
    pub flags: ScanFlags,
    pub exclude: Option<Regex>,
}

impl SourceSet<'_> {
    pub fn snapshot(&self, kind: SourceKind) -> Result<Snapshot> {
        match kind {
            SourceKind::LocalFiles => {
                let scanner = TreeScanner::new(self.root)
                    .flags(self.flags)
                    .exclude(self.exclude.clone());
                take(&DiskSource::new(scanner))
            }
            SourceKind::LocalDb => {
                let index = open_existing_index(self.workspace)?;
                take(&IndexSource::new(&index, self.flags, self.exclude.clone()))
            }
            SourceKind::RemoteDb => {
                let remote = self
                    .remote
                    .ok_or_else(|| BitumError::Config("remote-db needs a remote: pass --bucket or --remote-dir".into()))?;
                take(&RemoteIndexSource::new(
                    remote.store,
                    remote.layout.clone(),
                    self.flags,
                    self.exclude.clone(),
                ))
            }
        }
    }
}

fn take(source: &dyn SnapshotSource) -> Result<Snapshot> {
    let snapshot = timed("snapshot", || source.snapshot())?;
    info!(source = %source.describe(), entries = snapshot.len(), "snapshot taken");
    Ok(snapshot)
}

/// Compares two named sources and prints the result. Returns the diff as
/// shown (collapsed when the view asks for it).
pub fn integrity(sources: &SourceSet<'_>, a: SourceKind, b: SourceKind, view: DiffView) -> Result<TreeDiff> {
    let snap_a = sources.snapshot(a)?;
    let snap_b = sources.snapshot(b)?;
    let diff = TreeDiff::compute(&snap_a, &snap_b);
    let diff = if view.dir_norecurse {
        diff.collapse_missing_dirs(&snap_a, &snap_b)
    } else {
        diff
    };
    present_diff(&diff, a.as_str(), b.as_str(), view)?;
    Ok(diff)
}

/// The local index against the files on disk.
pub fn diff_local(sources: &SourceSet<'_>, view: DiffView) -> Result<TreeDiff> {
    integrity(sources, SourceKind::LocalDb, SourceKind::LocalFiles, view)
}

/// Prints the outcome line, the per-class totals and, on request, the
/// per-path listing.
pub fn present_diff(diff: &TreeDiff, a_label: &str, b_label: &str, view: DiffView) -> Result<()> {
    if view.json {
        println!("{}", serde_json::to_string_pretty(&diff.report(a_label, b_label))?);
        return Ok(());
    }
    match diff.outcome() {
        DiffOutcome::BothEmpty => println!("Both {a_label} and {b_label} are empty"),
        DiffOutcome::Unchanged => println!("No changes between {a_label} and {b_label}"),
        DiffOutcome::Changed => {
            println!("{} entries differ between {a_label} and {b_label}", diff.len());
            print!("{}", diff.summary().render(a_label, b_label));
            if view.list {
                print!("{}", diff.listing());
            }
        }
    }
    Ok(())
}

/// Opens the workspace index, refusing to create a new empty one.
pub(crate) fn open_existing_index(workspace: &Workspace) -> Result<IndexStore> {
    let path = workspace.index_path();
    if !path.is_file() {
        return Err(BitumError::MissingRoot(path));
    }
    IndexStore::open(&path)
}
