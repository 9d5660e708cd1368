use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use super::{present_diff, DiffView, Remote};
use crate::common::ScanFlags;
use crate::diff::{ChangeKind, DiffOutcome, TreeDiff};
use crate::error::{BitumError, Result};
use crate::extract::{apply_permissions, fetch_remote_range};
use crate::format::{human_size, timed};
use crate::index::{IndexStore, INDEX_FILENAME};
use crate::scan::{disk_path, require_dir, TreeScanner};
use crate::snapshot::{DiskSource, IndexSource, SnapshotSource};
use crate::storage::download_object;

/// What a download did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub outcome: Option<DiffOutcome>,
    pub files_fetched: usize,
    pub bytes_fetched: u64,
    /// Files whose permissions were reapplied without fetching content.
    pub perms_applied: usize,
    /// Paths present only on disk, left untouched.
    pub local_only: usize,
}

/// Brings `root`, an existing directory, up to date with the remote copy.
/// Remote wins for content and permissions; files that exist only locally
/// are kept.
pub fn download(remote: Remote<'_>, root: &Path, exclude: Option<Regex>, view: DiffView) -> Result<DownloadReport> {
    require_dir(root)?;
    let tmp = tempfile::tempdir()?;
    let index_path = tmp.path().join(INDEX_FILENAME);
    let key = remote.layout.index_key();
    if !timed("fetch index", || download_object(remote.store, &key, &index_path))? {
        return Err(BitumError::ObjectNotFound(remote.store.describe(&key)));
    }
    let index = IndexStore::open(&index_path)?;

    let flags = ScanFlags::all();
    let disk_source = DiskSource::new(TreeScanner::new(root).flags(flags).exclude(exclude.clone()));
    let disk = timed("scan", || disk_source.snapshot())?;
    let backup = IndexSource::new(&index, flags, exclude).snapshot()?;

    let diff = TreeDiff::compute(&disk, &backup);
    present_diff(&diff, "disk", "remote index", view)?;
    let mut report = DownloadReport {
        outcome: Some(diff.outcome()),
        ..Default::default()
    };
    if diff.outcome() != DiffOutcome::Changed {
        return Ok(report);
    }

    let wanted: Vec<&str> = diff
        .changes()
        .iter()
        .filter(|c| c.kind != ChangeKind::OnlyInA)
        .map(|c| c.path.as_str())
        .collect();
    // Resolve every target first so a bad remote path fails before any write.
    let mut targets = HashMap::new();
    for record in index.get_many(&wanted)? {
        let dest = disk_path(root, &record.path)?;
        targets.insert(record.path.clone(), (record, dest));
    }

    for change in diff.changes() {
        let Some((record, dest)) = targets.get(&change.path) else {
            if change.kind == ChangeKind::OnlyInA {
                report.local_only += 1;
            }
            continue;
        };
        match change.kind {
            ChangeKind::OnlyInB | ChangeKind::SizeChanged | ChangeKind::HashChanged => {
                report.bytes_fetched += fetch_remote_range(remote.store, remote.layout, record, dest)?;
                report.files_fetched += 1;
            }
            ChangeKind::PermsChanged => {
                apply_permissions(dest, record.perms)?;
                report.perms_applied += 1;
            }
            ChangeKind::TypeChanged => warn!(path = %change.path, "entry changed type, leaving it alone"),
            ChangeKind::OnlyInA => {}
        }
    }

    println!(
        "Fetched {} files ({}), reapplied permissions on {}",
        report.files_fetched,
        human_size(report.bytes_fetched),
        report.perms_applied
    );
    info!(
        fetched = report.files_fetched,
        bytes = report.bytes_fetched,
        perms = report.perms_applied,
        "download finished"
    );
    Ok(report)
}
