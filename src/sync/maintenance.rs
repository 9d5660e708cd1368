//! Whole-archive operations: rebuild from scratch, bulk transfer, size
//! checks and local extraction.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{info, warn};

use super::{open_existing_index, Remote};
use crate::archive::{blob_file_name, write_blob, DiskContent};
use crate::common::{normalize_logical_path, ScanFlags, PATH_SEP};
use crate::config::Workspace;
use crate::error::{BitumError, Result};
use crate::extract::{self, ExtractSummary};
use crate::format::{human_size, timed};
use crate::index::{IndexStore, INDEX_FILENAME};
use crate::planner::{BlobAssignment, BucketPolicy, SizeTierPolicy};
use crate::scan::TreeScanner;
use crate::storage::download_object;

/// Result of a from-scratch build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub plan: Vec<BlobAssignment>,
    pub files: usize,
    pub bytes: u64,
    /// Number of index records written; zero on a dry run.
    pub records: usize,
}

/// Packs every file under `root` into size-tier blobs in the workspace and
/// replaces the whole index. With `dry_run` only the plan is printed.
pub fn build(workspace: &Workspace, root: &Path, flags: ScanFlags, exclude: Option<Regex>, dry_run: bool) -> Result<BuildReport> {
    let entries = timed("scan", || TreeScanner::new(root).flags(flags).exclude(exclude).scan())?;
    let plan = SizeTierPolicy::default().plan(&entries);
    if !flags.sizes {
        warn!("sizes are skipped, nothing can be packed");
    }

    let files: usize = plan.iter().map(BlobAssignment::len).sum();
    let bytes: u64 = plan.iter().map(|b| b.cumulative_size).sum();
    for blob in &plan {
        println!("{}", blob.summary());
    }
    println!("Total: {files} files ({})", human_size(bytes));

    let mut report = BuildReport {
        plan,
        files,
        bytes,
        records: 0,
    };
    if dry_run {
        return Ok(report);
    }

    workspace.ensure_exists()?;
    let content = DiskContent::new(root);
    let mut records = Vec::with_capacity(files);
    timed("pack", || -> Result<()> {
        for blob in &report.plan {
            records.extend(write_blob(workspace.root(), blob, &content)?);
        }
        Ok(())
    })?;
    let mut index = IndexStore::open(&workspace.index_path())?;
    index.replace_all(&records)?;
    report.records = records.len();
    info!(blobs = report.plan.len(), records = report.records, "index rebuilt");
    Ok(report)
}

/// Local and remote size of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeCheck {
    pub name: String,
    pub local: Option<u64>,
    pub remote: Option<u64>,
}

impl SizeCheck {
    pub fn matches(&self) -> bool {
        self.local.is_some() && self.local == self.remote
    }
}

#[derive(Debug, Clone, Default)]
pub struct SizeCheckReport {
    pub checks: Vec<SizeCheck>,
}

impl SizeCheckReport {
    pub fn mismatches(&self) -> impl Iterator<Item = &SizeCheck> {
        self.checks.iter().filter(|c| !c.matches())
    }

    pub fn is_consistent(&self) -> bool {
        self.mismatches().next().is_none()
    }
}

/// Compares the size of every blob named in the local index, and of the
/// index itself, with the remote object sizes.
pub fn check_sizes(workspace: &Workspace, remote: Remote<'_>) -> Result<SizeCheckReport> {
    let index = open_existing_index(workspace)?;
    let mut objects: Vec<(String, PathBuf, String)> = index
        .blob_ids()?
        .into_iter()
        .map(|id| {
            let path = workspace.blob_path(&id);
            let key = remote.layout.blob_key(&id);
            (blob_file_name(&id), path, key)
        })
        .collect();
    drop(index);
    objects.push((INDEX_FILENAME.to_string(), workspace.index_path(), remote.layout.index_key()));

    let mut report = SizeCheckReport::default();
    for (name, path, key) in objects {
        let local = match fs::metadata(&path) {
            Ok(md) => Some(md.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(BitumError::io(e, path)),
        };
        let remote_size = remote.store.head(&key)?;
        let check = SizeCheck {
            name,
            local,
            remote: remote_size,
        };
        match (check.local, check.remote) {
            (Some(l), Some(r)) if l == r => println!("{}: OK ({})", check.name, human_size(l)),
            (Some(l), Some(r)) => println!("{}: local {} != remote {}", check.name, l, r),
            (None, _) => println!("{}: missing locally", check.name),
            (_, None) => println!("{}: missing remotely", check.name),
        }
        report.checks.push(check);
    }
    Ok(report)
}

/// Uploads every blob named in the local index, then the index. Returns
/// the number of objects uploaded.
pub fn upload_all(workspace: &Workspace, remote: Remote<'_>) -> Result<usize> {
    let index = open_existing_index(workspace)?;
    let ids = index.blob_ids()?;
    drop(index);
    for id in &ids {
        let key = remote.layout.blob_key(id);
        timed("upload", || {
            info!(to = %remote.store.describe(&key), "uploading");
            remote.store.put_file(&key, &workspace.blob_path(id))
        })?;
    }
    remote.store.put_file(&remote.layout.index_key(), &workspace.index_path())?;
    Ok(ids.len() + 1)
}

/// Downloads the remote index into the workspace, then every blob it names.
/// Returns the number of objects downloaded.
pub fn download_all(workspace: &Workspace, remote: Remote<'_>) -> Result<usize> {
    workspace.ensure_exists()?;
    let key = remote.layout.index_key();
    if !download_object(remote.store, &key, &workspace.index_path())? {
        return Err(BitumError::ObjectNotFound(remote.store.describe(&key)));
    }
    let ids = open_existing_index(workspace)?.blob_ids()?;
    for id in &ids {
        let key = remote.layout.blob_key(id);
        let found = timed("download", || {
            info!(from = %remote.store.describe(&key), "downloading");
            download_object(remote.store, &key, &workspace.blob_path(id))
        })?;
        if !found {
            return Err(BitumError::ObjectNotFound(remote.store.describe(&key)));
        }
    }
    Ok(ids.len() + 1)
}

/// Extracts one indexed file from the local blobs into `dest_dir`, named by
/// its base name.
pub fn extract_single_file(workspace: &Workspace, path: &str, dest_dir: &Path) -> Result<PathBuf> {
    let logical = normalize_logical_path(path);
    let index = open_existing_index(workspace)?;
    let record = index.get(&logical)?.ok_or_else(|| BitumError::NotIndexed(logical.clone()))?;
    let name = logical.rsplit(PATH_SEP).next().unwrap_or_default();
    if matches!(name, "" | "." | "..") {
        return Err(BitumError::UnsafePath(logical));
    }
    let dest = dest_dir.join(name);
    extract::extract_single(&record, &workspace.blob_path(&record.blob_id), &dest)?;
    println!("{} -> {}", record.path, dest.display());
    Ok(dest)
}

/// Sequentially extracts every blob of the workspace into `out_dir`.
pub fn extract_all(workspace: &Workspace, out_dir: &Path) -> Result<ExtractSummary> {
    let index = open_existing_index(workspace)?;
    let summary = timed("extract", || extract::extract_all(workspace, &index, out_dir))?;
    println!(
        "Extracted {} files ({}) from {} blobs",
        summary.files,
        human_size(summary.bytes),
        summary.blobs
    );
    Ok(summary)
}
