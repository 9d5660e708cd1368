use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{info, warn};

use super::{present_diff, DiffView, Remote};
use crate::archive::{write_blob, ContentSource, DiskContent};
use crate::common::{FileEntry, ScanFlags};
use crate::config::Workspace;
use crate::diff::{ChangeKind, DiffOutcome, TreeDiff};
use crate::error::{BitumError, Result};
use crate::format::{human_size, timed};
use crate::index::{IndexRecord, IndexStore};
use crate::planner::{BlobAssignment, BucketPolicy, GreedyCapacityPolicy, DEFAULT_BLOB_CAPACITY};
use crate::scan::{require_dir, TreeScanner};
use crate::snapshot::{IndexSource, Snapshot, SnapshotSource};
use crate::storage::{download_object, ByteRange};

/// Knobs of the upload flow.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Directory whose files are backed up.
    pub root: PathBuf,
    pub exclude: Option<Regex>,
    /// Start from an empty index without asking when the remote has none.
    pub create: bool,
    /// Capacity of newly packed blobs.
    pub capacity: u64,
    pub view: DiffView,
}

impl UploadOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: None,
            create: false,
            capacity: DEFAULT_BLOB_CAPACITY,
            view: DiffView::default(),
        }
    }
}

/// What an upload did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub outcome: DiffOutcome,
    /// Existing blobs rewritten because a member changed.
    pub rewritten_blobs: Vec<String>,
    /// Blobs created for new files.
    pub new_blobs: Vec<String>,
    pub files_packed: usize,
    pub bytes_packed: u64,
    /// Records whose permissions were updated without a repack.
    pub perms_updated: usize,
}

impl UploadReport {
    fn nothing_to_do(outcome: DiffOutcome) -> Self {
        Self {
            outcome,
            rewritten_blobs: Vec::new(),
            new_blobs: Vec::new(),
            files_packed: 0,
            bytes_packed: 0,
            perms_updated: 0,
        }
    }
}

/// Uploads the changes under `opts.root` to the remote.
///
/// `confirm` is asked before starting from an empty index when the remote
/// has none and `opts.create` is not set.
pub fn upload(
    workspace: &Workspace,
    remote: Remote<'_>,
    opts: &UploadOptions,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<UploadReport> {
    // The baseline replaces the local index, so nothing may run before the
    // root is known to exist.
    require_dir(&opts.root)?;
    workspace.ensure_exists()?;
    let mut index = fetch_baseline(workspace, remote, opts.create, confirm)?;

    let flags = ScanFlags::all();
    let scanned = timed("scan", || {
        TreeScanner::new(&opts.root)
            .flags(flags)
            .exclude(opts.exclude.clone())
            .scan()
    })?;
    let disk = Snapshot::from_entries(scanned.iter().cloned());
    let baseline = IndexSource::new(&index, flags, opts.exclude.clone()).snapshot()?;

    let diff = TreeDiff::compute(&baseline, &disk);
    present_diff(&diff, "remote index", "disk", opts.view)?;
    match diff.outcome() {
        DiffOutcome::BothEmpty | DiffOutcome::Unchanged => return Ok(UploadReport::nothing_to_do(diff.outcome())),
        DiffOutcome::Changed => {}
    }

    let new_paths: HashSet<&str> = diff.of_kind(ChangeKind::OnlyInB).map(|c| c.path.as_str()).collect();
    let changed_paths: Vec<&str> = diff
        .changes()
        .iter()
        .filter(|c| matches!(c.kind, ChangeKind::SizeChanged | ChangeKind::HashChanged))
        .map(|c| c.path.as_str())
        .collect();
    for c in diff.of_kind(ChangeKind::TypeChanged) {
        warn!(path = %c.path, "entry changed type, leaving it alone");
    }

    let affected: BTreeSet<String> = index.get_many(&changed_paths)?.into_iter().map(|r| r.blob_id).collect();

    let mut report = UploadReport::nothing_to_do(DiffOutcome::Changed);

    // Rewrite every blob that holds a changed file.
    for blob_id in &affected {
        let old = index.records_for_blob(blob_id)?;
        let (plan, source) = plan_rewrite(blob_id, &old, &disk, &opts.root, remote);
        println!("{} (rewrite)", plan.summary());
        let records = write_blob(workspace.root(), &plan, &source)?;
        index.upsert(&records)?;
        report.files_packed += records.len();
        report.bytes_packed += plan.cumulative_size;
        report.rewritten_blobs.push(blob_id.clone());
    }

    // Permission drift alone only touches the index.
    let perms_paths: Vec<&str> = diff.of_kind(ChangeKind::PermsChanged).map(|c| c.path.as_str()).collect();
    let mut perms_records = Vec::new();
    for mut record in index.get_many(&perms_paths)? {
        if affected.contains(&record.blob_id) {
            continue;
        }
        record.perms = disk.get(&record.path).and_then(|e| e.perms);
        perms_records.push(record);
    }
    index.upsert(&perms_records)?;
    report.perms_updated = perms_records.len();

    // New files, in scan order, into fresh blobs.
    let new_files: Vec<FileEntry> = scanned
        .into_iter()
        .filter(|e| new_paths.contains(e.path.as_str()))
        .collect();
    let policy = GreedyCapacityPolicy::new(opts.capacity).reserve(index.blob_ids()?);
    let plan = timed("plan", || policy.plan(&new_files));
    let content = DiskContent::new(&opts.root);
    for blob in &plan {
        println!("{}", blob.summary());
        let records = write_blob(workspace.root(), blob, &content)?;
        index.upsert(&records)?;
        report.files_packed += records.len();
        report.bytes_packed += blob.cumulative_size;
        report.new_blobs.push(blob.blob_id.clone());
    }
    println!("Total: {} files ({})", report.files_packed, human_size(report.bytes_packed));
    drop(index);

    for blob_id in report.rewritten_blobs.iter().chain(&report.new_blobs) {
        put(remote, &workspace.blob_path(blob_id), &remote.layout.blob_key(blob_id))?;
    }
    put(remote, &workspace.index_path(), &remote.layout.index_key())?;

    info!(
        rewritten = report.rewritten_blobs.len(),
        created = report.new_blobs.len(),
        files = report.files_packed,
        "upload finished"
    );
    Ok(report)
}

/// Makes the workspace index a copy of the remote one, or an empty index
/// when the remote has none and the operator agrees.
fn fetch_baseline(
    workspace: &Workspace,
    remote: Remote<'_>,
    create: bool,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Result<IndexStore> {
    let key = remote.layout.index_key();
    let path = workspace.index_path();
    if download_object(remote.store, &key, &path)? {
        info!(from = %remote.store.describe(&key), "using remote index as baseline");
        return IndexStore::open(&path);
    }

    let question = format!(
        "No bitum index was found at \"{}\" -- do you want to continue?",
        remote.store.describe(&key)
    );
    if !create && !confirm(&question) {
        return Err(BitumError::Aborted);
    }
    if path.exists() {
        warn!(path = %path.display(), "remote has no index, discarding the local one");
        std::fs::remove_file(&path).map_err(|e| BitumError::io(e, &path))?;
    }
    IndexStore::open(&path)
}

/// Plans the rewrite of one blob. Members still on disk are repacked from
/// disk with their current properties; members that are gone keep their old
/// bytes, read back from the remote blob.
fn plan_rewrite<'a>(
    blob_id: &str,
    old: &[IndexRecord],
    disk: &'a Snapshot,
    root: &'a Path,
    remote: Remote<'a>,
) -> (BlobAssignment, RewriteContent<'a>) {
    let mut plan = BlobAssignment::new(blob_id);
    let mut carried = HashMap::new();
    for record in old {
        match disk.get(&record.path) {
            Some(entry) if !entry.is_dir() && entry.size.is_some() => {
                plan.push(entry.clone());
            }
            _ => {
                plan.push(record.to_entry());
                carried.insert(record.path.clone(), record.clone());
            }
        }
    }
    if !carried.is_empty() {
        info!(blob = blob_id, files = carried.len(), "carrying over members missing from disk");
    }
    let source = RewriteContent {
        disk: DiskContent::new(root),
        carried,
        remote,
    };
    (plan, source)
}

/// Content of a rewritten blob: disk files, plus ranged reads from the
/// previous remote version for members that are no longer on disk.
struct RewriteContent<'a> {
    disk: DiskContent<'a>,
    carried: HashMap<String, IndexRecord>,
    remote: Remote<'a>,
}

impl ContentSource for RewriteContent<'_> {
    fn open(&self, entry: &FileEntry) -> Result<Box<dyn Read + '_>> {
        let Some(record) = self.carried.get(&entry.path) else {
            return self.disk.open(entry);
        };
        if record.size == 0 {
            return Ok(Box::new(io::empty()));
        }
        let key = self.remote.layout.blob_key(&record.blob_id);
        let body = self
            .remote
            .store
            .get(&key, Some(ByteRange::new(record.byte_offset, record.size)))?
            .ok_or_else(|| BitumError::ObjectNotFound(self.remote.store.describe(&key)))?;
        Ok(Box::new(body.take(record.size)))
    }
}

fn put(remote: Remote<'_>, path: &Path, key: &str) -> Result<()> {
    timed("upload", || {
        info!(to = %remote.store.describe(key), "uploading");
        remote.store.put_file(key, path)
    })
}
