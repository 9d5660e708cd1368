use bitum::common::ScanFlags;
use bitum::config::Workspace;
use bitum::diff::{DiffOutcome, TreeDiff};
use bitum::extract;
use bitum::index::IndexStore;
use bitum::scan::TreeScanner;
use bitum::snapshot::{DiskSource, IndexSource, SnapshotSource};
use bitum::sync;
use rand::{thread_rng, Rng};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn write_random_file(p: &Path, sz: usize) {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = File::create(p).unwrap();
    let mut buf = vec![0u8; sz];
    thread_rng().fill(&mut buf[..]);
    f.write_all(&buf).unwrap();
}

/// A tree with files spread over several size tiers.
fn random_tree(root: &Path) -> Vec<String> {
    let mut rng = thread_rng();
    let mut names = Vec::new();
    for i in 0..40 {
        let size = match i % 4 {
            0 => rng.gen_range(0..256),
            1 => rng.gen_range(257..4096),
            2 => rng.gen_range(4097..70_000),
            _ => rng.gen_range(0..10),
        };
        let rel = format!("d{}/f{i}.bin", i % 5);
        write_random_file(&root.join(&rel), size);
        names.push(rel);
    }
    names
}

#[test]
fn build_then_extract_is_byte_identical() {
    let src = tempdir().unwrap();
    let names = random_tree(src.path());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(src.path().join(&names[0]), fs::Permissions::from_mode(0o700)).unwrap();
        fs::set_permissions(src.path().join(&names[1]), fs::Permissions::from_mode(0o604)).unwrap();
    }

    let ws_dir = tempdir().unwrap();
    let ws = Workspace::new(ws_dir.path());
    let report = sync::build(&ws, src.path(), ScanFlags::all(), None, false).unwrap();
    assert_eq!(report.records, names.len());

    let out = tempdir().unwrap();
    let index = IndexStore::open(&ws.index_path()).unwrap();
    let summary = extract::extract_all(&ws, &index, out.path()).unwrap();
    assert_eq!(summary.files, names.len());

    for rel in &names {
        assert_eq!(fs::read(out.path().join(rel)).unwrap(), fs::read(src.path().join(rel)).unwrap(), "{rel}");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o7777;
            assert_eq!(mode(&out.path().join(rel)), mode(&src.path().join(rel)), "{rel}");
        }
    }

    // The extracted tree is indistinguishable from the source by content.
    let a = DiskSource::new(TreeScanner::new(src.path())).snapshot().unwrap();
    let b = DiskSource::new(TreeScanner::new(out.path())).snapshot().unwrap();
    assert_eq!(TreeDiff::compute(&a, &b).outcome(), DiffOutcome::Unchanged);
}

#[test]
fn every_blob_is_tiled_by_its_records() {
    let src = tempdir().unwrap();
    random_tree(src.path());
    let ws_dir = tempdir().unwrap();
    let ws = Workspace::new(ws_dir.path());
    sync::build(&ws, src.path(), ScanFlags::all(), None, false).unwrap();

    let index = IndexStore::open(&ws.index_path()).unwrap();
    let mut by_blob: BTreeMap<String, Vec<(u64, u64)>> = BTreeMap::new();
    for r in index.all_records().unwrap() {
        by_blob.entry(r.blob_id).or_default().push((r.byte_offset, r.size));
    }
    assert!(!by_blob.is_empty());
    for (blob, spans) in by_blob {
        let mut cursor = 0;
        for (offset, size) in spans {
            assert_eq!(offset, cursor, "gap or overlap in {blob}");
            cursor += size;
        }
        assert_eq!(fs::metadata(ws.blob_path(&blob)).unwrap().len(), cursor, "{blob}");
    }
}

#[test]
fn random_access_matches_sequential_extraction() {
    let src = tempdir().unwrap();
    let names = random_tree(src.path());
    let ws_dir = tempdir().unwrap();
    let ws = Workspace::new(ws_dir.path());
    sync::build(&ws, src.path(), ScanFlags::all(), None, false).unwrap();
    let index = IndexStore::open(&ws.index_path()).unwrap();

    let out = tempdir().unwrap();
    for rel in names.iter().step_by(7) {
        let record = index.get(&format!("/{rel}")).unwrap().unwrap();
        let dest = out.path().join(rel.replace('/', "_"));
        extract::extract_single(&record, &ws.blob_path(&record.blob_id), &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), fs::read(src.path().join(rel)).unwrap(), "{rel}");
    }
}

#[test]
fn diff_properties_hold_on_real_trees() {
    let left = tempdir().unwrap();
    let right = tempdir().unwrap();
    write_random_file(&left.path().join("same"), 10);
    fs::copy(left.path().join("same"), right.path().join("same")).unwrap();
    write_random_file(&left.path().join("only-left/x"), 3);
    write_random_file(&right.path().join("only-right"), 3);
    write_random_file(&left.path().join("resized"), 3);
    write_random_file(&right.path().join("resized"), 4);

    let snap = |root: &Path| DiskSource::new(TreeScanner::new(root)).snapshot().unwrap();
    let (a, b) = (snap(left.path()), snap(right.path()));

    assert!(TreeDiff::compute(&a, &a).is_empty());
    let ab = TreeDiff::compute(&a, &b);
    let ba = TreeDiff::compute(&b, &a);
    assert_eq!(ab.paths(), ba.paths());
    assert_eq!(ab.paths().into_iter().collect::<Vec<_>>(), vec!["/only-left/x", "/only-right", "/resized"]);
}

#[test]
fn index_snapshot_matches_the_scan_it_was_built_from() {
    let src = tempdir().unwrap();
    random_tree(src.path());
    let ws_dir = tempdir().unwrap();
    let ws = Workspace::new(ws_dir.path());
    let flags = ScanFlags::from_skips(false, true, false);
    sync::build(&ws, src.path(), flags, None, false).unwrap();

    let index = IndexStore::open(&ws.index_path()).unwrap();
    let from_index = IndexSource::new(&index, flags, None).snapshot().unwrap();
    let from_disk = DiskSource::new(TreeScanner::new(src.path()).flags(flags)).snapshot().unwrap();
    assert_eq!(TreeDiff::compute(&from_index, &from_disk).outcome(), DiffOutcome::Unchanged);
}
