//! # Tree Diff
//!
//! Compares two [`Snapshot`]s. The symmetric difference of the two entry
//! sets is reduced to one [`Change`] per path, classified by the first
//! matching rule of:
//!
//! 1. only in A
//! 2. only in B
//! 3. type changed (file vs directory)
//! 4. size changed
//! 5. hash changed
//! 6. permissions changed
//!
//! so a file whose size and mode both changed shows up once, as a size
//! change. Changes are ordered by path, with directories compared as if
//! they ended in `/`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::common::{FileEntry, PATH_SEP};
use crate::format::human_size;
use crate::snapshot::Snapshot;

/// Classification of one differing path.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    OnlyInA,
    OnlyInB,
    TypeChanged,
    SizeChanged,
    HashChanged,
    PermsChanged,
}

impl ChangeKind {
    /// All kinds, in classification priority order.
    pub const ALL: [ChangeKind; 6] = [
        ChangeKind::OnlyInA,
        ChangeKind::OnlyInB,
        ChangeKind::TypeChanged,
        ChangeKind::SizeChanged,
        ChangeKind::HashChanged,
        ChangeKind::PermsChanged,
    ];

    /// One-letter marker used in listings.
    pub fn marker(&self) -> char {
        match self {
            ChangeKind::OnlyInA => '-',
            ChangeKind::OnlyInB => '+',
            ChangeKind::TypeChanged => 'T',
            ChangeKind::SizeChanged => 'S',
            ChangeKind::HashChanged => 'H',
            ChangeKind::PermsChanged => 'P',
        }
    }

    fn describe(&self, a: &str, b: &str) -> String {
        match self {
            ChangeKind::OnlyInA => format!("only in {a}"),
            ChangeKind::OnlyInB => format!("only in {b}"),
            ChangeKind::TypeChanged => "type changed".into(),
            ChangeKind::SizeChanged => "size changed".into(),
            ChangeKind::HashChanged => "content changed".into(),
            ChangeKind::PermsChanged => "permissions changed".into(),
        }
    }
}

/// One differing path with the entry seen on each side.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    pub a: Option<FileEntry>,
    pub b: Option<FileEntry>,
    /// Bytes affected: the newer size when known, otherwise the older one.
    /// For collapsed directories, the sum over the files they stand for.
    pub bytes: u64,
}

impl Change {
    fn new(path: String, kind: ChangeKind, a: Option<FileEntry>, b: Option<FileEntry>) -> Self {
        let bytes = b
            .as_ref()
            .and_then(|e| e.size)
            .or_else(|| a.as_ref().and_then(|e| e.size))
            .unwrap_or(0);
        Self { path, kind, a, b, bytes }
    }

    /// The entry that represents this change when listing it.
    pub fn entry(&self) -> Option<&FileEntry> {
        self.a.as_ref().or(self.b.as_ref())
    }

    pub fn is_dir(&self) -> bool {
        self.entry().is_some_and(FileEntry::is_dir)
    }

    fn sort_key(&self) -> String {
        self.entry().map(FileEntry::sort_key).unwrap_or_else(|| self.path.clone())
    }

    fn detail(&self) -> String {
        let (a, b) = (self.a.as_ref(), self.b.as_ref());
        match (self.kind, a, b) {
            (ChangeKind::SizeChanged, Some(a), Some(b)) => format!(
                " ({} -> {})",
                a.size.map(human_size).unwrap_or_default(),
                b.size.map(human_size).unwrap_or_default()
            ),
            (ChangeKind::PermsChanged, Some(a), Some(b)) => format!(
                " ({:o} -> {:o})",
                a.perms.unwrap_or_default(),
                b.perms.unwrap_or_default()
            ),
            _ if self.is_dir() => format!("{PATH_SEP}"),
            _ => String::new(),
        }
    }
}

/// How a comparison came out.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffOutcome {
    /// Neither side has any entry.
    BothEmpty,
    /// Both sides have entries and they are identical.
    Unchanged,
    Changed,
}

/// Count and affected bytes of one change class.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassTotals {
    pub count: usize,
    pub bytes: u64,
}

/// Per-class totals of a diff.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    pub classes: BTreeMap<ChangeKind, ClassTotals>,
}

impl DiffSummary {
    pub fn get(&self, kind: ChangeKind) -> ClassTotals {
        self.classes.get(&kind).copied().unwrap_or_default()
    }

    /// One line per non-empty class, e.g. `size changed: 3 files, 1.20 KiB`.
    pub fn render(&self, a_label: &str, b_label: &str) -> String {
        let mut out = String::new();
        for kind in ChangeKind::ALL {
            let t = self.get(kind);
            if t.count == 0 {
                continue;
            }
            let noun = if t.count == 1 { "entry" } else { "entries" };
            let _ = writeln!(
                out,
                "{}: {} {}, {}",
                kind.describe(a_label, b_label),
                t.count,
                noun,
                human_size(t.bytes)
            );
        }
        out
    }
}

/// The classified difference between snapshot A and snapshot B.
#[derive(Debug, Clone)]
pub struct TreeDiff {
    changes: Vec<Change>,
    a_len: usize,
    b_len: usize,
}

impl TreeDiff {
    pub fn compute(a: &Snapshot, b: &Snapshot) -> Self {
        let mut paths = BTreeSet::new();
        for e in a.entries().filter(|e| !b.contains(e)) {
            paths.insert(e.path.as_str());
        }
        for e in b.entries().filter(|e| !a.contains(e)) {
            paths.insert(e.path.as_str());
        }

        let mut changes: Vec<Change> = paths
            .into_iter()
            .filter_map(|path| classify(path, a.get(path), b.get(path)))
            .collect();
        changes.sort_by_cached_key(Change::sort_key);
        debug!(a = a.len(), b = b.len(), changes = changes.len(), "diff computed");

        Self {
            changes,
            a_len: a.len(),
            b_len: b.len(),
        }
    }

    pub fn outcome(&self) -> DiffOutcome {
        if self.a_len == 0 && self.b_len == 0 {
            DiffOutcome::BothEmpty
        } else if self.changes.is_empty() {
            DiffOutcome::Unchanged
        } else {
            DiffOutcome::Changed
        }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.kind == kind)
    }

    pub fn paths(&self) -> BTreeSet<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for c in &self.changes {
            let t = summary.classes.entry(c.kind).or_default();
            t.count += 1;
            t.bytes += c.bytes;
        }
        summary
    }

    /// Replaces one-sided paths by their top-most ancestor directory that
    /// has nothing at all on the other side. Each such directory is reported
    /// once, carrying the summed bytes of the files it stands for.
    pub fn collapse_missing_dirs(mut self, a: &Snapshot, b: &Snapshot) -> Self {
        let dirs_in_a = occupied_dirs(a);
        let dirs_in_b = occupied_dirs(b);

        let mut collapsed: BTreeMap<(String, ChangeKind), Change> = BTreeMap::new();
        let mut kept = Vec::with_capacity(self.changes.len());
        for change in self.changes.drain(..) {
            let other = match change.kind {
                ChangeKind::OnlyInA => &dirs_in_b,
                ChangeKind::OnlyInB => &dirs_in_a,
                _ => {
                    kept.push(change);
                    continue;
                }
            };
            let Some(dir) = ancestors(&change.path).find(|d| !other.contains(*d)) else {
                kept.push(change);
                continue;
            };
            let key = (dir.to_string(), change.kind);
            let slot = collapsed.entry(key).or_insert_with(|| {
                let entry = Some(FileEntry::directory(dir));
                let (ea, eb) = match change.kind {
                    ChangeKind::OnlyInA => (entry, None),
                    _ => (None, entry),
                };
                Change {
                    path: dir.to_string(),
                    kind: change.kind,
                    a: ea,
                    b: eb,
                    bytes: 0,
                }
            });
            slot.bytes += change.bytes;
        }

        kept.extend(collapsed.into_values());
        kept.sort_by_cached_key(Change::sort_key);
        self.changes = kept;
        self
    }

    /// Human-readable listing, one change per line.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for c in &self.changes {
            let _ = writeln!(out, "{} {}{}", c.kind.marker(), c.path, c.detail());
        }
        out
    }

    pub fn report(&self, a_label: &str, b_label: &str) -> DiffReport<'_> {
        DiffReport {
            a: a_label.to_string(),
            b: b_label.to_string(),
            outcome: self.outcome(),
            summary: self.summary(),
            changes: &self.changes,
        }
    }
}

/// Serializable form of a diff, used for `--json` output.
#[derive(Serialize, Debug)]
pub struct DiffReport<'a> {
    pub a: String,
    pub b: String,
    pub outcome: DiffOutcome,
    pub summary: DiffSummary,
    pub changes: &'a [Change],
}

fn classify(path: &str, a: Option<&FileEntry>, b: Option<&FileEntry>) -> Option<Change> {
    let kind = match (a, b) {
        (Some(_), None) => ChangeKind::OnlyInA,
        (None, Some(_)) => ChangeKind::OnlyInB,
        (Some(x), Some(y)) if x.kind != y.kind => ChangeKind::TypeChanged,
        (Some(x), Some(y)) if x.size != y.size => ChangeKind::SizeChanged,
        (Some(x), Some(y)) if x.hash != y.hash => ChangeKind::HashChanged,
        (Some(x), Some(y)) if x.perms != y.perms => ChangeKind::PermsChanged,
        // Only a shadowed duplicate differed; the visible entries agree.
        _ => return None,
    };
    Some(Change::new(path.to_string(), kind, a.cloned(), b.cloned()))
}

/// Proper ancestor directories of `path`, top-most first.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices(PATH_SEP)
        .map(move |(i, _)| &path[..i])
        .filter(|p| !p.is_empty())
}

/// Every directory that contains at least one entry of the snapshot.
fn occupied_dirs(snapshot: &Snapshot) -> HashSet<&str> {
    let mut dirs = HashSet::new();
    for e in snapshot.entries() {
        dirs.extend(ancestors(&e.path));
        if e.is_dir() {
            dirs.insert(e.path.as_str());
        }
    }
    dirs
}
