//! # Blob Planning
//!
//! Assigns files to blobs. Two policies exist:
//!
//! - [`SizeTierPolicy`] sorts every file into one of a fixed ladder of size
//!   classes, one blob per class. Blob ids are stable (`tier-1KiB`, ...), which
//!   is what a from-scratch rebuild wants.
//! - [`GreedyCapacityPolicy`] fills blobs in scan order up to a capacity and
//!   names each one randomly, avoiding ids that already exist. Used when new
//!   files are packed next to an existing index.
//!
//! Files whose size is unknown are never planned.

use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::common::FileEntry;
use crate::format::human_size;

/// Default capacity of a greedily packed blob.
pub const DEFAULT_BLOB_CAPACITY: u64 = 100 * 1024 * 1024; // 100 MiB

/// Length of a randomly generated blob id.
pub const BLOB_ID_LEN: usize = 8;

/// One planned blob: its id and the files that go into it, in write order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobAssignment {
    pub blob_id: String,
    pub entries: Vec<FileEntry>,
    pub cumulative_size: u64,
}

impl BlobAssignment {
    pub fn new(blob_id: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.into(),
            entries: Vec::new(),
            cumulative_size: 0,
        }
    }

    /// Appends a sized entry. Entries without a size are refused.
    pub fn push(&mut self, entry: FileEntry) -> bool {
        match entry.size {
            Some(size) => {
                self.cumulative_size += size;
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// One-line summary as printed before packing.
    pub fn summary(&self) -> String {
        format!("{}: {} files ({})", self.blob_id, self.entries.len(), human_size(self.cumulative_size))
    }
}

/// A blob assignment strategy.
pub trait BucketPolicy {
    /// Plans `entries` into blobs. Every entry with a size lands in exactly
    /// one returned assignment; entries without one are dropped. Empty
    /// assignments are never returned.
    fn plan(&self, entries: &[FileEntry]) -> Vec<BlobAssignment>;
}

/// One rung of the size-class ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTier {
    pub blob_id: String,
    /// Largest file size (inclusive) accepted by this tier.
    pub max_size: u64,
}

/// Static size-class assignment.
#[derive(Debug, Clone)]
pub struct SizeTierPolicy {
    tiers: Vec<SizeTier>,
}

impl SizeTierPolicy {
    /// Tiers must be ascending by `max_size`. A final catch-all tier is
    /// appended when the last one does not accept `u64::MAX`.
    pub fn new(mut tiers: Vec<SizeTier>) -> Self {
        tiers.sort_by_key(|t| t.max_size);
        if tiers.last().map_or(true, |t| t.max_size != u64::MAX) {
            tiers.push(SizeTier {
                blob_id: "tier-rest".into(),
                max_size: u64::MAX,
            });
        }
        Self { tiers }
    }

    pub fn tiers(&self) -> &[SizeTier] {
        &self.tiers
    }

    fn tier_for(&self, size: u64) -> usize {
        // The catch-all tier guarantees a match.
        self.tiers
            .iter()
            .position(|t| size <= t.max_size)
            .unwrap_or(self.tiers.len() - 1)
    }
}

impl Default for SizeTierPolicy {
    /// 256 B, 1 KiB, 4 KiB, ... 4 MiB (powers of four), then everything else.
    fn default() -> Self {
        let tiers = (0..8)
            .map(|i| 256u64 << (2 * i))
            .map(|max_size| SizeTier {
                blob_id: format!("tier-{}", tier_label(max_size)),
                max_size,
            })
            .collect();
        Self::new(tiers)
    }
}

fn tier_label(size: u64) -> String {
    match size {
        s if s >= 1 << 20 && s % (1 << 20) == 0 => format!("{}MiB", s >> 20),
        s if s >= 1 << 10 && s % (1 << 10) == 0 => format!("{}KiB", s >> 10),
        s => format!("{s}B"),
    }
}

impl BucketPolicy for SizeTierPolicy {
    fn plan(&self, entries: &[FileEntry]) -> Vec<BlobAssignment> {
        let mut slots: Vec<BlobAssignment> = self.tiers.iter().map(|t| BlobAssignment::new(t.blob_id.clone())).collect();
        for entry in entries {
            if let Some(size) = entry.size {
                slots[self.tier_for(size)].push(entry.clone());
            }
        }
        slots.into_iter().filter(|s| !s.is_empty()).collect()
    }
}

/// Capacity-bounded greedy packing with random blob ids.
#[derive(Debug, Clone)]
pub struct GreedyCapacityPolicy {
    capacity: u64,
    reserved: HashSet<String>,
}

impl GreedyCapacityPolicy {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            reserved: HashSet::new(),
        }
    }

    /// Ids that generated blob names must not collide with.
    pub fn reserve<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(ids.into_iter().map(Into::into));
        self
    }

    fn fresh_id(&self, taken: &mut HashSet<String>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (&mut rng).sample_iter(&Alphanumeric).take(BLOB_ID_LEN).map(char::from).collect();
            if !self.reserved.contains(&id) && taken.insert(id.clone()) {
                return id;
            }
        }
    }
}

impl Default for GreedyCapacityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_CAPACITY)
    }
}

impl BucketPolicy for GreedyCapacityPolicy {
    fn plan(&self, entries: &[FileEntry]) -> Vec<BlobAssignment> {
        let mut taken = HashSet::new();
        let mut sealed = Vec::new();
        let mut current = BlobAssignment::new(self.fresh_id(&mut taken));

        for entry in entries {
            let Some(size) = entry.size else { continue };
            // A file larger than the capacity still gets a blob of its own.
            if !current.is_empty() && current.cumulative_size + size > self.capacity {
                let next = BlobAssignment::new(self.fresh_id(&mut taken));
                sealed.push(std::mem::replace(&mut current, next));
            }
            current.push(entry.clone());
        }
        if !current.is_empty() {
            sealed.push(current);
        }
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(path: &str, size: u64) -> FileEntry {
        FileEntry::file(path, Some(size), None, None)
    }

    fn assert_additive(plan: &[BlobAssignment]) {
        for a in plan {
            let sum: u64 = a.entries.iter().map(|e| e.size.unwrap()).sum();
            assert_eq!(a.cumulative_size, sum, "{}", a.blob_id);
        }
    }

    #[test]
    fn default_tiers_ladder() {
        let p = SizeTierPolicy::default();
        let ids: Vec<_> = p.tiers().iter().map(|t| t.blob_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "tier-256B", "tier-1KiB", "tier-4KiB", "tier-16KiB", "tier-64KiB", "tier-256KiB", "tier-1MiB",
                "tier-4MiB", "tier-rest"
            ]
        );
    }

    #[test]
    fn size_tiers_pick_first_tier_that_fits() {
        let p = SizeTierPolicy::default();
        let files = vec![sized("/a", 0), sized("/b", 256), sized("/c", 257), sized("/d", 1 << 40), FileEntry::file("/e", None, None, None)];
        let plan = p.plan(&files);
        let by_id = |id: &str| plan.iter().find(|a| a.blob_id == id).unwrap();
        assert_eq!(by_id("tier-256B").len(), 2);
        assert_eq!(by_id("tier-1KiB").entries[0].path, "/c");
        assert_eq!(by_id("tier-rest").entries[0].path, "/d");
        assert_eq!(plan.iter().map(BlobAssignment::len).sum::<usize>(), 4);
        assert_additive(&plan);
    }

    #[test]
    fn greedy_seals_before_overflow_and_keeps_order() {
        let p = GreedyCapacityPolicy::new(100);
        let files = vec![sized("/a", 60), sized("/b", 40), sized("/c", 1), sized("/d", 250), sized("/e", 5)];
        let plan = p.plan(&files);
        let groups: Vec<Vec<&str>> = plan.iter().map(|a| a.entries.iter().map(|e| e.path.as_str()).collect()).collect();
        assert_eq!(groups, vec![vec!["/a", "/b"], vec!["/c"], vec!["/d"], vec!["/e"]]);
        assert_additive(&plan);

        let ids: HashSet<_> = plan.iter().map(|a| a.blob_id.clone()).collect();
        assert_eq!(ids.len(), plan.len());
        assert!(plan.iter().all(|a| a.blob_id.len() == BLOB_ID_LEN));
    }

    #[test]
    fn greedy_skips_unsized_and_returns_nothing_for_empty_input() {
        let p = GreedyCapacityPolicy::default();
        assert!(p.plan(&[]).is_empty());
        assert!(p.plan(&[FileEntry::file("/x", None, None, None)]).is_empty());
    }

    #[test]
    fn greedy_avoids_reserved_ids() {
        let reserved: Vec<String> = (0..50).map(|i| format!("r{i}")).collect();
        let p = GreedyCapacityPolicy::new(1).reserve(reserved.clone());
        let files: Vec<_> = (0..50).map(|i| sized(&format!("/{i}"), 1)).collect();
        let plan = p.plan(&files);
        assert_eq!(plan.len(), 50);
        assert!(plan.iter().all(|a| !reserved.contains(&a.blob_id)));
    }
}
