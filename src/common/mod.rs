//! Common types shared by the scanner, the index and the diff engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used in every logical path. Logical paths always start with it.
pub const PATH_SEP: char = '/';

/// What a tree entry is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    File,
    Directory,
}

/// BLAKE3 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(ContentHash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(h: blake3::Hash) -> Self {
        ContentHash(*h.as_bytes())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        blake3::Hash::from_hex(&s)
            .map(ContentHash::from)
            .map_err(serde::de::Error::custom)
    }
}

/// A single entry of a tree snapshot.
///
/// Each optional field is `None` when the matching [`ScanFlags`] capability
/// was switched off, so two snapshots taken with the same flags compare
/// field by field. Directories never carry a hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    /// Logical path relative to the scanned root, always starting with `/`.
    pub path: String,
    pub kind: EntryKind,
    pub hash: Option<ContentHash>,
    pub size: Option<u64>,
    /// Unix permission bits (`mode & 0o7777`).
    pub perms: Option<u32>,
}

impl FileEntry {
    pub fn file(path: impl Into<String>, size: Option<u64>, hash: Option<ContentHash>, perms: Option<u32>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            hash,
            size,
            perms,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            hash: None,
            size: None,
            perms: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Key used to order entries for presentation: directories get a trailing
    /// separator so they sort right before their children.
    pub fn sort_key(&self) -> String {
        match self.kind {
            EntryKind::Directory => format!("{}{}", self.path, PATH_SEP),
            EntryKind::File => self.path.clone(),
        }
    }
}

/// Which properties a snapshot producer collects besides presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFlags {
    pub sizes: bool,
    pub perms: bool,
    pub hashes: bool,
}

impl ScanFlags {
    pub const fn all() -> Self {
        Self {
            sizes: true,
            perms: true,
            hashes: true,
        }
    }

    /// Builds flags from the `--skip-*` switches of the command line.
    pub fn from_skips(skip_sizes: bool, skip_perms: bool, skip_hashes: bool) -> Self {
        Self {
            sizes: !skip_sizes,
            perms: !skip_perms,
            hashes: !skip_hashes,
        }
    }
}

impl Default for ScanFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Turns a user supplied path (`a/b.txt`, `/a/b.txt`, `./a/b.txt`) into the
/// logical form stored in snapshots and the index.
pub fn normalize_logical_path(path: &str) -> String {
    let s = path.replace('\\', "/");
    let trimmed = s.strip_prefix("./").unwrap_or(&s);
    let mut out = String::with_capacity(trimmed.len() + 1);
    for part in trimmed.split(PATH_SEP).filter(|p| !p.is_empty() && *p != ".") {
        out.push(PATH_SEP);
        out.push_str(part);
    }
    if out.is_empty() {
        out.push(PATH_SEP);
    }
    out
}
