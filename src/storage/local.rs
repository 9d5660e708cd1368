use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{ByteRange, ObjectReader, ObjectStore};
use crate::error::{BitumError, Result};

/// Object store backed by a local directory. Keys map to files below the
/// root, with `/` separating directories.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Creates the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BitumError::io(e, &root))?;
        Ok(Self { root })
    }

    /// Reject storage keys that could escape the store root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(BitumError::Storage("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(BitumError::Storage(format!("unsafe storage key '{key}'")));
        }
        if Path::new(key).components().any(|c| c == Component::ParentDir) {
            return Err(BitumError::Storage(format!("unsafe storage key: parent traversal '{key}'")));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let dest = self.resolve(key)?;
        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| BitumError::io(e, dir))?;

        // Copy into a sibling temp file, then rename, so readers never see a
        // partial object.
        let mut src = File::open(path).map_err(|e| BitumError::io(e, path))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BitumError::io(e, dir))?;
        let copied = io::copy(&mut src, tmp.as_file_mut()).map_err(|e| BitumError::io(e, path))?;
        tmp.persist(&dest).map_err(|e| BitumError::io(e.error, &dest))?;
        debug!(key, bytes = copied, "stored object");
        Ok(())
    }

    fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<ObjectReader>> {
        let path = self.resolve(key)?;
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BitumError::io(e, path)),
        };
        match range {
            Some(r) => {
                file.seek(SeekFrom::Start(r.offset)).map_err(|e| BitumError::io(e, &path))?;
                Ok(Some(Box::new(file.take(r.length))))
            }
            None => Ok(Some(Box::new(file))),
        }
    }

    fn head(&self, key: &str) -> Result<Option<u64>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(md) if md.is_file() => Ok(Some(md.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BitumError::io(e, path)),
        }
    }

    fn describe(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}
