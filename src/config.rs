//! Workspace and remote-storage configuration.
//!
//! The workspace is the local directory holding the `.bitumen` blobs and the
//! index file. The remote is either an S3-compatible bucket or, for offline
//! use and tests, a plain directory.

use std::path::{Path, PathBuf};

use crate::archive::blob_file_name;
use crate::error::{BitumError, Result};
use crate::index::INDEX_FILENAME;
use crate::storage::{LocalObjectStore, ObjectStore, RemoteLayout, S3ObjectStore};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Local directory holding blobs and the index.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILENAME)
    }

    pub fn blob_path(&self, blob_id: &str) -> PathBuf {
        self.root.join(blob_file_name(blob_id))
    }

    pub fn ensure_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| BitumError::io(e, &self.root))
    }
}

/// Where the remote copy lives and how to reach it.
#[derive(Debug, Clone, Default)]
pub struct RemoteConfig {
    pub bucket: Option<String>,
    pub prefix: String,
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use this directory as the object store instead of a bucket.
    pub remote_dir: Option<PathBuf>,
}

impl RemoteConfig {
    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout::new(&self.prefix)
    }

    /// Endpoint URL with a scheme. Bare host names (as printed by most
    /// providers) get `https://`; without an endpoint AWS is assumed.
    pub fn endpoint(&self) -> String {
        match self.endpoint_url.as_deref() {
            Some(url) if url.contains("://") => url.to_string(),
            Some(host) => format!("https://{host}"),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }

    /// Access key pair from the options, `BITUM_*` or `AWS_*` variables.
    pub fn credentials(&self) -> Result<(String, String)> {
        let key_id = value_from_opt_or_env(self.access_key_id.clone(), &["BITUM_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]);
        let secret = value_from_opt_or_env(
            self.secret_access_key.clone(),
            &["BITUM_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"],
        );
        match (key_id, secret) {
            (Some(k), Some(s)) => Ok((k, s)),
            _ => Err(BitumError::Config(
                "S3 credentials missing: set --access-key-id/--secret-access-key or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY".into(),
            )),
        }
    }

    /// Builds the configured object store.
    pub fn open_store(&self) -> Result<Box<dyn ObjectStore>> {
        if let Some(dir) = &self.remote_dir {
            return Ok(Box::new(LocalObjectStore::new(dir.clone())?));
        }
        match &self.bucket {
            Some(bucket) => Ok(Box::new(S3ObjectStore::new(self, bucket)?)),
            None => Err(BitumError::Config("no remote configured: pass --bucket or --remote-dir".into())),
        }
    }
}

/// Gets a value from the command-line option or the first set environment
/// variable of `vars`, in that priority.
pub fn value_from_opt_or_env(opt: Option<String>, vars: &[&str]) -> Option<String> {
    if let Some(v) = opt.filter(|v| !v.is_empty()) {
        return Some(v);
    }
    vars.iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_a_scheme() {
        let mut cfg = RemoteConfig {
            region: "eu-central-003".into(),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint(), "https://s3.eu-central-003.amazonaws.com");
        cfg.endpoint_url = Some("s3.eu-central-003.backblazeb2.com".into());
        assert_eq!(cfg.endpoint(), "https://s3.eu-central-003.backblazeb2.com");
        cfg.endpoint_url = Some("http://localhost:9000".into());
        assert_eq!(cfg.endpoint(), "http://localhost:9000");
    }

    #[test]
    fn option_wins_over_environment() {
        assert_eq!(value_from_opt_or_env(Some("cli".into()), &["PATH"]), Some("cli".into()));
        assert_eq!(value_from_opt_or_env(None, &["BITUM_TEST_SURELY_UNSET_VAR"]), None);
    }

    #[test]
    fn workspace_paths() {
        let ws = Workspace::new("/w");
        assert_eq!(ws.index_path(), PathBuf::from("/w/bitumen.sqlite3"));
        assert_eq!(ws.blob_path("abc"), PathBuf::from("/w/abc.bitumen"));
    }

    #[test]
    fn missing_remote_is_a_config_error() {
        assert!(matches!(RemoteConfig::default().open_store(), Err(BitumError::Config(_))));
    }
}
