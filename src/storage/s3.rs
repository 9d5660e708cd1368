use std::fs::File;
use std::path::Path;
use std::time::Duration;

use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use tracing::debug;

use super::{ByteRange, ObjectReader, ObjectStore};
use crate::config::RemoteConfig;
use crate::error::{BitumError, Result};

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// S3-compatible bucket accessed through presigned requests.
pub struct S3ObjectStore {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
}

impl S3ObjectStore {
    pub fn new(cfg: &RemoteConfig, bucket_name: &str) -> Result<Self> {
        let endpoint = cfg.endpoint();
        let base_url = endpoint
            .parse()
            .map_err(|e| BitumError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}")))?;

        let bucket = Bucket::new(base_url, UrlStyle::Path, bucket_name.to_string(), cfg.region.clone())
            .map_err(|e| BitumError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let (key_id, secret) = cfg.credentials()?;
        let credentials = Credentials::new(key_id, secret);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(Self {
            bucket,
            credentials,
            agent,
        })
    }
}

impl ObjectStore for S3ObjectStore {
    fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| BitumError::io(e, path))?;
        let len = file.metadata().map_err(|e| BitumError::io(e, path))?.len();
        let url = self.bucket.put_object(Some(&self.credentials), key).sign(PRESIGN_DURATION);

        // An explicit Content-Length keeps ureq from switching to chunked
        // transfer encoding, which presigned PUTs reject.
        self.agent
            .put(url.as_str())
            .set("Content-Length", &len.to_string())
            .send(file)
            .map_err(|e| BitumError::Storage(format!("S3 PUT {key}: {e}")))?;
        debug!(key, bytes = len, "uploaded object");
        Ok(())
    }

    fn get(&self, key: &str, range: Option<ByteRange>) -> Result<Option<ObjectReader>> {
        let mut action = self.bucket.get_object(Some(&self.credentials), key);
        let range_header = match range {
            Some(r) => {
                let value = r.header_value()?;
                action.headers_mut().insert("Range", value.clone());
                Some(value)
            }
            None => None,
        };
        let url = action.sign(PRESIGN_DURATION);

        let mut req = self.agent.get(url.as_str());
        if let Some(value) = &range_header {
            req = req.set("Range", value);
        }
        match req.call() {
            Ok(resp) => {
                let status = resp.status();
                if range_header.is_some() && status != 206 {
                    return Err(BitumError::Storage(format!(
                        "S3 GET {key}: expected 206 Partial Content for a ranged read, got {status}"
                    )));
                }
                Ok(Some(resp.into_reader()))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(BitumError::Storage(format!("S3 GET {key}: {e}"))),
        }
    }

    fn head(&self, key: &str) -> Result<Option<u64>> {
        let url = self.bucket.head_object(Some(&self.credentials), key).sign(PRESIGN_DURATION);
        match self.agent.head(url.as_str()).call() {
            Ok(resp) => {
                let header = resp
                    .header("Content-Length")
                    .ok_or_else(|| BitumError::Storage(format!("S3 HEAD {key}: response missing Content-Length header")))?;
                let len = header
                    .parse::<u64>()
                    .map_err(|_| BitumError::Storage(format!("S3 HEAD {key}: invalid Content-Length header: {header}")))?;
                Ok(Some(len))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(BitumError::Storage(format!("S3 HEAD {key}: {e}"))),
        }
    }

    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket.name(), key)
    }
}
