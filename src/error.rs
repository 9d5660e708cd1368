use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BitumError>;

/// Raised when a blob and its index records disagree.
///
/// Either a record does not start where the previous one ended, or the blob
/// (local or remote) yielded fewer bytes than the record promises. Both mean
/// the index and the blob are out of step and extraction must stop.
#[derive(Debug, Error)]
pub enum ArchiveIntegrityError {
    #[error("blob '{blob_id}': record '{path}' is indexed at offset {expected} but the read cursor is at {actual}")]
    OffsetMismatch {
        blob_id: String,
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("blob '{blob_id}': record '{path}' should hold {expected} bytes but {actual} were read")]
    ByteCount {
        blob_id: String,
        path: String,
        expected: u64,
        actual: u64,
    },
}

/// The primary error type for all operations in the `bitum` crate.
#[derive(Debug, Error)]
pub enum BitumError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    /// The directory an operation was pointed at does not exist.
    #[error("\"{}\" does not exist", .0.display())]
    MissingRoot(PathBuf),

    #[error("invalid exclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An error from the SQLite index.
    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("archive integrity error: {0}")]
    Integrity(#[from] ArchiveIntegrityError),

    /// The source file changed between the scan and the pack.
    #[error("'{path}' changed while packing: expected {expected} bytes, copied {actual}")]
    PackSizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// A planned entry carries no size, so its byte count cannot be checked.
    #[error("'{0}' has no recorded size and cannot be packed")]
    UnsizedEntry(String),

    #[error("'{0}' is not in the index")]
    NotIndexed(String),

    /// An indexed path that would resolve outside the target directory.
    #[error("refusing to write '{0}': not a plain relative path")]
    UnsafePath(String),

    #[error("object '{0}' not found in storage")]
    ObjectNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// An error while serializing a report.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A value does not fit the integer width SQLite stores.
    #[error("value {0} is out of range for the index")]
    OutOfRange(u64),

    /// The operator declined an interactive confirmation.
    #[error("aborted by user")]
    Aborted,
}

impl BitumError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BitumError::Io {
            source,
            path: path.into(),
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for BitumError {
    fn from(err: std::io::Error) -> Self {
        BitumError::Io {
            source: err,
            path: PathBuf::new(),
        }
    }
}
