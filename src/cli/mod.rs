use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::common::ScanFlags;
use crate::config::{RemoteConfig, DEFAULT_REGION};
use crate::snapshot::SourceKind;
use crate::sync::DiffView;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quickly send your files to cloud storage", long_about = None)]
pub struct Args {
    /// Directory holding the `.bitumen` blobs and the `bitumen.sqlite3` index.
    #[arg(long, global = true, default_value = ".", env = "BITUM_WORKDIR")]
    pub workdir: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Upload changed files to the remote (overwriting objects there).
    #[command(alias = "u")]
    Upload {
        /// Local directory to back up.
        dir: PathBuf,

        /// Exclude files matching this regex.
        #[arg(short, long, value_name = "EXCLUDE_REGEX")]
        exclude: Option<String>,

        /// Create the index if the remote has none (bypasses the question).
        #[arg(long)]
        create: bool,

        #[command(flatten)]
        view: ViewArgs,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Download changed files from the remote (overwriting local files).
    #[command(alias = "d")]
    Download {
        /// Local directory to restore into.
        dir: PathBuf,

        /// Exclude files matching this regex.
        #[arg(short, long, value_name = "EXCLUDE_REGEX")]
        exclude: Option<String>,

        #[command(flatten)]
        view: ViewArgs,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Extract every file of the local blobs.
    #[command(alias = "x")]
    Extract {
        /// Directory to extract into.
        dir: PathBuf,
    },

    /// Access debug commands.
    Debug {
        #[command(subcommand)]
        command: DebugCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum DebugCommands {
    /// Pack a directory from scratch into size-tier blobs and rebuild the index.
    Build {
        #[command(flatten)]
        tree: TreeArgs,

        /// Only list the number of files per blob. Do not write blobs.
        #[arg(long)]
        dry_run: bool,
    },

    /// Diff the local index against the files on disk.
    DiffLocal {
        #[command(flatten)]
        tree: TreeArgs,

        #[command(flatten)]
        view: ViewArgs,
    },

    /// Compare the sizes of the local blobs with the remote ones.
    CheckSizes {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Compare any two of local-files, local-db and remote-db.
    Integrity {
        /// First source: local-files, local-db or remote-db.
        a: SourceKind,

        /// Second source: local-files, local-db or remote-db.
        b: SourceKind,

        #[command(flatten)]
        tree: TreeArgs,

        #[command(flatten)]
        view: ViewArgs,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Extract a single file from the local blobs into the current directory.
    ExtractSingleFile {
        /// Path of the file to extract, as stored in the index.
        filepath: String,

        /// Directory to write the file into.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Upload every blob named in the local index, then the index.
    UploadAll {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Download the remote index, then every blob it names.
    DownloadAll {
        #[command(flatten)]
        remote: RemoteArgs,
    },
}

/// A directory to scan and what to collect from it.
#[derive(ClapArgs, Clone, Debug)]
pub struct TreeArgs {
    /// Local directory.
    pub dir: PathBuf,

    /// Don't store and check file sizes -- only check whether each file exists.
    #[arg(short = 's', long)]
    pub skip_sizes: bool,

    /// Don't store and check file permissions.
    #[arg(short = 'p', long)]
    pub skip_perms: bool,

    /// Don't store and check file hashes.
    #[arg(short = 'z', long)]
    pub skip_hashes: bool,

    /// Exclude files matching this regex.
    #[arg(short, long, value_name = "EXCLUDE_REGEX")]
    pub exclude: Option<String>,
}

impl TreeArgs {
    pub fn flags(&self) -> ScanFlags {
        ScanFlags::from_skips(self.skip_sizes, self.skip_perms, self.skip_hashes)
    }
}

/// How a diff is printed.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct ViewArgs {
    /// Show missing directories as a single entry (don't show the files in them).
    #[arg(short, long)]
    pub dir_norecurse: bool,

    /// List every changed path.
    #[arg(short, long)]
    pub list: bool,

    /// Print the diff as JSON.
    #[arg(long)]
    pub json: bool,
}

impl From<&ViewArgs> for DiffView {
    fn from(v: &ViewArgs) -> Self {
        DiffView {
            list: v.list,
            dir_norecurse: v.dir_norecurse,
            json: v.json,
        }
    }
}

/// Where the remote copy lives.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct RemoteArgs {
    /// S3-compatible bucket holding the blobs.
    #[arg(long, env = "BITUM_BUCKET")]
    pub bucket: Option<String>,

    /// Prefix inside the bucket to upload to or download from.
    #[arg(long, env = "BITUM_PREFIX", default_value = "")]
    pub prefix: String,

    /// S3-compatible endpoint URL (e.g. Backblaze "s3.eu-central-003.backblazeb2.com").
    #[arg(long, env = "BITUM_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    #[arg(long, env = "BITUM_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Access key id. Falls back to BITUM_ACCESS_KEY_ID, then AWS_ACCESS_KEY_ID.
    #[arg(long)]
    pub access_key_id: Option<String>,

    /// Secret access key. Falls back to BITUM_SECRET_ACCESS_KEY, then AWS_SECRET_ACCESS_KEY.
    #[arg(long)]
    pub secret_access_key: Option<String>,

    /// Use a local directory as the remote instead of a bucket.
    #[arg(long, env = "BITUM_REMOTE_DIR", conflicts_with = "bucket")]
    pub remote_dir: Option<PathBuf>,
}

impl RemoteArgs {
    pub fn config(&self) -> RemoteConfig {
        RemoteConfig {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            endpoint_url: self.endpoint_url.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            remote_dir: self.remote_dir.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bucket.is_some() || self.remote_dir.is_some()
    }
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn integrity_sources_and_flags_parse() {
        let args = Args::try_parse_from([
            "bitum", "debug", "integrity", "local-db", "remote-db", "tree", "-p", "-d", "--remote-dir", "/tmp/r",
        ])
        .unwrap();
        let Commands::Debug {
            command: DebugCommands::Integrity { a, b, tree, view, remote },
        } = args.command
        else {
            panic!("wrong command");
        };
        assert_eq!((a, b), (SourceKind::LocalDb, SourceKind::RemoteDb));
        assert_eq!(tree.flags(), ScanFlags::from_skips(false, true, false));
        assert!(view.dir_norecurse);
        assert!(remote.is_configured());
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!(Args::try_parse_from(["bitum", "debug", "integrity", "remote-files", "local-db", "x"]).is_err());
    }
}
