//! Dispatches parsed command lines to the library.

use std::io::{self, BufRead, Write};

use regex::Regex;

use crate::cli::{Commands, DebugCommands, RemoteArgs};
use crate::config::Workspace;
use crate::error::{BitumError, Result};
use crate::storage::{ObjectStore, RemoteLayout};
use crate::sync::{self, DiffView, Remote, SourceSet, UploadOptions};

/// Runs one parsed command against the workspace.
pub fn run_command(workspace: &Workspace, command: &Commands) -> Result<()> {
    match command {
        Commands::Upload {
            dir,
            exclude,
            create,
            view,
            remote,
        } => {
            let (store, layout) = open_remote(remote)?;
            let mut opts = UploadOptions::new(dir);
            opts.exclude = compile_exclude(exclude.as_deref())?;
            opts.create = *create;
            opts.view = DiffView::from(view);
            let mut ask = ask_yes_no;
            sync::upload(workspace, Remote::new(store.as_ref(), &layout), &opts, &mut ask)?;
        }
        Commands::Download {
            dir,
            exclude,
            view,
            remote,
        } => {
            let (store, layout) = open_remote(remote)?;
            let exclude = compile_exclude(exclude.as_deref())?;
            sync::download(Remote::new(store.as_ref(), &layout), dir, exclude, DiffView::from(view))?;
        }
        Commands::Extract { dir } => {
            sync::extract_all(workspace, dir)?;
        }
        Commands::Debug { command } => run_debug(workspace, command)?,
    }
    Ok(())
}

fn run_debug(workspace: &Workspace, command: &DebugCommands) -> Result<()> {
    match command {
        DebugCommands::Build { tree, dry_run } => {
            let exclude = compile_exclude(tree.exclude.as_deref())?;
            sync::build(workspace, &tree.dir, tree.flags(), exclude, *dry_run)?;
        }
        DebugCommands::DiffLocal { tree, view } => {
            let sources = SourceSet {
                root: &tree.dir,
                workspace,
                remote: None,
                flags: tree.flags(),
                exclude: compile_exclude(tree.exclude.as_deref())?,
            };
            sync::diff_local(&sources, DiffView::from(view))?;
        }
        DebugCommands::CheckSizes { remote } => {
            let (store, layout) = open_remote(remote)?;
            let report = sync::check_sizes(workspace, Remote::new(store.as_ref(), &layout))?;
            if !report.is_consistent() {
                return Err(BitumError::Storage(format!(
                    "{} objects differ between local and remote",
                    report.mismatches().count()
                )));
            }
        }
        DebugCommands::Integrity {
            a,
            b,
            tree,
            view,
            remote,
        } => {
            let opened = if remote.is_configured() {
                Some(open_remote(remote)?)
            } else {
                None
            };
            let sources = SourceSet {
                root: &tree.dir,
                workspace,
                remote: opened.as_ref().map(|(store, layout)| Remote::new(&**store, layout)),
                flags: tree.flags(),
                exclude: compile_exclude(tree.exclude.as_deref())?,
            };
            sync::integrity(&sources, *a, *b, DiffView::from(view))?;
        }
        DebugCommands::ExtractSingleFile { filepath, output } => {
            sync::extract_single_file(workspace, filepath, output)?;
        }
        DebugCommands::UploadAll { remote } => {
            let (store, layout) = open_remote(remote)?;
            let n = sync::upload_all(workspace, Remote::new(store.as_ref(), &layout))?;
            println!("Uploaded {n} objects");
        }
        DebugCommands::DownloadAll { remote } => {
            let (store, layout) = open_remote(remote)?;
            let n = sync::download_all(workspace, Remote::new(store.as_ref(), &layout))?;
            println!("Downloaded {n} objects");
        }
    }
    Ok(())
}

fn open_remote(args: &RemoteArgs) -> Result<(Box<dyn ObjectStore>, RemoteLayout)> {
    let cfg = args.config();
    Ok((cfg.open_store()?, cfg.layout()))
}

fn compile_exclude(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern.map(Regex::new).transpose().map_err(BitumError::from)
}

/// Asks a yes/no question on stdin. An empty line counts as yes; end of
/// input and any answer not starting with `y` count as no.
fn ask_yes_no(question: &str) -> bool {
    print!("{question} (Y/n) ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => {
            let answer = answer.trim().to_lowercase();
            answer.is_empty() || answer.starts_with('y')
        }
    }
}
