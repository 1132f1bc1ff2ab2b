//! Run directory layout: the baseline repository and one isolated copy of
//! it per agent instance.
//!
//! ```text
//! <root>/
//!     baseline/          committed baseline program
//!     claude-1/          full copy of baseline/ (including .git)
//!     claude-2/
//!     aider-1/
//!     evaluation-results.json
//! ```
//!
//! Nothing under the root is ever deleted, and nothing that already exists
//! there is reused.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{Span, debug, info};
use walkdir::WalkDir;

use crate::git::{self, GitError};

/// Name of the baseline directory under the run root.
pub const BASELINE_DIR: &str = "baseline";

/// Commit message of the baseline commit.
pub const BASELINE_COMMIT_MESSAGE: &str = "Initial baseline";

/// Written into baselines that are not yet repositories, unless they
/// already carry their own `.gitignore`.
pub const DEFAULT_GITIGNORE: &str =
    "node_modules/\n.DS_Store\n*.log\ndist/\nbuild/\ncoverage/\n.env\n";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("baseline directory does not exist: {}", .0.display())]
    MissingBaseline(PathBuf),

    #[error("baseline at {} contains no files", .0.display())]
    EmptyBaseline(PathBuf),

    #[error("failed to copy {} to {}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    /// Workspaces are only ever created fresh.
    #[error("{} already exists; use a fresh workspace root", .0.display())]
    AlreadyExists(PathBuf),

    #[error("ran out of ports counting up from {base}")]
    PortsExhausted { base: u16 },
}

/// A committed baseline repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub path: PathBuf,
    /// Commit every instance diff is measured against.
    pub commit: String,
    pub file_count: usize,
}

/// One agent replica and the workspace it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInstance {
    /// `<agent>-<replica>`, replicas counted from 1.
    pub instance_id: String,
    pub agent_name: String,
    pub replica: u32,
    pub workspace: PathBuf,
    pub port: u16,
}

/// Hands out ports sequentially from a base.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    base: u16,
    next: Option<u16>,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: Some(base),
        }
    }

    pub fn next_port(&mut self) -> Result<u16, WorkspaceError> {
        let port = self
            .next
            .ok_or(WorkspaceError::PortsExhausted { base: self.base })?;
        self.next = port.checked_add(1);
        Ok(port)
    }
}

/// Creates and lays out the directories of one run.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    span: Span,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            span: Span::current(),
        }
    }

    /// Emit events under `span` instead of the current span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baseline_dir(&self) -> PathBuf {
        self.root.join(BASELINE_DIR)
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.root.join(instance_id)
    }

    /// Create the run root and an empty baseline directory.
    pub fn create_baseline_dir(&self) -> Result<PathBuf, WorkspaceError> {
        let dir = self.baseline_dir();
        let write_err = |source| WorkspaceError::Write {
            path: dir.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(write_err)?;
        match fs::create_dir(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(WorkspaceError::AlreadyExists(dir)),
            Err(e) => Err(write_err(e)),
        }
    }

    /// Copy a supplied program into `<root>/baseline` and commit it there.
    ///
    /// The source directory is never modified.
    pub fn prepare_baseline(&self, source: &Path) -> Result<Baseline, WorkspaceError> {
        if !source.is_dir() {
            return Err(WorkspaceError::MissingBaseline(source.to_path_buf()));
        }
        let dest = self.baseline_dir();
        ensure_absent(&dest)?;
        info!(parent: &self.span, source = %source.display(), dest = %dest.display(), "copying baseline");
        // The run root may sit inside the program being copied.
        copy_tree(source, &dest, Some(&self.root))?;
        self.ensure_repository(&dest)
    }

    /// Make `dir` a committed repository and return its baseline commit.
    ///
    /// Plain directories get a default `.gitignore`, `git init` and an
    /// initial commit. Existing repositories get any uncommitted work
    /// folded into a baseline commit.
    pub fn ensure_repository(&self, dir: &Path) -> Result<Baseline, WorkspaceError> {
        let file_count = count_files(dir);
        if file_count == 0 {
            return Err(WorkspaceError::EmptyBaseline(dir.to_path_buf()));
        }

        if git::is_repository(dir) {
            debug!(parent: &self.span, dir = %dir.display(), "baseline is already a repository");
        } else {
            let gitignore = dir.join(".gitignore");
            if !gitignore.exists() {
                fs::write(&gitignore, DEFAULT_GITIGNORE).map_err(|source| WorkspaceError::Write {
                    path: gitignore.clone(),
                    source,
                })?;
            }
            git::init(dir)?;
        }
        git::configure_identity(dir)?;
        git::stage_all(dir)?;
        if git::commit(dir, BASELINE_COMMIT_MESSAGE)? {
            info!(parent: &self.span, dir = %dir.display(), files = file_count, "committed baseline");
        }

        let commit = git::head_commit(dir)?;
        Ok(Baseline {
            path: dir.to_path_buf(),
            commit,
            file_count,
        })
    }

    /// Copy the baseline once per (agent, replica) and assign ports.
    ///
    /// Instances come back in agent order, then replica order.
    pub fn create_instances(
        &self,
        baseline: &Baseline,
        agents: &[String],
        replicas: u32,
        ports: &mut PortAllocator,
    ) -> Result<Vec<AgentInstance>, WorkspaceError> {
        for agent in agents {
            for replica in 1..=replicas {
                ensure_absent(&self.instance_dir(&format!("{agent}-{replica}")))?;
            }
        }

        let mut instances = Vec::with_capacity(agents.len() * replicas as usize);
        for agent in agents {
            for replica in 1..=replicas {
                let instance_id = format!("{agent}-{replica}");
                let workspace = self.instance_dir(&instance_id);
                copy_tree(&baseline.path, &workspace, None)?;
                let port = ports.next_port()?;
                debug!(parent: &self.span, %instance_id, port, workspace = %workspace.display(), "created instance workspace");
                instances.push(AgentInstance {
                    instance_id,
                    agent_name: agent.clone(),
                    replica,
                    workspace,
                    port,
                });
            }
        }
        info!(parent: &self.span, instances = instances.len(), "instance workspaces ready");
        Ok(instances)
    }
}

fn ensure_absent(path: &Path) -> Result<(), WorkspaceError> {
    match path.symlink_metadata() {
        Ok(_) => Err(WorkspaceError::AlreadyExists(path.to_path_buf())),
        Err(_) => Ok(()),
    }
}

/// Recursively copy `from` into `to`, skipping anything under `exclude`
/// unless `from` itself lives there.
fn copy_tree(from: &Path, to: &Path, exclude: Option<&Path>) -> Result<(), WorkspaceError> {
    let copy_err = |source: io::Error| WorkspaceError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    fs::create_dir_all(to).map_err(copy_err)?;
    let source = from.canonicalize().map_err(copy_err)?;
    let exclude = exclude
        .and_then(|dir| dir.canonicalize().ok())
        .filter(|dir| !source.starts_with(dir));

    let walker = WalkDir::new(from)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            exclude.as_ref().is_none_or(|excluded| {
                entry
                    .path()
                    .canonicalize()
                    .map_or(true, |path| !path.starts_with(excluded))
            })
        });

    for entry in walker {
        let entry = entry.map_err(|e| copy_err(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| copy_err(io::Error::other(e)))?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(copy_err)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(copy_err)?;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_err)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let pointee = fs::read_link(link)?;
    std::os::unix::fs::symlink(pointee, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}

/// Regular files under `dir`, ignoring `.git`.
fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .count()
}
