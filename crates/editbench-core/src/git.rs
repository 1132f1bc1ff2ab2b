//! Thin synchronous wrappers around the `git` binary.
//!
//! Every workspace in a run is a standalone repository. The evaluator only
//! needs a handful of plumbing calls (init, stage, commit, resolve HEAD) and
//! a word-granularity diff, which [`render_word_diffstat`] turns into the
//! diffstat table that [`DiffStats`](crate::DiffStats) parses.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

/// Identity recorded on every commit the harness makes.
pub const COMMIT_USER_NAME: &str = "editbench";
pub const COMMIT_USER_EMAIL: &str = "editbench@localhost";

/// Errors raised by git invocations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The directory is not the top level of a git repository.
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// The `git` binary could not be run at all.
    #[error("failed to run git {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// git ran but exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Run `git <args>` in `dir` and return its stdout.
///
/// Repository discovery stops at `dir`: git never walks up into a
/// repository that merely encloses it.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let command = args.join(" ");
    let mut git = Command::new("git");
    git.args(["-c", "core.quotepath=off"])
        .args(args)
        .current_dir(dir);
    if let Some(ceiling) = discovery_ceiling(dir) {
        git.env("GIT_CEILING_DIRECTORIES", ceiling);
    }
    let output = git
        .output()
        .map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(GitError::Exit {
            command,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn discovery_ceiling(dir: &Path) -> Option<PathBuf> {
    let dir = dir.canonicalize().ok()?;
    dir.parent().map(Path::to_path_buf)
}

/// True when `dir` is itself the top level of a repository.
///
/// A directory nested inside some other repository does not count.
pub fn is_repository(dir: &Path) -> bool {
    let Ok(toplevel) = run_git(dir, &["rev-parse", "--show-toplevel"]) else {
        return false;
    };
    match (
        Path::new(toplevel.trim()).canonicalize(),
        dir.canonicalize(),
    ) {
        (Ok(top), Ok(dir)) => top == dir,
        _ => false,
    }
}

/// True when the repository has at least one commit.
pub fn has_commits(dir: &Path) -> bool {
    run_git(dir, &["rev-parse", "--verify", "--quiet", "HEAD"]).is_ok()
}

pub fn init(dir: &Path) -> Result<(), GitError> {
    run_git(dir, &["init", "--quiet"])?;
    Ok(())
}

/// Set a repository-local identity so commits work on hosts without one.
pub fn configure_identity(dir: &Path) -> Result<(), GitError> {
    run_git(dir, &["config", "user.name", COMMIT_USER_NAME])?;
    run_git(dir, &["config", "user.email", COMMIT_USER_EMAIL])?;
    run_git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

pub fn stage_all(dir: &Path) -> Result<(), GitError> {
    run_git(dir, &["add", "-A"])?;
    Ok(())
}

/// Commit whatever is staged. Returns `Ok(false)` when there was nothing
/// to commit.
pub fn commit(dir: &Path, message: &str) -> Result<bool, GitError> {
    let status = run_git(dir, &["status", "--porcelain"])?;
    if status.trim().is_empty() && has_commits(dir) {
        return Ok(false);
    }
    run_git(dir, &["commit", "--quiet", "--no-verify", "--allow-empty", "-m", message])?;
    Ok(true)
}

pub fn head_commit(dir: &Path) -> Result<String, GitError> {
    Ok(run_git(dir, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Number of files in the index.
pub fn tracked_file_count(dir: &Path) -> Result<usize, GitError> {
    Ok(run_git(dir, &["ls-files"])?.lines().filter(|l| !l.is_empty()).count())
}

/// Porcelain word diff of the index against `base`, with rename detection
/// and all whitespace changes ignored.
pub fn word_diff(dir: &Path, base: &str) -> Result<String, GitError> {
    run_git(
        dir,
        &[
            "diff",
            "--cached",
            "--no-color",
            "--no-ext-diff",
            "-M",
            "--ignore-all-space",
            "--word-diff=porcelain",
            base,
        ],
    )
}

/// Diffstat table of the index against `base`, counted per logical line.
pub fn diffstat(dir: &Path, base: &str) -> Result<String, GitError> {
    Ok(render_word_diffstat(&word_diff(dir, base)?))
}

#[derive(Debug, Default)]
struct FileTally {
    path: String,
    binary: bool,
    inserted: usize,
    deleted: usize,
    modified: usize,
    line_added: bool,
    line_removed: bool,
}

impl FileTally {
    fn end_line(&mut self) {
        match (self.line_added, self.line_removed) {
            (true, true) => self.modified += 1,
            (true, false) => self.inserted += 1,
            (false, true) => self.deleted += 1,
            (false, false) => {}
        }
        self.line_added = false;
        self.line_removed = false;
    }

    fn row(&self) -> String {
        if self.binary {
            return format!(" {} | Bin", self.path);
        }
        let count = self.inserted + self.deleted + self.modified;
        let histogram = format!(
            "{}{}{}",
            "+".repeat(self.inserted),
            "-".repeat(self.deleted),
            "!".repeat(self.modified)
        );
        format!(" {} | {count} {histogram}", self.path)
            .trim_end()
            .to_string()
    }
}

/// Render `git diff --word-diff=porcelain` output as a diffstat table.
///
/// A logical line counts once if any word on it was added or removed: a
/// line with only additions is an insertion (`+`), only removals a deletion
/// (`-`), and both a modification (`!`).
pub fn render_word_diffstat(porcelain: &str) -> String {
    let mut files: Vec<FileTally> = Vec::new();
    let mut in_hunk = false;

    for line in porcelain.lines() {
        if let Some(header) = line.strip_prefix("diff --git ") {
            if let Some(previous) = files.last_mut() {
                previous.end_line();
            }
            files.push(FileTally {
                path: path_from_header(header),
                ..FileTally::default()
            });
            in_hunk = false;
            continue;
        }
        let Some(file) = files.last_mut() else {
            continue;
        };

        if !in_hunk {
            if line.starts_with("@@") {
                in_hunk = true;
            } else if let Some(path) = line.strip_prefix("rename to ") {
                file.path = path.to_string();
            } else if line.starts_with("Binary files ") {
                file.binary = true;
            }
            continue;
        }

        match line.as_bytes().first() {
            Some(b'@') if line.starts_with("@@") => file.end_line(),
            Some(b'+') => file.line_added = true,
            Some(b'-') => file.line_removed = true,
            Some(b'~') => file.end_line(),
            _ => {}
        }
    }
    if let Some(last) = files.last_mut() {
        last.end_line();
    }

    let mut table: Vec<String> = files.iter().map(FileTally::row).collect();
    let n = files.len();
    table.push(format!(" {n} {} changed", if n == 1 { "file" } else { "files" }));
    table.join("\n")
}

/// `a/old/path b/new/path` -> `new/path`.
fn path_from_header(header: &str) -> String {
    let path = header
        .rsplit_once(" b/")
        .map_or(header, |(_, path)| path);
    path.trim_matches('"').to_string()
}
