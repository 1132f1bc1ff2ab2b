//! Shared test utilities for editbench integration tests.
//!
//! Fake agents are tiny `/bin/sh` scripts written into temp dirs; sample
//! programs are a handful of files, optionally committed to a fresh
//! repository.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Write an executable `#!/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
    }
    path
}

/// Write `(relative path, contents)` pairs under `dir`.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, contents).expect("failed to write file");
    }
}

/// A temp dir holding a small program, not under version control.
pub fn sample_program() -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    write_files(
        dir.path(),
        &[
            ("package.json", "{\n  \"name\": \"todo\",\n  \"main\": \"server.js\"\n}\n"),
            (
                "server.js",
                "const port = process.env.PORT || 3000;\nconsole.log(`listening on ${port}`);\n",
            ),
            ("public/index.html", "<h1>Todo</h1>\n<ul id=\"items\"></ul>\n"),
        ],
    );
    dir
}

/// Run git in `dir`, panicking on failure, and return trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialise a repository in `dir` and commit everything in it.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "--quiet"]);
    git(dir, &["config", "user.email", "test@localhost"]);
    git(dir, &["config", "user.name", "test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
}

/// Subject lines of every commit, newest first.
pub fn commit_subjects(dir: &Path) -> Vec<String> {
    git(dir, &["log", "--format=%s"])
        .lines()
        .map(str::to_string)
        .collect()
}
