use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ai_context::git::repository::Repository;
use tempfile::TempDir;

/// Throwaway git repository with a fixed identity.
pub struct TestRepo {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir should be creatable");
        let path = dir.path().canonicalize().expect("temp dir should canonicalize");
        let repo = Self { _dir: dir, path };
        repo.git(&["init", "--quiet", "--initial-branch=main"])
            .expect("git init should succeed");
        repo.git(&["config", "user.name", "Test User"]).unwrap();
        repo.git(&["config", "user.email", "test@example.com"]).unwrap();
        repo.git(&["config", "commit.gpgsign", "false"]).unwrap();
        repo
    }

    /// A temp directory that is not a git repository.
    pub fn new_plain_dir() -> Self {
        let dir = tempfile::tempdir().expect("temp dir should be creatable");
        let path = dir.path().canonicalize().expect("temp dir should canonicalize");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repository(&self) -> Repository {
        Repository::new(&self.path)
    }

    pub fn git(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .map_err(|e| e.to_string())?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            Err(format!(
                "git {:?} failed: {}{}",
                args,
                stdout,
                String::from_utf8_lossy(&output.stderr)
            ))
        }
    }

    /// Run the `ai-context` binary inside this repository.
    pub fn ai_context(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new(env!("CARGO_BIN_EXE_ai-context"))
            .current_dir(&self.path)
            .args(args)
            .output()
            .map_err(|e| e.to_string())?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            Err(format!("{}{}", stdout, String::from_utf8_lossy(&output.stderr)))
        }
    }

    pub fn write_file(&self, relative: &str, contents: &str) {
        let abs = self.path.join(relative);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).expect("parent directory should be creatable");
        }
        fs::write(abs, contents).expect("file write should succeed");
    }

    pub fn read_file(&self, relative: &str) -> String {
        fs::read_to_string(self.path.join(relative)).expect("file should be readable")
    }

    pub fn stage_all_and_commit(&self, message: &str) -> Result<String, String> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        self.head_sha()
    }

    pub fn head_sha(&self) -> Result<String, String> {
        self.git(&["rev-parse", "HEAD"]).map(|s| s.trim().to_string())
    }

    /// Branch HEAD points at, or None when detached.
    pub fn current_branch(&self) -> Option<String> {
        self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn branches(&self) -> Vec<String> {
        self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `git status --porcelain` of the user's real index and worktree.
    pub fn porcelain_status(&self) -> String {
        self.git(&["status", "--porcelain"]).unwrap_or_default()
    }
}
