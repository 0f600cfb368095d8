use crate::config::Config;
use crate::error::AiContextError;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Git's well-known empty tree object.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// A working directory that git commands are run against.
///
/// Construction does not verify that `workdir` is inside a repository: callers that
/// must degrade gracefully inspect the git error instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    workdir: PathBuf,
}

impl Repository {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Leading arguments for every git invocation against this repository.
    pub fn global_args_for_exec(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.workdir.to_string_lossy().to_string(),
            "-c".to_string(),
            "core.quotepath=false".to_string(),
        ]
    }

    pub fn git(&self, args: &[&str]) -> Result<Output, AiContextError> {
        let mut full = self.global_args_for_exec();
        full.extend(args.iter().map(|s| s.to_string()));
        exec_git(&full)
    }

    /// Run git and return trimmed stdout.
    pub fn git_stdout(&self, args: &[&str]) -> Result<String, AiContextError> {
        let output = self.git(args)?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Whether HEAD resolves to a commit.
    pub fn has_commits(&self) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])
            .is_ok()
    }

    pub fn head_sha(&self) -> Result<String, AiContextError> {
        self.git_stdout(&["rev-parse", "HEAD"])
    }

    /// Check if a ref exists in the repository
    pub fn ref_exists(&self, ref_name: &str) -> bool {
        self.git(&["show-ref", "--verify", "--quiet", ref_name]).is_ok()
    }

    /// `git config user.name`, if set.
    pub fn config_user_name(&self) -> Option<String> {
        self.git_stdout(&["config", "user.name"])
            .ok()
            .filter(|name| !name.is_empty())
    }

    /// Absolute path of a file inside the git directory (e.g. a private index file).
    pub fn git_path(&self, name: &str) -> Result<PathBuf, AiContextError> {
        let raw = self.git_stdout(&["rev-parse", "--git-path", name])?;
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.workdir.join(path))
        }
    }

    /// Add `relative_dir` (relative to the workdir) to `info/exclude` unless an identical
    /// entry exists. Returns false outside a repository.
    pub fn exclude_locally(&self, relative_dir: &str) -> Result<bool, AiContextError> {
        let prefix = match self.git_stdout(&["rev-parse", "--show-prefix"]) {
            Ok(prefix) => prefix,
            Err(e) if e.is_not_a_repository() => return Ok(false),
            Err(e) => return Err(e),
        };
        let entry = format!("/{}{}/", prefix, relative_dir.trim_matches('/'));

        let exclude_path = self.git_path("info/exclude")?;
        let existing = match std::fs::read_to_string(&exclude_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|line| line.trim() == entry) {
            return Ok(true);
        }

        if let Some(parent) = exclude_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&entry);
        updated.push('\n');
        std::fs::write(&exclude_path, updated)?;
        Ok(true)
    }
}

/// Locate the repository containing `path` and return it rooted at its top level.
pub fn find_repository_in_path(path: &str) -> Result<Repository, AiContextError> {
    let probe = Repository::new(path);
    match probe.git_stdout(&["rev-parse", "--show-toplevel"]) {
        Ok(toplevel) if !toplevel.is_empty() => Ok(Repository::new(toplevel)),
        Ok(_) => Err(AiContextError::RepositoryError(format!(
            "{} has no working tree",
            path
        ))),
        Err(e) if e.is_not_a_repository() => Err(AiContextError::RepositoryError(format!(
            "{} is not inside a git repository",
            path
        ))),
        Err(e) => Err(e),
    }
}

pub fn exec_git(args: &[String]) -> Result<Output, AiContextError> {
    exec_git_with_env(args, &[])
}

/// Run git with extra environment variables (e.g. GIT_INDEX_FILE), bounded by the
/// configured timeout. Non-zero exit becomes `GitCliError`.
pub fn exec_git_with_env(
    args: &[String],
    envs: &[(&str, OsString)],
) -> Result<Output, AiContextError> {
    let config = Config::get();
    let mut cmd = Command::new(config.git_cmd());
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let child = cmd.spawn()?;
    let output = wait_with_timeout(child, config.git_timeout(), args)?;

    if !output.status.success() {
        return Err(AiContextError::GitCliError {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            args: args.to_vec(),
        });
    }

    Ok(output)
}

fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    args: &[String],
) -> Result<Output, AiContextError> {
    // Drain pipes on their own threads so a chatty child can't block on a full pipe
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AiContextError::GitTimeout {
                args: args.to_vec(),
                timeout,
            });
        }
        thread::sleep(Duration::from_millis(5));
    };

    let stdout = stdout_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args_point_at_workdir() {
        let repo = Repository::new("/tmp/some-repo");
        let args = repo.global_args_for_exec();
        assert_eq!(args[0], "-C");
        assert_eq!(args[1], "/tmp/some-repo");
        assert!(args.contains(&"core.quotepath=false".to_string()));
    }

    #[test]
    fn test_not_a_repository_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());
        let err = repo.git(&["status"]).unwrap_err();
        assert!(err.is_not_a_repository(), "unexpected error: {}", err);
        assert!(!repo.has_commits());

        let err = find_repository_in_path(&dir.path().to_string_lossy()).unwrap_err();
        assert!(matches!(err, AiContextError::RepositoryError(_)));
    }

    #[test]
    fn test_find_repository_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        Repository::new(dir.path()).git(&["init", "--quiet"]).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let repo = find_repository_in_path(&nested.to_string_lossy()).unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(repo.workdir().canonicalize().unwrap(), expected);
        assert!(!repo.has_commits());
        assert!(!repo.ref_exists("refs/heads/main"));
    }
}
