use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::AiContextError;
use crate::git::repository::{Repository, exec_git_with_env};
use crate::observability;
use crate::utils::debug_log;

/// Private index used while staging onto the provenance branch.
const PROVENANCE_INDEX_NAME: &str = "ai-context-index";

/// Where HEAD pointed before the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedHead {
    /// Full ref name, e.g. `refs/heads/main`. May be unborn.
    Branch(String),
    Detached(String),
}

/// Context returned by [`CommitOrchestrator::ensure_provenance_branch`] and threaded
/// into [`CommitOrchestrator::restore_branch`].
#[derive(Debug, Clone)]
pub struct BranchSwitch {
    pub branch_name: String,
    /// The branch did not exist and starts with no history.
    pub created: bool,
    saved: Option<SavedHead>,
    index_file: PathBuf,
}

impl BranchSwitch {
    pub fn saved_head(&self) -> Option<&SavedHead> {
        self.saved.as_ref()
    }

    pub fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch_name)
    }

    pub fn index_file(&self) -> &Path {
        &self.index_file
    }
}

/// Commits AI-attributed files to a per-user branch without touching the user's
/// working tree or index.
///
/// Only HEAD is repointed during the switch. Staging happens in a private index file
/// seeded from the provenance branch tip, so uncommitted user work is never checked out
/// over or reset.
#[derive(Debug, Clone)]
pub struct CommitOrchestrator {
    branch_prefix: String,
}

impl CommitOrchestrator {
    pub fn new(branch_prefix: impl Into<String>) -> Self {
        Self {
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn branch_name_for(&self, repo: &Repository) -> String {
        provenance_branch_name(&self.branch_prefix, repo.config_user_name().as_deref())
    }

    pub fn ensure_provenance_branch(&self, repo: &Repository) -> Result<BranchSwitch, AiContextError> {
        let branch_name = self.branch_name_for(repo);
        let target_ref = format!("refs/heads/{}", branch_name);

        let current = current_head(repo)?;
        let already_on_target = matches!(&current, SavedHead::Branch(r) if *r == target_ref);

        let created = !repo.ref_exists(&target_ref);
        let index_file = repo.git_path(PROVENANCE_INDEX_NAME)?;
        let _ = fs::remove_file(&index_file);

        let seed: Vec<&str> = if created {
            vec!["read-tree", "--empty"]
        } else {
            vec!["read-tree", target_ref.as_str()]
        };
        git_with_index(repo, &index_file, &seed)?;

        if already_on_target {
            return Ok(BranchSwitch {
                branch_name,
                created,
                saved: None,
                index_file,
            });
        }

        // An unborn target ref is how git represents an orphan branch
        repo.git(&["symbolic-ref", "HEAD", &target_ref])?;
        debug_log(&format!(
            "Switched HEAD to {} (created: {}, saved: {:?})",
            branch_name, created, current
        ));

        Ok(BranchSwitch {
            branch_name,
            created,
            saved: Some(current),
            index_file,
        })
    }

    /// Stage `paths` (the whole working tree when empty) and commit them onto the
    /// provenance branch. `None` when nothing ended up staged.
    pub fn commit_matched_files(
        &self,
        repo: &Repository,
        switch: &BranchSwitch,
        paths: &[String],
    ) -> Result<Option<String>, AiContextError> {
        let index = switch.index_file();

        if paths.is_empty() {
            git_with_index(repo, index, &["add", "-A", "--", "."])?;
        } else {
            let (present, missing): (Vec<&String>, Vec<&String>) =
                paths.iter().partition(|p| repo.workdir().join(p.as_str()).exists());
            stage_present(repo, index, &present)?;
            if !missing.is_empty() {
                let mut args = vec!["rm", "--cached", "--ignore-unmatch", "--quiet", "--"];
                args.extend(missing.iter().map(|p| p.as_str()));
                git_with_index(repo, index, &args)?;
            }
        }

        let staged = repo.staged_paths(Some(index))?;
        if staged.is_empty() {
            debug_log("Nothing staged for provenance commit");
            return Ok(None);
        }

        let message = format!(
            "[AI] {}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        );
        git_with_index(
            repo,
            index,
            &["commit", "--no-verify", "--quiet", "-m", &message],
        )?;
        let hash = repo.head_sha()?;
        debug_log(&format!(
            "Provenance commit {} on {} ({} files)",
            hash,
            switch.branch_name,
            staged.len()
        ));
        Ok(Some(hash))
    }

    /// Point HEAD back where it was before the switch. No-op when nothing was saved.
    pub fn restore_branch(&self, repo: &Repository, switch: &BranchSwitch) -> Result<(), AiContextError> {
        let _ = fs::remove_file(switch.index_file());
        match &switch.saved {
            None => Ok(()),
            Some(SavedHead::Branch(r)) => repo.git(&["symbolic-ref", "HEAD", r]).map(|_| ()),
            Some(SavedHead::Detached(sha)) => {
                repo.git(&["update-ref", "--no-deref", "HEAD", sha]).map(|_| ())
            }
        }
    }

    /// Run `f` on the provenance branch and always restore HEAD afterwards.
    ///
    /// Holds the per-repository lock for the whole switch, `f`, restore section.
    pub fn with_provenance_branch<T, F>(&self, repo: &Repository, f: F) -> Result<T, AiContextError>
    where
        F: FnOnce(&BranchSwitch) -> Result<T, AiContextError>,
    {
        let lock = repo_lock(repo);
        let _guard = lock_ignoring_poison(&lock);

        let switch = self.ensure_provenance_branch(repo)?;
        let result = f(&switch);
        let restored = self.restore_branch(repo, &switch);

        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore_err)) => {
                observability::log_error(
                    &restore_err,
                    Some(serde_json::json!({
                        "operation": "restore_branch",
                        "branch": switch.branch_name,
                    })),
                );
                Err(e)
            }
        }
    }
}

/// `<prefix><user>` with whitespace and ref-unsafe characters replaced by `-`.
pub fn provenance_branch_name(prefix: &str, user_name: Option<&str>) -> String {
    let cleaned: String = user_name
        .unwrap_or("")
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut cleaned = cleaned.replace("..", "-");
    while cleaned.contains("--") {
        cleaned = cleaned.replace("--", "-");
    }
    let mut cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    // Stripping can expose another suffix, e.g. "a.lock.lock" or "a-.lock"
    while let Some(stripped) = cleaned.strip_suffix(".lock") {
        cleaned = stripped.trim_matches(|c| c == '-' || c == '.');
    }

    if cleaned.is_empty() {
        format!("{}unknown", prefix)
    } else {
        format!("{}{}", prefix, cleaned)
    }
}

fn current_head(repo: &Repository) -> Result<SavedHead, AiContextError> {
    match repo.git_stdout(&["symbolic-ref", "--quiet", "HEAD"]) {
        Ok(r) => Ok(SavedHead::Branch(r)),
        Err(e) if e.is_not_a_repository() => Err(AiContextError::RepositoryError(format!(
            "{} is not a git repository",
            repo.workdir().display()
        ))),
        Err(_) => repo
            .head_sha()
            .map(SavedHead::Detached)
            .map_err(|e| AiContextError::RepositoryError(format!("cannot resolve HEAD: {}", e))),
    }
}

fn stage_present(repo: &Repository, index: &Path, paths: &[&String]) -> Result<(), AiContextError> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add", "-A", "--"];
    args.extend(paths.iter().map(|p| p.as_str()));
    if git_with_index(repo, index, &args).is_ok() {
        return Ok(());
    }
    // One bad path (ignored, outside the repo) fails the whole batch
    for path in paths {
        if let Err(e) = git_with_index(repo, index, &["add", "-A", "--", path.as_str()]) {
            debug_log(&format!("Skipping {} for provenance commit: {}", path, e));
        }
    }
    Ok(())
}

fn git_with_index(repo: &Repository, index: &Path, args: &[&str]) -> Result<Output, AiContextError> {
    let mut full = repo.global_args_for_exec();
    full.extend(args.iter().map(|s| s.to_string()));
    let envs: [(&str, OsString); 1] = [("GIT_INDEX_FILE", index.as_os_str().to_os_string())];
    exec_git_with_env(&full, &envs)
}

type RepoLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static REPO_LOCKS: OnceLock<RepoLocks> = OnceLock::new();

/// Process-wide lock for a repository, keyed by its top-level directory.
fn repo_lock(repo: &Repository) -> Arc<Mutex<()>> {
    let key = repo
        .git_stdout(&["rev-parse", "--show-toplevel"])
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| repo.workdir().to_path_buf());
    let key = key.canonicalize().unwrap_or(key);

    let locks = REPO_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = lock_ignoring_poison(locks);
    map.entry(key).or_default().clone()
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
