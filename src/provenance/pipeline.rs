use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{Config, DEFAULT_BRANCH_PREFIX, DEFAULT_STORE_DIR};
use crate::detection::source::{AiResponse, ChatSource, prompt_for};
use crate::git::diff::{DiffRequest, DiffResolver, LineRangesByFile};
use crate::git::provenance_branch::CommitOrchestrator;
use crate::git::repository::Repository;
use crate::observability;
use crate::provenance::commit_store::CommitContextStore;
use crate::provenance::path_match::has_segment;
use crate::provenance::store::ProvenanceStore;
use crate::provenance::types::{CommitContext, FileChange, NO_PROMPT, NO_RESPONSE, ProvenanceRecord};
use crate::tracking::change_tracker::ChangeTracker;
use crate::utils::{debug_log, now_ms};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub after_window: Duration,
    pub store_dir: String,
    pub branch_prefix: String,
    pub provenance_commits: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            after_window: Duration::from_secs(10 * 60),
            store_dir: DEFAULT_STORE_DIR.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            provenance_commits: true,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            after_window: config.after_window(),
            store_dir: config.store_dir().to_string(),
            branch_prefix: config.branch_prefix().to_string(),
            provenance_commits: config.feature_flags().provenance_commits,
        }
    }
}

/// How the file list of a record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    /// Diff restricted to files changed in the window.
    Candidates,
    /// Unrestricted working-tree diff.
    WorkingTree,
    /// Window candidates with `{1,1}` markers; exact lines unknown.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub record: ProvenanceRecord,
    pub range_source: RangeSource,
    /// Set when this run created the provenance branch.
    pub branch_created: Option<String>,
}

/// Correlates one assistant response with the file edits that followed it and persists
/// the result.
pub struct CorrelationPipeline {
    repo: Repository,
    tracker: Arc<ChangeTracker>,
    source: Arc<dyn ChatSource>,
    diff: DiffResolver,
    orchestrator: CommitOrchestrator,
    store: ProvenanceStore,
    commits: CommitContextStore,
    settings: PipelineSettings,
    // Single writer for the store
    run_lock: Mutex<()>,
}

impl CorrelationPipeline {
    pub fn new(
        workspace_root: &Path,
        tracker: Arc<ChangeTracker>,
        source: Arc<dyn ChatSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repo: Repository::new(workspace_root),
            tracker,
            source,
            diff: DiffResolver::new(settings.store_dir.clone()),
            orchestrator: CommitOrchestrator::new(settings.branch_prefix.clone()),
            store: ProvenanceStore::for_workspace(workspace_root, &settings.store_dir),
            commits: CommitContextStore::for_workspace(workspace_root, &settings.store_dir),
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ProvenanceStore {
        &self.store
    }

    /// True when a record was written for `response`.
    pub fn run(&self, response: &AiResponse) -> bool {
        self.process(response).is_some()
    }

    pub fn process(&self, response: &AiResponse) -> Option<PipelineReport> {
        let _guard = self.run_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.process_locked(response)
    }

    /// Like `run`, but `still_current` is checked once the run lock is held, so a rerun
    /// queued behind a newer response does nothing.
    pub fn rerun_if(&self, response: &AiResponse, still_current: impl Fn() -> bool) -> bool {
        let _guard = self.run_lock.lock().unwrap_or_else(|p| p.into_inner());
        if !still_current() {
            debug_log(&format!("Rerun for {} superseded, skipping", response.id));
            return false;
        }
        self.process_locked(response).is_some()
    }

    fn process_locked(&self, response: &AiResponse) -> Option<PipelineReport> {
        let started = Instant::now();

        let response_time = response.timestamp_ms();
        let window_ms = i64::try_from(self.settings.after_window.as_millis()).unwrap_or(i64::MAX);
        let candidates = self.tracker.files_in_window(response_time, window_ms);
        debug_log(&format!(
            "Response {} at {}: {} candidate files in window",
            response.id,
            response_time,
            candidates.len()
        ));

        let (files, range_source) = self.resolve_files(&candidates);
        if files.is_empty() {
            debug_log(&format!("No changed files for response {}, skipping", response.id));
            return None;
        }

        let (commit_hash, branch_created) = if self.settings.provenance_commits {
            let paths: Vec<String> = files.iter().map(|f| f.file_path.clone()).collect();
            self.commit_files(&paths)
        } else {
            (None, None)
        };

        let (prompt, thinking, tokens) = self.conversation_context(response);
        let record = ProvenanceRecord {
            response_id: response.id.clone(),
            conversation_id: response.conversation_id.clone(),
            prompt,
            thinking,
            files,
            commit_hash: commit_hash.clone(),
            created_at: now_ms(),
            tokens,
        };

        let stored = match self.store.upsert(record) {
            Ok(stored) => stored,
            Err(e) => {
                debug_log(&format!("Failed to persist record {}: {}", response.id, e));
                observability::log_error(&e, Some(serde_json::json!({"responseId": response.id})));
                return None;
            }
        };

        if let Some(hash) = &commit_hash {
            if let Err(e) = self.commits.write(&CommitContext::from_record(&stored, hash)) {
                // Secondary store is best-effort; the record is already saved
                observability::log_error(&e, Some(serde_json::json!({"commitHash": hash})));
            }
        }

        observability::log_performance(
            "pipeline.run",
            started.elapsed(),
            Some(serde_json::json!({
                "responseId": stored.response_id,
                "files": stored.files.len(),
                "committed": commit_hash.is_some(),
                "rangeSource": format!("{:?}", range_source),
            })),
            None,
        );

        Some(PipelineReport {
            record: stored,
            range_source,
            branch_created,
        })
    }

    fn resolve_files(&self, candidates: &BTreeSet<String>) -> (Vec<FileChange>, RangeSource) {
        if !candidates.is_empty() {
            let ranges = self.diff_or_empty(&DiffRequest::for_candidates(candidates.iter().cloned()));
            if !ranges.is_empty() {
                return (to_file_changes(ranges), RangeSource::Candidates);
            }
        }

        let ranges = self.diff_or_empty(&DiffRequest::working_tree());
        if !ranges.is_empty() {
            return (to_file_changes(ranges), RangeSource::WorkingTree);
        }

        let degraded = candidates
            .iter()
            .filter(|p| !has_segment(p, &self.settings.store_dir))
            .map(FileChange::touched)
            .collect();
        (degraded, RangeSource::Degraded)
    }

    fn diff_or_empty(&self, request: &DiffRequest) -> LineRangesByFile {
        match self.diff.diff_line_ranges(&self.repo, request) {
            Ok(ranges) => ranges,
            Err(e) => {
                debug_log(&format!("Diff failed, treating as empty: {}", e));
                observability::log_error(&e, Some(serde_json::json!({"operation": "diff_line_ranges"})));
                LineRangesByFile::new()
            }
        }
    }

    /// Best-effort commit; any failure only drops the hash.
    fn commit_files(&self, paths: &[String]) -> (Option<String>, Option<String>) {
        let mut created_branch = None;
        let result = self.orchestrator.with_provenance_branch(&self.repo, |switch| {
            if switch.created {
                created_branch = Some(switch.branch_name.clone());
            }
            self.orchestrator.commit_matched_files(&self.repo, switch, paths)
        });

        if let Some(branch) = &created_branch {
            observability::log_message(
                &format!("Created provenance branch {}", branch),
                "info",
                None,
            );
        }

        match result {
            Ok(hash) => (hash, created_branch),
            Err(e) => {
                debug_log(&format!("Provenance commit skipped: {}", e));
                observability::log_error(&e, Some(serde_json::json!({"operation": "provenance_commit"})));
                (None, created_branch)
            }
        }
    }

    /// Prompt, thinking and token count, preferring fresh data from the source.
    fn conversation_context(&self, response: &AiResponse) -> (String, String, Option<u64>) {
        let history = match self.source.messages(&response.conversation_id) {
            Ok(history) => history,
            Err(e) => {
                debug_log(&format!("Could not load conversation {}: {}", response.conversation_id, e));
                Vec::new()
            }
        };

        let prompt = prompt_for(&history, response)
            .map(|m| m.text.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| NO_PROMPT.to_string());

        let fresh = history.iter().find(|m| m.id == response.id);
        let thinking = fresh
            .map(|m| m.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some(response.text.as_str()).filter(|t| !t.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| NO_RESPONSE.to_string());

        let tokens = fresh.and_then(|m| m.tokens).or(response.tokens);
        (prompt, thinking, tokens)
    }
}

fn to_file_changes(ranges: LineRangesByFile) -> Vec<FileChange> {
    ranges
        .into_iter()
        .map(|(path, line_ranges)| FileChange::new(path, line_ranges))
        .collect()
}
