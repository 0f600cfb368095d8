use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AiContextError;
use crate::provenance::path_match::paths_equivalent;
use crate::provenance::store::{read_json_or_default, write_json_atomic};
use crate::provenance::types::CommitContext;
use crate::utils::{normalize_path, now_ms};

pub const COMMITS_DIR: &str = "commits";
pub const CHANGE_INDEX_FILE: &str = "change-index.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeIndex {
    pub by_file: BTreeMap<String, Vec<String>>,
    pub updated_at: i64,
}

impl ChangeIndex {
    pub fn build<'a>(contexts: impl IntoIterator<Item = &'a CommitContext>) -> Self {
        let mut by_file: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for ctx in contexts {
            for change in &ctx.changes {
                let key = normalize_path(&change.file_path);
                let hashes = by_file.entry(key).or_default();
                if !hashes.contains(&ctx.commit_hash) {
                    hashes.push(ctx.commit_hash.clone());
                }
            }
        }
        Self {
            by_file,
            updated_at: now_ms(),
        }
    }
}

/// One JSON document per provenance commit, for lookups when no record is available.
pub struct CommitContextStore {
    pub commits_dir: PathBuf,
    pub change_index_path: PathBuf,
}

impl CommitContextStore {
    pub fn for_workspace(workspace_root: &Path, store_dir: &str) -> CommitContextStore {
        let dir = workspace_root.join(store_dir);
        CommitContextStore {
            commits_dir: dir.join(COMMITS_DIR),
            change_index_path: dir.join(CHANGE_INDEX_FILE),
        }
    }

    fn context_path(&self, commit_hash: &str) -> Result<PathBuf, AiContextError> {
        if commit_hash.is_empty() || !commit_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AiContextError::Generic(format!(
                "invalid commit hash: {}",
                commit_hash
            )));
        }
        Ok(self.commits_dir.join(format!("{}.json", commit_hash)))
    }

    /// Write (or merge into) the document for `context.commit_hash`, then rebuild the
    /// change index.
    pub fn write(&self, context: &CommitContext) -> Result<CommitContext, AiContextError> {
        let path = self.context_path(&context.commit_hash)?;
        let merged = match read_json_or_default::<CommitContext>(&path)? {
            Some(existing) => merge_contexts(existing, context.clone()),
            None => context.clone(),
        };
        write_json_atomic(&path, &merged)?;

        let all = self.read_all()?;
        write_json_atomic(&self.change_index_path, &ChangeIndex::build(&all))?;
        Ok(merged)
    }

    pub fn read(&self, commit_hash: &str) -> Result<Option<CommitContext>, AiContextError> {
        read_json_or_default(&self.context_path(commit_hash)?)
    }

    /// Commit hashes with a stored document, sorted.
    pub fn list_ids(&self) -> Result<Vec<String>, AiContextError> {
        let entries = match fs::read_dir(&self.commits_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                if !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit()) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn read_change_index(&self) -> Result<ChangeIndex, AiContextError> {
        match read_json_or_default::<ChangeIndex>(&self.change_index_path)? {
            Some(index) => Ok(index),
            None => Ok(ChangeIndex::build(&self.read_all()?)),
        }
    }

    pub fn by_file_and_line(&self, path: &str, line: u32) -> Result<Vec<CommitContext>, AiContextError> {
        let index = self.read_change_index()?;
        let mut hashes: Vec<&String> = index
            .by_file
            .iter()
            .filter(|(key, _)| paths_equivalent(key, path))
            .flat_map(|(_, hashes)| hashes.iter())
            .collect();
        hashes.sort();
        hashes.dedup();

        let mut hits = Vec::new();
        for hash in hashes {
            let Some(ctx) = self.read(hash)? else {
                continue;
            };
            if ctx
                .changes
                .iter()
                .any(|c| paths_equivalent(&c.file_path, path) && c.covers_line(line))
            {
                hits.push(ctx);
            }
        }
        hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(hits)
    }

    fn read_all(&self) -> Result<Vec<CommitContext>, AiContextError> {
        let mut all = Vec::new();
        for id in self.list_ids()? {
            if let Some(ctx) = self.read(&id)? {
                all.push(ctx);
            }
        }
        Ok(all)
    }
}

fn merge_contexts(mut existing: CommitContext, incoming: CommitContext) -> CommitContext {
    for change in incoming.changes {
        if !existing.changes.iter().any(|c| c.file_path == change.file_path) {
            existing.changes.push(change);
        }
    }
    for id in incoming.response_ids {
        if !existing.response_ids.contains(&id) {
            existing.response_ids.push(id);
        }
    }
    existing.prompt = incoming.prompt.or(existing.prompt);
    existing.thinking = incoming.thinking.or(existing.thinking);
    existing.tokens = incoming.tokens.or(existing.tokens);
    existing.timestamp = existing.timestamp.max(incoming.timestamp);
    existing
}
