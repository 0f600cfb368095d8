use std::path::Path;

use serde::Serialize;

use crate::error::AiContextError;
use crate::provenance::commit_store::CommitContextStore;
use crate::provenance::store::ProvenanceStore;
use crate::provenance::types::{CommitContext, ProvenanceRecord};

/// Where an answer to a line lookup came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum LineProvenance {
    Record(ProvenanceRecord),
    Commit(CommitContext),
}

impl LineProvenance {
    pub fn prompt(&self) -> Option<&str> {
        match self {
            LineProvenance::Record(r) => Some(r.prompt.as_str()),
            LineProvenance::Commit(c) => c.prompt.as_deref(),
        }
    }

    pub fn commit_hash(&self) -> Option<&str> {
        match self {
            LineProvenance::Record(r) => r.commit_hash.as_deref(),
            LineProvenance::Commit(c) => Some(c.commit_hash.as_str()),
        }
    }
}

/// Read-side query surface over both stores.
pub struct ProvenanceLookup {
    pub records: ProvenanceStore,
    pub commits: CommitContextStore,
}

impl ProvenanceLookup {
    pub fn for_workspace(workspace_root: &Path, store_dir: &str) -> Self {
        Self {
            records: ProvenanceStore::for_workspace(workspace_root, store_dir),
            commits: CommitContextStore::for_workspace(workspace_root, store_dir),
        }
    }

    /// Records covering `path:line`, newest first; commit documents only when no record
    /// covers the line.
    pub fn at_line(&self, path: &str, line: u32) -> Result<Vec<LineProvenance>, AiContextError> {
        let mut records = self.records.by_file_and_line(path, line)?;
        if !records.is_empty() {
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            return Ok(records.into_iter().map(LineProvenance::Record).collect());
        }
        Ok(self
            .commits
            .by_file_and_line(path, line)?
            .into_iter()
            .map(LineProvenance::Commit)
            .collect())
    }
}
