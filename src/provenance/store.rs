use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AiContextError;
use crate::git::repository::Repository;
use crate::observability;
use crate::provenance::path_match::{has_segment, paths_equivalent};
use crate::provenance::types::{NO_PROMPT, NO_RESPONSE, ProvenanceRecord};
use crate::utils::{debug_log, normalize_path, now_ms};

pub const METADATA_FILE: &str = "metadata.json";
pub const INDEX_FILE: &str = "index.json";

/// Derived lookup tables, rebuilt from the record list on every write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceIndex {
    pub by_response_id: BTreeMap<String, usize>,
    pub by_file: BTreeMap<String, Vec<String>>,
    pub updated_at: i64,
}

impl ProvenanceIndex {
    pub fn build(records: &[ProvenanceRecord]) -> Self {
        let mut by_response_id = BTreeMap::new();
        let mut by_file: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (offset, record) in records.iter().enumerate() {
            by_response_id.insert(record.response_id.clone(), offset);
            for file in &record.files {
                let key = normalize_path(&file.file_path);
                if key.is_empty() {
                    continue;
                }
                let ids = by_file.entry(key).or_default();
                if !ids.contains(&record.response_id) {
                    ids.push(record.response_id.clone());
                }
            }
        }
        Self {
            by_response_id,
            by_file,
            updated_at: now_ms(),
        }
    }

    /// Every record indexed at its offset, and every file entry points at a known id.
    pub fn is_consistent_with(&self, records: &[ProvenanceRecord]) -> bool {
        self.by_response_id.len() == records.len()
            && self
                .by_response_id
                .iter()
                .all(|(id, offset)| records.get(*offset).is_some_and(|r| &r.response_id == id))
            && self
                .by_file
                .values()
                .flatten()
                .all(|id| self.by_response_id.contains_key(id))
    }
}

/// Record list and index under `<workspace>/<store_dir>/`.
pub struct ProvenanceStore {
    pub dir: PathBuf,
    workspace_root: PathBuf,
    pub metadata_path: PathBuf,
    pub index_path: PathBuf,
    store_dir_name: String,
}

impl ProvenanceStore {
    pub fn for_workspace(workspace_root: &Path, store_dir: &str) -> ProvenanceStore {
        let dir = workspace_root.join(store_dir);
        ProvenanceStore {
            metadata_path: dir.join(METADATA_FILE),
            index_path: dir.join(INDEX_FILE),
            dir,
            workspace_root: workspace_root.to_path_buf(),
            store_dir_name: store_dir.to_string(),
        }
    }

    /// Create the store directory and keep it out of `git status` via `info/exclude`.
    pub fn ensure(&self) -> Result<(), AiContextError> {
        let created = !self.dir.is_dir();
        fs::create_dir_all(&self.dir)?;
        if created {
            let repo = Repository::new(&self.workspace_root);
            if let Err(e) = repo.exclude_locally(&self.store_dir_name) {
                debug_log(&format!("Could not exclude {} from git: {}", self.store_dir_name, e));
                observability::log_error(&e, Some(serde_json::json!({"operation": "exclude_store"})));
            }
        }
        Ok(())
    }

    /// All records. Missing file is empty; malformed JSON is logged and treated as empty.
    pub fn read_all(&self) -> Result<Vec<ProvenanceRecord>, AiContextError> {
        Ok(read_json_or_default(&self.metadata_path)?.unwrap_or_default())
    }

    /// Stored index, or one rebuilt from the records if it is missing or unreadable.
    pub fn read_index(&self) -> Result<ProvenanceIndex, AiContextError> {
        match read_json_or_default::<ProvenanceIndex>(&self.index_path)? {
            Some(index) => Ok(index),
            None => Ok(ProvenanceIndex::build(&self.read_all()?)),
        }
    }

    /// Insert or merge by `response_id`, then rewrite records and index. Returns the
    /// stored record.
    pub fn upsert(&self, record: ProvenanceRecord) -> Result<ProvenanceRecord, AiContextError> {
        self.ensure()?;
        let mut records = self.read_all()?;

        let stored = match records
            .iter()
            .position(|r| r.response_id == record.response_id)
        {
            Some(pos) => {
                let merged = merge_records(&records[pos], record, &self.store_dir_name);
                records[pos] = merged.clone();
                merged
            }
            None => {
                let mut fresh = record;
                fresh
                    .files
                    .retain(|f| !has_segment(&f.file_path, &self.store_dir_name));
                records.push(fresh.clone());
                fresh
            }
        };

        self.write_all(&records)?;
        debug_log(&format!(
            "Upserted provenance record {} ({} records total)",
            stored.response_id,
            records.len()
        ));
        Ok(stored)
    }

    pub fn by_id(&self, response_id: &str) -> Result<Option<ProvenanceRecord>, AiContextError> {
        let records = self.read_all()?;
        let index = self.read_index()?;
        let indexed = index
            .by_response_id
            .get(response_id)
            .and_then(|offset| records.get(*offset))
            .filter(|r| r.response_id == response_id);
        match indexed {
            Some(record) => Ok(Some(record.clone())),
            // Stale or hand-edited index; fall back to a scan
            None => Ok(records.into_iter().find(|r| r.response_id == response_id)),
        }
    }

    pub fn by_file(&self, path: &str) -> Result<Vec<ProvenanceRecord>, AiContextError> {
        let records = self.read_all()?;
        let index = ProvenanceIndex::build(&records);
        let normalized = normalize_path(path);

        let ids: Vec<&String> = match index.by_file.get(&normalized) {
            Some(ids) => ids.iter().collect(),
            None => index
                .by_file
                .iter()
                .filter(|(key, _)| paths_equivalent(key, &normalized))
                .flat_map(|(_, ids)| ids.iter())
                .collect(),
        };

        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| index.by_response_id.get(id).and_then(|i| records.get(*i)))
            .cloned()
            .collect())
    }

    pub fn by_file_and_line(&self, path: &str, line: u32) -> Result<Vec<ProvenanceRecord>, AiContextError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| {
                record
                    .files
                    .iter()
                    .any(|f| paths_equivalent(&f.file_path, path) && f.covers_line(line))
            })
            .collect())
    }

    fn write_all(&self, records: &[ProvenanceRecord]) -> Result<(), AiContextError> {
        write_json_atomic(&self.metadata_path, &records)?;
        write_json_atomic(&self.index_path, &ProvenanceIndex::build(records))?;
        Ok(())
    }
}

/// Merge a new observation of a response into its existing record.
pub fn merge_records(
    existing: &ProvenanceRecord,
    incoming: ProvenanceRecord,
    store_dir: &str,
) -> ProvenanceRecord {
    let keep_unless_meaningful = |old: &str, new: String, sentinel: &str| {
        if new.trim().is_empty() || new == sentinel {
            old.to_string()
        } else {
            new
        }
    };

    let mut files = existing.files.clone();
    for file in incoming.files {
        if has_segment(&file.file_path, store_dir) {
            continue;
        }
        if files.iter().any(|f| f.file_path == file.file_path) {
            continue;
        }
        files.push(file);
    }

    ProvenanceRecord {
        response_id: existing.response_id.clone(),
        conversation_id: if incoming.conversation_id.is_empty() {
            existing.conversation_id.clone()
        } else {
            incoming.conversation_id
        },
        prompt: keep_unless_meaningful(&existing.prompt, incoming.prompt, NO_PROMPT),
        thinking: keep_unless_meaningful(&existing.thinking, incoming.thinking, NO_RESPONSE),
        files,
        commit_hash: incoming.commit_hash.or_else(|| existing.commit_hash.clone()),
        created_at: incoming.created_at,
        tokens: incoming.tokens.or(existing.tokens),
    }
}

/// Read a JSON document. `Ok(None)` when the file is missing or corrupt; corruption is
/// logged and the file will be overwritten by the next write.
pub(crate) fn read_json_or_default<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AiContextError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<T>(&content) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let err = AiContextError::StoreCorruption(format!("{}: {}", path.display(), e));
            debug_log(&err.to_string());
            observability::log_error(&err, Some(serde_json::json!({ "path": path.display().to_string() })));
            Ok(None)
        }
    }
}

/// Write pretty JSON to a sibling temp file and rename it into place.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AiContextError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp_path, json)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}
