use std::path::Path;

use crate::commands::{print_json, resolve_workspace};
use crate::config::Config;
use crate::error::AiContextError;
use crate::provenance::store::ProvenanceStore;

pub fn handle_show(workspace: Option<&Path>, id: Option<&str>, file: Option<&str>) -> Result<(), AiContextError> {
    let root = resolve_workspace(workspace)?;
    let store = ProvenanceStore::for_workspace(&root, Config::get().store_dir());

    match (id, file) {
        (Some(id), _) => match store.by_id(id)? {
            Some(record) => print_json(&record),
            None => Err(AiContextError::Generic(format!("no provenance record with id {}", id))),
        },
        (None, Some(file)) => print_json(&store.by_file(file)?),
        (None, None) => print_json(&store.read_all()?),
    }
}
