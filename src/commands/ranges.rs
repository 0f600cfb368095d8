use std::path::Path;

use crate::commands::{print_json, resolve_workspace};
use crate::config::Config;
use crate::git::diff::{DiffRequest, DiffResolver};
use crate::git::repository::Repository;
use crate::error::AiContextError;

pub fn handle_ranges(
    workspace: Option<&Path>,
    commit: Option<String>,
    paths: Vec<String>,
) -> Result<(), AiContextError> {
    let root = resolve_workspace(workspace)?;
    let repo = Repository::new(&root);
    let resolver = DiffResolver::new(Config::get().store_dir());

    let request = DiffRequest {
        commit_hash: commit,
        candidate_paths: if paths.is_empty() { None } else { Some(paths) },
    };
    let ranges = resolver.diff_line_ranges(&repo, &request)?;
    print_json(&ranges)
}
