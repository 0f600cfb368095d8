pub mod ai_context_handlers;
pub mod lookup;
pub mod process_latest;
pub mod ranges;
pub mod show;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::detection::cursor_db::{CursorDatabase, default_cursor_db_path};
use crate::detection::source::ChatSource;
use crate::error::AiContextError;
use crate::git::repository::find_repository_in_path;
use crate::observability;

/// Canonical workspace root from `--workspace`, else the enclosing repository's top
/// level, else the current directory.
pub(crate) fn resolve_workspace(workspace: Option<&Path>) -> Result<PathBuf, AiContextError> {
    let root = match workspace {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir()?;
            match find_repository_in_path(&cwd.to_string_lossy()) {
                Ok(repo) => repo.workdir().to_path_buf(),
                Err(_) => cwd,
            }
        }
    };
    if !root.is_dir() {
        return Err(AiContextError::Generic(format!(
            "workspace {} is not a directory",
            root.display()
        )));
    }
    let root = root.canonicalize()?;
    observability::set_log_dir(&root.join(Config::get().store_dir()).join("logs"));
    Ok(root)
}

/// Cursor's `state.vscdb`, from `--db`, config, or the platform default.
pub(crate) fn chat_db_path(db_override: Option<&Path>) -> Result<PathBuf, AiContextError> {
    db_override
        .map(Path::to_path_buf)
        .or_else(|| Config::get().cursor_db_path().map(Path::to_path_buf))
        .or_else(default_cursor_db_path)
        .ok_or_else(|| AiContextError::SourceUnavailable("could not locate the Cursor chat database".to_string()))
}

pub(crate) fn open_chat_source(workspace_root: &Path, db_path: PathBuf) -> Arc<dyn ChatSource> {
    let mut database = CursorDatabase::new(db_path);
    if Config::get().scope_to_workspace() {
        database = database.scoped_to(workspace_root);
    }
    Arc::new(database)
}

pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AiContextError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
