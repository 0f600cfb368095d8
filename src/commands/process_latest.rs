use std::path::Path;
use std::sync::Arc;

use crate::commands::{chat_db_path, open_chat_source, print_json, resolve_workspace};
use crate::config::Config;
use crate::error::AiContextError;
use crate::provenance::pipeline::{CorrelationPipeline, PipelineSettings};
use crate::tracking::change_tracker::{ChangeTracker, ChangeTrackerSettings};

/// One-shot run. No change events exist in a fresh process, so attribution comes from the
/// unrestricted working-tree diff.
pub fn handle_process_latest(workspace: Option<&Path>, db: Option<&Path>) -> Result<(), AiContextError> {
    let config = Config::get();
    let root = resolve_workspace(workspace)?;
    let source = open_chat_source(&root, chat_db_path(db)?);

    let response = config
        .source_backoff()
        .retry("latest_assistant_message", |_| source.latest_assistant_message())?
        .ok_or_else(|| AiContextError::SourceUnavailable("no assistant message found".to_string()))?;

    let tracker = Arc::new(ChangeTracker::new(ChangeTrackerSettings::from_config(config)));
    let pipeline = CorrelationPipeline::new(&root, tracker, source, PipelineSettings::from_config(config));

    match pipeline.process(&response) {
        Some(report) => {
            if let Some(branch) = &report.branch_created {
                eprintln!("Created provenance branch {}", branch);
            }
            print_json(&report.record)
        }
        None => {
            eprintln!("No changed files to attribute to response {}", response.id);
            Ok(())
        }
    }
}
