use std::path::Path;
use std::sync::Arc;

use notify::RecursiveMode;

use crate::commands::{chat_db_path, open_chat_source, resolve_workspace};
use crate::config::Config;
use crate::detection::follow_up::{FollowUpScheduler, FollowUpSettings, FollowUpTicket};
use crate::detection::response_detector::{DetectorSettings, ResponseDetector};
use crate::detection::source::AiResponse;
use crate::error::AiContextError;
use crate::observability::log_message;
use crate::provenance::pipeline::{CorrelationPipeline, PipelineSettings};
use crate::tracking::change_tracker::{ChangeTracker, ChangeTrackerSettings};
use crate::tracking::fs_watch::{FsWatcher, is_content_change};
use crate::utils::debug_log;

/// Runs until the process is killed.
pub fn handle_watch(workspace: Option<&Path>, db: Option<&Path>) -> Result<(), AiContextError> {
    let config = Config::get();
    let root = resolve_workspace(workspace)?;
    let db_path = chat_db_path(db)?;
    let source = open_chat_source(&root, db_path.clone());

    let tracker = Arc::new(ChangeTracker::new(ChangeTrackerSettings::from_config(config)));
    let _workspace_watcher = FsWatcher::track_workspace(&root, tracker.clone())?;

    let pipeline = Arc::new(CorrelationPipeline::new(
        &root,
        tracker,
        source.clone(),
        PipelineSettings::from_config(config),
    ));

    let follow_up = if config.feature_flags().follow_up_rescans {
        let rerun = pipeline.clone();
        Some(Arc::new(FollowUpScheduler::start(
            FollowUpSettings::from_config(config),
            Arc::new(move |response: &AiResponse, ticket: &FollowUpTicket| {
                rerun.rerun_if(response, || ticket.is_current());
            }),
        )?))
    } else {
        None
    };

    let on_response = {
        let pipeline = pipeline.clone();
        let follow_up = follow_up.clone();
        Arc::new(move |response: &AiResponse| {
            debug_log(&format!("New assistant response {}", response.id));
            // Supersede the previous follow-up before this run can take the pipeline
            if let Some(scheduler) = &follow_up {
                scheduler.schedule(response.clone());
            }
            pipeline.run(response);
        })
    };

    let mut detector = ResponseDetector::new(source, DetectorSettings::from_config(config), on_response);
    detector.start()?;

    let _db_watcher = watch_chat_db(&db_path, &detector);

    log_message(
        "watch started",
        "info",
        Some(serde_json::json!({"workspace": root.display().to_string()})),
    );
    eprintln!("Watching {} (chat store {})", root.display(), db_path.display());

    loop {
        std::thread::park();
    }
}

/// Nudges the detector whenever the chat database or its WAL changes. Polling still runs
/// when the directory cannot be watched.
fn watch_chat_db(db_path: &Path, detector: &ResponseDetector) -> Option<FsWatcher> {
    let dir = db_path.parent().map(Path::to_path_buf)?;
    let db_name = db_path.file_name()?.to_string_lossy().to_string();
    let notifier = detector.notifier();

    let watcher = FsWatcher::watch(&dir, RecursiveMode::NonRecursive, move |event| {
        if is_content_change(&event.kind) && event.paths.iter().any(|p| is_chat_db_file(p, &db_name)) {
            notifier.notify();
        }
    });

    match watcher {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            debug_log(&format!("Chat store watch unavailable, polling only: {}", e));
            None
        }
    }
}

fn is_chat_db_file(path: &Path, db_name: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(db_name))
        .unwrap_or(false)
}
