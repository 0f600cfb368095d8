use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::AiContextError;
use crate::observability;
use crate::tracking::change_tracker::ChangeTracker;
use crate::utils::{debug_log, normalize_path};

/// Keeps a `notify` watcher alive; dropping it stops delivery.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Watch `path` and hand every event to `on_event` on the watcher's thread.
    pub fn watch<F>(path: &Path, mode: RecursiveMode, on_event: F) -> Result<Self, AiContextError>
    where
        F: Fn(Event) + Send + 'static,
    {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => on_event(event),
            Err(e) => {
                debug_log(&format!("Watch error: {}", e));
                observability::log_error(&AiContextError::from(e), None);
            }
        })?;
        watcher.watch(path, mode)?;
        Ok(Self { _watcher: watcher })
    }

    /// Feed create/modify/remove events under `root` into the tracker, timestamped on
    /// arrival with the tracker's clock.
    pub fn track_workspace(root: &Path, tracker: Arc<ChangeTracker>) -> Result<Self, AiContextError> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let base = root.clone();
        Self::watch(&root, RecursiveMode::Recursive, move |event| {
            record_event(&base, &tracker, &event);
        })
    }
}

/// Record the files an event touched. Directories are never recorded themselves; a new
/// directory is walked because files written into it can land before its watch is added.
pub fn record_event(root: &Path, tracker: &ChangeTracker, event: &Event) {
    if !is_content_change(&event.kind) {
        return;
    }
    if matches!(event.kind, EventKind::Remove(RemoveKind::Folder)) {
        return;
    }
    let now = tracker.now_ms();
    for path in &event.paths {
        let is_dir = matches!(event.kind, EventKind::Create(CreateKind::Folder)) || path.is_dir();
        if !is_dir {
            if let Some(relative) = relative_to_root(root, path) {
                tracker.record(&relative, now);
            }
            continue;
        }
        if matches!(event.kind, EventKind::Create(_)) {
            for file in files_under(root, tracker, path) {
                if let Some(relative) = relative_to_root(root, &file) {
                    tracker.record(&relative, now);
                }
            }
        }
    }
}

/// Regular files below `dir`, not descending into excluded directories.
fn files_under(root: &Path, tracker: &ChangeTracker, dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        if relative_to_root(root, &current).is_some_and(|r| tracker.is_excluded(&r)) {
            continue;
        }
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files
}

/// Create, modify (not metadata-only) and remove events.
pub fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Workspace-relative, forward-slash path; `None` outside the root or for the root itself.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let relative = path
        .strip_prefix(root)
        .ok()
        .or_else(|| {
            let canonical_root = root.canonicalize().ok()?;
            // Event paths may carry a resolved prefix (e.g. /private/var on macOS)
            path.strip_prefix(&canonical_root).ok()
        })?;
    let normalized = normalize_path(&relative.to_string_lossy());
    (!normalized.is_empty()).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};

    #[test]
    fn test_content_change_kinds() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_content_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_content_change(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Read)));
    }

    #[test]
    fn test_relative_to_root() {
        let root = Path::new("/work/repo");
        assert_eq!(
            relative_to_root(root, Path::new("/work/repo/src/x.ts")).as_deref(),
            Some("src/x.ts")
        );
        assert_eq!(relative_to_root(root, Path::new("/work/repo")), None);
        assert_eq!(relative_to_root(root, Path::new("/elsewhere/x.ts")), None);
    }

    fn create_event(kind: CreateKind, path: PathBuf) -> Event {
        Event::new(EventKind::Create(kind)).add_path(path)
    }

    #[test]
    fn test_new_directory_records_its_files_not_itself() {
        use crate::tracking::change_tracker::ChangeTrackerSettings;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/x.ts"), "x\n").unwrap();
        fs::write(root.join("src/nested/y.ts"), "y\n").unwrap();
        fs::create_dir_all(root.join("src/node_modules")).unwrap();
        fs::write(root.join("src/node_modules/dep.js"), "z\n").unwrap();
        let tracker = ChangeTracker::new(ChangeTrackerSettings::default());

        record_event(&root, &tracker, &create_event(CreateKind::Folder, root.join("src")));
        // Some backends report directories as CreateKind::Any
        record_event(&root, &tracker, &create_event(CreateKind::Any, root.join("src/nested")));

        let seen: Vec<String> = tracker.files_in_window(0, i64::MAX).into_iter().collect();
        assert_eq!(seen, vec!["src/nested/y.ts".to_string(), "src/x.ts".to_string()]);
    }

    #[test]
    fn test_removed_directory_is_not_recorded() {
        use crate::tracking::change_tracker::ChangeTrackerSettings;

        let root = Path::new("/work/repo");
        let tracker = ChangeTracker::new(ChangeTrackerSettings::default());
        let event = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(root.join("src"));
        record_event(root, &tracker, &event);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_track_workspace_records_written_files() {
        use crate::tracking::change_tracker::ChangeTrackerSettings;
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(ChangeTracker::new(ChangeTrackerSettings::default()));
        let _watcher = FsWatcher::track_workspace(dir.path(), tracker.clone()).unwrap();

        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/x.ts"), "x\n").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/dep.js"), "y\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Default::default();
        while Instant::now() < deadline {
            seen = tracker.files_in_window(0, i64::MAX);
            if seen.contains("src/x.ts") {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(seen.contains("src/x.ts"), "seen: {:?}", seen);
        assert!(!seen.contains("src"), "directory recorded: {:?}", seen);
        assert!(seen.iter().all(|p| !p.starts_with("node_modules")));
    }
}
