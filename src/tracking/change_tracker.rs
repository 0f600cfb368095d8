use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use glob::Pattern;

use crate::config::{Config, DEFAULT_IGNORED_SEGMENTS};
use crate::provenance::path_match::has_segment;
use crate::utils::{Clock, SystemClock, normalize_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub file_path: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct ChangeTrackerSettings {
    pub retention: Duration,
    pub ignored_segments: Vec<String>,
    pub ignore_patterns: Vec<Pattern>,
}

impl Default for ChangeTrackerSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(10 * 60),
            ignored_segments: DEFAULT_IGNORED_SEGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl ChangeTrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retention: config.retention(),
            ignored_segments: config.ignored_segments().to_vec(),
            ignore_patterns: config.ignore_patterns().to_vec(),
        }
    }
}

/// Time-pruned log of file mutations, queried by time window.
pub struct ChangeTracker {
    settings: ChangeTrackerSettings,
    clock: Arc<dyn Clock>,
    events: Mutex<VecDeque<ChangeEvent>>,
}

impl ChangeTracker {
    pub fn new(settings: ChangeTrackerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ChangeTrackerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Paths under an ignored segment or matching an ignore pattern are never recorded.
    pub fn is_excluded(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            return true;
        }
        self.settings
            .ignored_segments
            .iter()
            .any(|segment| has_segment(&normalized, segment))
            || self
                .settings
                .ignore_patterns
                .iter()
                .any(|pattern| pattern.matches(&normalized))
    }

    /// Returns whether the event was kept.
    pub fn record(&self, path: &str, timestamp: i64) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        let mut events = self.lock_events();
        self.prune(&mut events);
        events.push_back(ChangeEvent {
            file_path: normalize_path(path),
            timestamp,
        });
        true
    }

    /// Distinct paths with `from <= timestamp <= from + duration_ms`.
    pub fn files_in_window(&self, from: i64, duration_ms: i64) -> BTreeSet<String> {
        let until = from.saturating_add(duration_ms);
        let mut events = self.lock_events();
        self.prune(&mut events);
        events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= until)
            .map(|e| e.file_path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let mut events = self.lock_events();
        self.prune(&mut events);
        events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock_events().clear();
    }

    fn prune(&self, events: &mut VecDeque<ChangeEvent>) {
        let retention_ms = i64::try_from(self.settings.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_ms().saturating_sub(retention_ms);
        events.retain(|e| e.timestamp >= cutoff);
    }

    fn lock_events(&self) -> MutexGuard<'_, VecDeque<ChangeEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
