use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Events kept in memory before a log directory is known; older ones are dropped.
const MAX_BUFFERED_EVENTS: usize = 512;

#[derive(Serialize, Deserialize, Clone)]
struct ErrorEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone)]
struct MessageEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: String,
    message: String,
    level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone)]
struct PerformanceEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    timestamp: String,
    operation: String,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
}

#[derive(Clone)]
enum LogEnvelope {
    Error(ErrorEnvelope),
    Performance(PerformanceEnvelope),
    Message(MessageEnvelope),
}

impl LogEnvelope {
    fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            LogEnvelope::Error(e) => serde_json::to_value(e).ok(),
            LogEnvelope::Performance(p) => serde_json::to_value(p).ok(),
            LogEnvelope::Message(m) => serde_json::to_value(m).ok(),
        }
    }
}

enum LogMode {
    Buffered(Vec<LogEnvelope>),
    Disk(PathBuf),
}

struct ObservabilityInner {
    mode: LogMode,
}

static OBSERVABILITY: OnceLock<Mutex<ObservabilityInner>> = OnceLock::new();

fn get_observability() -> &'static Mutex<ObservabilityInner> {
    OBSERVABILITY.get_or_init(|| {
        Mutex::new(ObservabilityInner {
            mode: LogMode::Buffered(Vec::new()),
        })
    })
}

/// Point the event log at `<log_dir>/<pid>.log` and flush anything buffered so far.
/// Later calls are ignored.
pub fn set_log_dir(log_dir: &Path) {
    if fs::create_dir_all(log_dir).is_err() {
        return;
    }
    let log_path = log_dir.join(format!("{}.log", std::process::id()));

    let Ok(mut obs) = get_observability().lock() else {
        return;
    };

    let buffered_events = match &mut obs.mode {
        LogMode::Buffered(events) => std::mem::take(events),
        LogMode::Disk(_) => return,
    };

    obs.mode = LogMode::Disk(log_path.clone());
    drop(obs); // Release lock before writing

    if !buffered_events.is_empty() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            for envelope in buffered_events {
                if let Some(json) = envelope.to_json() {
                    let _ = writeln!(file, "{}", json);
                }
            }
        }
    }
}

/// Current log file, if a log directory has been set.
pub fn log_file_path() -> Option<PathBuf> {
    let obs = get_observability().lock().ok()?;
    match &obs.mode {
        LogMode::Disk(path) => Some(path.clone()),
        LogMode::Buffered(_) => None,
    }
}

fn append_envelope(envelope: LogEnvelope) {
    let Ok(mut obs) = get_observability().lock() else {
        return;
    };

    match &mut obs.mode {
        LogMode::Buffered(buffer) => {
            if buffer.len() >= MAX_BUFFERED_EVENTS {
                buffer.remove(0);
            }
            buffer.push(envelope);
        }
        LogMode::Disk(log_path) => {
            let log_path = log_path.clone();
            drop(obs); // Release lock before file I/O

            if let Some(json) = envelope.to_json() {
                if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
                    let _ = writeln!(file, "{}", json);
                }
            }
        }
    }
}

pub fn log_error(error: &dyn std::error::Error, context: Option<serde_json::Value>) {
    let envelope = ErrorEnvelope {
        event_type: "error".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        message: error.to_string(),
        context,
    };

    append_envelope(LogEnvelope::Error(envelope));
}

pub fn log_performance(
    operation: &str,
    duration: Duration,
    context: Option<serde_json::Value>,
    tags: Option<HashMap<String, String>>,
) {
    let envelope = PerformanceEnvelope {
        event_type: "performance".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        operation: operation.to_string(),
        duration_ms: duration.as_millis(),
        context,
        tags,
    };

    append_envelope(LogEnvelope::Performance(envelope));
}

/// Log a message (info, warning, etc.)
pub fn log_message(message: &str, level: &str, context: Option<serde_json::Value>) {
    let envelope = MessageEnvelope {
        event_type: "message".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        message: message.to_string(),
        level: level.to_string(),
        context,
    };

    append_envelope(LogEnvelope::Message(envelope));
}
