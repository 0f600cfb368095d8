use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

use crate::error::AiContextError;
use crate::detection::source::{AiResponse, ChatSource, Role, latest_assistant};
use crate::utils::{debug_log, normalize_path, now_ms};

const BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Cursor's global chat store: `<config>/Cursor/User/globalStorage/state.vscdb`.
pub fn default_cursor_db_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join("Cursor")
            .join("User")
            .join("globalStorage")
            .join("state.vscdb")
    })
}

/// Reads composers and bubbles from Cursor's SQLite key-value tables.
///
/// A fresh read-only connection is opened for every call so the editor is never
/// blocked by a long-lived handle.
pub struct CursorDatabase {
    db_path: PathBuf,
    workspace_root: Option<PathBuf>,
}

impl CursorDatabase {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            workspace_root: None,
        }
    }

    /// Limit conversations to those Cursor associates with `workspace_root`.
    pub fn scoped_to(mut self, workspace_root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(workspace_root.into());
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(path: &Path) -> Result<Connection, AiContextError> {
        if !path.exists() {
            return Err(AiContextError::SourceUnavailable(format!(
                "Cursor database not found at {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| AiContextError::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// `workspaceStorage/<hash>/state.vscdb` whose `workspace.json` folder is the workspace.
    pub fn workspace_storage_db(&self) -> Option<PathBuf> {
        let root = self.workspace_root.as_deref()?;
        // <User>/globalStorage/state.vscdb -> <User>/workspaceStorage
        let storage_dir = self.db_path.parent()?.parent()?.join("workspaceStorage");
        find_workspace_storage_db(&storage_dir, root)
    }

    fn composer_ids(&self, conn: &Connection) -> Result<Vec<String>, AiContextError> {
        if self.workspace_root.is_some() {
            if let Some(ws_db) = self.workspace_storage_db() {
                // Known workspace with no chats: do not leak other workspaces' conversations
                return workspace_composer_ids(&ws_db);
            }
            debug_log("No Cursor workspace storage for this workspace, using global composers");
        }

        let mut stmt = conn.prepare("SELECT key FROM cursorDiskKV WHERE key LIKE 'composerData:%'")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("composerData:").map(str::to_string))
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn bubbles(&self, conn: &Connection, composer_id: &str) -> Result<Vec<AiResponse>, AiContextError> {
        let pattern = format!("bubbleId:{}:%", escape_like(composer_id));
        let mut stmt =
            conn.prepare("SELECT key, value FROM cursorDiskKV WHERE key LIKE ?1 ESCAPE '\\'")?;
        // Decoding never fails inside the closure, so a row error is a real SQLite error
        let rows = stmt.query_map([pattern], |row| {
            let key = text_of(row.get_ref(0)?);
            let value = text_of(row.get_ref(1)?);
            Ok((key, value))
        })?;

        let mut bubbles = Vec::new();
        for row in rows {
            let (Some(key), Some(value)) = row? else {
                debug_log(&format!("Skipping undecodable bubble row in {}", composer_id));
                continue;
            };
            let bubble_id = key.split(':').nth(2).unwrap_or_default().to_string();
            match serde_json::from_str::<Value>(&value) {
                Ok(data) => bubbles.push(bubble_from_json(&bubble_id, composer_id, &data)),
                Err(e) => debug_log(&format!("Skipping unparseable bubble {}: {}", key, e)),
            }
        }
        bubbles.sort_by_key(|b| b.timestamp_ms());
        Ok(bubbles)
    }
}

impl ChatSource for CursorDatabase {
    fn latest_assistant_message(&self) -> Result<Option<AiResponse>, AiContextError> {
        let conn = Self::open(&self.db_path)?;
        let mut candidates = Vec::new();
        // Any composer read error fails the whole scan
        for composer_id in self.composer_ids(&conn)? {
            let bubbles = self.bubbles(&conn, &composer_id)?;
            candidates.extend(latest_assistant(&bubbles));
        }
        Ok(latest_assistant(&candidates))
    }

    fn messages(&self, conversation_id: &str) -> Result<Vec<AiResponse>, AiContextError> {
        let conn = Self::open(&self.db_path)?;
        self.bubbles(&conn, conversation_id)
    }

    fn probe(&self) -> Result<(), AiContextError> {
        let conn = Self::open(&self.db_path)?;
        conn.query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='cursorDiskKV'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(|_| ())
        .ok_or_else(|| {
            AiContextError::SourceUnavailable(format!(
                "{} has no cursorDiskKV table",
                self.db_path.display()
            ))
        })
    }
}

/// UTF-8 text of a TEXT or BLOB cell.
fn text_of(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn workspace_composer_ids(ws_db: &Path) -> Result<Vec<String>, AiContextError> {
    let conn = CursorDatabase::open(ws_db)?;
    let has_table = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='ItemTable'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .is_some();
    if !has_table {
        return Ok(Vec::new());
    }
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM ItemTable WHERE key = 'composer.composerData'",
            [],
            |row| Ok(text_of(row.get_ref(0)?)),
        )
        .optional()?
        .flatten();
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let data: Value = serde_json::from_str(&raw)?;
    Ok(data
        .get("allComposers")
        .and_then(Value::as_array)
        .map(|all| {
            all.iter()
                .filter_map(|c| c.get("composerId").and_then(Value::as_str))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// Scan `workspaceStorage/*/workspace.json` for a folder URI naming `workspace_root`.
pub fn find_workspace_storage_db(storage_dir: &Path, workspace_root: &Path) -> Option<PathBuf> {
    let target = comparable_path(&workspace_root.to_string_lossy());
    let target_canonical = workspace_root
        .canonicalize()
        .ok()
        .map(|p| comparable_path(&p.to_string_lossy()));

    for entry in fs::read_dir(storage_dir).ok()?.flatten() {
        let dir = entry.path();
        let state = dir.join("state.vscdb");
        let Ok(raw) = fs::read_to_string(dir.join("workspace.json")) else {
            continue;
        };
        if !state.exists() {
            continue;
        }
        let Some(folder) = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|v| v.get("folder").and_then(Value::as_str).map(str::to_string))
        else {
            continue;
        };
        let Some(stored) = folder_uri_to_path(folder.trim()) else {
            continue;
        };
        let stored = comparable_path(&stored);
        if stored == target || Some(&stored) == target_canonical.as_ref() {
            return Some(state);
        }
    }
    None
}

/// Decode a `file://` folder URI (or a bare path) to a filesystem path string.
fn folder_uri_to_path(folder: &str) -> Option<String> {
    if folder.is_empty() {
        return None;
    }
    if folder.starts_with("file:") {
        let parsed = url::Url::parse(folder).ok()?;
        if let Ok(path) = parsed.to_file_path() {
            return Some(path.to_string_lossy().to_string());
        }
        // Non-native URI shape, e.g. a Windows drive path seen on Unix
        return Some(parsed.path().to_string());
    }
    Some(folder.to_string())
}

fn comparable_path(path: &str) -> String {
    let normalized = normalize_path(path);
    if cfg!(windows) {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

fn bubble_from_json(bubble_id: &str, composer_id: &str, data: &Value) -> AiResponse {
    let role = match data.get("type").and_then(Value::as_i64) {
        Some(2) => Role::Assistant,
        _ => Role::User,
    };
    AiResponse {
        id: bubble_id.to_string(),
        conversation_id: composer_id.to_string(),
        timestamp: parse_timestamp(data.get("createdAt")).unwrap_or_else(now_ms),
        role,
        text: extract_bubble_text(data),
        tokens: parse_tokens(data.get("tokenCount")),
    }
}

/// Body text across the shapes Cursor has used for bubbles.
pub fn extract_bubble_text(data: &Value) -> String {
    let non_blank = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    let join_parts = |parts: &[Value]| {
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.as_str().or_else(|| p.get("text").and_then(Value::as_str)))
            .filter(|s| !s.is_empty())
            .collect();
        (!texts.is_empty()).then(|| texts.join("\n"))
    };

    if let Some(text) = non_blank(data.get("text")) {
        return text;
    }
    match data.get("content") {
        Some(Value::String(s)) if !s.trim().is_empty() => return s.clone(),
        Some(Value::Array(parts)) => {
            if let Some(joined) = join_parts(parts) {
                return joined;
            }
        }
        _ => {}
    }
    if let Some(raw) = data.get("rawContent").and_then(Value::as_str) {
        return raw.to_string();
    }
    if let Some(message) = data.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(parts) = data.get("parts").and_then(Value::as_array) {
        if let Some(joined) = join_parts(parts) {
            return joined;
        }
    }
    String::new()
}

fn parse_timestamp(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.timestamp_millis())
            .or_else(|| s.trim().parse::<i64>().ok()),
        _ => None,
    }
}

/// `tokenCount` is either a number or `{inputTokens, outputTokens}`.
fn parse_tokens(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => {
            let total: u64 = map.values().filter_map(Value::as_u64).sum();
            (total > 0).then_some(total)
        }
        _ => None,
    }
}
