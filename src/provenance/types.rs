use serde::{Deserialize, Serialize};
use std::fmt;

pub const NO_PROMPT: &str = "(no prompt)";
pub const NO_RESPONSE: &str = "(no response)";

/// 1-indexed inclusive line span. `1 <= start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLineRange")]
pub struct LineRange {
    start: u32,
    end: u32,
}

#[derive(Deserialize)]
struct RawLineRange {
    start: u32,
    end: u32,
}

impl TryFrom<RawLineRange> for LineRange {
    type Error = String;

    fn try_from(raw: RawLineRange) -> Result<Self, Self::Error> {
        LineRange::new(raw.start, raw.end)
            .ok_or_else(|| format!("invalid line range {}-{}", raw.start, raw.end))
    }
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Option<Self> {
        if start >= 1 && end >= start {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn single(line: u32) -> Option<Self> {
        Self::new(line, line)
    }

    /// Range covered by a hunk's new side. `None` for pure deletions.
    pub fn from_hunk(new_start: u32, new_lines: u32) -> Option<Self> {
        if new_lines == 0 {
            return None;
        }
        Self::new(new_start, new_start.checked_add(new_lines - 1)?)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Sort by start and fold ranges that overlap or touch.
pub fn merge_ranges(mut ranges: Vec<LineRange>) -> Vec<LineRange> {
    ranges.sort();
    let mut merged: Vec<LineRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(prev) if range.start <= prev.end.saturating_add(1) => {
                prev.end = prev.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub file_path: String,
    pub line_ranges: Vec<LineRange>,
}

impl FileChange {
    pub fn new(file_path: impl Into<String>, line_ranges: Vec<LineRange>) -> Self {
        Self {
            file_path: file_path.into(),
            line_ranges: merge_ranges(line_ranges),
        }
    }

    /// Marker for a file known to be touched whose exact lines are unknown.
    pub fn touched(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line_ranges: LineRange::single(1).into_iter().collect(),
        }
    }

    pub fn covers_line(&self, line: u32) -> bool {
        self.line_ranges.iter().any(|r| r.contains(line))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub response_id: String,
    pub conversation_id: String,
    pub prompt: String,
    pub thinking: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Processing time in ms, not the response's own timestamp.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

/// Per-commit document kept by the secondary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitContext {
    pub commit_hash: String,
    pub timestamp: i64,
    #[serde(default)]
    pub changes: Vec<FileChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub response_ids: Vec<String>,
}

impl CommitContext {
    pub fn from_record(record: &ProvenanceRecord, commit_hash: &str) -> Self {
        Self {
            commit_hash: commit_hash.to_string(),
            timestamp: record.created_at,
            changes: record.files.clone(),
            prompt: Some(record.prompt.clone()).filter(|p| p != NO_PROMPT),
            thinking: Some(record.thinking.clone()).filter(|t| t != NO_RESPONSE),
            tokens: record.tokens,
            response_ids: vec![record.response_id.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u32, end: u32) -> LineRange {
        LineRange::new(start, end).unwrap()
    }

    #[test]
    fn test_line_range_construction() {
        assert!(LineRange::new(0, 3).is_none());
        assert!(LineRange::new(5, 4).is_none());
        assert_eq!(LineRange::from_hunk(3, 4), Some(r(3, 6)));
        assert_eq!(LineRange::from_hunk(7, 0), None);
        assert_eq!(LineRange::from_hunk(0, 0), None);
        assert!(r(3, 6).contains(6));
        assert!(!r(3, 6).contains(7));
    }

    #[test]
    fn test_merge_adjacent_and_overlapping() {
        assert_eq!(
            merge_ranges(vec![r(12, 12), r(6, 10), r(1, 5)]),
            vec![r(1, 10), r(12, 12)]
        );
        assert_eq!(merge_ranges(vec![r(1, 8), r(3, 4)]), vec![r(1, 8)]);
        assert!(merge_ranges(Vec::new()).is_empty());
    }

    #[test]
    fn test_invalid_range_rejected_on_deserialize() {
        let ok: LineRange = serde_json::from_str(r#"{"start":2,"end":4}"#).unwrap();
        assert_eq!(ok, r(2, 4));
        assert!(serde_json::from_str::<LineRange>(r#"{"start":4,"end":2}"#).is_err());
        assert!(serde_json::from_str::<LineRange>(r#"{"start":0,"end":0}"#).is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ProvenanceRecord {
            response_id: "b1".into(),
            conversation_id: "c1".into(),
            prompt: "p".into(),
            thinking: "t".into(),
            files: vec![FileChange::new("src/x.ts", vec![r(3, 6)])],
            commit_hash: None,
            created_at: 5,
            tokens: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["responseId"], "b1");
        assert_eq!(json["files"][0]["filePath"], "src/x.ts");
        assert_eq!(json["files"][0]["lineRanges"][0]["end"], 6);
        assert!(json.get("commitHash").is_none());
    }

    #[test]
    fn test_commit_context_drops_sentinels() {
        let record = ProvenanceRecord {
            response_id: "b1".into(),
            conversation_id: "c1".into(),
            prompt: NO_PROMPT.into(),
            thinking: "did it".into(),
            files: vec![FileChange::touched("a.ts")],
            commit_hash: Some("abc".into()),
            created_at: 9,
            tokens: Some(12),
        };
        let ctx = CommitContext::from_record(&record, "abc");
        assert_eq!(ctx.prompt, None);
        assert_eq!(ctx.thinking.as_deref(), Some("did it"));
        assert_eq!(ctx.response_ids, vec!["b1".to_string()]);
        assert_eq!(ctx.changes[0].line_ranges, vec![r(1, 1)]);
    }
}
