use crate::error::AiContextError;
use crate::git::repository::{Repository, exec_git_with_env};
use std::ffi::OsString;
use std::path::Path;
use std::str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Unmodified,
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Unmerged,
    Untracked,
    Ignored,
    Unknown(char),
}

impl From<char> for StatusCode {
    fn from(value: char) -> Self {
        match value {
            '.' => StatusCode::Unmodified,
            'M' => StatusCode::Modified,
            'A' => StatusCode::Added,
            'D' => StatusCode::Deleted,
            'R' => StatusCode::Renamed,
            'C' => StatusCode::Copied,
            'U' => StatusCode::Unmerged,
            '?' => StatusCode::Untracked,
            '!' => StatusCode::Ignored,
            other => StatusCode::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Ordinary,
    Rename,
    Copy,
    Unmerged,
    Untracked,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub staged: StatusCode,
    pub unstaged: StatusCode,
    pub kind: EntryKind,
    pub orig_path: Option<String>,
}

impl StatusEntry {
    pub fn is_staged(&self) -> bool {
        !matches!(
            self.staged,
            StatusCode::Unmodified | StatusCode::Untracked | StatusCode::Ignored
        )
    }
}

impl Repository {
    /// Run status porcelain v2, optionally against an alternate index file.
    pub fn status(&self, index_file: Option<&Path>) -> Result<Vec<StatusEntry>, AiContextError> {
        let mut args = self.global_args_for_exec();
        args.push("status".to_string());
        args.push("--porcelain=v2".to_string());
        args.push("-z".to_string());
        args.push("--untracked-files=no".to_string());

        let envs: Vec<(&str, OsString)> = index_file
            .map(|p| vec![("GIT_INDEX_FILE", p.as_os_str().to_os_string())])
            .unwrap_or_default();
        let output = exec_git_with_env(&args, &envs)?;

        parse_porcelain_v2(&output.stdout)
    }

    /// Paths with staged changes relative to HEAD in the given index.
    pub fn staged_paths(&self, index_file: Option<&Path>) -> Result<Vec<String>, AiContextError> {
        Ok(self
            .status(index_file)?
            .into_iter()
            .filter(StatusEntry::is_staged)
            .map(|e| e.path)
            .collect())
    }
}

fn parse_xy(xy: &str) -> Result<(StatusCode, StatusCode), AiContextError> {
    let mut chars = xy.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(x), Some(y), None) => Ok((StatusCode::from(x), StatusCode::from(y))),
        _ => Err(AiContextError::Generic(format!(
            "Unexpected XY field length: {}",
            xy
        ))),
    }
}

fn parse_porcelain_v2(data: &[u8]) -> Result<Vec<StatusEntry>, AiContextError> {
    let mut entries = Vec::new();
    let mut parts = data
        .split(|byte| *byte == 0)
        .filter(|slice| !slice.is_empty())
        .peekable();

    while let Some(raw) = parts.next() {
        let record = str::from_utf8(raw)?;
        let tag = record
            .chars()
            .next()
            .ok_or_else(|| AiContextError::Generic("Unexpected empty porcelain v2 record".into()))?;

        match tag {
            // 1 XY sub mH mI mW hH hI path
            // u XY sub m1 m2 m3 mW h1 h2 h3 path
            '1' | 'u' => {
                let field_count = if tag == '1' { 9 } else { 11 };
                let mut fields = record.splitn(field_count, ' ');
                let _ = fields.next(); // tag
                let xy = fields
                    .next()
                    .ok_or_else(|| AiContextError::Generic("Missing XY field".into()))?;
                let (staged, unstaged) = parse_xy(xy)?;

                let path = fields
                    .nth(field_count - 3)
                    .ok_or_else(|| AiContextError::Generic("Missing path field".into()))?
                    .to_string();

                let kind = if tag == 'u'
                    || matches!(staged, StatusCode::Unmerged)
                    || matches!(unstaged, StatusCode::Unmerged)
                {
                    EntryKind::Unmerged
                } else {
                    EntryKind::Ordinary
                };

                entries.push(StatusEntry {
                    path,
                    staged,
                    unstaged,
                    kind,
                    orig_path: None,
                });
            }
            // 2 XY sub mH mI mW hH hI Xscore path \0 origPath
            '2' => {
                let mut fields = record.splitn(10, ' ');
                let _ = fields.next(); // tag
                let xy = fields
                    .next()
                    .ok_or_else(|| AiContextError::Generic("Missing XY field".into()))?;
                let (staged, unstaged) = parse_xy(xy)?;

                let path = fields
                    .nth(7)
                    .ok_or_else(|| AiContextError::Generic("Missing path field".into()))?
                    .to_string();

                let orig_path_bytes = parts.next().ok_or_else(|| {
                    AiContextError::Generic("Missing original path for rename/copy".into())
                })?;
                let orig_path = str::from_utf8(orig_path_bytes)?.to_string();

                let kind = match staged {
                    StatusCode::Renamed => EntryKind::Rename,
                    StatusCode::Copied => EntryKind::Copy,
                    _ => EntryKind::Ordinary,
                };

                entries.push(StatusEntry {
                    path,
                    staged,
                    unstaged,
                    kind,
                    orig_path: Some(orig_path),
                });
            }
            '?' => {
                let path = record.strip_prefix("? ").unwrap_or(record).to_string();
                entries.push(StatusEntry {
                    path,
                    staged: StatusCode::Unmodified,
                    unstaged: StatusCode::Untracked,
                    kind: EntryKind::Untracked,
                    orig_path: None,
                });
            }
            '!' => {
                let path = record.strip_prefix("! ").unwrap_or(record).to_string();
                entries.push(StatusEntry {
                    path,
                    staged: StatusCode::Unmodified,
                    unstaged: StatusCode::Ignored,
                    kind: EntryKind::Ignored,
                    orig_path: None,
                });
            }
            // Header lines ("# branch.oid ...") only appear with --branch
            '#' => {}
            other => {
                return Err(AiContextError::Generic(format!(
                    "Unsupported porcelain v2 record tag: {}",
                    other
                )));
            }
        }
    }

    Ok(entries)
}
