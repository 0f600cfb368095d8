use std::collections::BTreeMap;

use crate::error::AiContextError;
use crate::git::repository::{EMPTY_TREE_SHA, Repository};
use crate::provenance::path_match::{has_segment, paths_equivalent};
use crate::provenance::types::{LineRange, merge_ranges};
use crate::utils::{debug_log, normalize_path};

pub type LineRangesByFile = BTreeMap<String, Vec<LineRange>>;

#[derive(Debug, Clone, Default)]
pub struct DiffRequest {
    /// Diff this commit instead of the working tree.
    pub commit_hash: Option<String>,
    /// Only keep files equivalent to one of these paths.
    pub candidate_paths: Option<Vec<String>>,
}

impl DiffRequest {
    pub fn working_tree() -> Self {
        Self::default()
    }

    pub fn for_candidates<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commit_hash: None,
            candidate_paths: Some(paths.into_iter().map(Into::into).collect()),
        }
    }

    pub fn for_commit(hash: impl Into<String>) -> Self {
        Self {
            commit_hash: Some(hash.into()),
            candidate_paths: None,
        }
    }
}

/// Turns `git diff` / `git show` output into merged line ranges per file.
#[derive(Debug, Clone)]
pub struct DiffResolver {
    store_dir: String,
}

impl DiffResolver {
    pub fn new(store_dir: impl Into<String>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// Changed line ranges keyed by workspace-relative path.
    ///
    /// An empty map means no changes, or that the workspace is not a git repository.
    pub fn diff_line_ranges(
        &self,
        repo: &Repository,
        request: &DiffRequest,
    ) -> Result<LineRangesByFile, AiContextError> {
        let raw = match run_diff(repo, request.commit_hash.as_deref()) {
            Ok(raw) => raw,
            Err(e) if e.is_not_a_repository() => {
                debug_log(&format!(
                    "{} is not a git repository, no diff",
                    repo.workdir().display()
                ));
                return Ok(LineRangesByFile::new());
            }
            Err(e) => return Err(AiContextError::DiffParseError(e.to_string())),
        };

        let parsed = parse_unified_diff(&raw)?;

        let mut result = LineRangesByFile::new();
        for (path, ranges) in parsed {
            if has_segment(&path, &self.store_dir) {
                continue;
            }
            if let Some(candidates) = &request.candidate_paths {
                if !candidates.iter().any(|c| paths_equivalent(c, &path)) {
                    continue;
                }
            }
            result.insert(path, ranges);
        }
        Ok(result)
    }
}

// Explicit prefixes override diff.noprefix and diff.mnemonicPrefix
fn run_diff(repo: &Repository, commit_hash: Option<&str>) -> Result<String, AiContextError> {
    let output = match commit_hash {
        Some(hash) => repo.git(&[
            "show",
            hash,
            "--no-color",
            "--no-ext-diff",
            "-U0",
            "--format=",
            "--relative",
            "--src-prefix=a/",
            "--dst-prefix=b/",
        ])?,
        None => {
            // Probe first so "not a repository" surfaces before HEAD resolution fails
            repo.git(&["rev-parse", "--git-dir"])?;
            let base = if repo.has_commits() { "HEAD" } else { EMPTY_TREE_SHA };
            repo.git(&[
                "diff",
                base,
                "--no-color",
                "--no-ext-diff",
                "-U0",
                "--relative",
                "--src-prefix=a/",
                "--dst-prefix=b/",
            ])?
        }
    };
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

struct HunkHeader {
    new_start: u32,
    new_lines: u32,
    old_lines: u32,
}

/// Parse `@@ -a[,b] +c[,d] @@`. A missing count means 1.
fn parse_hunk_header(line: &str) -> Result<HunkHeader, AiContextError> {
    let malformed = || AiContextError::DiffParseError(format!("malformed hunk header: {}", line));

    let body = line.strip_prefix("@@ ").ok_or_else(malformed)?;
    let end = body.find(" @@").ok_or_else(malformed)?;
    let mut sides = body[..end].split_whitespace();

    let old = sides
        .next()
        .and_then(|s| s.strip_prefix('-'))
        .ok_or_else(malformed)?;
    let new = sides
        .next()
        .and_then(|s| s.strip_prefix('+'))
        .ok_or_else(malformed)?;
    if sides.next().is_some() {
        return Err(malformed());
    }

    let parse_side = |side: &str| -> Result<(u32, u32), AiContextError> {
        let mut parts = side.splitn(2, ',');
        let start = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let count = match parts.next() {
            Some(c) => c.parse::<u32>().map_err(|_| malformed())?,
            None => 1,
        };
        Ok((start, count))
    };

    let (_, old_lines) = parse_side(old)?;
    let (new_start, new_lines) = parse_side(new)?;
    Ok(HunkHeader {
        new_start,
        new_lines,
        old_lines,
    })
}

/// Path from a `+++` header, `None` for `/dev/null` (deleted file).
fn parse_new_path(header: &str) -> Option<String> {
    let raw = header.trim_end_matches(['\r', '\t']);
    let raw = if raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2 {
        unquote_c_style(&raw[1..raw.len() - 1])
    } else {
        raw.to_string()
    };
    if raw == "/dev/null" {
        return None;
    }
    let path = raw.strip_prefix("b/").unwrap_or(&raw);
    let normalized = normalize_path(path);
    (!normalized.is_empty()).then_some(normalized)
}

fn unquote_c_style(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse zero-context unified diff text into merged ranges per new-side path.
pub fn parse_unified_diff(raw: &str) -> Result<LineRangesByFile, AiContextError> {
    let mut result = LineRangesByFile::new();
    let mut current: Option<String> = None;
    // Lines still owed to the current hunk; content lines can look like headers
    let mut old_left: u32 = 0;
    let mut new_left: u32 = 0;

    for line in raw.lines() {
        if old_left > 0 || new_left > 0 {
            match line.as_bytes().first() {
                Some(b'-') => old_left = old_left.saturating_sub(1),
                Some(b'+') => new_left = new_left.saturating_sub(1),
                Some(b' ') => {
                    old_left = old_left.saturating_sub(1);
                    new_left = new_left.saturating_sub(1);
                }
                Some(b'\\') => {}
                _ => {
                    return Err(AiContextError::DiffParseError(format!(
                        "unexpected line inside hunk: {}",
                        line
                    )));
                }
            }
            continue;
        }

        if line.starts_with("diff --git ") || line.starts_with("diff --cc ") {
            current = None;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            current = parse_new_path(rest);
        } else if line.starts_with("@@@") {
            // Combined diff of a merge commit; ranges are not attributable
            current = None;
        } else if line.starts_with("@@ ") {
            let header = parse_hunk_header(line)?;
            old_left = header.old_lines;
            new_left = header.new_lines;
            if let Some(path) = &current {
                if let Some(range) = LineRange::from_hunk(header.new_start, header.new_lines) {
                    result.entry(path.clone()).or_insert_with(Vec::new).push(range);
                }
            }
        }
    }

    for ranges in result.values_mut() {
        *ranges = merge_ranges(std::mem::take(ranges));
    }
    result.retain(|_, ranges| !ranges.is_empty());
    Ok(result)
}
