use crate::utils::normalize_path;

/// Whether two workspace paths refer to the same file.
///
/// Paths reported by git, the file watcher and callers may be relative to different
/// bases, so after normalization two paths match when they are equal or when one is a
/// trailing run of whole segments of the other (`src/x.ts` matches `pkg/src/x.ts`, but
/// `x.ts` does not match `box.ts`).
pub fn paths_equivalent(a: &str, b: &str) -> bool {
    let a = normalize_path(a);
    let b = normalize_path(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (long, short) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    long.strip_suffix(short.as_str())
        .is_some_and(|head| head.ends_with('/'))
}

/// True when `path` has `segment` as one of its path components.
pub fn has_segment(path: &str, segment: &str) -> bool {
    normalize_path(path).split('/').any(|s| s == segment)
}
