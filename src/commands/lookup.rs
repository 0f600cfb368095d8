use std::path::Path;

use crate::commands::{print_json, resolve_workspace};
use crate::config::Config;
use crate::error::AiContextError;
use crate::provenance::lookup::ProvenanceLookup;
use crate::utils::normalize_path;

pub fn handle_lookup(workspace: Option<&Path>, location: &str) -> Result<(), AiContextError> {
    let (file, line) = parse_location(location)?;
    let root = resolve_workspace(workspace)?;
    let lookup = ProvenanceLookup::for_workspace(&root, Config::get().store_dir());
    print_json(&lookup.at_line(&file, line)?)
}

/// Splits `path:line` on the last colon.
pub fn parse_location(location: &str) -> Result<(String, u32), AiContextError> {
    let invalid = || AiContextError::Generic(format!("expected <file>:<line>, got '{}'", location));
    let (file, line) = location.rsplit_once(':').ok_or_else(invalid)?;
    let line: u32 = line.trim().parse().map_err(|_| invalid())?;
    if file.is_empty() || line == 0 {
        return Err(invalid());
    }
    Ok((normalize_path(file), line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("src/x.ts:4").unwrap(), ("src/x.ts".to_string(), 4));
        assert_eq!(parse_location("C:/repo/a.rs:12").unwrap().1, 12);
    }

    #[test]
    fn test_parse_location_rejects_bad_input() {
        assert!(parse_location("src/x.ts").is_err());
        assert!(parse_location("src/x.ts:0").is_err());
        assert!(parse_location(":3").is_err());
        assert!(parse_location("a.rs:abc").is_err());
    }
}
