use serde::Deserialize;

/// Feature flags for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Anchor records to a commit on the provenance branch
    pub provenance_commits: bool,
    /// Re-run the pipeline for the latest response to catch late edits
    pub follow_up_rescans: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            provenance_commits: true,
            follow_up_rescans: true,
        }
    }
}

/// Deserializable version of FeatureFlags with all optional fields
/// and unknown fields allowed for graceful degradation
#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct FileFeatureFlags {
    #[serde(default, rename = "provenance.commits")]
    provenance_commits: Option<bool>,
    #[serde(default, rename = "pipeline.follow_up")]
    follow_up_rescans: Option<bool>,
}

impl FeatureFlags {
    /// Build FeatureFlags from file configuration
    /// Falls back to defaults for any invalid or missing values
    pub(crate) fn from_file_config(file_flags: Option<FileFeatureFlags>) -> Self {
        let file_flags = match file_flags {
            Some(flags) => flags,
            None => return FeatureFlags::default(),
        };

        let defaults = FeatureFlags::default();

        FeatureFlags {
            provenance_commits: file_flags
                .provenance_commits
                .unwrap_or(defaults.provenance_commits),
            follow_up_rescans: file_flags
                .follow_up_rescans
                .unwrap_or(defaults.follow_up_rescans),
        }
    }
}
