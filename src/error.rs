use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum AiContextError {
    IoError(std::io::Error),
    /// Errors from invoking the git CLI that exited with a non-zero status
    GitCliError {
        code: Option<i32>,
        stderr: String,
        args: Vec<String>,
    },
    /// A git invocation that was killed after exceeding the configured timeout
    GitTimeout {
        args: Vec<String>,
        timeout: Duration,
    },
    JsonError(serde_json::Error),
    Utf8Error(std::str::Utf8Error),
    FromUtf8Error(std::string::FromUtf8Error),
    SqliteError(rusqlite::Error),
    /// Chat history source missing or locked
    SourceUnavailable(String),
    /// No repository, no commits, checkout conflict
    RepositoryError(String),
    /// Diff output that could not be produced or parsed
    DiffParseError(String),
    /// Malformed on-disk provenance JSON
    StoreCorruption(String),
    WatchError(String),
    Generic(String),
}

impl AiContextError {
    /// True when git refused to run because the directory is not a repository.
    pub fn is_not_a_repository(&self) -> bool {
        match self {
            AiContextError::GitCliError { stderr, .. } => {
                stderr.to_lowercase().contains("not a git repository")
            }
            _ => false,
        }
    }
}

impl fmt::Display for AiContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiContextError::IoError(e) => write!(f, "IO error: {}", e),
            AiContextError::GitCliError { code, stderr, args } => match code {
                Some(c) => write!(
                    f,
                    "Git CLI ({}) failed with exit code {}: {}",
                    args.join(" "),
                    c,
                    stderr
                ),
                None => write!(f, "Git CLI ({}) failed: {}", args.join(" "), stderr),
            },
            AiContextError::GitTimeout { args, timeout } => write!(
                f,
                "Git CLI ({}) timed out after {}",
                args.join(" "),
                humantime::format_duration(*timeout)
            ),
            AiContextError::JsonError(e) => write!(f, "JSON error: {}", e),
            AiContextError::Utf8Error(e) => write!(f, "UTF-8 error: {}", e),
            AiContextError::FromUtf8Error(e) => write!(f, "From UTF-8 error: {}", e),
            AiContextError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            AiContextError::SourceUnavailable(e) => write!(f, "Chat source unavailable: {}", e),
            AiContextError::RepositoryError(e) => write!(f, "Repository error: {}", e),
            AiContextError::DiffParseError(e) => write!(f, "Diff parse error: {}", e),
            AiContextError::StoreCorruption(e) => write!(f, "Store corruption: {}", e),
            AiContextError::WatchError(e) => write!(f, "Watch error: {}", e),
            AiContextError::Generic(e) => write!(f, "Generic error: {}", e),
        }
    }
}

impl std::error::Error for AiContextError {}

impl From<std::io::Error> for AiContextError {
    fn from(err: std::io::Error) -> Self {
        AiContextError::IoError(err)
    }
}

impl From<serde_json::Error> for AiContextError {
    fn from(err: serde_json::Error) -> Self {
        AiContextError::JsonError(err)
    }
}

impl From<std::str::Utf8Error> for AiContextError {
    fn from(err: std::str::Utf8Error) -> Self {
        AiContextError::Utf8Error(err)
    }
}

impl From<std::string::FromUtf8Error> for AiContextError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        AiContextError::FromUtf8Error(err)
    }
}

impl From<rusqlite::Error> for AiContextError {
    fn from(err: rusqlite::Error) -> Self {
        AiContextError::SqliteError(err)
    }
}

impl From<notify::Error> for AiContextError {
    fn from(err: notify::Error) -> Self {
        AiContextError::WatchError(err.to_string())
    }
}

impl Clone for AiContextError {
    fn clone(&self) -> Self {
        match self {
            AiContextError::IoError(e) => {
                AiContextError::IoError(std::io::Error::new(e.kind(), e.to_string()))
            }
            AiContextError::GitCliError { code, stderr, args } => AiContextError::GitCliError {
                code: *code,
                stderr: stderr.clone(),
                args: args.clone(),
            },
            AiContextError::GitTimeout { args, timeout } => AiContextError::GitTimeout {
                args: args.clone(),
                timeout: *timeout,
            },
            AiContextError::JsonError(e) => AiContextError::Generic(format!("JSON error: {}", e)),
            AiContextError::Utf8Error(e) => AiContextError::Utf8Error(*e),
            AiContextError::FromUtf8Error(e) => AiContextError::FromUtf8Error(e.clone()),
            AiContextError::SqliteError(e) => {
                AiContextError::Generic(format!("SQLite error: {}", e))
            }
            AiContextError::SourceUnavailable(s) => AiContextError::SourceUnavailable(s.clone()),
            AiContextError::RepositoryError(s) => AiContextError::RepositoryError(s.clone()),
            AiContextError::DiffParseError(s) => AiContextError::DiffParseError(s.clone()),
            AiContextError::StoreCorruption(s) => AiContextError::StoreCorruption(s.clone()),
            AiContextError::WatchError(s) => AiContextError::WatchError(s.clone()),
            AiContextError::Generic(s) => AiContextError::Generic(s.clone()),
        }
    }
}
