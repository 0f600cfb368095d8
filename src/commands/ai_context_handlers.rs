use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::AiContextError;
use crate::observability::log_message;

#[derive(Parser, Debug)]
#[command(name = "ai-context")]
#[command(about = "link AI chat responses to the code they produced", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the workspace and chat store, recording provenance for each new response
    Watch {
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Path to Cursor's state.vscdb
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Correlate the latest assistant response with current working-tree changes
    ProcessLatest {
        #[arg(long)]
        workspace: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print changed line ranges for the working tree or a commit
    Ranges {
        #[arg(long)]
        workspace: Option<PathBuf>,
        #[arg(long)]
        commit: Option<String>,
        /// Restrict output to these paths
        paths: Vec<String>,
    },
    /// Print stored provenance records
    Show {
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Response id
        #[arg(long, conflicts_with = "file")]
        id: Option<String>,
        /// Workspace-relative file path
        #[arg(long)]
        file: Option<String>,
    },
    /// Find the responses that produced a line, as <file>:<line>
    Lookup {
        location: String,
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Print the version
    Version,
}

pub fn handle_ai_context(cli: Cli) {
    let result = match cli.command {
        Command::Watch { workspace, db } => commands::watch::handle_watch(workspace.as_deref(), db.as_deref()),
        Command::ProcessLatest { workspace, db } => {
            commands::process_latest::handle_process_latest(workspace.as_deref(), db.as_deref())
        }
        Command::Ranges {
            workspace,
            commit,
            paths,
        } => commands::ranges::handle_ranges(workspace.as_deref(), commit, paths),
        Command::Show { workspace, id, file } => {
            commands::show::handle_show(workspace.as_deref(), id.as_deref(), file.as_deref())
        }
        Command::Lookup { location, workspace } => {
            let result = commands::lookup::handle_lookup(workspace.as_deref(), &location);
            log_message("lookup", "info", None);
            result
        }
        Command::Version => {
            if cfg!(debug_assertions) {
                println!("{} (debug)", env!("CARGO_PKG_VERSION"));
            } else {
                println!(env!("CARGO_PKG_VERSION"));
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        exit_with_error(&e);
    }
}

fn exit_with_error(error: &AiContextError) -> ! {
    eprintln!("Error: {}", error);
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_lookup_with_workspace() {
        let cli = Cli::try_parse_from(["ai-context", "lookup", "src/x.ts:4", "--workspace", "/tmp/w"]).unwrap();
        match cli.command {
            Command::Lookup { location, workspace } => {
                assert_eq!(location, "src/x.ts:4");
                assert_eq!(workspace, Some(PathBuf::from("/tmp/w")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_show_rejects_id_and_file_together() {
        let parsed = Cli::try_parse_from(["ai-context", "show", "--id", "a", "--file", "b"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ranges_collects_paths() {
        let cli = Cli::try_parse_from(["ai-context", "ranges", "--commit", "abc", "a.rs", "b.rs"]).unwrap();
        match cli.command {
            Command::Ranges { commit, paths, .. } => {
                assert_eq!(commit.as_deref(), Some("abc"));
                assert_eq!(paths, vec!["a.rs", "b.rs"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
