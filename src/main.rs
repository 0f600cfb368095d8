use ai_context::commands::ai_context_handlers::{Cli, handle_ai_context};
use clap::Parser;

fn main() {
    let cli = Cli::parse();
    handle_ai_context(cli);
}
