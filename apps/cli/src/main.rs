//! PaperScout CLI: two-stage research assistant.
//!
//! Searches arXiv for a research question, keeps an evaluated corpus of
//! relevant papers, and synthesizes an answer from it.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
