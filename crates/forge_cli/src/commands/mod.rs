//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod chat;
pub mod generate;

#[derive(Parser)]
#[command(
    name = "scrapeforge",
    about = "Conversational web-scraper factory",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive console chat session
    Chat(chat::ChatArgs),
    /// One-shot scraper generation from a saved specification
    Generate(generate::GenerateArgs),
}
