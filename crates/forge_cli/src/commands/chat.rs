//! Interactive console chat session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use forge_chat::{
    Command, ConversationController, GenerationOrchestrator, LlmAdapter, LlmClient, MessageRef,
    PageAnalysisCache, RequirementAnalyzer,
};
use forge_runner::DriverConfig;

use crate::console::{ConsoleTransport, UnconfiguredPageAnalyzer};

#[derive(Args)]
pub struct ChatArgs {
    /// Path to the interactive code-generation tool
    #[arg(long, env = "FORGE_TOOL_PATH", default_value = "goose")]
    pub tool: PathBuf,

    /// Working directory for generation sessions
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,
}

const CHAT_ID: i64 = 0;
const USER_ID: i64 = 0;

pub async fn execute(args: ChatArgs) -> Result<()> {
    let llm: Option<Arc<dyn LlmClient>> = match LlmAdapter::from_env() {
        Ok(adapter) => {
            info!("LLM configured: {}", adapter.model());
            Some(Arc::new(adapter))
        }
        Err(_) => {
            println!("⚠️  No LLM key found - running on deterministic heuristics only.");
            None
        }
    };
    println!("⚠️  Page analysis runs in offline mode without an analyzer service.");

    let transport = Arc::new(ConsoleTransport::new());
    let driver = DriverConfig::new(&args.tool).workdir(&args.workdir);
    let controller = ConversationController::new(
        RequirementAnalyzer::new(llm),
        PageAnalysisCache::new(Arc::new(UnconfiguredPageAnalyzer)),
        GenerationOrchestrator::new(driver),
        transport,
    );

    controller
        .handle_command(CHAT_ID, USER_ID, Command::Start)
        .await?;
    println!(
        "Type your messages below. Commands: /help /status /reset /confirm /generate /schema (exit to quit)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        // Inline-keyboard actions get a keyboard-free spelling on the console.
        let callback = match input {
            "/confirm" => Some("confirm_project"),
            "/generate" => Some("generate_scraper"),
            "/schema" => Some("show_full_schema"),
            _ => None,
        };
        if let Some(data) = callback {
            let message = MessageRef {
                chat_id: CHAT_ID,
                message_id: 0,
            };
            controller
                .handle_callback(CHAT_ID, USER_ID, "console", data, &message)
                .await?;
            continue;
        }

        if let Ok(command) = input.parse::<Command>() {
            controller.handle_command(CHAT_ID, USER_ID, command).await?;
            continue;
        }

        controller.handle_message(CHAT_ID, USER_ID, input).await?;
    }

    println!("👋 Goodbye!");
    Ok(())
}
