//! One-shot scraper generation from a saved specification.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use forge_chat::{
    render_automation_prompt, ChatError, GenerationOrchestrator, GenerationOutcome,
    OrchestratorConfig, SummaryAnalysis,
};
use forge_runner::{DriverConfig, ExecutionStatus};

use crate::console::ConsoleTransport;

#[derive(Args)]
pub struct GenerateArgs {
    /// JSON file holding a project specification (the stored final analysis)
    #[arg(long, conflicts_with = "prompt")]
    pub spec: Option<PathBuf>,

    /// Text file holding a ready-made generation prompt
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    /// Target URLs (used with --spec)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Path to the interactive code-generation tool
    #[arg(long, env = "FORGE_TOOL_PATH", default_value = "goose")]
    pub tool: PathBuf,

    /// Working directory for the generation session
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Wall-clock generation budget in seconds
    #[arg(long, default_value_t = 120)]
    pub ceiling_secs: u64,
}

pub async fn execute(args: GenerateArgs) -> Result<()> {
    let prompt = match (&args.prompt, &args.spec) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt file {}", path.display()))?,
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading spec file {}", path.display()))?;
            let summary: SummaryAnalysis =
                serde_json::from_str(&raw).context("parsing specification JSON")?;
            render_automation_prompt(&summary, &args.urls)
        }
        (None, None) => bail!("pass either --spec <file> or --prompt <file>"),
    };

    let driver = DriverConfig::new(&args.tool).workdir(&args.workdir);
    let orchestrator = GenerationOrchestrator::with_config(
        OrchestratorConfig {
            ceiling: Duration::from_secs(args.ceiling_secs),
            ..OrchestratorConfig::default()
        },
        driver,
    );

    let transport = ConsoleTransport::new();
    let outcome = orchestrator.generate(&transport, 0, &prompt).await?;

    match &outcome {
        GenerationOutcome::Generated { artifact, execution } => {
            println!("✨ Generated: {}", artifact.display());
            if let Some(ExecutionStatus::Failed { error }) = execution {
                // The artifact is still considered generated.
                eprintln!("⚠️  {}", ChatError::Execution(error.clone()));
            }
            Ok(())
        }
        GenerationOutcome::ArtifactNotFound => {
            // The specification survives the failure; print it for manual use.
            eprintln!("The prompt was:\n{}", prompt);
            Err(ChatError::ArtifactNotFound.into())
        }
        _ => match outcome.as_error() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        },
    }
}
