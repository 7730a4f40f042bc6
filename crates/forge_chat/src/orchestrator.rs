//! Generation orchestration.
//!
//! Bridges the conversation pipeline and the blocking automation driver:
//! the driver runs on a worker thread while the orchestrator polls its
//! completion under a hard wall-clock ceiling, emitting coarse progress
//! snapshots back to the chat transport.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use forge_runner::{AutomationDriver, AutomationRun, DriverConfig, ExecutionStatus, RunFailure};

use crate::error::{ChatError, ChatResult};
use crate::transport::{ChatId, ChatTransport};

/// Polling and budget configuration for one generation attempt.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the worker's completion flag is checked.
    pub poll_interval: Duration,
    /// How often the progress message is refreshed.
    pub progress_interval: Duration,
    /// Hard wall-clock budget; the caller is never blocked past this plus
    /// one poll interval.
    pub ceiling: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            progress_interval: Duration::from_secs(15),
            ceiling: Duration::from_secs(120),
        }
    }
}

/// How a generation attempt ended.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The tool produced an artifact; execution detail attached.
    Generated {
        artifact: PathBuf,
        execution: Option<ExecutionStatus>,
    },
    /// The tool process could not be started.
    StartFailed { error: String },
    /// The prompt never reached the tool.
    SendFailed { error: String },
    /// The tool ran but left nothing fresh to discover.
    ArtifactNotFound,
    /// Ceiling breached with the worker still running; the driver's own
    /// teardown still runs on the abandoned worker.
    TimedOut { elapsed: Duration },
}

impl GenerationOutcome {
    /// Typed error for the non-generated outcomes; `None` when an artifact
    /// exists (execution trouble does not invalidate the generation).
    pub fn as_error(&self) -> Option<ChatError> {
        match self {
            Self::Generated { .. } => None,
            Self::StartFailed { error } => Some(ChatError::AutomationStart(error.clone())),
            Self::SendFailed { error } => Some(ChatError::PromptSend(error.clone())),
            Self::ArtifactNotFound => Some(ChatError::ArtifactNotFound),
            Self::TimedOut { .. } => Some(ChatError::GenerationTimeout),
        }
    }
}

/// Runs the blocking automation driver without blocking the control loop.
pub struct GenerationOrchestrator {
    config: OrchestratorConfig,
    driver_config: DriverConfig,
}

impl GenerationOrchestrator {
    pub fn new(driver_config: DriverConfig) -> Self {
        Self {
            config: OrchestratorConfig::default(),
            driver_config,
        }
    }

    pub fn with_config(config: OrchestratorConfig, driver_config: DriverConfig) -> Self {
        Self {
            config,
            driver_config,
        }
    }

    /// Run one generation attempt, reporting progress to `chat_id`.
    ///
    /// Only transport failures surface as errors; every driver-side failure
    /// mode is a `GenerationOutcome` variant.
    pub async fn generate(
        &self,
        transport: &dyn ChatTransport,
        chat_id: ChatId,
        prompt: &str,
    ) -> ChatResult<GenerationOutcome> {
        let budget = self.config.ceiling.as_secs();
        let progress_ref = transport
            .send_text(
                chat_id,
                &format!("⏳ Generating your scraper... (budget: {}s)", budget),
            )
            .await?;

        info!("Starting generation worker (ceiling {}s)", budget);
        let driver_config = self.driver_config.clone();
        let prompt = prompt.to_string();
        let handle =
            tokio::task::spawn_blocking(move || AutomationDriver::new(driver_config).run(&prompt));

        let started = Instant::now();
        let mut last_progress = Instant::now();

        loop {
            if handle.is_finished() {
                let run = match handle.await {
                    Ok(run) => run,
                    Err(e) => {
                        warn!("Generation worker died: {}", e);
                        return Ok(GenerationOutcome::StartFailed {
                            error: e.to_string(),
                        });
                    }
                };
                let _ = transport
                    .edit_text(&progress_ref, "✅ Generation finished.")
                    .await;
                return Ok(Self::map_run(run));
            }

            if started.elapsed() >= self.config.ceiling {
                // Abandon the worker; the driver tears its process down on
                // its own thread.
                warn!(
                    "Generation exceeded the {}s ceiling, reporting timeout",
                    budget
                );
                let _ = transport
                    .edit_text(
                        &progress_ref,
                        &format!("⚠️ Generation timed out after {}s.", budget),
                    )
                    .await;
                return Ok(GenerationOutcome::TimedOut {
                    elapsed: started.elapsed(),
                });
            }

            tokio::time::sleep(self.config.poll_interval).await;

            if last_progress.elapsed() >= self.config.progress_interval {
                let text = format!(
                    "⏳ Still generating... {}s elapsed of {}s budget",
                    started.elapsed().as_secs(),
                    budget
                );
                let _ = transport.edit_text(&progress_ref, &text).await;
                last_progress = Instant::now();
            }
        }
    }

    fn map_run(run: AutomationRun) -> GenerationOutcome {
        if let Some(artifact) = run.artifact {
            return GenerationOutcome::Generated {
                artifact,
                execution: run.execution,
            };
        }
        match run.failure {
            Some(RunFailure::Start { error }) => GenerationOutcome::StartFailed { error },
            Some(RunFailure::Send { error }) => GenerationOutcome::SendFailed { error },
            Some(RunFailure::ArtifactNotFound) | None => GenerationOutcome::ArtifactNotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(20),
            progress_interval: Duration::from_millis(50),
            ceiling: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_outcome_error_mapping() {
        let timeout = GenerationOutcome::TimedOut {
            elapsed: Duration::from_secs(120),
        };
        assert!(matches!(
            timeout.as_error(),
            Some(ChatError::GenerationTimeout)
        ));

        let generated = GenerationOutcome::Generated {
            artifact: PathBuf::from("scraper.py"),
            execution: None,
        };
        assert!(generated.as_error().is_none());
    }

    #[test]
    fn test_map_run_outcomes() {
        let not_found = AutomationRun {
            success: false,
            artifact: None,
            execution: None,
            failure: Some(RunFailure::ArtifactNotFound),
        };
        assert!(matches!(
            GenerationOrchestrator::map_run(not_found),
            GenerationOutcome::ArtifactNotFound
        ));

        let started = AutomationRun {
            success: false,
            artifact: None,
            execution: None,
            failure: Some(RunFailure::Start {
                error: "no such tool".to_string(),
            }),
        };
        assert!(matches!(
            GenerationOrchestrator::map_run(started),
            GenerationOutcome::StartFailed { .. }
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        fn slow_driver(dir: &std::path::Path) -> DriverConfig {
            DriverConfig::new("/bin/sh")
                .tool_args(vec!["-c".to_string(), "while read l; do :; done".to_string()])
                .workdir(dir)
                .warmup(Duration::from_secs(2))
                .settle(Duration::from_millis(50))
                .extra_wait(Duration::from_millis(50))
                .exit_grace(Duration::from_millis(20))
        }

        #[tokio::test]
        async fn test_timeout_bound_is_respected() {
            let dir = tempfile::tempdir().unwrap();
            let orchestrator =
                GenerationOrchestrator::with_config(fast_config(), slow_driver(dir.path()));
            let transport = RecordingTransport::new();

            let started = Instant::now();
            let outcome = orchestrator
                .generate(&transport, 1, "build something")
                .await
                .unwrap();
            let elapsed = started.elapsed();

            assert!(matches!(outcome, GenerationOutcome::TimedOut { .. }));
            // Never blocks past the ceiling plus one poll interval (plus
            // scheduling slack).
            assert!(
                elapsed < Duration::from_millis(250 + 20 + 200),
                "took {:?}",
                elapsed
            );
            let edits = transport.edited_texts();
            assert!(edits.iter().any(|t| t.contains("timed out")));
        }

        #[tokio::test]
        async fn test_progress_snapshots_are_emitted() {
            let dir = tempfile::tempdir().unwrap();
            let config = OrchestratorConfig {
                poll_interval: Duration::from_millis(20),
                progress_interval: Duration::from_millis(40),
                ceiling: Duration::from_millis(400),
            };
            let orchestrator =
                GenerationOrchestrator::with_config(config, slow_driver(dir.path()));
            let transport = RecordingTransport::new();

            let _ = orchestrator
                .generate(&transport, 1, "build something")
                .await
                .unwrap();

            assert!(transport
                .edited_texts()
                .iter()
                .any(|t| t.contains("Still generating")));
        }

        #[tokio::test]
        async fn test_successful_run_maps_to_generated() {
            let dir = tempfile::tempdir().unwrap();
            let driver = DriverConfig::new("/bin/sh")
                .tool_args(vec![
                    "-c".to_string(),
                    "read p; echo \"echo done\" > scraper.sh; while read l; do :; done"
                        .to_string(),
                ])
                .workdir(dir.path())
                .warmup(Duration::from_millis(30))
                .settle(Duration::from_millis(200))
                .extra_wait(Duration::from_millis(50))
                .exit_grace(Duration::from_millis(20))
                .exec_timeout(Duration::from_millis(500))
                .artifact_patterns(vec!["*.sh".to_string()]);
            let config = OrchestratorConfig {
                poll_interval: Duration::from_millis(20),
                progress_interval: Duration::from_millis(100),
                ceiling: Duration::from_secs(10),
            };
            let orchestrator = GenerationOrchestrator::with_config(config, driver);
            let transport = RecordingTransport::new();

            let outcome = orchestrator
                .generate(&transport, 1, "build a scraper")
                .await
                .unwrap();

            match outcome {
                GenerationOutcome::Generated { artifact, .. } => {
                    assert_eq!(artifact, dir.path().join("scraper.sh"));
                }
                other => panic!("expected generated, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_missing_tool_reports_start_failure() {
            let dir = tempfile::tempdir().unwrap();
            let driver = DriverConfig::new("/nonexistent/tool").workdir(dir.path());
            let orchestrator = GenerationOrchestrator::with_config(fast_config(), driver);
            let transport = RecordingTransport::new();

            let outcome = orchestrator
                .generate(&transport, 1, "build something")
                .await
                .unwrap();
            assert!(matches!(outcome, GenerationOutcome::StartFailed { .. }));
        }
    }
}
