//! The automation workflow: start the tool, script it, harvest the artifact.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{discover_artifact, execute_artifact, ExecutionStatus};
use crate::config::DriverConfig;
use crate::session::{AutomationSession, DriverPhase, ProgressSink};

/// Why a run produced no artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunFailure {
    /// The tool process could not be spawned.
    Start { error: String },
    /// The prompt could not be written to the tool's input stream.
    Send { error: String },
    /// The tool produced no fresh file matching the artifact patterns.
    ArtifactNotFound,
}

/// Outcome of one complete automation run. Never an error: every failure
/// mode is data the caller can report cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRun {
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub execution: Option<ExecutionStatus>,
    pub failure: Option<RunFailure>,
}

impl AutomationRun {
    fn failed(failure: RunFailure) -> Self {
        Self {
            success: false,
            artifact: None,
            execution: None,
            failure: Some(failure),
        }
    }
}

/// Drives one session of the external interactive code-generation tool.
///
/// The workflow is strictly linear: spawn, wait for the ready banner, write
/// the prompt, wait out the generation window, glob for a fresh artifact
/// (with one nudge retry), execute it, tear everything down. The session's
/// drop guard makes teardown unconditional, including on early returns.
pub struct AutomationDriver {
    config: DriverConfig,
    sink: Option<ProgressSink>,
    phase: DriverPhase,
}

impl AutomationDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            sink: None,
            phase: DriverPhase::NotStarted,
        }
    }

    /// Forward each tool output line to the given sink as it arrives.
    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Phase the last run ended in. `CleanedUp` after any completed run.
    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Run the full automation workflow. Blocking; call from a worker
    /// thread, never from an async context directly.
    pub fn run(&mut self, prompt: &str) -> AutomationRun {
        info!("Starting automation workflow");

        let mut session = match AutomationSession::spawn(&self.config, self.sink.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!("Automation start failed: {}", e);
                self.phase = DriverPhase::CleanedUp;
                return AutomationRun::failed(RunFailure::Start {
                    error: e.to_string(),
                });
            }
        };
        self.phase = DriverPhase::SessionStarted;

        // Let the tool print its ready banner before we write anything.
        std::thread::sleep(self.config.warmup);

        info!("Sending prompt ({} chars)", prompt.len());
        if let Err(e) = session.write_line(prompt) {
            warn!("Prompt send failed: {}", e);
            self.phase = DriverPhase::CleanedUp;
            return AutomationRun::failed(RunFailure::Send {
                error: e.to_string(),
            });
        }
        self.phase = DriverPhase::PromptSent;

        // Completion is only observable through the filesystem, so all we
        // can do is wait out the settle window before looking.
        std::thread::sleep(self.config.settle);
        self.phase = DriverPhase::WaitingGeneration;
        std::thread::sleep(self.config.extra_wait);

        let mut artifact = discover_artifact(&self.config);
        if artifact.is_none() {
            // One nudge: an empty line sometimes unsticks a tool waiting
            // for confirmation, then look again.
            info!("No artifact yet, nudging the tool once");
            let _ = session.write_line("");
            std::thread::sleep(self.config.extra_wait);
            artifact = discover_artifact(&self.config);
        }

        let Some(artifact) = artifact else {
            warn!("Could not find a generated artifact");
            self.phase = DriverPhase::TimedOut;
            session.shutdown();
            self.phase = DriverPhase::CleanedUp;
            return AutomationRun::failed(RunFailure::ArtifactNotFound);
        };
        self.phase = DriverPhase::FileFound;

        let execution = execute_artifact(&artifact, &self.config);
        self.phase = match &execution {
            ExecutionStatus::Skipped { .. } => DriverPhase::ExecutionSkipped,
            ExecutionStatus::Failed { .. } => DriverPhase::ExecutionFailed,
            _ => DriverPhase::Executed,
        };

        session.shutdown();
        self.phase = DriverPhase::CleanedUp;

        info!("Automation completed, artifact: {}", artifact.display());
        // Execution trouble does not invalidate the generation itself.
        AutomationRun {
            success: true,
            artifact: Some(artifact),
            execution: Some(execution),
            failure: None,
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    /// A fake tool that writes an artifact when prompted, fast enough for
    /// tests to wait out the real workflow.
    fn writer_tool_config(dir: &std::path::Path) -> DriverConfig {
        DriverConfig::new("/bin/sh")
            .tool_args(vec![
                "-c".to_string(),
                "read prompt; echo \"echo generated\" > scraper.sh; while read l; do :; done"
                    .to_string(),
            ])
            .workdir(dir)
            .warmup(Duration::from_millis(50))
            .settle(Duration::from_millis(300))
            .extra_wait(Duration::from_millis(100))
            .exit_grace(Duration::from_millis(50))
            .exec_timeout(Duration::from_millis(500))
            .artifact_patterns(vec!["*.sh".to_string()])
    }

    #[test]
    fn test_full_workflow_finds_and_executes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = AutomationDriver::new(writer_tool_config(dir.path()));

        let run = driver.run("build me a scraper");
        assert!(run.success);
        assert_eq!(
            run.artifact.as_deref(),
            Some(dir.path().join("scraper.sh").as_path())
        );
        match run.execution {
            Some(ExecutionStatus::Completed {
                exit_code, stdout, ..
            }) => {
                assert_eq!(exit_code, 0);
                assert!(stdout.contains("generated"));
            }
            other => panic!("expected completed execution, got {:?}", other),
        }
        assert_eq!(driver.phase(), DriverPhase::CleanedUp);
    }

    #[test]
    fn test_missing_tool_is_clean_start_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig::new("/nonexistent/tool").workdir(dir.path());
        let mut driver = AutomationDriver::new(config);

        let run = driver.run("anything");
        assert!(!run.success);
        assert!(run.artifact.is_none());
        assert!(matches!(run.failure, Some(RunFailure::Start { .. })));
        assert_eq!(driver.phase(), DriverPhase::CleanedUp);
    }

    #[test]
    fn test_silent_tool_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        // Consumes the prompt and produces nothing.
        let config = DriverConfig::new("/bin/sh")
            .tool_args(vec!["-c".to_string(), "while read l; do :; done".to_string()])
            .workdir(dir.path())
            .warmup(Duration::from_millis(20))
            .settle(Duration::from_millis(50))
            .extra_wait(Duration::from_millis(50))
            .exit_grace(Duration::from_millis(50));
        let mut driver = AutomationDriver::new(config);

        let run = driver.run("anything");
        assert!(!run.success);
        assert!(matches!(run.failure, Some(RunFailure::ArtifactNotFound)));
        assert_eq!(driver.phase(), DriverPhase::CleanedUp);
    }

    #[test]
    fn test_cleanup_leaves_no_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("alive.marker");
        // Touches a marker file every 50ms for as long as it lives.
        let config = DriverConfig::new("/bin/sh")
            .tool_args(vec![
                "-c".to_string(),
                format!(
                    "while true; do date +%s%N > {}; sleep 0.05; done",
                    marker.display()
                ),
            ])
            .workdir(dir.path())
            .warmup(Duration::from_millis(20))
            .settle(Duration::from_millis(50))
            .extra_wait(Duration::from_millis(50))
            .exit_grace(Duration::from_millis(50))
            .artifact_patterns(vec!["*.py".to_string()]);
        let mut driver = AutomationDriver::new(config);

        let run = driver.run("anything");
        assert!(!run.success);

        // If the process survived cleanup it would keep rewriting the
        // marker; two snapshots 200ms apart must match.
        std::thread::sleep(Duration::from_millis(100));
        let first = fs::read(&marker).unwrap_or_default();
        std::thread::sleep(Duration::from_millis(200));
        let second = fs::read(&marker).unwrap_or_default();
        assert_eq!(first, second);
    }
}
