//! Driver configuration.
//!
//! Every interval the wrapped tool forces on us (warm-up banner, silent
//! generation window, artifact freshness) is configurable here so tests and
//! deployments can tune them instead of relying on hard-coded sleeps.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one automation tool session.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Path to the interactive code-generation tool.
    pub tool_path: PathBuf,
    /// Extra arguments passed to the tool.
    pub tool_args: Vec<String>,
    /// Working directory the tool runs in; artifacts are discovered here.
    pub workdir: PathBuf,
    /// Wait after spawn before the tool accepts input (ready banner).
    pub warmup: Duration,
    /// Wait after sending the prompt; the tool signals completion only via
    /// filesystem side effects, so this is the generation settle window.
    pub settle: Duration,
    /// Additional wait before (re)checking for artifacts.
    pub extra_wait: Duration,
    /// Grace period after a polite "exit" before escalating to kill.
    pub exit_grace: Duration,
    /// Only files modified within this window count as generated artifacts.
    pub freshness_window: Duration,
    /// How long artifact execution may run before it is considered an
    /// intentionally interactive program and left alone.
    pub exec_timeout: Duration,
    /// Glob patterns used for artifact discovery.
    pub artifact_patterns: Vec<String>,
    /// File names never treated as artifacts (the driver's own scripts).
    pub exclude_files: Vec<String>,
    /// Capacity of the bounded output-line channel fed by the reader threads.
    pub output_buffer_lines: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from("goose"),
            tool_args: Vec::new(),
            workdir: PathBuf::from("."),
            warmup: Duration::from_secs(5),
            settle: Duration::from_secs(30),
            extra_wait: Duration::from_secs(10),
            exit_grace: Duration::from_secs(2),
            freshness_window: Duration::from_secs(120),
            exec_timeout: Duration::from_secs(5),
            artifact_patterns: vec![
                "*.py".to_string(),
                "*.js".to_string(),
                "*.html".to_string(),
                "*.css".to_string(),
                "*.txt".to_string(),
                "*.md".to_string(),
            ],
            exclude_files: Vec::new(),
            output_buffer_lines: 1024,
        }
    }
}

impl DriverConfig {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
            ..Self::default()
        }
    }

    pub fn tool_args(mut self, args: Vec<String>) -> Self {
        self.tool_args = args;
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn warmup(mut self, d: Duration) -> Self {
        self.warmup = d;
        self
    }

    pub fn settle(mut self, d: Duration) -> Self {
        self.settle = d;
        self
    }

    pub fn extra_wait(mut self, d: Duration) -> Self {
        self.extra_wait = d;
        self
    }

    pub fn exit_grace(mut self, d: Duration) -> Self {
        self.exit_grace = d;
        self
    }

    pub fn freshness_window(mut self, d: Duration) -> Self {
        self.freshness_window = d;
        self
    }

    pub fn exec_timeout(mut self, d: Duration) -> Self {
        self.exec_timeout = d;
        self
    }

    pub fn artifact_patterns(mut self, patterns: Vec<String>) -> Self {
        self.artifact_patterns = patterns;
        self
    }

    pub fn exclude_file(mut self, name: impl Into<String>) -> Self {
        self.exclude_files.push(name.into());
        self
    }
}
