//! Artifact discovery and execution.
//!
//! The wrapped tool never announces what it wrote, so discovery is a
//! filesystem heuristic: glob the working directory and pick the most
//! recently modified match inside the freshness window.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;

/// What happened when the discovered artifact was run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExecutionStatus {
    /// The artifact ran to completion within the execution timeout.
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// Still running after the timeout: treated as an intentionally
    /// interactive program and left running.
    Interactive,
    /// A web-page artifact handed to the system browser.
    Opened,
    /// Extension with no known runtime; nothing was executed.
    Skipped { extension: String },
    /// The artifact could not be started or monitored.
    Failed { error: String },
}

impl ExecutionStatus {
    /// Whether this outcome counts as a successful execution.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Completed { exit_code, .. } => *exit_code == 0,
            Self::Interactive | Self::Opened => true,
            Self::Skipped { .. } | Self::Failed { .. } => false,
        }
    }
}

/// Find the freshest file matching the configured patterns.
///
/// Files named in `exclude_files` never match, and only files modified
/// within the freshness window qualify; among those the most recently
/// modified wins. Returns `None` when nothing fresh exists.
pub fn discover_artifact(config: &DriverConfig) -> Option<PathBuf> {
    let now = SystemTime::now();
    let mut best: Option<(PathBuf, SystemTime)> = None;

    for pattern in &config.artifact_patterns {
        let full_pattern = config.workdir.join(pattern);
        let Ok(entries) = glob::glob(&full_pattern.to_string_lossy()) else {
            warn!("Invalid artifact pattern: {}", pattern);
            continue;
        };

        for path in entries.flatten() {
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if config.exclude_files.iter().any(|e| e == &name) {
                continue;
            }
            let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            // A file with a future mtime is as fresh as it gets.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > config.freshness_window {
                continue;
            }
            match &best {
                Some((_, best_modified)) if modified <= *best_modified => {}
                _ => best = Some((path, modified)),
            }
        }
    }

    match &best {
        Some((path, _)) => info!("Found recently modified artifact: {}", path.display()),
        None => debug!("No fresh artifact in {}", config.workdir.display()),
    }
    best.map(|(path, _)| path)
}

/// Execute an artifact according to its file extension.
///
/// Source files get their interpreter, web pages go to the browser, and
/// unknown extensions are reported as skipped instead of failing silently.
/// Total — any runtime problem becomes `ExecutionStatus::Failed`.
pub fn execute_artifact(artifact: &Path, config: &DriverConfig) -> ExecutionStatus {
    let extension = artifact
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let program = match extension.as_str() {
        "py" => "python3",
        "js" => "node",
        "sh" => "sh",
        "html" | "htm" => {
            return match open_in_browser(artifact) {
                Ok(()) => {
                    info!("Opened {} in browser", artifact.display());
                    ExecutionStatus::Opened
                }
                Err(e) => ExecutionStatus::Failed {
                    error: format!("could not open browser: {}", e),
                },
            };
        }
        _ => {
            warn!("No runtime for .{} artifacts", extension);
            return ExecutionStatus::Skipped { extension };
        }
    };

    info!("Executing artifact: {} {}", program, artifact.display());
    let mut child = match Command::new(program)
        .arg(artifact)
        .current_dir(&config.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ExecutionStatus::Failed {
                error: format!("failed to start {}: {}", program, e),
            };
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_handle = std::thread::spawn(move || read_to_string_lossy(stdout));
    let err_handle = std::thread::spawn(move || read_to_string_lossy(stderr));

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = out_handle.join().unwrap_or_default();
                let stderr = err_handle.join().unwrap_or_default();
                let exit_code = status.code().unwrap_or(-1);
                if exit_code == 0 {
                    info!("Artifact executed successfully");
                } else {
                    warn!("Artifact exited with code {}", exit_code);
                }
                return ExecutionStatus::Completed {
                    exit_code,
                    stdout,
                    stderr,
                };
            }
            Ok(None) => {
                if started.elapsed() >= config.exec_timeout {
                    // Interactive programs are left running on purpose; the
                    // reader threads drain until the process closes its pipes.
                    info!("Artifact is running interactively, leaving it alone");
                    return ExecutionStatus::Interactive;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return ExecutionStatus::Failed {
                    error: format!("failed to wait for artifact: {}", e),
                };
            }
        }
    }
}

fn read_to_string_lossy<R: Read>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

fn open_in_browser(path: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let opener = "xdg-open";

    Command::new(opener)
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::time::SystemTime;

    fn config_in(dir: &Path) -> DriverConfig {
        DriverConfig::default().workdir(dir)
    }

    fn age_file(path: &Path, seconds: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let past = SystemTime::now() - Duration::from_secs(seconds);
        file.set_modified(past).unwrap();
    }

    #[test]
    fn test_discovery_picks_freshest_match() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old_scraper.py");
        let fresh = dir.path().join("fresh_scraper.py");
        fs::write(&old, "print('old')").unwrap();
        fs::write(&fresh, "print('fresh')").unwrap();
        age_file(&old, 600);
        age_file(&fresh, 10);

        let found = discover_artifact(&config_in(dir.path())).unwrap();
        assert_eq!(found, fresh);
    }

    #[test]
    fn test_discovery_ignores_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale.py");
        fs::write(&stale, "print('stale')").unwrap();
        age_file(&stale, 600);

        assert!(discover_artifact(&config_in(dir.path())).is_none());
    }

    #[test]
    fn test_discovery_respects_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("driver.py"), "pass").unwrap();

        let config = config_in(dir.path()).exclude_file("driver.py");
        assert!(discover_artifact(&config).is_none());
    }

    #[test]
    fn test_discovery_skips_unmatched_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("artifact.bin"), b"\x00").unwrap();

        assert!(discover_artifact(&config_in(dir.path())).is_none());
    }

    #[test]
    fn test_unknown_extension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("artifact.xyz");
        fs::write(&artifact, "data").unwrap();

        let status = execute_artifact(&artifact, &config_in(dir.path()));
        assert!(matches!(status, ExecutionStatus::Skipped { extension } if extension == "xyz"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_artifact_completes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("hello.sh");
        fs::write(&artifact, "echo hello-from-artifact").unwrap();

        let status = execute_artifact(&artifact, &config_in(dir.path()));
        match status {
            ExecutionStatus::Completed {
                exit_code, stdout, ..
            } => {
                assert_eq!(exit_code, 0);
                assert!(stdout.contains("hello-from-artifact"));
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_long_running_artifact_is_interactive() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("server.sh");
        fs::write(&artifact, "sleep 30").unwrap();

        let config = config_in(dir.path()).exec_timeout(Duration::from_millis(200));
        let status = execute_artifact(&artifact, &config);
        assert!(matches!(status, ExecutionStatus::Interactive));
        assert!(status.is_success());
    }
}
