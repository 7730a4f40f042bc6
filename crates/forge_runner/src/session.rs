//! Interactive tool session.
//!
//! Owns the child process and the background reader threads. Output lines
//! travel over a bounded channel; nothing is mutated across threads except
//! the monitoring flag. Teardown is guaranteed: dropping a session that was
//! not shut down explicitly still terminates the process.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};

/// Callback invoked with each output line as the tool produces it.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle phase of a driver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverPhase {
    NotStarted,
    SessionStarted,
    PromptSent,
    WaitingGeneration,
    FileFound,
    TimedOut,
    Executed,
    ExecutionSkipped,
    ExecutionFailed,
    CleanedUp,
}

/// A live session with the external tool.
pub struct AutomationSession {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    monitoring: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
    exit_grace: Duration,
    cleaned: bool,
}

impl AutomationSession {
    /// Spawn the tool with piped standard streams and start the readers.
    pub fn spawn(config: &DriverConfig, sink: Option<ProgressSink>) -> DriverResult<Self> {
        let mut child = Command::new(&config.tool_path)
            .args(&config.tool_args)
            .current_dir(&config.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DriverError::StartFailed(format!(
                    "could not spawn {}: {}",
                    config.tool_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::StartFailed("tool stdin not captured".to_string()))?;

        let monitoring = Arc::new(AtomicBool::new(true));
        let (tx, rx) = std::sync::mpsc::sync_channel(config.output_buffer_lines);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(Self::spawn_reader(stdout, tx.clone(), monitoring.clone(), sink.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(Self::spawn_reader(stderr, tx, monitoring.clone(), sink));
        }

        info!("Tool session started: {}", config.tool_path.display());

        Ok(Self {
            child,
            stdin,
            lines: rx,
            monitoring,
            readers,
            exit_grace: config.exit_grace,
            cleaned: false,
        })
    }

    fn spawn_reader<R: Read + Send + 'static>(
        stream: R,
        tx: SyncSender<String>,
        monitoring: Arc<AtomicBool>,
        sink: Option<ProgressSink>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                if !monitoring.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(line) = line else { break };
                debug!("tool: {}", line);
                if let Some(ref sink) = sink {
                    sink(&line);
                }
                match tx.try_send(line) {
                    Ok(()) => {}
                    // Full buffer: oldest context is in the channel already,
                    // newest lines are dropped rather than blocking the pipe.
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        })
    }

    /// Write one line to the tool's input stream and flush it.
    pub fn write_line(&mut self, text: &str) -> DriverResult<()> {
        self.stdin
            .write_all(text.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush())
            .map_err(|e| DriverError::PromptSend(e.to_string()))
    }

    /// Collect all output lines buffered so far.
    pub fn drain_lines(&self) -> Vec<String> {
        let mut collected = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            collected.push(line);
        }
        collected
    }

    /// Whether the underlying process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop monitoring and tear the process down.
    ///
    /// Escalation order: polite "exit" on stdin, grace wait, then kill. Safe
    /// to call more than once.
    pub fn shutdown(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.monitoring.store(false, Ordering::Relaxed);

        if self.is_alive() {
            debug!("Asking tool to exit");
            let _ = self.write_line("exit");
            std::thread::sleep(self.exit_grace);
        }

        if self.is_alive() {
            warn!("Tool still running after exit command, killing");
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill tool process: {}", e);
            }
        }
        let _ = self.child.wait();

        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
        info!("Tool session cleaned up");
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
