//! # forge_runner
//!
//! Automation driver for ScrapeForge: scripts one external interactive
//! code-generation tool over its standard streams, monitors its output on
//! background readers, discovers the produced artifact by filesystem
//! heuristic, optionally executes it, and guarantees process teardown on
//! every exit path.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use forge_runner::{AutomationDriver, DriverConfig};
//!
//! let config = DriverConfig::new("goose")
//!     .workdir("/tmp/session")
//!     .settle(Duration::from_secs(30));
//!
//! let mut driver = AutomationDriver::new(config);
//! let run = driver.run("Build a web scraper for https://example.com/products");
//! if let Some(artifact) = run.artifact {
//!     println!("generated: {}", artifact.display());
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;

pub use artifact::{discover_artifact, execute_artifact, ExecutionStatus};
pub use config::DriverConfig;
pub use driver::{AutomationDriver, AutomationRun, RunFailure};
pub use error::{DriverError, DriverResult};
pub use session::{AutomationSession, DriverPhase, ProgressSink};
