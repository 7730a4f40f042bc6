//! # forge_chat - Conversation pipeline for ScrapeForge
//!
//! This crate turns an unstructured chat conversation into a structured
//! data-extraction specification and drives scraper generation from it:
//! - Per-user project state machine with forward-only stages
//! - LLM-backed requirement analysis with a deterministic fallback
//! - Lazy, cache-once page analysis per URL
//! - Forced summary once enough exchanges and data have accumulated
//! - Generation orchestration over the blocking automation driver
//!
//! ## Key Properties
//!
//! - **LLM Optional**: the whole pipeline works with no LLM configured
//! - **Never Crashes the Loop**: analysis and page failures degrade to
//!   deterministic replies; generation failures come back as structured
//!   outcomes
//! - **Transport Agnostic**: any front end exposing send/edit/answer works
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────────────┐     ┌─────────────────┐
//! │ Chat Transport │────▶│ ConversationController│───▶│ RequirementAnalyzer │
//! └────────────────┘     └──────────┬───────────┘     └────────┬────────┘
//!                                   │                          │
//!                                   ▼                          ▼
//!                        ┌──────────────────┐        ┌──────────────────┐
//!                        │  ProjectStore    │        │ PageAnalysisCache │
//!                        └──────────────────┘        └──────────────────┘
//!                                   │
//!                                   ▼
//!                        ┌──────────────────────┐
//!                        │ GenerationOrchestrator│──▶ forge_runner
//!                        └──────────────────────┘
//! ```

pub mod analyzer;
pub mod controller;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pages;
pub mod prompt;
pub mod store;
pub mod transport;
pub mod types;

pub use analyzer::*;
pub use controller::*;
pub use error::*;
pub use llm::*;
pub use orchestrator::*;
pub use pages::*;
pub use prompt::*;
pub use store::*;
pub use transport::*;
pub use types::*;
