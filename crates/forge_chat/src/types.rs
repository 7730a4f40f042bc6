//! Core types for the ScrapeForge conversation pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque per-user identifier assigned by the chat front end.
pub type UserId = i64;

/// Conversation stage of a scraping project.
///
/// The declaration order is the progression order; comparisons rely on it.
/// Unknown strings from the analyzer deserialize to `ConversationDeepening`
/// so a creative model can never inject an arbitrary stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LinkCollection,
    ConversationDeepening,
    RequirementsClarification,
    TechnicalDetails,
    ProjectSummaryAndSchema,
    AwaitingFinalConfirmation,
    ConfirmedReadyForGeneration,
    ScraperGenerated,
}

// `Deserialize` is hand-written rather than derived: the declaration order
// above is load-bearing for the derived `Ord` (progression order), so
// `ConversationDeepening` cannot be moved to last, but `#[serde(other)]`
// requires the catch-all variant to be last. This impl reproduces exactly
// the `rename_all = "snake_case"` + `#[serde(other)]` contract — unknown
// strings deserialize to `ConversationDeepening`.
impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "link_collection" => Stage::LinkCollection,
            "conversation_deepening" => Stage::ConversationDeepening,
            "requirements_clarification" => Stage::RequirementsClarification,
            "technical_details" => Stage::TechnicalDetails,
            "project_summary_and_schema" => Stage::ProjectSummaryAndSchema,
            "awaiting_final_confirmation" => Stage::AwaitingFinalConfirmation,
            "confirmed_ready_for_generation" => Stage::ConfirmedReadyForGeneration,
            "scraper_generated" => Stage::ScraperGenerated,
            _ => Stage::ConversationDeepening,
        })
    }
}

impl Stage {
    /// Move forward to `proposed`, never backward.
    pub fn advance(self, proposed: Stage) -> Stage {
        self.max(proposed)
    }

    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LinkCollection => "Link Collection",
            Self::ConversationDeepening => "Conversation Deepening",
            Self::RequirementsClarification => "Requirements Clarification",
            Self::TechnicalDetails => "Technical Details",
            Self::ProjectSummaryAndSchema => "Project Summary & Schema",
            Self::AwaitingFinalConfirmation => "Awaiting Final Confirmation",
            Self::ConfirmedReadyForGeneration => "Confirmed - Ready For Generation",
            Self::ScraperGenerated => "Scraper Generated",
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Assistant,
    User,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUID)
    pub id: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// When the message was created
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// How well the analyzer believes it understands the user's goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Understanding {
    GettingDeeper,
    GoodUnderstanding,
    Complete,
    #[default]
    #[serde(other)]
    Surface,
}

/// What the conversation should probe next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NextFocus {
    SpecificData,
    TechnicalRequirements,
    Confirmation,
    #[default]
    #[serde(other)]
    BusinessCase,
}

/// Analyzer confidence in its own reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    High,
    #[default]
    #[serde(other)]
    Medium,
}

/// Generic low/medium/high scale (data richness, complexity level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    High,
    #[default]
    #[serde(other)]
    Medium,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// Scraping difficulty of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeComplexity {
    Simple,
    Complex,
    #[default]
    #[serde(other)]
    Moderate,
}

impl ScrapeComplexity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Simple => "Simple",
            Self::Moderate => "Moderate",
            Self::Complex => "Complex",
        }
    }
}

/// Structured description of the data a single URL exposes.
///
/// Produced once per distinct URL per project and never refreshed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    #[serde(default = "default_page_type")]
    pub page_type: String,
    #[serde(default)]
    pub main_content_type: String,
    #[serde(default)]
    pub primary_fields: Vec<String>,
    #[serde(default)]
    pub secondary_fields: Vec<String>,
    #[serde(default)]
    pub complexity: ScrapeComplexity,
    #[serde(default)]
    pub richness: Level,
    #[serde(default)]
    pub insights: Vec<String>,
}

fn default_page_type() -> String {
    "unknown".to_string()
}

/// One turn's analyzer output.
///
/// Every field is defaulted at the deserialization boundary, so a partial
/// LLM response still yields a complete, usable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default = "default_stage")]
    pub stage: Stage,
    #[serde(default = "default_response_message")]
    pub response_message: String,
    #[serde(default)]
    pub probing_questions: Vec<String>,
    #[serde(default)]
    pub detected_urls: Vec<String>,
    #[serde(default)]
    pub understanding_level: Understanding,
    #[serde(default)]
    pub next_focus: NextFocus,
    #[serde(default)]
    pub insights_gathered: Vec<String>,
    #[serde(default)]
    pub needs_more_info: bool,
    #[serde(default)]
    pub confidence: Confidence,
}

fn default_stage() -> Stage {
    Stage::ConversationDeepening
}

pub(crate) fn default_response_message() -> String {
    "I'd love to help you with web scraping! Tell me about your project - \
     what are you trying to achieve and why do you need this data?"
        .to_string()
}

/// Data type of one extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Date,
    Boolean,
    #[default]
    #[serde(other)]
    String,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

/// One field in the extraction schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataField {
    pub field_name: String,
    #[serde(default)]
    pub data_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Narrative project summary inside the terminal analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub target_websites: Vec<String>,
    #[serde(default)]
    pub use_case: String,
    #[serde(default)]
    pub frequency: String,
}

/// The extraction schema: what the scraper will deliver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    #[serde(default)]
    pub primary_data: Vec<DataField>,
    #[serde(default)]
    pub secondary_data: Vec<DataField>,
    #[serde(default)]
    pub output_structure: String,
}

/// Implementation-facing requirements inside the terminal analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalRequirements {
    #[serde(default)]
    pub scraping_method: String,
    #[serde(default)]
    pub complexity_level: Level,
    #[serde(default)]
    pub special_considerations: Vec<String>,
    #[serde(default)]
    pub estimated_setup_time: String,
}

/// The terminal structured specification produced by the summary stage.
///
/// Stored verbatim as the project's `final_analysis`; the canonical input
/// to automation prompt generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryAnalysis {
    #[serde(default = "default_summary_stage")]
    pub stage: Stage,
    #[serde(default)]
    pub response_message: String,
    #[serde(default)]
    pub project_summary: ProjectSummary,
    #[serde(default)]
    pub data_schema: DataSchema,
    #[serde(default)]
    pub technical_requirements: TechnicalRequirements,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default = "default_final_question")]
    pub final_question: String,
}

fn default_summary_stage() -> Stage {
    Stage::ProjectSummaryAndSchema
}

pub(crate) fn default_final_question() -> String {
    "Is there anything else you'd like to clarify or modify about this scraping project?"
        .to_string()
}

/// Everything a project has accumulated about the data to extract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataRequirements {
    /// One structured analysis per distinct URL, populated lazily.
    #[serde(default)]
    pub page_analyses: BTreeMap<String, PageAnalysis>,
    /// Present only after the summary stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_analysis: Option<SummaryAnalysis>,
    /// Present only after confirmation; never regenerated once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_prompt: Option<String>,
    /// Present only after successful generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_artifact: Option<PathBuf>,
}

/// Per-user accumulated state for one requirements-gathering session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub user_id: UserId,
    #[serde(default)]
    pub project_name: String,
    /// Insertion-ordered, duplicate-free.
    #[serde(default)]
    pub target_urls: Vec<String>,
    /// URLs recorded but with analysis deferred past the per-turn bound.
    #[serde(default)]
    pub pending_urls: Vec<String>,
    #[serde(default)]
    pub data_requirements: DataRequirements,
    /// Append-only user/assistant exchange log.
    #[serde(default)]
    pub context_history: Vec<Message>,
    pub status: Stage,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a fresh project for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            project_name: String::new(),
            target_urls: Vec::new(),
            pending_urls: Vec::new(),
            data_requirements: DataRequirements::default(),
            context_history: Vec::new(),
            status: Stage::LinkCollection,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a target URL, preserving order and uniqueness.
    /// Returns false if the URL was already present.
    pub fn add_url(&mut self, url: &str) -> bool {
        if self.target_urls.iter().any(|u| u == url) {
            return false;
        }
        self.target_urls.push(url.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Completed user/assistant pairs so far.
    pub fn exchange_count(&self) -> usize {
        self.context_history.len() / 2
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.context_history.push(Message::user(content));
        self.updated_at = Utc::now();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.context_history.push(Message::assistant(content));
        self.updated_at = Utc::now();
    }

    /// Forward-only status update.
    pub fn advance_stage(&mut self, proposed: Stage) {
        self.status = self.status.advance(proposed);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_progression() {
        assert!(Stage::LinkCollection < Stage::ConversationDeepening);
        assert!(Stage::ConversationDeepening < Stage::RequirementsClarification);
        assert!(Stage::TechnicalDetails < Stage::ProjectSummaryAndSchema);
        assert!(Stage::AwaitingFinalConfirmation < Stage::ConfirmedReadyForGeneration);
        assert!(Stage::ConfirmedReadyForGeneration < Stage::ScraperGenerated);
    }

    #[test]
    fn test_stage_advance_never_regresses() {
        let stage = Stage::TechnicalDetails;
        assert_eq!(stage.advance(Stage::ConversationDeepening), Stage::TechnicalDetails);
        assert_eq!(
            stage.advance(Stage::ProjectSummaryAndSchema),
            Stage::ProjectSummaryAndSchema
        );
    }

    #[test]
    fn test_unknown_stage_string_maps_to_safe_default() {
        let stage: Stage = serde_json::from_str("\"ready_to_proceed\"").unwrap();
        assert_eq!(stage, Stage::ConversationDeepening);

        let stage: Stage = serde_json::from_str("\"technical_details\"").unwrap();
        assert_eq!(stage, Stage::TechnicalDetails);
    }

    #[test]
    fn test_url_insertion_is_idempotent() {
        let mut project = Project::new(42);
        assert!(project.add_url("https://example.com/products"));
        assert!(project.add_url("https://example.com/reviews"));
        assert!(!project.add_url("https://example.com/products"));

        assert_eq!(
            project.target_urls,
            vec![
                "https://example.com/products".to_string(),
                "https://example.com/reviews".to_string()
            ]
        );
    }

    #[test]
    fn test_exchange_count() {
        let mut project = Project::new(1);
        assert_eq!(project.exchange_count(), 0);
        project.push_user("hello");
        assert_eq!(project.exchange_count(), 0);
        project.push_assistant("hi");
        assert_eq!(project.exchange_count(), 1);
        project.push_user("more");
        project.push_assistant("sure");
        assert_eq!(project.exchange_count(), 2);
    }

    #[test]
    fn test_partial_analysis_json_is_backfilled() {
        let parsed: AnalysisResult = serde_json::from_str(r#"{"stage": "technical_details"}"#).unwrap();
        assert_eq!(parsed.stage, Stage::TechnicalDetails);
        assert!(!parsed.response_message.is_empty());
        assert!(parsed.probing_questions.is_empty());
        assert!(parsed.detected_urls.is_empty());
        assert_eq!(parsed.understanding_level, Understanding::Surface);
        assert_eq!(parsed.confidence, Confidence::Medium);
        assert!(!parsed.needs_more_info);
    }

    #[test]
    fn test_summary_analysis_roundtrip() {
        let raw = r#"{
            "stage": "project_summary_and_schema",
            "response_message": "Here is your project summary.",
            "data_schema": {
                "primary_data": [
                    {"field_name": "price", "data_type": "number", "description": "Product price"}
                ],
                "output_structure": "JSON records"
            }
        }"#;
        let summary: SummaryAnalysis = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.stage, Stage::ProjectSummaryAndSchema);
        assert_eq!(summary.data_schema.primary_data.len(), 1);
        assert_eq!(summary.data_schema.primary_data[0].data_type, FieldType::Number);
        assert!(!summary.final_question.is_empty());
    }
}
