//! Requirement analysis with deterministic fallback.
//!
//! The analyzer never errors: an LLM transport failure, malformed JSON, or
//! no configured LLM at all always degrades to a keyword heuristic that
//! produces a structurally complete result, so the conversation controller
//! can proceed unconditionally.

use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::types::{
    AnalysisResult, Confidence, DataField, DataSchema, FieldType, Level, Message, NextFocus,
    Project, ProjectSummary, Stage, SummaryAnalysis, TechnicalRequirements, Understanding,
};

/// The conversation aims to converge within this many exchanges.
pub const EXCHANGE_BUDGET: usize = 3;

const URL_PATTERN: &str = r"https?://[\w$@.&+!*'(),%/:~#=?\[\]-]+";

/// Stateless requirement analyzer over an optional LLM.
pub struct RequirementAnalyzer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl RequirementAnalyzer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Analyze one inbound message against the project so far.
    pub async fn analyze(&self, message: &str, project: &Project) -> AnalysisResult {
        let Some(ref llm) = self.llm else {
            return Self::fallback_analysis(message);
        };

        let system = Self::build_system_prompt(project);
        let messages = Self::build_context(message, project);

        match llm.complete(&system, &messages, true).await {
            Ok(raw) => match serde_json::from_str::<AnalysisResult>(&raw) {
                Ok(analysis) => {
                    info!(
                        "Analysis complete - stage: {:?}, confidence: {:?}",
                        analysis.stage, analysis.confidence
                    );
                    analysis
                }
                Err(e) => {
                    warn!("Analyzer returned unusable JSON ({}), using fallback", e);
                    Self::fallback_analysis(message)
                }
            },
            Err(e) => {
                warn!("LLM analysis error ({}), using fallback", e);
                Self::fallback_analysis(message)
            }
        }
    }

    /// Produce the terminal project summary and extraction schema.
    pub async fn summarize(&self, message: &str, project: &Project) -> SummaryAnalysis {
        if let Some(ref llm) = self.llm {
            let system = Self::build_summary_prompt(project);
            let messages = vec![Message::user(message)];
            match llm.complete(&system, &messages, true).await {
                Ok(raw) => match serde_json::from_str::<SummaryAnalysis>(&raw) {
                    Ok(summary) => return summary,
                    Err(e) => warn!("Summary JSON unusable ({}), using fallback", e),
                },
                Err(e) => warn!("LLM summary error ({}), using fallback", e),
            }
        }
        Self::fallback_summary(project)
    }

    // Last 8 history entries with the project-info block inserted before the
    // final user message.
    fn build_context(message: &str, project: &Project) -> Vec<Message> {
        let mut messages: Vec<Message> = project
            .context_history
            .iter()
            .rev()
            .take(8)
            .rev()
            .cloned()
            .collect();
        if messages.last().map(|m| m.content != message).unwrap_or(true) {
            messages.push(Message::user(message));
        }
        let insert_at = messages.len().saturating_sub(1);
        messages.insert(insert_at, Message::system(Self::project_context(project)));
        messages
    }

    fn build_system_prompt(project: &Project) -> String {
        let exchange = project.exchange_count() + 1;
        format!(
            r#"You are a Web Scraping Requirements Analyst. Have a deep, probing conversation with users to understand exactly what they want to scrape and why.

CURRENT CONVERSATION STAGE: Exchange {exchange} of {EXCHANGE_BUDGET} total exchanges needed.

Your approach:
1. EXCHANGE 1: Ask about their goal - what are they trying to achieve? Be curious about their business case or personal need.
2. EXCHANGE 2: Dig deeper into specifics - what exact data, which websites, how they'll use the data.
3. EXCHANGE 3: Confirm understanding, clarify final details, and prepare for scraper generation.

If URLs are provided early, focus specifically on those sites and ask detailed questions about what data they want from those exact pages.

IMPORTANT: If page analysis data is available (showing what data types are found on their pages), reference this information in your questions.

Respond in JSON format:
{{
    "stage": "conversation_deepening" | "requirements_clarification" | "technical_details",
    "response_message": "conversational response - be genuinely curious and dig deeper",
    "probing_questions": ["deeper follow-up question that shows understanding"],
    "detected_urls": ["url1", "url2"],
    "understanding_level": "surface" | "getting_deeper" | "good_understanding" | "complete",
    "next_focus": "business_case" | "specific_data" | "technical_requirements" | "confirmation",
    "insights_gathered": ["key insight 1", "key insight 2"]
}}

BE CONVERSATIONAL, CURIOUS, AND DIG DEEP. Don't just collect requirements - understand their actual needs and challenges."#
        )
    }

    fn project_context(project: &Project) -> String {
        let preview: Vec<&str> = project.target_urls.iter().take(3).map(|s| s.as_str()).collect();
        let ellipsis = if project.target_urls.len() > 3 { ", ..." } else { "" };
        let name = if project.project_name.is_empty() {
            "Not set"
        } else {
            &project.project_name
        };
        format!(
            "Current project info:\n\
             - URLs collected: {} ({:?}{})\n\
             - Project name: {}\n\
             - Status: {}{}",
            project.target_urls.len(),
            preview,
            ellipsis,
            name,
            project.status.label(),
            Self::analysis_digest(project),
        )
    }

    // Compact digest of cached page analyses: hosts, deduplicated field
    // names capped at 8, distinct page types.
    fn analysis_digest(project: &Project) -> String {
        let analyses = &project.data_requirements.page_analyses;
        if analyses.is_empty() {
            return String::new();
        }

        let hosts: Vec<&str> = dedup(analyses.keys().map(|url| host_of(url)));
        let mut digest = format!("\n- Page analysis available for: {}", hosts.join(", "));

        let fields: Vec<&str> = dedup(
            analyses
                .values()
                .flat_map(|a| a.primary_fields.iter().map(|f| f.as_str())),
        )
        .into_iter()
        .take(8)
        .collect();
        if !fields.is_empty() {
            digest.push_str(&format!("\n- Available data types: {}", fields.join(", ")));
        }

        let page_types: Vec<&str> = dedup(analyses.values().map(|a| a.page_type.as_str()));
        if !page_types.is_empty() {
            digest.push_str(&format!("\n- Page types: {}", page_types.join(", ")));
        }

        digest
    }

    /// Deterministic analysis used whenever the LLM path fails.
    pub fn fallback_analysis(message: &str) -> AnalysisResult {
        let detected_urls = detect_urls(message);

        if !detected_urls.is_empty() {
            let others = if detected_urls.len() > 1 { " and others" } else { "" };
            return AnalysisResult {
                stage: Stage::ConversationDeepening,
                response_message: format!(
                    "Great! I can see you want to work with {}{}. Tell me more about \
                     your project - what specific information are you looking to extract \
                     from these sites and what will you do with that data?",
                    detected_urls[0], others
                ),
                probing_questions: vec![
                    "What's the ultimate goal of collecting this data?".to_string(),
                ],
                detected_urls,
                understanding_level: Understanding::GettingDeeper,
                next_focus: NextFocus::SpecificData,
                insights_gathered: Vec::new(),
                needs_more_info: false,
                confidence: Confidence::Medium,
            };
        }

        let lower = message.to_lowercase();
        let contains_any =
            |words: &[&str]| words.iter().any(|word| lower.contains(word));

        let response = if contains_any(&["scrape", "crawl", "web", "extract", "data"]) {
            "I see you're interested in web scraping and data extraction! Which sites \
             hold the data you're after, and what will you do with it once you have it?"
        } else if contains_any(&["audio", "transcribe", "speech", "voice", "sound"]) {
            "It sounds like you're working with audio content. If there are web pages \
             hosting those recordings, share the links and I'll help you plan the extraction."
        } else if contains_any(&["video", "media", "convert", "edit"]) {
            "Working with media content - got it. Point me at the pages that list those \
             videos and tell me what details you want collected about them."
        } else if contains_any(&["file", "storage", "backup", "cloud", "sync"]) {
            "File and storage workflows usually start with a data source. Which sites or \
             listings should the scraper pull from before anything gets stored?"
        } else if contains_any(&["pdf", "document", "doc"]) {
            "Document processing - understood. Share the pages that link those documents \
             and tell me which details matter to you."
        } else {
            "I'd love to help you with web scraping! Tell me about your project - what \
             are you trying to achieve? Are you building something for business, \
             research, or personal use?"
        };

        AnalysisResult {
            stage: Stage::ConversationDeepening,
            response_message: response.to_string(),
            probing_questions: vec![
                "What's the ultimate goal of collecting this data?".to_string(),
            ],
            detected_urls: Vec::new(),
            understanding_level: Understanding::Surface,
            next_focus: NextFocus::BusinessCase,
            insights_gathered: Vec::new(),
            needs_more_info: false,
            confidence: Confidence::Medium,
        }
    }

    fn build_summary_prompt(project: &Project) -> String {
        let history: Vec<String> = project
            .context_history
            .iter()
            .rev()
            .take(6)
            .rev()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect();
        let analyses = serde_json::to_string(&project.data_requirements.page_analyses)
            .unwrap_or_default();

        format!(
            r#"Based on our conversation, create a comprehensive project summary with a detailed schema for this web scraping project.

PROJECT CONTEXT:
- URLs: {:?}
- Conversation history: {}
- Page analyses: {}

Create a JSON response with:
{{
    "stage": "project_summary_and_schema",
    "response_message": "Complete project summary with schema - be detailed and clear",
    "project_summary": {{
        "project_name": "inferred project name",
        "objective": "what they're trying to achieve",
        "target_websites": ["list of domains"],
        "use_case": "how they'll use the data",
        "frequency": "how often they need data"
    }},
    "data_schema": {{
        "primary_data": [
            {{"field_name": "exact field name", "data_type": "string|number|date|boolean", "description": "what this field contains", "source": "where on page this comes from"}}
        ],
        "secondary_data": [
            {{"field_name": "field name", "data_type": "string", "description": "description", "optional": true}}
        ],
        "output_structure": "detailed explanation of how data will be structured"
    }},
    "technical_requirements": {{
        "scraping_method": "method to use",
        "complexity_level": "low|medium|high",
        "special_considerations": ["any special handling needed"],
        "estimated_setup_time": "time estimate"
    }},
    "next_steps": ["what happens next"],
    "final_question": "Is there anything else you'd like to clarify or modify about this scraping project?"
}}

Be thorough and specific - this is their final project specification."#,
            project.target_urls,
            history.join(" | "),
            analyses,
        )
    }

    /// Deterministic summary built from whatever the project accumulated.
    pub fn fallback_summary(project: &Project) -> SummaryAnalysis {
        let domains: Vec<String> = dedup(project.target_urls.iter().map(|url| host_of(url)))
            .into_iter()
            .map(String::from)
            .collect();

        let fields: Vec<&str> = dedup(
            project
                .data_requirements
                .page_analyses
                .values()
                .flat_map(|a| a.primary_fields.iter().map(|f| f.as_str())),
        )
        .into_iter()
        .take(10)
        .collect();

        let schema_fields: Vec<DataField> = fields
            .iter()
            .map(|field| DataField {
                field_name: field.to_string(),
                data_type: FieldType::String,
                description: format!("Data from {} field", field),
                source: Some("webpage content".to_string()),
                optional: false,
            })
            .collect();

        let response_message = Self::format_summary_message(project, &domains, &schema_fields);

        SummaryAnalysis {
            stage: Stage::ProjectSummaryAndSchema,
            response_message,
            project_summary: ProjectSummary {
                project_name: "Web Scraping Project".to_string(),
                objective: "Data extraction from target websites".to_string(),
                target_websites: domains,
                use_case: "Data analysis and monitoring".to_string(),
                frequency: "As needed".to_string(),
            },
            data_schema: DataSchema {
                primary_data: schema_fields,
                secondary_data: Vec::new(),
                output_structure: "JSON format with structured data fields".to_string(),
            },
            technical_requirements: TechnicalRequirements {
                scraping_method: "HTTP requests with parsing".to_string(),
                complexity_level: Level::Medium,
                special_considerations: vec![
                    "Rate limiting".to_string(),
                    "Data validation".to_string(),
                ],
                estimated_setup_time: "2-4 hours".to_string(),
            },
            next_steps: vec![
                "Generate scraper code".to_string(),
                "Test and validate".to_string(),
                "Deploy solution".to_string(),
            ],
            final_question: crate::types::default_final_question(),
        }
    }

    fn format_summary_message(
        project: &Project,
        domains: &[String],
        schema_fields: &[DataField],
    ) -> String {
        let mut message = format!(
            "🎯 PROJECT SUMMARY & SCHEMA\n\n\
             📋 Your Scraping Project:\n\
             • Target Sites: {}\n\
             • Total URLs: {}\n\
             • Project Goal: Extract structured data for analysis\n\n\
             📊 Data Schema (What You'll Get):\n```\n{{",
            domains.join(", "),
            project.target_urls.len(),
        );

        for (i, field) in schema_fields.iter().enumerate() {
            message.push_str(&format!(
                "\n  \"{}\": \"{}\", // {}",
                field.field_name,
                field.data_type.as_str(),
                field.description
            ));
            if i >= 4 {
                let remaining = schema_fields.len().saturating_sub(5);
                if remaining > 0 {
                    message.push_str(&format!("\n  // ... and {} more fields", remaining));
                }
                break;
            }
        }

        message.push_str(
            "\n}\n```\n\n\
             ⚙️ Technical Details:\n\
             • Method: Web scraping with structured extraction\n\
             • Output: JSON format with clean, structured data\n\
             • Frequency: Configurable (one-time, daily, weekly, etc.)\n\n\
             🚀 Next Steps:\n\
             1. Generate custom scraper code\n\
             2. Test with your target URLs\n\
             3. Provide ready-to-use solution\n\n\
             ❓ Is there anything else you'd like to clarify or modify about this \
             scraping project?",
        );

        message
    }
}

/// Find URLs in free text with a generic pattern.
pub(crate) fn detect_urls(message: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(URL_PATTERN) else {
        return Vec::new();
    };
    pattern
        .find_iter(message)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')', '\'']).to_string())
        .collect()
}

fn host_of(url: &str) -> &str {
    let rest = url.split("//").nth(1).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

fn dedup<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
