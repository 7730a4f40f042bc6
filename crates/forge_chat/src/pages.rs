//! Page-analyzer collaborator contract and the per-project analysis cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChatError, ChatResult};
use crate::types::{PageAnalysis, Project};

/// What the page-analyzer collaborator returns for one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysisOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<PageAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageAnalysisOutcome {
    pub fn success(analysis: PageAnalysis) -> Self {
        Self {
            success: true,
            analysis: Some(analysis),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            analysis: None,
            error: Some(error.into()),
        }
    }
}

/// External page-content fetcher and summarizer.
#[async_trait]
pub trait PageAnalyzer: Send + Sync {
    async fn analyze(&self, url: &str) -> PageAnalysisOutcome;
}

/// Per-project analysis cache over the collaborator.
///
/// Analysis is a one-time cost per URL per project: a cached entry is
/// returned as-is and the collaborator is never called again for it.
pub struct PageAnalysisCache {
    analyzer: Arc<dyn PageAnalyzer>,
}

impl PageAnalysisCache {
    pub fn new(analyzer: Arc<dyn PageAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Return the cached analysis for `url`, or analyze and store it.
    ///
    /// A collaborator failure becomes a `PageAnalysis` error the caller
    /// renders as a soft warning; it never aborts the turn.
    pub async fn get_or_analyze(
        &self,
        url: &str,
        project: &mut Project,
    ) -> ChatResult<PageAnalysis> {
        if let Some(cached) = project.data_requirements.page_analyses.get(url) {
            info!("Page analysis cache hit: {}", url);
            return Ok(cached.clone());
        }

        let outcome = self.analyzer.analyze(url).await;
        match (outcome.success, outcome.analysis) {
            (true, Some(analysis)) => {
                project
                    .data_requirements
                    .page_analyses
                    .insert(url.to_string(), analysis.clone());
                info!("Analyzed and cached page: {}", url);
                Ok(analysis)
            }
            _ => {
                let reason = outcome.error.unwrap_or_else(|| "Unknown error".to_string());
                warn!("Page analysis failed for {}: {}", url, reason);
                Err(ChatError::PageAnalysis(reason))
            }
        }
    }
}

/// Render one page analysis as a user-facing summary message.
pub fn render_analysis_summary(url: &str, analysis: &PageAnalysis) -> String {
    let mut summary = format!(
        "📋 Analysis of {url}\n\n\
         🏷️ Page Type: {}\n\
         📄 Content: {}\n\
         💎 Data Richness: {}\n\
         ⚙️ Complexity: {}\n\n\
         🎯 Main Data Available:",
        title_case(&analysis.page_type),
        analysis.main_content_type,
        analysis.richness.label(),
        analysis.complexity.label(),
    );

    if analysis.primary_fields.is_empty() {
        summary.push_str("\n• General content and text");
    } else {
        for field in analysis.primary_fields.iter().take(5) {
            summary.push_str(&format!("\n• {}", field));
        }
        if analysis.primary_fields.len() > 5 {
            summary.push_str(&format!(
                "\n• ... and {} more fields",
                analysis.primary_fields.len() - 5
            ));
        }
    }

    if !analysis.secondary_fields.is_empty() {
        summary.push_str("\n\n📊 Additional Data:");
        for field in analysis.secondary_fields.iter().take(3) {
            summary.push_str(&format!("\n• {}", field));
        }
    }

    if !analysis.insights.is_empty() {
        summary.push_str("\n\n💡 Key Insights:");
        for insight in analysis.insights.iter().take(2) {
            summary.push_str(&format!("\n• {}", insight));
        }
    }

    summary
}

fn title_case(text: &str) -> String {
    text.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
