//! Automation prompt rendering.
//!
//! Turns the terminal structured specification into the single
//! natural-language instruction the external code-generation tool receives.
//! Rendered once per project and stored; repeated generation attempts reuse
//! the stored text so they are reproducible from the same specification.

use crate::types::{DataField, SummaryAnalysis};

/// Render the full generation instruction from a confirmed specification.
pub fn render_automation_prompt(summary: &SummaryAnalysis, target_urls: &[String]) -> String {
    let mut prompt = String::from("Build a complete, working web scraper with this specification.\n\n");

    let objective = if summary.project_summary.objective.is_empty() {
        "Extract structured data from the target websites"
    } else {
        &summary.project_summary.objective
    };
    prompt.push_str(&format!("Objective: {}\n", objective));

    if !summary.project_summary.use_case.is_empty() {
        prompt.push_str(&format!("Use case: {}\n", summary.project_summary.use_case));
    }

    prompt.push_str("\nTarget URLs:\n");
    for url in target_urls {
        prompt.push_str(&format!("- {}\n", url));
    }

    if !summary.data_schema.primary_data.is_empty() {
        prompt.push_str("\nRequired fields:\n");
        for field in &summary.data_schema.primary_data {
            prompt.push_str(&render_field(field));
        }
    }

    if !summary.data_schema.secondary_data.is_empty() {
        prompt.push_str("\nOptional fields (extract when present):\n");
        for field in &summary.data_schema.secondary_data {
            prompt.push_str(&render_field(field));
        }
    }

    if !summary.data_schema.output_structure.is_empty() {
        prompt.push_str(&format!("\nOutput structure: {}\n", summary.data_schema.output_structure));
    }

    let tech = &summary.technical_requirements;
    prompt.push_str("\nTechnical requirements:\n");
    if !tech.scraping_method.is_empty() {
        prompt.push_str(&format!("- Method: {}\n", tech.scraping_method));
    }
    prompt.push_str(&format!("- Complexity: {}\n", tech.complexity_level.label()));
    for consideration in &tech.special_considerations {
        prompt.push_str(&format!("- {}\n", consideration));
    }

    prompt.push_str(
        "\nDeliverable: one self-contained Python script saved in the current \
         working directory. It must run end to end without manual edits, print \
         progress as it scrapes, handle request errors gracefully, and write the \
         extracted records as JSON.\n",
    );

    prompt
}

fn render_field(field: &DataField) -> String {
    let optional = if field.optional { ", optional" } else { "" };
    let description = if field.description.is_empty() {
        String::new()
    } else {
        format!(" - {}", field.description)
    };
    format!(
        "- {} ({}{}){}\n",
        field.field_name,
        field.data_type.as_str(),
        optional,
        description
    )
}
