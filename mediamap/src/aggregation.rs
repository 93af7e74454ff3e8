use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use common::error::AggregationError;
use common::schema::{AggregationOutput, MediaComparison, SourceProcessingResult};

use crate::llm::structured::{complete, parse_structured};
use crate::llm::{LlmProvider, LlmRequest};

const AGGREGATION_SYSTEM_PROMPT: &str = r#"You are a media analysis synthesizer.

Task: Compare how different outlets covered one topic.

Requirements:
1. Order the numbered articles by relevance/importance for a comparison table (most important first); include every entry number exactly once
2. Write a 2-3 sentence summary highlighting key patterns, differences, or consensus; mention outlets where no coverage was found if that is notable
3. Reply with strict JSON: {"order": [<entry numbers>], "summary": "<summary>"}"#;

#[derive(Debug, Deserialize)]
struct AggregationResponse {
    #[serde(default)]
    order: Vec<usize>,
    summary: String,
}

/// Article fields shown to the model for one covered entry
#[derive(Serialize)]
struct ArticleEntry<'a> {
    entry: usize,
    country: &'a str,
    media_name: &'a str,
    headline: &'a str,
    article_url: &'a str,
    core_viewpoint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    publication_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentiment: Option<&'a str>,
}

/// Aggregation phase: one tool-less invocation turning results into a report.
///
/// Only results with coverage become table rows; the rest are only described
/// to the model for the summary. Counts are computed here, not by the model.
pub async fn aggregate(
    provider: &dyn LlmProvider,
    topic: &str,
    results: &[SourceProcessingResult],
) -> Result<AggregationOutput> {
    info!("=== AGGREGATION PHASE: aggregating {} results ===", results.len());

    let covered: Vec<&SourceProcessingResult> = results
        .iter()
        .filter(|r| r.found_coverage && r.article.is_some())
        .collect();

    let prompt = build_prompt(topic, results, &covered)?;
    let mut request = LlmRequest::structured(AGGREGATION_SYSTEM_PROMPT, prompt);
    request.temperature = Some(0.3);

    let response = complete(provider, request)
        .await
        .context("Aggregation invocation failed")?;

    let parsed: AggregationResponse = parse_structured(&response.content)
        .map_err(|e| AggregationError::Malformed(format!("{:#}", e)))?;

    let output = build_output(topic, results, &covered, parsed)?;
    info!(
        "✓ Aggregation complete: {} articles in table, {}/{} sources with coverage",
        output.comparison_table.len(),
        output.sources_with_coverage,
        output.total_sources_checked
    );
    Ok(output)
}

fn build_prompt(
    topic: &str,
    results: &[SourceProcessingResult],
    covered: &[&SourceProcessingResult],
) -> Result<String> {
    let entries: Vec<ArticleEntry> = covered
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let a = r.article.as_ref()?;
            Some(ArticleEntry {
                entry: i + 1,
                country: &r.country,
                media_name: &r.media_name,
                headline: &a.headline,
                article_url: &a.article_url,
                core_viewpoint: &a.core_viewpoint,
                publication_date: a.publication_date.as_deref(),
                sentiment: a.sentiment.as_deref(),
            })
        })
        .collect();
    let articles_json =
        serde_json::to_string_pretty(&entries).context("Failed to serialize extraction results")?;

    let mut prompt = format!(
        "Topic: {}\n\nExtracted articles from {} of {} sources:\n{}\n",
        topic,
        covered.len(),
        results.len(),
        articles_json
    );

    let missing: Vec<String> = results
        .iter()
        .filter(|r| !r.found_coverage)
        .map(|r| {
            format!(
                "- {} ({}): {}",
                r.media_name,
                r.country,
                r.error.as_deref().unwrap_or("no coverage")
            )
        })
        .collect();
    if !missing.is_empty() {
        prompt.push_str("\nSources without usable coverage:\n");
        prompt.push_str(&missing.join("\n"));
        prompt.push('\n');
    }

    prompt.push_str("\nCreate the final ordering and summary.");
    Ok(prompt)
}

/// Check the model's ordering and assemble the output from the results themselves.
fn build_output(
    topic: &str,
    results: &[SourceProcessingResult],
    covered: &[&SourceProcessingResult],
    response: AggregationResponse,
) -> std::result::Result<AggregationOutput, AggregationError> {
    let summary = response.summary.trim().to_string();
    if summary.is_empty() {
        return Err(AggregationError::EmptySummary);
    }

    let mut seen = HashSet::new();
    for &entry in &response.order {
        if entry == 0 || entry > covered.len() {
            return Err(AggregationError::UnknownEntry(entry));
        }
        if !seen.insert(entry) {
            return Err(AggregationError::DuplicateEntry(entry));
        }
    }
    if response.order.len() != covered.len() {
        return Err(AggregationError::Incomplete {
            listed: response.order.len(),
            covered: covered.len(),
        });
    }

    let comparison_table: Vec<MediaComparison> = response
        .order
        .iter()
        .filter_map(|&entry| MediaComparison::from_result(covered[entry - 1]))
        .collect();

    Ok(AggregationOutput {
        topic: topic.to_string(),
        total_sources_checked: results.len(),
        sources_with_coverage: results.iter().filter(|r| r.found_coverage).count(),
        comparison_table,
        summary,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::schema::{ArticleExtraction, Source};

    fn source(name: &str) -> Source {
        Source {
            id: name.to_lowercase(),
            name: name.to_string(),
            country: "Testland".to_string(),
            locale: "en".to_string(),
            homepage: format!("https://{}.example/", name.to_lowercase()),
        }
    }

    fn covered(name: &str) -> SourceProcessingResult {
        SourceProcessingResult::covered(
            &source(name),
            ArticleExtraction {
                headline: format!("{} reports on the summit", name),
                article_url: format!("https://{}.example/summit", name.to_lowercase()),
                core_viewpoint: "The outlet describes the agreement as modest but meaningful for vulnerable nations."
                    .to_string(),
                publication_date: None,
                sentiment: None,
            },
        )
    }

    fn failed(name: &str) -> SourceProcessingResult {
        SourceProcessingResult::failed(&source(name), "navigation timeout")
    }

    fn response(order: Vec<usize>, summary: &str) -> AggregationResponse {
        AggregationResponse {
            order,
            summary: summary.to_string(),
        }
    }

    fn run(results: &[SourceProcessingResult], r: AggregationResponse) -> std::result::Result<AggregationOutput, AggregationError> {
        let covered: Vec<&SourceProcessingResult> =
            results.iter().filter(|r| r.found_coverage).collect();
        build_output("Climate Summit 2024", results, &covered, r)
    }

    #[test]
    fn test_rows_follow_model_order() {
        let results = vec![covered("Alpha"), failed("Beta"), covered("Gamma")];
        let out = run(&results, response(vec![2, 1], "Coverage converges.")).unwrap();
        assert_eq!(out.total_sources_checked, 3);
        assert_eq!(out.sources_with_coverage, 2);
        assert_eq!(out.comparison_table.len(), 2);
        assert_eq!(out.comparison_table[0].media_name, "Gamma");
        assert_eq!(out.comparison_table[1].media_name, "Alpha");
    }

    #[test]
    fn test_empty_input() {
        let out = run(&[], response(vec![], "Nothing was found.")).unwrap();
        assert_eq!(out.total_sources_checked, 0);
        assert_eq!(out.sources_with_coverage, 0);
        assert!(out.comparison_table.is_empty());
    }

    #[test]
    fn test_all_failed() {
        let results = vec![failed("Alpha"), failed("Beta")];
        let out = run(&results, response(vec![], "No outlet covered it.")).unwrap();
        assert_eq!(out.total_sources_checked, 2);
        assert_eq!(out.sources_with_coverage, 0);
    }

    #[test]
    fn test_invalid_orderings_rejected() {
        let results = vec![covered("Alpha"), covered("Beta")];
        assert_eq!(
            run(&results, response(vec![1, 3], "s")).unwrap_err(),
            AggregationError::UnknownEntry(3)
        );
        assert_eq!(
            run(&results, response(vec![1, 1], "s")).unwrap_err(),
            AggregationError::DuplicateEntry(1)
        );
        assert_eq!(
            run(&results, response(vec![2], "s")).unwrap_err(),
            AggregationError::Incomplete { listed: 1, covered: 2 }
        );
        assert_eq!(
            run(&results, response(vec![0, 1], "s")).unwrap_err(),
            AggregationError::UnknownEntry(0)
        );
        assert_eq!(
            run(&results, response(vec![1, 2], "  ")).unwrap_err(),
            AggregationError::EmptySummary
        );
    }

    #[test]
    fn test_prompt_lists_missing_sources() {
        let results = vec![covered("Alpha"), failed("Beta")];
        let covered: Vec<&SourceProcessingResult> =
            results.iter().filter(|r| r.found_coverage).collect();
        let prompt = build_prompt("Climate Summit 2024", &results, &covered).unwrap();
        assert!(prompt.contains("from 1 of 2 sources"));
        assert!(prompt.contains("\"entry\": 1"));
        assert!(prompt.contains("- Beta (Testland): navigation timeout"));
    }
}
