use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::info;

use common::error::PlanningError;
use common::schema::{Selection, Source};
use common::sources::{find_source, format_sources_for_planning};
use common::SelectionBounds;

use crate::llm::structured::{complete, parse_structured};
use crate::llm::{LlmProvider, LlmRequest};

/// Raw planning answer, before it is checked against the catalog
#[derive(Debug, Deserialize)]
struct PlanningResponse {
    selected_ids: Vec<String>,
    #[serde(default)]
    rationale: String,
}

fn system_prompt(bounds: SelectionBounds) -> String {
    format!(
        r#"You are a media analysis expert selecting news sources.

Task: Select {min}-{max} of the most relevant news sources for the topic.

Selection criteria:
1. Geographic diversity (different regions/perspectives)
2. Political diversity (different political leanings)
3. Reliability (established mainstream sources)
4. Likely to have coverage of this topic

Use only identifiers shown in square brackets in the source list, each at most once.
Reply with strict JSON:
{{"selected_ids": ["<id>", "..."], "rationale": "<max 2 sentences>"}}"#,
        min = bounds.min,
        max = bounds.max
    )
}

/// Planning phase: one tool-less model invocation choosing which outlets to visit.
///
/// The answer is rejected rather than repaired when it violates the selection
/// contract (count outside `bounds`, unknown or repeated identifiers).
pub async fn plan_sources(
    provider: &dyn LlmProvider,
    catalog: &[Source],
    topic: &str,
    bounds: SelectionBounds,
) -> Result<Selection> {
    info!("=== PLANNING PHASE ===");
    info!("Topic: {}", topic);

    let prompt = format!(
        "Topic: {}\n\n{}\nSelect {}-{} sources that will provide diverse perspectives on this topic.",
        topic,
        format_sources_for_planning(catalog),
        bounds.min,
        bounds.max
    );
    let mut request = LlmRequest::structured(system_prompt(bounds), prompt);
    request.temperature = Some(0.2);

    let response = complete(provider, request)
        .await
        .context("Planning invocation failed")?;

    let parsed: PlanningResponse = parse_structured(&response.content)
        .map_err(|e| PlanningError::Malformed(format!("{:#}", e)))?;

    let selection = resolve_selection(catalog, parsed, bounds)?;
    info!("Selected {} sources", selection.len());
    info!("Rationale: {}", selection.rationale);
    Ok(selection)
}

/// Map planner identifiers onto catalog entries, enforcing the selection contract.
fn resolve_selection(
    catalog: &[Source],
    response: PlanningResponse,
    bounds: SelectionBounds,
) -> std::result::Result<Selection, PlanningError> {
    let count = response.selected_ids.len();
    if !bounds.contains(count) {
        return Err(PlanningError::OutOfBounds {
            count,
            min: bounds.min,
            max: bounds.max,
        });
    }

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(count);
    for raw in &response.selected_ids {
        let id = raw.trim().to_lowercase();
        let source = find_source(catalog, &id)
            .ok_or_else(|| PlanningError::UnknownSource(raw.clone()))?;
        if !seen.insert(id) {
            return Err(PlanningError::Duplicate(raw.clone()));
        }
        sources.push(source.clone());
    }

    Ok(Selection {
        sources,
        rationale: response.rationale.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::sources::global_sources;

    const BOUNDS: SelectionBounds = SelectionBounds { min: 10, max: 12 };

    fn ids(list: &[&str]) -> PlanningResponse {
        PlanningResponse {
            selected_ids: list.iter().map(|s| s.to_string()).collect(),
            rationale: " Diverse regions. ".to_string(),
        }
    }

    const TEN: &[&str] = &[
        "un-news", "cnn", "rt", "zeit", "france24", "nhk", "yonhap", "folha", "presstv", "kyiv-independent",
    ];

    #[test]
    fn test_valid_selection_keeps_order() {
        let catalog = global_sources();
        let selection = resolve_selection(&catalog, ids(TEN), BOUNDS).unwrap();
        assert_eq!(selection.len(), 10);
        assert_eq!(selection.sources[0].name, "UN News");
        assert_eq!(selection.sources[9].name, "Kyiv Independent");
        assert_eq!(selection.rationale, "Diverse regions.");
    }

    #[test]
    fn test_ids_are_normalised() {
        let catalog = global_sources();
        let mut list: Vec<&str> = TEN.to_vec();
        list[1] = " CNN ";
        assert!(resolve_selection(&catalog, ids(&list), BOUNDS).is_ok());
    }

    #[test]
    fn test_too_few_rejected() {
        let catalog = global_sources();
        let err = resolve_selection(&catalog, ids(&TEN[..9]), BOUNDS).unwrap_err();
        assert_eq!(err, PlanningError::OutOfBounds { count: 9, min: 10, max: 12 });
    }

    #[test]
    fn test_too_many_rejected() {
        let catalog = global_sources();
        let mut list = TEN.to_vec();
        list.extend(["ap", "tass", "ctv"]);
        let err = resolve_selection(&catalog, ids(&list), BOUNDS).unwrap_err();
        assert_eq!(err, PlanningError::OutOfBounds { count: 13, min: 10, max: 12 });
    }

    #[test]
    fn test_unknown_rejected() {
        let catalog = global_sources();
        let mut list = TEN.to_vec();
        list.push("bbc");
        assert_eq!(
            resolve_selection(&catalog, ids(&list), BOUNDS).unwrap_err(),
            PlanningError::UnknownSource("bbc".to_string())
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let catalog = global_sources();
        let mut list = TEN.to_vec();
        list.push("cnn");
        assert_eq!(
            resolve_selection(&catalog, ids(&list), BOUNDS).unwrap_err(),
            PlanningError::Duplicate("cnn".to_string())
        );
    }

    #[test]
    fn test_system_prompt_mentions_bounds() {
        let p = system_prompt(SelectionBounds { min: 4, max: 6 });
        assert!(p.contains("Select 4-6"));
        assert!(p.contains("\"selected_ids\""));
    }
}
