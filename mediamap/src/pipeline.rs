use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use common::schema::{AggregationOutput, Source};
use common::PipelineConfig;

use crate::aggregation::aggregate;
use crate::browser::SessionFactory;
use crate::extraction::run_extraction;
use crate::llm::LlmProvider;
use crate::planning::plan_sources;
use crate::report::write_report;

/// What a completed run produced
#[derive(Debug)]
pub struct PipelineOutcome {
    pub report_path: PathBuf,
    pub output: AggregationOutput,
}

/// Planning → Extraction → Aggregation → Report.
///
/// Per-source extraction failures are recorded in the report; every other
/// failure stops the run before the next stage.
pub async fn run_pipeline(
    config: &PipelineConfig,
    catalog: &[Source],
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<dyn SessionFactory>,
) -> Result<PipelineOutcome> {
    config.validate(catalog.len())?;

    // 1. Planning (no browser tools)
    let bounds = config.selection_bounds(catalog.len());
    let selection = plan_sources(provider.as_ref(), catalog, &config.topic, bounds)
        .await
        .context("Planning phase failed")?;

    // 2. Extraction (one fresh browser session per source, batched)
    let results = run_extraction(&selection, config, provider.clone(), sessions).await;

    // 3. Aggregation (no browser tools, structured results only)
    let output = aggregate(provider.as_ref(), &config.topic, &results)
        .await
        .context("Aggregation phase failed")?;

    // 4. Report
    let report_path = write_report(&output, &config.output_dir)
        .await
        .context("Failed to write report")?;

    info!("=== PIPELINE COMPLETE ===");
    Ok(PipelineOutcome {
        report_path,
        output,
    })
}
