use anyhow::{anyhow, bail, Context, Result};
use futures::FutureExt;
use serde::Deserialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use common::error::ValidationError;
use common::schema::{ArticleExtraction, Selection, Source, SourceProcessingResult, Validate};
use common::PipelineConfig;

use crate::browser::{BrowserSession, SessionFactory};
use crate::llm::structured::generate_validated;
use crate::llm::{LlmProvider, LlmRequest};

/// Longest page observation handed back to the model on the next step
const MAX_OBSERVATION_CHARS: usize = 6000;
/// Older observations are cut down further to keep the prompt bounded
const MAX_HISTORY_CHARS: usize = 600;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a news extraction specialist operating a web browser.

Task: find this outlet's coverage of the given topic and extract it.

You act one step at a time. Reply with exactly ONE JSON object, one of:
{"action": "navigate", "url": "<absolute or site-relative URL>"}
{"action": "search", "query": "<search terms>"}
{"action": "extract_text"}
{"action": "finish", "found_coverage": true, "article": {
    "headline": "<article headline>",
    "article_url": "<absolute http(s) URL of the article>",
    "core_viewpoint": "<the outlet's core viewpoint in 1-2 sentences, at least 10 words>",
    "publication_date": "<YYYY-MM-DD or null>",
    "sentiment": "<positive|neutral|negative|mixed or null>"
}}
{"action": "finish", "found_coverage": false, "reason": "<why nothing relevant was found>"}

Guidelines:
1. Start from the homepage snapshot you are given and look for headlines about the topic
2. Open the most relevant article to read its stance; stay on this outlet's site
3. Use search only if the homepage has nothing relevant
4. Finish as soon as you have the article, or when you are confident there is no coverage"#;

/// One step chosen by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum AgentAction {
    Navigate {
        url: String,
    },
    Search {
        query: String,
    },
    ExtractText {},
    Finish {
        found_coverage: bool,
        #[serde(default)]
        article: Option<ArticleExtraction>,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Validate for AgentAction {
    fn validate(self) -> std::result::Result<Self, ValidationError> {
        match self {
            AgentAction::Finish {
                found_coverage,
                article: Some(article),
                reason,
            } => Ok(AgentAction::Finish {
                found_coverage,
                article: Some(article.validate()?),
                reason,
            }),
            other => Ok(other),
        }
    }
}

/// What a worker concluded about its source.
#[derive(Debug)]
enum Finding {
    Article(ArticleExtraction),
    NotFound(Option<String>),
}

/// An executed browser action and what the page looked like afterwards.
struct Observation {
    action: String,
    text: String,
}

/// Tunables shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub max_steps: usize,
    pub timeout: Option<Duration>,
}

impl From<&PipelineConfig> for WorkerOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            timeout: config.worker_timeout,
        }
    }
}

/// Extraction phase: process the selection in consecutive batches.
///
/// All workers of a batch run concurrently and the batch is awaited as a whole
/// before the next one starts, so at most `batch_size` browser sessions are
/// ever open. Returns exactly one result per selected source, in selection order.
pub async fn run_extraction(
    selection: &Selection,
    config: &PipelineConfig,
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<dyn SessionFactory>,
) -> Vec<SourceProcessingResult> {
    let total = selection.len();
    let batch_size = config.batch_size.max(1);
    let total_batches = total.div_ceil(batch_size);
    let options = WorkerOptions::from(config);
    info!("=== EXTRACTION PHASE: processing {} sources in {} batches ===", total, total_batches);

    let mut results = Vec::with_capacity(total);

    for (index, batch) in selection.sources.chunks(batch_size).enumerate() {
        info!("Batch {}/{} ({} sources)", index + 1, total_batches, batch.len());

        // Start every worker of the batch before awaiting any of them
        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|source| {
                let provider = provider.clone();
                let sessions = sessions.clone();
                let topic = config.topic.clone();
                let options = options.clone();
                let worker_source = source.clone();
                let handle = tokio::spawn(async move {
                    process_source(
                        &worker_source,
                        &topic,
                        provider.as_ref(),
                        sessions.as_ref(),
                        &options,
                    )
                    .await
                });
                (source, handle)
            })
            .collect();

        for (source, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    error!(source = %source.name, %join_err, "extraction worker panicked");
                    SourceProcessingResult::failed(&source, format!("worker task failed: {}", join_err))
                }
            };
            results.push(result);
        }

        if index + 1 < total_batches && !config.batch_delay.is_zero() {
            tokio::time::sleep(config.batch_delay).await;
        }
    }

    let found = results.iter().filter(|r| r.found_coverage).count();
    info!(
        "=== EXTRACTION PHASE COMPLETE: {}/{} sources found coverage ===",
        found,
        results.len()
    );
    results
}

/// Run one worker: own a fresh session for the source, always close it, never fail.
pub async fn process_source(
    source: &Source,
    topic: &str,
    provider: &dyn LlmProvider,
    sessions: &dyn SessionFactory,
    options: &WorkerOptions,
) -> SourceProcessingResult {
    info!("--- Processing: {} ({}) ---", source.name, source.country);
    let start = Instant::now();

    let mut session = match sessions.open(source).await {
        Ok(session) => session,
        Err(e) => {
            warn!(source = %source.name, "could not open browser session: {:#}", e);
            return SourceProcessingResult::failed(
                source,
                format!("failed to open browser session: {:#}", e),
            );
        }
    };

    // A panic in the agent becomes an error so the session still gets closed
    let agent = AssertUnwindSafe(run_agent(
        session.as_mut(),
        source,
        topic,
        provider,
        options.max_steps,
    ))
    .catch_unwind()
    .map(|caught| {
        caught.unwrap_or_else(|panic| Err(anyhow!("worker panicked: {}", panic_message(panic.as_ref()))))
    });
    let outcome = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, agent).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("extraction timed out after {}s", limit.as_secs())),
        },
        None => agent.await,
    };

    if let Err(e) = session.close().await {
        warn!(source = %source.name, "failed to close browser session: {:#}", e);
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(Finding::Article(article)) => {
            info!(source = %source.name, elapsed_ms, "✓ Found: {}", article.headline);
            SourceProcessingResult::covered(source, article)
        }
        Ok(Finding::NotFound(reason)) => {
            info!(source = %source.name, elapsed_ms, "no coverage found");
            SourceProcessingResult::not_found(source, reason)
        }
        Err(e) => {
            warn!(source = %source.name, elapsed_ms, "✗ Error: {:#}", e);
            SourceProcessingResult::failed(source, format!("{:#}", e))
        }
    }
}

/// Tool loop: show the model the page, execute the action it picks, repeat.
async fn run_agent(
    session: &mut dyn BrowserSession,
    source: &Source,
    topic: &str,
    provider: &dyn LlmProvider,
    max_steps: usize,
) -> Result<Finding> {
    let homepage = session
        .navigate(&source.homepage)
        .await
        .with_context(|| format!("failed to load homepage {}", source.homepage))?;
    let mut history = vec![Observation {
        action: format!("navigate {}", source.homepage),
        text: homepage,
    }];

    for step in 1..=max_steps {
        let prompt = build_step_prompt(source, topic, &history, step, max_steps);
        let mut request = LlmRequest::structured(EXTRACTION_SYSTEM_PROMPT, prompt);
        request.max_tokens = Some(1500);
        request.temperature = Some(0.2);

        let action: AgentAction = generate_validated(provider, request)
            .await
            .with_context(|| format!("invalid agent step {}", step))?;

        let (label, observed) = match action {
            AgentAction::Finish {
                found_coverage: true,
                article: Some(article),
                ..
            } => return Ok(Finding::Article(article)),
            AgentAction::Finish {
                found_coverage: true,
                article: None,
                ..
            } => bail!("agent reported coverage without an article"),
            AgentAction::Finish { reason, .. } => return Ok(Finding::NotFound(reason)),
            AgentAction::Navigate { url } => {
                let url = resolve_url(&source.homepage, &url)?;
                (format!("navigate {}", url), session.navigate(&url).await)
            }
            AgentAction::Search { query } => {
                (format!("search {:?}", query), session.search(&query).await)
            }
            AgentAction::ExtractText {} => ("extract_text".to_string(), session.extract_text().await),
        };

        // Tool errors go back to the model; it may try another page
        let text = match observed {
            Ok(text) => text,
            Err(e) => format!("ERROR: {:#}", e),
        };
        history.push(Observation { action: label, text });
    }

    bail!("no answer after {} browser steps", max_steps)
}

fn build_step_prompt(
    source: &Source,
    topic: &str,
    history: &[Observation],
    step: usize,
    max_steps: usize,
) -> String {
    let mut prompt = format!(
        "Outlet: {} ({}, {})\nHomepage: {}\nTopic: {}\n\n",
        source.name, source.country, source.locale, source.homepage, topic
    );
    prompt.push_str("Actions so far:\n");

    let last = history.len().saturating_sub(1);
    for (i, obs) in history.iter().enumerate() {
        let limit = if i == last { MAX_OBSERVATION_CHARS } else { MAX_HISTORY_CHARS };
        prompt.push_str(&format!(
            "\n### {}. {}\n{}\n",
            i + 1,
            obs.action,
            truncate_chars(&obs.text, limit)
        ));
    }

    prompt.push_str(&format!(
        "\nStep {} of {}. {}Reply with one JSON action.",
        step,
        max_steps,
        if step == max_steps {
            "This is your last step: you must finish now. "
        } else {
            ""
        }
    ));
    prompt
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolve a model-supplied URL against the outlet homepage.
fn resolve_url(homepage: &str, url: &str) -> Result<String> {
    let base = url::Url::parse(homepage).with_context(|| format!("invalid homepage {}", homepage))?;
    let resolved = base
        .join(url.trim())
        .with_context(|| format!("invalid URL from agent: {}", url))?;
    Ok(resolved.to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}\n[... truncated]", text.chars().take(max).collect::<String>())
    }
}
