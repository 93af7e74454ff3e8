// Structured output: parse model completions into declared schemas
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use common::schema::Validate;

use super::{extract_json_from_text, LlmProvider, LlmRequest, LlmResponse};

/// Parse a completion into `T`, tolerating markdown fences and preamble.
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T> {
    let cleaned = extract_json_from_text(content)
        .with_context(|| format!("No JSON object found in LLM response: {}", preview(content)))?;
    serde_json::from_str(&cleaned)
        .with_context(|| format!("LLM response does not match the expected schema: {}", preview(&cleaned)))
}

/// Run one completion and log its token usage.
pub async fn complete<P>(provider: &P, request: LlmRequest) -> Result<LlmResponse>
where
    P: LlmProvider + ?Sized,
{
    let response = provider.generate(request).await?;
    debug!(
        model = %response.model,
        prompt_tokens = response.usage.prompt_tokens,
        completion_tokens = response.usage.completion_tokens,
        "structured completion received"
    );
    Ok(response)
}

/// One invocation constrained to the schema `T`.
pub async fn generate_structured<T, P>(provider: &P, request: LlmRequest) -> Result<T>
where
    T: DeserializeOwned,
    P: LlmProvider + ?Sized,
{
    let response = complete(provider, request).await?;
    parse_structured(&response.content)
}

/// Like [`generate_structured`], then runs the schema's own validation rules.
pub async fn generate_validated<T, P>(provider: &P, request: LlmRequest) -> Result<T>
where
    T: DeserializeOwned + Validate,
    P: LlmProvider + ?Sized,
{
    let parsed: T = generate_structured(provider, request).await?;
    let validated = parsed
        .validate()
        .context("structured response failed validation")?;
    Ok(validated)
}

fn preview(text: &str) -> String {
    const MAX: usize = 300;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
