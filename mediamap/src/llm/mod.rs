use anyhow::Result;

/// Core trait for LLM providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Optional system message sent before the prompt
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
    /// Ask the provider to constrain output to a JSON object
    pub json_mode: bool,
}

impl LlmRequest {
    /// A JSON-mode request with a system message, as used by every pipeline phase.
    pub fn structured(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            prompt: prompt.into(),
            json_mode: true,
            ..Default::default()
        }
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;
pub mod structured;

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return Some(text[start..=end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_from_text(text).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_plain_fence() {
        let text = "```\n{\"a\": 2}\n```";
        assert_eq!(extract_json_from_text(text).as_deref(), Some("{\"a\": 2}"));
    }

    #[test]
    fn test_extract_json_with_preamble() {
        let text = "Sure! {\"action\": \"finish\", \"args\": {}} hope this helps";
        assert_eq!(
            extract_json_from_text(text).as_deref(),
            Some("{\"action\": \"finish\", \"args\": {}}")
        );
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json_from_text("no json here").is_none());
        assert!(extract_json_from_text("} backwards {").is_none());
    }
}
