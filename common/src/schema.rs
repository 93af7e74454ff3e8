/*!
Structured data contracts shared by every pipeline phase.

Model responses are deserialized into these types and then passed through
[`Validate`], which trims text fields and rejects values that would make the
final report meaningless (placeholders, empty headlines, relative URLs...).
*/

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MIN_HEADLINE_LENGTH: usize = 5;
pub const MAX_HEADLINE_LENGTH: usize = 500;
pub const MIN_VIEWPOINT_LENGTH: usize = 20;
pub const MAX_VIEWPOINT_LENGTH: usize = 1000;
pub const MIN_VIEWPOINT_WORDS: usize = 10;

const PLACEHOLDERS: &[&str] = &["n/a", "none", "undefined", "null"];
const SENTIMENTS: &[&str] = &["positive", "neutral", "negative", "mixed"];

/// Schema check applied to values produced by the model.
///
/// Consumes the value so implementations can normalise fields (trim,
/// lowercase) on the way through.
pub trait Validate: Sized {
    fn validate(self) -> Result<Self, ValidationError>;
}

/// A news outlet available in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier the planner refers to (e.g. "cnn")
    pub id: String,
    pub name: String,
    /// Country or organization (e.g. "United States", "United Nations")
    pub country: String,
    /// BCP-47 style locale of the homepage (e.g. "en", "de")
    pub locale: String,
    pub homepage: String,
}

/// Sources chosen by the planning phase, in the order they will be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub sources: Vec<Source>,
    pub rationale: String,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Information extracted from a single news article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleExtraction {
    pub headline: String,
    pub article_url: String,
    /// The outlet's stance on the topic in 1-2 sentences
    pub core_viewpoint: String,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
}

impl Validate for ArticleExtraction {
    fn validate(self) -> Result<Self, ValidationError> {
        let headline = reject_placeholder("headline", &self.headline)?;
        check_length(
            "headline",
            &headline,
            MIN_HEADLINE_LENGTH,
            MAX_HEADLINE_LENGTH,
        )?;

        let core_viewpoint = reject_placeholder("core_viewpoint", &self.core_viewpoint)?;
        check_length(
            "core_viewpoint",
            &core_viewpoint,
            MIN_VIEWPOINT_LENGTH,
            MAX_VIEWPOINT_LENGTH,
        )?;
        let words = core_viewpoint.split_whitespace().count();
        if words < MIN_VIEWPOINT_WORDS {
            return Err(ValidationError::TooFewWords {
                words,
                min: MIN_VIEWPOINT_WORDS,
            });
        }

        let article_url = self.article_url.trim().to_string();
        match url::Url::parse(&article_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => return Err(ValidationError::Url(article_url)),
        }

        let publication_date = match self.publication_date.map(|d| d.trim().to_string()) {
            Some(d) if d.is_empty() => None,
            Some(d) => {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|_| ValidationError::Date(d.clone()))?;
                Some(d)
            }
            None => None,
        };

        let sentiment = match self.sentiment.map(|s| s.trim().to_lowercase()) {
            Some(s) if s.is_empty() => None,
            Some(s) if SENTIMENTS.contains(&s.as_str()) => Some(s),
            Some(s) => return Err(ValidationError::Sentiment(s)),
            None => None,
        };

        Ok(Self {
            headline,
            article_url,
            core_viewpoint,
            publication_date,
            sentiment,
        })
    }
}

fn reject_placeholder(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let stripped = value.trim();
    if stripped.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if PLACEHOLDERS.contains(&stripped.to_lowercase().as_str()) {
        return Err(ValidationError::Placeholder {
            field,
            value: stripped.to_string(),
        });
    }
    Ok(stripped.to_string())
}

fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::Length {
            field,
            len,
            min,
            max,
        });
    }
    Ok(())
}

/// Outcome of processing one selected source during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProcessingResult {
    pub country: String,
    pub media_name: String,
    pub homepage_url: String,
    pub found_coverage: bool,
    #[serde(default)]
    pub article: Option<ArticleExtraction>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SourceProcessingResult {
    pub fn covered(source: &Source, article: ArticleExtraction) -> Self {
        Self {
            country: source.country.clone(),
            media_name: source.name.clone(),
            homepage_url: source.homepage.clone(),
            found_coverage: true,
            article: Some(article),
            error: None,
        }
    }

    /// The source was reachable but had nothing on the topic.
    pub fn not_found(source: &Source, reason: Option<String>) -> Self {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "no relevant coverage found".to_string());
        Self::failed(source, reason)
    }

    pub fn failed(source: &Source, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            country: source.country.clone(),
            media_name: source.name.clone(),
            homepage_url: source.homepage.clone(),
            found_coverage: false,
            article: None,
            error: Some(error),
        }
    }
}

impl Validate for SourceProcessingResult {
    fn validate(self) -> Result<Self, ValidationError> {
        let consistent = match (self.found_coverage, &self.article, &self.error) {
            (true, Some(_), None) => true,
            (false, None, Some(e)) => !e.trim().is_empty(),
            _ => false,
        };
        if !consistent {
            return Err(ValidationError::Coverage {
                found_coverage: self.found_coverage,
            });
        }
        Ok(self)
    }
}

/// A row in the final comparison table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaComparison {
    pub country: String,
    pub media_name: String,
    pub article_title: String,
    pub article_url: String,
    pub core_viewpoint: String,
}

impl MediaComparison {
    /// Builds the display row for a covered result; `None` when there is no article.
    pub fn from_result(result: &SourceProcessingResult) -> Option<Self> {
        if !result.found_coverage {
            return None;
        }
        let article = result.article.as_ref()?;
        Some(Self {
            country: result.country.clone(),
            media_name: result.media_name.clone(),
            article_title: article.headline.clone(),
            article_url: article.article_url.clone(),
            core_viewpoint: article.core_viewpoint.clone(),
        })
    }
}

/// Final output of the aggregation phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationOutput {
    pub topic: String,
    pub total_sources_checked: usize,
    pub sources_with_coverage: usize,
    pub comparison_table: Vec<MediaComparison>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> ArticleExtraction {
        ArticleExtraction {
            headline: "  Leaders agree on new emissions targets  ".to_string(),
            article_url: "https://example-news.com/climate/summit-2024".to_string(),
            core_viewpoint: "The outlet frames the summit as a cautious step forward, \
                             stressing that financing commitments remain vague."
                .to_string(),
            publication_date: Some("2024-11-12".to_string()),
            sentiment: Some("Mixed".to_string()),
        }
    }

    fn source() -> Source {
        Source {
            id: "test".to_string(),
            name: "Test News Network".to_string(),
            country: "United States".to_string(),
            locale: "en".to_string(),
            homepage: "https://example-news.com".to_string(),
        }
    }

    #[test]
    fn valid_article_is_normalised() {
        let a = article().validate().expect("valid article");
        assert_eq!(a.headline, "Leaders agree on new emissions targets");
        assert_eq!(a.sentiment.as_deref(), Some("mixed"));
    }

    #[test]
    fn placeholder_headline_rejected() {
        let mut a = article();
        a.headline = "N/A".to_string();
        assert!(matches!(
            a.validate(),
            Err(ValidationError::Placeholder { field: "headline", .. })
        ));
    }

    #[test]
    fn whitespace_viewpoint_rejected() {
        let mut a = article();
        a.core_viewpoint = "   ".to_string();
        assert_eq!(
            a.validate(),
            Err(ValidationError::Empty {
                field: "core_viewpoint"
            })
        );
    }

    #[test]
    fn short_viewpoint_rejected_by_word_count() {
        let mut a = article();
        a.core_viewpoint = "Summit outcome judged quite positively overall".to_string();
        assert!(matches!(
            a.validate(),
            Err(ValidationError::TooFewWords { words: 6, .. })
        ));
    }

    #[test]
    fn relative_url_rejected() {
        let mut a = article();
        a.article_url = "/climate/summit-2024".to_string();
        assert!(matches!(a.validate(), Err(ValidationError::Url(_))));

        let mut a = article();
        a.article_url = "ftp://example-news.com/file".to_string();
        assert!(matches!(a.validate(), Err(ValidationError::Url(_))));
    }

    #[test]
    fn bad_date_and_sentiment_rejected() {
        let mut a = article();
        a.publication_date = Some("12/11/2024".to_string());
        assert!(matches!(a.validate(), Err(ValidationError::Date(_))));

        let mut a = article();
        a.sentiment = Some("furious".to_string());
        assert!(matches!(a.validate(), Err(ValidationError::Sentiment(_))));
    }

    #[test]
    fn blank_optional_fields_become_none() {
        let mut a = article();
        a.publication_date = Some(" ".to_string());
        a.sentiment = Some(String::new());
        let a = a.validate().expect("valid");
        assert!(a.publication_date.is_none());
        assert!(a.sentiment.is_none());
    }

    #[test]
    fn article_deserializes_without_optional_fields() {
        let json = r#"{
            "headline": "Summit closes with a deal",
            "article_url": "https://example.org/a",
            "core_viewpoint": "Coverage is upbeat and credits the host country for brokering the last-minute compromise."
        }"#;
        let a: ArticleExtraction = serde_json::from_str(json).expect("parse");
        assert!(a.publication_date.is_none());
        assert!(a.validate().is_ok());
    }

    #[test]
    fn result_constructors_are_consistent() {
        let ok = SourceProcessingResult::covered(&source(), article());
        assert!(ok.clone().validate().is_ok());
        assert!(MediaComparison::from_result(&ok).is_some());

        let missing = SourceProcessingResult::not_found(&source(), None);
        assert_eq!(missing.error.as_deref(), Some("no relevant coverage found"));
        assert!(missing.clone().validate().is_ok());
        assert!(MediaComparison::from_result(&missing).is_none());

        let failed = SourceProcessingResult::failed(&source(), "");
        assert_eq!(failed.error.as_deref(), Some("unknown error"));
    }

    #[test]
    fn inconsistent_result_rejected() {
        let mut r = SourceProcessingResult::covered(&source(), article());
        r.error = Some("boom".to_string());
        assert_eq!(
            r.validate(),
            Err(ValidationError::Coverage {
                found_coverage: true
            })
        );
    }
}
