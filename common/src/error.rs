use thiserror::Error;

/// Problems detected before any stage runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LLM API key env var '{0}' not set")]
    MissingCredential(String),

    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Source count {requested} out of range (catalog has {available} sources)")]
    SourceCount { requested: usize, available: usize },

    #[error("Batch size must be at least 1")]
    BatchSize,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A structured model response that does not satisfy its schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} cannot be empty or whitespace")]
    Empty { field: &'static str },

    #[error("{field} cannot be placeholder text like '{value}'")]
    Placeholder { field: &'static str, value: String },

    #[error("{field} length {len} outside {min}..={max}")]
    Length {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("Core viewpoint too short ({words} words), need at least {min}")]
    TooFewWords { words: usize, min: usize },

    #[error("Invalid article URL '{0}'")]
    Url(String),

    #[error("Invalid publication date '{0}', expected YYYY-MM-DD")]
    Date(String),

    #[error("Unknown sentiment label '{0}'")]
    Sentiment(String),

    #[error("found_coverage={found_coverage} inconsistent with article/error fields")]
    Coverage { found_coverage: bool },
}

/// Planning returned a selection that violates the selection contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Selected {count} sources, expected {min}..={max}")]
    OutOfBounds { count: usize, min: usize, max: usize },

    #[error("Unknown source identifier '{0}'")]
    UnknownSource(String),

    #[error("Source '{0}' selected more than once")]
    Duplicate(String),

    #[error("Malformed planning response: {0}")]
    Malformed(String),
}

/// Aggregation could not produce a structurally valid output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Entry {0} is not a covered result")]
    UnknownEntry(usize),

    #[error("Entry {0} listed more than once")]
    DuplicateEntry(usize),

    #[error("Ordering lists {listed} entries but {covered} results have coverage")]
    Incomplete { listed: usize, covered: usize },

    #[error("Summary is empty")]
    EmptySummary,

    #[error("Malformed aggregation response: {0}")]
    Malformed(String),
}
