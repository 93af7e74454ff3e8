use anyhow::Result;

use common::schema::Source;

pub mod mcp;

/// Browser capabilities available to an extraction worker.
///
/// Every operation returns a textual observation of the page that the model
/// reads on its next step. A session belongs to exactly one worker and must be
/// closed by it on every exit path.
#[async_trait::async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and return a snapshot of the resulting page
    async fn navigate(&mut self, url: &str) -> Result<String>;

    /// Search the session's source site for `query`
    async fn search(&mut self, query: &str) -> Result<String>;

    /// Text snapshot of the current page
    async fn extract_text(&mut self) -> Result<String>;

    /// Release the underlying automation resources
    async fn close(&mut self) -> Result<()>;
}

/// Opens a fresh, dedicated session scoped to one source.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, source: &Source) -> Result<Box<dyn BrowserSession>>;
}
