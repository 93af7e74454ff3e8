//! MCP browser session
//!
//! JSON-RPC 2.0 client speaking to a browser-automation MCP server (Playwright
//! MCP by default) over stdio, and the [`BrowserSession`] built on top of it.
//! Each session spawns its own server process; the process is killed when the
//! session is closed or dropped.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use common::schema::Source;
use common::BrowserConfig;

use super::{BrowserSession, SessionFactory};

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
const SEARCH_ENGINE_URL: &str = "https://duckduckgo.com/html/";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response (notifications parse with `id: None`)
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Stdio connection to one MCP server process.
pub struct McpClient {
    name: String,
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    call_timeout: Duration,
    closed: bool,
}

impl McpClient {
    /// Spawn the server and perform the initialization handshake:
    /// 1. Send `initialize` request
    /// 2. Receive server capabilities
    /// 3. Send `notifications/initialized` notification
    pub async fn connect(name: &str, config: &BrowserConfig) -> Result<Self> {
        let command = config.command();
        let mut cmd = Command::new(&command);
        cmd.args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut process = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn MCP server '{}' (command: {})", name, command))?;
        let stdin = process
            .stdin
            .take()
            .with_context(|| format!("Failed to capture stdin for MCP server '{}'", name))?;
        let stdout = process
            .stdout
            .take()
            .with_context(|| format!("Failed to capture stdout for MCP server '{}'", name))?;

        let mut client = Self {
            name: name.to_string(),
            process,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            call_timeout: Duration::from_secs(
                config.call_timeout_seconds.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS),
            ),
            closed: false,
        };

        let result = client
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mediamap",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await
            .with_context(|| format!("MCP server '{}' initialization failed", name))?;

        client
            .write_message(&json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized",
                "params": {}
            }))
            .await?;

        debug!(
            server = %name,
            protocol = result.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "MCP session initialized"
        );
        Ok(client)
    }

    /// Call a tool and return its text content.
    pub async fn call_tool(&mut self, tool: &str, args: Value) -> Result<String> {
        let result = self
            .request("tools/call", Some(json!({ "name": tool, "arguments": args })))
            .await
            .with_context(|| format!("MCP tool '{}' call failed", tool))?;
        tool_result_text(tool, &result)
    }

    /// Shut the server down. Safe to call more than once.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.process.kill().await {
            // Already exited on its own
            debug!(server = %self.name, %e, "MCP server kill failed");
        }
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed {
            bail!("MCP session '{}' is closed", self.name);
        }
        let id = self.next_id;
        self.next_id += 1;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        self.write_message(&request).await?;

        let response = tokio::time::timeout(self.call_timeout, self.read_response(id))
            .await
            .map_err(|_| anyhow!("Timeout waiting for MCP server response to '{}'", method))??;

        if let Some(err) = response.error {
            bail!("code={}, message={}", err.code, err.message);
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut line = serde_json::to_string(message).context("Failed to serialize JSON-RPC message")?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to MCP server stdin")?;
        self.stdin.flush().await.context("Failed to flush MCP server stdin")?;
        Ok(())
    }

    /// Read lines until the response carrying `id`, skipping logs and notifications.
    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self
                .stdout
                .read_line(&mut line)
                .await
                .context("Failed to read from MCP server stdout")?;
            if bytes_read == 0 {
                bail!("MCP server closed stdout (process may have crashed)");
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(response) if response.id == Some(id) => return Ok(response),
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    }
}

/// Flatten an MCP tool result (`{ content: [{ type: "text", text }], isError }`) to text.
fn tool_result_text(tool: &str, result: &Value) -> Result<String> {
    let text = result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
        bail!("MCP tool '{}' reported an error: {}", tool, text);
    }
    if text.is_empty() {
        return Ok(result.to_string());
    }
    Ok(text)
}

/// Site-restricted web search URL for `query` on `homepage`'s host.
pub fn site_search_url(homepage: &str, query: &str) -> Result<String> {
    let host = url::Url::parse(homepage)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .with_context(|| format!("Homepage '{}' has no host", homepage))?;
    let url = url::Url::parse_with_params(
        SEARCH_ENGINE_URL,
        &[("q", format!("site:{} {}", host, query.trim()))],
    )
    .context("Failed to build search URL")?;
    Ok(url.to_string())
}

/// A browser session backed by a dedicated Playwright MCP server.
pub struct McpBrowserSession {
    client: McpClient,
    homepage: String,
}

#[async_trait::async_trait]
impl BrowserSession for McpBrowserSession {
    async fn navigate(&mut self, url: &str) -> Result<String> {
        self.client
            .call_tool("browser_navigate", json!({ "url": url }))
            .await
    }

    async fn search(&mut self, query: &str) -> Result<String> {
        let url = site_search_url(&self.homepage, query)?;
        self.client
            .call_tool("browser_navigate", json!({ "url": url }))
            .await?;
        self.extract_text().await
    }

    async fn extract_text(&mut self) -> Result<String> {
        self.client.call_tool("browser_snapshot", json!({})).await
    }

    async fn close(&mut self) -> Result<()> {
        self.client.disconnect().await
    }
}

/// Spawns one MCP server per worker.
pub struct McpSessionFactory {
    config: BrowserConfig,
}

impl McpSessionFactory {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl SessionFactory for McpSessionFactory {
    async fn open(&self, source: &Source) -> Result<Box<dyn BrowserSession>> {
        info!(source = %source.name, command = %self.config.command(), "opening browser session");
        let client = McpClient::connect(&source.id, &self.config).await.map_err(|e| {
            warn!(source = %source.name, "browser session failed to start: {:#}", e);
            e
        })?;
        Ok(Box::new(McpBrowserSession {
            client,
            homepage: source.homepage.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_text_joins_parts() {
        let result = json!({
            "content": [
                { "type": "text", "text": "Page URL: https://tass.com/" },
                { "type": "image", "data": "..." },
                { "type": "text", "text": "- heading \"World\"" }
            ]
        });
        let text = tool_result_text("browser_snapshot", &result).unwrap();
        assert_eq!(text, "Page URL: https://tass.com/\n- heading \"World\"");
    }

    #[test]
    fn test_tool_result_error_flag() {
        let result = json!({
            "isError": true,
            "content": [{ "type": "text", "text": "net::ERR_NAME_NOT_RESOLVED" }]
        });
        let err = tool_result_text("browser_navigate", &result).unwrap_err();
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_tool_result_without_text_returns_raw() {
        let result = json!({ "ok": true });
        assert_eq!(tool_result_text("x", &result).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn test_site_search_url() {
        let url = site_search_url("https://www.zeit.de/index", "Klimagipfel 2024").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let q: Vec<_> = parsed.query_pairs().collect();
        assert_eq!(q[0].1, "site:www.zeit.de Klimagipfel 2024");
        assert!(url.starts_with("https://duckduckgo.com/html/?q="));
    }

    #[test]
    fn test_site_search_url_rejects_bad_homepage() {
        assert!(site_search_url("not a url", "x").is_err());
    }

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "tools/call",
            params: None,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#
        );
    }

    #[test]
    fn test_notification_parses_without_id() {
        let n: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
                .unwrap();
        assert!(n.id.is_none());
    }
}
