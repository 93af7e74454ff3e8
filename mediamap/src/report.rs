use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use common::schema::{AggregationOutput, MediaComparison};

const TABLE_HEADING: &str = "## Media Comparison Table";

/// Render the aggregation output as a markdown report.
pub fn render_markdown(output: &AggregationOutput) -> String {
    let mut md = format!(
        "# News Aggregation Report: {}\n\n\
         - **Generated:** {}\n\
         - **Sources Checked:** {}\n\
         - **Sources with Coverage:** {}\n\n\
         ## Summary\n\n{}\n\n\
         {}\n\n\
         | Country/Organization | Media Name | Article | Core Viewpoint |\n\
         | -------------------- | ---------- | ------- | -------------- |\n",
        output.topic,
        output.generated_at.to_rfc3339(),
        output.total_sources_checked,
        output.sources_with_coverage,
        output.summary.trim(),
        TABLE_HEADING,
    );

    for row in &output.comparison_table {
        md.push_str(&format!(
            "| {} | {} | [{}]({}) | {} |\n",
            escape_cell(&row.country),
            escape_cell(&row.media_name),
            escape_cell(&escape_link_text(&row.article_title)),
            escape_link_url(&row.article_url),
            escape_cell(&row.core_viewpoint),
        ));
    }
    md
}

/// Write the report to `<dir>/report_<unix-seconds>.md`, never replacing an existing file.
pub async fn write_report(output: &AggregationOutput, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let markdown = render_markdown(output);
    let timestamp = output.generated_at.timestamp();

    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("report_{}.md", timestamp)
        } else {
            format!("report_{}_{}.md", timestamp, attempt)
        };
        let path = dir.join(name);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(markdown.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
                file.flush().await?;
                info!("✓ Report saved to: {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create report: {}", path.display()))
            }
        }
    }
}

/// Read the comparison table rows back out of a rendered report.
pub fn parse_table_rows(markdown: &str) -> Vec<MediaComparison> {
    // heading, blank line, header row, separator row
    markdown
        .lines()
        .skip_while(|l| l.trim() != TABLE_HEADING)
        .skip_while(|l| !l.trim_start().starts_with('|'))
        .skip(2)
        .take_while(|l| l.trim_start().starts_with('|'))
        .filter_map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Option<MediaComparison> {
    let cells = split_cells(line.trim());
    if cells.len() != 4 {
        return None;
    }
    let (title, url) = parse_link(&cells[2])?;
    Some(MediaComparison {
        country: cells[0].clone(),
        media_name: cells[1].clone(),
        article_title: title,
        article_url: url,
        core_viewpoint: cells[3].clone(),
    })
}

/// Split `| a | b |` on unescaped pipes, unescaping `\|` inside cells.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Parse `[title](url)`, honouring `\[`/`\]` escapes in the title.
fn parse_link(cell: &str) -> Option<(String, String)> {
    let rest = cell.strip_prefix('[')?;
    let mut title = String::new();
    let mut chars = rest.char_indices();
    let mut url_start = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    title.push(next);
                }
            }
            ']' => {
                url_start = Some(i + 1);
                break;
            }
            _ => title.push(c),
        }
    }
    let url = rest[url_start?..].strip_prefix('(')?.strip_suffix(')')?;
    Some((title, url.to_string()))
}

fn escape_cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn escape_link_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

fn escape_link_url(url: &str) -> String {
    url.trim()
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
        .replace('|', "%7C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn output(rows: Vec<MediaComparison>) -> AggregationOutput {
        AggregationOutput {
            topic: "Climate Summit 2024".to_string(),
            total_sources_checked: 10,
            sources_with_coverage: rows.len(),
            comparison_table: rows,
            summary: "Outlets broadly agree the deal is modest.".to_string(),
            generated_at: Utc.with_ymd_and_hms(2024, 11, 12, 9, 30, 0).unwrap(),
        }
    }

    fn row(name: &str, title: &str, viewpoint: &str) -> MediaComparison {
        MediaComparison {
            country: "France".to_string(),
            media_name: name.to_string(),
            article_title: title.to_string(),
            article_url: format!("https://{}.example/a", name.to_lowercase()),
            core_viewpoint: viewpoint.to_string(),
        }
    }

    #[test]
    fn test_render_contains_header_and_counts() {
        let md = render_markdown(&output(vec![row("F24", "Deal reached", "Cautiously upbeat")]));
        assert!(md.starts_with("# News Aggregation Report: Climate Summit 2024\n"));
        assert!(md.contains("**Sources Checked:** 10"));
        assert!(md.contains("**Sources with Coverage:** 1"));
        assert!(md.contains("2024-11-12T09:30:00+00:00"));
        assert!(md.contains("| France | F24 | [Deal reached](https://f24.example/a) | Cautiously upbeat |"));
    }

    #[test]
    fn test_table_round_trip_with_awkward_text() {
        let rows = vec![
            row("Alpha", "Talks [live] | updates", "Sees progress | but warns\nof gaps"),
            row("Beta", "Plain title", "Neutral framing of the final communique"),
        ];
        let out = output(rows);
        let parsed = parse_table_rows(&render_markdown(&out));
        assert_eq!(parsed.len(), out.sources_with_coverage);
        assert_eq!(parsed[0].article_title, "Talks [live] | updates");
        assert_eq!(parsed[0].core_viewpoint, "Sees progress | but warns of gaps");
        assert_eq!(parsed[1], out.comparison_table[1]);
    }

    #[test]
    fn test_parse_empty_table() {
        let md = render_markdown(&output(vec![]));
        assert!(parse_table_rows(&md).is_empty());
    }

    #[test]
    fn test_url_escaping() {
        assert_eq!(
            escape_link_url("https://a.example/x (1)"),
            "https://a.example/x%20%281%29"
        );
    }

    #[tokio::test]
    async fn test_write_report_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("runs");
        let out = output(vec![row("F24", "Deal reached", "Cautiously upbeat")]);

        let first = write_report(&out, &target).await.unwrap();
        let second = write_report(&out, &target).await.unwrap();

        assert_eq!(first.file_name().unwrap(), "report_1731403800.md");
        assert_eq!(second.file_name().unwrap(), "report_1731403800_1.md");
        let written = tokio::fs::read_to_string(&first).await.unwrap();
        assert_eq!(parse_table_rows(&written).len(), 1);
    }
}
