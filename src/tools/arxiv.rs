//! ArXiv Export API client.
//!
//! Queries the Atom feed (<https://info.arxiv.org/help/api/basics.html>) and
//! parses entries with quick-xml. Query syntax: `all:keyword`, `ti:keyword`,
//! `cat:cs.AI`.

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use super::ToolError;

const BASE_URL: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    #[serde(default)]
    published: Option<String>,
    title: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    author: Vec<Author>,
    #[serde(default)]
    category: Vec<Category>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: String,
}

fn arxiv_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}\.\d{4,5})").expect("valid regex"))
}

/// Extract a bare arXiv id (e.g. `2301.00001`) from an id URL or any text.
pub fn extract_arxiv_id(text: &str) -> Option<String> {
    arxiv_id_regex()
        .captures(text)
        .map(|caps| caps[1].to_string())
}

pub struct ArxivClient {
    client: Client,
    timeout: Duration,
}

impl ArxivClient {
    pub fn new(timeout: Duration) -> Self {
        ArxivClient {
            client: Client::new(),
            timeout,
        }
    }

    /// Search by keyword, newest first.
    pub async fn search(
        &self,
        query: &str,
        categories: &[String],
        max_results: usize,
    ) -> Result<Vec<Value>, ToolError> {
        let mut search_query = format!("all:{query}");
        if !categories.is_empty() {
            let cats = categories
                .iter()
                .map(|cat| format!("cat:{cat}"))
                .collect::<Vec<_>>()
                .join(" OR ");
            search_query = format!("({search_query}) AND ({cats})");
        }

        info!(query, max_results, "arxiv_search_start");
        let entries = self
            .query_feed(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", &max_results.to_string()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
            .await?;
        info!(count = entries.len(), "arxiv_search_complete");
        Ok(entries)
    }

    /// Fetch specific papers by arXiv id.
    pub async fn fetch_by_id(&self, arxiv_id: &str) -> Result<Vec<Value>, ToolError> {
        self.query_feed(&[("id_list", arxiv_id), ("max_results", "1")])
            .await
    }

    async fn query_feed(&self, params: &[(&str, &str)]) -> Result<Vec<Value>, ToolError> {
        let send = self.client.get(BASE_URL).query(params).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ToolError::Timeout {
                tool: "arxiv".into(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::execution("arxiv", e))?;

        if !response.status().is_success() {
            return Err(ToolError::execution(
                "arxiv",
                format!("HTTP {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ToolError::execution("arxiv", e))?;
        Ok(parse_atom_feed(&body))
    }
}

fn parse_atom_feed(xml: &str) -> Vec<Value> {
    let feed: Feed = match quick_xml::de::from_str(xml) {
        Ok(feed) => feed,
        Err(error) => {
            warn!(%error, "arxiv_xml_parse_error");
            return Vec::new();
        }
    };

    feed.entry
        .iter()
        .filter_map(|entry| {
            let arxiv_id = extract_arxiv_id(&entry.id)?;
            let title = entry.title.split_whitespace().collect::<Vec<_>>().join(" ");
            let abstract_text = entry
                .summary
                .as_deref()
                .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let authors: Vec<&str> = entry.author.iter().map(|a| a.name.as_str()).collect();
            let categories: Vec<&str> = entry.category.iter().map(|c| c.term.as_str()).collect();
            Some(json!({
                "title": title,
                "abstract": abstract_text,
                "arxiv_id": arxiv_id,
                "url": format!("https://arxiv.org/abs/{arxiv_id}"),
                "pdf_url": format!("https://arxiv.org/pdf/{arxiv_id}.pdf"),
                "published": entry.published,
                "authors": authors,
                "categories": categories,
                "source_type": "arxiv_api",
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2208.10099v1</id>
    <published>2022-08-22T04:39:18Z</published>
    <title>An Image is Worth More:
      Patches for Vision</title>
    <summary>We study patch
      representations.</summary>
    <author><name>Alice Smith</name></author>
    <author><name>Bob Jones</name></author>
    <category term="cs.CV"/>
    <category term="cs.LG"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_atom_entries() {
        let papers = parse_atom_feed(SAMPLE_FEED);
        assert_eq!(papers.len(), 1);
        let paper = &papers[0];
        assert_eq!(paper["arxiv_id"], "2208.10099");
        assert_eq!(paper["title"], "An Image is Worth More: Patches for Vision");
        assert_eq!(paper["abstract"], "We study patch representations.");
        assert_eq!(paper["authors"][0], "Alice Smith");
        assert_eq!(paper["categories"][1], "cs.LG");
        assert_eq!(paper["pdf_url"], "https://arxiv.org/pdf/2208.10099.pdf");
        assert_eq!(paper["source_type"], "arxiv_api");
    }

    #[test]
    fn malformed_xml_yields_empty() {
        assert!(parse_atom_feed("<feed><entry>").is_empty());
    }

    #[test]
    fn id_extraction() {
        assert_eq!(
            extract_arxiv_id("http://arxiv.org/abs/2208.10099v1"),
            Some("2208.10099".to_string())
        );
        assert_eq!(
            extract_arxiv_id("https://arxiv.org/pdf/2301.1.pdf"),
            None
        );
    }
}
