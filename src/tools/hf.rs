//! HuggingFace trending papers.
//!
//! Best-effort discovery source: uses the public daily-papers endpoint and
//! returns an empty list on any failure.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const DAILY_PAPERS_URL: &str = "https://huggingface.co/api/daily_papers";

#[derive(Debug, Deserialize)]
struct DailyPaper {
    #[serde(default)]
    paper: Option<PaperInfo>,
}

#[derive(Debug, Deserialize)]
struct PaperInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    authors: Vec<HfAuthor>,
}

#[derive(Debug, Deserialize)]
struct HfAuthor {
    #[serde(default)]
    name: Option<String>,
}

pub struct HfTrending {
    client: Client,
    timeout: Duration,
}

impl HfTrending {
    pub fn new(timeout: Duration) -> Self {
        HfTrending {
            client: Client::new(),
            timeout,
        }
    }

    pub async fn trending(&self, query: &str, max_results: usize) -> Vec<Value> {
        let send = self.client.get(DAILY_PAPERS_URL).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) if response.status().is_success() => response,
            Ok(Ok(response)) => {
                warn!(status = %response.status(), "hf_trending_failed");
                return Vec::new();
            }
            Ok(Err(error)) => {
                warn!(%error, "hf_trending_failed");
                return Vec::new();
            }
            Err(_) => {
                warn!("hf_trending_timeout");
                return Vec::new();
            }
        };

        let items: Vec<DailyPaper> = match response.json().await {
            Ok(items) => items,
            Err(error) => {
                warn!(%error, "hf_trending_parse_failed");
                return Vec::new();
            }
        };

        let filter = query.trim().to_lowercase();
        items
            .into_iter()
            .filter_map(|item| item.paper)
            .filter_map(|paper| {
                let arxiv_id = paper.id?;
                let title = paper.title.unwrap_or_else(|| format!("Paper {arxiv_id}"));
                if !filter.is_empty() && !title.to_lowercase().contains(&filter) {
                    return None;
                }
                let authors: Vec<String> =
                    paper.authors.into_iter().filter_map(|a| a.name).collect();
                Some(json!({
                    "title": title.trim(),
                    "abstract": paper.summary.unwrap_or_default().trim(),
                    "arxiv_id": arxiv_id,
                    "url": format!("https://huggingface.co/papers/{arxiv_id}"),
                    "pdf_url": format!("https://arxiv.org/pdf/{arxiv_id}.pdf"),
                    "authors": authors,
                    "source_type": "huggingface_trending",
                }))
            })
            .take(max_results)
            .collect()
    }
}
