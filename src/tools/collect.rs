//! URL collectors: resolve a user-supplied URL to paper records.
//!
//! ArXiv abs/pdf URLs resolve through the export API; bare PDF links become
//! metadata-only records whose full text is fetched later by the PDF loading
//! phase; anything else is skipped with a warning.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::arxiv::{extract_arxiv_id, ArxivClient};

pub struct UrlCollector {
    arxiv: ArxivClient,
}

impl UrlCollector {
    pub fn new(timeout: Duration) -> Self {
        UrlCollector {
            arxiv: ArxivClient::new(timeout),
        }
    }

    /// Collect paper records from a URL. Failures degrade to an empty list.
    pub async fn collect(&self, url: &str) -> Vec<Value> {
        if url.contains("arxiv.org") {
            return self.collect_arxiv(url).await;
        }
        if url.to_lowercase().ends_with(".pdf") {
            return vec![pdf_record(url)];
        }
        warn!(url, "no collector for url");
        Vec::new()
    }

    async fn collect_arxiv(&self, url: &str) -> Vec<Value> {
        let Some(arxiv_id) = extract_arxiv_id(url) else {
            warn!(url, "arxiv_id_not_found");
            return Vec::new();
        };

        match self.arxiv.fetch_by_id(&arxiv_id).await {
            Ok(mut papers) => {
                for paper in &mut papers {
                    if let Some(object) = paper.as_object_mut() {
                        object.insert("source_type".into(), json!("arxiv_direct"));
                    }
                }
                papers
            }
            Err(error) => {
                warn!(url, %error, "arxiv_collect_failed");
                Vec::new()
            }
        }
    }
}

fn pdf_record(url: &str) -> Value {
    // Title from the file name; the real title arrives with the full text.
    let title = url
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".pdf")
        .replace(['-', '_'], " ");
    json!({
        "title": title,
        "url": url,
        "pdf_url": url,
        "source_type": "url",
    })
}
