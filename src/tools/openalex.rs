//! OpenAlex works API client.
//!
//! Uses the `title_and_abstract.search` filter with `has_fulltext:true` so
//! results tend to carry usable PDFs. OpenAlex AND-matches every term, so
//! callers should condense long queries before searching (see the unified
//! search tool).

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::ToolError;

const BASE_URL: &str = "https://api.openalex.org/works";

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    primary_location: Option<Location>,
    #[serde(default)]
    open_access: Option<OpenAccess>,
    #[serde(default)]
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    #[serde(default)]
    author: Option<AuthorInfo>,
}

#[derive(Debug, Deserialize)]
struct AuthorInfo {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    landing_page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    #[serde(default)]
    oa_url: Option<String>,
}

pub struct OpenAlexClient {
    client: Client,
    timeout: Duration,
}

impl OpenAlexClient {
    pub fn new(timeout: Duration) -> Self {
        OpenAlexClient {
            client: Client::new(),
            timeout,
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Value>, ToolError> {
        let filter = format!("title_and_abstract.search:{query},has_fulltext:true");
        let per_page = max_results.clamp(1, 50).to_string();

        let send = self
            .client
            .get(BASE_URL)
            .query(&[
                ("filter", filter.as_str()),
                ("per-page", per_page.as_str()),
                ("sort", "publication_date:desc"),
            ])
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ToolError::Timeout {
                tool: "openalex".into(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::execution("openalex", e))?;

        if !response.status().is_success() {
            return Err(ToolError::execution(
                "openalex",
                format!("HTTP {}", response.status()),
            ));
        }

        let works: WorksResponse = response
            .json()
            .await
            .map_err(|e| ToolError::execution("openalex", e))?;

        let papers: Vec<Value> = works.results.iter().filter_map(work_to_record).collect();
        info!(query, count = papers.len(), "openalex_returned");
        Ok(papers)
    }
}

fn work_to_record(work: &Work) -> Option<Value> {
    let title = work
        .title
        .as_deref()
        .or(work.display_name.as_deref())?
        .trim()
        .to_string();
    if title.is_empty() {
        return None;
    }

    let authors: Vec<String> = work
        .authorships
        .iter()
        .filter_map(|a| a.author.as_ref()?.display_name.clone())
        .collect();

    // Several candidate PDF URLs may exist; a known open-access host wins.
    let candidates = [
        work.primary_location.as_ref().and_then(|loc| loc.pdf_url.clone()),
        work.open_access.as_ref().and_then(|oa| oa.oa_url.clone()),
    ];
    let pdf_url = candidates
        .iter()
        .flatten()
        .find(|url| crate::analysis::pdf::is_open_access_domain(url))
        .cloned()
        .or_else(|| candidates.into_iter().flatten().next());
    let url = work
        .primary_location
        .as_ref()
        .and_then(|loc| loc.landing_page_url.clone());

    Some(json!({
        "title": title,
        "abstract": work
            .abstract_inverted_index
            .as_ref()
            .map(reconstruct_abstract)
            .unwrap_or_default(),
        "doi": work.doi.as_deref().map(normalize_doi),
        "url": url,
        "pdf_url": pdf_url,
        "published": work.publication_date.as_deref().map(|d| format!("{d}T00:00:00Z")),
        "authors": authors,
        "source_type": "openalex",
    }))
}

/// OpenAlex ships abstracts as a word -> positions inverted index.
fn reconstruct_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positions: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, slots)| slots.iter().map(move |&pos| (pos, word.as_str())))
        .collect();
    positions.sort_by_key(|(pos, _)| *pos);
    positions
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_doi(doi: &str) -> String {
    doi.trim()
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_reconstruction_orders_words() {
        let mut index = HashMap::new();
        index.insert("attention".to_string(), vec![1]);
        index.insert("We".to_string(), vec![0]);
        index.insert("study".to_string(), vec![2]);
        index.insert("and".to_string(), vec![3]);
        index.insert("scaling".to_string(), vec![4]);
        assert_eq!(reconstruct_abstract(&index), "We attention study and scaling");
    }

    #[test]
    fn doi_urls_are_normalized() {
        assert_eq!(normalize_doi("https://doi.org/10.1234/Test"), "10.1234/test");
        assert_eq!(normalize_doi("10.1234/test"), "10.1234/test");
    }

    #[test]
    fn open_access_pdf_url_is_preferred() {
        let work = Work {
            doi: None,
            title: Some("T".into()),
            display_name: None,
            publication_date: None,
            authorships: Vec::new(),
            primary_location: Some(Location {
                pdf_url: Some("https://dl.acm.org/doi/pdf/10.1145/x".into()),
                landing_page_url: None,
            }),
            open_access: Some(OpenAccess {
                oa_url: Some("https://arxiv.org/pdf/2301.00001.pdf".into()),
            }),
            abstract_inverted_index: None,
        };
        let record = work_to_record(&work).unwrap();
        assert_eq!(record["pdf_url"], "https://arxiv.org/pdf/2301.00001.pdf");
    }

    #[test]
    fn work_without_title_is_dropped() {
        let work = Work {
            doi: None,
            title: None,
            display_name: None,
            publication_date: None,
            authorships: Vec::new(),
            primary_location: None,
            open_access: None,
            abstract_inverted_index: None,
        };
        assert!(work_to_record(&work).is_none());
    }
}
