//! Selective PDF loading with page-aware text extraction.
//!
//! Only high-relevance papers get their PDFs fetched. Known paywalled
//! publisher domains are skipped without a network attempt. Extracted text
//! and page maps are cached for seven days; raw PDF bytes are never
//! persisted.

use futures::stream::{self, StreamExt};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CachedPdfPages, ToolCache};
use crate::core::{Locator, PageInfo, Paper, PaperStatus};

/// Concurrent PDF fetches in flight.
const MAX_IN_FLIGHT: usize = 4;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("PDF download timed out")]
    Timeout,
    #[error("PDF text extraction failed: {0}")]
    Extraction(String),
    #[error("PDF returned empty content")]
    Empty,
}

fn blocked_domains() -> &'static HashSet<&'static str> {
    static DOMAINS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    DOMAINS.get_or_init(|| {
        HashSet::from([
            "dl.acm.org",
            "onlinelibrary.wiley.com",
            "academic.oup.com",
            "link.springer.com",
            "www.sciencedirect.com",
            "ieeexplore.ieee.org",
            "www.nature.com",
            "science.org",
            "www.science.org",
            "journals.sagepub.com",
            "www.tandfonline.com",
            "www.jstor.org",
            "www.emerald.com",
            "www.cambridge.org",
            "www.pnas.org",
            "www.cell.com",
        ])
    })
}

fn open_access_domains() -> &'static HashSet<&'static str> {
    static DOMAINS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    DOMAINS.get_or_init(|| {
        HashSet::from([
            "arxiv.org",
            "openreview.net",
            "aclanthology.org",
            "proceedings.mlr.press",
            "papers.nips.cc",
            "proceedings.neurips.cc",
            "www.mdpi.com",
            "ojs.aaai.org",
        ])
    })
}

/// True when the URL's domain is on the paywalled-publisher list.
pub fn is_blocked_domain(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.domain().map(|d| d.to_lowercase()))
        .is_some_and(|domain| blocked_domains().contains(domain.as_str()))
}

/// True for domains known to serve open-access PDFs. Preferred when a paper
/// carries several candidate PDF URLs.
pub fn is_open_access_domain(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.domain().map(|d| d.to_lowercase()))
        .is_some_and(|domain| open_access_domains().contains(domain.as_str()))
}

pub struct PdfLoader {
    client: Client,
    cache: Option<Arc<ToolCache>>,
    relevance_threshold: f64,
    timeout: Duration,
}

impl PdfLoader {
    pub fn new(cache: Option<Arc<ToolCache>>, relevance_threshold: f64, timeout: Duration) -> Self {
        PdfLoader {
            client: Client::new(),
            cache,
            relevance_threshold,
            timeout,
        }
    }

    /// Load full text with page mapping for every eligible paper, at most
    /// four fetches in flight. Returns the number of papers loaded.
    pub async fn load_batch(&self, papers: &mut [Paper]) -> usize {
        let eligible: Vec<(usize, String)> = papers
            .iter()
            .enumerate()
            .filter(|(_, paper)| self.is_eligible(paper))
            .filter_map(|(index, paper)| paper.pdf_url.clone().map(|url| (index, url)))
            .collect();

        let fetched: Vec<(usize, CachedPdfPages)> = stream::iter(eligible)
            .map(|(index, url)| async move {
                match self.fetch_pages(&url).await {
                    Ok(pages) => Some((index, pages)),
                    Err(error) => {
                        warn!(url, %error, "pdf load failed");
                        None
                    }
                }
            })
            .buffer_unordered(MAX_IN_FLIGHT)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let mut loaded = 0;
        for (index, pages) in fetched {
            let paper = &mut papers[index];
            paper.full_text = Some(pages.full_text);
            paper.page_map = pages.page_infos;
            paper.pdf_hash = Some(pages.pdf_hash);
            paper.status = PaperStatus::Fulltext;
            loaded += 1;
        }

        info!(loaded, total = papers.len(), threshold = self.relevance_threshold, "pdf batch complete");
        loaded
    }

    /// Load a single paper. Returns false when skipped (below threshold,
    /// paywalled, no URL) or failed.
    pub async fn load_full_text(&self, paper: &mut Paper) -> bool {
        if paper.full_text.is_some() && !paper.page_map.is_empty() {
            return true;
        }
        if !self.is_eligible(paper) {
            return false;
        }
        let Some(url) = paper.pdf_url.clone() else {
            return false;
        };

        match self.fetch_pages(&url).await {
            Ok(pages) => {
                paper.full_text = Some(pages.full_text);
                paper.page_map = pages.page_infos;
                paper.pdf_hash = Some(pages.pdf_hash);
                paper.status = PaperStatus::Fulltext;
                true
            }
            Err(error) => {
                warn!(url, %error, "pdf load failed");
                false
            }
        }
    }

    fn is_eligible(&self, paper: &Paper) -> bool {
        if paper.full_text.is_some() {
            return false;
        }
        let Some(score) = paper.relevance_score else {
            debug!(title = %paper.title, "skipping pdf, unscored");
            return false;
        };
        if score < self.relevance_threshold {
            debug!(title = %paper.title, score, "skipping pdf, below threshold");
            return false;
        }
        let Some(url) = &paper.pdf_url else {
            warn!(title = %paper.title, "no pdf url");
            return false;
        };
        if is_blocked_domain(url) {
            info!(title = %paper.title, url, "skipping paywalled pdf");
            return false;
        }
        true
    }

    async fn fetch_pages(&self, pdf_url: &str) -> Result<CachedPdfPages, PdfError> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get_pdf_pages(pdf_url).await {
                debug!(pdf_url, "pdf cache hit");
                return Ok(cached);
            }
        }

        let send = self.client.get(pdf_url).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| PdfError::Timeout)??;
        let response = response.error_for_status()?;
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(PdfError::Empty);
        }

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let pdf_hash = hex::encode(hasher.finalize());

        // Extraction is CPU-bound, keep it off the reactor.
        let pages = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await
        .map_err(|join| PdfError::Extraction(join.to_string()))?
        .map_err(|extract| PdfError::Extraction(extract.to_string()))?;

        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(PdfError::Empty);
        }

        let (full_text, page_infos) = assemble_pages(&pages);
        let result = CachedPdfPages {
            full_text,
            page_infos,
            pdf_hash,
        };

        if let Some(cache) = &self.cache {
            cache.set_pdf_pages(pdf_url, &result).await;
        }
        Ok(result)
    }

    /// Resolve a snippet to its position in the paper's full text.
    pub fn resolve_locator(&self, paper: &Paper, snippet: &str) -> Locator {
        let Some(full_text) = &paper.full_text else {
            return Locator::default();
        };
        if snippet.is_empty() {
            return Locator::default();
        }

        let Some(start) = full_text.find(snippet) else {
            return Locator::default();
        };
        let end = start + snippet.len();

        let page = paper
            .page_map
            .iter()
            .find(|info| start >= info.char_start && start < info.char_end)
            .map(|info| info.page);

        Locator {
            page,
            section: None,
            char_start: Some(start),
            char_end: Some(end),
        }
    }
}

fn assemble_pages(pages: &[String]) -> (String, Vec<PageInfo>) {
    let mut full_text = String::new();
    let mut page_infos = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        let char_start = full_text.len();
        full_text.push_str(page);
        full_text.push('\n');
        page_infos.push(PageInfo {
            page: index + 1,
            section: None,
            char_start,
            char_end: full_text.len(),
        });
    }
    (full_text, page_infos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_and_open_domains() {
        assert!(is_blocked_domain("https://dl.acm.org/doi/pdf/10.1145/x"));
        assert!(is_blocked_domain("https://ieeexplore.ieee.org/document/1"));
        assert!(!is_blocked_domain("https://arxiv.org/pdf/2301.00001.pdf"));
        assert!(is_open_access_domain("https://arxiv.org/pdf/2301.00001.pdf"));
        assert!(!is_blocked_domain("not a url"));
    }

    #[tokio::test]
    async fn paywalled_pdf_is_never_fetched() {
        let loader = PdfLoader::new(None, 8.0, Duration::from_secs(5));
        let mut paper = Paper::new("Paywalled");
        paper.relevance_score = Some(9.0);
        paper.pdf_url = Some("https://dl.acm.org/doi/pdf/10.1145/x".into());
        // Returns immediately; no network attempt is made for blocked hosts.
        assert!(!loader.load_full_text(&mut paper).await);
        assert_eq!(paper.status, PaperStatus::Raw);
        assert!(paper.full_text.is_none());
    }

    #[tokio::test]
    async fn below_threshold_is_skipped() {
        let loader = PdfLoader::new(None, 8.0, Duration::from_secs(5));
        let mut paper = Paper::new("Low score");
        paper.relevance_score = Some(5.0);
        paper.pdf_url = Some("https://arxiv.org/pdf/2301.00001.pdf".into());
        assert!(!loader.load_full_text(&mut paper).await);
    }

    #[test]
    fn page_assembly_maps_offsets() {
        let pages = vec!["first page".to_string(), "second page".to_string()];
        let (full_text, infos) = assemble_pages(&pages);
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].page, 1);
        assert_eq!(&full_text[infos[1].char_start..infos[1].char_start + 6], "second");
    }

    #[test]
    fn locator_resolves_page_and_offsets() {
        let loader = PdfLoader::new(None, 8.0, Duration::from_secs(5));
        let pages = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let (full_text, page_map) = assemble_pages(&pages);
        let mut paper = Paper::new("T");
        paper.full_text = Some(full_text);
        paper.page_map = page_map;

        let locator = loader.resolve_locator(&paper, "gamma");
        assert_eq!(locator.page, Some(2));
        assert!(locator.char_start.is_some());

        let missing = loader.resolve_locator(&paper, "not present");
        assert!(missing.char_start.is_none());
    }
}
