//! Human-in-the-loop approval gates for high-cost actions.
//!
//! Gates fire before bulk PDF downloads, crawls of unfamiliar domains, and
//! large token budgets. Without an approval callback the manager
//! auto-approves, which is the development-mode default. Rejection is
//! terminal for the guarded phase only: the phase is skipped and the
//! pipeline continues with fewer inputs.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    PdfDownload,
    ExternalCrawl,
    HighTokenBudget,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::PdfDownload => "pdf_download",
            GateKind::ExternalCrawl => "external_crawl",
            GateKind::HighTokenBudget => "high_token_budget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
}

/// A pending approval request for a high-cost action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub gate_id: String,
    pub kind: GateKind,
    pub context: Map<String, Value>,
    pub status: GateStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalGate {
    fn new(kind: GateKind, context: Map<String, Value>) -> Self {
        ApprovalGate {
            gate_id: Uuid::new_v4().to_string(),
            kind,
            context,
            status: GateStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Human-readable one-liner for the approval prompt.
    pub fn summary(&self) -> String {
        match self.kind {
            GateKind::PdfDownload => {
                let papers = self.context.get("papers_to_download").and_then(Value::as_u64).unwrap_or(0);
                let mb = self.context.get("estimated_bandwidth_mb").and_then(Value::as_u64).unwrap_or(0);
                format!("Download PDFs for {papers} papers (~{mb}MB bandwidth). Proceed?")
            }
            GateKind::ExternalCrawl => {
                let urls: Vec<&str> = self
                    .context
                    .get("external_urls")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let preview = urls.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
                let ellipsis = if urls.len() > 3 { "..." } else { "" };
                format!("Crawl {} external URL(s): {preview}{ellipsis}. Proceed?", urls.len())
            }
            GateKind::HighTokenBudget => {
                let tokens = self.context.get("estimated_tokens").and_then(Value::as_u64).unwrap_or(0);
                let cost = self.context.get("estimated_cost_usd").and_then(Value::as_f64).unwrap_or(0.0);
                format!("Estimated {tokens} tokens (~${cost:.2}). Proceed?")
            }
        }
    }
}

pub type ApprovalCallback = Arc<dyn Fn(ApprovalGate) -> BoxFuture<'static, bool> + Send + Sync>;

/// Domains that never need a crawl gate.
const STANDARD_DOMAINS: &[&str] = &["arxiv.org", "huggingface.co", "hf.co"];

pub struct GateManager {
    pdf_threshold: usize,
    token_threshold: u64,
    callback: Option<ApprovalCallback>,
    resolved: Vec<ApprovalGate>,
}

impl GateManager {
    pub fn new(pdf_threshold: usize, token_threshold: u64) -> Self {
        GateManager {
            pdf_threshold,
            token_threshold,
            callback: None,
            resolved: Vec::new(),
        }
    }

    pub fn set_approval_callback(&mut self, callback: ApprovalCallback) {
        self.callback = Some(callback);
    }

    /// Gate bulk PDF downloads when the included count exceeds the
    /// threshold. Context carries the count and ~2MB-per-paper bandwidth.
    pub fn check_pdf_gate(&self, included_count: usize) -> Option<ApprovalGate> {
        if included_count <= self.pdf_threshold {
            return None;
        }
        let mut context = Map::new();
        context.insert("papers_to_download".into(), json!(included_count));
        context.insert("estimated_bandwidth_mb".into(), json!(included_count * 2));
        info!(included_count, threshold = self.pdf_threshold, "pdf download gate created");
        Some(ApprovalGate::new(GateKind::PdfDownload, context))
    }

    /// Gate crawls of any URL outside the standard domains.
    pub fn check_url_gate(&self, urls: &[String]) -> Option<ApprovalGate> {
        let external: Vec<&String> = urls
            .iter()
            .filter(|url| !is_standard_domain(url))
            .collect();
        if external.is_empty() {
            return None;
        }
        let mut context = Map::new();
        context.insert("external_urls".into(), json!(external));
        context.insert("count".into(), json!(external.len()));
        info!(count = external.len(), "external crawl gate created");
        Some(ApprovalGate::new(GateKind::ExternalCrawl, context))
    }

    /// Gate operations whose estimated token usage exceeds the budget.
    pub fn check_token_gate(&self, estimated_tokens: u64) -> Option<ApprovalGate> {
        if estimated_tokens <= self.token_threshold {
            return None;
        }
        let mut context = Map::new();
        context.insert("estimated_tokens".into(), json!(estimated_tokens));
        context.insert("budget_threshold".into(), json!(self.token_threshold));
        context.insert(
            "estimated_cost_usd".into(),
            json!(estimated_tokens as f64 * 0.00001),
        );
        info!(estimated_tokens, threshold = self.token_threshold, "token budget gate created");
        Some(ApprovalGate::new(GateKind::HighTokenBudget, context))
    }

    /// Resolve a gate through the callback; auto-approve without one.
    pub async fn request_approval(&mut self, mut gate: ApprovalGate) -> bool {
        let approved = match &self.callback {
            Some(callback) => callback(gate.clone()).await,
            None => {
                info!(kind = gate.kind.as_str(), "auto-approving gate (no approval callback set)");
                true
            }
        };

        gate.status = if approved {
            GateStatus::Approved
        } else {
            GateStatus::Rejected
        };
        gate.resolved_at = Some(Utc::now());
        info!(kind = gate.kind.as_str(), approved, "gate resolved");
        self.resolved.push(gate);
        approved
    }

    pub fn resolved_gates(&self) -> &[ApprovalGate] {
        &self.resolved
    }
}

/// True when the URL belongs to one of the always-allowed domains.
pub fn is_standard(url: &str) -> bool {
    is_standard_domain(url)
}

fn is_standard_domain(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(domain) = parsed.domain() else {
        return false;
    };
    let domain = domain.to_lowercase();
    let domain = domain.strip_prefix("www.").unwrap_or(&domain);
    STANDARD_DOMAINS.contains(&domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_gate_fires_above_threshold() {
        let manager = GateManager::new(15, 100_000);
        assert!(manager.check_pdf_gate(15).is_none());

        let gate = manager.check_pdf_gate(40).unwrap();
        assert_eq!(gate.kind, GateKind::PdfDownload);
        assert_eq!(gate.context["papers_to_download"], 40);
        assert_eq!(gate.context["estimated_bandwidth_mb"], 80);
        assert!(gate.summary().contains("40 papers"));
    }

    #[test]
    fn url_gate_ignores_standard_domains() {
        let manager = GateManager::new(15, 100_000);
        let standard = vec![
            "https://arxiv.org/abs/1".to_string(),
            "https://www.huggingface.co/papers/2".to_string(),
        ];
        assert!(manager.check_url_gate(&standard).is_none());

        let mixed = vec![
            "https://arxiv.org/abs/1".to_string(),
            "https://example.org/paper.pdf".to_string(),
        ];
        let gate = manager.check_url_gate(&mixed).unwrap();
        assert_eq!(gate.context["count"], 1);
    }

    #[test]
    fn token_gate_uses_threshold() {
        let manager = GateManager::new(15, 100_000);
        assert!(manager.check_token_gate(90_000).is_none());
        let gate = manager.check_token_gate(250_000).unwrap();
        assert_eq!(gate.kind, GateKind::HighTokenBudget);
        assert!(gate.summary().contains("250000 tokens"));
    }

    #[tokio::test]
    async fn auto_approve_without_callback() {
        let mut manager = GateManager::new(15, 100_000);
        let gate = manager.check_pdf_gate(20).unwrap();
        assert!(manager.request_approval(gate).await);
        assert_eq!(manager.resolved_gates()[0].status, GateStatus::Approved);
    }

    #[tokio::test]
    async fn callback_rejection_is_recorded() {
        let mut manager = GateManager::new(15, 100_000);
        manager.set_approval_callback(Arc::new(|_gate| Box::pin(async { false })));
        let gate = manager.check_pdf_gate(20).unwrap();
        assert!(!manager.request_approval(gate).await);
        assert_eq!(manager.resolved_gates()[0].status, GateStatus::Rejected);
    }
}
