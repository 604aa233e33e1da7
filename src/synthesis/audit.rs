//! Citation audit: verify claims are supported by their evidence, with an
//! auto-repair loop for the ones that are not.
//!
//! Claims with salience >= 0.3 are audited, up to four concurrently. Minor
//! failures get the uncertainty flag; major failures additionally get a
//! conservative rewrite. The audit never invents new spans.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::core::{Claim, EvidenceSpan};
use crate::llm::{extract_json_value, GenerateRequest, LlmClient};
use crate::prompts;

const MAX_IN_FLIGHT: usize = 4;
const SALIENCE_THRESHOLD: f64 = 0.3;
pub const MAX_REPAIR_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Minor,
    Major,
}

#[derive(Debug, Clone, Default)]
pub struct AuditResult {
    pub total_claims: usize,
    pub audited_claims: usize,
    pub passed: usize,
    pub failed: usize,
    pub failed_major: usize,
    pub failed_minor: usize,
    pub repaired: usize,
}

impl AuditResult {
    pub fn pass_rate(&self) -> f64 {
        if self.audited_claims == 0 {
            return 1.0;
        }
        (self.passed + self.repaired) as f64 / self.audited_claims as f64
    }
}

pub struct CitationAuditor<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> CitationAuditor<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        CitationAuditor { llm }
    }

    /// Audit and repair claims in place.
    pub async fn audit_claims(
        &self,
        claims: &mut [Claim],
        evidence_spans: &[EvidenceSpan],
    ) -> AuditResult {
        let span_map: HashMap<&str, &EvidenceSpan> = evidence_spans
            .iter()
            .map(|span| (span.span_id.as_str(), span))
            .collect();

        let mut result = AuditResult {
            total_claims: claims.len(),
            ..Default::default()
        };

        // With no claims above the threshold there is nothing to verify and
        // no LLM calls are made.
        let to_audit: Vec<usize> = claims
            .iter()
            .enumerate()
            .filter(|(_, claim)| claim.salience_score >= SALIENCE_THRESHOLD)
            .map(|(index, _)| index)
            .collect();
        result.audited_claims = to_audit.len();
        if to_audit.is_empty() {
            return result;
        }

        let verdicts: Vec<(usize, Option<Severity>)> = stream::iter(to_audit)
            .map(|index| {
                let claim = &claims[index];
                let resolved: Vec<&EvidenceSpan> = claim
                    .evidence_span_ids
                    .iter()
                    .filter_map(|id| span_map.get(id.as_str()).copied())
                    .collect();
                async move {
                    if resolved.is_empty() {
                        warn!(
                            claim = %claim.claim_text.chars().take(80).collect::<String>(),
                            "claim has no resolvable evidence"
                        );
                        return (index, Some(Severity::Major));
                    }
                    (index, self.verify_support(claim, &resolved).await)
                }
            })
            .buffer_unordered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let mut failures: Vec<(usize, Severity)> = Vec::new();
        for (index, verdict) in verdicts {
            match verdict {
                None => result.passed += 1,
                Some(severity) => {
                    match severity {
                        Severity::Major => result.failed_major += 1,
                        Severity::Minor => result.failed_minor += 1,
                    }
                    failures.push((index, severity));
                }
            }
        }
        result.failed = failures.len();

        for (index, severity) in failures {
            if self.repair_claim(&mut claims[index], severity, &span_map).await {
                result.repaired += 1;
                result.failed -= 1;
            }
        }

        info!(
            passed = result.passed,
            failed = result.failed,
            failed_major = result.failed_major,
            failed_minor = result.failed_minor,
            repaired = result.repaired,
            pass_rate = result.pass_rate(),
            "citation audit complete"
        );
        result
    }

    /// None = supported; Some(severity) = failed.
    async fn verify_support(&self, claim: &Claim, spans: &[&EvidenceSpan]) -> Option<Severity> {
        let evidence = spans
            .iter()
            .map(|span| {
                format!(
                    "[{}] \"{}\" (confidence: {:.2})",
                    span.field.as_str(),
                    span.snippet,
                    span.confidence
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = prompts::citation_audit_prompt(&claim.claim_text, &evidence);
        match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => {
                let verdict = extract_json_value(&response)?;
                let supported = verdict
                    .get("supported")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if supported {
                    None
                } else {
                    match verdict.get("severity").and_then(Value::as_str) {
                        Some("minor") => Some(Severity::Minor),
                        _ => Some(Severity::Major),
                    }
                }
            }
            Err(error) => {
                // An audit outage must not fail claims wholesale.
                warn!(%error, "audit verification failed, treating as supported");
                None
            }
        }
    }

    /// Repair one failed claim. Minor: flag as uncertain. Major: flag and
    /// rewrite conservatively, with a deterministic hedge when the model
    /// returns nothing usable.
    async fn repair_claim(
        &self,
        claim: &mut Claim,
        severity: Severity,
        span_map: &HashMap<&str, &EvidenceSpan>,
    ) -> bool {
        claim.uncertainty_flag = true;

        let spans: Vec<&EvidenceSpan> = claim
            .evidence_span_ids
            .iter()
            .filter_map(|id| span_map.get(id.as_str()).copied())
            .collect();

        if severity == Severity::Minor || spans.is_empty() {
            return true;
        }

        let evidence = spans
            .iter()
            .map(|span| span.snippet.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        for _pass in 0..MAX_REPAIR_PASSES {
            let prompt = prompts::claim_rewrite_prompt(&claim.claim_text, &evidence);
            match self.llm.generate(GenerateRequest::new(prompt)).await {
                Ok(rewritten) => {
                    let rewritten = rewritten.trim().trim_matches('"').to_string();
                    if rewritten.len() > 10 {
                        claim.claim_text = rewritten;
                        return true;
                    }
                }
                Err(error) => {
                    warn!(%error, "claim rewrite failed");
                    break;
                }
            }
        }

        // Fall back to an explicit hedge rather than dropping the claim.
        claim.claim_text = format!("Evidence suggests that {}", lowercase_first(&claim.claim_text));
        true
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EvidenceField;
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns queued responses in order; errors once drained.
    struct QueueLlm(Mutex<Vec<String>>);

    impl QueueLlm {
        fn new(responses: &[&str]) -> Self {
            QueueLlm(Mutex::new(
                responses.iter().rev().map(|s| s.to_string()).collect(),
            ))
        }
    }

    #[async_trait]
    impl LlmClient for QueueLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::Api("drained".into()))
        }
    }

    fn claim_with_span() -> (Claim, Vec<EvidenceSpan>) {
        let span = EvidenceSpan::new("p1", EvidenceField::Result, "accuracy improved by 2%", 0.9);
        let claim = Claim {
            claim_id: "c1".into(),
            claim_text: "The method improves accuracy dramatically".into(),
            evidence_span_ids: vec![span.span_id.clone()],
            theme_id: "t".into(),
            salience_score: 0.8,
            uncertainty_flag: false,
        };
        (claim, vec![span])
    }

    #[tokio::test]
    async fn zero_claims_pass_rate_is_one_without_llm_calls() {
        let llm = QueueLlm::new(&[]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(&mut [], &[]).await;
        assert_eq!(result.audited_claims, 0);
        assert!((result.pass_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn low_salience_claims_are_not_audited() {
        let (mut claim, spans) = claim_with_span();
        claim.salience_score = 0.1;
        let llm = QueueLlm::new(&[]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &spans).await;
        assert_eq!(result.audited_claims, 0);
        assert!(!claim.uncertainty_flag);
    }

    #[tokio::test]
    async fn supported_claim_passes_untouched() {
        let (mut claim, spans) = claim_with_span();
        let llm = QueueLlm::new(&[r#"{"supported": true}"#]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &spans).await;
        assert_eq!(result.passed, 1);
        assert!(!claim.uncertainty_flag);
    }

    #[tokio::test]
    async fn minor_failure_only_flags_uncertainty() {
        let (mut claim, spans) = claim_with_span();
        let original = claim.claim_text.clone();
        let llm = QueueLlm::new(&[r#"{"supported": false, "severity": "minor"}"#]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &spans).await;
        assert_eq!(result.repaired, 1);
        assert_eq!(result.failed, 0);
        assert!(claim.uncertainty_flag);
        assert_eq!(claim.claim_text, original);
    }

    #[tokio::test]
    async fn major_failure_rewrites_conservatively() {
        let (mut claim, spans) = claim_with_span();
        let llm = QueueLlm::new(&[
            r#"{"supported": false, "severity": "major"}"#,
            "Evidence suggests that accuracy improved modestly on one benchmark",
        ]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &spans).await;
        assert_eq!(result.failed_major, 1);
        assert_eq!(result.repaired, 1);
        assert!(claim.uncertainty_flag);
        assert!(claim.claim_text.starts_with("Evidence suggests"));
    }

    #[tokio::test]
    async fn major_failure_with_empty_rewrite_gets_hedge_prefix() {
        let (mut claim, spans) = claim_with_span();
        // Verdict, then two empty rewrite passes.
        let llm = QueueLlm::new(&[r#"{"supported": false, "severity": "major"}"#, "", ""]);
        let auditor = CitationAuditor::new(&llm);
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &spans).await;
        assert_eq!(result.repaired, 1);
        assert!(claim.claim_text.starts_with("Evidence suggests that"));
    }

    #[tokio::test]
    async fn unresolvable_evidence_is_major() {
        let (mut claim, _spans) = claim_with_span();
        claim.evidence_span_ids = vec!["p1#00000000".into()];
        let llm = QueueLlm::new(&[]);
        let auditor = CitationAuditor::new(&llm);
        // No spans supplied at all.
        let result = auditor.audit_claims(std::slice::from_mut(&mut claim), &[]).await;
        assert_eq!(result.failed_major, 1);
        assert!(claim.uncertainty_flag);
    }
}
