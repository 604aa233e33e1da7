//! Plan execution: runs steps in id order, routes tool calls through the
//! cache, deduplicates every result against the plan-wide registry, and
//! tracks per-step quality metrics.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::ToolCache;
use crate::core::{ResearchPlan, ResearchStep, StepAction};
use crate::tools::{ToolError, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Result of executing a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: u32,
    pub status: StepStatus,
    pub tool_used: Option<String>,
    #[serde(skip)]
    pub results: Vec<Value>,
    pub unique_count: usize,
    pub duplicates_removed: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

impl StepResult {
    fn new(step_id: u32) -> Self {
        StepResult {
            step_id,
            status: StepStatus::Running,
            tool_used: None,
            results: Vec::new(),
            unique_count: 0,
            duplicates_removed: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            from_cache: false,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

/// Plan-wide execution progress with quality metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionProgress {
    pub total_steps: usize,
    pub current_step: u32,
    pub completed_steps: Vec<u32>,
    pub failed_steps: Vec<u32>,

    pub total_papers_collected: usize,
    pub unique_papers: usize,
    pub duplicates_removed: usize,
    pub papers_by_source: HashMap<String, usize>,

    pub high_relevance_papers: usize,
    /// Relevance bands "3-5", "6-7", "8-10".
    pub relevance_bands: HashMap<String, usize>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub total_duration_seconds: f64,
}

impl ExecutionProgress {
    pub fn success_rate(&self) -> f64 {
        let total = self.completed_steps.len() + self.failed_steps.len();
        if total == 0 {
            0.0
        } else {
            self.completed_steps.len() as f64 / total as f64
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn record_relevance(&mut self, score: f64) {
        let band = if score >= 8.0 {
            "8-10"
        } else if score >= 6.0 {
            "6-7"
        } else {
            "3-5"
        };
        *self.relevance_bands.entry(band.to_string()).or_insert(0) += 1;
        if score >= 8.0 {
            self.high_relevance_papers += 1;
        }
    }

    fn add_step_result(&mut self, result: &StepResult) {
        match result.status {
            StepStatus::Completed => {
                self.completed_steps.push(result.step_id);
                self.total_papers_collected += result.unique_count + result.duplicates_removed;
                self.unique_papers += result.unique_count;
                self.duplicates_removed += result.duplicates_removed;
                if result.from_cache {
                    self.cache_hits += 1;
                } else {
                    self.cache_misses += 1;
                }
                self.total_duration_seconds += result.duration_seconds();
                if let Some(tool) = &result.tool_used {
                    *self.papers_by_source.entry(tool.clone()).or_insert(0) +=
                        result.unique_count;
                }
            }
            StepStatus::Failed => self.failed_steps.push(result.step_id),
            _ => {}
        }
    }
}

/// Multi-level paper identity, confined to one plan.
///
/// Levels short-circuit in order: arXiv id, normalized DOI, MD5 fingerprint
/// of `lower(title)|lower(first_author)`, then fuzzy title similarity by
/// longest-common-subsequence ratio.
pub struct PaperDeduplicator {
    seen_arxiv_ids: HashSet<String>,
    seen_dois: HashSet<String>,
    seen_fingerprints: HashSet<String>,
    seen_titles: Vec<String>,
    title_similarity_threshold: f64,
}

impl Default for PaperDeduplicator {
    fn default() -> Self {
        PaperDeduplicator::new(0.85)
    }
}

impl PaperDeduplicator {
    pub fn new(title_similarity_threshold: f64) -> Self {
        PaperDeduplicator {
            seen_arxiv_ids: HashSet::new(),
            seen_dois: HashSet::new(),
            seen_fingerprints: HashSet::new(),
            seen_titles: Vec::new(),
            title_similarity_threshold,
        }
    }

    fn fingerprint(record: &Value) -> String {
        let title = record
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let first_author = record
            .get("authors")
            .and_then(Value::as_array)
            .and_then(|authors| authors.first())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}", title.trim(), first_author).as_bytes());
        hex::encode(hasher.finalize())
    }

    fn is_duplicate(&mut self, record: &Value) -> bool {
        if let Some(arxiv_id) = record.get("arxiv_id").and_then(Value::as_str) {
            if !self.seen_arxiv_ids.insert(arxiv_id.to_string()) {
                return true;
            }
        }

        if let Some(doi) = record.get("doi").and_then(Value::as_str) {
            let normalized = doi.to_lowercase().trim().to_string();
            if !self.seen_dois.insert(normalized) {
                return true;
            }
        }

        if !self.seen_fingerprints.insert(Self::fingerprint(record)) {
            return true;
        }

        let title = record
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase()
            .trim()
            .to_string();
        if !title.is_empty() && self.has_similar_title(&title) {
            return true;
        }
        self.seen_titles.push(title);
        false
    }

    fn has_similar_title(&self, title: &str) -> bool {
        self.seen_titles
            .iter()
            .any(|seen| similarity_ratio(title, seen) >= self.title_similarity_threshold)
    }

    /// Returns (unique_records, duplicates_removed).
    pub fn deduplicate(&mut self, records: Vec<Value>) -> (Vec<Value>, usize) {
        let mut unique = Vec::new();
        let mut duplicates = 0;
        for record in records {
            if self.is_duplicate(&record) {
                duplicates += 1;
            } else {
                unique.push(record);
            }
        }
        (unique, duplicates)
    }

    pub fn reset(&mut self) {
        self.seen_arxiv_ids.clear();
        self.seen_dois.clear();
        self.seen_fingerprints.clear();
        self.seen_titles.clear();
    }
}

/// Similarity of two strings as 2*LCS / (len_a + len_b), in [0, 1].
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() && b_chars.is_empty() {
        return 1.0;
    }
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    // Single-row LCS table.
    let mut previous = vec![0usize; b_chars.len() + 1];
    let mut current = vec![0usize; b_chars.len() + 1];
    for &ca in &a_chars {
        for (j, &cb) in b_chars.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
        current.fill(0);
    }

    let lcs = previous[b_chars.len()];
    (2.0 * lcs as f64) / (a_chars.len() + b_chars.len()) as f64
}

pub type StepCallback = Arc<dyn Fn(&ResearchStep, &StepResult) + Send + Sync>;

/// Executes research plan steps in order.
pub struct PlanExecutor {
    plan_id: String,
    registry: Arc<ToolRegistry>,
    cache: Option<Arc<ToolCache>>,
    tool_timeout: Duration,
    on_step_complete: Option<StepCallback>,
    progress: ExecutionProgress,
    results: HashMap<u32, StepResult>,
    deduplicator: PaperDeduplicator,
    all_papers: Vec<Value>,
}

impl PlanExecutor {
    pub fn new(
        plan_id: impl Into<String>,
        registry: Arc<ToolRegistry>,
        cache: Option<Arc<ToolCache>>,
        tool_timeout: Duration,
    ) -> Self {
        PlanExecutor {
            plan_id: plan_id.into(),
            registry,
            cache,
            tool_timeout,
            on_step_complete: None,
            progress: ExecutionProgress::default(),
            results: HashMap::new(),
            deduplicator: PaperDeduplicator::default(),
            all_papers: Vec::new(),
        }
    }

    pub fn set_step_callback(&mut self, callback: StepCallback) {
        self.on_step_complete = Some(callback);
    }

    /// Execute all steps in id order. A failing step records its error and
    /// the plan continues; only cancellation stops the loop early.
    pub async fn execute(&mut self, plan: &mut ResearchPlan, cancel: &CancellationToken) {
        info!(topic = %plan.topic, steps = plan.steps.len(), "starting plan execution");
        self.progress = ExecutionProgress {
            total_steps: plan.steps.len(),
            ..Default::default()
        };
        self.results.clear();
        self.deduplicator.reset();
        self.all_papers.clear();

        for step in &mut plan.steps {
            if cancel.is_cancelled() {
                info!("plan execution cancelled");
                break;
            }
            self.progress.current_step = step.id;

            let result = self.execute_step(step).await;
            self.progress.add_step_result(&result);

            if result.status == StepStatus::Completed {
                step.completed = true;
                self.all_papers.extend(result.results.iter().cloned());
            }

            info!(
                step = step.id,
                status = ?result.status,
                unique = result.unique_count,
                duplicates_removed = result.duplicates_removed,
                "step finished"
            );

            if let Some(callback) = &self.on_step_complete {
                callback(step, &result);
            }
            self.results.insert(step.id, result);
        }

        info!(
            completed = self.progress.completed_steps.len(),
            failed = self.progress.failed_steps.len(),
            unique_papers = self.progress.unique_papers,
            duplicates_removed = self.progress.duplicates_removed,
            "plan execution complete"
        );
    }

    async fn execute_step(&mut self, step: &ResearchStep) -> StepResult {
        let mut result = StepResult::new(step.id);

        let Some(tool) = step.tool.clone() else {
            // Analyze/synthesize steps are handled by the downstream phases.
            if matches!(step.action, StepAction::Analyze | StepAction::Synthesize) {
                result.status = StepStatus::Skipped;
            } else {
                warn!(step = step.id, "step has no tool assigned");
                result.status = StepStatus::Skipped;
            }
            result.completed_at = Some(Utc::now());
            return result;
        };
        result.tool_used = Some(tool.clone());
        let args = Value::Object(step.tool_args.clone());

        let raw = match self.call_tool(&tool, &args, &mut result).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(step = step.id, %error, "step failed");
                result.status = StepStatus::Failed;
                result.error = Some(error.to_string());
                result.completed_at = Some(Utc::now());
                return result;
            }
        };

        // Normalize to a list, dedup, stamp provenance.
        let records = match raw {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let (mut unique, duplicates) = self.deduplicator.deduplicate(records);
        for record in &mut unique {
            if let Some(object) = record.as_object_mut() {
                object.insert("plan_id".into(), Value::String(self.plan_id.clone()));
                object.insert("step_id".into(), Value::from(step.id));
            }
        }

        result.unique_count = unique.len();
        result.duplicates_removed = duplicates;
        result.results = unique;
        result.status = StepStatus::Completed;
        result.completed_at = Some(Utc::now());
        result
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: &Value,
        result: &mut StepResult,
    ) -> Result<Value, ToolError> {
        // Tool existence is checked up front so NotFound is reported even
        // when a stale cache entry exists.
        if self.registry.get_tool(tool).is_none() {
            return Err(ToolError::NotFound(tool.to_string()));
        }

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(tool, args).await {
                info!(tool, "cache HIT for tool");
                result.from_cache = true;
                return Ok(cached);
            }
        }

        // Transient failures get exactly one retry within the step.
        let mut attempt = 0;
        let executed = loop {
            let outcome = tokio::time::timeout(
                self.tool_timeout,
                self.registry.execute_tool(tool, args.clone()),
            )
            .await
            .map_err(|_| ToolError::Timeout {
                tool: tool.to_string(),
                seconds: self.tool_timeout.as_secs(),
            })
            .and_then(|inner| inner);

            match outcome {
                Ok(value) => break value,
                Err(error @ ToolError::NotFound(_))
                | Err(error @ ToolError::BadArguments { .. }) => return Err(error),
                Err(error) => {
                    if attempt >= 1 {
                        return Err(error);
                    }
                    warn!(tool, %error, "tool failed, retrying once");
                    attempt += 1;
                }
            }
        };

        if let Some(cache) = &self.cache {
            cache.set(tool, args, &executed).await;
        }
        Ok(executed)
    }

    pub fn progress(&self) -> &ExecutionProgress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut ExecutionProgress {
        &mut self.progress
    }

    pub fn results(&self) -> &HashMap<u32, StepResult> {
        &self.results
    }

    /// All unique paper records collected by the plan (already deduplicated).
    pub fn all_papers(&self) -> &[Value] {
        &self.all_papers
    }
}
