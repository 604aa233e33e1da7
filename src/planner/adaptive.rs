//! Adaptive planning: parse the query, build the plan, attach the phase
//! configuration for QUICK or FULL execution.

use std::collections::HashSet;
use tracing::info;

use super::{Planner, QueryParser};
use crate::core::{AdaptivePlan, PhaseConfig, ResearchRequest};

pub struct AdaptivePlanner {
    planner: Planner,
    parser: QueryParser,
}

impl AdaptivePlanner {
    pub fn new(planner: Planner) -> Self {
        AdaptivePlanner {
            planner,
            parser: QueryParser::new(),
        }
    }

    pub async fn create_adaptive_plan(&self, request: &mut ResearchRequest) -> AdaptivePlan {
        let query_info = self.parser.parse(&request.topic);
        info!(query_type = %query_info.query_type, "query parsed");

        // URLs found in the query merge into the request sources.
        if !query_info.urls.is_empty() {
            let mut merged: Vec<String> = request.sources.clone();
            let seen: HashSet<&String> = merged.iter().collect();
            let fresh: Vec<String> = query_info
                .urls
                .iter()
                .filter(|url| !seen.contains(url))
                .cloned()
                .collect();
            merged.extend(fresh);
            request.sources = merged;
            info!(count = query_info.urls.len(), "query urls added to request");
        }

        let phase_config = PhaseConfig::for_query_type(query_info.query_type);
        let plan = self.planner.generate_research_plan(request).await;

        AdaptivePlan {
            plan,
            query_info,
            phase_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Phase;
    use crate::tools::{builtin_registry, HfTrending, QueryRefiner, UnifiedSearch, UrlCollector};
    use std::sync::Arc;
    use std::time::Duration;

    fn adaptive() -> AdaptivePlanner {
        let timeout = Duration::from_secs(5);
        let registry = Arc::new(builtin_registry(
            Arc::new(UnifiedSearch::new(timeout, QueryRefiner::new(None), 2)),
            Arc::new(UrlCollector::new(timeout)),
            Arc::new(HfTrending::new(timeout)),
        ));
        AdaptivePlanner::new(Planner::new(None, registry))
    }

    #[tokio::test]
    async fn quick_query_gets_quick_phases() {
        let planner = adaptive();
        let mut request = ResearchRequest::new("quick summary of BERT");
        let plan = planner.create_adaptive_plan(&mut request).await;
        assert!(plan.phase_config.skip_synthesis);
        assert!(plan.phase_config.is_active(Phase::Analysis));
        assert!(!plan.phase_config.is_active(Phase::Writing));
    }

    #[tokio::test]
    async fn query_urls_merge_into_sources() {
        let planner = adaptive();
        let mut request =
            ResearchRequest::new("analyze https://arxiv.org/abs/2301.00001 in depth");
        let plan = planner.create_adaptive_plan(&mut request).await;
        assert!(request
            .sources
            .contains(&"https://arxiv.org/abs/2301.00001".to_string()));
        assert!(plan.phase_config.is_active(Phase::CitationAudit));
    }
}
