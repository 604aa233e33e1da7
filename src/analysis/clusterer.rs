//! Theme clustering over title+abstract embeddings.
//!
//! K-means with K = min(n/2 + 1, 5) and deterministic seeding (evenly
//! spaced initial centroids), so the same corpus always clusters the same
//! way. Cluster labels come from the LLM given the member titles.

use tracing::{info, warn};

use crate::core::{Cluster, Paper};
use crate::embedding::{dot, Embedder};
use crate::llm::{extract_json_value, GenerateRequest, LlmClient};
use crate::prompts;

const MAX_CLUSTERS: usize = 5;
const KMEANS_ITERATIONS: usize = 20;

pub struct Clusterer<'a> {
    llm: &'a dyn LlmClient,
    embedder: &'a dyn Embedder,
}

impl<'a> Clusterer<'a> {
    pub fn new(llm: &'a dyn LlmClient, embedder: &'a dyn Embedder) -> Self {
        Clusterer { llm, embedder }
    }

    /// Partition papers into named clusters; each paper lands in exactly one
    /// cluster and its `cluster_id` is stamped.
    pub async fn cluster_papers(&self, papers: &mut [Paper], plan_id: &str) -> Vec<Cluster> {
        if papers.is_empty() {
            return Vec::new();
        }

        let embeddings: Vec<Vec<f32>> = papers
            .iter()
            .map(|paper| {
                self.embedder
                    .embed(&format!("{}. {}", paper.title, paper.abstract_text))
            })
            .collect();

        let k = (papers.len() / 2 + 1).min(MAX_CLUSTERS).max(1);
        let assignments = kmeans(&embeddings, k);

        let mut clusters = Vec::new();
        for label in 0..k {
            let member_indices: Vec<usize> = assignments
                .iter()
                .enumerate()
                .filter(|(_, &a)| a == label)
                .map(|(i, _)| i)
                .collect();
            if member_indices.is_empty() {
                continue;
            }

            let members: Vec<&Paper> = member_indices.iter().map(|&i| &papers[i]).collect();
            let paper_ids: Vec<String> = members.iter().map(|paper| paper.identity()).collect();
            let (name, description) = self.label_cluster(&members).await;
            let cluster_id = format!("{plan_id}:{label}");

            for &index in &member_indices {
                papers[index].cluster_id = Some(cluster_id.clone());
            }
            clusters.push(Cluster {
                id: cluster_id,
                name,
                description,
                paper_ids,
                plan_id: plan_id.to_string(),
            });
        }

        info!(clusters = clusters.len(), papers = papers.len(), "clustering complete");
        clusters
    }

    async fn label_cluster(&self, members: &[&Paper]) -> (String, String) {
        let titles = members
            .iter()
            .map(|paper| format!("- {}", paper.title))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::cluster_label_prompt(&titles);

        match self.llm.generate(GenerateRequest::json(prompt)).await {
            Ok(response) => {
                let parsed = extract_json_value(&response);
                let name = parsed
                    .as_ref()
                    .and_then(|value| value.get("name"))
                    .and_then(|value| value.as_str())
                    .unwrap_or("Unknown Theme")
                    .to_string();
                let description = parsed
                    .as_ref()
                    .and_then(|value| value.get("description"))
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();
                (name, description)
            }
            Err(error) => {
                warn!(%error, "cluster labeling failed");
                ("Unlabeled Cluster".to_string(), String::new())
            }
        }
    }
}

/// Plain k-means on unit vectors with cosine distance. Initial centroids are
/// evenly spaced points; empty clusters keep their previous centroid.
fn kmeans(points: &[Vec<f32>], k: usize) -> Vec<usize> {
    let n = points.len();
    if k <= 1 || n <= k {
        // Degenerate cases: one cluster, or one point per cluster.
        return (0..n).map(|i| if k <= 1 { 0 } else { i.min(k - 1) }).collect();
    }

    let dimension = points[0].len();
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|cluster| points[cluster * n / k].clone())
        .collect();
    let mut assignments = vec![0usize; n];

    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (index, point) in points.iter().enumerate() {
            let nearest = (0..k)
                .max_by(|&a, &b| {
                    dot(point, &centroids[a])
                        .partial_cmp(&dot(point, &centroids[b]))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            if assignments[index] != nearest {
                assignments[index] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = points
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == cluster)
                .map(|(point, _)| point)
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut mean = vec![0.0f32; dimension];
            for member in &members {
                for (slot, value) in mean.iter_mut().zip(member.iter()) {
                    *slot += value;
                }
            }
            for slot in &mut mean {
                *slot /= members.len() as f32;
            }
            crate::embedding::normalize(&mut mean);
            *centroid = mean;
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    struct ScriptedLlm;

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LlmError> {
            Ok(r#"{"name": "Test Theme", "description": "papers about testing"}"#.into())
        }
    }

    fn paper(title: &str, abstract_text: &str) -> Paper {
        let mut paper = Paper::new(title);
        paper.abstract_text = abstract_text.into();
        paper
    }

    #[tokio::test]
    async fn clustering_partitions_the_corpus() {
        let llm = ScriptedLlm;
        let embedder = HashEmbedder::default();
        let clusterer = Clusterer::new(&llm, &embedder);

        let mut papers = vec![
            paper("Vision transformers", "image classification with attention"),
            paper("ViT at scale", "image classification with transformers"),
            paper("Protein folding", "structure prediction with deep learning"),
            paper("AlphaFold analysis", "protein structure prediction accuracy"),
        ];
        let clusters = clusterer.cluster_papers(&mut papers, "plan-1").await;

        assert!(!clusters.is_empty());
        assert!(clusters.len() <= MAX_CLUSTERS);
        // Partition: every paper in exactly one cluster.
        let mut seen = std::collections::HashSet::new();
        for cluster in &clusters {
            assert_eq!(cluster.name, "Test Theme");
            for paper_id in &cluster.paper_ids {
                assert!(seen.insert(paper_id.clone()), "paper in two clusters");
            }
        }
        assert_eq!(seen.len(), papers.len());
        assert!(papers.iter().all(|paper| paper.cluster_id.is_some()));
    }

    #[tokio::test]
    async fn empty_corpus_clusters_to_nothing() {
        let llm = ScriptedLlm;
        let embedder = HashEmbedder::default();
        let clusterer = Clusterer::new(&llm, &embedder);
        let clusters = clusterer.cluster_papers(&mut [], "plan-1").await;
        assert!(clusters.is_empty());
    }

    #[test]
    fn k_heuristic_matches_spec() {
        for (n, expected) in [(1usize, 1usize), (2, 2), (4, 3), (8, 5), (20, 5)] {
            let k = (n / 2 + 1).min(MAX_CLUSTERS).max(1);
            assert_eq!(k, expected, "n = {n}");
        }
    }

    #[test]
    fn kmeans_is_deterministic() {
        let embedder = HashEmbedder::default();
        let points: Vec<Vec<f32>> = ["a b c", "a b d", "x y z", "x y w", "m n o", "m n p"]
            .iter()
            .map(|text| embedder.embed(text))
            .collect();
        let first = kmeans(&points, 3);
        let second = kmeans(&points, 3);
        assert_eq!(first, second);
    }
}
