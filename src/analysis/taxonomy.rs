//! Taxonomy matrix over themes, datasets, metrics and method families.
//! Feeds the comparative table in the report and gap detection.

use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::core::{Cluster, StudyCard, TaxonomyMatrix};

#[derive(Default)]
pub struct TaxonomyBuilder;

impl TaxonomyBuilder {
    pub fn new() -> Self {
        TaxonomyBuilder
    }

    pub fn build(&self, study_cards: &[StudyCard], clusters: &[Cluster]) -> TaxonomyMatrix {
        let mut paper_to_theme: HashMap<&str, &str> = HashMap::new();
        let mut themes = Vec::new();
        for cluster in clusters {
            themes.push(cluster.name.clone());
            for paper_id in &cluster.paper_ids {
                paper_to_theme.insert(paper_id.as_str(), cluster.name.as_str());
            }
        }

        let mut datasets: BTreeSet<String> = BTreeSet::new();
        let mut metrics: BTreeSet<String> = BTreeSet::new();
        let mut method_families: BTreeSet<String> = BTreeSet::new();
        for card in study_cards {
            datasets.extend(card.datasets.iter().cloned());
            metrics.extend(card.metrics.iter().cloned());
            if let Some(method) = &card.method {
                let family = method.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
                if !family.is_empty() {
                    method_families.insert(family);
                }
            }
        }

        let mut cells: HashMap<String, Vec<String>> = HashMap::new();
        for card in study_cards {
            let theme = paper_to_theme
                .get(card.paper_id.as_str())
                .copied()
                .unwrap_or("Unclustered");
            for dataset in &card.datasets {
                for metric in &card.metrics {
                    cells
                        .entry(TaxonomyMatrix::cell_key(theme, dataset, metric))
                        .or_default()
                        .push(card.paper_id.clone());
                }
            }
        }

        let taxonomy = TaxonomyMatrix {
            themes,
            datasets: datasets.into_iter().collect(),
            metrics: metrics.into_iter().collect(),
            method_families: method_families.into_iter().collect(),
            cells,
        };
        info!(
            themes = taxonomy.themes.len(),
            datasets = taxonomy.datasets.len(),
            metrics = taxonomy.metrics.len(),
            cells = taxonomy.cells.len(),
            "taxonomy built"
        );
        taxonomy
    }

    /// Empty (theme, dataset, metric) cells: candidate gaps.
    pub fn find_taxonomy_holes(&self, taxonomy: &TaxonomyMatrix) -> Vec<String> {
        let mut holes = Vec::new();
        for theme in &taxonomy.themes {
            for dataset in &taxonomy.datasets {
                for metric in &taxonomy.metrics {
                    let key = TaxonomyMatrix::cell_key(theme, dataset, metric);
                    if taxonomy.cells.get(&key).map_or(true, Vec::is_empty) {
                        holes.push(key);
                    }
                }
            }
        }
        holes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(paper_id: &str, datasets: &[&str], metrics: &[&str], method: &str) -> StudyCard {
        StudyCard {
            paper_id: paper_id.into(),
            method: Some(method.into()),
            datasets: datasets.iter().map(|s| s.to_string()).collect(),
            metrics: metrics.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn cluster(name: &str, paper_ids: &[&str]) -> Cluster {
        Cluster {
            id: name.to_lowercase(),
            name: name.into(),
            description: String::new(),
            paper_ids: paper_ids.iter().map(|s| s.to_string()).collect(),
            plan_id: "p".into(),
        }
    }

    #[test]
    fn cells_key_theme_dataset_metric() {
        let builder = TaxonomyBuilder::new();
        let cards = vec![
            card("p1", &["ImageNet"], &["accuracy"], "vision transformer pretraining"),
            card("p2", &["ImageNet"], &["accuracy"], "convolutional baseline"),
        ];
        let clusters = vec![cluster("Transformers", &["p1"]), cluster("CNNs", &["p2"])];
        let taxonomy = builder.build(&cards, &clusters);

        assert_eq!(taxonomy.themes, vec!["Transformers", "CNNs"]);
        assert_eq!(taxonomy.datasets, vec!["ImageNet"]);
        let key = TaxonomyMatrix::cell_key("Transformers", "ImageNet", "accuracy");
        assert_eq!(taxonomy.cells[&key], vec!["p1"]);
    }

    #[test]
    fn holes_are_empty_cells() {
        let builder = TaxonomyBuilder::new();
        let cards = vec![
            card("p1", &["ImageNet"], &["accuracy"], "m"),
            card("p2", &["COCO"], &["mAP"], "m"),
        ];
        let clusters = vec![cluster("A", &["p1"]), cluster("B", &["p2"])];
        let taxonomy = builder.build(&cards, &clusters);
        let holes = builder.find_taxonomy_holes(&taxonomy);

        // 2 themes x 2 datasets x 2 metrics = 8 cells, 2 filled.
        assert_eq!(holes.len(), 6);
        assert!(holes.contains(&TaxonomyMatrix::cell_key("A", "COCO", "mAP")));
    }
}
