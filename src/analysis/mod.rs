//! Corpus analysis phases: relevance scoring, screening, PDF loading,
//! evidence extraction, clustering, and taxonomy building.

pub mod analyzer;
pub mod clusterer;
pub mod evidence;
pub mod pdf;
pub mod screener;
pub mod taxonomy;

pub use analyzer::Analyzer;
pub use clusterer::Clusterer;
pub use evidence::EvidenceExtractor;
pub use pdf::{PdfError, PdfLoader};
pub use screener::Screener;
pub use taxonomy::TaxonomyBuilder;
