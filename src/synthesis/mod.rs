//! Synthesis phases: claims from study cards, citation auditing with
//! auto-repair, gap mining, and the grounded report writer.

pub mod audit;
pub mod claims;
pub mod gaps;
pub mod writer;

pub use audit::{AuditResult, CitationAuditor};
pub use claims::ClaimGenerator;
pub use gaps::GapMiner;
pub use writer::GroundedWriter;
