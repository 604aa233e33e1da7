use thiserror::Error;

/// Top-level application error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::KvError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("PDF error: {0}")]
    Pdf(#[from] crate::analysis::PdfError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
