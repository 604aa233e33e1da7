use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("GEMINI_API_KEY not found in environment variables")]
    ApiKeyMissing,
    #[error("Network or HTTP request error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Failed to parse JSON response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API returned an error: {0}")]
    Api(String),
    #[error("Could not find generated text in the API response")]
    ContentMissing,
    #[error("Generation timed out after {0} seconds")]
    Timeout(u64),
}
