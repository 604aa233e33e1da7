use std::env;
use std::time::Duration;

/// Runtime settings, loaded once at startup from the environment.
///
/// A `.env` file in the working directory is honored (via dotenvy) so the
/// CLI can be used without exporting keys by hand.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gemini API key. Optional: without it the LLM-backed paths fall back
    /// to their rule-based equivalents where one exists.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    /// Relevance score a paper needs before its PDF is fetched.
    pub pdf_relevance_threshold: f64,
    /// Papers per screening LLM call.
    pub screening_batch_size: usize,
    /// Included-paper count above which the PDF download gate fires.
    pub pdf_gate_threshold: usize,
    /// Estimated token count above which the token budget gate fires.
    pub token_gate_threshold: u64,
    /// Refinement rounds the unified search may attempt.
    pub max_refine_attempts: usize,

    pub tool_timeout: Duration,
    pub llm_timeout: Duration,
    pub pdf_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            pdf_relevance_threshold: 8.0,
            screening_batch_size: 15,
            pdf_gate_threshold: 15,
            token_gate_threshold: 100_000,
            max_refine_attempts: 2,
            tool_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(60),
            pdf_timeout: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut settings = Settings::default();
        settings.gemini_api_key = env::var("GEMINI_API_KEY").ok();
        if let Ok(model) = env::var("GEMINI_MODEL") {
            settings.gemini_model = model;
        }
        if let Some(threshold) = read_parsed("SURVEYOR_PDF_THRESHOLD") {
            settings.pdf_relevance_threshold = threshold;
        }
        if let Some(batch) = read_parsed("SURVEYOR_SCREENING_BATCH") {
            settings.screening_batch_size = batch;
        }
        if let Some(gate) = read_parsed("SURVEYOR_PDF_GATE") {
            settings.pdf_gate_threshold = gate;
        }
        if let Some(tokens) = read_parsed("SURVEYOR_TOKEN_GATE") {
            settings.token_gate_threshold = tokens;
        }
        settings
    }
}

fn read_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let settings = Settings::default();
        assert_eq!(settings.pdf_gate_threshold, 15);
        assert_eq!(settings.screening_batch_size, 15);
        assert_eq!(settings.token_gate_threshold, 100_000);
        assert_eq!(settings.tool_timeout, Duration::from_secs(30));
    }
}
