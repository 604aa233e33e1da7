use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
    #[error("Tool '{tool}' received bad arguments: {message}")]
    BadArguments { tool: String, message: String },
    #[error("Tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },
}

impl ToolError {
    pub fn execution(tool: impl Into<String>, error: impl std::fmt::Display) -> Self {
        ToolError::Execution {
            tool: tool.into(),
            message: error.to_string(),
        }
    }

    pub fn bad_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::BadArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
