use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Semantic model error: {0}")]
    SemanticModel(String),

    #[error("{} target question(s) are not answerable with the generated data: {}", failing.len(), failing.join(" | "))]
    TargetQuestionsUnanswerable { failing: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure modes when pulling structured JSON out of free-form completions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("response was empty")]
    Empty,

    #[error("no JSON value found in response")]
    NoStructuredValue,

    #[error("malformed JSON: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
