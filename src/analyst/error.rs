use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalystError {
    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Unexpected completion response format: {0}")]
    Envelope(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Sanitization error: {0}")]
    Sanitize(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AnalystError>;
