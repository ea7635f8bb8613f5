use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Claude API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Response(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout(err.to_string())
        } else if err.is_decode() {
            AiError::Response(err.to_string())
        } else {
            AiError::Network(err.to_string())
        }
    }
}
