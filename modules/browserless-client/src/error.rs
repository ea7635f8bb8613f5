use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserlessError>;

#[derive(Debug, Error)]
pub enum BrowserlessError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl BrowserlessError {
    /// Browserless reports an expired `waitForSelector` as 408.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BrowserlessError::Timeout(_) | BrowserlessError::Api { status: 408, .. }
        )
    }
}

impl From<reqwest::Error> for BrowserlessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrowserlessError::Timeout(err.to_string())
        } else {
            BrowserlessError::Network(err.to_string())
        }
    }
}
