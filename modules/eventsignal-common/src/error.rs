use serde::Serialize;
use thiserror::Error;

/// Discriminant of [`ExtractionError`], used for diagnostics and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unreachable,
    Timeout,
    ParseError,
    ServiceError,
    ConfigError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Unreachable => write!(f, "unreachable"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ParseError => write!(f, "parse_error"),
            ErrorKind::ServiceError => write!(f, "service_error"),
            ErrorKind::ConfigError => write!(f, "config_error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::Unreachable(_) => ErrorKind::Unreachable,
            ExtractionError::Timeout(_) => ErrorKind::Timeout,
            ExtractionError::Parse(_) => ErrorKind::ParseError,
            ExtractionError::Service(_) => ErrorKind::ServiceError,
            ExtractionError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Network, timeout and upstream service failures can clear up on their
    /// own. Parse and configuration failures are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Unreachable | ErrorKind::Timeout | ErrorKind::ServiceError
        )
    }
}

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;
