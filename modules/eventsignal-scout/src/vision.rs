use std::time::Duration;

use ai_client::{AiError, Claude, DocumentKind};
use async_trait::async_trait;
use tracing::info;

use eventsignal_common::{ExtractionError, ExtractionResult};

/// Image-understanding boundary: document bytes plus an instruction in,
/// free-form answer text out.
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn describe(
        &self,
        bytes: &[u8],
        kind: &DocumentKind,
        instruction: &str,
    ) -> ExtractionResult<String>;
}

pub struct ClaudeVision {
    claude: Claude,
}

impl ClaudeVision {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Self {
        info!(model, "Using ClaudeVision");
        Self {
            claude: Claude::new(api_key, model).with_timeout(timeout),
        }
    }
}

fn map_ai_error(err: AiError) -> ExtractionError {
    match err {
        AiError::Timeout(msg) => ExtractionError::Timeout(msg),
        AiError::Network(msg) => ExtractionError::Unreachable(msg),
        AiError::Response(msg) => ExtractionError::Parse(msg),
        // Auth, quota and overload failures all arrive as API errors.
        err @ AiError::Api { .. } => ExtractionError::Service(err.to_string()),
        AiError::InvalidRequest(msg) => ExtractionError::Config(msg),
    }
}

#[async_trait]
impl VisionService for ClaudeVision {
    async fn describe(
        &self,
        bytes: &[u8],
        kind: &DocumentKind,
        instruction: &str,
    ) -> ExtractionResult<String> {
        self.claude
            .describe(bytes, kind, None, instruction)
            .await
            .map_err(map_ai_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsignal_common::ErrorKind;

    #[test]
    fn quota_and_auth_failures_are_service_errors() {
        let quota = map_ai_error(AiError::Api {
            status: 429,
            message: "rate_limit_error".into(),
        });
        assert_eq!(quota.kind(), ErrorKind::ServiceError);
        let auth = map_ai_error(AiError::Api {
            status: 401,
            message: "invalid x-api-key".into(),
        });
        assert_eq!(auth.kind(), ErrorKind::ServiceError);
    }

    #[test]
    fn missing_text_is_a_parse_error() {
        let err = map_ai_error(AiError::Response("no text".into()));
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }
}
