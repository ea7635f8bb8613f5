mod client;
pub(crate) mod types;

use std::time::Duration;

use base64::Engine;

use crate::error::{AiError, Result};
use client::ClaudeClient;
use types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Document kinds
// =============================================================================

/// What kind of media block a downloaded document is sent as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    /// `image/png`, `image/jpeg`, `image/webp` or `image/gif`.
    Image(String),
    Pdf,
}

impl DocumentKind {
    /// Classify from a `Content-Type` header (parameters ignored) and fall back
    /// to the URL extension. Unknown types are treated as PNG.
    pub fn detect(content_type: Option<&str>, url: &str) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match mime.as_str() {
            "application/pdf" => return DocumentKind::Pdf,
            "image/png" | "image/jpeg" | "image/webp" | "image/gif" => {
                return DocumentKind::Image(mime)
            }
            "image/jpg" => return DocumentKind::Image("image/jpeg".to_string()),
            _ => {}
        }

        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase();
        if path.ends_with(".pdf") {
            DocumentKind::Pdf
        } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
            DocumentKind::Image("image/jpeg".to_string())
        } else if path.ends_with(".webp") {
            DocumentKind::Image("image/webp".to_string())
        } else if path.ends_with(".gif") {
            DocumentKind::Image("image/gif".to_string())
        } else {
            DocumentKind::Image("image/png".to_string())
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            DocumentKind::Image(media_type) => media_type,
            DocumentKind::Pdf => "application/pdf",
        }
    }

    fn block(&self, bytes: &[u8]) -> ContentBlock {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let source = MediaSource::base64(self.media_type(), encoded);
        match self {
            DocumentKind::Image(_) => ContentBlock::Image { source },
            DocumentKind::Pdf => ContentBlock::Document { source },
        }
    }
}

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Upper bound on a single request, upload included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> Result<ClaudeClient> {
        let client = ClaudeClient::new(&self.api_key, self.timeout)?;
        Ok(match self.base_url {
            Some(ref url) => client.with_base_url(url),
            None => client,
        })
    }

    /// Send a document to Claude vision and return the text of its answer.
    pub async fn describe(
        &self,
        bytes: &[u8],
        kind: &DocumentKind,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(AiError::InvalidRequest("document is empty".into()));
        }

        let mut request = ChatRequest::new(&self.model)
            .message(WireMessage::user_with_media(kind.block(bytes), prompt))
            .max_tokens(4096)
            .temperature(0.0);
        if let Some(system) = system {
            request = request.system(system);
        }

        let response = self.client()?.chat(&request).await?;

        response
            .text()
            .ok_or_else(|| AiError::Response("No text response from Claude vision".into()))
    }
}
