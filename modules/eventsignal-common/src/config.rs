use std::env;
use std::path::PathBuf;

const DEFAULT_VISION_MODEL: &str = "claude-sonnet-4-20250514";

/// Process configuration loaded from environment variables.
/// Secrets and machine-specific values only; per-site settings live in the
/// sites file (see [`crate::file_config`]).
#[derive(Debug, Clone)]
pub struct Config {
    // Image understanding
    pub anthropic_api_key: Option<String>,
    pub vision_model: String,

    // Rendering
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub chrome_bin: String,

    // Output
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            vision_model: env::var("VISION_MODEL")
                .unwrap_or_else(|_| DEFAULT_VISION_MODEL.to_string()),
            browserless_url: optional_env("BROWSERLESS_URL"),
            browserless_token: optional_env("BROWSERLESS_TOKEN"),
            chrome_bin: env::var("CHROME_BIN").unwrap_or_else(|_| "chromium".to_string()),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
        }
    }

    /// Log the loaded configuration with secrets truncated.
    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!("  VISION_MODEL: {}", self.vision_model);
        tracing::info!(
            "  BROWSERLESS_URL: {}",
            self.browserless_url.as_deref().unwrap_or("<not set>")
        );
        tracing::info!("  BROWSERLESS_TOKEN: {}", preview_opt(&self.browserless_token));
        tracing::info!("  CHROME_BIN: {}", self.chrome_bin);
        tracing::info!("  DATA_DIR: {}", self.data_dir.display());
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
