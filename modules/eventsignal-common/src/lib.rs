pub mod config;
pub mod error;
pub mod file_config;
pub mod types;

pub use config::Config;
pub use error::{ErrorKind, ExtractionError, ExtractionResult};
pub use file_config::{load_sites, parse_sites, ConfigIssue, LoadedSites, PipelineSettings};
pub use types::*;
