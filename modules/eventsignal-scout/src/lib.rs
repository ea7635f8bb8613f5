pub mod datetime;
pub mod dedup;
pub mod export;
pub mod extractors;
pub mod fetch;
pub mod normalizer;
pub mod pipeline;
pub mod ratelimit;
pub mod renderer;
pub mod retry;
pub mod run_log;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod vision;

pub use pipeline::{Pipeline, RunReport};
