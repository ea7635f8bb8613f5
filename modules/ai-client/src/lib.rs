pub mod claude;
pub mod error;
pub mod util;

pub use claude::{Claude, DocumentKind};
pub use error::{AiError, Result};
pub use util::strip_code_blocks;
