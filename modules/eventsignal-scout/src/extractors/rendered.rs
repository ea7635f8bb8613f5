use tracing::info;

use eventsignal_common::{ExtractionResult, RawRecord, RenderParams};

use super::markup;
use crate::renderer::PageRenderer;

/// Render the page, then run the markup selectors over the live DOM.
pub async fn extract(
    renderer: &dyn PageRenderer,
    url: &str,
    params: &RenderParams,
) -> ExtractionResult<Vec<RawRecord>> {
    let html = renderer.render(url, params).await?;
    let records = markup::extract(&html, &params.selectors)?;
    info!(url, renderer = renderer.name(), items = records.len(), "Extracted rendered page");
    Ok(records)
}
