pub mod cells;
pub mod rows;

use thiserror::Error;
use tracing::{debug, warn};

use crate::record::RawRecord;

/// Name of the data-injection call that marks a data-bearing response body.
pub const DATA_MARKER: &str = "addContextData";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no addContextData payload in response")]
    NoPayload,
    #[error("context data is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Two-step pipeline: response text → ordered cells → rows.
pub fn parse_payload(text: &str) -> Result<Vec<RawRecord>, ParseError> {
    let payload = cells::locate_payload(text)?;
    let cells = cells::extract_cells(payload)?;
    Ok(rows::assemble(&cells))
}

/// Parse one intercepted response. Non-data responses are expected and yield
/// an empty batch.
pub fn parse_response(text: &str) -> Vec<RawRecord> {
    match parse_payload(text) {
        Ok(records) => {
            debug!("Extracted {} rows from context data", records.len());
            records
        }
        Err(ParseError::NoPayload) => {
            debug!("Response carries no context data");
            Vec::new()
        }
        Err(e) => {
            warn!("Dropping response: {}", e);
            Vec::new()
        }
    }
}

// ── Tests ──
