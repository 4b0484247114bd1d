use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::ParseError;

// window.<namespace>.addContextData({...}); where the namespace changes per load.
static CONTEXT_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)window\.[\w$]+(?:\.[\w$]+)*\.addContextData\(\s*(\{.*?\})\s*\)\s*;").unwrap()
});

/// One rendered cell of the report grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellEntry {
    /// Replay position. Not contiguous, not necessarily starting at zero.
    pub index: u64,
    /// Visual column the value was rendered in.
    pub role: i64,
    pub value: String,
}

/// Pull the embedded context-data object out of a dispatcher response.
pub fn locate_payload(text: &str) -> Result<&str, ParseError> {
    CONTEXT_DATA_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or(ParseError::NoPayload)
}

/// Decode the context-data object into cells ordered by numeric key.
///
/// Cells without a display value or without a role are dropped here; keys
/// that are not integers are skipped.
pub fn extract_cells(payload: &str) -> Result<Vec<CellEntry>, ParseError> {
    let object: Map<String, Value> = serde_json::from_str(payload)?;

    let mut cells: Vec<CellEntry> = object
        .iter()
        .filter_map(|(key, descriptor)| {
            let Ok(index) = key.trim().parse::<u64>() else {
                debug!("Skipping non-numeric cell key {:?}", key);
                return None;
            };
            let role = descriptor.get("r")?.as_i64()?;
            let value = display_value(descriptor.get("u")?)?;
            Some(CellEntry { index, role, value })
        })
        .collect();

    // Keys are numeric strings; lexical order would interleave rows.
    cells.sort_by_key(|c| c.index);
    Ok(cells)
}

fn display_value(u: &Value) -> Option<String> {
    let text = match u {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
