use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that end a run with a non-zero exit status.
///
/// Everything recoverable (parse misses, geocoding misses, a vanished
/// next-page control) is logged and absorbed where it happens instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("crawl deadline of {}s exceeded", .after.as_secs())]
    DeadlineExceeded { after: Duration },

    #[error("required input {} is missing; run the crawl first", .path.display())]
    MissingInput { path: PathBuf },

    #[error("browser session failed: {0}")]
    Browser(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
