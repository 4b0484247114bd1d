pub mod chrome;

use anyhow::Result;
use async_trait::async_trait;

pub use chrome::ChromeSession;

/// Substring in the page-down image source when the control is greyed out.
pub const DISABLED_MARKER: &str = "_dis";

/// A located "next page" control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextControl {
    /// Opaque frame identifier of the frame the control was found in.
    pub frame: String,
    /// `src` of the control image, when it is (or wraps) an image.
    pub image_src: Option<String>,
}

impl NextControl {
    pub fn is_disabled(&self) -> bool {
        self.image_src
            .as_deref()
            .is_some_and(|src| src.contains(DISABLED_MARKER))
    }
}

/// Per-frame summary logged when no control can be found.
#[derive(Debug, Clone)]
pub struct FrameSummary {
    pub name: String,
    pub url: String,
    pub html_len: usize,
    pub mentions_control: bool,
}

/// The browser capabilities the crawler needs. Intercepted batches are not
/// part of this trait; they arrive on the channel handed out at launch.
#[async_trait]
pub trait ReportSession: Send {
    /// Search every frame in enumeration order; first visible match wins.
    async fn find_next_control(&mut self) -> Result<Option<NextControl>>;

    /// Simulate activation of a control returned by `find_next_control`.
    async fn activate(&mut self, control: &NextControl) -> Result<()>;

    /// Diagnostics for every frame currently attached to the page.
    async fn describe_frames(&mut self) -> Result<Vec<FrameSummary>>;
}
