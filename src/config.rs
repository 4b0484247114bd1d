use std::time::Duration;

/// Active Asbestos Projects report, run as HTML in the classic viewer.
pub const REPORT_URL: &str = "https://biservices.labor.ny.gov/Reports/bi/?perspective=classicviewer&pathRef=.public_folders%2FWPS%2BReports%2FActive%2BAsbestos%2BProjects&id=i54BC6F1D21F74795A7CA53A0D31798A5&ui_appbar=false&ui_navbar=false&objRef=i54BC6F1D21F74795A7CA53A0D31798A5&action=run&format=HTML&cmPropStr=%7B%22id%22%3A%22i54BC6F1D21F74795A7CA53A0D31798A5%22%2C%22type%22%3A%22report%22%2C%22defaultName%22%3A%22Active%20Asbestos%20Projects%22%2C%22permissions%22%3A%5B%22execute%22%2C%22read%22%2C%22traverse%22%5D%7D";

pub const CRAWL_DEADLINE_SECS: u64 = 30 * 60;
pub const PAGE_TIMEOUT_SECS: u64 = 30;
pub const SETTLE_SECS: u64 = 10;

pub const GEOCODE_DELAY_MS: u64 = 100;
pub const STATE_SUFFIX: &str = "NY";

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub url: String,
    pub headful: bool,
    /// Whole-crawl deadline; the only hard failure of the crawl stage.
    pub deadline: Duration,
    /// How long to wait for a batch after clicking "next".
    pub page_timeout: Duration,
    /// Pause before looking for the control; its enabled state renders late.
    pub settle: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            url: REPORT_URL.to_string(),
            headful: false,
            deadline: Duration::from_secs(CRAWL_DEADLINE_SECS),
            page_timeout: Duration::from_secs(PAGE_TIMEOUT_SECS),
            settle: Duration::from_secs(SETTLE_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeocodeSettings {
    /// Minimum spacing between upstream geocoder calls.
    pub delay: Duration,
    pub state: String,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(GEOCODE_DELAY_MS),
            state: STATE_SUFFIX.to_string(),
        }
    }
}
