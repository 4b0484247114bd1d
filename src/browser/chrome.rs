use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FrameSummary, NextControl, ReportSession};
use crate::parser::{self, DATA_MARKER};
use crate::record::RawRecord;

/// Path fragment of the report dispatcher endpoint that carries grid data.
pub const DATA_PATH: &str = "v1/disp";
const BATCH_QUEUE_CAPACITY: usize = 64;
const NAVIGATION_TIMEOUT_SECS: u64 = 60;
const CONTROL_LABEL: &str = "Page down";

// Marks the match with a data attribute so `activate` can find it again.
const FIND_CONTROL_JS: &str = r#"(() => {
  const label = 'Page down';
  let el = document.querySelector(
    "a[title*='Page down'], img[alt*='Page down'], img[title*='Page down']");
  if (!el) {
    el = Array.from(document.querySelectorAll('a'))
      .find(a => (a.textContent || '').includes(label)) || null;
  }
  if (!el) return { found: false, src: null };
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  if (rect.width === 0 || rect.height === 0 || style.visibility === 'hidden' || style.display === 'none') {
    return { found: false, src: null };
  }
  document.querySelectorAll('[data-disp-next]').forEach(n => n.removeAttribute('data-disp-next'));
  el.setAttribute('data-disp-next', '1');
  const img = el.tagName === 'IMG' ? el : el.querySelector('img');
  return { found: true, src: img ? img.getAttribute('src') : el.getAttribute('src') };
})()"#;

const ACTIVATE_CONTROL_JS: &str = r#"(() => {
  const el = document.querySelector('[data-disp-next]');
  if (!el) return false;
  el.click();
  return true;
})()"#;

const DESCRIBE_FRAME_JS: &str = r#"(() => {
  const html = document.documentElement ? document.documentElement.outerHTML : '';
  return { name: window.name || '', url: location.href, html_len: html.length,
           mentions_control: html.includes('Page down') };
})()"#;

#[derive(Debug, Deserialize)]
struct ControlProbe {
    found: bool,
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameProbe {
    name: String,
    url: String,
    html_len: usize,
    mentions_control: bool,
}

/// Chromium driven over CDP.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl ChromeSession {
    /// Launch Chromium, open a blank page and subscribe to its network
    /// traffic. Parsed batches arrive on the returned receiver in arrival
    /// order.
    pub async fn launch(headful: bool) -> Result<(Self, mpsc::Receiver<Vec<RawRecord>>)> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .request_timeout(Duration::from_secs(NAVIGATION_TIMEOUT_SECS));
        if headful {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow!(e))?;

        info!("Launching browser (headful: {})", headful);
        let (browser, mut cdp) = Browser::launch(config)
            .await
            .context("Failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = cdp.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        // Subscribed before returning so no response can precede the listener.
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Could not subscribe to network responses")?;
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("Could not subscribe to network completions")?;
        page.execute(EnableParams::default()).await?;

        let (tx, rx) = mpsc::channel(BATCH_QUEUE_CAPACITY);
        let listener = tokio::spawn(intercept(page.clone(), responses, finished, tx));

        Ok((
            Self {
                browser,
                page,
                handler,
                listener,
            },
            rx,
        ))
    }

    pub async fn open(&self, url: &str) -> Result<()> {
        info!("Navigating to report");
        tokio::time::timeout(
            Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
            self.page.goto(url),
        )
        .await
        .context("Report navigation timed out")?
        .context("Report navigation failed")?;
        Ok(())
    }

    /// Shut Chromium down and stop the background tasks.
    pub async fn close(mut self) {
        self.listener.abort();
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Browser did not exit cleanly: {}", e);
        }
        let _ = self.handler.await;
    }
}

async fn frame_context(page: &Page, frame: &FrameId) -> Result<Option<ExecutionContextId>> {
    Ok(page.frame_execution_context(frame.clone()).await?)
}

async fn evaluate_in<T: DeserializeOwned>(
    page: &Page,
    context: ExecutionContextId,
    script: &str,
) -> Result<T> {
    let params = EvaluateParams::builder()
        .expression(script)
        .context_id(context)
        .return_by_value(true)
        .build()
        .map_err(|e| anyhow!(e))?;
    let result = page.evaluate_expression(params).await?;
    Ok(result.into_value()?)
}

#[async_trait]
impl ReportSession for ChromeSession {
    async fn find_next_control(&mut self) -> Result<Option<NextControl>> {
        let frames = self.page.frames().await?;
        debug!("Checking {} frames for '{}'", frames.len(), CONTROL_LABEL);

        for frame in frames {
            let Ok(Some(context)) = frame_context(&self.page, &frame).await else {
                continue;
            };
            // Frames come and go while the report re-renders.
            let probe: ControlProbe = match evaluate_in(&self.page, context, FIND_CONTROL_JS).await {
                Ok(probe) => probe,
                Err(e) => {
                    debug!("Frame {:?} not searchable: {:#}", frame, e);
                    continue;
                }
            };
            if probe.found {
                debug!("Found '{}' in frame {:?}", CONTROL_LABEL, frame);
                return Ok(Some(NextControl {
                    frame: frame.inner().clone(),
                    image_src: probe.src,
                }));
            }
        }
        Ok(None)
    }

    async fn activate(&mut self, control: &NextControl) -> Result<()> {
        let frame = FrameId::new(control.frame.clone());
        let context = frame_context(&self.page, &frame)
            .await?
            .ok_or_else(|| anyhow!("frame {} is gone", control.frame))?;
        let clicked: bool = evaluate_in(&self.page, context, ACTIVATE_CONTROL_JS).await?;
        if !clicked {
            return Err(anyhow!("control detached from frame {}", control.frame));
        }
        Ok(())
    }

    async fn describe_frames(&mut self) -> Result<Vec<FrameSummary>> {
        let mut summaries = Vec::new();
        for frame in self.page.frames().await? {
            let Ok(Some(context)) = frame_context(&self.page, &frame).await else {
                continue;
            };
            if let Ok(probe) = evaluate_in::<FrameProbe>(&self.page, context, DESCRIBE_FRAME_JS).await {
                summaries.push(FrameSummary {
                    name: probe.name,
                    url: probe.url,
                    html_len: probe.html_len,
                    mentions_control: probe.mentions_control,
                });
            }
        }
        Ok(summaries)
    }
}

fn is_payload_mime(mime: &str) -> bool {
    mime.contains("json") || mime.contains("javascript") || mime.starts_with("text/")
}

/// Whether a response is a dispatcher reply worth reading.
fn qualifies(url: &str, status: i64, mime: &str) -> bool {
    url.contains(DATA_PATH) && status == 200 && is_payload_mime(mime)
}

/// Rows carried by a dispatcher body, or `None` when there is nothing to queue.
fn batch_from_body(body: &str, base64_encoded: bool) -> Option<Vec<RawRecord>> {
    if base64_encoded || !body.contains(DATA_MARKER) {
        return None;
    }
    info!("Intercepted data response");
    let batch = parser::parse_response(body);
    if batch.is_empty() {
        None
    } else {
        Some(batch)
    }
}

/// Pairs `responseReceived` with `loadingFinished` per request id. The two
/// CDP streams are not ordered relative to each other, so either may come
/// first; a body is fetched once both have been seen for a qualifying reply.
#[derive(Default)]
struct ResponseTracker {
    responded: HashMap<String, bool>,
    finished_early: HashSet<String>,
}

impl ResponseTracker {
    /// Returns true when the body of `request_id` is ready to fetch.
    fn on_response(&mut self, request_id: &str, qualifying: bool) -> bool {
        if self.finished_early.remove(request_id) {
            return qualifying;
        }
        self.responded.insert(request_id.to_string(), qualifying);
        false
    }

    /// Returns true when the body of `request_id` is ready to fetch.
    fn on_finished(&mut self, request_id: &str) -> bool {
        match self.responded.remove(request_id) {
            Some(qualifying) => qualifying,
            None => {
                self.finished_early.insert(request_id.to_string());
                false
            }
        }
    }
}

enum NetEvent {
    Response(Arc<EventResponseReceived>),
    Finished(Arc<EventLoadingFinished>),
}

/// Listener half of the session: watches dispatcher responses, parses their
/// bodies and queues non-empty batches for the crawler.
async fn intercept(
    page: Page,
    responses: EventStream<EventResponseReceived>,
    finished: EventStream<EventLoadingFinished>,
    tx: mpsc::Sender<Vec<RawRecord>>,
) {
    let mut events = futures::stream::select(
        responses.map(NetEvent::Response).boxed(),
        finished.map(NetEvent::Finished).boxed(),
    );
    let mut tracker = ResponseTracker::default();

    while let Some(event) = events.next().await {
        let request_id = match &event {
            NetEvent::Response(ev) => {
                let response = &ev.response;
                let qualifying = qualifies(&response.url, response.status, &response.mime_type);
                if !tracker.on_response(ev.request_id.inner(), qualifying) {
                    continue;
                }
                ev.request_id.clone()
            }
            NetEvent::Finished(ev) => {
                if !tracker.on_finished(ev.request_id.inner()) {
                    continue;
                }
                ev.request_id.clone()
            }
        };

        let body = match page.execute(GetResponseBodyParams::new(request_id)).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Dispatcher response body unavailable: {}", e);
                continue;
            }
        };
        let Some(batch) = batch_from_body(&body.result.body, body.result.base64_encoded) else {
            continue;
        };
        info!("Parsed {} rows", batch.len());
        if tx.send(batch).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISP_URL: &str = "https://apps.labor.ny.gov/ibmcognos/bi/v1/disp";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.js", name)).unwrap()
    }

    #[test]
    fn payload_mime_types() {
        assert!(is_payload_mime("application/json"));
        assert!(is_payload_mime("application/javascript"));
        assert!(is_payload_mime("text/javascript"));
        assert!(!is_payload_mime("image/gif"));
    }

    #[test]
    fn only_successful_dispatcher_replies_qualify() {
        assert!(qualifies(DISP_URL, 200, "text/javascript"));
        assert!(qualifies(&format!("{}?b_action=cognosViewer", DISP_URL), 200, "application/json"));
        assert!(!qualifies("https://apps.labor.ny.gov/ibmcognos/bi/v1/ext/logo.js", 200, "text/javascript"));
        assert!(!qualifies(DISP_URL, 304, "text/javascript"));
        assert!(!qualifies(DISP_URL, 500, "application/json"));
        assert!(!qualifies(DISP_URL, 200, "image/png"));
    }

    #[test]
    fn data_body_becomes_batch() {
        let batch = batch_from_body(&fixture("disp_page1"), false).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].contractor, "ADVANCED ENVIRONMENTAL SERVICES INC");
    }

    #[test]
    fn unusable_bodies_are_not_queued() {
        assert!(batch_from_body(&fixture("disp_page1"), true).is_none());
        assert!(batch_from_body(&fixture("disp_layout"), false).is_none());
        // Marker present but no completed row.
        let partial = r#"window.oCVSC_1.addContextData({"1":{"r":2,"u":"ACME"}});"#;
        assert!(batch_from_body(partial, false).is_none());
    }

    #[test]
    fn finished_before_response_is_still_fetched() {
        let mut tracker = ResponseTracker::default();
        assert!(!tracker.on_finished("disp-req"));
        assert!(!tracker.on_response("other-req", false));
        assert!(tracker.on_response("disp-req", true));
        assert!(!tracker.on_finished("other-req"));
        assert!(tracker.responded.is_empty());
        assert!(tracker.finished_early.is_empty());
    }

    #[test]
    fn response_then_finished_is_fetched_once() {
        let mut tracker = ResponseTracker::default();
        assert!(!tracker.on_response("disp-req", true));
        assert!(tracker.on_finished("disp-req"));
        assert!(!tracker.on_finished("disp-req"));
    }

    #[test]
    fn non_qualifying_requests_are_never_fetched() {
        let mut tracker = ResponseTracker::default();
        assert!(!tracker.on_response("img-req", false));
        assert!(!tracker.on_finished("img-req"));
        assert!(!tracker.on_finished("css-req"));
        assert!(!tracker.on_response("css-req", false));
        assert!(tracker.responded.is_empty());
    }
}
