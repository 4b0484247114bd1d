use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::ReportSession;
use crate::record::RawRecord;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    AwaitingFirstBatch,
    ProcessingPage,
    AwaitingNextBatch,
    Done,
}

/// Drives the report page by page. Owns the accumulated rows and the
/// receiving end of the interception queue for the whole crawl.
pub struct Crawler<'a, S: ReportSession> {
    session: &'a mut S,
    batches: mpsc::Receiver<Vec<RawRecord>>,
    records: Vec<RawRecord>,
    checkpoint: Option<PathBuf>,
    page_timeout: Duration,
    settle: Duration,
    pages: usize,
    state: CrawlState,
}

impl<'a, S: ReportSession> Crawler<'a, S> {
    pub fn new(
        session: &'a mut S,
        batches: mpsc::Receiver<Vec<RawRecord>>,
        page_timeout: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            session,
            batches,
            records: Vec::new(),
            checkpoint: None,
            page_timeout,
            settle,
            pages: 0,
            state: CrawlState::AwaitingFirstBatch,
        }
    }

    /// Snapshot the accumulated rows to `path` after every page.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Crawl until the report is exhausted. Never fails: every problem after
    /// the first batch ends the crawl with what has been collected. Blocks
    /// until the first batch arrives, so callers must impose a deadline.
    pub async fn run(&mut self) {
        while self.state != CrawlState::Done {
            let next = match self.state {
                CrawlState::AwaitingFirstBatch => self.await_first_batch().await,
                CrawlState::ProcessingPage => self.process_page().await,
                CrawlState::AwaitingNextBatch => self.await_next_batch().await,
                CrawlState::Done => CrawlState::Done,
            };
            debug!("Crawl state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        info!(
            "Crawl finished: {} rows over {} pages",
            self.records.len(),
            self.pages
        );
    }

    async fn await_first_batch(&mut self) -> CrawlState {
        info!("Waiting for initial data...");
        match self.batches.recv().await {
            Some(batch) => {
                self.records.extend(batch);
                CrawlState::ProcessingPage
            }
            None => {
                warn!("Interception stopped before any data arrived");
                CrawlState::Done
            }
        }
    }

    async fn process_page(&mut self) -> CrawlState {
        // A response may have landed while the last click was in flight.
        while let Ok(batch) = self.batches.try_recv() {
            self.records.extend(batch);
        }
        self.pages += 1;
        info!(
            "Page {} processed. Total rows: {}",
            self.pages,
            self.records.len()
        );
        self.save_checkpoint();

        if !self.settle.is_zero() {
            debug!("Waiting {:?} for navigation to render", self.settle);
            tokio::time::sleep(self.settle).await;
        }

        let control = match self.session.find_next_control().await {
            Ok(Some(control)) => control,
            Ok(None) => {
                warn!("Page down control not found in any frame");
                self.log_frames().await;
                return CrawlState::Done;
            }
            Err(e) => {
                warn!("Page down search failed: {:#}", e);
                return CrawlState::Done;
            }
        };

        if control.is_disabled() {
            info!("Page down disabled. End of report.");
            return CrawlState::Done;
        }

        debug!("Clicking Page down in frame {}", control.frame);
        match self.session.activate(&control).await {
            Ok(()) => CrawlState::AwaitingNextBatch,
            Err(e) => {
                warn!("Error during navigation click: {:#}", e);
                CrawlState::Done
            }
        }
    }

    async fn await_next_batch(&mut self) -> CrawlState {
        debug!("Waiting for next data batch...");
        match tokio::time::timeout(self.page_timeout, self.batches.recv()).await {
            Ok(Some(batch)) => {
                self.records.extend(batch);
                CrawlState::ProcessingPage
            }
            Ok(None) => {
                warn!("Interception stopped; ending crawl");
                CrawlState::Done
            }
            Err(_) => {
                info!(
                    "No new data {:?} after click. Assuming end.",
                    self.page_timeout
                );
                CrawlState::Done
            }
        }
    }

    fn save_checkpoint(&self) {
        let Some(path) = &self.checkpoint else {
            return;
        };
        if let Err(e) = store::save_raw(path, &self.records) {
            warn!("Checkpoint to {} failed: {}", path.display(), e);
        }
    }

    async fn log_frames(&mut self) {
        match self.session.describe_frames().await {
            Ok(frames) => {
                for f in frames {
                    let url: String = f.url.chars().take(60).collect();
                    info!(
                        "- Frame {:?} ({}): html len {}{}",
                        f.name,
                        url,
                        f.html_len,
                        if f.mentions_control { " [mentions Page down]" } else { "" }
                    );
                }
            }
            Err(e) => debug!("Frame diagnostics unavailable: {:#}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::browser::{FrameSummary, NextControl};

    /// What the fake report shows each time the crawler looks for "next".
    pub(crate) enum Step {
        /// Enabled control; clicking it delivers the batch, or nothing.
        Next(Option<Vec<RawRecord>>),
        Disabled,
        Missing,
        ClickFails,
    }

    pub(crate) struct ScriptedSession {
        tx: Option<mpsc::Sender<Vec<RawRecord>>>,
        steps: VecDeque<Step>,
        shown: Option<Step>,
        pub clicks: usize,
        pub frame_dumps: usize,
    }

    impl ScriptedSession {
        /// Session plus its batch queue, with `initial` already delivered.
        pub(crate) fn new(
            initial: Vec<Vec<RawRecord>>,
            steps: Vec<Step>,
        ) -> (Self, mpsc::Receiver<Vec<RawRecord>>) {
            let (tx, rx) = mpsc::channel(16);
            for batch in initial {
                tx.try_send(batch).unwrap();
            }
            let session = Self {
                tx: Some(tx),
                steps: steps.into(),
                shown: None,
                clicks: 0,
                frame_dumps: 0,
            };
            (session, rx)
        }

        fn close_queue(&mut self) {
            self.tx = None;
        }
    }

    #[async_trait]
    impl ReportSession for ScriptedSession {
        async fn find_next_control(&mut self) -> Result<Option<NextControl>> {
            let control = |src: &str| NextControl {
                frame: "frame-2".into(),
                image_src: Some(src.into()),
            };
            self.shown = self.steps.pop_front();
            Ok(match &self.shown {
                Some(Step::Next(_)) | Some(Step::ClickFails) => {
                    Some(control("/bi/images/page_down.gif"))
                }
                Some(Step::Disabled) => Some(control("/bi/images/page_down_dis.gif")),
                Some(Step::Missing) | None => None,
            })
        }

        async fn activate(&mut self, _control: &NextControl) -> Result<()> {
            self.clicks += 1;
            match self.shown.take() {
                Some(Step::Next(Some(batch))) => {
                    let tx = self.tx.as_ref().ok_or_else(|| anyhow!("queue closed"))?;
                    tx.send(batch).await.map_err(|_| anyhow!("queue closed"))
                }
                Some(Step::Next(None)) => Ok(()),
                _ => Err(anyhow!("frame navigated away")),
            }
        }

        async fn describe_frames(&mut self) -> Result<Vec<FrameSummary>> {
            self.frame_dumps += 1;
            Ok(vec![FrameSummary {
                name: "rsIFrameManager_1".into(),
                url: "https://biservices.labor.ny.gov/bi/v1/disp".into(),
                html_len: 512,
                mentions_control: false,
            }])
        }
    }

    pub(crate) fn row(contractor: &str) -> RawRecord {
        RawRecord {
            contractor: contractor.into(),
            start: "10/01/2025".into(),
            end: "12/01/2025".into(),
            street: format!("{} MAIN ST", contractor.len()),
            city: "ALBANY".into(),
            zip: "12207".into(),
            county: None,
        }
    }

    fn quick(
        session: &mut ScriptedSession,
        rx: mpsc::Receiver<Vec<RawRecord>>,
    ) -> Crawler<'_, ScriptedSession> {
        Crawler::new(session, rx, Duration::from_millis(50), Duration::ZERO)
    }

    #[tokio::test]
    async fn two_pages_then_disabled() {
        let first = vec![row("A"), row("B")];
        let second = vec![row("C"), row("D"), row("E")];
        let (mut session, rx) = ScriptedSession::new(
            vec![first.clone()],
            vec![Step::Next(Some(second.clone())), Step::Disabled],
        );

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        let expected: Vec<RawRecord> = first.into_iter().chain(second).collect();
        assert_eq!(crawler.records(), expected.as_slice());
        assert_eq!(crawler.pages(), 2);
        assert_eq!(crawler.state(), CrawlState::Done);
        drop(crawler);
        assert_eq!(session.clicks, 1);
    }

    #[tokio::test]
    async fn silent_click_ends_with_collected_rows() {
        let first = vec![row("A"), row("B")];
        let (mut session, rx) = ScriptedSession::new(vec![first.clone()], vec![Step::Next(None)]);

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        assert_eq!(crawler.into_records(), first);
        assert_eq!(session.clicks, 1);
    }

    #[tokio::test]
    async fn queued_batches_drain_in_arrival_order() {
        let (mut session, rx) = ScriptedSession::new(
            vec![vec![row("A")], vec![row("B")], vec![row("C")]],
            vec![Step::Disabled],
        );

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        let names: Vec<&str> = crawler.records().iter().map(|r| r.contractor.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(crawler.pages(), 1);
    }

    #[tokio::test]
    async fn missing_control_ends_crawl_with_diagnostics() {
        let (mut session, rx) = ScriptedSession::new(vec![vec![row("A")]], vec![Step::Missing]);

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        assert_eq!(crawler.records().len(), 1);
        drop(crawler);
        assert_eq!(session.frame_dumps, 1);
        assert_eq!(session.clicks, 0);
    }

    #[tokio::test]
    async fn failed_click_keeps_rows() {
        let (mut session, rx) = ScriptedSession::new(
            vec![vec![row("A")]],
            vec![Step::Next(Some(vec![row("B")])), Step::ClickFails],
        );

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        assert_eq!(crawler.into_records(), vec![row("A"), row("B")]);
        assert_eq!(session.clicks, 2);
    }

    #[tokio::test]
    async fn closed_queue_before_first_batch_is_empty() {
        let (mut session, rx) = ScriptedSession::new(vec![], vec![]);
        session.close_queue();

        let mut crawler = quick(&mut session, rx);
        crawler.run().await;

        assert!(crawler.records().is_empty());
        assert_eq!(crawler.pages(), 0);
    }

    #[tokio::test]
    async fn checkpoint_holds_rows_so_far() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_output.json");
        let (mut session, rx) = ScriptedSession::new(
            vec![vec![row("A")]],
            vec![Step::Next(Some(vec![row("B")])), Step::Next(None)],
        );

        let mut crawler = quick(&mut session, rx).with_checkpoint(&path);
        crawler.run().await;

        let saved = store::load_raw(&path).unwrap();
        assert_eq!(saved, vec![row("A"), row("B")]);
    }
}
