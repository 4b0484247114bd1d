use std::path::Path;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::browser::{ChromeSession, ReportSession};
use crate::config::{CrawlSettings, GeocodeSettings};
use crate::crawler::Crawler;
use crate::error::PipelineError;
use crate::geocode::{GeocodeCache, GeocodeLookup, Geocoder};
use crate::record::{EnrichedRecord, RawRecord};
use crate::store::{self, DataFiles};

pub struct CrawlStats {
    pub rows: usize,
    pub pages: usize,
}

pub struct GeocodeStats {
    pub total: usize,
    pub located: usize,
    pub network_calls: usize,
    pub cached: usize,
}

/// Crawl stage: launch Chromium, crawl under the global deadline, write the
/// raw dataset. The browser is shut down on every path.
pub async fn crawl(settings: &CrawlSettings, files: &DataFiles) -> Result<CrawlStats, PipelineError> {
    let started = Instant::now();
    let (mut session, batches) = ChromeSession::launch(settings.headful)
        .await
        .map_err(|e| PipelineError::Browser(format!("{:#}", e)))?;

    let result: Result<CrawlStats, PipelineError> = async {
        session
            .open(&settings.url)
            .await
            .map_err(|e| PipelineError::Browser(format!("{:#}", e)))?;
        let remaining = settings.deadline.saturating_sub(started.elapsed());
        crawl_within(&mut session, batches, settings, remaining, &files.raw).await
    }
    .await;

    session.close().await;
    result
}

/// Run the crawler against any session with a hard deadline. On expiry the
/// last per-page checkpoint is left in place and the deadline is reported.
pub async fn crawl_within<S: ReportSession>(
    session: &mut S,
    batches: mpsc::Receiver<Vec<RawRecord>>,
    settings: &CrawlSettings,
    deadline: Duration,
    raw_path: &Path,
) -> Result<CrawlStats, PipelineError> {
    let mut crawler = Crawler::new(session, batches, settings.page_timeout, settings.settle)
        .with_checkpoint(raw_path);

    if tokio::time::timeout(deadline, crawler.run()).await.is_err() {
        error!(
            "Global timeout exceeded while {:?} with {} rows checkpointed",
            crawler.state(),
            crawler.records().len()
        );
        return Err(PipelineError::DeadlineExceeded {
            after: settings.deadline,
        });
    }

    let pages = crawler.pages();
    let records = crawler.into_records();
    store::save_raw(raw_path, &records)?;
    info!("Saved {} rows to {}", records.len(), raw_path.display());

    Ok(CrawlStats {
        rows: records.len(),
        pages,
    })
}

/// Geocode stage: raw dataset in, enriched dataset and refreshed cache out.
pub async fn geocode(
    settings: &GeocodeSettings,
    files: &DataFiles,
    lookup: Box<dyn GeocodeLookup>,
) -> Result<GeocodeStats, PipelineError> {
    let raw = store::load_raw(&files.raw)?;
    let mut geocoder = Geocoder::new(lookup, GeocodeCache::load(&files.cache));

    info!("Geocoding {} items...", raw.len());
    let enriched = enrich(raw, &mut geocoder, settings).await;

    geocoder.cache().save(&files.cache)?;
    store::save_enriched(&files.enriched, &enriched)?;
    info!("Saved {} items to {}", enriched.len(), files.enriched.display());

    Ok(GeocodeStats {
        total: enriched.len(),
        located: enriched.iter().filter(|r| r.is_located()).count(),
        network_calls: geocoder.network_calls(),
        cached: geocoder.cache().len(),
    })
}

/// Geocode records one at a time, keeping every record. Calls that reach the
/// upstream service are spaced by `settings.delay`.
pub async fn enrich(
    records: Vec<RawRecord>,
    geocoder: &mut Geocoder,
    settings: &GeocodeSettings,
) -> Vec<EnrichedRecord> {
    let pb = ProgressBar::new(records.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut enriched = Vec::with_capacity(records.len());
    for record in records {
        let address = record.address(&settings.state);
        let upstream = !geocoder.is_cached(&address);
        let coordinates = geocoder.geocode(&address).await;
        match coordinates {
            Some(_) => debug!("Geocoded: {}", address),
            None => info!("Failed to geocode: {}", address),
        }
        enriched.push(EnrichedRecord::new(record, coordinates));
        pb.inc(1);

        if upstream && !settings.delay.is_zero() {
            tokio::time::sleep(settings.delay).await;
        }
    }

    pb.finish_and_clear();
    enriched
}

pub struct Summary {
    pub raw: Option<usize>,
    pub enriched: Option<(usize, usize)>,
    pub cached: usize,
}

/// Counts over whatever files exist in the data directory.
pub fn summarize(files: &DataFiles) -> Result<Summary, PipelineError> {
    let raw = match store::load_raw(&files.raw) {
        Ok(records) => Some(records.len()),
        Err(PipelineError::MissingInput { .. }) => None,
        Err(e) => return Err(e),
    };
    let enriched = match store::load_enriched(&files.enriched) {
        Ok(records) => {
            let located = records.iter().filter(|r| r.is_located()).count();
            Some((records.len(), located))
        }
        Err(PipelineError::MissingInput { .. }) => None,
        Err(e) => return Err(e),
    };
    Ok(Summary {
        raw,
        enriched,
        cached: GeocodeCache::load(&files.cache).len(),
    })
}
