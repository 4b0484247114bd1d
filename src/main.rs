mod browser;
mod config;
mod crawler;
mod error;
mod geocode;
mod parser;
mod pipeline;
mod record;
mod store;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};

use config::{CrawlSettings, GeocodeSettings};
use geocode::CensusLookup;
use store::DataFiles;

#[derive(Parser)]
#[command(
    name = "disp_scraper",
    about = "Active asbestos project scraper and geocoder for the NY DOL report"
)]
struct Cli {
    /// Directory holding raw_output.json, output.json and geocode_cache.json
    #[arg(long, global = true, default_value = store::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the report and write the raw dataset
    Crawl(CrawlArgs),
    /// Geocode the raw dataset and write the enriched dataset
    Geocode(GeocodeArgs),
    /// Crawl + geocode in one pipeline
    Run {
        #[command(flatten)]
        crawl: CrawlArgs,
        #[command(flatten)]
        geocode: GeocodeArgs,
    },
    /// Show dataset and cache counts
    Summary,
}

#[derive(Args)]
struct CrawlArgs {
    /// Report URL
    #[arg(long, default_value = config::REPORT_URL, hide_default_value = true)]
    url: String,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
    /// Hard deadline for the whole crawl
    #[arg(long, default_value_t = config::CRAWL_DEADLINE_SECS)]
    deadline_secs: u64,
    /// Wait for data after each "next page" click
    #[arg(long, default_value_t = config::PAGE_TIMEOUT_SECS)]
    page_timeout_secs: u64,
    /// Pause before looking for the "next page" control
    #[arg(long, default_value_t = config::SETTLE_SECS)]
    settle_secs: u64,
}

impl From<CrawlArgs> for CrawlSettings {
    fn from(args: CrawlArgs) -> Self {
        CrawlSettings {
            url: args.url,
            headful: args.headful,
            deadline: Duration::from_secs(args.deadline_secs),
            page_timeout: Duration::from_secs(args.page_timeout_secs),
            settle: Duration::from_secs(args.settle_secs),
        }
    }
}

#[derive(Args)]
struct GeocodeArgs {
    /// Minimum delay between geocoder requests
    #[arg(long, default_value_t = config::GEOCODE_DELAY_MS)]
    delay_ms: u64,
    /// State appended to every address
    #[arg(long, default_value = config::STATE_SUFFIX)]
    state: String,
}

impl From<GeocodeArgs> for GeocodeSettings {
    fn from(args: GeocodeArgs) -> Self {
        GeocodeSettings {
            delay: Duration::from_millis(args.delay_ms),
            state: args.state,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let files = DataFiles::in_dir(&cli.data_dir);

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl(args.into(), &files).await,
        Commands::Geocode(args) => run_geocode(args.into(), &files).await,
        Commands::Run { crawl, geocode } => {
            run_crawl(crawl.into(), &files).await?;
            run_geocode(geocode.into(), &files).await
        }
        Commands::Summary => {
            let s = pipeline::summarize(&files)?;
            match s.raw {
                Some(n) => println!("Raw:       {}", n),
                None => println!("Raw:       (not crawled)"),
            }
            match s.enriched {
                Some((total, located)) => {
                    println!("Enriched:  {}", total);
                    println!("Located:   {}", located);
                    println!("Missing:   {}", total - located);
                }
                None => println!("Enriched:  (not geocoded)"),
            }
            println!("Cached:    {}", s.cached);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_crawl(settings: CrawlSettings, files: &DataFiles) -> anyhow::Result<()> {
    println!("Crawling report (deadline {})...", format_duration(settings.deadline));
    let stats = pipeline::crawl(&settings, files).await?;
    println!(
        "Found {} rows over {} pages. Saved to {}",
        stats.rows,
        stats.pages,
        files.raw.display()
    );
    Ok(())
}

async fn run_geocode(settings: GeocodeSettings, files: &DataFiles) -> anyhow::Result<()> {
    let lookup = CensusLookup::new()?;
    let stats = pipeline::geocode(&settings, files, Box::new(lookup)).await?;
    println!(
        "Geocoded {}/{} records ({} upstream calls, {} cached addresses). Saved to {}",
        stats.located,
        stats.total,
        stats.network_calls,
        stats.cached,
        files.enriched.display()
    );
    Ok(())
}

/// Short elapsed-time label: `4.2s`, `12m05s`, `1h02m09s`.
fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
    match (hours, minutes) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, _) => format!("{}m{:02}s", minutes, seconds),
        _ => format!("{}h{:02}m{:02}s", hours, minutes, seconds),
    }
}
