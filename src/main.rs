use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use boxoffice_scraper::apis::platform_a::PlatformAAdapter;
use boxoffice_scraper::apis::platform_b::{HttpSeatLayoutApi, PlatformBAdapter, SeatLayoutApi};
use boxoffice_scraper::config::{load_city_registry, resolve_cities, CityEntry, Config};
use boxoffice_scraper::logging::init_logging;
use boxoffice_scraper::pipeline::ingestion::{scrape_platform_a, scrape_platform_b, RunState};
use boxoffice_scraper::pipeline::processing::normalize::Normalizer;
use boxoffice_scraper::pipeline::processing::reconcile::Reconciler;
use boxoffice_scraper::reporting::{parse_reference_url, write_reports};
use boxoffice_scraper::types::ShowRecord;

#[derive(Parser)]
#[command(name = "boxoffice-scraper")]
#[command(about = "Cross-platform movie ticket sales scraper and reconciler")]
struct Cli {
    /// Path to the runtime configuration file
    #[arg(long, default_value = "config.toml", global = true)]
    config: String,

    /// Directory for snapshots and report sheets
    #[arg(long, default_value = "output", global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape both platforms and write per-platform JSON snapshots
    Scrape {
        /// Show date to scrape, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
        /// Listing URL to derive the show date from instead of --date
        #[arg(long)]
        url: Option<String>,
        /// States to scrape, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        states: Vec<String>,
    },
    /// Reconcile two existing snapshots into merged output and CSV reports
    Merge {
        /// Show date of the snapshots to merge, YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// Listing URL, used for the report's movie title
        #[arg(long)]
        url: Option<String>,
    },
    /// Scrape, reconcile and report in one pass
    Run {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_delimiter = ',', required = true)]
        states: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let out_dir = PathBuf::from(&cli.output);

    match cli.command {
        Commands::Scrape { date, url, states } => {
            let date = resolve_date(date, url.as_deref())?;
            let (primary, secondary) = scrape_both(&config, &date, &states).await?;
            write_snapshot(&out_dir, "platform_a", &date, &primary)?;
            write_snapshot(&out_dir, "platform_b", &date, &secondary)?;
        }
        Commands::Merge { date, url } => {
            parse_date(&date)?;
            let primary = read_snapshot(&out_dir, "platform_a", &date)?;
            let secondary = read_snapshot(&out_dir, "platform_b", &date)?;
            merge_and_report(&config, &out_dir, &date, movie_label(url.as_deref()), primary, secondary)?;
        }
        Commands::Run { date, url, states } => {
            let date = resolve_date(date, url.as_deref())?;
            let (primary, secondary) = scrape_both(&config, &date, &states).await?;
            write_snapshot(&out_dir, "platform_a", &date, &primary)?;
            write_snapshot(&out_dir, "platform_b", &date, &secondary)?;
            merge_and_report(&config, &out_dir, &date, movie_label(url.as_deref()), primary, secondary)?;
        }
    }
    Ok(())
}

fn resolve_date(date: Option<String>, url: Option<&str>) -> anyhow::Result<String> {
    let date = match (date, url) {
        (Some(date), _) => date,
        (None, Some(url)) => {
            parse_reference_url(url)
                .ok_or_else(|| anyhow!("could not derive a show date from '{}'", url))?
                .date
        }
        (None, None) => return Err(anyhow!("either --date or --url is required")),
    };
    parse_date(&date)?;
    Ok(date)
}

fn parse_date(date: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid show date '{}', expected YYYY-MM-DD", date))
}

/// Scrapes the primary platform first, then the secondary. Ctrl-C flips the
/// shared cancellation flag so whatever was already collected still flows to
/// the snapshots and reports.
async fn scrape_both(
    config: &Config,
    date: &str,
    states: &[String],
) -> anyhow::Result<(Vec<ShowRecord>, Vec<ShowRecord>)> {
    let show_date = parse_date(date)?;

    let registry_a = load_city_registry(&config.platform_a.cities_config)?;
    let registry_b = load_city_registry(&config.platform_b.cities_config)?;
    let targets_a = owned_targets(resolve_cities(&registry_a, states)?);
    let targets_b = owned_targets(resolve_cities(&registry_b, states)?);

    let run_state = Arc::new(RunState::default());
    {
        let run_state = Arc::clone(&run_state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight work and reporting partial data");
                run_state.cancel();
            }
        });
    }

    let adapter_a = Arc::new(PlatformAAdapter::new(
        &config.platform_a,
        config.run.request_timeout_secs,
    )?);
    let mut primary = scrape_platform_a(
        adapter_a,
        targets_a,
        date.to_string(),
        config,
        Arc::clone(&run_state),
    )
    .await;

    let adapter_b = Arc::new(PlatformBAdapter::new(
        &config.platform_b,
        config.run.request_timeout_secs,
    )?);
    let seat_api: Arc<dyn SeatLayoutApi> = Arc::new(HttpSeatLayoutApi::new(
        &config.platform_b,
        config.run.request_timeout_secs,
    )?);
    let mut secondary = scrape_platform_b(
        adapter_b,
        seat_api,
        targets_b,
        date.to_string(),
        config,
        run_state,
    )
    .await;

    let mut normalizer = Normalizer::new(
        show_date,
        config.platform_b.utc_offset_minutes,
        config.city_aliases.clone(),
    );
    normalizer.normalize_all(&mut primary);
    normalizer.normalize_all(&mut secondary);
    if normalizer.dropped_from_matching > 0 {
        warn!(
            dropped = normalizer.dropped_from_matching,
            "Some records have unparseable show times and will not cross-match"
        );
    }
    Ok((primary, secondary))
}

fn owned_targets(targets: Vec<(&str, &CityEntry)>) -> Vec<(String, CityEntry)> {
    targets
        .into_iter()
        .map(|(state, city)| (state.to_string(), city.clone()))
        .collect()
}

fn movie_label(url: Option<&str>) -> Option<String> {
    url.and_then(parse_reference_url).map(|meta| meta.movie)
}

fn merge_and_report(
    config: &Config,
    out_dir: &Path,
    date: &str,
    movie: Option<String>,
    primary: Vec<ShowRecord>,
    secondary: Vec<ShowRecord>,
) -> anyhow::Result<()> {
    let reconciler = Reconciler::new(config.reconcile.clone());
    let merged = reconciler.reconcile(primary, secondary);
    write_snapshot(out_dir, "merged", date, &merged)?;
    let sheets = write_reports(&merged, out_dir, date, movie.as_deref())?;
    for sheet in &sheets {
        info!(path = %sheet.display(), "Report sheet written");
    }
    Ok(())
}

fn snapshot_path(out_dir: &Path, name: &str, date: &str) -> PathBuf {
    out_dir.join(format!("{}_{}.json", name, date))
}

fn write_snapshot(
    out_dir: &Path,
    name: &str,
    date: &str,
    records: &[ShowRecord],
) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)?;
    let path = snapshot_path(out_dir, name, date);
    let file = fs::File::create(&path)?;
    serde_json::to_writer_pretty(file, records)?;
    info!(path = %path.display(), records = records.len(), "Snapshot written");
    Ok(())
}

fn read_snapshot(out_dir: &Path, name: &str, date: &str) -> anyhow::Result<Vec<ShowRecord>> {
    let path = snapshot_path(out_dir, name, date);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("missing snapshot '{}'; run scrape first", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}
