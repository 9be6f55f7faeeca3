use metrics::counter;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::apis::platform_a::PlatformAAdapter;
use crate::apis::platform_b::{PlatformBAdapter, RawShowtime, SeatLayoutApi, VenueShows};
use crate::config::{CityEntry, Config};
use crate::pipeline::processing::fallback::{
    estimate_sold_out, estimate_unknown, fetch_layout_with_retry, Estimate, FetchFailure,
    LayoutOutcome, ScreenCapacityCache,
};
use crate::pipeline::processing::normalize::{apply_fingerprint, build_fingerprint};
use crate::pipeline::processing::seat_layout::decode_seat_layout;
use crate::types::{ShowCounts, ShowRecord, Source};

/// Shared mutable state for one scrape run: cross-task session dedup, the
/// escalating politeness delay, and the cancellation flag.
#[derive(Debug, Default)]
pub struct RunState {
    seen_platform_a: Mutex<HashSet<String>>,
    seen_platform_b: Mutex<HashSet<String>>,
    extra_delay_ms: AtomicU64,
    cancelled: AtomicBool,
}

impl RunState {
    /// Returns false when the session id was already processed this run.
    /// Cities can share venues near state borders, so listings overlap.
    pub fn mark_processed(&self, source: Source, session_id: &str) -> bool {
        let seen = match source {
            Source::PlatformA => &self.seen_platform_a,
            Source::PlatformB => &self.seen_platform_b,
        };
        seen.lock()
            .map(|mut set| set.insert(session_id.to_string()))
            .unwrap_or(true)
    }

    /// Permanently stretches the inter-request delay after a show exhausts
    /// its rate-limit retries.
    pub fn escalate_delay(&self, ms: u64) {
        self.extra_delay_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn extra_delay_ms(&self) -> u64 {
        self.extra_delay_ms.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

async fn polite_sleep(base_ms: u64, run_state: &RunState) {
    let jitter = rand::thread_rng().gen_range(0..250);
    let total = base_ms + run_state.extra_delay_ms() + jitter;
    tokio::time::sleep(Duration::from_millis(total)).await;
}

/// Scrapes every (state, city) target on the primary platform, a handful of
/// cities at a time. A failed city logs and yields nothing; the run goes on.
pub async fn scrape_platform_a(
    adapter: Arc<PlatformAAdapter>,
    targets: Vec<(String, CityEntry)>,
    show_date: String,
    config: &Config,
    run_state: Arc<RunState>,
) -> Vec<ShowRecord> {
    let semaphore = Arc::new(Semaphore::new(config.run.max_workers));
    let sleep_ms = config.run.sleep_ms;

    let mut handles = Vec::with_capacity(targets.len());
    for (state, city) in targets {
        let adapter = Arc::clone(&adapter);
        let semaphore = Arc::clone(&semaphore);
        let run_state = Arc::clone(&run_state);
        let show_date = show_date.clone();

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return Vec::new();
            };
            if run_state.is_cancelled() {
                return Vec::new();
            }
            polite_sleep(sleep_ms, &run_state).await;
            match adapter.fetch_city(&state, &city, &show_date).await {
                Ok(records) => records
                    .into_iter()
                    .filter(|r| run_state.mark_processed(Source::PlatformA, &r.session_id))
                    .collect(),
                Err(e) => {
                    error!(state = %state, city = %city.name, error = %e, "Platform A city scrape failed");
                    Vec::new()
                }
            }
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(mut city_records) => records.append(&mut city_records),
            Err(e) => error!(error = %e, "Platform A scrape task panicked"),
        }
    }
    counter!("boxoffice_shows_scraped", "source" => "platform_a").increment(records.len() as u64);
    info!(shows = records.len(), "Platform A scrape complete");
    records
}

/// Scrapes every target city on the secondary platform. Listings are cheap
/// and fetched per city up front; the expensive part is one seat-layout
/// transaction per show, spread over a few concurrent venue workers.
pub async fn scrape_platform_b(
    adapter: Arc<PlatformBAdapter>,
    seat_api: Arc<dyn SeatLayoutApi>,
    targets: Vec<(String, CityEntry)>,
    show_date: String,
    config: &Config,
    run_state: Arc<RunState>,
) -> Vec<ShowRecord> {
    let key: Arc<Vec<u8>> = Arc::new(config.platform_b.seat_layout_key.clone().into_bytes());
    let semaphore = Arc::new(Semaphore::new(config.run.max_workers));

    let mut handles = Vec::new();
    for (state, city) in targets {
        if run_state.is_cancelled() {
            break;
        }
        let venues = match adapter.fetch_city_listing(&city, &show_date).await {
            Ok(venues) => venues,
            Err(e) => {
                error!(state = %state, city = %city.name, error = %e, "Platform B listing fetch failed");
                continue;
            }
        };
        polite_sleep(config.run.sleep_ms, &run_state).await;

        for venue in venues {
            let seat_api = Arc::clone(&seat_api);
            let semaphore = Arc::clone(&semaphore);
            let run_state = Arc::clone(&run_state);
            let key = Arc::clone(&key);
            let config = config.clone();
            let state = state.clone();
            let city_name = city.name.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                scrape_venue(
                    seat_api.as_ref(),
                    &run_state,
                    &config,
                    &state,
                    &city_name,
                    venue,
                    &key,
                )
                .await
            }));
        }
    }

    let mut records = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(mut venue_records) => records.append(&mut venue_records),
            Err(e) => error!(error = %e, "Platform B venue task panicked"),
        }
    }
    counter!("boxoffice_shows_scraped", "source" => "platform_b").increment(records.len() as u64);
    info!(shows = records.len(), "Platform B scrape complete");
    records
}

/// Works through one venue's shows. Available shows go first so their
/// decoded capacities seed the screen cache before any sold-out sibling
/// needs an estimate.
async fn scrape_venue(
    seat_api: &dyn SeatLayoutApi,
    run_state: &RunState,
    config: &Config,
    state: &str,
    city: &str,
    mut venue: VenueShows,
    key: &[u8],
) -> Vec<ShowRecord> {
    let mut cache = ScreenCapacityCache::default();
    let mut shows = std::mem::take(&mut venue.shows);
    shows.sort_by_key(|s| s.avail_status != "1");

    let mut records = Vec::new();
    for show in shows {
        if run_state.is_cancelled() {
            break;
        }
        if !run_state.mark_processed(Source::PlatformB, &show.session_id) {
            continue;
        }
        if show.price_map.is_empty() {
            debug!(venue = %venue.venue_name, session = %show.session_id, "Show without price data skipped");
            continue;
        }
        polite_sleep(config.run.sleep_ms, run_state).await;

        match scrape_show(
            seat_api,
            run_state,
            config,
            state,
            city,
            &venue,
            &show,
            &mut cache,
            key,
        )
        .await
        {
            Some(record) => records.push(record),
            None => {
                counter!("boxoffice_shows_skipped", "source" => "platform_b").increment(1);
            }
        }
    }
    records
}

/// One show: fetch the layout, decode it, or estimate. Returns `None` only
/// for rate-limited shows, which are dropped rather than guessed at.
#[allow(clippy::too_many_arguments)]
async fn scrape_show(
    seat_api: &dyn SeatLayoutApi,
    run_state: &RunState,
    config: &Config,
    state: &str,
    city: &str,
    venue: &VenueShows,
    show: &RawShowtime,
    cache: &mut ScreenCapacityCache,
    key: &[u8],
) -> Option<ShowRecord> {
    let outcome =
        fetch_layout_with_retry(seat_api, &venue.venue_code, &show.session_id, &config.rate_limit)
            .await;

    match outcome {
        LayoutOutcome::Payload(payload) => {
            match decode_seat_layout(&payload, key, &show.price_map) {
                Ok(collection) => {
                    if collection.total_tickets > 0 {
                        cache.record(&show.screen, collection.total_tickets);
                    }
                    let mut record = base_record(state, city, venue, show);
                    record.apply_counts(ShowCounts {
                        total_tickets: collection.total_tickets as i64,
                        booked_tickets: collection.booked_tickets as i64,
                        total_gross: collection.total_gross,
                        booked_gross: collection.booked_gross,
                    });
                    let pairs = collection.category_price_pairs(&show.price_map);
                    let fp = build_fingerprint(&pairs, &collection.seats_by_category);
                    record.seat_category_map = collection.seats_by_category;
                    apply_fingerprint(&mut record, fp);
                    Some(record)
                }
                Err(e) => {
                    warn!(
                        venue = %venue.venue_name,
                        session = %show.session_id,
                        error = %e,
                        "Undecodable seat layout; estimating"
                    );
                    Some(estimated_record(
                        state,
                        city,
                        venue,
                        show,
                        estimate_unknown(&config.fallback, &show.price_map),
                    ))
                }
            }
        }
        LayoutOutcome::Failed(FetchFailure::SoldOut) => {
            let estimate = estimate_sold_out(
                seat_api,
                cache,
                &config.fallback,
                &venue.venue_code,
                &show.screen,
                &show.session_id,
                &show.price_map,
                key,
            )
            .await
            .ok()?;
            Some(estimated_record(state, city, venue, show, estimate))
        }
        LayoutOutcome::Failed(FetchFailure::RateLimited) => {
            run_state.escalate_delay(config.rate_limit.escalation_ms);
            warn!(
                venue = %venue.venue_name,
                session = %show.session_id,
                extra_delay_ms = run_state.extra_delay_ms(),
                "Rate limit retries exhausted; show skipped and delay escalated"
            );
            None
        }
        LayoutOutcome::Failed(FetchFailure::Other(reason)) => {
            warn!(
                venue = %venue.venue_name,
                session = %show.session_id,
                reason = %reason,
                "Seat layout unavailable; estimating"
            );
            Some(estimated_record(
                state,
                city,
                venue,
                show,
                estimate_unknown(&config.fallback, &show.price_map),
            ))
        }
    }
}

fn base_record(state: &str, city: &str, venue: &VenueShows, show: &RawShowtime) -> ShowRecord {
    ShowRecord::new(
        Source::PlatformB,
        show.session_id.clone(),
        state,
        city,
        venue.venue_name.clone(),
        show.show_time.clone(),
    )
}

fn estimated_record(
    state: &str,
    city: &str,
    venue: &VenueShows,
    show: &RawShowtime,
    estimate: Estimate,
) -> ShowRecord {
    counter!("boxoffice_shows_estimated", "source" => "platform_b").increment(1);
    let mut record = base_record(state, city, venue, show);
    record.is_fallback = true;
    record.apply_counts(estimate.counts);
    let fp = build_fingerprint(&estimate.category_pairs, &estimate.seat_category_map);
    record.seat_category_map = estimate.seat_category_map;
    apply_fingerprint(&mut record, fp);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::platform_b::SeatLayoutReply;
    use crate::config::{
        FallbackConfig, PlatformAConfig, PlatformBConfig, RateLimitConfig, ReconcileConfig,
        RunConfig,
    };
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::AtomicUsize;

    struct RateLimitedApi {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SeatLayoutApi for RateLimitedApi {
        async fn fetch_layout(
            &self,
            _venue: &str,
            _session: &str,
        ) -> crate::error::Result<SeatLayoutReply> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(SeatLayoutReply {
                success: false,
                payload: None,
                error: Some("Rate limit reached".into()),
            })
        }
    }

    fn test_config() -> Config {
        Config {
            run: RunConfig {
                max_workers: 1,
                sleep_ms: 0,
                request_timeout_secs: 5,
            },
            rate_limit: RateLimitConfig {
                backoff_secs: 0,
                max_retries: 1,
                escalation_ms: 500,
            },
            reconcile: ReconcileConfig::default(),
            fallback: FallbackConfig::default(),
            platform_a: PlatformAConfig {
                cities_config: String::new(),
                listing_url_template: String::new(),
            },
            platform_b: PlatformBConfig {
                cities_config: String::new(),
                listing_url_template: String::new(),
                seat_layout_endpoint: String::new(),
                seat_layout_key: "0123456789abcdef0123456789abcdef".into(),
                utc_offset_minutes: 330,
            },
            city_aliases: HashMap::new(),
        }
    }

    fn venue_with_one_show() -> VenueShows {
        VenueShows {
            venue_name: "City Cinemas".into(),
            venue_code: "CITY".into(),
            shows: vec![RawShowtime {
                session_id: "7001".into(),
                show_time: "2026-02-09T13:30:00Z".into(),
                screen: "Screen 1".into(),
                avail_status: "1".into(),
                price_map: BTreeMap::from([("CLUB".to_string(), 150_00)]),
            }],
        }
    }

    #[tokio::test]
    async fn rate_limited_show_is_dropped_not_fabricated() {
        let api = RateLimitedApi {
            calls: AtomicUsize::new(0),
        };
        let run_state = RunState::default();
        let config = test_config();

        let records = scrape_venue(
            &api,
            &run_state,
            &config,
            "Telangana",
            "Hyderabad",
            venue_with_one_show(),
            b"0123456789abcdef0123456789abcdef",
        )
        .await;

        // no record at all: a rate-limited show must never be estimated
        assert!(records.is_empty());
        // and the politeness delay rose for the rest of the run
        assert_eq!(run_state.extra_delay_ms(), 500);
        // initial attempt plus one retry
        assert_eq!(api.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn run_state_dedups_per_source() {
        let state = RunState::default();
        assert!(state.mark_processed(Source::PlatformA, "s1"));
        assert!(!state.mark_processed(Source::PlatformA, "s1"));
        // same id on the other platform is a different show
        assert!(state.mark_processed(Source::PlatformB, "s1"));
    }

    #[test]
    fn delay_escalation_accumulates() {
        let state = RunState::default();
        assert_eq!(state.extra_delay_ms(), 0);
        state.escalate_delay(2000);
        state.escalate_delay(2000);
        assert_eq!(state.extra_delay_ms(), 4000);
    }

    #[test]
    fn cancellation_is_sticky() {
        let state = RunState::default();
        assert!(!state.is_cancelled());
        state.cancel();
        assert!(state.is_cancelled());
    }
}
