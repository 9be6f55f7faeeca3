use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::apis::platform_b::SeatLayoutApi;
use crate::config::{FallbackConfig, RateLimitConfig};
use crate::error::Result;
use crate::pipeline::processing::seat_layout::decode_seat_layout;
use crate::types::{Cents, ShowCounts};

/// Why a seat-layout fetch produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    RateLimited,
    SoldOut,
    Other(String),
}

/// The platform signals failure modes only through free-text exception
/// messages, so classification is a substring check.
pub fn classify_failure(error: Option<&str>) -> FetchFailure {
    let text = error.unwrap_or_default();
    let lower = text.to_lowercase();
    if lower.contains("rate limit") {
        FetchFailure::RateLimited
    } else if lower.contains("sold out") {
        FetchFailure::SoldOut
    } else {
        FetchFailure::Other(text.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum LayoutOutcome {
    Payload(String),
    Failed(FetchFailure),
}

/// Fetches one show's seat layout, sleeping and retrying on rate limits.
/// Transport errors are folded into `Other` so one dead show never aborts a
/// venue sweep.
pub async fn fetch_layout_with_retry(
    api: &dyn SeatLayoutApi,
    venue_code: &str,
    session_id: &str,
    rate_limit: &RateLimitConfig,
) -> LayoutOutcome {
    let mut attempt = 0u32;
    loop {
        let reply = match api.fetch_layout(venue_code, session_id).await {
            Ok(reply) => reply,
            Err(e) => return LayoutOutcome::Failed(FetchFailure::Other(e.to_string())),
        };

        if reply.success {
            if let Some(payload) = reply.payload {
                return LayoutOutcome::Payload(payload);
            }
            return LayoutOutcome::Failed(FetchFailure::Other("empty payload".into()));
        }

        let failure = classify_failure(reply.error.as_deref());
        if failure == FetchFailure::RateLimited && attempt < rate_limit.max_retries {
            attempt += 1;
            warn!(
                venue = venue_code,
                session = session_id,
                attempt,
                backoff_secs = rate_limit.backoff_secs,
                "Rate limited; backing off before retry"
            );
            tokio::time::sleep(Duration::from_secs(rate_limit.backoff_secs)).await;
            continue;
        }
        return LayoutOutcome::Failed(failure);
    }
}

/// Known screen capacities within one venue, keyed by screen label. Shows on
/// the same screen share a hall, so a capacity decoded from any sibling show
/// is the best estimate for a sold-out one.
#[derive(Debug, Default)]
pub struct ScreenCapacityCache {
    capacities: HashMap<String, u32>,
}

impl ScreenCapacityCache {
    pub fn record(&mut self, screen: &str, capacity: u32) {
        if capacity > 0 {
            self.capacities.insert(screen.to_string(), capacity);
        }
    }

    pub fn get(&self, screen: &str) -> Option<u32> {
        self.capacities.get(screen).copied()
    }
}

/// An estimated observation standing in for an unreadable seat layout.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub counts: ShowCounts,
    pub seat_category_map: BTreeMap<String, u32>,
    /// Zero-count (price, seats) pairs; the price set must survive into the
    /// fingerprint so estimated shows remain matchable by price.
    pub category_pairs: Vec<(Cents, u32)>,
}

/// Zero-count pairs keep the price-set identity without inventing a per-price
/// seat distribution. Sorted by price, not by category name.
fn zero_count_pairs(price_map: &BTreeMap<String, Cents>) -> Vec<(Cents, u32)> {
    let mut pairs: Vec<(Cents, u32)> = price_map.values().map(|&price| (price, 0)).collect();
    pairs.sort_unstable();
    pairs
}

fn max_price(price_map: &BTreeMap<String, Cents>) -> Cents {
    price_map.values().copied().max().unwrap_or(0)
}

/// Estimates a sold-out show. Recovery order: the venue's screen-capacity
/// cache first, then probing adjacent session ids for a decodable sibling
/// layout, finally the configured default capacity. A sold-out show is
/// assumed 100% occupied at whatever capacity was recovered.
#[allow(clippy::too_many_arguments)]
pub async fn estimate_sold_out(
    api: &dyn SeatLayoutApi,
    cache: &mut ScreenCapacityCache,
    fallback: &FallbackConfig,
    venue_code: &str,
    screen: &str,
    session_id: &str,
    price_map: &BTreeMap<String, Cents>,
    key: &[u8],
) -> Result<Estimate> {
    if let Some(capacity) = cache.get(screen) {
        debug!(venue = venue_code, screen, capacity, "Sold-out capacity from screen cache");
        return Ok(full_house(capacity, price_map));
    }

    if let Ok(sid) = session_id.parse::<i64>() {
        // later sessions on the same screen share its capacity
        for offset in (1..=fallback.probe_offset_range as i64).rev() {
            let probe = (sid + offset).to_string();
            let Ok(reply) = api.fetch_layout(venue_code, &probe).await else {
                continue;
            };
            if !reply.success {
                continue;
            }
            let Some(payload) = reply.payload else {
                continue;
            };
            let Ok(collection) = decode_seat_layout(&payload, key, price_map) else {
                continue;
            };
            if collection.total_tickets > 0 {
                info!(
                    venue = venue_code,
                    session = session_id,
                    probed = %probe,
                    capacity = collection.total_tickets,
                    "Recovered sold-out capacity from adjacent session"
                );
                cache.record(screen, collection.total_tickets);
                return Ok(full_house(collection.total_tickets, price_map));
            }
        }
    }

    warn!(
        venue = venue_code,
        session = session_id,
        capacity = fallback.default_capacity,
        "Sold-out capacity unrecoverable; using default"
    );
    Ok(full_house(fallback.default_capacity, price_map))
}

/// Sold out means every seat booked; gross is capacity at the show's top
/// price tier since premium tiers sell out last.
fn full_house(capacity: u32, price_map: &BTreeMap<String, Cents>) -> Estimate {
    let gross = capacity as Cents * max_price(price_map);
    Estimate {
        counts: ShowCounts {
            total_tickets: capacity as i64,
            booked_tickets: capacity as i64,
            total_gross: gross,
            booked_gross: gross,
        },
        seat_category_map: BTreeMap::new(),
        category_pairs: zero_count_pairs(price_map),
    }
}

/// Estimates a show whose layout failed for an unclassified reason: assume
/// half the default capacity booked at the top price.
pub fn estimate_unknown(
    fallback: &FallbackConfig,
    price_map: &BTreeMap<String, Cents>,
) -> Estimate {
    let capacity = fallback.default_capacity;
    let booked = capacity / 2;
    let price = max_price(price_map);
    Estimate {
        counts: ShowCounts {
            total_tickets: capacity as i64,
            booked_tickets: booked as i64,
            total_gross: capacity as Cents * price,
            booked_gross: booked as Cents * price,
        },
        seat_category_map: BTreeMap::new(),
        category_pairs: zero_count_pairs(price_map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::platform_b::{SeatLayoutApi, SeatLayoutReply};
    use crate::error::Result;
    use std::sync::Mutex;

    struct MockApi {
        /// session id -> scripted reply
        replies: HashMap<String, SeatLayoutReply>,
        calls: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn new(replies: Vec<(&str, SeatLayoutReply)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn sold_out() -> SeatLayoutReply {
            SeatLayoutReply {
                success: false,
                payload: None,
                error: Some("Show is SOLD OUT".into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SeatLayoutApi for MockApi {
        async fn fetch_layout(&self, _venue: &str, session_id: &str) -> Result<SeatLayoutReply> {
            self.calls.lock().unwrap().push(session_id.to_string());
            Ok(self
                .replies
                .get(session_id)
                .cloned()
                .unwrap_or(Self::sold_out()))
        }
    }

    fn price_map() -> BTreeMap<String, Cents> {
        BTreeMap::from([("CLUB".to_string(), 200_00), ("GOLD".to_string(), 150_00)])
    }

    fn config() -> FallbackConfig {
        FallbackConfig {
            default_capacity: 400,
            probe_offset_range: 3,
        }
    }

    #[test]
    fn classification_is_case_insensitive_substring() {
        assert_eq!(
            classify_failure(Some("Request RATE LIMIT exceeded")),
            FetchFailure::RateLimited
        );
        assert_eq!(
            classify_failure(Some("show is Sold Out")),
            FetchFailure::SoldOut
        );
        assert_eq!(
            classify_failure(Some("boom")),
            FetchFailure::Other("boom".into())
        );
        assert_eq!(classify_failure(None), FetchFailure::Other(String::new()));
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_probing() {
        let api = MockApi::new(vec![]);
        let mut cache = ScreenCapacityCache::default();
        cache.record("Screen 1", 180);

        let est = estimate_sold_out(
            &api,
            &mut cache,
            &config(),
            "CITY",
            "Screen 1",
            "5000",
            &price_map(),
            b"0123456789abcdef0123456789abcdef",
        )
        .await
        .unwrap();

        assert!(api.calls.lock().unwrap().is_empty());
        assert_eq!(est.counts.total_tickets, 180);
        assert_eq!(est.counts.booked_tickets, 180);
        assert_eq!(est.counts.booked_gross, 180 * 200_00);
        // price identity survives with zero counts
        assert_eq!(est.category_pairs, vec![(150_00, 0), (200_00, 0)]);
    }

    #[tokio::test]
    async fn unrecoverable_sold_out_uses_default_capacity() {
        let api = MockApi::new(vec![]);
        let mut cache = ScreenCapacityCache::default();

        let est = estimate_sold_out(
            &api,
            &mut cache,
            &config(),
            "CITY",
            "Screen 1",
            "5000",
            &price_map(),
            b"0123456789abcdef0123456789abcdef",
        )
        .await
        .unwrap();

        // probes walk offsets +3, +2, +1 above the session id
        assert_eq!(
            *api.calls.lock().unwrap(),
            vec!["5003".to_string(), "5002".to_string(), "5001".to_string()]
        );
        assert_eq!(est.counts.total_tickets, 400);
        assert_eq!(est.counts.booked_gross, 400 * 200_00);
    }

    #[tokio::test]
    async fn non_numeric_session_id_skips_probing() {
        let api = MockApi::new(vec![]);
        let mut cache = ScreenCapacityCache::default();
        let est = estimate_sold_out(
            &api,
            &mut cache,
            &config(),
            "CITY",
            "Screen 1",
            "ABC-1",
            &price_map(),
            b"0123456789abcdef0123456789abcdef",
        )
        .await
        .unwrap();
        assert!(api.calls.lock().unwrap().is_empty());
        assert_eq!(est.counts.total_tickets, 400);
    }

    #[tokio::test]
    async fn rate_limit_retries_then_gives_up() {
        let api = MockApi::new(vec![(
            "7001",
            SeatLayoutReply {
                success: false,
                payload: None,
                error: Some("rate limit".into()),
            },
        )]);
        let rate_limit = RateLimitConfig {
            backoff_secs: 0,
            max_retries: 2,
            escalation_ms: 0,
        };

        let outcome = fetch_layout_with_retry(&api, "CITY", "7001", &rate_limit).await;
        assert!(matches!(
            outcome,
            LayoutOutcome::Failed(FetchFailure::RateLimited)
        ));
        // initial attempt plus two retries
        assert_eq!(api.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn successful_fetch_returns_payload() {
        let api = MockApi::new(vec![(
            "7002",
            SeatLayoutReply {
                success: true,
                payload: Some("abc==".into()),
                error: None,
            },
        )]);
        let rate_limit = RateLimitConfig::default();
        let outcome = fetch_layout_with_retry(&api, "CITY", "7002", &rate_limit).await;
        assert!(matches!(outcome, LayoutOutcome::Payload(p) if p == "abc=="));
    }

    #[test]
    fn unknown_failure_estimates_half_house() {
        let est = estimate_unknown(&config(), &price_map());
        assert_eq!(est.counts.total_tickets, 400);
        assert_eq!(est.counts.booked_tickets, 200);
        assert_eq!(est.counts.total_gross, 400 * 200_00);
        assert_eq!(est.counts.booked_gross, 200 * 200_00);
    }
}
