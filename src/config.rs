use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;

use crate::constants::*;
use crate::error::{Result, ScraperError};

/// Top-level runtime configuration, loaded once before any scraping starts.
/// A missing or unparseable file is fatal to the run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    pub platform_a: PlatformAConfig,
    pub platform_b: PlatformBConfig,
    /// Cross-platform city-name reconciliation: raw scraped name ->
    /// canonical reporting name. The same city may be spelled differently
    /// per platform and per state.
    #[serde(default)]
    pub city_aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_workers: usize,
    pub sleep_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            sleep_ms: DEFAULT_SLEEP_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backoff_secs: u64,
    pub max_retries: u32,
    /// Added to the inter-request delay for the rest of the run once a show
    /// exhausts its retries.
    pub escalation_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF_SECS,
            max_retries: DEFAULT_RATE_LIMIT_RETRIES,
            escalation_ms: DEFAULT_RATE_LIMIT_ESCALATION_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Per-price seat-count tolerance for the signature strategy.
    pub seat_tolerance: u32,
    /// Minimum venue-name similarity for a signature match.
    pub signature_similarity_threshold: f64,
    /// Minimum venue-name similarity for the fuzzy price-set strategy.
    pub fuzzy_similarity_threshold: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            seat_tolerance: DEFAULT_SEAT_TOLERANCE,
            signature_similarity_threshold: DEFAULT_SIGNATURE_SIMILARITY,
            fuzzy_similarity_threshold: DEFAULT_FUZZY_SIMILARITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Seats assumed when a sold-out show's capacity cannot be recovered.
    pub default_capacity: u32,
    /// How many adjacent session ids to probe for capacity recovery.
    pub probe_offset_range: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_FALLBACK_CAPACITY,
            probe_offset_range: DEFAULT_PROBE_OFFSET_RANGE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformAConfig {
    /// Path to the state -> cities registry for this platform.
    pub cities_config: String,
    /// Listing page URL with `{city}` and `{date}` placeholders.
    pub listing_url_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformBConfig {
    pub cities_config: String,
    pub listing_url_template: String,
    /// Seat-layout transaction endpoint.
    pub seat_layout_endpoint: String,
    /// Platform-mandated symmetric key for the encrypted seat payload.
    pub seat_layout_key: String,
    /// Offset added to this platform's UTC timestamps to reach the local
    /// wall-clock timezone shows are keyed in.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)?;
        if config.platform_b.seat_layout_key.len() != 16
            && config.platform_b.seat_layout_key.len() != 24
            && config.platform_b.seat_layout_key.len() != 32
        {
            return Err(ScraperError::Config(
                "platform_b.seat_layout_key must be a 16/24/32 byte AES key".into(),
            ));
        }
        Ok(config)
    }
}

/// One scrapeable city: display name plus the platform-specific URL slug.
/// The same city usually has different slugs on each platform.
#[derive(Debug, Clone, Deserialize)]
pub struct CityEntry {
    pub name: String,
    pub slug: String,
}

/// State name -> cities, per platform.
pub type CityRegistry = BTreeMap<String, Vec<CityEntry>>;

pub fn load_city_registry(path: &str) -> Result<CityRegistry> {
    let content = fs::read_to_string(path).map_err(|e| {
        ScraperError::Config(format!("Failed to read city registry '{}': {}", path, e))
    })?;
    let registry: CityRegistry = serde_json::from_str(&content)?;
    Ok(registry)
}

/// Resolves the (state, city) scrape targets for a run. Zero resolved cities
/// is a configuration failure: the run must abort before scraping.
pub fn resolve_cities<'a>(
    registry: &'a CityRegistry,
    states: &'a [String],
) -> Result<Vec<(&'a str, &'a CityEntry)>> {
    let mut targets = Vec::new();
    for state in states {
        match registry.get(state) {
            Some(cities) if !cities.is_empty() => {
                targets.extend(cities.iter().map(|c| (state.as_str(), c)));
            }
            _ => {
                tracing::warn!(state = %state, "No cities registered for state");
            }
        }
    }
    if targets.is_empty() {
        return Err(ScraperError::Config(format!(
            "no cities resolved for states: {}",
            states.join(", ")
        )));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_cities_fails_when_empty() {
        let registry: CityRegistry = BTreeMap::new();
        let states = ["Telangana".to_string()];
        let err = resolve_cities(&registry, &states).unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn resolve_cities_flattens_states() {
        let registry: CityRegistry = serde_json::from_str(
            r#"{
                "Telangana": [
                    {"name": "Hyderabad", "slug": "hyderabad"},
                    {"name": "Warangal", "slug": "warangal"}
                ],
                "Andhra Pradesh": [
                    {"name": "Vizag", "slug": "visakhapatnam"}
                ]
            }"#,
        )
        .unwrap();
        let states = ["Telangana".to_string(), "Andhra Pradesh".to_string()];
        let targets = resolve_cities(&registry, &states).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].1.slug, "hyderabad");
    }
}
