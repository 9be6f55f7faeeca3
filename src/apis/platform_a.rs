use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::{CityEntry, PlatformAConfig};
use crate::error::{Result, ScraperError};
use crate::pipeline::processing::normalize::{apply_fingerprint, build_fingerprint};
use crate::types::{Cents, ShowCounts, ShowRecord, Source};

/// Adapter for the primary platform. Its listing page embeds a JSON blob of
/// venues and sessions where every session already carries a structured
/// per-area seat breakdown (total/available/price), so no per-show seat
/// fetch is needed.
pub struct PlatformAAdapter {
    client: reqwest::Client,
    listing_url_template: String,
}

impl PlatformAAdapter {
    pub fn new(config: &PlatformAConfig, request_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            listing_url_template: config.listing_url_template.clone(),
        })
    }

    pub fn listing_url(&self, city_slug: &str, show_date: &str) -> String {
        self.listing_url_template
            .replace("{city}", city_slug)
            .replace("{date}", show_date)
    }

    /// Fetches and parses one city's listing page into raw show records.
    #[instrument(skip(self), fields(city = %city.name))]
    pub async fn fetch_city(
        &self,
        state: &str,
        city: &CityEntry,
        show_date: &str,
    ) -> Result<Vec<ShowRecord>> {
        let url = self.listing_url(&city.slug, show_date);
        let html = self.client.get(&url).send().await?.text().await?;
        let records = parse_listing(&html, state, &city.name)?;
        info!(shows = records.len(), "Fetched platform A listing");
        Ok(records)
    }
}

/// Extracts the embedded server-state JSON from a listing page and converts
/// every session into a `ShowRecord`. Pure; exercised directly by tests.
pub fn parse_listing(html: &str, state: &str, city: &str) -> Result<Vec<ShowRecord>> {
    let data = extract_server_state(html)?;

    let sessions_root = data["props"]["pageProps"]["data"]["serverState"]["movieSessions"]
        .as_object()
        .ok_or_else(|| ScraperError::MissingField("movieSessions not found".into()))?;
    // One movie per page; the key is the movie's internal id.
    let Some((_, movie_sessions)) = sessions_root.iter().next() else {
        return Ok(Vec::new());
    };
    let venues = movie_sessions["arrangedSessions"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::new();
    for venue in &venues {
        let venue_name = venue["entityName"]
            .as_str()
            .ok_or_else(|| ScraperError::MissingField("entityName not found".into()))?;

        let sessions = venue["sessions"].as_array().cloned().unwrap_or_default();
        for session in &sessions {
            match parse_session(session, state, city, venue_name) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(venue = venue_name, error = %e, "Skipping malformed session");
                }
            }
        }
    }
    Ok(records)
}

fn parse_session(session: &Value, state: &str, city: &str, venue: &str) -> Result<ShowRecord> {
    let sid = field_as_string(session, "sid")?;
    let show_time = session["showTime"]
        .as_str()
        .ok_or_else(|| ScraperError::MissingField("showTime not found".into()))?;

    let areas = session["areas"]
        .as_array()
        .ok_or_else(|| ScraperError::MissingField("areas not found".into()))?;

    let mut record = ShowRecord::new(Source::PlatformA, sid, state, city, venue, show_time);

    let mut counts = ShowCounts::default();
    let mut seat_category_map: BTreeMap<String, u32> = BTreeMap::new();
    let mut category_pairs: Vec<(Cents, u32)> = Vec::new();

    for area in areas {
        let label = area["label"]
            .as_str()
            .ok_or_else(|| ScraperError::MissingField("area label not found".into()))?;
        let total = area["sTotal"]
            .as_i64()
            .ok_or_else(|| ScraperError::MissingField("sTotal not found".into()))?;
        let avail = area["sAvail"]
            .as_i64()
            .ok_or_else(|| ScraperError::MissingField("sAvail not found".into()))?;
        let price = area["price"]
            .as_f64()
            .ok_or_else(|| ScraperError::MissingField("price not found".into()))?;

        let price_cents = (price * 100.0).round() as Cents;
        let booked = total - avail;

        seat_category_map.insert(label.to_string(), total.max(0) as u32);
        category_pairs.push((price_cents, total.max(0) as u32));

        counts.total_tickets += total;
        counts.booked_tickets += booked;
        counts.total_gross += total * price_cents;
        counts.booked_gross += booked * price_cents;
    }

    record.apply_counts(counts);
    let fingerprint = build_fingerprint(&category_pairs, &seat_category_map);
    record.seat_category_map = seat_category_map;
    apply_fingerprint(&mut record, fingerprint);
    Ok(record)
}

fn field_as_string(value: &Value, key: &str) -> Result<String> {
    match &value[key] {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ScraperError::MissingField(format!("{} not found", key))),
    }
}

/// The listing embeds its state as `<script id="__SERVER_STATE__">{...}</script>`.
fn extract_server_state(html: &str) -> Result<Value> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script#__SERVER_STATE__")
        .map_err(|e| ScraperError::Api { message: format!("selector: {}", e) })?;
    let script = document
        .select(&selector)
        .next()
        .ok_or_else(|| ScraperError::MissingField("__SERVER_STATE__ script not found".into()))?;
    let text: String = script.text().collect();
    Ok(serde_json::from_str(&text)?)
}
