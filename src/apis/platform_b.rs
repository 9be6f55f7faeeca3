use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::{CityEntry, PlatformBConfig};
use crate::error::{Result, ScraperError};
use crate::types::Cents;

/// One venue's showtime listing on the secondary platform. Seat data is not
/// in the listing; each show's layout must be fetched (encrypted) separately.
#[derive(Debug, Clone)]
pub struct VenueShows {
    pub venue_name: String,
    pub venue_code: String,
    pub shows: Vec<RawShowtime>,
}

#[derive(Debug, Clone)]
pub struct RawShowtime {
    pub session_id: String,
    /// ISO-8601 UTC timestamp string, normalized later.
    pub show_time: String,
    /// Screen/auditorium label; shows on the same screen share capacity.
    pub screen: String,
    /// "1" while seats remain, "0" once sold out. Used only to order work so
    /// available shows populate the capacity cache before sold-out ones need it.
    pub avail_status: String,
    /// Area category code -> current ticket price.
    pub price_map: BTreeMap<String, Cents>,
}

/// Outcome of one seat-layout transaction. `error` text is the only failure
/// classification signal the platform provides.
#[derive(Debug, Clone)]
pub struct SeatLayoutReply {
    pub success: bool,
    pub payload: Option<String>,
    pub error: Option<String>,
}

/// The per-show seat-layout fetch, keyed by (venue code, session id).
/// A trait so retry/fallback logic can be exercised against a mock.
#[async_trait::async_trait]
pub trait SeatLayoutApi: Send + Sync {
    async fn fetch_layout(&self, venue_code: &str, session_id: &str) -> Result<SeatLayoutReply>;
}

/// Adapter for the secondary platform's listing pages.
pub struct PlatformBAdapter {
    client: reqwest::Client,
    listing_url_template: String,
}

impl PlatformBAdapter {
    pub fn new(config: &PlatformBConfig, request_timeout_secs: u64) -> Result<Self> {
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

    #[instrument(skip(self), fields(city = %city.name))]
    pub async fn fetch_city_listing(
        &self,
        city: &CityEntry,
        show_date: &str,
    ) -> Result<Vec<VenueShows>> {
        let url = self.listing_url(&city.slug, show_date);
        let html = self.client.get(&url).send().await?.text().await?;
        let venues = parse_listing(&html)?;
        info!(venues = venues.len(), "Fetched platform B listing");
        Ok(venues)
    }
}

/// Extracts the `window.__INITIAL_STATE__ = {...}` blob and walks the widget
/// tree down to the venue group. Pure; exercised directly by tests.
pub fn parse_listing(html: &str) -> Result<Vec<VenueShows>> {
    let state = extract_initial_state(html).ok_or_else(|| {
        ScraperError::MissingField("__INITIAL_STATE__ not found (possible bot detection)".into())
    })?;
    let state: Value = serde_json::from_str(state)?;

    let sbe = &state["showtimesByEvent"];
    let date_code = sbe["currentDateCode"]
        .as_str()
        .ok_or_else(|| ScraperError::MissingField("currentDateCode not found".into()))?;
    let widgets = sbe["showDates"][date_code]["dynamic"]["data"]["showtimeWidgets"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut venue_values: Vec<Value> = Vec::new();
    for widget in &widgets {
        if widget["type"].as_str() == Some("groupList") {
            for group in widget["data"].as_array().cloned().unwrap_or_default() {
                if group["type"].as_str() == Some("venueGroup") {
                    venue_values = group["data"].as_array().cloned().unwrap_or_default();
                }
            }
        }
    }

    let mut venues = Vec::new();
    for value in &venue_values {
        match parse_venue(value) {
            Ok(venue) => venues.push(venue),
            Err(e) => debug!(error = %e, "Skipping malformed venue entry"),
        }
    }
    Ok(venues)
}

fn parse_venue(value: &Value) -> Result<VenueShows> {
    let venue_name = value["additionalData"]["venueName"]
        .as_str()
        .ok_or_else(|| ScraperError::MissingField("venueName not found".into()))?
        .to_string();
    let venue_code = value["additionalData"]["venueCode"]
        .as_str()
        .ok_or_else(|| ScraperError::MissingField("venueCode not found".into()))?
        .to_string();

    let mut shows = Vec::new();
    let showtimes = value["showtimes"].as_array().cloned().unwrap_or_default();
    for show in &showtimes {
        let session_id = match &show["additionalData"]["sessionId"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => {
                debug!(venue = %venue_name, "Showtime without session id skipped");
                continue;
            }
        };
        let show_time = show["title"].as_str().unwrap_or_default().to_string();
        let raw_screen = show["screenAttr"].as_str().unwrap_or("");
        let screen = if raw_screen.is_empty() {
            "Main Screen".to_string()
        } else {
            raw_screen.to_string()
        };
        let avail_status = show["additionalData"]["availStatus"]
            .as_str()
            .unwrap_or("0")
            .to_string();

        let mut price_map = BTreeMap::new();
        for cat in show["additionalData"]["categories"]
            .as_array()
            .cloned()
            .unwrap_or_default()
        {
            let Some(code) = cat["areaCatCode"].as_str() else {
                continue;
            };
            let price = match &cat["curPrice"] {
                Value::String(s) => s.parse::<f64>().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            };
            if let Some(price) = price {
                price_map.insert(code.to_string(), (price * 100.0).round() as Cents);
            }
        }

        shows.push(RawShowtime {
            session_id,
            show_time,
            screen,
            avail_status,
            price_map,
        });
    }

    Ok(VenueShows {
        venue_name,
        venue_code,
        shows,
    })
}

/// The state blob is assigned inline in a script tag, so the JSON object is
/// recovered by brace matching from the marker. Braces inside JSON string
/// literals (venue names do contain them) must not count, so the scan tracks
/// quote and escape state.
fn extract_initial_state(html: &str) -> Option<&str> {
    let marker = "window.__INITIAL_STATE__";
    let start = html.find(marker)?;
    let start = start + html[start..].find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in html[start..].bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&html[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// HTTP implementation of the seat-layout transaction endpoint. The reply
/// wraps its fields in a single provider envelope object.
pub struct HttpSeatLayoutApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSeatLayoutApi {
    pub fn new(config: &PlatformBConfig, request_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.seat_layout_endpoint.clone(),
        })
    }
}

#[async_trait::async_trait]
impl SeatLayoutApi for HttpSeatLayoutApi {
    async fn fetch_layout(&self, venue_code: &str, session_id: &str) -> Result<SeatLayoutReply> {
        let body = format!(
            "strCommand=GETSEATLAYOUT&strAppCode=WEB&strVenueCode={}&strParam1={}&strParam2=WEB&strParam5=Y&strFormat=json",
            venue_code, session_id
        );
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?
            .text()
            .await?;
        parse_layout_reply(&response)
    }
}

pub fn parse_layout_reply(response: &str) -> Result<SeatLayoutReply> {
    let value: Value = serde_json::from_str(response)?;
    let envelope = value
        .as_object()
        .and_then(|o| o.values().next())
        .ok_or_else(|| ScraperError::MissingField("seat layout envelope not found".into()))?;

    let success = envelope["blnSuccess"].as_str() == Some("true")
        || envelope["blnSuccess"].as_bool() == Some(true);
    Ok(SeatLayoutReply {
        success,
        payload: envelope["strData"].as_str().map(str::to_string),
        error: envelope["strException"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_html() -> String {
        let state = serde_json::json!({
            "showtimesByEvent": {
                "currentDateCode": "20260209",
                "showDates": {"20260209": {"dynamic": {"data": {"showtimeWidgets": [
                    {"type": "banner", "data": []},
                    {"type": "groupList", "data": [
                        {"type": "venueGroup", "data": [
                            {
                                "additionalData": {"venueName": "City Cinema", "venueCode": "CITY"},
                                "showtimes": [
                                    {
                                        "title": "2026-02-09T13:30:00Z",
                                        "screenAttr": "Screen 1",
                                        "additionalData": {
                                            "sessionId": 99201,
                                            "availStatus": "1",
                                            "categories": [
                                                {"areaCatCode": "CLUB", "curPrice": "150.00"},
                                                {"areaCatCode": "BALC", "curPrice": 200.0}
                                            ]
                                        }
                                    },
                                    {
                                        "title": "2026-02-09T16:45:00Z",
                                        "screenAttr": "",
                                        "additionalData": {"sessionId": "99202", "categories": []}
                                    }
                                ]
                            }
                        ]}
                    ]}
                ]}}}}
            }
        });
        format!(
            "<html><script>window.__INITIAL_STATE__ = {};</script></html>",
            state
        )
    }

    #[test]
    fn parses_venue_listing() {
        let venues = parse_listing(&listing_html()).unwrap();
        assert_eq!(venues.len(), 1);
        let venue = &venues[0];
        assert_eq!(venue.venue_name, "City Cinema");
        assert_eq!(venue.venue_code, "CITY");
        assert_eq!(venue.shows.len(), 2);

        let show = &venue.shows[0];
        assert_eq!(show.session_id, "99201");
        assert_eq!(show.screen, "Screen 1");
        assert_eq!(show.avail_status, "1");
        assert_eq!(show.price_map.get("CLUB"), Some(&150_00));
        assert_eq!(show.price_map.get("BALC"), Some(&200_00));

        // empty screenAttr falls back to the shared default label
        assert_eq!(venue.shows[1].screen, "Main Screen");
        assert_eq!(venue.shows[1].avail_status, "0");
    }

    #[test]
    fn missing_state_is_reported_not_swallowed() {
        let err = parse_listing("<html>blocked</html>").unwrap_err();
        assert!(matches!(err, ScraperError::MissingField(_)));
    }

    #[test]
    fn brace_matching_survives_nested_objects() {
        let html = r#"<script>window.__INITIAL_STATE__ = {"a": {"b": {"c": 1}}, "d": [1,2]};</script>"#;
        let blob = extract_initial_state(html).unwrap();
        assert_eq!(blob, r#"{"a": {"b": {"c": 1}}, "d": [1,2]}"#);
    }

    #[test]
    fn braces_inside_string_literals_do_not_truncate() {
        let html = r#"<script>window.__INITIAL_STATE__ = {"venue": "Plaza {East Wing}", "quote": "a \" and }", "n": {"x": 1}};</script>"#;
        let blob = extract_initial_state(html).unwrap();
        assert_eq!(
            blob,
            r#"{"venue": "Plaza {East Wing}", "quote": "a \" and }", "n": {"x": 1}}"#
        );
        // and the blob is still valid JSON end to end
        let parsed: Value = serde_json::from_str(blob).unwrap();
        assert_eq!(parsed["venue"].as_str(), Some("Plaza {East Wing}"));
    }

    #[test]
    fn layout_reply_success_and_failure() {
        let ok = parse_layout_reply(
            r#"{"Provider": {"blnSuccess": "true", "strData": "abc=="}}"#,
        )
        .unwrap();
        assert!(ok.success);
        assert_eq!(ok.payload.as_deref(), Some("abc=="));

        let err = parse_layout_reply(
            r#"{"Provider": {"blnSuccess": "false", "strException": "Show is sold out"}}"#,
        )
        .unwrap();
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("Show is sold out"));
    }
}
