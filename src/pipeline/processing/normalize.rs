use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::error::Result;
use crate::types::{Cents, ShowRecord, Source};

/// Maps raw per-platform city/venue/time strings onto the canonical
/// (state, city, show-time) identity used for cross-source matching.
///
/// Platform A reports timezone-naive local wall-clock times in a fixed
/// 12-hour format; Platform B reports ISO-8601 UTC and needs the fixed local
/// offset applied. Records whose timestamps cannot be parsed keep
/// `normalized_show_time = None`: they are excluded from matching but still
/// flow to the output, and every such drop is logged and counted.
pub struct Normalizer {
    show_date: NaiveDate,
    utc_offset_minutes: i32,
    city_aliases: HashMap<String, String>,
    /// Records excluded from cross-source matching due to parse failures.
    pub dropped_from_matching: usize,
}

impl Normalizer {
    pub fn new(
        show_date: NaiveDate,
        utc_offset_minutes: i32,
        city_aliases: HashMap<String, String>,
    ) -> Self {
        Self {
            show_date,
            utc_offset_minutes,
            city_aliases,
            dropped_from_matching: 0,
        }
    }

    /// Enriches a record in place: canonical city name plus the normalized
    /// show time that serves as the cross-source join key.
    pub fn normalize(&mut self, record: &mut ShowRecord) {
        record.city = self.canonical_city(&record.city);

        let parsed = match record.source {
            Source::PlatformA => normalize_platform_a_time(self.show_date, &record.raw_show_time),
            Source::PlatformB => {
                normalize_platform_b_time(&record.raw_show_time, self.utc_offset_minutes)
            }
        };

        match parsed {
            Ok(ts) => record.normalized_show_time = Some(ts),
            Err(e) => {
                self.dropped_from_matching += 1;
                warn!(
                    source = record.source.label(),
                    venue = %record.venue,
                    raw = %record.raw_show_time,
                    error = %e,
                    "Unparseable show time; record excluded from cross-source matching"
                );
            }
        }
    }

    pub fn normalize_all(&mut self, records: &mut [ShowRecord]) {
        for record in records {
            self.normalize(record);
        }
    }

    fn canonical_city(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.city_aliases
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

/// Platform A: naive local wall-clock `hh:mm AM/PM` on the run's show date.
/// No offset conversion.
pub fn normalize_platform_a_time(show_date: NaiveDate, time_str: &str) -> Result<NaiveDateTime> {
    let combined = format!("{} {}", show_date.format("%Y-%m-%d"), time_str.trim());
    let dt = NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %I:%M %p")?;
    Ok(truncate_to_minute(dt))
}

/// Platform B: ISO-8601 UTC (with or without an explicit offset marker),
/// shifted by the fixed local offset.
pub fn normalize_platform_b_time(raw: &str, utc_offset_minutes: i32) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    let utc = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.naive_utc(),
        // Some payloads omit the offset marker entirely
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")?,
    };
    let local = utc + Duration::minutes(utc_offset_minutes as i64);
    Ok(truncate_to_minute(local))
}

fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0).unwrap_or(dt).with_nanosecond(0).unwrap_or(dt)
}

/// The structural fingerprint attached to every real observation: price ->
/// seat-count map, its sorted signature, and the weaker price-free seat
/// signature for the looser matching strategies.
#[derive(Debug, Clone, Default)]
pub struct SeatFingerprint {
    pub price_seat_map: BTreeMap<Cents, u32>,
    pub price_seat_signature: Vec<(Cents, u32)>,
    pub seat_signature: Vec<u32>,
}

/// `category_pairs` is one (price, seat-count) entry per seat category, as
/// reported by the platform; counts at the same price stay separate in the
/// signature but aggregate in the map.
pub fn build_fingerprint(
    category_pairs: &[(Cents, u32)],
    seat_category_map: &BTreeMap<String, u32>,
) -> SeatFingerprint {
    let mut price_seat_map: BTreeMap<Cents, u32> = BTreeMap::new();
    let mut price_seat_signature: Vec<(Cents, u32)> = Vec::new();
    for &(price, count) in category_pairs {
        *price_seat_map.entry(price).or_insert(0) += count;
        price_seat_signature.push((price, count));
    }
    price_seat_signature.sort_unstable();

    let mut seat_signature: Vec<u32> = seat_category_map.values().copied().collect();
    seat_signature.sort_unstable();

    SeatFingerprint {
        price_seat_map,
        price_seat_signature,
        seat_signature,
    }
}

pub fn apply_fingerprint(record: &mut ShowRecord, fingerprint: SeatFingerprint) {
    record.price_seat_map = fingerprint.price_seat_map;
    record.price_seat_signature = fingerprint.price_seat_signature;
    record.seat_signature = fingerprint.seat_signature;
}
