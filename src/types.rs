use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{PLATFORM_A, PLATFORM_B};

/// Currency amounts are carried in integer minor units (paise/cents) so that
/// price comparisons during matching are exact.
pub type Cents = i64;

/// Which ticketing platform observed a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    PlatformA,
    PlatformB,
}

impl Source {
    pub fn label(&self) -> &'static str {
        match self {
            Source::PlatformA => PLATFORM_A,
            Source::PlatformB => PLATFORM_B,
        }
    }
}

/// Raw ticket/gross numbers as reported upstream, before clamping.
/// Signed fields on purpose: upstream sign and bounds are never trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowCounts {
    pub total_tickets: i64,
    pub booked_tickets: i64,
    pub total_gross: Cents,
    pub booked_gross: Cents,
}

/// One platform's observation of one theatrical showing at one venue and
/// one showtime. The canonical unit moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowRecord {
    pub source: Source,
    /// Opaque per-platform identifier; comparable across platforms only
    /// coincidentally, never trusted as the sole identity key.
    pub session_id: String,
    pub state: String,
    pub city: String,
    pub venue: String,
    /// Platform-native timestamp string, kept for display and diagnostics.
    pub raw_show_time: String,
    /// Show time in the canonical local timezone at minute resolution; the
    /// intended cross-source join key. `None` means normalization failed and
    /// the record is excluded from matching (it still reaches the output).
    pub normalized_show_time: Option<NaiveDateTime>,
    /// Seat-category label -> total seat count, as labelled by this platform.
    pub seat_category_map: BTreeMap<String, u32>,
    /// Ticket price -> total seats at that price. Category labels are not
    /// comparable across platforms but prices and counts often are.
    pub price_seat_map: BTreeMap<Cents, u32>,
    /// `price_seat_map` content as a sorted (price, count) list, used for
    /// deterministic tolerance-based comparison.
    pub price_seat_signature: Vec<(Cents, u32)>,
    /// Sorted multiset of per-category seat counts, ignoring prices.
    pub seat_signature: Vec<u32>,
    pub total_tickets: u32,
    pub booked_tickets: u32,
    pub total_gross: Cents,
    pub booked_gross: Cents,
    /// booked/total as a percentage, 2 decimals, always derived from the
    /// ticket counts.
    pub occupancy: f64,
    /// True when the numbers are a heuristic estimate rather than an
    /// observed seat layout.
    pub is_fallback: bool,
}

impl ShowRecord {
    /// A record with identity fields filled in and zeroed numbers; callers
    /// apply counts and fingerprints afterwards.
    pub fn new(
        source: Source,
        session_id: impl Into<String>,
        state: impl Into<String>,
        city: impl Into<String>,
        venue: impl Into<String>,
        raw_show_time: impl Into<String>,
    ) -> Self {
        Self {
            source,
            session_id: session_id.into(),
            state: state.into(),
            city: city.into(),
            venue: venue.into(),
            raw_show_time: raw_show_time.into(),
            normalized_show_time: None,
            seat_category_map: BTreeMap::new(),
            price_seat_map: BTreeMap::new(),
            price_seat_signature: Vec::new(),
            seat_signature: Vec::new(),
            total_tickets: 0,
            booked_tickets: 0,
            total_gross: 0,
            booked_gross: 0,
            occupancy: 0.0,
            is_fallback: false,
        }
    }

    /// Ingests upstream numbers, coercing them to satisfy the record
    /// invariants: non-negative, booked <= total, occupancy recomputed.
    pub fn apply_counts(&mut self, counts: ShowCounts) {
        let total = counts.total_tickets.unsigned_abs().min(u32::MAX as u64) as u32;
        let booked =
            (counts.booked_tickets.unsigned_abs().min(u32::MAX as u64) as u32).min(total);
        let total_gross = counts.total_gross.abs();
        let booked_gross = counts.booked_gross.abs().min(total_gross);

        self.total_tickets = total;
        self.booked_tickets = booked;
        self.total_gross = total_gross;
        self.booked_gross = booked_gross;
        self.occupancy = occupancy_pct(booked, total);
    }

    /// Replaces this record's numeric and structural fields with `other`'s
    /// while keeping the identity fields (state/city/venue/session/times).
    /// Used when the other source reports larger verified revenue but this
    /// record's identity metadata is authoritative for display.
    pub fn adopt_numbers_from(&mut self, other: &ShowRecord) {
        self.total_tickets = other.total_tickets;
        self.booked_tickets = other.booked_tickets;
        self.total_gross = other.total_gross;
        self.booked_gross = other.booked_gross;
        self.occupancy = occupancy_pct(other.booked_tickets, other.total_tickets);
        self.seat_category_map = other.seat_category_map.clone();
        self.price_seat_map = other.price_seat_map.clone();
        self.price_seat_signature = other.price_seat_signature.clone();
        self.seat_signature = other.seat_signature.clone();
    }
}

/// booked/total * 100, rounded to 2 decimals, clamped to [0, 100].
/// Defined as 0 when total is 0.
pub fn occupancy_pct(booked: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (booked as f64 / total as f64) * 100.0;
    ((pct * 100.0).round() / 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ShowRecord {
        ShowRecord::new(
            Source::PlatformA,
            "s1",
            "Telangana",
            "Hyderabad",
            "City Cinemas",
            "07:00 PM",
        )
    }

    #[test]
    fn counts_are_clamped_at_ingestion() {
        let mut rec = record();
        rec.apply_counts(ShowCounts {
            total_tickets: -150,
            booked_tickets: 900,
            total_gross: -30_000_00,
            booked_gross: 45_000_00,
        });
        assert_eq!(rec.total_tickets, 150);
        assert_eq!(rec.booked_tickets, 150);
        assert_eq!(rec.total_gross, 30_000_00);
        assert_eq!(rec.booked_gross, 30_000_00);
        assert_eq!(rec.occupancy, 100.0);
    }

    #[test]
    fn occupancy_zero_when_no_seats() {
        assert_eq!(occupancy_pct(0, 0), 0.0);
        assert_eq!(occupancy_pct(5, 0), 0.0);
    }

    #[test]
    fn occupancy_rounds_to_two_decimals() {
        // 1/3 occupied
        assert_eq!(occupancy_pct(1, 3), 33.33);
        assert_eq!(occupancy_pct(2, 3), 66.67);
    }

    #[test]
    fn adopt_numbers_keeps_identity() {
        let mut winner = record();
        winner.apply_counts(ShowCounts {
            total_tickets: 100,
            booked_tickets: 40,
            total_gross: 100_00,
            booked_gross: 40_00,
        });

        let mut other = ShowRecord::new(
            Source::PlatformB,
            "s2",
            "Telangana",
            "Hyderabad",
            "City Cinema",
            "2026-02-09T13:30:00Z",
        );
        other.apply_counts(ShowCounts {
            total_tickets: 120,
            booked_tickets: 90,
            total_gross: 150_00,
            booked_gross: 110_00,
        });

        winner.adopt_numbers_from(&other);
        assert_eq!(winner.venue, "City Cinemas");
        assert_eq!(winner.session_id, "s1");
        assert_eq!(winner.booked_gross, 110_00);
        assert_eq!(winner.occupancy, 75.0);
    }
}
