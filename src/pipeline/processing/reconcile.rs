use metrics::counter;
use std::collections::HashMap;
use strsim::normalized_levenshtein;
use tracing::{debug, info};

use crate::config::ReconcileConfig;
use crate::types::ShowRecord;

/// How a primary and a secondary observation were decided to be the same
/// physical show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Both platforms reported the same non-empty session id.
    SessionId,
    /// Same prices with per-price seat counts within tolerance, plus a
    /// minimally similar venue name.
    PriceSeatSignature,
    /// Same set of distinct prices plus a strongly similar venue name. The
    /// only strategy open to estimated records, which carry no real counts.
    FuzzyVenuePriceSet,
}

impl MatchStrategy {
    fn label(&self) -> &'static str {
        match self {
            MatchStrategy::SessionId => "session_id",
            MatchStrategy::PriceSeatSignature => "price_seat_signature",
            MatchStrategy::FuzzyVenuePriceSet => "fuzzy_venue_price_set",
        }
    }
}

/// Merges the two platforms' observations of one show date into a single
/// deduplicated list.
///
/// Primary records are bucketed by (state, city, normalized show time); each
/// secondary record then runs the strategies strictest-first over its bucket.
/// A matched primary is consumed so no record merges twice. The primary's
/// identity fields always win; the secondary's numbers win only when it
/// reports strictly higher verified revenue and is not an estimate.
///
/// Records without a normalized show time never match; they pass through to
/// the output untouched. Output order is secondary input order (each slot
/// holding the merged record where a match was found) followed by unclaimed
/// primaries in their input order, so a rerun over the same snapshots
/// reproduces the same list.
pub struct Reconciler {
    config: ReconcileConfig,
}

type BucketKey = (String, String, chrono::NaiveDateTime);

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn reconcile(
        &self,
        primary: Vec<ShowRecord>,
        secondary: Vec<ShowRecord>,
    ) -> Vec<ShowRecord> {
        let mut consumed = vec![false; primary.len()];
        let mut buckets: HashMap<BucketKey, Vec<usize>> = HashMap::new();
        for (idx, record) in primary.iter().enumerate() {
            if let Some(ts) = record.normalized_show_time {
                buckets
                    .entry((record.state.clone(), record.city.clone(), ts))
                    .or_default()
                    .push(idx);
            }
        }

        let mut matched = 0usize;
        let mut merged: Vec<ShowRecord> = Vec::with_capacity(primary.len() + secondary.len());

        for record in secondary {
            let candidate = record.normalized_show_time.and_then(|ts| {
                let key = (record.state.clone(), record.city.clone(), ts);
                buckets
                    .get(&key)
                    .and_then(|idxs| self.find_match(&record, idxs, &primary, &consumed))
            });

            match candidate {
                Some((idx, strategy)) => {
                    consumed[idx] = true;
                    matched += 1;
                    counter!("boxoffice_reconcile_matches", "strategy" => strategy.label())
                        .increment(1);
                    debug!(
                        venue = %record.venue,
                        other_venue = %primary[idx].venue,
                        strategy = strategy.label(),
                        "Matched cross-source show pair"
                    );
                    merged.push(self.resolve(&primary[idx], &record));
                }
                // platform coverage gap: the secondary is the only observation
                None => merged.push(record),
            }
        }

        let mut primary_only = 0usize;
        for (idx, record) in primary.into_iter().enumerate() {
            if !consumed[idx] {
                primary_only += 1;
                merged.push(record);
            }
        }

        info!(
            matched,
            primary_only,
            total = merged.len(),
            "Reconciled cross-source show records"
        );
        merged
    }

    /// Runs the strategies strictest-first over the bucket's unconsumed
    /// primary candidates. The fuzzy strategy scores all candidates and
    /// keeps the most similar venue name above its threshold.
    fn find_match(
        &self,
        record: &ShowRecord,
        candidates: &[usize],
        primary: &[ShowRecord],
        consumed: &[bool],
    ) -> Option<(usize, MatchStrategy)> {
        let live = || candidates.iter().copied().filter(|&i| !consumed[i]);

        if !record.session_id.is_empty() {
            for idx in live() {
                if primary[idx].session_id == record.session_id {
                    return Some((idx, MatchStrategy::SessionId));
                }
            }
        }

        for idx in live() {
            if self.signatures_match(record, &primary[idx]) {
                return Some((idx, MatchStrategy::PriceSeatSignature));
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for idx in live() {
            let other = &primary[idx];
            if !same_price_set(record, other) {
                continue;
            }
            let similarity = venue_similarity(&record.venue, &other.venue);
            if similarity > self.config.fuzzy_similarity_threshold
                && best.map_or(true, |(_, s)| similarity > s)
            {
                best = Some((idx, similarity));
            }
        }
        best.map(|(idx, _)| (idx, MatchStrategy::FuzzyVenuePriceSet))
    }

    /// Signature comparison requires real counts on both sides, so estimated
    /// records are excluded here and fall through to the fuzzy strategy.
    fn signatures_match(&self, record: &ShowRecord, other: &ShowRecord) -> bool {
        if other.is_fallback || record.is_fallback {
            return false;
        }
        let a = &record.price_seat_signature;
        let b = &other.price_seat_signature;
        if a.is_empty() || a.len() != b.len() {
            return false;
        }
        let within_tolerance = a.iter().zip(b.iter()).all(|(&(pa, ca), &(pb, cb))| {
            pa == pb && ca.abs_diff(cb) <= self.config.seat_tolerance
        });
        within_tolerance
            && venue_similarity(&record.venue, &other.venue)
                >= self.config.signature_similarity_threshold
    }

    /// Identity always stays with the primary record. An estimate never
    /// overrides observed numbers; otherwise the higher verified revenue
    /// wins, ties keeping the primary's figures.
    fn resolve(&self, primary: &ShowRecord, secondary: &ShowRecord) -> ShowRecord {
        let mut winner = primary.clone();
        if !secondary.is_fallback && secondary.booked_gross > primary.booked_gross {
            winner.adopt_numbers_from(secondary);
        }
        winner
    }
}

/// Distinct price sets must be exactly equal; counts are ignored.
fn same_price_set(a: &ShowRecord, b: &ShowRecord) -> bool {
    !a.price_seat_map.is_empty()
        && a.price_seat_map.len() == b.price_seat_map.len()
        && a.price_seat_map.keys().eq(b.price_seat_map.keys())
}

fn venue_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}
