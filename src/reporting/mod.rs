use csv::Writer;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{occupancy_pct, Cents, ShowRecord, Source};

/// Report labels recovered from a listing-page URL. Path shape is
/// `/<section>/<city-slug>/<movie-slug>/<show-date>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub movie: String,
    pub city: String,
    pub date: String,
}

pub fn parse_reference_url(url: &str) -> Option<ReportMeta> {
    let path = url.split("://").nth(1).map_or(url, |rest| {
        rest.split_once('/').map(|(_, p)| p).unwrap_or("")
    });
    let segments: Vec<&str> = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 4 {
        return None;
    }
    Some(ReportMeta {
        city: title_case(segments[1]),
        movie: title_case(segments[2]),
        date: segments[segments.len() - 1].to_string(),
    })
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Running totals for one aggregation bucket. Occupancy is always recomputed
/// from the summed ticket counts; averaging per-show percentages would weight
/// a 50-seat screen the same as a 500-seat one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rollup {
    pub shows: u32,
    pub estimated_shows: u32,
    pub total_tickets: u64,
    pub booked_tickets: u64,
    pub total_gross: Cents,
    pub booked_gross: Cents,
}

impl Rollup {
    pub fn add(&mut self, record: &ShowRecord) {
        self.shows += 1;
        if record.is_fallback {
            self.estimated_shows += 1;
        }
        self.total_tickets += record.total_tickets as u64;
        self.booked_tickets += record.booked_tickets as u64;
        self.total_gross += record.total_gross;
        self.booked_gross += record.booked_gross;
    }

    pub fn occupancy(&self) -> f64 {
        occupancy_pct(
            self.booked_tickets.min(u32::MAX as u64) as u32,
            self.total_tickets.min(u32::MAX as u64) as u32,
        )
    }
}

/// Integer minor units -> "1234.50" for the sheets.
pub fn format_cents(amount: Cents) -> String {
    format!("{}.{:02}", amount / 100, (amount % 100).abs())
}

fn rollup_fields(rollup: &Rollup) -> Vec<String> {
    vec![
        rollup.shows.to_string(),
        rollup.estimated_shows.to_string(),
        rollup.booked_tickets.to_string(),
        rollup.total_tickets.to_string(),
        format!("{:.2}", rollup.occupancy()),
        format_cents(rollup.booked_gross),
        format_cents(rollup.total_gross),
    ]
}

const ROLLUP_HEADER: [&str; 7] = [
    "shows",
    "estimated_shows",
    "booked_tickets",
    "total_tickets",
    "occupancy_pct",
    "booked_gross",
    "total_gross",
];

/// Writes the five CSV sheets for one reconciled show date. `movie` is the
/// display title recovered from the reference URL, when one was given. An
/// empty record set produces no artifacts at all.
pub fn write_reports(
    records: &[ShowRecord],
    out_dir: &Path,
    date_label: &str,
    movie: Option<&str>,
) -> Result<Vec<PathBuf>> {
    if records.is_empty() {
        warn!("No show data collected; skipping report generation");
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(out_dir)?;

    let mut by_state: BTreeMap<String, Rollup> = BTreeMap::new();
    let mut by_city: BTreeMap<(String, String), Rollup> = BTreeMap::new();
    let mut by_theatre: BTreeMap<(String, String, String), Rollup> = BTreeMap::new();
    let mut grand = Rollup::default();
    let mut from_primary = 0u32;
    let mut from_secondary = 0u32;

    for record in records {
        by_state.entry(record.state.clone()).or_default().add(record);
        by_city
            .entry((record.state.clone(), record.city.clone()))
            .or_default()
            .add(record);
        by_theatre
            .entry((record.state.clone(), record.city.clone(), record.venue.clone()))
            .or_default()
            .add(record);
        grand.add(record);
        match record.source {
            Source::PlatformA => from_primary += 1,
            Source::PlatformB => from_secondary += 1,
        }
    }

    let mut written = Vec::new();

    let path = out_dir.join(format!("state_wise_{}.csv", date_label));
    let mut writer = Writer::from_path(&path)?;
    writer.write_record(["state"].iter().chain(ROLLUP_HEADER.iter()))?;
    for (state, rollup) in &by_state {
        let mut row = vec![state.clone()];
        row.extend(rollup_fields(rollup));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    written.push(path);

    let path = out_dir.join(format!("city_wise_{}.csv", date_label));
    let mut writer = Writer::from_path(&path)?;
    writer.write_record(["state", "city"].iter().chain(ROLLUP_HEADER.iter()))?;
    for ((state, city), rollup) in &by_city {
        let mut row = vec![state.clone(), city.clone()];
        row.extend(rollup_fields(rollup));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    written.push(path);

    let path = out_dir.join(format!("theatre_wise_{}.csv", date_label));
    let mut writer = Writer::from_path(&path)?;
    writer.write_record(["state", "city", "venue"].iter().chain(ROLLUP_HEADER.iter()))?;
    for ((state, city, venue), rollup) in &by_theatre {
        let mut row = vec![state.clone(), city.clone(), venue.clone()];
        row.extend(rollup_fields(rollup));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    written.push(path);

    let path = out_dir.join(format!("show_wise_{}.csv", date_label));
    let mut writer = Writer::from_path(&path)?;
    writer.write_record([
        "state",
        "city",
        "venue",
        "show_time",
        "source",
        "estimated",
        "booked_tickets",
        "total_tickets",
        "occupancy_pct",
        "booked_gross",
        "total_gross",
    ])?;
    for record in records {
        let show_time = record
            .normalized_show_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| record.raw_show_time.clone());
        writer.write_record([
            record.state.clone(),
            record.city.clone(),
            record.venue.clone(),
            show_time,
            record.source.label().to_string(),
            record.is_fallback.to_string(),
            record.booked_tickets.to_string(),
            record.total_tickets.to_string(),
            format!("{:.2}", record.occupancy),
            format_cents(record.booked_gross),
            format_cents(record.total_gross),
        ])?;
    }
    writer.flush()?;
    written.push(path);

    let path = out_dir.join(format!("summary_{}.csv", date_label));
    let mut writer = Writer::from_path(&path)?;
    writer.write_record(
        ["date", "movie", "primary_shows", "secondary_shows"]
            .iter()
            .chain(ROLLUP_HEADER.iter()),
    )?;
    let mut row = vec![
        date_label.to_string(),
        movie.unwrap_or("-").to_string(),
        from_primary.to_string(),
        from_secondary.to_string(),
    ];
    row.extend(rollup_fields(&grand));
    writer.write_record(&row)?;
    writer.flush()?;
    written.push(path);

    info!(
        sheets = written.len(),
        shows = records.len(),
        booked_gross = %format_cents(grand.booked_gross),
        occupancy = grand.occupancy(),
        "Reports written"
    );
    Ok(written)
}
