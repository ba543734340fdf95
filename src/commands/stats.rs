//! `stats`: request counts, error rates and latency per provider.

use crate::core::recording::{Provider, Recording};
use crate::core::store::{read_day_file, RecordingStore};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Only count one provider (claude, openai, gemini)
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Path to recordings directory
    #[arg(long, default_value = "./recordings")]
    pub recordings: PathBuf,
}

/// Running totals for one group of recordings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub requests: u64,
    pub errors: u64,
    pub total_duration_ms: i64,
}

impl Counters {
    fn add(&mut self, rec: &Recording) {
        self.requests += 1;
        self.total_duration_ms += rec.timing.duration_ms;
        if rec.response.status >= 400 {
            self.errors += 1;
        }
    }

    /// Percentage of requests with status >= 400.
    pub fn error_rate(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.errors as f64 / self.requests as f64 * 100.0)
    }

    pub fn average_duration_ms(&self) -> Option<f64> {
        (self.requests > 0).then(|| self.total_duration_ms as f64 / self.requests as f64)
    }
}

#[derive(Debug, Default)]
pub struct Statistics {
    pub overall: Counters,
    pub by_provider: BTreeMap<Provider, Counters>,
}

impl Statistics {
    pub fn add(&mut self, rec: &Recording) {
        self.overall.add(rec);
        self.by_provider.entry(rec.provider).or_default().add(rec);
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "=== Overall Statistics ===")?;
        writeln!(out, "Total Requests: {}", self.overall.requests)?;
        writeln!(out, "Total Errors: {}", self.overall.errors)?;
        write_rates(out, &self.overall)?;

        for (provider, counters) in &self.by_provider {
            writeln!(out)?;
            writeln!(out, "=== {} ===", provider.as_str().to_uppercase())?;
            writeln!(out, "Requests: {}", counters.requests)?;
            writeln!(out, "Errors: {}", counters.errors)?;
            write_rates(out, counters)?;
        }
        Ok(())
    }
}

fn write_rates(out: &mut impl Write, counters: &Counters) -> io::Result<()> {
    if let (Some(rate), Some(avg)) = (counters.error_rate(), counters.average_duration_ms()) {
        writeln!(out, "Error Rate: {:.2}%", rate)?;
        writeln!(out, "Average Response Time: {:.2}ms", avg)?;
    }
    Ok(())
}

pub fn parse_date(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid {} date: {}", flag, value))
}

/// Aggregate every recording matching the filters.
pub fn collect(
    store: &RecordingStore,
    from: Option<NaiveDate>,
    provider: Option<Provider>,
) -> Result<Statistics> {
    let from_ts = from.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc());
    let mut stats = Statistics::default();

    for file in store.day_files()? {
        if from.is_some_and(|from| file.date < from) {
            continue;
        }
        let Ok(records) = read_day_file(&file.path) else {
            continue;
        };
        for stored in records {
            let rec = &stored.recording;
            if provider.is_some_and(|p| rec.provider != p) {
                continue;
            }
            if from_ts.is_some_and(|from| rec.timestamp < from) {
                continue;
            }
            stats.add(rec);
        }
    }
    Ok(stats)
}

pub fn run(args: &StatsArgs) -> Result<()> {
    let from = args
        .from
        .as_deref()
        .map(|value| parse_date(value, "from"))
        .transpose()?;
    let store = RecordingStore::new(&args.recordings);
    let stats = collect(&store, from, args.provider)?;

    let stdout = io::stdout();
    stats.write_to(&mut stdout.lock())?;
    Ok(())
}
