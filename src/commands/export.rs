//! `export`: copy the raw lines of matching recordings into one file.

use crate::commands::stats::parse_date;
use crate::core::recording::Provider;
use crate::core::store::{read_day_file, RecordingStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Args;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// End date (YYYY-MM-DD), the whole day included
    #[arg(long)]
    pub to: Option<String>,

    /// Only export one provider (claude, openai, gemini)
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Output file path
    #[arg(long, default_value = "export.jsonl")]
    pub output: PathBuf,

    /// Path to recordings directory
    #[arg(long, default_value = "./recordings")]
    pub recordings: PathBuf,
}

/// Selection criteria for an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFilter {
    pub from: Option<NaiveDate>,
    /// Exclusive upper bound
    pub until: DateTime<Utc>,
    pub provider: Option<Provider>,
}

impl ExportFilter {
    /// Build the filter from command-line values.
    ///
    /// `to` covers its whole day; without it the bound is one day from `now`.
    pub fn new(
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        provider: Option<Provider>,
        now: DateTime<Utc>,
    ) -> Self {
        let until = match to.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(start) => start.and_utc() + Duration::days(1),
            None => now + Duration::days(1),
        };
        Self {
            from,
            until,
            provider,
        }
    }

    fn includes_day(&self, date: NaiveDate) -> bool {
        if self.from.is_some_and(|from| date < from) {
            return false;
        }
        date <= self.until.date_naive()
    }

    fn includes(&self, provider: Provider, timestamp: DateTime<Utc>) -> bool {
        if self.provider.is_some_and(|p| p != provider) {
            return false;
        }
        let from_ts = self
            .from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
        if from_ts.is_some_and(|from| timestamp < from) {
            return false;
        }
        timestamp <= self.until
    }
}

/// Write every matching line to `out`; returns how many were written.
pub fn export(store: &RecordingStore, filter: &ExportFilter, out: &mut impl Write) -> Result<usize> {
    let mut count = 0;
    for file in store.day_files()? {
        if !filter.includes_day(file.date) {
            continue;
        }
        let Ok(records) = read_day_file(&file.path) else {
            continue;
        };
        for stored in records {
            if !filter.includes(stored.recording.provider, stored.recording.timestamp) {
                continue;
            }
            out.write_all(&stored.raw)
                .context("failed to write to output")?;
            out.write_all(b"\n").context("failed to write newline")?;
            count += 1;
        }
    }
    Ok(count)
}

pub fn run(args: &ExportArgs) -> Result<()> {
    let from = args
        .from
        .as_deref()
        .map(|value| parse_date(value, "from"))
        .transpose()?;
    let to = args
        .to
        .as_deref()
        .map(|value| parse_date(value, "to"))
        .transpose()?;
    let filter = ExportFilter::new(from, to, args.provider, Utc::now());

    let store = RecordingStore::new(&args.recordings);
    // fail on an empty directory before touching the output
    store.day_files()?;

    let file = File::create(&args.output)
        .with_context(|| format!("failed to create output file: {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    let count = export(&store, &filter, &mut out)?;
    out.flush().context("failed to write to output")?;

    tracing::info!(count, output = %args.output.display(), "export complete");
    Ok(())
}
