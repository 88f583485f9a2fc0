//! Report sinks: per-policy lines, a single summary, or CSV rows.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::types::{OutputMode, PolicyResult, Summary};
use crate::utils::config::CSV_HEADER;

/// Quote a CSV field when it contains a separator, quote or line break (RFC 4180).
pub fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn write_csv_record<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    let line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", line)
}

pub fn write_csv_row<W: Write>(out: &mut W, r: &PolicyResult) -> io::Result<()> {
    let link = r.console_url();
    let conditions = r.conditions.to_string();
    let time_series = r.time_series.to_string();
    let price = format!("{:.2}", r.price);
    write_csv_record(
        out,
        &[
            &r.project_id,
            &r.name,
            &link,
            &r.display_name,
            &conditions,
            &time_series,
            &price,
            r.error.as_deref().unwrap_or(""),
        ],
    )
}

pub fn write_line<W: Write>(out: &mut W, r: &PolicyResult) -> io::Result<()> {
    writeln!(
        out,
        "Alerting Policy {} ({}) has {} condition(s) and {} time series. It will cost approximately ${:.6}",
        r.display_name, r.name, r.conditions, r.time_series, r.price
    )
}

pub fn write_summary<W: Write>(out: &mut W, s: &Summary) -> io::Result<()> {
    writeln!(
        out,
        "Summary: You have {} policies with a combined total of {} conditions and {} time series. It will cost approximately ${:.6}",
        s.policies, s.conditions, s.time_series, s.price
    )
}

/// Where results go while the stream is consumed.
pub enum ReportSink {
    Lines(Box<dyn Write>),
    Summary {
        out: Box<dyn Write>,
        totals: Summary,
    },
    Csv(Box<dyn Write>),
}

impl ReportSink {
    /// Sink for `mode`: stdout, or a freshly created CSV file.
    pub fn open(mode: &OutputMode) -> Result<Self> {
        match mode {
            OutputMode::Lines => Ok(Self::Lines(Box::new(io::stdout()))),
            OutputMode::Summary => Ok(Self::summary(Box::new(io::stdout()))),
            OutputMode::Csv(path) => {
                let file = File::create(path)
                    .with_context(|| format!("create CSV file {}", path.display()))?;
                Self::csv(Box::new(BufWriter::new(file)))
            }
        }
    }

    pub fn summary(out: Box<dyn Write>) -> Self {
        Self::Summary {
            out,
            totals: Summary::default(),
        }
    }

    /// CSV sink; the header is written immediately.
    pub fn csv(mut out: Box<dyn Write>) -> Result<Self> {
        write_csv_record(&mut out, &CSV_HEADER).context("write CSV header")?;
        out.flush().context("flush CSV header")?;
        Ok(Self::Csv(out))
    }

    pub fn record(&mut self, r: &PolicyResult) -> Result<()> {
        match self {
            Self::Lines(out) => write_line(out, r).context("write result")?,
            Self::Summary { totals, .. } => totals.add(r),
            Self::Csv(out) => {
                write_csv_row(out, r).context("write CSV row")?;
                // Each row is flushed so an interrupted run keeps what it priced.
                out.flush().context("flush CSV row")?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        match self {
            Self::Lines(mut out) | Self::Csv(mut out) => out.flush().context("flush report")?,
            Self::Summary { mut out, totals } => {
                write_summary(&mut out, &totals).context("write summary")?;
                out.flush().context("flush report")?;
            }
        }
        Ok(())
    }
}
