use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// One timestamped brightness reading from a recorded camera trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceSample {
    pub timestamp_ms: f64,
    pub value: f64,
}

/// Stamp a uniformly sampled series, first sample at t = 0.
pub fn uniform_trace(values: &[f64], fs: f64) -> Vec<TraceSample> {
    let step_ms = 1000.0 / fs;
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| TraceSample {
            timestamp_ms: i as f64 * step_ms,
            value,
        })
        .collect()
}

/// Read a CSV trace with `timestamp_ms` and `value` columns (any order, extra columns ignored).
pub fn read_trace_csv(path: &Path) -> Result<Vec<TraceSample>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(file);
    let headers = reader.headers().context("reading header")?.clone();
    let ts_idx = locate_column(&headers, "timestamp_ms")?;
    let value_idx = locate_column(&headers, "value")?;

    let mut samples = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading record {}", row + 1))?;
        let timestamp_ms = parse_field(&record, ts_idx, "timestamp_ms", row)?;
        let value = parse_field(&record, value_idx, "value", row)?;
        if let Some(prev) = samples.last().map(|s: &TraceSample| s.timestamp_ms) {
            if timestamp_ms < prev {
                return Err(anyhow!(
                    "record {}: timestamp {} goes backwards (previous {})",
                    row + 1,
                    timestamp_ms,
                    prev
                ));
            }
        }
        samples.push(TraceSample {
            timestamp_ms,
            value,
        });
    }
    if samples.is_empty() {
        anyhow::bail!("no samples found in {}", path.display());
    }
    Ok(samples)
}

pub fn write_trace_csv(path: &Path, samples: &[TraceSample]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str, row: usize) -> Result<f64> {
    record
        .get(idx)
        .ok_or_else(|| anyhow!("record {}: missing {}", row + 1, name))?
        .parse::<f64>()
        .with_context(|| format!("record {}: parsing {}", row + 1, name))
}

fn locate_column(headers: &csv::StringRecord, requested: &str) -> Result<usize> {
    headers
        .iter()
        .position(|name| name.eq_ignore_ascii_case(requested))
        .ok_or_else(|| anyhow!("missing {} column", requested))
}
