//! Report tables derived from [`Stats`], their CSV sinks and the console summary.

use crate::config::ClientMachineInitial;
use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use dbtester_stress::Stats;
use std::path::Path;
use tracing::{debug, info};

/// A finished table: header plus rows of preformatted cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn ms(secs: f64) -> f64 {
    secs * 1000.0
}

/// One row: totals, latency summary in ms, RPS, then one column per error.
pub fn summary_table(stats: &Stats) -> ReportTable {
    let mut table = ReportTable::new(&[
        "TOTAL-SECONDS",
        "SLOWEST-LATENCY-MS",
        "FASTEST-LATENCY-MS",
        "AVERAGE-LATENCY-MS",
        "STDDEV-LATENCY-MS",
        "REQUESTS-PER-SECOND",
    ]);
    let mut row = vec![
        format!("{:4.4}", stats.total.as_secs_f64()),
        format!("{:4.4}", ms(stats.slowest)),
        format!("{:4.4}", ms(stats.fastest)),
        format!("{:4.4}", ms(stats.average)),
        format!("{:4.4}", ms(stats.stddev)),
        format!("{:4.4}", stats.rps),
    ];
    for (message, count) in &stats.error_dist {
        table.header.push(format!("ERROR: {message}"));
        row.push(count.to_string());
    }
    table.rows.push(row);
    table
}

pub fn percentile_table(stats: &Stats) -> ReportTable {
    let mut table = ReportTable::new(&["LATENCY-PERCENTILE", "LATENCY-MS"]);
    for (p, secs) in stats.percentiles() {
        table
            .rows
            .push(vec![format!("p-{p:.1}"), format!("{:.6}", ms(secs))]);
    }
    table
}

pub fn histogram_table(stats: &Stats) -> ReportTable {
    let mut table = ReportTable::new(&["LATENCY-MS", "COUNT"]);
    for bucket in stats.histogram() {
        table
            .rows
            .push(vec![bucket.latency_ms.to_string(), bucket.count.to_string()]);
    }
    table
}

pub fn timeseries_table(stats: &Stats) -> ReportTable {
    let mut table = ReportTable::new(&["UNIX-TS", "AVG-LATENCY-MS", "AVG-THROUGHPUT"]);
    for point in &stats.time_series {
        table.rows.push(vec![
            point.timestamp.to_string(),
            format!("{:.6}", ms(point.avg_latency)),
            point.throughput.to_string(),
        ]);
    }
    table
}

/// Write every table whose output path is configured.
pub fn save_reports(paths: &ClientMachineInitial, stats: &Stats) -> Result<()> {
    let sinks = [
        (&paths.client_latency_distribution_summary_path, summary_table(stats)),
        (&paths.client_latency_distribution_percentile_path, percentile_table(stats)),
        (&paths.client_latency_distribution_all_path, histogram_table(stats)),
        (&paths.client_latency_throughput_timeseries_path, timeseries_table(stats)),
    ];
    for (path, table) in sinks {
        if path.as_os_str().is_empty() {
            debug!("no output path for {}; skipping", table.header[0]);
            continue;
        }
        table.write_csv(path)?;
        info!("wrote {} rows to {}", table.rows.len(), path.display());
    }
    Ok(())
}

/// Human summary of one run.
pub fn format_summary(stats: &Stats) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Total"), Cell::new(format!("{:?}", stats.total))]);
    table.add_row(vec![
        Cell::new("Requests"),
        Cell::new(stats.observation_count()),
    ]);
    table.add_row(vec![
        Cell::new("Slowest"),
        Cell::new(format!("{:.6} secs", stats.slowest)),
    ]);
    table.add_row(vec![
        Cell::new("Fastest"),
        Cell::new(format!("{:.6} secs", stats.fastest)),
    ]);
    table.add_row(vec![
        Cell::new("Average"),
        Cell::new(format!("{:.6} secs", stats.average)),
    ]);
    table.add_row(vec![
        Cell::new("Stddev"),
        Cell::new(format!("{:.6} secs", stats.stddev)),
    ]);
    table.add_row(vec![
        Cell::new("Requests/sec"),
        Cell::new(format!("{:4.4}", stats.rps)),
    ]);
    for (message, count) in &stats.error_dist {
        table.add_row(vec![Cell::new(format!("Error: {message}")), Cell::new(count)]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dbtester_stress::ResultObservation;

    fn stats() -> Stats {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let obs = |offset_ms: i64, latency_ms: i64, err: Option<&str>| {
            let start = base + chrono::Duration::milliseconds(offset_ms);
            ResultObservation::new(
                err.map(str::to_string),
                start,
                start + chrono::Duration::milliseconds(latency_ms),
            )
        };
        Stats::from_observations(&[
            obs(0, 12, None),
            obs(300, 25, Some("etcdserver: request timed out")),
            obs(1200, 31, None),
        ])
    }

    #[test]
    fn test_summary_has_error_columns() {
        let table = summary_table(&stats());
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.header.len(), 7);
        assert_eq!(table.header[6], "ERROR: etcdserver: request timed out");
        assert_eq!(table.rows[0][6], "1");
        assert_eq!(table.rows[0][0], "1.2310");
    }

    #[test]
    fn test_percentile_rows() {
        let table = percentile_table(&stats());
        assert_eq!(table.rows.len(), 8);
        assert_eq!(table.rows[0][0], "p-10.0");
        assert_eq!(table.rows[7][0], "p-99.9");
    }

    #[test]
    fn test_histogram_rows_dense() {
        let table = histogram_table(&stats());
        let buckets: Vec<&str> = table.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(buckets, vec!["10", "20", "30"]);
    }

    #[test]
    fn test_summary_console() {
        let text = format_summary(&stats());
        assert!(text.contains("Requests/sec"));
        assert!(text.contains("etcdserver: request timed out"));
    }
}
