//! Rendering of check results: console table, summary, JSON and CSV files

use crate::proxy::models::{BatchStats, CheckResult};
use crate::Result;
use anyhow::{anyhow, Context};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// File format for [`write_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(anyhow!("Invalid output format: {}. Use: json, csv", s)),
        }
    }
}

const TABLE_HEADER: [&str; 13] = [
    "IP:PORT",
    "ALIVE",
    "LAT(ms)",
    "COUNTRY",
    "CITY",
    "ISP",
    "ANONYMITY",
    "FRAUD",
    "STATUS",
    "SMTP",
    "POP3",
    "IMAP",
    "UDP",
];

fn dash_if_empty(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "y"
    } else {
        "n"
    }
}

fn table_row(r: &CheckResult) -> Vec<String> {
    let latency = if r.latency_ms > 0 && r.is_alive() {
        r.latency_ms.to_string()
    } else {
        "-".to_string()
    };
    let fraud = if r.fraud_score > 0.0 {
        format!("{:.1}", r.fraud_score)
    } else {
        "-".to_string()
    };
    let status = if r.status_code > 0 {
        r.status_code.to_string()
    } else {
        r.error.as_deref().map(dash_if_empty).unwrap_or_else(|| "-".to_string())
    };

    vec![
        r.proxy.key(),
        if r.is_alive() { "yes" } else { "no" }.to_string(),
        latency,
        dash_if_empty(&r.country),
        dash_if_empty(&r.city),
        dash_if_empty(&r.isp),
        r.anonymity.to_string(),
        fraud,
        status,
        yes_no(r.capabilities.smtp).to_string(),
        yes_no(r.capabilities.pop3).to_string(),
        yes_no(r.capabilities.imap).to_string(),
        yes_no(r.capabilities.udp).to_string(),
    ]
}

/// Print an aligned table with one row per result
pub fn print_results_table<W: Write>(w: &mut W, results: &[CheckResult]) -> Result<()> {
    let rows: Vec<Vec<String>> = results.iter().map(table_row).collect();

    let mut widths: Vec<usize> = TABLE_HEADER.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header: Vec<String> = TABLE_HEADER.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        writeln!(w, "{}", line.join("  ").trim_end())?;
    }
    Ok(())
}

/// Print the batch summary block
pub fn print_summary<W: Write>(w: &mut W, stats: &BatchStats) -> Result<()> {
    writeln!(w)?;
    writeln!(w, "Summary:")?;
    writeln!(w, "  Total proxies:            {}", stats.total_proxies)?;
    writeln!(w, "  Unique proxies:           {}", stats.unique_proxies)?;
    writeln!(w, "  Alive proxies:            {}", stats.alive_proxies)?;
    writeln!(w, "  Success rate:             {:.1} %", stats.success_rate_pct)?;
    writeln!(w, "  Avg latency (alive):      {:.1} ms", stats.avg_latency_ms)?;
    writeln!(w, "  Avg fraud score (alive):  {:.1}", stats.avg_fraud_score)?;
    writeln!(
        w,
        "  Batch time:               {:.2} s",
        stats.total_processing_time_ms as f64 / 1000.0
    )?;
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    results: &'a [CheckResult],
    summary: &'a BatchStats,
}

/// Write results and summary to `path`
pub fn write_file<P: AsRef<Path>>(
    path: P,
    format: OutputFormat,
    results: &[CheckResult],
    stats: &BatchStats,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Json => write_json(&mut writer, results, stats)?,
        OutputFormat::Csv => write_csv(&mut writer, results)?,
    }
    writer.flush()?;
    Ok(())
}

/// `{"results": [...], "summary": {...}}`
pub fn write_json<W: Write>(w: W, results: &[CheckResult], stats: &BatchStats) -> Result<()> {
    let report = JsonReport {
        results,
        summary: stats,
    };
    serde_json::to_writer_pretty(w, &report)?;
    Ok(())
}

/// One row per result; the summary is not part of the CSV
pub fn write_csv<W: Write>(w: W, results: &[CheckResult]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(w);

    writer.write_record([
        "host",
        "port",
        "alive",
        "latency_ms",
        "country",
        "city",
        "isp",
        "ip",
        "anonymity",
        "fraud_score",
        "status_code",
        "error",
        "smtp",
        "pop3",
        "imap",
        "udp",
    ])?;

    for r in results {
        writer.write_record([
            r.proxy.host.clone(),
            r.proxy.port.to_string(),
            yes_no(r.is_alive()).to_string(),
            r.latency_ms.to_string(),
            r.country.clone(),
            r.city.clone(),
            r.isp.clone(),
            r.ip.clone(),
            r.anonymity.to_string(),
            format!("{:.1}", r.fraud_score),
            r.status_code.to_string(),
            r.error.clone().unwrap_or_default(),
            yes_no(r.capabilities.smtp).to_string(),
            yes_no(r.capabilities.pop3).to_string(),
            yes_no(r.capabilities.imap).to_string(),
            yes_no(r.capabilities.udp).to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
