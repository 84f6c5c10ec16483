use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::info;

use crate::coordinator::{EndpointStatus, EndpointSummary, RunReport, NOT_AVAILABLE};
use crate::eta::{Eta, EtaPolicy};
use crate::profile::{ColumnLayout, UNKNOWN_CHAIN};

/// `90061` -> `1d 1h 1m 1s`. Negative values count as zero.
pub fn human_duration(seconds: f64) -> String {
    if seconds.is_infinite() || seconds.is_nan() {
        return "∞".to_string();
    }
    let total = if seconds < 0.0 { 0 } else { seconds as u64 };
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn eta_label(eta: &Eta) -> String {
    match eta {
        Eta::Seconds(secs) => human_duration(*secs),
        Eta::Synced => "SYNCED".to_string(),
        Eta::InsufficientData => "Not enough data".to_string(),
        Eta::NotDecreasing => "Block lag not decreasing".to_string(),
        Eta::StableOrIncreasing => "Lag stable/increasing".to_string(),
    }
}

pub fn format_chain_id(chain_id: Option<u64>) -> String {
    match chain_id {
        Some(id) => format!("{} / {:#x}", id, id),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn eta_header(policy: &EtaPolicy) -> String {
    match policy {
        EtaPolicy::TrendToZero { .. } => "ETA".to_string(),
        EtaPolicy::TrendToTarget {
            target_lag_secs, ..
        } => format!("ETA<={}s", target_lag_secs),
    }
}

/// Cells of one table row, in display order.
struct Row {
    endpoint: String,
    latency: String,
    lag: String,
    eta: String,
    block: String,
    chain_name: String,
    chain_id: String,
    network_id: String,
    client_version: String,
}

impl Row {
    fn failed(name: &str, layout: &ColumnLayout) -> Self {
        let na = NOT_AVAILABLE.to_string();
        Self {
            endpoint: name.to_string(),
            latency: na.clone(),
            lag: na.clone(),
            eta: layout.failed_marker.to_string(),
            block: na.clone(),
            chain_name: if layout.chain_name_first {
                na.clone()
            } else {
                UNKNOWN_CHAIN.to_string()
            },
            chain_id: na.clone(),
            network_id: na.clone(),
            client_version: na,
        }
    }

    fn connected(name: &str, summary: &EndpointSummary, layout: &ColumnLayout) -> Self {
        let block = summary.latest_block.unwrap_or(0);
        Self {
            endpoint: name.to_string(),
            latency: format!("{:.2}", summary.average_latency.as_secs_f64() * 1000.0),
            lag: human_duration(summary.average_lag_secs),
            eta: eta_label(&summary.eta),
            block: if layout.group_block_digits {
                group_digits(block)
            } else {
                block.to_string()
            },
            chain_name: summary.chain_name.clone(),
            chain_id: format_chain_id(summary.chain_id),
            network_id: summary
                .network_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            client_version: summary.client_version.clone(),
        }
    }

    fn render(&self, layout: &ColumnLayout, show_network_id: bool) -> String {
        let mut line = format!(
            "[{:<ew$}] {:>15} {:>lw$} {:>tw$} {:>12} ",
            self.endpoint,
            self.latency,
            self.lag,
            self.eta,
            self.block,
            ew = layout.endpoint_width.saturating_sub(3),
            lw = layout.lag_width,
            tw = layout.eta_width,
        );
        line.push_str(&chain_cells(
            layout,
            &self.chain_name,
            &self.chain_id,
        ));
        if show_network_id {
            line.push_str(&format!("{:>8} ", self.network_id));
        }
        line.push_str(&self.client_version);
        line
    }
}

fn chain_cells(layout: &ColumnLayout, chain_name: &str, chain_id: &str) -> String {
    if layout.chain_name_first {
        format!(
            "{:>cw$} {:>iw$} ",
            chain_name,
            chain_id,
            cw = layout.chain_width,
            iw = layout.chain_id_width
        )
    } else {
        format!(
            "{:>iw$} {:<cw$} ",
            chain_id,
            chain_name,
            cw = layout.chain_width,
            iw = layout.chain_id_width
        )
    }
}

fn header(report: &RunReport, layout: &ColumnLayout) -> String {
    let mut hdr = format!(
        "{:<ew$}{:>15} {:>lw$} {:>tw$} {:>12} ",
        "Endpoint",
        "AvgLatency (ms)",
        "AvgBlockLag",
        eta_header(&report.eta_policy),
        "Block",
        ew = layout.endpoint_width,
        lw = layout.lag_width,
        tw = layout.eta_width,
    );
    hdr.push_str(&chain_cells(layout, "Chain", "ChainId"));
    if report.show_network_id {
        hdr.push_str(&format!("{:>8} ", "NetId"));
    }
    hdr.push_str("Client Version");
    hdr
}

fn rows(report: &RunReport, layout: &ColumnLayout) -> Vec<Row> {
    report
        .endpoints
        .iter()
        .map(|endpoint| match &endpoint.status {
            EndpointStatus::Connected(summary) => Row::connected(&endpoint.name, summary, layout),
            EndpointStatus::ConnectionFailed { .. } => Row::failed(&endpoint.name, layout),
        })
        .collect()
}

/// Table lines, header first.
pub fn render_table(report: &RunReport, layout: &ColumnLayout) -> Vec<String> {
    let hdr = header(report, layout);
    let rule = "=".repeat(hdr.chars().count());
    let mut lines = vec![hdr, rule];
    lines.extend(
        rows(report, layout)
            .iter()
            .map(|row| row.render(layout, report.show_network_id)),
    );
    lines
}

pub fn log_report(report: &RunReport, layout: &ColumnLayout) {
    info!("Average metrics after the test completes:");
    for line in render_table(report, layout) {
        info!("{}", line);
    }
}

/// Write `<group>_summary.csv` into `output_dir`.
pub fn write_csv(report: &RunReport, group: &str, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let file_path = output_dir.join(format!("{}_summary.csv", group));
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&file_path)?;

    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record([
        "Endpoint",
        "Status",
        "Requests",
        "Avg Latency (ms)",
        "Avg Block Lag (s)",
        "ETA",
        "ETA (s)",
        "Block",
        "Chain",
        "Chain Id",
        "Network Id",
        "Client Version",
    ])?;

    for endpoint in &report.endpoints {
        let record: Vec<String> = match &endpoint.status {
            EndpointStatus::Connected(s) => vec![
                endpoint.name.clone(),
                "ok".to_string(),
                s.requests.to_string(),
                format!("{:.3}", s.average_latency.as_secs_f64() * 1000.0),
                format!("{:.3}", s.average_lag_secs),
                eta_label(&s.eta),
                s.eta.as_secs().map(|v| format!("{:.1}", v)).unwrap_or_default(),
                s.latest_block.map(|b| b.to_string()).unwrap_or_default(),
                s.chain_name.clone(),
                s.chain_id.map(|id| id.to_string()).unwrap_or_default(),
                s.network_id.map(|id| id.to_string()).unwrap_or_default(),
                s.client_version.clone(),
            ],
            EndpointStatus::ConnectionFailed { reason } => {
                let mut cells = vec![String::new(); 12];
                cells[0] = endpoint.name.clone();
                cells[1] = "connection failed".to_string();
                cells[2] = "0".to_string();
                cells[5] = reason.clone();
                cells
            }
        };
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    info!("Summary written to {}", file_path.display());
    Ok(file_path)
}
