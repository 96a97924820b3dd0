use std::collections::BTreeMap;

use anyhow::{Context, Result};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, Table};
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::cli::OutputFormat;
use crate::config::model::TimingConfig;
use crate::orchestrator::ports::{PortInspection, PortInspector, SystemPortInspector};

#[derive(Debug, Serialize)]
pub struct PortReport {
    pub port: u16,
    pub listeners: PortInspection,
    /// Executable names of the listening PIDs, where still visible.
    pub names: BTreeMap<u32, String>,
}

fn process_names(reports: &mut [PortReport]) {
    let mut system = System::new();
    system.refresh_processes();
    for report in reports {
        for pid in report.listeners.pids() {
            if let Some(process) = system.process(Pid::from_u32(pid)) {
                report.names.insert(pid, process.name().to_string());
            }
        }
    }
}

pub async fn inspect_ports<I: PortInspector>(inspector: &I, ports: &[u16]) -> Vec<PortReport> {
    let mut reports = Vec::with_capacity(ports.len());
    for &port in ports {
        reports.push(PortReport {
            port,
            listeners: inspector.inspect(port).await,
            names: BTreeMap::new(),
        });
    }
    reports
}

pub fn render(reports: &[PortReport]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec![
        Cell::new("Port").set_alignment(CellAlignment::Right),
        Cell::new("Listeners"),
        Cell::new("Process"),
    ]);
    for report in reports {
        let names: Vec<&str> = report.names.values().map(String::as_str).collect();
        table.add_row(vec![
            Cell::new(report.port).set_alignment(CellAlignment::Right),
            Cell::new(report.listeners.to_string()),
            Cell::new(if names.is_empty() { "-".to_string() } else { names.join(", ") }),
        ]);
    }
    table.to_string()
}

pub async fn run(ports: Vec<u16>, format: OutputFormat) -> Result<()> {
    let inspector = SystemPortInspector::new(TimingConfig::default().query_timeout);
    let mut reports = inspect_ports(&inspector, &ports).await;
    process_names(&mut reports);

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&reports).context("serializing port report")?;
            println!("{}", json);
        }
        OutputFormat::Table => println!("{}", render(&reports)),
    }
    Ok(())
}
