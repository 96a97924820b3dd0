use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::orchestrator::ports::join_pids;
use crate::orchestrator::{PortState, ServiceStatus, StartReport, StatusSnapshot, StopReport};
use crate::stats::format_bytes;

fn state_text(svc: &ServiceStatus, use_color: bool) -> String {
    let (label, detail) = match svc.state {
        PortState::Running => ("running", svc.own_pid.map(|p| format!(" (pid {})", p))),
        PortState::Foreign => ("foreign", Some(format!(" (pid {})", join_pids(&svc.foreign)))),
        PortState::Stopped => ("stopped", None),
        PortState::Unknown => ("unknown", None),
    };
    let detail = detail.unwrap_or_default();
    if !use_color {
        return format!("\u{25cf} {}{}", label, detail);
    }
    match svc.state {
        PortState::Running => format!("{} {}{}", "\u{25cf}".green(), label.green(), detail),
        PortState::Foreign => format!("{} {}{}", "\u{25cf}".yellow(), label.yellow(), detail),
        PortState::Stopped => format!("{} {}", "\u{25cf}".dimmed(), label.dimmed()),
        PortState::Unknown => format!("{} {}", "\u{25cf}".red(), label.red()),
    }
}

fn uptime_text(svc: &ServiceStatus) -> String {
    svc.uptime_secs
        .map(|s| humantime::format_duration(std::time::Duration::from_secs(s)).to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_status(snapshot: &StatusSnapshot, use_color: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Service"),
        Cell::new("Port").set_alignment(CellAlignment::Right),
        Cell::new("State"),
        Cell::new("Uptime"),
        Cell::new("CPU").set_alignment(CellAlignment::Right),
        Cell::new("Memory").set_alignment(CellAlignment::Right),
    ]);

    for svc in &snapshot.services {
        let counted = matches!(svc.state, PortState::Running | PortState::Foreign);
        table.add_row(vec![
            Cell::new(&svc.name),
            Cell::new(svc.port).set_alignment(CellAlignment::Right),
            Cell::new(state_text(svc, use_color)),
            Cell::new(uptime_text(svc)),
            Cell::new(if counted {
                format!("{:.1}%", svc.stats.cpu_percent)
            } else {
                "-".to_string()
            })
            .set_alignment(CellAlignment::Right),
            Cell::new(if counted {
                format_bytes(svc.stats.memory_bytes)
            } else {
                "-".to_string()
            })
            .set_alignment(CellAlignment::Right),
        ]);
    }

    let mut out = String::new();
    for line in table.to_string().lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    let mem = snapshot.memory;
    if mem.total_bytes > 0 {
        let pct = mem.used_bytes as f64 * 100.0 / mem.total_bytes as f64;
        out.push_str(&format!(
            "  System RAM: {} / {} ({:.0}%)\n",
            format_bytes(mem.used_bytes),
            format_bytes(mem.total_bytes),
            pct
        ));
    }
    for svc in &snapshot.services {
        if let crate::orchestrator::ports::PortInspection::Unknown { reason } = &svc.listeners {
            out.push_str(&format!("  {}: port {} could not be inspected: {}\n", svc.name, svc.port, reason));
        }
    }
    out
}

/// One line describing a finished start.
pub fn start_line(report: &StartReport) -> String {
    let mut line = format!(
        "{} started on port {} (pid {})",
        report.service, report.port, report.pid
    );
    if !report.reclaim.targeted.is_empty() {
        line.push_str(&format!(", evicted {}", join_pids(&report.reclaim.targeted)));
    }
    if let Some(state) = &report.exited_early {
        line.push_str(&format!(", but it {} during startup", state));
    } else if !report.foreign.is_empty() {
        line.push_str(&format!(
            ", but port is also held by {}",
            join_pids(&report.foreign)
        ));
    }
    line
}

/// One line describing a finished stop.
pub fn stop_line(report: &StopReport) -> String {
    let mut line = match report.stopped_pid {
        Some(pid) if report.graceful => format!("{} stopped (pid {})", report.service, pid),
        Some(pid) => format!("{} killed (pid {})", report.service, pid),
        None => format!("{} was not running", report.service),
    };
    if !report.reclaim.targeted.is_empty() {
        line.push_str(&format!(
            ", freed port {} from {}",
            report.port,
            join_pids(&report.reclaim.targeted)
        ));
    }
    if report.remaining.is_occupied() {
        line.push_str(&format!(", port {} still held by {}", report.port, report.remaining));
    }
    line
}
