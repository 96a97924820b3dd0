//! One-shot `start`, `stop` and `restart`.

use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use super::{Runtime, Workspace};
use crate::orchestrator::{ShutdownReport, StartReport};
use crate::ui::status::{start_line, stop_line};

/// Check requested names up front so a typo fails before anything moves.
fn select(runtime: &mut Runtime, services: Vec<String>) -> Result<Vec<String>> {
    if services.is_empty() {
        return Ok(runtime.controller.specs().map(|s| s.name.clone()).collect());
    }
    for name in &services {
        runtime.controller.phase(name)?;
    }
    Ok(services)
}

fn print_started(report: &StartReport) {
    if report.exited_early.is_some() || !report.foreign.is_empty() {
        println!("  {} {}", "!".yellow(), start_line(report));
    } else {
        println!("  {} {}", "\u{2713}".green(), start_line(report));
    }
}

fn print_shutdown(report: &ShutdownReport) {
    for stop in &report.stops {
        println!("  {}", stop_line(stop));
    }
    if let Some(sweep) = &report.sweep {
        if !sweep.matched.is_empty() {
            println!("  swept {} leftover process(es)", sweep.matched.len());
        }
        for failed in sweep.terminations.iter().filter(|t| !t.succeeded()) {
            println!("  {} pid {} survived the sweep", "\u{2717}".red(), failed.pid);
        }
    }
}

/// Block until Ctrl-C, then stop everything.
async fn stream_until_interrupted(mut runtime: Runtime) -> Result<()> {
    println!();
    println!("  Streaming logs, press Ctrl-C to stop.");
    println!();
    tokio::signal::ctrl_c().await?;
    println!();
    let report = runtime.controller.shutdown().await;
    print_shutdown(&report);
    runtime.close().await;
    Ok(())
}

pub async fn run_start(config_file: Option<&Path>, services: Vec<String>) -> Result<()> {
    let workspace = Workspace::load(config_file)?;
    let mut runtime = Runtime::new(&workspace);
    let names = select(&mut runtime, services)?;

    let mut started = 0;
    for name in &names {
        match runtime.controller.start(name).await {
            Ok(report) => {
                print_started(&report);
                started += 1;
            }
            Err(e) => eprintln!("  {} {}", "\u{2717}".red(), e),
        }
    }

    if started == 0 {
        let report = runtime.controller.shutdown().await;
        print_shutdown(&report);
        runtime.close().await;
        anyhow::bail!("no service could be started");
    }
    stream_until_interrupted(runtime).await
}

pub async fn run_stop(config_file: Option<&Path>, services: Vec<String>) -> Result<()> {
    let workspace = Workspace::load(config_file)?;
    let mut runtime = Runtime::new(&workspace);

    let mut busy = false;
    if services.is_empty() {
        let report = runtime.controller.shutdown().await;
        print_shutdown(&report);
        busy = report.stops.iter().any(|s| s.remaining.is_occupied());
    } else {
        for name in select(&mut runtime, services)? {
            let report = runtime.controller.stop(&name).await?;
            println!("  {}", stop_line(&report));
            busy |= report.remaining.is_occupied();
        }
    }
    runtime.close().await;

    if busy {
        anyhow::bail!("some ports are still occupied");
    }
    Ok(())
}

pub async fn run_restart(config_file: Option<&Path>) -> Result<()> {
    let workspace = Workspace::load(config_file)?;
    let mut runtime = Runtime::new(&workspace);

    let report = runtime.controller.restart().await;
    for stop in &report.stops {
        if stop.stopped_pid.is_some() || !stop.reclaim.targeted.is_empty() {
            println!("  {}", stop_line(stop));
        }
    }
    let mut started = 0;
    for start in &report.starts {
        match start {
            Ok(r) => {
                print_started(r);
                started += 1;
            }
            Err(e) => eprintln!("  {} {}", "\u{2717}".red(), e),
        }
    }

    if started == 0 {
        let report = runtime.controller.shutdown().await;
        print_shutdown(&report);
        runtime.close().await;
        anyhow::bail!("no service could be started");
    }
    stream_until_interrupted(runtime).await
}
