//! Interactive operator menu.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use super::{Runtime, Workspace};
use crate::orchestrator::launcher::ProcessLauncher;
use crate::orchestrator::ports::{join_pids, PortInspector};
use crate::orchestrator::terminate::ProcessTerminator;
use crate::orchestrator::{Controller, ShutdownReport};
use crate::stats::{StatsSource, SysinfoStats};
use crate::ui::spinner::Spinner;
use crate::ui::status::{render_status, start_line, stop_line};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Start(String),
    StartAll,
    Stop(String),
    StopAll,
    Restart,
    Refresh,
    Exit,
}

impl MenuAction {
    fn label(&self) -> String {
        match self {
            MenuAction::Start(name) => format!("Start {}", name),
            MenuAction::StartAll => "Start all".to_string(),
            MenuAction::Stop(name) => format!("Stop {}", name),
            MenuAction::StopAll => "Stop all".to_string(),
            MenuAction::Restart => "Restart".to_string(),
            MenuAction::Refresh => "Refresh".to_string(),
            MenuAction::Exit => "Exit".to_string(),
        }
    }
}

/// Menu entries, numbered from 1 in this order.
pub fn build_menu(names: &[String]) -> Vec<MenuAction> {
    let mut menu: Vec<MenuAction> = names.iter().cloned().map(MenuAction::Start).collect();
    menu.push(MenuAction::StartAll);
    menu.extend(names.iter().cloned().map(MenuAction::Stop));
    menu.push(MenuAction::StopAll);
    menu.extend([MenuAction::Restart, MenuAction::Refresh, MenuAction::Exit]);
    menu
}

pub fn render_menu(menu: &[MenuAction]) -> String {
    const PER_ROW: usize = 3;
    let cells: Vec<String> = menu
        .iter()
        .enumerate()
        .map(|(i, action)| format!("[{}] {}", i + 1, action.label()))
        .collect();
    let width = cells.iter().map(|c| c.len()).max().unwrap_or(0) + 3;
    let mut out = String::new();
    for row in cells.chunks(PER_ROW) {
        out.push_str("  ");
        for (i, cell) in row.iter().enumerate() {
            if i + 1 == row.len() {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{:<width$}", cell, width = width));
            }
        }
        out.push('\n');
    }
    out
}

pub fn parse_choice<'m>(input: &str, menu: &'m [MenuAction]) -> Option<&'m MenuAction> {
    let n: usize = input.trim().parse().ok()?;
    menu.get(n.checked_sub(1)?)
}

/// What a prompt produced.
enum Input {
    Line(String),
    /// EOF or Ctrl-C.
    Closed,
}

#[derive(Debug)]
pub enum ShellExit {
    /// Services were stopped and ports reclaimed.
    Shutdown(ShutdownReport),
    /// The operator chose to leave at the initial port check.
    Aborted,
}

pub struct Shell<'a, I, T, L, S, R, W> {
    controller: &'a mut Controller<I, T, L>,
    stats: &'a S,
    input: Lines<R>,
    out: W,
    cancel: CancellationToken,
    terminal: bool,
}

impl<'a, I, T, L, S, R, W> Shell<'a, I, T, L, S, R, W>
where
    I: PortInspector,
    T: ProcessTerminator,
    L: ProcessLauncher,
    S: StatsSource,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        controller: &'a mut Controller<I, T, L>,
        stats: &'a S,
        input: R,
        out: W,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            stats,
            input: input.lines(),
            out,
            cancel,
            terminal: false,
        }
    }

    /// Clear the screen between menus and color the status table.
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    async fn read_line(&mut self, prompt: &str) -> Result<Input> {
        write!(self.out, "{}", prompt)?;
        self.out.flush()?;
        loop {
            let line = tokio::select! {
                line = self.input.next_line() => line,
                _ = self.cancel.cancelled() => {
                    writeln!(self.out)?;
                    return Ok(Input::Closed);
                }
            };
            match line {
                Ok(Some(line)) => return Ok(Input::Line(line.trim().to_lowercase())),
                Ok(None) => return Ok(Input::Closed),
                // The offending line is consumed; read the next one.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    write!(self.out, "Input is not valid text, try again: ")?;
                    self.out.flush()?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read input, shutting down");
                    return Ok(Input::Closed);
                }
            }
        }
    }

    /// Ask until one of `allowed` (or empty, meaning `default`) is entered.
    async fn ask(&mut self, prompt: &str, allowed: &[char], default: char) -> Result<Option<char>> {
        let mut prompt = prompt.to_string();
        loop {
            let answer = match self.read_line(&prompt).await? {
                Input::Line(answer) => answer,
                Input::Closed => return Ok(None),
            };
            if answer.is_empty() {
                return Ok(Some(default));
            }
            let mut chars = answer.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                if allowed.contains(&c) {
                    return Ok(Some(c));
                }
            }
            let options: Vec<String> = allowed.iter().map(|c| c.to_string()).collect();
            prompt = format!("Type {}: ", options.join("/"));
        }
    }

    /// False when input closed while waiting.
    async fn pause(&mut self) -> Result<bool> {
        Ok(matches!(
            self.read_line("Press Enter to continue...").await?,
            Input::Line(_)
        ))
    }

    fn names(&self) -> Vec<String> {
        self.controller.specs().map(|s| s.name.clone()).collect()
    }

    fn port_of(&self, name: &str) -> u16 {
        self.controller
            .specs()
            .find(|s| s.name == name)
            .map(|s| s.port)
            .unwrap_or_default()
    }

    /// Offer to clear every occupied port before the menu opens. Returns
    /// false if the operator chose to exit.
    async fn initial_check(&mut self) -> Result<bool> {
        writeln!(self.out, "Checking ports...")?;
        let mut occupied = Vec::new();
        for name in self.names() {
            let inspection = self.controller.inspect(&name).await?;
            let port = self.port_of(&name);
            if inspection.is_occupied() {
                writeln!(self.out, "  {} {}: in use (PIDs: {})", name, port, join_pids(&inspection.pids()))?;
                occupied.push(name);
            } else if inspection.is_known() {
                writeln!(self.out, "  {} {}: free", name, port)?;
            } else {
                writeln!(self.out, "  {} {}: {}", name, port, inspection)?;
            }
        }

        for name in occupied {
            let prompt = format!("Action for {}: (k) kill all, (m) keep, (e) exit launcher [k/m/e]: ", name);
            match self.ask(&prompt, &['k', 'm', 'e'], 'm').await? {
                Some('k') => {
                    let report = self.controller.clear_port(&name).await?;
                    if report.freed {
                        writeln!(self.out, "  port {} freed", report.port)?;
                    } else {
                        writeln!(self.out, "  port {} still held by {}", report.port, report.last_inspection)?;
                    }
                }
                Some('e') | None => return Ok(false),
                _ => {}
            }
        }
        Ok(true)
    }

    async fn start_flow(&mut self, name: &str) -> Result<()> {
        let inspection = self.controller.inspect(name).await?;
        let own: BTreeSet<u32> = self.controller.own_pid(name)?.into_iter().collect();
        let foreign: BTreeSet<u32> = inspection.pids().difference(&own).copied().collect();

        if !foreign.is_empty() {
            writeln!(
                self.out,
                "Port {} is in use by {}",
                self.port_of(name),
                join_pids(&foreign)
            )?;
            let answer = self
                .ask("Action: (k) kill and start, (m) keep, (c) cancel [k/m/c]: ", &['k', 'm', 'c'], 'm')
                .await?;
            match answer {
                Some('k') => {}
                Some('m') => {
                    writeln!(self.out, "Keeping the existing process on port {}", self.port_of(name))?;
                    return Ok(());
                }
                _ => {
                    writeln!(self.out, "Cancelled")?;
                    return Ok(());
                }
            }
        }

        let report = self.controller.start(name).await?;
        writeln!(self.out, "{}", start_line(&report))?;
        Ok(())
    }

    async fn restart_flow(&mut self) -> Result<()> {
        let spinner = Spinner::start("restarting...");
        let report = self.controller.restart().await;
        let failures = report.starts.iter().filter(|r| r.is_err()).count();
        if failures == 0 {
            spinner.succeed("restart complete");
        } else {
            spinner.fail("restart finished with errors");
        }
        for stop in &report.stops {
            writeln!(self.out, "{}", stop_line(stop))?;
        }
        if let Some(sweep) = &report.sweep {
            if !sweep.matched.is_empty() {
                writeln!(self.out, "swept {} leftover process(es)", sweep.matched.len())?;
            }
        }
        for start in &report.starts {
            match start {
                Ok(r) => writeln!(self.out, "{}", start_line(r))?,
                Err(e) => writeln!(self.out, "Error: {}", e)?,
            }
        }
        Ok(())
    }

    async fn execute(&mut self, action: MenuAction) -> Result<()> {
        match action {
            MenuAction::Start(name) => self.start_flow(&name).await?,
            MenuAction::StartAll => {
                let mut failed = Vec::new();
                for name in self.names() {
                    if let Err(e) = self.start_flow(&name).await {
                        writeln!(self.out, "Error: {:#}", e)?;
                        failed.push(name);
                    }
                }
                if !failed.is_empty() {
                    anyhow::bail!("could not start {}", failed.join(", "));
                }
            }
            MenuAction::Stop(name) => {
                let report = self.controller.stop(&name).await?;
                writeln!(self.out, "{}", stop_line(&report))?;
            }
            MenuAction::StopAll => {
                for report in self.controller.stop_all().await {
                    writeln!(self.out, "{}", stop_line(&report))?;
                }
            }
            MenuAction::Restart => self.restart_flow().await?,
            MenuAction::Refresh | MenuAction::Exit => {}
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<ShellExit> {
        let announced = writeln!(self.out, "Stopping everything...");
        let report = self.controller.shutdown().await;
        announced?;
        for stop in &report.stops {
            writeln!(self.out, "{}", stop_line(stop))?;
        }
        Ok(ShellExit::Shutdown(report))
    }

    async fn print_screen(&mut self, menu: &[MenuAction]) -> Result<()> {
        let snapshot = self.controller.status(self.stats).await;
        if self.terminal {
            write!(self.out, "\x1B[2J\x1B[H")?;
        }
        writeln!(self.out, "{}", render_status(&snapshot, self.terminal))?;
        writeln!(self.out, "{}", render_menu(menu))?;
        Ok(())
    }

    /// Stops everything on the way out, even when the menu loop failed.
    pub async fn run(mut self) -> Result<ShellExit> {
        match self.serve().await {
            Ok(false) => Ok(ShellExit::Aborted),
            Ok(true) => self.shutdown().await,
            Err(e) => {
                let report = self.controller.shutdown().await;
                for stop in &report.stops {
                    tracing::info!(service = %stop.service, "{}", stop_line(stop));
                }
                Err(e)
            }
        }
    }

    /// False when the operator left at the initial port check.
    async fn serve(&mut self) -> Result<bool> {
        if !self.initial_check().await? {
            return Ok(false);
        }
        let menu = build_menu(&self.names());

        loop {
            self.print_screen(&menu).await?;

            let choice = match self.read_line("Choice: ").await? {
                Input::Line(choice) => choice,
                Input::Closed => return Ok(true),
            };
            let Some(action) = parse_choice(&choice, &menu).cloned() else {
                writeln!(self.out, "Invalid option")?;
                if !self.pause().await? {
                    return Ok(true);
                }
                continue;
            };
            if action == MenuAction::Exit {
                return Ok(true);
            }

            if let Err(e) = self.execute(action).await {
                let msg = format!("Error: {:#}", e);
                if self.terminal {
                    writeln!(self.out, "{}", msg.red())?;
                } else {
                    writeln!(self.out, "{}", msg)?;
                }
                if !self.pause().await? {
                    return Ok(true);
                }
            }
        }
    }
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let workspace = Workspace::load(config_file)?;
    let mut runtime = Runtime::new(&workspace);
    let stats = SysinfoStats::new();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let terminal = std::io::stdout().is_terminal();
    let exit = Shell::new(&mut runtime.controller, &stats, stdin, std::io::stdout(), cancel)
        .with_terminal(terminal)
        .run()
        .await;
    runtime.close().await;

    match exit? {
        ShellExit::Shutdown(report) => {
            let busy: Vec<u16> = report
                .stops
                .iter()
                .filter(|s| s.remaining.is_occupied())
                .map(|s| s.port)
                .collect();
            if !busy.is_empty() {
                tracing::warn!(ports = ?busy, "ports still occupied after exit");
            }
        }
        ShellExit::Aborted => println!("Leaving ports untouched."),
    }
    Ok(())
}
