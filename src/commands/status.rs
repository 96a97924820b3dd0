use std::path::Path;

use anyhow::{Context, Result};
use is_terminal::IsTerminal;

use super::{Runtime, Workspace};
use crate::cli::OutputFormat;
use crate::stats::SysinfoStats;
use crate::ui::status::render_status;

pub async fn run(config_file: Option<&Path>, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::load(config_file)?;
    let mut runtime = Runtime::new(&workspace);
    let stats = SysinfoStats::new();
    let snapshot = runtime.controller.status(&stats).await;
    runtime.close().await;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&snapshot).context("serializing status")?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("  Project: {}", workspace.config.project.name);
            print!("{}", render_status(&snapshot, std::io::stdout().is_terminal()));
        }
    }
    Ok(())
}
