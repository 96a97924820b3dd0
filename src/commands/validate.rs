use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use super::file_name;
use crate::config;
use crate::config::resolve::resolve_config;
use crate::config::validate::validate;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config_path = resolve_config(config_file)?;
    let (config, source) = config::load_config(&config_path)?;
    let filename = file_name(&config_path);

    match validate(&config, &source, &filename) {
        Ok(()) => {
            let build_count = config.services.values().filter(|s| s.build.is_some()).count();
            println!(
                "  {} {} is valid ({} services, {} with a build step)",
                "\u{2713}".green(),
                filename,
                config.services.len(),
                build_count,
            );
            Ok(())
        }
        Err(errors) => {
            let count = errors.len();
            for err in errors {
                let report: miette::Report = err.into();
                eprintln!("{:?}", report);
            }
            anyhow::bail!("{} has {} configuration error(s)", filename, count)
        }
    }
}
