use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "portrig",
    version,
    about = "Keep a local backend and web preview on their ports, and only there"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive menu (the default)
    Shell,
    /// Start services and stream their logs until Ctrl-C
    Start {
        /// Specific services to start (start all if empty)
        services: Vec<String>,
    },
    /// Stop services and free their ports
    Stop {
        /// Specific services to stop (stop all if empty)
        services: Vec<String>,
    },
    /// Stop everything, sweep leftovers, start again and stream logs
    Restart,
    /// Show service and port status
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Show which processes listen on the given ports
    Ports {
        #[arg(required = true)]
        ports: Vec<u16>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Generate a starter portrig.toml
    Init,
    /// Validate the configuration file
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_shell() {
        let cli = Cli::try_parse_from(["portrig"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn global_file_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["portrig", "status", "-f", "x.toml", "--format", "json"]).unwrap();
        assert_eq!(cli.global.config_file, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Status {
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn ports_requires_a_port() {
        assert!(Cli::try_parse_from(["portrig", "ports"]).is_err());
        assert!(Cli::try_parse_from(["portrig", "ports", "notaport"]).is_err());
        let cli = Cli::try_parse_from(["portrig", "ports", "5050", "5173"]).unwrap();
        match cli.command {
            Some(Commands::Ports { ports, .. }) => assert_eq!(ports, vec![5050, 5173]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
