use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use portrig::cli::{Cli, Commands};
use portrig::commands;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.global.config_file.as_deref();

    let result = match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => commands::shell::run(config_file).await,
        Commands::Start { services } => commands::lifecycle::run_start(config_file, services).await,
        Commands::Stop { services } => commands::lifecycle::run_stop(config_file, services).await,
        Commands::Restart => commands::lifecycle::run_restart(config_file).await,
        Commands::Status { format } => commands::status::run(config_file, format).await,
        Commands::Ports { ports, format } => commands::ports::run(ports, format).await,
        Commands::Init => commands::init::run(),
        Commands::Validate => commands::validate::run(config_file),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "portrig", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
