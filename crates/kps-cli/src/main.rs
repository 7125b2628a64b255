//! KPS licensing CLI entrypoint.

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::{KpsConfig, LogFormat};

const DEFAULT_LOG_FILTER: &str = "warn,kps=info";

#[derive(Parser)]
#[command(name = "kps")]
#[command(author, version, about = "KPS license keys", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

async fn run(cli: Cli, config: KpsConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::MachineId => handlers::machine_id(&config)?,
        Commands::Activate { key } => handlers::activate(&config, &key).await?,
        Commands::Status { json } => handlers::status(&config, json).await?,
        Commands::Deactivate => handlers::deactivate(&config).await?,
        Commands::Profile {
            shop,
            owner,
            phone,
            address,
        } => handlers::profile(&config, shop, owner, phone, address).await?,
        Commands::Admin { password, command } => {
            handlers::admin(&config, password, command).await?
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match KpsConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Ignoring unreadable config: {}", style("!").yellow(), e);
            KpsConfig::default()
        }
    };
    init_tracing(config.log_format);

    if let Err(e) = run(cli, config).await {
        eprintln!("{} {}", style("✗").red(), e);
        std::process::exit(1);
    }
}
