mod agent;
mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use workstream::config::{Config, Overrides};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = Config::load_with_overrides(Overrides {
                url: args.url,
                auth_token: args.token,
                workers: args.workers,
            })?;
            agent::run(config).await?
        }
        Commands::CheckConfig => {
            let config = Config::load()?;
            agent::print_config(&config);
        }
    }

    Ok(())
}
