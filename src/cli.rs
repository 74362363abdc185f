use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "workstream")]
#[command(about = "Proof-of-work intake client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the coordinator and feed the local worker pool
    Run(RunArgs),
    /// Load and validate configuration, then print it
    CheckConfig,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Coordinator websocket url (overrides config)
    #[arg(long)]
    pub url: Option<String>,

    /// Authorization token (overrides WORKSTREAM_AUTH_TOKEN)
    #[arg(long, env = "WORKSTREAM_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Number of local workers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,
}
