use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "babylog", version, about = "Babylog CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Nursing session timers
    Session {
        /// Tracked entity
        #[arg(long, default_value = commands::DEFAULT_ENTITY)]
        entity: String,
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Completed feedings and the next expected one
    Feed {
        /// Tracked entity
        #[arg(long, default_value = commands::DEFAULT_ENTITY)]
        entity: String,
        #[command(subcommand)]
        action: commands::feed::FeedAction,
    },
    /// Validate and restore persisted sessions, printing the outcome
    Recover,
    /// Run the background scheduler until Ctrl-C or end of input
    Watch,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    // stdout carries JSON; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Session { entity, action } => commands::session::run(&entity, action),
        Commands::Feed { entity, action } => commands::feed::run(&entity, action),
        Commands::Recover => commands::recover::run(),
        Commands::Watch => commands::watch::run(),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
