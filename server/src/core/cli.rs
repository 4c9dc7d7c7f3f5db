use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_API_KEY, ENV_CONFIG, ENV_DATA_DIR, ENV_ENVIRONMENT, ENV_HOST,
    ENV_INTERACTIONS_STORAGE, ENV_PORT, ENV_SESSION_TTL_MINUTES, ENV_STATS_DAILY,
    ENV_STATS_HOURLY, ENV_STATS_MONTHLY, ENV_STATS_QUARTERLY, ENV_STATS_WEEKLY,
    ENV_STATS_YEARLY, ENV_TIMEZONE,
};

#[derive(Parser)]
#[command(name = "engauge")]
#[command(version, about = "Analytics ingestion and aggregation engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Environment (`dev` disables the api-key check)
    #[arg(long, global = true, env = ENV_ENVIRONMENT)]
    pub env: Option<String>,

    /// Path to JSON config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true, env = ENV_DATA_DIR)]
    pub data_dir: Option<PathBuf>,

    /// IANA timezone used for calendar-interval bucketing
    #[arg(long, global = true, env = ENV_TIMEZONE)]
    pub timezone: Option<String>,

    /// Session expiry, in minutes
    #[arg(long, global = true, env = ENV_SESSION_TTL_MINUTES)]
    pub session_ttl_minutes: Option<u64>,

    /// Required value of the `api-key` header (skipped when env=dev)
    #[arg(long, global = true, env = ENV_API_KEY)]
    pub api_key: Option<String>,

    /// Persist accepted interactions as append-only CSV
    #[arg(long, global = true, env = ENV_INTERACTIONS_STORAGE)]
    pub interactions_storage: Option<bool>,

    #[arg(long, global = true, env = ENV_STATS_HOURLY)]
    pub stats_hourly: Option<bool>,
    #[arg(long, global = true, env = ENV_STATS_DAILY)]
    pub stats_daily: Option<bool>,
    #[arg(long, global = true, env = ENV_STATS_WEEKLY)]
    pub stats_weekly: Option<bool>,
    #[arg(long, global = true, env = ENV_STATS_MONTHLY)]
    pub stats_monthly: Option<bool>,
    #[arg(long, global = true, env = ENV_STATS_QUARTERLY)]
    pub stats_quarterly: Option<bool>,
    #[arg(long, global = true, env = ENV_STATS_YEARLY)]
    pub stats_yearly: Option<bool>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete the local data directory (registries, stats, interactions). Requires confirmation.
    Prune {
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments, layered over env/file/defaults in `AppConfig::load`.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env: Option<String>,
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub timezone: Option<String>,
    pub session_ttl_minutes: Option<u64>,
    pub api_key: Option<String>,
    pub interactions_storage: Option<bool>,
    pub stats_hourly: Option<bool>,
    pub stats_daily: Option<bool>,
    pub stats_weekly: Option<bool>,
    pub stats_monthly: Option<bool>,
    pub stats_quarterly: Option<bool>,
    pub stats_yearly: Option<bool>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        env: cli.env,
        config: cli.config,
        data_dir: cli.data_dir,
        timezone: cli.timezone,
        session_ttl_minutes: cli.session_ttl_minutes,
        api_key: cli.api_key,
        interactions_storage: cli.interactions_storage,
        stats_hourly: cli.stats_hourly,
        stats_daily: cli.stats_daily,
        stats_weekly: cli.stats_weekly,
        stats_monthly: cli.stats_monthly,
        stats_quarterly: cli.stats_quarterly,
        stats_yearly: cli.stats_yearly,
    };
    (config, cli.command)
}
