use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the RecipeHub binary.
#[derive(Debug, Parser)]
#[command(name = "recipehub", version, about = "RecipeHub detail cache and counter engine")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RECIPEHUB_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service together with the periodic jobs.
    Serve(Box<ServeArgs>),
    /// Seed the counter planes from the database once and exit.
    Bootstrap(OneShotArgs),
    /// Run one reconciliation cycle and exit.
    Reconcile(OneShotArgs),
    /// Warm the detail cache once and exit.
    Warm(OneShotArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConnectionOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct OneShotArgs {
    #[command(flatten)]
    pub connections: ConnectionOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub connections: ConnectionOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the counter policy (strict|auto-initialize).
    #[arg(long = "counter-policy", value_name = "POLICY")]
    pub counter_policy: Option<String>,

    /// Override the reconciliation cron expression.
    #[arg(long = "jobs-reconcile-cron", value_name = "CRON")]
    pub reconcile_cron: Option<String>,

    /// Override the cache warm cron expression.
    #[arg(long = "jobs-warm-cron", value_name = "CRON")]
    pub warm_cron: Option<String>,

    /// Override how many recipes are warmed (0 warms all).
    #[arg(long = "jobs-warm-top-n", value_name = "COUNT")]
    pub warm_top_n: Option<u32>,

    /// Skip counter bootstrap at startup.
    #[arg(
        long = "bootstrap-on-start",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub bootstrap_on_start: Option<bool>,
}
