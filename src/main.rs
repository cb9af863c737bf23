use anyhow::{Context, Result};
use blog_counters::config::CliArgs;
use blog_counters::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blog-counters")]
#[command(about = "View, like and share counters for a blog, batched through a cache")]
struct Cli {
    #[arg(short, long, global = true, help = "Path to a TOML or JSON config file")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Increase verbosity")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "BLOG_COUNTERS_BIND", help = "Address to listen on")]
        bind: Option<String>,

        #[arg(long, help = "Upstash Redis REST URL")]
        kv_url: Option<String>,

        #[arg(long, help = "Supabase project URL")]
        store_url: Option<String>,

        #[arg(long, help = "Run the flush loop in-process")]
        embedded_flush: bool,
    },
    /// Reconcile pending counters once and print the summary as JSON
    Flush,
}

fn init_tracing(level: &str, verbose: bool) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut args = CliArgs {
        config_file: cli.config.clone(),
        ..Default::default()
    };
    if let Command::Serve {
        bind,
        kv_url,
        store_url,
        embedded_flush,
    } = &cli.command
    {
        args.bind = bind.clone();
        args.kv_url = kv_url.clone();
        args.store_url = store_url.clone();
        args.embedded_flush = *embedded_flush;
    }

    let config = Config::load_with_cli(&args).context("Failed to load configuration")?;
    init_tracing(&config.logging.level, cli.verbose);
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Serve { .. } => blog_counters::run(config).await,
        Command::Flush => {
            let summary = blog_counters::flush_once(&config).await?;
            let body = serde_json::json!({ "ok": true, "synced": summary.synced() });
            println!("{}", body);
            Ok(())
        }
    }
}
