//! Price Monitor CLI
//!
//! Local execution entry point. Every command is a single pass; schedule
//! repeated runs with cron or a systemd timer.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use price_monitor::{
    error::{AppError, Result},
    models::{Config, PeriodKind, PriceType},
    pipeline::{self, PipelineContext, PipelineOptions},
    services::SyncRequest,
    storage::LocalStore,
    storefront,
    utils::log as console,
};
use tokio_util::sync::CancellationToken;

/// Price Monitor - multi-site price collection and storefront sync
#[derive(Parser, Debug)]
#[command(
    name = "price-monitor",
    version,
    about = "Scrape part prices, aggregate them and sync the storefront"
)]
struct Cli {
    /// Path to storage directory holding config and data files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Configuration file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress console banners and summaries
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape prices from every active site
    Scrape {
        /// Only scrape this site
        #[arg(long)]
        spider: Option<String>,
    },

    /// Compute price summaries for one period
    Aggregate {
        /// run (latest scrape run) or daily
        #[arg(long)]
        period: Option<PeriodKind>,

        /// Day to aggregate with --period daily (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Scrape run to aggregate with --period run
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Push changed prices to the storefront
    Sync {
        /// avg, min or max
        #[arg(long)]
        price_type: Option<PriceType>,

        /// Classify without writing
        #[arg(long)]
        dry_run: bool,

        /// Items per storefront batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Write a CSV import file instead of calling the API
        #[arg(long)]
        csv: bool,
    },

    /// Run full pipeline: Scrape → Aggregate → Sync
    Pipeline {
        /// Stop after aggregation
        #[arg(long)]
        skip_sync: bool,

        /// Classify sync items without writing
        #[arg(long)]
        dry_run: bool,

        /// Only scrape this site
        #[arg(long)]
        spider: Option<String>,

        /// Write a CSV import file instead of calling the API
        #[arg(long)]
        csv: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Inspect or re-enable sites
    Sites {
        #[command(subcommand)]
        action: SitesCommand,
    },

    /// Show site health, recent sessions and catalog counts
    Info {
        /// Number of sessions to show
        #[arg(long, default_value_t = 10)]
        sessions: usize,
    },
}

#[derive(Subcommand, Debug)]
enum SitesCommand {
    /// List sites with their health
    List,

    /// Clear a site's failure streak and re-enable it
    Enable { name: String },
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on Ctrl-C.
fn shutdown_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Shutdown requested, finishing in-flight work...");
            token.cancel();
        }
    });
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));

    if let Command::Validate = cli.command {
        init_logging(cli.verbose, "info");
        console::set_quiet(cli.quiet);
        pipeline::run_validate(&config_path)?;
        return Ok(());
    }

    let config = Config::load_or_default(&config_path).with_env_overrides();
    init_logging(cli.verbose, &config.logging.level);
    console::set_quiet(cli.quiet);
    config.validate()?;

    log::info!("Loaded configuration from {}", config_path.display());

    let store = Arc::new(LocalStore::new(&cli.storage_dir));
    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());

    let sync_config = config.sync.clone();
    let ctx = PipelineContext::new(config, store).await?;

    match cli.command {
        Command::Scrape { spider } => {
            pipeline::run_scrape(&ctx, spider.as_deref(), &shutdown).await?;
        }

        Command::Aggregate {
            period,
            date,
            run_id,
        } => {
            let kind = match (period, date) {
                (Some(kind), _) => kind,
                (None, Some(_)) => PeriodKind::Daily,
                (None, None) => ctx.config.aggregation.period,
            };
            let period = pipeline::resolve_period(&ctx, kind, run_id.as_deref(), date).await?;
            pipeline::run_aggregate(&ctx, &period).await?;
        }

        Command::Sync {
            price_type,
            dry_run,
            batch_size,
            csv,
        } => {
            let defaults = SyncRequest::from_config(&sync_config);
            let request = SyncRequest {
                price_type: price_type.unwrap_or(defaults.price_type),
                dry_run,
                batch_size: batch_size.unwrap_or(defaults.batch_size),
            };
            if request.batch_size == 0 {
                return Err(AppError::config("--batch-size must be > 0"));
            }
            let target = storefront::from_config(&sync_config, &cli.storage_dir, csv)?;
            pipeline::run_sync(&ctx, target, &request).await?;
        }

        Command::Pipeline {
            skip_sync,
            dry_run,
            spider,
            csv,
        } => {
            let target = if skip_sync {
                None
            } else {
                Some(storefront::from_config(&sync_config, &cli.storage_dir, csv)?)
            };
            let options = PipelineOptions {
                spider,
                skip_sync,
                dry_run,
            };
            pipeline::run_pipeline(&ctx, target, &options, &shutdown).await?;
        }

        // Handled before the services are built
        Command::Validate => {}

        Command::Sites { action } => match action {
            SitesCommand::List => pipeline::run_sites_list(&ctx),
            SitesCommand::Enable { name } => {
                pipeline::run_site_enable(&ctx, &name).await?;
            }
        },

        Command::Info { sessions } => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            pipeline::run_info(&ctx, sessions).await?;
        }
    }

    log::info!("Done!");

    Ok(())
}
