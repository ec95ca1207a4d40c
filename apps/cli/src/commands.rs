//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use htc_core::{ProgressReporter, ScrapeOptions, ScrapeResult, refresh_menus, scrape};
use htc_crawler::{DocumentFetcher, HttpFetcher};
use htc_shared::{
    AppConfig, Entity, Meal, ScrapeConfig, config_file_path, init_config, load_config,
    load_config_from, resolve_db_path,
};
use htc_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// htc — find restaurants on a listing page and locate each one.
#[derive(Parser)]
#[command(
    name = "htc",
    version,
    about = "Discover restaurants from a listing page with their location, hours and menus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to load instead of ~/.htc/htc.toml.
    #[arg(long, env = "HTC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scrape the listing, fetch every detail page and store the results.
    Scrape(ScrapeArgs),

    /// List stored restaurants.
    List {
        /// Database path (defaults to `[storage].db_path`).
        #[arg(long)]
        db: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show stored menus, optionally re-reading them from the detail pages first.
    Meals(MealsArgs),

    /// Check that the listing page answers.
    Ping {
        /// URL to check (defaults to `[scrape].listing_url`).
        #[arg(long)]
        url: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `htc scrape`. Each one overrides its config-file counterpart.
#[derive(Args, Debug, Default)]
pub(crate) struct ScrapeArgs {
    /// Listing page URL.
    #[arg(long)]
    pub listing_url: Option<String>,

    /// Area label to keep (repeatable).
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Maximum detail pages fetched at once.
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Database path.
    #[arg(long)]
    pub db: Option<String>,

    /// Delete stored restaurants before saving.
    #[arg(long)]
    pub replace: bool,

    /// Skip storage and print the results.
    #[arg(long, conflicts_with = "replace")]
    pub dry_run: bool,
}

impl ScrapeArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.listing_url {
            config.scrape.listing_url = url.clone();
        }
        if !self.labels.is_empty() {
            config.scrape.target_labels = self.labels.clone();
        }
        if let Some(n) = self.concurrency {
            config.scrape.concurrency = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.scrape.timeout_secs = secs;
        }
        if let Some(db) = &self.db {
            config.storage.db_path = db.clone();
        }
    }
}

/// Flags for `htc meals`.
#[derive(Args, Debug, Default)]
pub(crate) struct MealsArgs {
    /// Only show this restaurant's meals (detail-page URL).
    #[arg(long)]
    pub restaurant: Option<String>,

    /// Fetch every stored restaurant's detail page and save its current menus.
    #[arg(long)]
    pub refresh: bool,

    /// Maximum detail pages fetched at once (with --refresh).
    #[arg(long, requires = "refresh")]
    pub concurrency: Option<u32>,

    /// Per-request timeout in seconds (with --refresh).
    #[arg(long, requires = "refresh")]
    pub timeout_secs: Option<u64>,

    /// Database path.
    #[arg(long)]
    pub db: Option<String>,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl MealsArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(n) = self.concurrency {
            config.scrape.concurrency = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.scrape.timeout_secs = secs;
        }
        if let Some(db) = &self.db {
            config.storage.db_path = db.clone();
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "htc=info",
        1 => "htc=debug",
        _ => "htc=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Scrape(args) => cmd_scrape(config, &args).await,
        Command::List { db, json } => cmd_list(&config, db.as_deref(), json).await,
        Command::Meals(args) => cmd_meals(config, &args).await,
        Command::Ping { url } => cmd_ping(&config, url.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config, cli.config.as_deref()).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_scrape(mut config: AppConfig, args: &ScrapeArgs) -> Result<()> {
    args.apply(&mut config);
    let scrape_config = ScrapeConfig::try_from(&config)?;

    let fetcher: Arc<dyn DocumentFetcher> =
        Arc::new(HttpFetcher::with_timeout_secs(scrape_config.timeout_secs)?);

    let storage = if args.dry_run {
        None
    } else {
        let path = resolve_db_path(&config.storage.db_path)?;
        info!(path = %path.display(), "opening database");
        Some(Storage::open(&path).await?)
    };

    info!(
        listing_url = %scrape_config.listing_url,
        labels = ?scrape_config.target_labels,
        concurrency = scrape_config.concurrency,
        dry_run = args.dry_run,
        "starting scrape"
    );

    let reporter = CliProgress::new();
    let options = ScrapeOptions {
        replace: args.replace,
    };
    let result = scrape(
        &scrape_config,
        fetcher,
        storage.as_ref(),
        &options,
        &reporter,
    )
    .await?;

    if args.dry_run {
        print_entities(&result.entities);
    }

    println!();
    println!("  Scrape finished!");
    println!("  Restaurants: {}", result.entities.len());
    println!("  Located:     {}", result.report.enriched);
    println!("  Failed:      {}", result.report.failed);
    if result.report.duplicates > 0 {
        println!("  Duplicates:  {}", result.report.duplicates);
    }
    if let Some(run_id) = &result.run_id {
        println!("  Stored:      {}", result.persisted);
        println!("  Run:         {run_id}");
    }
    println!("  Time:        {:.1}s", result.elapsed.as_secs_f64());
    println!();

    if !result.persist_errors.is_empty() {
        return Err(eyre!(
            "{} restaurant(s) could not be stored; first error: {}",
            result.persist_errors.len(),
            result.persist_errors[0].1
        ));
    }

    Ok(())
}

async fn cmd_list(config: &AppConfig, db: Option<&str>, json: bool) -> Result<()> {
    let path = resolve_db_path(db.unwrap_or(&config.storage.db_path))?;
    let storage = Storage::open_readonly(&path).await?;
    let entities = storage.list_entities().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entities)?);
    } else if entities.is_empty() {
        println!("No restaurants stored. Run `htc scrape` first.");
    } else {
        print_entities(&entities);
    }

    Ok(())
}

async fn cmd_meals(mut config: AppConfig, args: &MealsArgs) -> Result<()> {
    args.apply(&mut config);
    let path = resolve_db_path(&config.storage.db_path)?;

    let storage = if args.refresh {
        let scrape_config = ScrapeConfig::try_from(&config)?;
        let storage = Storage::open(&path).await?;
        let fetcher: Arc<dyn DocumentFetcher> =
            Arc::new(HttpFetcher::with_timeout_secs(scrape_config.timeout_secs)?);

        let reporter = CliProgress::new();
        let refresh = refresh_menus(&scrape_config, fetcher, &storage, &reporter).await;
        reporter.finish();
        let refresh = refresh?;

        eprintln!(
            "Refreshed {}/{} restaurants, {} meals in {:.1}s",
            refresh.refreshed,
            refresh.restaurants,
            refresh.meals,
            refresh.elapsed.as_secs_f64()
        );
        if !refresh.persist_errors.is_empty() {
            return Err(eyre!(
                "{} restaurant(s) could not be stored; first error: {}",
                refresh.persist_errors.len(),
                refresh.persist_errors[0].1
            ));
        }
        storage
    } else {
        Storage::open_readonly(&path).await?
    };

    let meals = storage.list_meals(args.restaurant.as_deref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&meals)?);
    } else if meals.is_empty() {
        println!("No meals stored. Run `htc scrape` or `htc meals --refresh` first.");
    } else {
        print_meals(&meals);
    }

    Ok(())
}

async fn cmd_ping(config: &AppConfig, url: Option<&str>) -> Result<()> {
    let url = url.unwrap_or(&config.scrape.listing_url);
    let fetcher = HttpFetcher::with_timeout_secs(config.scrape.timeout_secs)?;

    let body = fetcher.fetch(url).await?;
    info!(url, bytes = body.len(), "ping succeeded");
    println!("{url} is reachable ({} bytes)", body.len());

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig, loaded_from: Option<&Path>) -> Result<()> {
    if let Some(path) = config_source(loaded_from) {
        println!("# {}", path.display());
    }
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

/// The file `config show` reports: the `--config` path when given.
fn config_source(loaded_from: Option<&Path>) -> Option<PathBuf> {
    match loaded_from {
        Some(path) => Some(path.to_path_buf()),
        None => config_file_path().ok(),
    }
}

fn print_meals(meals: &[Meal]) {
    let mut restaurant: Option<&str> = None;
    for meal in meals {
        if restaurant != Some(meal.restaurant_url.as_str()) {
            println!();
            println!("  {}", meal.restaurant_url);
            restaurant = Some(meal.restaurant_url.as_str());
        }

        let day = meal
            .day
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        println!("    {day}  {}", meal.title);
        for course in &meal.courses {
            if course.dishes.is_empty() {
                println!("      {}", course.kind);
            } else {
                println!("      {}: {}", course.kind, course.dishes.join(", "));
            }
        }
    }
}

fn print_entities(entities: &[Entity]) {
    println!();
    for entity in entities {
        let location = if entity.enriched {
            entity.coordinates.to_string()
        } else {
            "unknown".to_string()
        };
        println!(
            "  {:<40} {:<14} {:<24} {}",
            entity.name,
            entity.label,
            location,
            entity.opening_hours.as_deref().unwrap_or("-"),
        );
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl CliProgress {
    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn entity_enriched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching details [{current}/{total}] {url}"));
    }

    fn done(&self, _result: &ScrapeResult) {
        self.finish();
    }
}
