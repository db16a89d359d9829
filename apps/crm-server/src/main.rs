mod registered_modules;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use tracing_subscriber::EnvFilter;

use crm_db::{CompositionRoot, DatabaseConfig};

/// Modular CRM server
#[derive(Parser)]
#[command(name = "crm-server")]
#[command(about = "Modular CRM server")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Provision all module schemas at startup regardless of config
    #[arg(long)]
    provision: bool,

    /// Use an in-memory SQLite database for everything
    #[arg(long)]
    mock: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and the composed schema, then exit
    Check,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crm_server={default},crm_db={default}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Layered config: YAML file (if provided), then `CRM__*` environment
/// variables, e.g. `CRM__DATABASE__CONNECTIONS__DEFAULT`.
fn load_figment(cli: &Cli) -> Result<Figment> {
    let mut figment = Figment::new();
    if let Some(path) = &cli.config {
        if !path.is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }
        figment = figment.merge(Yaml::file(path));
    }
    Ok(figment.merge(Env::prefixed("CRM__").split("__")))
}

fn database_config(cli: &Cli, figment: &Figment) -> Result<DatabaseConfig> {
    if cli.mock {
        let mut cfg = DatabaseConfig::default();
        cfg.connections.insert(
            crm_db::DEFAULT_CONNECTION.to_owned(),
            "sqlite::memory:".to_owned(),
        );
        return Ok(cfg);
    }
    let cfg = DatabaseConfig::from_figment(figment).context("loading database configuration")?;
    if cfg.connections.is_empty() {
        anyhow::bail!(
            "no database connections configured; set database.connections.Default or pass --mock"
        );
    }
    Ok(cfg)
}

fn compose(cfg: &DatabaseConfig) -> Result<CompositionRoot> {
    let root = CompositionRoot::with_opts(cfg.resolver()?, cfg.connect_opts());
    for module in registered_modules::registered_modules() {
        root.register_module(module)?;
    }
    let schema = root.freeze()?;
    // Keys resolve on first access; only report whether a dedicated entry
    // exists, which never forces resolution.
    for binding in schema.bindings() {
        tracing::info!(
            module = %binding.name,
            connection = %binding.connection,
            dedicated = root.resolver().has_dedicated(&binding.connection),
            tables = schema.module_tables(&binding.name).count(),
            "module composed"
        );
    }
    Ok(root)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let figment = load_figment(&cli)?;
    let cfg = database_config(&cli, &figment)?;

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run_server(&cli, &cfg).await,
        Commands::Check => check(&cfg),
    }
}

fn check(cfg: &DatabaseConfig) -> Result<()> {
    let root = compose(cfg)?;
    let schema = root.schema()?;
    println!(
        "Configuration is valid: {} modules, {} tables, schema {:016x}",
        schema.bindings().len(),
        schema.tables().len(),
        schema.fingerprint()
    );
    Ok(())
}

async fn run_server(cli: &Cli, cfg: &DatabaseConfig) -> Result<()> {
    tracing::info!("Modular CRM server starting");
    let root = compose(cfg)?;

    if cli.provision || cfg.auto_provision {
        root.provision().await?;
        tracing::info!("all module schemas provisioned");
    }

    // Warm the module contracts so startup fails fast on a bad binding.
    root.contract::<crm_products::store::ProductsStore>().await?;
    root.contract::<crm_ordering::store::OrderingStore>().await?;

    tracing::info!("ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;

    tracing::info!("shutting down");
    root.dispose()?;
    Ok(())
}
