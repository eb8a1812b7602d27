//! Rill CLI entrypoint.
//!
//! This is the main entrypoint for the rill command-line tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use rill_runtime::cli::{Cli, Commands, OutputFormatter};
use rill_runtime::config::ConfigLoader;
use rill_runtime::error::Result;
use rill_runtime::olap::MemoryOlap;
use rill_runtime::parser::{Parser as ProjectParser, init_empty, is_init};
use rill_runtime::repo::{LocalRepoStore, RepoStore};
use rill_runtime::runtime::{Controller, DEFAULT_CONNECTOR, ReconcileRequest, RuntimeService};
use rill_runtime::state::{CatalogStore, LocalCatalogStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Title used when the project directory has no usable name.
const DEFAULT_TITLE: &str = "Untitled Rill Project";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point. Returns false when the command found problems.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, title } => cmd_init(&path, title).await,
        Commands::Validate { path } => cmd_validate(&path, &formatter).await,
        Commands::Reconcile {
            path,
            dry_run,
            strict,
        } => cmd_reconcile(&path, dry_run, strict, &formatter).await,
        Commands::Status { path } => cmd_status(&path, &formatter).await,
    }
}

/// Initialize an empty project.
async fn cmd_init(path: &Path, title: Option<String>) -> Result<bool> {
    info!("Initializing new Rill project in: {}", path.display());

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let repo = LocalRepoStore::new(path);
    if is_init(&repo).await? {
        eprintln!("A project already exists in: {}", path.display());
        return Ok(true);
    }

    let title = title.unwrap_or_else(|| {
        std::fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    });
    init_empty(&repo, &title).await?;

    eprintln!("Project '{title}' initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Add sources under sources/ and models under models/");
    eprintln!("  2. Run 'rill validate' to check the project");
    eprintln!("  3. Run 'rill reconcile' to build it");

    Ok(true)
}

/// Parse the project and print its errors.
async fn cmd_validate(path: &Path, formatter: &OutputFormatter) -> Result<bool> {
    let loader = ConfigLoader::new().with_base_path(path);
    let repo: Arc<dyn RepoStore> = Arc::new(LocalRepoStore::new(path));

    let parser = ProjectParser::parse(repo, loader.load_options()?).await?;
    let output = formatter.format_validation(parser.resources().len(), parser.errors());
    eprintln!("{output}");

    Ok(parser.errors().is_empty())
}

/// Reconcile the project against the recording OLAP store.
async fn cmd_reconcile(
    path: &Path,
    dry_run: bool,
    strict: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let loader = ConfigLoader::new().with_base_path(path);
    let olap = Arc::new(MemoryOlap::new());
    let catalog: Arc<dyn CatalogStore> = Arc::new(LocalCatalogStore::for_project(path));

    let controller = Controller::new(ConfigLoader::instance_id(), catalog)
        .with_connector(DEFAULT_CONNECTOR, olap.clone());
    let restored = controller.load_catalog().await?;
    debug!("Restored {restored} resources from the catalog");

    let service = RuntimeService::new(Arc::new(LocalRepoStore::new(path)), Arc::new(controller))
        .with_options(loader.load_options()?)
        .with_variables(loader.load_variables()?);

    let response = service
        .reconcile(ReconcileRequest {
            dry: dry_run,
            strict,
            ..ReconcileRequest::default()
        })
        .await;
    service.close().await;
    let response = response?;

    let output = formatter.format_reconcile(&response, &olap.queries().await);
    eprintln!("{output}");

    Ok(response.errors.is_empty())
}

/// Show the persisted catalog.
async fn cmd_status(path: &Path, formatter: &OutputFormatter) -> Result<bool> {
    let store = LocalCatalogStore::for_project(path);

    match store.load().await? {
        Some(snapshot) => {
            let output = formatter.format_catalog(&snapshot.instance_id, &snapshot.resources);
            eprintln!("{output}");
        }
        None => eprintln!("No catalog found. Run 'rill reconcile' first."),
    }

    Ok(true)
}
