use anyhow::{Context, Result};
use clap::Parser;
use metaview::db::store::snapshot_stats;
use metaview::import::import_dir;
use metaview::{Config, SqliteRepository};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "import")]
#[command(about = "Load JSON/YAML record fixtures into the metaview snapshot")]
struct Args {
    /// Directory searched recursively for .json, .yaml and .yml fixtures
    root: PathBuf,

    /// Exit with an error if any fixture fails to parse
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.metaview.log_level.as_str()),
    )
    .init();

    log::info!("Starting metaview import");
    log::info!("Fixture root: {}", args.root.display());
    log::info!("Database path: {}", config.db_path().display());

    let repository = SqliteRepository::open(config.db_path().to_path_buf(), config.migrations_dir())
        .await
        .with_context(|| format!("Failed to open snapshot {}", config.db_path().display()))?;

    let start = Instant::now();
    let report = import_dir(repository.db(), &args.root).await?;
    let totals = report.totals();
    let stats = snapshot_stats(repository.db()).await?;

    log::info!("=== Import Complete ===");
    log::info!("Files imported: {} (failed: {})", report.imported.len(), report.failed.len());
    log::info!(
        "Records written: {} elements, {} relationships ({} without guid skipped)",
        totals.elements,
        totals.relationships,
        totals.skipped
    );
    log::info!(
        "Snapshot now holds {} elements, {} relationships ({} dangling)",
        stats.elements,
        stats.relationships,
        stats.dangling
    );
    log::info!("Time: {:?}", start.elapsed());

    if !report.failed.is_empty() {
        for (path, reason) in &report.failed {
            log::warn!("Not imported: {} ({})", path, reason);
        }
        if args.strict {
            anyhow::bail!("{} fixture(s) failed to import", report.failed.len());
        }
    }
    Ok(())
}
