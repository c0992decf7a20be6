//! Scheduled entry point: `rcp-mirror <catalog-export.csv> [config-file]`

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use rcp_mirror::infrastructure::{init_logging_with_config, read_catalog_export};
use rcp_mirror::{SyncConfig, SyncPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(catalog_path) = args.next().map(PathBuf::from) else {
        bail!("usage: rcp-mirror <catalog-export.csv> [config-file]");
    };

    let config = match args.next() {
        Some(path) => SyncConfig::from_file(&path).with_context(|| format!("Failed to load config {path}"))?,
        None => SyncConfig::load().context("Failed to load config")?,
    };
    let layout = config.layout()?;
    init_logging_with_config(&config.logging, &layout.root().join("logs"))?;
    info!("RCP Mirror v{} - data root {}", env!("CARGO_PKG_VERSION"), layout.root().display());

    let rows = read_catalog_export(&catalog_path).await?;
    let pipeline = SyncPipeline::new(&config)?;
    match pipeline.run(&rows).await {
        Ok(report) => {
            for partition in &report.partitions {
                info!(
                    "{}: {} downloaded, {} pending retry, {} not found",
                    partition.partition, partition.downloaded, partition.drain.remaining, partition.not_found
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Sync aborted: {e}");
            Err(e.into())
        }
    }
}
