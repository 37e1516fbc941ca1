use anyhow::{Context, Result};
use clap::Parser;
use movierec::{init_tracing, Config, TrainingService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Where to write the snapshot; overrides `data.snapshot_path`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rebuild even if the stored snapshot is current.
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("Starting movierec snapshot build");

    let mut config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    if let Some(output) = args.output {
        config.data.snapshot_path = Some(output);
    }
    let Some(path) = config.data.snapshot_path.clone() else {
        anyhow::bail!("no snapshot path: set data.snapshot_path or pass --output");
    };

    info!(
        "Build configuration: {:?}, {:?}, {} workers",
        config.similarity, config.popularity, config.runtime.workers
    );

    let service = TrainingService::new(Arc::new(config));
    let snapshot = if args.force {
        let snapshot = service.prepare()?;
        snapshot.save(&path)?;
        snapshot
    } else {
        service.prepare_cached()?
    };

    let neighbors = &snapshot.neighbors;
    let with_neighbors = neighbors.iter().filter(|(_, list)| !list.is_empty()).count();
    info!(
        "Snapshot {}: {} top-{} neighbor entries, {}/{} items with neighbors, global mean {:.3}",
        snapshot.meta.snapshot_id,
        neighbors.num_entries(),
        neighbors.top_k(),
        with_neighbors,
        neighbors.len(),
        snapshot.popularity.global_mean()
    );

    Ok(())
}
