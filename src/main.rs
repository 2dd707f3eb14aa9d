mod consolidate;
mod error;
mod extract;
mod fetch;
mod increment;
mod locator;
mod model;
mod pipeline;
mod settings;
mod store;
mod xlsx;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::{OnCompletion, RunOptions};
use crate::store::DataLayout;

#[derive(Parser)]
#[command(name = "covid_supply", about = "COVID-19 test supply report collector")]
struct Cli {
    /// Settings file (default: ./covid_supply.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Exit without waiting for Enter
    #[arg(long, global = true)]
    no_pause: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the latest report and consolidate it into the base dataset
    Run {
        /// Report URL or local .xlsx path (default: discover on the landing page)
        #[arg(long)]
        doc: Option<String>,
        /// Keep records with missing values instead of dropping them
        #[arg(long)]
        keep_partial: bool,
    },
    /// Create the data directories
    Init,
    /// Print the URL of the latest report
    Locate,
    /// Consolidate an archived increment into the base dataset
    Merge {
        archive: PathBuf,
        #[arg(long)]
        keep_partial: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    let interactive = matches!(cli.command, Commands::Run { .. } | Commands::Merge { .. });
    let completion = OnCompletion::new(interactive && settings.pause_on_exit && !cli.no_pause);

    let result: anyhow::Result<()> = match cli.command {
        Commands::Run { doc, keep_partial } => {
            let opts = RunOptions {
                document: doc,
                keep_partial,
                run_date: chrono::Local::now().date_naive(),
            };
            match pipeline::run(&settings, &opts).await {
                Ok(summary) => {
                    info!(
                        source = %summary.source,
                        increment = summary.increment_records,
                        base = summary.merge.base_after,
                        "run complete"
                    );
                    summary.print();
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Init => {
            let layout = DataLayout::new(&settings.data_dir);
            pipeline::bootstrap(&layout).context("Failed to create data directories")?;
            println!("Base dataset location: {}", layout.base_path().display());
            println!("Increment archive:     {}", layout.archive_dir().display());
            if !layout.base_path().exists() {
                println!("{}", pipeline::missing_base_guidance(&layout.base_path()));
            }
            Ok(())
        }
        Commands::Locate => {
            let fetcher = fetch::Fetcher::new();
            let url = pipeline::locate_latest(&fetcher, &settings).await?;
            println!("{}", url);
            Ok(())
        }
        Commands::Merge { archive, keep_partial } => {
            pipeline::merge_archive(&settings, &archive, keep_partial)
                .map(|summary| summary.print())
                .with_context(|| format!("Failed to merge {}", archive.display()))
        }
    };

    if let Err(e) = &result {
        if let Some(PipelineError::MissingBaseDataset { path }) = e.downcast_ref::<PipelineError>() {
            println!("{}", pipeline::missing_base_guidance(path));
            completion.finish();
            std::process::exit(2);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    completion.finish();

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
