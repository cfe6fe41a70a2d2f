use anyhow::Context;
use clap::Parser;
use hydrolink::table::{read_csv, write_csv};
use hydrolink::{ArcGisFlowlineService, BatchOptions, SnapConfig, process};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Snap CSV point records onto the nearest NHDPlus flowline", long_about = None)]
struct Args {
    /// CSV file with one point per row
    #[arg(short, long)]
    input: PathBuf,
    /// Where the enriched CSV is written
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, default_value = "x")]
    x_field: String,
    #[arg(long, default_value = "y")]
    y_field: String,
    #[arg(long, default_value = "crs")]
    crs_field: String,
    /// Search radius in meters
    #[arg(long)]
    search_distance: Option<f64>,
    /// Rows queried concurrently
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// ArcGIS REST query endpoint of the flowline layer
    #[arg(long)]
    service_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = SnapConfig::from_env()?;
    if let Some(d) = args.search_distance {
        config.search_distance_m = d;
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(secs) = args.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(url) = args.service_url {
        config.service_url = url;
    }

    let input = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let table = read_csv(BufReader::new(input))
        .with_context(|| format!("reading {}", args.input.display()))?;
    info!(rows = table.len(), service = %config.service_url, "loaded input table");

    let service = ArcGisFlowlineService::from_config(&config)?;
    let options = BatchOptions::from_config(&config, &args.x_field, &args.y_field, &args.crs_field);

    let enriched = process(&service, &table, &options).await?;

    let output = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    write_csv(&enriched.table, BufWriter::new(output))?;

    info!(
        matched = enriched.matched_rows(),
        unmatched = enriched.diagnostics.len(),
        output = %args.output.display(),
        "done"
    );
    Ok(())
}
