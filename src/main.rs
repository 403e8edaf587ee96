use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boundary::{fetch_boundaries, load_boundaries, tract_shapes, NYC_TRACTS_URL};
use geocode::{CensusGeocoder, Geocoder, Offline, CENSUS_GEOCODER_URL};

pub mod aggregate;
pub mod analysis;
pub mod boundary;
pub mod error;
pub mod geocode;
pub mod impute;
pub mod metrics;
pub mod records;
pub mod render;
pub mod tract;

/// Compares NYC affordable housing income requirements with census tract
/// median incomes.
#[derive(Parser, Debug)]
#[command(name = "tract_ami", version, about)]
struct Args {
    /// Housing New York Units by Building export
    #[arg(long, env = "TRACT_AMI_HOUSING", default_value = "Housing_New_York_Units_by_Building.csv")]
    housing: PathBuf,

    /// ACS S1903 median income by family size
    #[arg(long, env = "TRACT_AMI_INCOME", default_value = "ACS5YR2019_median_income.csv")]
    income: PathBuf,

    /// ACS B11016 household size
    #[arg(long, env = "TRACT_AMI_FAMILY", default_value = "ACSDT5Y2019_family_size.csv")]
    family: PathBuf,

    #[arg(short, long, env = "TRACT_AMI_OUTPUT_DIR", default_value = "graphs")]
    output_dir: PathBuf,

    #[arg(long, env = "TRACT_AMI_GEOJSON_URL", default_value = NYC_TRACTS_URL)]
    geojson_url: String,

    /// Read tract boundaries from a local file instead of downloading them
    #[arg(long, env = "TRACT_AMI_GEOJSON_FILE")]
    geojson_file: Option<PathBuf>,

    #[arg(long, env = "TRACT_AMI_GEOCODER_URL", default_value = CENSUS_GEOCODER_URL)]
    geocoder_url: String,

    /// Timeout for each HTTP request, in seconds
    #[arg(long, env = "TRACT_AMI_TIMEOUT_SECS", default_value_t = 3)]
    timeout_secs: u64,

    /// Skip geocoding and boundary downloads
    #[arg(long, env = "TRACT_AMI_OFFLINE")]
    offline: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "tract_ami=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout_secs);

    let housing = records::load_housing(&args.housing)
        .with_context(|| format!("Failed to read {}", args.housing.display()))?;
    let income = records::load_income(&args.income)
        .with_context(|| format!("Failed to read {}", args.income.display()))?;
    let households = records::load_households(&args.family)
        .with_context(|| format!("Failed to read {}", args.family.display()))?;

    let geocoder: Box<dyn Geocoder> = if args.offline {
        info!("Geocoder disabled");
        Box::new(Offline)
    } else {
        Box::new(CensusGeocoder::new(&args.geocoder_url, timeout).context("Failed to build geocoder")?)
    };

    let table = analysis::build_table(&housing, &income, &households, geocoder.as_ref());

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    analysis::write_table(&table, args.output_dir.join("tract_gaps.csv")).context("Failed to write table")?;
    analysis::render_charts(&table, &args.output_dir).context("Failed to draw charts")?;

    let boundaries = match (&args.geojson_file, args.offline) {
        (Some(path), _) => Some(load_boundaries(path)),
        (None, false) => Some(fetch_boundaries(&args.geojson_url, timeout)),
        (None, true) => None,
    };
    match boundaries {
        Some(Ok(collection)) => {
            let shapes = tract_shapes(&collection);
            info!("Loaded {} tract boundaries", shapes.len());
            analysis::render_maps(&table, &shapes, &args.output_dir).context("Failed to write maps")?;
        }
        Some(Err(e)) => warn!("Skipping maps, tract boundaries unavailable: {}", e),
        None => warn!("Skipping maps, no boundary file given in offline mode"),
    }

    info!("Done, outputs in {}", args.output_dir.display());
    Ok(())
}
