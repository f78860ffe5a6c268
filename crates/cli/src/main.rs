use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use noise_map_core::store::{BuildingRecord, ReceiverRecord, SoilRecord, SourceRecord, TableSchema};
use noise_map_core::{
    ExportRaysMode, MemoryInputStore, NoiseMapRunner, PeriodSelection, RunConfig, SqlScriptStore,
    Vec3,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Noise map computation over a JSON scene
#[derive(Parser, Debug)]
#[command(name = "noise-map")]
#[command(about = "Compute day, evening, night and Lden noise levels on receivers", long_about = None)]
struct Args {
    /// Scene file (receivers, sources, buildings, soil, elevation) in JSON
    scene: PathBuf,

    /// SQL script receiving the result tables
    output: PathBuf,

    /// Compress the output script with gzip
    #[arg(long)]
    gzip: bool,

    /// Run settings in JSON, missing fields take their default value
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = one per core)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Output periods among D, E, N and DEN, comma separated
    #[arg(short, long, value_delimiter = ',')]
    periods: Vec<String>,

    /// One record per receiver and source instead of summing all sources
    #[arg(long)]
    per_source: bool,

    /// Write propagation paths to the rays table, at most this many
    #[arg(long)]
    export_rays: Option<u64>,
}

/// Input tables of a run as stored in the scene file.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct SceneDocument {
    receivers_table: TableSchema,
    receivers: Vec<ReceiverRecord>,
    sources_table: TableSchema,
    sources: Vec<SourceRecord>,
    buildings: Vec<BuildingRecord>,
    soil: Vec<SoilRecord>,
    elevation: Vec<Vec3>,
}

impl Default for SceneDocument {
    fn default() -> Self {
        Self {
            receivers_table: TableSchema::keyed("RECEIVERS"),
            receivers: Vec::new(),
            sources_table: TableSchema::keyed("SOURCES"),
            sources: Vec::new(),
            buildings: Vec::new(),
            soil: Vec::new(),
            elevation: Vec::new(),
        }
    }
}

impl SceneDocument {
    fn into_store(self) -> MemoryInputStore {
        MemoryInputStore::new()
            .with_receivers(self.receivers_table, self.receivers)
            .with_sources(self.sources_table, self.sources)
            .with_buildings(self.buildings)
            .with_soil(self.soil)
            .with_elevation(self.elevation)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("cannot read '{}': {err}", path.display()))?;
    let value = serde_json::from_str(&text)
        .map_err(|err| format!("invalid JSON in '{}': {err}", path.display()))?;
    Ok(value)
}

fn parse_periods(codes: &[String]) -> Result<PeriodSelection, Box<dyn Error>> {
    let mut periods = PeriodSelection {
        day: false,
        evening: false,
        night: false,
        den: false,
    };
    for code in codes {
        match code.trim().to_uppercase().as_str() {
            "D" => periods.day = true,
            "E" => periods.evening = true,
            "N" => periods.night = true,
            "DEN" => periods.den = true,
            other => return Err(format!("unknown period '{other}'").into()),
        }
    }
    Ok(periods)
}

fn build_config(args: &Args) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => load_json::<RunConfig>(path)?,
        None => RunConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.thread_count = threads;
    }
    if !args.periods.is_empty() {
        config.periods = parse_periods(&args.periods)?;
    }
    if args.per_source {
        config.merge_sources = false;
    }
    if let Some(limit) = args.export_rays {
        config.export_rays = ExportRaysMode::ToTable;
        config.maximum_rays_output_count = limit;
    }
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = build_config(args)?;
    let scene: SceneDocument = load_json(&args.scene)?;
    info!(
        "Loaded {} receivers, {} sources, {} buildings from '{}'",
        scene.receivers.len(),
        scene.sources.len(),
        scene.buildings.len(),
        args.scene.display()
    );
    let store = scene.into_store();
    let output = SqlScriptStore::create(&args.output, args.gzip)?;

    let summary = NoiseMapRunner::new(config).run(&store, Box::new(output))?;
    info!(
        "{} receivers in {} cells ({} x {} grid), {} rows written to '{}'",
        summary.receivers_processed,
        summary.cells_processed,
        summary.grid_dim,
        summary.grid_dim,
        summary.rows_written,
        args.output.display()
    );
    for (table, rows) in &summary.rows_per_table {
        info!("  {table}: {rows} rows");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
