mod config;
mod display;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use stillopen_ai::{
    InferenceService, Normalizer, TrainedArtifact, Trainer, TrainingConfig, compute_features,
};
use stillopen_core::{CanonicalPlace, Origin, RawDataset, RawRecord};
use stillopen_store::FeatureTableRow;
use tracing_subscriber::EnvFilter;

use crate::config::FileConfig;

#[derive(Parser, Debug)]
#[command(name = "stillopen", version, about = "Predict whether a place is still operating")]
struct Cli {
    /// TOML config file.
    #[arg(long, global = true, env = "STILLOPEN_CONFIG")]
    config: Option<PathBuf>,

    /// Trained artifact to write or read.
    #[arg(long, global = true, env = "STILLOPEN_ARTIFACT")]
    artifact: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct DatasetArgs {
    /// Labelled sample set (.parquet or .json).
    #[arg(long)]
    original: Option<PathBuf>,
    /// Overture places export.
    #[arg(long)]
    overture: Option<PathBuf>,
    /// OSM export (.json, .jsonl or .parquet).
    #[arg(long)]
    osm: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model and write the artifact.
    Train {
        #[command(flatten)]
        datasets: DatasetArgs,
        /// Output path; defaults to --artifact.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        overture_cap: Option<usize>,
        #[arg(long)]
        trees: Option<usize>,
        /// Staleness reference, RFC 3339.
        #[arg(long)]
        reference_time: Option<DateTime<Utc>>,
    },
    /// Predict one record or every record of a JSON/NDJSON file.
    Predict {
        /// A single record as JSON.
        #[arg(long, conflicts_with = "file")]
        record: Option<String>,
        /// JSON array or one object per line.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Record shape; inferred when omitted.
        #[arg(long)]
        origin: Option<Origin>,
        /// Print one JSON result per line instead of cards.
        #[arg(long)]
        json: bool,
    },
    /// Export the engineered feature table to Parquet.
    Features {
        #[command(flatten)]
        datasets: DatasetArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// Show artifact metadata, cross-validation and feature importances.
    Inspect,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file_config = FileConfig::load(cli.config.as_deref())?;
    let artifact_path = file_config.artifact_path(cli.artifact.as_deref());

    match cli.command {
        Commands::Train {
            datasets,
            out,
            seed,
            overture_cap,
            trees,
            reference_time,
        } => {
            let mut config = file_config.training;
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(cap) = overture_cap {
                config.overture_cap = cap;
            }
            if let Some(trees) = trees {
                config.forest.n_estimators = trees;
            }
            if reference_time.is_some() {
                config.reference_time = reference_time;
            }
            cmd_train(config, &datasets, &out.unwrap_or(artifact_path))
        }
        Commands::Predict {
            record,
            file,
            origin,
            json,
        } => cmd_predict(&artifact_path, record.as_deref(), file.as_deref(), origin, json),
        Commands::Features { datasets, out } => cmd_features(file_config.training, &datasets, &out),
        Commands::Inspect => {
            let artifact = TrainedArtifact::load(&artifact_path)
                .with_context(|| format!("loading {}", artifact_path.display()))?;
            display::print_artifact_report(&artifact);
            Ok(())
        }
    }
}

fn load_datasets(args: &DatasetArgs) -> anyhow::Result<Vec<RawDataset>> {
    let inputs = [
        (Origin::Original, &args.original),
        (Origin::Overture, &args.overture),
        (Origin::Osm, &args.osm),
    ];
    let mut datasets = Vec::new();
    for (origin, path) in inputs {
        let Some(path) = path else { continue };
        let ds = stillopen_store::load_dataset(path, origin)
            .with_context(|| format!("loading {origin} dataset {}", path.display()))?;
        eprintln!("  Read {} {origin} records from {}", ds.len(), path.display());
        datasets.push(ds);
    }
    if datasets.is_empty() {
        bail!("no datasets given; pass at least one of --original, --overture, --osm");
    }
    Ok(datasets)
}

fn cmd_train(config: TrainingConfig, args: &DatasetArgs, out: &Path) -> anyhow::Result<()> {
    let datasets = load_datasets(args)?;
    let trainer = Trainer::new(config);

    eprintln!("  Training...");
    let artifact = trainer.train_datasets(datasets).context("training")?;
    artifact
        .save(out)
        .with_context(|| format!("writing artifact {}", out.display()))?;
    eprintln!("  Wrote {}", out.display());

    display::print_artifact_report(&artifact);
    Ok(())
}

fn cmd_predict(
    artifact_path: &Path,
    record: Option<&str>,
    file: Option<&Path>,
    origin: Option<Origin>,
    json: bool,
) -> anyhow::Result<()> {
    let records: Vec<RawRecord> = match (record, file) {
        (Some(text), _) => stillopen_store::parse_json_records(text).context("parsing --record")?,
        (None, Some(path)) => stillopen_store::read_json_records(path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => read_stdin_records()?,
    };
    if records.is_empty() {
        bail!("no records to predict");
    }

    let service = InferenceService::open_or_mock(artifact_path);

    for raw in &records {
        let origin = origin.unwrap_or_else(|| Origin::infer(raw));
        let detail = service.predict_detailed(raw, origin);
        if json {
            println!("{}", serde_json::to_string(&detail.result)?);
            continue;
        }
        display::print_prediction_card(&detail.place.name, &detail.result, detail.features.as_ref());
    }
    Ok(())
}

fn read_stdin_records() -> anyhow::Result<Vec<RawRecord>> {
    let text = std::io::read_to_string(std::io::stdin()).context("reading stdin")?;
    Ok(stillopen_store::parse_json_records(&text)?)
}

fn cmd_features(config: TrainingConfig, args: &DatasetArgs, out: &Path) -> anyhow::Result<()> {
    let datasets = load_datasets(args)?;
    let trainer = Trainer::new(config);
    let normalizer = Normalizer::new(trainer.reference_time());

    let places = trainer.normalize_datasets(&datasets, &normalizer)?;
    let places = trainer.cap_overture(places);
    let encoder = trainer.fit_encoder(&places);

    let rows: Vec<FeatureTableRow> = places
        .iter()
        .map(|p: &CanonicalPlace| FeatureTableRow {
            name: p.name.clone(),
            category: p.category.clone(),
            origin: p.origin,
            open: p.open_label,
            features: *compute_features(p, Some(&encoder)).values(),
        })
        .collect();

    stillopen_store::write_feature_table(out, &rows)
        .with_context(|| format!("writing {}", out.display()))?;
    eprintln!("  Wrote {} rows to {}", rows.len(), out.display());
    Ok(())
}
