use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use erpclean::discover::{find_files, infer_category, parse_filename_meta, plan_jobs, Manifest, Requirement};
use erpclean::{
    export_band_powers, export_category, extract_metrics, load_epochs, load_recording,
    recording_band_powers, run_batch, FeatureClassifier, PipelineConfig, TrialType,
};

#[derive(Parser)]
#[command(name = "erpclean", about = "Batch EEG cleaning, epoching and ERP metrics")]
struct Args {
    /// JSON configuration; omitted fields keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline: channels, ICA, epochs, metrics
    Run {
        /// Directory searched recursively for recordings
        #[arg(long)]
        input: PathBuf,

        /// Output root; one sub-directory per trial type
        #[arg(long)]
        output: PathBuf,

        /// JSON list of {path, subject_id, category, subject_type}
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// File-name pattern of the recordings
        #[arg(long, default_value = "*.safetensors")]
        pattern: String,
    },

    /// Recompute metric tables from saved epoch files
    Features {
        /// Directory searched recursively for epoch files
        #[arg(long)]
        input: PathBuf,

        /// Output directory for the per-category tables
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "*_epochs.safetensors")]
        pattern: String,
    },

    /// Band power of cleaned continuous recordings
    Bandpower {
        #[arg(long)]
        input: PathBuf,

        /// CSV output path
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "*_cleaned.safetensors")]
        pattern: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match args.command {
        Command::Run { input, output, manifest, pattern } => {
            let files = find_files(&input, &pattern)?;
            if files.is_empty() {
                bail!("no files matching {pattern} under {}", input.display());
            }
            let manifest = manifest
                .map(|p| Manifest::from_json_file(&p).with_context(|| format!("loading manifest {}", p.display())))
                .transpose()?;
            let jobs = plan_jobs(files, manifest.as_ref(), &cfg.metadata)?;
            let classifier = FeatureClassifier::new(cfg.channels.line_freq);

            let summary = run_batch(&jobs, &cfg, &output, &classifier)?;
            for (category, path, rows) in &summary.tables {
                println!("{category}: {rows} row(s) → {}", path.display());
            }
            for f in &summary.failed {
                eprintln!("FAILED {}: {}", f.path.display(), f.error);
            }
            if summary.completed.is_empty() {
                bail!("every recording failed");
            }
        }

        Command::Features { input, output, pattern } => {
            let mut records = Vec::new();
            for path in find_files(&input, &pattern)? {
                // Mandatory here: a table row without its category is useless.
                let category = infer_category(&path, &cfg.metadata, Requirement::Mandatory)?
                    .context("category inference returned nothing")?;
                let set = load_epochs(&path)?;
                if set.trial_type != category {
                    bail!(
                        "{}: file name says {category}, contents say {}",
                        path.display(),
                        set.trial_type
                    );
                }
                records.push(extract_metrics(&set, &cfg.features)?);
            }
            std::fs::create_dir_all(&output)?;
            for category in TrialType::ALL {
                let path = output.join(format!("{}_erp_metrics.csv", category.label()));
                let rows = export_category(&records, category, &path)?;
                println!("{category}: {rows} row(s) → {}", path.display());
            }
        }

        Command::Bandpower { input, output, pattern } => {
            let mut rows = Vec::new();
            for path in find_files(&input, &pattern)? {
                let mut rec = load_recording(&path)?;
                if rec.meta.subject_id.is_empty() {
                    let parsed = parse_filename_meta(&path, &cfg.metadata)?;
                    rec.meta.subject_id = parsed.subject_id;
                    rec.meta.subject_type = parsed.subject_type;
                }
                if rec.meta.source.is_empty() {
                    rec.meta.source = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default();
                }
                if rec.log.is_empty() {
                    warn!("{} has no processing log; is it a cleaned recording?", path.display());
                }
                rows.extend(recording_band_powers(&rec, &cfg.spectrum));
            }
            export_band_powers(&rows, &output)?;
            info!("{} band-power row(s) → {}", rows.len(), output.display());
        }
    }
    Ok(())
}
