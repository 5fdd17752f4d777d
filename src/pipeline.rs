//! Per-recording stage chaining and the parallel batch runner.
//!
//! ```text
//! jobs ──par_iter──▶ load → channels → ICA → artifact removal ─┬─ target-response → epochs → metrics
//!                                                               └─ non-response   → epochs → metrics
//!      ──barrier───▶ save per recording, aggregate every metric record into per-category CSVs
//! ```
//!
//! Each recording runs independently on the rayon pool. Files for a
//! recording are written only once its whole pipeline succeeded; tables are
//! written only after every job has returned.
use std::path::{Path, PathBuf};

use log::{error, info};
use rayon::prelude::*;
use serde::Serialize;

use crate::aggregate::{export_band_powers, export_category};
use crate::channels::{clean_channels, ChannelReport};
use crate::config::PipelineConfig;
use crate::epochs::{process_category, EpochSet};
use crate::error::Result;
use crate::features::{extract_metrics, MetricRecord};
use crate::ica::{remove_artifacts, run_ica, ComponentClassifier};
use crate::io;
use crate::recording::{Recording, RecordingMeta, TrialType};
use crate::spectrum::{recording_band_powers, BandPowerRow};

/// Directory (under the output root) holding cleaned continuous recordings.
pub const CLEANED_DIR: &str = "cleaned";
/// File name of each per-category metric table.
pub const METRICS_FILE: &str = "erp_metrics.csv";
/// File name of the band-power table.
pub const BAND_POWER_FILE: &str = "band_powers.csv";

/// One recording to process.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub path: PathBuf,
    pub meta: RecordingMeta,
    /// Category from the manifest or file name; restricts processing to that
    /// branch. `None` runs both.
    pub category: Option<TrialType>,
}

impl Job {
    pub fn categories(&self) -> Vec<TrialType> {
        match self.category {
            Some(c) => vec![c],
            None => TrialType::ALL.to_vec(),
        }
    }
}

/// Everything one recording produced.
#[derive(Debug)]
pub struct SubjectOutcome {
    /// Cleaned continuous recording with its decomposition attached.
    pub recording: Recording,
    pub channels: ChannelReport,
    /// One entry per processed category; `None` when no epoch survived.
    pub epochs: Vec<(TrialType, Option<EpochSet>)>,
    pub metrics: Vec<MetricRecord>,
}

/// Run both category branches on `rec`.
pub fn process_recording(
    rec: Recording,
    cfg: &PipelineConfig,
    classifier: &dyn ComponentClassifier,
) -> Result<SubjectOutcome> {
    process_recording_for(rec, cfg, classifier, &TrialType::ALL)
}

/// Channel filter, decomposition, artifact removal, then the epoch and
/// feature stages for each of `categories`.
pub fn process_recording_for(
    mut rec: Recording,
    cfg: &PipelineConfig,
    classifier: &dyn ComponentClassifier,
    categories: &[TrialType],
) -> Result<SubjectOutcome> {
    let channels = clean_channels(&mut rec, &cfg.channels)?;
    run_ica(&mut rec, &cfg.ica, classifier)?;
    remove_artifacts(&mut rec, &cfg.ica.bands)?;

    let mut epochs = Vec::with_capacity(categories.len());
    let mut metrics = Vec::new();
    for &category in categories {
        let set = process_category(&rec, category, &cfg.epochs)?;
        if let Some(set) = &set {
            metrics.push(extract_metrics(set, &cfg.features)?);
        }
        epochs.push((category, set));
    }
    Ok(SubjectOutcome { recording: rec, channels, epochs, metrics })
}

/// Output file of the epochs of `category` from `source`. The category label
/// is part of the name so that it can be inferred again from the file alone.
pub fn epochs_path(out_dir: &Path, category: TrialType, source: &str) -> PathBuf {
    out_dir
        .join(category.label())
        .join(format!("{source}_{}_epochs.safetensors", category.label()))
}

/// Output file of the cleaned continuous recording from `source`.
pub fn cleaned_path(out_dir: &Path, source: &str) -> PathBuf {
    out_dir.join(CLEANED_DIR).join(format!("{source}_cleaned.safetensors"))
}

/// A job that stopped with an error.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Result of [`run_batch`].
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Source names of the recordings that completed.
    pub completed: Vec<String>,
    pub failed: Vec<JobFailure>,
    pub metrics: Vec<MetricRecord>,
    pub band_powers: Vec<BandPowerRow>,
    /// Metric table written per category, with its row count.
    pub tables: Vec<(TrialType, PathBuf, usize)>,
}

/// Output files of one job, written under staging names and moved into
/// place together once every one of them has been written.
#[derive(Default)]
struct StagedOutputs {
    files: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.partial"))
    }

    /// Run `write` against the staging path of `path`.
    fn stage(&mut self, path: PathBuf, write: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let staged = Self::staging_path(&path);
        write(&staged)?;
        self.files.push((staged, path));
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        let files = std::mem::take(&mut self.files);
        for (i, (staged, path)) in files.iter().enumerate() {
            if let Err(e) = std::fs::rename(staged, path) {
                for (_, done) in &files[..i] {
                    let _ = std::fs::remove_file(done);
                }
                self.files = files[i..].to_vec();
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Drop for StagedOutputs {
    fn drop(&mut self) {
        for (staged, _) in &self.files {
            let _ = std::fs::remove_file(staged);
        }
    }
}

/// Load, process and save one job. Either every output file of the job
/// appears or none does.
fn run_job(
    job: &Job,
    cfg: &PipelineConfig,
    out_dir: &Path,
    classifier: &dyn ComponentClassifier,
) -> Result<(Vec<MetricRecord>, Vec<BandPowerRow>)> {
    let rec = io::load_recording(&job.path)?.with_meta(job.meta.clone());
    let source = job.meta.source.clone();
    info!("[{source}] {} channel(s), {:.1} s at {} Hz", rec.n_channels(), rec.n_times() as f64 / rec.sfreq, rec.sfreq);

    let outcome = process_recording_for(rec, cfg, classifier, &job.categories())?;

    let mut outputs = StagedOutputs::default();
    outputs.stage(cleaned_path(out_dir, &source), |p| io::save_recording(&outcome.recording, p))?;
    for (category, set) in &outcome.epochs {
        if let Some(set) = set {
            outputs.stage(epochs_path(out_dir, *category, &source), |p| io::save_epochs(set, p))?;
        }
    }
    outputs.commit()?;

    let bands = recording_band_powers(&outcome.recording, &cfg.spectrum);
    Ok((outcome.metrics, bands))
}

/// Process every job on the rayon pool, then aggregate.
///
/// A failing job is logged and listed in [`BatchSummary::failed`]; it leaves
/// no files behind and does not stop the others.
pub fn run_batch(
    jobs: &[Job],
    cfg: &PipelineConfig,
    out_dir: &Path,
    classifier: &dyn ComponentClassifier,
) -> Result<BatchSummary> {
    std::fs::create_dir_all(out_dir)?;
    info!("processing {} recording(s) on {} thread(s)", jobs.len(), rayon::current_num_threads());

    let results: Vec<(&Job, Result<(Vec<MetricRecord>, Vec<BandPowerRow>)>)> = jobs
        .par_iter()
        .map(|job| (job, run_job(job, cfg, out_dir, classifier)))
        .collect();

    let mut summary = BatchSummary::default();
    for (job, result) in results {
        match result {
            Ok((metrics, bands)) => {
                summary.completed.push(job.meta.source.clone());
                summary.metrics.extend(metrics);
                summary.band_powers.extend(bands);
            }
            Err(e) => {
                error!("[{}] failed: {e}", job.path.display());
                summary.failed.push(JobFailure {
                    path: job.path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    for category in TrialType::ALL {
        if !summary.metrics.iter().any(|m| m.category == category) {
            info!("{category}: no metric records, no table written");
            continue;
        }
        let dir = out_dir.join(category.label());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(METRICS_FILE);
        let rows = export_category(&summary.metrics, category, &path)?;
        info!("{category}: {rows} row(s) → {}", path.display());
        summary.tables.push((category, path, rows));
    }
    if !summary.band_powers.is_empty() {
        export_band_powers(&summary.band_powers, &out_dir.join(BAND_POWER_FILE))?;
    }

    info!(
        "batch done: {} completed, {} failed",
        summary.completed.len(),
        summary.failed.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_category_restricts_branches() {
        let mut job = Job {
            path: PathBuf::from("a.safetensors"),
            meta: RecordingMeta::default(),
            category: None,
        };
        assert_eq!(job.categories(), TrialType::ALL.to_vec());
        job.category = Some(TrialType::NonResponse);
        assert_eq!(job.categories(), vec![TrialType::NonResponse]);
    }

    #[test]
    fn dropped_staging_removes_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.safetensors");
        {
            let mut outputs = StagedOutputs::default();
            outputs
                .stage(target.clone(), |p| Ok(std::fs::write(p, b"x")?))
                .unwrap();
            assert!(StagedOutputs::staging_path(&target).exists());
            // Abandoned without commit.
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut outputs = StagedOutputs::default();
        outputs.stage(target.clone(), |p| Ok(std::fs::write(p, b"x")?)).unwrap();
        outputs.commit().unwrap();
        assert!(target.exists());
        assert!(!StagedOutputs::staging_path(&target).exists());
    }

    #[test]
    fn output_paths_are_per_category() {
        let p = epochs_path(Path::new("/out"), TrialType::TargetResponse, "HC_001");
        assert_eq!(p, PathBuf::from("/out/target-response/HC_001_target-response_epochs.safetensors"));
        assert_eq!(cleaned_path(Path::new("/out"), "x"), PathBuf::from("/out/cleaned/x_cleaned.safetensors"));
    }
}
